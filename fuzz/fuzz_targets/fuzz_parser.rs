#![no_main]
//! Fuzz target for the VT parser
//!
//! Feeds random bytes through the interpreter to find panics, hangs, or
//! invariant violations: the cursor must stay on the screen and wide
//! cells must keep their companion pairing.

use libfuzzer_sys::fuzz_target;

use terminal::parser::Parser;

fuzz_target!(|data: &[u8]| {
    let mut parser = Parser::new(24, 80);
    parser.input_write(data);
    parser.flush_damage();
    let _ = parser.take_events();

    let cursor = parser.cursor();
    assert!(cursor.row < 24 && cursor.col < 80);

    for row in 0..24 {
        let row = parser.visible_row(row).expect("row exists");
        assert_eq!(row.len(), 80);
        let cells = row.cells();
        for col in 0..cells.len() {
            if cells[col].is_wide_companion() {
                assert!(col > 0 && cells[col - 1].is_wide());
            }
            if cells[col].is_wide() {
                assert!(col + 1 < cells.len() && cells[col + 1].is_wide_companion());
            }
        }
    }
});
