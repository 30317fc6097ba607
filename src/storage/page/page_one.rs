//! Page 1: the clean-shutdown marker.
//!
//! On every open, 8 random bytes are written at offset 100. A clean close
//! copies them to offset 108. If the two ranges differ at the next open, the
//! previous process did not shut down cleanly and recovery must run.

use rand::rngs::OsRng;
use rand::RngCore;

use crate::common::config::PAGE_SIZE;

use super::Page;

const MARKER_OFFSET: usize = 100;
const MARKER_LEN: usize = 8;

/// Raw bytes of a fresh page 1 with its open marker already set.
pub fn init_raw() -> Vec<u8> {
    let mut raw = vec![0u8; PAGE_SIZE];
    write_open_marker(&mut raw);
    raw
}

fn write_open_marker(raw: &mut [u8]) {
    OsRng.fill_bytes(&mut raw[MARKER_OFFSET..MARKER_OFFSET + MARKER_LEN]);
}

/// Stamp a new open marker.
pub fn set_open(page: &Page) {
    write_open_marker(&mut page.data_mut());
    page.mark_dirty();
}

/// Copy the open marker into the close slot.
pub fn set_closed(page: &Page) {
    page.data_mut().copy_within(
        MARKER_OFFSET..MARKER_OFFSET + MARKER_LEN,
        MARKER_OFFSET + MARKER_LEN,
    );
    page.mark_dirty();
}

/// Whether the last session closed cleanly.
pub fn is_clean(page: &Page) -> bool {
    let data = page.data();
    data[MARKER_OFFSET..MARKER_OFFSET + MARKER_LEN]
        == data[MARKER_OFFSET + MARKER_LEN..MARKER_OFFSET + 2 * MARKER_LEN]
}
