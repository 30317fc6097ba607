//! Record identifier type.

use std::fmt;

use super::PageId;

/// Identifies a record by its location: page number in the high 32 bits,
/// in-page byte offset in the low 16 bits.
///
/// # Example
/// ```
/// use tidedb::{PageId, Uid};
///
/// let uid = Uid::from_parts(PageId::new(3), 120);
/// assert_eq!(uid.page_id(), PageId::new(3));
/// assert_eq!(uid.offset(), 120);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Uid(pub u64);

impl Uid {
    /// Sentinel for "no record", used by B+Tree nodes for absent siblings.
    pub const NONE: Uid = Uid(0);

    /// Build a uid from a page number and in-page offset.
    #[inline]
    pub fn from_parts(page_id: PageId, offset: u16) -> Self {
        Uid(((page_id.0 as u64) << 32) | offset as u64)
    }

    /// Page holding the record.
    #[inline]
    pub fn page_id(&self) -> PageId {
        PageId((self.0 >> 32) as u32)
    }

    /// Byte offset of the record inside its page.
    #[inline]
    pub fn offset(&self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Uid({}:{})", self.page_id().0, self.offset())
    }
}
