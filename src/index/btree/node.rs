//! B+Tree nodes, each stored as one data item.
//!
//! # Node Layout
//! ```text
//! ┌─────────────┬───────────────┬──────────────┐
//! │ is_leaf (1) │ key_count (2) │ sibling (8)  │   header
//! ├─────────────┴───┬───────────┴──────────────┤
//! │ son 0 (8)       │ key 0 (8)                │
//! │ son 1 (8)       │ key 1 (8)                │   slots
//! │ ...             │ ...                      │
//! └─────────────────┴──────────────────────────┘
//! ```
//! In an internal node, son `k` holds keys up to key `k`; the last key of
//! the rightmost internal node on each level is [`MAX_KEY`]. A key equal to
//! a separator may sit on either side of it once duplicates split. In a
//! leaf, son `k` is the record uid stored under key `k`. Siblings link
//! every level left to right, so a search that lands on a node which has
//! since split keeps walking right.

use crate::common::config::{BALANCE_NUMBER, SUPER_XID};
use crate::common::{Error, Result, Uid};
use crate::storage::{DataManager, ItemRef};

/// Index key.
pub type Key = i64;

/// Upper bound sentinel; never stored as a real key.
pub const MAX_KEY: Key = Key::MAX;

const IS_LEAF_OFFSET: usize = 0;
const KEY_COUNT_OFFSET: usize = IS_LEAF_OFFSET + 1;
const SIBLING_OFFSET: usize = KEY_COUNT_OFFSET + 2;
const NODE_HEADER_SIZE: usize = SIBLING_OFFSET + 8;
const SLOT_SIZE: usize = 16;

/// Keys a node holds when it splits.
pub const SPLIT_AT: usize = BALANCE_NUMBER * 2;

/// Payload size of every node.
pub const NODE_SIZE: usize = NODE_HEADER_SIZE + SLOT_SIZE * (SPLIT_AT + 2);

// ============================================================================
// Raw accessors
// ============================================================================

fn read_u64(raw: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&raw[at..at + 8]);
    u64::from_le_bytes(buf)
}

fn is_leaf(raw: &[u8]) -> bool {
    raw[IS_LEAF_OFFSET] == 1
}

fn set_leaf(raw: &mut [u8], leaf: bool) {
    raw[IS_LEAF_OFFSET] = leaf as u8;
}

fn key_count(raw: &[u8]) -> usize {
    u16::from_le_bytes([raw[KEY_COUNT_OFFSET], raw[KEY_COUNT_OFFSET + 1]]) as usize
}

fn set_key_count(raw: &mut [u8], count: usize) {
    raw[KEY_COUNT_OFFSET..KEY_COUNT_OFFSET + 2].copy_from_slice(&(count as u16).to_le_bytes());
}

fn sibling(raw: &[u8]) -> Uid {
    Uid(read_u64(raw, SIBLING_OFFSET))
}

fn set_sibling(raw: &mut [u8], sibling: Uid) {
    raw[SIBLING_OFFSET..SIBLING_OFFSET + 8].copy_from_slice(&sibling.0.to_le_bytes());
}

fn son_at(raw: &[u8], k: usize) -> Uid {
    Uid(read_u64(raw, NODE_HEADER_SIZE + k * SLOT_SIZE))
}

fn set_son(raw: &mut [u8], k: usize, son: Uid) {
    let at = NODE_HEADER_SIZE + k * SLOT_SIZE;
    raw[at..at + 8].copy_from_slice(&son.0.to_le_bytes());
}

fn key_at(raw: &[u8], k: usize) -> Key {
    read_u64(raw, NODE_HEADER_SIZE + k * SLOT_SIZE + 8) as Key
}

fn set_key(raw: &mut [u8], k: usize, key: Key) {
    let at = NODE_HEADER_SIZE + k * SLOT_SIZE + 8;
    raw[at..at + 8].copy_from_slice(&key.to_le_bytes());
}

/// Move slots `k..` one slot to the right, freeing slot `k`.
fn shift_from(raw: &mut [u8], k: usize) {
    let begin = NODE_HEADER_SIZE + (k + 1) * SLOT_SIZE;
    raw.copy_within(begin - SLOT_SIZE..NODE_SIZE - SLOT_SIZE, begin);
}

/// Raw bytes of an empty leaf.
pub fn new_nil_root_raw() -> Vec<u8> {
    let mut raw = vec![0u8; NODE_SIZE];
    set_leaf(&mut raw, true);
    raw
}

/// Raw bytes of an internal root over `left` and `right`, split at `key`.
pub fn new_root_raw(left: Uid, right: Uid, key: Key) -> Vec<u8> {
    let mut raw = vec![0u8; NODE_SIZE];
    set_leaf(&mut raw, false);
    set_key_count(&mut raw, 2);
    set_son(&mut raw, 0, left);
    set_key(&mut raw, 0, key);
    set_son(&mut raw, 1, right);
    set_key(&mut raw, 1, MAX_KEY);
    raw
}

/// Index of the first key not below `key`, or the key count.
fn lower_bound(raw: &[u8], key: Key) -> usize {
    let count = key_count(raw);
    (0..count).find(|&k| key_at(raw, k) >= key).unwrap_or(count)
}

/// Insert `(son, key)` in key order. In an internal node, `left` names the
/// child that split off `son`; the new son goes right after it.
///
/// Fails with the sibling uid if the key belongs further right.
fn insert_raw(raw: &mut [u8], son: Uid, key: Key, left: Option<Uid>) -> std::result::Result<(), Uid> {
    let count = key_count(raw);
    let right = sibling(raw);

    let kth = match left.filter(|_| !is_leaf(raw)) {
        Some(left) => match (0..count).find(|&k| son_at(raw, k) == left) {
            Some(k) => k,
            None if right != Uid::NONE => return Err(right),
            None => lower_bound(raw, key),
        },
        None => lower_bound(raw, key),
    };
    if kth == count && right != Uid::NONE {
        return Err(right);
    }

    if is_leaf(raw) {
        shift_from(raw, kth);
        set_key(raw, kth, key);
        set_son(raw, kth, son);
    } else {
        // The new son takes over the upper part of the range of son `kth`
        let bound = key_at(raw, kth);
        set_key(raw, kth, key);
        shift_from(raw, kth + 1);
        set_key(raw, kth + 1, bound);
        set_son(raw, kth + 1, son);
    }
    set_key_count(raw, count + 1);
    Ok(())
}

/// Raw bytes of the node holding the upper half of a full node.
fn upper_half(raw: &[u8]) -> Vec<u8> {
    let mut right = vec![0u8; NODE_SIZE];
    set_leaf(&mut right, is_leaf(raw));
    set_key_count(&mut right, BALANCE_NUMBER);
    set_sibling(&mut right, sibling(raw));

    let from = NODE_HEADER_SIZE + BALANCE_NUMBER * SLOT_SIZE;
    let len = NODE_SIZE - from;
    right[NODE_HEADER_SIZE..NODE_HEADER_SIZE + len].copy_from_slice(&raw[from..NODE_SIZE]);
    right
}

// ============================================================================
// Node
// ============================================================================

/// Where a search continues after one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchNext {
    /// Descend into this child.
    Child(Uid),
    /// The key lies right of this node; continue at its sibling.
    Sibling(Uid),
}

/// Matches found on one leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafRange {
    pub uids: Vec<Uid>,
    /// Set when the scan ran off this leaf's end and should continue in
    /// the sibling.
    pub sibling: Option<Uid>,
}

/// Result of inserting into one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// The node split; the parent must add `son` under `key`.
    Split { son: Uid, key: Key },
    /// The key belongs further right; nothing was changed.
    MoveRight(Uid),
}

/// A node borrowed from the data manager.
pub struct Node<'a> {
    dm: &'a DataManager,
    item: ItemRef<'a>,
}

impl<'a> Node<'a> {
    /// Load the node stored at `uid`.
    ///
    /// # Errors
    /// `Error::InvalidUid` if `uid` holds no live node.
    pub fn load(dm: &'a DataManager, uid: Uid) -> Result<Self> {
        let item = dm.read(uid)?.ok_or(Error::InvalidUid(uid.0))?;
        if item.data_len() != NODE_SIZE {
            return Err(Error::InvalidUid(uid.0));
        }
        Ok(Self { dm, item })
    }

    #[inline]
    pub fn uid(&self) -> Uid {
        self.item.uid()
    }

    pub fn is_leaf(&self) -> bool {
        self.item.read_data(is_leaf)
    }

    pub fn key_count(&self) -> usize {
        self.item.read_data(key_count)
    }

    pub fn sibling(&self) -> Option<Uid> {
        let sibling = self.item.read_data(sibling);
        (sibling != Uid::NONE).then_some(sibling)
    }

    pub fn keys(&self) -> Vec<Key> {
        self.item
            .read_data(|raw| (0..key_count(raw)).map(|k| key_at(raw, k)).collect())
    }

    /// Child covering `key`: the son of the first key strictly greater than
    /// it, else this node's sibling.
    pub fn search_next(&self, key: Key) -> SearchNext {
        self.item.read_data(|raw| {
            (0..key_count(raw))
                .find(|&k| key < key_at(raw, k))
                .map(|k| SearchNext::Child(son_at(raw, k)))
                .unwrap_or_else(|| SearchNext::Sibling(sibling(raw)))
        })
    }

    /// Leftmost child that may hold `key`: the son of the first key not
    /// below it, else this node's sibling. Scans start here, since equal
    /// keys can sit left of an equal separator.
    pub fn search_first(&self, key: Key) -> SearchNext {
        self.item.read_data(|raw| {
            let kth = lower_bound(raw, key);
            if kth < key_count(raw) {
                SearchNext::Child(son_at(raw, kth))
            } else {
                SearchNext::Sibling(sibling(raw))
            }
        })
    }

    /// Collect the uids stored under keys in `lo..=hi`.
    pub fn leaf_search_range(&self, lo: Key, hi: Key) -> LeafRange {
        self.item.read_data(|raw| {
            let count = key_count(raw);
            let mut kth = (0..count).find(|&k| key_at(raw, k) >= lo).unwrap_or(count);

            let mut uids = Vec::new();
            while kth < count && key_at(raw, kth) <= hi {
                uids.push(son_at(raw, kth));
                kth += 1;
            }

            let right = sibling(raw);
            let sibling = (kth == count && right != Uid::NONE).then_some(right);
            LeafRange { uids, sibling }
        })
    }

    /// Insert `(son, key)` and split the node if it fills up.
    ///
    /// The upper half moves to a new node linked as this node's sibling.
    /// Both edits are logged under the super transaction.
    ///
    /// # Errors
    /// Any data manager error; this node is left unchanged in that case.
    pub fn insert_and_split(&self, son: Uid, key: Key) -> Result<InsertOutcome> {
        self.insert_with(son, key, None)
    }

    /// Record in this internal node that child `left` split off `son`
    /// starting at `key`, splitting this node in turn if it fills up.
    pub fn insert_split_child(&self, left: Uid, son: Uid, key: Key) -> Result<InsertOutcome> {
        self.insert_with(son, key, Some(left))
    }

    fn insert_with(&self, son: Uid, key: Key, left: Option<Uid>) -> Result<InsertOutcome> {
        let update = self.item.before();

        let inserted = {
            let mut raw = update.data_mut();
            insert_raw(&mut raw, son, key, left)
                .map(|()| (key_count(&raw) == SPLIT_AT).then(|| upper_half(&raw)))
        };
        let upper = match inserted {
            Ok(upper) => upper,
            Err(sibling) => {
                update.un_before();
                return Ok(InsertOutcome::MoveRight(sibling));
            }
        };

        let Some(upper) = upper else {
            update.after(SUPER_XID)?;
            return Ok(InsertOutcome::Inserted);
        };

        let split_key = key_at(&upper, 0);
        let new_son = self.dm.insert(SUPER_XID, &upper)?;
        {
            let mut raw = update.data_mut();
            set_key_count(&mut raw, BALANCE_NUMBER);
            set_sibling(&mut raw, new_son);
        }
        update.after(SUPER_XID)?;

        Ok(InsertOutcome::Split {
            son: new_son,
            key: split_key,
        })
    }
}

impl std::fmt::Debug for Node<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("uid", &self.uid())
            .field("leaf", &self.is_leaf())
            .field("keys", &self.keys())
            .field("sibling", &self.sibling())
            .finish()
    }
}
