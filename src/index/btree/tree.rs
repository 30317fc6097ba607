//! The B+Tree itself: root tracking, descent, range scans and inserts.

use parking_lot::Mutex;
use tracing::debug;

use crate::common::config::SUPER_XID;
use crate::common::{Error, Result, Uid};
use crate::storage::{DataManager, ItemRef};

use super::node::{self, InsertOutcome, Key, Node, SearchNext, MAX_KEY};

/// A disk-resident B+Tree mapping keys to record uids.
///
/// The tree is reached through a boot item holding the current root uid,
/// so the root can move when it splits while the boot uid stays fixed.
///
/// # Thread Safety
/// Node edits latch only the node being changed. A descent that arrives at
/// a node which split underneath it follows sibling links to the right.
///
/// # Example
/// ```no_run
/// use tidedb::index::BPlusTree;
/// # fn demo(dm: &tidedb::storage::DataManager) -> tidedb::Result<()> {
/// let boot = BPlusTree::create(dm)?;
/// let tree = BPlusTree::load(dm, boot)?;
/// tree.insert(42, tidedb::Uid(7))?;
/// assert_eq!(tree.search(42)?, vec![tidedb::Uid(7)]);
/// # Ok(())
/// # }
/// ```
pub struct BPlusTree<'a> {
    dm: &'a DataManager,
    boot_uid: Uid,
    boot: ItemRef<'a>,
    boot_lock: Mutex<()>,
}

impl<'a> BPlusTree<'a> {
    /// Create an empty tree and return its boot uid.
    pub fn create(dm: &DataManager) -> Result<Uid> {
        let root = dm.insert(SUPER_XID, &node::new_nil_root_raw())?;
        let boot = dm.insert(SUPER_XID, &root.0.to_le_bytes())?;

        debug!(boot = %boot, root = %root, "btree.create");
        Ok(boot)
    }

    /// Open the tree whose boot item lives at `boot_uid`.
    pub fn load(dm: &'a DataManager, boot_uid: Uid) -> Result<Self> {
        let boot = dm.read(boot_uid)?.ok_or(Error::InvalidUid(boot_uid.0))?;
        if boot.data_len() != 8 {
            return Err(Error::InvalidUid(boot_uid.0));
        }
        Ok(Self {
            dm,
            boot_uid,
            boot,
            boot_lock: Mutex::new(()),
        })
    }

    #[inline]
    pub fn boot_uid(&self) -> Uid {
        self.boot_uid
    }

    /// Uid of the current root node.
    pub fn root_uid(&self) -> Uid {
        let _guard = self.boot_lock.lock();
        self.boot.read_data(|raw| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(raw);
            Uid(u64::from_le_bytes(buf))
        })
    }

    fn update_root_uid(&self, left: Uid, right: Uid, key: Key) -> Result<()> {
        let _guard = self.boot_lock.lock();
        let root = self
            .dm
            .insert(SUPER_XID, &node::new_root_raw(left, right, key))?;

        let update = self.boot.before();
        update.data_mut().copy_from_slice(&root.0.to_le_bytes());
        update.after(SUPER_XID)?;

        debug!(boot = %self.boot_uid, root = %root, "btree.new_root");
        Ok(())
    }

    // ========================================================================
    // Public API: Lookup
    // ========================================================================

    /// Uids stored under `key`.
    pub fn search(&self, key: Key) -> Result<Vec<Uid>> {
        self.search_range(key, key)
    }

    /// Uids stored under keys in `lo..=hi`, in key order.
    pub fn search_range(&self, lo: Key, hi: Key) -> Result<Vec<Uid>> {
        if lo > hi || lo == MAX_KEY {
            return Ok(Vec::new());
        }

        let mut leaf_uid = self.search_leaf(self.root_uid(), lo)?;
        let mut uids = Vec::new();
        loop {
            let range = Node::load(self.dm, leaf_uid)?.leaf_search_range(lo, hi);
            uids.extend(range.uids);
            match range.sibling {
                Some(sibling) => leaf_uid = sibling,
                None => break,
            }
        }
        Ok(uids)
    }

    /// Leftmost leaf that may hold `key`.
    fn search_leaf(&self, mut node_uid: Uid, key: Key) -> Result<Uid> {
        loop {
            if Node::load(self.dm, node_uid)?.is_leaf() {
                return Ok(node_uid);
            }
            node_uid = self.walk(node_uid, key, Node::search_first)?;
        }
    }

    /// Child of the internal node at `node_uid` covering `key`, walking
    /// right across siblings as needed.
    fn search_next(&self, node_uid: Uid, key: Key) -> Result<Uid> {
        self.walk(node_uid, key, Node::search_next)
    }

    fn walk(&self, mut node_uid: Uid, key: Key, step: fn(&Node<'a>, Key) -> SearchNext) -> Result<Uid> {
        loop {
            match step(&Node::load(self.dm, node_uid)?, key) {
                SearchNext::Child(child) => return Ok(child),
                SearchNext::Sibling(sibling) if sibling == Uid::NONE => {
                    return Err(Error::ReservedKey(key));
                }
                SearchNext::Sibling(sibling) => node_uid = sibling,
            }
        }
    }

    // ========================================================================
    // Public API: Insert
    // ========================================================================

    /// Store `uid` under `key`. Duplicate keys are kept side by side.
    ///
    /// # Errors
    /// - `Error::ReservedKey` for [`MAX_KEY`]
    /// - Any data manager error from writing nodes
    pub fn insert(&self, key: Key, uid: Uid) -> Result<()> {
        if key == MAX_KEY {
            return Err(Error::ReservedKey(key));
        }

        if let Some(split) = self.insert_at(self.root_uid(), uid, key)? {
            self.update_root_uid(split.left, split.son, split.key)?;
        }
        Ok(())
    }

    /// Insert below `node_uid`, returning the split to record in its parent.
    fn insert_at(&self, node_uid: Uid, uid: Uid, key: Key) -> Result<Option<Split>> {
        if Node::load(self.dm, node_uid)?.is_leaf() {
            return self.insert_and_split(node_uid, uid, key, None);
        }

        let child = self.search_next(node_uid, key)?;
        match self.insert_at(child, uid, key)? {
            Some(split) => self.insert_and_split(node_uid, split.son, split.key, Some(split.left)),
            None => Ok(None),
        }
    }

    fn insert_and_split(
        &self,
        mut node_uid: Uid,
        son: Uid,
        key: Key,
        left: Option<Uid>,
    ) -> Result<Option<Split>> {
        loop {
            let node = Node::load(self.dm, node_uid)?;
            let outcome = match left {
                Some(left) => node.insert_split_child(left, son, key)?,
                None => node.insert_and_split(son, key)?,
            };
            match outcome {
                InsertOutcome::Inserted => return Ok(None),
                InsertOutcome::Split { son, key } => {
                    return Ok(Some(Split {
                        left: node_uid,
                        son,
                        key,
                    }))
                }
                InsertOutcome::MoveRight(sibling) => node_uid = sibling,
            }
        }
    }
}

/// A node that split: `son` took over `left`'s keys from `key` up.
struct Split {
    left: Uid,
    son: Uid,
    key: Key,
}

impl std::fmt::Debug for BPlusTree<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BPlusTree")
            .field("boot_uid", &self.boot_uid)
            .field("root_uid", &self.root_uid())
            .finish()
    }
}
