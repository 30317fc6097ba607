//! Row locks with deadlock detection.
//!
//! Tracks which transaction holds which uid and which transaction waits for
//! which uid. Those two relations form a wait-for graph: `xid -> uid ->
//! holder`. A request that would close a cycle in that graph is refused.
//!
//! # Thread Safety
//! All graph state sits behind one mutex. Waiting happens outside it, on a
//! per-waiter condition variable that the releasing transaction signals.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::common::{Error, Result, Uid, Xid};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WaitState {
    Waiting,
    Granted,
    Withdrawn,
}

/// Handle a blocked transaction parks on until the uid it wants is handed
/// to it, or until the transaction is removed while still waiting.
#[derive(Debug)]
pub struct Waiter {
    xid: Xid,
    state: Mutex<WaitState>,
    cv: Condvar,
}

impl Waiter {
    fn new(xid: Xid) -> Self {
        Self {
            xid,
            state: Mutex::new(WaitState::Waiting),
            cv: Condvar::new(),
        }
    }

    /// Block until the lock is granted.
    ///
    /// # Errors
    /// `Error::DeadTransaction` if the waiting transaction was removed from
    /// the table before the lock reached it.
    pub fn wait(&self) -> Result<()> {
        let mut state = self.state.lock();
        while *state == WaitState::Waiting {
            self.cv.wait(&mut state);
        }
        match *state {
            WaitState::Withdrawn => Err(Error::DeadTransaction(self.xid)),
            _ => Ok(()),
        }
    }

    fn grant(&self) {
        self.settle(WaitState::Granted);
    }

    fn withdraw(&self) {
        self.settle(WaitState::Withdrawn);
    }

    fn settle(&self, to: WaitState) {
        let mut state = self.state.lock();
        if *state == WaitState::Waiting {
            *state = to;
        }
        self.cv.notify_all();
    }
}

#[derive(Debug, Default)]
struct WaitGraph {
    /// Uids each transaction holds.
    held: HashMap<Xid, Vec<Uid>>,
    /// Holder of each locked uid.
    holder: HashMap<Uid, Xid>,
    /// Transactions queued on each uid, oldest first.
    waiters: HashMap<Uid, VecDeque<Xid>>,
    /// Parked handle of each waiting transaction.
    parked: HashMap<Xid, Arc<Waiter>>,
    /// Uid each waiting transaction wants.
    awaiting: HashMap<Xid, Uid>,
}

impl WaitGraph {
    fn holds(&self, xid: Xid, uid: Uid) -> bool {
        self.held.get(&xid).is_some_and(|uids| uids.contains(&uid))
    }

    fn grant(&mut self, xid: Xid, uid: Uid) {
        self.holder.insert(uid, xid);
        self.held.entry(xid).or_default().push(uid);
    }

    fn dequeue(&mut self, xid: Xid, uid: Uid) {
        if let Some(queue) = self.waiters.get_mut(&uid) {
            queue.retain(|&waiting| waiting != xid);
            if queue.is_empty() {
                self.waiters.remove(&uid);
            }
        }
    }

    fn has_deadlock(&self) -> bool {
        let mut stamps: HashMap<Xid, u32> = HashMap::new();
        let mut stamp = 0;
        for &xid in self.held.keys() {
            if stamps.contains_key(&xid) {
                continue;
            }
            stamp += 1;
            if self.walk(xid, stamp, &mut stamps) {
                return true;
            }
        }
        false
    }

    /// Follow wait edges from `xid`. Meeting the current stamp again is a
    /// cycle; meeting an older stamp joins a path already known to be clear.
    fn walk(&self, mut xid: Xid, stamp: u32, stamps: &mut HashMap<Xid, u32>) -> bool {
        loop {
            match stamps.get(&xid) {
                Some(&seen) if seen == stamp => return true,
                Some(_) => return false,
                None => {}
            }
            stamps.insert(xid, stamp);

            let Some(uid) = self.awaiting.get(&xid) else {
                return false;
            };
            let Some(&next) = self.holder.get(uid) else {
                return false;
            };
            xid = next;
        }
    }

    /// Give `uid` to the oldest still-parked waiter, if any.
    fn hand_over(&mut self, uid: Uid) {
        self.holder.remove(&uid);
        let Some(queue) = self.waiters.get_mut(&uid) else {
            return;
        };

        while let Some(next) = queue.pop_front() {
            if let Some(waiter) = self.parked.remove(&next) {
                self.awaiting.remove(&next);
                self.holder.insert(uid, next);
                self.held.entry(next).or_default().push(uid);
                waiter.grant();
                break;
            }
        }
        if queue.is_empty() {
            self.waiters.remove(&uid);
        }
    }
}

/// Exclusive row locks keyed by uid.
///
/// # Example
/// ```
/// use tidedb::concurrency::LockTable;
/// use tidedb::Uid;
///
/// let locks = LockTable::new();
/// assert!(locks.add(1, Uid(10)).unwrap().is_none());
/// let waiter = locks.add(2, Uid(10)).unwrap().expect("must wait");
/// locks.remove(1);
/// waiter.wait().unwrap();
/// ```
#[derive(Debug, Default)]
pub struct LockTable {
    graph: Mutex<WaitGraph>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request `uid` for `xid`.
    ///
    /// Returns None if the lock was taken (or was already held by `xid`),
    /// or a [`Waiter`] to block on if another transaction holds it.
    ///
    /// # Errors
    /// Returns `Error::Deadlock` if waiting would close a cycle. The request
    /// is withdrawn in that case and the graph is left as it was.
    pub fn add(&self, xid: Xid, uid: Uid) -> Result<Option<Arc<Waiter>>> {
        let mut graph = self.graph.lock();
        if graph.holds(xid, uid) {
            return Ok(None);
        }
        if !graph.holder.contains_key(&uid) {
            graph.grant(xid, uid);
            return Ok(None);
        }

        graph.awaiting.insert(xid, uid);
        graph.waiters.entry(uid).or_default().push_back(xid);
        if graph.has_deadlock() {
            graph.awaiting.remove(&xid);
            graph.dequeue(xid, uid);
            debug!(xid, uid = %uid, "lock.deadlock");
            return Err(Error::Deadlock);
        }

        let waiter = Arc::new(Waiter::new(xid));
        graph.parked.insert(xid, Arc::clone(&waiter));
        Ok(Some(waiter))
    }

    /// Release everything `xid` holds and withdraw any pending request.
    /// Each released uid goes to its oldest waiter; a thread still parked
    /// for `xid` wakes with an error.
    pub fn remove(&self, xid: Xid) {
        let mut graph = self.graph.lock();
        if let Some(uid) = graph.awaiting.remove(&xid) {
            graph.dequeue(xid, uid);
        }
        if let Some(waiter) = graph.parked.remove(&xid) {
            waiter.withdraw();
            debug!(xid, "lock.withdraw");
        }

        if let Some(uids) = graph.held.remove(&xid) {
            for uid in uids {
                graph.hand_over(uid);
            }
        }
    }

    /// Current holder of `uid`.
    pub fn holder(&self, uid: Uid) -> Option<Xid> {
        self.graph.lock().holder.get(&uid).copied()
    }

    /// Number of transactions blocked on some uid.
    pub fn waiting(&self) -> usize {
        self.graph.lock().awaiting.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_free_lock_granted() {
        let locks = LockTable::new();
        assert!(locks.add(1, Uid(100)).unwrap().is_none());
        assert_eq!(locks.holder(Uid(100)), Some(1));

        // Reentrant for the holder
        assert!(locks.add(1, Uid(100)).unwrap().is_none());
        assert_eq!(locks.waiting(), 0);
    }

    #[test]
    fn test_remove_hands_over() {
        let locks = LockTable::new();
        locks.add(1, Uid(100)).unwrap();
        let waiter = locks.add(2, Uid(100)).unwrap().unwrap();
        assert_eq!(locks.waiting(), 1);

        locks.remove(1);
        waiter.wait().unwrap();
        assert_eq!(locks.holder(Uid(100)), Some(2));
        assert_eq!(locks.waiting(), 0);

        locks.remove(2);
        assert_eq!(locks.holder(Uid(100)), None);
    }

    #[test]
    fn test_waiters_served_in_order() {
        let locks = LockTable::new();
        locks.add(1, Uid(7)).unwrap();
        let second = locks.add(2, Uid(7)).unwrap().unwrap();
        let third = locks.add(3, Uid(7)).unwrap().unwrap();

        locks.remove(1);
        second.wait().unwrap();
        assert_eq!(locks.holder(Uid(7)), Some(2));

        locks.remove(2);
        third.wait().unwrap();
        assert_eq!(locks.holder(Uid(7)), Some(3));
    }

    #[test]
    fn test_withdrawn_waiter_skipped() {
        let locks = LockTable::new();
        locks.add(1, Uid(7)).unwrap();
        let _second = locks.add(2, Uid(7)).unwrap().unwrap();
        let third = locks.add(3, Uid(7)).unwrap().unwrap();

        locks.remove(2);
        locks.remove(1);
        third.wait().unwrap();
        assert_eq!(locks.holder(Uid(7)), Some(3));
    }

    #[test]
    fn test_remove_wakes_own_waiter() {
        let locks = Arc::new(LockTable::new());
        locks.add(1, Uid(5)).unwrap();
        let waiter = locks.add(2, Uid(5)).unwrap().unwrap();

        let handle = thread::spawn(move || waiter.wait());
        thread::sleep(Duration::from_millis(20));
        locks.remove(2);

        assert!(matches!(handle.join().unwrap(), Err(Error::DeadTransaction(2))));
        assert_eq!(locks.waiting(), 0);
        // The holder is untouched and later releases hand over to nobody
        assert_eq!(locks.holder(Uid(5)), Some(1));
        locks.remove(1);
        assert_eq!(locks.holder(Uid(5)), None);
    }

    #[test]
    fn test_two_way_deadlock() {
        let locks = LockTable::new();
        locks.add(1, Uid(10)).unwrap();
        locks.add(2, Uid(20)).unwrap();

        let waiter = locks.add(1, Uid(20)).unwrap().unwrap();
        assert!(matches!(locks.add(2, Uid(10)), Err(Error::Deadlock)));
        // Refused request left no edge behind
        assert_eq!(locks.waiting(), 1);

        locks.remove(2);
        waiter.wait().unwrap();
        assert_eq!(locks.holder(Uid(20)), Some(1));
    }

    #[test]
    fn test_three_way_deadlock() {
        let locks = LockTable::new();
        locks.add(1, Uid(1)).unwrap();
        locks.add(2, Uid(2)).unwrap();
        locks.add(3, Uid(3)).unwrap();

        locks.add(1, Uid(2)).unwrap().unwrap();
        locks.add(2, Uid(3)).unwrap().unwrap();
        assert!(matches!(locks.add(3, Uid(1)), Err(Error::Deadlock)));
    }

    #[test]
    fn test_chain_without_cycle() {
        let locks = LockTable::new();
        locks.add(1, Uid(1)).unwrap();
        locks.add(2, Uid(2)).unwrap();

        locks.add(2, Uid(1)).unwrap().unwrap();
        locks.add(3, Uid(2)).unwrap().unwrap();
        assert_eq!(locks.waiting(), 2);
    }

    #[test]
    fn test_blocked_thread_wakes() {
        let locks = Arc::new(LockTable::new());
        locks.add(1, Uid(5)).unwrap();

        let handle = {
            let locks = Arc::clone(&locks);
            thread::spawn(move || {
                if let Some(waiter) = locks.add(2, Uid(5)).unwrap() {
                    waiter.wait().unwrap();
                }
                locks.holder(Uid(5))
            })
        };

        thread::sleep(Duration::from_millis(50));
        locks.remove(1);
        assert_eq!(handle.join().unwrap(), Some(2));
    }
}
