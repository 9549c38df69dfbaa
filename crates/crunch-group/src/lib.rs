//! Process-group runtime for taskcrunch cohorts
//!
//! A cohort is a fixed set of N cooperating members, each holding a unique
//! rank in `[0, N)`. Members coordinate through two collective operations:
//!
//! - `barrier()`: blocks until every member of the group has called it
//! - `broadcast(value, root)`: every member receives the value held by
//!   `root` at call time
//!
//! `ThreadGroup` implements the collectives for members running as threads
//! of one process. A member that unwinds (or is dropped) without calling
//! [`GroupMember::leave`] abandons the group: every peer blocked in, or
//! later entering, a collective gets [`GroupError::Abandoned`] instead of
//! waiting forever.

mod rendezvous;

use std::sync::{Arc, Mutex};

use thiserror::Error;

use rendezvous::Rendezvous;

/// Errors from group operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GroupError {
    #[error("a group needs at least one member")]
    EmptyGroup,

    #[error("group abandoned by a member that left without finishing")]
    Abandoned,
}

/// Result type for group operations.
pub type GroupResult<T> = Result<T, GroupError>;

/// Collective primitives consumed by the coordination protocol.
pub trait Collective {
    /// This member's rank in `[0, size)`.
    fn rank(&self) -> usize;

    /// Number of members in the group.
    fn size(&self) -> usize;

    /// Block until every member has reached this point.
    fn barrier(&self) -> GroupResult<()>;

    /// Return the value `root` passed in. Values passed by other members
    /// are ignored.
    ///
    /// # Panics
    ///
    /// Panics if `root` is not a rank of this group.
    fn broadcast(&self, value: u64, root: usize) -> GroupResult<u64>;
}

struct Shared {
    rendezvous: Rendezvous,
    slot: Mutex<u64>,
}

/// Builder for a group of in-process members.
pub struct ThreadGroup;

impl ThreadGroup {
    /// Create `size` members, returned in rank order.
    pub fn new(size: usize) -> GroupResult<Vec<GroupMember>> {
        if size == 0 {
            return Err(GroupError::EmptyGroup);
        }

        let shared = Arc::new(Shared {
            rendezvous: Rendezvous::new(size),
            slot: Mutex::new(0),
        });

        Ok((0..size)
            .map(|rank| GroupMember {
                rank,
                size,
                shared: Arc::clone(&shared),
                left: false,
            })
            .collect())
    }
}

/// One member's handle on a [`ThreadGroup`].
pub struct GroupMember {
    rank: usize,
    size: usize,
    shared: Arc<Shared>,
    left: bool,
}

impl GroupMember {
    /// Leave the group after the final collective.
    ///
    /// Every member must have completed the same last collective before
    /// any of them leaves; leaving never disturbs peers.
    pub fn leave(mut self) {
        self.left = true;
    }

    /// Abandon the group, waking every blocked peer with an error.
    pub fn abandon(self) {
        // Drop does the work.
    }

    fn read_slot(&self) -> u64 {
        // The slot is a plain integer, a poisoned lock still holds a valid value.
        *self.shared.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn write_slot(&self, value: u64) {
        *self.shared.slot.lock().unwrap_or_else(|e| e.into_inner()) = value;
    }
}

impl Collective for GroupMember {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn barrier(&self) -> GroupResult<()> {
        self.shared.rendezvous.wait()
    }

    fn broadcast(&self, value: u64, root: usize) -> GroupResult<u64> {
        assert!(
            root < self.size,
            "broadcast root {} outside group of size {}",
            root,
            self.size
        );

        if self.rank == root {
            self.write_slot(value);
        }

        // Publish: nobody reads before the root has written.
        self.shared.rendezvous.wait()?;
        let received = self.read_slot();
        // Drain: the root cannot overwrite the slot until every member has read it.
        self.shared.rendezvous.wait()?;

        Ok(received)
    }
}

impl Drop for GroupMember {
    fn drop(&mut self) {
        if !self.left {
            tracing::warn!(rank = self.rank, "group member dropped without leaving, abandoning group");
            self.shared.rendezvous.abandon();
        }
    }
}

impl std::fmt::Debug for GroupMember {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupMember")
            .field("rank", &self.rank)
            .field("size", &self.size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_empty_group_rejected() {
        assert_eq!(ThreadGroup::new(0).unwrap_err(), GroupError::EmptyGroup);
    }

    #[test]
    fn test_members_in_rank_order() {
        let members = ThreadGroup::new(3).unwrap();
        let ranks: Vec<_> = members.iter().map(|m| m.rank()).collect();
        assert_eq!(ranks, vec![0, 1, 2]);
        assert!(members.iter().all(|m| m.size() == 3));
        members.into_iter().for_each(GroupMember::leave);
    }

    #[test]
    fn test_single_member_collectives_return_immediately() {
        let member = ThreadGroup::new(1).unwrap().pop().unwrap();
        member.barrier().unwrap();
        assert_eq!(member.broadcast(42, 0).unwrap(), 42);
        member.leave();
    }

    #[test]
    fn test_broadcast_delivers_root_value_to_everyone() {
        let members = ThreadGroup::new(4).unwrap();

        let handles: Vec<_> = members
            .into_iter()
            .map(|member| {
                thread::spawn(move || {
                    let mut seen = Vec::new();
                    for round in 0..20u64 {
                        member.barrier().unwrap();
                        // Non-root members pass garbage that must be ignored.
                        let mine = if member.rank() == 0 { round * 10 } else { 999 };
                        seen.push(member.broadcast(mine, 0).unwrap());
                    }
                    member.leave();
                    seen
                })
            })
            .collect();

        let expected: Vec<u64> = (0..20).map(|r| r * 10).collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), expected);
        }
    }

    #[test]
    fn test_broadcast_from_non_zero_root() {
        let members = ThreadGroup::new(3).unwrap();

        let handles: Vec<_> = members
            .into_iter()
            .map(|member| {
                thread::spawn(move || {
                    let value = member.broadcast(member.rank() as u64 + 100, 2).unwrap();
                    member.leave();
                    value
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), 102);
        }
    }

    #[test]
    fn test_dropped_member_abandons_waiting_peers() {
        let mut members = ThreadGroup::new(2).unwrap();
        let quitter = members.pop().unwrap();
        let waiter = members.pop().unwrap();

        let (tx, rx) = mpsc::channel();
        let handle = thread::spawn(move || {
            tx.send(waiter.barrier()).unwrap();
        });

        thread::sleep(Duration::from_millis(50));
        quitter.abandon();

        let result = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(result, Err(GroupError::Abandoned));
        handle.join().unwrap();
    }

    #[test]
    fn test_panicking_member_abandons_group() {
        let members = ThreadGroup::new(2).unwrap();
        let mut iter = members.into_iter();
        let panicker = iter.next().unwrap();
        let survivor = iter.next().unwrap();

        let bad = thread::spawn(move || {
            let _held = panicker;
            panic!("worker blew up");
        });
        assert!(bad.join().is_err());

        assert_eq!(survivor.broadcast(0, 0), Err(GroupError::Abandoned));
    }

    #[test]
    #[should_panic(expected = "outside group")]
    fn test_broadcast_root_out_of_range() {
        let member = ThreadGroup::new(1).unwrap().pop().unwrap();
        let _ = member.broadcast(1, 5);
    }
}
