//! Reusable barrier that can be abandoned.
//!
//! `std::sync::Barrier` has no way to release waiters when a participant
//! disappears, so a member that panics would leave its peers blocked
//! forever. This barrier tracks a generation counter and an abandoned
//! flag under one mutex.

use std::sync::{Condvar, Mutex, MutexGuard};

use crate::{GroupError, GroupResult};

#[derive(Debug)]
struct State {
    arrived: usize,
    generation: u64,
    abandoned: bool,
}

#[derive(Debug)]
pub(crate) struct Rendezvous {
    size: usize,
    state: Mutex<State>,
    cvar: Condvar,
}

impl Rendezvous {
    pub(crate) fn new(size: usize) -> Self {
        Self {
            size,
            state: Mutex::new(State {
                arrived: 0,
                generation: 0,
                abandoned: false,
            }),
            cvar: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // State is only mutated in small non-panicking sections.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Block until `size` callers have arrived in the current generation.
    pub(crate) fn wait(&self) -> GroupResult<()> {
        let mut state = self.lock();
        if state.abandoned {
            return Err(GroupError::Abandoned);
        }

        let generation = state.generation;
        state.arrived += 1;

        if state.arrived == self.size {
            state.arrived = 0;
            state.generation = state.generation.wrapping_add(1);
            self.cvar.notify_all();
            return Ok(());
        }

        while state.generation == generation && !state.abandoned {
            state = self.cvar.wait(state).unwrap_or_else(|e| e.into_inner());
        }

        // A completed generation wins over a later abandonment.
        if state.generation != generation {
            Ok(())
        } else {
            Err(GroupError::Abandoned)
        }
    }

    /// Release every current and future waiter with an error.
    pub(crate) fn abandon(&self) {
        let mut state = self.lock();
        state.abandoned = true;
        self.cvar.notify_all();
    }
}
