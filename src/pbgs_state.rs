// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Scale Invariant

use std::sync::atomic::{AtomicBool, Ordering};

/// Shared lifecycle flags for the agent. One instance is created at startup
/// and handed to every component behind an `Arc`; every flag only ever moves
/// false -> true, so relaxed atomics are enough even when deferred worker
/// threads read them.
#[derive(Default)]
pub struct ComplianceState {
    after_first_launch: AtomicBool,
    after_first_state_change: AtomicBool,
    should_exit: AtomicBool,
}

impl ComplianceState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record completion of the first launch sequence. Returns true exactly
    /// once, on the transition; callers use it to gate first-launch-only
    /// behavior such as the full-screen hide.
    pub fn mark_first_launch(&self) -> bool {
        !self.after_first_launch.swap(true, Ordering::Relaxed)
    }

    pub fn after_first_launch(&self) -> bool {
        self.after_first_launch.load(Ordering::Relaxed)
    }

    /// Record the first observed session/space change. Informational only.
    pub fn mark_state_change(&self) {
        if !self.after_first_state_change.swap(true, Ordering::Relaxed) {
            log::debug!("STATE: first session state change observed");
        }
    }

    pub fn after_first_state_change(&self) -> bool {
        self.after_first_state_change.load(Ordering::Relaxed)
    }

    /// The single authorization point for voluntary termination. There is no
    /// way to clear the flag again.
    pub fn authorize_exit(&self) {
        if !self.should_exit.swap(true, Ordering::Relaxed) {
            log::info!("STATE: exit authorized");
        }
    }

    pub fn should_exit(&self) -> bool {
        self.should_exit.load(Ordering::Relaxed)
    }
}
