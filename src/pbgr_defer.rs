// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Scale Invariant

use std::thread;
use std::time::Duration;

/// Fire-and-forget deferred execution. Callers hand over a task and never see
/// it again: no handle, no result, no cancellation. Every spawn is logged so
/// the escape from the single dispatch path stays observable.
pub trait Scheduler: Send + Sync {
    fn schedule(&self, label: &str, delay: Duration, task: Box<dyn FnOnce() + Send>);
}

/// Thread-backed scheduler used by the real agent. Each task gets its own
/// short-lived named thread that sleeps out the delay first.
pub struct ThreadScheduler;

impl Scheduler for ThreadScheduler {
    fn schedule(&self, label: &str, delay: Duration, task: Box<dyn FnOnce() + Send>) {
        log::debug!("DEFER: spawn \"{}\" delay={}ms", label, delay.as_millis());
        let spawn = thread::Builder::new()
            .name(format!("defer-{}", label))
            .spawn(move || {
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
                task();
            });
        if let Err(err) = spawn {
            log::warn!("DEFER: spawn \"{}\" failed: {}", label, err);
        }
    }
}
