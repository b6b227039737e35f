// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Scale Invariant

use std::sync::Arc;
use std::time::Duration;

use crate::pbgp_policy::PolicySettings;
use crate::pbgr_defer::Scheduler;

/// Seam to the platform updater. Implementations start the download and
/// report whether it completed; they do not install anything.
pub trait UpdateRunner: Send + Sync {
    /// Regular (same-major) update download.
    fn download_updates(&self) -> bool;
    /// Full installer fetch for a major upgrade.
    fn fetch_major_installer(&self) -> bool;
}

/// How the trigger resolved. `Deferred` means the outcome is intentionally
/// unobserved; only `Completed` carries a fetch result the upgrade gate can
/// use.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UpdateDisposition {
    SkippedDemo,
    SkippedTest,
    SkippedPolicy,
    Deferred,
    Completed { fetch_succeeded: bool },
}

/// Decide and fire the update trigger.
/// Demo and test modes never touch the updater. A required major upgrade
/// always fetches synchronously so the gate sees the outcome; only minor
/// updates may run in the background.
pub fn run_software_update(
    settings: &PolicySettings,
    runner: Arc<dyn UpdateRunner>,
    scheduler: &dyn Scheduler,
) -> UpdateDisposition {
    if settings.demo_mode {
        log::info!("UPDATE: demo mode, update trigger skipped");
        return UpdateDisposition::SkippedDemo;
    }
    if settings.unit_testing_mode {
        log::info!("UPDATE: test mode, update trigger skipped");
        return UpdateDisposition::SkippedTest;
    }

    if settings.require_major_upgrade {
        if !settings.attempt_to_fetch_major_upgrade {
            log::info!("UPDATE: major upgrade fetch disabled by policy");
            return UpdateDisposition::SkippedPolicy;
        }
        log::info!("UPDATE: fetching major upgrade installer");
        let fetch_succeeded = runner.fetch_major_installer();
        if fetch_succeeded {
            log::info!("UPDATE: major upgrade installer fetched");
        } else {
            log::warn!("UPDATE: major upgrade installer fetch failed");
        }
        return UpdateDisposition::Completed { fetch_succeeded };
    }

    if settings.asynchronous_software_update {
        log::info!("UPDATE: starting background software update");
        scheduler.schedule(
            "software-update",
            Duration::ZERO,
            Box::new(move || {
                if runner.download_updates() {
                    log::info!("UPDATE: background software update finished");
                } else {
                    log::warn!("UPDATE: background software update failed");
                }
            }),
        );
        UpdateDisposition::Deferred
    } else {
        log::info!("UPDATE: starting software update");
        let fetch_succeeded = runner.download_updates();
        if !fetch_succeeded {
            log::warn!("UPDATE: software update failed");
        }
        UpdateDisposition::Completed { fetch_succeeded }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct StubRunner {
        minor_calls: AtomicU32,
        major_calls: AtomicU32,
        succeed: bool,
    }

    impl UpdateRunner for StubRunner {
        fn download_updates(&self) -> bool {
            self.minor_calls.fetch_add(1, Ordering::Relaxed);
            self.succeed
        }
        fn fetch_major_installer(&self) -> bool {
            self.major_calls.fetch_add(1, Ordering::Relaxed);
            self.succeed
        }
    }

    #[derive(Default)]
    struct StubScheduler {
        tasks: Mutex<Vec<(String, Box<dyn FnOnce() + Send>)>>,
    }

    impl Scheduler for StubScheduler {
        fn schedule(&self, label: &str, _delay: Duration, task: Box<dyn FnOnce() + Send>) {
            self.tasks.lock().unwrap().push((label.to_string(), task));
        }
    }

    impl StubScheduler {
        fn run_all(&self) {
            let tasks: Vec<_> = self.tasks.lock().unwrap().drain(..).collect();
            for (_, task) in tasks {
                task();
            }
        }
    }

    #[test]
    fn test_demo_mode_skips() {
        let mut s = PolicySettings::default();
        s.demo_mode = true;
        let runner = Arc::new(StubRunner::default());
        let scheduler = StubScheduler::default();
        assert_eq!(
            run_software_update(&s, runner.clone(), &scheduler),
            UpdateDisposition::SkippedDemo
        );
        assert_eq!(runner.minor_calls.load(Ordering::Relaxed), 0);
        assert!(scheduler.tasks.lock().unwrap().is_empty());
    }

    #[test]
    fn test_test_mode_skips() {
        let mut s = PolicySettings::default();
        s.unit_testing_mode = true;
        let runner = Arc::new(StubRunner::default());
        let scheduler = StubScheduler::default();
        assert_eq!(
            run_software_update(&s, runner, &scheduler),
            UpdateDisposition::SkippedTest
        );
    }

    #[test]
    fn test_minor_async_defers() {
        let s = PolicySettings::default(); // async on by default
        let runner = Arc::new(StubRunner {
            succeed: true,
            ..Default::default()
        });
        let scheduler = StubScheduler::default();
        assert_eq!(
            run_software_update(&s, runner.clone(), &scheduler),
            UpdateDisposition::Deferred
        );
        // Not yet run; the background task does the work.
        assert_eq!(runner.minor_calls.load(Ordering::Relaxed), 0);
        assert_eq!(scheduler.tasks.lock().unwrap()[0].0, "software-update");
        scheduler.run_all();
        assert_eq!(runner.minor_calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_minor_sync_completes_inline() {
        let mut s = PolicySettings::default();
        s.asynchronous_software_update = false;
        let runner = Arc::new(StubRunner {
            succeed: true,
            ..Default::default()
        });
        let scheduler = StubScheduler::default();
        assert_eq!(
            run_software_update(&s, runner.clone(), &scheduler),
            UpdateDisposition::Completed { fetch_succeeded: true }
        );
        assert_eq!(runner.minor_calls.load(Ordering::Relaxed), 1);
        assert!(scheduler.tasks.lock().unwrap().is_empty());
    }

    #[test]
    fn test_major_forces_synchronous_fetch() {
        let mut s = PolicySettings::default();
        s.require_major_upgrade = true; // async flag stays on, still sync
        let runner = Arc::new(StubRunner {
            succeed: false,
            ..Default::default()
        });
        let scheduler = StubScheduler::default();
        assert_eq!(
            run_software_update(&s, runner.clone(), &scheduler),
            UpdateDisposition::Completed { fetch_succeeded: false }
        );
        assert_eq!(runner.major_calls.load(Ordering::Relaxed), 1);
        assert_eq!(runner.minor_calls.load(Ordering::Relaxed), 0);
        assert!(scheduler.tasks.lock().unwrap().is_empty());
    }

    #[test]
    fn test_major_fetch_disabled_by_policy() {
        let mut s = PolicySettings::default();
        s.require_major_upgrade = true;
        s.attempt_to_fetch_major_upgrade = false;
        let runner = Arc::new(StubRunner::default());
        let scheduler = StubScheduler::default();
        assert_eq!(
            run_software_update(&s, runner.clone(), &scheduler),
            UpdateDisposition::SkippedPolicy
        );
        assert_eq!(runner.major_calls.load(Ordering::Relaxed), 0);
    }
}
