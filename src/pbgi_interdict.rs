// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Scale Invariant

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::pbgb_blocklist::{BlockedApplicationSet, LaunchVerdict};
use crate::pbgc_core::RunningApp;
use crate::pbgn_notify::{deliver_terminated_notice, Language, NotificationCenter};
use crate::pbgp_policy::{Clock, PolicySettings};
use crate::pbgr_defer::Scheduler;
use crate::pbgs_state::ComplianceState;

/// Gap between the user-facing notice and the actual kill. Long enough for
/// the notification call to leave the process, short enough that the app
/// never gets usable foreground time.
pub const TERMINATE_DELAY: Duration = Duration::from_millis(1);

/// Registry of running applications plus the terminate capability. The real
/// implementation wraps the platform workspace; terminate outcomes are
/// logged by the implementation, not returned.
pub trait ProcessRegistry: Send + Sync {
    fn running_applications(&self) -> Vec<RunningApp>;
    fn force_terminate(&self, app: &RunningApp);
}

/// Launch interdiction. Armed by policy; every action re-checks the deadline
/// immediately before acting so a not-yet-due agent is a strict no-op.
pub struct Interdictor {
    armed: bool,
    terminate_on_launch: bool,
    blocklist: BlockedApplicationSet,
    effective_deadline: DateTime<Utc>,
    language: Language,
    state: Arc<ComplianceState>,
    clock: Arc<dyn Clock>,
    registry: Arc<dyn ProcessRegistry>,
    scheduler: Arc<dyn Scheduler>,
    notifier: Box<dyn NotificationCenter>,
}

impl Interdictor {
    pub fn new(
        settings: &PolicySettings,
        effective_deadline: DateTime<Utc>,
        state: Arc<ComplianceState>,
        clock: Arc<dyn Clock>,
        registry: Arc<dyn ProcessRegistry>,
        scheduler: Arc<dyn Scheduler>,
        notifier: Box<dyn NotificationCenter>,
    ) -> Self {
        Self {
            armed: settings.attempt_to_block_application_launches,
            terminate_on_launch: settings.terminate_applications_on_launch,
            blocklist: BlockedApplicationSet::new(
                settings.blocked_application_bundle_ids.iter().cloned(),
            ),
            effective_deadline,
            language: Language::detect(settings.desired_language.as_deref()),
            state,
            clock,
            registry,
            scheduler,
            notifier,
        }
    }

    pub fn armed(&self) -> bool {
        self.armed
    }

    /// Startup: register for notification authorization once, then clear out
    /// anything already running if policy asks for it. Only meaningful
    /// before the first launch completes.
    pub fn arm(&self) {
        if !self.armed {
            log::debug!("BLOCK: launch blocking disabled by policy");
            return;
        }
        log::info!("BLOCK: armed ({} bundle ids)", self.blocklist.len());
        self.notifier.request_authorization();
        if self.terminate_on_launch && !self.state.after_first_launch() {
            self.sweep();
        }
    }

    fn deadline_passed(&self) -> bool {
        self.clock.now() >= self.effective_deadline
    }

    /// Scan every running application and interdict the listed ones.
    pub fn sweep(&self) {
        if !self.deadline_passed() {
            log::debug!("BLOCK: deadline not reached, sweep skipped");
            return;
        }
        for app in self.registry.running_applications() {
            if self.blocklist.verdict(&app.bundle_id) == LaunchVerdict::Block {
                self.interdict(&app);
            }
        }
    }

    /// One launch event, one decision. The launched application is judged on
    /// its own; already-running apps were handled by the arm-time sweep.
    pub fn handle_launch(&self, app: &RunningApp) {
        if !self.armed {
            return;
        }
        if !self.deadline_passed() {
            log::debug!(
                "BLOCK: deadline not reached, \"{}\" allowed",
                app.bundle_id
            );
            return;
        }
        match self.blocklist.verdict(&app.bundle_id) {
            LaunchVerdict::Allow => {}
            LaunchVerdict::AllowSelf => {
                log::debug!("BLOCK: own bundle id exempt");
            }
            LaunchVerdict::Block => self.interdict(app),
        }
    }

    /// Notice first, then the deferred kill; the notification call must have
    /// left this function before the terminate is even scheduled.
    fn interdict(&self, app: &RunningApp) {
        log::info!(
            "BLOCK: interdicting \"{}\" ({}, pid {})",
            app.name,
            app.bundle_id,
            app.pid
        );
        deliver_terminated_notice(self.notifier.as_ref(), &app.name, self.language);

        let registry = Arc::clone(&self.registry);
        let target = app.clone();
        self.scheduler.schedule(
            "force-terminate",
            TERMINATE_DELAY,
            Box::new(move || {
                registry.force_terminate(&target);
            }),
        );
    }
}
