// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Scale Invariant

// Startup pre-flight: the strictly ordered checks between process start and
// the engine going live. Each step either short-circuits into a process
// exit or falls through to the next; nothing here runs twice.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;

use crate::pbgc_core::{EXIT_FATAL, EXIT_OK};
use crate::pbgd_identity::{build_metrics, HardwareInfo};
use crate::pbgp_policy::{PolicySource, UpgradeArtifacts};
use crate::pbgr_defer::Scheduler;
use crate::pbgs_state::ComplianceState;
use crate::pbgu_update::{run_software_update, UpdateDisposition, UpdateRunner};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PreflightOutcome {
    Exit(i32),
    Continue,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DiagnosticFlag {
    PrintProfileConfig,
    PrintJsonConfig,
}

/// Recognize the two diagnostic flags. Profile wins when both are given.
pub fn diagnostic_flag(args: &[String]) -> Option<DiagnosticFlag> {
    if args.iter().any(|a| a == "-print-profile-config") {
        return Some(DiagnosticFlag::PrintProfileConfig);
    }
    if args.iter().any(|a| a == "-print-json-config") {
        return Some(DiagnosticFlag::PrintJsonConfig);
    }
    None
}

/// Config print runs are pure reads; they must print and exit 0 even while
/// a resident agent holds the single-instance lock, so the lock is skipped.
pub fn bypasses_instance_guard(args: &[String]) -> bool {
    diagnostic_flag(args).is_some()
}

fn random_delay_seconds(max: u64) -> u64 {
    if max == 0 {
        return 0;
    }
    rand::thread_rng().gen_range(1..=max)
}

/// The major-upgrade installer gate. A configured custom action path takes
/// over responsibility entirely; otherwise a machine with no way to start
/// the upgrade is a fatal misdeployment.
fn major_upgrade_gate(
    require_major_upgrade: bool,
    action_button_path: Option<&str>,
    artifacts: &UpgradeArtifacts,
) -> Option<i32> {
    if !require_major_upgrade {
        return None;
    }
    if let Some(path) = action_button_path {
        if path.is_empty() {
            log::warn!("PREFLIGHT: actionButtonPath is empty, ignoring");
        }
        return None;
    }
    if artifacts.fetch_attempted && !artifacts.fetch_succeeded && !artifacts.installer_present() {
        log::error!("PREFLIGHT: major upgrade installer fetch failed and no installer on disk");
        return Some(EXIT_FATAL);
    }
    if !artifacts.fetch_attempted && !artifacts.installer_present() {
        log::error!("PREFLIGHT: no major upgrade installer on disk and fetching disabled");
        return Some(EXIT_FATAL);
    }
    None
}

/// Everything pre-flight consumes, gathered by `main` so the sequence itself
/// stays deterministic and testable.
pub struct Preflight<'a> {
    pub source: &'a PolicySource,
    pub state: &'a ComplianceState,
    pub scheduler: &'a dyn Scheduler,
    pub runner: Arc<dyn UpdateRunner>,
    pub hardware: Option<HardwareInfo>,
    pub bundle_path: String,
    pub legacy_profile_present: bool,
    pub grace_anchor: Option<DateTime<Utc>>,
    pub artifacts: UpgradeArtifacts,
}

impl Preflight<'_> {
    pub fn run(&self, args: &[String]) -> PreflightOutcome {
        let settings = &self.source.settings;

        // 1. A JSON file pushed through the profile channel means the
        // management layer is misconfigured; enforcing on top of it would
        // enforce the wrong policy.
        if self.legacy_profile_present {
            log::error!(
                "PREFLIGHT: JSON configuration deployed as a profile, refusing to start"
            );
            return PreflightOutcome::Exit(EXIT_FATAL);
        }

        // 2. Diagnostic print modes do their output and leave.
        match diagnostic_flag(args) {
            Some(DiagnosticFlag::PrintProfileConfig) => {
                if let Some(text) = self.source.profile_pretty() {
                    println!("{}", text);
                }
                return PreflightOutcome::Exit(EXIT_OK);
            }
            Some(DiagnosticFlag::PrintJsonConfig) => {
                if let Some(text) = self.source.json_pretty() {
                    println!("{}", text);
                }
                return PreflightOutcome::Exit(EXIT_OK);
            }
            None => {}
        }

        // 3. Grace period evaluation and startup telemetry.
        let deadline = settings.effective_deadline(self.grace_anchor);
        log::info!("PREFLIGHT: enforcement deadline {}", deadline.to_rfc3339());
        match &self.hardware {
            Some(hw) => {
                if let Some(payload) = build_metrics(
                    &hw.hardware_uuid,
                    &hw.serial_number,
                    &self.bundle_path,
                    &self.source.profile_bytes,
                    &self.source.json_bytes,
                ) {
                    log::info!("PREFLIGHT: device identity {}", payload.device_id);
                }
            }
            None => log::info!("PREFLIGHT: hardware identity unavailable, metrics skipped"),
        }

        // 4. An exit authorized before we got here (outside control) wins.
        if self.state.should_exit() {
            log::info!("PREFLIGHT: exit already authorized, stopping");
            return PreflightOutcome::Exit(EXIT_OK);
        }

        // 5. Fleet smearing. The one deliberate blocking sleep in the agent,
        // taken before any enforcement is live.
        if settings.random_delay {
            let secs = random_delay_seconds(settings.max_random_delay_in_seconds);
            log::info!("PREFLIGHT: random delay {}s", secs);
            thread::sleep(Duration::from_secs(secs));
        }

        // 6. Update trigger.
        let disposition =
            run_software_update(settings, Arc::clone(&self.runner), self.scheduler);

        // 7. Major-upgrade gate. Fetch fields belong to this phase: whether
        // a fetch was attempted comes from policy, its outcome from step 6.
        let mut artifacts = self.artifacts;
        artifacts.fetch_attempted = settings.attempt_to_fetch_major_upgrade;
        if let UpdateDisposition::Completed { fetch_succeeded } = disposition {
            artifacts.fetch_succeeded = fetch_succeeded;
        }
        if let Some(code) = major_upgrade_gate(
            settings.require_major_upgrade,
            settings.action_button_path.as_deref(),
            &artifacts,
        ) {
            self.state.authorize_exit();
            return PreflightOutcome::Exit(code);
        }

        PreflightOutcome::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pbgp_policy::PolicySettings;
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
        labels: Mutex<Vec<String>>,
    }

    impl Scheduler for StubScheduler {
        fn schedule(&self, label: &str, _delay: Duration, task: Box<dyn FnOnce() + Send>) {
            self.labels.lock().unwrap().push(label.to_string());
            task();
        }
    }

    struct Fixture {
        source: PolicySource,
        state: ComplianceState,
        scheduler: StubScheduler,
        runner: Arc<StubRunner>,
    }

    impl Fixture {
        fn new(settings_json: &str) -> Self {
            Self {
                source: PolicySource::resolve(Vec::new(), settings_json.as_bytes().to_vec()),
                state: ComplianceState::new(),
                scheduler: StubScheduler::default(),
                runner: Arc::new(StubRunner {
                    succeed: true,
                    ..Default::default()
                }),
            }
        }

        fn preflight(&self) -> Preflight<'_> {
            Preflight {
                source: &self.source,
                state: &self.state,
                scheduler: &self.scheduler,
                runner: self.runner.clone(),
                hardware: None,
                bundle_path: "/Applications/PatchBoard.app".to_string(),
                legacy_profile_present: false,
                grace_anchor: None,
                artifacts: UpgradeArtifacts::default(),
            }
        }
    }

    fn no_args() -> Vec<String> {
        vec!["patchboard".to_string()]
    }

    #[test]
    fn test_diagnostic_flag_parsing() {
        let args = |s: &str| vec!["patchboard".to_string(), s.to_string()];
        assert_eq!(
            diagnostic_flag(&args("-print-profile-config")),
            Some(DiagnosticFlag::PrintProfileConfig)
        );
        assert_eq!(
            diagnostic_flag(&args("-print-json-config")),
            Some(DiagnosticFlag::PrintJsonConfig)
        );
        assert_eq!(diagnostic_flag(&no_args()), None);
    }

    #[test]
    fn test_print_flags_bypass_instance_guard() {
        let args = |s: &str| vec!["patchboard".to_string(), s.to_string()];
        assert!(bypasses_instance_guard(&args("-print-profile-config")));
        assert!(bypasses_instance_guard(&args("-print-json-config")));
        assert!(!bypasses_instance_guard(&no_args()));
    }

    #[test]
    fn test_legacy_profile_is_fatal() {
        let fixture = Fixture::new("{}");
        let mut preflight = fixture.preflight();
        preflight.legacy_profile_present = true;
        assert_eq!(preflight.run(&no_args()), PreflightOutcome::Exit(EXIT_FATAL));
        // Nothing further ran.
        assert_eq!(fixture.runner.minor_calls.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_print_flags_short_circuit() {
        let fixture = Fixture::new(r#"{"randomDelay": false}"#);
        let args = vec!["patchboard".to_string(), "-print-json-config".to_string()];
        assert_eq!(fixture.preflight().run(&args), PreflightOutcome::Exit(EXIT_OK));
        assert_eq!(fixture.runner.minor_calls.load(Ordering::Relaxed), 0);

        // Profile flag with no profile deployed still exits cleanly.
        let args = vec!["patchboard".to_string(), "-print-profile-config".to_string()];
        assert_eq!(fixture.preflight().run(&args), PreflightOutcome::Exit(EXIT_OK));
    }

    #[test]
    fn test_preauthorized_exit_stops_before_update() {
        let fixture = Fixture::new("{}");
        fixture.state.authorize_exit();
        assert_eq!(fixture.preflight().run(&no_args()), PreflightOutcome::Exit(EXIT_OK));
        assert_eq!(fixture.runner.minor_calls.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_plain_startup_continues_with_background_update() {
        let fixture = Fixture::new("{}"); // async default
        assert_eq!(fixture.preflight().run(&no_args()), PreflightOutcome::Continue);
        assert_eq!(
            *fixture.scheduler.labels.lock().unwrap(),
            vec!["software-update".to_string()]
        );
        // The stub scheduler runs inline, so the download happened.
        assert_eq!(fixture.runner.minor_calls.load(Ordering::Relaxed), 1);
        assert!(!fixture.state.should_exit());
    }

    #[test]
    fn test_major_upgrade_fetch_success_continues() {
        let fixture = Fixture::new(r#"{"requireMajorUpgrade": true}"#);
        assert_eq!(fixture.preflight().run(&no_args()), PreflightOutcome::Continue);
        assert_eq!(fixture.runner.major_calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_major_upgrade_fetch_failure_is_fatal() {
        let fixture = Fixture::new(r#"{"requireMajorUpgrade": true}"#);
        let runner = Arc::new(StubRunner::default()); // succeed = false
        let mut preflight = fixture.preflight();
        preflight.runner = runner.clone();
        assert_eq!(preflight.run(&no_args()), PreflightOutcome::Exit(EXIT_FATAL));
        assert!(fixture.state.should_exit());
        assert_eq!(runner.major_calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_major_upgrade_fetch_failure_saved_by_installer() {
        let fixture = Fixture::new(r#"{"requireMajorUpgrade": true}"#);
        let runner = Arc::new(StubRunner::default());
        let mut preflight = fixture.preflight();
        preflight.runner = runner;
        preflight.artifacts.primary_installer_present = true;
        assert_eq!(preflight.run(&no_args()), PreflightOutcome::Continue);
    }

    #[test]
    fn test_major_upgrade_no_fetch_no_installer_is_fatal() {
        let fixture = Fixture::new(
            r#"{"requireMajorUpgrade": true, "attemptToFetchMajorUpgrade": false}"#,
        );
        assert_eq!(fixture.preflight().run(&no_args()), PreflightOutcome::Exit(EXIT_FATAL));
        assert!(fixture.state.should_exit());
        // Fetch disabled: the runner was never asked.
        assert_eq!(fixture.runner.major_calls.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_action_button_path_disables_gate() {
        let fixture = Fixture::new(
            r#"{"requireMajorUpgrade": true, "attemptToFetchMajorUpgrade": false,
                "actionButtonPath": "/Applications/Install macOS.app"}"#,
        );
        assert_eq!(fixture.preflight().run(&no_args()), PreflightOutcome::Continue);
        assert!(!fixture.state.should_exit());
    }

    #[test]
    fn test_empty_action_button_path_also_disables_gate() {
        let fixture = Fixture::new(
            r#"{"requireMajorUpgrade": true, "attemptToFetchMajorUpgrade": false,
                "actionButtonPath": ""}"#,
        );
        assert_eq!(fixture.preflight().run(&no_args()), PreflightOutcome::Continue);
    }

    #[test]
    fn test_random_delay_bounds() {
        for _ in 0..50 {
            let secs = random_delay_seconds(30);
            assert!((1..=30).contains(&secs));
        }
        assert_eq!(random_delay_seconds(0), 0);
        assert_eq!(random_delay_seconds(1), 1);
    }
}
