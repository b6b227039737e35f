// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Scale Invariant

// Generic modules (cross-platform)
mod pbgb_blocklist;
mod pbgc_core;
mod pbgd_identity;
mod pbge_event;
mod pbgi_interdict;
mod pbgk_keyguard;
mod pbgl_launch;
mod pbgn_notify;
mod pbgp_policy;
mod pbgr_defer;
mod pbgs_state;
mod pbgu_update;
mod pbgw_winguard;

// macOS adapter modules
#[cfg(target_os = "macos")] mod pbmba_appkit;
#[cfg(target_os = "macos")] mod pbmbd_window;
#[cfg(target_os = "macos")] mod pbmbi_hwinfo;
#[cfg(target_os = "macos")] mod pbmbk_keywatch;
#[cfg(target_os = "macos")] mod pbmbn_notify;
#[cfg(target_os = "macos")] mod pbmbo_observer;
#[cfg(target_os = "macos")] mod pbmbp_process;
#[cfg(target_os = "macos")] mod pbmbu_update;

use crate::pbgc_core::{EXIT_FATAL, EXIT_OK};

fn init_logging() {
    let env = env_logger::Env::default().filter_or("PATCHBOARD_LOG", "info");
    env_logger::Builder::from_env(env).init();
}

#[cfg(target_os = "macos")]
fn main() {
    use std::sync::Arc;

    use single_instance::SingleInstance;

    use crate::pbgc_core::{AGENT_BUNDLE_ID, AGENT_VERSION};
    use crate::pbge_event::{Engine, EventHub};
    use crate::pbgi_interdict::Interdictor;
    use crate::pbgl_launch::{bypasses_instance_guard, Preflight, PreflightOutcome};
    use crate::pbgp_policy::{
        grace_anchor, legacy_bad_profile_path, probe_upgrade_artifacts, PolicySource, SystemClock,
    };
    use crate::pbgr_defer::ThreadScheduler;
    use crate::pbgs_state::ComplianceState;

    init_logging();
    log::info!("patchboard {} starting", AGENT_VERSION);

    let args: Vec<String> = std::env::args().collect();

    // Two enforcement agents would fight over the same prompt and taps.
    // Config print runs skip the lock: they must print and exit 0 even
    // while a resident agent is running.
    let _instance = if bypasses_instance_guard(&args) {
        None
    } else {
        let instance = match SingleInstance::new(AGENT_BUNDLE_ID) {
            Ok(instance) => instance,
            Err(err) => {
                log::error!("PREFLIGHT: single-instance guard failed: {}", err);
                std::process::exit(EXIT_FATAL);
            }
        };
        if !instance.is_single() {
            log::error!("PREFLIGHT: another agent instance is already running");
            std::process::exit(EXIT_FATAL);
        }
        Some(instance)
    };
    let source = PolicySource::load();
    let state = Arc::new(ComplianceState::new());
    let scheduler = Arc::new(ThreadScheduler);
    let runner = Arc::new(pbmbu_update::SoftwareUpdateRunner::new());

    let anchor = grace_anchor(&source.settings);
    let preflight = Preflight {
        source: &source,
        state: &state,
        scheduler: scheduler.as_ref(),
        runner: runner.clone(),
        hardware: pbmbi_hwinfo::read_hardware_info(),
        bundle_path: std::env::current_exe()
            .map(|p| p.display().to_string())
            .unwrap_or_default(),
        legacy_profile_present: legacy_bad_profile_path().exists(),
        grace_anchor: anchor,
        artifacts: probe_upgrade_artifacts(&source.settings),
    };
    if let PreflightOutcome::Exit(code) = preflight.run(&args) {
        std::process::exit(code);
    }

    let interdictor = Interdictor::new(
        &source.settings,
        source.settings.effective_deadline(anchor),
        Arc::clone(&state),
        Arc::new(SystemClock),
        Arc::new(pbmbp_process::WorkspaceRegistry::new()),
        Arc::clone(&scheduler),
        Box::new(pbmbn_notify::UserNoticeCenter::new()),
    );

    // The engine is shared with run-loop callbacks and lives until exit.
    let engine: &'static Engine = Box::leak(Box::new(Engine::new(
        EventHub::new(),
        Arc::clone(&state),
        interdictor,
        Box::new(pbmbd_window::AgentWindow::new()),
    )));

    pbmbo_observer::install_termination_handler();
    unsafe {
        pbmba_appkit::init_shared_application();
        let poster = engine.poster();
        pbmbo_observer::install_workspace_observers(&poster);
        pbmbo_observer::install_session_observers(&poster);
        pbmbo_observer::install_window_observers(&poster);
        pbmbo_observer::install_drain_timer(engine);
        pbmbk_keywatch::install_key_tap();

        engine.startup(pbmba_appkit::active_space_is_full_screen());

        pbmba_appkit::CFRunLoopRun();
    }
    std::process::exit(EXIT_OK);
}

#[cfg(not(target_os = "macos"))]
fn main() {
    use crate::pbgl_launch::{diagnostic_flag, DiagnosticFlag};
    use crate::pbgp_policy::PolicySource;

    init_logging();

    // The config print modes are pure reads and work anywhere.
    let args: Vec<String> = std::env::args().collect();
    if let Some(flag) = diagnostic_flag(&args) {
        let source = PolicySource::load();
        match flag {
            DiagnosticFlag::PrintProfileConfig => {
                if let Some(text) = source.profile_pretty() {
                    println!("{}", text);
                }
            }
            DiagnosticFlag::PrintJsonConfig => {
                if let Some(text) = source.json_pretty() {
                    println!("{}", text);
                }
            }
        }
        std::process::exit(EXIT_OK);
    }

    eprintln!("patchboard enforcement requires macOS");
    std::process::exit(EXIT_FATAL);
}
