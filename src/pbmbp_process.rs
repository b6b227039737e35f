// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Scale Invariant

#![cfg(target_os = "macos")]

// NSWorkspace adapter for process enumeration and forced termination.

use objc2::msg_send;
use objc2::rc::Retained;
use objc2::runtime::{AnyObject, Bool};
use objc2_app_kit::NSWorkspace;

use crate::pbgc_core::RunningApp;
use crate::pbgi_interdict::ProcessRegistry;
use crate::pbmba_appkit::defer_to_main;

pub struct WorkspaceRegistry;

impl WorkspaceRegistry {
    pub fn new() -> Self {
        WorkspaceRegistry
    }
}

impl ProcessRegistry for WorkspaceRegistry {
    fn running_applications(&self) -> Vec<RunningApp> {
        unsafe {
            let workspace = NSWorkspace::sharedWorkspace();
            let apps = workspace.runningApplications();

            let mut out = Vec::with_capacity(apps.len());
            for i in 0..apps.len() {
                let app = apps.objectAtIndex(i);
                let pid: i32 = msg_send![&app, processIdentifier];
                // Items without a bundle id can never be on the blocklist.
                let bundle_id = match app.bundleIdentifier() {
                    Some(ns_str) => ns_str.to_string(),
                    None => continue,
                };
                let name = match app.localizedName() {
                    Some(ns_str) => ns_str.to_string(),
                    None => bundle_id.clone(),
                };
                out.push(RunningApp::new(pid, &bundle_id, &name));
            }
            out
        }
    }

    fn force_terminate(&self, app: &RunningApp) {
        let pid = app.pid;
        let bundle_id = app.bundle_id.clone();
        let task = move || unsafe {
            let running: Option<Retained<AnyObject>> = msg_send![
                objc2::class!(NSRunningApplication),
                runningApplicationWithProcessIdentifier: pid
            ];
            let running = match running {
                Some(running) => running,
                None => {
                    log::info!("BLOCK: pid {} already gone before force terminate", pid);
                    return;
                }
            };
            let ok: Bool = msg_send![&running, forceTerminate];
            if ok.as_bool() {
                log::info!("BLOCK: force terminated {} (pid {})", bundle_id, pid);
            } else {
                log::warn!("BLOCK: force terminate refused for {} (pid {})", bundle_id, pid);
            }
        };
        // NSRunningApplication calls happen on the main run loop.
        unsafe {
            defer_to_main(task);
        }
    }
}
