// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Scale Invariant

// Agent identity. The bundle id doubles as the preference domain for both
// config sources and as the namespace prefix of the device-identity hash.
pub const AGENT_BUNDLE_ID: &str = "com.scaleinvariant.patchboard";
pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

// Process exit codes. EXIT_FATAL covers both the legacy mis-deployed profile
// and the missing-installer case; the distinction lives in the log line.
pub const EXIT_OK: i32 = 0;
pub const EXIT_FATAL: i32 = 1;

// Device-independent modifier mask bits for chord checks
pub const MOD_COMMAND: u32 = 1 << 0;
pub const MOD_SHIFT: u32 = 1 << 1;
pub const MOD_OPTION: u32 = 1 << 2;
pub const MOD_CONTROL: u32 = 1 << 3;

/// Snapshot of one running application as reported by the process registry.
/// The pid is the terminate-capability handle; records are taken fresh per
/// scan and never cached across events.
#[derive(Clone, Debug, PartialEq)]
pub struct RunningApp {
    pub pid: i32,
    pub bundle_id: String,
    pub name: String,
}

impl RunningApp {
    pub fn new(pid: i32, bundle_id: &str, name: &str) -> Self {
        Self {
            pid,
            bundle_id: bundle_id.to_string(),
            name: name.to_string(),
        }
    }
}

pub fn modifier_summary(mods: u32) -> String {
    format!(
        "{}{}{}{}",
        if mods & MOD_COMMAND != 0 { "cmd+" } else { "" },
        if mods & MOD_SHIFT != 0 { "shift+" } else { "" },
        if mods & MOD_OPTION != 0 { "opt+" } else { "" },
        if mods & MOD_CONTROL != 0 { "ctrl+" } else { "" },
    )
}
