// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Scale Invariant

#![cfg(target_os = "macos")]

// softwareupdate(8) front end. Downloads only; installation stays in the
// user's hands.

use std::process::Command;

use crate::pbgu_update::UpdateRunner;

const SOFTWAREUPDATE: &str = "/usr/sbin/softwareupdate";

pub struct SoftwareUpdateRunner;

impl SoftwareUpdateRunner {
    pub fn new() -> Self {
        SoftwareUpdateRunner
    }
}

fn run_softwareupdate(args: &[&str]) -> bool {
    log::info!("UPDATE: {} {}", SOFTWAREUPDATE, args.join(" "));
    match Command::new(SOFTWAREUPDATE).args(args).output() {
        Ok(output) => {
            for line in String::from_utf8_lossy(&output.stdout).lines() {
                if !line.trim().is_empty() {
                    log::debug!("UPDATE: {}", line);
                }
            }
            if output.status.success() {
                true
            } else {
                let detail = String::from_utf8_lossy(&output.stderr);
                let detail = detail.trim();
                if detail.is_empty() {
                    log::warn!("UPDATE: softwareupdate exited with {}", output.status);
                } else {
                    log::warn!(
                        "UPDATE: softwareupdate exited with {} ({})",
                        output.status,
                        detail
                    );
                }
                false
            }
        }
        Err(err) => {
            log::error!("UPDATE: failed to launch softwareupdate: {}", err);
            false
        }
    }
}

impl UpdateRunner for SoftwareUpdateRunner {
    fn download_updates(&self) -> bool {
        run_softwareupdate(&["--download", "--all"])
    }

    fn fetch_major_installer(&self) -> bool {
        run_softwareupdate(&["--fetch-full-installer"])
    }
}
