// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Scale Invariant

use crate::pbgs_state::ComplianceState;

/// Answer to the platform's "may the app terminate?" callback.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TerminationReply {
    Proceed,
    Cancel,
}

/// Seam to the prompt window. The real implementation talks to NSWindow /
/// NSApplication; tests substitute a recorder.
pub trait WindowControl {
    /// Move the prompt back to the center of the main screen.
    fn center_prompt(&self);
    /// Hide the whole agent (all windows) from the current session.
    fn hide_agent(&self);
}

/// Gate every termination request on the exit flag. This is the only path a
/// voluntary exit can take; everything else is treated as a dismissal
/// attempt and refused.
pub fn handle_termination_request(state: &ComplianceState) -> TerminationReply {
    if state.should_exit() {
        log::info!("WINGUARD: termination request granted");
        TerminationReply::Proceed
    } else {
        log::warn!("WINGUARD: termination request denied (exit not authorized)");
        TerminationReply::Cancel
    }
}

/// Window moved or display layout changed: put the prompt back.
pub fn recenter(window: &dyn WindowControl) {
    log::debug!("WINGUARD: re-centering prompt");
    window.center_prompt();
}

/// On the first completed launch only: a user sitting in a full-screen space
/// keeps it; the agent hides instead of wrestling the session. Later
/// launches of this code path do nothing.
pub fn finish_launch(state: &ComplianceState, fullscreen_active: bool, window: &dyn WindowControl) {
    if !state.mark_first_launch() {
        return;
    }
    if fullscreen_active {
        log::info!("WINGUARD: full-screen session active at first launch, hiding agent");
        window.hide_agent();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[derive(Default)]
    struct RecordingWindow {
        centered: Cell<u32>,
        hidden: Cell<u32>,
    }

    impl WindowControl for RecordingWindow {
        fn center_prompt(&self) {
            self.centered.set(self.centered.get() + 1);
        }
        fn hide_agent(&self) {
            self.hidden.set(self.hidden.get() + 1);
        }
    }

    #[test]
    fn test_termination_denied_by_default() {
        let state = ComplianceState::new();
        assert_eq!(handle_termination_request(&state), TerminationReply::Cancel);
    }

    #[test]
    fn test_termination_granted_after_authorization() {
        let state = ComplianceState::new();
        state.authorize_exit();
        assert_eq!(handle_termination_request(&state), TerminationReply::Proceed);
    }

    #[test]
    fn test_recenter_calls_window() {
        let window = RecordingWindow::default();
        recenter(&window);
        recenter(&window);
        assert_eq!(window.centered.get(), 2);
    }

    #[test]
    fn test_first_launch_hides_only_in_fullscreen() {
        let state = ComplianceState::new();
        let window = RecordingWindow::default();
        finish_launch(&state, false, &window);
        assert_eq!(window.hidden.get(), 0);
        assert!(state.after_first_launch());
    }

    #[test]
    fn test_first_launch_fullscreen_hide_fires_once() {
        let state = ComplianceState::new();
        let window = RecordingWindow::default();
        finish_launch(&state, true, &window);
        // Second finish is not a first launch anymore.
        finish_launch(&state, true, &window);
        assert_eq!(window.hidden.get(), 1);
    }
}
