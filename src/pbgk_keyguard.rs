// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Scale Invariant

use crate::pbgc_core::{modifier_summary, MOD_COMMAND};

/// The four command chords a user could dismiss or sidestep the prompt with.
/// Nothing else is ever suppressed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BannedShortcut {
    CloseWindow,
    NewWindow,
    Minimize,
    Quit,
}

impl BannedShortcut {
    pub fn describe(&self) -> &'static str {
        match self {
            BannedShortcut::CloseWindow => "cmd+w (close window)",
            BannedShortcut::NewWindow => "cmd+n (new window)",
            BannedShortcut::Minimize => "cmd+m (minimize)",
            BannedShortcut::Quit => "cmd+q (quit)",
        }
    }
}

/// What the key monitor should do with an intercepted key-down.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum KeyAction {
    Pass,
    Swallow,
}

/// Pure chord classification: the normalized modifier set must be exactly
/// the command bit plus one of the four letters; any extra modifier makes
/// it a different chord and it passes. Returns None when the agent is not
/// the foreground app; background typing is never touched.
pub fn banned_shortcut(mods: u32, key: char, agent_active: bool) -> Option<BannedShortcut> {
    if !agent_active || mods != MOD_COMMAND {
        return None;
    }
    match key.to_ascii_lowercase() {
        'w' => Some(BannedShortcut::CloseWindow),
        'n' => Some(BannedShortcut::NewWindow),
        'm' => Some(BannedShortcut::Minimize),
        'q' => Some(BannedShortcut::Quit),
        _ => None,
    }
}

/// Decision plus the required audit line for every suppression.
pub fn evaluate_keydown(mods: u32, key: char, agent_active: bool) -> KeyAction {
    match banned_shortcut(mods, key, agent_active) {
        Some(shortcut) => {
            log::warn!(
                "KEYGUARD: suppressed {} (pressed {}{})",
                shortcut.describe(),
                modifier_summary(mods),
                key.to_ascii_lowercase()
            );
            KeyAction::Swallow
        }
        None => KeyAction::Pass,
    }
}
