// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Scale Invariant

#![cfg(target_os = "macos")]

// Session-level keyboard tap feeding the chord guard. Only key-down events
// are tapped; everything the guard does not ban passes through untouched.

use core_foundation::base::kCFAllocatorDefault;
use core_foundation::runloop::kCFRunLoopDefaultMode;
use core_foundation_sys::base::CFTypeRef;
use std::ffi::c_void;
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::pbgc_core::{MOD_COMMAND, MOD_CONTROL, MOD_OPTION, MOD_SHIFT};
use crate::pbgk_keyguard::{banned_shortcut, evaluate_keydown, KeyAction};
use crate::pbmba_appkit::{
    agent_is_active, CFAbsoluteTimeGetCurrent, CFMachPortCreateRunLoopSource, CFRunLoopAddSource,
    CFRunLoopAddTimer, CFRunLoopGetCurrent, CFRunLoopTimerContext, CFRunLoopTimerCreate,
};

// kCGSessionEventTap / kCGHeadInsertEventTap / kCGEventTapOptionDefault
const K_CG_SESSION_EVENT_TAP: u32 = 1;
const K_CG_HEAD_INSERT_EVENT_TAP: u32 = 0;
const K_CG_EVENT_TAP_OPTION_DEFAULT: u32 = 0;

// kCGEventKeyDown and its mask bit
const K_CG_EVENT_KEY_DOWN: u32 = 10;
const CG_EVENT_MASK_KEY_DOWN: u64 = 1 << K_CG_EVENT_KEY_DOWN;

// CGEventField selectors
const K_CG_KEYCODE_FIELD_KEYCODE: u32 = 9;
const K_CG_KEYBOARD_EVENT_AUTOREPEAT: u32 = 8;

// CGEventFlags modifier masks
const K_CG_EVENT_FLAG_MASK_SHIFT: u64 = 1 << 17;
const K_CG_EVENT_FLAG_MASK_CONTROL: u64 = 1 << 18;
const K_CG_EVENT_FLAG_MASK_ALTERNATE: u64 = 1 << 19;
const K_CG_EVENT_FLAG_MASK_COMMAND: u64 = 1 << 20;

// ANSI virtual keycodes for the guarded letters
const VK_Q: u16 = 12;
const VK_W: u16 = 13;
const VK_N: u16 = 45;
const VK_M: u16 = 46;

#[link(name = "CoreGraphics", kind = "framework")]
extern "C" {
    fn CGEventTapCreate(
        tap: u32,
        place: u32,
        options: u32,
        events_of_interest: u64,
        callback: extern "C" fn(*mut c_void, u32, *mut c_void, *mut c_void) -> *mut c_void,
        user_info: *mut c_void,
    ) -> *mut c_void;
    fn CGEventTapEnable(tap: *mut c_void, enable: bool);
    fn CGEventTapIsEnabled(tap: *mut c_void) -> bool;
    fn CGEventGetIntegerValueField(event: *mut c_void, field: u32) -> i64;
    fn CGEventGetFlags(event: *mut c_void) -> u64;
}

// Tap pointer for the health check timer
static KEY_TAP_PTR: AtomicPtr<c_void> = AtomicPtr::new(std::ptr::null_mut());

fn guarded_key(keycode: u16) -> Option<char> {
    match keycode {
        VK_Q => Some('q'),
        VK_W => Some('w'),
        VK_N => Some('n'),
        VK_M => Some('m'),
        _ => None,
    }
}

fn normalize_flags(flags: u64) -> u32 {
    let mut mods = 0;
    if flags & K_CG_EVENT_FLAG_MASK_COMMAND != 0 {
        mods |= MOD_COMMAND;
    }
    if flags & K_CG_EVENT_FLAG_MASK_SHIFT != 0 {
        mods |= MOD_SHIFT;
    }
    if flags & K_CG_EVENT_FLAG_MASK_ALTERNATE != 0 {
        mods |= MOD_OPTION;
    }
    if flags & K_CG_EVENT_FLAG_MASK_CONTROL != 0 {
        mods |= MOD_CONTROL;
    }
    mods
}

extern "C" fn tap_cb(
    _proxy: *mut c_void,
    event_type: u32,
    event: *mut c_void,
    _user: *mut c_void,
) -> *mut c_void {
    unsafe {
        if event_type != K_CG_EVENT_KEY_DOWN {
            return event;
        }

        let keycode = CGEventGetIntegerValueField(event, K_CG_KEYCODE_FIELD_KEYCODE) as u16;
        let key = match guarded_key(keycode) {
            Some(key) => key,
            None => return event,
        };

        let mods = normalize_flags(CGEventGetFlags(event));
        let active = agent_is_active();

        // Autorepeats of a banned chord are swallowed without re-logging.
        let is_repeat = CGEventGetIntegerValueField(event, K_CG_KEYBOARD_EVENT_AUTOREPEAT) != 0;
        if is_repeat {
            return if banned_shortcut(mods, key, active).is_some() {
                std::ptr::null_mut()
            } else {
                event
            };
        }

        match evaluate_keydown(mods, key, active) {
            KeyAction::Swallow => std::ptr::null_mut(),
            KeyAction::Pass => event,
        }
    }
}

// Timer callback to detect the OS silently disabling the tap
extern "C" fn tap_health_check_timer(_timer: *mut c_void, _info: *mut c_void) {
    unsafe {
        let tap = KEY_TAP_PTR.load(Ordering::Acquire);
        if tap.is_null() {
            return;
        }

        if !CGEventTapIsEnabled(tap) {
            log::warn!("KEYGUARD: event tap was disabled by the OS, re-enabling");
            CGEventTapEnable(tap, true);
            if !CGEventTapIsEnabled(tap) {
                log::error!("KEYGUARD: could not re-enable event tap, shortcut guard is down");
            }
        }
    }
}

/// Install the key-down tap plus its health-check timer on the current run
/// loop. A tap that cannot be created (usually a missing accessibility
/// grant) leaves the agent running with the shortcut guard inactive.
pub unsafe fn install_key_tap() {
    let tap = CGEventTapCreate(
        K_CG_SESSION_EVENT_TAP,
        K_CG_HEAD_INSERT_EVENT_TAP,
        K_CG_EVENT_TAP_OPTION_DEFAULT,
        CG_EVENT_MASK_KEY_DOWN,
        tap_cb,
        std::ptr::null_mut(),
    );
    if tap.is_null() {
        log::error!("KEYGUARD: failed to create keyboard event tap, shortcut guard inactive");
        return;
    }

    CGEventTapEnable(tap, true);
    let src = CFMachPortCreateRunLoopSource(kCFAllocatorDefault, tap, 0);
    CFRunLoopAddSource(CFRunLoopGetCurrent(), src, kCFRunLoopDefaultMode as CFTypeRef);
    KEY_TAP_PTR.store(tap, Ordering::Release);

    // Re-enable every 500ms if the OS decides the callback was too slow.
    let timer_context = CFRunLoopTimerContext {
        version: 0,
        info: std::ptr::null_mut(),
        retain: None,
        release: None,
        copy_description: None,
    };
    let now = CFAbsoluteTimeGetCurrent();
    let health_check_timer = CFRunLoopTimerCreate(
        kCFAllocatorDefault,
        now + 0.5,
        0.5,
        0,
        0,
        tap_health_check_timer,
        &timer_context as *const _,
    );
    if health_check_timer.is_null() {
        log::warn!("KEYGUARD: failed to create health check timer, tap auto-recovery disabled");
    } else {
        CFRunLoopAddTimer(
            CFRunLoopGetCurrent(),
            health_check_timer,
            kCFRunLoopDefaultMode as CFTypeRef,
        );
    }

    log::debug!("KEYGUARD: keyboard event tap installed");
}
