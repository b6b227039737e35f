// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Scale Invariant

#![cfg(target_os = "macos")]

// OS event sources: NSWorkspace notifications for launch / hide / space
// changes, distributed notifications for session lock state, and the
// run-loop timer that drains the hub on the main thread.

use core_foundation::base::kCFAllocatorDefault;
use core_foundation::base::TCFType;
use core_foundation::runloop::kCFRunLoopDefaultMode;
use core_foundation::string::CFString;
use core_foundation_sys::base::CFTypeRef;
use std::ffi::c_void;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use block2::StackBlock;
use objc2::msg_send;
use objc2::runtime::AnyObject;
use objc2_app_kit::{NSRunningApplication, NSWorkspace};
use objc2_foundation::NSString;

use crate::pbgc_core::{RunningApp, EXIT_OK};
use crate::pbge_event::{AgentEvent, Engine, EventPoster};
use crate::pbgw_winguard::TerminationReply;
use crate::pbmba_appkit::{
    CFAbsoluteTimeGetCurrent, CFNotificationCallback, CFNotificationCenterAddObserver,
    CFNotificationCenterGetDistributedCenter, CFRunLoopAddTimer, CFRunLoopGetMain,
    CFRunLoopTimerContext, CFRunLoopTimerCreate, K_CF_SUSPENSION_DELIVER_IMMEDIATELY,
};

// Drain cadence for the event hub. Arrival order is preserved by the hub
// itself; the timer only bounds dispatch latency.
pub(crate) const DRAIN_INTERVAL_SECS: f64 = 0.25;

// Poster for the distributed-notification callbacks, which take no refcon
// and therefore cannot capture state.
lazy_static::lazy_static! {
    static ref SESSION_POSTER: Mutex<Option<EventPoster>> = Mutex::new(None);
}

// Set by the SIGTERM handler, consumed by the drain timer.
static TERMINATION_SIGNAL: AtomicBool = AtomicBool::new(false);

/// Subscribe to the workspace notifications enforcement cares about. The
/// handler blocks are copied by the notification center and run on the main
/// operation queue.
pub unsafe fn install_workspace_observers(poster: &EventPoster) {
    let workspace = NSWorkspace::sharedWorkspace();
    let center: *mut AnyObject = msg_send![&workspace, notificationCenter];

    add_notification_observer(center, "NSWorkspaceDidLaunchApplicationNotification", {
        let poster = poster.clone();
        move |note: *mut AnyObject| {
            if let Some(app) = unsafe { launched_application(note) } {
                poster.post(AgentEvent::ApplicationLaunched(app));
            }
        }
    });

    add_notification_observer(center, "NSWorkspaceDidHideApplicationNotification", {
        let poster = poster.clone();
        move |_note: *mut AnyObject| {
            poster.post(AgentEvent::ApplicationHidden);
        }
    });

    add_notification_observer(center, "NSWorkspaceActiveSpaceDidChangeNotification", {
        let poster = poster.clone();
        move |_note: *mut AnyObject| {
            poster.post(AgentEvent::ActiveSpaceChanged);
        }
    });

    log::debug!("OBSERVER: workspace observers installed");
}

/// Subscribe to the agent's own window move / display-change notifications
/// on the process-local default center, so a dragged or re-homed prompt
/// window snaps back to center.
pub unsafe fn install_window_observers(poster: &EventPoster) {
    let center: *mut AnyObject = msg_send![objc2::class!(NSNotificationCenter), defaultCenter];

    for name in [
        "NSWindowDidMoveNotification",
        "NSWindowDidChangeScreenNotification",
    ] {
        add_notification_observer(center, name, {
            let poster = poster.clone();
            move |_note: *mut AnyObject| {
                poster.post(AgentEvent::PromptWindowMoved);
            }
        });
    }

    log::debug!("OBSERVER: window observers installed");
}

unsafe fn add_notification_observer<F>(center: *mut AnyObject, name: &str, handler: F)
where
    F: Fn(*mut AnyObject) + Clone + 'static,
{
    let name = NSString::from_str(name);
    let main_queue: *mut AnyObject = msg_send![objc2::class!(NSOperationQueue), mainQueue];
    let block = StackBlock::new(handler);
    let _observer: *mut AnyObject = msg_send![
        center,
        addObserverForName: &*name,
        object: std::ptr::null_mut::<AnyObject>(),
        queue: main_queue,
        usingBlock: &*block,
    ];
}

/// Pull pid / bundle id / display name out of a workspace launch
/// notification.
unsafe fn launched_application(note: *mut AnyObject) -> Option<RunningApp> {
    if note.is_null() {
        return None;
    }
    let user_info: *mut AnyObject = msg_send![note, userInfo];
    if user_info.is_null() {
        return None;
    }
    let key = NSString::from_str("NSWorkspaceApplicationKey");
    let app: *mut AnyObject = msg_send![user_info, objectForKey: &*key];
    if app.is_null() {
        return None;
    }
    let app = &*(app as *mut NSRunningApplication);

    // processIdentifier returns pid_t, i32 on macOS
    let pid: i32 = msg_send![app, processIdentifier];
    if pid <= 0 {
        return None;
    }
    let bundle_id = match app.bundleIdentifier() {
        Some(ns_str) => ns_str.to_string(),
        None => "<no_bundle_id>".to_string(),
    };
    let name = match app.localizedName() {
        Some(ns_str) => ns_str.to_string(),
        None => "<no_app_name>".to_string(),
    };

    Some(RunningApp::new(pid, &bundle_id, &name))
}

extern "C" fn session_locked_cb(
    _center: *mut c_void,
    _observer: *mut c_void,
    _name: CFTypeRef,
    _object: *const c_void,
    _user_info: CFTypeRef,
) {
    if let Some(poster) = SESSION_POSTER.lock().unwrap().as_ref() {
        poster.post(AgentEvent::SessionLocked);
    }
}

extern "C" fn session_unlocked_cb(
    _center: *mut c_void,
    _observer: *mut c_void,
    _name: CFTypeRef,
    _object: *const c_void,
    _user_info: CFTypeRef,
) {
    if let Some(poster) = SESSION_POSTER.lock().unwrap().as_ref() {
        poster.post(AgentEvent::SessionUnlocked);
    }
}

/// Subscribe to the session lock / unlock notifications on the distributed
/// center.
pub unsafe fn install_session_observers(poster: &EventPoster) {
    {
        let mut slot = SESSION_POSTER.lock().unwrap();
        *slot = Some(poster.clone());
    }

    let center = CFNotificationCenterGetDistributedCenter();
    add_distributed_observer(center, "com.apple.screenIsLocked", session_locked_cb);
    add_distributed_observer(center, "com.apple.screenIsUnlocked", session_unlocked_cb);

    log::debug!("OBSERVER: session lock observers installed");
}

unsafe fn add_distributed_observer(
    center: *mut c_void,
    name: &'static str,
    callback: CFNotificationCallback,
) {
    let name = CFString::from_static_string(name);
    CFNotificationCenterAddObserver(
        center,
        std::ptr::null(),
        callback,
        name.as_concrete_TypeRef() as CFTypeRef,
        std::ptr::null(),
        K_CF_SUSPENSION_DELIVER_IMMEDIATELY,
    );
}

/// Route SIGTERM through the close-request gate instead of dying mid-action.
/// The handler only flips a flag; the decision happens on the main run loop.
pub fn install_termination_handler() {
    unsafe extern "C" fn handler(signal: i32) {
        if signal == libc::SIGTERM {
            TERMINATION_SIGNAL.store(true, Ordering::Release);
        }
    }

    unsafe {
        let handler_ptr = handler as *const () as libc::sighandler_t;
        libc::signal(libc::SIGTERM, handler_ptr);
    }
}

extern "C" fn drain_timer_cb(_timer: *mut c_void, info: *mut c_void) {
    if info.is_null() {
        return;
    }
    let engine = unsafe { &*(info as *const Engine) };
    engine.drain();

    if TERMINATION_SIGNAL.swap(false, Ordering::AcqRel) {
        match engine.termination_request() {
            TerminationReply::Proceed => {
                log::info!("OBSERVER: termination signal honored, exiting");
                std::process::exit(EXIT_OK);
            }
            TerminationReply::Cancel => {}
        }
    }
}

/// Repeating main-run-loop timer that empties the hub. The engine reference
/// lives until process exit, as does the timer.
pub unsafe fn install_drain_timer(engine: &'static Engine) {
    let timer_context = CFRunLoopTimerContext {
        version: 0,
        info: engine as *const Engine as *mut c_void,
        retain: None,
        release: None,
        copy_description: None,
    };

    let now = CFAbsoluteTimeGetCurrent();
    let timer = CFRunLoopTimerCreate(
        kCFAllocatorDefault,
        now + DRAIN_INTERVAL_SECS,
        DRAIN_INTERVAL_SECS,
        0,
        0,
        drain_timer_cb,
        &timer_context as *const _,
    );
    if timer.is_null() {
        log::error!("OBSERVER: failed to create drain timer, events will not dispatch");
        return;
    }

    CFRunLoopAddTimer(
        CFRunLoopGetMain(),
        timer,
        kCFRunLoopDefaultMode as CFTypeRef,
    );
    log::debug!(
        "OBSERVER: drain timer installed ({}ms interval)",
        (DRAIN_INTERVAL_SECS * 1000.0) as u64
    );
}
