// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Scale Invariant

#![cfg(target_os = "macos")]

// Shared CoreFoundation / AppKit plumbing for the macOS adapters: run-loop
// externs, the distributed notification center, deferred main-thread blocks
// and the active-space probe.

use core_foundation::base::CFRelease;
use core_foundation::base::TCFType;
use core_foundation::runloop::kCFRunLoopDefaultMode;
use core_foundation::string::CFString;
use core_foundation_sys::base::CFTypeRef;
use std::ffi::c_void;

use block2::StackBlock;
use objc2::msg_send;
use objc2::runtime::Bool;
use objc2_app_kit::NSApplication;
use objc2_foundation::MainThreadMarker;

// Distributed-notification callback (screen lock / unlock)
pub type CFNotificationCallback = extern "C" fn(
    center: *mut c_void,
    observer: *mut c_void,
    name: CFTypeRef,
    object: *const c_void,
    user_info: CFTypeRef,
);

// CFNotificationSuspensionBehaviorDeliverImmediately
pub const K_CF_SUSPENSION_DELIVER_IMMEDIATELY: i64 = 4;

// kCFNumberSInt64Type
const K_CF_NUMBER_SINT64_TYPE: i64 = 4;

// CGWindowList options for the active-space probe
const K_CG_WINDOW_LIST_OPTION_ON_SCREEN_ONLY: u32 = 1 << 0;
const K_CG_WINDOW_LIST_EXCLUDE_DESKTOP_ELEMENTS: u32 = 1 << 4;
const K_CG_NULL_WINDOW_ID: u32 = 0;

// CoreFoundation linking
#[link(name = "CoreFoundation", kind = "framework")]
extern "C" {
    // CFRunLoop functions
    pub fn CFRunLoopGetCurrent() -> *mut c_void;
    pub fn CFRunLoopGetMain() -> *mut c_void;
    pub fn CFRunLoopRun();
    pub fn CFRunLoopPerformBlock(rl: *mut c_void, mode: CFTypeRef, block: *const c_void);
    pub fn CFRunLoopWakeUp(rl: *mut c_void);
    pub fn CFRunLoopAddSource(rl: *mut c_void, source: *mut c_void, mode: CFTypeRef);
    pub fn CFRunLoopAddTimer(rl: *mut c_void, timer: *mut c_void, mode: CFTypeRef);

    // CFRunLoopTimer
    pub fn CFAbsoluteTimeGetCurrent() -> f64;
    pub fn CFRunLoopTimerCreate(
        allocator: *const c_void,
        fireDate: f64,
        interval: f64,
        flags: u32,
        order: i32,
        callout: extern "C" fn(*mut c_void, *mut c_void),
        context: *const CFRunLoopTimerContext,
    ) -> *mut c_void;

    // Distributed notifications
    pub fn CFNotificationCenterGetDistributedCenter() -> *mut c_void;
    pub fn CFNotificationCenterAddObserver(
        center: *mut c_void,
        observer: *const c_void,
        callback: CFNotificationCallback,
        name: CFTypeRef,
        object: *const c_void,
        suspension_behavior: i64,
    );

    // CFArray / CFDictionary / CFNumber accessors for the window list
    fn CFArrayGetCount(theArray: CFTypeRef) -> i64;
    fn CFArrayGetValueAtIndex(theArray: CFTypeRef, idx: i64) -> *const c_void;
    fn CFDictionaryGetValue(theDict: *const c_void, key: *const c_void) -> *const c_void;
    fn CFNumberGetValue(number: *const c_void, theType: i64, valuePtr: *mut c_void) -> bool;

    // CFMachPort (event tap run-loop source)
    pub fn CFMachPortCreateRunLoopSource(
        allocator: *const c_void,
        port: *const c_void,
        order: i32,
    ) -> *mut c_void;
}

// CoreGraphics linking (window list + display bounds)
#[link(name = "CoreGraphics", kind = "framework")]
extern "C" {
    fn CGWindowListCopyWindowInfo(option: u32, relative_to_window: u32) -> CFTypeRef;
    fn CGRectMakeWithDictionaryRepresentation(dict: *const c_void, rect: *mut CGRect) -> bool;
    fn CGMainDisplayID() -> u32;
    fn CGDisplayBounds(display: u32) -> CGRect;
}

// CFRunLoopTimerContext structure for run-loop timers
#[repr(C)]
pub struct CFRunLoopTimerContext {
    pub version: i32,
    pub info: *mut c_void,
    pub retain: Option<extern "C" fn(*const c_void) -> *const c_void>,
    pub release: Option<extern "C" fn(*const c_void)>,
    pub copy_description: Option<extern "C" fn(*const c_void) -> *mut c_void>,
}

// Point / size / rect structures for CoreGraphics interop
#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub(crate) struct Pt {
    pub x: f64,
    pub y: f64,
}

#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub(crate) struct CGSize {
    pub width: f64,
    pub height: f64,
}

#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub(crate) struct CGRect {
    pub origin: Pt,
    pub size: CGSize,
}

/// Run `task` on the main run loop. CFRunLoopPerformBlock copies the block,
/// so the stack allocation here may be dropped right after scheduling.
pub unsafe fn defer_to_main<F>(task: F)
where
    F: Fn() + Clone + 'static,
{
    let block = StackBlock::new(task);
    let main_runloop = CFRunLoopGetMain();
    CFRunLoopPerformBlock(
        main_runloop,
        kCFRunLoopDefaultMode as CFTypeRef,
        &*block as *const _ as *const c_void,
    );
    CFRunLoopWakeUp(main_runloop);
}

/// Materialize the shared NSApplication so isActive / hide / windows have
/// something to talk to. Must run on the main thread before the run loop.
#[allow(unexpected_cfgs)]
pub unsafe fn init_shared_application() {
    let mtm = MainThreadMarker::new_unchecked();
    let _app = NSApplication::sharedApplication(mtm);
}

/// Whether the agent is the active (frontmost) application.
#[allow(unexpected_cfgs)]
pub unsafe fn agent_is_active() -> bool {
    // SAFETY: only called from main run-loop callbacks
    let mtm = MainThreadMarker::new_unchecked();
    let app = NSApplication::sharedApplication(mtm);
    let active: Bool = msg_send![&app, isActive];
    active.as_bool()
}

/// Hide every window of the agent from the current session.
#[allow(unexpected_cfgs)]
pub unsafe fn hide_agent() {
    let mtm = MainThreadMarker::new_unchecked();
    let app = NSApplication::sharedApplication(mtm);
    let _: () = msg_send![&app, hide: std::ptr::null_mut::<objc2::runtime::AnyObject>()];
}

/// A layer-zero window covering the whole main display means the session is
/// sitting in a full-screen space.
pub unsafe fn active_space_is_full_screen() -> bool {
    let list = CGWindowListCopyWindowInfo(
        K_CG_WINDOW_LIST_OPTION_ON_SCREEN_ONLY | K_CG_WINDOW_LIST_EXCLUDE_DESKTOP_ELEMENTS,
        K_CG_NULL_WINDOW_ID,
    );
    if list.is_null() {
        return false;
    }

    let screen = CGDisplayBounds(CGMainDisplayID());
    let layer_key = CFString::from_static_string("kCGWindowLayer");
    let bounds_key = CFString::from_static_string("kCGWindowBounds");

    let mut full_screen = false;
    let count = CFArrayGetCount(list);
    for idx in 0..count {
        let info = CFArrayGetValueAtIndex(list, idx);
        if info.is_null() {
            continue;
        }

        // Only normal windows count; overlays and the menu bar sit on other
        // layers.
        let layer_ref =
            CFDictionaryGetValue(info, layer_key.as_concrete_TypeRef() as *const c_void);
        if layer_ref.is_null() {
            continue;
        }
        let mut layer: i64 = -1;
        if !CFNumberGetValue(
            layer_ref,
            K_CF_NUMBER_SINT64_TYPE,
            &mut layer as *mut i64 as *mut c_void,
        ) {
            continue;
        }
        if layer != 0 {
            continue;
        }

        let bounds_ref =
            CFDictionaryGetValue(info, bounds_key.as_concrete_TypeRef() as *const c_void);
        if bounds_ref.is_null() {
            continue;
        }
        let mut rect = CGRect {
            origin: Pt { x: 0.0, y: 0.0 },
            size: CGSize {
                width: 0.0,
                height: 0.0,
            },
        };
        if !CGRectMakeWithDictionaryRepresentation(bounds_ref, &mut rect) {
            continue;
        }

        if rect.size.width == screen.size.width && rect.size.height == screen.size.height {
            full_screen = true;
            break;
        }
    }

    CFRelease(list);
    full_screen
}
