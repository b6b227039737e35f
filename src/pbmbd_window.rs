// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Scale Invariant

#![cfg(target_os = "macos")]

// AppKit adapter for the prompt window: re-centering on the main display
// plus the hide path the first-launch policy needs.

use objc2::encode::{Encode, RefEncode};
use objc2::msg_send;
use objc2::rc::Retained;
use objc2::runtime::AnyObject;
use objc2_app_kit::{NSApplication, NSScreen};
use objc2_foundation::MainThreadMarker;

use crate::pbgw_winguard::WindowControl;
use crate::pbmba_appkit;

// Point structure for Objective-C interop
#[repr(C)]
#[derive(Copy, Clone, Debug)]
struct Pt {
    x: f64,
    y: f64,
}

// NSRect structure for Objective-C interop
#[repr(C)]
#[derive(Copy, Clone)]
struct NSRect {
    origin: Pt,
    size: Pt, // reuse Pt for {width, height}
}

// Note: Must use "CGPoint" / "CGRect" naming - the Objective-C runtime uses
// CoreGraphics struct names.
unsafe impl Encode for Pt {
    const ENCODING: objc2::encode::Encoding = objc2::encode::Encoding::Struct(
        "CGPoint",
        &[<f64 as Encode>::ENCODING, <f64 as Encode>::ENCODING],
    );
}

unsafe impl RefEncode for Pt {
    const ENCODING_REF: objc2::encode::Encoding = Self::ENCODING;
}

unsafe impl Encode for NSRect {
    const ENCODING: objc2::encode::Encoding = objc2::encode::Encoding::Struct(
        "CGRect",
        &[
            <Pt as Encode>::ENCODING,
            objc2::encode::Encoding::Struct(
                "CGSize",
                &[<f64 as Encode>::ENCODING, <f64 as Encode>::ENCODING],
            ),
        ],
    );
}

unsafe impl RefEncode for NSRect {
    const ENCODING_REF: objc2::encode::Encoding = Self::ENCODING;
}

pub struct AgentWindow;

impl AgentWindow {
    pub fn new() -> Self {
        AgentWindow
    }
}

impl WindowControl for AgentWindow {
    #[allow(unexpected_cfgs)]
    fn center_prompt(&self) {
        unsafe {
            // SAFETY: engine handlers run on the main run loop
            let mtm = MainThreadMarker::new_unchecked();
            let app = NSApplication::sharedApplication(mtm);

            let windows: Option<Retained<AnyObject>> = msg_send![&app, windows];
            let windows = match windows {
                Some(windows) => windows,
                None => return,
            };
            let count: usize = msg_send![&windows, count];
            if count == 0 {
                log::debug!("WINGUARD: no window to center");
                return;
            }
            let window: Option<Retained<AnyObject>> = msg_send![&windows, objectAtIndex: 0usize];
            let window = match window {
                Some(window) => window,
                None => return,
            };

            let screen = match NSScreen::mainScreen(mtm) {
                Some(screen) => screen,
                None => {
                    log::debug!("WINGUARD: no main screen to center on");
                    return;
                }
            };
            let visible: NSRect = msg_send![&screen, visibleFrame];
            let frame: NSRect = msg_send![&window, frame];

            let origin = Pt {
                x: visible.origin.x + (visible.size.x - frame.size.x) / 2.0,
                y: visible.origin.y + (visible.size.y - frame.size.y) / 2.0,
            };
            let _: () = msg_send![&window, setFrameOrigin: origin];
        }
    }

    fn hide_agent(&self) {
        unsafe {
            pbmba_appkit::hide_agent();
        }
    }
}
