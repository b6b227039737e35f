// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Scale Invariant

#![cfg(target_os = "macos")]

// UNUserNotificationCenter adapter. Authorization is requested once at arm
// time; the delivery path queries settings fresh for every notice.

use std::sync::mpsc;
use std::time::Duration;

use block2::StackBlock;
use objc2::msg_send;
use objc2::rc::Retained;
use objc2::runtime::{AnyObject, Bool};
use objc2_foundation::NSString;

use crate::pbgn_notify::{AuthorizationState, NotificationCenter, NotificationRequest};

// UNAuthorizationOptions: badge | sound | alert | provisional
const UN_OPTION_BADGE: u64 = 1 << 0;
const UN_OPTION_SOUND: u64 = 1 << 1;
const UN_OPTION_ALERT: u64 = 1 << 2;
const UN_OPTION_PROVISIONAL: u64 = 1 << 6;

// UNAuthorizationStatus
const UN_STATUS_NOT_DETERMINED: i64 = 0;
const UN_STATUS_DENIED: i64 = 1;
const UN_STATUS_AUTHORIZED: i64 = 2;
const UN_STATUS_PROVISIONAL: i64 = 3;

// The settings completion handler arrives on a background queue; this caps
// how long an interdiction waits for it. The cap stays within one hub drain
// interval so a stalled notification daemon cannot back up event dispatch.
const SETTINGS_QUERY_TIMEOUT: Duration = Duration::from_millis(250);

pub struct UserNoticeCenter;

impl UserNoticeCenter {
    pub fn new() -> Self {
        UserNoticeCenter
    }
}

unsafe fn shared_center() -> *mut AnyObject {
    msg_send![
        objc2::class!(UNUserNotificationCenter),
        currentNotificationCenter
    ]
}

impl NotificationCenter for UserNoticeCenter {
    fn request_authorization(&self) {
        let handler = StackBlock::new(|granted: Bool, error: *mut AnyObject| {
            if !error.is_null() {
                log::warn!("NOTIFY: authorization request failed");
            } else if granted.as_bool() {
                log::info!("NOTIFY: notification authorization granted");
            } else {
                log::info!("NOTIFY: notification authorization declined");
            }
        });
        let options = UN_OPTION_BADGE | UN_OPTION_SOUND | UN_OPTION_ALERT | UN_OPTION_PROVISIONAL;
        unsafe {
            let center = shared_center();
            let _: () = msg_send![
                center,
                requestAuthorizationWithOptions: options,
                completionHandler: &*handler,
            ];
        }
    }

    fn authorization_state(&self) -> AuthorizationState {
        let (tx, rx) = mpsc::channel();
        let handler = StackBlock::new(move |settings: *mut AnyObject| {
            let status: i64 = if settings.is_null() {
                -1
            } else {
                unsafe { msg_send![settings, authorizationStatus] }
            };
            let _ = tx.send(status);
        });
        unsafe {
            let center = shared_center();
            let _: () = msg_send![center, getNotificationSettingsWithCompletionHandler: &*handler];
        }

        match rx.recv_timeout(SETTINGS_QUERY_TIMEOUT) {
            Ok(UN_STATUS_AUTHORIZED) => AuthorizationState::Authorized,
            Ok(UN_STATUS_DENIED) => AuthorizationState::Denied,
            Ok(UN_STATUS_NOT_DETERMINED) => AuthorizationState::NotDetermined,
            Ok(UN_STATUS_PROVISIONAL) => AuthorizationState::Provisional,
            Ok(raw) => AuthorizationState::Unknown(raw),
            Err(_) => {
                log::warn!("NOTIFY: notification settings query timed out");
                AuthorizationState::Unknown(-1)
            }
        }
    }

    fn enqueue(&self, request: NotificationRequest) {
        let handler = StackBlock::new(|error: *mut AnyObject| {
            if !error.is_null() {
                log::warn!("NOTIFY: delivery request failed");
            }
        });
        unsafe {
            let content: Retained<AnyObject> =
                msg_send![objc2::class!(UNMutableNotificationContent), new];
            let title = NSString::from_str(&request.title);
            let _: () = msg_send![&content, setTitle: &*title];
            let subtitle = NSString::from_str(&request.subtitle);
            let _: () = msg_send![&content, setSubtitle: &*subtitle];
            let body = NSString::from_str(&request.body);
            let _: () = msg_send![&content, setBody: &*body];
            let category = NSString::from_str(&request.category);
            let _: () = msg_send![&content, setCategoryIdentifier: &*category];
            if request.default_sound {
                let sound: Retained<AnyObject> =
                    msg_send![objc2::class!(UNNotificationSound), defaultSound];
                let _: () = msg_send![&content, setSound: &*sound];
            }

            let trigger: Retained<AnyObject> = msg_send![
                objc2::class!(UNTimeIntervalNotificationTrigger),
                triggerWithTimeInterval: request.delay.as_secs_f64(),
                repeats: Bool::new(request.repeats),
            ];
            let id = NSString::from_str(&request.id);
            let un_request: Retained<AnyObject> = msg_send![
                objc2::class!(UNNotificationRequest),
                requestWithIdentifier: &*id,
                content: &*content,
                trigger: &*trigger,
            ];

            let center = shared_center();
            let _: () = msg_send![
                center,
                addNotificationRequest: &*un_request,
                withCompletionHandler: &*handler,
            ];
        }
        log::debug!("NOTIFY: enqueued notice {}", request.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Settings queries sit on the interdiction dispatch path; the wait cap
    // must not exceed one drain interval of the hub.
    #[test]
    fn test_settings_query_wait_within_drain_cadence() {
        let cadence = crate::pbmbo_observer::DRAIN_INTERVAL_SECS;
        assert!(SETTINGS_QUERY_TIMEOUT.as_secs_f64() <= cadence);
    }
}
