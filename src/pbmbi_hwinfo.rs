// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Scale Invariant

#![cfg(target_os = "macos")]

// IOKit reader for the platform serial number and hardware UUID that feed
// the device identity payload.

use core_foundation::base::TCFType;
use core_foundation::string::CFString;
use core_foundation_sys::string::CFStringRef;
use std::ffi::c_void;
use std::os::raw::c_char;

use core_foundation_sys::base::CFTypeRef;

use crate::pbgd_identity::HardwareInfo;

// kIOMasterPortDefault is NULL
const IO_MASTER_PORT_DEFAULT: u32 = 0;

#[link(name = "IOKit", kind = "framework")]
extern "C" {
    fn IOServiceMatching(name: *const c_char) -> *mut c_void;
    fn IOServiceGetMatchingService(master_port: u32, matching: *mut c_void) -> u32;
    fn IORegistryEntryCreateCFProperty(
        entry: u32,
        key: CFStringRef,
        allocator: *const c_void,
        options: u32,
    ) -> CFTypeRef;
    fn IOObjectRelease(object: u32) -> i32;
}

unsafe fn copy_string_property(service: u32, key: &'static str) -> Option<String> {
    let key = CFString::from_static_string(key);
    let value = IORegistryEntryCreateCFProperty(
        service,
        key.as_concrete_TypeRef(),
        std::ptr::null(),
        0,
    );
    if value.is_null() {
        return None;
    }
    let value = CFString::wrap_under_create_rule(value as CFStringRef);
    Some(value.to_string())
}

/// Read the serial number and hardware UUID off the platform expert device.
/// Virtual machines and DFU-recovered devices can miss either property.
pub fn read_hardware_info() -> Option<HardwareInfo> {
    unsafe {
        let matching = IOServiceMatching(b"IOPlatformExpertDevice\0".as_ptr() as *const c_char);
        if matching.is_null() {
            log::warn!("METRICS: IOServiceMatching failed");
            return None;
        }
        // IOServiceGetMatchingService consumes the matching dictionary.
        let service = IOServiceGetMatchingService(IO_MASTER_PORT_DEFAULT, matching);
        if service == 0 {
            log::warn!("METRICS: platform expert device not found");
            return None;
        }

        let serial = copy_string_property(service, "IOPlatformSerialNumber");
        let uuid = copy_string_property(service, "IOPlatformUUID");
        IOObjectRelease(service);

        match (serial, uuid) {
            (Some(serial_number), Some(hardware_uuid)) => Some(HardwareInfo {
                hardware_uuid,
                serial_number,
            }),
            _ => {
                log::warn!("METRICS: hardware identity properties unavailable");
                None
            }
        }
    }
}
