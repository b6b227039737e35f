// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Scale Invariant

// Policy resolution and deadline math.
// Managed profile (plist pushed by MDM) wins over the local JSON file,
// which wins over built-in defaults. Both raw sources are kept around for
// the diagnostic print flags and the config digests.

use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::pbgc_core::AGENT_BUNDLE_ID;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("policy: json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("policy: profile: {0}")]
    Profile(String),
}

/// Time source seam so deadline logic is testable with a pinned clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Read-only enforcement inputs. Field names follow the camelCase key style
/// administrators know from managed-preference payloads.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct PolicySettings {
    pub required_installation_date: DateTime<Utc>,
    pub blocked_application_bundle_ids: Vec<String>,
    pub attempt_to_block_application_launches: bool,
    pub terminate_applications_on_launch: bool,
    pub asynchronous_software_update: bool,
    pub random_delay: bool,
    pub max_random_delay_in_seconds: u64,
    pub demo_mode: bool,
    pub unit_testing_mode: bool,
    pub require_major_upgrade: bool,
    pub action_button_path: Option<String>,
    pub attempt_to_fetch_major_upgrade: bool,
    pub major_upgrade_app_path: String,
    pub major_upgrade_backup_app_path: String,
    pub allow_grace_periods: bool,
    pub grace_period_install_delay_in_hours: i64,
    pub grace_period_path: String,
    pub desired_language: Option<String>,
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            // Unconfigured agents never reach their deadline.
            required_installation_date: DateTime::<Utc>::MAX_UTC,
            blocked_application_bundle_ids: Vec::new(),
            attempt_to_block_application_launches: false,
            terminate_applications_on_launch: false,
            asynchronous_software_update: true,
            random_delay: false,
            max_random_delay_in_seconds: 1200,
            demo_mode: false,
            unit_testing_mode: false,
            require_major_upgrade: false,
            action_button_path: None,
            attempt_to_fetch_major_upgrade: true,
            major_upgrade_app_path: String::new(),
            major_upgrade_backup_app_path: String::new(),
            allow_grace_periods: false,
            grace_period_install_delay_in_hours: 23,
            grace_period_path: "/private/var/db/.AppleSetupDone".to_string(),
            desired_language: None,
        }
    }
}

impl PolicySettings {
    /// Deadline after the optional grace extension. The anchor is the grace
    /// file's modification time; a fresh enough anchor pushes the deadline
    /// out by the configured number of hours.
    pub fn effective_deadline(&self, grace_anchor: Option<DateTime<Utc>>) -> DateTime<Utc> {
        let base = self.required_installation_date;
        if !self.allow_grace_periods {
            return base;
        }
        match grace_anchor {
            Some(anchor) => {
                let candidate =
                    anchor + ChronoDuration::hours(self.grace_period_install_delay_in_hours);
                if candidate > base {
                    log::info!(
                        "CONFIG: grace period extends deadline {} -> {}",
                        base.to_rfc3339(),
                        candidate.to_rfc3339()
                    );
                    candidate
                } else {
                    base
                }
            }
            None => base,
        }
    }

    pub fn deadline_passed(&self, clock: &dyn Clock, grace_anchor: Option<DateTime<Utc>>) -> bool {
        clock.now() >= self.effective_deadline(grace_anchor)
    }
}

// ===== SECTION 1: config source locations =====

pub fn managed_profile_path() -> PathBuf {
    PathBuf::from(format!(
        "/Library/Managed Preferences/{}.plist",
        AGENT_BUNDLE_ID
    ))
}

/// The classic mis-deployment: an administrator pushes the JSON file name
/// through the profile channel. The agent refuses to start in that state.
pub fn legacy_bad_profile_path() -> PathBuf {
    PathBuf::from(format!(
        "/Library/Managed Preferences/{}.json.plist",
        AGENT_BUNDLE_ID
    ))
}

pub fn system_json_path() -> PathBuf {
    PathBuf::from(format!("/Library/Preferences/{}.json", AGENT_BUNDLE_ID))
}

pub fn user_json_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| {
        home.join("Library")
            .join("Preferences")
            .join(format!("{}.json", AGENT_BUNDLE_ID))
    })
}

fn read_if_present(path: &PathBuf) -> Vec<u8> {
    match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) => {
            if err.kind() != std::io::ErrorKind::NotFound {
                log::warn!("CONFIG: cannot read {}: {}", path.display(), err);
            }
            Vec::new()
        }
    }
}

// ===== SECTION 2: profile plist parsing =====

// Minimal plist reader: enough for the dict/array/string/date/integer/real/
// bool subset management tools emit. Produces a JSON value so the same serde
// model backs both sources.
fn parse_plist_value(xml: &str) -> Result<Value, String> {
    enum Node {
        Dict(serde_json::Map<String, Value>),
        Array(Vec<Value>),
    }

    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut stack: Vec<Node> = Vec::new();
    let mut pending_key: Option<String> = None;
    let mut root: Option<Value> = None;
    let mut text = String::new();
    let mut buf = Vec::new();

    fn attach(
        value: Value,
        stack: &mut Vec<Node>,
        pending_key: &mut Option<String>,
        root: &mut Option<Value>,
    ) -> Result<(), String> {
        match stack.last_mut() {
            Some(Node::Dict(map)) => {
                let key = pending_key
                    .take()
                    .ok_or_else(|| "value without preceding <key>".to_string())?;
                map.insert(key, value);
                Ok(())
            }
            Some(Node::Array(items)) => {
                items.push(value);
                Ok(())
            }
            None => {
                if root.is_some() {
                    return Err("multiple root values".to_string());
                }
                *root = Some(value);
                Ok(())
            }
        }
    }

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"plist" => {}
                b"dict" => stack.push(Node::Dict(serde_json::Map::new())),
                b"array" => stack.push(Node::Array(Vec::new())),
                b"key" | b"string" | b"date" | b"integer" | b"real" | b"data" => text.clear(),
                other => {
                    return Err(format!(
                        "unsupported element <{}>",
                        String::from_utf8_lossy(other)
                    ))
                }
            },
            Ok(Event::Text(ref t)) => {
                let piece = t
                    .unescape()
                    .map_err(|e| format!("text decode error: {}", e))?;
                text.push_str(&piece);
            }
            Ok(Event::Empty(ref e)) => match e.name().as_ref() {
                b"true" => attach(Value::Bool(true), &mut stack, &mut pending_key, &mut root)?,
                b"false" => attach(Value::Bool(false), &mut stack, &mut pending_key, &mut root)?,
                b"dict" => attach(
                    Value::Object(serde_json::Map::new()),
                    &mut stack,
                    &mut pending_key,
                    &mut root,
                )?,
                b"array" => attach(Value::Array(Vec::new()), &mut stack, &mut pending_key, &mut root)?,
                b"string" | b"date" | b"data" => {
                    attach(Value::String(String::new()), &mut stack, &mut pending_key, &mut root)?
                }
                other => {
                    return Err(format!(
                        "unsupported empty element <{}/>",
                        String::from_utf8_lossy(other)
                    ))
                }
            },
            Ok(Event::End(ref e)) => match e.name().as_ref() {
                b"plist" => {}
                b"dict" | b"array" => {
                    let node = stack.pop().ok_or_else(|| "unbalanced container".to_string())?;
                    let value = match node {
                        Node::Dict(map) => Value::Object(map),
                        Node::Array(items) => Value::Array(items),
                    };
                    attach(value, &mut stack, &mut pending_key, &mut root)?;
                }
                b"key" => pending_key = Some(std::mem::take(&mut text)),
                b"string" | b"date" | b"data" => {
                    let s = std::mem::take(&mut text);
                    attach(Value::String(s), &mut stack, &mut pending_key, &mut root)?;
                }
                b"integer" => {
                    let n = text
                        .trim()
                        .parse::<i64>()
                        .map_err(|_| format!("invalid integer: {}", text))?;
                    text.clear();
                    attach(Value::Number(n.into()), &mut stack, &mut pending_key, &mut root)?;
                }
                b"real" => {
                    let n = text
                        .trim()
                        .parse::<f64>()
                        .map_err(|_| format!("invalid real: {}", text))?;
                    text.clear();
                    let number = serde_json::Number::from_f64(n)
                        .ok_or_else(|| format!("non-finite real: {}", n))?;
                    attach(Value::Number(number), &mut stack, &mut pending_key, &mut root)?;
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("XML parse error: {}", e)),
            _ => {}
        }
        buf.clear();
    }

    root.ok_or_else(|| "empty plist".to_string())
}

pub fn parse_profile_settings(xml: &str) -> Result<PolicySettings, PolicyError> {
    let value = parse_plist_value(xml).map_err(PolicyError::Profile)?;
    Ok(serde_json::from_value(value)?)
}

pub fn parse_json_settings(bytes: &[u8]) -> Result<PolicySettings, PolicyError> {
    Ok(serde_json::from_slice(bytes)?)
}

// ===== SECTION 3: resolution =====

#[derive(Clone, Debug, PartialEq)]
pub enum PolicyOrigin {
    ManagedProfile,
    JsonFile,
    Defaults,
}

pub struct PolicySource {
    pub settings: PolicySettings,
    pub origin: PolicyOrigin,
    pub profile_bytes: Vec<u8>,
    pub json_bytes: Vec<u8>,
}

impl PolicySource {
    /// Pure resolution over already-read bytes; parse failures warn and fall
    /// through to the next source instead of stopping the agent.
    pub fn resolve(profile_bytes: Vec<u8>, json_bytes: Vec<u8>) -> Self {
        if !profile_bytes.is_empty() {
            match std::str::from_utf8(&profile_bytes)
                .map_err(|e| PolicyError::Profile(e.to_string()))
                .and_then(parse_profile_settings)
            {
                Ok(settings) => {
                    log::info!("CONFIG: using managed profile");
                    return Self {
                        settings,
                        origin: PolicyOrigin::ManagedProfile,
                        profile_bytes,
                        json_bytes,
                    };
                }
                Err(err) => log::warn!("CONFIG: managed profile unusable: {}", err),
            }
        }
        if !json_bytes.is_empty() {
            match parse_json_settings(&json_bytes) {
                Ok(settings) => {
                    log::info!("CONFIG: using JSON configuration");
                    return Self {
                        settings,
                        origin: PolicyOrigin::JsonFile,
                        profile_bytes,
                        json_bytes,
                    };
                }
                Err(err) => log::warn!("CONFIG: JSON configuration unusable: {}", err),
            }
        }
        log::info!("CONFIG: no configuration found, using defaults");
        Self {
            settings: PolicySettings::default(),
            origin: PolicyOrigin::Defaults,
            profile_bytes,
            json_bytes,
        }
    }

    /// Read both sources from their well-known locations.
    pub fn load() -> Self {
        let profile_bytes = read_if_present(&managed_profile_path());
        let mut json_bytes = read_if_present(&system_json_path());
        if json_bytes.is_empty() {
            if let Some(path) = user_json_path() {
                json_bytes = read_if_present(&path);
            }
        }
        Self::resolve(profile_bytes, json_bytes)
    }

    /// Profile source rendered as pretty JSON, for `-print-profile-config`.
    pub fn profile_pretty(&self) -> Option<String> {
        if self.profile_bytes.is_empty() {
            return None;
        }
        let xml = std::str::from_utf8(&self.profile_bytes).ok()?;
        let value = parse_plist_value(xml).ok()?;
        serde_json::to_string_pretty(&value).ok()
    }

    /// JSON source rendered as pretty JSON, for `-print-json-config`.
    pub fn json_pretty(&self) -> Option<String> {
        if self.json_bytes.is_empty() {
            return None;
        }
        let value: Value = serde_json::from_slice(&self.json_bytes).ok()?;
        serde_json::to_string_pretty(&value).ok()
    }
}

// ===== SECTION 4: grace period and upgrade artifacts =====

/// Modification time of the grace file, if grace periods are on and the file
/// exists. This is the anchor `effective_deadline` extends from.
pub fn grace_anchor(settings: &PolicySettings) -> Option<DateTime<Utc>> {
    if !settings.allow_grace_periods || settings.grace_period_path.is_empty() {
        return None;
    }
    let meta = fs::metadata(&settings.grace_period_path).ok()?;
    let modified = meta.modified().ok()?;
    Some(DateTime::<Utc>::from(modified))
}

/// Signals the major-upgrade gate consumes. Installer presence comes from
/// the filesystem; the fetch fields are filled in after the update trigger
/// has run.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct UpgradeArtifacts {
    pub fetch_attempted: bool,
    pub fetch_succeeded: bool,
    pub primary_installer_present: bool,
    pub backup_installer_present: bool,
}

impl UpgradeArtifacts {
    pub fn installer_present(&self) -> bool {
        self.primary_installer_present || self.backup_installer_present
    }
}

/// Filesystem half of the signals; the fetch fields stay false here and are
/// filled in by the update-trigger phase.
pub fn probe_upgrade_artifacts(settings: &PolicySettings) -> UpgradeArtifacts {
    UpgradeArtifacts {
        fetch_attempted: false,
        fetch_succeeded: false,
        primary_installer_present: !settings.major_upgrade_app_path.is_empty()
            && fs::metadata(&settings.major_upgrade_app_path).is_ok(),
        backup_installer_present: !settings.major_upgrade_backup_app_path.is_empty()
            && fs::metadata(&settings.major_upgrade_backup_app_path).is_ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    struct FixedClock(DateTime<Utc>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    fn utc(y: i32, mo: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, 0, 0, 0).single().unwrap()
    }

    const PROFILE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>requiredInstallationDate</key>
    <date>2026-09-01T00:00:00Z</date>
    <key>blockedApplicationBundleIds</key>
    <array>
        <string>com.example.chat</string>
        <string>com.example.game</string>
    </array>
    <key>attemptToBlockApplicationLaunches</key>
    <true/>
    <key>terminateApplicationsOnLaunch</key>
    <true/>
    <key>asynchronousSoftwareUpdate</key>
    <false/>
    <key>maxRandomDelayInSeconds</key>
    <integer>600</integer>
    <key>actionButtonPath</key>
    <string></string>
</dict>
</plist>
"#;

    #[test]
    fn test_defaults() {
        let s = PolicySettings::default();
        assert!(s.asynchronous_software_update);
        assert!(s.attempt_to_fetch_major_upgrade);
        assert_eq!(s.max_random_delay_in_seconds, 1200);
        assert_eq!(s.grace_period_install_delay_in_hours, 23);
        assert!(!s.attempt_to_block_application_launches);
        assert!(s.blocked_application_bundle_ids.is_empty());
        assert_eq!(s.action_button_path, None);
        // A factory-default agent never enforces.
        let clock = FixedClock(utc(2030, 1, 1));
        assert!(!s.deadline_passed(&clock, None));
    }

    #[test]
    fn test_parse_json_settings() {
        let json = br#"{
            "requiredInstallationDate": "2026-09-01T00:00:00Z",
            "blockedApplicationBundleIds": ["com.example.chat"],
            "attemptToBlockApplicationLaunches": true,
            "randomDelay": true,
            "maxRandomDelayInSeconds": 300
        }"#;
        let s = parse_json_settings(json).unwrap();
        assert_eq!(s.required_installation_date, utc(2026, 9, 1));
        assert_eq!(s.blocked_application_bundle_ids, vec!["com.example.chat"]);
        assert!(s.attempt_to_block_application_launches);
        assert!(s.random_delay);
        assert_eq!(s.max_random_delay_in_seconds, 300);
        // Unset fields keep their defaults.
        assert!(s.asynchronous_software_update);
    }

    #[test]
    fn test_parse_profile_settings() {
        let s = parse_profile_settings(PROFILE).unwrap();
        assert_eq!(s.required_installation_date, utc(2026, 9, 1));
        assert_eq!(
            s.blocked_application_bundle_ids,
            vec!["com.example.chat", "com.example.game"]
        );
        assert!(s.attempt_to_block_application_launches);
        assert!(s.terminate_applications_on_launch);
        assert!(!s.asynchronous_software_update);
        assert_eq!(s.max_random_delay_in_seconds, 600);
        // <string></string> is an empty string, not absence.
        assert_eq!(s.action_button_path, Some(String::new()));
    }

    #[test]
    fn test_parse_profile_rejects_garbage() {
        assert!(parse_profile_settings("<plist><dict><string>x</string></dict></plist>").is_err());
        assert!(parse_profile_settings("not xml at all <<<").is_err());
        assert!(parse_profile_settings("<plist></plist>").is_err());
    }

    #[test]
    fn test_resolution_precedence() {
        let json = br#"{"maxRandomDelayInSeconds": 111}"#.to_vec();
        let profile = PROFILE.as_bytes().to_vec();

        let both = PolicySource::resolve(profile.clone(), json.clone());
        assert_eq!(both.origin, PolicyOrigin::ManagedProfile);
        assert_eq!(both.settings.max_random_delay_in_seconds, 600);

        let json_only = PolicySource::resolve(Vec::new(), json);
        assert_eq!(json_only.origin, PolicyOrigin::JsonFile);
        assert_eq!(json_only.settings.max_random_delay_in_seconds, 111);

        let neither = PolicySource::resolve(Vec::new(), Vec::new());
        assert_eq!(neither.origin, PolicyOrigin::Defaults);
        assert_eq!(neither.settings, PolicySettings::default());
    }

    #[test]
    fn test_broken_profile_falls_through_to_json() {
        let json = br#"{"maxRandomDelayInSeconds": 222}"#.to_vec();
        let source = PolicySource::resolve(b"<plist><dict><key>".to_vec(), json);
        assert_eq!(source.origin, PolicyOrigin::JsonFile);
        assert_eq!(source.settings.max_random_delay_in_seconds, 222);
    }

    #[test]
    fn test_pretty_printers() {
        let json = br#"{"randomDelay": true}"#.to_vec();
        let source = PolicySource::resolve(PROFILE.as_bytes().to_vec(), json);
        let profile_out = source.profile_pretty().unwrap();
        assert!(profile_out.contains("\"requiredInstallationDate\""));
        assert!(profile_out.contains("com.example.chat"));
        let json_out = source.json_pretty().unwrap();
        assert!(json_out.contains("\"randomDelay\": true"));

        let empty = PolicySource::resolve(Vec::new(), Vec::new());
        assert!(empty.profile_pretty().is_none());
        assert!(empty.json_pretty().is_none());
    }

    #[test]
    fn test_deadline_passed() {
        let mut s = PolicySettings::default();
        s.required_installation_date = utc(2026, 9, 1);
        assert!(!s.deadline_passed(&FixedClock(utc(2026, 8, 31)), None));
        assert!(s.deadline_passed(&FixedClock(utc(2026, 9, 1)), None));
        assert!(s.deadline_passed(&FixedClock(utc(2026, 9, 2)), None));
    }

    #[test]
    fn test_grace_period_extends_deadline() {
        let mut s = PolicySettings::default();
        s.required_installation_date = utc(2026, 9, 1);
        s.allow_grace_periods = true;
        s.grace_period_install_delay_in_hours = 48;

        // Machine provisioned the day of the deadline: 48h of grace.
        let anchor = Some(utc(2026, 9, 1));
        assert_eq!(s.effective_deadline(anchor), utc(2026, 9, 3));
        assert!(!s.deadline_passed(&FixedClock(utc(2026, 9, 2)), anchor));
        assert!(s.deadline_passed(&FixedClock(utc(2026, 9, 3)), anchor));

        // Old provisioning date changes nothing.
        let stale = Some(utc(2026, 1, 1));
        assert_eq!(s.effective_deadline(stale), utc(2026, 9, 1));
    }

    #[test]
    fn test_grace_period_disabled_ignores_anchor() {
        let mut s = PolicySettings::default();
        s.required_installation_date = utc(2026, 9, 1);
        assert_eq!(s.effective_deadline(Some(utc(2026, 9, 1))), utc(2026, 9, 1));
    }

    #[test]
    fn test_upgrade_artifacts_presence() {
        let mut s = PolicySettings::default();
        s.attempt_to_fetch_major_upgrade = false;
        s.major_upgrade_app_path = "/nonexistent/Install.app".to_string();
        let artifacts = probe_upgrade_artifacts(&s);
        assert!(!artifacts.fetch_attempted);
        assert!(!artifacts.installer_present());

        let mut present = UpgradeArtifacts::default();
        present.backup_installer_present = true;
        assert!(present.installer_present());
    }

    #[test]
    fn test_config_paths_carry_bundle_id() {
        assert!(managed_profile_path().to_string_lossy().contains(AGENT_BUNDLE_ID));
        assert!(legacy_bad_profile_path()
            .to_string_lossy()
            .ends_with(".json.plist"));
        assert!(system_json_path().to_string_lossy().ends_with(".json"));
    }
}
