// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Scale Invariant

use std::time::Duration;

use uuid::Uuid;

// One-shot trigger fires effectively immediately; zero is not a valid
// trigger interval on the platform side.
pub const DELIVERY_DELAY: Duration = Duration::from_millis(1);

/// Platform notification authorization, queried fresh before every delivery.
/// Raw statuses the platform may grow later land in Unknown instead of being
/// mis-bucketed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AuthorizationState {
    Authorized,
    Denied,
    NotDetermined,
    Provisional,
    Unknown(i64),
}

/// A fully-formed one-shot notification. The id is a fresh UUID per request
/// so repeated interdictions of the same app never coalesce.
#[derive(Clone, Debug)]
pub struct NotificationRequest {
    pub id: String,
    pub title: String,
    pub subtitle: String,
    pub body: String,
    pub category: String,
    pub default_sound: bool,
    pub delay: Duration,
    pub repeats: bool,
}

/// Seam to the platform notification center. Registration happens once at
/// arm time; its outcome is logged by the adapter and nothing blocks on it.
pub trait NotificationCenter {
    fn request_authorization(&self);
    fn authorization_state(&self) -> AuthorizationState;
    fn enqueue(&self, request: NotificationRequest);
}

/// Languages the two user-facing strings ship in. Everything else falls back
/// to English.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Language {
    En,
    De,
    Es,
    Fr,
    Ja,
}

impl Language {
    pub fn from_tag(tag: &str) -> Self {
        let lower = tag.to_ascii_lowercase();
        let primary = lower
            .split(|c| c == '_' || c == '-' || c == '.')
            .next()
            .unwrap_or("");
        match primary {
            "de" => Language::De,
            "es" => Language::Es,
            "fr" => Language::Fr,
            "ja" => Language::Ja,
            _ => Language::En,
        }
    }

    /// Policy override wins, then the session locale, then English.
    pub fn detect(override_tag: Option<&str>) -> Self {
        if let Some(tag) = override_tag {
            return Language::from_tag(tag);
        }
        match std::env::var("LANG") {
            Ok(tag) => Language::from_tag(&tag),
            Err(_) => Language::En,
        }
    }

    fn terminated_title(&self) -> &'static str {
        match self {
            Language::En => "Application terminated",
            Language::De => "Programm beendet",
            Language::Es => "Aplicación terminada",
            Language::Fr => "Application terminée",
            Language::Ja => "アプリケーションは終了しました",
        }
    }

    fn terminated_body(&self) -> &'static str {
        match self {
            Language::En => "Please update your device to use this application",
            Language::De => "Bitte aktualisieren Sie Ihr Gerät, um diese Anwendung zu verwenden",
            Language::Es => "Actualice su dispositivo para usar esta aplicación",
            Language::Fr => "Veuillez mettre à jour votre appareil pour utiliser cette application",
            Language::Ja => "このアプリケーションを使用するにはデバイスを更新してください",
        }
    }
}

/// Build the "we closed your app" notice for one interdicted application.
pub fn terminated_notice(app_name: &str, lang: Language) -> NotificationRequest {
    NotificationRequest {
        id: Uuid::new_v4().to_string(),
        title: lang.terminated_title().to_string(),
        subtitle: format!("({})", app_name),
        body: lang.terminated_body().to_string(),
        category: "alert".to_string(),
        default_sound: true,
        delay: DELIVERY_DELAY,
        repeats: false,
    }
}

/// Best-effort delivery: query authorization fresh, branch on every state,
/// log the ones where the user sees nothing. Never retried, never awaited.
pub fn deliver_terminated_notice(center: &dyn NotificationCenter, app_name: &str, lang: Language) {
    let request = terminated_notice(app_name, lang);
    match center.authorization_state() {
        AuthorizationState::Authorized => {
            center.enqueue(request);
        }
        AuthorizationState::Provisional => {
            log::info!("NOTIFY: provisional authorization, delivering quietly");
            center.enqueue(request);
        }
        AuthorizationState::Denied => {
            log::info!(
                "NOTIFY: terminated \"{}\" without user notice (authorization denied)",
                app_name
            );
        }
        AuthorizationState::NotDetermined => {
            log::info!(
                "NOTIFY: terminated \"{}\" without user notice (authorization not determined)",
                app_name
            );
        }
        AuthorizationState::Unknown(raw) => {
            log::info!(
                "NOTIFY: terminated \"{}\" without user notice (unknown authorization status {})",
                app_name,
                raw
            );
        }
    }
}
