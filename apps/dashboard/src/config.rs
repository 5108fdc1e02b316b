use std::{fs, time::Duration};

use serde::Deserialize;
use shared::domain::ValuePolicy;
use sync_core::SessionConfig;
use tracing::warn;

const SETTINGS_FILE: &str = "dashboard.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub store_url: String,
    pub poll_interval_ms: u64,
    pub value_policy: ValuePolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            store_url: "http://127.0.0.1:8443".into(),
            poll_interval_ms: 2000,
            value_policy: ValuePolicy::Reject,
        }
    }
}

impl Settings {
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            value_policy: self.value_policy,
            ..SessionConfig::default()
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    store_url: Option<String>,
    poll_interval_ms: Option<u64>,
    value_policy: Option<String>,
}

/// Defaults, then `dashboard.toml`, then environment. Command line flags are
/// applied on top by the caller.
pub fn load_settings() -> Settings {
    let file = match fs::read_to_string(SETTINGS_FILE) {
        Ok(raw) => match toml::from_str::<FileSettings>(&raw) {
            Ok(parsed) => Some(parsed),
            Err(error) => {
                warn!(%error, file = SETTINGS_FILE, "ignoring unparsable settings file");
                None
            }
        },
        Err(_) => None,
    };
    resolve_settings(file, |key| std::env::var(key).ok())
}

fn resolve_settings(
    file: Option<FileSettings>,
    env: impl Fn(&str) -> Option<String>,
) -> Settings {
    let mut settings = Settings::default();

    if let Some(file_cfg) = file {
        if let Some(v) = file_cfg.store_url {
            settings.store_url = v;
        }
        if let Some(v) = file_cfg.poll_interval_ms {
            settings.poll_interval_ms = v;
        }
        if let Some(v) = file_cfg.value_policy {
            apply_policy(&mut settings, &v, SETTINGS_FILE);
        }
    }

    if let Some(v) = env("DASHBOARD_STORE_URL") {
        settings.store_url = v;
    }
    if let Some(v) = env("DASHBOARD_POLL_INTERVAL_MS") {
        match v.trim().parse() {
            Ok(ms) => settings.poll_interval_ms = ms,
            Err(error) => warn!(%error, value = %v, "ignoring DASHBOARD_POLL_INTERVAL_MS"),
        }
    }
    if let Some(v) = env("DASHBOARD_VALUE_POLICY") {
        apply_policy(&mut settings, &v, "DASHBOARD_VALUE_POLICY");
    }

    settings
}

fn apply_policy(settings: &mut Settings, raw: &str, source: &str) {
    match raw.parse() {
        Ok(policy) => settings.value_policy = policy,
        Err(error) => warn!(%error, source, "ignoring value policy"),
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
