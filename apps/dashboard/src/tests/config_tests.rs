use super::{resolve_settings, FileSettings, Settings};

use std::{collections::HashMap, time::Duration};

use shared::domain::ValuePolicy;

#[test]
fn defaults_poll_every_two_seconds_and_reject() {
    let settings = resolve_settings(None, |_| None);
    assert_eq!(settings, Settings::default());
    let config = settings.session_config();
    assert_eq!(config.poll_interval, Duration::from_millis(2000));
    assert_eq!(config.value_policy, ValuePolicy::Reject);
}

#[test]
fn environment_overrides_file() {
    let file: FileSettings = toml::from_str(
        r#"
        store_url = "http://store.local:8443"
        poll_interval_ms = 5000
        value_policy = "clamp"
        "#,
    )
    .expect("toml");
    let env: HashMap<&str, &str> = HashMap::from([("DASHBOARD_POLL_INTERVAL_MS", "750")]);

    let settings = resolve_settings(Some(file), |key| env.get(key).map(|v| v.to_string()));
    assert_eq!(settings.store_url, "http://store.local:8443");
    assert_eq!(settings.poll_interval_ms, 750);
    assert_eq!(settings.value_policy, ValuePolicy::Clamp);
}

#[test]
fn unparsable_values_keep_the_previous_layer() {
    let env: HashMap<&str, &str> = HashMap::from([
        ("DASHBOARD_POLL_INTERVAL_MS", "soon"),
        ("DASHBOARD_VALUE_POLICY", "wrap"),
    ]);
    let settings = resolve_settings(None, |key| env.get(key).map(|v| v.to_string()));
    assert_eq!(settings.poll_interval_ms, 2000);
    assert_eq!(settings.value_policy, ValuePolicy::Reject);
}

#[test]
fn zero_interval_is_raised_to_one_millisecond() {
    let settings = Settings {
        poll_interval_ms: 0,
        ..Settings::default()
    };
    assert_eq!(
        settings.session_config().poll_interval,
        Duration::from_millis(1)
    );
}
