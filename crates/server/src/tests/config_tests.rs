use super::{normalize_database_url, resolve_settings, FileSettings, Settings};

use std::{
    collections::HashMap,
    env, fs,
    time::{SystemTime, UNIX_EPOCH},
};

#[test]
fn normalizes_plain_file_path_to_sqlite_url() {
    assert_eq!(
        normalize_database_url("./data/test.db"),
        "sqlite://./data/test.db"
    );
}

#[test]
fn keeps_memory_and_full_urls_untouched() {
    assert_eq!(normalize_database_url("sqlite::memory:"), "sqlite::memory:");
    assert_eq!(
        normalize_database_url("sqlite://./store.db"),
        "sqlite://./store.db"
    );
}

#[test]
fn blank_database_url_falls_back_to_default() {
    assert_eq!(
        normalize_database_url("   "),
        Settings::default().database_url
    );
}

#[test]
fn environment_overrides_file_which_overrides_defaults() {
    let file: FileSettings = toml::from_str(
        r#"
        bind_addr = "0.0.0.0:9000"
        database_url = "sqlite://./file.db"
        "#,
    )
    .expect("toml");
    let env: HashMap<&str, &str> = HashMap::from([("APP__DATABASE_URL", "sqlite://./env.db")]);

    let settings = resolve_settings(Some(file), |key| env.get(key).map(|v| v.to_string()));
    assert_eq!(settings.server_bind, "0.0.0.0:9000");
    assert_eq!(settings.database_url, "sqlite://./env.db");
}

#[test]
fn prefixed_env_wins_over_plain_env() {
    let env: HashMap<&str, &str> =
        HashMap::from([("SERVER_BIND", "127.0.0.1:1"), ("APP__BIND_ADDR", "127.0.0.1:2")]);
    let settings = resolve_settings(None, |key| env.get(key).map(|v| v.to_string()));
    assert_eq!(settings.server_bind, "127.0.0.1:2");
    assert_eq!(settings.database_url, Settings::default().database_url);
}

#[tokio::test]
async fn normalized_path_opens_in_a_fresh_directory() {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();

    let temp_root = env::temp_dir().join(format!("home_sync_server_open_test_{suffix}"));
    let db_path = temp_root.join("nested").join("server.db");

    let prepared = normalize_database_url(db_path.to_string_lossy().as_ref());
    let storage = storage::Storage::new(&prepared).await.expect("open sqlite");
    drop(storage);

    assert!(
        db_path.exists(),
        "database file should be created: {}",
        db_path.display()
    );

    fs::remove_dir_all(temp_root).expect("cleanup");
}
