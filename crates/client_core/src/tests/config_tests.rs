use std::{
    collections::HashMap,
    env,
    time::{SystemTime, UNIX_EPOCH},
};

use super::*;

fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| vars.get(key).cloned()
}

#[test]
fn defaults_match_view_constants() {
    let settings = Settings::default();
    assert_eq!(settings.gallery_page_size, 8);
    assert_eq!(settings.chat_history_limit, 50);
    assert_eq!(settings.typing_idle(), Duration::from_secs(2));
    assert_eq!(settings.metrics_interval(), Duration::from_secs(5));
    assert_eq!(settings.image_bucket, "images");
    assert_eq!(settings.chat_channel, "room1");
    settings.validate().expect("defaults are valid");
}

#[test]
fn file_values_override_defaults_and_env_overrides_file() {
    let mut settings = Settings::default();
    apply_file(
        &mut settings,
        r#"
            backend_url = "https://demo.example.co"
            gallery_page_size = 12
            image_bucket = "photos"
        "#,
    )
    .expect("valid toml");
    assert_eq!(settings.backend_url, "https://demo.example.co");
    assert_eq!(settings.gallery_page_size, 12);

    apply_env_overrides(
        &mut settings,
        env_from(&[
            ("BACKEND_URL", "http://ignored.local"),
            ("APP__BACKEND_URL", "http://localhost:54321"),
            ("APP__GALLERY_PAGE_SIZE", "not-a-number"),
            ("APP__TYPING_IDLE_MS", "1500"),
            ("BACKEND_API_KEY", "anon"),
        ]),
    );
    assert_eq!(settings.backend_url, "http://localhost:54321");
    assert_eq!(settings.gallery_page_size, 12);
    assert_eq!(settings.typing_idle_ms, 1500);
    assert_eq!(settings.api_key, "anon");
    assert_eq!(settings.image_bucket, "photos");
}

#[test]
fn malformed_file_is_rejected() {
    let mut settings = Settings::default();
    assert!(apply_file(&mut settings, "gallery_page_size = \"eight\"").is_err());
}

#[test]
fn realtime_url_is_derived_from_backend_url() {
    assert_eq!(
        derive_realtime_url("https://demo.example.co/").expect("https"),
        "wss://demo.example.co/realtime/v1/websocket"
    );
    assert_eq!(
        derive_realtime_url("http://127.0.0.1:54321").expect("http"),
        "ws://127.0.0.1:54321/realtime/v1/websocket"
    );
    assert!(derive_realtime_url("ftp://nope").is_err());

    let settings = Settings {
        realtime_url: Some("ws://custom/socket".into()),
        ..Settings::default()
    };
    assert_eq!(
        settings.realtime_endpoint().expect("explicit"),
        "ws://custom/socket"
    );
}

#[test]
fn validate_rejects_zero_page_size() {
    let settings = Settings {
        gallery_page_size: 0,
        ..Settings::default()
    };
    assert!(matches!(settings.validate(), Err(ClientError::Config(_))));
}

#[test]
fn explicit_missing_config_file_is_an_error() {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let missing = env::temp_dir().join(format!("missing_client_{suffix}.toml"));
    assert!(load_settings(Some(&missing)).is_err());
}

#[test]
fn explicit_config_file_is_loaded() {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let path = env::temp_dir().join(format!("client_{suffix}.toml"));
    fs::write(&path, "chat_channel = \"lobby\"\n").expect("write config");

    let settings = load_settings(Some(&path)).expect("load");
    assert_eq!(settings.chat_channel, "lobby");

    fs::remove_file(path).expect("cleanup");
}
