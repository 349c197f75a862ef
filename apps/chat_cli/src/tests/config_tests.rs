use super::*;

use std::{
    collections::HashMap,
    env, fs,
    time::{SystemTime, UNIX_EPOCH},
};

fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn defaults_apply_without_file_or_env() {
    let mut settings = Settings::default();
    apply_env(&mut settings, |_| None);
    assert_eq!(settings, Settings::default());
    assert_eq!(settings.request_timeout(), Duration::from_secs(10));
}

#[test]
fn file_values_override_defaults() {
    let mut settings = Settings::default();
    apply_file(
        &mut settings,
        r#"
base_url = "https://chat.example.com"
session_cookie = "session=abc"
request_timeout_secs = 3
log_filter = "debug"
"#,
    )
    .expect("valid toml");
    assert_eq!(settings.base_url, "https://chat.example.com");
    assert_eq!(settings.session_cookie.as_deref(), Some("session=abc"));
    assert_eq!(settings.request_timeout_secs, 3);
    assert_eq!(settings.log_filter, "debug");
}

#[test]
fn mistyped_file_values_are_skipped() {
    let mut settings = Settings::default();
    apply_file(&mut settings, "request_timeout_secs = \"soon\"\nbase_url = 5\n")
        .expect("valid toml");
    assert_eq!(settings, Settings::default());

    assert!(apply_file(&mut settings, "this is not toml").is_err());
    assert_eq!(settings, Settings::default());
}

#[test]
fn app_prefixed_env_wins_over_short_names() {
    let env = vars(&[
        ("CHAT_BASE_URL", "http://short:1"),
        ("APP__BASE_URL", "http://prefixed:2"),
        ("CHAT_SESSION_COOKIE", "session=short"),
        ("APP__LOG_FILTER", "client_core=trace"),
    ]);
    let mut settings = Settings::default();
    apply_env(&mut settings, |key| env.get(key).cloned());

    assert_eq!(settings.base_url, "http://prefixed:2");
    assert_eq!(settings.session_cookie.as_deref(), Some("session=short"));
    assert_eq!(settings.log_filter, "client_core=trace");
}

#[test]
fn invalid_numeric_env_is_ignored() {
    let env = vars(&[("APP__REQUEST_TIMEOUT_SECS", "ten")]);
    let mut settings = Settings::default();
    apply_env(&mut settings, |key| env.get(key).cloned());
    assert_eq!(settings.request_timeout_secs, 10);

    let env = vars(&[("APP__REQUEST_TIMEOUT_SECS", " 25 ")]);
    apply_env(&mut settings, |key| env.get(key).cloned());
    assert_eq!(settings.request_timeout_secs, 25);
}

#[test]
fn zero_timeout_is_clamped() {
    let settings = Settings {
        request_timeout_secs: 0,
        ..Settings::default()
    };
    assert_eq!(settings.request_timeout(), Duration::from_secs(1));
}

#[test]
fn loads_settings_from_file_on_disk() {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let temp_root = env::temp_dir().join(format!("chat_cli_config_test_{suffix}"));
    fs::create_dir_all(&temp_root).expect("temp root");
    let path = temp_root.join(DEFAULT_CONFIG_FILE);
    fs::write(&path, "request_timeout_secs = 42\n").expect("write config");

    let (settings, file_error) = load_settings(&path);
    assert_eq!(settings.request_timeout_secs, 42);
    assert!(file_error.is_none());

    fs::remove_dir_all(temp_root).expect("cleanup");
}

#[test]
fn missing_file_falls_back_to_defaults() {
    let (settings, file_error) = load_settings(Path::new("/nonexistent/chat-client.toml"));
    assert_eq!(settings.session_cookie, Settings::default().session_cookie);
    assert!(file_error.is_none());
}

#[test]
fn unreadable_file_is_reported_to_the_caller() {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let temp_root = env::temp_dir().join(format!("chat_cli_bad_config_test_{suffix}"));
    fs::create_dir_all(&temp_root).expect("temp root");
    let path = temp_root.join(DEFAULT_CONFIG_FILE);
    fs::write(&path, "base_url = \"http://unterminated\n").expect("write config");

    let (settings, file_error) = load_settings(&path);
    assert!(file_error.is_some(), "parse error comes back for logging");
    assert_ne!(settings.base_url, "http://unterminated");

    fs::remove_dir_all(temp_root).expect("cleanup");
}
