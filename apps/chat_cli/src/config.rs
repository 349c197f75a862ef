use std::{fs, path::Path, time::Duration};

pub const DEFAULT_CONFIG_FILE: &str = "chat-client.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub base_url: String,
    pub session_cookie: Option<String>,
    pub request_timeout_secs: u64,
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".into(),
            session_cookie: None,
            request_timeout_secs: 10,
            log_filter: "info".into(),
        }
    }
}

impl Settings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

/// Defaults, then the file, then the environment. A file that is present
/// but not valid TOML is skipped and its error handed back, so the caller
/// can report it once logging is up.
pub fn load_settings(config_path: &Path) -> (Settings, Option<toml::de::Error>) {
    let mut settings = Settings::default();
    let file_error = fs::read_to_string(config_path)
        .ok()
        .and_then(|raw| apply_file(&mut settings, &raw).err());
    apply_env(&mut settings, |key| std::env::var(key).ok());
    (settings, file_error)
}

/// Flat `key = value` file; unknown keys and mistyped values are skipped.
pub(crate) fn apply_file(settings: &mut Settings, raw: &str) -> Result<(), toml::de::Error> {
    let table = toml::from_str::<toml::Table>(raw)?;

    if let Some(v) = table.get("base_url").and_then(toml::Value::as_str) {
        settings.base_url = v.to_string();
    }
    if let Some(v) = table.get("session_cookie").and_then(toml::Value::as_str) {
        settings.session_cookie = Some(v.to_string());
    }
    if let Some(v) = table
        .get("request_timeout_secs")
        .and_then(toml::Value::as_integer)
        .and_then(|v| u64::try_from(v).ok())
    {
        settings.request_timeout_secs = v;
    }
    if let Some(v) = table.get("log_filter").and_then(toml::Value::as_str) {
        settings.log_filter = v.to_string();
    }
    Ok(())
}

pub(crate) fn apply_env<F>(settings: &mut Settings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("CHAT_BASE_URL") {
        settings.base_url = v;
    }
    if let Some(v) = lookup("APP__BASE_URL") {
        settings.base_url = v;
    }

    if let Some(v) = lookup("CHAT_SESSION_COOKIE") {
        settings.session_cookie = Some(v);
    }
    if let Some(v) = lookup("APP__SESSION_COOKIE") {
        settings.session_cookie = Some(v);
    }

    if let Some(v) = lookup("APP__REQUEST_TIMEOUT_SECS") {
        if let Ok(parsed) = v.trim().parse::<u64>() {
            settings.request_timeout_secs = parsed;
        }
    }

    if let Some(v) = lookup("APP__LOG_FILTER") {
        settings.log_filter = v;
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
