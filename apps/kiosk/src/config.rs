use std::{fs, io::ErrorKind, path::Path, time::Duration};

use anyhow::Context;
use kiosk_core::{FlowOptions, DEFAULT_STATIC_HOST_SUFFIXES};
use serde::Deserialize;
use shared::domain::Doctor;

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Explicit API origin; `None` means same-origin requests.
    pub api_base: Option<String>,
    /// Origin the kiosk front end is served from.
    pub hosting_origin: String,
    pub static_host_suffixes: Vec<String>,
    pub hospital_name: String,
    pub currency: String,
    pub theme_color: String,
    pub biometric_mode: String,
    pub request_timeout_secs: u64,
    pub fallback_checkout_key: Option<String>,
    /// Replaces the built-in doctor list when set.
    pub doctors: Option<Vec<Doctor>>,
}

impl Default for Settings {
    fn default() -> Self {
        let flow = FlowOptions::default();
        Self {
            api_base: None,
            hosting_origin: "http://127.0.0.1:8080".into(),
            static_host_suffixes: DEFAULT_STATIC_HOST_SUFFIXES
                .iter()
                .map(|suffix| suffix.to_string())
                .collect(),
            hospital_name: flow.hospital_name,
            currency: flow.currency,
            theme_color: flow.theme_color,
            biometric_mode: flow.biometric_mode,
            request_timeout_secs: 30,
            fallback_checkout_key: flow.fallback_checkout_key,
            doctors: None,
        }
    }
}

impl Settings {
    pub fn flow_options(&self) -> FlowOptions {
        FlowOptions {
            hospital_name: self.hospital_name.clone(),
            currency: self.currency.clone(),
            theme_color: self.theme_color.clone(),
            biometric_mode: self.biometric_mode.clone(),
            fallback_checkout_key: self.fallback_checkout_key.clone(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    api_base: Option<String>,
    hosting_origin: Option<String>,
    static_host_suffixes: Option<Vec<String>>,
    hospital_name: Option<String>,
    currency: Option<String>,
    theme_color: Option<String>,
    biometric_mode: Option<String>,
    request_timeout_secs: Option<u64>,
    fallback_checkout_key: Option<String>,
    doctors: Option<Vec<Doctor>>,
}

/// Defaults, then the TOML file at `path` if it exists, then environment
/// overrides (`KIOSK_*`, with `APP__*` taking precedence).
pub fn load_settings(path: &Path) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    match fs::read_to_string(path) {
        Ok(raw) => {
            let file_cfg = toml::from_str::<FileConfig>(&raw)
                .with_context(|| format!("invalid kiosk config '{}'", path.display()))?;
            apply_file(&mut settings, file_cfg);
        }
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read kiosk config '{}'", path.display()))
        }
    }

    apply_env(&mut settings, |key| std::env::var(key).ok())?;
    Ok(settings)
}

fn apply_file(settings: &mut Settings, file_cfg: FileConfig) {
    if file_cfg.api_base.is_some() {
        settings.api_base = file_cfg.api_base;
    }
    if let Some(v) = file_cfg.hosting_origin {
        settings.hosting_origin = v;
    }
    if let Some(v) = file_cfg.static_host_suffixes {
        settings.static_host_suffixes = v;
    }
    if let Some(v) = file_cfg.hospital_name {
        settings.hospital_name = v;
    }
    if let Some(v) = file_cfg.currency {
        settings.currency = v;
    }
    if let Some(v) = file_cfg.theme_color {
        settings.theme_color = v;
    }
    if let Some(v) = file_cfg.biometric_mode {
        settings.biometric_mode = v;
    }
    if let Some(v) = file_cfg.request_timeout_secs {
        settings.request_timeout_secs = v;
    }
    if file_cfg.fallback_checkout_key.is_some() {
        settings.fallback_checkout_key = file_cfg.fallback_checkout_key;
    }
    if file_cfg.doctors.is_some() {
        settings.doctors = file_cfg.doctors;
    }
}

fn env_value(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(&format!("APP__{name}")).or_else(|| lookup(&format!("KIOSK_{name}")))
}

fn apply_env(
    settings: &mut Settings,
    lookup: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<()> {
    if let Some(v) = env_value(&lookup, "API_BASE") {
        settings.api_base = Some(v).filter(|v| !v.trim().is_empty());
    }
    if let Some(v) = env_value(&lookup, "HOSTING_ORIGIN") {
        settings.hosting_origin = v;
    }
    if let Some(v) = env_value(&lookup, "STATIC_HOST_SUFFIXES") {
        settings.static_host_suffixes = v
            .split(',')
            .map(str::trim)
            .filter(|suffix| !suffix.is_empty())
            .map(str::to_string)
            .collect();
    }
    if let Some(v) = env_value(&lookup, "HOSPITAL_NAME") {
        settings.hospital_name = v;
    }
    if let Some(v) = env_value(&lookup, "CURRENCY") {
        settings.currency = v;
    }
    if let Some(v) = env_value(&lookup, "THEME_COLOR") {
        settings.theme_color = v;
    }
    if let Some(v) = env_value(&lookup, "BIOMETRIC_MODE") {
        settings.biometric_mode = v;
    }
    if let Some(v) = env_value(&lookup, "REQUEST_TIMEOUT_SECS") {
        settings.request_timeout_secs = v
            .trim()
            .parse()
            .with_context(|| format!("invalid request timeout '{v}'"))?;
    }
    if let Some(v) = env_value(&lookup, "FALLBACK_CHECKOUT_KEY") {
        settings.fallback_checkout_key = Some(v).filter(|v| !v.trim().is_empty());
    }
    Ok(())
}
