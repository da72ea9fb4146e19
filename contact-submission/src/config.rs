use crate::error::ConfigError;
use lettre::message::Mailbox;
use std::time::Duration;

const DEFAULT_FORM_PATH: &str = "/contact";
const DEFAULT_SMTP_URL: &str = "smtp://localhost:25";
const FRIENDLYCAPTCHA_VERIFY_URL: &str = "https://api.friendlycaptcha.com/api/v1/siteverify";
const DEFAULT_FRIENDLYCAPTCHA_TIMEOUT_MS: u64 = 5000;

/// Process-wide configuration. Read once at startup and never modified afterwards.
#[derive(Clone, Debug)]
pub struct ContactConfig {
    /// Mailbox which receives contact form messages, e.g. `Site Owner <owner@example.com>`.
    pub contact_email: Mailbox,
    /// Path of the contact form; every redirect goes here.
    pub form_path: String,
    pub smtp_url: String,
    pub challenge: ChallengeConfig,
}

#[derive(Clone, Debug)]
pub struct ChallengeConfig {
    /// Absent when no challenge is configured, which disables verification entirely.
    pub site_key: Option<String>,
    pub secret: String,
    pub verify_url: String,
    pub timeout: Duration,
}

impl ChallengeConfig {
    pub fn site_key_present(&self) -> bool {
        self.site_key.is_some()
    }
}

impl ContactConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(
        lookup: impl Fn(&'static str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let non_empty = |key| lookup(key).filter(|value: &String| !value.trim().is_empty());
        let timeout_ms = match non_empty("FRIENDLYCAPTCHA_TIMEOUT_MS") {
            Some(value) => value
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid("FRIENDLYCAPTCHA_TIMEOUT_MS", value))?,
            None => DEFAULT_FRIENDLYCAPTCHA_TIMEOUT_MS,
        };
        let form_path = non_empty("CONTACT_FORM_PATH").unwrap_or(DEFAULT_FORM_PATH.into());
        if !is_valid_form_path(&form_path) {
            return Err(ConfigError::Invalid("CONTACT_FORM_PATH", form_path));
        }
        let contact_email =
            non_empty("CONTACT_EMAIL").ok_or(ConfigError::Missing("CONTACT_EMAIL"))?;
        let contact_email = contact_email
            .parse::<Mailbox>()
            .map_err(|_| ConfigError::Invalid("CONTACT_EMAIL", contact_email))?;
        let site_key = non_empty("FRIENDLYCAPTCHA_SITEKEY");
        let secret = non_empty("FRIENDLYCAPTCHA_SECRET");
        if site_key.is_some() && secret.is_none() {
            return Err(ConfigError::Missing("FRIENDLYCAPTCHA_SECRET"));
        }
        Ok(Self {
            contact_email,
            form_path,
            smtp_url: non_empty("SMTP_URL").unwrap_or(DEFAULT_SMTP_URL.into()),
            challenge: ChallengeConfig {
                site_key,
                secret: secret.unwrap_or_default(),
                verify_url: non_empty("FRIENDLYCAPTCHA_VERIFY_URL")
                    .unwrap_or(FRIENDLYCAPTCHA_VERIFY_URL.into()),
                timeout: Duration::from_millis(timeout_ms),
            },
        })
    }
}

// The path ends up in the Location header and in the Path attribute of the flash cookie.
fn is_valid_form_path(path: &str) -> bool {
    path.starts_with('/') && path.chars().all(|c| c.is_ascii_graphic() && c != ';')
}
