// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Client Configuration
//!
//! Immutable configuration handed to constructors. Nothing here is global:
//! two clients with different credentials can run side by side.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `PLATFORM_BASE_URL` | API base URL | Required |
//! | `PLATFORM_API_KEY` | Signing key id sent as `apiKey` | Required |
//! | `PLATFORM_API_SECRET` | HMAC-SHA256 signing secret | Required |
//! | `PLATFORM_RSA_PRIVATE_KEY` | Response RSA key (PEM or bare base64) | Required unless `_PATH` set |
//! | `PLATFORM_RSA_PRIVATE_KEY_PATH` | File holding the RSA key | Optional |
//! | `PLATFORM_AES_PASSPHRASE` | AES fallback passphrase | Required |
//! | `PLATFORM_PREFIX` | Account prefix (e.g. dialing code) | Required |
//! | `PLATFORM_ACCOUNT` | Login account | Required |
//! | `PLATFORM_CODE` | Login code | Required |
//! | `PLATFORM_LOGIN_ENDPOINT` | Login path | `/user/login` |
//! | `PLATFORM_LOCALE` | `Accept-Language` value | `en-US` |
//! | `PLATFORM_TIMEOUT_SECS` | Per-call timeout | `30` |
//! | `PLATFORM_MAX_ATTEMPTS` | Attempts per dispatch | `3` |
//! | `PLATFORM_TOKEN_TTL_HOURS` | Local session token lifetime | `24` |
//! | `SCHEDULE_ENDPOINT` | Endpoint the binary schedules | Required by the binary |
//! | `SCHEDULE_ITERATIONS` | Scheduled iterations | `1` |
//! | `SCHEDULE_INTERVAL_MINUTES` | Wait between iterations | `0` |
//! | `SCHEDULE_PARAMS` | JSON object sent with every iteration | `{}` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info` |

use std::{fs, sync::Arc, time::Duration};

use base64ct::{Base64, Encoding};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::RsaPrivateKey;
use serde_json::{Map, Value};
use url::Url;

use crate::crypto::{ResponseCipher, Signer};
use crate::error::ConfigError;
use crate::scheduler::ScheduleConfig;

pub const BASE_URL_ENV: &str = "PLATFORM_BASE_URL";
pub const API_KEY_ENV: &str = "PLATFORM_API_KEY";
pub const API_SECRET_ENV: &str = "PLATFORM_API_SECRET";
pub const RSA_PRIVATE_KEY_ENV: &str = "PLATFORM_RSA_PRIVATE_KEY";
pub const RSA_PRIVATE_KEY_PATH_ENV: &str = "PLATFORM_RSA_PRIVATE_KEY_PATH";
pub const AES_PASSPHRASE_ENV: &str = "PLATFORM_AES_PASSPHRASE";
pub const PREFIX_ENV: &str = "PLATFORM_PREFIX";
pub const ACCOUNT_ENV: &str = "PLATFORM_ACCOUNT";
pub const CODE_ENV: &str = "PLATFORM_CODE";
pub const LOGIN_ENDPOINT_ENV: &str = "PLATFORM_LOGIN_ENDPOINT";
pub const LOCALE_ENV: &str = "PLATFORM_LOCALE";
pub const TIMEOUT_SECS_ENV: &str = "PLATFORM_TIMEOUT_SECS";
pub const MAX_ATTEMPTS_ENV: &str = "PLATFORM_MAX_ATTEMPTS";
pub const TOKEN_TTL_HOURS_ENV: &str = "PLATFORM_TOKEN_TTL_HOURS";

pub const SCHEDULE_ENDPOINT_ENV: &str = "SCHEDULE_ENDPOINT";
pub const SCHEDULE_ITERATIONS_ENV: &str = "SCHEDULE_ITERATIONS";
pub const SCHEDULE_INTERVAL_MINUTES_ENV: &str = "SCHEDULE_INTERVAL_MINUTES";
pub const SCHEDULE_PARAMS_ENV: &str = "SCHEDULE_PARAMS";

/// Environment variable selecting the log format (`json` or `pretty`).
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

pub const DEFAULT_LOGIN_ENDPOINT: &str = "/user/login";
pub const DEFAULT_LOCALE: &str = "en-US";
pub const DEFAULT_TOKEN_HEADER: &str = "token";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_millis(1000);

/// Local expiry policy for session tokens. The platform never states one.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(24 * 60 * 60);

// =============================================================================
// Credentials
// =============================================================================

/// Login credentials, supplied once.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub prefix: String,
    pub account: String,
    pub code: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("prefix", &self.prefix)
            .field("account", &self.account)
            .field("code", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    pub fn new(
        prefix: impl Into<String>,
        account: impl Into<String>,
        code: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let credentials = Self {
            prefix: prefix.into(),
            account: account.into(),
            code: code.into(),
        };
        if credentials.account.trim().is_empty() {
            return Err(ConfigError::Missing(ACCOUNT_ENV.to_string()));
        }
        if credentials.code.trim().is_empty() {
            return Err(ConfigError::Missing(CODE_ENV.to_string()));
        }
        Ok(credentials)
    }

    /// Unsigned login request fields.
    pub fn login_fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert("prefix".to_string(), Value::String(self.prefix.clone()));
        fields.insert("account".to_string(), Value::String(self.account.clone()));
        fields.insert("code".to_string(), Value::String(self.code.clone()));
        fields
    }
}

// =============================================================================
// Key Material
// =============================================================================

/// API key pair, RSA response key and AES passphrase.
#[derive(Clone)]
pub struct KeyMaterial {
    pub api_key: String,
    api_secret: String,
    rsa_private_key: RsaPrivateKey,
    aes_passphrase: String,
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("api_key", &self.api_key)
            .finish_non_exhaustive()
    }
}

impl KeyMaterial {
    pub fn new(
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        rsa_private_key: &str,
        aes_passphrase: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let api_key = api_key.into();
        let api_secret = api_secret.into();
        let aes_passphrase = aes_passphrase.into();
        if api_key.trim().is_empty() {
            return Err(ConfigError::Missing(API_KEY_ENV.to_string()));
        }
        if api_secret.is_empty() {
            return Err(ConfigError::Missing(API_SECRET_ENV.to_string()));
        }
        if aes_passphrase.is_empty() {
            return Err(ConfigError::Missing(AES_PASSPHRASE_ENV.to_string()));
        }

        Ok(Self {
            api_key,
            api_secret,
            rsa_private_key: parse_private_key(rsa_private_key)?,
            aes_passphrase,
        })
    }

    pub fn signer(&self) -> Signer {
        Signer::new(self.api_key.clone(), self.api_secret.clone())
    }

    pub fn cipher(&self) -> ResponseCipher {
        ResponseCipher::new(self.rsa_private_key.clone(), self.aes_passphrase.clone())
    }
}

/// Parse an RSA private key given as PKCS#8 or PKCS#1 PEM, or as the bare
/// base64 body of either.
pub fn parse_private_key(input: &str) -> Result<RsaPrivateKey, ConfigError> {
    let text = input.trim().replace("\\n", "\n");
    if text.is_empty() {
        return Err(ConfigError::Missing(RSA_PRIVATE_KEY_ENV.to_string()));
    }

    if text.contains("-----BEGIN") {
        return RsaPrivateKey::from_pkcs8_pem(&text)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(&text))
            .map_err(|e| ConfigError::KeyMaterial(format!("invalid RSA private key PEM: {e}")));
    }

    let compact: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let der = Base64::decode_vec(&compact)
        .map_err(|e| ConfigError::KeyMaterial(format!("RSA private key is not base64: {e}")))?;
    RsaPrivateKey::from_pkcs8_der(&der)
        .or_else(|_| RsaPrivateKey::from_pkcs1_der(&der))
        .map_err(|e| ConfigError::KeyMaterial(format!("invalid RSA private key DER: {e}")))
}

// =============================================================================
// Client Settings
// =============================================================================

/// Transport, retry and token policy.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub base_url: Url,
    pub login_endpoint: String,
    pub locale: String,
    pub token_header: String,
    pub user_agent: String,
    pub timeout: Duration,
    pub max_attempts: u32,
    pub retry_base_delay: Duration,
    pub token_ttl: Duration,
}

impl ClientSettings {
    pub fn new(base_url: &str) -> Result<Self, ConfigError> {
        let base_url = Url::parse(base_url.trim())
            .map_err(|e| ConfigError::invalid(BASE_URL_ENV, e.to_string()))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(ConfigError::invalid(BASE_URL_ENV, "scheme must be http or https"));
        }

        Ok(Self {
            base_url,
            login_endpoint: DEFAULT_LOGIN_ENDPOINT.to_string(),
            locale: DEFAULT_LOCALE.to_string(),
            token_header: DEFAULT_TOKEN_HEADER.to_string(),
            user_agent: default_user_agent(),
            timeout: DEFAULT_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
            token_ttl: DEFAULT_TOKEN_TTL,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid(MAX_ATTEMPTS_ENV, "must be at least 1"));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::invalid(TIMEOUT_SECS_ENV, "must be positive"));
        }
        if !self.login_endpoint.starts_with('/') {
            return Err(ConfigError::invalid(
                LOGIN_ENDPOINT_ENV,
                "must start with '/'",
            ));
        }
        Ok(())
    }
}

pub(crate) fn token_ttl_from_hours(hours: u64) -> Result<Duration, ConfigError> {
    hours
        .checked_mul(60 * 60)
        .map(Duration::from_secs)
        .ok_or_else(|| {
            ConfigError::invalid(TOKEN_TTL_HOURS_ENV, format!("{hours} hours is too long"))
        })
}

fn default_user_agent() -> String {
    format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}

// =============================================================================
// Client Config
// =============================================================================

/// Everything a [`crate::client::PlatformClient`] needs.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub credentials: Credentials,
    pub keys: Arc<KeyMaterial>,
    pub settings: ClientSettings,
}

impl ClientConfig {
    pub fn new(credentials: Credentials, keys: KeyMaterial, settings: ClientSettings) -> Self {
        Self {
            credentials,
            keys: Arc::new(keys),
            settings,
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let mut settings = ClientSettings::new(&env_required(BASE_URL_ENV)?)?;
        settings.login_endpoint = env_or_default(LOGIN_ENDPOINT_ENV, DEFAULT_LOGIN_ENDPOINT);
        settings.locale = env_or_default(LOCALE_ENV, DEFAULT_LOCALE);
        if let Some(secs) = env_parse::<u64>(TIMEOUT_SECS_ENV)? {
            settings.timeout = Duration::from_secs(secs);
        }
        if let Some(attempts) = env_parse::<u32>(MAX_ATTEMPTS_ENV)? {
            settings.max_attempts = attempts;
        }
        if let Some(hours) = env_parse::<u64>(TOKEN_TTL_HOURS_ENV)? {
            settings.token_ttl = token_ttl_from_hours(hours)?;
        }
        settings.validate()?;

        let keys = KeyMaterial::new(
            env_required(API_KEY_ENV)?,
            env_required(API_SECRET_ENV)?,
            &load_private_key()?,
            env_required(AES_PASSPHRASE_ENV)?,
        )?;

        let credentials = Credentials::new(
            env_optional(PREFIX_ENV).unwrap_or_default(),
            env_required(ACCOUNT_ENV)?,
            env_required(CODE_ENV)?,
        )?;

        Ok(Self::new(credentials, keys, settings))
    }
}

// =============================================================================
// Schedule
// =============================================================================

/// The schedule run by the `platform-client` binary.
pub fn schedule_from_env() -> Result<ScheduleConfig, ConfigError> {
    let endpoint = env_required(SCHEDULE_ENDPOINT_ENV)?;
    let iterations = env_parse::<u32>(SCHEDULE_ITERATIONS_ENV)?.unwrap_or(1);
    let interval_minutes = env_parse::<f64>(SCHEDULE_INTERVAL_MINUTES_ENV)?.unwrap_or(0.0);
    let params = match env_optional(SCHEDULE_PARAMS_ENV) {
        Some(raw) => parse_schedule_params(&raw)?,
        None => Map::new(),
    };

    let config = ScheduleConfig::new(endpoint, iterations)
        .with_interval_minutes(interval_minutes)
        .with_params(params);
    config
        .validate()
        .map_err(|e| ConfigError::invalid("SCHEDULE_*", e.to_string()))?;
    Ok(config)
}

/// Parse `SCHEDULE_PARAMS`, which must be a JSON object.
pub fn parse_schedule_params(raw: &str) -> Result<Map<String, Value>, ConfigError> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(params)) => Ok(params),
        Ok(_) => Err(ConfigError::invalid(
            SCHEDULE_PARAMS_ENV,
            "must be a JSON object",
        )),
        Err(e) => Err(ConfigError::invalid(SCHEDULE_PARAMS_ENV, e.to_string())),
    }
}

pub(crate) fn env_required(name: &str) -> Result<String, ConfigError> {
    env_optional(name).ok_or_else(|| ConfigError::Missing(name.to_string()))
}

pub(crate) fn env_optional(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub(crate) fn env_or_default(name: &str, default: &str) -> String {
    env_optional(name).unwrap_or_else(|| default.to_string())
}

pub(crate) fn env_parse<T>(name: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    env_optional(name)
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|e| ConfigError::invalid(name, format!("{raw:?}: {e}")))
        })
        .transpose()
}

fn load_private_key() -> Result<String, ConfigError> {
    if let Some(key) = env_optional(RSA_PRIVATE_KEY_ENV) {
        return Ok(key);
    }

    let path = env_optional(RSA_PRIVATE_KEY_PATH_ENV)
        .ok_or_else(|| ConfigError::Missing(RSA_PRIVATE_KEY_ENV.to_string()))?;
    let pem = fs::read_to_string(&path)
        .map_err(|e| ConfigError::KeyMaterial(format!("failed to read {path}: {e}")))?;
    let trimmed = pem.trim().to_string();
    if trimmed.is_empty() {
        return Err(ConfigError::KeyMaterial(format!(
            "{RSA_PRIVATE_KEY_PATH_ENV} points to an empty file: {path}"
        )));
    }
    Ok(trimmed)
}
