// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Configuration is loaded from the environment once at startup.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `DATA_DIR` | Directory holding `ledger.redb` | `./data` |
//! | `BOT_TOKEN` | Bot token used to verify launch tokens | Required |
//! | `AUTH_MAX_AGE_SECS` | Maximum launch-token age | `86400` |
//! | `PANEL_ADDRESS` | Provisioning panel base URL | Required |
//! | `PANEL_USERNAME` / `PANEL_PASSWORD` | Panel admin credentials | Required |
//! | `PANEL_TOKEN_LIFETIME_SECS` | Bearer lifetime when the panel reports none | `3600` |
//! | `LAVA_API_URL` | Invoice creation endpoint | `https://api.lava.ru/business/invoice/create` |
//! | `LAVA_SHOP_ID` | Payment shop identifier | Required |
//! | `LAVA_SECRET_KEY` | Invoice request signing secret | Required |
//! | `LAVA_SECRET_KEY_2` | Notification signing secret | Required |
//! | `LAVA_REQUIRE_SIGNATURE` | Reject unsigned notifications | `false` |
//! | `PUBLIC_APP_URL` | Public base URL for callbacks | `https://localhost:3000` |
//! | `MAX_DEVICES` | Devices per user | `5` |
//! | `TRIAL_DAYS` | Free trial length | `3` |
//! | `PANEL_SYNC_INTERVAL_SECS` | Pending panel push sweep period | `60` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::billing::BillingSettings;
use crate::providers::lava::{self, LavaConfig};
use crate::providers::panel::PanelConfig;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_DATA_DIR: &str = "./data";
pub const LEDGER_FILE_NAME: &str = "ledger.redb";
pub const DEFAULT_LOG_FILTER: &str = "info,tower_http=debug";
const DEFAULT_AUTH_MAX_AGE_SECS: u64 = 86_400;
const DEFAULT_PANEL_TOKEN_LIFETIME_SECS: u64 = 3_600;
const DEFAULT_PUBLIC_APP_URL: &str = "https://localhost:3000";
const DEFAULT_MAX_DEVICES: usize = 5;
const DEFAULT_TRIAL_DAYS: u32 = 3;
const DEFAULT_SYNC_INTERVAL_SECS: u64 = 60;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub bot_token: String,
    pub auth_max_age: Duration,
    pub panel: PanelConfig,
    pub lava: LavaConfig,
    pub billing: BillingSettings,
    pub sync_interval: Duration,
    pub log_format: LogFormat,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let panel = PanelConfig {
            base_url: env.url("PANEL_ADDRESS")?,
            username: env.required("PANEL_USERNAME")?,
            password: env.required("PANEL_PASSWORD")?,
            token_lifetime: Duration::from_secs(
                env.parsed("PANEL_TOKEN_LIFETIME_SECS", DEFAULT_PANEL_TOKEN_LIFETIME_SECS)?,
            ),
        };

        let lava = LavaConfig {
            api_url: env.url_or("LAVA_API_URL", lava::DEFAULT_API_URL)?,
            shop_id: env.required("LAVA_SHOP_ID")?,
            secret_key: env.required("LAVA_SECRET_KEY")?,
            secret_key_2: env.required("LAVA_SECRET_KEY_2")?,
        };

        let max_devices: usize = env.parsed("MAX_DEVICES", DEFAULT_MAX_DEVICES)?;
        if max_devices == 0 {
            return Err(ConfigError::Invalid {
                name: "MAX_DEVICES",
                reason: "must be at least 1".to_string(),
            });
        }
        let billing = BillingSettings {
            max_devices,
            trial_days: env.parsed("TRIAL_DAYS", DEFAULT_TRIAL_DAYS)?,
            public_url: env.url_or("PUBLIC_APP_URL", DEFAULT_PUBLIC_APP_URL)?,
            require_signature: env.flag("LAVA_REQUIRE_SIGNATURE")?,
        };

        let sync_secs: u64 = env.parsed("PANEL_SYNC_INTERVAL_SECS", DEFAULT_SYNC_INTERVAL_SECS)?;
        if sync_secs == 0 {
            return Err(ConfigError::Invalid {
                name: "PANEL_SYNC_INTERVAL_SECS",
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            host: env.or_default("HOST", DEFAULT_HOST),
            port: env.parsed("PORT", DEFAULT_PORT)?,
            data_dir: PathBuf::from(env.or_default("DATA_DIR", DEFAULT_DATA_DIR)),
            bot_token: env.required("BOT_TOKEN")?,
            auth_max_age: Duration::from_secs(
                env.parsed("AUTH_MAX_AGE_SECS", DEFAULT_AUTH_MAX_AGE_SECS)?,
            ),
            panel,
            lava,
            billing,
            sync_interval: Duration::from_secs(sync_secs),
            log_format: match env.optional("LOG_FORMAT").as_deref() {
                Some("json") => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        })
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join(LEDGER_FILE_NAME)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, name: &str) -> Option<String> {
        (self.0)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, name: &'static str) -> Result<String, ConfigError> {
        self.optional(name).ok_or(ConfigError::Missing(name))
    }

    fn or_default(&self, name: &str, default: &str) -> String {
        self.optional(name).unwrap_or_else(|| default.to_string())
    }

    fn parsed<T>(&self, name: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.optional(name) {
            Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
                name,
                reason: e.to_string(),
            }),
            None => Ok(default),
        }
    }

    fn flag(&self, name: &'static str) -> Result<bool, ConfigError> {
        match self.optional(name).map(|v| v.to_ascii_lowercase()).as_deref() {
            None | Some("0" | "false" | "no") => Ok(false),
            Some("1" | "true" | "yes") => Ok(true),
            Some(other) => Err(ConfigError::Invalid {
                name,
                reason: format!("expected a boolean, got {other:?}"),
            }),
        }
    }

    fn url(&self, name: &'static str) -> Result<String, ConfigError> {
        let raw = self.required(name)?;
        check_url(name, raw)
    }

    fn url_or(&self, name: &'static str, default: &str) -> Result<String, ConfigError> {
        check_url(name, self.or_default(name, default))
    }
}

fn check_url(name: &'static str, raw: String) -> Result<String, ConfigError> {
    let parsed = url::Url::parse(&raw).map_err(|e| ConfigError::Invalid {
        name,
        reason: e.to_string(),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ConfigError::Invalid {
            name,
            reason: format!("unsupported scheme {}", parsed.scheme()),
        });
    }
    Ok(raw.trim_end_matches('/').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_env() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("BOT_TOKEN", "123:abc"),
            ("PANEL_ADDRESS", "https://panel.test/"),
            ("PANEL_USERNAME", "admin"),
            ("PANEL_PASSWORD", "pw"),
            ("LAVA_SHOP_ID", "shop"),
            ("LAVA_SECRET_KEY", "a"),
            ("LAVA_SECRET_KEY_2", "b"),
        ])
    }

    fn load(env: &HashMap<&'static str, &'static str>) -> Result<AppConfig, ConfigError> {
        AppConfig::from_lookup(|name| env.get(name).map(|v| v.to_string()))
    }

    #[test]
    fn defaults_apply_when_optional_vars_are_absent() {
        let config = load(&base_env()).unwrap();
        assert_eq!(config.bind_address(), "0.0.0.0:8080");
        assert_eq!(config.ledger_path(), PathBuf::from("./data/ledger.redb"));
        assert_eq!(config.auth_max_age, Duration::from_secs(86_400));
        assert_eq!(config.panel.base_url, "https://panel.test");
        assert_eq!(config.lava.api_url, lava::DEFAULT_API_URL);
        assert_eq!(config.billing.max_devices, 5);
        assert_eq!(config.billing.trial_days, 3);
        assert_eq!(config.billing.public_url, "https://localhost:3000");
        assert!(!config.billing.require_signature);
        assert_eq!(config.sync_interval, Duration::from_secs(60));
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn overrides_are_parsed() {
        let mut env = base_env();
        env.insert("PORT", "9090");
        env.insert("MAX_DEVICES", "3");
        env.insert("LAVA_REQUIRE_SIGNATURE", "true");
        env.insert("LOG_FORMAT", "json");
        let config = load(&env).unwrap();
        assert_eq!(config.port, 9090);
        assert_eq!(config.billing.max_devices, 3);
        assert!(config.billing.require_signature);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn missing_secret_is_reported_by_name() {
        let mut env = base_env();
        env.remove("LAVA_SECRET_KEY_2");
        assert!(matches!(
            load(&env),
            Err(ConfigError::Missing("LAVA_SECRET_KEY_2"))
        ));

        let mut env = base_env();
        env.insert("BOT_TOKEN", "   ");
        assert!(matches!(load(&env), Err(ConfigError::Missing("BOT_TOKEN"))));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut env = base_env();
        env.insert("PORT", "eighty");
        assert!(matches!(
            load(&env),
            Err(ConfigError::Invalid { name: "PORT", .. })
        ));

        let mut env = base_env();
        env.insert("PANEL_ADDRESS", "ftp://panel.test");
        assert!(matches!(
            load(&env),
            Err(ConfigError::Invalid {
                name: "PANEL_ADDRESS",
                ..
            })
        ));

        let mut env = base_env();
        env.insert("MAX_DEVICES", "0");
        assert!(load(&env).is_err());

        let mut env = base_env();
        env.insert("LAVA_REQUIRE_SIGNATURE", "maybe");
        assert!(load(&env).is_err());
    }
}
