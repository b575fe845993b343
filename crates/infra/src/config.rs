//! Configuration loading and representation.
//!
//! Everything comes from the process environment. Secrets are wrapped in
//! `SecretString` so they never end up in `Debug` output or logs.

use secrecy::SecretString;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_PAYMENT_API_BASE: &str = "https://api.stripe.com/v1";
pub const DEFAULT_APP_BASE_URL: &str = "http://localhost:3000";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Whether a payment-link request may hand back an existing pending session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PaymentLinkPolicy {
    /// Mint a fresh checkout session on every request.
    #[default]
    AlwaysCreate,
    /// Return the stored checkout URL while the invoice is still pending.
    ReuseIfPending,
}

impl PaymentLinkPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "always_create" => Some(Self::AlwaysCreate),
            "reuse_if_pending" => Some(Self::ReuseIfPending),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PaymentSettings {
    pub api_base: String,
    /// Absent: the in-memory processor is used (dev only).
    pub secret_key: Option<SecretString>,
    pub webhook_secret: Option<SecretString>,
    pub webhook_tolerance_secs: i64,
    pub timeout: Duration,
}

impl Default for PaymentSettings {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_PAYMENT_API_BASE.to_string(),
            secret_key: None,
            webhook_secret: None,
            webhook_tolerance_secs: 300,
            timeout: Duration::from_millis(15_000),
        }
    }
}

/// Knobs of the document services.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    /// Base of the fixed checkout success/cancel redirect targets.
    pub app_base_url: String,
    pub link_policy: PaymentLinkPolicy,
    /// Heuristic wait before a user-triggered verification (pull path).
    pub verify_precheck_delay: Duration,
    /// Attempts at allocating a free document number.
    pub number_max_attempts: u32,
    /// Due-date offset for invoices converted from quotes.
    pub payment_terms_days: i64,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            app_base_url: DEFAULT_APP_BASE_URL.to_string(),
            link_policy: PaymentLinkPolicy::AlwaysCreate,
            verify_precheck_delay: Duration::from_millis(3_000),
            number_max_attempts: 5,
            payment_terms_days: 30,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    /// `None` means the caller should fall back to an insecure dev secret.
    pub jwt_secret: Option<SecretString>,
    /// Absent: the in-memory store is used.
    pub database_url: Option<SecretString>,
    pub payment: PaymentSettings,
    pub services: ServiceSettings,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let secret = |key: &str| get(key).map(SecretString::new);

        let payment_defaults = PaymentSettings::default();
        let service_defaults = ServiceSettings::default();

        let link_policy = match get("PAYMENT_LINK_POLICY") {
            None => service_defaults.link_policy,
            Some(raw) => PaymentLinkPolicy::parse(&raw).ok_or_else(|| ConfigError::Invalid {
                key: "PAYMENT_LINK_POLICY",
                reason: format!("expected always_create or reuse_if_pending, got {raw}"),
            })?,
        };

        let number_max_attempts: u32 = parse_or("NUMBER_MAX_ATTEMPTS", get("NUMBER_MAX_ATTEMPTS"), 5)?;
        if number_max_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "NUMBER_MAX_ATTEMPTS",
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            bind_addr: get("TALLY_BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            jwt_secret: secret("JWT_SECRET"),
            database_url: secret("DATABASE_URL"),
            payment: PaymentSettings {
                api_base: get("PAYMENT_API_BASE")
                    .map(|s| s.trim_end_matches('/').to_string())
                    .unwrap_or(payment_defaults.api_base),
                secret_key: secret("PAYMENT_SECRET_KEY"),
                webhook_secret: secret("PAYMENT_WEBHOOK_SECRET"),
                webhook_tolerance_secs: parse_or(
                    "PAYMENT_WEBHOOK_TOLERANCE_SECS",
                    get("PAYMENT_WEBHOOK_TOLERANCE_SECS"),
                    payment_defaults.webhook_tolerance_secs,
                )?,
                timeout: Duration::from_millis(parse_or(
                    "PAYMENT_TIMEOUT_MS",
                    get("PAYMENT_TIMEOUT_MS"),
                    15_000u64,
                )?),
            },
            services: ServiceSettings {
                app_base_url: get("APP_BASE_URL")
                    .map(|s| s.trim_end_matches('/').to_string())
                    .unwrap_or(service_defaults.app_base_url),
                link_policy,
                verify_precheck_delay: Duration::from_millis(parse_or(
                    "VERIFY_PRECHECK_DELAY_MS",
                    get("VERIFY_PRECHECK_DELAY_MS"),
                    3_000u64,
                )?),
                number_max_attempts,
                payment_terms_days: parse_or(
                    "INVOICE_PAYMENT_TERMS_DAYS",
                    get("INVOICE_PAYMENT_TERMS_DAYS"),
                    service_defaults.payment_terms_days,
                )?,
            },
        })
    }
}

fn parse_or<T>(key: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            reason: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let cfg = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg.bind_addr, DEFAULT_BIND_ADDR);
        assert!(cfg.database_url.is_none());
        assert!(cfg.payment.secret_key.is_none());
        assert_eq!(cfg.payment.webhook_tolerance_secs, 300);
        assert_eq!(cfg.services.link_policy, PaymentLinkPolicy::AlwaysCreate);
        assert_eq!(cfg.services.verify_precheck_delay, Duration::from_secs(3));
        assert_eq!(cfg.services.number_max_attempts, 5);
        assert_eq!(cfg.services.payment_terms_days, 30);
    }

    #[test]
    fn explicit_values_override_defaults() {
        let cfg = AppConfig::from_lookup(lookup(&[
            ("PAYMENT_LINK_POLICY", "reuse_if_pending"),
            ("VERIFY_PRECHECK_DELAY_MS", "0"),
            ("PAYMENT_SECRET_KEY", "sk_test_123"),
            ("APP_BASE_URL", "https://app.example.com/"),
        ]))
        .unwrap();
        assert_eq!(cfg.services.link_policy, PaymentLinkPolicy::ReuseIfPending);
        assert_eq!(cfg.services.verify_precheck_delay, Duration::ZERO);
        assert_eq!(cfg.services.app_base_url, "https://app.example.com");
        assert_eq!(
            cfg.payment.secret_key.as_ref().map(|s| s.expose_secret().as_str()),
            Some("sk_test_123")
        );
    }

    #[test]
    fn malformed_values_are_rejected() {
        let err = AppConfig::from_lookup(lookup(&[("PAYMENT_LINK_POLICY", "sometimes")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "PAYMENT_LINK_POLICY", .. }));

        let err = AppConfig::from_lookup(lookup(&[("NUMBER_MAX_ATTEMPTS", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "NUMBER_MAX_ATTEMPTS", .. }));

        let err = AppConfig::from_lookup(lookup(&[("PAYMENT_TIMEOUT_MS", "soon")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "PAYMENT_TIMEOUT_MS", .. }));
    }
}
