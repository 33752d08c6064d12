use std::str::FromStr;

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn is_development(&self) -> bool {
        matches!(self, Environment::Development)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
}

/// Argon2 work factor and the deliberate backdating applied to `password_changed_at`.
#[derive(Debug, Clone, Deserialize)]
pub struct PasswordConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
    /// Subtracted from "now" when stamping a password change so a token minted in
    /// the same second still verifies.
    pub changed_skew_ms: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResetConfig {
    pub ttl_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CookieConfig {
    pub name: String,
    pub secure: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Without a database URL the service keeps users in memory.
    pub database_url: Option<String>,
    pub env: Environment,
    pub public_url: String,
    pub jwt: JwtConfig,
    pub password: PasswordConfig,
    pub reset: ResetConfig,
    pub cookie: CookieConfig,
    pub smtp: Option<SmtpConfig>,
}

impl PasswordConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.changed_skew_ms < 0 {
            anyhow::bail!(
                "PASSWORD_CHANGED_SKEW_MS must not be negative, got {}",
                self.changed_skew_ms
            );
        }
        Ok(())
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let env = match std::env::var("APP_ENV").as_deref() {
            Ok("development") => Environment::Development,
            _ => Environment::Production,
        };
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET").context("JWT_SECRET must be set")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "tourauth".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "tourauth-users".into()),
            ttl_minutes: env_or("JWT_TTL_MINUTES", 60 * 24 * 90),
        };
        let password = PasswordConfig {
            memory_kib: env_or("ARGON2_MEMORY_KIB", 19 * 1024),
            iterations: env_or("ARGON2_ITERATIONS", 2),
            parallelism: env_or("ARGON2_PARALLELISM", 1),
            changed_skew_ms: env_or("PASSWORD_CHANGED_SKEW_MS", 1000),
        };
        password.validate()?;
        let smtp = match std::env::var("SMTP_HOST") {
            Ok(host) => Some(SmtpConfig {
                host,
                port: env_or("SMTP_PORT", 587),
                username: std::env::var("SMTP_USERNAME").ok(),
                password: std::env::var("SMTP_PASSWORD").ok(),
                from: std::env::var("MAIL_FROM")
                    .unwrap_or_else(|_| "Tours <no-reply@tours.local>".into()),
            }),
            Err(_) => None,
        };
        Ok(Self {
            database_url: std::env::var("DATABASE_URL").ok(),
            env,
            public_url: std::env::var("PUBLIC_URL")
                .unwrap_or_else(|_| "http://localhost:8080".into()),
            jwt,
            password,
            reset: ResetConfig {
                ttl_minutes: env_or("RESET_TTL_MINUTES", 10),
            },
            cookie: CookieConfig {
                name: std::env::var("AUTH_COOKIE_NAME").unwrap_or_else(|_| "jwt".into()),
                secure: env == Environment::Production,
            },
            smtp,
        })
    }

    /// In-memory configuration with a cheap argon2 cost, for tests and local runs.
    pub fn for_tests() -> Self {
        Self {
            database_url: None,
            env: Environment::Production,
            public_url: "http://localhost:8080".into(),
            jwt: JwtConfig {
                secret: "test-secret".into(),
                issuer: "test-issuer".into(),
                audience: "test-aud".into(),
                ttl_minutes: 60 * 24 * 90,
            },
            password: PasswordConfig {
                memory_kib: 8,
                iterations: 1,
                parallelism: 1,
                changed_skew_ms: 1000,
            },
            reset: ResetConfig { ttl_minutes: 10 },
            cookie: CookieConfig {
                name: "jwt".into(),
                secure: false,
            },
            smtp: None,
        }
    }
}
