/*
 * Responsibility
 * - 環境変数や設定の読み込み (APP_ENV, IAM_* など)
 * - 設定値のバリデーション (不足なら起動失敗)
 */
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use jsonwebtoken::Algorithm;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Staging,
    Production,
}

impl AppEnv {
    pub fn from_env() -> Self {
        Self::parse(&std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()))
    }

    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "staging" | "stage" => Self::Staging,
            _ => Self::Development,
        }
    }

    /// Anything that is not a developer machine counts as deployed.
    pub fn is_deployed(&self) -> bool {
        !matches!(self, Self::Development)
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Missing(&'static str),
    Invalid(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Missing(key) => write!(f, "missing configuration: {}", key),
            ConfigError::Invalid(key) => write!(f, "invalid configuration: {}", key),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Where verification keys for one trusted issuer come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySource {
    JwksPath(PathBuf),
    PublicKeyPem(String),
}

#[derive(Debug, Clone)]
pub struct IamConfig {
    pub unsafe_mode: bool,
    pub host: String,
    // Raw, whitespace-delimited. Parsed by the trust store.
    pub extra_issuers: String,
    // Own host keys: IAM_JWKS_PATH or IAM_PUBLIC_KEY_PEM.
    pub key_source: Option<KeySource>,
    // Extra issuer keys: `<dir>/<issuer>.json`, see `issuer_key_source`.
    pub jwks_dir: Option<PathBuf>,
    pub algorithms: Vec<Algorithm>,
    pub audience: Option<String>,
    pub leeway_seconds: u64,
    pub key_timeout: Duration,
}

pub struct Config {
    pub addr: SocketAddr,
    pub app_env: AppEnv,
    pub iam: IamConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let port: u16 = std::env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(3000);

        let addr: SocketAddr = SocketAddr::from_str(&format!("0.0.0.0:{}", port))
            .map_err(|_| ConfigError::Invalid("PORT"))?;

        let app_env = AppEnv::from_env();
        let iam = IamConfig::from_env()?;

        Ok(Self { addr, app_env, iam })
    }
}

impl IamConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let unsafe_mode = std::env::var("IAM_UNSAFE")
            .map(|v| parse_flag(&v))
            .unwrap_or(false);

        let host = std::env::var("IAM_HOST")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::Missing("IAM_HOST"))?;

        let extra_issuers = std::env::var("IAM_ISSUERS").unwrap_or_default();

        let key_source = match (
            std::env::var("IAM_JWKS_PATH").ok().filter(|s| !s.trim().is_empty()),
            std::env::var("IAM_PUBLIC_KEY_PEM").ok().filter(|s| !s.trim().is_empty()),
        ) {
            (Some(path), _) => Some(KeySource::JwksPath(PathBuf::from(path.trim()))),
            (None, Some(pem)) => Some(KeySource::PublicKeyPem(pem.replace("\\n", "\n"))),
            (None, None) => None,
        };

        let jwks_dir = std::env::var("IAM_JWKS_DIR")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        let algorithms = match std::env::var("IAM_JWT_ALGORITHMS") {
            Ok(raw) => parse_algorithms(&raw).ok_or(ConfigError::Invalid("IAM_JWT_ALGORITHMS"))?,
            Err(_) => vec![Algorithm::RS256],
        };

        let audience = std::env::var("IAM_AUDIENCE")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let leeway_seconds = std::env::var("IAM_LEEWAY_SECONDS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(60);

        let key_timeout = std::env::var("IAM_KEY_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_secs(5));

        Ok(Self {
            unsafe_mode,
            host,
            extra_issuers,
            key_source,
            jwks_dir,
            algorithms,
            audience,
            leeway_seconds,
            key_timeout,
        })
    }

    /// Key material for `issuer`: the own host uses `key_source`, every other
    /// issuer a JWKS document named after it inside `jwks_dir`.
    pub fn issuer_key_source(&self, issuer: &str) -> Option<KeySource> {
        if issuer == self.host {
            return self.key_source.clone();
        }
        let dir = self.jwks_dir.as_ref()?;
        Some(KeySource::JwksPath(dir.join(jwks_file_name(issuer))))
    }
}

// Issuer ids are often URLs; anything outside [A-Za-z0-9._-] becomes '_'.
fn jwks_file_name(issuer: &str) -> String {
    let stem: String = issuer
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{stem}.json")
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

// Comma or whitespace separated. An empty list is rejected.
fn parse_algorithms(raw: &str) -> Option<Vec<Algorithm>> {
    let algorithms = raw
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(Algorithm::from_str)
        .collect::<Result<Vec<_>, _>>()
        .ok()?;

    (!algorithms.is_empty()).then_some(algorithms)
}
