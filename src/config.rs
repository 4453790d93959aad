use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            _ => Environment::Development,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
}

/// Argon2id cost parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct HashConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for HashConfig {
    fn default() -> Self {
        // ~150ms per hash on a current laptop core
        Self {
            memory_kib: 19 * 1024,
            iterations: 2,
            parallelism: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MailTransport {
    Ses,
    Log,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailConfig {
    pub transport: MailTransport,
    pub from: String,
    pub ses_region: String,
    pub ses_endpoint: Option<String>,
    pub ses_access_key: Option<String>,
    pub ses_secret_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub environment: Environment,
    pub public_base_url: String,
    pub jwt: JwtConfig,
    pub hash: HashConfig,
    pub reset_token_ttl_minutes: i64,
    pub mail: MailConfig,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.into())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
        let secret = std::env::var("JWT_SECRET").context("JWT_SECRET is not set")?;
        if secret.trim().is_empty() {
            anyhow::bail!("JWT_SECRET must not be empty");
        }

        let jwt = JwtConfig {
            secret,
            issuer: env_or("JWT_ISSUER", "tourbook"),
            audience: env_or("JWT_AUDIENCE", "tourbook-users"),
            ttl_minutes: env_parse("JWT_TTL_MINUTES", 60 * 24 * 90),
        };

        let defaults = HashConfig::default();
        let hash = HashConfig {
            memory_kib: env_parse("HASH_MEMORY_KIB", defaults.memory_kib),
            iterations: env_parse("HASH_ITERATIONS", defaults.iterations),
            parallelism: env_parse("HASH_PARALLELISM", defaults.parallelism),
        };

        let transport = match env_or("MAIL_TRANSPORT", "log").to_ascii_lowercase().as_str() {
            "ses" => MailTransport::Ses,
            _ => MailTransport::Log,
        };
        let mail = MailConfig {
            transport,
            from: env_or("MAIL_FROM", "Tourbook <no-reply@tourbook.local>"),
            ses_region: env_or("SES_REGION", "us-east-1"),
            ses_endpoint: std::env::var("SES_ENDPOINT").ok(),
            ses_access_key: std::env::var("SES_ACCESS_KEY").ok(),
            ses_secret_key: std::env::var("SES_SECRET_KEY").ok(),
        };

        Ok(Self {
            database_url,
            environment: Environment::parse(&env_or("APP_ENV", "development")),
            public_base_url: env_or("PUBLIC_BASE_URL", "http://localhost:8080"),
            jwt,
            hash,
            reset_token_ttl_minutes: env_parse("RESET_TOKEN_TTL_MINUTES", 10),
            mail,
        })
    }
}
