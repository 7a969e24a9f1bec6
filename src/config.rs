// src/config.rs - Configuration management
use serde::Deserialize;
use std::env;
use anyhow::{Context, Result};
use rand::{thread_rng, Rng, distributions::Alphanumeric};
use std::path::Path;
use std::fs;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub security: SecurityConfig,
    pub logging: LoggingConfig,
    pub pagination: PaginationConfig,
    pub lifecycle: LifecycleConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: Option<usize>,
    pub keep_alive: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub token_expiration_hours: i64,
    pub bcrypt_cost: u32,
    pub max_login_attempts: i64,
    pub lockout_duration_minutes: i64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
    pub max_request_size: usize,
    pub require_https: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PaginationConfig {
    pub max_limit: i64,
}

/// Status lifecycle enforcement. Lenient by default: any allowed value may follow any other.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct LifecycleConfig {
    pub strict_transitions: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "development_only_secret_change_me_0123456789".to_string(),
            token_expiration_hours: 12,
            bcrypt_cost: 12,
            max_login_attempts: 5,
            lockout_duration_minutes: 15,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            workers: None,
            keep_alive: 30,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:his.db".to_string(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout: 30,
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://127.0.0.1:3000".to_string(),
            ],
            max_request_size: 1024 * 1024,
            require_https: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self { max_limit: 500 }
    }
}

pub fn generate_jwt_secret() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(64)
        .map(char::from)
        .collect()
}

pub fn load_config() -> Result<Config> {
    load_env_file()?;

    let mut config = if let Ok(config_file) = env::var("CONFIG_FILE") {
        let path = Path::new(&config_file);
        let config_str = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", config_file))?;
        toml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", config_file))?
    } else {
        Config::default()
    };

    override_with_env(&mut config);

    config.validate()
        .context("Configuration validation failed")?;

    Ok(config)
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}

fn override_with_env(config: &mut Config) {
    if let Ok(host) = env::var("BIND_ADDRESS") {
        config.server.host = host;
    }
    if let Some(port) = env_parse::<u16>("HIS_PORT") {
        config.server.port = port;
    }
    if let Some(workers) = env_parse::<usize>("HIS_WORKERS") {
        config.server.workers = Some(workers);
    }
    if let Ok(jwt_secret) = env::var("JWT_SECRET") {
        config.auth.jwt_secret = jwt_secret;
    }
    if let Some(hours) = env_parse::<i64>("AUTH_TOKEN_EXPIRATION_HOURS") {
        config.auth.token_expiration_hours = hours;
    }
    if let Some(cost) = env_parse::<u32>("AUTH_BCRYPT_COST") {
        config.auth.bcrypt_cost = cost;
    }
    if let Some(max) = env_parse::<i64>("AUTH_MAX_LOGIN_ATTEMPTS") {
        config.auth.max_login_attempts = max;
    }
    if let Some(minutes) = env_parse::<i64>("AUTH_LOCKOUT_DURATION_MINUTES") {
        config.auth.lockout_duration_minutes = minutes;
    }
    if let Ok(url) = env::var("DATABASE_URL") {
        config.database.url = url;
    }
    if let Some(max_conn) = env_parse::<u32>("DATABASE_MAX_CONNECTIONS") {
        config.database.max_connections = max_conn;
    }
    if let Some(min_conn) = env_parse::<u32>("DATABASE_MIN_CONNECTIONS") {
        config.database.min_connections = min_conn;
    }
    if let Ok(origins_str) = env::var("ALLOWED_ORIGINS") {
        config.security.allowed_origins = origins_str
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }
    if let Ok(level) = env::var("RUST_LOG") {
        config.logging.level = level;
    }
    if let Some(max_limit) = env_parse::<i64>("HIS_MAX_PAGE_LIMIT") {
        config.pagination.max_limit = max_limit;
    }
    if let Some(strict) = env_parse::<bool>("HIS_STRICT_TRANSITIONS") {
        config.lifecycle.strict_transitions = strict;
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.auth.jwt_secret.len() < 32 {
            return Err(anyhow::anyhow!(
                "JWT_SECRET must be at least 32 characters long (current: {})",
                self.auth.jwt_secret.len()
            ));
        }

        if self.database.max_connections < self.database.min_connections {
            return Err(anyhow::anyhow!(
                "max_connections ({}) must be >= min_connections ({})",
                self.database.max_connections,
                self.database.min_connections
            ));
        }

        if self.pagination.max_limit <= 0 {
            return Err(anyhow::anyhow!("pagination.max_limit must be positive"));
        }

        Ok(())
    }

    pub fn is_production(&self) -> bool {
        env::var("HIS_ENV").map(|v| v == "production").unwrap_or(false)
    }

    pub fn print_startup_info(&self) {
        log::info!("🏥 HIS starting up...");
        log::info!("🌐 Server: {}:{}", self.server.host, self.server.port);
        log::info!("💾 Database: {}", self.database.url);
        log::info!("🔒 Auth: JWT ({}h expiration)", self.auth.token_expiration_hours);
        log::info!("📊 Logging: {} level", self.logging.level);
        log::info!(
            "🔁 Status transitions: {}",
            if self.lifecycle.strict_transitions { "strict" } else { "lenient" }
        );

        if !self.is_production() {
            log::warn!("🚧 Running in development mode");
        }
    }
}

pub fn load_env_file() -> Result<()> {
    if let Ok(env_file) = env::var("ENV_FILE") {
        dotenvy::from_filename(&env_file)
            .with_context(|| format!("Failed to load environment file: {}", env_file))?;
    } else if Path::new(".env").exists() {
        dotenvy::dotenv().context("Failed to load .env file")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.pagination.max_limit, 500);
        assert!(!config.lifecycle.strict_transitions);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.auth.jwt_secret = "short".to_string();
        assert!(config.validate().is_err());

        config.auth.jwt_secret = "a".repeat(32);
        assert!(config.validate().is_ok());

        config.database.max_connections = 1;
        config.database.min_connections = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_sections_are_optional() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(
            file,
            r#"
            [server]
            port = 9000

            [lifecycle]
            strict_transitions = true
            "#
        )?;

        let text = fs::read_to_string(file.path())?;
        let config: Config = toml::from_str(&text)?;
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert!(config.lifecycle.strict_transitions);
        assert_eq!(config.pagination.max_limit, 500);
        Ok(())
    }

    #[test]
    fn test_generated_secret_passes_validation() {
        let mut config = Config::default();
        config.auth.jwt_secret = generate_jwt_secret();
        assert_eq!(config.auth.jwt_secret.len(), 64);
        assert!(config.validate().is_ok());
    }
}
