use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,
    #[serde(default)]
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Explicit database file; defaults to `<data_dir>/hearth.db`
    pub database_path: Option<PathBuf>,
    /// Base URL of the web frontend, used in email links and OAuth redirects
    #[serde(default = "default_frontend_url")]
    pub frontend_url: String,
    /// Public base URL of this API (OAuth callback)
    #[serde(default = "default_public_url")]
    pub public_url: String,
    /// Origins allowed by CORS. Empty means the frontend URL only.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_dir: default_data_dir(),
            database_path: None,
            frontend_url: default_frontend_url(),
            public_url: default_public_url(),
            cors_origins: Vec::new(),
        }
    }
}

impl ServerConfig {
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("hearth.db"))
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_frontend_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_public_url() -> String {
    "http://localhost:5000".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Secret used to sign JWTs. Generated at startup when left empty.
    #[serde(default)]
    pub jwt_secret: String,
    #[serde(default = "default_token_ttl_days")]
    pub token_ttl_days: i64,
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    #[serde(default)]
    pub cookie_secure: bool,
    #[serde(default = "default_verification_ttl_hours")]
    pub verification_ttl_hours: i64,
    #[serde(default = "default_reset_ttl_minutes")]
    pub reset_ttl_minutes: i64,
    /// Existing account promoted to site admin at startup
    pub admin_email: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            token_ttl_days: default_token_ttl_days(),
            cookie_name: default_cookie_name(),
            cookie_secure: false,
            verification_ttl_hours: default_verification_ttl_hours(),
            reset_ttl_minutes: default_reset_ttl_minutes(),
            admin_email: None,
        }
    }
}

fn default_token_ttl_days() -> i64 {
    7
}

fn default_cookie_name() -> String {
    "hearth_token".to_string()
}

fn default_verification_ttl_hours() -> i64 {
    24
}

fn default_reset_ttl_minutes() -> i64 {
    60
}

/// SMTP settings for outgoing email
#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    #[serde(default)]
    pub enabled: bool,
    pub smtp_host: Option<String>,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    #[serde(default = "default_smtp_tls")]
    pub smtp_tls: bool,
    pub from_address: Option<String>,
    #[serde(default = "default_from_name")]
    pub from_name: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            smtp_host: None,
            smtp_port: default_smtp_port(),
            smtp_username: None,
            smtp_password: None,
            smtp_tls: default_smtp_tls(),
            from_address: None,
            from_name: default_from_name(),
        }
    }
}

impl EmailConfig {
    /// Check that email is enabled and has the minimum settings to send
    pub fn is_configured(&self) -> bool {
        self.enabled && self.smtp_host.is_some() && self.from_address.is_some()
    }
}

fn default_smtp_port() -> u16 {
    587
}

fn default_smtp_tls() -> bool {
    true
}

fn default_from_name() -> String {
    "Hearth".to_string()
}

/// Twilio WhatsApp settings
#[derive(Debug, Clone, Deserialize)]
pub struct WhatsAppConfig {
    #[serde(default)]
    pub enabled: bool,
    pub account_sid: Option<String>,
    pub auth_token: Option<String>,
    /// Sender number in E.164 form, without the `whatsapp:` prefix
    pub from_number: Option<String>,
    #[serde(default = "default_twilio_api_base")]
    pub api_base: String,
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            account_sid: None,
            auth_token: None,
            from_number: None,
            api_base: default_twilio_api_base(),
        }
    }
}

impl WhatsAppConfig {
    pub fn is_configured(&self) -> bool {
        self.enabled
            && self.account_sid.is_some()
            && self.auth_token.is_some()
            && self.from_number.is_some()
    }
}

fn default_twilio_api_base() -> String {
    "https://api.twilio.com".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct OAuthConfig {
    #[serde(default)]
    pub google: Option<GoogleOAuthConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GoogleOAuthConfig {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    /// Defaults to `<public_url>/api/auth/google/callback`
    pub redirect_uri: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Requests per window for general API endpoints
    #[serde(default = "default_api_requests")]
    pub api_requests_per_window: u32,
    /// Requests per window for login, registration and password reset
    #[serde(default = "default_auth_requests")]
    pub auth_requests_per_window: u32,
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
    /// Seconds between sweeps of stale limiter entries
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_requests_per_window: default_api_requests(),
            auth_requests_per_window: default_auth_requests(),
            window_seconds: default_window_seconds(),
            cleanup_interval: default_cleanup_interval(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_api_requests() -> u32 {
    300
}

fn default_auth_requests() -> u32 {
    20
}

fn default_window_seconds() -> u64 {
    60
}

fn default_cleanup_interval() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Seconds between overdue/reminder sweeps
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Unpaid bills due within this many days get a reminder
    #[serde(default = "default_reminder_lead_days")]
    pub reminder_lead_days: i64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sweep_interval_secs: default_sweep_interval(),
            reminder_lead_days: default_reminder_lead_days(),
        }
    }
}

fn default_sweep_interval() -> u64 {
    3600
}

fn default_reminder_lead_days() -> i64 {
    3
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            info!("Loading configuration from {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::parse(&content)?
        } else {
            info!("No config file found, using defaults");
            Config::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).with_context(|| "Failed to parse configuration file")
    }

    /// Apply secret and deployment overrides from the environment.
    ///
    /// Takes a lookup function so tests don't have to touch process env.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(secret) = lookup("HEARTH_JWT_SECRET") {
            self.auth.jwt_secret = secret;
        }
        if let Some(path) = lookup("HEARTH_DATABASE_PATH") {
            self.server.database_path = Some(PathBuf::from(path));
        }
        if let Some(url) = lookup("HEARTH_FRONTEND_URL") {
            self.server.frontend_url = url;
        }
        if let Some(password) = lookup("HEARTH_SMTP_PASSWORD") {
            self.email.smtp_password = Some(password);
        }
        if let Some(token) = lookup("HEARTH_TWILIO_AUTH_TOKEN") {
            self.whatsapp.auth_token = Some(token);
        }
        if let Some(secret) = lookup("HEARTH_GOOGLE_CLIENT_SECRET") {
            if let Some(google) = self.oauth.google.as_mut() {
                google.client_secret = secret;
            }
        }
    }

    /// Fill in a random JWT secret if none was configured.
    pub fn ensure_jwt_secret(&mut self) {
        if self.auth.jwt_secret.is_empty() {
            warn!("No JWT secret configured; generated a random one, sessions will not survive a restart");
            self.auth.jwt_secret = format!(
                "{}{}",
                uuid::Uuid::new_v4().simple(),
                uuid::Uuid::new_v4().simple()
            );
        }
    }

    /// Redirect URI registered with Google
    pub fn google_redirect_uri(&self) -> Option<String> {
        self.oauth.google.as_ref().map(|g| {
            g.redirect_uri.clone().unwrap_or_else(|| {
                format!(
                    "{}/api/auth/google/callback",
                    self.server.public_url.trim_end_matches('/')
                )
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = Config::load(Path::new("/nonexistent/hearth.toml")).unwrap();
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.auth.token_ttl_days, 7);
        assert!(!config.email.is_configured());
        assert!(config.oauth.google.is_none());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[server]
port = 8081
frontend_url = "https://app.example.com"

[email]
enabled = true
smtp_host = "smtp.example.com"
from_address = "noreply@example.com"

[oauth.google]
client_id = "abc"
"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.server.port, 8081);
        assert_eq!(config.server.frontend_url, "https://app.example.com");
        assert!(config.email.is_configured());
        assert_eq!(config.email.smtp_port, 587);
        assert_eq!(
            config.google_redirect_uri().as_deref(),
            Some("http://localhost:5000/api/auth/google/callback")
        );
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        assert!(Config::parse("[server\nport = ").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::parse(
            r#"
[oauth.google]
client_id = "abc"
"#,
        )
        .unwrap();
        let env: HashMap<&str, &str> = [
            ("HEARTH_JWT_SECRET", "s3cret"),
            ("HEARTH_DATABASE_PATH", "/tmp/h.db"),
            ("HEARTH_GOOGLE_CLIENT_SECRET", "g-secret"),
        ]
        .into_iter()
        .collect();

        config.apply_env(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.auth.jwt_secret, "s3cret");
        assert_eq!(config.server.database_path(), PathBuf::from("/tmp/h.db"));
        assert_eq!(config.oauth.google.unwrap().client_secret, "g-secret");
    }

    #[test]
    fn test_ensure_jwt_secret() {
        let mut config = Config::default();
        config.ensure_jwt_secret();
        assert_eq!(config.auth.jwt_secret.len(), 64);

        let before = config.auth.jwt_secret.clone();
        config.ensure_jwt_secret();
        assert_eq!(config.auth.jwt_secret, before);
    }

    #[test]
    fn test_whatsapp_requires_all_fields() {
        let mut wa = WhatsAppConfig {
            enabled: true,
            account_sid: Some("AC1".into()),
            auth_token: Some("tok".into()),
            from_number: None,
            api_base: default_twilio_api_base(),
        };
        assert!(!wa.is_configured());
        wa.from_number = Some("+15550001111".into());
        assert!(wa.is_configured());
    }
}
