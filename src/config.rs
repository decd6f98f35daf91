use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub trigger: TriggerConfig,
    #[serde(default)]
    pub profile_service: ProfileServiceConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub automation: AutomationConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// IP address to bind the HTTP server to (default: "127.0.0.1").
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Frontend origin allowed by CORS.
    #[serde(default = "default_cors_origin")]
    pub cors_origin: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            cors_origin: default_cors_origin(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8000
}
fn default_cors_origin() -> String {
    "http://localhost:5173".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct StateConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "chartpilot.db".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    /// HS256 signing secret. Empty means "read JWT_SECRET from the environment".
    #[serde(default)]
    pub jwt_secret: String,
    #[serde(default = "default_token_expire_minutes")]
    pub token_expire_minutes: i64,
    /// bcrypt work factor for stored password hashes.
    #[serde(default = "default_bcrypt_cost")]
    pub bcrypt_cost: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            token_expire_minutes: default_token_expire_minutes(),
            bcrypt_cost: default_bcrypt_cost(),
        }
    }
}

fn default_token_expire_minutes() -> i64 {
    30
}
fn default_bcrypt_cost() -> u32 {
    bcrypt::DEFAULT_COST
}

impl AuthConfig {
    /// Resolve the signing secret, falling back to the `JWT_SECRET` env var.
    pub fn resolve_secret(&self) -> anyhow::Result<String> {
        if !self.jwt_secret.is_empty() {
            return Ok(self.jwt_secret.clone());
        }
        match std::env::var("JWT_SECRET") {
            Ok(secret) if !secret.is_empty() => Ok(secret),
            _ => anyhow::bail!(
                "No JWT secret configured. Set [auth].jwt_secret in config.toml or JWT_SECRET in the environment."
            ),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TriggerConfig {
    #[serde(default = "default_trigger_path")]
    pub path: String,
    #[serde(default = "default_symbol")]
    pub default_symbol: String,
    #[serde(default = "default_timeframe")]
    pub default_timeframe: String,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            path: default_trigger_path(),
            default_symbol: default_symbol(),
            default_timeframe: default_timeframe(),
        }
    }
}

fn default_trigger_path() -> String {
    "trigger_data.json".to_string()
}
fn default_symbol() -> String {
    "GOLD".to_string()
}
fn default_timeframe() -> String {
    "5".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProfileServiceConfig {
    #[serde(default = "default_profile_base_url")]
    pub base_url: String,
    #[serde(default = "default_profile_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ProfileServiceConfig {
    fn default() -> Self {
        Self {
            base_url: default_profile_base_url(),
            timeout_secs: default_profile_timeout_secs(),
        }
    }
}

fn default_profile_base_url() -> String {
    "http://localhost:5000".to_string()
}
fn default_profile_timeout_secs() -> u64 {
    15
}

#[derive(Debug, Deserialize, Clone)]
pub struct BrowserConfig {
    /// Persistent Chrome profile directory; cookies survive between runs.
    #[serde(default = "default_user_data_dir")]
    pub user_data_dir: String,
    /// The charting site is driven headed by default so a human can take over.
    #[serde(default)]
    pub headless: bool,
    /// Explicit Chrome/Chromium binary. Auto-detected when unset.
    pub executable: Option<String>,
    #[serde(default = "default_window_width")]
    pub window_width: u32,
    #[serde(default = "default_window_height")]
    pub window_height: u32,
    #[serde(default = "default_home_url")]
    pub home_url: String,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            user_data_dir: default_user_data_dir(),
            headless: false,
            executable: None,
            window_width: default_window_width(),
            window_height: default_window_height(),
            home_url: default_home_url(),
        }
    }
}

fn default_user_data_dir() -> String {
    "user-data/tradingview-session".to_string()
}
fn default_window_width() -> u32 {
    1600
}
fn default_window_height() -> u32 {
    900
}
fn default_home_url() -> String {
    "https://www.tradingview.com/".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct AutomationConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// How long the anonymous-user button may take to show up before the
    /// session is assumed to be logged in.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_element_timeout_ms")]
    pub element_timeout_ms: u64,
    #[serde(default = "default_navigation_timeout_ms")]
    pub navigation_timeout_ms: u64,
    #[serde(default = "default_login_timeout_ms")]
    pub login_timeout_ms: u64,
    /// Horizontal pixel shift added to the canvas centre when placing
    /// trend-line endpoints; the site's visible time axis sits left of centre.
    #[serde(default = "default_click_offset_x")]
    pub click_offset_x: f64,
    /// Seconds a server-dispatched run keeps the browser open after drawing.
    #[serde(default)]
    pub hold_open_secs: u64,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            element_timeout_ms: default_element_timeout_ms(),
            navigation_timeout_ms: default_navigation_timeout_ms(),
            login_timeout_ms: default_login_timeout_ms(),
            click_offset_x: default_click_offset_x(),
            hold_open_secs: 0,
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    100
}
fn default_probe_timeout_ms() -> u64 {
    3000
}
fn default_element_timeout_ms() -> u64 {
    10_000
}
fn default_navigation_timeout_ms() -> u64 {
    30_000
}
fn default_login_timeout_ms() -> u64 {
    30_000
}
fn default_click_offset_x() -> f64 {
    60.0
}

impl AutomationConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
    pub fn element_timeout(&self) -> Duration {
        Duration::from_millis(self.element_timeout_ms)
    }
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }
    pub fn login_timeout(&self) -> Duration {
        Duration::from_millis(self.login_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct JobsConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Finished jobs kept for status queries before the oldest are dropped.
    #[serde(default = "default_max_finished")]
    pub max_finished: usize,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            max_finished: default_max_finished(),
        }
    }
}

fn default_queue_capacity() -> usize {
    16
}
fn default_max_finished() -> usize {
    50
}

impl AppConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load `path` when it exists, otherwise run on built-in defaults.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::warn!(
                path = %path.display(),
                "Config file not found, using defaults"
            );
            Ok(Self::default())
        }
    }
}
