/// file: src/config.rs
/// description: Typed environment configuration with strict fail-fast parsing.
/// Configuration — loaded from environment variables (dotenv + real env).
///
/// Connection settings are required. Harvest knobs (selectors, timeouts,
/// limits) carry defaults tuned for the interests tab of a profile page and
/// can be overridden one by one when the site changes its DOM.
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub session: SessionConfig,
    pub harvest: HarvestConfig,
    pub batch: BatchConfig,
    pub publish: PublishConfig,
}

impl Config {
    /// Load from environment (dotenv + real env).
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Config {
            server: ServerConfig::from_env()?,
            database: DatabaseConfig::from_env()?,
            session: SessionConfig::from_env()?,
            harvest: HarvestConfig::from_env()?,
            batch: BatchConfig::from_env()?,
            publish: PublishConfig::from_env()?,
        })
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_allow_origins: Vec<String>,
}

impl ServerConfig {
    fn from_env() -> anyhow::Result<Self> {
        let cors_allow_origins = env_opt("CORS_ALLOW_ORIGINS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(ToOwned::to_owned)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        Ok(Self {
            host: env_required_str("HOST")?,
            port: env_required_u16("PORT")?,
            cors_allow_origins,
        })
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

// ---------------------------------------------------------------------------
// Database (PostgreSQL)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub max_connections: usize,
}

impl DatabaseConfig {
    fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            host: env_required_str("POSTGRES_HOST")?,
            port: env_required_u16("POSTGRES_PORT")?,
            database: env_required_str("POSTGRES_DB")?,
            user: env_required_str("POSTGRES_USER")?,
            password: env_required_str("POSTGRES_PASSWORD")?,
            max_connections: env_required_usize("DATABASE_MAX_CONNECTIONS")?,
        })
    }
}

// ---------------------------------------------------------------------------
// Browser session
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Storage-state JSON written by the out-of-band login flow.
    pub storage_state_path: Option<PathBuf>,
    pub chrome_executable: Option<PathBuf>,
    pub headless: bool,
    pub navigation_timeout: Duration,
}

impl SessionConfig {
    fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            storage_state_path: env_opt("STORAGE_STATE_PATH").map(PathBuf::from),
            chrome_executable: env_opt("CHROME_EXECUTABLE").map(PathBuf::from),
            headless: env_bool_or("BROWSER_HEADLESS", true)?,
            navigation_timeout: Duration::from_secs(env_u64_or(
                "NAVIGATION_TIMEOUT_SECONDS",
                70,
            )?),
        })
    }
}

// ---------------------------------------------------------------------------
// Harvest (scroll loop)
// ---------------------------------------------------------------------------

pub const DEFAULT_ITEM_SELECTOR: &str =
    "*[id^='profilePagedListComponent'][id*='-COMPANIES-INTERESTS']";
pub const DEFAULT_FULL_SELECTOR: &str =
    "*[id^='profilePagedListComponent'][id*='-COMPANIES-INTERESTS'] span:first-child";
pub const DEFAULT_ANCHOR_SELECTOR: &str = "*[id^='profilePagedListComponent']";
pub const DEFAULT_LOADER_SELECTOR: &str = "div.artdeco-loader";

#[derive(Debug, Clone)]
pub struct HarvestConfig {
    /// One match per list row; its count drives stall detection.
    pub item_selector: String,
    /// The text-bearing element inside each row.
    pub full_selector: String,
    /// First element whose scrollable ancestor is scrolled.
    pub anchor_selector: String,
    /// Spinner shown while the next page loads. `None` skips the wait.
    pub loader_selector: Option<String>,
    pub item_wait_timeout: Duration,
    pub loader_appear_timeout: Duration,
    pub loader_vanish_timeout: Duration,
    pub settle: Duration,
    pub stall_limit: u32,
    pub max_scrolls: u32,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            item_selector: DEFAULT_ITEM_SELECTOR.to_string(),
            full_selector: DEFAULT_FULL_SELECTOR.to_string(),
            anchor_selector: DEFAULT_ANCHOR_SELECTOR.to_string(),
            loader_selector: Some(DEFAULT_LOADER_SELECTOR.to_string()),
            item_wait_timeout: Duration::from_millis(15_000),
            loader_appear_timeout: Duration::from_millis(7_000),
            loader_vanish_timeout: Duration::from_millis(7_000),
            settle: Duration::from_millis(500),
            stall_limit: 4,
            max_scrolls: 300,
        }
    }
}

impl HarvestConfig {
    fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        // An explicitly empty LOADER_SELECTOR disables the spinner wait.
        let loader_selector = match std::env::var("LOADER_SELECTOR") {
            Ok(v) if v.trim().is_empty() => None,
            Ok(v) => Some(v),
            Err(_) => defaults.loader_selector,
        };

        let stall_limit = env_u32_or("STALL_LIMIT", defaults.stall_limit)?;
        if stall_limit == 0 {
            return Err(anyhow::anyhow!("STALL_LIMIT must be > 0"));
        }
        let max_scrolls = env_u32_or("MAX_SCROLLS", defaults.max_scrolls)?;
        if max_scrolls == 0 {
            return Err(anyhow::anyhow!("MAX_SCROLLS must be > 0"));
        }

        Ok(Self {
            item_selector: env_opt("ITEM_SELECTOR").unwrap_or(defaults.item_selector),
            full_selector: env_opt("FULL_SELECTOR").unwrap_or(defaults.full_selector),
            anchor_selector: env_opt("ANCHOR_SELECTOR").unwrap_or(defaults.anchor_selector),
            loader_selector,
            item_wait_timeout: env_millis_or("ITEM_WAIT_TIMEOUT_MS", defaults.item_wait_timeout)?,
            loader_appear_timeout: env_millis_or(
                "LOADER_APPEAR_TIMEOUT_MS",
                defaults.loader_appear_timeout,
            )?,
            loader_vanish_timeout: env_millis_or(
                "LOADER_VANISH_TIMEOUT_MS",
                defaults.loader_vanish_timeout,
            )?,
            settle: env_millis_or("SCROLL_SETTLE_MS", defaults.settle)?,
            stall_limit,
            max_scrolls,
        })
    }
}

// ---------------------------------------------------------------------------
// Batch
// ---------------------------------------------------------------------------

pub const DEFAULT_URL_TEMPLATE: &str =
    "https://www.linkedin.com/in/{}/details/interests/?detailScreenTabIndex=1";

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub flush_every: usize,
    pub staging_csv_path: PathBuf,
    /// `{}` is replaced by the handle.
    pub url_template: String,
    /// Handle file; the database handles table is used when unset.
    pub targets_file: Option<PathBuf>,
}

impl BatchConfig {
    fn from_env() -> anyhow::Result<Self> {
        let flush_every = env_usize_or("FLUSH_EVERY", 200)?;
        if flush_every == 0 {
            return Err(anyhow::anyhow!("FLUSH_EVERY must be > 0"));
        }

        let url_template =
            env_opt("TARGET_URL_TEMPLATE").unwrap_or_else(|| DEFAULT_URL_TEMPLATE.to_string());
        if !url_template.contains("{}") {
            return Err(anyhow::anyhow!(
                "TARGET_URL_TEMPLATE must contain a `{{}}` placeholder: {url_template}"
            ));
        }

        Ok(Self {
            flush_every,
            staging_csv_path: env_opt("STAGING_CSV_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("interests.csv")),
            url_template,
            targets_file: env_opt("TARGETS_FILE").map(PathBuf::from),
        })
    }
}

// ---------------------------------------------------------------------------
// Publish
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PublishConfig {
    /// Replace the delta view on each publish instead of appending to it.
    pub clear_delta: bool,
}

impl PublishConfig {
    fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            clear_delta: env_bool_or("CLEAR_DELTA", false)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Env-reading helpers
// ---------------------------------------------------------------------------

fn env_required_str(key: &str) -> anyhow::Result<String> {
    std::env::var(key).map_err(|_| anyhow::anyhow!("Missing required env var: {key}"))
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_required_u16(key: &str) -> anyhow::Result<u16> {
    let raw = env_required_str(key)?;
    raw.parse()
        .map_err(|_| anyhow::anyhow!("Invalid u16 value for env var {key}: {raw}"))
}

fn env_required_usize(key: &str) -> anyhow::Result<usize> {
    let raw = env_required_str(key)?;
    raw.parse()
        .map_err(|_| anyhow::anyhow!("Invalid usize value for env var {key}: {raw}"))
}

fn env_u32_or(key: &str, default: u32) -> anyhow::Result<u32> {
    match env_opt(key) {
        Some(raw) => raw
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid u32 value for env var {key}: {raw}")),
        None => Ok(default),
    }
}

fn env_u64_or(key: &str, default: u64) -> anyhow::Result<u64> {
    match env_opt(key) {
        Some(raw) => raw
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid u64 value for env var {key}: {raw}")),
        None => Ok(default),
    }
}

fn env_usize_or(key: &str, default: usize) -> anyhow::Result<usize> {
    match env_opt(key) {
        Some(raw) => raw
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid usize value for env var {key}: {raw}")),
        None => Ok(default),
    }
}

fn env_millis_or(key: &str, default: Duration) -> anyhow::Result<Duration> {
    Ok(Duration::from_millis(env_u64_or(
        key,
        default.as_millis() as u64,
    )?))
}

fn env_bool_or(key: &str, default: bool) -> anyhow::Result<bool> {
    match env_opt(key).as_deref() {
        Some("true" | "1" | "yes") => Ok(true),
        Some("false" | "0" | "no") => Ok(false),
        Some(other) => Err(anyhow::anyhow!(
            "Invalid bool value for env var {key}: {other} (expected true/false, 1/0, yes/no)"
        )),
        None => Ok(default),
    }
}
