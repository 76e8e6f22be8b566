use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};
use url::Url;

/// Main configuration structure
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MonitorConfig {
    pub site: SiteSettings,
    pub monitor: MonitorSettings,
    pub telegram: TelegramSettings,
    pub sheets: SheetsSettings,
    pub storage: StorageSettings,
}

/// Target site and credentials
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SiteSettings {
    pub url: String,
    pub username: String,
    pub password: String,
    pub headless: bool,
    /// WebDriver endpoint (chromedriver)
    pub webdriver_url: String,
}

/// Polling loop settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MonitorSettings {
    /// Seconds between checks
    pub poll_interval_secs: u64,
    /// Maximum retry attempts before a task is failed permanently
    pub max_retry_attempts: u32,
    /// Hours between periodic reports
    pub report_interval_hours: u64,
    /// Seconds a queued failure may go unseen before it is dropped
    pub failure_staleness_secs: u64,
    /// Milliseconds to pause between tasks within one check
    pub task_pause_ms: u64,
}

/// Telegram bot settings; a chat left empty is treated as unconfigured
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TelegramSettings {
    pub token: String,
    pub chat_podolsk: String,
    pub chat_chekhov: String,
    pub chat_south: String,
    /// Send multi-photo tasks as a media group rather than single photos
    pub send_media_group: bool,
}

/// Google Sheets settings; disabled when the sheet URL is empty
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SheetsSettings {
    pub sheet_url: String,
    pub access_token: String,
    /// Worksheet holding the address -> district lookup table
    pub lookup_worksheet: String,
}

/// Local persistence settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StorageSettings {
    pub csv_path: PathBuf,
    pub backup_dir: PathBuf,
    pub photos_dir: PathBuf,
    pub save_photos_locally: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            site: SiteSettings {
                url: String::new(),
                username: String::new(),
                password: String::new(),
                headless: false,
                webdriver_url: "http://localhost:9515".to_string(),
            },
            monitor: MonitorSettings {
                poll_interval_secs: 5,
                max_retry_attempts: 3,
                report_interval_hours: 3,
                failure_staleness_secs: 3600,
                task_pause_ms: 1500,
            },
            telegram: TelegramSettings {
                token: String::new(),
                chat_podolsk: String::new(),
                chat_chekhov: String::new(),
                chat_south: String::new(),
                send_media_group: true,
            },
            sheets: SheetsSettings {
                sheet_url: String::new(),
                access_token: String::new(),
                lookup_worksheet: "Лист2".to_string(),
            },
            storage: StorageSettings {
                csv_path: PathBuf::from("monitoring_data.csv"),
                backup_dir: PathBuf::from("."),
                photos_dir: PathBuf::from("downloaded_photos"),
                save_photos_locally: true,
            },
        }
    }
}

impl MonitorConfig {
    /// Get the path to the config directory
    fn config_dir() -> PathBuf {
        if let Some(proj_dirs) =
            directories::ProjectDirs::from("com", "dispatch-monitor", "dispatch-monitor")
        {
            proj_dirs.config_dir().to_path_buf()
        } else {
            PathBuf::from("./config")
        }
    }

    /// Load the default configuration, then apply environment overrides
    pub fn load_default() -> Result<Self> {
        let config_dir = Self::config_dir();
        let config_path = config_dir.join("default.yaml");

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            info!("Default configuration not found. Creating...");
            let config = Self::default();
            if let Err(e) = config.save_to_file(&config_path) {
                error!("Failed to save default configuration: {}", e);
            }
            config
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a file
    fn load_from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from: {}", path.display());
        let contents = fs::read_to_string(path)
            .context(format!("Failed to read configuration file: {}", path.display()))?;

        let config: Self = serde_yaml::from_str(&contents)
            .context(format!("Failed to parse configuration file: {}", path.display()))?;

        Ok(config)
    }

    /// Save the configuration to a file
    fn save_to_file(&self, path: &Path) -> Result<()> {
        debug!("Saving configuration to: {}", path.display());

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)
                    .context(format!("Failed to create directory: {}", parent.display()))?;
            }
        }

        let contents = serde_yaml::to_string(self)
            .context("Failed to serialize configuration")?;

        fs::write(path, contents)
            .context(format!("Failed to write configuration file: {}", path.display()))?;

        Ok(())
    }

    /// Apply environment-variable overrides; every deployment-sensitive key
    /// can be set without touching the profile file
    pub fn apply_env_overrides(&mut self) {
        override_string("SITE_URL", &mut self.site.url);
        override_string("SITE_USERNAME", &mut self.site.username);
        override_string("SITE_PASSWORD", &mut self.site.password);
        override_string("WEBDRIVER_URL", &mut self.site.webdriver_url);
        override_bool("HEADLESS_MODE", &mut self.site.headless);

        override_u64("MONITOR_INTERVAL", &mut self.monitor.poll_interval_secs);
        override_u32("MAX_RETRY_ATTEMPTS", &mut self.monitor.max_retry_attempts);
        override_u64("REPORT_INTERVAL_HOURS", &mut self.monitor.report_interval_hours);

        override_string("TELEGRAM_TOKEN", &mut self.telegram.token);
        override_string("TELEGRAM_CHAT_PODOLSK", &mut self.telegram.chat_podolsk);
        override_string("TELEGRAM_CHAT_CHEKHOV", &mut self.telegram.chat_chekhov);
        override_string("TELEGRAM_CHAT_SOUTH", &mut self.telegram.chat_south);
        override_bool("SEND_MEDIA_GROUP", &mut self.telegram.send_media_group);

        override_string("GOOGLE_SHEET_URL", &mut self.sheets.sheet_url);
        override_string("GOOGLE_ACCESS_TOKEN", &mut self.sheets.access_token);

        override_bool("SAVE_PHOTOS_LOCALLY", &mut self.storage.save_photos_locally);
    }

    /// Validate required settings; a miss here aborts startup entirely
    pub fn validate(&self) -> Result<()> {
        if self.site.url.is_empty() {
            anyhow::bail!("SITE_URL is not configured");
        }
        Url::parse(&self.site.url)
            .context(format!("SITE_URL is not a valid URL: {}", self.site.url))?;
        if self.site.username.is_empty() {
            anyhow::bail!("SITE_USERNAME is not configured");
        }
        if self.site.password.is_empty() {
            anyhow::bail!("SITE_PASSWORD is not configured");
        }
        Ok(())
    }

    /// Site URL with any trailing slash removed
    pub fn site_url(&self) -> String {
        self.site.url.trim_end_matches('/').to_string()
    }
}

fn override_string(var: &str, target: &mut String) {
    if let Ok(value) = env::var(var) {
        if !value.is_empty() {
            *target = value;
        }
    }
}

fn override_bool(var: &str, target: &mut bool) {
    if let Ok(value) = env::var(var) {
        *target = matches!(value.to_lowercase().as_str(), "true" | "1" | "yes");
    }
}

fn override_u64(var: &str, target: &mut u64) {
    if let Ok(value) = env::var(var) {
        if let Ok(parsed) = value.parse() {
            *target = parsed;
        }
    }
}

fn override_u32(var: &str, target: &mut u32) {
    if let Ok(value) = env::var(var) {
        if let Ok(parsed) = value.parse() {
            *target = parsed;
        }
    }
}
