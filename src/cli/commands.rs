use anyhow::{Context, Result};
use tracing::info;

use crate::cli::config::MonitorConfig;
use crate::monitor::Monitor;

/// Start the monitoring loop with optional command-line overrides
pub async fn run(
    interval: Option<u64>,
    headless: bool,
    webdriver_url: Option<String>,
) -> Result<()> {
    let mut config = MonitorConfig::load_default().context("Failed to load configuration")?;

    if let Some(interval) = interval {
        config.monitor.poll_interval_secs = interval;
    }
    if headless {
        config.site.headless = true;
    }
    if let Some(webdriver_url) = webdriver_url {
        config.site.webdriver_url = webdriver_url;
    }

    let mut monitor = Monitor::new(config).await.context("Failed to start the monitor")?;
    monitor.run().await
}

/// Print the effective configuration with secrets masked
pub async fn show_config() -> Result<()> {
    let mut config = MonitorConfig::load_default().context("Failed to load configuration")?;

    mask(&mut config.site.password);
    mask(&mut config.telegram.token);
    mask(&mut config.sheets.access_token);

    let rendered =
        serde_yaml::to_string(&config).context("Failed to serialize configuration")?;
    info!("Effective configuration:\n{}", rendered);
    Ok(())
}

fn mask(secret: &mut String) {
    if !secret.is_empty() {
        *secret = "********".to_string();
    }
}
