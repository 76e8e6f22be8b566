use anyhow::{Context, Result};
use std::time::Duration;
use thirtyfour::prelude::*;
use tracing::{debug, error, info, warn};

use crate::browser::InteractionError;
use crate::cli::config::SiteSettings;

/// CSS selectors that indicate an open task detail modal
pub const MODAL_SELECTORS: &[&str] = &[
    "div.modal.fade.ng-scope.ng-isolate-scope.in",
    "div.modal.in",
    "div.modal.show",
];

/// Selector cascade for the routes tab, tried top-down
const ROUTES_TAB_SELECTORS: &[(&str, bool)] = &[
    (r#"label[uib-btn-radio="'ROUTES'"]"#, false),
    (r#"//label[contains(text(), "Маршруты")]"#, true),
    (r#"//button[contains(text(), "Маршруты")]"#, true),
    (r#"//a[contains(text(), "Маршруты")]"#, true),
];

/// Browser session manager for the dispatcher dashboard
pub struct BrowserSession {
    /// Site settings
    config: SiteSettings,

    /// WebDriver instance
    driver: Option<WebDriver>,
}

impl BrowserSession {
    /// Create a new browser session
    pub fn new(config: SiteSettings) -> Self {
        Self {
            config,
            driver: None,
        }
    }

    /// Initialize the browser session
    pub async fn initialize(&mut self) -> Result<()> {
        // Close any existing session
        self.close().await?;

        let mut caps = DesiredCapabilities::chrome();

        if self.config.headless {
            caps.set_headless()?;
            caps.add_chrome_arg("--window-size=1920,1080")?;
        }
        caps.add_chrome_arg("--no-sandbox")?;
        caps.add_chrome_arg("--disable-dev-shm-usage")?;
        caps.add_chrome_arg("--disable-gpu")?;
        caps.add_chrome_arg("--start-maximized")?;
        caps.add_chrome_arg("--log-level=3")?;
        caps.add_chrome_arg("--disable-blink-features=AutomationControlled")?;
        caps.add_chrome_arg("--disable-notifications")?;
        caps.add_chrome_arg("--disable-popup-blocking")?;
        caps.add_chrome_arg("--disable-extensions")?;

        let mut experimental_options = std::collections::HashMap::new();
        experimental_options.insert("excludeSwitches", serde_json::json!(["enable-automation"]));
        experimental_options.insert("useAutomationExtension", serde_json::json!(false));
        for (key, value) in experimental_options {
            caps.add_chrome_option(key, value)?;
        }

        let driver = WebDriver::new(&self.config.webdriver_url, caps)
            .await
            .context("Failed to connect to WebDriver")?;

        driver.set_page_load_timeout(Duration::from_secs(30)).await?;

        // The dashboard refuses sessions that advertise automation
        driver
            .execute(
                "Object.defineProperty(navigator, 'webdriver', {get: () => undefined})",
                Vec::new(),
            )
            .await?;

        info!("Browser session initialized");
        self.driver = Some(driver);

        Ok(())
    }

    fn driver(&self) -> Result<&WebDriver> {
        self.driver
            .as_ref()
            .context("Browser session not initialized")
    }

    /// Log in with the configured credentials. Fatal on failure: a session
    /// that cannot authenticate has nothing to monitor.
    pub async fn login(&self) -> Result<()> {
        let driver = self.driver()?;
        let site_url = self.config.url.trim_end_matches('/');

        info!("Navigating to login page: {}", site_url);
        driver
            .goto(site_url)
            .await
            .context(format!("Failed to navigate to URL: {}", site_url))?;

        let username_field = self
            .wait_for(By::Id("j_username"), Duration::from_secs(30))
            .await
            .context("Login form did not appear")?;
        let password_field = driver.find(By::Id("j_password")).await?;
        let login_button = driver.find(By::Css("button[type='submit']")).await?;

        username_field.clear().await?;
        username_field.send_keys(self.config.username.as_str()).await?;
        password_field.clear().await?;
        password_field.send_keys(self.config.password.as_str()).await?;
        login_button.click().await?;

        tokio::time::sleep(Duration::from_secs(5)).await;

        let current = driver.current_url().await?.to_string().to_lowercase();
        if current.contains("login") || current.contains("auth") {
            anyhow::bail!("Login failed, still on authentication page: {}", current);
        }

        info!("Logged in successfully");
        Ok(())
    }

    /// Navigate to the dispatch monitoring page and activate the routes tab
    pub async fn navigate_to_dispatch(&self) -> Result<()> {
        let driver = self.driver()?;
        let dispatch_url = format!(
            "{}/index.html#/dispatcher/dispatch",
            self.config.url.trim_end_matches('/')
        );

        driver
            .goto(&dispatch_url)
            .await
            .context(format!("Failed to navigate to URL: {}", dispatch_url))?;
        tokio::time::sleep(Duration::from_secs(5)).await;

        self.switch_to_routes_tab().await;
        tokio::time::sleep(Duration::from_secs(5)).await;

        info!("On the dispatch monitoring page");
        Ok(())
    }

    /// Activate the routes tab if it is not already active. Best-effort: the
    /// tab markup varies between dashboard versions, so a cascade of
    /// selectors is tried and a miss is only logged.
    pub async fn switch_to_routes_tab(&self) -> bool {
        let driver = match self.driver() {
            Ok(d) => d,
            Err(_) => return false,
        };

        for (selector, is_xpath) in ROUTES_TAB_SELECTORS {
            let by = if *is_xpath {
                By::XPath(*selector)
            } else {
                By::Css(*selector)
            };
            let tab = match driver.find(by).await {
                Ok(tab) => tab,
                Err(_) => continue,
            };

            debug!("Found routes tab via selector: {}", selector);
            let classes = tab.attr("class").await.ok().flatten().unwrap_or_default();
            if classes.contains("active")
                || classes.contains("btn-primary")
                || classes.contains("selected")
            {
                debug!("Routes tab already active");
                return true;
            }

            if let Err(e) = tab.click().await {
                warn!("Failed to click routes tab: {}", e);
                return false;
            }
            info!("Activated routes tab");
            tokio::time::sleep(Duration::from_secs(3)).await;
            return true;
        }

        warn!("Routes tab not found");
        false
    }

    /// Reload the current page (defends against accumulated UI state drift)
    pub async fn refresh(&self) -> Result<()> {
        self.driver()?.refresh().await.context("Failed to refresh page")?;
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(())
    }

    /// Find all elements matching a CSS selector
    pub async fn find_all_css(&self, selector: &str) -> Result<Vec<WebElement>, InteractionError> {
        Ok(self.driver().map_err(driver_missing)?.find_all(By::Css(selector)).await?)
    }

    /// Find all elements matching an XPath expression
    pub async fn find_all_xpath(&self, xpath: &str) -> Result<Vec<WebElement>, InteractionError> {
        Ok(self.driver().map_err(driver_missing)?.find_all(By::XPath(xpath)).await?)
    }

    /// Poll for an element until it appears or the timeout elapses
    pub async fn wait_for(&self, by: By, timeout: Duration) -> Result<WebElement, InteractionError> {
        let driver = self.driver().map_err(driver_missing)?;
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Ok(elements) = driver.find_all(by.clone()).await {
                if let Some(element) = elements.into_iter().next() {
                    return Ok(element);
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(InteractionError::Timeout);
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }

    /// Wait until any of the given CSS selectors matches a present element
    pub async fn wait_for_any_css(&self, selectors: &[&str], timeout: Duration) -> bool {
        let driver = match self.driver() {
            Ok(d) => d,
            Err(_) => return false,
        };
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            for selector in selectors {
                if let Ok(elements) = driver.find_all(By::Css(*selector)).await {
                    if !elements.is_empty() {
                        return true;
                    }
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }

    /// True if any of the given CSS selectors matches a displayed element
    pub async fn any_displayed_css(&self, selectors: &[&str]) -> bool {
        let driver = match self.driver() {
            Ok(d) => d,
            Err(_) => return false,
        };
        for selector in selectors {
            if let Ok(elements) = driver.find_all(By::Css(*selector)).await {
                for element in elements {
                    if element.is_displayed().await.unwrap_or(false) {
                        return true;
                    }
                }
            }
        }
        false
    }

    /// Press Escape on the focused element, falling back to <body>
    pub async fn press_escape(&self) {
        let driver = match self.driver() {
            Ok(d) => d,
            Err(_) => return,
        };
        let escape = char::from(Key::Escape).to_string();
        let target = match driver.active_element().await {
            Ok(element) => Ok(element),
            Err(_) => driver.find(By::Tag("body")).await,
        };
        match target {
            Ok(element) => {
                if let Err(e) = element.send_keys(escape.as_str()).await {
                    debug!("Failed to send escape: {}", e);
                }
            }
            Err(e) => debug!("No target for escape key: {}", e),
        }
    }

    /// Execute JavaScript and deserialize its return value
    pub async fn execute_script<T>(&self, script: &str) -> Result<T>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        let driver = self.driver()?;
        let ret = driver
            .execute(script, Vec::new())
            .await
            .context("Failed to execute JavaScript")?;
        let value: T = serde_json::from_value(ret.json().clone())
            .context("Failed to parse JavaScript result")?;
        Ok(value)
    }

    /// Get the page source
    pub async fn page_source(&self) -> Result<String> {
        self.driver()?.source().await.context("Failed to get page source")
    }

    /// Close the browser session
    pub async fn close(&mut self) -> Result<()> {
        if let Some(driver) = self.driver.take() {
            if let Err(e) = driver.quit().await {
                error!("Error closing browser session: {}", e);
            }
            debug!("Browser session closed");
        }
        Ok(())
    }
}

fn driver_missing(_: anyhow::Error) -> InteractionError {
    InteractionError::NoSession
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.take() {
            // Spawn a task to quit the driver
            tokio::spawn(async move {
                if let Err(e) = driver.quit().await {
                    error!("Error closing browser session during drop: {}", e);
                }
            });
        }
    }
}
