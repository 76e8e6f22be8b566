pub mod modal;
pub mod session;

use thirtyfour::error::WebDriverError;

/// Classified browser interaction failure. The modal protocol and the retry
/// sweep branch on these; everything else is wrapped as-is.
#[derive(Debug, thiserror::Error)]
pub enum InteractionError {
    #[error("element reference went stale")]
    Stale,
    #[error("element not found")]
    NotFound,
    #[error("timed out waiting for element")]
    Timeout,
    #[error("browser session not initialized")]
    NoSession,
    #[error("webdriver error: {0}")]
    Driver(WebDriverError),
}

impl From<WebDriverError> for InteractionError {
    fn from(e: WebDriverError) -> Self {
        match e {
            // thirtyfour 0.31 reports stale element references as NoSuchElement
            WebDriverError::NoSuchElement(_) => Self::NotFound,
            other => Self::Driver(other),
        }
    }
}
