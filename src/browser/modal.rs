use async_trait::async_trait;
use std::time::Duration;
use thirtyfour::WebElement;
use tracing::{debug, error, info, warn};

use crate::browser::session::{BrowserSession, MODAL_SELECTORS};
use crate::browser::InteractionError;

/// How long to wait for a modal-open indicator after a click
const OPEN_CONFIRM_TIMEOUT: Duration = Duration::from_secs(5);

/// The UI surface the modal protocol drives. A trait seam so the retry
/// protocol can be exercised against a scripted surface in tests.
#[async_trait]
pub trait ModalSurface {
    /// Trigger the interaction that should open the detail view.
    /// Fails with `InteractionError::Stale` if the element reference expired.
    async fn trigger_open(&mut self) -> Result<(), InteractionError>;

    /// Wait up to a fixed timeout for any known "modal open" indicator.
    async fn confirm_open(&mut self) -> bool;

    /// Send a single close/cancel signal (escape key).
    async fn send_escape(&mut self);

    /// True if a modal is still visible.
    async fn modal_visible(&mut self) -> bool;

    /// Timed pause between interactions.
    async fn pause(&mut self, ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}

/// Open a task detail modal with bounded retries.
///
/// Every failed attempt issues a close cycle before retrying, so no attempt
/// leaves a stray half-open modal behind. Returns false once `max_attempts`
/// opens have failed; the caller decides whether to requeue the task.
pub async fn open_task_modal<S: ModalSurface + Send + ?Sized>(surface: &mut S, max_attempts: u32) -> bool {
    for attempt in 1..=max_attempts {
        debug!("Attempt {} to open the task detail modal", attempt);
        match surface.trigger_open().await {
            Ok(()) => {
                surface.pause(3000).await;
                if surface.confirm_open().await {
                    info!("Task modal opened (attempt {})", attempt);
                    return true;
                }
                warn!("Modal did not appear on attempt {}, sending escape", attempt);
            }
            Err(InteractionError::Stale) => {
                warn!("Task element went stale on attempt {}", attempt);
            }
            Err(e) => {
                warn!("Failed to click task on attempt {}: {}", attempt, e);
            }
        }
        close_modal(surface).await;
        surface.pause(2000).await;
    }

    error!("Failed to open the task modal after {} attempts", max_attempts);
    false
}

/// Close any open modal by pressing Escape up to three times.
/// Returns false if a modal is still visible afterwards.
pub async fn close_modal<S: ModalSurface + Send + ?Sized>(surface: &mut S) -> bool {
    for _ in 0..3 {
        surface.send_escape().await;
        surface.pause(500).await;
    }
    surface.pause(1000).await;

    if surface.modal_visible().await {
        warn!("Modal still visible after escape presses");
        false
    } else {
        debug!("Modal closed");
        true
    }
}

/// Live modal surface: a discovered task element on the dispatch page.
pub struct TaskModal<'a> {
    session: &'a BrowserSession,
    element: WebElement,
}

impl<'a> TaskModal<'a> {
    pub fn new(session: &'a BrowserSession, element: WebElement) -> Self {
        Self { session, element }
    }
}

#[async_trait]
impl ModalSurface for TaskModal<'_> {
    async fn trigger_open(&mut self) -> Result<(), InteractionError> {
        self.element.click().await.map_err(InteractionError::from)
    }

    async fn confirm_open(&mut self) -> bool {
        self.session
            .wait_for_any_css(MODAL_SELECTORS, OPEN_CONFIRM_TIMEOUT)
            .await
    }

    async fn send_escape(&mut self) {
        self.session.press_escape().await;
    }

    async fn modal_visible(&mut self) -> bool {
        self.session.any_displayed_css(MODAL_SELECTORS).await
    }
}
