use tracing::info;

use crate::monitor::router::ChannelKey;

/// Run-wide counters. Pure telemetry: nothing branches on these.
#[derive(Debug, Default)]
pub struct RunStats {
    pub total_checks: u64,
    pub tasks_found: u64,
    pub tasks_processed: u64,
    pub tasks_retried: u64,
    pub tasks_failed_permanent: u64,
    pub errors: u64,
    pub saved_to_sheets: u64,
    pub saved_to_csv: u64,
    pub sent_to_telegram: u64,
    pub telegram_podolsk: u64,
    pub telegram_chekhov: u64,
    pub telegram_south: u64,
    pub photos_captured: u64,
    pub photos_failed: u64,
    pub photos_sent: u64,
    pub media_groups_sent: u64,
    pub single_photos_sent: u64,
    pub lookup_matches: u64,
    pub lookup_misses: u64,
    pub reports_sent: u64,
}

impl RunStats {
    /// Bump the per-chat delivery counter
    pub fn count_channel(&mut self, channel: ChannelKey) {
        match channel {
            ChannelKey::Podolsk => self.telegram_podolsk += 1,
            ChannelKey::Chekhov => self.telegram_chekhov += 1,
            ChannelKey::South => self.telegram_south += 1,
        }
    }

    /// One-line per-iteration summary
    pub fn log_check_summary(&self, pending_retries: usize) {
        info!(
            "Processed {} tasks total, errors: {}, sheets: {}, csv: {}, telegram: {}, \
             photos captured: {}, sent: {}, pending retries: {}",
            self.tasks_processed,
            self.errors,
            self.saved_to_sheets,
            self.saved_to_csv,
            self.sent_to_telegram,
            self.photos_captured,
            self.photos_sent,
            pending_retries
        );
    }

    /// Full summary, logged once at shutdown
    pub fn log_final_summary(&self) {
        info!("Monitoring finished");
        info!("Checks performed: {}", self.total_checks);
        info!("Tasks found: {}", self.tasks_found);
        info!(
            "Tasks processed: {} (retried: {}, failed permanently: {})",
            self.tasks_processed, self.tasks_retried, self.tasks_failed_permanent
        );
        info!(
            "Saved to sheets: {}, to CSV: {}",
            self.saved_to_sheets, self.saved_to_csv
        );
        info!(
            "Telegram sends: {} (podolsk: {}, chekhov: {}, south: {}), reports: {}",
            self.sent_to_telegram,
            self.telegram_podolsk,
            self.telegram_chekhov,
            self.telegram_south,
            self.reports_sent
        );
        info!(
            "Photos captured: {}, failed: {}, sent: {} (media groups: {}, singles: {})",
            self.photos_captured,
            self.photos_failed,
            self.photos_sent,
            self.media_groups_sent,
            self.single_photos_sent
        );
        info!(
            "District lookup hits: {}, misses: {}",
            self.lookup_matches, self.lookup_misses
        );
        info!("Errors: {}", self.errors);
    }
}
