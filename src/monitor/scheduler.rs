use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Local, Utc};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::browser::modal::{close_modal, open_task_modal, TaskModal};
use crate::browser::session::BrowserSession;
use crate::cli::config::MonitorConfig;
use crate::monitor::extract::Extractor;
use crate::monitor::registry::{FailureDisposition, TaskRegistry};
use crate::monitor::report::ReportAggregator;
use crate::monitor::router::{ChannelKey, DistrictRouter};
use crate::monitor::stats::RunStats;
use crate::monitor::task::{parse_task_id, DiscoveredTask, ExtractedTask, TaskKey};
use crate::storage::backup::{BackupRecord, BackupStore};
use crate::storage::csv::CsvStore;
use crate::storage::lookup::DistrictLookup;
use crate::storage::sheets::SheetsClient;
use crate::telegram::{format_task_message, TelegramClient};

/// Task tile selector cascade, tried top-down; the first selector that
/// matches anything wins
const TASK_SELECTORS: &[&str] = &[
    "span.stand_info.ng-binding",
    "span[ng-click*='openRouteTaskInfo']",
    "span.stand_info",
    ".ng-binding[ng-click]",
];

/// A full page reload runs on every fifth check to shake off Angular state
/// drift; lighter checks reuse the already-rendered page
const REFRESH_EVERY_N_CHECKS: u64 = 5;

/// Whether an extraction settles its task as done or sends it back to the
/// failure queue
#[derive(Debug, PartialEq, Eq)]
enum ExtractionOutcome {
    Complete,
    Incomplete,
}

/// A record without photographic evidence is not accepted as done; the
/// photos usually land a few minutes after the task first appears
fn extraction_outcome(task: &ExtractedTask) -> ExtractionOutcome {
    if task.has_photos() {
        ExtractionOutcome::Complete
    } else {
        ExtractionOutcome::Incomplete
    }
}

/// District lookup column formula appended alongside each spreadsheet row,
/// so spreadsheet users see the canonical district even when the table is
/// edited after the fact
fn lookup_formula(worksheet: &str) -> String {
    format!(
        r#"=IFERROR(VLOOKUP(INDIRECT("C"&ROW()); '{}'!A:B; 2; FALSE); "")"#,
        worksheet
    )
}

/// The monitoring loop: discovery, modal processing, persistence, routing,
/// retries and periodic reports. Owns every collaborator for the lifetime of
/// one run.
pub struct Monitor {
    config: MonitorConfig,
    session: BrowserSession,
    telegram: Option<TelegramClient>,
    sheets: Option<SheetsClient>,
    lookup: DistrictLookup,
    csv: CsvStore,
    backup: BackupStore,
    registry: TaskRegistry<DiscoveredTask>,
    router: DistrictRouter,
    reports: ReportAggregator,
    extractor: Extractor,
    stats: RunStats,
}

impl Monitor {
    /// Perform all fatal setup: browser, login, dispatch page, external
    /// clients and the lookup table. Any failure here aborts the run.
    pub async fn new(config: MonitorConfig) -> Result<Self> {
        config.validate()?;

        let mut session = BrowserSession::new(config.site.clone());
        session.initialize().await?;
        session.login().await?;
        session.navigate_to_dispatch().await?;

        let telegram = if config.telegram.token.is_empty() {
            warn!("Telegram token not configured, notifications disabled");
            None
        } else {
            Some(TelegramClient::new(&config.telegram.token)?)
        };

        let (sheets, lookup) = if config.sheets.sheet_url.is_empty() {
            warn!("Google Sheets not configured, spreadsheet persistence disabled");
            (None, DistrictLookup::new())
        } else {
            let client = SheetsClient::new(&config.sheets.sheet_url, &config.sheets.access_token)?;
            let lookup = match client
                .load_lookup_rows(&config.sheets.lookup_worksheet)
                .await
            {
                Ok(rows) => DistrictLookup::from_rows(rows),
                Err(e) => {
                    warn!("Failed to load the district lookup table: {}", e);
                    DistrictLookup::new()
                }
            };
            (Some(client), lookup)
        };

        if config.storage.save_photos_locally {
            std::fs::create_dir_all(&config.storage.photos_dir).context(format!(
                "Failed to create photos directory: {}",
                config.storage.photos_dir.display()
            ))?;
        }

        let router = DistrictRouter::new(&config.telegram);
        let registry = TaskRegistry::new(
            config.monitor.max_retry_attempts,
            config.monitor.failure_staleness_secs,
        );
        let reports = ReportAggregator::new(Utc::now());
        let csv = CsvStore::new(config.storage.csv_path.clone());
        let backup = BackupStore::new(config.storage.backup_dir.clone());

        Ok(Self {
            config,
            session,
            telegram,
            sheets,
            lookup,
            csv,
            backup,
            registry,
            router,
            reports,
            extractor: Extractor::new(),
            stats: RunStats::default(),
        })
    }

    /// Run the monitoring loop until a shutdown signal arrives
    pub async fn run(&mut self) -> Result<()> {
        let poll = Duration::from_secs(self.config.monitor.poll_interval_secs);
        info!(
            "Monitoring started (interval: {}s, reports every {}h)",
            self.config.monitor.poll_interval_secs, self.config.monitor.report_interval_hours
        );
        self.send_startup_notice().await;

        let mut shutdown = Box::pin(tokio::signal::ctrl_c());
        let mut check_number: u64 = 0;
        loop {
            check_number += 1;
            if let Err(e) = self.check(check_number).await {
                error!("Check {} failed: {}", check_number, e);
                self.stats.errors += 1;
            }
            self.maybe_flush_reports().await;
            self.stats.log_check_summary(self.registry.pending_len());

            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }
                _ = tokio::time::sleep(poll) => {}
            }
        }

        self.flush_reports().await;
        self.stats.log_final_summary();
        self.session.close().await?;
        Ok(())
    }

    /// One monitoring iteration: optional refresh, discovery, per-task
    /// processing, then the retry sweep
    async fn check(&mut self, check_number: u64) -> Result<()> {
        self.stats.total_checks += 1;
        debug!("Check #{}", check_number);

        if check_number > 1 && check_number % REFRESH_EVERY_N_CHECKS == 1 {
            info!("Periodic page refresh");
            self.session.refresh().await?;
            self.session.switch_to_routes_tab().await;
        }

        let tasks = self.discover_tasks().await?;
        let now = Utc::now();
        let pause = Duration::from_millis(self.config.monitor.task_pause_ms);

        for task in tasks {
            let key = task.key();
            self.registry.mark_seen(key, now);
            if self.registry.is_processed(key) {
                debug!("Task already processed, skipping");
                continue;
            }

            self.stats.tasks_found += 1;
            self.handle_task(key, task).await;
            tokio::time::sleep(pause).await;
        }

        self.retry_sweep().await;
        Ok(())
    }

    /// Collect task tiles currently visible on the dispatch page
    async fn discover_tasks(&self) -> Result<Vec<DiscoveredTask>> {
        for selector in TASK_SELECTORS {
            let elements = match self.session.find_all_css(selector).await {
                Ok(elements) if !elements.is_empty() => elements,
                Ok(_) => continue,
                Err(e) => {
                    debug!("Selector '{}' failed: {}", selector, e);
                    continue;
                }
            };
            debug!("Found {} task tiles via '{}'", elements.len(), selector);

            let mut tasks = Vec::new();
            for element in elements {
                let address = element.text().await.unwrap_or_default().trim().to_string();
                if address.is_empty() {
                    continue;
                }
                let task_id = element
                    .attr("ng-click")
                    .await
                    .ok()
                    .flatten()
                    .and_then(|handler| parse_task_id(&handler));
                tasks.push(DiscoveredTask {
                    element,
                    address,
                    task_id,
                });
            }
            return Ok(tasks);
        }

        debug!("No task tiles on the page");
        Ok(Vec::new())
    }

    /// Process one task and settle its registry state
    async fn handle_task(&mut self, key: TaskKey, task: DiscoveredTask) {
        match self.process_task(&task).await {
            Some(extracted) => {
                self.registry.mark_success(key);
                self.stats.tasks_processed += 1;
                self.persist_and_send(extracted).await;
            }
            None => {
                if self.registry.record_failure(key, task, Utc::now())
                    == FailureDisposition::Permanent
                {
                    self.stats.tasks_failed_permanent += 1;
                }
            }
        }
    }

    /// Open the detail modal, extract, and close. Returns None when the
    /// modal never opened or the record lacks photographic evidence.
    async fn process_task(&mut self, task: &DiscoveredTask) -> Option<ExtractedTask> {
        let mut modal = TaskModal::new(&self.session, task.element.clone());
        if !open_task_modal(&mut modal, self.config.monitor.max_retry_attempts).await {
            return None;
        }

        let photos_dir = self
            .config
            .storage
            .save_photos_locally
            .then(|| self.config.storage.photos_dir.clone());
        let extracted = self
            .extractor
            .extract(&self.session, photos_dir.as_deref(), &mut self.stats)
            .await;

        // The modal must come down on every path or it blocks the next task
        close_modal(&mut modal).await;

        match extraction_outcome(&extracted) {
            ExtractionOutcome::Complete => Some(extracted),
            ExtractionOutcome::Incomplete => {
                warn!("Task has no photos yet, queueing for retry");
                None
            }
        }
    }

    /// Retry previously-failed tasks whose entries are still fresh
    async fn retry_sweep(&mut self) {
        let plan = self.registry.sweep(Utc::now());
        if plan.retry.is_empty() {
            return;
        }
        info!(
            "Retry sweep: {} queued, {} expired",
            plan.retry.len(),
            plan.expired
        );

        for (key, mut task) in plan.retry {
            // The stored element reference likely went stale; re-resolve by id
            if let Some(element) = self.find_task_element(&task).await {
                task.element = element;
                self.registry.update_task(key, task.clone());
            }
            self.stats.tasks_retried += 1;
            self.handle_task(key, task).await;
        }
    }

    /// Re-locate a task tile after its element reference expired
    async fn find_task_element(&self, task: &DiscoveredTask) -> Option<thirtyfour::WebElement> {
        if let Some(id) = &task.task_id {
            let xpath = format!("//*[contains(@ng-click, 'openRouteTaskInfo({})')]", id);
            if let Ok(elements) = self.session.find_all_xpath(&xpath).await {
                if let Some(element) = elements.into_iter().next() {
                    debug!("Re-resolved task element by id {}", id);
                    return Some(element);
                }
            }
        }

        // No id: fall back to matching the tile text
        for selector in TASK_SELECTORS {
            let Ok(elements) = self.session.find_all_css(selector).await else {
                continue;
            };
            for element in elements {
                let text = element.text().await.unwrap_or_default();
                if text.trim() == task.address {
                    return Some(element);
                }
            }
        }
        None
    }

    /// Canonicalize the district, write to every sink, then route and send
    async fn persist_and_send(&mut self, mut task: ExtractedTask) {
        if !self.lookup.is_empty() {
            match self.lookup.district_for(&task.address) {
                Some(district) => {
                    if district != task.city_district {
                        debug!(
                            "Lookup overrides district '{}' -> '{}'",
                            task.city_district, district
                        );
                    }
                    task.city_district = district.to_string();
                    self.stats.lookup_matches += 1;
                }
                None => self.stats.lookup_misses += 1,
            }
        }

        self.persist_task(&task).await;
        self.send_task(&task).await;
    }

    async fn persist_task(&mut self, task: &ExtractedTask) {
        let now = Local::now();
        let date = now.format("%Y-%m-%d").to_string();
        let time = now.format("%H:%M:%S").to_string();
        let photo_note = if task.has_photos() {
            format!("да ({})", task.photos.len())
        } else {
            "нет".to_string()
        };

        let row = vec![
            date.clone(),
            time.clone(),
            task.address.clone(),
            task.container_type.clone(),
            task.problem.clone(),
            task.city_district.clone(),
            task.driver_name.clone(),
            task.vehicle.clone(),
            photo_note.clone(),
            lookup_formula(&self.config.sheets.lookup_worksheet),
        ];

        if let Some(sheets) = &self.sheets {
            match sheets.append_row(&row).await {
                Ok(()) => self.stats.saved_to_sheets += 1,
                Err(e) => {
                    error!("Spreadsheet write failed: {}", e);
                    self.stats.errors += 1;
                }
            }
        }

        let csv_row = vec![
            date,
            time,
            task.address.clone(),
            task.container_type.clone(),
            task.problem.clone(),
            task.city_district.clone(),
            task.driver_name.clone(),
            task.vehicle.clone(),
            photo_note,
        ];
        match self.csv.append_row(&csv_row) {
            Ok(()) => self.stats.saved_to_csv += 1,
            Err(e) => {
                error!("CSV write failed: {}", e);
                self.stats.errors += 1;
            }
        }

        let record = BackupRecord {
            timestamp: Utc::now(),
            task_id: task.task_id.as_deref(),
            address: &task.address,
            container_type: &task.container_type,
            problem: &task.problem,
            district: &task.city_district,
            driver: &task.driver_name,
            vehicle: &task.vehicle,
            photo_count: task.photos.len(),
        };
        if let Err(e) = self.backup.append(&record) {
            error!("Backup write failed: {}", e);
            self.stats.errors += 1;
        }
    }

    /// Route the task to its district chats and deliver the notification
    async fn send_task(&mut self, task: &ExtractedTask) {
        let Some(telegram) = &self.telegram else { return };
        let targets = self.router.route(&task.city_district);
        if targets.is_empty() {
            return;
        }

        let caption = format_task_message(task);
        for (channel, chat_id) in targets {
            let result = if self.config.telegram.send_media_group && task.photos.len() > 1 {
                let sent = telegram
                    .send_media_group(&chat_id, task.photos.clone(), &caption)
                    .await;
                if sent.is_ok() {
                    self.stats.media_groups_sent += 1;
                    self.stats.photos_sent += task.photos.len().min(10) as u64;
                }
                sent
            } else if let Some(first) = task.photos.first() {
                let mut sent = telegram.send_photo(&chat_id, first.clone(), &caption).await;
                if sent.is_ok() {
                    self.stats.single_photos_sent += 1;
                    self.stats.photos_sent += 1;
                    // remaining photos follow without a caption
                    for photo in task.photos.iter().skip(1) {
                        tokio::time::sleep(Duration::from_millis(300)).await;
                        match telegram.send_photo(&chat_id, photo.clone(), "").await {
                            Ok(()) => {
                                self.stats.single_photos_sent += 1;
                                self.stats.photos_sent += 1;
                            }
                            Err(e) => {
                                sent = Err(e);
                                break;
                            }
                        }
                    }
                }
                sent
            } else {
                telegram.send_message(&chat_id, &caption).await
            };

            match result {
                Ok(()) => {
                    self.stats.sent_to_telegram += 1;
                    self.stats.count_channel(channel);
                    self.reports
                        .record(channel, &task.driver_name, &task.vehicle, &task.problem);
                }
                Err(e) => {
                    error!("Telegram delivery to {} failed: {}", channel.label(), e);
                    self.stats.errors += 1;
                }
            }
        }
    }

    async fn send_startup_notice(&mut self) {
        let Some(telegram) = &self.telegram else { return };
        let text = format!(
            "🚀 <b>Мониторинг запущен</b>\n\n<i>{}</i>",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        );
        for (channel, chat_id) in self.router.all_chats() {
            if let Err(e) = telegram.send_message(chat_id, &text).await {
                warn!("Startup notice to {} failed: {}", channel.label(), e);
            }
        }
    }

    async fn maybe_flush_reports(&mut self) {
        let interval = ChronoDuration::hours(self.config.monitor.report_interval_hours as i64);
        if Utc::now() - self.reports.window_start() >= interval {
            self.flush_reports().await;
        }
    }

    /// Send the accumulated per-driver report to every configured chat and
    /// open a new window
    async fn flush_reports(&mut self) {
        let Some(telegram) = &self.telegram else { return };
        if self.router.is_empty() {
            return;
        }

        let channels: Vec<ChannelKey> =
            self.router.all_chats().iter().map(|(key, _)| *key).collect();
        let reports = self.reports.flush(Utc::now(), &channels);
        for (channel, text) in reports {
            let Some((_, chat_id)) = self
                .router
                .all_chats()
                .iter()
                .find(|(key, _)| *key == channel)
            else {
                continue;
            };
            match telegram.send_message(chat_id, &text).await {
                Ok(()) => self.stats.reports_sent += 1,
                Err(e) => {
                    error!("Report delivery to {} failed: {}", channel.label(), e);
                    self.stats.errors += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settle(registry: &mut TaskRegistry<&'static str>, key: TaskKey, task: &ExtractedTask) {
        match extraction_outcome(task) {
            ExtractionOutcome::Complete => registry.mark_success(key),
            ExtractionOutcome::Incomplete => {
                registry.record_failure(key, "task", Utc::now());
            }
        }
    }

    #[test]
    fn photo_less_extraction_is_incomplete() {
        let task = ExtractedTask {
            address: "г. Подольск, ул. Кирова, 15".to_string(),
            problem: "ЗАТРУДНЕН ПРОЕЗД".to_string(),
            driver_name: "Иванов И. И.".to_string(),
            ..Default::default()
        };
        assert_eq!(extraction_outcome(&task), ExtractionOutcome::Incomplete);

        let with_photo = ExtractedTask {
            photos: vec![vec![0xFF; 2048]],
            ..task
        };
        assert_eq!(extraction_outcome(&with_photo), ExtractionOutcome::Complete);
    }

    #[test]
    fn photo_less_task_lands_in_the_failure_queue_not_processed() {
        let mut registry: TaskRegistry<&str> = TaskRegistry::new(3, 3600);
        let key = TaskKey::new(Some("48213"), "ул. Кирова, 15");

        settle(&mut registry, key, &ExtractedTask::default());
        assert!(!registry.is_processed(key));
        assert_eq!(registry.pending_len(), 1);

        // photos arrived on a later attempt
        let complete = ExtractedTask {
            photos: vec![vec![1, 2, 3]],
            ..Default::default()
        };
        settle(&mut registry, key, &complete);
        assert!(registry.is_processed(key));
        assert_eq!(registry.pending_len(), 0);
    }

    #[test]
    fn photo_less_task_goes_permanent_after_max_attempts() {
        let mut registry: TaskRegistry<&str> = TaskRegistry::new(3, 3600);
        let key = TaskKey::new(None, "ул. Ленина, 12");
        let task = ExtractedTask::default();

        for _ in 0..2 {
            settle(&mut registry, key, &task);
        }
        assert_eq!(
            registry.record_failure(key, "task", Utc::now()),
            FailureDisposition::Permanent
        );
        assert!(!registry.is_processed(key));
        assert_eq!(registry.pending_len(), 0);
    }
}
