use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};

use crate::monitor::router::ChannelKey;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Accumulates per-driver problem counts between reporting windows.
///
/// Mutated only by successfully-routed sends; read and cleared atomically by
/// the periodic flush. BTreeMaps keep the report line order stable.
pub struct ReportAggregator {
    /// channel -> (driver, vehicle) -> problem -> count
    stats: HashMap<ChannelKey, BTreeMap<(String, String), BTreeMap<String, u32>>>,
    window_start: DateTime<Utc>,
}

impl ReportAggregator {
    pub fn new(window_start: DateTime<Utc>) -> Self {
        Self {
            stats: HashMap::new(),
            window_start,
        }
    }

    pub fn window_start(&self) -> DateTime<Utc> {
        self.window_start
    }

    /// Count one routed task against its chat's report
    pub fn record(&mut self, channel: ChannelKey, driver: &str, vehicle: &str, problem: &str) {
        let driver = if driver.is_empty() { "Неизвестно" } else { driver };
        let vehicle = if vehicle.is_empty() { "Неизвестно" } else { vehicle };
        let problem = if problem.is_empty() { "Не указана" } else { problem };

        *self
            .stats
            .entry(channel)
            .or_default()
            .entry((driver.to_string(), vehicle.to_string()))
            .or_default()
            .entry(problem.to_string())
            .or_insert(0) += 1;
    }

    /// Produce one report text per given channel and reset the window.
    ///
    /// A channel with nothing recorded still gets an explicit
    /// "nothing processed" notice so downstream consumers see liveness.
    pub fn flush(&mut self, now: DateTime<Utc>, channels: &[ChannelKey]) -> Vec<(ChannelKey, String)> {
        let header = format!(
            "<b>📊 ОТЧЁТ ЗА ПЕРИОД</b>\n\n<i>{} – {}</i>",
            self.window_start.format(TIME_FORMAT),
            now.format(TIME_FORMAT)
        );

        let mut reports = Vec::new();
        for channel in channels {
            let text = match self.stats.get(channel) {
                Some(per_driver) if !per_driver.is_empty() => {
                    let mut lines = vec![header.clone(), String::new()];
                    for ((driver, vehicle), problems) in per_driver {
                        lines.push(format!("<b>{}</b> ({}):", driver, vehicle));
                        for (problem, count) in problems {
                            lines.push(format!("  • {}: {}", problem, count));
                        }
                        lines.push(String::new());
                    }
                    lines.join("\n")
                }
                _ => format!(
                    "{}\n\nЗа указанный период не было обработано ни одного задания.",
                    header
                ),
            };
            reports.push((*channel, text));
        }

        self.stats.clear();
        self.window_start = now;
        reports
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: &[ChannelKey] = &[ChannelKey::Podolsk, ChannelKey::Chekhov, ChannelKey::South];

    #[test]
    fn empty_window_still_reports_to_every_channel() {
        let mut aggregator = ReportAggregator::new(Utc::now());
        let reports = aggregator.flush(Utc::now(), ALL);
        assert_eq!(reports.len(), 3);
        for (_, text) in &reports {
            assert!(!text.is_empty());
            assert!(text.contains("не было обработано"));
        }
    }

    #[test]
    fn recorded_events_show_up_with_counts() {
        let mut aggregator = ReportAggregator::new(Utc::now());
        aggregator.record(ChannelKey::Podolsk, "Иванов И. И.", "А123БВ50", "ЗАТРУДНЕН ПРОЕЗД");
        aggregator.record(ChannelKey::Podolsk, "Иванов И. И.", "А123БВ50", "ЗАТРУДНЕН ПРОЕЗД");
        aggregator.record(ChannelKey::Podolsk, "Иванов И. И.", "А123БВ50", "НЕТ ТАРЫ");

        let reports = aggregator.flush(Utc::now(), &[ChannelKey::Podolsk]);
        let text = &reports[0].1;
        assert!(text.contains("<b>Иванов И. И.</b> (А123БВ50):"));
        assert!(text.contains("ЗАТРУДНЕН ПРОЕЗД: 2"));
        assert!(text.contains("НЕТ ТАРЫ: 1"));
    }

    #[test]
    fn flush_resets_counts_and_window() {
        let start = Utc::now();
        let mut aggregator = ReportAggregator::new(start);
        aggregator.record(ChannelKey::South, "Петров П. П.", "В456ГД77", "ПЕРЕПОЛНЕНИЕ");

        let flush_time = Utc::now();
        aggregator.flush(flush_time, ALL);
        assert_eq!(aggregator.window_start(), flush_time);

        let reports = aggregator.flush(Utc::now(), &[ChannelKey::South]);
        assert!(reports[0].1.contains("не было обработано"));
    }

    #[test]
    fn channels_do_not_share_counts() {
        let mut aggregator = ReportAggregator::new(Utc::now());
        aggregator.record(ChannelKey::Chekhov, "Сидоров С. С.", "Е789ЖЗ90", "НЕТ ПОДЪЕЗДА");

        let reports = aggregator.flush(Utc::now(), ALL);
        let chekhov = reports.iter().find(|(c, _)| *c == ChannelKey::Chekhov).unwrap();
        let podolsk = reports.iter().find(|(c, _)| *c == ChannelKey::Podolsk).unwrap();
        assert!(chekhov.1.contains("Сидоров С. С."));
        assert!(podolsk.1.contains("не было обработано"));
    }

    #[test]
    fn empty_fields_fall_back_to_placeholders() {
        let mut aggregator = ReportAggregator::new(Utc::now());
        aggregator.record(ChannelKey::Podolsk, "", "", "");
        let reports = aggregator.flush(Utc::now(), &[ChannelKey::Podolsk]);
        assert!(reports[0].1.contains("<b>Неизвестно</b> (Неизвестно):"));
        assert!(reports[0].1.contains("Не указана: 1"));
    }
}
