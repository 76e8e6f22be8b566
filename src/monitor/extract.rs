use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

use crate::browser::session::BrowserSession;
use crate::monitor::stats::RunStats;
use crate::monitor::task::ExtractedTask;

/// Decoded blobs below this size are 1x1 placeholders or broken images,
/// not real photos
const MIN_PHOTO_BYTES: usize = 1024;

/// Problem-note selector cascade, tried top-down (bool = XPath)
const PROBLEM_SELECTORS: &[(&str, bool)] = &[
    ("span.alert.ng-binding.ng-scope", false),
    ("span.alert", false),
    ("span.text-danger", false),
    ("//span[contains(text(), 'Затруднен')]", true),
    ("//span[contains(text(), 'проблем')]", true),
];

/// Rasterize every task photo to a canvas and hand back base64 JPEG data
/// URLs. The dashboard serves photos through an authenticated endpoint, so
/// reading pixels back out of the rendered page is the only reliable path.
const CANVAS_CAPTURE_SCRIPT: &str = r#"
var images = document.getElementsByTagName('img');
var imageData = [];
for (var i = 0; i < images.length; i++) {
    var img = images[i];
    if (img.src && img.src.includes('routeTaskFileInfo')) {
        try {
            var canvas = document.createElement('canvas');
            var ctx = canvas.getContext('2d');
            canvas.width = img.naturalWidth;
            canvas.height = img.naturalHeight;
            ctx.drawImage(img, 0, 0);
            var dataUrl = canvas.toDataURL('image/jpeg');
            imageData.push(dataUrl);
        } catch(e) {}
    }
}
return imageData;
"#;

fn plate_regexes() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            Regex::new(r"[А-Я]\d{3}[А-Я]{2}\d{2,3}").expect("valid regex"),
            Regex::new(r"[А-Я]\d{3}[А-Я]\d{2,3}").expect("valid regex"),
        ]
    })
}

fn name_regexes() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            Regex::new(r"[А-Я][а-яё]+ [А-Я]\. [А-Я]\.").expect("valid regex"),
            Regex::new(r"[А-Я][а-яё]+ [А-Я]\.[А-Я]\.").expect("valid regex"),
        ]
    })
}

fn slash_name_regex() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[А-Я][а-яё]+ [А-Я]\. ?[А-Я]\.").expect("valid regex"))
}

/// Pulls structured fields and photo bytes out of an open task detail modal.
///
/// Pure read: never fails, issues no retries. A field that cannot be found is
/// left empty with a warning; the caller decides what an incomplete record
/// means.
pub struct Extractor;

impl Extractor {
    pub fn new() -> Self {
        Self
    }

    pub async fn extract(
        &self,
        session: &BrowserSession,
        photos_dir: Option<&Path>,
        stats: &mut RunStats,
    ) -> ExtractedTask {
        let mut task = ExtractedTask::default();

        self.extract_address(session, &mut task).await;
        self.extract_container_type(session, &mut task).await;
        self.extract_problem(session, &mut task).await;
        self.extract_district(session, &mut task).await;
        self.extract_driver_and_vehicle(session, &mut task).await;
        self.extract_photos(session, photos_dir, stats, &mut task).await;

        info!(
            "Extracted task: address='{}', district='{}', driver='{}', vehicle='{}', photos={}",
            task.address,
            task.city_district,
            task.driver_name,
            task.vehicle,
            task.photos.len()
        );
        task
    }

    async fn extract_address(&self, session: &BrowserSession, task: &mut ExtractedTask) {
        match session.find_all_css("td.info.ng-binding").await {
            Ok(elements) => {
                for element in elements {
                    let text = element.text().await.unwrap_or_default();
                    if let Some(address) = accept_address(&text) {
                        task.address = address;
                        return;
                    }
                }
                warn!("Address not found in the detail modal");
            }
            Err(e) => warn!("Failed to extract address: {}", e),
        }
    }

    async fn extract_container_type(&self, session: &BrowserSession, task: &mut ExtractedTask) {
        if let Ok(elements) = session.find_all_css("span.wm-garbage-type.ng-binding").await {
            if let Some(first) = elements.first() {
                task.container_type = first.text().await.unwrap_or_default().trim().to_string();
            }
        }

        // A bold span narrows the garbage type down, e.g. "Бункер (ТБО)"
        if let Ok(elements) = session
            .find_all_css("span[style*='font-weight: bold']")
            .await
        {
            for element in elements {
                let text = element.text().await.unwrap_or_default().trim().to_string();
                if !text.is_empty() {
                    task.container_type = if task.container_type.is_empty() {
                        text
                    } else {
                        format!("{} ({})", text, task.container_type)
                    };
                    break;
                }
            }
        }

        if task.container_type.is_empty() {
            if let Ok(source) = session.page_source().await {
                if source.contains("ТБО") {
                    task.container_type = "ТБО".to_string();
                }
            }
        }
    }

    async fn extract_problem(&self, session: &BrowserSession, task: &mut ExtractedTask) {
        for (selector, is_xpath) in PROBLEM_SELECTORS {
            let elements = if *is_xpath {
                session.find_all_xpath(selector).await
            } else {
                session.find_all_css(selector).await
            };
            let Ok(elements) = elements else { continue };

            for element in elements {
                let text = element.text().await.unwrap_or_default();
                let trimmed = text.trim();
                if trimmed.chars().count() > 3 {
                    task.problem = normalize_problem(trimmed);
                    return;
                }
            }
        }
        warn!("Problem note not found in the detail modal");
    }

    async fn extract_district(&self, session: &BrowserSession, task: &mut ExtractedTask) {
        let xpath = "//*[contains(text(), 'Подольск') or contains(text(), 'округ') \
                     or contains(text(), 'Московская')]";
        if let Ok(elements) = session.find_all_xpath(xpath).await {
            for element in elements {
                let text = element.text().await.unwrap_or_default().trim().to_string();
                let len = text.chars().count();
                if len > 3 && len < 50 {
                    task.city_district = text;
                    break;
                }
            }
        }

        if task.city_district.is_empty() {
            if let Some(district) = district_from_address(&task.address) {
                debug!("District recovered from the address string");
                task.city_district = district;
            }
        }

        task.raw_district = task.city_district.clone();
    }

    async fn extract_driver_and_vehicle(&self, session: &BrowserSession, task: &mut ExtractedTask) {
        if let Ok(elements) = session.find_all_xpath("//*[contains(text(), '/')]").await {
            for element in elements {
                let text = element.text().await.unwrap_or_default();
                if let Some((vehicle, driver)) = parse_driver_vehicle(&text) {
                    task.vehicle = vehicle;
                    task.driver_name = driver;
                    debug!("Found driver/vehicle in a slash-delimited node");
                    break;
                }
            }
        }

        // Independent whole-page fallback per field
        if task.vehicle.is_empty() || task.driver_name.is_empty() {
            let source = session.page_source().await.unwrap_or_default();
            if task.vehicle.is_empty() {
                if let Some(plate) = find_plate(&source) {
                    task.vehicle = plate;
                }
            }
            if task.driver_name.is_empty() {
                if let Some(name) = find_driver_name(&source) {
                    task.driver_name = name;
                }
            }
        }

        if task.vehicle.is_empty() {
            warn!("Vehicle plate not found");
        }
        if task.driver_name.is_empty() {
            warn!("Driver name not found");
        }
    }

    async fn extract_photos(
        &self,
        session: &BrowserSession,
        photos_dir: Option<&Path>,
        stats: &mut RunStats,
        task: &mut ExtractedTask,
    ) {
        let data_urls: Vec<String> = match session
            .execute_script(CANVAS_CAPTURE_SCRIPT)
            .await
        {
            Ok(urls) => urls,
            Err(e) => {
                warn!("Canvas photo capture failed: {}", e);
                return;
            }
        };

        if data_urls.is_empty() {
            info!("No task photos found on the page");
            return;
        }

        debug!("Canvas capture returned {} images", data_urls.len());
        let (accepted, discarded) = screen_photos(&data_urls);
        if discarded > 0 {
            warn!("{} captured photos were invalid or too small, discarded", discarded);
        }
        stats.photos_captured += accepted.len() as u64;
        stats.photos_failed += discarded as u64;

        if let Some(dir) = photos_dir {
            for (i, bytes) in accepted.iter().enumerate() {
                save_photo(dir, i, bytes);
            }
        }
        task.photos = accepted;
    }
}

/// Decode captured data URLs into photo blobs, dropping anything that fails
/// to decode or falls under the minimum size. Returns the kept blobs in
/// capture order and the discard count.
fn screen_photos(data_urls: &[String]) -> (Vec<Vec<u8>>, usize) {
    let mut accepted = Vec::new();
    let mut discarded = 0;
    for data_url in data_urls {
        match decode_photo(data_url) {
            Some(bytes) if bytes.len() >= MIN_PHOTO_BYTES => accepted.push(bytes),
            Some(_) | None => discarded += 1,
        }
    }
    (accepted, discarded)
}

/// Accept a table cell as the task address: long enough and comma-separated
fn accept_address(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.chars().count() > 10 && trimmed.contains(',') {
        Some(trimmed.to_string())
    } else {
        None
    }
}

/// First line only, dispatcher name tokens stripped, upper-cased
fn normalize_problem(text: &str) -> String {
    let first_line = text.lines().next().unwrap_or("").trim();
    let cleaned = if first_line.contains("Асланов") || first_line.contains("И. Х.") {
        first_line
            .split(' ')
            .filter(|part| !["Асланов", "И.", "Х."].iter().any(|name| part.contains(name)))
            .collect::<Vec<_>>()
            .join(" ")
    } else {
        first_line.to_string()
    };
    cleaned.to_uppercase()
}

/// Fallback: parse the district out of the address string itself
fn district_from_address(address: &str) -> Option<String> {
    let parts: Vec<&str> = address.split(',').collect();
    if parts.len() <= 2 {
        return None;
    }
    parts
        .iter()
        .find(|part| part.contains("округ") || part.contains("Подольск"))
        .map(|part| part.trim().to_string())
}

/// Parse a slash-delimited "vehicle / driver" text node.
/// Returns `(vehicle, driver)` only when a plate pattern is present.
fn parse_driver_vehicle(text: &str) -> Option<(String, String)> {
    let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if !normalized.contains('/') {
        return None;
    }
    if !plate_regexes().iter().any(|re| re.is_match(&normalized)) {
        return None;
    }

    let parts: Vec<&str> = normalized.split('/').collect();
    if parts.len() != 2 {
        return None;
    }
    let vehicle_part = parts[0].trim();
    let driver_part = parts[1].trim();

    let vehicle = plate_regexes()
        .iter()
        .find_map(|re| re.find(vehicle_part))
        .map(|m| m.as_str().to_string())
        .or_else(|| vehicle_part.split(' ').next().map(str::to_string))
        .unwrap_or_default();

    let driver = slash_name_regex()
        .find(driver_part)
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| {
            let words: Vec<&str> = driver_part.split(' ').collect();
            if words.len() >= 3 {
                words[..3].join(" ")
            } else {
                driver_part.to_string()
            }
        });

    Some((vehicle, driver))
}

fn find_plate(text: &str) -> Option<String> {
    plate_regexes()
        .iter()
        .find_map(|re| re.find(text))
        .map(|m| m.as_str().to_string())
}

fn find_driver_name(text: &str) -> Option<String> {
    name_regexes()
        .iter()
        .find_map(|re| re.find(text))
        .map(|m| m.as_str().to_string())
}

/// Decode a canvas data URL into raw JPEG bytes
fn decode_photo(data_url: &str) -> Option<Vec<u8>> {
    let (_, payload) = data_url.split_once(',')?;
    BASE64.decode(payload).ok()
}

fn save_photo(dir: &Path, index: usize, bytes: &[u8]) {
    let filename = format!(
        "canvas_{}_{}.jpg",
        Utc::now().format("%Y%m%d_%H%M%S"),
        index
    );
    let path = dir.join(filename);
    if let Err(e) = std::fs::write(&path, bytes) {
        warn!("Failed to save photo to {}: {}", path.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_requires_length_and_comma() {
        assert_eq!(
            accept_address("  г. Подольск, ул. Кирова, 15  "),
            Some("г. Подольск, ул. Кирова, 15".to_string())
        );
        assert_eq!(accept_address("короткий"), None);
        assert_eq!(accept_address("длинная строка без запятой вовсе"), None);
    }

    #[test]
    fn problem_takes_first_line_upper_cased() {
        assert_eq!(
            normalize_problem("Затруднен проезд к площадке\nвторая строка"),
            "ЗАТРУДНЕН ПРОЕЗД К ПЛОЩАДКЕ"
        );
    }

    #[test]
    fn problem_strips_dispatcher_name_tokens() {
        let normalized = normalize_problem("Асланов И. Х. Затруднен проезд");
        assert!(!normalized.contains("АСЛАНОВ"));
        assert!(normalized.contains("ЗАТРУДНЕН ПРОЕЗД"));
    }

    #[test]
    fn district_recovered_from_address_tail() {
        assert_eq!(
            district_from_address("Московская обл, г.о. Подольск, ул. Кирова, 15"),
            Some("г.о. Подольск".to_string())
        );
        assert_eq!(district_from_address("ул. Кирова, 15"), None);
    }

    #[test]
    fn slash_delimited_driver_vehicle_parses() {
        let (vehicle, driver) =
            parse_driver_vehicle("МАЗ А123БВ50 / Иванов И. И. (бригада 2)").unwrap();
        assert_eq!(vehicle, "А123БВ50");
        assert_eq!(driver, "Иванов И. И.");
    }

    #[test]
    fn slash_text_without_plate_is_rejected() {
        assert!(parse_driver_vehicle("до 15/30 кубов").is_none());
    }

    #[test]
    fn short_plate_variant_matches() {
        let (vehicle, _) = parse_driver_vehicle("К456ТУ123 / Петров П. П.").unwrap();
        assert_eq!(vehicle, "К456ТУ123");
    }

    #[test]
    fn driver_without_initials_pattern_takes_three_words() {
        let (_, driver) =
            parse_driver_vehicle("А123БВ50 / Иванов Иван Иванович стажер").unwrap();
        assert_eq!(driver, "Иванов Иван Иванович");
    }

    #[test]
    fn page_wide_fallbacks_find_each_field() {
        let source = "<div>машина А777АА77 закреплена</div><span>Сидоров С. С.</span>";
        assert_eq!(find_plate(source), Some("А777АА77".to_string()));
        assert_eq!(find_driver_name(source), Some("Сидоров С. С.".to_string()));
    }

    #[test]
    fn screening_keeps_real_photos_and_counts_discards() {
        let real = format!("data:image/jpeg;base64,{}", BASE64.encode(vec![0xFF; 2048]));
        let placeholder = format!("data:image/jpeg;base64,{}", BASE64.encode(b"tiny"));
        let urls = vec![real, "garbage".to_string(), placeholder];

        let (accepted, discarded) = screen_photos(&urls);
        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].len(), 2048);
        assert_eq!(discarded, 2);
    }

    #[test]
    fn screening_an_empty_capture_discards_nothing() {
        let (accepted, discarded) = screen_photos(&[]);
        assert!(accepted.is_empty());
        assert_eq!(discarded, 0);
    }

    #[test]
    fn photo_decoding_handles_data_urls() {
        let payload = BASE64.encode(b"jpegbytes");
        let data_url = format!("data:image/jpeg;base64,{}", payload);
        assert_eq!(decode_photo(&data_url), Some(b"jpegbytes".to_vec()));
        assert_eq!(decode_photo("no-comma-here"), None);
    }
}
