use regex::Regex;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;
use thirtyfour::WebElement;

/// Identity key for deduplication, derived from `(task_id, address)`.
///
/// The task id may be unavailable from the UI, so the address is the
/// practical dedup anchor: two distinct tasks sharing identical address text
/// and no id would collide and one would be skipped (known upstream
/// ambiguity, left as-is).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskKey(u64);

impl TaskKey {
    pub fn new(task_id: Option<&str>, address: &str) -> Self {
        let mut hasher = DefaultHasher::new();
        task_id.hash(&mut hasher);
        address.hash(&mut hasher);
        Self(hasher.finish())
    }
}

/// A task tile discovered on the dispatch page. The element reference may go
/// stale after any page mutation and must then be re-resolved by id.
#[derive(Debug, Clone)]
pub struct DiscoveredTask {
    pub element: WebElement,
    pub address: String,
    pub task_id: Option<String>,
}

impl DiscoveredTask {
    pub fn key(&self) -> TaskKey {
        TaskKey::new(self.task_id.as_deref(), &self.address)
    }
}

/// Structured data pulled from an open task detail modal. Every field is
/// independently optional: an empty field is an extraction gap, not an error.
#[derive(Debug, Clone, Default)]
pub struct ExtractedTask {
    pub task_id: Option<String>,
    pub address: String,
    pub container_type: String,
    pub problem: String,
    pub city_district: String,
    /// District as extracted, before the lookup table was consulted
    pub raw_district: String,
    pub driver_name: String,
    pub vehicle: String,
    /// Decoded photo blobs, capture order preserved
    pub photos: Vec<Vec<u8>>,
}

impl ExtractedTask {
    /// A record without photographic evidence is not accepted as done
    pub fn has_photos(&self) -> bool {
        !self.photos.is_empty()
    }
}

/// Parse a best-effort task id out of an Angular click-handler attribute.
/// Prefers the `openRouteTaskInfo(<id>)` argument, falls back to the first
/// digit run anywhere in the attribute.
pub fn parse_task_id(ng_click: &str) -> Option<String> {
    static OPEN_INFO: OnceLock<Regex> = OnceLock::new();
    static ANY_DIGITS: OnceLock<Regex> = OnceLock::new();

    let open_info =
        OPEN_INFO.get_or_init(|| Regex::new(r"openRouteTaskInfo\((\d+)\)").expect("valid regex"));
    if let Some(captures) = open_info.captures(ng_click) {
        return Some(captures[1].to_string());
    }

    let any_digits = ANY_DIGITS.get_or_init(|| Regex::new(r"(\d+)").expect("valid regex"));
    any_digits
        .captures(ng_click)
        .map(|captures| captures[1].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_id_from_click_handler() {
        assert_eq!(
            parse_task_id("openRouteTaskInfo(48213)"),
            Some("48213".to_string())
        );
        assert_eq!(
            parse_task_id("$event.stopPropagation(); openRouteTaskInfo(7)"),
            Some("7".to_string())
        );
    }

    #[test]
    fn falls_back_to_first_digit_run() {
        assert_eq!(parse_task_id("showTask(991, true)"), Some("991".to_string()));
        assert_eq!(parse_task_id("toggle()"), None);
    }

    #[test]
    fn key_distinguishes_id_and_address() {
        let a = TaskKey::new(Some("1"), "ул. Кирова, 5");
        let b = TaskKey::new(Some("2"), "ул. Кирова, 5");
        let c = TaskKey::new(Some("1"), "ул. Ленина, 12");
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, TaskKey::new(Some("1"), "ул. Кирова, 5"));
    }

    #[test]
    fn missing_id_falls_back_to_address_hash() {
        let a = TaskKey::new(None, "ул. Кирова, 5");
        let b = TaskKey::new(None, "ул. Кирова, 5");
        assert_eq!(a, b);
    }
}
