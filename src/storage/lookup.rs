use std::collections::HashMap;
use tracing::{debug, info};

/// Address -> canonical district table loaded from the lookup worksheet.
///
/// Matching is case-insensitive: exact match first, then substring
/// containment in either direction to tolerate abbreviation differences
/// between the dashboard and the table.
pub struct DistrictLookup {
    entries: HashMap<String, String>,
}

impl DistrictLookup {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn from_rows(rows: Vec<(String, String)>) -> Self {
        let mut entries = HashMap::new();
        for (address, district) in rows {
            let address = normalize(&address);
            let district = district.trim().to_string();
            if !address.is_empty() && !district.is_empty() {
                entries.insert(address, district);
            }
        }
        info!("District lookup table loaded: {} entries", entries.len());
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve an address to its canonical district, if known
    pub fn district_for(&self, address: &str) -> Option<&str> {
        let needle = normalize(address);
        if needle.is_empty() {
            return None;
        }

        if let Some(district) = self.entries.get(&needle) {
            debug!("Lookup exact match for '{}'", address);
            return Some(district);
        }

        for (known, district) in &self.entries {
            if needle.contains(known.as_str()) || known.contains(needle.as_str()) {
                debug!("Lookup substring match for '{}'", address);
                return Some(district);
            }
        }
        None
    }
}

fn normalize(address: &str) -> String {
    address.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> DistrictLookup {
        DistrictLookup::from_rows(vec![
            (
                "г. Подольск, ул. Кирова, 15".to_string(),
                "г.о. Подольск".to_string(),
            ),
            ("Чехов, ул. Мира, 7".to_string(), "г.о. Чехов".to_string()),
        ])
    }

    #[test]
    fn exact_match_ignores_case_and_whitespace() {
        let lookup = table();
        assert_eq!(
            lookup.district_for("  Г. ПОДОЛЬСК, УЛ. КИРОВА, 15 "),
            Some("г.о. Подольск")
        );
    }

    #[test]
    fn substring_match_works_both_directions() {
        let lookup = table();
        // queried address is longer than the table entry
        assert_eq!(
            lookup.district_for("Московская обл, Чехов, ул. Мира, 7, площадка 2"),
            Some("г.о. Чехов")
        );
        // queried address is a fragment of the table entry
        assert_eq!(lookup.district_for("ул. Кирова, 15"), Some("г.о. Подольск"));
    }

    #[test]
    fn unknown_address_misses() {
        let lookup = table();
        assert_eq!(lookup.district_for("г. Серпухов, ул. Новая, 1"), None);
        assert_eq!(lookup.district_for(""), None);
    }

    #[test]
    fn blank_rows_are_skipped() {
        let lookup = DistrictLookup::from_rows(vec![
            ("".to_string(), "г.о. Чехов".to_string()),
            ("ул. Мира, 7".to_string(), "".to_string()),
        ]);
        assert!(lookup.is_empty());
    }
}
