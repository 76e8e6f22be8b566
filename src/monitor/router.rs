use tracing::{info, warn};

use crate::cli::config::TelegramSettings;

/// District cluster a chat is associated with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChannelKey {
    Podolsk,
    Chekhov,
    South,
}

impl ChannelKey {
    pub fn label(self) -> &'static str {
        match self {
            ChannelKey::Podolsk => "podolsk",
            ChannelKey::Chekhov => "chekhov",
            ChannelKey::South => "south",
        }
    }
}

/// Keyword -> channel mappings, checked in this fixed priority order
const DISTRICT_KEYWORDS: &[(&str, ChannelKey)] = &[
    ("подольск", ChannelKey::Podolsk),
    ("чехов", ChannelKey::Chekhov),
    ("серпухов", ChannelKey::South),
    ("пущино", ChannelKey::South),
    ("протвино", ChannelKey::South),
];

/// Marker for an unclassified district; broadcast to every configured chat
const NOT_APPLICABLE: &str = "н/д";

/// Maps a free-text district string to zero, one, or all configured chats.
///
/// Best-effort classification over an unnormalized upstream field; the
/// address lookup table is consulted upstream to bias the district toward a
/// canonical value before it reaches here.
pub struct DistrictRouter {
    chats: Vec<(ChannelKey, String)>,
}

impl DistrictRouter {
    pub fn new(settings: &TelegramSettings) -> Self {
        let mut chats = Vec::new();
        for (key, chat_id) in [
            (ChannelKey::Podolsk, &settings.chat_podolsk),
            (ChannelKey::Chekhov, &settings.chat_chekhov),
            (ChannelKey::South, &settings.chat_south),
        ] {
            if !chat_id.is_empty() {
                chats.push((key, chat_id.clone()));
            }
        }
        if chats.is_empty() {
            warn!("No Telegram chats configured, routing will drop every task");
        }
        Self { chats }
    }

    /// All configured chats, in fixed order
    pub fn all_chats(&self) -> &[(ChannelKey, String)] {
        &self.chats
    }

    pub fn is_empty(&self) -> bool {
        self.chats.is_empty()
    }

    /// Resolve a district string to target chats.
    ///
    /// Empty -> none; the not-applicable marker -> every configured chat;
    /// otherwise first keyword match wins, or none if nothing matches or the
    /// matched chat is unconfigured.
    pub fn route(&self, district: &str) -> Vec<(ChannelKey, String)> {
        if district.trim().is_empty() {
            warn!("District not determined, task will not be routed");
            return Vec::new();
        }

        let district_lower = district.to_lowercase();

        if district_lower.contains(NOT_APPLICABLE) {
            info!("Not-applicable district marker, broadcasting to all chats");
            return self.chats.clone();
        }

        for (keyword, key) in DISTRICT_KEYWORDS {
            if district_lower.contains(keyword) {
                if let Some(chat) = self.chats.iter().find(|(k, _)| k == key) {
                    return vec![chat.clone()];
                }
                warn!("Chat for district '{}' is not configured, dropping", district);
                return Vec::new();
            }
        }

        warn!("District '{}' not recognized, task will not be routed", district);
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> TelegramSettings {
        TelegramSettings {
            token: "token".to_string(),
            chat_podolsk: "-100111".to_string(),
            chat_chekhov: "-100222".to_string(),
            chat_south: "-100333".to_string(),
            send_media_group: true,
        }
    }

    #[test]
    fn empty_district_routes_nowhere() {
        let router = DistrictRouter::new(&settings());
        assert!(router.route("").is_empty());
        assert!(router.route("   ").is_empty());
    }

    #[test]
    fn not_applicable_broadcasts_to_all_configured_chats() {
        let router = DistrictRouter::new(&settings());
        let chats = router.route("нет данных Н/Д");
        assert_eq!(chats.len(), 3);
        let ids: Vec<&str> = chats.iter().map(|(_, id)| id.as_str()).collect();
        assert_eq!(ids, vec!["-100111", "-100222", "-100333"]);
    }

    #[test]
    fn keyword_match_routes_to_single_chat() {
        let router = DistrictRouter::new(&settings());
        let chats = router.route("г.о. Подольск");
        assert_eq!(chats.len(), 1);
        assert_eq!(chats[0].0, ChannelKey::Podolsk);
        assert_eq!(chats[0].1, "-100111");
    }

    #[test]
    fn south_cluster_keywords_share_one_chat() {
        let router = DistrictRouter::new(&settings());
        for district in ["г.о. Серпухов", "Пущино", "городской округ Протвино"] {
            let chats = router.route(district);
            assert_eq!(chats.len(), 1, "district: {}", district);
            assert_eq!(chats[0].0, ChannelKey::South);
        }
    }

    #[test]
    fn unrecognized_district_routes_nowhere() {
        let router = DistrictRouter::new(&settings());
        assert!(router.route("неизвестный округ").is_empty());
    }

    #[test]
    fn matched_but_unconfigured_chat_routes_nowhere() {
        let mut s = settings();
        s.chat_chekhov = String::new();
        let router = DistrictRouter::new(&s);
        assert!(router.route("г.о. Чехов").is_empty());
    }

    #[test]
    fn broadcast_skips_unconfigured_chats() {
        let mut s = settings();
        s.chat_south = String::new();
        let router = DistrictRouter::new(&s);
        let chats = router.route("Н/Д");
        assert_eq!(chats.len(), 2);
    }
}
