use anyhow::{Context, Result};
use reqwest::multipart;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

use crate::monitor::task::ExtractedTask;

const API_BASE: &str = "https://api.telegram.org";

/// Bot API hard limit on photo captions
const MAX_CAPTION_CHARS: usize = 1024;

/// Standard Bot API envelope
#[derive(Debug, Deserialize)]
struct TelegramApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Message {
    message_id: i64,
}

/// Telegram Bot API client. One bot serves every district chat; the chat id
/// is chosen per send by the router.
pub struct TelegramClient {
    client: reqwest::Client,
    api_base: String,
    token: String,
}

impl TelegramClient {
    pub fn new(token: &str) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .context("Failed to build HTTP client")?,
            api_base: API_BASE.to_string(),
            token: token.to_string(),
        })
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    /// Send an HTML-formatted text message
    pub async fn send_message(&self, chat_id: &str, text: &str) -> Result<()> {
        let body = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "HTML",
        });

        let response = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&body)
            .send()
            .await
            .context("Failed to call sendMessage")?;
        self.check_response::<Message>(response, "sendMessage").await
    }

    /// Send a single photo with an HTML caption
    pub async fn send_photo(&self, chat_id: &str, photo: Vec<u8>, caption: &str) -> Result<()> {
        let part = multipart::Part::bytes(photo)
            .file_name("photo.jpg")
            .mime_str("image/jpeg")
            .context("Failed to build the photo part")?;
        let form = multipart::Form::new()
            .text("chat_id", chat_id.to_string())
            .text("caption", truncate_caption(caption).to_string())
            .text("parse_mode", "HTML")
            .part("photo", part);

        let response = self
            .client
            .post(self.api_url("sendPhoto"))
            .multipart(form)
            .send()
            .await
            .context("Failed to call sendPhoto")?;
        self.check_response::<Message>(response, "sendPhoto").await
    }

    /// Send up to ten photos as one album; the caption rides on the first
    /// photo, which is how Telegram displays album captions
    pub async fn send_media_group(
        &self,
        chat_id: &str,
        photos: Vec<Vec<u8>>,
        caption: &str,
    ) -> Result<()> {
        let photos: Vec<Vec<u8>> = photos.into_iter().take(10).collect();

        let mut media = Vec::new();
        for (i, _) in photos.iter().enumerate() {
            let mut item = json!({
                "type": "photo",
                "media": format!("attach://photo_{}", i),
            });
            if i == 0 {
                item["caption"] = json!(truncate_caption(caption));
                item["parse_mode"] = json!("HTML");
            }
            media.push(item);
        }

        let mut form = multipart::Form::new()
            .text("chat_id", chat_id.to_string())
            .text("media", serde_json::to_string(&media)?);
        for (i, photo) in photos.into_iter().enumerate() {
            let part = multipart::Part::bytes(photo)
                .file_name(format!("photo_{}.jpg", i))
                .mime_str("image/jpeg")
                .context("Failed to build a media group part")?;
            form = form.part(format!("photo_{}", i), part);
        }

        let response = self
            .client
            .post(self.api_url("sendMediaGroup"))
            .multipart(form)
            .send()
            .await
            .context("Failed to call sendMediaGroup")?;
        self.check_response::<Vec<Message>>(response, "sendMediaGroup")
            .await
    }

    async fn check_response<T: for<'de> Deserialize<'de>>(
        &self,
        response: reqwest::Response,
        method: &str,
    ) -> Result<()> {
        let status = response.status();
        let parsed: TelegramApiResponse<T> = response
            .json()
            .await
            .context(format!("Failed to parse the {} response", method))?;

        if parsed.ok && parsed.result.is_some() {
            debug!("Telegram {} delivered", method);
            Ok(())
        } else {
            let description = parsed
                .description
                .unwrap_or_else(|| format!("status {}", status));
            warn!("Telegram {} rejected: {}", method, description);
            anyhow::bail!("Telegram {} failed: {}", method, description)
        }
    }
}

/// Cut a caption down to the Bot API limit without splitting a character
fn truncate_caption(caption: &str) -> &str {
    match caption.char_indices().nth(MAX_CAPTION_CHARS) {
        Some((index, _)) => &caption[..index],
        None => caption,
    }
}

/// Render the per-task notification text
pub fn format_task_message(task: &ExtractedTask) -> String {
    let mut lines = vec!["🗑 <b>ПРОБЛЕМА НА МАРШРУТЕ</b>".to_string(), String::new()];

    if !task.address.is_empty() {
        lines.push(format!("📍 <b>Адрес:</b> {}", task.address));
    }
    if !task.container_type.is_empty() {
        lines.push(format!("🪣 <b>Тип отходов:</b> {}", task.container_type));
    }
    if !task.problem.is_empty() {
        lines.push(format!("⚠️ <b>Проблема:</b> {}", task.problem));
    }
    if !task.city_district.is_empty() {
        lines.push(format!("🏙 <b>Округ:</b> {}", task.city_district));
    }
    if !task.driver_name.is_empty() {
        lines.push(format!("👤 <b>Водитель:</b> {}", task.driver_name));
    }
    if !task.vehicle.is_empty() {
        lines.push(format!("🚛 <b>Машина:</b> {}", task.vehicle));
    }
    if task.has_photos() {
        lines.push(format!("📷 <b>Фото:</b> {} шт.", task.photos.len()));
    }
    lines.push(String::new());
    lines.push(format!(
        "🕐 <i>{}</i>",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    ));

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(base: &str) -> TelegramClient {
        TelegramClient {
            client: reqwest::Client::new(),
            api_base: base.to_string(),
            token: "123:abc".to_string(),
        }
    }

    fn ok_message() -> serde_json::Value {
        serde_json::json!({"ok": true, "result": {"message_id": 42}})
    }

    #[tokio::test]
    async fn message_send_hits_the_bot_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bot123:abc/sendMessage"))
            .and(body_partial_json(serde_json::json!({
                "chat_id": "-100111",
                "parse_mode": "HTML",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_message()))
            .expect(1)
            .mount(&server)
            .await;

        let result = client(&server.uri())
            .send_message("-100111", "<b>привет</b>")
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn api_rejection_surfaces_the_description() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "ok": false,
                "description": "Bad Request: chat not found"
            })))
            .mount(&server)
            .await;

        let error = client(&server.uri())
            .send_message("-1", "text")
            .await
            .unwrap_err();
        assert!(error.to_string().contains("chat not found"));
    }

    #[tokio::test]
    async fn photo_send_uses_multipart() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bot123:abc/sendPhoto"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_message()))
            .expect(1)
            .mount(&server)
            .await;

        let result = client(&server.uri())
            .send_photo("-100111", vec![0xFF, 0xD8, 0xFF], "подпись")
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn media_group_sends_all_parts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bot123:abc/sendMediaGroup"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": true,
                "result": [{"message_id": 1}, {"message_id": 2}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let result = client(&server.uri())
            .send_media_group("-100111", vec![vec![1], vec![2]], "подпись")
            .await;
        assert!(result.is_ok());
    }

    #[test]
    fn task_message_includes_present_fields_only() {
        let task = ExtractedTask {
            address: "г. Подольск, ул. Кирова, 15".to_string(),
            problem: "ЗАТРУДНЕН ПРОЕЗД".to_string(),
            driver_name: "Иванов И. И.".to_string(),
            ..Default::default()
        };
        let text = format_task_message(&task);
        assert!(text.contains("ПРОБЛЕМА НА МАРШРУТЕ"));
        assert!(text.contains("📍 <b>Адрес:</b> г. Подольск, ул. Кирова, 15"));
        assert!(text.contains("ЗАТРУДНЕН ПРОЕЗД"));
        assert!(!text.contains("Машина"));
        assert!(!text.contains("Округ"));
    }

    #[test]
    fn photo_count_rides_along_when_photos_exist() {
        let task = ExtractedTask {
            photos: vec![vec![1], vec![2], vec![3]],
            ..Default::default()
        };
        assert!(format_task_message(&task).contains("📷 <b>Фото:</b> 3 шт."));
    }

    #[test]
    fn caption_truncation_respects_char_boundaries() {
        let caption = "я".repeat(2000);
        let truncated = truncate_caption(&caption);
        assert_eq!(truncated.chars().count(), 1024);
        assert_eq!(truncate_caption("короткая"), "короткая");
    }
}
