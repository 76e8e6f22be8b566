use anyhow::{anyhow, Context, Result};
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const API_BASE: &str = "https://sheets.googleapis.com";
const APPEND_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<String>>,
}

/// Google Sheets REST client for the results spreadsheet.
///
/// Appends go to the first worksheet; the lookup table is read from a named
/// worksheet once at startup. Auth is a caller-supplied OAuth bearer token.
pub struct SheetsClient {
    client: reqwest::Client,
    api_base: String,
    spreadsheet_id: String,
    access_token: String,
    backoff: Duration,
}

impl SheetsClient {
    pub fn new(sheet_url: &str, access_token: &str) -> Result<Self> {
        let spreadsheet_id = extract_spreadsheet_id(sheet_url)
            .ok_or_else(|| anyhow!("Cannot extract a spreadsheet id from: {}", sheet_url))?;
        info!("Google Sheets configured, spreadsheet id: {}", spreadsheet_id);

        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .context("Failed to build HTTP client")?,
            api_base: API_BASE.to_string(),
            spreadsheet_id,
            access_token: access_token.to_string(),
            backoff: RETRY_BACKOFF,
        })
    }

    /// Append one row to the results worksheet, retrying transient failures
    pub async fn append_row(&self, row: &[String]) -> Result<()> {
        let url = format!(
            "{}/v4/spreadsheets/{}/values/A:Z:append?valueInputOption=USER_ENTERED",
            self.api_base, self.spreadsheet_id
        );
        let body = json!({ "values": [row] });

        let mut last_error = None;
        for attempt in 1..=APPEND_ATTEMPTS {
            let result = self
                .client
                .post(&url)
                .bearer_auth(&self.access_token)
                .json(&body)
                .send()
                .await;

            match result {
                Ok(response) if response.status().is_success() => {
                    debug!("Row appended to the spreadsheet");
                    return Ok(());
                }
                Ok(response) => {
                    let status = response.status();
                    let text = response.text().await.unwrap_or_default();
                    warn!(
                        "Sheets append attempt {}/{} failed: {} {}",
                        attempt, APPEND_ATTEMPTS, status, text
                    );
                    last_error = Some(anyhow!("Sheets API returned {}", status));
                }
                Err(e) => {
                    warn!(
                        "Sheets append attempt {}/{} failed: {}",
                        attempt, APPEND_ATTEMPTS, e
                    );
                    last_error = Some(e.into());
                }
            }

            if attempt < APPEND_ATTEMPTS {
                tokio::time::sleep(self.backoff).await;
            }
        }

        let error = last_error.unwrap_or_else(|| anyhow!("Sheets append failed"));
        error!("Giving up on the spreadsheet append: {}", error);
        Err(error)
    }

    /// Read the address -> district lookup table from the named worksheet.
    /// A header row mentioning "адрес" or "address" is skipped.
    pub async fn load_lookup_rows(&self, worksheet: &str) -> Result<Vec<(String, String)>> {
        let url = format!(
            "{}/v4/spreadsheets/{}/values/{}!A:B",
            self.api_base, self.spreadsheet_id, worksheet
        );

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .context("Failed to fetch the lookup worksheet")?;
        if !response.status().is_success() {
            anyhow::bail!("Lookup worksheet fetch returned {}", response.status());
        }

        let range: ValueRange = response
            .json()
            .await
            .context("Failed to parse the lookup worksheet response")?;

        let mut rows = Vec::new();
        for row in range.values {
            if row.len() < 2 {
                continue;
            }
            let address = row[0].trim();
            let lowered = address.to_lowercase();
            if lowered.contains("адрес") || lowered.contains("address") {
                continue;
            }
            rows.push((address.to_string(), row[1].trim().to_string()));
        }
        debug!("Lookup worksheet '{}' returned {} rows", worksheet, rows.len());
        Ok(rows)
    }
}

/// Pull the spreadsheet id out of a full sharing URL
pub fn extract_spreadsheet_id(sheet_url: &str) -> Option<String> {
    static FULL: OnceLock<Regex> = OnceLock::new();
    static SHORT: OnceLock<Regex> = OnceLock::new();

    let full = FULL
        .get_or_init(|| Regex::new(r"/spreadsheets/d/([a-zA-Z0-9-_]+)").expect("valid regex"));
    if let Some(captures) = full.captures(sheet_url) {
        return Some(captures[1].to_string());
    }

    let short = SHORT.get_or_init(|| Regex::new(r"d/([a-zA-Z0-9-_]+)").expect("valid regex"));
    short
        .captures(sheet_url)
        .map(|captures| captures[1].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(base: &str) -> SheetsClient {
        SheetsClient {
            client: reqwest::Client::new(),
            api_base: base.to_string(),
            spreadsheet_id: "sheet123".to_string(),
            access_token: "token-abc".to_string(),
            backoff: Duration::from_millis(10),
        }
    }

    #[test]
    fn spreadsheet_id_extracted_from_sharing_url() {
        assert_eq!(
            extract_spreadsheet_id(
                "https://docs.google.com/spreadsheets/d/1AbC-d_EF9/edit#gid=0"
            ),
            Some("1AbC-d_EF9".to_string())
        );
        assert_eq!(
            extract_spreadsheet_id("https://example.com/d/xyz789"),
            Some("xyz789".to_string())
        );
        assert_eq!(extract_spreadsheet_id("https://example.com/nothing"), None);
    }

    #[tokio::test]
    async fn append_sends_bearer_token_and_values() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v4/spreadsheets/sheet123/values/A:Z:append"))
            .and(header("authorization", "Bearer token-abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "updates": {"updatedRows": 1}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let result = client(&server.uri())
            .append_row(&["2026-01-05".to_string(), "адрес".to_string()])
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn append_retries_transient_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let result = client(&server.uri()).append_row(&["row".to_string()]).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn append_gives_up_after_three_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403))
            .expect(3)
            .mount(&server)
            .await;

        let result = client(&server.uri()).append_row(&["row".to_string()]).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn lookup_rows_skip_headers_and_short_rows() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v4/spreadsheets/sheet123/values/Sheet2!A:B"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "range": "Лист2!A1:B4",
                "values": [
                    ["Адрес", "Округ"],
                    ["ул. Кирова, 15", "г.о. Подольск"],
                    ["только адрес"],
                    ["ул. Мира, 7", "г.о. Чехов"]
                ]
            })))
            .mount(&server)
            .await;

        let rows = client(&server.uri()).load_lookup_rows("Sheet2").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], ("ул. Кирова, 15".to_string(), "г.о. Подольск".to_string()));
    }

    #[tokio::test]
    async fn empty_lookup_worksheet_yields_no_rows() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "range": "Лист2!A1:B1"
            })))
            .mount(&server)
            .await;

        let rows = client(&server.uri()).load_lookup_rows("Лист2").await.unwrap();
        assert!(rows.is_empty());
    }
}
