//! Tabular store capability: the async range-operation contract, a
//! Google Sheets REST implementation with service-account auth and
//! bounded retries, and an in-memory store for pipeline tests.

use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::Context;
use async_trait::async_trait;
use fppp_core::Cell;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

pub const CRATE_NAME: &str = "fppp-store";

const SHEETS_BASE_URL: &str = "https://sheets.googleapis.com/v4";
const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// How the store should interpret written values, mirroring the Sheets
/// `valueInputOption`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueInputMode {
    Raw,
    UserEntered,
}

impl ValueInputMode {
    fn as_param(self) -> &'static str {
        match self {
            Self::Raw => "RAW",
            Self::UserEntered => "USER_ENTERED",
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("authenticating with tabular store: {0}")]
    Auth(String),
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("decoding response: {0}")]
    Decode(String),
    #[error("range {0} unavailable")]
    Unavailable(String),
}

/// The five range operations the pipeline consumes. One implementation
/// instance is bound to a single spreadsheet; ranges are A1 notation
/// including the tab name.
#[async_trait]
pub trait TabularStore: Send + Sync {
    async fn get_range(&self, range: &str) -> Result<Vec<Vec<Cell>>, StoreError>;
    async fn clear_range(&self, range: &str) -> Result<(), StoreError>;
    async fn update_range(
        &self,
        range: &str,
        rows: Vec<Vec<Cell>>,
        mode: ValueInputMode,
    ) -> Result<(), StoreError>;
    async fn batch_update(
        &self,
        updates: Vec<(String, Vec<Vec<Cell>>)>,
        mode: ValueInputMode,
    ) -> Result<(), StoreError>;
    async fn append_rows(
        &self,
        range: &str,
        rows: Vec<Vec<Cell>>,
        mode: ValueInputMode,
    ) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

/// 429 is how Sheets signals per-minute quota exhaustion; 5xx covers
/// transient backend failures. Everything else (bad credentials, a
/// missing spreadsheet, malformed ranges) will not heal on retry.
pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    token_uri: String,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

/// Google Sheets values API client for one spreadsheet.
///
/// Auth follows the service-account flow: sign a short-lived RS256 JWT
/// with the key file's private key, exchange it at the token endpoint
/// for a bearer token, and cache that until shortly before expiry.
pub struct SheetsClient {
    http: reqwest::Client,
    key: ServiceAccountKey,
    spreadsheet_id: String,
    base_url: String,
    backoff: BackoffPolicy,
    token: Mutex<Option<CachedToken>>,
}

impl SheetsClient {
    pub fn from_key_file(
        credentials_path: impl AsRef<Path>,
        spreadsheet_id: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let credentials_path = credentials_path.as_ref();
        let raw = std::fs::read_to_string(credentials_path)
            .with_context(|| format!("reading credentials file {}", credentials_path.display()))?;
        let key: ServiceAccountKey = serde_json::from_str(&raw)
            .with_context(|| format!("parsing credentials file {}", credentials_path.display()))?;

        let http = reqwest::Client::builder()
            .gzip(true)
            .timeout(Duration::from_secs(30))
            .build()
            .context("building http client")?;

        Ok(Self {
            http,
            key,
            spreadsheet_id: spreadsheet_id.into(),
            base_url: SHEETS_BASE_URL.to_string(),
            backoff: BackoffPolicy::default(),
            token: Mutex::new(None),
        })
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    fn signed_assertion(&self) -> Result<String, StoreError> {
        #[derive(Debug, Serialize)]
        struct Claims<'a> {
            iss: &'a str,
            scope: &'a str,
            aud: &'a str,
            iat: u64,
            exp: u64,
        }

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|err| StoreError::Auth(err.to_string()))?
            .as_secs();
        let claims = Claims {
            iss: &self.key.client_email,
            scope: SHEETS_SCOPE,
            aud: &self.key.token_uri,
            iat: now.saturating_sub(10),
            exp: now + 3600,
        };
        let key = EncodingKey::from_rsa_pem(self.key.private_key.as_bytes())
            .map_err(|err| StoreError::Auth(err.to_string()))?;
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key)
            .map_err(|err| StoreError::Auth(err.to_string()))
    }

    async fn bearer_token(&self) -> Result<String, StoreError> {
        let mut guard = self.token.lock().await;
        if let Some(cached) = guard.as_ref() {
            if cached.expires_at > Instant::now() + Duration::from_secs(60) {
                return Ok(cached.access_token.clone());
            }
        }

        #[derive(Debug, Deserialize)]
        struct TokenResponse {
            access_token: String,
            expires_in: u64,
        }

        let assertion = self.signed_assertion()?;
        let resp = self
            .http
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", &assertion)])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(StoreError::Auth(format!(
                "token endpoint returned {}",
                resp.status()
            )));
        }
        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|err| StoreError::Decode(err.to_string()))?;
        debug!(expires_in = token.expires_in, "refreshed sheets access token");

        *guard = Some(CachedToken {
            access_token: token.access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        });
        Ok(token.access_token)
    }

    fn values_url(&self, range: &str, suffix: &str) -> String {
        format!(
            "{}/spreadsheets/{}/values/{}{}",
            self.base_url, self.spreadsheet_id, range, suffix
        )
    }

    /// Sends a request, re-minting the bearer token and rebuilding the
    /// request per attempt, with exponential backoff on 429/5xx and on
    /// transport-level failures.
    async fn send_with_retry<F>(&self, build: F) -> Result<reqwest::Response, StoreError>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let mut last_request_error: Option<reqwest::Error> = None;

        for attempt in 0..=self.backoff.max_retries {
            let token = self.bearer_token().await?;
            let result = build(&self.http).bearer_auth(&token).send().await;

            match result {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return Ok(resp);
                    }
                    let url = resp.url().to_string();
                    if classify_status(status) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }
                    return Err(StoreError::HttpStatus {
                        status: status.as_u16(),
                        url,
                    });
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        last_request_error = Some(err);
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }
                    return Err(StoreError::Request(err));
                }
            }
        }

        Err(StoreError::Request(
            last_request_error.expect("retry loop should capture a request error"),
        ))
    }
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Cell>>,
}

#[async_trait]
impl TabularStore for SheetsClient {
    async fn get_range(&self, range: &str) -> Result<Vec<Vec<Cell>>, StoreError> {
        let url = self.values_url(range, "");
        let resp = self.send_with_retry(|http| http.get(&url)).await?;
        let body: ValueRange = resp
            .json()
            .await
            .map_err(|err| StoreError::Decode(err.to_string()))?;
        Ok(body.values)
    }

    async fn clear_range(&self, range: &str) -> Result<(), StoreError> {
        let url = self.values_url(range, ":clear");
        self.send_with_retry(|http| http.post(&url).json(&serde_json::json!({})))
            .await?;
        Ok(())
    }

    async fn update_range(
        &self,
        range: &str,
        rows: Vec<Vec<Cell>>,
        mode: ValueInputMode,
    ) -> Result<(), StoreError> {
        let url = self.values_url(range, "");
        let body = serde_json::json!({ "values": rows });
        self.send_with_retry(|http| {
            http.put(&url)
                .query(&[("valueInputOption", mode.as_param())])
                .json(&body)
        })
        .await?;
        Ok(())
    }

    async fn batch_update(
        &self,
        updates: Vec<(String, Vec<Vec<Cell>>)>,
        mode: ValueInputMode,
    ) -> Result<(), StoreError> {
        let url = format!(
            "{}/spreadsheets/{}/values:batchUpdate",
            self.base_url, self.spreadsheet_id
        );
        let data: Vec<_> = updates
            .iter()
            .map(|(range, rows)| serde_json::json!({ "range": range, "values": rows }))
            .collect();
        let body = serde_json::json!({
            "valueInputOption": mode.as_param(),
            "data": data,
        });
        self.send_with_retry(|http| http.post(&url).json(&body))
            .await?;
        Ok(())
    }

    async fn append_rows(
        &self,
        range: &str,
        rows: Vec<Vec<Cell>>,
        mode: ValueInputMode,
    ) -> Result<(), StoreError> {
        let url = self.values_url(range, ":append");
        let body = serde_json::json!({ "values": rows });
        self.send_with_retry(|http| {
            http.post(&url)
                .query(&[
                    ("valueInputOption", mode.as_param()),
                    ("insertDataOption", "INSERT_ROWS"),
                ])
                .json(&body)
        })
        .await?;
        Ok(())
    }
}

/// Splits an A1 range into its tab name and optional anchor row
/// (1-based). `'FPPP Data'!A5` -> `("FPPP Data", Some(5))`,
/// `FORM MASTER!A:CZ` -> `("FORM MASTER", None)`, a bare tab name
/// addresses the whole tab.
pub fn split_range(range: &str) -> (String, Option<usize>) {
    let (tab, cells) = match range.split_once('!') {
        Some((tab, cells)) => (tab, Some(cells)),
        None => (range, None),
    };
    let tab = tab.trim().trim_matches('\'').to_string();

    let anchor = cells.and_then(|cells| {
        let first = cells.split(':').next().unwrap_or(cells);
        let digits: String = first.chars().filter(char::is_ascii_digit).collect();
        digits.parse::<usize>().ok()
    });

    (tab, anchor)
}

/// In-memory [`TabularStore`] keyed by tab name, for exercising the
/// pipeline without a network. Column bounds in ranges are ignored;
/// callers get whole rows back.
#[derive(Default)]
pub struct MemoryStore {
    tabs: std::sync::Mutex<HashMap<String, Vec<Vec<Cell>>>>,
    failing_tabs: std::sync::Mutex<Vec<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_tab(&self, name: &str, rows: Vec<Vec<Cell>>) {
        self.tabs.lock().unwrap().insert(name.to_string(), rows);
    }

    pub fn rows(&self, name: &str) -> Vec<Vec<Cell>> {
        self.tabs
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    /// Makes every subsequent read of `tab` fail with
    /// [`StoreError::Unavailable`].
    pub fn fail_reads_on(&self, tab: &str) {
        self.failing_tabs.lock().unwrap().push(tab.to_string());
    }

    fn check_readable(&self, tab: &str) -> Result<(), StoreError> {
        if self.failing_tabs.lock().unwrap().iter().any(|t| t == tab) {
            return Err(StoreError::Unavailable(tab.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl TabularStore for MemoryStore {
    async fn get_range(&self, range: &str) -> Result<Vec<Vec<Cell>>, StoreError> {
        let (tab, _) = split_range(range);
        self.check_readable(&tab)?;
        Ok(self.rows(&tab))
    }

    async fn clear_range(&self, range: &str) -> Result<(), StoreError> {
        let (tab, _) = split_range(range);
        self.tabs.lock().unwrap().entry(tab).or_default().clear();
        Ok(())
    }

    async fn update_range(
        &self,
        range: &str,
        rows: Vec<Vec<Cell>>,
        _mode: ValueInputMode,
    ) -> Result<(), StoreError> {
        let (tab, anchor) = split_range(range);
        let start = anchor.unwrap_or(1).saturating_sub(1);
        let mut tabs = self.tabs.lock().unwrap();
        let sheet = tabs.entry(tab).or_default();
        for (i, row) in rows.into_iter().enumerate() {
            let at = start + i;
            if sheet.len() <= at {
                sheet.resize(at + 1, Vec::new());
            }
            sheet[at] = row;
        }
        Ok(())
    }

    async fn batch_update(
        &self,
        updates: Vec<(String, Vec<Vec<Cell>>)>,
        mode: ValueInputMode,
    ) -> Result<(), StoreError> {
        for (range, rows) in updates {
            self.update_range(&range, rows, mode).await?;
        }
        Ok(())
    }

    async fn append_rows(
        &self,
        range: &str,
        rows: Vec<Vec<Cell>>,
        _mode: ValueInputMode,
    ) -> Result<(), StoreError> {
        let (tab, _) = split_range(range);
        self.tabs
            .lock()
            .unwrap()
            .entry(tab)
            .or_default()
            .extend(rows);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_range_handles_quoted_tabs_and_anchors() {
        assert_eq!(split_range("'FPPP Data'!A5"), ("FPPP Data".to_string(), Some(5)));
        assert_eq!(split_range("'FPPP Data'!A1"), ("FPPP Data".to_string(), Some(1)));
        assert_eq!(split_range("FORM MASTER!A:CZ"), ("FORM MASTER".to_string(), None));
        assert_eq!(split_range("Comment!A:Z"), ("Comment".to_string(), None));
        assert_eq!(split_range("'FPPP Data'"), ("FPPP Data".to_string(), None));
    }

    #[test]
    fn default_backoff_doubles_until_the_cap() {
        let policy = BackoffPolicy::default();

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(250));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(4));
        // sheets quota windows are per minute; the cap keeps a retry
        // burst well inside one window
        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(30), Duration::from_secs(5));
    }

    #[test]
    fn quota_and_backend_errors_retry_but_caller_mistakes_do_not() {
        for status in [
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::INTERNAL_SERVER_ERROR,
            StatusCode::BAD_GATEWAY,
            StatusCode::SERVICE_UNAVAILABLE,
        ] {
            assert_eq!(
                classify_status(status),
                RetryDisposition::Retryable,
                "{status} should be retried"
            );
        }
        for status in [
            StatusCode::BAD_REQUEST,
            StatusCode::UNAUTHORIZED,
            StatusCode::FORBIDDEN,
            StatusCode::NOT_FOUND,
        ] {
            assert_eq!(
                classify_status(status),
                RetryDisposition::NonRetryable,
                "{status} should surface immediately"
            );
        }
    }

    #[tokio::test]
    async fn memory_store_updates_in_place_and_appends_at_end() {
        let store = MemoryStore::new();
        store.insert_tab(
            "FPPP Data",
            vec![
                vec![Cell::text("business_id")],
                vec![Cell::text("B1"), Cell::text("old")],
            ],
        );

        store
            .update_range(
                "'FPPP Data'!A2",
                vec![vec![Cell::text("B1"), Cell::text("new")]],
                ValueInputMode::UserEntered,
            )
            .await
            .unwrap();
        store
            .append_rows(
                "'FPPP Data'!A1",
                vec![vec![Cell::text("B2")]],
                ValueInputMode::UserEntered,
            )
            .await
            .unwrap();

        let rows = store.rows("FPPP Data");
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1][1].to_text(), "new");
        assert_eq!(rows[2][0].to_text(), "B2");
    }

    #[tokio::test]
    async fn memory_store_update_extends_past_current_rows() {
        let store = MemoryStore::new();
        store
            .update_range(
                "'FPPP Data'!A3",
                vec![vec![Cell::text("B9")]],
                ValueInputMode::Raw,
            )
            .await
            .unwrap();
        let rows = store.rows("FPPP Data");
        assert_eq!(rows.len(), 3);
        assert!(rows[0].is_empty());
        assert_eq!(rows[2][0].to_text(), "B9");
    }

    #[tokio::test]
    async fn memory_store_clear_empties_the_tab() {
        let store = MemoryStore::new();
        store.insert_tab("FPPP Data", vec![vec![Cell::text("B1")]]);
        store.clear_range("'FPPP Data'").await.unwrap();
        assert!(store.rows("FPPP Data").is_empty());
    }

    #[tokio::test]
    async fn memory_store_read_failures_are_opt_in() {
        let store = MemoryStore::new();
        store.insert_tab("Comment", vec![vec![Cell::text("x")]]);
        store.fail_reads_on("Comment");
        let err = store.get_range("Comment!A:Z").await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(tab) if tab == "Comment"));
    }
}
