//! Book metadata lookup against the Google Books volumes API.

use reqwest::blocking::Client;
use serde::Serialize;
use serde_json::Value;
use std::sync::OnceLock;
use std::time::Duration;

use crate::error::LookupError;

pub const GOOGLE_BOOKS_URL: &str = "https://www.googleapis.com/books/v1";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(6);
const HTTP_MAX_RETRIES: u64 = 1;
const HTTP_USER_AGENT: &str = concat!("shelf/", env!("CARGO_PKG_VERSION"));
static METADATA_DEBUG_ENABLED: OnceLock<bool> = OnceLock::new();

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate {
    pub title: Option<String>,
    pub author: String,
    pub thumbnail: Option<String>,
    pub isbn_13: Option<String>,
    pub isbn_10: Option<String>,
}

/// One hit is returned as a bare object, several as a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum LookupResult {
    Single(Candidate),
    Many(Vec<Candidate>),
}

#[derive(Debug, Clone)]
pub struct MetadataClient {
    base_url: String,
    timeout: Duration,
}

impl MetadataClient {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }

    pub fn lookup_isbn(&self, isbn: &str) -> Result<LookupResult, LookupError> {
        let isbn = normalize_isbn(isbn)?;
        self.query(&format!("isbn:{}", isbn))
    }

    /// Title search, optionally narrowed by a volume number.
    pub fn search(&self, title: &str, volume: Option<i64>) -> Result<LookupResult, LookupError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(LookupError::InvalidRequest("title is required".to_string()));
        }
        let query = match volume {
            Some(volume) => format!("intitle:{} {}", title, volume),
            None => format!("intitle:{}", title),
        };
        self.query(&query)
    }

    fn query(&self, query: &str) -> Result<LookupResult, LookupError> {
        let url = format!("{}/volumes?q={}", self.base_url, urlencoding::encode(query));
        let data = self.fetch_json_with_retry(&url)?;

        let candidates: Vec<Candidate> = data
            .get("items")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(candidate_from_item).collect())
            .unwrap_or_default();

        if metadata_debug_enabled() {
            log::info!(
                "[metadata-debug] lookup query=\"{}\" candidates={}",
                query,
                candidates.len()
            );
        }

        let mut candidates = candidates.into_iter();
        match (candidates.next(), candidates.next()) {
            (None, _) => Err(LookupError::NotFound),
            (Some(only), None) => Ok(LookupResult::Single(only)),
            (Some(first), Some(second)) => {
                let mut all = vec![first, second];
                all.extend(candidates);
                Ok(LookupResult::Many(all))
            }
        }
    }

    fn fetch_json_with_retry(&self, url: &str) -> Result<Value, LookupError> {
        let debug_enabled = metadata_debug_enabled();
        // built per call; a blocking client must not be dropped on an async thread
        let client = Client::builder().timeout(self.timeout).build()?;

        if debug_enabled {
            log::info!("[metadata-debug] http start url={}", url);
        }

        let mut attempt = 0;
        loop {
            let response = client
                .get(url)
                .header(reqwest::header::ACCEPT, "application/json")
                .header(reqwest::header::USER_AGENT, HTTP_USER_AGENT)
                .send();

            let response = match response {
                Ok(value) => value,
                Err(err) => {
                    log::warn!("metadata lookup transport error url={}: {}", url, err);
                    if !err.is_timeout() && attempt < HTTP_MAX_RETRIES {
                        attempt += 1;
                        std::thread::sleep(Duration::from_millis(350 * attempt));
                        continue;
                    }
                    return Err(err.into());
                }
            };

            let status = response.status();
            if status.is_success() {
                if debug_enabled {
                    log::info!("[metadata-debug] http success url={} status={}", url, status);
                }
                return Ok(response.json::<Value>()?);
            }

            log::warn!(
                "metadata lookup status url={} status={} attempt={}",
                url,
                status,
                attempt + 1
            );
            if (status.as_u16() == 429 || status.is_server_error()) && attempt < HTTP_MAX_RETRIES {
                attempt += 1;
                std::thread::sleep(Duration::from_millis(350 * attempt));
                continue;
            }
            return Err(LookupError::Network(format!(
                "metadata service answered {}",
                status
            )));
        }
    }
}

impl Default for MetadataClient {
    fn default() -> Self {
        Self::new(GOOGLE_BOOKS_URL, DEFAULT_TIMEOUT)
    }
}

fn candidate_from_item(item: &Value) -> Option<Candidate> {
    let info = item.get("volumeInfo")?;
    let text = |value: Option<&Value>| {
        value
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    };

    let author = info
        .get("authors")
        .and_then(Value::as_array)
        .map(|authors| {
            authors
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        })
        .unwrap_or_default();

    let identifier = |kind: &str| {
        info.get("industryIdentifiers")
            .and_then(Value::as_array)?
            .iter()
            .find(|entry| entry.get("type").and_then(Value::as_str) == Some(kind))
            .and_then(|entry| text(entry.get("identifier")))
    };

    Some(Candidate {
        title: text(info.get("title")),
        author,
        thumbnail: text(info.get("imageLinks").and_then(|links| links.get("thumbnail"))),
        isbn_13: identifier("ISBN_13"),
        isbn_10: identifier("ISBN_10"),
    })
}

/// Drops spaces and hyphens; what is left must be 10 or 13 characters of
/// digits, with an optional trailing X.
fn normalize_isbn(raw: &str) -> Result<String, LookupError> {
    let isbn: String = raw
        .chars()
        .filter(|ch| !ch.is_whitespace() && *ch != '-')
        .map(|ch| ch.to_ascii_uppercase())
        .collect();
    let valid = isbn.is_ascii() && matches!(isbn.len(), 10 | 13) && {
        let (body, last) = isbn.split_at(isbn.len() - 1);
        body.chars().all(|ch| ch.is_ascii_digit())
            && last.chars().all(|ch| ch.is_ascii_digit() || ch == 'X')
    };
    if !valid {
        return Err(LookupError::InvalidRequest(format!("not an ISBN: {}", raw.trim())));
    }
    Ok(isbn)
}

fn metadata_debug_enabled() -> bool {
    *METADATA_DEBUG_ENABLED.get_or_init(|| {
        std::env::var("SHELF_METADATA_DEBUG")
            .map(|value| {
                let lowered = value.trim().to_ascii_lowercase();
                lowered == "1" || lowered == "true" || lowered == "yes" || lowered == "on"
            })
            .unwrap_or(false)
    })
}
