use std::collections::{BTreeSet, HashSet};
use std::fs::File;
use std::path::Path;
use std::sync::LazyLock;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;

use crate::config::ResolvedConfig;
use crate::domain::RecordId;
use crate::error::MetaError;
use crate::metadata::{Record, RecordFile};

const MAX_ATTEMPTS: usize = 3;
const BASE_DELAY_MS: u64 = 500;
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

static DOI_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:doi:)?10(?:\.[0-9]+)+/").unwrap());
static GITHUB_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:url:)?(?:https?://)?github\.com").unwrap());

pub trait ZenodoClient: Send + Sync {
    /// Returns the raw search hits of every record in `community`.
    fn list_community(&self, community: &str) -> Result<Vec<Value>, MetaError>;

    fn download_file(&self, url: &str, destination: &Path) -> Result<(), MetaError>;
}

#[derive(Clone)]
pub struct ZenodoHttpClient {
    client: Client,
    api_url: String,
    page_size: u32,
}

impl ZenodoHttpClient {
    pub fn new(config: &ResolvedConfig) -> Result<Self, MetaError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("clld-meta/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| MetaError::ZenodoHttp(err.to_string()))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        match config.access_token() {
            Some(token) => {
                tracing::info!("access token detected in {}", config.access_token_env);
                let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
                    .map_err(|err| MetaError::ZenodoHttp(err.to_string()))?;
                value.set_sensitive(true);
                headers.insert(AUTHORIZATION, value);
            }
            None => {
                tracing::warn!(
                    "no Zenodo access token detected ({} is unset); rate limits will be low",
                    config.access_token_env
                );
            }
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| MetaError::ZenodoHttp(err.to_string()))?;

        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            page_size: config.page_size,
        })
    }

    fn handle_status(response: Response) -> Result<Response, MetaError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .map(|body| body.trim().to_string())
            .unwrap_or_else(|_| "Zenodo request failed".to_string());
        Err(MetaError::ZenodoStatus { status, message })
    }

    fn send_with_retries<F>(&self, url: &str, mut make_req: F) -> Result<(Response, RateLimit), MetaError>
    where
        F: FnMut() -> RequestBuilder,
    {
        for attempt in 1..=MAX_ATTEMPTS {
            match make_req().send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    let rate = RateLimit::from_headers(resp.headers());
                    if status == 429 {
                        if attempt == MAX_ATTEMPTS {
                            break;
                        }
                        wait_until(rate.wait_until(Utc::now().timestamp()));
                        continue;
                    }
                    if is_retryable_status(status) && attempt < MAX_ATTEMPTS {
                        tracing::warn!(
                            "unexpected http response {status} from {url}; attempt {attempt} of {MAX_ATTEMPTS}, retrying"
                        );
                        backoff(attempt);
                        continue;
                    }
                    return Ok((Self::handle_status(resp)?, rate));
                }
                Err(err) => {
                    if is_retryable_error(&err) && attempt < MAX_ATTEMPTS {
                        tracing::warn!(
                            "request to {url} failed: {err}; attempt {attempt} of {MAX_ATTEMPTS}, retrying"
                        );
                        backoff(attempt);
                        continue;
                    }
                    return Err(MetaError::ZenodoHttp(err.to_string()));
                }
            }
        }
        Err(MetaError::RetriesExhausted {
            url: url.to_string(),
            attempts: MAX_ATTEMPTS,
        })
    }

    /// Sleeps once the server reports the request budget as spent.
    fn pace(rate: &RateLimit) {
        if rate.exhausted() {
            wait_until(rate.wait_until(Utc::now().timestamp()));
        }
    }
}

impl ZenodoClient for ZenodoHttpClient {
    fn list_community(&self, community: &str) -> Result<Vec<Value>, MetaError> {
        let first_url = format!("{}/records", self.api_url);
        let size = self.page_size.to_string();
        let mut hits = Vec::new();
        let mut seen_urls = HashSet::new();
        let mut next: Option<String> = None;

        loop {
            let url = next.clone().unwrap_or_else(|| first_url.clone());
            if !seen_urls.insert(url.clone()) {
                break;
            }
            tracing::debug!(community, url = url.as_str(), "requesting search page");
            let (response, rate) = match &next {
                Some(next_url) => self.send_with_retries(next_url, || self.client.get(next_url))?,
                None => self.send_with_retries(&first_url, || {
                    self.client.get(&first_url).query(&[
                        ("communities", community),
                        ("size", size.as_str()),
                        ("page", "1"),
                        ("sort", "newest"),
                    ])
                })?,
            };
            let body: Value = response
                .json()
                .map_err(|err| MetaError::ZenodoResponse(err.to_string()))?;
            Self::pace(&rate);

            let page = SearchPage::from_json(body)?;
            if page.hits.is_empty() {
                break;
            }
            hits.extend(page.hits);
            match page.next {
                Some(url) => next = Some(url),
                None => break,
            }
        }

        Ok(hits)
    }

    fn download_file(&self, url: &str, destination: &Path) -> Result<(), MetaError> {
        let (mut response, rate) = self.send_with_retries(url, || self.client.get(url))?;
        let mut file = File::create(destination)
            .map_err(|err| MetaError::Filesystem(format!("create {}: {err}", destination.display())))?;
        std::io::copy(&mut response, &mut file)
            .map_err(|err| MetaError::ZenodoHttp(format!("download {url}: {err}")))?;
        Self::pace(&rate);
        Ok(())
    }
}

/// One page of the records search API.
#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    pub hits: Vec<Value>,
    pub next: Option<String>,
}

impl SearchPage {
    pub fn from_json(body: Value) -> Result<Self, MetaError> {
        let hits_obj = body
            .get("hits")
            .ok_or_else(|| MetaError::ZenodoResponse("search response without hits".to_string()))?;
        let hits = hits_obj
            .get("hits")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let next = body
            .get("links")
            .and_then(|links| links.get("next"))
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok(Self { hits, next })
    }
}

/// Turns one search hit into a [`Record`].
pub fn parse_hit(hit: &Value) -> Result<Record, MetaError> {
    let id = value_as_id(hit.get("id"))
        .or_else(|| value_as_id(hit.get("recid")))
        .ok_or_else(|| MetaError::ZenodoResponse(format!("record without id: {hit}")))?;
    let empty = Value::Null;
    let metadata = hit.get("metadata").unwrap_or(&empty);

    let title = str_field(metadata, "title")
        .or_else(|| str_field(hit, "title"))
        .unwrap_or_default();
    let doi = str_field(hit, "doi").or_else(|| str_field(metadata, "doi"));

    let resource_type = metadata.get("resource_type").and_then(|rt| {
        let kind = rt.get("type").and_then(Value::as_str)?;
        Some(match rt.get("subtype").and_then(Value::as_str) {
            Some(subtype) if !subtype.is_empty() => format!("{kind}-{subtype}"),
            _ => kind.to_string(),
        })
    });

    let license = metadata.get("license").and_then(|license| {
        license
            .as_str()
            .map(str::to_string)
            .or_else(|| str_field(license, "id"))
    });

    let communities = metadata
        .get("communities")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string).or_else(|| str_field(item, "id")))
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    let mut github_links = BTreeSet::new();
    let mut related_dois = BTreeSet::new();
    for related in array_field(metadata, "related_identifiers") {
        let Some(identifier) = str_field(related, "identifier") else {
            continue;
        };
        if DOI_RE.is_match(&identifier) {
            related_dois.insert(identifier);
        } else if GITHUB_RE.is_match(&identifier) {
            github_links.insert(identifier);
        }
    }

    let zenodo_link = hit
        .get("links")
        .and_then(|links| {
            str_field(links, "self_html")
                .or_else(|| str_field(links, "html"))
                .or_else(|| str_field(links, "latest_html"))
        })
        .unwrap_or_else(|| id.zenodo_link());

    let files = array_field(hit, "files")
        .filter_map(|file| {
            let key = str_field(file, "key").or_else(|| str_field(file, "filename"))?;
            let link = file.get("links").and_then(|links| {
                str_field(links, "self")
                    .or_else(|| str_field(links, "content"))
                    .or_else(|| str_field(links, "download"))
            })?;
            Some(RecordFile {
                key,
                link,
                size: file
                    .get("size")
                    .or_else(|| file.get("filesize"))
                    .and_then(Value::as_u64),
                checksum: str_field(file, "checksum"),
            })
        })
        .collect();

    Ok(Record {
        id,
        concept_id: value_as_id(hit.get("conceptrecid")),
        doi,
        title: title.trim().to_string(),
        version: str_field(metadata, "version"),
        description: str_field(metadata, "description"),
        creators: names(metadata, "creators"),
        contributors: names(metadata, "contributors"),
        publication_date: str_field(metadata, "publication_date"),
        communities,
        license,
        keywords: array_field(metadata, "keywords")
            .filter_map(|value| value.as_str().map(str::to_string))
            .collect(),
        resource_type,
        zenodo_link,
        github_links: github_links.into_iter().collect(),
        related_dois: related_dois.into_iter().collect(),
        files,
    })
}

/// Heuristic filter for records that cannot be CLDF datasets: talks,
/// papers, software releases and reference catalogs.
#[derive(Debug, Clone)]
pub struct RecordFilter {
    exclude_types: HashSet<String>,
    exclude_titles: Vec<Regex>,
}

impl RecordFilter {
    pub fn new(config: &ResolvedConfig) -> Self {
        Self {
            exclude_types: config.exclude_types.iter().cloned().collect(),
            exclude_titles: config.exclude_titles.clone(),
        }
    }

    /// Why `record` should be dropped, if it should.
    pub fn rejection(&self, record: &Record) -> Option<String> {
        if let Some(kind) = &record.resource_type {
            if self.exclude_types.contains(kind) {
                return Some(format!("resource type {kind}"));
            }
        }
        let title = record.title.trim();
        self.exclude_titles
            .iter()
            .find(|pattern| pattern.is_match(title))
            .map(|pattern| format!("title matches {}", pattern.as_str()))
    }
}

/// Rate limit state reported by Zenodo response headers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimit {
    pub limit: Option<u64>,
    pub remaining: Option<u64>,
    /// Epoch seconds at which the budget refills.
    pub reset: Option<i64>,
    pub retry_after: Option<u64>,
}

impl RateLimit {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        fn header<T: std::str::FromStr>(headers: &HeaderMap, name: &str) -> Option<T> {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse().ok())
        }
        Self {
            limit: header(headers, "X-RateLimit-Limit"),
            remaining: header(headers, "X-RateLimit-Remaining"),
            reset: header(headers, "X-RateLimit-Reset"),
            retry_after: header(headers, "Retry-After"),
        }
    }

    pub fn exhausted(&self) -> bool {
        self.remaining == Some(0)
    }

    pub fn wait_until(&self, now: i64) -> i64 {
        let retry_after = self.retry_after.unwrap_or(DEFAULT_RETRY_AFTER_SECS) as i64;
        self.reset.unwrap_or(now).max(now + retry_after)
    }
}

/// Formats a duration like `1d2h3m4s`, dropping leading zero units.
pub fn fmt_time_period(secs: u64) -> String {
    let (mins, secs) = (secs / 60, secs % 60);
    let (hrs, mins) = (mins / 60, mins % 60);
    let (days, hrs) = (hrs / 24, hrs % 24);
    if days > 0 {
        format!("{days}d{hrs}h{mins}m{secs}s")
    } else if hrs > 0 {
        format!("{hrs}h{mins}m{secs}s")
    } else if mins > 0 {
        format!("{mins}m{secs}s")
    } else {
        format!("{secs}s")
    }
}

fn wait_until(epoch_secs: i64) {
    let delta = (epoch_secs - Utc::now().timestamp()).max(0) as u64;
    let until = DateTime::<Utc>::from_timestamp(epoch_secs, 0)
        .map(|time| time.to_rfc2822())
        .unwrap_or_else(|| epoch_secs.to_string());
    tracing::warn!("hit rate limit, waiting {} until {until}", fmt_time_period(delta));
    thread::sleep(Duration::from_secs(delta));
}

fn backoff(attempt: usize) {
    thread::sleep(Duration::from_millis(BASE_DELAY_MS * attempt as u64));
}

fn value_as_id(value: Option<&Value>) -> Option<RecordId> {
    match value? {
        Value::Number(number) => number.as_u64().map(RecordId::new),
        Value::String(text) => text.parse().ok(),
        _ => None,
    }
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

fn array_field<'a>(value: &'a Value, key: &str) -> impl Iterator<Item = &'a Value> {
    value
        .get(key)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

fn names(metadata: &Value, key: &str) -> Vec<String> {
    array_field(metadata, key)
        .filter_map(|person| {
            person
                .as_str()
                .map(str::to_string)
                .or_else(|| str_field(person, "name"))
                .or_else(|| person.get("person_or_org").and_then(|inner| str_field(inner, "name")))
        })
        .collect()
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_period_units() {
        assert_eq!(fmt_time_period(42), "42s");
        assert_eq!(fmt_time_period(63), "1m3s");
        assert_eq!(fmt_time_period(3600), "1h0m0s");
        assert_eq!(fmt_time_period(90061), "1d1h1m1s");
    }

    #[test]
    fn rate_limit_waits_for_later_of_reset_and_retry_after() {
        let rate = RateLimit {
            limit: Some(60),
            remaining: Some(0),
            reset: Some(1_000),
            retry_after: Some(30),
        };
        assert!(rate.exhausted());
        assert_eq!(rate.wait_until(900), 1_000);
        assert_eq!(rate.wait_until(990), 1_020);
        assert_eq!(RateLimit::default().wait_until(10), 10 + DEFAULT_RETRY_AFTER_SECS as i64);
    }
}
