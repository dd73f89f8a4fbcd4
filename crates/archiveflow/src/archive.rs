use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::LOCATION;
use reqwest::redirect::Policy;

pub const DEFAULT_SAVE_URL: &str = "https://web.archive.org/save/";

/// Snapshot path segment in a save response: `/web/YYYYMMDDhhmmss`.
static SNAPSHOT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"/web/(\d{14})").unwrap());

/// Every capture failure is transient at this layer; whether a job fails
/// permanently is decided by the worker from its retry count.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("archive request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("archive responded {status} for {url}")]
    Status {
        status: reqwest::StatusCode,
        url: String,
    },
    #[error("no snapshot timestamp in location header {location:?}")]
    NoSnapshot { location: Option<String> },
    #[error("unparseable snapshot timestamp {0:?}")]
    BadTimestamp(String),
}

/// One archival request. The worker is generic over this seam so tests can
/// drive it without the network.
#[async_trait]
pub trait Capture: Send + Sync {
    async fn capture(&self, url: &str) -> Result<DateTime<Utc>, CaptureError>;
}

#[derive(Clone)]
pub struct ArchiveClient {
    http: reqwest::Client,
    save_url: String,
}

impl ArchiveClient {
    pub fn new(save_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        // The snapshot timestamp lives in the Location header of the first
        // response, so redirects must not be followed.
        let http = reqwest::Client::builder()
            .redirect(Policy::none())
            .timeout(timeout)
            .user_agent(concat!("archiveflow/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            save_url: save_url.to_string(),
        })
    }

    pub fn with_client(http: reqwest::Client, save_url: &str) -> Self {
        Self {
            http,
            save_url: save_url.to_string(),
        }
    }
}

#[async_trait]
impl Capture for ArchiveClient {
    async fn capture(&self, url: &str) -> Result<DateTime<Utc>, CaptureError> {
        let save = format!("{}{}", self.save_url, url);
        let resp = self.http.get(&save).send().await?;

        let status = resp.status();
        if status.is_client_error() || status.is_server_error() {
            return Err(CaptureError::Status {
                status,
                url: url.to_string(),
            });
        }

        let location = resp
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        parse_snapshot_timestamp(location.as_deref().unwrap_or(""))
    }
}

/// Extract and parse the 14-digit UTC capture timestamp from a Location value.
pub fn parse_snapshot_timestamp(location: &str) -> Result<DateTime<Utc>, CaptureError> {
    let digits = SNAPSHOT_RE
        .captures(location)
        .and_then(|c| c.get(1))
        .ok_or_else(|| CaptureError::NoSnapshot {
            location: (!location.is_empty()).then(|| location.to_string()),
        })?
        .as_str();

    let naive = NaiveDateTime::parse_from_str(digits, "%Y%m%d%H%M%S")
        .map_err(|_| CaptureError::BadTimestamp(digits.to_string()))?;
    Ok(Utc.from_utc_datetime(&naive))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_snapshot_location() {
        let ts =
            parse_snapshot_timestamp("https://web.archive.org/web/20240501123045/http://example.com")
                .unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 45).unwrap());
    }

    #[test]
    fn parses_bare_snapshot_path() {
        let ts = parse_snapshot_timestamp("/web/20231231235959/http://example.com").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2023, 12, 31, 23, 59, 59).unwrap());
    }

    #[test]
    fn missing_snapshot_is_an_error() {
        assert!(matches!(
            parse_snapshot_timestamp(""),
            Err(CaptureError::NoSnapshot { location: None })
        ));
        assert!(matches!(
            parse_snapshot_timestamp("/web/2024"),
            Err(CaptureError::NoSnapshot { .. })
        ));
        assert!(matches!(
            parse_snapshot_timestamp("https://example.com/elsewhere"),
            Err(CaptureError::NoSnapshot { .. })
        ));
    }

    #[test]
    fn out_of_range_timestamp_is_an_error() {
        // 14 digits that do not form a valid date.
        assert!(matches!(
            parse_snapshot_timestamp("/web/20241399000000/"),
            Err(CaptureError::BadTimestamp(_))
        ));
    }
}
