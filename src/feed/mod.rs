//! # FEMA Declarations Feed
//!
//! Thin client over the OpenFEMA `DisasterDeclarationsSummaries` dataset. It only
//! builds the filter, pages through results and hands back raw JSON records;
//! validation is the ingestor's job.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::config::FeedConfig;

/// Upper bound on pages fetched in one query.
const MAX_PAGES: u32 = 200;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("feed returned HTTP {status}")]
    Status { status: u16 },
    #[error("failed to decode feed response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid feed url: {0}")]
    Url(#[from] url::ParseError),
    #[error("feed query exceeded {max_pages} pages")]
    TooManyPages { max_pages: u32 },
}

/// Window of declarations to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedQuery {
    /// Lower bound (inclusive) on `declarationDate`
    pub declared_since: DateTime<Utc>,
    /// Lower bound (exclusive) on `lastRefresh`
    pub refreshed_after: DateTime<Utc>,
}

impl FeedQuery {
    /// OData filter expression understood by OpenFEMA.
    pub fn filter_expression(&self) -> String {
        format!(
            "declarationDate ge '{}' and lastRefresh gt '{}'",
            odata_timestamp(self.declared_since),
            odata_timestamp(self.refreshed_after)
        )
    }
}

fn odata_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Source of raw declaration records.
#[async_trait]
pub trait DeclarationFeed: Send + Sync {
    /// Returns every record matching `query`, in feed order.
    async fn fetch_declarations(&self, query: FeedQuery) -> Result<Vec<Value>, FeedError>;
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FeedPage {
    Envelope {
        #[serde(rename = "DisasterDeclarationsSummaries")]
        records: Vec<Value>,
    },
    Bare(Vec<Value>),
}

impl FeedPage {
    fn into_records(self) -> Vec<Value> {
        match self {
            FeedPage::Envelope { records } | FeedPage::Bare(records) => records,
        }
    }
}

/// HTTP client for the FEMA dataset.
#[derive(Debug, Clone)]
pub struct FemaFeedClient {
    client: Client,
    base_url: Url,
    page_size: u32,
}

impl FemaFeedClient {
    pub fn new(config: &FeedConfig) -> Result<Self, FeedError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(concat!("disaster-alerts/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: Url::parse(&config.base_url)?,
            page_size: config.page_size.max(1),
        })
    }

    async fn fetch_page(&self, filter: &str, skip: u32) -> Result<Vec<Value>, FeedError> {
        let response = self
            .client
            .get(self.base_url.clone())
            .query(&[
                ("$filter", filter.to_string()),
                ("$orderby", "lastRefresh".to_string()),
                ("$top", self.page_size.to_string()),
                ("$skip", skip.to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), skip, "FEMA feed returned non-success status");
            return Err(FeedError::Status {
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await?;
        let page: FeedPage = serde_json::from_slice(&body)?;
        Ok(page.into_records())
    }
}

#[async_trait]
impl DeclarationFeed for FemaFeedClient {
    #[instrument(skip(self), fields(filter = %query.filter_expression()))]
    async fn fetch_declarations(&self, query: FeedQuery) -> Result<Vec<Value>, FeedError> {
        let filter = query.filter_expression();
        let mut records = Vec::new();

        for page in 0..MAX_PAGES {
            let skip = page * self.page_size;
            let batch = self.fetch_page(&filter, skip).await?;
            let fetched = batch.len();
            records.extend(batch);
            debug!(page, fetched, total = records.len(), "fetched FEMA page");

            if fetched < self.page_size as usize {
                return Ok(records);
            }
        }

        Err(FeedError::TooManyPages {
            max_pages: MAX_PAGES,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn filter_uses_millisecond_utc_timestamps() {
        let query = FeedQuery {
            declared_since: Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
            refreshed_after: Utc.with_ymd_and_hms(2025, 8, 31, 4, 5, 6).unwrap(),
        };
        assert_eq!(
            query.filter_expression(),
            "declarationDate ge '2025-06-01T00:00:00.000Z' and lastRefresh gt '2025-08-31T04:05:06.000Z'"
        );
    }

    #[test]
    fn page_accepts_envelope_and_bare_array() {
        let envelope: FeedPage =
            serde_json::from_str(r#"{"metadata":{},"DisasterDeclarationsSummaries":[{"id":"a"}]}"#)
                .unwrap();
        assert_eq!(envelope.into_records().len(), 1);

        let bare: FeedPage = serde_json::from_str(r#"[{"id":"a"},{"id":"b"}]"#).unwrap();
        assert_eq!(bare.into_records().len(), 2);
    }
}
