//! HTTP client for the telemetry store.
//!
//! The store is queried by vehicle number and an optional time range and
//! answers in cursor-paginated pages:
//!
//! ```json
//! { "results": [ { "vehicleNo": "LL-2501", "geoData": [ ... ] } ], "next_cursor": "abc" }
//! ```
//!
//! Documents that do not match [`TelemetryRecord`] are logged and skipped,
//! like individual readings are in the normalizer.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::models::TelemetryRecord;

// ---

/// Closed time range for a telemetry query. Either end may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TimeRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct TelemetryClient {
    client: reqwest::Client,
    base_url: String,
    max_pages: u32,
}

impl TelemetryClient {
    // ---
    pub fn new(base_url: impl Into<String>, max_pages: u32) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            max_pages,
        }
    }

    /// Query string for one page.
    pub fn page_query(vehicle_no: &str, range: &TimeRange, cursor: Option<&str>) -> Vec<(&'static str, String)> {
        // ---
        let mut query = vec![("vehicleNo", vehicle_no.to_string())];
        if let Some(from) = range.from {
            query.push(("from", from.to_rfc3339()));
        }
        if let Some(to) = range.to {
            query.push(("to", to.to_rfc3339()));
        }
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }
        query
    }

    /// Fetch every telemetry document for `vehicle_no`, following cursors up
    /// to the configured page limit.
    pub async fn fetch_records(
        &self,
        vehicle_no: &str,
        range: &TimeRange,
    ) -> Result<Vec<TelemetryRecord>> {
        // ---
        let mut all_records = Vec::new();
        let mut cursor: Option<String> = None;
        let mut page_count = 0;

        loop {
            if page_count >= self.max_pages {
                debug!(
                    "Hit page limit of {}, stopping pagination. Fetched {} documents so far.",
                    self.max_pages,
                    all_records.len()
                );
                break;
            }
            page_count += 1;

            let query = Self::page_query(vehicle_no, range, cursor.as_deref());
            debug!("Fetching page {} from: {}", page_count, self.base_url);

            let response: serde_json::Value = self
                .client
                .get(&self.base_url)
                .query(&query)
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .with_context(|| format!("telemetry request for page {page_count} failed"))?
                .json()
                .await
                .with_context(|| format!("telemetry page {page_count} is not valid JSON"))?;

            let (records, next) = parse_page(&response, page_count);
            all_records.extend(records);
            cursor = next;

            debug!("Page {} next_cursor: {:?}", page_count, cursor);

            if cursor.is_none() {
                break;
            }
        }

        info!(
            "Finished fetching {} telemetry documents for {} from {} pages",
            all_records.len(),
            vehicle_no,
            page_count
        );
        Ok(all_records)
    }
}

/// Split one page into its decodable documents and the next cursor.
pub fn parse_page(response: &serde_json::Value, page: u32) -> (Vec<TelemetryRecord>, Option<String>) {
    // ---
    let mut records = Vec::new();

    match response.get("results").and_then(|d| d.as_array()) {
        Some(data) => {
            debug!("Page {} found {} documents", page, data.len());
            for (i, item) in data.iter().enumerate() {
                match serde_json::from_value::<TelemetryRecord>(item.clone()) {
                    Ok(record) => records.push(record),
                    Err(e) => warn!("Failed to parse document {} on page {}: {}", i, page, e),
                }
            }
        }
        None => warn!("Page {} response missing 'results' field or not an array", page),
    }

    let next = response
        .get("next_cursor")
        .and_then(|c| c.as_str())
        .filter(|c| !c.is_empty())
        .map(String::from);

    (records, next)
}
