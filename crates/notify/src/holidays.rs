//! Holiday provider seam for the business calendar gate.
//!
//! Provider unavailability is modelled as a value ([`HolidayLookup`]) rather
//! than an error, because the gate's availability decision is an explicit
//! branch on the lookup outcome, not error recovery.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;

/// One holiday as reported by the provider.
#[derive(Debug, Clone, Deserialize)]
pub struct Holiday {
    pub date: NaiveDate,
    pub description: String,
}

/// Outcome of a holiday lookup for one year.
#[derive(Debug, Clone)]
pub enum HolidayLookup {
    /// The provider answered; the list may legitimately be empty.
    Available(Vec<Holiday>),
    /// The provider could not be reached or answered garbage. The calendar
    /// gate fails open on this value.
    Unavailable,
}

/// Source of per-year holiday data.
#[async_trait]
pub trait HolidayProvider: Send + Sync {
    async fn get_holidays(&self, year: i32) -> HolidayLookup;
}

// ---------------------------------------------------------------------------
// HTTP provider
// ---------------------------------------------------------------------------

/// Default national-holiday API base URL.
const DEFAULT_BASE_URL: &str = "https://brasilapi.com.br/api/feriados/v1";

/// Fetches holidays from a public national-holiday HTTP API.
///
/// The endpoint shape is `GET {base_url}/{year}` returning
/// `[{"date": "2024-12-25", "name": "..."}]`.
pub struct HttpHolidayProvider {
    client: reqwest::Client,
    base_url: String,
}

/// Wire format of the holiday API response items.
#[derive(Debug, Deserialize)]
struct ApiHoliday {
    date: NaiveDate,
    name: String,
}

impl HttpHolidayProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Build from the `HOLIDAY_API_URL` environment variable, falling back
    /// to the public default.
    pub fn from_env() -> Self {
        let base_url =
            std::env::var("HOLIDAY_API_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Self::new(base_url)
    }
}

#[async_trait]
impl HolidayProvider for HttpHolidayProvider {
    async fn get_holidays(&self, year: i32) -> HolidayLookup {
        let url = format!("{}/{year}", self.base_url);

        let response = match self.client.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(year, error = %e, "Holiday provider unreachable");
                return HolidayLookup::Unavailable;
            }
        };

        if !response.status().is_success() {
            tracing::warn!(year, status = %response.status(), "Holiday provider returned error");
            return HolidayLookup::Unavailable;
        }

        match response.json::<Vec<ApiHoliday>>().await {
            Ok(items) => HolidayLookup::Available(
                items
                    .into_iter()
                    .map(|h| Holiday {
                        date: h.date,
                        description: h.name,
                    })
                    .collect(),
            ),
            Err(e) => {
                tracing::warn!(year, error = %e, "Holiday provider response malformed");
                HolidayLookup::Unavailable
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Static provider (tests, air-gapped deployments)
// ---------------------------------------------------------------------------

/// Provider backed by a fixed in-memory list.
pub struct StaticHolidayProvider {
    holidays: Vec<Holiday>,
}

impl StaticHolidayProvider {
    pub fn new(holidays: Vec<Holiday>) -> Self {
        Self { holidays }
    }

    /// A provider with no holidays at all.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl HolidayProvider for StaticHolidayProvider {
    async fn get_holidays(&self, year: i32) -> HolidayLookup {
        HolidayLookup::Available(
            self.holidays
                .iter()
                .filter(|h| {
                    use chrono::Datelike;
                    h.date.year() == year
                })
                .cloned()
                .collect(),
        )
    }
}
