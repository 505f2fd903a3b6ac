//! External import sources.
//!
//! A sync asks an [`ImportSource`] for a batch of records and turns each one
//! into an `external_event`. The demo source returns a fixed batch.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use lifeline_core::{DataSource, Timestamp, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One record fetched from an external system, consumed as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRecord {
    /// Resource category, e.g. `"lab_result"`.
    pub category: String,
    pub title: String,
    pub summary: String,
    pub provider_name: Option<String>,
    pub occurred_at: Timestamp,
}

/// Import attempt failure. `error_code` is stored on the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportFailure {
    pub error_code: String,
    pub message: String,
}

impl ImportFailure {
    pub fn new(error_code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_code: error_code.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ImportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.error_code, self.message)
    }
}

impl std::error::Error for ImportFailure {}

/// Supplier of external records for a connected source.
#[async_trait]
pub trait ImportSource: Send + Sync {
    /// Whether records from this source are demo data.
    fn is_demo(&self) -> bool {
        false
    }

    async fn fetch(
        &self,
        user_id: UserId,
        source: &DataSource,
    ) -> Result<Vec<ImportRecord>, ImportFailure>;
}

/// Fixed demo batch standing in for a patient portal.
#[derive(Debug, Clone, Copy, Default)]
pub struct DemoImportSource;

#[async_trait]
impl ImportSource for DemoImportSource {
    fn is_demo(&self) -> bool {
        true
    }

    async fn fetch(
        &self,
        _user_id: UserId,
        _source: &DataSource,
    ) -> Result<Vec<ImportRecord>, ImportFailure> {
        let now = Utc::now();
        let record = |category: &str, title: &str, summary: &str, provider: &str, days_ago: i64| {
            ImportRecord {
                category: category.to_string(),
                title: title.to_string(),
                summary: summary.to_string(),
                provider_name: Some(provider.to_string()),
                occurred_at: now - Duration::days(days_ago),
            }
        };

        Ok(vec![
            record(
                "lab_result",
                "Complete Blood Count",
                "CBC within normal ranges",
                "Demo Community Lab",
                14,
            ),
            record(
                "immunization",
                "Influenza Vaccine",
                "Seasonal flu vaccine administered",
                "Demo Family Clinic",
                45,
            ),
            record(
                "encounter",
                "Annual Physical",
                "Routine annual check-up",
                "Demo Family Clinic",
                60,
            ),
            record(
                "medication",
                "Lisinopril 10 mg",
                "Daily blood pressure medication",
                "Demo Family Clinic",
                90,
            ),
        ])
    }
}
