use std::time::Duration;

use chrono::{DateTime, Duration as Days, NaiveDate, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::ExtractError;
use crate::fetch::Paged;
use crate::report::{ReportKind, DEFAULT_MAX_WAIT};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Fills in whichever bound is missing: the end defaults to `today`,
    /// the start to `default_days` before today.
    pub fn resolve(
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        default_days: i64,
        today: NaiveDate,
    ) -> Self {
        Self {
            start: start.unwrap_or(today - Days::days(default_days)),
            end: end.unwrap_or(today),
        }
    }

    /// `YYYYMMDD` bounds.
    pub fn compact(&self) -> (String, String) {
        (
            self.start.format("%Y%m%d").to_string(),
            self.end.format("%Y%m%d").to_string(),
        )
    }
}

#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub include_performance: bool,
    pub report_kinds: Vec<ReportKind>,
    pub max_wait: Duration,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            start_date: None,
            end_date: None,
            include_performance: true,
            report_kinds: vec![ReportKind::CampaignPerformance],
            max_wait: DEFAULT_MAX_WAIT,
        }
    }
}

impl ExtractOptions {
    pub fn date_range(&self, default_days: i64) -> DateRange {
        DateRange::resolve(
            self.start_date,
            self.end_date,
            default_days,
            Utc::now().date_naive(),
        )
    }
}

/// A unit of work that failed without stopping the run.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionFailure {
    pub entity: String,
    pub operation: String,
    pub error: String,
}

/// The document a run produces.
///
/// Collections are keyed by entity id and then by collection name, in the
/// order the provider listed the entities. A
/// collection whose first page failed is left out; the failure is listed
/// under `errors` either way.
#[derive(Debug, Serialize)]
pub struct ExtractionResult {
    pub provider: &'static str,
    pub extracted_at: DateTime<Utc>,
    pub entities: Vec<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub accounts: Vec<Value>,
    pub campaigns: Map<String, Value>,
    pub performance: Map<String, Value>,
    pub errors: Vec<ExtractionFailure>,
}

impl ExtractionResult {
    pub fn new(provider: &'static str) -> Self {
        Self {
            provider,
            extracted_at: Utc::now(),
            entities: Vec::new(),
            accounts: Vec::new(),
            campaigns: Map::new(),
            performance: Map::new(),
            errors: Vec::new(),
        }
    }

    pub fn add_campaigns(&mut self, entity: &str, collection: &str, paged: Paged<Value>) {
        if let Some(items) = self.settle(entity, collection, paged) {
            insert(&mut self.campaigns, entity, collection, Value::Array(items));
        }
    }

    pub fn add_performance(&mut self, entity: &str, collection: &str, paged: Paged<Value>) {
        if let Some(items) = self.settle(entity, collection, paged) {
            insert(&mut self.performance, entity, collection, Value::Array(items));
        }
    }

    pub fn set_campaigns(&mut self, entity: &str, collection: &str, items: Vec<Value>) {
        insert(&mut self.campaigns, entity, collection, Value::Array(items));
    }

    pub fn set_performance(&mut self, entity: &str, key: &str, value: Value) {
        insert(&mut self.performance, entity, key, value);
    }

    pub fn note_failure(&mut self, entity: &str, operation: &str, error: &ExtractError) {
        warn!(entity, operation, "{}", error);
        self.errors.push(ExtractionFailure {
            entity: entity.to_string(),
            operation: operation.to_string(),
            error: error.to_string(),
        });
    }

    fn settle(
        &mut self,
        entity: &str,
        collection: &str,
        paged: Paged<Value>,
    ) -> Option<Vec<Value>> {
        if paged.is_complete() {
            return Some(paged.items);
        }
        let Paged {
            items,
            pages,
            failure,
        } = paged;
        if let Some(e) = failure {
            self.note_failure(entity, collection, &e);
        }
        (pages > 0).then_some(items)
    }
}

/// Entities keep the order they were first seen in.
fn insert(section: &mut Map<String, Value>, entity: &str, key: &str, value: Value) {
    let slot = section.entry(entity).or_insert_with(|| Value::Object(Map::new()));
    if let Value::Object(collections) = slot {
        collections.insert(key.to_string(), value);
    }
}
