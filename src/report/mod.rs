//! Append-only structured run report.
//!
//! A report is one JSON object, `{"meta": ..., "plans": [{"name": ..,
//! "records": [..]}, ..]}`, written as a stream of fragments so the file is
//! always a prefix of a valid document. [`loader`] closes whatever delimiters
//! a killed run left open.
//!
//! Producers (the client, source rules, the plan executor) only see the
//! [`ReportSink`] trait, so tests can collect records in memory with
//! [`MemorySink`] instead of writing files.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::errors::ReportError;

pub mod loader;
pub mod records;
pub mod writer;

pub use loader::{PlanReport, Report, load_report, parse_report};
pub use records::{PartialErrors, Warning};
pub use writer::{ReportMeta, ReportWriter};

/// One self-describing entry in a plan's record list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(rename = "type")]
    pub kind: String,
    pub time: DateTime<Utc>,
    pub data: Value,
}

/// Domain objects that can be written to and read back from the report.
///
/// `from_record(to_record(x)) == x` holds for every implementor.
pub trait Recordable: Serialize + DeserializeOwned {
    const RECORD_TYPE: &'static str;

    fn to_record(&self) -> Result<Record, ReportError> {
        let data = serde_json::to_value(self).map_err(|source| ReportError::Serialize {
            data_type: Self::RECORD_TYPE.to_string(),
            source,
        })?;
        Ok(Record {
            kind: Self::RECORD_TYPE.to_string(),
            time: Utc::now(),
            data,
        })
    }

    fn from_record(record: &Record) -> Result<Self, ReportError> {
        if record.kind != Self::RECORD_TYPE {
            return Err(ReportError::RecordTypeMismatch {
                expected: Self::RECORD_TYPE.to_string(),
                actual: record.kind.clone(),
            });
        }
        serde_json::from_value(record.data.clone()).map_err(|source| ReportError::Deserialize {
            data_type: Self::RECORD_TYPE.to_string(),
            source,
        })
    }
}

/// Destination for report records.
///
/// Implementations serialize concurrent emissions; a record is either written
/// whole or not at all.
pub trait ReportSink: Send + Sync {
    fn emit(&self, record: Record) -> Result<(), ReportError>;
}

impl dyn ReportSink {
    /// Convert and emit a domain object.
    pub fn emit_recordable<R: Recordable>(&self, item: &R) -> Result<(), ReportError> {
        self.emit(item.to_record()?)
    }
}

/// In-memory sink, for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<Record>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<Record> {
        self.records.lock().clone()
    }

    pub fn of_type(&self, kind: &str) -> Vec<Record> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.kind == kind)
            .cloned()
            .collect()
    }
}

impl ReportSink for MemorySink {
    fn emit(&self, record: Record) -> Result<(), ReportError> {
        self.records.lock().push(record);
        Ok(())
    }
}
