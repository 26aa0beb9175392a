//! Streaming writer for the append-only report.
//!
//! The document is emitted as fragments:
//!
//! ```text
//! {"meta": {...}, "plans": [
//! {"name": "p1", "records": [
//! {...record...},
//! ]},
//! ]}
//! ```
//!
//! Every fragment is flushed as soon as it is written, so a killed run leaves
//! a file that [`super::loader`] can still close and parse.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use ulid::Ulid;

use super::{Record, ReportSink};
use crate::errors::ReportError;

/// Run-level metadata written once at the head of the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportMeta {
    pub run_id: String,
    pub version: String,
    pub started_at: DateTime<Utc>,
    pub plan_file: String,
    pub settings: Value,
}

impl ReportMeta {
    pub fn new(version: &str, plan_file: &str, settings: Value) -> Self {
        Self {
            run_id: Ulid::new().to_string(),
            version: version.to_string(),
            started_at: Utc::now(),
            plan_file: plan_file.to_string(),
            settings,
        }
    }
}

struct WriterState {
    out: Option<BufWriter<File>>,
    plan_open: bool,
}

/// File-backed report writer. Shared by reference; every write takes the
/// internal lock so fragments never interleave.
pub struct ReportWriter {
    path: PathBuf,
    state: Mutex<WriterState>,
}

impl ReportWriter {
    /// Create the report file and write the header.
    pub fn create(path: &Path, meta: &ReportMeta) -> Result<Self, ReportError> {
        let file = File::create(path).map_err(|source| ReportError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let writer = Self {
            path: path.to_path_buf(),
            state: Mutex::new(WriterState {
                out: Some(BufWriter::new(file)),
                plan_open: false,
            }),
        };

        let meta = to_json("report_meta", meta)?;
        writer.write_fragment(&format!("{{\"meta\": {meta}, \"plans\": [\n"))?;
        debug!(report.path = %path.display(), "Report header written");
        Ok(writer)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open the record list of a plan. An unterminated previous plan is
    /// closed first.
    pub fn begin_plan(&self, name: &str) -> Result<(), ReportError> {
        let mut state = self.state.lock();
        if state.plan_open {
            self.write_locked(&mut state, "]},\n")?;
        }
        let name = to_json("plan_name", &name)?;
        self.write_locked(&mut state, &format!("{{\"name\": {name}, \"records\": [\n"))?;
        state.plan_open = true;
        Ok(())
    }

    pub fn end_plan(&self) -> Result<(), ReportError> {
        let mut state = self.state.lock();
        if state.plan_open {
            self.write_locked(&mut state, "]},\n")?;
            state.plan_open = false;
        }
        Ok(())
    }

    /// Write the closing delimiters and release the file. Later writes fail
    /// with [`ReportError::Closed`].
    pub fn finish(&self) -> Result<(), ReportError> {
        let mut state = self.state.lock();
        if state.plan_open {
            self.write_locked(&mut state, "]},\n")?;
            state.plan_open = false;
        }
        self.write_locked(&mut state, "]}\n")?;
        state.out = None;
        debug!(report.path = %self.path.display(), "Report closed");
        Ok(())
    }

    fn write_fragment(&self, fragment: &str) -> Result<(), ReportError> {
        let mut state = self.state.lock();
        self.write_locked(&mut state, fragment)
    }

    fn write_locked(&self, state: &mut WriterState, fragment: &str) -> Result<(), ReportError> {
        let out = state.out.as_mut().ok_or(ReportError::Closed)?;
        out.write_all(fragment.as_bytes())
            .and_then(|()| out.flush())
            .map_err(|source| ReportError::Io {
                path: self.path.display().to_string(),
                source,
            })
    }
}

impl ReportSink for ReportWriter {
    fn emit(&self, record: Record) -> Result<(), ReportError> {
        let line = to_json(&record.kind, &record)?;
        let mut state = self.state.lock();
        if !state.plan_open {
            warn!(record.kind = %record.kind, "Record emitted outside of a plan, dropping");
            return Ok(());
        }
        self.write_locked(&mut state, &format!("{line},\n"))
    }
}

fn to_json<T: Serialize + ?Sized>(data_type: &str, value: &T) -> Result<String, ReportError> {
    serde_json::to_string(value).map_err(|source| ReportError::Serialize {
        data_type: data_type.to_string(),
        source,
    })
}
