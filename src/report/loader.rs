//! Loading reports, including ones a killed run never closed.
//!
//! The raw text is tried as-is, then with `]}` appended, then with `]}]}`
//! appended. The writer leaves a comma after every record and plan, so each
//! attempt drops commas that directly precede a closing bracket first.

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{Record, ReportMeta};
use crate::errors::ReportError;

const SUFFIXES: [&str; 3] = ["", "]}", "]}]}"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanReport {
    pub name: String,
    pub records: Vec<Record>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub meta: ReportMeta,
    pub plans: Vec<PlanReport>,
}

pub fn load_report(path: &Path) -> Result<Report, ReportError> {
    let text = std::fs::read_to_string(path).map_err(|source| ReportError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_report(&text)
}

pub fn parse_report(text: &str) -> Result<Report, ReportError> {
    let mut attempts = Vec::with_capacity(SUFFIXES.len());

    for suffix in SUFFIXES {
        let candidate = strip_trailing_commas(&format!("{text}{suffix}"));
        match serde_json::from_str::<Report>(&candidate) {
            Ok(report) => {
                if !suffix.is_empty() {
                    tracing::info!(
                        report.synthesized = suffix,
                        "Report was not closed cleanly, synthesized closing delimiters"
                    );
                }
                return Ok(report);
            }
            Err(e) => attempts.push(format!("with {:?} appended: {}", suffix, e)),
        }
    }

    Err(ReportError::Unloadable { attempts })
}

/// Remove commas that are followed (after optional whitespace) by `]` or `}`,
/// ignoring anything inside string literals.
fn strip_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for (index, &c) in chars.iter().enumerate() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            ',' => {
                let next = chars[index + 1..].iter().find(|c| !c.is_whitespace());
                if !matches!(next, Some(']') | Some('}')) {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }

    out
}
