//! Line-oriented CSV row parser
//!
//! Row layout: `document,client_identifier,action_type[,side_effects_json]`.
//! Fields follow CSV quoting rules, so a side-effects object containing commas
//! can be written as `"{""a"":1,""b"":2}"`. An unquoted object is also
//! accepted: everything after the third comma is taken verbatim.

use ap_common::{ApError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::EventData;

/// Column limits of the persisted event table
const MAX_DOCUMENT_LEN: usize = 50;
const MAX_CLIENT_IDENTIFIER_LEN: usize = 100;
const MAX_ACTION_TYPE_LEN: usize = 100;

/// A row that was dropped during parsing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedRow {
    /// 1-based line number in the uploaded file
    pub line: usize,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct ParsedUpload {
    pub rows: Vec<EventData>,
    pub skipped: Vec<SkippedRow>,
}

/// Parse every non-blank line of an upload
pub fn parse_upload(content: &str) -> ParsedUpload {
    let mut parsed = ParsedUpload::default();

    for (idx, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }

        match parse_row(line) {
            Ok(row) => parsed.rows.push(row),
            Err(err) => {
                tracing::warn!(line = idx + 1, error = %err, "Skipping malformed row");
                parsed.skipped.push(SkippedRow {
                    line: idx + 1,
                    reason: err.to_string(),
                });
            },
        }
    }

    parsed
}

/// Parse a single row
pub fn parse_row(line: &str) -> Result<EventData> {
    let fields = split_fields(line)?;

    if fields.len() < 3 {
        return Err(ApError::parse(format!(
            "expected at least 3 fields (document,client_identifier,action_type), found {}",
            fields.len()
        )));
    }

    let document = required(&fields[0], "document", MAX_DOCUMENT_LEN)?;
    let client_identifier = required(&fields[1], "client_identifier", MAX_CLIENT_IDENTIFIER_LEN)?;
    let action_type = required(&fields[2], "action_type", MAX_ACTION_TYPE_LEN)?;

    let data = EventData::new(document, client_identifier, action_type);

    match fields.get(3).map(|s| s.trim()).filter(|s| !s.is_empty()) {
        Some(raw) => Ok(data.with_side_effects(side_effects(raw)?)),
        None => Ok(data),
    }
}

fn split_fields(line: &str) -> Result<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(line.as_bytes());

    let record = match reader.records().next() {
        Some(record) => record.map_err(|e| ApError::parse(e.to_string()))?,
        None => return Ok(Vec::new()),
    };

    if record.len() <= 4 {
        return Ok(record.iter().map(str::to_string).collect());
    }

    // More than four fields means an unquoted side-effects object
    Ok(line.splitn(4, ',').map(|s| s.trim().to_string()).collect())
}

fn required(value: &str, name: &str, max_len: usize) -> Result<String> {
    if value.is_empty() {
        return Err(ApError::parse(format!("{} is required", name)));
    }
    if value.chars().count() > max_len {
        return Err(ApError::parse(format!("{} exceeds {} characters", name, max_len)));
    }
    Ok(value.to_string())
}

fn side_effects(raw: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| ApError::parse(format!("side effects are not valid JSON: {}", e)))?;

    if !value.is_object() {
        return Err(ApError::parse("side effects must be a JSON object"));
    }
    Ok(value)
}
