//! Newline-delimited record streams and batch assembly.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use duet_domain::{DuetError, DuetResult, RawRecord, RejectedRecord, RequestItem};
use tracing::{info, warn};

use crate::builder::RequestBuilder;

/// Read one JSON record per non-blank line.
pub fn load_records(path: &Path) -> DuetResult<Vec<RawRecord>> {
    let file = File::open(path)
        .map_err(|e| DuetError::RecordStream(format!("cannot open {}: {e}", path.display())))?;

    let mut records = Vec::new();
    for (n, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| {
            DuetError::RecordStream(format!("{}:{}: {e}", path.display(), n + 1))
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let record: RawRecord = serde_json::from_str(&line).map_err(|e| {
            DuetError::RecordStream(format!("{}:{}: {e}", path.display(), n + 1))
        })?;
        records.push(record);
    }
    info!(count = records.len(), path = %path.display(), "loaded records");
    Ok(records)
}

/// Built-in dialogue scripts for a quick smoke run.
pub fn sample_records() -> Vec<RawRecord> {
    vec![
        RawRecord::text(
            "[S1]Have you tried the new coffee place on the corner?\
             [S2]Not yet. Is it any good?\
             [S1]Honestly, haha, the espresso is better than anything I've had downtown.\
             [S2]Then we're going tomorrow morning.",
        ),
        RawRecord::text(
            "[S1]你听说了吗？今天下午的会议改到明天了。\
             [S2]真的吗？那太好了，我的报告还没写完呢。\
             [S1]哈哈哈，那你今晚可以好好准备一下。",
        ),
    ]
}

/// Items ready for the orchestrator plus the records the builder refused.
#[derive(Debug, Default)]
pub struct Batch {
    pub items: Vec<RequestItem>,
    pub rejected: Vec<RejectedRecord>,
}

/// Build every record; refusals are collected, not fatal.
pub fn build_batch(records: &[RawRecord], builder: &RequestBuilder) -> Batch {
    let mut batch = Batch::default();
    for (record, raw) in records.iter().enumerate() {
        match builder.build(raw) {
            Ok(item) => batch.items.push(item),
            Err(e) => {
                warn!(record, error = %e, "record rejected");
                batch.rejected.push(RejectedRecord {
                    record,
                    reason: e.to_string(),
                });
            }
        }
    }
    batch
}
