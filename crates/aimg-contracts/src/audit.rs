use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::request::{ImageSize, RequestDescriptor};

/// One line of the audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    #[serde(rename = "type")]
    pub kind: String,
    pub request_id: String,
    pub ts: String,
    pub input: String,
    pub output: String,
    pub model: String,
    pub size: ImageSize,
    pub n: u8,
}

impl AuditRecord {
    pub fn for_request(request_id: &str, descriptor: &RequestDescriptor, model: &str) -> Self {
        Self {
            kind: descriptor.mode.audit_label().to_string(),
            request_id: request_id.to_string(),
            ts: now_utc_iso(),
            input: descriptor.audit_input(),
            output: descriptor.output_template.to_string_lossy().to_string(),
            model: model.to_string(),
            size: descriptor.size,
            n: descriptor.count,
        }
    }
}

/// Append-only writer for the request audit log.
///
/// - one compact JSON object per line
/// - the file is opened, appended and closed on every call
/// - parent directories are created on demand
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &AuditRecord) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed creating {}", parent.display()))?;
            }
        }

        let line = serde_json::to_string(record)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed opening {}", self.path.display()))?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        Ok(())
    }
}

pub fn new_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, false)
}
