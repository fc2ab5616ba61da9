use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

const OUTPUT_TRUNCATE_CHARS: usize = 500;
const ROTATION_CHECK_INTERVAL: StdDuration = StdDuration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditKind {
    Command,
    Output,
    Connection,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub timestamp: String,
    #[serde(rename = "clientSessionId")]
    pub client_session_id: String,
    #[serde(rename = "clientLabel")]
    pub client_label: String,
    pub kind: AuditKind,
    pub payload: String,
}

/// Append-only JSON-per-line audit pipeline, serialized through a single
/// queue (spec.md 4.8, 5). Best-effort: a full or closed queue never blocks
/// live traffic.
pub struct AuditSink {
    tx: mpsc::UnboundedSender<AuditRecord>,
    task: JoinHandle<()>,
}

impl AuditSink {
    pub fn start(path: PathBuf, retention_days: u32) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_writer(path, retention_days, rx));
        Self { tx, task }
    }

    pub fn log_command(&self, session_id: &str, client_label: &str, command: &str) {
        self.enqueue(session_id, client_label, AuditKind::Command, command.to_string());
    }

    pub fn log_output(&self, session_id: &str, client_label: &str, bytes: &[u8]) {
        let text = String::from_utf8_lossy(bytes);
        let truncated: String = text.chars().take(OUTPUT_TRUNCATE_CHARS).collect();
        self.enqueue(session_id, client_label, AuditKind::Output, truncated);
    }

    pub fn log_connection(&self, session_id: &str, client_label: &str, cause: &str) {
        self.enqueue(session_id, client_label, AuditKind::Connection, cause.to_string());
    }

    fn enqueue(&self, session_id: &str, client_label: &str, kind: AuditKind, payload: String) {
        let record = AuditRecord {
            timestamp: now_iso8601_ms(),
            client_session_id: session_id.to_string(),
            client_label: client_label.to_string(),
            kind,
            payload,
        };
        if self.tx.send(record).is_err() {
            warn!("audit sink writer task is gone; dropping record");
        }
    }

    pub async fn shutdown(self) {
        drop(self.tx);
        let _ = self.task.await;
    }
}

async fn run_writer(path: PathBuf, retention_days: u32, mut rx: mpsc::UnboundedReceiver<AuditRecord>) {
    rotate_if_stale(&path, retention_days);
    let mut interval = tokio::time::interval(ROTATION_CHECK_INTERVAL);
    interval.tick().await; // first tick fires immediately; already rotated above

    loop {
        tokio::select! {
            record = rx.recv() => {
                match record {
                    Some(record) => append(&path, &record),
                    None => break,
                }
            }
            _ = interval.tick() => rotate_if_stale(&path, retention_days),
        }
    }
}

fn append(path: &Path, record: &AuditRecord) {
    let line = match serde_json::to_string(record) {
        Ok(line) => line,
        Err(err) => {
            warn!("failed to serialize audit record: {err}");
            return;
        }
    };

    let result = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .and_then(|mut file| {
            file.write_all(line.as_bytes())?;
            file.write_all(b"\n")
        });

    if let Err(err) = result {
        warn!("failed to append audit record to {}: {err}", path.display());
        return;
    }

    if let Err(err) = fs::set_permissions(path, fs::Permissions::from_mode(0o600)) {
        warn!("failed to set audit log permissions: {err}");
    }
}

fn rotate_if_stale(path: &Path, retention_days: u32) {
    let metadata = match fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(_) => return,
    };

    let Ok(modified) = metadata.modified() else {
        return;
    };
    let age = match modified.elapsed() {
        Ok(age) => age,
        Err(_) => return,
    };

    let retention = StdDuration::from_secs(u64::from(retention_days) * 86_400);
    if age <= retention {
        return;
    }

    let suffix = now_iso8601_ms().replace([':', '.'], "-");
    let archive = path.with_extension(format!("{suffix}.log"));
    if let Err(err) = fs::rename(path, &archive) {
        warn!("failed to rotate audit log: {err}");
        return;
    }

    prune_archives(path, retention_days);
}

fn prune_archives(active_path: &Path, retention_days: u32) {
    let Some(parent) = active_path.parent() else {
        return;
    };
    let Some(stem) = active_path.file_stem().and_then(|s| s.to_str()) else {
        return;
    };

    let retention = StdDuration::from_secs(u64::from(retention_days) * 86_400);
    let Ok(entries) = fs::read_dir(parent) else {
        return;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if path == active_path || !name.starts_with(stem) || !name.ends_with(".log") {
            continue;
        }
        if let Ok(metadata) = entry.metadata() {
            if let Ok(modified) = metadata.modified() {
                if modified.elapsed().map(|age| age > retention).unwrap_or(false) {
                    let _ = fs::remove_file(&path);
                }
            }
        }
    }
}

fn now_iso8601_ms() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}
