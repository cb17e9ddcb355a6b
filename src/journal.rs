use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::cycle::{FailureCause, FailureReport};
use crate::error::{CssdError, CssdResult, EntityRef};
use crate::traceability::TraceabilityLink;
use crate::validation::{Outcome, RejectionReason, Signature};
use crate::workflow::{ContaminationLevel, ItemType, Stage};

/// Every audited mutation in the CSSD core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    ItemRegistered {
        item_type: ItemType,
        department: String,
        contamination: ContaminationLevel,
        item_count: u32,
        required_soak_minutes: i64,
    },
    StageChanged {
        from: Stage,
        to: Stage,
        reason: Option<String>,
    },
    EmergencyOverride {
        reason: String,
    },
    InspectionRecorded {
        passed: bool,
        notes: Option<String>,
    },
    PackagingCompleted {
        weight_grams: u64,
    },
    LoadBuilt {
        autoclave: String,
        items: Vec<String>,
        total_grams: u64,
    },
    CycleStarted {
        load: String,
        autoclave: String,
        program: String,
    },
    CycleFailed {
        cause: FailureCause,
    },
    CycleCompleted,
    FailureReported {
        report: FailureReport,
    },
    AutoclaveReturnedToService,
    ValidationSubmitted {
        cycle: String,
        outcome: Outcome,
        content_hash: String,
    },
    ReleaseSigned {
        cycle: String,
        signature: Signature,
    },
    LoadRejected {
        cycle: String,
        reason: RejectionReason,
        comments: String,
    },
    /// An approved record closed without a signature because its cycle was rejected
    ValidationSuperseded {
        cycle: String,
        superseded_by: String,
    },
    LotOriginRegistered {
        cycle: String,
        expires_at: DateTime<Utc>,
    },
    PackLinked {
        link: TraceabilityLink,
    },
}

/// Entry as handed to the journal, before it is sequenced
#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub entity: EntityRef,
    pub event: AuditEvent,
    pub actor: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl PendingEntry {
    pub fn new(entity: EntityRef, event: AuditEvent, actor: Option<&str>, recorded_at: DateTime<Utc>) -> Self {
        Self {
            entity,
            event,
            actor: actor.map(str::to_string),
            recorded_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub sequence: u64,
    pub entity: EntityRef,
    pub event: AuditEvent,
    /// `None` when the change was driven by the engine rather than an operator
    pub actor: Option<String>,
    pub recorded_at: DateTime<Utc>,
    pub host: String,
}

/// Append-only audit log. Entries are never rewritten or removed.
#[async_trait]
pub trait AuditJournal: Send + Sync {
    /// Append every entry with consecutive sequence numbers, or none of them
    async fn append_batch(&self, entries: Vec<PendingEntry>) -> CssdResult<Vec<JournalEntry>>;

    async fn append(&self, entry: PendingEntry) -> CssdResult<JournalEntry> {
        self.append_batch(vec![entry])
            .await?
            .pop()
            .ok_or_else(|| CssdError::Journal {
                reason: "journal accepted the entry but returned nothing".to_string(),
            })
    }

    async fn entries(&self) -> CssdResult<Vec<JournalEntry>>;

    async fn entries_for(&self, entity: &EntityRef) -> CssdResult<Vec<JournalEntry>> {
        Ok(self
            .entries()
            .await?
            .into_iter()
            .filter(|e| &e.entity == entity)
            .collect())
    }
}

fn local_host() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

/// In-process journal used by tests and simulations
#[derive(Debug)]
pub struct MemoryJournal {
    entries: Mutex<Vec<JournalEntry>>,
    host: String,
}

impl Default for MemoryJournal {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            host: local_host(),
        }
    }
}

fn sequence_entries(entries: Vec<PendingEntry>, first: u64, host: &str) -> Vec<JournalEntry> {
    entries
        .into_iter()
        .zip(first..)
        .map(|(entry, sequence)| JournalEntry {
            sequence,
            entity: entry.entity,
            event: entry.event,
            actor: entry.actor,
            recorded_at: entry.recorded_at,
            host: host.to_string(),
        })
        .collect()
}

#[async_trait]
impl AuditJournal for MemoryJournal {
    async fn append_batch(&self, batch: Vec<PendingEntry>) -> CssdResult<Vec<JournalEntry>> {
        let mut entries = self.entries.lock().await;
        let sequenced = sequence_entries(batch, entries.len() as u64 + 1, &self.host);
        entries.extend(sequenced.iter().cloned());
        Ok(sequenced)
    }

    async fn entries(&self) -> CssdResult<Vec<JournalEntry>> {
        Ok(self.entries.lock().await.clone())
    }
}

/// JSON-lines journal on disk, one entry per line.
///
/// Appends take an exclusive `fd-lock` on the file and read the last
/// sequence number under that lock, so several handles or processes sharing
/// one file never interleave lines or reuse a sequence number.
#[derive(Debug)]
pub struct JsonlJournal {
    path: PathBuf,
    writer: Mutex<()>,
    host: String,
}

impl JsonlJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: Mutex::new(()),
            host: local_host(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> CssdResult<Vec<JournalEntry>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CssdError::Io(e)),
        };

        let mut entries = Vec::new();
        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<JournalEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    warn!(
                        path = %self.path.display(),
                        line = line_no + 1,
                        error = %e,
                        "Skipping unparseable journal line"
                    );
                }
            }
        }
        Ok(entries)
    }
}

/// Highest sequence number in the file content, skipping unparseable lines
fn last_sequence(content: &str) -> u64 {
    content
        .lines()
        .rev()
        .find_map(|line| serde_json::from_str::<JournalEntry>(line).ok())
        .map(|entry| entry.sequence)
        .unwrap_or(0)
}

fn write_batch(path: &Path, host: &str, batch: Vec<PendingEntry>) -> CssdResult<Vec<JournalEntry>> {
    let io_error = |e: std::io::Error| CssdError::Journal {
        reason: format!("{}: {e}", path.display()),
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(io_error)?;
        }
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)
        .map_err(io_error)?;
    let mut lock = fd_lock::RwLock::new(file);
    let mut guard = lock.write().map_err(io_error)?;

    let mut content = String::new();
    guard.read_to_string(&mut content).map_err(io_error)?;
    let sequenced = sequence_entries(batch, last_sequence(&content) + 1, host);

    let mut lines = String::new();
    for entry in &sequenced {
        lines.push_str(&serde_json::to_string(entry)?);
        lines.push('\n');
    }
    guard.write_all(lines.as_bytes()).map_err(io_error)?;
    guard.flush().map_err(io_error)?;
    Ok(sequenced)
}

#[async_trait]
impl AuditJournal for JsonlJournal {
    async fn append_batch(&self, batch: Vec<PendingEntry>) -> CssdResult<Vec<JournalEntry>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        let _writer = self.writer.lock().await;
        let path = self.path.clone();
        let host = self.host.clone();

        let sequenced = tokio::task::spawn_blocking(move || write_batch(&path, &host, batch))
            .await
            .map_err(|e| CssdError::Journal {
                reason: format!("journal writer task failed: {e}"),
            })??;

        if let (Some(first), Some(last)) = (sequenced.first(), sequenced.last()) {
            debug!(
                first = first.sequence,
                last = last.sequence,
                entity = %first.entity,
                "Journal entries appended"
            );
        }
        Ok(sequenced)
    }

    async fn entries(&self) -> CssdResult<Vec<JournalEntry>> {
        self.read_all().await
    }
}
