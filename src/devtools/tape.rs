//! JSONL tape of dispatched inspector events.
//!
//! The first line is a header carrying the schema version; every following line
//! is one event together with the state the inspector materialized for it.

use std::cell::{Cell, RefCell};
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::inspector::{Inspector, InspectorFactory, InspectorState, Listener, Reducer};

pub const TAPE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TapeEntry {
    pub seq: u64,
    pub ts_ms: u64,
    pub event: Value,
    pub state: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum TapeJsonlLine {
    Header {
        schema_version: u32,
        created_at_ms: u64,
        instance_name: String,
    },
    Entry {
        entry: TapeEntry,
    },
}

/// A tape read back from disk.
#[derive(Debug, Clone)]
pub struct Tape {
    pub schema_version: u32,
    pub created_at_ms: u64,
    pub instance_name: String,
    pub entries: Vec<TapeEntry>,
}

impl Tape {
    pub fn read_jsonl_from_path(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);

        let mut header: Option<(u32, u64, String)> = None;
        let mut entries = Vec::new();

        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let parsed: TapeJsonlLine =
                serde_json::from_str(&line).map_err(|e| io::Error::other(format!("{e}")))?;
            match parsed {
                TapeJsonlLine::Header {
                    schema_version,
                    created_at_ms,
                    instance_name,
                } => {
                    if idx != 0 {
                        return Err(io::Error::other("tape header must be the first JSONL line"));
                    }
                    header = Some((schema_version, created_at_ms, instance_name));
                }
                TapeJsonlLine::Entry { entry } => entries.push(entry),
            }
        }

        let (schema_version, created_at_ms, instance_name) =
            header.ok_or_else(|| io::Error::other("missing tape header"))?;

        Ok(Self {
            schema_version,
            created_at_ms,
            instance_name,
            entries,
        })
    }

    /// The `type` of every recorded event, in order.
    pub fn signatures(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter_map(|entry| entry.event.get("type").and_then(Value::as_str))
            .map(str::to_string)
            .collect()
    }
}

pub struct TapeWriter {
    path: PathBuf,
    seq: Cell<u64>,
    writer: RefCell<BufWriter<File>>,
}

impl TapeWriter {
    pub fn create(path: &Path, instance_name: &str) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        let header = TapeJsonlLine::Header {
            schema_version: TAPE_SCHEMA_VERSION,
            created_at_ms: now_ms(),
            instance_name: instance_name.to_string(),
        };
        writeln!(
            writer,
            "{}",
            serde_json::to_string(&header).map_err(io::Error::other)?
        )?;
        writer.flush()?;
        Ok(Self {
            path: path.to_path_buf(),
            seq: Cell::new(1),
            writer: RefCell::new(writer),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, event: &Value, state: &Value) -> io::Result<()> {
        let seq = self.seq.get();
        self.seq.set(seq + 1);
        let line = TapeJsonlLine::Entry {
            entry: TapeEntry {
                seq,
                ts_ms: now_ms(),
                event: event.clone(),
                state: state.clone(),
            },
        };
        let json = serde_json::to_string(&line).map_err(io::Error::other)?;
        let mut writer = self.writer.borrow_mut();
        writeln!(writer, "{json}")?;
        writer.flush()?;
        Ok(())
    }
}

/// Forwards to another inspector and tapes every dispatched event.
pub struct TapeInspector {
    inner: Rc<dyn Inspector>,
    writer: TapeWriter,
}

impl Inspector for TapeInspector {
    fn dispatch(&self, event: &Value) {
        self.inner.dispatch(event);
        let state = self.inner.get_state();
        if let Err(e) = self.writer.append(event, &state) {
            tracing::warn!(
                path = %self.writer.path().display(),
                error = %e,
                "Failed to append event to tape"
            );
        }
    }

    fn subscribe(&self, listener: Listener) {
        self.inner.subscribe(listener);
    }

    fn get_state(&self) -> InspectorState {
        self.inner.get_state()
    }
}

/// Wraps a factory so its inspectors are taped to `path`.
pub struct TapeFactory {
    inner: Rc<dyn InspectorFactory>,
    path: PathBuf,
}

impl TapeFactory {
    pub fn new(inner: Rc<dyn InspectorFactory>, path: impl Into<PathBuf>) -> Self {
        Self {
            inner,
            path: path.into(),
        }
    }
}

impl InspectorFactory for TapeFactory {
    fn create(
        &self,
        reducer: Reducer,
        initial: InspectorState,
        instance_name: &str,
    ) -> Rc<dyn Inspector> {
        let inner = self.inner.create(reducer, initial, instance_name);
        match TapeWriter::create(&self.path, instance_name) {
            Ok(writer) => Rc::new(TapeInspector { inner, writer }),
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to create tape; continuing untaped"
                );
                inner
            }
        }
    }
}

fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
