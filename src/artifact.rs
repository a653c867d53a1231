use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::{CaptureConfig, WorkMetrics};

const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%.3fZ";
const MAX_SUFFIX: u32 = 10_000;
// "-9999", the widest collision suffix
const SUFFIX_WIDTH: usize = 5;
const MAX_FILE_NAME: usize = 255;
const META_SUFFIX: &str = ".meta.json";

/// Opaque profile data produced by a backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TracePayload(Vec<u8>);

impl TracePayload {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }
}

impl From<Vec<u8>> for TracePayload {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for TracePayload {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

/// Persists trace payloads.
pub trait ArtifactWriter {
    /// Writes `payload` under `name`, along with what was measured while the
    /// work ran, and returns where the payload ended up.
    fn persist(
        &self,
        name: &str,
        payload: &TracePayload,
        metrics: &WorkMetrics,
        timestamp: DateTime<Utc>,
    ) -> io::Result<PathBuf>;
}

impl<W: ArtifactWriter + ?Sized> ArtifactWriter for Arc<W> {
    fn persist(
        &self,
        name: &str,
        payload: &TracePayload,
        metrics: &WorkMetrics,
        timestamp: DateTime<Utc>,
    ) -> io::Result<PathBuf> {
        (**self).persist(name, payload, metrics, timestamp)
    }
}

/// A captured trace on its way to storage.
#[derive(Debug)]
pub struct TraceArtifact {
    name: String,
    payload: TracePayload,
    metrics: WorkMetrics,
    captured_at: DateTime<Utc>,
    path: Option<PathBuf>,
}

impl TraceArtifact {
    pub(crate) fn new(name: &str, payload: TracePayload, metrics: WorkMetrics) -> Self {
        Self {
            name: name.to_string(),
            payload,
            metrics,
            captured_at: Utc::now(),
            path: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn payload(&self) -> &TracePayload {
        &self.payload
    }

    pub fn metrics(&self) -> &WorkMetrics {
        &self.metrics
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// Set once the artifact has been written.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub(crate) fn persist<W: ArtifactWriter + ?Sized>(&mut self, writer: &W) -> io::Result<&Path> {
        let path = writer.persist(&self.name, &self.payload, &self.metrics, self.captured_at)?;
        Ok(self.path.insert(path).as_path())
    }
}

/// Writes each trace to `<dir>/<label>-<timestamp>.<extension>`, with its
/// [`WorkMetrics`] in a JSON file of the same name plus `.meta.json`.
///
/// Files are staged in a temporary file next to the destination and moved into
/// place without overwriting anything, so a reader never sees a partial trace.
/// If the name is taken a numeric suffix is appended. Long labels are cut so
/// that every name fits in 255 bytes.
#[derive(Debug, Clone)]
pub struct FileArtifactWriter {
    dir: PathBuf,
    extension: String,
}

/// Contents of the `.meta.json` file written next to each trace.
#[derive(Debug, Serialize)]
struct ArtifactMeta<'a> {
    name: &'a str,
    trace_file: String,
    captured_at: String,
    payload_bytes: usize,
    polls: u32,
    wake_ms: f64,
    idle_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    instructions: Option<u64>,
}

impl FileArtifactWriter {
    pub fn new(dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            extension: extension.into(),
        }
    }

    pub fn from_config(config: &CaptureConfig) -> Self {
        Self::new(&config.output_dir, &config.extension)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where the metadata for the trace at `trace` is written.
    pub fn meta_path(trace: &Path) -> PathBuf {
        let mut name = trace.file_name().unwrap_or_default().to_os_string();
        name.push(META_SUFFIX);
        trace.with_file_name(name)
    }

    fn extension(&self) -> &str {
        self.extension.trim_start_matches('.')
    }

    fn file_name(&self, stem: &str, attempt: u32) -> String {
        let ext = self.extension();
        match (attempt, ext.is_empty()) {
            (0, true) => stem.to_string(),
            (0, false) => format!("{stem}.{ext}"),
            (n, true) => format!("{stem}-{n}"),
            (n, false) => format!("{stem}-{n}.{ext}"),
        }
    }

    /// Longest label that still leaves room for the timestamp, a collision
    /// suffix, the extension and the metadata suffix.
    fn label_budget(&self, stamp_len: usize) -> usize {
        let ext = match self.extension() {
            "" => 0,
            ext => ext.len() + 1,
        };
        let reserved = 1 + stamp_len + SUFFIX_WIDTH + ext + META_SUFFIX.len();
        MAX_FILE_NAME.saturating_sub(reserved).max(1)
    }

    fn write_trace(&self, stem: &str, payload: &TracePayload) -> io::Result<PathBuf> {
        let mut staged = NamedTempFile::new_in(&self.dir)?;
        staged.write_all(payload.as_bytes())?;
        staged.as_file().sync_all()?;

        for attempt in 0..MAX_SUFFIX {
            let path = self.dir.join(self.file_name(stem, attempt));
            match staged.persist_noclobber(&path) {
                Ok(_) => return Ok(path),
                Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => staged = e.file,
                Err(e) => return Err(e.error),
            }
        }

        Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("no free file name for trace {stem:?}"),
        ))
    }

    fn write_meta(&self, trace: &Path, meta: &ArtifactMeta<'_>) -> io::Result<()> {
        let mut staged = NamedTempFile::new_in(&self.dir)?;
        serde_json::to_writer_pretty(&mut staged, meta)?;
        staged.as_file().sync_all()?;
        // the trace name was claimed exclusively, so its metadata name is ours
        staged.persist(Self::meta_path(trace)).map_err(|e| e.error)?;
        Ok(())
    }
}

impl ArtifactWriter for FileArtifactWriter {
    fn persist(
        &self,
        name: &str,
        payload: &TracePayload,
        metrics: &WorkMetrics,
        timestamp: DateTime<Utc>,
    ) -> io::Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;

        let stamp = timestamp.format(TIMESTAMP_FORMAT).to_string();
        let mut label = sanitize_label(name);
        // ASCII after sanitizing, so any byte index is a char boundary
        label.truncate(self.label_budget(stamp.len()));
        let path = self.write_trace(&format!("{label}-{stamp}"), payload)?;

        let meta = ArtifactMeta {
            name,
            trace_file: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            captured_at: timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            payload_bytes: payload.len(),
            polls: metrics.polls,
            wake_ms: metrics.wake_time.as_micros() as f64 / 1e3,
            idle_ms: metrics.idle_time.as_micros() as f64 / 1e3,
            instructions: metrics.instructions,
        };
        if let Err(e) = self.write_meta(&path, &meta) {
            if let Err(cleanup) = std::fs::remove_file(&path) {
                tracing::warn!(
                    path = %path.display(),
                    error = %cleanup,
                    "failed to remove trace without metadata"
                );
            }
            return Err(e);
        }

        Ok(path)
    }
}

fn sanitize_label(label: &str) -> String {
    label
        .trim()
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '-' | '_' => c,
            _ => '_',
        })
        .collect()
}
