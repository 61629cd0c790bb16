//! `temp://<id>` host provider for uploaded graphs.
//!
//! Uploads live in `<temp_dir>/motifstudio_uploads/` next to a
//! `metadata.json` table that survives restarts. The table is rewritten
//! under an exclusive `fs2` lock so two processes sharing the directory
//! never interleave writes. Expired uploads stop being accepted at once and
//! are deleted at startup or on the next explicit cleanup.

use crate::core::error::{MotifStudioError, Result};
use crate::graph::formats::{has_graph_suffix, read_graph_file};
use crate::graph::HostGraph;
use crate::providers::{strip_scheme, HostProvider, UploadStore, UploadedFile};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tempfile::NamedTempFile;
use tracing::{info, warn};
use uuid::Uuid;

pub const SCHEME: &str = "temp://";

const ORIGIN: &str = "provider:temporary";
const UPLOAD_SUBDIR: &str = "motifstudio_uploads";
const METADATA_FILE: &str = "metadata.json";
const LOCK_FILE: &str = ".metadata.lock";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemporaryOptions {
    /// Parent of the upload directory. The system temp dir when unset.
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
    #[serde(default = "default_expiration_days")]
    pub expiration_days: u32,
}

fn default_expiration_days() -> u32 {
    14
}

impl Default for TemporaryOptions {
    fn default() -> Self {
        Self {
            temp_dir: None,
            expiration_days: default_expiration_days(),
        }
    }
}

#[derive(Debug)]
pub struct TemporaryGraphHostProvider {
    upload_dir: PathBuf,
    expiration: ChronoDuration,
    files: RwLock<BTreeMap<String, UploadedFile>>,
}

impl TemporaryGraphHostProvider {
    /// Opens (creating if needed) the upload directory, reloads its metadata,
    /// and purges expired uploads.
    pub fn new(options: TemporaryOptions) -> Result<Self> {
        let base = options.temp_dir.unwrap_or_else(std::env::temp_dir);
        let upload_dir = base.join(UPLOAD_SUBDIR);
        std::fs::create_dir_all(&upload_dir).map_err(|e| {
            MotifStudioError::backend_io(
                format!("Cannot create upload directory {}: {e}", upload_dir.display()),
                ORIGIN,
            )
        })?;

        let provider = Self {
            files: RwLock::new(load_metadata(&upload_dir)),
            upload_dir,
            expiration: ChronoDuration::days(i64::from(options.expiration_days)),
        };
        provider.purge_expired()?;
        Ok(provider)
    }

    #[must_use]
    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    fn live_entry(&self, uri: &str) -> Option<UploadedFile> {
        let temp_id = uri.strip_prefix(SCHEME)?;
        let files = self.files.read().unwrap_or_else(PoisonError::into_inner);
        files
            .get(temp_id)
            .filter(|f| !f.is_expired_at(Utc::now()))
            .cloned()
    }

    /// The live upload behind `uri`, or a backend error naming its id.
    fn resolve(&self, uri: &str) -> Result<UploadedFile> {
        let temp_id = strip_scheme(uri, SCHEME, ORIGIN)?;
        self.live_entry(uri).ok_or_else(|| {
            MotifStudioError::backend_io(
                format!("Temporary file not found or expired for ID {temp_id}"),
                ORIGIN,
            )
            .with_context("temp_id", temp_id)
        })
    }

    /// Deletes every expired upload. Returns how many were removed.
    pub fn purge_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let mut files = self.files.write().unwrap_or_else(PoisonError::into_inner);
        let expired: Vec<String> = files
            .values()
            .filter(|f| f.is_expired_at(now))
            .map(|f| f.temp_id.clone())
            .collect();
        for temp_id in &expired {
            if let Some(file) = files.remove(temp_id) {
                remove_quietly(&file.filepath);
                info!(temp_id = %temp_id, "purged expired upload");
            }
        }
        if !expired.is_empty() {
            self.save_metadata(&files)?;
        }
        Ok(expired.len())
    }

    fn save_metadata(&self, files: &BTreeMap<String, UploadedFile>) -> Result<()> {
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.upload_dir.join(LOCK_FILE))?;
        lock.lock_exclusive()?;

        let result = (|| -> Result<()> {
            let mut staged = NamedTempFile::new_in(&self.upload_dir)?;
            serde_json::to_writer_pretty(&mut staged, files).map_err(|e| {
                MotifStudioError::system("metadata_write_failed", e.to_string(), ORIGIN)
            })?;
            staged.flush()?;
            staged
                .persist(self.upload_dir.join(METADATA_FILE))
                .map_err(|e| MotifStudioError::backend_io(e.to_string(), ORIGIN))?;
            Ok(())
        })();

        let _ = FileExt::unlock(&lock);
        result
    }
}

fn load_metadata(upload_dir: &Path) -> BTreeMap<String, UploadedFile> {
    let path = upload_dir.join(METADATA_FILE);
    let Ok(file) = File::open(&path) else {
        return BTreeMap::new();
    };
    if let Err(e) = file.lock_shared() {
        warn!(path = %path.display(), error = %e, "cannot lock upload metadata");
    }
    let parsed: std::result::Result<BTreeMap<String, UploadedFile>, _> =
        serde_json::from_reader(&file);
    let _ = FileExt::unlock(&file);
    match parsed {
        Ok(files) => files
            .into_iter()
            .filter(|(_, f)| f.filepath.exists())
            .collect(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring unreadable upload metadata");
            BTreeMap::new()
        }
    }
}

fn remove_quietly(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to remove upload");
        }
    }
}

/// Storage suffix for an uploaded filename. Files without an extension are
/// assumed to be GraphML.
fn upload_suffix(original_filename: &str) -> Option<String> {
    let lower = original_filename.to_ascii_lowercase();
    if lower.ends_with(".graphml.gz") {
        return Some(".graphml.gz".to_string());
    }
    match Path::new(&lower).extension().and_then(|e| e.to_str()) {
        None => Some(".graphml".to_string()),
        Some(ext) => {
            let suffix = format!(".{ext}");
            has_graph_suffix(&suffix).then_some(suffix)
        }
    }
}

impl HostProvider for TemporaryGraphHostProvider {
    fn provider_type(&self) -> &str {
        "TemporaryGraphHostProvider"
    }

    /// Known, unexpired uploads only. Never touches disk.
    fn accepts(&self, uri: &str) -> bool {
        self.live_entry(uri)
            .is_some_and(|f| has_graph_suffix(&f.filepath.to_string_lossy()))
    }

    fn load_graph(&self, uri: &str) -> Result<HostGraph> {
        read_graph_file(&self.resolve(uri)?.filepath)
    }

    fn prepare(&self, uri: &str) -> Result<Option<Arc<dyn HostProvider>>> {
        let file = self.resolve(uri)?;
        Ok(Some(Arc::new(UploadSnapshot {
            uri: uri.to_string(),
            filepath: file.filepath,
        })))
    }

    fn upload_store(&self) -> Option<&dyn UploadStore> {
        Some(self)
    }
}

/// One upload resolved before a fork. Reads its file and touches no shared
/// state.
#[derive(Debug)]
struct UploadSnapshot {
    uri: String,
    filepath: PathBuf,
}

impl HostProvider for UploadSnapshot {
    fn provider_type(&self) -> &str {
        "TemporaryGraphHostProvider"
    }

    fn accepts(&self, uri: &str) -> bool {
        uri == self.uri
    }

    fn load_graph(&self, uri: &str) -> Result<HostGraph> {
        if uri != self.uri {
            return Err(MotifStudioError::backend_io(
                format!("Upload snapshot for {} cannot serve {uri}", self.uri),
                ORIGIN,
            ));
        }
        read_graph_file(&self.filepath)
    }
}

impl UploadStore for TemporaryGraphHostProvider {
    fn store_file(&self, content: &[u8], original_filename: &str) -> Result<UploadedFile> {
        if content.is_empty() {
            return Err(MotifStudioError::user("empty_upload", "Empty file uploaded", ORIGIN));
        }
        let suffix = upload_suffix(original_filename).ok_or_else(|| {
            MotifStudioError::user(
                "unsupported_upload_format",
                format!("Unsupported graph file: {original_filename}"),
                ORIGIN,
            )
            .with_hint("Upload a .graphml, .graphml.gz, or .csv file")
        })?;

        let temp_id = Uuid::new_v4().to_string();
        let filepath = self.upload_dir.join(format!("{temp_id}{suffix}"));
        std::fs::write(&filepath, content)?;

        let created_at: DateTime<Utc> = Utc::now();
        let record = UploadedFile {
            temp_id: temp_id.clone(),
            filepath,
            original_filename: original_filename.to_string(),
            file_size: content.len() as u64,
            created_at,
            expires_at: created_at + self.expiration,
        };

        let mut files = self.files.write().unwrap_or_else(PoisonError::into_inner);
        files.insert(temp_id.clone(), record.clone());
        self.save_metadata(&files)?;
        info!(temp_id = %temp_id, bytes = record.file_size, "stored upload");
        Ok(record)
    }

    fn cleanup_file(&self, temp_id: &str) -> Result<bool> {
        let removed = {
            let mut files = self.files.write().unwrap_or_else(PoisonError::into_inner);
            let removed = files.remove(temp_id);
            if let Some(file) = &removed {
                remove_quietly(&file.filepath);
                self.save_metadata(&files)?;
                info!(temp_id = %temp_id, "removed upload");
            }
            removed.is_some()
        };
        self.purge_expired()?;
        Ok(removed)
    }

    fn list_files(&self) -> Result<Vec<UploadedFile>> {
        let now = Utc::now();
        let files = self.files.read().unwrap_or_else(PoisonError::into_inner);
        let mut live: Vec<UploadedFile> = files
            .values()
            .filter(|f| !f.is_expired_at(now))
            .cloned()
            .collect();
        live.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.temp_id.cmp(&b.temp_id)));
        Ok(live)
    }

    fn file_info(&self, temp_id: &str) -> Result<Option<UploadedFile>> {
        Ok(self
            .live_entry(&format!("{SCHEME}{temp_id}"))
            .filter(|f| f.filepath.exists()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::executor::{run_bounded, ExecutionOutcome, ResourceLimits};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    const GRAPHML: &[u8] = br#"<graphml><graph edgedefault="undirected">
        <edge source="a" target="b"/><edge source="b" target="c"/>
    </graph></graphml>"#;

    fn provider_in(dir: &Path, expiration_days: u32) -> TemporaryGraphHostProvider {
        TemporaryGraphHostProvider::new(TemporaryOptions {
            temp_dir: Some(dir.to_path_buf()),
            expiration_days,
        })
        .expect("provider")
    }

    #[test]
    fn stored_upload_is_accepted_and_loadable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let provider = provider_in(dir.path(), 14);

        let record = provider.store_file(GRAPHML, "graph.graphml").expect("store");
        assert_eq!(record.file_size, GRAPHML.len() as u64);
        assert!(record.filepath.starts_with(provider.upload_dir()));

        let uri = record.uri();
        assert!(provider.accepts(&uri));
        assert_eq!(provider.edge_count(&uri).expect("count"), 2);
        assert!(!provider.accepts("temp://unknown"));
        assert!(!provider.accepts("file:///graph.graphml"));
    }

    #[test]
    fn prepared_upload_loads_while_metadata_is_locked() {
        let dir = tempfile::tempdir().expect("tempdir");
        let provider = Arc::new(provider_in(dir.path(), 14));
        let uri = provider.store_file(GRAPHML, "graph.graphml").expect("store").uri();
        let worker = provider.prepare(&uri).expect("prepare").expect("snapshot");

        let (locked_tx, locked_rx) = mpsc::channel();
        let holder = {
            let provider = Arc::clone(&provider);
            thread::spawn(move || {
                let _files = provider.files.write().unwrap_or_else(PoisonError::into_inner);
                locked_tx.send(()).expect("signal");
                thread::sleep(Duration::from_millis(500));
            })
        };
        locked_rx.recv().expect("lock taken");

        let limits = ResourceLimits::unbounded().with_max_duration(Duration::from_secs(3));
        let outcome = run_bounded("edge_count", &limits, || worker.edge_count(&uri));
        holder.join().expect("holder");
        assert_eq!(outcome, ExecutionOutcome::Success(2));
    }

    #[test]
    fn unknown_uploads_fail_to_prepare() {
        let dir = tempfile::tempdir().expect("tempdir");
        let provider = provider_in(dir.path(), 14);
        let Err(err) = provider.prepare("temp://missing") else {
            panic!("missing");
        };
        assert_eq!(err.code, "backend_io");

        let record = provider.store_file(GRAPHML, "graph.graphml").expect("store");
        let worker = provider.prepare(&record.uri()).expect("prepare").expect("snapshot");
        assert!(worker.accepts(&record.uri()));
        assert!(worker.load_graph("temp://other").is_err());
    }

    #[test]
    fn metadata_survives_restart() {
        let dir = tempfile::tempdir().expect("tempdir");
        let temp_id = provider_in(dir.path(), 14)
            .store_file(GRAPHML, "graph.graphml")
            .expect("store")
            .temp_id;

        let reopened = provider_in(dir.path(), 14);
        let info = reopened.file_info(&temp_id).expect("info").expect("present");
        assert_eq!(info.original_filename, "graph.graphml");
        assert_eq!(reopened.list_files().expect("list").len(), 1);
    }

    #[test]
    fn expired_uploads_are_refused_then_purged() {
        let dir = tempfile::tempdir().expect("tempdir");
        let provider = provider_in(dir.path(), 0);
        let record = provider.store_file(GRAPHML, "graph.graphml").expect("store");

        assert!(!provider.accepts(&record.uri()));
        assert!(record.filepath.exists(), "accepts must not delete");
        assert!(provider.list_files().expect("list").is_empty());

        let reopened = provider_in(dir.path(), 0);
        assert!(!record.filepath.exists());
        assert!(reopened.file_info(&record.temp_id).expect("info").is_none());
    }

    #[test]
    fn cleanup_removes_file_and_entry() {
        let dir = tempfile::tempdir().expect("tempdir");
        let provider = provider_in(dir.path(), 14);
        let record = provider.store_file(b"source,target\na,b\n", "edges.csv").expect("store");

        assert!(provider.cleanup_file(&record.temp_id).expect("cleanup"));
        assert!(!record.filepath.exists());
        assert!(!provider.accepts(&record.uri()));
        assert!(!provider.cleanup_file(&record.temp_id).expect("cleanup"));
    }

    #[test]
    fn rejects_empty_and_unsupported_uploads() {
        let dir = tempfile::tempdir().expect("tempdir");
        let provider = provider_in(dir.path(), 14);
        assert_eq!(
            provider.store_file(b"", "g.graphml").expect_err("empty").code,
            "empty_upload"
        );
        assert_eq!(
            provider.store_file(b"<gexf/>", "g.gexf").expect_err("gexf").code,
            "unsupported_upload_format"
        );
    }

    #[test]
    fn suffixes_follow_the_original_filename() {
        assert_eq!(upload_suffix("G.GraphML.gz").as_deref(), Some(".graphml.gz"));
        assert_eq!(upload_suffix("edges.csv").as_deref(), Some(".csv"));
        assert_eq!(upload_suffix("noext").as_deref(), Some(".graphml"));
        assert_eq!(upload_suffix("g.gml"), None);
    }
}
