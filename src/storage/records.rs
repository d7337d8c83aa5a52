use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use anyhow::{Context, Result};
use git2::{Oid, Repository, Signature};
use serde::{Deserialize, Serialize};

use crate::core::subtitle::{normalize_for_similarity, PersistentId};
use crate::utils::content_hash;

/// Version of the stored records payload
pub const SCHEMA_VERSION: u8 = 1;
/// Warn when a single records note grows beyond this size.
const NOTE_SIZE_WARN_BYTES: usize = 512 * 1024;
/// Reject note payloads above this size to avoid pathological note objects.
const NOTE_SIZE_HARD_LIMIT_BYTES: usize = 4 * 1024 * 1024;

/// Stored identity of one subtitle at one commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtitleRecord {
    pub persistent_id: PersistentId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    /// Truncated SHA-256 of the normalized content
    pub content_hash: String,
}

impl SubtitleRecord {
    pub fn new(persistent_id: PersistentId, record_id: Option<String>, content: &str) -> Self {
        Self {
            persistent_id,
            record_id,
            content_hash: content_hash(&normalize_for_similarity(content)),
        }
    }

    /// Whether `content_sim` is the content this record was written for
    pub fn matches(&self, content_sim: &str) -> bool {
        self.content_hash == content_hash(content_sim)
    }
}

/// Records of every tracked file, keyed by path
pub type FileRecords = BTreeMap<String, Vec<SubtitleRecord>>;

/// Payload stored per commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordsNote {
    pub version: u8,
    /// RFC 3339 time the records were written
    pub tracked_at: String,
    pub files: FileRecords,
}

impl RecordsNote {
    pub fn new(files: FileRecords) -> Self {
        Self {
            version: SCHEMA_VERSION,
            tracked_at: chrono::Utc::now().to_rfc3339(),
            files,
        }
    }
}

/// Per-commit storage of subtitle records
pub trait SubtitleRecordStore {
    /// All records stored for a commit, empty when nothing was stored
    fn load_all(&self, commit: &str) -> Result<FileRecords>;

    /// Replace everything stored for a commit
    fn save_all(&self, commit: &str, files: &FileRecords) -> Result<()>;

    /// Every real persistent ID present in the store
    fn persistent_ids(&self) -> Result<BTreeSet<String>>;

    /// Records of one file at a commit
    fn load(&self, path: &str, commit: &str) -> Result<Option<Vec<SubtitleRecord>>> {
        Ok(self.load_all(commit)?.remove(path))
    }

    /// Store the records of one file, keeping the other files of the commit
    fn save(&self, commit: &str, path: &str, records: &[SubtitleRecord]) -> Result<()> {
        let mut files = self.load_all(commit)?;
        files.insert(path.to_string(), records.to_vec());
        self.save_all(commit, &files)
    }
}

/// Git notes storage for subtitle records
pub struct NotesRecordStore<'a> {
    repo: &'a Repository,
    notes_ref: String,
}

impl<'a> NotesRecordStore<'a> {
    pub fn new(repo: &'a Repository, notes_ref: impl Into<String>) -> Self {
        Self {
            repo,
            notes_ref: notes_ref.into(),
        }
    }

    fn commit_oid(&self, commit: &str) -> Result<Oid> {
        let obj = self
            .repo
            .revparse_single(commit)
            .with_context(|| format!("Failed to resolve '{}'", commit))?;
        let commit = obj
            .peel_to_commit()
            .with_context(|| format!("'{}' is not a valid commit reference", commit))?;
        Ok(commit.id())
    }

    /// Fetch the records note of a commit
    pub fn fetch(&self, commit_oid: Oid) -> Result<Option<RecordsNote>> {
        match self.repo.find_note(Some(&self.notes_ref), commit_oid) {
            Ok(note) => {
                if let Some(message) = note.message() {
                    let records: RecordsNote =
                        serde_json::from_str(message).context("Failed to parse subtitle records JSON")?;
                    warn_on_schema_version_mismatch(commit_oid, records.version);
                    Ok(Some(records))
                } else {
                    Ok(None)
                }
            }
            Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e).context("Failed to read git note"),
        }
    }

    /// List all commits with stored records
    pub fn list_tracked_commits(&self) -> Result<Vec<Oid>> {
        let mut commits = Vec::new();

        if let Ok(notes) = self.repo.notes(Some(&self.notes_ref)) {
            for (_, commit_oid) in notes.flatten() {
                commits.push(commit_oid);
            }
        }

        Ok(commits)
    }

    /// Get default signature from git config
    fn get_signature(&self) -> Result<Signature<'static>> {
        if let Ok(sig) = self.repo.signature() {
            return Ok(Signature::now(
                sig.name().unwrap_or("subtrack"),
                sig.email().unwrap_or("subtrack@local"),
            )?);
        }

        Ok(Signature::now("subtrack", "subtrack@local")?)
    }
}

impl SubtitleRecordStore for NotesRecordStore<'_> {
    fn load_all(&self, commit: &str) -> Result<FileRecords> {
        let oid = self.commit_oid(commit)?;
        Ok(self.fetch(oid)?.map(|note| note.files).unwrap_or_default())
    }

    fn save_all(&self, commit: &str, files: &FileRecords) -> Result<()> {
        let oid = self.commit_oid(commit)?;
        let json = serde_json::to_string(&RecordsNote::new(files.clone()))
            .context("Failed to serialize subtitle records to JSON")?;
        if let Some(warning) = evaluate_note_payload_size(json.len())? {
            eprintln!("subtrack: Warning - {warning}");
        }

        let sig = self.get_signature()?;
        self.repo
            .note(&sig, &sig, Some(&self.notes_ref), oid, &json, true)
            .context("Failed to create git note")?;
        Ok(())
    }

    fn persistent_ids(&self) -> Result<BTreeSet<String>> {
        let mut ids = BTreeSet::new();
        for oid in self.list_tracked_commits()? {
            if let Some(note) = self.fetch(oid)? {
                collect_real_ids(&note.files, &mut ids);
            }
        }
        Ok(ids)
    }
}

/// In-memory record store
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    commits: Mutex<BTreeMap<String, FileRecords>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SubtitleRecordStore for MemoryRecordStore {
    fn load_all(&self, commit: &str) -> Result<FileRecords> {
        let commits = self
            .commits
            .lock()
            .map_err(|_| anyhow::anyhow!("Record store lock poisoned"))?;
        Ok(commits.get(commit).cloned().unwrap_or_default())
    }

    fn save_all(&self, commit: &str, files: &FileRecords) -> Result<()> {
        let mut commits = self
            .commits
            .lock()
            .map_err(|_| anyhow::anyhow!("Record store lock poisoned"))?;
        commits.insert(commit.to_string(), files.clone());
        Ok(())
    }

    fn persistent_ids(&self) -> Result<BTreeSet<String>> {
        let commits = self
            .commits
            .lock()
            .map_err(|_| anyhow::anyhow!("Record store lock poisoned"))?;
        let mut ids = BTreeSet::new();
        for files in commits.values() {
            collect_real_ids(files, &mut ids);
        }
        Ok(ids)
    }
}

fn collect_real_ids(files: &FileRecords, ids: &mut BTreeSet<String>) {
    for record in files.values().flatten() {
        if let PersistentId::Real(id) = &record.persistent_id {
            ids.insert(id.clone());
        }
    }
}

fn evaluate_note_payload_size(payload_bytes: usize) -> Result<Option<String>> {
    if payload_bytes > NOTE_SIZE_HARD_LIMIT_BYTES {
        anyhow::bail!(
            "Subtitle records payload is too large for a git note: {} (limit: {}). \
Track fewer files per commit or split large documents.",
            format_bytes(payload_bytes),
            format_bytes(NOTE_SIZE_HARD_LIMIT_BYTES)
        );
    }

    if payload_bytes > NOTE_SIZE_WARN_BYTES {
        return Ok(Some(format!(
            "large subtitle records payload detected: {} (warning threshold: {}).",
            format_bytes(payload_bytes),
            format_bytes(NOTE_SIZE_WARN_BYTES)
        )));
    }

    Ok(None)
}

fn format_bytes(bytes: usize) -> String {
    const KIB: f64 = 1024.0;
    const MIB: f64 = KIB * 1024.0;
    let bytes_f64 = bytes as f64;

    if bytes_f64 >= MIB {
        format!("{:.2} MiB", bytes_f64 / MIB)
    } else if bytes_f64 >= KIB {
        format!("{:.1} KiB", bytes_f64 / KIB)
    } else {
        format!("{bytes} B")
    }
}

fn warn_on_schema_version_mismatch(commit_oid: Oid, note_version: u8) {
    if note_version == SCHEMA_VERSION {
        return;
    }

    if note_version < SCHEMA_VERSION {
        eprintln!(
            "subtrack: Warning - commit {} uses records schema v{} (current is v{}); continuing in compatibility mode.",
            commit_oid, note_version, SCHEMA_VERSION
        );
    } else {
        eprintln!(
            "subtrack: Warning - commit {} uses newer records schema v{} (this build supports v{}); some fields may be ignored.",
            commit_oid, note_version, SCHEMA_VERSION
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const NOTES_REF: &str = "refs/notes/subtrack";

    fn create_test_repo() -> (TempDir, Repository) {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();

        {
            let sig = Signature::now("Test", "test@test.com").unwrap();
            let tree_id = {
                let mut index = repo.index().unwrap();
                index.write_tree().unwrap()
            };
            let tree = repo.find_tree(tree_id).unwrap();
            repo.commit(Some("HEAD"), &sig, &sig, "Initial commit", &tree, &[])
                .unwrap();
        }

        (dir, repo)
    }

    fn records() -> Vec<SubtitleRecord> {
        vec![
            SubtitleRecord::new(PersistentId::real("st000001"), Some("rec1".to_string()), "@Hello there"),
            SubtitleRecord::new(PersistentId::real("st000002"), None, "@General Kenobi"),
        ]
    }

    #[test]
    fn test_record_hash_uses_normalized_content() {
        let record = SubtitleRecord::new(PersistentId::real("st1"), None, "@Hello, there!");
        assert!(record.matches("hellothere"));
        assert!(!record.matches("hello"));
    }

    #[test]
    fn test_store_and_load_records() {
        let (_dir, repo) = create_test_repo();
        let store = NotesRecordStore::new(&repo, NOTES_REF);

        store.save("HEAD", "docs/a.md", &records()).unwrap();

        let head = repo.head().unwrap().peel_to_commit().unwrap();
        assert_eq!(store.load("docs/a.md", "HEAD").unwrap(), Some(records()));
        assert_eq!(store.load("docs/b.md", "HEAD").unwrap(), None);
        assert_eq!(store.list_tracked_commits().unwrap(), vec![head.id()]);

        let note = store.fetch(head.id()).unwrap().unwrap();
        assert_eq!(note.version, SCHEMA_VERSION);
        assert!(chrono::DateTime::parse_from_rfc3339(&note.tracked_at).is_ok());
    }

    #[test]
    fn test_save_keeps_other_files() {
        let (_dir, repo) = create_test_repo();
        let store = NotesRecordStore::new(&repo, NOTES_REF);

        store.save("HEAD", "a.md", &records()).unwrap();
        store.save("HEAD", "b.md", &records()[..1]).unwrap();

        let all = store.load_all("HEAD").unwrap();
        assert_eq!(all.keys().collect::<Vec<_>>(), vec!["a.md", "b.md"]);
        assert_eq!(all["b.md"].len(), 1);
    }

    #[test]
    fn test_persistent_ids_across_store() {
        let (_dir, repo) = create_test_repo();
        let store = NotesRecordStore::new(&repo, NOTES_REF);
        store.save("HEAD", "a.md", &records()).unwrap();

        let ids = store.persistent_ids().unwrap();
        assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec!["st000001", "st000002"]);
    }

    #[test]
    fn test_missing_note_is_empty() {
        let (_dir, repo) = create_test_repo();
        let store = NotesRecordStore::new(&repo, NOTES_REF);
        assert!(store.load_all("HEAD").unwrap().is_empty());
        assert!(store.persistent_ids().unwrap().is_empty());
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryRecordStore::new();
        store.save("c1", "a.md", &records()).unwrap();
        assert_eq!(store.load("a.md", "c1").unwrap(), Some(records()));
        assert_eq!(store.load("a.md", "c2").unwrap(), None);
        assert_eq!(store.persistent_ids().unwrap().len(), 2);
    }

    #[test]
    fn test_note_payload_size_policy() {
        assert!(evaluate_note_payload_size(1024).unwrap().is_none());
        assert!(evaluate_note_payload_size(NOTE_SIZE_WARN_BYTES + 1).unwrap().is_some());
        assert!(evaluate_note_payload_size(NOTE_SIZE_HARD_LIMIT_BYTES + 1).is_err());
    }
}
