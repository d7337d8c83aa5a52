use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::core::subtitle::{PersistentId, NEW_FILE_ANCHOR};

/// Kind of edit applied to one or more subtitles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationType {
    #[serde(rename = "insert")]
    Insert,
    #[serde(rename = "delete")]
    Delete,
    #[serde(rename = "split")]
    Split,
    #[serde(rename = "merge")]
    Merge,
    #[serde(rename = "moveLeft")]
    MoveLeft,
    #[serde(rename = "moveRight")]
    MoveRight,
    #[serde(rename = "contentChange", alias = "content_change")]
    ContentChange,
    #[serde(rename = "merge_combo")]
    MergeCombo,
    #[serde(rename = "split_combo")]
    SplitCombo,
}

impl OperationType {
    pub fn is_move(self) -> bool {
        matches!(self, Self::MoveLeft | Self::MoveRight)
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Insert => write!(f, "insert"),
            Self::Delete => write!(f, "delete"),
            Self::Split => write!(f, "split"),
            Self::Merge => write!(f, "merge"),
            Self::MoveLeft => write!(f, "moveLeft"),
            Self::MoveRight => write!(f, "moveRight"),
            Self::ContentChange => write!(f, "contentChange"),
            Self::MergeCombo => write!(f, "merge_combo"),
            Self::SplitCombo => write!(f, "split_combo"),
        }
    }
}

/// Identifier of an operation, unique within its file
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OperationId {
    /// 1-based sequence number (whole-file pipeline)
    Sequence(u64),
    /// `<hunk_index>-<pair_index>` (per-hunk pipeline)
    Hunk { hunk: usize, pair: usize },
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sequence(n) => write!(f, "{}", n),
            Self::Hunk { hunk, pair } => write!(f, "{}-{}", hunk, pair),
        }
    }
}

impl Serialize for OperationId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Sequence(n) => serializer.serialize_u64(*n),
            Self::Hunk { .. } => serializer.collect_str(self),
        }
    }
}

impl<'de> Deserialize<'de> for OperationId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(Self::Sequence(n)),
            Raw::Text(s) => {
                let (hunk, pair) = s
                    .split_once('-')
                    .ok_or_else(|| serde::de::Error::custom(format!("invalid operation id: {}", s)))?;
                let hunk = hunk.parse().map_err(serde::de::Error::custom)?;
                let pair = pair.parse().map_err(serde::de::Error::custom)?;
                Ok(Self::Hunk { hunk, pair })
            }
        }
    }
}

/// Hands out operation IDs in emission order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationIdSequence {
    File { next: u64 },
    Hunk { hunk: usize },
}

impl OperationIdSequence {
    pub fn for_file() -> Self {
        Self::File { next: 1 }
    }

    pub fn for_hunk(hunk: usize) -> Self {
        Self::Hunk { hunk }
    }

    /// Next ID; `anchor_pair` is the 1-based index of the pair the
    /// operation is anchored to
    pub fn next_id(&mut self, anchor_pair: usize) -> OperationId {
        match self {
            Self::File { next } => {
                let id = OperationId::Sequence(*next);
                *next += 1;
                id
            }
            Self::Hunk { hunk } => OperationId::Hunk {
                hunk: *hunk,
                pair: anchor_pair,
            },
        }
    }
}

/// Position an inserted subtitle follows
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InsertAnchor {
    StartOfFile,
    After(PersistentId),
}

impl fmt::Display for InsertAnchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StartOfFile => write!(f, "{}", NEW_FILE_ANCHOR),
            Self::After(id) => write!(f, "{}", id),
        }
    }
}

impl Serialize for InsertAnchor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for InsertAnchor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        if s == NEW_FILE_ANCHOR {
            return Ok(Self::StartOfFile);
        }
        s.parse()
            .map(Self::After)
            .map_err(serde::de::Error::custom)
    }
}

/// A classified edit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub operation_id: OperationId,
    pub operation_type: OperationType,
    pub affected_stids: Vec<PersistentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_stid: Option<InsertAnchor>,
}

impl Operation {
    /// Replace temporary IDs using `resolved`
    pub fn resolve_ids(&mut self, resolved: &BTreeMap<PersistentId, PersistentId>) {
        for stid in &mut self.affected_stids {
            if let Some(real) = resolved.get(stid) {
                *stid = real.clone();
            }
        }
        if let Some(InsertAnchor::After(anchor)) = &mut self.after_stid {
            if let Some(real) = resolved.get(anchor) {
                *anchor = real.clone();
            }
        }
    }
}

/// Operations found in one file between two commits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileOperations {
    pub file_path: String,
    pub from_commit: String,
    pub to_commit: String,
    pub operations: Vec<Operation>,
}

impl FileOperations {
    pub fn count_by_type(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for op in &self.operations {
            *counts.entry(op.operation_type.to_string()).or_insert(0) += 1;
        }
        counts
    }
}

/// Operations of every changed file of a repository between two commits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryOperations {
    pub repository_name: String,
    pub from_commit: String,
    pub to_commit: String,
    /// Files with at least one operation
    pub files: Vec<FileOperations>,
}

impl RepositoryOperations {
    pub fn total_operations(&self) -> usize {
        self.files.iter().map(|f| f.operations.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insert_op() -> Operation {
        Operation {
            operation_id: OperationId::Sequence(3),
            operation_type: OperationType::Insert,
            affected_stids: vec![PersistentId::temporary("st1", 1)],
            after_stid: Some(InsertAnchor::After(PersistentId::real("st1"))),
        }
    }

    #[test]
    fn test_operation_external_shape() {
        let json = serde_json::to_string(&insert_op()).unwrap();
        assert_eq!(
            json,
            r#"{"operationId":3,"operationType":"insert","affectedStids":["tmp-st1+1"],"afterStid":"st1"}"#
        );
    }

    #[test]
    fn test_operation_without_anchor_omits_after_stid() {
        let op = Operation {
            operation_id: OperationId::Hunk { hunk: 2, pair: 5 },
            operation_type: OperationType::MoveLeft,
            affected_stids: vec![PersistentId::real("a"), PersistentId::real("b")],
            after_stid: None,
        };
        let json = serde_json::to_string(&op).unwrap();
        assert_eq!(
            json,
            r#"{"operationId":"2-5","operationType":"moveLeft","affectedStids":["a","b"]}"#
        );
        let back: Operation = serde_json::from_str(&json).unwrap();
        assert_eq!(back, op);
    }

    #[test]
    fn test_start_of_file_anchor() {
        let json = serde_json::to_string(&InsertAnchor::StartOfFile).unwrap();
        assert_eq!(json, "\"new_file\"");
        let back: InsertAnchor = serde_json::from_str(&json).unwrap();
        assert_eq!(back, InsertAnchor::StartOfFile);
    }

    #[test]
    fn test_content_change_alias() {
        let ty: OperationType = serde_json::from_str("\"content_change\"").unwrap();
        assert_eq!(ty, OperationType::ContentChange);
        assert_eq!(serde_json::to_string(&ty).unwrap(), "\"contentChange\"");
    }

    #[test]
    fn test_id_sequences() {
        let mut file = OperationIdSequence::for_file();
        assert_eq!(file.next_id(7), OperationId::Sequence(1));
        assert_eq!(file.next_id(2), OperationId::Sequence(2));

        let mut hunk = OperationIdSequence::for_hunk(4);
        assert_eq!(hunk.next_id(7).to_string(), "4-7");
    }

    #[test]
    fn test_resolve_ids() {
        let mut op = insert_op();
        let mut resolved = BTreeMap::new();
        resolved.insert(PersistentId::temporary("st1", 1), PersistentId::real("st9"));
        op.resolve_ids(&resolved);
        assert_eq!(op.affected_stids, vec![PersistentId::real("st9")]);
        assert_eq!(op.after_stid, Some(InsertAnchor::After(PersistentId::real("st1"))));
    }

    #[test]
    fn test_count_by_type() {
        let file = FileOperations {
            file_path: "a.md".to_string(),
            from_commit: "a".to_string(),
            to_commit: "b".to_string(),
            operations: vec![insert_op(), insert_op()],
        };
        assert_eq!(file.count_by_type().get("insert"), Some(&2));
    }
}
