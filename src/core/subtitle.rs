use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::align::similarity::repetitions;

/// Anchor used for temporary IDs minted before any real ID was seen
pub const NEW_FILE_ANCHOR: &str = "new_file";

const TEMPORARY_PREFIX: &str = "tmp-";

/// Stable identifier of a subtitle.
///
/// Real IDs come from the ID allocator. Temporary IDs are minted for newly
/// inserted subtitles and are anchored to the last real ID seen before them;
/// they serialize as `tmp-<anchor>+<offset>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PersistentId {
    Real(String),
    Temporary { anchor: String, offset: u32 },
}

impl PersistentId {
    pub fn real(id: impl Into<String>) -> Self {
        Self::Real(id.into())
    }

    pub fn temporary(anchor: impl Into<String>, offset: u32) -> Self {
        Self::Temporary {
            anchor: anchor.into(),
            offset,
        }
    }

    pub fn is_temporary(&self) -> bool {
        matches!(self, Self::Temporary { .. })
    }
}

impl fmt::Display for PersistentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Real(id) => write!(f, "{}", id),
            Self::Temporary { anchor, offset } => {
                write!(f, "{}{}+{}", TEMPORARY_PREFIX, anchor, offset)
            }
        }
    }
}

impl FromStr for PersistentId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            anyhow::bail!("Persistent ID must not be empty");
        }

        if let Some(rest) = s.strip_prefix(TEMPORARY_PREFIX) {
            if let Some((anchor, offset)) = rest.rsplit_once('+') {
                if let Ok(offset) = offset.parse::<u32>() {
                    if !anchor.is_empty() {
                        return Ok(Self::temporary(anchor, offset));
                    }
                }
            }
        }

        Ok(Self::Real(s.to_string()))
    }
}

impl Serialize for PersistentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PersistentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A tracked subtitle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subtitle {
    pub persistent_id: PersistentId,
    /// Recording unit this subtitle belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    /// Content before the edit (alignment run only)
    #[serde(skip)]
    pub before: Option<String>,
    /// Content after the edit (alignment run only)
    #[serde(skip)]
    pub after: Option<String>,
}

impl Subtitle {
    pub fn new(persistent_id: PersistentId, record_id: Option<String>) -> Self {
        Self {
            persistent_id,
            record_id,
            before: None,
            after: None,
        }
    }
}

/// Marker characters of the marked plain-text format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Markers {
    /// Starts a subtitle segment
    pub subtitle: char,
    /// Starts an untracked segment
    pub gap: char,
    /// Document-start sentinel
    pub start: char,
}

impl Default for Markers {
    fn default() -> Self {
        Self {
            subtitle: '@',
            gap: '%',
            start: '\u{2402}',
        }
    }
}

/// One revision's view of a subtitle, or a gap in an alignment
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SubtitleAttrs {
    /// Raw text including the marker
    pub content: String,
    /// Lowercase alphanumeric-only text used for scoring
    pub content_sim: String,
    pub persistent_id: Option<PersistentId>,
    pub record_id: Option<String>,
    /// 0 for a gap, 1 for a real subtitle
    pub subtitle_count: u8,
    /// Position among the file's subtitles
    pub index: usize,
    /// 0-based line (paragraph) the subtitle sits on
    pub line: usize,
    pub first_in_para: bool,
    pub last_in_para: bool,
    pub repetitions: BTreeMap<String, Vec<usize>>,
}

impl SubtitleAttrs {
    /// The alignment placeholder
    pub fn gap() -> Self {
        Self::default()
    }

    pub fn is_gap(&self) -> bool {
        self.subtitle_count == 0
    }

    pub fn new(content: &str, index: usize, line: usize, repetition_window: usize) -> Self {
        let content_sim = normalize_for_similarity(content);
        let repetitions = repetitions(&content_sim, repetition_window);
        Self {
            content: content.to_string(),
            content_sim,
            persistent_id: None,
            record_id: None,
            subtitle_count: 1,
            index,
            line,
            first_in_para: false,
            last_in_para: false,
            repetitions,
        }
    }

    pub fn with_id(mut self, persistent_id: PersistentId, record_id: Option<String>) -> Self {
        self.persistent_id = Some(persistent_id);
        self.record_id = record_id;
        self
    }
}

/// Lowercase alphanumeric characters of `content`
pub fn normalize_for_similarity(content: &str) -> String {
    content
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Parse marked plain text into the ordered subtitles it contains.
///
/// Every line is a paragraph. A subtitle marker opens a subtitle that runs
/// to the next marker or the end of the line; a gap marker opens an
/// untracked segment. Text before the first marker of a line is untracked.
pub fn parse_marked_text(text: &str, markers: &Markers, repetition_window: usize) -> Vec<SubtitleAttrs> {
    let mut subtitles = Vec::new();

    for (line_idx, line) in text.lines().enumerate() {
        let first_of_line = subtitles.len();

        for segment in split_segments(line, markers) {
            if is_subtitle_segment(segment, markers) {
                let index = subtitles.len();
                subtitles.push(SubtitleAttrs::new(segment, index, line_idx, repetition_window));
            }
        }

        if subtitles.len() > first_of_line {
            subtitles[first_of_line].first_in_para = true;
            if let Some(last) = subtitles.last_mut() {
                last.last_in_para = true;
            }
        }
    }

    subtitles
}

fn is_subtitle_segment(segment: &str, markers: &Markers) -> bool {
    let segment = segment.strip_prefix(markers.start).unwrap_or(segment);
    segment.starts_with(markers.subtitle)
}

/// Split a line before every marker; a start sentinel sticks to the marker
/// that follows it
fn split_segments<'a>(line: &'a str, markers: &Markers) -> Vec<&'a str> {
    let mut segments = Vec::new();
    let mut segment_start = 0;
    let mut previous: Option<char> = None;

    for (pos, c) in line.char_indices() {
        let opens = c == markers.start || c == markers.subtitle || c == markers.gap;
        let glued_to_sentinel = previous == Some(markers.start);
        if opens && !glued_to_sentinel && pos > segment_start {
            segments.push(&line[segment_start..pos]);
            segment_start = pos;
        }
        previous = Some(c);
    }

    if segment_start < line.len() {
        segments.push(&line[segment_start..]);
    }

    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Vec<SubtitleAttrs> {
        parse_marked_text(text, &Markers::default(), 10)
    }

    #[test]
    fn test_persistent_id_display_and_parse() {
        let real = PersistentId::real("st0042");
        assert_eq!(real.to_string(), "st0042");
        assert_eq!("st0042".parse::<PersistentId>().unwrap(), real);

        let tmp = PersistentId::temporary("st0042", 3);
        assert_eq!(tmp.to_string(), "tmp-st0042+3");
        assert_eq!("tmp-st0042+3".parse::<PersistentId>().unwrap(), tmp);

        let tmp_new = PersistentId::temporary(NEW_FILE_ANCHOR, 1);
        assert_eq!(tmp_new.to_string(), "tmp-new_file+1");
        assert!(tmp_new.is_temporary());
    }

    #[test]
    fn test_malformed_temporary_is_real() {
        let id: PersistentId = "tmp-abc+x".parse().unwrap();
        assert_eq!(id, PersistentId::real("tmp-abc+x"));
        assert!("".parse::<PersistentId>().is_err());
    }

    #[test]
    fn test_persistent_id_serde_as_string() {
        let json = serde_json::to_string(&PersistentId::temporary("a1", 2)).unwrap();
        assert_eq!(json, "\"tmp-a1+2\"");
        let back: PersistentId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, PersistentId::temporary("a1", 2));
    }

    #[test]
    fn test_subtitle_transient_fields_not_serialized() {
        let mut subtitle = Subtitle::new(PersistentId::real("st1"), Some("rec1".to_string()));
        subtitle.before = Some("old".to_string());
        let json = serde_json::to_string(&subtitle).unwrap();
        assert_eq!(json, r#"{"persistent_id":"st1","record_id":"rec1"}"#);
    }

    #[test]
    fn test_normalize_for_similarity() {
        assert_eq!(normalize_for_similarity("@Hello, World! 42"), "helloworld42");
        assert_eq!(normalize_for_similarity("@Ünïcode Straße"), "ünïcodestraße");
        assert_eq!(normalize_for_similarity("@ ... "), "");
    }

    #[test]
    fn test_parse_paragraph_flags() {
        let subs = parse("@one two @three\n@four\n\nno markers here\n@five @six @seven");
        let contents: Vec<&str> = subs.iter().map(|s| s.content.as_str()).collect();
        assert_eq!(
            contents,
            vec!["@one two ", "@three", "@four", "@five ", "@six ", "@seven"]
        );

        let flags: Vec<(bool, bool)> = subs.iter().map(|s| (s.first_in_para, s.last_in_para)).collect();
        assert_eq!(
            flags,
            vec![
                (true, false),
                (false, true),
                (true, true),
                (true, false),
                (false, false),
                (false, true),
            ]
        );

        let lines: Vec<usize> = subs.iter().map(|s| s.line).collect();
        assert_eq!(lines, vec![0, 0, 1, 4, 4, 4]);
        let indices: Vec<usize> = subs.iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_parse_skips_gap_segments_and_leading_text() {
        let subs = parse("intro text @first %skipped part @second");
        let contents: Vec<&str> = subs.iter().map(|s| s.content.as_str()).collect();
        assert_eq!(contents, vec!["@first ", "@second"]);
        assert!(subs[0].first_in_para);
        assert!(subs[1].last_in_para);
    }

    #[test]
    fn test_parse_keeps_start_sentinel_on_first_subtitle() {
        let subs = parse("\u{2402}@Opening line @next");
        assert_eq!(subs.len(), 2);
        assert_eq!(subs[0].content, "\u{2402}@Opening line ");
        assert_eq!(subs[0].content_sim, "openingline");
        assert_eq!(subs[0].subtitle_count, 1);
    }

    #[test]
    fn test_gap_attrs() {
        let gap = SubtitleAttrs::gap();
        assert!(gap.is_gap());
        assert!(gap.content.is_empty());
        assert!(gap.content_sim.is_empty());
        assert!(gap.repetitions.is_empty());
    }
}
