//! Document text extraction into the marker-delimited plain-text form.

use anyhow::Result;

use crate::core::subtitle::Markers;

/// Converts a document source into marked plain text
pub trait TextExtractor {
    fn to_marked_plain_text(&self, source: &str) -> Result<String>;
}

/// Extractor for sources that already are marked plain text.
///
/// Line endings are normalized and the document-start sentinel is placed in
/// front of the first subtitle marker.
#[derive(Debug, Clone, Default)]
pub struct MarkedTextPassthrough {
    markers: Markers,
}

impl MarkedTextPassthrough {
    pub fn new(markers: Markers) -> Self {
        Self { markers }
    }
}

impl TextExtractor for MarkedTextPassthrough {
    fn to_marked_plain_text(&self, source: &str) -> Result<String> {
        if let Some(pos) = source.find('\0') {
            anyhow::bail!("Source contains a NUL byte at offset {}; not a text document", pos);
        }

        let mut text = source.replace("\r\n", "\n");
        if text.contains(self.markers.start) {
            return Ok(text);
        }

        if let Some(pos) = text.find(self.markers.subtitle) {
            text.insert(pos, self.markers.start);
        }
        Ok(text)
    }
}
