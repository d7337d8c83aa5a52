pub mod sequence;
pub mod similarity;
pub mod subtitle;

pub use sequence::{align, band_width, Alignment};
pub use similarity::{similarity, Similarity, Truncation};
pub use subtitle::{ScoringMode, SubtitleAligner};
