//! Text processing for narration: normalization and segmentation.

pub mod chunker;
pub mod cleaner;

pub use chunker::{pad_width, segments};
pub use cleaner::{LineMode, normalize};

use crate::chapters::ChapterFile;
use crate::error::NarrateError;

/// A chapter loaded from disk and normalized for TTS.
#[derive(Debug, Clone)]
pub struct ChapterUnit {
    /// Source file and ordering key
    pub file: ChapterFile,
    /// Normalized text, `None` when nothing speakable remains
    pub text: Option<String>,
    /// Set when the file could not be read; such a chapter fails on its own
    pub read_error: Option<String>,
}

impl ChapterUnit {
    /// Read and normalize a chapter file.
    ///
    /// A read failure is kept on the unit rather than returned, so the other
    /// chapters still run.
    pub fn load(file: ChapterFile, mode: LineMode) -> Self {
        match std::fs::read(&file.path) {
            Ok(raw) => Self::from_text(file, &String::from_utf8_lossy(&raw), mode),
            Err(e) => {
                log::warn!("Failed to read {}: {}", file.path.display(), e);
                Self {
                    file,
                    text: None,
                    read_error: Some(e.to_string()),
                }
            }
        }
    }

    /// Build a unit from text already in memory.
    pub fn from_text(file: ChapterFile, raw: &str, mode: LineMode) -> Self {
        let text = normalize(raw, mode);
        Self {
            file,
            text,
            read_error: None,
        }
    }

    /// Chapter identifier used for output names.
    pub fn name(&self) -> &str {
        &self.file.name
    }

    /// Read fine but holds nothing speakable.
    pub fn is_empty(&self) -> bool {
        self.text.is_none() && self.read_error.is_none()
    }

    /// The read failure as a per-chapter error.
    pub fn read_failure(&self) -> Option<NarrateError> {
        self.read_error
            .as_ref()
            .map(|message| NarrateError::ChapterUnreadable {
                path: self.file.path.clone(),
                message: message.clone(),
            })
    }
}
