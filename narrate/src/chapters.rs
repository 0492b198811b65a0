//! Chapter discovery: list source text files in natural chapter order.

use crate::error::{NarrateError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};

/// First run of ASCII digits in a file stem, e.g. `12` in `第12章`.
static CHAPTER_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"[0-9]+").unwrap());

/// A chapter source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterFile {
    /// Path to the text file
    pub path: PathBuf,
    /// File stem, used as the chapter identifier and output name
    pub name: String,
    /// Numeric chapter index embedded in the name, if any
    pub index: Option<u64>,
}

impl ChapterFile {
    pub fn new(path: PathBuf) -> Self {
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let index = chapter_index(&name);
        Self { path, name, index }
    }
}

impl Ord for ChapterFile {
    fn cmp(&self, other: &Self) -> Ordering {
        // Unnumbered files go last.
        match (self.index, other.index) {
            (Some(a), Some(b)) => a.cmp(&b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
        .then_with(|| natural_cmp(&self.name, &other.name))
        .then_with(|| self.path.cmp(&other.path))
    }
}

impl PartialOrd for ChapterFile {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Extract the chapter index from a file stem.
pub fn chapter_index(name: &str) -> Option<u64> {
    CHAPTER_NUMBER
        .find(name)
        .and_then(|m| m.as_str().parse().ok())
}

/// Compare two strings treating digit runs as numbers ("2" < "10").
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut a = a.chars().peekable();
    let mut b = b.chars().peekable();

    loop {
        match (a.peek().copied(), b.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let run_a = take_digits(&mut a);
                let run_b = take_digits(&mut b);
                let ord = compare_digit_runs(&run_a, &run_b);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            (Some(x), Some(y)) => {
                if x != y {
                    return x.cmp(&y);
                }
                a.next();
                b.next();
            }
        }
    }
}

fn take_digits(iter: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut run = String::new();
    while let Some(c) = iter.peek().copied() {
        if !c.is_ascii_digit() {
            break;
        }
        run.push(c);
        iter.next();
    }
    run
}

/// Numeric comparison of arbitrary-length digit strings.
fn compare_digit_runs(a: &str, b: &str) -> Ordering {
    let a_trim = a.trim_start_matches('0');
    let b_trim = b.trim_start_matches('0');
    a_trim
        .len()
        .cmp(&b_trim.len())
        .then_with(|| a_trim.cmp(b_trim))
        .then_with(|| a.len().cmp(&b.len()))
}

/// List chapter files in `dir` with the given extension, in chapter order.
///
/// Returns [`NarrateError::EmptyDirectory`] when nothing matches and
/// [`NarrateError::SourceUnreadable`] when the directory cannot be listed.
pub fn list_chapters(dir: &Path, extension: &str) -> Result<Vec<ChapterFile>> {
    let unreadable = |source| NarrateError::SourceUnreadable {
        dir: dir.to_path_buf(),
        source,
    };

    let mut chapters = Vec::new();
    for entry in fs::read_dir(dir).map_err(unreadable)? {
        let path = entry.map_err(unreadable)?.path();
        if !path.is_file() {
            continue;
        }
        let matches = path
            .extension()
            .map(|e| e.to_string_lossy().eq_ignore_ascii_case(extension))
            .unwrap_or(false);
        if matches {
            chapters.push(ChapterFile::new(path));
        }
    }

    if chapters.is_empty() {
        return Err(NarrateError::EmptyDirectory {
            dir: dir.to_path_buf(),
            extension: extension.to_string(),
        });
    }

    chapters.sort();
    log::debug!("Found {} chapter files in {}", chapters.len(), dir.display());
    Ok(chapters)
}

/// Inclusive range of chapter indices selected with `--chapters`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChapterRange {
    pub start: u64,
    pub end: u64,
}

impl ChapterRange {
    /// Parse "5" or "1-10".
    pub fn parse(range: &str) -> Result<Self> {
        let invalid = || {
            NarrateError::Config(format!(
                "Invalid chapter range '{}'. Use 'start-end' (e.g., '1-10') or a single number",
                range
            ))
        };

        let range = range.trim();
        let (start, end) = match range.split_once('-') {
            Some((start, end)) => (start.trim(), end.trim()),
            None => (range, range),
        };
        let start: u64 = start.parse().map_err(|_| invalid())?;
        let end: u64 = end.parse().map_err(|_| invalid())?;
        if start > end {
            return Err(invalid());
        }
        Ok(Self { start, end })
    }

    /// Whether a chapter falls within the range. Unnumbered chapters never do.
    pub fn contains(&self, chapter: &ChapterFile) -> bool {
        chapter
            .index
            .map(|i| i >= self.start && i <= self.end)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), "text").unwrap();
    }

    #[test]
    fn test_chapter_index() {
        assert_eq!(chapter_index("第12章"), Some(12));
        assert_eq!(chapter_index("chapter_007_intro"), Some(7));
        assert_eq!(chapter_index("prologue"), None);
    }

    #[test]
    fn test_natural_cmp() {
        assert_eq!(natural_cmp("ch2", "ch10"), Ordering::Less);
        assert_eq!(natural_cmp("ch10", "ch9"), Ordering::Greater);
        assert_eq!(natural_cmp("a", "a"), Ordering::Equal);
        assert_eq!(natural_cmp("ch02", "ch2"), Ordering::Greater);
        assert_eq!(natural_cmp("part1b", "part1a"), Ordering::Greater);
    }

    #[test]
    fn test_list_chapters_numeric_order() {
        let temp_dir = TempDir::new().unwrap();
        touch(temp_dir.path(), "第10章.txt");
        touch(temp_dir.path(), "第1章.txt");
        touch(temp_dir.path(), "第2章.txt");

        let chapters = list_chapters(temp_dir.path(), "txt").unwrap();
        let indices: Vec<_> = chapters.iter().map(|c| c.index.unwrap()).collect();
        assert_eq!(indices, vec![1, 2, 10]);
        assert_eq!(chapters[0].name, "第1章");
    }

    #[test]
    fn test_list_chapters_filters_extension() {
        let temp_dir = TempDir::new().unwrap();
        touch(temp_dir.path(), "1.txt");
        touch(temp_dir.path(), "2.md");
        touch(temp_dir.path(), "3.TXT");
        fs::create_dir(temp_dir.path().join("4.txt")).unwrap();

        let chapters = list_chapters(temp_dir.path(), "txt").unwrap();
        let names: Vec<_> = chapters.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["1", "3"]);
    }

    #[test]
    fn test_unnumbered_files_sort_last() {
        let temp_dir = TempDir::new().unwrap();
        touch(temp_dir.path(), "afterword.txt");
        touch(temp_dir.path(), "3.txt");

        let chapters = list_chapters(temp_dir.path(), "txt").unwrap();
        assert_eq!(chapters[0].name, "3");
        assert_eq!(chapters[1].name, "afterword");
    }

    #[test]
    fn test_empty_directory() {
        let temp_dir = TempDir::new().unwrap();
        touch(temp_dir.path(), "notes.md");
        let err = list_chapters(temp_dir.path(), "txt").unwrap_err();
        assert!(matches!(err, NarrateError::EmptyDirectory { .. }));
    }

    #[test]
    fn test_missing_directory_is_unreadable() {
        let temp_dir = TempDir::new().unwrap();
        let err = list_chapters(&temp_dir.path().join("missing"), "txt").unwrap_err();
        assert!(matches!(err, NarrateError::SourceUnreadable { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_chapter_range() {
        assert_eq!(ChapterRange::parse("3").unwrap(), ChapterRange { start: 3, end: 3 });
        assert_eq!(ChapterRange::parse("1-10").unwrap(), ChapterRange { start: 1, end: 10 });
        assert!(ChapterRange::parse("10-1").is_err());
        assert!(ChapterRange::parse("a-b").is_err());

        let range = ChapterRange::parse("2-3").unwrap();
        assert!(range.contains(&ChapterFile::new(PathBuf::from("第2章.txt"))));
        assert!(!range.contains(&ChapterFile::new(PathBuf::from("第10章.txt"))));
        assert!(!range.contains(&ChapterFile::new(PathBuf::from("prologue.txt"))));
    }

    proptest! {
        #[test]
        fn prop_sorted_by_index(mut indices in proptest::collection::hash_set(0u64..100_000, 1..40)) {
            let mut files: Vec<ChapterFile> = indices
                .drain()
                .map(|i| ChapterFile::new(PathBuf::from(format!("第{}章.txt", i))))
                .collect();
            files.sort();
            for pair in files.windows(2) {
                prop_assert!(pair[0].index.unwrap() < pair[1].index.unwrap());
            }
        }
    }
}
