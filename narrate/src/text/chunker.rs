//! Bounded-length segmentation for TTS requests.
//!
//! Segments are contiguous slices of the input: concatenating them yields the
//! original text unless it holds only whitespace, which yields nothing. The
//! speakable part of a segment is at most `max_chars` characters; whitespace
//! at a break rides along with the segment before it, so no segment is blank.
//! Break points are chosen inside the window, preferring whitespace, then
//! sentence terminators, then clause marks, and only cutting mid-run when
//! none of those exist.

/// Sentence terminators (CJK and Latin).
const SENTENCE_ENDS: &[char] = &['。', '！', '？', '!', '?', '…', '；', ';', '.'];

/// Clause-level break points.
const CLAUSE_MARKS: &[char] = &['，', '、', ',', '：', ':', '”', '」', '）', ')'];

/// One bounded slice of a chapter's text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment<'a> {
    /// 1-based position within the chapter
    pub index: usize,
    /// Exact slice of the source text, including surrounding whitespace
    pub text: &'a str,
}

impl<'a> Segment<'a> {
    /// Text to send to the TTS service.
    pub fn speech_text(&self) -> &'a str {
        self.text.trim()
    }

    /// Output file stem: `<chapter>_partNN`.
    pub fn file_stem(&self, chapter: &str, width: usize) -> String {
        format!("{}_part{:0width$}", chapter, self.index, width = width)
    }
}

/// Lazy iterator over the segments of a text.
///
/// A clone continues from the same position, so counting a clone leaves the
/// original untouched. Call [`segments`] again to start over.
#[derive(Debug, Clone)]
pub struct Segments<'a> {
    rest: &'a str,
    max_chars: usize,
    next_index: usize,
}

/// Split `text` into segments of at most `max_chars` characters.
///
/// `max_chars == 0` disables splitting and yields the whole text once.
pub fn segments(text: &str, max_chars: usize) -> Segments<'_> {
    Segments {
        rest: text,
        max_chars: if max_chars == 0 { usize::MAX } else { max_chars },
        next_index: 1,
    }
}

impl<'a> Iterator for Segments<'a> {
    type Item = Segment<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let body_start = leading_whitespace(self.rest);
        if body_start == self.rest.len() {
            self.rest = "";
            return None;
        }

        let cut = body_start + split_point(&self.rest[body_start..], self.max_chars);
        let end = cut + leading_whitespace(&self.rest[cut..]);
        let (head, tail) = self.rest.split_at(end);
        self.rest = tail;

        let segment = Segment {
            index: self.next_index,
            text: head,
        };
        self.next_index += 1;
        Some(segment)
    }
}

impl std::iter::FusedIterator for Segments<'_> {}

/// Zero-padding width for part numbers: at least two digits.
pub fn pad_width(count: usize) -> usize {
    count.to_string().len().max(2)
}

/// Byte offset where the next segment should end.
fn split_point(text: &str, max_chars: usize) -> usize {
    let window_end = match text.char_indices().nth(max_chars) {
        Some((idx, _)) => idx,
        None => return text.len(),
    };
    let window = &text[..window_end];

    let whitespace = last_break(window, char::is_whitespace).or_else(|| {
        // The window ends exactly on a word boundary.
        text[window_end..]
            .starts_with(char::is_whitespace)
            .then_some(window_end)
    });
    let sentence = last_break(window, |c| SENTENCE_ENDS.contains(&c));
    let clause = last_break(window, |c| CLAUSE_MARKS.contains(&c));

    // A break in the first half of the window makes for tiny segments, so
    // fall through to the next tier when that happens.
    let half = window_end / 2;
    for candidate in [whitespace, sentence, clause].into_iter().flatten() {
        if candidate >= half {
            return candidate;
        }
    }

    [whitespace, sentence, clause]
        .into_iter()
        .flatten()
        .max()
        .unwrap_or(window_end)
}

/// Byte length of the whitespace run at the start of `text`.
fn leading_whitespace(text: &str) -> usize {
    text.len() - text.trim_start().len()
}

/// Byte offset just after the last character in `window` matching `pred`.
fn last_break(window: &str, pred: impl Fn(char) -> bool) -> Option<usize> {
    window
        .char_indices()
        .rev()
        .find(|(_, c)| pred(*c))
        .map(|(idx, c)| idx + c.len_utf8())
}
