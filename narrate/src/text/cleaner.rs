//! Text normalization for TTS processing.

use once_cell::sync::Lazy;
use regex::Regex;

/// Line-number marker from a numbered dump: optional whitespace, digits, a
/// separator glyph.
static LINE_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*[0-9]+\s*[→|│:：\t]").unwrap());

/// Separators that also appear in prose times and ratios ("10:30").
const COLONS: &[char] = &[':', '：'];

/// Invisible characters and their replacements.
const INVISIBLE_CHARS: &[(char, &str)] = &[
    ('\u{00a0}', " "), // Non-breaking space
    ('\u{200b}', ""),  // Zero-width space
    ('\u{200c}', ""),  // Zero-width non-joiner
    ('\u{200d}', ""),  // Zero-width joiner
    ('\u{2060}', ""),  // Word joiner
    ('\u{feff}', ""),  // BOM
    ('\u{2028}', "\n"), // Line separator
    ('\u{2029}', "\n"), // Paragraph separator
];

/// How line breaks survive normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineMode {
    /// Keep one line per source line
    #[default]
    Preserve,
    /// Join all lines with single spaces
    Collapse,
}

impl LineMode {
    fn separator(self) -> &'static str {
        match self {
            LineMode::Preserve => "\n",
            LineMode::Collapse => " ",
        }
    }
}

/// Normalize raw chapter text for narration.
///
/// This function:
/// - Drops carriage returns, control characters and invisible characters
/// - Removes one leading line-number marker such as `12→`
/// - Discards blank lines and trims the rest
/// - Joins lines according to `mode`
///
/// Returns `None` when nothing speakable remains.
pub fn normalize(raw: &str, mode: LineMode) -> Option<String> {
    let cleaned = strip_invisible(raw);

    let lines: Vec<String> = cleaned
        .lines()
        .map(strip_line_marker)
        .map(|line| collapse_spaces(line.trim()))
        .filter(|line| !line.is_empty())
        .collect();

    if lines.is_empty() {
        None
    } else {
        Some(lines.join(mode.separator()))
    }
}

/// Remove a leading line-number marker from a line.
///
/// A colon followed by a digit is a time or ratio, not a marker.
fn strip_line_marker(line: &str) -> &str {
    let Some(m) = LINE_MARKER.find(line) else {
        return line;
    };
    let rest = &line[m.end()..];
    if m.as_str().ends_with(COLONS) && rest.starts_with(|c: char| c.is_ascii_digit()) {
        return line;
    }
    rest
}

fn strip_invisible(text: &str) -> String {
    let mut result = String::with_capacity(text.len());

    for c in text.chars() {
        let replacement = INVISIBLE_CHARS
            .iter()
            .find(|(ch, _)| *ch == c)
            .map(|(_, r)| *r);

        if let Some(r) = replacement {
            result.push_str(r);
        } else if is_allowed_char(c) {
            result.push(c);
        }
    }

    result
}

/// Check if a character is allowed in TTS text.
fn is_allowed_char(c: char) -> bool {
    if c == '\n' || c == '\t' {
        return true;
    }

    // Covers '\r' as well
    !c.is_control()
}

/// Collapse runs of spaces and tabs into one space.
fn collapse_spaces(line: &str) -> String {
    let mut result = String::with_capacity(line.len());
    let mut prev_was_space = false;

    for c in line.chars() {
        if c == ' ' || c == '\t' {
            if !prev_was_space {
                result.push(' ');
                prev_was_space = true;
            }
        } else {
            prev_was_space = false;
            result.push(c);
        }
    }

    result
}
