use std::borrow::Cow;

/// Maximum length in bytes of a single generated path segment or file stem.
///
/// Well below the 255-byte limit most filesystems place on a name, leaving
/// room for collision suffixes and the extension.
pub const MAX_SEGMENT_BYTES: usize = 120;

/// Characters that are unsafe in a path segment on at least one common platform.
const RESERVED_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Strips characters that are not allowed in XML 1.0 documents.
///
/// Strips:
/// - ASCII control chars: 0x00-0x08, 0x0B-0x0C, 0x0E-0x1F, 0x7F
/// - The noncharacters U+FFFE and U+FFFF
///
/// Preserves: tab (0x09), newline (0x0A), carriage return (0x0D).
///
/// Returns `Cow::Borrowed` when the input contains nothing to strip (common case).
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    if !s.chars().any(is_stripped) {
        return Cow::Borrowed(s);
    }

    Cow::Owned(s.chars().filter(|c| !is_stripped(*c)).collect())
}

fn is_stripped(c: char) -> bool {
    match c {
        '\t' | '\n' | '\r' => false,
        '\u{FFFE}' | '\u{FFFF}' => true,
        c => c.is_ascii_control(),
    }
}

/// Truncates a string to at most `max_bytes` bytes without splitting a character.
pub fn truncate_on_char_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }

    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Turns an arbitrary title or name into a single safe path segment.
///
/// Reserved characters and control characters become `_`, runs of whitespace
/// collapse to one space, and leading/trailing dots and spaces are trimmed so
/// the result can never be `.`/`..` or a hidden file. Human-readable names
/// such as `Plato Calibre Releases` pass through unchanged.
///
/// An input that sanitizes to nothing yields `_`.
///
/// # Examples
///
/// ```
/// use inkfeed::util::sanitize_path_segment;
///
/// assert_eq!(sanitize_path_segment("Hooks"), "Hooks");
/// assert_eq!(sanitize_path_segment("a/b: c?"), "a_b_ c_");
/// assert_eq!(sanitize_path_segment(".."), "_");
/// ```
pub fn sanitize_path_segment(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last_was_space = false;

    for c in input.chars() {
        if c.is_whitespace() {
            if !last_was_space && !out.is_empty() {
                out.push(' ');
            }
            last_was_space = true;
            continue;
        }
        last_was_space = false;

        if c.is_control() || RESERVED_CHARS.contains(&c) {
            out.push('_');
        } else {
            out.push(c);
        }
    }

    let trimmed = out.trim_matches(|c| c == '.' || c == ' ');
    let truncated = truncate_on_char_boundary(trimmed, MAX_SEGMENT_BYTES).trim_end();

    if truncated.is_empty() {
        "_".to_string()
    } else {
        truncated.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    // ========================================================================
    // strip_control_chars tests
    // ========================================================================

    #[test]
    fn test_strip_clean_input_is_borrowed() {
        let result = strip_control_chars("plain text\twith\ttabs\n");
        assert!(matches!(result, Cow::Borrowed(_)));
    }

    #[test]
    fn test_strip_removes_controls() {
        assert_eq!(strip_control_chars("a\u{0}b\u{1b}c\u{7f}d"), "abcd");
    }

    #[test]
    fn test_strip_removes_xml_noncharacters() {
        assert_eq!(strip_control_chars("x\u{FFFE}y\u{FFFF}"), "xy");
    }

    // ========================================================================
    // truncate_on_char_boundary tests
    // ========================================================================

    #[test]
    fn test_truncate_short_string_unchanged() {
        assert_eq!(truncate_on_char_boundary("short", 10), "short");
    }

    #[test]
    fn test_truncate_never_splits_multibyte() {
        // "é" is two bytes; cutting at 2 would split it
        assert_eq!(truncate_on_char_boundary("aé", 2), "a");
        assert_eq!(truncate_on_char_boundary("日本語", 4), "日");
    }

    // ========================================================================
    // sanitize_path_segment tests
    // ========================================================================

    #[test]
    fn test_sanitize_keeps_spaces_and_case() {
        assert_eq!(
            sanitize_path_segment("Plato Calibre Releases"),
            "Plato Calibre Releases"
        );
    }

    #[test]
    fn test_sanitize_replaces_separators() {
        assert_eq!(sanitize_path_segment("../etc/passwd"), "_etc_passwd");
        assert_eq!(sanitize_path_segment("a\\b"), "a_b");
    }

    #[test]
    fn test_sanitize_collapses_whitespace() {
        assert_eq!(sanitize_path_segment("  Release \n\t Notes  "), "Release Notes");
    }

    #[test]
    fn test_sanitize_empty_and_dots() {
        assert_eq!(sanitize_path_segment(""), "_");
        assert_eq!(sanitize_path_segment("   "), "_");
        assert_eq!(sanitize_path_segment("."), "_");
        assert_eq!(sanitize_path_segment(".hidden"), "hidden");
    }

    #[test]
    fn test_sanitize_length_limit() {
        let long = "ü".repeat(200);
        let result = sanitize_path_segment(&long);
        assert!(result.len() <= MAX_SEGMENT_BYTES);
        assert!(result.chars().all(|c| c == 'ü'));
    }

    proptest! {
        #[test]
        fn prop_sanitized_segment_is_a_single_safe_component(input in "\\PC{0,200}") {
            let segment = sanitize_path_segment(&input);
            prop_assert!(!segment.is_empty());
            prop_assert!(segment.len() <= MAX_SEGMENT_BYTES);
            prop_assert!(!segment.contains('/'));
            prop_assert!(!segment.contains('\\'));
            prop_assert!(segment != "." && segment != "..");
            prop_assert!(!segment.starts_with(' ') && !segment.ends_with(' '));
        }
    }
}
