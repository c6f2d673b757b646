//! Utility module
//!
//! Small helpers shared by the transfer code and the input parser.

use crate::core::MAX_FILE_NAME_LEN;

/// Number of blocks needed to carry `size` bytes
pub fn block_count(size: u64, block_size: u32) -> u64 {
    let block_size = u64::from(block_size.max(1));
    size.div_ceil(block_size)
}

/// Longest prefix of `s` that fits in `max` bytes without splitting a char
pub fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Turns a file name received from the network into a safe local name:
/// final path component only, bounded length, no control characters.
pub fn sanitize_file_name(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base.chars().filter(|c| !c.is_control()).collect();
    let cleaned = truncate_utf8(cleaned.trim(), MAX_FILE_NAME_LEN);
    match cleaned {
        "" | "." | ".." => None,
        name => Some(name.to_string()),
    }
}

/// `name` with ` (n)` inserted before its extension, still within the
/// file name limit
pub fn numbered_file_name(name: &str, n: u32) -> String {
    let dot = name.rfind('.').filter(|&at| at > 0).unwrap_or(name.len());
    let (stem, extension) = name.split_at(dot);
    let tag = format!(" ({})", n);
    let room = MAX_FILE_NAME_LEN.saturating_sub(tag.len() + extension.len());
    format!("{}{}{}", truncate_utf8(stem, room), tag, extension)
}

/// Splits `s` at the first space or tab. Both halves must be non-empty.
pub fn split_first_word(s: &str) -> Option<(&str, &str)> {
    let at = s.find([' ', '\t'])?;
    let (head, tail) = (&s[..at], &s[at + 1..]);
    if head.is_empty() || tail.is_empty() {
        None
    } else {
        Some((head, tail))
    }
}
