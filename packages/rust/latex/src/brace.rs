//! Brace matching for LaTeX arguments.
//!
//! LaTeX arguments nest without bound, so a regex cannot delimit them. The
//! matcher walks bytes with a signed depth counter instead: `{` increments,
//! `}` decrements, and the argument ends at the first `}` that would take the
//! counter below zero. Braces are ASCII, so every index it returns is a valid
//! UTF-8 boundary.

/// Return the argument body that starts at `start` (the byte right after an
/// opening `{`) up to, but excluding, its matching `}`.
///
/// Returns `None` when the text ends before the argument is closed. An empty
/// argument (`{}`) yields `Some("")`.
pub fn extract_brace_block(text: &str, start: usize) -> Option<&str> {
    let bytes = text.as_bytes();
    if start > bytes.len() {
        return None;
    }

    let mut depth: i64 = 0;
    for (offset, &b) in bytes[start..].iter().enumerate() {
        match b {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth < 0 {
                    return Some(&text[start..start + offset]);
                }
            }
            _ => {}
        }
    }

    None
}
