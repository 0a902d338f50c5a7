//! Keep user-supplied message fields from breaking single-line log records.

/// Escape a string for single-line logging:
/// - `\n` => `\\n`
/// - `\r` => `\\r` (the line separator of stored message bodies)
/// - `\t` => `\\t`
/// - backslash => `\\\\`
///
/// Other control characters become `\xNN`. Output is capped at [`MAX_PREVIEW`] characters.
pub fn escape_log(s: &str) -> String {
    use std::fmt::Write;

    let mut out = String::with_capacity(s.len().min(MAX_PREVIEW) + 8);
    for (count, ch) in s.chars().enumerate() {
        if count >= MAX_PREVIEW {
            out.push('…');
            break;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(&mut out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

/// Longest prefix of a field that is logged.
pub const MAX_PREVIEW: usize = 120;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_line_breaks_and_controls() {
        assert_eq!(escape_log("Re: hi\r\nthere\x07"), "Re: hi\\r\\nthere\\x07");
    }

    #[test]
    fn truncates_long_subjects() {
        let long = "s".repeat(MAX_PREVIEW + 10);
        let esc = escape_log(&long);
        assert!(esc.ends_with('…'));
        assert_eq!(esc.chars().count(), MAX_PREVIEW + 1);
    }
}
