use std::borrow::Cow;

/// Truncates a string to at most `max_chars` chars.
///
/// Returns `Cow::Borrowed` when the string already fits. No ellipsis is
/// added: the result is sent to an API with a hard length limit, not shown
/// in a terminal.
///
/// # Examples
///
/// ```
/// use feedpost::util::truncate_chars;
///
/// assert_eq!(truncate_chars("Short", 10), "Short");
/// assert_eq!(truncate_chars("héllo wörld", 5), "héllo");
/// ```
pub fn truncate_chars(s: &str, max_chars: usize) -> Cow<'_, str> {
    match s.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => Cow::Owned(s[..byte_idx].to_string()),
        None => Cow::Borrowed(s),
    }
}

/// Removes control characters and ANSI escape sequences from feed-supplied text.
///
/// Tab, newline and carriage return are kept; everything else below 0x20,
/// DEL, and CSI sequences (`ESC [ ... final`) are dropped. Feed titles end up
/// in post titles and log lines, where raw escapes are at best noise.
///
/// # Examples
///
/// ```
/// use feedpost::util::strip_control_chars;
///
/// assert_eq!(strip_control_chars("plain"), "plain");
/// assert_eq!(strip_control_chars("\x1b[31mred\x1b[0m"), "red");
/// assert_eq!(strip_control_chars("bell\x07"), "bell");
/// ```
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    let needs_strip = s
        .chars()
        .any(|c| c.is_control() && !matches!(c, '\t' | '\n' | '\r'));
    if !needs_strip {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\x1b' {
            if chars.peek() == Some(&'[') {
                chars.next();
                // parameter and intermediate bytes up to and including the final byte
                for next in chars.by_ref() {
                    if ('\x40'..='\x7e').contains(&next) {
                        break;
                    }
                }
            }
            continue;
        }
        if c.is_control() && !matches!(c, '\t' | '\n' | '\r') {
            continue;
        }
        out.push(c);
    }
    Cow::Owned(out)
}

/// Collapses every run of whitespace into a single space and trims the ends.
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
