pub mod http;

/// Convert a string to a safe filename.
pub fn safe_filename(name: &str) -> String {
    const UNSAFE: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];
    let mut result = name.to_string();
    for &c in UNSAFE {
        result = result.replace(c, "_");
    }
    result.trim().to_string()
}

/// Truncate a string to at most `max_chars` characters, adding suffix if truncated.
pub fn truncate_chars(s: &str, max_chars: usize, suffix: &str) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let keep = max_chars.saturating_sub(suffix.chars().count());
    let mut out: String = s.chars().take(keep).collect();
    out.push_str(suffix);
    out
}

/// Short single-line preview of user text for log lines.
pub fn preview(s: &str) -> String {
    truncate_chars(&s.replace('\n', "⏎"), 80, "…")
}
