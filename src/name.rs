/// Normalizes a domain name for comparison and cache keying: trims whitespace, strips a
/// trailing dot, and lowercases (ASCII) so comparisons are case-insensitive (spec §3, §4.1.1).
pub fn normalize(raw: &str) -> String {
    let trimmed = raw.trim();
    let without_trailing_dot = trimmed.strip_suffix('.').unwrap_or(trimmed);
    without_trailing_dot.to_ascii_lowercase()
}

/// Builds the ordered list of suffixes, shortest to longest, for a normalized domain name.
/// `a.b.example.com` yields `[com, example.com, b.example.com, a.b.example.com]`. The empty
/// root label is never included (spec §4.1.1).
pub fn suffixes(normalized: &str) -> Vec<String> {
    if normalized.is_empty() {
        return Vec::new();
    }
    let labels: Vec<&str> = normalized.split('.').collect();
    (0..labels.len()).rev().map(|start| labels[start..].join(".")).collect()
}
