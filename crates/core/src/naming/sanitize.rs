//! Filesystem-safe file name sanitization.

/// Characters rejected by at least one common filesystem.
pub const DISALLOWED_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Maximum length of a sanitized file name in bytes (extension included).
pub const MAX_FILENAME_BYTES: usize = 200;

/// Name used when nothing usable is left after sanitization.
pub const PLACEHOLDER_NAME: &str = "untitled";

/// Longest extension that is still treated as one when truncating.
const MAX_EXTENSION_BYTES: usize = 16;

const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Turns an arbitrary title into a file name that is valid on common filesystems.
///
/// Disallowed and control characters are removed, runs of whitespace are
/// collapsed, trailing dots and spaces are trimmed, and reserved Windows
/// device names are prefixed. The result is truncated to
/// [`MAX_FILENAME_BYTES`] while keeping the extension. Never returns an
/// empty string.
pub fn sanitize(raw: &str) -> String {
    let cleaned = clean(raw);
    let (stem, ext) = split_extension(&cleaned);

    let mut stem = finish_stem(stem);
    if stem.is_empty() {
        stem = PLACEHOLDER_NAME.to_string();
    }
    if is_reserved(&stem) {
        stem.insert(0, '_');
    }

    match ext {
        Some(ext) => {
            let budget = MAX_FILENAME_BYTES.saturating_sub(ext.len() + 1);
            let stem = truncate_bytes(&stem, budget);
            let stem = finish_stem(stem);
            let stem = if stem.is_empty() {
                PLACEHOLDER_NAME.to_string()
            } else {
                stem
            };
            format!("{}.{}", stem, ext)
        }
        None => {
            let truncated = finish_stem(truncate_bytes(&stem, MAX_FILENAME_BYTES));
            if truncated.is_empty() {
                PLACEHOLDER_NAME.to_string()
            } else {
                truncated
            }
        }
    }
}

/// Sanitizes a single directory component (no extension handling).
pub fn sanitize_component(raw: &str) -> String {
    let cleaned = clean(raw);
    let mut component = finish_stem(truncate_bytes(&cleaned, MAX_FILENAME_BYTES));
    if component.is_empty() {
        component = PLACEHOLDER_NAME.to_string();
    }
    if is_reserved(&component) {
        component.insert(0, '_');
    }
    component
}

fn clean(raw: &str) -> String {
    let filtered: String = raw
        .chars()
        .filter(|c| !DISALLOWED_CHARS.contains(c) && !c.is_control())
        .collect();
    filtered.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Splits `name` into stem and extension when the suffix looks like one.
fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        // A bare `.ext` is an empty stem, not a hidden file name.
        Some(idx) if idx + 1 < name.len() => {
            let ext = &name[idx + 1..];
            if ext.len() <= MAX_EXTENSION_BYTES && ext.chars().all(|c| c.is_ascii_alphanumeric()) {
                (&name[..idx], Some(ext))
            } else {
                (name, None)
            }
        }
        _ => (name, None),
    }
}

fn finish_stem(stem: &str) -> String {
    stem.trim()
        .trim_end_matches(['.', ' '])
        .trim_start_matches(['.', ' '])
        .to_string()
}

fn truncate_bytes(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn is_reserved(stem: &str) -> bool {
    let base = stem.split('.').next().unwrap_or(stem);
    RESERVED_NAMES
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(base))
}
