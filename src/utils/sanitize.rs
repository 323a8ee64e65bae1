//! School field sanitization.
//!
//! Every school attribute is passed through [`sanitize_field`] before it is
//! placed in a prompt. A sanitized value is a single line, contains no
//! markup tags, and fits a byte budget, so it cannot close the data block it
//! sits in or start a fresh instruction line.

use once_cell::sync::Lazy;
use regex::Regex;

/// Default maximum field size in bytes.
pub const DEFAULT_MAX_FIELD_BYTES: usize = 500;

/// The data-block delimiter in any case or spacing, closed or not.
static DATA_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<\s*/?\s*school_data\b[^<>]{0,200}>?").unwrap());

/// Markup tags: a name followed only by `key=value` attributes. Bracketed
/// prose such as `<b and c>` does not match.
static TAG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"</?\s*[A-Za-z_][A-Za-z0-9_\-]*(?:\s+[A-Za-z_:][A-Za-z0-9_:.\-]*\s*=\s*(?:"[^"<>]*"|'[^'<>]*'|[^\s"'<>]+))*\s*/?>"#,
    )
    .unwrap()
});

static BASE64_URI_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"data:[a-zA-Z0-9/+\-\.]+;base64,[A-Za-z0-9+/=]+").unwrap());

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Sanitize one field value for inclusion in a prompt.
///
/// 1. Replace control characters (newlines included) with spaces.
/// 2. Drop `data:...;base64,...` URIs and markup tags.
/// 3. Collapse whitespace runs and trim.
/// 4. Truncate to `max_bytes` on a char boundary, marking the cut with `…`.
pub fn sanitize_field(value: &str, max_bytes: usize) -> String {
    let no_controls: String = value
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();

    let stripped = BASE64_URI_RE.replace_all(&no_controls, "[data removed]");
    let stripped = DATA_TAG_RE.replace_all(&stripped, " ");
    let stripped = TAG_RE.replace_all(&stripped, " ");
    let collapsed = WHITESPACE_RE.replace_all(&stripped, " ");
    let out = collapsed.trim();

    if out.len() <= max_bytes {
        return out.to_string();
    }
    let head = take_prefix_charsafe(out, max_bytes.saturating_sub('…'.len_utf8()));
    format!("{}…", head.trim_end())
}

fn take_prefix_charsafe(s: &str, max_bytes: usize) -> &str {
    let mut end = max_bytes.min(s.len());
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
