//! Lexical helpers for classifying lookup queries.

/// Low-precision test whether a query string could be an IP prefix.
///
/// The query must contain at least one `.` or `:`, and every fragment
/// terminated by such a separator must consist of hex or decimal digits.
/// The trailing fragment is deliberately not checked, so partial input like
/// `23.42.11.42/23` still classifies as a prefix while free text such as
/// `Nordfoo` does not.
#[must_use]
pub fn maybe_prefix(query: &str) -> bool {
    let query = query.to_lowercase();
    if !query.contains('.') && !query.contains(':') {
        return false;
    }

    let mut fragment_start = 0;
    for (idx, ch) in query.char_indices() {
        if ch == '.' || ch == ':' {
            let fragment = &query[fragment_start..idx];
            if !fragment.chars().all(|c| c.is_ascii_hexdigit()) {
                return false;
            }
            fragment_start = idx + ch.len_utf8();
        }
    }
    true
}
