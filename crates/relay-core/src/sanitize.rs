//! HTML encoding of user-supplied text.

use std::fmt::Write;

/// Encode text for safe inclusion in HTML markup and attributes.
///
/// Besides the markup characters, Latin-1 supplement characters
/// (U+00A0 to U+00FF) and characters outside the Basic Multilingual Plane
/// become decimal character references.
#[must_use]
pub fn html_encode(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            '\u{a0}'..='\u{ff}' | '\u{10000}'..='\u{10ffff}' => {
                // Writing to a String cannot fail
                let _ = write!(out, "&#{};", u32::from(c));
            }
            _ => out.push(c),
        }
    }
    out
}
