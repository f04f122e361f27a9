//! Helpers for sanitizing data before it enters tracing spans or the queue
//! table.
//!
//! Document URLs are untrusted and may carry signed query strings or
//! credentials; database URLs always carry a password.

use reqwest::Url;

/// Strips userinfo, query and fragment from a document URL.
///
/// - `https://user:pw@host/a.pdf?sig=abc` → `https://host/a.pdf`
/// - unparseable input → `<invalid url>`
pub fn redact_url(raw: &str) -> String {
    match Url::parse(raw.trim()) {
        Ok(mut url) => {
            // cannot-be-a-base URLs reject credential changes; nothing to strip there
            let _ = url.set_username("");
            let _ = url.set_password(None);
            url.set_query(None);
            url.set_fragment(None);
            url.to_string()
        }
        Err(_) => "<invalid url>".to_string(),
    }
}

/// Masks the password of a database URL.
///
/// - `postgres://app:secret@db:5432/docs` → `postgres://app:****@db:5432/docs`
/// - `sqlite::memory:` → unchanged
pub fn redact_db_url(raw: &str) -> String {
    if let Some(scheme_end) = raw.find("://") {
        let after_scheme = &raw[scheme_end + 3..];
        let authority_end = after_scheme.find('/').unwrap_or(after_scheme.len());
        let authority = &after_scheme[..authority_end];
        if let Some(at_pos) = authority.rfind('@') {
            let userinfo = &authority[..at_pos];
            let user = userinfo.split(':').next().unwrap_or_default();
            return format!(
                "{}{}:****@{}",
                &raw[..scheme_end + 3],
                user,
                &after_scheme[at_pos + 1..]
            );
        }
    }
    raw.to_string()
}

/// Cuts `message` to at most `max_chars` characters, never splitting a
/// multi-byte character.
pub fn truncate_chars(message: &str, max_chars: usize) -> String {
    match message.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => message[..byte_idx].to_string(),
        None => message.to_string(),
    }
}

/// Like [`truncate_chars`] but appends `…` when something was cut.
pub fn ellipsize(message: &str, max_chars: usize) -> String {
    match message.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}…", &message[..byte_idx]),
        None => message.to_string(),
    }
}
