//! Content type detection for downloaded bodies.

use crate::error::FetchError;

/// How many leading bytes are searched for the PDF signature.
pub const SNIFF_WINDOW: usize = 1024;

pub const PDF_MIME: &str = "application/pdf";

const PDF_MAGIC: &[u8] = b"%PDF-";

/// True if the `%PDF-` signature occurs in the sniff window.
pub fn looks_like_pdf(body: &[u8]) -> bool {
    let window = &body[..body.len().min(SNIFF_WINDOW)];
    window.windows(PDF_MAGIC.len()).any(|w| w == PDF_MAGIC)
}

/// Decides the stored mime type.
///
/// The body is authoritative once it is long enough to carry the signature;
/// the declared `Content-Type` only decides for shorter bodies.
pub fn resolve_mime(body: &[u8], declared: Option<&str>) -> Result<&'static str, FetchError> {
    let accepted = if body.len() >= PDF_MAGIC.len() {
        looks_like_pdf(body)
    } else {
        declared.is_some_and(|d| essence(d) == PDF_MIME)
    };

    if accepted {
        Ok(PDF_MIME)
    } else {
        Err(FetchError::UnacceptedMime {
            declared: declared.map(str::to_string),
            detected: describe(body).to_string(),
        })
    }
}

/// `text/html; charset=utf-8` → `text/html`
fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// A rough label for a rejected body, for the error message only.
fn describe(body: &[u8]) -> &'static str {
    let window = &body[..body.len().min(SNIFF_WINDOW)];
    let trimmed = window
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .map_or(&[][..], |start| &window[start..]);

    if trimmed.is_empty() {
        "empty"
    } else if trimmed.starts_with(b"<") {
        "text/html"
    } else if trimmed.starts_with(b"{") || trimmed.starts_with(b"[") {
        "application/json"
    } else if trimmed.starts_with(b"PK\x03\x04") {
        "application/zip"
    } else if std::str::from_utf8(trimmed).is_ok() {
        "text/plain"
    } else {
        "application/octet-stream"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_at_start() {
        assert!(looks_like_pdf(b"%PDF-1.7\n%\xe2\xe3\xcf\xd3\n"));
        assert_eq!(resolve_mime(b"%PDF-1.4 rest", None).unwrap(), PDF_MIME);
    }

    #[test]
    fn test_signature_after_junk_within_window() {
        let mut body = vec![b' '; 1000];
        body.extend_from_slice(b"%PDF-1.5");
        assert!(looks_like_pdf(&body));
    }

    #[test]
    fn test_signature_beyond_window_is_ignored() {
        let mut body = vec![b'x'; SNIFF_WINDOW];
        body.extend_from_slice(b"%PDF-1.5");
        assert!(!looks_like_pdf(&body));
    }

    #[test]
    fn test_body_wins_over_declared_type() {
        // lying server: says PDF, sends HTML
        let err = resolve_mime(b"<!doctype html><html>", Some("application/pdf")).unwrap_err();
        assert!(matches!(
            err,
            FetchError::UnacceptedMime { ref detected, .. } if detected == "text/html"
        ));

        // generic type, real PDF
        assert_eq!(
            resolve_mime(b"%PDF-1.4\n", Some("application/octet-stream")).unwrap(),
            PDF_MIME
        );
    }

    #[test]
    fn test_short_body_falls_back_to_declared() {
        assert_eq!(
            resolve_mime(b"%PD", Some("Application/PDF; charset=binary")).unwrap(),
            PDF_MIME
        );
        assert!(resolve_mime(b"", Some("text/plain")).is_err());
        assert!(resolve_mime(b"", None).is_err());
    }

    #[test]
    fn test_describe() {
        assert_eq!(describe(b"  \n<html>"), "text/html");
        assert_eq!(describe(b"{\"a\":1}"), "application/json");
        assert_eq!(describe(b"hello"), "text/plain");
        assert_eq!(describe(&[0xff, 0xfe, 0x00]), "application/octet-stream");
        assert_eq!(describe(b""), "empty");
    }
}
