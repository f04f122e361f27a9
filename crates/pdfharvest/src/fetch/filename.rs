//! Best-effort filename for a downloaded document.

use std::sync::LazyLock;

use percent_encoding::percent_decode_str;
use regex::Regex;
use reqwest::Url;

/// RFC 5987 extended form: `filename*=UTF-8''report%20v2.pdf`
static EXTENDED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)filename\*\s*=\s*(?:[A-Za-z0-9!#$&+.^_`|~-]+)?'[^']*'([^;]+)"#)
        .expect("static regex")
});

/// Plain form, quoted or not: `filename="report.pdf"`
static PLAIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(?:^|;)\s*filename\s*=\s*(?:"([^"]*)"|([^;]+))"#).expect("static regex")
});

/// Picks a filename from `Content-Disposition`, else from the URL path.
pub fn guess_filename(url: &Url, content_disposition: Option<&str>) -> Option<String> {
    content_disposition
        .and_then(from_content_disposition)
        .or_else(|| from_url(url))
}

pub fn from_content_disposition(header: &str) -> Option<String> {
    if let Some(caps) = EXTENDED.captures(header) {
        if let Some(name) = caps.get(1).and_then(|m| clean(&decode(m.as_str()))) {
            return Some(name);
        }
    }
    let caps = PLAIN.captures(header)?;
    let raw = caps.get(1).or_else(|| caps.get(2))?.as_str();
    clean(&decode(raw))
}

pub fn from_url(url: &Url) -> Option<String> {
    let segment = url.path_segments()?.filter(|s| !s.is_empty()).last()?;
    clean(&decode(segment))
}

fn decode(raw: &str) -> String {
    percent_decode_str(raw.trim()).decode_utf8_lossy().into_owned()
}

/// Drops any directory part and surrounding whitespace.
fn clean(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name).trim();
    if base.is_empty() || base == "." || base == ".." {
        None
    } else {
        Some(base.to_string())
    }
}
