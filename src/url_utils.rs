use std::sync::OnceLock;

use regex::Regex;
use url::Url;

/// Characters allowed in a YouTube-style video id.
fn video_id_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{6,64}$").ok())
        .as_ref()
}

/// Forgiving matcher; `Url` does the real validation.
fn url_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"https?://[^\s]+").ok()).as_ref()
}

/// Pull the first usable http(s) URL out of pasted text.
///
/// Surrounding prose and trailing punctuation are ignored, so
/// `see (https://youtu.be/abc), thanks` yields `https://youtu.be/abc`.
pub fn first_url(text: &str) -> Option<String> {
    url_re()?
        .find_iter(text)
        .map(|m| trim_trailing_punct(m.as_str()))
        .filter(|s| !s.is_empty())
        .find_map(normalize_http_url)
}

/// Normalize a presumed http(s) URL.
///
/// - Only http/https are accepted
/// - The fragment is dropped; it never identifies a different video
/// - Default ports are removed
/// - Scheme and host come out lowercased (the `url` parser does this for
///   special schemes)
pub fn normalize_http_url(input: &str) -> Option<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }

    let mut url = Url::parse(trimmed).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.host_str()?;

    url.set_fragment(None);

    let default_port = matches!(
        (url.scheme(), url.port()),
        ("http", Some(80)) | ("https", Some(443))
    );
    if default_port {
        let _ = url.set_port(None);
    }

    Some(url.to_string())
}

/// Extract a stable video id from a URL, when the host is one we know.
///
/// Handles `watch?v=`, `youtu.be/<id>`, and the `/shorts/`, `/embed/`,
/// `/live/` and `/v/` path forms. Returns `None` for anything else; the
/// backend's id is authoritative in that case.
pub fn extract_video_id(input: &str) -> Option<String> {
    let url = Url::parse(input.trim()).ok()?;
    let host = url.host_str()?.trim_start_matches("www.").trim_start_matches("m.");

    let candidate = match host {
        "youtu.be" => url.path_segments()?.next().map(str::to_string),
        "youtube.com" | "music.youtube.com" | "youtube-nocookie.com" => {
            let from_query = url
                .query_pairs()
                .find(|(k, _)| k == "v")
                .map(|(_, v)| v.into_owned());
            from_query.or_else(|| {
                let mut segments = url.path_segments()?;
                match segments.next()? {
                    "shorts" | "embed" | "live" | "v" => segments.next().map(str::to_string),
                    _ => None,
                }
            })
        }
        _ => None,
    }?;

    if video_id_re()?.is_match(&candidate) {
        Some(candidate)
    } else {
        None
    }
}

/// Peel trailing punctuation that commonly sticks to URLs in pasted prose.
fn trim_trailing_punct(s: &str) -> &str {
    s.trim_end_matches(|c: char| {
        matches!(
            c,
            ')' | ']' | '}' | '>' | ',' | '.' | ';' | ':' | '!' | '?' | '"' | '\''
        )
    })
}
