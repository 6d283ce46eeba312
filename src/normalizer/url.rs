use std::sync::OnceLock;

use regex::Regex;

fn ansi_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\x1B(?:[@-Z\\\-_]|\[[0-?]*[ -/]*[@-~])").expect("ansi pattern"))
}

pub fn strip_ansi(line: &str) -> String {
    ansi_re().replace_all(line, "").to_string()
}

pub fn is_absolute(url: &str) -> bool {
    match reqwest::Url::parse(url) {
        Ok(parsed) => {
            matches!(parsed.scheme(), "http" | "https") && parsed.host_str().is_some()
        }
        Err(_) => false,
    }
}

/// Lowercases the scheme, collapses repeated slashes after the authority and
/// strips trailing slashes.
pub fn canonicalize(url: &str) -> String {
    let url = url.trim();
    let (scheme, rest) = match url.split_once("://") {
        Some((scheme, rest)) => (Some(scheme.to_ascii_lowercase()), rest),
        None => (None, url),
    };

    let (path_part, suffix) = match rest.find(['?', '#']) {
        Some(idx) => rest.split_at(idx),
        None => (rest, ""),
    };

    let mut collapsed = String::with_capacity(path_part.len());
    let mut prev_slash = false;
    for c in path_part.chars() {
        if c == '/' {
            if prev_slash {
                continue;
            }
            prev_slash = true;
        } else {
            prev_slash = false;
        }
        collapsed.push(c);
    }
    if suffix.is_empty() {
        while collapsed.len() > 1 && collapsed.ends_with('/') {
            collapsed.pop();
        }
    }

    match scheme {
        Some(scheme) => format!("{scheme}://{collapsed}{suffix}"),
        None => format!("{collapsed}{suffix}"),
    }
}

/// Joins a tool-reported path onto the base URL. Absolute URLs pass through.
pub fn join(base_url: &str, path: &str) -> String {
    let path = path.trim();
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Path component (without query or fragment) of an absolute or relative URL.
pub fn path_of(url: &str) -> &str {
    let rest = match url.split_once("://") {
        Some((_, rest)) => match rest.find('/') {
            Some(idx) => &rest[idx..],
            None => "",
        },
        None => url,
    };
    match rest.find(['?', '#']) {
        Some(idx) => &rest[..idx],
        None => rest,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_color_codes() {
        assert_eq!(
            strip_ansi("\x1b[32m200\x1b[0m GET http://x.com/a"),
            "200 GET http://x.com/a"
        );
    }

    #[test]
    fn canonical_form() {
        assert_eq!(canonicalize("HTTPS://x.com//a///b/"), "https://x.com/a/b");
        assert_eq!(canonicalize("https://x.com/"), "https://x.com");
        assert_eq!(canonicalize("https://x.com/q?next=//a/"), "https://x.com/q?next=//a/");
        assert_eq!(canonicalize("/static//app.js"), "/static/app.js");
    }

    #[test]
    fn join_handles_slashes_and_absolute_input() {
        assert_eq!(join("https://x.com/", "/admin"), "https://x.com/admin");
        assert_eq!(join("https://x.com", "admin"), "https://x.com/admin");
        assert_eq!(join("https://x.com", "http://y.com/a"), "http://y.com/a");
    }

    #[test]
    fn absolute_detection() {
        assert!(is_absolute("https://x.com/a"));
        assert!(!is_absolute("/a/b"));
        assert!(!is_absolute("ftp://x.com/a"));
    }

    #[test]
    fn path_extraction() {
        assert_eq!(path_of("https://x.com/a/b.js?v=1"), "/a/b.js");
        assert_eq!(path_of("https://x.com"), "");
        assert_eq!(path_of("/rel/c.php#top"), "/rel/c.php");
    }
}
