pub mod size;
pub mod url;

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

pub use size::parse_size;

/// Result partitions for URLs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    All,
    Parameters,
    JsFiles,
    ApiEndpoints,
    InterestingPaths,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::All,
        Category::Parameters,
        Category::JsFiles,
        Category::ApiEndpoints,
        Category::InterestingPaths,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::All => "all",
            Category::Parameters => "parameters",
            Category::JsFiles => "js_files",
            Category::ApiEndpoints => "api_endpoints",
            Category::InterestingPaths => "interesting_paths",
        }
    }
}

const SENSITIVE_KEYWORDS: &[&str] = &[
    ".log",
    ".bak",
    ".config",
    ".env",
    ".sql",
    "admin",
    "dashboard",
    "secret",
    "token",
    "backup",
];

/// First matching rule wins: query string, `.js`, api, sensitive keyword.
pub fn categorize(url: &str) -> Category {
    let lower = url.to_lowercase();
    if let Some((_, query)) = lower.split_once('?') {
        if !query.is_empty() {
            return Category::Parameters;
        }
    }
    if url::path_of(&lower).ends_with(".js") {
        return Category::JsFiles;
    }
    if lower.contains("/api/") || lower.contains("api.") {
        return Category::ApiEndpoints;
    }
    if SENSITIVE_KEYWORDS.iter().any(|k| lower.contains(k)) {
        return Category::InterestingPaths;
    }
    Category::All
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NormalizedRecord {
    pub url: String,
    pub status_code: Option<u16>,
    pub content_length: Option<u64>,
    pub source_tool: String,
    pub category: Category,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostRecord {
    pub host: String,
    pub port: Option<u16>,
}

/// Line grammar of a tool's output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Grammar {
    /// `200 GET 10l 20w 150c https://x/admin`
    Feroxbuster,
    /// `[12:00:00] 200 -  1KB - https://x/admin`
    Dirsearch,
    /// `admin [Status: 200, Size: 12, ...]`
    Ffuf,
    /// `/admin (Status: 200) [Size: 12]`
    Gobuster,
    /// Endpoints pulled from JavaScript, absolute or relative.
    LinkFinder,
    /// One URL per line (crawlers and archive sources).
    UrlPerLine,
    /// First embedded absolute URL anywhere in the line.
    Generic,
    /// Bare hostnames, one per line.
    Hostnames,
    /// `host:port`
    HostPort,
    /// `Discovered open port 80/tcp on 10.0.0.1`
    Masscan,
    /// `80/tcp open http`
    Nmap,
    /// httpx JSON lines.
    ProbeJson,
}

impl Grammar {
    pub fn for_tool(tool: &str) -> Grammar {
        crate::tools::lookup(tool)
            .map(|spec| spec.grammar)
            .unwrap_or(Grammar::Generic)
    }

    pub fn yields_urls(&self) -> bool {
        !matches!(
            self,
            Grammar::Hostnames
                | Grammar::HostPort
                | Grammar::Masscan
                | Grammar::Nmap
                | Grammar::ProbeJson
        )
    }
}

macro_rules! static_regex {
    ($name:ident, $pattern:expr) => {
        fn $name() -> &'static Regex {
            static RE: OnceLock<Regex> = OnceLock::new();
            RE.get_or_init(|| Regex::new($pattern).expect(stringify!($name)))
        }
    };
}

static_regex!(
    ferox_re,
    r"^\s*(\d{3})\s+\S+\s+\S+l\s+\S+w\s+(\S+)c\s+(https?://\S+)"
);
static_regex!(
    dirsearch_re,
    r"^\[\d{2}:\d{2}:\d{2}\]\s+(\d{3})\s+(?:-\s*(\S+)\s*-\s*)?(https?://\S+)(?:\s*->\s*(https?://\S+))?"
);
static_regex!(
    ffuf_re,
    r"^(\S+)\s+\[Status:\s*(\d{3})(?:,\s*Size:\s*(\d+))?"
);
static_regex!(
    gobuster_re,
    r"^(\S+)\s+\(Status:\s*(\d{3})\)(?:\s+\[Size:\s*(\d+)\])?"
);
static_regex!(generic_url_re, r"(https?://[^\s/$.?#][^\s]*)");
static_regex!(relative_endpoint_re, r#"^['"]?(/[a-zA-Z0-9_./-]+)"#);
static_regex!(
    hostname_re,
    r"^[a-z0-9_]([a-z0-9_-]*[a-z0-9])?(\.[a-z0-9_]([a-z0-9_-]*[a-z0-9])?)+$"
);
static_regex!(masscan_re, r"Discovered open port (\d+)/tcp on (\S+)");
static_regex!(nmap_port_re, r"^(\d+)/tcp\s+open");

fn is_noise(line: &str) -> bool {
    line.trim().is_empty() || line.contains(":: Progress:") || line.contains("Target: ")
}

fn first_embedded_url(line: &str) -> Option<String> {
    generic_url_re()
        .captures(line)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim_end_matches(['"', '\'', ',', ';', ')']).to_string())
}

struct Match {
    url: String,
    status_code: Option<u16>,
    content_length: Option<u64>,
    relative: bool,
}

impl Match {
    fn absolute(url: String) -> Self {
        Match {
            url,
            status_code: None,
            content_length: None,
            relative: false,
        }
    }
}

fn match_line(grammar: Grammar, line: &str, base_url: &str) -> Option<Match> {
    match grammar {
        Grammar::Feroxbuster => {
            let caps = ferox_re().captures(line)?;
            Some(Match {
                url: caps.get(3)?.as_str().to_string(),
                status_code: caps.get(1).and_then(|m| m.as_str().parse().ok()),
                content_length: caps.get(2).map(|m| parse_size(m.as_str())),
                relative: false,
            })
        }
        Grammar::Dirsearch => {
            let caps = dirsearch_re().captures(line)?;
            Some(Match {
                url: caps.get(3)?.as_str().to_string(),
                status_code: caps.get(1).and_then(|m| m.as_str().parse().ok()),
                content_length: caps.get(2).map(|m| parse_size(m.as_str())),
                relative: false,
            })
        }
        Grammar::Ffuf | Grammar::Gobuster => {
            let caps = if grammar == Grammar::Ffuf {
                ffuf_re().captures(line)?
            } else {
                gobuster_re().captures(line)?
            };
            Some(Match {
                url: url::join(base_url, caps.get(1)?.as_str()),
                status_code: caps.get(2).and_then(|m| m.as_str().parse().ok()),
                content_length: caps.get(3).and_then(|m| m.as_str().parse().ok()),
                relative: false,
            })
        }
        Grammar::LinkFinder => {
            let trimmed = line.trim();
            if ["[+]", "[i]", "[!]"].iter().any(|p| trimmed.starts_with(p)) {
                return None;
            }
            if let Some(found) = first_embedded_url(trimmed) {
                return Some(Match::absolute(found));
            }
            let caps = relative_endpoint_re().captures(trimmed)?;
            Some(Match {
                url: caps.get(1)?.as_str().to_string(),
                status_code: None,
                content_length: None,
                relative: true,
            })
        }
        Grammar::UrlPerLine => {
            let trimmed = line.trim();
            if url::is_absolute(trimmed) {
                Some(Match::absolute(trimmed.to_string()))
            } else {
                first_embedded_url(trimmed).map(Match::absolute)
            }
        }
        Grammar::Generic => first_embedded_url(line).map(Match::absolute),
        Grammar::Hostnames
        | Grammar::HostPort
        | Grammar::Masscan
        | Grammar::Nmap
        | Grammar::ProbeJson => None,
    }
}

/// Turns one raw output line into a record, or `None` when the line is not a
/// finding.
///
/// Absolute URLs are canonicalized and dropped when they equal `base_url`.
/// Relative endpoints only come out of JavaScript link extraction and are
/// always filed under [`Category::InterestingPaths`].
pub fn parse(raw_line: &str, tool_name: &str, base_url: &str) -> Option<NormalizedRecord> {
    parse_with(Grammar::for_tool(tool_name), raw_line, tool_name, base_url)
}

pub fn parse_with(
    grammar: Grammar,
    raw_line: &str,
    tool_name: &str,
    base_url: &str,
) -> Option<NormalizedRecord> {
    let line = url::strip_ansi(raw_line);
    if is_noise(&line) {
        return None;
    }
    let found = match_line(grammar, &line, base_url)?;

    if found.relative {
        return Some(NormalizedRecord {
            url: url::canonicalize(&found.url),
            status_code: None,
            content_length: None,
            source_tool: tool_name.to_string(),
            category: Category::InterestingPaths,
        });
    }

    let canonical = url::canonicalize(&found.url);
    if !url::is_absolute(&canonical) {
        return None;
    }
    if !base_url.is_empty() && canonical == url::canonicalize(base_url) {
        return None;
    }
    Some(NormalizedRecord {
        category: categorize(&canonical),
        url: canonical,
        status_code: found.status_code,
        content_length: found.content_length,
        source_tool: tool_name.to_string(),
    })
}

/// Host-level grammars. `target` fills in the host for tools that only
/// print ports.
pub fn parse_host(raw_line: &str, tool_name: &str, target: &str) -> Option<HostRecord> {
    let line = url::strip_ansi(raw_line);
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match Grammar::for_tool(tool_name) {
        Grammar::Hostnames => {
            let host = line.trim_start_matches("*.").trim_end_matches('.').to_lowercase();
            if hostname_re().is_match(&host) {
                Some(HostRecord { host, port: None })
            } else {
                None
            }
        }
        Grammar::HostPort => {
            let (host, port) = line.rsplit_once(':')?;
            Some(HostRecord {
                host: host.trim_matches(['[', ']']).to_lowercase(),
                port: Some(port.trim().parse().ok()?),
            })
        }
        Grammar::Masscan => {
            let caps = masscan_re().captures(line)?;
            Some(HostRecord {
                host: caps.get(2)?.as_str().to_string(),
                port: Some(caps.get(1)?.as_str().parse().ok()?),
            })
        }
        Grammar::Nmap => {
            let caps = nmap_port_re().captures(line)?;
            Some(HostRecord {
                host: target.to_string(),
                port: Some(caps.get(1)?.as_str().parse().ok()?),
            })
        }
        _ => None,
    }
}

/// One line of liveness-probe JSON output.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeRecord {
    pub url: String,
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_length: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webserver: Option<String>,
}

pub fn parse_probe(raw_line: &str) -> Option<ProbeRecord> {
    let value: serde_json::Value = serde_json::from_str(raw_line.trim()).ok()?;
    let url = value.get("url")?.as_str()?.to_string();
    let number = |keys: &[&str]| {
        keys.iter()
            .find_map(|k| value.get(*k).and_then(|v| v.as_u64()))
    };
    let text = |key: &str| {
        value
            .get(key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    let last_modified = value
        .get("header")
        .and_then(|h| h.as_object())
        .and_then(|headers| {
            headers.iter().find_map(|(k, v)| {
                let key = k.to_lowercase().replace('_', "-");
                if key == "last-modified" {
                    v.as_str().map(str::to_string)
                } else {
                    None
                }
            })
        });
    Some(ProbeRecord {
        url,
        status_code: number(&["status_code", "status-code"]).and_then(|n| u16::try_from(n).ok()),
        last_modified,
        content_length: number(&["content_length", "content-length"]),
        title: text("title"),
        webserver: text("webserver"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categorization_priority() {
        assert_eq!(categorize("https://x.com/api/v1?id=2"), Category::Parameters);
        assert_eq!(categorize("https://x.com/app.js"), Category::JsFiles);
        assert_eq!(categorize("https://x.com/app.js?v=3"), Category::Parameters);
        assert_eq!(categorize("https://api.x.com/users"), Category::ApiEndpoints);
        assert_eq!(categorize("https://x.com/.env"), Category::InterestingPaths);
        assert_eq!(categorize("https://x.com/about"), Category::All);
    }

    #[test]
    fn feroxbuster_line() {
        let r = parse(
            "\x1b[32m200\x1b[0m      GET       10l       20w      150c https://x.com/admin/",
            "feroxbuster",
            "https://x.com",
        )
        .unwrap();
        assert_eq!(r.url, "https://x.com/admin");
        assert_eq!(r.status_code, Some(200));
        assert_eq!(r.content_length, Some(150));
        assert_eq!(r.category, Category::InterestingPaths);
    }

    #[test]
    fn dirsearch_line_with_size_and_redirect() {
        let r = parse(
            "[10:21:33] 301 -  1.2K - https://x.com/static  ->  https://x.com/static/",
            "dirsearch",
            "https://x.com",
        )
        .unwrap();
        assert_eq!(r.url, "https://x.com/static");
        assert_eq!(r.status_code, Some(301));
        assert_eq!(r.content_length, Some(1229));
    }

    #[test]
    fn path_only_tools_are_joined_to_base() {
        let r = parse(
            "backup                  [Status: 403, Size: 277, Words: 20, Lines: 10]",
            "ffuf",
            "https://x.com/",
        )
        .unwrap();
        assert_eq!(r.url, "https://x.com/backup");
        assert_eq!(r.content_length, Some(277));

        let r = parse("/login (Status: 200) [Size: 512]", "gobuster", "https://x.com").unwrap();
        assert_eq!(r.url, "https://x.com/login");
        assert_eq!(r.status_code, Some(200));
    }

    #[test]
    fn base_url_itself_is_not_a_finding() {
        assert!(parse("/ (Status: 200) [Size: 10]", "gobuster", "https://x.com/").is_none());
        assert!(parse("see https://x.com/ now", "unknown-tool", "https://x.com").is_none());
    }

    #[test]
    fn progress_and_banner_lines_are_skipped() {
        assert!(parse(
            ":: Progress: [40/4614] :: Job [1/1] :: 0 req/sec",
            "ffuf",
            "https://x.com"
        )
        .is_none());
        assert!(parse("Target: https://x.com/", "dirsearch", "https://x.com").is_none());
    }

    #[test]
    fn linkfinder_relative_and_absolute() {
        assert!(parse("[+] URL: https://x.com/app.js", "linkfinder", "https://x.com/app.js").is_none());
        let rel = parse("\"/api//internal/users\"", "linkfinder", "https://x.com/app.js").unwrap();
        assert_eq!(rel.url, "/api/internal/users");
        assert_eq!(rel.category, Category::InterestingPaths);
        let abs = parse("https://cdn.x.com/lib.js", "linkfinder", "https://x.com/app.js").unwrap();
        assert_eq!(abs.category, Category::JsFiles);
    }

    #[test]
    fn generic_fallback_for_unknown_tools() {
        let r = parse("found something at https://x.com/a?b=1 (ok)", "mystery", "").unwrap();
        assert_eq!(r.url, "https://x.com/a?b=1");
        assert_eq!(r.category, Category::Parameters);
        assert!(parse("nothing here", "mystery", "").is_none());
    }

    #[test]
    fn host_grammars() {
        assert_eq!(
            parse_host("WWW.Example.com", "subfinder", "example.com"),
            Some(HostRecord { host: "www.example.com".into(), port: None })
        );
        assert!(parse_host("not a host", "assetfinder", "example.com").is_none());
        assert_eq!(
            parse_host("10.0.0.1:8443", "naabu", "10.0.0.1").unwrap().port,
            Some(8443)
        );
        let m = parse_host("Discovered open port 22/tcp on 10.0.0.2", "masscan", "").unwrap();
        assert_eq!(m.host, "10.0.0.2");
        assert_eq!(m.port, Some(22));
        let n = parse_host("443/tcp open  ssl/http nginx", "nmap", "10.0.0.3").unwrap();
        assert_eq!(n.host, "10.0.0.3");
        assert_eq!(n.port, Some(443));
        assert!(parse_host("443/tcp closed https", "nmap", "10.0.0.3").is_none());
    }

    #[test]
    fn probe_json_line() {
        let line = r#"{"url":"https://a.x.com","status_code":200,"content_length":1500,"title":"Home","webserver":"nginx","header":{"last_modified":"Mon, 01 Jan 2024 00:00:00 GMT"}}"#;
        let p = parse_probe(line).unwrap();
        assert_eq!(p.url, "https://a.x.com");
        assert_eq!(p.status_code, Some(200));
        assert_eq!(p.content_length, Some(1500));
        assert_eq!(p.webserver.as_deref(), Some("nginx"));
        assert_eq!(p.last_modified.as_deref(), Some("Mon, 01 Jan 2024 00:00:00 GMT"));
        assert!(parse_probe("not json").is_none());
    }
}
