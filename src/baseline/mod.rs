use std::time::Duration;

use rand::distributions::Alphanumeric;
use rand::Rng;
use reqwest::{header, redirect, Proxy};
use serde::Serialize;

pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Statuses for which a nonexistent path is worth filtering on. Anything
/// else (a plain 404, a 5xx) already tells the tools the path is missing.
const WILDCARD_STATUSES: &[u16] = &[200, 301, 302, 401, 403];

/// Response signature of a path that cannot exist.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct WildcardBaseline {
    pub status_code: u16,
    pub byte_size: u64,
    pub line_count: u64,
}

impl WildcardBaseline {
    pub fn from_body(status_code: u16, body: &[u8]) -> Self {
        let line_count = if body.is_empty() {
            0
        } else {
            body.iter().filter(|b| **b == b'\n').count() as u64 + 1
        };
        Self {
            status_code,
            byte_size: body.len() as u64,
            line_count,
        }
    }

    pub fn is_wildcard(&self) -> bool {
        WILDCARD_STATUSES.contains(&self.status_code)
    }
}

fn random_segment() -> String {
    let mut rng = rand::thread_rng();
    let mut part = || -> String {
        (&mut rng)
            .sample_iter(&Alphanumeric)
            .take(8)
            .map(char::from)
            .collect::<String>()
            .to_lowercase()
    };
    format!("{}-{}", part(), part())
}

/// Single-shot client for baseline probes: redirects followed, TLS
/// verification off.
pub fn probe_client(proxy: Option<&str>) -> Result<reqwest::Client, reqwest::Error> {
    let mut builder = reqwest::Client::builder()
        .redirect(redirect::Policy::limited(10))
        .timeout(PROBE_TIMEOUT)
        .danger_accept_invalid_hostnames(true)
        .danger_accept_invalid_certs(true);
    if let Some(proxy) = proxy {
        builder = builder.proxy(Proxy::all(proxy)?);
    }
    builder.build()
}

/// Requests `<target_url>/<random>` once and records what came back.
///
/// Network failures yield `None`; callers then scan without a filter.
pub async fn probe(
    client: &reqwest::Client,
    target_url: &str,
    user_agent: &str,
) -> Option<WildcardBaseline> {
    let url = format!("{}/{}", target_url.trim_end_matches('/'), random_segment());
    let response = match client
        .get(&url)
        .header(header::USER_AGENT, user_agent)
        .send()
        .await
    {
        Ok(response) => response,
        Err(e) => {
            tracing::debug!(target_url, "baseline probe failed: {e}");
            return None;
        }
    };
    let status = response.status().as_u16();
    let body = match response.bytes().await {
        Ok(body) => body,
        Err(e) => {
            tracing::debug!(target_url, "baseline body read failed: {e}");
            return None;
        }
    };
    let baseline = WildcardBaseline::from_body(status, &body);
    tracing::debug!(
        target_url,
        status = baseline.status_code,
        size = baseline.byte_size,
        lines = baseline.line_count,
        "baseline established"
    );
    Some(baseline)
}

/// Extra arguments that make `tool` drop responses matching the baseline.
pub fn filter_args(tool: &str, baseline: Option<&WildcardBaseline>) -> Vec<String> {
    let Some(b) = baseline.filter(|b| b.is_wildcard()) else {
        return Vec::new();
    };
    let size = b.byte_size.to_string();
    // a 200 wildcard is filtered on size alone, real pages share the status
    let status = (b.status_code != 200).then(|| b.status_code.to_string());
    let (size_flag, status_flag, size_value) = match tool {
        "ffuf" => ("-fs", Some("-fc"), size),
        "feroxbuster" => ("-S", Some("-C"), size),
        "dirsearch" => ("--exclude-sizes", Some("--exclude-status"), format!("{size}B")),
        "gobuster" => ("--exclude-length", None, size),
        _ => return Vec::new(),
    };
    let mut args = vec![size_flag.to_string(), size_value];
    if let (Some(flag), Some(status)) = (status_flag, status) {
        args.push(flag.to_string());
        args.push(status);
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_counts_bytes_and_lines() {
        let b = WildcardBaseline::from_body(200, b"<html>\n<body>nope</body>\n</html>");
        assert_eq!(b.byte_size, 32);
        assert_eq!(b.line_count, 3);
        assert_eq!(WildcardBaseline::from_body(302, b"").line_count, 0);
    }

    #[test]
    fn random_segments_differ() {
        let a = random_segment();
        let b = random_segment();
        assert_eq!(a.len(), 17);
        assert_ne!(a, b);
    }

    #[test]
    fn filter_args_per_tool() {
        let b = WildcardBaseline {
            status_code: 200,
            byte_size: 1234,
            line_count: 9,
        };
        assert_eq!(filter_args("ffuf", Some(&b)), vec!["-fs", "1234"]);
        assert_eq!(filter_args("dirsearch", Some(&b)), vec!["--exclude-sizes", "1234B"]);
        assert_eq!(filter_args("gobuster", Some(&b)), vec!["--exclude-length", "1234"]);

        let forbidden = WildcardBaseline {
            status_code: 403,
            ..b
        };
        assert_eq!(
            filter_args("feroxbuster", Some(&forbidden)),
            vec!["-S", "1234", "-C", "403"]
        );
        assert_eq!(
            filter_args("gobuster", Some(&forbidden)),
            vec!["--exclude-length", "1234"]
        );
        assert!(filter_args("katana", Some(&b)).is_empty());
        assert!(filter_args("ffuf", None).is_empty());
    }

    #[test]
    fn plain_not_found_needs_no_filter() {
        let b = WildcardBaseline {
            status_code: 404,
            byte_size: 10,
            line_count: 1,
        };
        assert!(filter_args("ffuf", Some(&b)).is_empty());
    }

    #[tokio::test]
    async fn unreachable_host_yields_none() {
        let client = probe_client(None).unwrap();
        let got = probe(&client, "http://127.0.0.1:9", "test-agent").await;
        assert!(got.is_none());
    }
}
