use std::net::IpAddr;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetKind {
    Ip,
    Domain,
}

/// A scan root, classified once when it is parsed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanTarget {
    original: String,
    host: String,
    domain: String,
    kind: TargetKind,
}

fn strip_scheme(input: &str) -> &str {
    input
        .strip_prefix("https://")
        .or_else(|| input.strip_prefix("http://"))
        .unwrap_or(input)
}

impl ScanTarget {
    pub fn parse(input: &str) -> Option<ScanTarget> {
        let original = input.trim();
        if original.is_empty() {
            return None;
        }
        let without_scheme = strip_scheme(original).trim_matches('/');
        let authority = without_scheme
            .split(['/', '?', '#'])
            .next()
            .unwrap_or_default();
        if authority.is_empty() {
            return None;
        }

        let bracketless = authority.trim_start_matches('[');
        let host_only = match bracketless.split_once(']') {
            Some((v6, _)) => v6.to_string(),
            None => match authority.rsplit_once(':') {
                Some((h, port)) if port.chars().all(|c| c.is_ascii_digit()) && !h.contains(':') => {
                    h.to_string()
                }
                _ => authority.to_string(),
            },
        };
        let host = host_only.to_lowercase();

        if host.parse::<IpAddr>().is_ok() {
            return Some(ScanTarget {
                original: original.to_string(),
                domain: host.clone(),
                host,
                kind: TargetKind::Ip,
            });
        }

        let labels: Vec<&str> = host.split('.').filter(|l| !l.is_empty()).collect();
        let domain = if labels.len() > 1 {
            labels[labels.len() - 2..].join(".")
        } else {
            host.clone()
        };

        Some(ScanTarget {
            original: original.to_string(),
            host,
            domain,
            kind: TargetKind::Domain,
        })
    }

    pub fn original(&self) -> &str {
        &self.original
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Registrable domain (last two labels) for domain targets, the address for IPs.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn kind(&self) -> TargetKind {
        self.kind
    }

    pub fn is_ip(&self) -> bool {
        self.kind == TargetKind::Ip
    }

    pub fn root_url(&self) -> String {
        if self.original.starts_with("http://") || self.original.starts_with("https://") {
            return self.original.trim_end_matches('/').to_string();
        }
        format!("https://{}", strip_scheme(&self.original).trim_end_matches('/'))
    }

    /// Filesystem-safe form of the host used in report paths.
    pub fn slug(&self) -> String {
        slugify(&self.host)
    }
}

pub fn slugify(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in strip_scheme(value).chars() {
        if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
            out.push(c);
        } else {
            out.push('_');
        }
    }
    let trimmed = out.trim_matches('_').to_string();
    if trimmed.is_empty() {
        "target".to_string()
    } else {
        trimmed
    }
}

/// Stable 12-hex-digit FNV-1a key of the exact string. Two inputs that
/// `slugify` to the same text still get different keys.
pub fn short_key(value: &str) -> String {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in value.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    format!("{:012x}", hash >> 16)
}

/// Host part of a URL or bare `host[:port]` string, lowercased.
pub fn host_of(item: &str) -> Option<String> {
    let item = item.trim();
    if item.is_empty() {
        return None;
    }
    if let Ok(url) = reqwest::Url::parse(item) {
        if let Some(host) = url.host_str() {
            return Some(host.trim_matches(['[', ']']).to_lowercase());
        }
    }
    let authority = strip_scheme(item).split(['/', '?', '#']).next()?;
    let host = match authority.rsplit_once(':') {
        Some((h, port)) if port.chars().all(|c| c.is_ascii_digit()) => h,
        _ => authority,
    };
    if host.is_empty() {
        None
    } else {
        Some(host.to_lowercase())
    }
}

/// Out-of-scope patterns: exact host, `*.suffix` wildcard, or a URL prefix.
#[derive(Clone, Debug, Default)]
pub struct Exclusions {
    patterns: Vec<String>,
}

impl Exclusions {
    pub fn new(patterns: &[String]) -> Self {
        let patterns = patterns
            .iter()
            .map(|p| p.trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();
        Self { patterns }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn is_excluded(&self, item: &str) -> bool {
        if self.patterns.is_empty() {
            return false;
        }
        let lowered = item.trim().to_lowercase();
        let host = host_of(&lowered);
        self.patterns.iter().any(|pattern| {
            if let Some(suffix) = pattern.strip_prefix("*.") {
                return match host.as_deref() {
                    Some(h) => h == suffix || h.ends_with(&format!(".{suffix}")),
                    None => false,
                };
            }
            if pattern.contains('/') {
                return strip_scheme(&lowered).starts_with(strip_scheme(pattern));
            }
            host.as_deref() == Some(pattern.as_str())
        })
    }

    pub fn retain(&self, items: Vec<String>) -> Vec<String> {
        items.into_iter().filter(|i| !self.is_excluded(i)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_ipv4_and_ipv6_literals() {
        let t = ScanTarget::parse("http://10.0.0.5/").unwrap();
        assert!(t.is_ip());
        assert_eq!(t.host(), "10.0.0.5");
        let t = ScanTarget::parse("[::1]:8080").unwrap();
        assert!(t.is_ip());
        assert_eq!(t.host(), "::1");
    }

    #[test]
    fn extracts_hostname_and_registrable_domain() {
        let t = ScanTarget::parse("https://App.Shop.Example.com/login").unwrap();
        assert_eq!(t.kind(), TargetKind::Domain);
        assert_eq!(t.host(), "app.shop.example.com");
        assert_eq!(t.domain(), "example.com");
        assert_eq!(t.root_url(), "https://App.Shop.Example.com/login");

        let bare = ScanTarget::parse("example.org:8443").unwrap();
        assert_eq!(bare.host(), "example.org");
        assert_eq!(bare.root_url(), "https://example.org:8443");
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(ScanTarget::parse("   ").is_none());
        assert!(ScanTarget::parse("https://").is_none());
    }

    #[test]
    fn wildcard_exclusion_covers_suffix_and_apex() {
        let ex = Exclusions::new(&["*.internal.example.com".to_string()]);
        assert!(ex.is_excluded("https://a.internal.example.com/x"));
        assert!(ex.is_excluded("internal.example.com"));
        assert!(!ex.is_excluded("https://www.example.com"));
    }

    #[test]
    fn exact_and_prefix_exclusions() {
        let ex = Exclusions::new(&[
            "cdn.example.com".to_string(),
            "https://example.com/logout".to_string(),
        ]);
        assert!(ex.is_excluded("CDN.example.com:443"));
        assert!(ex.is_excluded("http://example.com/logout?next=/"));
        assert!(!ex.is_excluded("https://example.com/login"));
        let kept = ex.retain(vec![
            "cdn.example.com".to_string(),
            "api.example.com".to_string(),
        ]);
        assert_eq!(kept, vec!["api.example.com".to_string()]);
    }

    #[test]
    fn short_key_separates_lookalike_targets() {
        assert_eq!(short_key("https://x.com"), short_key("https://x.com"));
        assert_eq!(short_key("https://x.com").len(), 12);
        assert_eq!(slugify("http://x.com"), slugify("https://x.com"));
        assert_ne!(short_key("http://x.com"), short_key("https://x.com"));
        assert_ne!(short_key("https://x.com/a/b.js"), short_key("https://x.com/a_b.js"));
    }
}
