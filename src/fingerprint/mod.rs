use std::collections::HashMap;

use reqwest::header::{self, HeaderMap};
use serde::Serialize;

/// Confidence at which a WAF match switches the run to safe mode.
pub const WAF_CONFIDENCE_THRESHOLD: f32 = 0.5;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WafMatch {
    pub name: String,
    pub confidence: f32,
    pub evidence: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TargetFingerprint {
    pub status: Option<u16>,
    pub technologies: Vec<String>,
    pub wafs: Vec<WafMatch>,
}

impl TargetFingerprint {
    /// Strongest WAF match at or above `threshold`.
    pub fn waf(&self, threshold: f32) -> Option<&WafMatch> {
        self.wafs.iter().find(|w| w.confidence >= threshold)
    }
}

#[derive(Clone, Debug)]
struct ResponseView {
    status: u16,
    headers: HashMap<String, String>,
    body: String,
}

impl ResponseView {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(|s| s.as_str())
    }
}

#[derive(Clone, Copy, Debug)]
enum Probe {
    Header(&'static str, &'static str),
    Cookie(&'static str),
    Body(&'static str),
    Status(u16),
}

struct WafSignature {
    name: &'static str,
    probes: &'static [(Probe, u8)],
}

const WAF_SIGNATURES: &[WafSignature] = &[
    WafSignature {
        name: "Cloudflare",
        probes: &[
            (Probe::Header("server", "cloudflare"), 5),
            (Probe::Header("cf-ray", ""), 6),
            (Probe::Cookie("cf_clearance="), 6),
            (Probe::Body("attention required! | cloudflare"), 6),
        ],
    },
    WafSignature {
        name: "AWS WAF",
        probes: &[
            (Probe::Body("the request could not be satisfied"), 6),
            (Probe::Body("generated by cloudfront"), 5),
            (Probe::Header("via", "cloudfront"), 4),
            (Probe::Cookie("awsalb="), 3),
        ],
    },
    WafSignature {
        name: "Akamai",
        probes: &[
            (Probe::Header("server", "akamaighost"), 5),
            (Probe::Header("x-akamai-transformed", ""), 6),
            (Probe::Body("reference #"), 3),
        ],
    },
    WafSignature {
        name: "F5 BIG-IP ASM",
        probes: &[
            (Probe::Cookie("bigipserver"), 5),
            (Probe::Body("the requested url was rejected"), 6),
        ],
    },
    WafSignature {
        name: "Imperva",
        probes: &[
            (Probe::Header("x-cdn", "imperva"), 6),
            (Probe::Body("incapsula"), 5),
            (Probe::Cookie("incap_ses_"), 5),
        ],
    },
    WafSignature {
        name: "Sucuri",
        probes: &[
            (Probe::Header("server", "sucuri"), 6),
            (Probe::Header("x-sucuri-id", ""), 5),
            (Probe::Body("sucuri website firewall"), 6),
        ],
    },
    WafSignature {
        name: "ModSecurity",
        probes: &[
            (Probe::Body("mod_security"), 6),
            (Probe::Body("not acceptable!"), 3),
            (Probe::Status(406), 2),
        ],
    },
    WafSignature {
        name: "Azure Front Door",
        probes: &[
            (Probe::Header("x-azure-ref", ""), 6),
            (Probe::Body("azure front door"), 4),
        ],
    },
];

fn evidence_for(probe: Probe, view: &ResponseView) -> Option<String> {
    match probe {
        Probe::Header(name, needle) => {
            let value = view.header(name)?;
            if needle.is_empty() {
                Some(format!("header:{name} present"))
            } else if value.to_lowercase().contains(needle) {
                Some(format!("header:{name} contains {needle}"))
            } else {
                None
            }
        }
        Probe::Cookie(needle) => view
            .header("set-cookie")
            .filter(|c| c.to_lowercase().contains(needle))
            .map(|_| format!("cookie contains {needle}")),
        Probe::Body(needle) => view
            .body
            .to_lowercase()
            .contains(needle)
            .then(|| format!("body contains {needle}")),
        Probe::Status(status) => (view.status == status).then(|| format!("status {status}")),
    }
}

fn detect_waf(view: &ResponseView) -> Vec<WafMatch> {
    let mut matches: Vec<WafMatch> = WAF_SIGNATURES
        .iter()
        .filter_map(|sig| {
            let total: u32 = sig.probes.iter().map(|(_, w)| *w as u32).sum();
            let mut hit: u32 = 0;
            let mut evidence = Vec::new();
            for (probe, weight) in sig.probes {
                if let Some(ev) = evidence_for(*probe, view) {
                    hit += *weight as u32;
                    evidence.push(ev);
                }
            }
            (hit > 0 && total > 0).then(|| WafMatch {
                name: sig.name.to_string(),
                confidence: hit as f32 / total as f32,
                evidence,
            })
        })
        .collect();
    matches.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    matches
}

/// Technologies that have a dedicated content wordlist, plus the usual
/// server stack hints.
fn detect_technologies(view: &ResponseView) -> Vec<String> {
    let mut found: Vec<&str> = Vec::new();

    if let Some(server) = view.header("server").map(str::to_lowercase) {
        for (needle, tech) in [
            ("nginx", "nginx"),
            ("apache-coyote", "tomcat"),
            ("tomcat", "tomcat"),
            ("apache", "apache"),
            ("microsoft-iis", "iis"),
        ] {
            if server.contains(needle) {
                found.push(tech);
                break;
            }
        }
    }
    if let Some(powered) = view.header("x-powered-by").map(str::to_lowercase) {
        if powered.contains("php") {
            found.push("php");
        }
        if powered.contains("asp.net") {
            found.push("asp.net");
        }
        if powered.contains("express") {
            found.push("express");
        }
    }
    if let Some(cookie) = view.header("set-cookie").map(str::to_lowercase) {
        if cookie.contains("jsessionid=") {
            found.push("java");
        }
        if cookie.contains("phpsessid=") {
            found.push("php");
        }
    }

    let body = view.body.to_lowercase();
    if body.contains("wp-content/") || body.contains("wp-includes/") {
        found.push("wordpress");
    }
    if body.contains("drupal-settings-json") || body.contains("sites/default/files") {
        found.push("drupal");
    }
    if body.contains("/media/jui/") || body.contains("joomla!") {
        found.push("joomla");
    }
    if body.contains("apache tomcat") {
        found.push("tomcat");
    }

    let mut technologies: Vec<String> = found.into_iter().map(str::to_string).collect();
    technologies.sort();
    technologies.dedup();
    technologies
}

fn flatten_headers(headers: &HeaderMap) -> HashMap<String, String> {
    let mut out: HashMap<String, String> = HashMap::new();
    for (name, value) in headers.iter() {
        if let Ok(value) = value.to_str() {
            out.entry(name.as_str().to_lowercase())
                .and_modify(|existing| {
                    existing.push_str("; ");
                    existing.push_str(value);
                })
                .or_insert_with(|| value.to_string());
        }
    }
    out
}

/// One GET against the root URL. An unreachable target yields an empty
/// fingerprint.
pub async fn fingerprint_target(
    client: &reqwest::Client,
    url: &str,
    user_agent: &str,
) -> TargetFingerprint {
    let resp = match client
        .get(url)
        .header(header::USER_AGENT, user_agent)
        .send()
        .await
    {
        Ok(resp) => resp,
        Err(e) => {
            tracing::debug!(url, "fingerprint request failed: {e}");
            return TargetFingerprint::default();
        }
    };
    let status = resp.status().as_u16();
    let headers = flatten_headers(resp.headers());
    let body = match resp.text().await {
        Ok(body) => body.chars().take(32768).collect::<String>(),
        Err(_) => String::new(),
    };
    let view = ResponseView {
        status,
        headers,
        body,
    };
    TargetFingerprint {
        status: Some(status),
        technologies: detect_technologies(&view),
        wafs: detect_waf(&view),
    }
}

#[cfg(test)]
pub(crate) fn fingerprint_for_tests(
    status: u16,
    headers: HashMap<String, String>,
    body: &str,
) -> TargetFingerprint {
    let view = ResponseView {
        status,
        headers,
        body: body.to_string(),
    };
    TargetFingerprint {
        status: Some(status),
        technologies: detect_technologies(&view),
        wafs: detect_waf(&view),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modsecurity_block_page() {
        let fp = fingerprint_for_tests(
            406,
            HashMap::new(),
            "<h1>Not Acceptable!</h1> This error was generated by Mod_Security.",
        );
        let waf = fp.waf(WAF_CONFIDENCE_THRESHOLD).unwrap();
        assert_eq!(waf.name, "ModSecurity");
        assert_eq!(waf.evidence.len(), 3);
    }

    #[test]
    fn weak_single_hint_stays_below_threshold() {
        let fp = fingerprint_for_tests(200, HashMap::new(), "Reference #18.abc");
        assert!(fp.wafs.iter().any(|w| w.name == "Akamai"));
        assert!(fp.waf(WAF_CONFIDENCE_THRESHOLD).is_none());
    }

    #[test]
    fn cms_and_server_technologies() {
        let fp = fingerprint_for_tests(
            200,
            HashMap::from([
                ("server".to_string(), "Apache-Coyote/1.1".to_string()),
                ("set-cookie".to_string(), "JSESSIONID=abc; Path=/".to_string()),
            ]),
            "<link href='/wp-content/themes/x.css'>",
        );
        assert_eq!(fp.technologies, vec!["java", "tomcat", "wordpress"]);
        assert!(fp.wafs.is_empty());
    }
}
