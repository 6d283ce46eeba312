use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::baseline::{self, WildcardBaseline};
use crate::normalizer::Grammar;
use crate::process::ToolInvocation;
use crate::runner::Options;
use crate::stealth::SafeModeProfile;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolPhase {
    Subdomain,
    Probe,
    PortScan,
    DirSearch,
    Crawl,
}

impl ToolPhase {
    pub fn label(&self) -> &'static str {
        match self {
            ToolPhase::Subdomain => "subdomains",
            ToolPhase::Probe => "probe",
            ToolPhase::PortScan => "ports",
            ToolPhase::DirSearch => "dirsearch",
            ToolPhase::Crawl => "crawl",
        }
    }
}

/// What a tool is pointed at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scope {
    /// Registrable domain; skipped for IP targets.
    Domain,
    /// A file listing hosts or URLs.
    HostList,
    Ip,
    Url,
    /// A JavaScript URL from the first crawl stage.
    JsFile,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NmapStrategy {
    #[default]
    Top1000,
    Full,
    Fast,
}

impl FromStr for NmapStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "top1000" | "top" => Ok(NmapStrategy::Top1000),
            "full" | "all" => Ok(NmapStrategy::Full),
            "fast" => Ok(NmapStrategy::Fast),
            other => Err(format!("unknown nmap strategy '{other}' (top1000, full, fast)")),
        }
    }
}

/// Everything an argument builder may look at for one invocation.
pub struct ToolContext<'a> {
    pub target: &'a str,
    pub options: &'a Options,
    pub profile: &'a SafeModeProfile,
    pub user_agent: String,
    pub headers: Vec<(String, String)>,
    pub wordlist: Option<&'a str>,
    pub baseline: Option<&'a WildcardBaseline>,
    pub ports: &'a [u16],
}

impl<'a> ToolContext<'a> {
    pub fn new(target: &'a str, options: &'a Options, profile: &'a SafeModeProfile) -> Self {
        Self {
            target,
            options,
            profile,
            user_agent: String::new(),
            headers: Vec::new(),
            wordlist: None,
            baseline: None,
            ports: &[],
        }
    }

    fn proxy(&self) -> Option<&str> {
        self.options.proxy.as_deref()
    }

    fn wordlist(&self) -> &str {
        self.wordlist.unwrap_or(&self.options.dir_wordlist)
    }

    fn threads(&self) -> String {
        self.profile.tool_threads.to_string()
    }
}

pub struct ToolSpec {
    pub id: &'static str,
    pub binary: &'static str,
    pub phase: ToolPhase,
    pub scope: Scope,
    pub grammar: Grammar,
    pub build: fn(&ToolContext) -> Vec<String>,
}

impl std::fmt::Debug for ToolSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSpec")
            .field("id", &self.id)
            .field("phase", &self.phase)
            .field("scope", &self.scope)
            .finish()
    }
}

impl ToolSpec {
    pub fn args(&self, ctx: &ToolContext) -> Vec<String> {
        (self.build)(ctx)
    }

    pub fn invocation(&self, ctx: &ToolContext, timeout: Duration, output: PathBuf) -> ToolInvocation {
        ToolInvocation::new(self.id, self.binary, self.args(ctx), ctx.target, timeout).with_output(output)
    }

    /// Part of the phase's selectable tool set.
    pub fn selectable(&self) -> bool {
        self.phase != ToolPhase::Probe
    }
}

fn s(v: &str) -> String {
    v.to_string()
}

fn header_args(flag: &str, headers: &[(String, String)]) -> Vec<String> {
    headers
        .iter()
        .flat_map(|(k, v)| [flag.to_string(), format!("{k}: {v}")])
        .collect()
}

fn proxy_args(flag: &str, ctx: &ToolContext) -> Vec<String> {
    ctx.proxy()
        .map(|p| vec![flag.to_string(), p.to_string()])
        .unwrap_or_default()
}

fn subfinder(ctx: &ToolContext) -> Vec<String> {
    let mut args = vec![s("-d"), s(ctx.target), s("-silent")];
    args.extend(proxy_args("-proxy", ctx));
    args
}

fn assetfinder(ctx: &ToolContext) -> Vec<String> {
    vec![s("--subs-only"), s(ctx.target)]
}

fn findomain(ctx: &ToolContext) -> Vec<String> {
    vec![s("--target"), s(ctx.target), s("-q")]
}

fn puredns(ctx: &ToolContext) -> Vec<String> {
    let mut args = vec![
        s("bruteforce"),
        s(&ctx.options.subdomain_wordlist),
        s(ctx.target),
        s("--rate-limit"),
        ctx.profile.puredns_rate.to_string(),
        s("-q"),
    ];
    if let Some(resolvers) = ctx.options.resolvers.as_deref() {
        args.extend([s("--resolvers"), s(resolvers)]);
    }
    args
}

fn httpx_probe(ctx: &ToolContext) -> Vec<String> {
    let mut args = vec![
        s("-l"),
        s(ctx.target),
        s("-silent"),
        s("-fc"),
        s("404"),
        s("-json"),
        s("-irh"),
        s("-rate-limit"),
        ctx.profile.httpx_rate.to_string(),
        s("-H"),
        format!("User-Agent: {}", ctx.user_agent),
    ];
    if ctx.profile.enabled {
        args.extend([s("-p"), s("80,443,8000,8080,8443")]);
    }
    args.extend(header_args("-H", &ctx.headers));
    args.extend(proxy_args("-http-proxy", ctx));
    args
}

fn httpx_verify(ctx: &ToolContext) -> Vec<String> {
    let mut args = vec![
        s("-l"),
        s(ctx.target),
        s("-silent"),
        s("-json"),
        s("-status-code"),
        s("-title"),
        s("-web-server"),
        s("-content-length"),
        s("-rate-limit"),
        ctx.profile.httpx_rate.to_string(),
        s("-H"),
        format!("User-Agent: {}", ctx.user_agent),
    ];
    args.extend(header_args("-H", &ctx.headers));
    args.extend(proxy_args("-http-proxy", ctx));
    args
}

fn naabu(ctx: &ToolContext) -> Vec<String> {
    let mut args = vec![
        s("-host"),
        s(ctx.target),
        s("-silent"),
        s("-p"),
        s("-"),
        s("-warm-up-time"),
        s("0"),
        s("-retries"),
        s("1"),
        s("-rate"),
        ctx.profile.naabu_rate.to_string(),
    ];
    if let Some(port) = ctx.options.naabu_source_port {
        args.extend([s("-source-ip"), format!("0.0.0.0:{port}")]);
    }
    args
}

fn masscan(ctx: &ToolContext) -> Vec<String> {
    vec![
        s(ctx.target),
        s("-p1-65535"),
        s("--rate"),
        ctx.profile.masscan_rate.to_string(),
    ]
}

fn nmap(ctx: &ToolContext) -> Vec<String> {
    let mut args = vec![s("-sV"), s("-Pn"), s(ctx.profile.nmap_timing)];
    if ctx.options.nmap_aggressive {
        args.push(s("-A"));
    } else if let Some(scripts) = ctx.options.nmap_scripts.as_deref() {
        if scripts == "default" {
            args.push(s("-sC"));
        } else {
            args.push(format!("--script={scripts}"));
        }
    }
    if !ctx.ports.is_empty() {
        let ports: Vec<String> = ctx.ports.iter().map(|p| p.to_string()).collect();
        args.extend([s("-p"), ports.join(",")]);
    } else {
        match ctx.options.nmap_strategy {
            NmapStrategy::Top1000 => args.extend([s("--top-ports"), s("1000")]),
            NmapStrategy::Full => args.push(s("-p-")),
            NmapStrategy::Fast => args.push(s("-F")),
        }
    }
    args.push(s(ctx.target));
    args
}

fn ffuf(ctx: &ToolContext) -> Vec<String> {
    let mut args = vec![
        s("-u"),
        format!("{}/FUZZ", ctx.target.trim_end_matches('/')),
        s("-w"),
        format!("{}:FUZZ", ctx.wordlist()),
        s("-t"),
        ctx.threads(),
        s("-H"),
        format!("User-Agent: {}", ctx.user_agent),
    ];
    args.extend(header_args("-H", &ctx.headers));
    if ctx.options.recursion_depth > 0 {
        args.extend([
            s("-recursion"),
            s("-recursion-depth"),
            ctx.options.recursion_depth.to_string(),
        ]);
    }
    if ctx.profile.enabled {
        args.extend([s("-p"), s("0.5-2.5")]);
    }
    if let Some(rate) = ctx.profile.ffuf_rate {
        args.extend([s("-rate"), rate.to_string()]);
    }
    args.extend(proxy_args("-x", ctx));
    args.extend(baseline::filter_args("ffuf", ctx.baseline));
    args
}

fn feroxbuster(ctx: &ToolContext) -> Vec<String> {
    let mut args = vec![
        s("-u"),
        s(ctx.target),
        s("--no-state"),
        s("-k"),
        s("-w"),
        s(ctx.wordlist()),
        s("-t"),
        ctx.threads(),
        s("-a"),
        ctx.user_agent.clone(),
        s("-d"),
        ctx.options.recursion_depth.to_string(),
    ];
    args.extend(header_args("-H", &ctx.headers));
    if let Some(rate) = ctx.profile.ferox_rate {
        args.extend([s("--rate-limit"), rate.to_string()]);
    }
    args.extend(proxy_args("-p", ctx));
    args.extend(baseline::filter_args("feroxbuster", ctx.baseline));
    args
}

fn dirsearch(ctx: &ToolContext) -> Vec<String> {
    let mut args = vec![
        s("-u"),
        s(ctx.target),
        s("--full-url"),
        s("-w"),
        s(ctx.wordlist()),
        s("-t"),
        ctx.threads(),
        s("--user-agent"),
        ctx.user_agent.clone(),
    ];
    args.extend(header_args("-H", &ctx.headers));
    if ctx.options.recursion_depth > 0 {
        args.extend([
            s("-r"),
            s("-R"),
            ctx.options.recursion_depth.to_string(),
        ]);
    }
    if ctx.profile.enabled {
        args.extend([s("--delay"), s("1.5")]);
    }
    args.extend(proxy_args("--proxy", ctx));
    args.extend(baseline::filter_args("dirsearch", ctx.baseline));
    args
}

fn gobuster(ctx: &ToolContext) -> Vec<String> {
    let mut args = vec![
        s("dir"),
        s("-u"),
        s(ctx.target),
        s("--no-progress"),
        s("-k"),
        s("-w"),
        s(ctx.wordlist()),
        s("-t"),
        ctx.threads(),
        s("-a"),
        ctx.user_agent.clone(),
    ];
    args.extend(header_args("-H", &ctx.headers));
    if ctx.profile.enabled {
        args.extend([s("--delay"), s("1500ms")]);
    }
    args.extend(proxy_args("--proxy", ctx));
    args.extend(baseline::filter_args("gobuster", ctx.baseline));
    args
}

fn katana(ctx: &ToolContext) -> Vec<String> {
    let mut args = vec![
        s("-u"),
        s(ctx.target),
        s("-silent"),
        s("-d"),
        ctx.options.crawl_depth.to_string(),
        s("-jc"),
        s("-H"),
        format!("User-Agent: {}", ctx.user_agent),
    ];
    args.extend(header_args("-H", &ctx.headers));
    if let Some(rate) = ctx.profile.crawler_rate {
        args.extend([s("-rl"), rate.to_string()]);
    }
    if ctx.options.headless {
        args.push(s("-headless"));
    }
    if ctx.options.auto_form_fill {
        args.push(s("-aff"));
    }
    args.extend(proxy_args("-proxy", ctx));
    args
}

fn hakrawler(ctx: &ToolContext) -> Vec<String> {
    let mut args = vec![
        s("-u"),
        s(ctx.target),
        s("-d"),
        ctx.options.crawl_depth.to_string(),
        s("-insecure"),
        s("-h"),
        format!("User-Agent: {}", ctx.user_agent),
    ];
    args.extend(proxy_args("-proxy", ctx));
    args
}

fn paramspider(ctx: &ToolContext) -> Vec<String> {
    let domain = crate::target::host_of(ctx.target).unwrap_or_else(|| ctx.target.to_string());
    let mut args = vec![s("-d"), domain, s("-s")];
    args.extend(proxy_args("--proxy", ctx));
    args
}

fn gauplus(ctx: &ToolContext) -> Vec<String> {
    let mut args = vec![s("-t"), s("50"), s("-random-agent")];
    args.extend(proxy_args("-p", ctx));
    args.push(s(ctx.target));
    args
}

fn linkfinder(ctx: &ToolContext) -> Vec<String> {
    vec![s("-i"), s(ctx.target), s("-d"), s("-o"), s("cli")]
}

pub static CATALOG: &[ToolSpec] = &[
    ToolSpec { id: "subfinder", binary: "subfinder", phase: ToolPhase::Subdomain, scope: Scope::Domain, grammar: Grammar::Hostnames, build: subfinder },
    ToolSpec { id: "assetfinder", binary: "assetfinder", phase: ToolPhase::Subdomain, scope: Scope::Domain, grammar: Grammar::Hostnames, build: assetfinder },
    ToolSpec { id: "findomain", binary: "findomain", phase: ToolPhase::Subdomain, scope: Scope::Domain, grammar: Grammar::Hostnames, build: findomain },
    ToolSpec { id: "puredns", binary: "puredns", phase: ToolPhase::Subdomain, scope: Scope::Domain, grammar: Grammar::Hostnames, build: puredns },
    ToolSpec { id: "httpx", binary: "httpx", phase: ToolPhase::Probe, scope: Scope::HostList, grammar: Grammar::ProbeJson, build: httpx_probe },
    ToolSpec { id: "httpx-verify", binary: "httpx", phase: ToolPhase::Probe, scope: Scope::HostList, grammar: Grammar::ProbeJson, build: httpx_verify },
    ToolSpec { id: "naabu", binary: "naabu", phase: ToolPhase::PortScan, scope: Scope::Ip, grammar: Grammar::HostPort, build: naabu },
    ToolSpec { id: "masscan", binary: "masscan", phase: ToolPhase::PortScan, scope: Scope::Ip, grammar: Grammar::Masscan, build: masscan },
    ToolSpec { id: "nmap", binary: "nmap", phase: ToolPhase::PortScan, scope: Scope::Ip, grammar: Grammar::Nmap, build: nmap },
    ToolSpec { id: "ffuf", binary: "ffuf", phase: ToolPhase::DirSearch, scope: Scope::Url, grammar: Grammar::Ffuf, build: ffuf },
    ToolSpec { id: "feroxbuster", binary: "feroxbuster", phase: ToolPhase::DirSearch, scope: Scope::Url, grammar: Grammar::Feroxbuster, build: feroxbuster },
    ToolSpec { id: "dirsearch", binary: "dirsearch", phase: ToolPhase::DirSearch, scope: Scope::Url, grammar: Grammar::Dirsearch, build: dirsearch },
    ToolSpec { id: "gobuster", binary: "gobuster", phase: ToolPhase::DirSearch, scope: Scope::Url, grammar: Grammar::Gobuster, build: gobuster },
    ToolSpec { id: "katana", binary: "katana", phase: ToolPhase::Crawl, scope: Scope::Url, grammar: Grammar::UrlPerLine, build: katana },
    ToolSpec { id: "hakrawler", binary: "hakrawler", phase: ToolPhase::Crawl, scope: Scope::Url, grammar: Grammar::UrlPerLine, build: hakrawler },
    ToolSpec { id: "paramspider", binary: "paramspider", phase: ToolPhase::Crawl, scope: Scope::Url, grammar: Grammar::UrlPerLine, build: paramspider },
    ToolSpec { id: "gauplus", binary: "gauplus", phase: ToolPhase::Crawl, scope: Scope::Domain, grammar: Grammar::UrlPerLine, build: gauplus },
    ToolSpec { id: "linkfinder", binary: "linkfinder", phase: ToolPhase::Crawl, scope: Scope::JsFile, grammar: Grammar::LinkFinder, build: linkfinder },
];

pub fn lookup(id: &str) -> Option<&'static ToolSpec> {
    let id = id.trim().to_lowercase();
    CATALOG.iter().find(|spec| spec.id == id)
}

pub fn selectable_ids(phase: ToolPhase) -> Vec<&'static str> {
    CATALOG
        .iter()
        .filter(|spec| spec.phase == phase && spec.selectable())
        .map(|spec| spec.id)
        .collect()
}

/// Parses a comma-separated tool list for `phase`. `all` selects every
/// tool of the phase, `none` or an empty string selects nothing.
pub fn parse_selection(raw: &str, phase: ToolPhase) -> Result<Vec<String>, String> {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("none") {
        return Ok(Vec::new());
    }
    if raw.eq_ignore_ascii_case("all") {
        return Ok(selectable_ids(phase).into_iter().map(str::to_string).collect());
    }
    let mut out: Vec<String> = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match lookup(part) {
            Some(spec) if spec.phase == phase && spec.selectable() => {
                if !out.iter().any(|t| t == spec.id) {
                    out.push(spec.id.to_string());
                }
            }
            Some(spec) => {
                return Err(format!(
                    "tool '{}' belongs to the {} phase, not {}",
                    spec.id,
                    spec.phase.label(),
                    phase.label()
                ))
            }
            None => {
                return Err(format!(
                    "unknown {} tool '{part}' (expected one of: {})",
                    phase.label(),
                    selectable_ids(phase).join(", ")
                ))
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(target: &'a str, options: &'a Options, profile: &'a SafeModeProfile) -> ToolContext<'a> {
        let mut ctx = ToolContext::new(target, options, profile);
        ctx.user_agent = "UA/1.0".to_string();
        ctx
    }

    #[test]
    fn every_tool_id_is_unique_and_resolves() {
        for spec in CATALOG {
            assert_eq!(lookup(spec.id).map(|s| s.id), Some(spec.id));
        }
        assert_eq!(Grammar::for_tool("gobuster"), Grammar::Gobuster);
        assert_eq!(Grammar::for_tool("whatever"), Grammar::Generic);
    }

    #[test]
    fn selection_parsing() {
        assert_eq!(
            parse_selection("ffuf, Gobuster,ffuf", ToolPhase::DirSearch).unwrap(),
            vec!["ffuf", "gobuster"]
        );
        assert_eq!(parse_selection("all", ToolPhase::PortScan).unwrap().len(), 3);
        assert!(parse_selection("none", ToolPhase::Crawl).unwrap().is_empty());
        assert!(parse_selection("katana", ToolPhase::DirSearch).is_err());
        assert!(parse_selection("httpx", ToolPhase::Subdomain).is_err());
        assert!(parse_selection("nope", ToolPhase::Crawl).is_err());
    }

    #[test]
    fn ffuf_arguments_include_baseline_filter_and_safe_pacing() {
        let options = Options::default();
        let profile = SafeModeProfile::resolve(&options, true);
        let b = WildcardBaseline {
            status_code: 403,
            byte_size: 99,
            line_count: 2,
        };
        let mut c = ctx("https://x.com/", &options, &profile);
        c.wordlist = Some("/tmp/wl.txt");
        c.baseline = Some(&b);
        let args = lookup("ffuf").unwrap().args(&c);
        let joined = args.join(" ");
        assert!(joined.starts_with("-u https://x.com/FUZZ -w /tmp/wl.txt:FUZZ -t 1"));
        assert!(joined.contains("-p 0.5-2.5"));
        assert!(joined.contains("-rate 50"));
        assert!(joined.ends_with("-fs 99 -fc 403"));
    }

    #[test]
    fn nmap_uses_discovered_ports_or_strategy() {
        let mut options = Options::default();
        let profile = SafeModeProfile::resolve(&options, false);
        let ports = [22u16, 443];
        let mut c = ctx("10.0.0.1", &options, &profile);
        c.ports = &ports;
        assert_eq!(
            lookup("nmap").unwrap().args(&c),
            vec!["-sV", "-Pn", "-T4", "-p", "22,443", "10.0.0.1"]
        );

        options.nmap_strategy = NmapStrategy::Fast;
        options.nmap_aggressive = true;
        let c = ctx("10.0.0.1", &options, &profile);
        assert_eq!(
            lookup("nmap").unwrap().args(&c),
            vec!["-sV", "-Pn", "-T4", "-A", "-F", "10.0.0.1"]
        );
    }

    #[test]
    fn probe_arguments_follow_safe_mode() {
        let options = Options::default();
        let safe = SafeModeProfile::resolve(&options, true);
        let mut c = ctx("/tmp/hosts.txt", &options, &safe);
        c.headers = vec![("DNT".to_string(), "1".to_string())];
        let args = lookup("httpx").unwrap().args(&c).join(" ");
        assert!(args.contains("-rate-limit 10"));
        assert!(args.contains("-p 80,443,8000,8080,8443"));
        assert!(args.contains("-H DNT: 1"));
    }

    #[test]
    fn puredns_adds_resolvers_when_configured() {
        let mut options = Options::default();
        options.resolvers = Some("/etc/resolvers.txt".to_string());
        let profile = SafeModeProfile::resolve(&options, false);
        let args = lookup("puredns").unwrap().args(&ctx("example.com", &options, &profile));
        assert_eq!(args[0], "bruteforce");
        assert_eq!(args[2], "example.com");
        assert!(args.ends_with(&["--resolvers".to_string(), "/etc/resolvers.txt".to_string()]));
    }

    #[test]
    fn nmap_strategy_parsing() {
        assert_eq!("FULL".parse::<NmapStrategy>().unwrap(), NmapStrategy::Full);
        assert!("weird".parse::<NmapStrategy>().is_err());
    }
}
