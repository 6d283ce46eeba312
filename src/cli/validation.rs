use crate::cli::args::CliArgs;
use crate::tools::{self, NmapStrategy, ToolPhase};

pub fn validate_proxy(raw: &str) -> Result<(), String> {
    let scheme = raw.split_once("://").map(|(s, _)| s.to_lowercase());
    match scheme.as_deref() {
        Some("http" | "https" | "socks5" | "socks5h") => Ok(()),
        _ => Err(format!(
            "invalid --proxy '{raw}', expected http://, https:// or socks5:// URL"
        )),
    }
}

pub fn validate(args: &CliArgs) -> Result<(), String> {
    if args.target.iter().any(|t| t.trim().is_empty()) {
        return Err("invalid --target, value is empty".to_string());
    }
    if args.threads == Some(0) {
        return Err("invalid --threads, expected positive integer".to_string());
    }
    if args.timeout == Some(0) {
        return Err("invalid --timeout, expected positive number of seconds".to_string());
    }
    if let Some(raw) = args.header.as_deref() {
        if crate::stealth::parse_header(raw).is_none() {
            return Err(format!("invalid --header '{raw}', expected 'Key: Value'"));
        }
    }
    if let Some(raw) = args.proxy.as_deref() {
        validate_proxy(raw)?;
    }
    if let Some(raw) = args.nmap_strategy.as_deref() {
        raw.parse::<NmapStrategy>()
            .map_err(|e| format!("invalid --nmap-strategy: {e}"))?;
    }
    for (flag, raw, phase) in [
        ("--p1", &args.phase1_tools, ToolPhase::Subdomain),
        ("--p2", &args.phase2_tools, ToolPhase::PortScan),
        ("--p3", &args.phase3_tools, ToolPhase::DirSearch),
        ("--p4", &args.phase4_tools, ToolPhase::Crawl),
    ] {
        if let Some(raw) = raw.as_deref() {
            tools::parse_selection(raw, phase).map_err(|e| format!("invalid {flag}: {e}"))?;
        }
    }
    Ok(())
}
