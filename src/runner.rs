use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncBufReadExt;
use tokio::io::BufReader;
use tokio::time::Instant;

use crate::output::{self, OutputError};
use crate::pipeline::{Pipeline, PipelineReport};
use crate::process::ProcessRegistry;
use crate::stealth::{self, UserAgentPool};
use crate::target::ScanTarget;
use crate::tools::{self, NmapStrategy, ToolPhase};

pub const DEFAULT_SUBDOMAIN_WORDLIST: &str =
    "/usr/share/seclists/Discovery/DNS/subdomains-top1million-20000.txt";
pub const DEFAULT_DIR_WORDLIST: &str = "/usr/share/dirb/wordlists/common.txt";
pub const SMALL_DIR_WORDLIST: &str =
    "/usr/share/seclists/Discovery/Web-Content/DirBuster-2007_directory-list-2.3-small.txt";

pub fn default_tech_wordlists() -> BTreeMap<String, String> {
    const CMS: &str = "/usr/share/seclists/Discovery/Web-Content/CMS";
    BTreeMap::from([
        ("wordpress".to_string(), format!("{CMS}/wordpress.fuzz.txt")),
        ("joomla".to_string(), format!("{CMS}/trickest-cms-wordlist/joomla.txt")),
        ("drupal".to_string(), format!("{CMS}/Drupal.txt")),
        ("tomcat".to_string(), format!("{CMS}/trickest-cms-wordlist/tomcat.txt")),
    ])
}

pub fn default_ignored_extensions() -> Vec<String> {
    [
        "png", "jpg", "jpeg", "gif", "svg", "bmp", "ico", "css", "js", "map", "woff", "woff2",
        "ttf", "eot",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Enabled tools per phase. An empty port-scan list leaves that branch out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolSelection {
    pub subdomain: Vec<String>,
    pub port_scan: Vec<String>,
    pub dirsearch: Vec<String>,
    pub crawl: Vec<String>,
}

impl Default for ToolSelection {
    fn default() -> Self {
        let ids = |phase| {
            tools::selectable_ids(phase)
                .into_iter()
                .map(str::to_string)
                .collect()
        };
        Self {
            subdomain: ids(ToolPhase::Subdomain),
            port_scan: Vec::new(),
            dirsearch: ids(ToolPhase::DirSearch),
            crawl: ids(ToolPhase::Crawl),
        }
    }
}

impl ToolSelection {
    pub fn for_phase(&self, phase: ToolPhase) -> &[String] {
        match phase {
            ToolPhase::Subdomain => &self.subdomain,
            ToolPhase::PortScan => &self.port_scan,
            ToolPhase::DirSearch => &self.dirsearch,
            ToolPhase::Crawl => &self.crawl,
            ToolPhase::Probe => &[],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.subdomain.is_empty()
            && self.port_scan.is_empty()
            && self.dirsearch.is_empty()
            && self.crawl.is_empty()
    }

    pub fn contains(&self, phase: ToolPhase, id: &str) -> bool {
        self.for_phase(phase).iter().any(|t| t == id)
    }
}

/// Configuration snapshot for a run. Built once, then shared read-only.
#[derive(Clone, Debug)]
pub struct Options {
    pub targets: Vec<String>,
    pub input_file: Option<String>,
    pub output_dir: PathBuf,
    pub threads: usize,
    pub timeout_seconds: u64,
    pub safe_mode: bool,
    pub auto_safe_mode: bool,
    pub proxy: Option<String>,
    pub header: Option<String>,
    pub user_agents_file: Option<String>,
    pub subdomain_wordlist: String,
    pub resolvers: Option<String>,
    pub dir_wordlist: String,
    pub dir_wordlist_small: String,
    pub tech_wordlists: BTreeMap<String, String>,
    pub recursion_depth: u32,
    pub crawl_depth: u32,
    pub exclude: Vec<String>,
    pub tools: ToolSelection,
    pub nmap_strategy: NmapStrategy,
    pub nmap_scripts: Option<String>,
    pub nmap_aggressive: bool,
    pub puredns_rate: u32,
    pub httpx_rate: u32,
    pub naabu_rate: u32,
    pub masscan_rate: u32,
    pub naabu_source_port: Option<u16>,
    pub headless: bool,
    pub auto_form_fill: bool,
    pub ignored_extensions: Vec<String>,
    pub show_progress: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            targets: Vec::new(),
            input_file: None,
            output_dir: PathBuf::from("."),
            threads: 40,
            timeout_seconds: 1800,
            safe_mode: false,
            auto_safe_mode: true,
            proxy: None,
            header: None,
            user_agents_file: None,
            subdomain_wordlist: DEFAULT_SUBDOMAIN_WORDLIST.to_string(),
            resolvers: None,
            dir_wordlist: DEFAULT_DIR_WORDLIST.to_string(),
            dir_wordlist_small: SMALL_DIR_WORDLIST.to_string(),
            tech_wordlists: default_tech_wordlists(),
            recursion_depth: 1,
            crawl_depth: 2,
            exclude: Vec::new(),
            tools: ToolSelection::default(),
            nmap_strategy: NmapStrategy::Top1000,
            nmap_scripts: None,
            nmap_aggressive: false,
            puredns_rate: 1000,
            httpx_rate: 150,
            naabu_rate: 1000,
            masscan_rate: 300,
            naabu_source_port: None,
            headless: false,
            auto_form_fill: false,
            ignored_extensions: default_ignored_extensions(),
            show_progress: true,
        }
    }
}

impl Options {
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("no target provided (targets and input_file are both empty)")]
    NoTarget,

    #[error("invalid target: {target}")]
    InvalidTarget { target: String },

    #[error("no tools enabled in any phase")]
    NoToolsEnabled,

    #[error("unknown {phase} tool '{tool}'")]
    UnknownTool { phase: &'static str, tool: String },

    #[error("{kind} wordlist is missing or unreadable: {path}")]
    MissingWordlist { kind: &'static str, path: String },

    #[error("invalid header '{header}', expected 'Key: Value'")]
    InvalidHeader { header: String },

    #[error("threads must be at least 1")]
    InvalidThreads,

    #[error("timeout must be at least 1 second")]
    InvalidTimeout,

    #[error("failed to open file for {kind}: {path}: {source}")]
    FileOpen {
        kind: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read lines for {kind}: {path}: {source}")]
    FileRead {
        kind: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to build HTTP client: {source}")]
    HttpClientBuild {
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to setup proxy: {proxy}: {source}")]
    ProxySetup {
        proxy: String,
        #[source]
        source: reqwest::Error,
    },

    #[error(transparent)]
    Output(#[from] OutputError),
}

#[derive(Debug)]
pub struct TargetRun {
    pub report_dir: PathBuf,
    pub report: PipelineReport,
}

#[derive(Debug)]
pub struct ScanResult {
    pub elapsed: Duration,
    pub runs: Vec<TargetRun>,
    pub interrupted: bool,
}

#[derive(Debug)]
pub struct Runner {
    options: Arc<Options>,
    registry: ProcessRegistry,
}

fn readable_file(path: &str) -> bool {
    std::fs::metadata(crate::config::expand_tilde(path))
        .map(|m| m.is_file())
        .unwrap_or(false)
}

fn require_wordlist(kind: &'static str, path: &str) -> Result<(), RunnerError> {
    if readable_file(path) {
        Ok(())
    } else {
        Err(RunnerError::MissingWordlist {
            kind,
            path: path.to_string(),
        })
    }
}

impl Runner {
    /// Checks every condition that would make the run pointless before any
    /// process is spawned.
    pub fn new(options: Options) -> Result<Self, RunnerError> {
        if options.targets.iter().all(|t| t.trim().is_empty()) && options.input_file.is_none() {
            return Err(RunnerError::NoTarget);
        }
        for t in options.targets.iter().filter(|t| !t.trim().is_empty()) {
            if ScanTarget::parse(t).is_none() {
                return Err(RunnerError::InvalidTarget { target: t.clone() });
            }
        }
        if options.threads == 0 {
            return Err(RunnerError::InvalidThreads);
        }
        if options.timeout_seconds == 0 {
            return Err(RunnerError::InvalidTimeout);
        }
        if options.tools.is_empty() {
            return Err(RunnerError::NoToolsEnabled);
        }
        for phase in [
            ToolPhase::Subdomain,
            ToolPhase::PortScan,
            ToolPhase::DirSearch,
            ToolPhase::Crawl,
        ] {
            for id in options.tools.for_phase(phase) {
                match tools::lookup(id) {
                    Some(spec) if spec.phase == phase && spec.selectable() => {}
                    _ => {
                        return Err(RunnerError::UnknownTool {
                            phase: phase.label(),
                            tool: id.clone(),
                        })
                    }
                }
            }
        }
        if let Some(header) = options.header.as_deref() {
            if stealth::parse_header(header).is_none() {
                return Err(RunnerError::InvalidHeader {
                    header: header.to_string(),
                });
            }
        }
        if options.tools.contains(ToolPhase::Subdomain, "puredns") {
            require_wordlist("subdomain", &options.subdomain_wordlist)?;
            if let Some(resolvers) = options.resolvers.as_deref() {
                require_wordlist("resolvers", resolvers)?;
            }
        }
        if !options.tools.dirsearch.is_empty() {
            if options.safe_mode {
                require_wordlist("small directory", &options.dir_wordlist_small)?;
            } else {
                require_wordlist("directory", &options.dir_wordlist)?;
            }
        }
        if let Some(proxy) = options.proxy.as_deref() {
            reqwest::Proxy::all(proxy).map_err(|source| RunnerError::ProxySetup {
                proxy: proxy.to_string(),
                source,
            })?;
        }

        Ok(Self {
            options: Arc::new(options),
            registry: ProcessRegistry::new(),
        })
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Handle used by the interrupt handler to stop live children.
    pub fn registry(&self) -> ProcessRegistry {
        self.registry.clone()
    }

    pub async fn run(&self) -> Result<ScanResult, RunnerError> {
        let started_at = Instant::now();
        let targets = load_targets(&self.options.targets, self.options.input_file.as_deref()).await?;
        if targets.is_empty() {
            return Err(RunnerError::NoTarget);
        }

        let agents = match self.options.user_agents_file.as_deref() {
            Some(path) => Some(Arc::new(
                UserAgentPool::from_file(&crate::config::expand_tilde(path), 1)
                    .await
                    .map_err(|source| RunnerError::FileOpen {
                        kind: "user_agents_file",
                        path: path.to_string(),
                        source,
                    })?,
            )),
            None => None,
        };
        let client = crate::baseline::probe_client(self.options.proxy.as_deref())
            .map_err(|source| RunnerError::HttpClientBuild { source })?;

        let mut runs: Vec<TargetRun> = Vec::new();
        for target in targets {
            if self.registry.is_shutting_down() {
                break;
            }
            let layout = output::ReportLayout::create(&self.options.output_dir, &target).await?;
            tracing::info!(target = %target.original(), report = %layout.root().display(), "starting scan");

            let pipeline = Pipeline::new(
                self.options.clone(),
                target,
                self.registry.clone(),
                client.clone(),
                layout.clone(),
                agents.clone(),
            );
            let report = pipeline.run().await;
            output::write_report(&layout, &report).await?;
            runs.push(TargetRun {
                report_dir: layout.root().to_path_buf(),
                report,
            });
        }

        Ok(ScanResult {
            elapsed: started_at.elapsed(),
            interrupted: self.registry.is_shutting_down(),
            runs,
        })
    }
}

async fn load_targets(
    targets: &[String],
    input_file: Option<&str>,
) -> Result<Vec<ScanTarget>, RunnerError> {
    let mut out: Vec<ScanTarget> = Vec::new();
    let mut push = |raw: &str, out: &mut Vec<ScanTarget>| {
        if let Some(t) = ScanTarget::parse(raw) {
            if !out.iter().any(|existing| existing.original() == t.original()) {
                out.push(t);
            }
        }
    };
    for t in targets {
        push(t, &mut out);
    }

    if let Some(path) = input_file.filter(|p| !p.trim().is_empty()) {
        let path = crate::config::expand_tilde_string(path);
        let handle = File::open(&path).await.map_err(|e| RunnerError::FileOpen {
            kind: "input_file",
            path: path.clone(),
            source: e,
        })?;
        let mut lines = BufReader::new(handle).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() || line.starts_with('#') {
                        continue;
                    }
                    push(line, &mut out);
                }
                Ok(None) => break,
                Err(e) => {
                    return Err(RunnerError::FileRead {
                        kind: "input_file",
                        path,
                        source: e,
                    })
                }
            }
        }
    }
    Ok(out)
}

pub fn report_root(runs: &[TargetRun]) -> Option<&Path> {
    runs.first().map(|r| r.report_dir.as_path())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn options_with_wordlist() -> (Options, tempfile::NamedTempFile) {
        let mut wl = tempfile::NamedTempFile::new().unwrap();
        writeln!(wl, "admin").unwrap();
        let path = wl.path().display().to_string();
        let options = Options {
            targets: vec!["example.com".to_string()],
            dir_wordlist: path.clone(),
            dir_wordlist_small: path.clone(),
            subdomain_wordlist: path,
            ..Options::default()
        };
        (options, wl)
    }

    #[test]
    fn rejects_missing_target() {
        let err = Runner::new(Options::default()).unwrap_err();
        assert!(matches!(err, RunnerError::NoTarget));
    }

    #[test]
    fn rejects_run_with_no_tools() {
        let (mut options, _wl) = options_with_wordlist();
        options.tools = ToolSelection {
            subdomain: vec![],
            port_scan: vec![],
            dirsearch: vec![],
            crawl: vec![],
        };
        assert!(matches!(
            Runner::new(options).unwrap_err(),
            RunnerError::NoToolsEnabled
        ));
    }

    #[test]
    fn missing_directory_wordlist_is_fatal() {
        let (mut options, _wl) = options_with_wordlist();
        options.dir_wordlist = "/definitely/not/here.txt".to_string();
        match Runner::new(options).unwrap_err() {
            RunnerError::MissingWordlist { kind, path } => {
                assert_eq!(kind, "directory");
                assert_eq!(path, "/definitely/not/here.txt");
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn wordlist_not_needed_without_dirsearch_tools() {
        let (mut options, _wl) = options_with_wordlist();
        options.dir_wordlist = "/definitely/not/here.txt".to_string();
        options.tools.dirsearch.clear();
        assert!(Runner::new(options).is_ok());
    }

    #[test]
    fn rejects_unknown_tool_and_bad_header() {
        let (mut options, _wl) = options_with_wordlist();
        options.tools.crawl = vec!["ffuf".to_string()];
        assert!(matches!(
            Runner::new(options.clone()).unwrap_err(),
            RunnerError::UnknownTool { phase: "crawl", .. }
        ));
        options.tools.crawl = vec!["katana".to_string()];
        options.header = Some("no-colon".to_string());
        assert!(matches!(
            Runner::new(options).unwrap_err(),
            RunnerError::InvalidHeader { .. }
        ));
    }

    #[tokio::test]
    async fn targets_merge_cli_and_file_without_duplicates() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# scope\nexample.com\n\n10.0.0.8\n").unwrap();
        let path = file.path().display().to_string();
        let targets = load_targets(&["example.com".to_string()], Some(&path))
            .await
            .unwrap();
        let hosts: Vec<&str> = targets.iter().map(|t| t.host()).collect();
        assert_eq!(hosts, vec!["example.com", "10.0.0.8"]);
        assert!(targets[1].is_ip());
    }
}
