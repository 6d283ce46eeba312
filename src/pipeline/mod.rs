pub mod crawl;
pub mod dirsearch;
pub mod liveness;
pub mod ports;
pub mod subdomain;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::aggregator::AggregatedResultSet;
use crate::baseline::WildcardBaseline;
use crate::fingerprint::{self, TargetFingerprint, WAF_CONFIDENCE_THRESHOLD};
use crate::normalizer::ProbeRecord;
use crate::output::ReportLayout;
use crate::process::{ProcessRegistry, ToolInvocation};
use crate::runner::Options;
use crate::scheduler::{PhaseRun, Scheduler, TaskStatus};
use crate::stealth::{self, Disguise, SafeModeProfile, UserAgentPool};
use crate::target::{Exclusions, ScanTarget};
use crate::tools::{self, ToolContext, ToolPhase, ToolSpec};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseState {
    SubdomainDiscovery,
    LivenessProbe,
    PortScan,
    DirectorySearch,
    WebCrawl,
    Done,
}

impl PhaseState {
    pub const SCANNING: [PhaseState; 5] = [
        PhaseState::SubdomainDiscovery,
        PhaseState::LivenessProbe,
        PhaseState::PortScan,
        PhaseState::DirectorySearch,
        PhaseState::WebCrawl,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            PhaseState::SubdomainDiscovery => "subdomains",
            PhaseState::LivenessProbe => "liveness",
            PhaseState::PortScan => "ports",
            PhaseState::DirectorySearch => "dirsearch",
            PhaseState::WebCrawl => "crawl",
            PhaseState::Done => "done",
        }
    }

    /// Report sub-directory. The probe shares phase 1's directory.
    pub fn dir_name(&self) -> &'static str {
        match self {
            PhaseState::SubdomainDiscovery | PhaseState::LivenessProbe => "phase1_subdomains",
            PhaseState::PortScan => "phase2_ports",
            PhaseState::DirectorySearch => "phase3_dirsearch",
            PhaseState::WebCrawl | PhaseState::Done => "phase4_crawl",
        }
    }
}

/// Transition table. Liveness is the only phase whose empty output ends the
/// run: without a live host nothing downstream has a target.
pub fn next_state(current: PhaseState, produced: bool, port_scan: bool) -> PhaseState {
    match current {
        PhaseState::SubdomainDiscovery => PhaseState::LivenessProbe,
        PhaseState::LivenessProbe if !produced => PhaseState::Done,
        PhaseState::LivenessProbe if port_scan => PhaseState::PortScan,
        PhaseState::LivenessProbe => PhaseState::DirectorySearch,
        PhaseState::PortScan => PhaseState::DirectorySearch,
        PhaseState::DirectorySearch => PhaseState::WebCrawl,
        PhaseState::WebCrawl | PhaseState::Done => PhaseState::Done,
    }
}

/// Output of one phase. Built once, read by the next phase, then persisted.
#[derive(Clone, Debug, Serialize)]
pub struct PhaseResult {
    pub phase: PhaseState,
    pub raw_output_files: BTreeMap<String, Vec<PathBuf>>,
    pub aggregated: AggregatedResultSet,
    pub verified_subset: Vec<ProbeRecord>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub open_ports: BTreeMap<String, Vec<u16>>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub baselines: BTreeMap<String, WildcardBaseline>,
    pub tasks: usize,
    pub completed: usize,
    pub failed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl PhaseResult {
    pub fn empty(phase: PhaseState) -> Self {
        Self {
            phase,
            raw_output_files: BTreeMap::new(),
            aggregated: AggregatedResultSet::default(),
            verified_subset: Vec::new(),
            hosts: Vec::new(),
            open_ports: BTreeMap::new(),
            baselines: BTreeMap::new(),
            tasks: 0,
            completed: 0,
            failed: 0,
            note: None,
        }
    }

    pub fn skipped(phase: PhaseState, note: impl Into<String>) -> Self {
        let mut result = Self::empty(phase);
        result.note = Some(note.into());
        result
    }

    pub fn is_empty(&self) -> bool {
        self.aggregated.is_empty()
            && self.verified_subset.is_empty()
            && self.hosts.is_empty()
            && self.open_ports.is_empty()
    }

    /// Records the scheduler's tallies and which raw files were written.
    pub(crate) fn record_run(&mut self, tasks: &[ToolInvocation], run: &PhaseRun) {
        self.tasks += run.progress.total();
        self.completed += run.count(|s| {
            matches!(s, TaskStatus::Completed | TaskStatus::NonZeroExit(_))
        });
        self.failed += run.count(|s| {
            !matches!(s, TaskStatus::Completed | TaskStatus::NonZeroExit(_))
        });
        // a task that produced raw output had its file written by the runner
        for outcome in run.outcomes.iter().filter(|o| o.raw.is_some()) {
            let Some(task) = tasks.get(outcome.index) else {
                continue;
            };
            if let Some(path) = task.output_path.as_ref() {
                let files = self.raw_output_files.entry(task.tool.clone()).or_default();
                if !files.contains(path) {
                    files.push(path.clone());
                }
            }
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PipelineReport {
    pub target: String,
    pub host: String,
    pub domain: String,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub safe_mode: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub safe_mode_reason: Option<String>,
    pub fingerprint: TargetFingerprint,
    pub phases: Vec<PhaseResult>,
    pub skipped: Vec<PhaseState>,
    pub interrupted: bool,
    pub final_state: PhaseState,
}

impl PipelineReport {
    pub fn phase(&self, state: PhaseState) -> Option<&PhaseResult> {
        self.phases.iter().find(|p| p.phase == state)
    }
}

/// Read-only state shared by every phase of one target's run.
pub struct PhaseEnv {
    pub options: Arc<Options>,
    pub target: ScanTarget,
    pub profile: SafeModeProfile,
    pub disguise: Disguise,
    pub scheduler: Scheduler,
    pub layout: ReportLayout,
    pub exclusions: Exclusions,
    pub client: reqwest::Client,
    pub technologies: Vec<String>,
}

impl PhaseEnv {
    /// Builder context with a fresh User-Agent and header set.
    pub fn context<'a>(&'a self, target: &'a str) -> ToolContext<'a> {
        let mut ctx = ToolContext::new(target, &self.options, &self.profile);
        ctx.user_agent = self.disguise.user_agent();
        ctx.headers = self.disguise.headers();
        ctx
    }

    pub fn timeout(&self) -> Duration {
        self.options.tool_timeout()
    }

    pub fn pool_limit(&self, tasks: usize) -> usize {
        self.profile.pool_limit(tasks)
    }

    /// Enabled catalog entries for `phase`, in selection order.
    pub fn selected(&self, phase: ToolPhase) -> Vec<&'static ToolSpec> {
        self.options
            .tools
            .for_phase(phase)
            .iter()
            .filter_map(|id| tools::lookup(id))
            .collect()
    }

    pub fn invocation(&self, spec: &ToolSpec, ctx: &ToolContext, state: PhaseState) -> ToolInvocation {
        let output = self.layout.tool_output(state, spec.id, ctx.target);
        spec.invocation(ctx, self.timeout(), output)
    }

    pub fn is_interrupted(&self) -> bool {
        self.scheduler.registry().is_shutting_down()
    }
}

pub struct Pipeline {
    options: Arc<Options>,
    target: ScanTarget,
    registry: ProcessRegistry,
    client: reqwest::Client,
    layout: ReportLayout,
    agents: Option<Arc<UserAgentPool>>,
}

impl Pipeline {
    pub fn new(
        options: Arc<Options>,
        target: ScanTarget,
        registry: ProcessRegistry,
        client: reqwest::Client,
        layout: ReportLayout,
        agents: Option<Arc<UserAgentPool>>,
    ) -> Self {
        Self {
            options,
            target,
            registry,
            client,
            layout,
            agents,
        }
    }

    /// Fingerprints the root, settles safe mode, then walks the phases.
    pub async fn run(self) -> PipelineReport {
        let started_at = Local::now();
        let fingerprint = fingerprint::fingerprint_target(
            &self.client,
            &self.target.root_url(),
            &stealth::random_user_agent(),
        )
        .await;

        let (safe_mode, safe_mode_reason) = if self.options.safe_mode {
            (true, Some("requested".to_string()))
        } else if let Some(waf) = fingerprint
            .waf(WAF_CONFIDENCE_THRESHOLD)
            .filter(|_| self.options.auto_safe_mode)
        {
            tracing::warn!(
                waf = %waf.name,
                confidence = waf.confidence,
                "WAF detected, switching to safe mode"
            );
            (
                true,
                Some(format!("{} detected ({:.0}%)", waf.name, waf.confidence * 100.0)),
            )
        } else {
            (false, None)
        };

        let profile = SafeModeProfile::resolve(&self.options, safe_mode);
        let custom_header = self.options.header.as_deref().and_then(stealth::parse_header);
        let pool = match &self.agents {
            Some(agents) => agents.with_rotation(profile.rotate_every),
            None => UserAgentPool::new(Vec::new(), profile.rotate_every),
        };
        let scheduler = Scheduler::new(self.registry.clone())
            .with_dispatch_interval(profile.dispatch_interval)
            .with_progress(self.options.show_progress);

        let env = PhaseEnv {
            exclusions: Exclusions::new(&self.options.exclude),
            disguise: Disguise::new(pool, safe_mode, custom_header),
            technologies: fingerprint.technologies.clone(),
            options: self.options.clone(),
            target: self.target.clone(),
            profile,
            scheduler,
            layout: self.layout.clone(),
            client: self.client.clone(),
        };

        let port_scan = !self.options.tools.port_scan.is_empty();
        let mut phases: Vec<PhaseResult> = Vec::new();
        let mut skipped: Vec<PhaseState> = Vec::new();
        let mut interrupted = false;
        let mut state = PhaseState::SubdomainDiscovery;

        while state != PhaseState::Done {
            if env.is_interrupted() {
                interrupted = true;
                break;
            }
            tracing::info!(phase = state.label(), safe_mode, "phase starting");
            let result = match state {
                PhaseState::SubdomainDiscovery => subdomain::run(&env).await,
                PhaseState::LivenessProbe => {
                    let hosts = liveness_input(&env.target, last(&phases, PhaseState::SubdomainDiscovery));
                    liveness::run(&env, &hosts).await
                }
                PhaseState::PortScan => {
                    let hosts = live_hosts(last(&phases, PhaseState::LivenessProbe));
                    ports::run(&env, &hosts).await
                }
                PhaseState::DirectorySearch => {
                    let live = last(&phases, PhaseState::LivenessProbe)
                        .map(|p| p.verified_subset.clone())
                        .unwrap_or_default();
                    dirsearch::run(&env, &live).await
                }
                PhaseState::WebCrawl => {
                    let seeds = crawl_seeds(&phases);
                    crawl::run(&env, &seeds).await
                }
                PhaseState::Done => break,
            };

            let produced = !result.is_empty();
            if !produced {
                tracing::info!(phase = state.label(), "phase produced nothing");
                skipped.push(state);
            }
            tracing::info!(
                phase = state.label(),
                tasks = result.tasks,
                failed = result.failed,
                urls = result.aggregated.all.len(),
                verified = result.verified_subset.len(),
                "phase finished"
            );
            phases.push(result);
            state = next_state(state, produced, port_scan);
        }
        if env.is_interrupted() {
            interrupted = true;
        }

        PipelineReport {
            target: self.target.original().to_string(),
            host: self.target.host().to_string(),
            domain: self.target.domain().to_string(),
            started_at,
            finished_at: Local::now(),
            safe_mode,
            safe_mode_reason,
            fingerprint,
            phases,
            skipped,
            interrupted,
            final_state: state,
        }
    }
}

fn last(phases: &[PhaseResult], state: PhaseState) -> Option<&PhaseResult> {
    phases.iter().rev().find(|p| p.phase == state)
}

/// Discovered hosts, or the root host when discovery found nothing.
fn liveness_input(target: &ScanTarget, discovered: Option<&PhaseResult>) -> Vec<String> {
    let mut hosts: Vec<String> = discovered.map(|p| p.hosts.clone()).unwrap_or_default();
    if hosts.is_empty() {
        hosts.push(target.host().to_string());
    }
    hosts
}

fn live_hosts(liveness: Option<&PhaseResult>) -> Vec<String> {
    let mut hosts: Vec<String> = liveness
        .map(|p| {
            p.verified_subset
                .iter()
                .filter_map(|v| crate::target::host_of(&v.url))
                .collect()
        })
        .unwrap_or_default();
    hosts.sort();
    hosts.dedup();
    hosts
}

/// Verified directory-search URLs, falling back to the live roots.
fn crawl_seeds(phases: &[PhaseResult]) -> Vec<String> {
    let pick = |state| {
        last(phases, state)
            .map(|p| p.verified_subset.iter().map(|v| v.url.clone()).collect::<Vec<_>>())
            .unwrap_or_default()
    };
    let verified = pick(PhaseState::DirectorySearch);
    if verified.is_empty() {
        pick(PhaseState::LivenessProbe)
    } else {
        verified
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verified(urls: &[&str]) -> Vec<ProbeRecord> {
        urls.iter()
            .map(|u| ProbeRecord {
                url: u.to_string(),
                status_code: Some(200),
                ..ProbeRecord::default()
            })
            .collect()
    }

    #[test]
    fn transitions() {
        use PhaseState::*;
        assert_eq!(next_state(SubdomainDiscovery, false, false), LivenessProbe);
        assert_eq!(next_state(LivenessProbe, false, true), Done);
        assert_eq!(next_state(LivenessProbe, true, true), PortScan);
        assert_eq!(next_state(LivenessProbe, true, false), DirectorySearch);
        assert_eq!(next_state(PortScan, false, true), DirectorySearch);
        assert_eq!(next_state(DirectorySearch, false, false), WebCrawl);
        assert_eq!(next_state(WebCrawl, true, false), Done);
    }

    #[test]
    fn root_host_seeds_liveness_when_discovery_is_empty() {
        let target = ScanTarget::parse("example.com").unwrap();
        let empty = PhaseResult::empty(PhaseState::SubdomainDiscovery);
        assert_eq!(liveness_input(&target, Some(&empty)), vec!["example.com"]);

        let mut found = PhaseResult::empty(PhaseState::SubdomainDiscovery);
        found.hosts = vec!["a.example.com".to_string()];
        assert_eq!(liveness_input(&target, Some(&found)), vec!["a.example.com"]);
    }

    #[test]
    fn crawl_prefers_verified_directory_results() {
        let mut live = PhaseResult::empty(PhaseState::LivenessProbe);
        live.verified_subset = verified(&["https://x.com"]);
        let mut dirs = PhaseResult::empty(PhaseState::DirectorySearch);
        assert_eq!(crawl_seeds(&[live.clone(), dirs.clone()]), vec!["https://x.com"]);

        dirs.verified_subset = verified(&["https://x.com/admin"]);
        assert_eq!(crawl_seeds(&[live, dirs]), vec!["https://x.com/admin"]);
    }

    #[test]
    fn port_scan_hosts_come_from_live_urls() {
        let mut live = PhaseResult::empty(PhaseState::LivenessProbe);
        live.verified_subset = verified(&["https://a.x.com", "http://a.x.com:8080", "https://b.x.com/"]);
        assert_eq!(live_hosts(Some(&live)), vec!["a.x.com", "b.x.com"]);
    }

    #[test]
    fn empty_result_reports_empty() {
        let mut result = PhaseResult::skipped(PhaseState::PortScan, "no tools");
        assert!(result.is_empty());
        result.open_ports.insert("10.0.0.1".to_string(), vec![22]);
        assert!(!result.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn raw_files_are_listed_only_for_tools_that_ran() {
        let dir = tempfile::tempdir().unwrap();
        let ran = dir.path().join("katana.txt");
        let tasks = vec![
            ToolInvocation::shell("katana", "echo https://x.example/a", "https://x.example", Duration::from_secs(5))
                .with_output(&ran),
            ToolInvocation::new("hakrawler", "definitely-not-installed-xyz", vec![], "https://x.example", Duration::from_secs(5))
                .with_output(dir.path().join("hakrawler.txt")),
        ];
        let run = Scheduler::new(ProcessRegistry::new())
            .run_phase("crawl", tasks.clone(), 2)
            .await;

        let mut result = PhaseResult::empty(PhaseState::WebCrawl);
        result.record_run(&tasks, &run);
        result.record_run(&tasks, &run);
        assert_eq!(result.raw_output_files.get("katana"), Some(&vec![ran]));
        assert!(!result.raw_output_files.contains_key("hakrawler"));
        assert_eq!(result.tasks, 4);
    }
}
