use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use crate::aggregator::{AggregatedResultSet, Finding};
use crate::normalizer::{Category, ProbeRecord};
use crate::pipeline::{PhaseResult, PhaseState, PipelineReport};
use crate::target::{short_key, slugify, ScanTarget};

pub const RESULTS_FILE: &str = "results.json";
pub const DIRSEARCH_JSONL: &str = "dirsearch_httpx.jsonl";

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize {what}: {source}")]
    Json {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> OutputError + '_ {
    move |source| OutputError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Directory tree of one target's report.
#[derive(Clone, Debug)]
pub struct ReportLayout {
    root: PathBuf,
}

impl ReportLayout {
    /// Creates `report_<host>_<timestamp>` under `base`, with one
    /// sub-directory per phase.
    pub async fn create(base: &Path, target: &ScanTarget) -> Result<Self, OutputError> {
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let root = base.join(format!("report_{}_{stamp}", target.slug()));
        Self::at(root).await
    }

    pub async fn at(root: PathBuf) -> Result<Self, OutputError> {
        for state in PhaseState::SCANNING {
            let dir = root.join(state.dir_name());
            tokio::fs::create_dir_all(&dir).await.map_err(io_err(&dir))?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn phase_dir(&self, state: PhaseState) -> PathBuf {
        self.root.join(state.dir_name())
    }

    /// Raw output file owned by one (tool, target) pair. The key keeps
    /// targets that differ only in scheme or punctuation apart.
    pub fn tool_output(&self, state: PhaseState, tool: &str, target: &str) -> PathBuf {
        self.phase_dir(state)
            .join(format!("{}_{}_{}.txt", tool, slugify(target), short_key(target)))
    }
}

fn list_file_name(category: Category) -> &'static str {
    match category {
        Category::All => "all_urls.txt",
        Category::Parameters => "parameters.txt",
        Category::JsFiles => "js_files.txt",
        Category::ApiEndpoints => "api_endpoints.txt",
        Category::InterestingPaths => "interesting_paths.txt",
    }
}

pub async fn write_lines<I, S>(path: &Path, lines: I) -> Result<(), OutputError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = String::new();
    for line in lines {
        out.push_str(line.as_ref());
        out.push('\n');
    }
    tokio::fs::write(path, out).await.map_err(io_err(path))
}

async fn write_buckets(dir: &Path, set: &AggregatedResultSet) -> Result<(), OutputError> {
    for category in Category::ALL {
        let urls = set.bucket(category);
        if urls.is_empty() {
            continue;
        }
        write_lines(&dir.join(list_file_name(category)), urls).await?;
    }
    Ok(())
}

/// Per-phase text lists next to the raw tool outputs.
pub async fn write_phase(layout: &ReportLayout, result: &PhaseResult) -> Result<(), OutputError> {
    let dir = layout.phase_dir(result.phase);
    write_buckets(&dir, &result.aggregated).await?;
    match result.phase {
        PhaseState::SubdomainDiscovery if !result.hosts.is_empty() => {
            write_lines(&dir.join("subdomains.txt"), &result.hosts).await?;
        }
        PhaseState::LivenessProbe if !result.verified_subset.is_empty() => {
            write_lines(
                &dir.join("live_urls.txt"),
                result.verified_subset.iter().map(|v| v.url.as_str()),
            )
            .await?;
        }
        PhaseState::PortScan if !result.open_ports.is_empty() => {
            let lines = result
                .open_ports
                .iter()
                .flat_map(|(host, ports)| ports.iter().map(move |p| format!("{host}:{p}")));
            write_lines(&dir.join("open_ports.txt"), lines).await?;
        }
        PhaseState::DirectorySearch if !result.verified_subset.is_empty() => {
            write_lines(
                &dir.join("verified_urls.txt"),
                result.verified_subset.iter().map(|v| v.url.as_str()),
            )
            .await?;
        }
        _ => {}
    }
    Ok(())
}

pub async fn write_json<T: Serialize>(
    path: &Path,
    what: &'static str,
    value: &T,
) -> Result<(), OutputError> {
    let body = serde_json::to_vec_pretty(value).map_err(|source| OutputError::Json { what, source })?;
    tokio::fs::write(path, body).await.map_err(io_err(path))
}

/// `results.json` plus every phase's lists.
pub async fn write_report(layout: &ReportLayout, report: &PipelineReport) -> Result<(), OutputError> {
    for phase in &report.phases {
        write_phase(layout, phase).await?;
    }
    write_json(&layout.root().join(RESULTS_FILE), "results", report).await
}

/// Directory-search findings in the probe tool's JSON schema, so they can
/// travel the same path as native probe output. Probe data wins over what
/// the brute-forcer reported.
pub fn httpx_style_records(findings: &[Finding], verified: &[ProbeRecord]) -> Vec<ProbeRecord> {
    let by_url: BTreeMap<&str, &ProbeRecord> =
        verified.iter().map(|v| (v.url.as_str(), v)).collect();
    let mut records: Vec<ProbeRecord> = findings
        .iter()
        .map(|f| {
            let probed = by_url.get(f.url.as_str());
            ProbeRecord {
                url: f.url.clone(),
                status_code: probed.and_then(|p| p.status_code).or(f.status_code),
                last_modified: probed.and_then(|p| p.last_modified.clone()),
                content_length: probed.and_then(|p| p.content_length).or(f.content_length),
                title: probed.and_then(|p| p.title.clone()),
                webserver: probed.and_then(|p| p.webserver.clone()),
            }
        })
        .collect();
    // verified URLs the brute-forcers never printed (redirect targets)
    for v in verified {
        if !findings.iter().any(|f| f.url == v.url) {
            records.push(v.clone());
        }
    }
    records.sort_by(|a, b| a.url.cmp(&b.url));
    records
}

pub async fn write_jsonl(path: &Path, records: &[ProbeRecord]) -> Result<(), OutputError> {
    let mut lines = Vec::with_capacity(records.len());
    for record in records {
        lines.push(serde_json::to_string(record).map_err(|source| OutputError::Json {
            what: "probe record",
            source,
        })?);
    }
    write_lines(path, lines).await
}
