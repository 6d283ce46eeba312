use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use futures::future::join_all;
use itertools::iproduct;
use tempfile::NamedTempFile;

use crate::aggregator::ResultAggregator;
use crate::baseline::{self, WildcardBaseline};
use crate::config::expand_tilde;
use crate::normalizer::{self, url, NormalizedRecord, ProbeRecord};
use crate::output::{self, DIRSEARCH_JSONL};
use crate::process::ToolInvocation;
use crate::stealth;
use crate::tools::{self, ToolPhase};

use super::liveness::collect_verified;
use super::{PhaseEnv, PhaseResult, PhaseState};

const STATE: PhaseState = PhaseState::DirectorySearch;

/// Wordlist for the phase. A shuffled copy lives as long as this value.
pub enum Wordlist {
    File { path: String, reason: String },
    Shuffled { file: NamedTempFile, source: String },
}

impl Wordlist {
    pub fn path(&self) -> String {
        match self {
            Wordlist::File { path, .. } => path.clone(),
            Wordlist::Shuffled { file, .. } => file.path().display().to_string(),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Wordlist::File { path, reason } => format!("{path} ({reason})"),
            Wordlist::Shuffled { source, .. } => format!("{source} (shuffled, safe mode)"),
        }
    }
}

fn usable(path: &str) -> bool {
    expand_tilde(path).is_file()
}

/// Safe mode: the small list shuffled. Otherwise the first detected
/// technology with a wordlist on disk, else the default list.
pub fn choose_wordlist(
    safe_mode: bool,
    technologies: &[String],
    tech_wordlists: &std::collections::BTreeMap<String, String>,
    small: &str,
    default: &str,
) -> Wordlist {
    if safe_mode {
        match stealth::shuffled_wordlist(&expand_tilde(small)) {
            Ok(file) => {
                return Wordlist::Shuffled {
                    file,
                    source: small.to_string(),
                }
            }
            Err(e) => tracing::warn!(
                phase = STATE.label(),
                "small wordlist {small} unusable ({e}), using {default}"
            ),
        }
    }
    for tech in technologies {
        if let Some(path) = tech_wordlists.get(tech).filter(|p| usable(p)) {
            return Wordlist::File {
                path: expand_tilde(path).display().to_string(),
                reason: format!("{tech} detected"),
            };
        }
    }
    Wordlist::File {
        path: expand_tilde(default).display().to_string(),
        reason: "default".to_string(),
    }
}

/// `choose_wordlist` off the async workers; it stats and copies files.
async fn select_wordlist(env: &PhaseEnv) -> Wordlist {
    let safe_mode = env.profile.enabled;
    let technologies = env.technologies.clone();
    let options = env.options.clone();
    let chosen = tokio::task::spawn_blocking(move || {
        choose_wordlist(
            safe_mode,
            &technologies,
            &options.tech_wordlists,
            &options.dir_wordlist_small,
            &options.dir_wordlist,
        )
    })
    .await;
    match chosen {
        Ok(wordlist) => wordlist,
        Err(e) => {
            tracing::warn!(phase = STATE.label(), "wordlist selection failed ({e}), using default");
            Wordlist::File {
                path: expand_tilde(&env.options.dir_wordlist).display().to_string(),
                reason: "default".to_string(),
            }
        }
    }
}

/// True when the URL's last path segment ends in one of `extensions`.
pub fn has_ignored_extension(target: &str, extensions: &[String]) -> bool {
    let path = url::path_of(target);
    let segment = path.rsplit('/').next().unwrap_or(path);
    match segment.rsplit_once('.') {
        Some((_, ext)) => extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)),
        None => false,
    }
}

/// One baseline per live URL, probed concurrently and independently.
async fn probe_baselines(env: &PhaseEnv, urls: &[String]) -> HashMap<String, WildcardBaseline> {
    let probes = urls.iter().map(|u| async move {
        let b = baseline::probe(&env.client, u, &stealth::random_user_agent()).await;
        (u.clone(), b)
    });
    let mut out = HashMap::new();
    for (u, b) in join_all(probes).await {
        match b {
            Some(b) if b.is_wildcard() => {
                tracing::info!(
                    phase = STATE.label(),
                    target = %u,
                    status = b.status_code,
                    size = b.byte_size,
                    "wildcard responses detected, filtering"
                );
                out.insert(u, b);
            }
            Some(b) => {
                out.insert(u, b);
            }
            None => tracing::debug!(phase = STATE.label(), target = %u, "no baseline"),
        }
    }
    out
}

pub async fn run(env: &PhaseEnv, live: &[ProbeRecord]) -> PhaseResult {
    let specs = env.selected(ToolPhase::DirSearch);
    if specs.is_empty() {
        return PhaseResult::skipped(STATE, "no directory search tools enabled");
    }
    let mut urls: Vec<String> = live.iter().map(|v| url::canonicalize(&v.url)).collect();
    urls.sort();
    urls.dedup();
    if urls.is_empty() {
        return PhaseResult::skipped(STATE, "no live URLs");
    }

    let options = &env.options;
    let wordlist = select_wordlist(env).await;
    tracing::info!(phase = STATE.label(), wordlist = %wordlist.describe(), "wordlist selected");
    let wordlist_path = wordlist.path();

    let baselines = probe_baselines(env, &urls).await;

    let tasks: Vec<ToolInvocation> = iproduct!(urls.iter(), specs.iter())
        .map(|(target, spec)| {
            let mut ctx = env.context(target);
            ctx.wordlist = Some(&wordlist_path);
            ctx.baseline = baselines.get(target);
            env.invocation(spec, &ctx, STATE)
        })
        .collect();

    let aggregator = Arc::new(ResultAggregator::new());
    let exclusions = env.exclusions.clone();
    let ignored = options.ignored_extensions.clone();
    let run = env
        .scheduler
        .run_phase_into(
            STATE.label(),
            tasks.clone(),
            env.pool_limit(tasks.len()),
            aggregator.clone(),
            move |record: &NormalizedRecord| {
                !exclusions.is_excluded(&record.url) && !has_ignored_extension(&record.url, &ignored)
            },
        )
        .await;

    let mut result = PhaseResult::empty(STATE);
    result.record_run(&tasks, &run);
    result.baselines = baselines.into_iter().collect();
    result.aggregated = aggregator.snapshot();
    drop(wordlist);

    let findings = aggregator.findings();
    if findings.is_empty() {
        return result;
    }

    let dir = env.layout.phase_dir(STATE);
    let found_path = dir.join("found_urls.txt");
    let mut verified: Vec<ProbeRecord> = Vec::new();
    match output::write_lines(&found_path, findings.iter().map(|f| f.url.as_str())).await {
        Ok(()) if !env.is_interrupted() => {
            verified = verify(env, &found_path, &mut result).await;
        }
        Ok(()) => {}
        Err(e) => tracing::error!(phase = STATE.label(), "{e}"),
    }
    result.verified_subset = verified;

    let synthesized = output::httpx_style_records(&findings, &result.verified_subset);
    let jsonl = dir.join(DIRSEARCH_JSONL);
    match output::write_jsonl(&jsonl, &synthesized).await {
        Ok(()) => {
            result
                .raw_output_files
                .insert("dirsearch_httpx".to_string(), vec![jsonl]);
        }
        Err(e) => tracing::error!(phase = STATE.label(), "{e}"),
    }
    result
}

/// Re-probes everything the brute-forcers found.
async fn verify(env: &PhaseEnv, list: &Path, result: &mut PhaseResult) -> Vec<ProbeRecord> {
    let Some(spec) = tools::lookup("httpx-verify") else {
        return Vec::new();
    };
    let list = list.display().to_string();
    let ctx = env.context(&list);
    let tasks = vec![spec.invocation(
        &ctx,
        env.timeout(),
        env.layout.tool_output(STATE, spec.id, env.target.host()),
    )];
    let run = env.scheduler.run_phase("verify", tasks.clone(), 1).await;
    result.record_run(&tasks, &run);
    let records = run
        .outcomes
        .iter()
        .flat_map(|o| o.stdout_lines())
        .filter_map(normalizer::parse_probe);
    collect_verified(records, &env.exclusions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::io::Write;

    #[test]
    fn static_assets_are_ignored() {
        let exts: Vec<String> = ["png", "css", "js"].iter().map(|s| s.to_string()).collect();
        assert!(has_ignored_extension("https://x.com/logo.PNG", &exts));
        assert!(has_ignored_extension("https://x.com/a/b.css?v=2", &exts));
        assert!(!has_ignored_extension("https://x.com/app.json", &exts));
        assert!(!has_ignored_extension("https://x.com/admin", &exts));
        assert!(!has_ignored_extension("https://x.com", &exts));
    }

    #[test]
    fn wordlist_follows_technology_then_default() {
        let mut wp = tempfile::NamedTempFile::new().unwrap();
        writeln!(wp, "wp-admin").unwrap();
        let tech = BTreeMap::from([
            ("wordpress".to_string(), wp.path().display().to_string()),
            ("drupal".to_string(), "/missing/drupal.txt".to_string()),
        ]);

        let chosen = choose_wordlist(false, &["drupal".into(), "wordpress".into()], &tech, "/s", "/d");
        assert_eq!(chosen.path(), wp.path().display().to_string());

        let chosen = choose_wordlist(false, &["drupal".into()], &tech, "/s", "/d");
        assert_eq!(chosen.path(), "/d");
    }

    #[test]
    fn safe_mode_shuffles_the_small_list() {
        let mut small = tempfile::NamedTempFile::new().unwrap();
        writeln!(small, "a\nb\nc").unwrap();
        let small_path = small.path().display().to_string();
        let chosen = choose_wordlist(true, &[], &BTreeMap::new(), &small_path, "/d");
        assert!(matches!(chosen, Wordlist::Shuffled { .. }));
        assert_ne!(chosen.path(), small_path);

        let fallback = choose_wordlist(true, &[], &BTreeMap::new(), "/missing/small.txt", "/d");
        assert_eq!(fallback.path(), "/d");
    }
}
