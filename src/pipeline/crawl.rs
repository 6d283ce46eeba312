use std::sync::Arc;

use itertools::iproduct;
use tokio::sync::mpsc;

use crate::aggregator::ResultAggregator;
use crate::normalizer::{url, NormalizedRecord};
use crate::process::ToolInvocation;
use crate::target::Exclusions;
use crate::tools::{Scope, ToolPhase, ToolSpec};

use super::{PhaseEnv, PhaseResult, PhaseState};

const STATE: PhaseState = PhaseState::WebCrawl;

fn in_scope_filter(exclusions: &Exclusions) -> impl Fn(&NormalizedRecord) -> bool + Send + Sync + 'static {
    let exclusions = exclusions.clone();
    move |record: &NormalizedRecord| !exclusions.is_excluded(&record.url)
}

fn stage_one_tasks(env: &PhaseEnv, specs: &[&'static ToolSpec], seeds: &[String]) -> Vec<ToolInvocation> {
    let mut tasks: Vec<ToolInvocation> = iproduct!(seeds.iter(), specs.iter())
        .filter(|(_, spec)| spec.scope == Scope::Url)
        .map(|(seed, spec)| {
            let ctx = env.context(seed);
            env.invocation(spec, &ctx, STATE)
        })
        .collect();
    if !env.target.is_ip() {
        let domain = env.target.domain();
        for spec in specs.iter().filter(|s| s.scope == Scope::Domain) {
            let ctx = env.context(domain);
            tasks.push(env.invocation(spec, &ctx, STATE));
        }
    }
    tasks
}

/// Stage 1 crawls the seeds; stage 2 extracts links from the JavaScript
/// files stage 1 found, once stage 1 has fully drained.
pub async fn run(env: &PhaseEnv, seeds: &[String]) -> PhaseResult {
    let specs = env.selected(ToolPhase::Crawl);
    if specs.is_empty() {
        return PhaseResult::skipped(STATE, "no crawl tools enabled");
    }
    let mut seeds = env
        .exclusions
        .retain(seeds.iter().map(|s| url::canonicalize(s)).collect());
    seeds.sort();
    seeds.dedup();
    if seeds.is_empty() {
        return PhaseResult::skipped(STATE, "nothing to crawl");
    }

    let (first, second): (Vec<_>, Vec<_>) = specs.into_iter().partition(|s| s.scope != Scope::JsFile);
    let aggregator = Arc::new(ResultAggregator::new());
    let mut result = PhaseResult::empty(STATE);

    let tasks = stage_one_tasks(env, &first, &seeds);
    let run = env
        .scheduler
        .run_phase_into(
            "crawl",
            tasks.clone(),
            env.pool_limit(tasks.len()),
            aggregator.clone(),
            in_scope_filter(&env.exclusions),
        )
        .await;
    result.record_run(&tasks, &run);

    if !second.is_empty() && !env.is_interrupted() {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        for js in aggregator.snapshot().js_files {
            if tx.send(js).is_err() {
                break;
            }
        }
        drop(tx);

        let mut tasks: Vec<ToolInvocation> = Vec::new();
        while let Some(js) = rx.recv().await {
            for spec in &second {
                let ctx = env.context(&js);
                tasks.push(env.invocation(spec, &ctx, STATE));
            }
        }
        tracing::info!(phase = STATE.label(), tasks = tasks.len(), "link extraction over JavaScript files");
        let run = env
            .scheduler
            .run_phase_into(
                "js-links",
                tasks.clone(),
                env.pool_limit(tasks.len()),
                aggregator.clone(),
                in_scope_filter(&env.exclusions),
            )
            .await;
        result.record_run(&tasks, &run);
    }

    result.aggregated = aggregator.snapshot();
    result
}
