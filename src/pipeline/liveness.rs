use futures::stream::{self, StreamExt};
use reqwest::header;

use crate::normalizer::{self, url, ProbeRecord};
use crate::output;
use crate::scheduler::TaskStatus;
use crate::tools;

use super::{PhaseEnv, PhaseResult, PhaseState};

const STATE: PhaseState = PhaseState::LivenessProbe;

/// Sorted by URL, one record per canonical URL, excluded URLs dropped.
pub(crate) fn collect_verified<I>(records: I, exclusions: &crate::target::Exclusions) -> Vec<ProbeRecord>
where
    I: IntoIterator<Item = ProbeRecord>,
{
    let mut out: Vec<ProbeRecord> = Vec::new();
    for mut record in records {
        record.url = url::canonicalize(&record.url);
        if !url::is_absolute(&record.url) || exclusions.is_excluded(&record.url) {
            continue;
        }
        if !out.iter().any(|r| r.url == record.url) {
            out.push(record);
        }
    }
    out.sort_by(|a, b| a.url.cmp(&b.url));
    out
}

pub async fn run(env: &PhaseEnv, hosts: &[String]) -> PhaseResult {
    let mut result = PhaseResult::empty(STATE);
    let Some(spec) = tools::lookup("httpx") else {
        return PhaseResult::skipped(STATE, "probe tool missing from catalog");
    };

    let input = env.layout.phase_dir(STATE).join("probe_input.txt");
    if let Err(e) = output::write_lines(&input, hosts).await {
        tracing::error!(phase = STATE.label(), "{e}");
        return PhaseResult::skipped(STATE, "could not write probe input");
    }

    let list = input.display().to_string();
    let ctx = env.context(&list);
    let invocation = spec.invocation(
        &ctx,
        env.timeout(),
        env.layout.tool_output(STATE, spec.id, env.target.host()),
    );
    let tasks = vec![invocation];
    let run = env.scheduler.run_phase(STATE.label(), tasks.clone(), 1).await;
    result.record_run(&tasks, &run);

    let launch_failed = run
        .outcomes
        .iter()
        .any(|o| matches!(o.status, TaskStatus::LaunchFailed(_)));
    let parsed: Vec<ProbeRecord> = run
        .outcomes
        .iter()
        .flat_map(|o| o.stdout_lines())
        .filter_map(normalizer::parse_probe)
        .collect();

    let records = if launch_failed && !env.is_interrupted() {
        tracing::warn!(phase = STATE.label(), tool = spec.id, "probe tool unavailable, checking hosts directly");
        result.note = Some("probed in-process".to_string());
        probe_directly(env, hosts).await
    } else {
        parsed
    };

    result.verified_subset = collect_verified(records, &env.exclusions);
    result.hosts = hosts.to_vec();
    result
}

/// Fallback liveness check: `https://` then `http://`, anything but 404
/// counts. Network failures mean "not live".
async fn probe_directly(env: &PhaseEnv, hosts: &[String]) -> Vec<ProbeRecord> {
    let limit = env.pool_limit(hosts.len());
    stream::iter(hosts.iter().cloned())
        .map(|host| async move {
            for scheme in ["https", "http"] {
                let target = format!("{scheme}://{host}");
                if let Some(record) = fetch(env, &target).await {
                    return Some(record);
                }
            }
            None
        })
        .buffer_unordered(limit)
        .filter_map(|r| async move { r })
        .collect()
        .await
}

async fn fetch(env: &PhaseEnv, target: &str) -> Option<ProbeRecord> {
    let mut request = env
        .client
        .get(target)
        .header(header::USER_AGENT, env.disguise.user_agent());
    for (name, value) in env.disguise.headers() {
        request = request.header(name, value);
    }
    let response = request.send().await.ok()?;
    let status = response.status().as_u16();
    if status == 404 {
        return None;
    }
    let text_header = |name: header::HeaderName| {
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    Some(ProbeRecord {
        url: target.to_string(),
        status_code: Some(status),
        last_modified: text_header(header::LAST_MODIFIED),
        content_length: response.content_length(),
        title: None,
        webserver: text_header(header::SERVER),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::Exclusions;

    fn record(url: &str) -> ProbeRecord {
        ProbeRecord {
            url: url.to_string(),
            status_code: Some(200),
            ..ProbeRecord::default()
        }
    }

    #[test]
    fn verified_set_is_canonical_and_scoped() {
        let ex = Exclusions::new(&["admin.x.com".to_string()]);
        let got = collect_verified(
            vec![
                record("https://b.x.com/"),
                record("HTTPS://a.x.com"),
                record("https://b.x.com"),
                record("https://admin.x.com"),
                record("not a url"),
            ],
            &ex,
        );
        let urls: Vec<&str> = got.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(urls, vec!["https://a.x.com", "https://b.x.com"]);
    }
}
