use crate::aggregator::HostAggregator;
use crate::normalizer;
use crate::process::ToolInvocation;
use crate::tools::{Scope, ToolPhase};

use super::{PhaseEnv, PhaseResult, PhaseState};

const STATE: PhaseState = PhaseState::SubdomainDiscovery;

/// Keeps `host` when it is the domain itself or one of its subdomains.
pub fn in_scope(host: &str, domain: &str) -> bool {
    host == domain || host.ends_with(&format!(".{domain}"))
}

pub async fn run(env: &PhaseEnv) -> PhaseResult {
    let specs = env.selected(ToolPhase::Subdomain);
    if specs.is_empty() {
        return PhaseResult::skipped(STATE, "no subdomain tools enabled");
    }
    if env.target.is_ip() {
        let mut result = PhaseResult::skipped(STATE, "IP target, subdomain discovery skipped");
        result.hosts.push(env.target.host().to_string());
        return result;
    }

    let domain = env.target.domain();
    let tasks: Vec<ToolInvocation> = specs
        .iter()
        .filter(|spec| spec.scope == Scope::Domain)
        .map(|spec| {
            let ctx = env.context(domain);
            env.invocation(spec, &ctx, STATE)
        })
        .collect();

    let run = env
        .scheduler
        .run_phase(STATE.label(), tasks.clone(), env.pool_limit(tasks.len()))
        .await;

    let hosts = HostAggregator::new();
    for outcome in &run.outcomes {
        for line in outcome.stdout_lines() {
            if let Some(record) = normalizer::parse_host(line, &outcome.tool, domain) {
                if in_scope(&record.host, domain) && !env.exclusions.is_excluded(&record.host) {
                    hosts.merge(&record.host, None);
                }
            }
        }
    }

    let mut result = PhaseResult::empty(STATE);
    result.record_run(&tasks, &run);
    result.hosts = hosts.snapshot().into_keys().collect();
    tracing::info!(phase = STATE.label(), hosts = result.hosts.len(), "subdomains collected");
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_check_requires_label_boundary() {
        assert!(in_scope("example.com", "example.com"));
        assert!(in_scope("a.b.example.com", "example.com"));
        assert!(!in_scope("badexample.com", "example.com"));
        assert!(!in_scope("example.com.evil.io", "example.com"));
    }
}
