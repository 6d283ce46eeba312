use std::collections::BTreeSet;
use std::net::IpAddr;

use futures::future::join_all;
use itertools::iproduct;

use crate::aggregator::HostAggregator;
use crate::normalizer;
use crate::process::ToolInvocation;
use crate::scheduler::PhaseRun;
use crate::tools::ToolPhase;

use super::{PhaseEnv, PhaseResult, PhaseState};

const STATE: PhaseState = PhaseState::PortScan;

/// Resolves each host once; literals pass through, lookup failures are
/// dropped.
pub async fn resolve_hosts(hosts: &[String]) -> Vec<IpAddr> {
    let lookups = hosts.iter().map(|host| async move {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return vec![ip];
        }
        match tokio::net::lookup_host((host.as_str(), 0)).await {
            Ok(addrs) => addrs.map(|a| a.ip()).collect(),
            Err(e) => {
                tracing::debug!(phase = STATE.label(), host = %host, "resolution failed: {e}");
                Vec::new()
            }
        }
    });
    let unique: BTreeSet<IpAddr> = join_all(lookups).await.into_iter().flatten().collect();
    unique.into_iter().collect()
}

fn merge_ports(run: &PhaseRun, found: &HostAggregator) {
    for outcome in &run.outcomes {
        for line in outcome.stdout_lines() {
            if let Some(record) = normalizer::parse_host(line, &outcome.tool, &outcome.target) {
                found.merge(&record.host, record.port);
            }
        }
    }
}

/// Port discovery per IP, then service detection restricted to what
/// discovery found.
pub async fn run(env: &PhaseEnv, hosts: &[String]) -> PhaseResult {
    let specs = env.selected(ToolPhase::PortScan);
    if specs.is_empty() {
        return PhaseResult::skipped(STATE, "no port scan tools enabled");
    }
    let ips: Vec<String> = resolve_hosts(hosts)
        .await
        .into_iter()
        .map(|ip| ip.to_string())
        .collect();
    if ips.is_empty() {
        return PhaseResult::skipped(STATE, "no host resolved to an address");
    }

    let (service, discovery): (Vec<_>, Vec<_>) = specs.into_iter().partition(|s| s.id == "nmap");
    let found = HostAggregator::new();
    let mut result = PhaseResult::empty(STATE);

    if !discovery.is_empty() {
        let tasks: Vec<ToolInvocation> = iproduct!(ips.iter(), discovery.iter())
            .map(|(ip, spec)| {
                let ctx = env.context(ip);
                env.invocation(spec, &ctx, STATE)
            })
            .collect();
        let run = env
            .scheduler
            .run_phase("port-discovery", tasks.clone(), env.pool_limit(tasks.len()))
            .await;
        result.record_run(&tasks, &run);
        merge_ports(&run, &found);
    }

    if !service.is_empty() && !env.is_interrupted() {
        let port_lists: Vec<(String, Vec<u16>)> = ips
            .iter()
            .map(|ip| (ip.clone(), found.ports_of(ip)))
            // with discovery enabled, an IP with no open port needs no service scan
            .filter(|(_, ports)| discovery.is_empty() || !ports.is_empty())
            .collect();
        let tasks: Vec<ToolInvocation> = iproduct!(port_lists.iter(), service.iter())
            .map(|((ip, ports), spec)| {
                let mut ctx = env.context(ip);
                ctx.ports = ports.as_slice();
                env.invocation(spec, &ctx, STATE)
            })
            .collect();
        let run = env
            .scheduler
            .run_phase("service-scan", tasks.clone(), env.pool_limit(tasks.len()))
            .await;
        result.record_run(&tasks, &run);
        merge_ports(&run, &found);
    }

    result.hosts = ips;
    result.open_ports = found
        .snapshot()
        .into_iter()
        .filter(|(_, ports)| !ports.is_empty())
        .collect();
    result
}
