use std::sync::{Arc, Barrier};
use std::time::Duration;

use crate::aggregator::ResultAggregator;
use crate::normalizer::{self, Category, NormalizedRecord};
use crate::process::{ProcessRegistry, ToolInvocation};
use crate::scheduler::{Scheduler, TaskStatus};

fn record(url: &str, tool: &str) -> NormalizedRecord {
    NormalizedRecord {
        url: url.to_string(),
        status_code: Some(200),
        content_length: None,
        source_tool: tool.to_string(),
        category: normalizer::categorize(url),
    }
}

#[cfg(unix)]
#[tokio::test]
async fn phase_survives_timeouts_and_failing_tools() {
    let urls = "printf 'https://a.example/x\\nhttps://a.example/y?id=1\\nhttps://a.example/app.js\\n'";
    let tasks = vec![
        ToolInvocation::shell("katana", format!("{urls}; exit 3"), "https://t1.example", Duration::from_secs(10)),
        ToolInvocation::shell("hakrawler", "sleep 5", "https://t1.example", Duration::from_millis(200)),
        ToolInvocation::shell("katana", "printf 'https://a.example/x\\n'", "https://t2.example", Duration::from_secs(10)),
        ToolInvocation::shell("hakrawler", "true", "https://t2.example", Duration::from_secs(10)),
    ];

    let aggregator = Arc::new(ResultAggregator::new());
    let run = Scheduler::new(ProcessRegistry::new())
        .run_phase_into("crawl", tasks, 3, aggregator.clone(), |_| true)
        .await;

    assert_eq!(run.outcomes.len(), 4);
    assert_eq!(run.progress.completed(), 4);
    assert_eq!(run.progress.total(), 4);
    assert_eq!(run.outcomes[0].status, TaskStatus::NonZeroExit(Some(3)));
    assert_eq!(run.outcomes[1].status, TaskStatus::TimedOut);
    assert_eq!(run.count(|s| *s == TaskStatus::Completed), 2);

    let results = aggregator.snapshot();
    assert_eq!(results.all.len(), 3);
    assert_eq!(results.parameters, vec!["https://a.example/y?id=1"]);
    assert_eq!(results.js_files, vec!["https://a.example/app.js"]);
}

#[cfg(unix)]
#[tokio::test]
async fn missing_binary_is_a_failed_task_not_a_failed_phase() {
    let tasks = vec![
        ToolInvocation::new("katana", "definitely-not-installed-xyz", vec![], "https://t.example", Duration::from_secs(5)),
        ToolInvocation::shell("hakrawler", "printf 'https://t.example/login\\n'", "https://t.example", Duration::from_secs(5)),
    ];
    let aggregator = Arc::new(ResultAggregator::new());
    let run = Scheduler::new(ProcessRegistry::new())
        .run_phase_into("crawl", tasks, 2, aggregator.clone(), |_| true)
        .await;

    assert!(matches!(run.outcomes[0].status, TaskStatus::LaunchFailed(_)));
    assert_eq!(run.outcomes[1].status, TaskStatus::Completed);
    assert_eq!(aggregator.snapshot().all, vec!["https://t.example/login"]);
}

#[test]
fn concurrent_merges_lose_nothing() {
    let aggregator = ResultAggregator::new();
    let start = Barrier::new(8);
    std::thread::scope(|scope| {
        for worker in 0..8 {
            let aggregator = &aggregator;
            let start = &start;
            scope.spawn(move || {
                start.wait();
                for i in 0..50 {
                    aggregator.merge(record(&format!("https://c.example/w{worker}/p{i}"), "ffuf"));
                    // every worker also reports a shared URL
                    aggregator.merge(record("https://c.example/shared", "ffuf"));
                }
            });
        }
    });
    assert_eq!(aggregator.snapshot().all.len(), 8 * 50 + 1);
}

#[test]
fn merging_twice_changes_nothing() {
    let aggregator = ResultAggregator::new();
    let batch = vec![
        record("https://m.example/admin", "ffuf"),
        record("https://m.example/api/v1/users", "gobuster"),
        record("https://m.example/search?q=1", "katana"),
    ];
    for r in &batch {
        aggregator.merge(r.clone());
    }
    let first = aggregator.snapshot();
    for r in batch {
        aggregator.merge(r);
    }
    assert_eq!(aggregator.snapshot(), first);
}

#[tokio::test]
async fn unreachable_target_has_no_baseline() {
    let client = crate::baseline::probe_client(None).unwrap();
    let baseline = crate::baseline::probe(&client, "http://127.0.0.1:9", "reconductor-test").await;
    assert!(baseline.is_none());

    let options = crate::runner::Options::default();
    let profile = crate::stealth::SafeModeProfile::resolve(&options, false);
    let mut ctx = crate::tools::ToolContext::new("http://127.0.0.1:9", &options, &profile);
    ctx.baseline = baseline.as_ref();
    let args = crate::tools::lookup("ffuf").unwrap().args(&ctx);
    assert!(args.iter().any(|a| a == "http://127.0.0.1:9/FUZZ"));
    assert!(!args.iter().any(|a| a == "-fs" || a == "-fc"));
}

#[test]
fn normalized_urls_are_absolute_or_interesting() {
    let lines = [
        ("ffuf", "admin [Status: 200, Size: 1234, Words: 10, Lines: 5, Duration: 3ms]"),
        ("gobuster", "/backup (Status: 301) [Size: 0] [--> https://n.example/backup/]"),
        ("katana", "https://n.example/static/app.js"),
        ("linkfinder", "/api/v2/orders"),
        ("katana", "not a url at all"),
    ];
    for (tool, line) in lines {
        if let Some(r) = normalizer::parse(line, tool, "https://n.example") {
            assert!(
                normalizer::url::is_absolute(&r.url) || r.category == Category::InterestingPaths,
                "{tool}: {line} -> {r:?}"
            );
        }
    }
}

#[test]
fn categorization_examples() {
    assert_eq!(normalizer::categorize("https://e.example/item?id=4"), Category::Parameters);
    assert_eq!(normalizer::categorize("https://e.example/main.js"), Category::JsFiles);
    assert_eq!(normalizer::categorize("https://e.example/api/users"), Category::ApiEndpoints);
    assert_eq!(normalizer::categorize("https://e.example/.env"), Category::InterestingPaths);
    assert_eq!(normalizer::categorize("https://e.example/about"), Category::All);
}
