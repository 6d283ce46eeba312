use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;

use crate::normalizer::{url, Category, NormalizedRecord};

/// Sorted, de-duplicated URLs per category.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AggregatedResultSet {
    pub all: Vec<String>,
    pub parameters: Vec<String>,
    pub js_files: Vec<String>,
    pub api_endpoints: Vec<String>,
    pub interesting_paths: Vec<String>,
}

impl AggregatedResultSet {
    pub fn bucket(&self, category: Category) -> &[String] {
        match category {
            Category::All => &self.all,
            Category::Parameters => &self.parameters,
            Category::JsFiles => &self.js_files,
            Category::ApiEndpoints => &self.api_endpoints,
            Category::InterestingPaths => &self.interesting_paths,
        }
    }

    fn bucket_mut(&mut self, category: Category) -> &mut Vec<String> {
        match category {
            Category::All => &mut self.all,
            Category::Parameters => &mut self.parameters,
            Category::JsFiles => &mut self.js_files,
            Category::ApiEndpoints => &mut self.api_endpoints,
            Category::InterestingPaths => &mut self.interesting_paths,
        }
    }

    pub fn is_empty(&self) -> bool {
        Category::ALL.iter().all(|c| self.bucket(*c).is_empty())
    }
}

/// Status and size first reported for a URL.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub url: String,
    pub status_code: Option<u16>,
    pub content_length: Option<u64>,
    pub source_tool: String,
}

#[derive(Debug, Default)]
struct Buckets {
    by_category: HashMap<Category, BTreeSet<String>>,
    findings: BTreeMap<String, Finding>,
}

/// Collector shared by every in-flight invocation of a phase.
#[derive(Debug, Default)]
pub struct ResultAggregator {
    inner: Mutex<Buckets>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Buckets> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn merge(&self, record: NormalizedRecord) {
        let mut buckets = self.lock();
        if url::is_absolute(&record.url) {
            let entry = buckets
                .findings
                .entry(record.url.clone())
                .or_insert_with(|| Finding {
                    url: record.url.clone(),
                    status_code: None,
                    content_length: None,
                    source_tool: record.source_tool.clone(),
                });
            if entry.status_code.is_none() {
                entry.status_code = record.status_code;
            }
            if entry.content_length.is_none() {
                entry.content_length = record.content_length;
            }
        }
        buckets
            .by_category
            .entry(record.category)
            .or_default()
            .insert(record.url);
    }

    /// Total entries across buckets, before the `all` union is taken.
    pub fn len(&self) -> usize {
        self.lock().by_category.values().map(|b| b.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Each bucket sorted; `all` also picks up every absolute URL filed
    /// elsewhere. Relative paths stay out of `all`.
    pub fn snapshot(&self) -> AggregatedResultSet {
        let buckets = self.lock();
        let mut out = AggregatedResultSet::default();
        let mut all: BTreeSet<String> = BTreeSet::new();
        for (category, urls) in buckets.by_category.iter() {
            *out.bucket_mut(*category) = urls.iter().cloned().collect();
            if *category == Category::All {
                all.extend(urls.iter().cloned());
            } else {
                all.extend(urls.iter().filter(|u| url::is_absolute(u)).cloned());
            }
        }
        out.all = all.into_iter().collect();
        out
    }

    pub fn findings(&self) -> Vec<Finding> {
        self.lock().findings.values().cloned().collect()
    }
}

/// Open ports per host, filled by the port-scan phase.
#[derive(Debug, Default)]
pub struct HostAggregator {
    inner: Mutex<BTreeMap<String, BTreeSet<u16>>>,
}

impl HostAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge(&self, host: &str, port: Option<u16>) {
        let mut hosts = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let ports = hosts.entry(host.to_string()).or_default();
        if let Some(port) = port {
            ports.insert(port);
        }
    }

    pub fn ports_of(&self, host: &str) -> Vec<u16> {
        self.inner
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(host)
            .map(|ports| ports.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> BTreeMap<String, Vec<u16>> {
        self.inner
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .map(|(host, ports)| (host.clone(), ports.iter().copied().collect()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(url: &str, category: Category) -> NormalizedRecord {
        NormalizedRecord {
            url: url.to_string(),
            status_code: Some(200),
            content_length: None,
            source_tool: "katana".to_string(),
            category,
        }
    }

    #[test]
    fn merging_twice_keeps_one_entry() {
        let agg = ResultAggregator::new();
        agg.merge(record("https://x.com/a", Category::All));
        agg.merge(record("https://x.com/a", Category::All));
        assert_eq!(agg.snapshot().all, vec!["https://x.com/a".to_string()]);
        assert_eq!(agg.len(), 1);
    }

    #[test]
    fn all_is_union_of_absolute_urls() {
        let agg = ResultAggregator::new();
        agg.merge(record("https://x.com/z", Category::All));
        agg.merge(record("https://x.com/app.js", Category::JsFiles));
        agg.merge(record("https://x.com/p?id=1", Category::Parameters));
        agg.merge(record("/internal/admin", Category::InterestingPaths));
        let snap = agg.snapshot();
        assert_eq!(
            snap.all,
            vec![
                "https://x.com/app.js".to_string(),
                "https://x.com/p?id=1".to_string(),
                "https://x.com/z".to_string(),
            ]
        );
        assert_eq!(snap.interesting_paths, vec!["/internal/admin".to_string()]);
        assert_eq!(snap.bucket(Category::JsFiles).len(), 1);
    }

    #[test]
    fn findings_keep_first_known_metadata() {
        let agg = ResultAggregator::new();
        let mut first = record("https://x.com/a", Category::All);
        first.status_code = None;
        agg.merge(first);
        let mut second = record("https://x.com/a", Category::All);
        second.content_length = Some(42);
        agg.merge(second);
        let findings = agg.findings();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].status_code, Some(200));
        assert_eq!(findings[0].content_length, Some(42));
    }

    #[test]
    fn host_ports_are_sorted_and_unique() {
        let hosts = HostAggregator::new();
        hosts.merge("10.0.0.1", Some(443));
        hosts.merge("10.0.0.1", Some(80));
        hosts.merge("10.0.0.1", Some(443));
        hosts.merge("10.0.0.2", None);
        assert_eq!(hosts.ports_of("10.0.0.1"), vec![80, 443]);
        let snap = hosts.snapshot();
        assert_eq!(snap.len(), 2);
        assert!(snap["10.0.0.2"].is_empty());
    }
}
