use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use rand::seq::SliceRandom;
use rand::Rng;
use tempfile::NamedTempFile;

use crate::runner::Options;

const BROWSER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:95.0) Gecko/20100101 Firefox/95.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36 Edg/124.0.2478.80",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_4 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Mobile/15E148 Safari/604.1",
    "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Mobile Safari/537.36",
];

const ACCEPT_VALUES: &[&str] = &[
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
    "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
    "application/json, text/plain, */*",
];

const ACCEPT_LANGUAGES: &[&str] = &[
    "en-US,en;q=0.9",
    "en-GB,en;q=0.8",
    "de-DE,de;q=0.9,en;q=0.7",
    "fr-FR,fr;q=0.9,en;q=0.6",
    "pl-PL,pl;q=0.9,en-US;q=0.7",
];

const REFERERS: &[&str] = &[
    "https://www.google.com/",
    "https://www.bing.com/",
    "https://duckduckgo.com/",
];

const CACHE_CONTROL: &[&str] = &["no-cache", "max-age=0"];

const NORMAL_ROTATION: usize = 50;

pub fn random_user_agent() -> String {
    BROWSER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(BROWSER_AGENTS[0])
        .to_string()
}

/// Browser-like header set, different on every call.
pub fn random_headers() -> Vec<(String, String)> {
    let mut rng = rand::thread_rng();
    let mut pick = |values: &[&str]| values.choose(&mut rng).copied().unwrap_or_default().to_string();
    let accept = pick(ACCEPT_VALUES);
    let language = pick(ACCEPT_LANGUAGES);
    let referer = pick(REFERERS);
    let cache = pick(CACHE_CONTROL);
    let session: String = (0..32)
        .map(|_| format!("{:x}", rand::thread_rng().gen_range(0..16u8)))
        .collect();
    vec![
        ("Accept".to_string(), accept),
        ("Accept-Language".to_string(), language),
        ("Referer".to_string(), referer),
        ("DNT".to_string(), "1".to_string()),
        ("Cache-Control".to_string(), cache),
        ("Cookie".to_string(), format!("sessionid={session}")),
    ]
}

/// Hands out User-Agents, switching to a random one every `rotate_every`
/// calls.
#[derive(Debug)]
pub struct UserAgentPool {
    agents: Vec<String>,
    rotate_every: usize,
    calls: AtomicUsize,
    current: AtomicUsize,
}

impl UserAgentPool {
    pub fn new(agents: Vec<String>, rotate_every: usize) -> Self {
        let agents = if agents.is_empty() {
            BROWSER_AGENTS.iter().map(|s| s.to_string()).collect()
        } else {
            agents
        };
        Self {
            agents,
            rotate_every: rotate_every.max(1),
            calls: AtomicUsize::new(0),
            current: AtomicUsize::new(0),
        }
    }

    /// One agent per line; blank lines and `#` comments are skipped.
    pub async fn from_file(path: &Path, rotate_every: usize) -> std::io::Result<Self> {
        let contents = tokio::fs::read_to_string(path).await?;
        let agents = contents
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(str::to_string)
            .collect();
        Ok(Self::new(agents, rotate_every))
    }

    /// Same agents, fresh counters and a new rotation period.
    pub fn with_rotation(&self, rotate_every: usize) -> Self {
        Self::new(self.agents.clone(), rotate_every)
    }

    pub fn next(&self) -> String {
        let n = self.calls.fetch_add(1, Ordering::Relaxed);
        if n % self.rotate_every == 0 {
            let idx = rand::thread_rng().gen_range(0..self.agents.len());
            self.current.store(idx, Ordering::Relaxed);
        }
        self.agents[self.current.load(Ordering::Relaxed) % self.agents.len()].clone()
    }
}

/// Per-invocation User-Agent and extra headers.
#[derive(Debug)]
pub struct Disguise {
    agents: UserAgentPool,
    randomize_headers: bool,
    custom_header: Option<(String, String)>,
}

impl Disguise {
    pub fn new(agents: UserAgentPool, safe_mode: bool, custom_header: Option<(String, String)>) -> Self {
        Self {
            agents,
            randomize_headers: safe_mode,
            custom_header,
        }
    }

    pub fn user_agent(&self) -> String {
        match &self.custom_header {
            Some((name, value)) if name.eq_ignore_ascii_case("user-agent") => value.clone(),
            _ => self.agents.next(),
        }
    }

    pub fn headers(&self) -> Vec<(String, String)> {
        let mut headers = if self.randomize_headers {
            random_headers()
        } else {
            Vec::new()
        };
        if let Some((name, value)) = &self.custom_header {
            if !name.eq_ignore_ascii_case("user-agent") {
                headers.push((name.clone(), value.clone()));
            }
        }
        headers
    }
}

/// Splits a `Key: Value` header string.
pub fn parse_header(raw: &str) -> Option<(String, String)> {
    let (name, value) = raw.split_once(':')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), value.trim().to_string()))
}

/// Copies a wordlist into a temporary file in random order.
pub fn shuffled_wordlist(path: &Path) -> std::io::Result<NamedTempFile> {
    let contents = std::fs::read_to_string(path)?;
    let mut words: Vec<&str> = contents
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    words.shuffle(&mut rand::thread_rng());
    let mut file = tempfile::Builder::new()
        .prefix("reconductor_wl_")
        .suffix(".txt")
        .tempfile()?;
    for word in words {
        writeln!(file, "{word}")?;
    }
    file.flush()?;
    Ok(file)
}

/// Rates and limits for one run. Computed once; every phase reads it when
/// it starts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SafeModeProfile {
    pub enabled: bool,
    pub tool_threads: usize,
    pub max_parallel: usize,
    pub dispatch_interval: Option<Duration>,
    pub rotate_every: usize,
    pub puredns_rate: u32,
    pub httpx_rate: u32,
    pub naabu_rate: u32,
    pub masscan_rate: u32,
    pub nmap_timing: &'static str,
    pub crawler_rate: Option<u32>,
    pub ffuf_rate: Option<u32>,
    pub ferox_rate: Option<u32>,
}

impl SafeModeProfile {
    pub fn resolve(options: &Options, enabled: bool) -> Self {
        if !enabled {
            return Self {
                enabled,
                tool_threads: options.threads.max(1),
                max_parallel: options.threads.max(1),
                dispatch_interval: None,
                rotate_every: NORMAL_ROTATION,
                puredns_rate: options.puredns_rate,
                httpx_rate: options.httpx_rate,
                naabu_rate: options.naabu_rate,
                masscan_rate: options.masscan_rate,
                nmap_timing: "-T4",
                crawler_rate: None,
                ffuf_rate: None,
                ferox_rate: None,
            };
        }
        Self {
            enabled,
            tool_threads: 1,
            max_parallel: 2,
            dispatch_interval: Some(Duration::from_secs(2)),
            rotate_every: 1,
            puredns_rate: options.puredns_rate.min(50),
            httpx_rate: options.httpx_rate.min(10),
            naabu_rate: options.naabu_rate.min(100),
            masscan_rate: options.masscan_rate.min(100),
            nmap_timing: "-T2",
            crawler_rate: Some(5),
            ffuf_rate: Some(50),
            ferox_rate: Some(10),
        }
    }

    /// Worker count for a phase with `tasks` invocations.
    pub fn pool_limit(&self, tasks: usize) -> usize {
        tasks.min(self.max_parallel).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn safe_profile_lowers_limits() {
        let options = Options::default();
        let normal = SafeModeProfile::resolve(&options, false);
        let safe = SafeModeProfile::resolve(&options, true);
        assert_eq!(normal.tool_threads, 40);
        assert_eq!(safe.tool_threads, 1);
        assert_eq!(normal.pool_limit(100), 40);
        assert_eq!(safe.pool_limit(100), 2);
        assert_eq!(safe.pool_limit(0), 1);
        assert!(safe.puredns_rate < normal.puredns_rate);
        assert!(safe.httpx_rate < normal.httpx_rate);
        assert_eq!(safe.nmap_timing, "-T2");
    }

    #[test]
    fn random_headers_have_browser_shape() {
        let headers = random_headers();
        let names: HashSet<&str> = headers.iter().map(|(k, _)| k.as_str()).collect();
        for expected in ["Accept", "Accept-Language", "Referer", "DNT", "Cache-Control", "Cookie"] {
            assert!(names.contains(expected), "missing {expected}");
        }
        let cookie = &headers.iter().find(|(k, _)| k == "Cookie").unwrap().1;
        assert_eq!(cookie.len(), "sessionid=".len() + 32);
    }

    #[test]
    fn pool_keeps_agent_between_rotations() {
        let pool = UserAgentPool::new(vec!["a".into(), "b".into(), "c".into()], 3);
        let first = pool.next();
        assert_eq!(pool.next(), first);
        assert_eq!(pool.next(), first);
    }

    #[tokio::test]
    async fn agents_file_skips_comments_and_blanks() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"# mine\n\nagent-one\n  \nagent-one\n").unwrap();
        let pool = UserAgentPool::from_file(file.path(), 1).await.unwrap();
        assert_eq!(pool.next(), "agent-one");
        let rotated = pool.with_rotation(5);
        assert_eq!(rotated.next(), "agent-one");
        assert!(UserAgentPool::from_file(Path::new("/no/such/agents.txt"), 1).await.is_err());
    }

    #[test]
    fn custom_user_agent_header_overrides_pool() {
        let disguise = Disguise::new(
            UserAgentPool::new(vec![], 1),
            true,
            parse_header("User-Agent: integrity-check"),
        );
        assert_eq!(disguise.user_agent(), "integrity-check");
        assert!(disguise.headers().iter().all(|(k, _)| k != "User-Agent"));
        assert_eq!(disguise.headers().len(), 6);
    }

    #[test]
    fn header_parsing() {
        assert_eq!(
            parse_header("X-Bug-Bounty: alice"),
            Some(("X-Bug-Bounty".to_string(), "alice".to_string()))
        );
        assert!(parse_header("novalue").is_none());
        assert!(parse_header(": v").is_none());
    }

    #[test]
    fn shuffled_wordlist_keeps_every_word() {
        let mut src = NamedTempFile::new().unwrap();
        writeln!(src, "admin\nlogin\n\nbackup\n").unwrap();
        let shuffled = shuffled_wordlist(src.path()).unwrap();
        let contents = std::fs::read_to_string(shuffled.path()).unwrap();
        let mut words: Vec<&str> = contents.lines().collect();
        words.sort();
        assert_eq!(words, vec!["admin", "backup", "login"]);
    }
}
