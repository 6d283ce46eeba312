use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Default, Deserialize, Serialize, Clone, PartialEq)]
pub struct ConfigFile {
    pub target: Option<String>,
    pub input_file: Option<String>,
    #[serde(alias = "output")]
    pub output_dir: Option<String>,
    pub log_file: Option<String>,

    pub threads: Option<usize>,
    pub timeout: Option<u64>,
    pub safe_mode: Option<bool>,
    pub auto_safe_mode: Option<bool>,

    pub proxy: Option<String>,
    pub header: Option<String>,
    pub user_agents_file: Option<String>,

    pub wordlist_subdomains: Option<String>,
    pub wordlist_dirs: Option<String>,
    pub wordlist_dirs_small: Option<String>,
    pub resolvers: Option<String>,
    pub tech_wordlists: Option<BTreeMap<String, String>>,

    pub recursion_depth: Option<u32>,
    pub crawl_depth: Option<u32>,
    pub exclude: Option<Vec<String>>,

    pub phase1_tools: Option<Vec<String>>,
    pub phase2_tools: Option<Vec<String>>,
    pub phase3_tools: Option<Vec<String>>,
    pub phase4_tools: Option<Vec<String>>,
    pub port_scan: Option<bool>,

    pub nmap_strategy: Option<String>,
    pub nmap_scripts: Option<String>,
    pub nmap_aggressive: Option<bool>,
    pub puredns_rate: Option<u32>,
    pub httpx_rate: Option<u32>,
    pub naabu_rate: Option<u32>,
    pub masscan_rate: Option<u32>,
    pub naabu_source_port: Option<u16>,

    pub headless: Option<bool>,
    pub auto_form_fill: Option<bool>,
    pub ignored_extensions: Option<Vec<String>>,

    pub no_color: Option<bool>,
}

fn home_dir() -> Option<PathBuf> {
    env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(|| env::var_os("USERPROFILE").map(PathBuf::from))
        .or_else(|| {
            let drive = env::var_os("HOMEDRIVE")?;
            let path = env::var_os("HOMEPATH")?;
            Some(PathBuf::from(drive).join(path))
        })
}

pub fn default_config_path() -> Option<PathBuf> {
    Some(home_dir()?.join(".reconductor").join("config.yml"))
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/").or_else(|| path.strip_prefix("~\\")) {
        if let Some(home) = home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

pub fn expand_tilde_string(path: &str) -> String {
    expand_tilde(path).to_string_lossy().to_string()
}

pub fn parse_config(contents: &str, origin: &Path) -> Result<ConfigFile, String> {
    serde_yaml::from_str::<Option<ConfigFile>>(contents)
        .map(Option::unwrap_or_default)
        .map_err(|e| format!("failed to parse config '{}': {e}", origin.display()))
}

pub fn load_config(path: &Path, allow_missing: bool) -> Result<ConfigFile, String> {
    match std::fs::read_to_string(path) {
        Ok(contents) => parse_config(&contents, path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && allow_missing => {
            Ok(ConfigFile::default())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(format!("config file not found '{}'", path.display()))
        }
        Err(e) => Err(format!("failed to read config '{}': {e}", path.display())),
    }
}

fn default_config_yaml() -> String {
    r#"# reconductor config
#
# Location (default):
#   ~/.reconductor/config.yml
#
# Command-line flags override every value here.

# Target (or pass -t on the command line)
# target: example.com
# input_file: ./targets.txt

# Output
output_dir: .
# log_file: ./reconductor.log

# Performance
threads: 40
timeout: 1800

# Safe mode (lower rates, one thread per tool, randomized headers).
# auto_safe_mode turns it on when a WAF is fingerprinted.
safe_mode: false
auto_safe_mode: true

# HTTP (optional)
# proxy: http://127.0.0.1:8080
# header: "X-Bug-Bounty: handle"
# user_agents_file: ./user_agents.txt

# Wordlists
wordlist_subdomains: /usr/share/seclists/Discovery/DNS/subdomains-top1million-20000.txt
wordlist_dirs: /usr/share/dirb/wordlists/common.txt
wordlist_dirs_small: /usr/share/seclists/Discovery/Web-Content/DirBuster-2007_directory-list-2.3-small.txt
# resolvers: ./resolvers.txt
# tech_wordlists:
#   wordpress: /usr/share/seclists/Discovery/Web-Content/CMS/wordpress.fuzz.txt

recursion_depth: 1
crawl_depth: 2

# Out-of-scope hosts: exact host, *.suffix or URL prefix
exclude: []

# Tools per phase
phase1_tools: [subfinder, assetfinder, findomain, puredns]
# phase2_tools: [naabu, nmap]
phase3_tools: [ffuf, feroxbuster, dirsearch, gobuster]
phase4_tools: [katana, hakrawler, paramspider, gauplus, linkfinder]
port_scan: false

# Port scanning
nmap_strategy: top1000
# nmap_scripts: default
nmap_aggressive: false
puredns_rate: 1000
httpx_rate: 150
naabu_rate: 1000
masscan_rate: 300
# naabu_source_port: 53

# Crawling
headless: false
auto_form_fill: false
ignored_extensions: [png, jpg, jpeg, gif, svg, bmp, ico, css, js, map, woff, woff2, ttf, eot]

no_color: false
"#
    .to_string()
}

pub fn ensure_default_config_file(path: &Path) -> Result<(), String> {
    if path.exists() {
        return Ok(());
    }
    let parent = path
        .parent()
        .ok_or_else(|| format!("invalid config path '{}'", path.display()))?;
    std::fs::create_dir_all(parent).map_err(|e| {
        format!(
            "failed to create config directory '{}': {e}",
            parent.display()
        )
    })?;
    let contents = default_config_yaml();
    std::fs::write(path, contents)
        .map_err(|e| format!("failed to write config file '{}': {e}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_parses_to_defaults() {
        let cfg = parse_config(&default_config_yaml(), Path::new("template")).unwrap();
        assert_eq!(cfg.threads, Some(40));
        assert_eq!(cfg.timeout, Some(1800));
        assert_eq!(cfg.auto_safe_mode, Some(true));
        assert_eq!(cfg.port_scan, Some(false));
        assert_eq!(cfg.phase3_tools.as_ref().map(Vec::len), Some(4));
        assert!(cfg.phase2_tools.is_none());
        assert_eq!(cfg.ignored_extensions.as_ref().map(Vec::len), Some(14));
    }

    #[test]
    fn output_alias_and_tech_map() {
        let cfg = parse_config(
            "output: /tmp/out\ntech_wordlists:\n  drupal: ~/d.txt\n",
            Path::new("x"),
        )
        .unwrap();
        assert_eq!(cfg.output_dir.as_deref(), Some("/tmp/out"));
        assert_eq!(
            cfg.tech_wordlists.unwrap().get("drupal").map(String::as_str),
            Some("~/d.txt")
        );
    }

    #[test]
    fn missing_file_handling() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.yml");
        assert!(load_config(&path, true).is_ok());
        assert!(load_config(&path, false).is_err());

        let path = dir.path().join("sub").join("config.yml");
        ensure_default_config_file(&path).unwrap();
        assert!(load_config(&path, false).unwrap().threads.is_some());
    }

    #[test]
    fn tilde_expansion() {
        assert_eq!(expand_tilde("/abs/path"), PathBuf::from("/abs/path"));
        if let Some(home) = home_dir() {
            assert_eq!(expand_tilde("~/x.txt"), home.join("x.txt"));
        }
    }
}
