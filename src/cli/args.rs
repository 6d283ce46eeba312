use clap::{ArgAction, Parser};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "reconductor",
    version,
    about = "multi-phase recon orchestration engine",
    long_about = "Reconductor drives external recon tools phase by phase (subdomains, liveness, ports, directory search, crawl), normalizes their output and feeds each phase's verified results into the next.\n\nExamples:\n  reconductor -t example.com\n  reconductor -t example.com --p3 ffuf,feroxbuster --p4 katana --safe-mode\n  reconductor -t 10.0.0.5 --port-scan --p2 naabu,nmap\n  reconductor -t example.com --config ~/.reconductor/config.yml\n\nTip: Use --config to persist tool choices and wordlists and keep CLI invocations short."
)]
pub struct CliArgs {
    #[arg(
        short = 'v',
        long = "verbose",
        action = ArgAction::Count,
        help_heading = "Output",
        help = "Increase console verbosity (-v info, -vv debug)."
    )]
    pub verbose: u8,

    #[arg(
        short = 't',
        long = "target",
        value_name = "HOST",
        action = ArgAction::Append,
        help_heading = "Input",
        help = "Target domain, IP or URL (repeatable)."
    )]
    pub target: Vec<String>,

    #[arg(
        short = 'i',
        long = "input-file",
        visible_alias = "if",
        value_name = "FILE",
        help_heading = "Input",
        help = "Load targets from a file (one per line)."
    )]
    pub input_file: Option<String>,

    #[arg(
        long = "exclude",
        visible_alias = "ex",
        value_name = "PATTERN",
        action = ArgAction::Append,
        help_heading = "Input",
        help = "Out-of-scope host, *.suffix or URL prefix (repeatable)."
    )]
    pub exclude: Vec<String>,

    #[arg(
        long = "p1",
        visible_alias = "phase1-tools",
        value_name = "CSV",
        help_heading = "Tools",
        help = "Subdomain tools (subfinder,assetfinder,findomain,puredns | all | none)."
    )]
    pub phase1_tools: Option<String>,

    #[arg(
        long = "p2",
        visible_alias = "phase2-tools",
        value_name = "CSV",
        help_heading = "Tools",
        help = "Port scan tools (naabu,masscan,nmap). Implies --port-scan."
    )]
    pub phase2_tools: Option<String>,

    #[arg(
        long = "p3",
        visible_alias = "phase3-tools",
        value_name = "CSV",
        help_heading = "Tools",
        help = "Directory search tools (ffuf,feroxbuster,dirsearch,gobuster | all | none)."
    )]
    pub phase3_tools: Option<String>,

    #[arg(
        long = "p4",
        visible_alias = "phase4-tools",
        value_name = "CSV",
        help_heading = "Tools",
        help = "Crawl tools (katana,hakrawler,paramspider,gauplus,linkfinder | all | none)."
    )]
    pub phase4_tools: Option<String>,

    #[arg(
        long = "port-scan",
        visible_alias = "ps",
        help_heading = "Tools",
        help = "Run the port scan branch (naabu + nmap unless --p2 says otherwise)."
    )]
    pub port_scan: bool,

    #[arg(
        long = "list-tools",
        visible_alias = "lt",
        help_heading = "Tools",
        help = "Print the tool catalog and exit."
    )]
    pub list_tools: bool,

    #[arg(
        long = "threads",
        value_name = "N",
        help_heading = "Scan",
        help = "Threads per tool and parallel tool runs (default 40)."
    )]
    pub threads: Option<usize>,

    #[arg(
        long = "timeout",
        value_name = "SECONDS",
        help_heading = "Scan",
        help = "Per-invocation timeout in seconds (default 1800)."
    )]
    pub timeout: Option<u64>,

    #[arg(
        long = "wordlist",
        visible_alias = "w",
        value_name = "FILE",
        help_heading = "Scan",
        help = "Directory search wordlist."
    )]
    pub wordlist: Option<String>,

    #[arg(
        long = "subdomain-wordlist",
        visible_alias = "sw",
        value_name = "FILE",
        help_heading = "Scan",
        help = "Subdomain brute-force wordlist (puredns)."
    )]
    pub subdomain_wordlist: Option<String>,

    #[arg(
        long = "resolvers",
        value_name = "FILE",
        help_heading = "Scan",
        help = "DNS resolvers file for puredns."
    )]
    pub resolvers: Option<String>,

    #[arg(
        long = "recursion-depth",
        visible_alias = "rd",
        value_name = "N",
        help_heading = "Scan",
        help = "Directory search recursion depth (default 1)."
    )]
    pub recursion_depth: Option<u32>,

    #[arg(
        long = "crawl-depth",
        visible_alias = "cd",
        value_name = "N",
        help_heading = "Scan",
        help = "Crawler depth (default 2)."
    )]
    pub crawl_depth: Option<u32>,

    #[arg(
        long = "nmap-strategy",
        value_name = "STRATEGY",
        help_heading = "Scan",
        help = "nmap port selection without discovery: top1000, full or fast."
    )]
    pub nmap_strategy: Option<String>,

    #[arg(
        long = "safe-mode",
        visible_alias = "safe",
        help_heading = "Safe mode",
        help = "Lower rates and concurrency, small shuffled wordlist, rotating browser headers."
    )]
    pub safe_mode: bool,

    #[arg(
        long = "no-auto-safe",
        help_heading = "Safe mode",
        help = "Do not switch to safe mode when a WAF is detected."
    )]
    pub no_auto_safe: bool,

    #[arg(
        long = "proxy",
        value_name = "URL",
        help_heading = "HTTP",
        help = "Proxy passed to every tool that supports one (http://host:port)."
    )]
    pub proxy: Option<String>,

    #[arg(
        short = 'H',
        long = "header",
        value_name = "HEADER",
        help_heading = "HTTP",
        help = "Custom header \"Key: Value\" added to every request."
    )]
    pub header: Option<String>,

    #[arg(
        short = 'o',
        long = "output",
        value_name = "DIR",
        help_heading = "Output",
        help = "Directory the report_<host>_<timestamp> folder is created in."
    )]
    pub output: Option<String>,

    #[arg(
        long = "log-file",
        value_name = "FILE",
        help_heading = "Output",
        help = "Write a full debug log to FILE."
    )]
    pub log_file: Option<String>,

    #[arg(
        short = 'n',
        long = "no-color",
        visible_alias = "nc",
        help_heading = "Output",
        help = "Disable colored output."
    )]
    pub no_color: bool,

    #[arg(
        long = "no-progress",
        help_heading = "Output",
        help = "Hide progress bars."
    )]
    pub no_progress: bool,

    #[arg(
        short = 'C',
        long = "config",
        visible_alias = "cfg",
        value_name = "FILE",
        help_heading = "Config",
        help = "Path to config file (defaults to ~/.reconductor/config.yml)."
    )]
    pub config: Option<String>,
}
