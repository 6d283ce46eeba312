use std::path::PathBuf;

use clap::{error::ErrorKind, CommandFactory, Parser};
use colored::Colorize;
use itertools::Itertools;

use crate::cli::args::CliArgs;
use crate::cli::validation;
use crate::config::{self, ConfigFile};
use crate::pipeline::PhaseState;
use crate::runner::{self, Options, Runner, ScanResult, ToolSelection};
use crate::tools::{self, NmapStrategy, ToolPhase};

fn print_banner() {
    const BANNER: &str = r#"
                                 __            __
   ________  _________  ____  __/ /__  ______/ /_____  _____
  / ___/ _ \/ ___/ __ \/ __ \/ __  / / / / ___/ __/ __ \/ ___/
 / /  /  __/ /__/ /_/ / / / / /_/ / /_/ / /__/ /_/ /_/ / /
/_/   \___/\___/\____/_/ /_/\__,_/\__,_/\___/\__/\____/_/
"#;
    print!("{}", BANNER.bold().cyan());
    println!(
        "       v{} - multi-phase recon orchestration",
        env!("CARGO_PKG_VERSION")
    );
    println!();
}

fn format_kv_line(label: &str, value: &str) {
    println!(":: {:<10}: {}", label, value);
}

fn help_heading(arg: &clap::Arg) -> &str {
    arg.get_help_heading().unwrap_or("Options")
}

fn flag_column(arg: &clap::Arg) -> String {
    let mut column = match arg.get_short() {
        Some(short) => format!("-{short}, "),
        None => "    ".to_string(),
    };
    column.push_str("--");
    column.push_str(arg.get_long().unwrap_or(arg.get_id().as_str()));
    if arg.get_action().takes_values() {
        let value_name = arg
            .get_value_names()
            .and_then(|names| names.first())
            .map(|name| name.as_str())
            .unwrap_or("VALUE");
        column.push_str(&format!(" <{value_name}>"));
    }
    column
}

/// One aligned line per flag, grouped by help heading in declaration order.
fn render_custom_help() -> String {
    let cmd = CliArgs::command();
    let args: Vec<&clap::Arg> = cmd.get_arguments().filter(|a| !a.is_hide_set()).collect();
    let width = args.iter().map(|a| flag_column(a).len()).max().unwrap_or(0);

    let mut out = format!("{} v{}\n", cmd.get_name(), env!("CARGO_PKG_VERSION"));
    if let Some(about) = cmd.get_about() {
        out.push_str(&format!("{about}\n"));
    }
    out.push_str(&format!("\nUsage: {} [OPTIONS]\n", cmd.get_name()));

    for heading in args.iter().map(|a| help_heading(a)).unique() {
        out.push_str(&format!("\n{heading}:\n"));
        for arg in args.iter().filter(|a| help_heading(a) == heading) {
            let help = arg.get_help().map(|h| h.to_string()).unwrap_or_default();
            let mut line = format!("  {:<width$}  {}", flag_column(arg), help.trim());
            if let Some(aliases) = arg.get_visible_aliases() {
                line.push_str(&format!(
                    " [aliases: {}]",
                    aliases.iter().map(|a| format!("--{a}")).join(", ")
                ));
            }
            out.push_str(line.trim_end());
            out.push('\n');
        }
    }
    out
}

fn render_tool_catalog() -> String {
    let mut out = String::new();
    for phase in [
        ToolPhase::Subdomain,
        ToolPhase::PortScan,
        ToolPhase::DirSearch,
        ToolPhase::Crawl,
    ] {
        out.push_str(&format!("{}: {}\n", phase.label(), tools::selectable_ids(phase).join(", ")));
    }
    out
}

fn format_bool(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

#[derive(Clone, Debug)]
struct RunConfig {
    options: Options,
    verbose: u8,
    log_file: Option<PathBuf>,
    no_color: bool,
}

/// CLI value, else the config file's list, else every tool of the phase.
fn select_tools(
    cli: Option<&str>,
    cfg: Option<&Vec<String>>,
    phase: ToolPhase,
    fallback: Vec<String>,
) -> Result<Vec<String>, String> {
    if let Some(raw) = cli {
        return tools::parse_selection(raw, phase);
    }
    if let Some(list) = cfg {
        return tools::parse_selection(&list.join(","), phase)
            .map_err(|e| format!("invalid config tool list: {e}"));
    }
    Ok(fallback)
}

fn build_run_config(args: CliArgs, cfg: ConfigFile) -> Result<RunConfig, String> {
    validation::validate(&args)?;
    let defaults = Options::default();
    let default_tools = ToolSelection::default();

    let mut targets: Vec<String> = args.target.iter().map(|t| t.trim().to_string()).collect();
    if targets.is_empty() {
        targets.extend(cfg.target.clone().filter(|t| !t.trim().is_empty()));
    }
    let input_file = args.input_file.clone().or(cfg.input_file.clone());

    let port_scan =
        args.port_scan || args.phase2_tools.is_some() || cfg.port_scan.unwrap_or(false);
    let port_tools = if port_scan {
        select_tools(
            args.phase2_tools.as_deref(),
            cfg.phase2_tools.as_ref(),
            ToolPhase::PortScan,
            vec!["naabu".to_string(), "nmap".to_string()],
        )?
    } else {
        Vec::new()
    };
    let selection = ToolSelection {
        subdomain: select_tools(
            args.phase1_tools.as_deref(),
            cfg.phase1_tools.as_ref(),
            ToolPhase::Subdomain,
            default_tools.subdomain,
        )?,
        port_scan: port_tools,
        dirsearch: select_tools(
            args.phase3_tools.as_deref(),
            cfg.phase3_tools.as_ref(),
            ToolPhase::DirSearch,
            default_tools.dirsearch,
        )?,
        crawl: select_tools(
            args.phase4_tools.as_deref(),
            cfg.phase4_tools.as_ref(),
            ToolPhase::Crawl,
            default_tools.crawl,
        )?,
    };

    let nmap_strategy = match args.nmap_strategy.clone().or(cfg.nmap_strategy.clone()) {
        Some(raw) => raw
            .parse::<NmapStrategy>()
            .map_err(|e| format!("invalid nmap_strategy: {e}"))?,
        None => NmapStrategy::default(),
    };

    let proxy = args.proxy.clone().or(cfg.proxy.clone()).filter(|p| !p.trim().is_empty());
    if let Some(p) = proxy.as_deref() {
        validation::validate_proxy(p)?;
    }

    let mut exclude = cfg.exclude.clone().unwrap_or_default();
    exclude.extend(args.exclude.iter().cloned());

    let mut tech_wordlists = defaults.tech_wordlists.clone();
    tech_wordlists.extend(cfg.tech_wordlists.clone().unwrap_or_default());

    let expand = |v: String| config::expand_tilde_string(&v);
    let options = Options {
        targets,
        input_file,
        output_dir: config::expand_tilde(
            &args
                .output
                .clone()
                .or(cfg.output_dir.clone())
                .unwrap_or_else(|| ".".to_string()),
        ),
        threads: args.threads.or(cfg.threads).unwrap_or(defaults.threads),
        timeout_seconds: args.timeout.or(cfg.timeout).unwrap_or(defaults.timeout_seconds),
        safe_mode: args.safe_mode || cfg.safe_mode.unwrap_or(false),
        auto_safe_mode: !args.no_auto_safe && cfg.auto_safe_mode.unwrap_or(true),
        proxy,
        header: args.header.clone().or(cfg.header.clone()),
        user_agents_file: cfg.user_agents_file.clone().map(expand),
        subdomain_wordlist: args
            .subdomain_wordlist
            .clone()
            .or(cfg.wordlist_subdomains.clone())
            .map(expand)
            .unwrap_or(defaults.subdomain_wordlist),
        resolvers: args.resolvers.clone().or(cfg.resolvers.clone()).map(expand),
        dir_wordlist: args
            .wordlist
            .clone()
            .or(cfg.wordlist_dirs.clone())
            .map(expand)
            .unwrap_or(defaults.dir_wordlist),
        dir_wordlist_small: cfg
            .wordlist_dirs_small
            .clone()
            .map(expand)
            .unwrap_or(defaults.dir_wordlist_small),
        tech_wordlists,
        recursion_depth: args
            .recursion_depth
            .or(cfg.recursion_depth)
            .unwrap_or(defaults.recursion_depth),
        crawl_depth: args.crawl_depth.or(cfg.crawl_depth).unwrap_or(defaults.crawl_depth),
        exclude,
        tools: selection,
        nmap_strategy,
        nmap_scripts: cfg.nmap_scripts.clone(),
        nmap_aggressive: cfg.nmap_aggressive.unwrap_or(false),
        puredns_rate: cfg.puredns_rate.unwrap_or(defaults.puredns_rate),
        httpx_rate: cfg.httpx_rate.unwrap_or(defaults.httpx_rate),
        naabu_rate: cfg.naabu_rate.unwrap_or(defaults.naabu_rate),
        masscan_rate: cfg.masscan_rate.unwrap_or(defaults.masscan_rate),
        naabu_source_port: cfg.naabu_source_port,
        headless: cfg.headless.unwrap_or(false),
        auto_form_fill: cfg.auto_form_fill.unwrap_or(false),
        ignored_extensions: cfg
            .ignored_extensions
            .clone()
            .unwrap_or(defaults.ignored_extensions),
        show_progress: !args.no_progress,
    };

    Ok(RunConfig {
        options,
        verbose: args.verbose,
        log_file: args
            .log_file
            .clone()
            .or(cfg.log_file.clone())
            .map(|p| config::expand_tilde(&p)),
        no_color: args.no_color || cfg.no_color.unwrap_or(false),
    })
}

fn print_settings(options: &Options) {
    let targets = if options.targets.is_empty() {
        options.input_file.clone().unwrap_or_default()
    } else {
        options.targets.join(", ")
    };
    format_kv_line("Target", &targets);
    format_kv_line("Output", &options.output_dir.display().to_string());
    format_kv_line("Threads", &options.threads.to_string());
    format_kv_line("Timeout", &format!("{}s", options.timeout_seconds));
    format_kv_line("Safe mode", format_bool(options.safe_mode));
    format_kv_line("Auto safe", format_bool(options.auto_safe_mode));
    for (label, phase) in [
        ("Phase 1", ToolPhase::Subdomain),
        ("Phase 2", ToolPhase::PortScan),
        ("Phase 3", ToolPhase::DirSearch),
        ("Phase 4", ToolPhase::Crawl),
    ] {
        let ids = options.tools.for_phase(phase);
        let value = if ids.is_empty() { "-".to_string() } else { ids.join(",") };
        format_kv_line(label, &value);
    }
    if let Some(proxy) = options.proxy.as_deref() {
        format_kv_line("Proxy", proxy);
    }
    if !options.exclude.is_empty() {
        format_kv_line("Exclude", &options.exclude.join(", "));
    }
    println!();
}

fn print_summary(result: &ScanResult) {
    for run in &result.runs {
        let report = &run.report;
        println!();
        println!(":: {} :: {}", "Target".bold(), report.target.bold().cyan());
        if report.safe_mode {
            let reason = report.safe_mode_reason.as_deref().unwrap_or("requested");
            println!(":: {} :: {}", "Safe mode".bold().yellow(), reason);
        }
        for phase in &report.phases {
            let found = match phase.phase {
                PhaseState::SubdomainDiscovery => format!("{} hosts", phase.hosts.len()),
                PhaseState::LivenessProbe => format!("{} live", phase.verified_subset.len()),
                PhaseState::PortScan => format!(
                    "{} open ports",
                    phase.open_ports.values().map(Vec::len).sum::<usize>()
                ),
                PhaseState::DirectorySearch => format!(
                    "{} urls, {} verified",
                    phase.aggregated.all.len(),
                    phase.verified_subset.len()
                ),
                PhaseState::WebCrawl => format!(
                    "{} urls, {} params, {} js, {} api",
                    phase.aggregated.all.len(),
                    phase.aggregated.parameters.len(),
                    phase.aggregated.js_files.len(),
                    phase.aggregated.api_endpoints.len()
                ),
                PhaseState::Done => String::new(),
            };
            let tally = format!("[{}/{}]", phase.completed, phase.tasks);
            let tally = if phase.failed > 0 {
                format!("{tally} {} failed", phase.failed).yellow().to_string()
            } else {
                tally.green().to_string()
            };
            let note = phase
                .note
                .as_deref()
                .map(|n| format!(" ({n})"))
                .unwrap_or_default();
            println!(":: {:<10} {} {}{}", phase.phase.label(), tally, found, note);
        }
        println!(":: {:<10}: {}", "Report", run.report_dir.display());
    }
    println!();
    if result.interrupted {
        println!("{}", ":: Interrupted :: partial results written ::".bold().red());
    }
    println!(
        ":: Completed :: scan took {}s ::",
        result.elapsed.as_secs()
    );
}

async fn run_async(run: RunConfig) -> Result<(), String> {
    if run.no_color {
        colored::control::set_override(false);
    }
    print_banner();
    print_settings(&run.options);

    let runner = Runner::new(run.options).map_err(|e| e.to_string())?;
    let registry = runner.registry();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let running = registry.running_tools();
            let killed = registry.terminate_all();
            tracing::warn!(killed, tools = ?running, "interrupt received, terminating running tools");
            eprintln!(
                "{}",
                format!(":: Interrupted :: stopping {killed} running tool(s) ::").red()
            );
        }
    });

    let result = runner.run().await;
    interrupt.abort();
    let result = result.map_err(|e| e.to_string())?;
    print_summary(&result);
    if let Some(root) = runner::report_root(&result.runs) {
        tracing::info!(report = %root.display(), "done");
    }
    Ok(())
}

pub fn run_cli() -> Result<(), String> {
    let args = match CliArgs::try_parse() {
        Ok(args) => args,
        Err(e) => match e.kind() {
            ErrorKind::DisplayHelp => {
                print!("{}", render_custom_help());
                return Ok(());
            }
            ErrorKind::DisplayVersion => {
                let cmd = CliArgs::command();
                print!("{}", cmd.render_version());
                return Ok(());
            }
            _ => return Err(e.to_string()),
        },
    };

    if args.list_tools {
        print!("{}", render_tool_catalog());
        return Ok(());
    }

    let cfg = match args.config.as_deref().map(config::expand_tilde) {
        Some(path) => config::load_config(&path, false)?,
        None => match config::default_config_path() {
            Some(path) => {
                if let Err(e) = config::ensure_default_config_file(&path) {
                    eprintln!(":: warning: {e}");
                }
                config::load_config(&path, true)?
            }
            None => ConfigFile::default(),
        },
    };

    let run = build_run_config(args, cfg)?;
    crate::logging::init(run.verbose, run.log_file.as_deref())?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("failed to build runtime: {e}"))?;

    rt.block_on(run_async(run))
}
