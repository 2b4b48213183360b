// src/cli.rs
use anyhow::Result;
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::{env, path::PathBuf, process::ExitCode};

use crate::commands::{self, run::{ReportFormat, RunArgs}};
use crate::core::plan::CacheMode;
use crate::core::planner::SelectionFilters;
use crate::infra::logging;
use crate::t;

/// Pre-parses the command line arguments to find the language setting.
/// This allows i18n to be initialized before the full CLI is built.
/// It looks for `--lang <VALUE>` or `--lang=<VALUE>`.
fn pre_parse_language() -> String {
    let args: Vec<String> = env::args().collect();
    for (pos, arg) in args.iter().enumerate() {
        if let Some(lang) = arg.strip_prefix("--lang=") {
            return lang.to_string();
        }
        if arg == "--lang" {
            if let Some(lang) = args.get(pos + 1) {
                return lang.clone();
            }
        }
    }
    // Fallback to system language detection
    sys_locale::get_locale().unwrap_or_else(|| "en".to_string())
}

pub fn build_cli(locale: &str) -> Command {
    Command::new("optest")
        .version(env!("CARGO_PKG_VERSION"))
        .about(t!("cli_about", locale = locale).to_string())
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("lang")
                .long("lang")
                .help(t!("cli_lang", locale = locale).to_string())
                .value_name("LANGUAGE")
                .global(true)
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help(t!("arg_verbose", locale = locale).to_string())
                .global(true)
                .action(ArgAction::Count),
        )
        .subcommand(
            Command::new("run")
                .about(t!("cmd_run_about", locale = locale).to_string())
                .arg(
                    Arg::new("plan")
                        .short('p')
                        .long("plan")
                        .help(t!("arg_plan", locale = locale).to_string())
                        .value_name("FILE")
                        .required(true)
                        .value_parser(clap::value_parser!(PathBuf))
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("backend")
                        .long("backend")
                        .help(t!("arg_backend", locale = locale).to_string())
                        .value_name("TYPE")
                        .value_parser(["cann", "cuda"])
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("chip")
                        .long("chip")
                        .help(t!("arg_chip", locale = locale).to_string())
                        .value_name("CHIP")
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("cases")
                        .long("cases")
                        .help(t!("arg_cases", locale = locale).to_string())
                        .value_name("PATTERNS")
                        .value_delimiter(',')
                        .action(ArgAction::Append),
                )
                .arg(
                    Arg::new("tags")
                        .long("tags")
                        .help(t!("arg_tags", locale = locale).to_string())
                        .value_name("TAGS")
                        .value_delimiter(',')
                        .action(ArgAction::Append),
                )
                .arg(
                    Arg::new("skip-tags")
                        .long("skip-tags")
                        .help(t!("arg_skip_tags", locale = locale).to_string())
                        .value_name("TAGS")
                        .value_delimiter(',')
                        .action(ArgAction::Append),
                )
                .arg(
                    Arg::new("priority-max")
                        .long("priority-max")
                        .help(t!("arg_priority_max", locale = locale).to_string())
                        .value_name("N")
                        .value_parser(clap::value_parser!(i64))
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("cache")
                        .long("cache")
                        .help(t!("arg_cache", locale = locale).to_string())
                        .value_name("MODE")
                        .value_parser(["reuse", "regen"])
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("list")
                        .long("list")
                        .help(t!("arg_list", locale = locale).to_string())
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("report")
                        .long("report")
                        .help(t!("arg_report", locale = locale).to_string())
                        .value_name("FORMAT")
                        .value_parser(["terminal", "json"])
                        .default_value("terminal")
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("report-path")
                        .long("report-path")
                        .help(t!("arg_report_path", locale = locale).to_string())
                        .value_name("PATH")
                        .value_parser(clap::value_parser!(PathBuf))
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("no-color")
                        .long("no-color")
                        .help(t!("arg_no_color", locale = locale).to_string())
                        .action(ArgAction::SetTrue),
                ),
        )
}

fn strings(matches: &ArgMatches, id: &str) -> Vec<String> {
    matches
        .get_many::<String>(id)
        .map(|values| values.filter(|v| !v.trim().is_empty()).cloned().collect())
        .unwrap_or_default()
}

fn run_args(matches: &ArgMatches) -> Result<RunArgs> {
    let plan = matches
        .get_one::<PathBuf>("plan")
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("--plan is required"))?;
    let cache = matches
        .get_one::<String>("cache")
        .map(|mode| mode.parse::<CacheMode>())
        .transpose()
        .map_err(anyhow::Error::msg)?;
    let report = match matches.get_one::<String>("report").map(String::as_str) {
        Some("json") => ReportFormat::Json,
        _ => ReportFormat::Terminal,
    };

    Ok(RunArgs {
        plan,
        filters: SelectionFilters {
            backend: matches.get_one::<String>("backend").cloned(),
            chip: matches.get_one::<String>("chip").cloned(),
            cases: strings(matches, "cases"),
            tags: strings(matches, "tags"),
            skip_tags: strings(matches, "skip-tags"),
            priority_max: matches.get_one::<i64>("priority-max").copied(),
        },
        cache,
        list: matches.get_flag("list"),
        report,
        report_path: matches.get_one::<PathBuf>("report-path").cloned(),
    })
}

/// Parses the command line and runs the chosen subcommand.
pub async fn run() -> Result<ExitCode> {
    // Pre-parse language and initialize i18n first.
    let language = crate::resolve_locale(&pre_parse_language());
    rust_i18n::set_locale(&language);

    let matches = build_cli(&language).get_matches();

    match matches.subcommand() {
        Some(("run", run_matches)) => {
            let no_color = run_matches.get_flag("no-color");
            if no_color {
                colored::control::set_override(false);
            }
            logging::init(run_matches.get_count("verbose"), !no_color);

            let args = run_args(run_matches)?;
            let status = commands::run::execute(args, &language).await?;
            Ok(status.exit_code())
        }
        // `subcommand_required` makes clap print help and exit before this.
        _ => Ok(ExitCode::from(2)),
    }
}
