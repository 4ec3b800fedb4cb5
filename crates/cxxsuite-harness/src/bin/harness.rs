//! CLI entrypoint for the cxxsuite conformance harness.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use cxxsuite_config::params::load_site_config;
use cxxsuite_config::{Configuration, CxxCompiler, Diag, ParamResolver, SuitePaths, TargetInfo};
use cxxsuite_harness::discovery::{DiscoveryOptions, discover_tests};
use cxxsuite_harness::report::{ArtifactIndex, ReportSummary, SuiteReport};
use cxxsuite_harness::structured_log::{LogEmitter, LogEntry, LogLevel};
use cxxsuite_harness::{TestRow, TestRunner};

/// Conformance test harness for a C++ standard library.
#[derive(Debug, Parser)]
#[command(name = "harness")]
#[command(about = "Conformance test harness for a C++ standard library")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Configure, discover, and run the test suite.
    Run {
        /// Root of the test tree.
        #[arg(long)]
        test_root: PathBuf,
        /// Scratch directory for build products.
        #[arg(long, default_value = "cxxsuite-output")]
        exec_root: PathBuf,
        /// Configuration parameter (repeatable).
        #[arg(long = "param", value_name = "NAME=VALUE")]
        params: Vec<String>,
        /// Site configuration JSON path.
        #[arg(long)]
        site_config: Option<PathBuf>,
        /// Only run tests whose path contains this substring.
        #[arg(long)]
        filter: Option<String>,
        /// File or directory name to skip during discovery (repeatable).
        #[arg(long = "exclude", value_name = "NAME")]
        excludes: Vec<String>,
        /// Output report path (markdown; a .json sibling is written too).
        #[arg(long)]
        report: Option<PathBuf>,
        /// Structured JSONL log path.
        #[arg(long)]
        log: Option<PathBuf>,
        /// Fixed timestamp string for deterministic report generation.
        #[arg(long)]
        timestamp: Option<String>,
        /// Suppress configuration notes.
        #[arg(long)]
        quiet: bool,
    },
    /// Resolve the configuration and print it without running tests.
    ShowConfig {
        /// Root of the test tree.
        #[arg(long)]
        test_root: PathBuf,
        /// Scratch directory for build products.
        #[arg(long, default_value = "cxxsuite-output")]
        exec_root: PathBuf,
        /// Configuration parameter (repeatable).
        #[arg(long = "param", value_name = "NAME=VALUE")]
        params: Vec<String>,
        /// Site configuration JSON path.
        #[arg(long)]
        site_config: Option<PathBuf>,
    },
    /// Dump the compiler's predefined macro table as JSON.
    DumpMacros {
        /// Compiler binary to query.
        #[arg(long)]
        cxx: PathBuf,
        /// Extra flag for the dump invocation (repeatable).
        #[arg(long = "flag", value_name = "FLAG", allow_hyphen_values = true)]
        flags: Vec<String>,
    },
    /// Probe whether the compiler accepts a compile flag.
    ProbeFlag {
        /// Compiler binary to probe.
        #[arg(long)]
        cxx: PathBuf,
        /// The flag (or flag sequence) to probe.
        #[arg(value_name = "FLAG", required = true, allow_hyphen_values = true)]
        flags: Vec<String>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            test_root,
            exec_root,
            params,
            site_config,
            filter,
            excludes,
            report,
            log,
            timestamp,
            quiet,
        } => {
            let diag = Diag::new(quiet);
            let config = resolve_configuration(
                &params,
                site_config.as_deref(),
                &test_root,
                &exec_root,
                diag,
            )?;
            if !quiet {
                config.print_config_info();
            }

            let mut options = DiscoveryOptions::default();
            options.excludes.extend(excludes);
            let tests = discover_tests(&test_root, &options)?;
            eprintln!("discovered {} tests under {}", tests.len(), test_root.display());

            let rows = TestRunner::new(&config).with_filter(filter).run(&tests)?;
            let summary = ReportSummary::from_rows(&rows);
            eprintln!(
                "run complete: total={}, passed={}, failed={}, xfail={}, xpass={}, unsupported={}",
                summary.total,
                summary.passed,
                summary.failed,
                summary.expected_failures,
                summary.unexpected_passes,
                summary.unsupported
            );

            let run_id = format!("run-{}", std::process::id());
            if let Some(log_path) = &log {
                if let Some(parent) = log_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let mut emitter = LogEmitter::to_file(log_path, &run_id)?;
                emitter.emit(LogLevel::Info, "suite_start")?;
                for row in &rows {
                    emitter.emit_entry(entry_for_row(row))?;
                }
                emitter.emit_entry(
                    LogEntry::new("", LogLevel::Info, "suite_end")
                        .with_details(serde_json::to_value(&summary)?),
                )?;
                emitter.flush()?;
            }

            let report_doc = SuiteReport {
                title: "C++ Standard Library Conformance Report".to_string(),
                target_triple: config.target_triple.clone(),
                stdlib: config.stdlib.as_str().to_string(),
                timestamp: timestamp
                    .unwrap_or_else(|| format!("{:?}", std::time::SystemTime::now())),
                summary,
                rows,
            };
            if let Some(report_path) = &report {
                if let Some(parent) = report_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(report_path, report_doc.to_markdown())?;
                let json_path = report_path.with_extension("json");
                std::fs::write(&json_path, report_doc.to_json())?;

                let mut index = ArtifactIndex::new(&run_id);
                index.add_file(report_path, "report-markdown")?;
                index.add_file(&json_path, "report-json")?;
                if let Some(log_path) = &log {
                    index.add_file(log_path, "log-jsonl")?;
                }
                let index_path = report_path.with_extension("artifacts.json");
                std::fs::write(&index_path, index.to_json()?)?;
                eprintln!("wrote report to {}", report_path.display());
            }

            if !report_doc.all_passed() {
                return Err("conformance run failed".into());
            }
        }
        Command::ShowConfig {
            test_root,
            exec_root,
            params,
            site_config,
        } => {
            let diag = Diag::new(false);
            let config = resolve_configuration(
                &params,
                site_config.as_deref(),
                &test_root,
                &exec_root,
                diag,
            )?;
            config.print_config_info();
        }
        Command::DumpMacros { cxx, flags } => {
            let cxx = CxxCompiler::new(cxx);
            match cxx.dump_macros(None, &flags, None)? {
                Some(macros) => println!("{}", serde_json::to_string_pretty(&macros)?),
                None => return Err("macro dump failed: preprocessor exited nonzero".into()),
            }
        }
        Command::ProbeFlag { cxx, flags } => {
            let cxx = CxxCompiler::new(cxx);
            if cxx.has_compile_flag(&flags) {
                println!("supported: {}", flags.join(" "));
            } else {
                return Err(format!("not supported: {}", flags.join(" ")).into());
            }
        }
    }

    Ok(())
}

fn resolve_configuration(
    raw_params: &[String],
    site_config: Option<&Path>,
    test_root: &Path,
    exec_root: &Path,
    diag: Diag,
) -> Result<Configuration, Box<dyn std::error::Error>> {
    let mut params = BTreeMap::new();
    for raw in raw_params {
        let (name, value) = ParamResolver::parse_param(raw)?;
        params.insert(name, value);
    }
    let site = load_site_config(site_config, "CXXSUITE_SITE_CONFIG", &diag)?;
    let paths = SuitePaths {
        test_source_root: test_root.to_path_buf(),
        test_exec_root: exec_root.to_path_buf(),
    };
    let config = Configuration::configure(
        ParamResolver::new(params, site),
        TargetInfo::from_host(),
        paths,
        diag,
    )?;
    Ok(config)
}

fn entry_for_row(row: &TestRow) -> LogEntry {
    let level = if row.outcome.is_failure() {
        LogLevel::Error
    } else {
        LogLevel::Info
    };
    let mut entry = LogEntry::new("", level, "test_result")
        .with_test(&row.path, &row.kind)
        .with_outcome(row.outcome)
        .with_duration_ms(row.duration_ms);
    if let Some(detail) = &row.detail {
        entry = entry.with_details(serde_json::json!({ "detail": detail }));
    }
    entry
}
