//! Command-line driver for `strata`

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, error, info};
use tracing_appender::non_blocking::WorkerGuard;

use crate::engine::{LayeredCompiler, TypecheckReport, VerificationState};
use crate::errors::ErrorCollector;
use crate::frontend::config::{Config, ErrorFormat};
use crate::infrastructure::{init_dev_logging, init_logging, init_prod_logging, LogConfig};

pub const SOURCE_EXTENSION: &str = "strata";
const DEFAULT_CONFIG_FILE: &str = ".stratarc";

#[derive(Debug, Clone)]
pub struct CliConfig {
    pub paths: Vec<PathBuf>,
    pub strict: bool,
    pub control_flow: bool,
    pub json: bool,
    pub stats: bool,
    pub color: bool,
    pub config_path: Option<PathBuf>,
    pub init: bool,
    pub verbose: bool,
    /// Write JSON logs to a daily rolling file here instead of stderr.
    pub log_dir: Option<PathBuf>,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            strict: false,
            control_flow: true,
            json: false,
            stats: false,
            color: true,
            config_path: None,
            init: false,
            verbose: false,
            log_dir: None,
        }
    }
}

/// Result of checking one file.
#[derive(Debug, Serialize)]
pub struct FileReport {
    pub path: PathBuf,
    pub success: bool,
    /// Absent when the file never reached the scheduler or raise mode aborted.
    pub report: Option<TypecheckReport>,
    pub errors: Vec<String>,
}

pub struct Cli {
    options: CliConfig,
    compiler: LayeredCompiler,
}

impl Cli {
    pub fn new(options: CliConfig) -> Result<Self, String> {
        let mut config = match &options.config_path {
            Some(path) => Config::load(path)?,
            None => Config::discover(),
        };

        if options.strict {
            config.check.raise_on_error = true;
        }
        if !options.control_flow {
            config.check.control_flow = false;
        }
        if !options.color {
            config.errors.color = false;
        }
        if options.json {
            config.errors.format = ErrorFormat::Json;
        }

        Ok(Self {
            options,
            compiler: LayeredCompiler::new(config),
        })
    }

    pub fn config(&self) -> &Config {
        self.compiler.config()
    }

    pub fn run(&self) -> Result<i32, String> {
        if self.options.init {
            return self.write_default_config(Path::new(DEFAULT_CONFIG_FILE)).map(|_| 0);
        }

        let files = collect_files(&self.options.paths)?;
        if files.is_empty() {
            return Err("No paths specified".to_string());
        }

        let reports: Vec<FileReport> = files.iter().map(|path| self.check_file(path)).collect();
        let success = reports.iter().all(|report| report.success);

        match self.config().errors.format {
            ErrorFormat::Json => {
                let rendered = serde_json::to_string_pretty(&reports).map_err(|e| format!("Failed to render report: {}", e))?;
                println!("{}", rendered);
            }
            ErrorFormat::Default | ErrorFormat::Compact => self.print_summary(&reports),
        }

        Ok(if success { 0 } else { 1 })
    }

    pub fn check_file(&self, path: &Path) -> FileReport {
        let check = &self.config().check;
        info!(file = %path.display(), "Checking file");

        match self.compiler.typecheck_file(path, check.raise_on_error, check.control_flow) {
            Ok(report) => {
                let errors = report_errors(&report);
                debug!(file = %path.display(), errors = errors.len(), "File checked");
                FileReport {
                    path: path.to_path_buf(),
                    success: report.success(),
                    report: Some(report),
                    errors,
                }
            }
            Err(e) => {
                error!(file = %path.display(), error = %e, "Check aborted");
                FileReport {
                    path: path.to_path_buf(),
                    success: false,
                    report: None,
                    errors: vec![e.to_string()],
                }
            }
        }
    }

    fn write_default_config(&self, path: &Path) -> Result<(), String> {
        if path.exists() {
            return Err(format!("{} already exists", path.display()));
        }
        fs::write(path, Config::generate_default()).map_err(|e| format!("Failed to write {}: {}", path.display(), e))?;
        self.print_success(&format!("Wrote {}", path.display()));
        Ok(())
    }

    fn print_summary(&self, reports: &[FileReport]) {
        let errors_config = &self.config().errors;
        let compact = errors_config.format == ErrorFormat::Compact;
        let mut collector = ErrorCollector::with_max(errors_config.max_errors);

        for report in reports {
            for error in &report.errors {
                let error = if errors_config.show_suggestions {
                    error.clone()
                } else {
                    strip_hints(error)
                };
                let error = if compact { error.replace('\n', " ") } else { error };
                collector.add(format!("{}: {}", report.path.display(), error));
            }
        }

        for error in collector.errors() {
            self.print_error(error);
        }
        if collector.dropped() > 0 {
            self.print_error(&format!("... {} more error(s) not shown", collector.dropped()));
        }

        if self.options.stats {
            for report in reports {
                if let Some(typecheck) = &report.report {
                    println!("{}\n{}\n", report.path.display(), typecheck.metrics.report());
                }
            }
        }

        let file_count = reports.len();
        let files = if file_count == 1 { "file" } else { "files" };
        if collector.has_errors() {
            eprintln!();
            self.print_error(&format!("Found {} error(s) in {} {}", collector.error_count(), file_count, files));
        } else {
            self.print_success(&format!("✓ Checked {} {}, all layers verified", file_count, files));
        }
    }

    fn print_error(&self, msg: &str) {
        if self.config().errors.color {
            eprintln!("\x1b[31m{}\x1b[0m", msg);
        } else {
            eprintln!("{}", msg);
        }
    }

    fn print_success(&self, msg: &str) {
        if self.config().errors.color {
            println!("\x1b[32m{}\x1b[0m", msg);
        } else {
            println!("{}", msg);
        }
    }
}

/// Failures, cycles and blocked layers of `report`, one message each.
pub fn report_errors(report: &TypecheckReport) -> Vec<String> {
    let mut errors: Vec<String> = report.failures.iter().map(ToString::to_string).collect();
    for cycle in &report.cycles {
        errors.push(format!("Cycle in layer dependencies: {}", cycle.join(" -> ")));
    }
    for layer in report.layers_in(VerificationState::Blocked) {
        errors.push(format!("[{}] not checked: a dependency failed", layer));
    }
    errors
}

fn strip_hints(error: &str) -> String {
    error
        .lines()
        .filter(|line| !line.trim_start().starts_with("hint:"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Expand directories into the `.strata` files below them.
pub fn collect_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>, String> {
    let mut files = Vec::new();

    for path in paths {
        if path.is_file() {
            files.push(path.clone());
        } else if path.is_dir() {
            let pattern = format!("{}/**/*.{}", path.display(), SOURCE_EXTENSION);
            for entry in glob::glob(&pattern).map_err(|e| format!("Glob pattern error: {}", e))? {
                match entry {
                    Ok(found) if found.is_file() => files.push(found),
                    Ok(_) => {}
                    Err(e) => eprintln!("Error accessing path: {}", e),
                }
            }
        } else {
            return Err(format!("Path not found: {}", path.display()));
        }
    }

    Ok(files)
}

pub fn usage(prog: &str) -> String {
    format!(
        "strata - layered type checker\n\n\
        USAGE:\n    {prog} [OPTIONS] <paths...>\n\n\
        OPTIONS:\n    \
        -h, --help          Print help information\n    \
        --strict            Abort on the first failing layer\n    \
        --no-control-flow   Skip the control-flow pre-pass\n    \
        --json              Print the reports as JSON\n    \
        --stats             Print per-layer timings and solver counters\n    \
        --no-color          Disable colored output\n    \
        --config <path>     Use this config file instead of discovering one\n    \
        --init              Write a default {DEFAULT_CONFIG_FILE} and exit\n    \
        --log-dir <dir>     Write JSON logs to a rolling file in <dir>\n    \
        -v, --verbose       Debug logging on stderr"
    )
}

/// Parse `args`, whose first element is the program name.
pub fn parse_args<I>(args: I) -> Result<CliConfig, String>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    let prog = args.next().unwrap_or_else(|| "strata".to_string());
    let mut config = CliConfig::default();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => return Err(usage(&prog)),
            "--strict" => config.strict = true,
            "--no-control-flow" => config.control_flow = false,
            "--json" => config.json = true,
            "--stats" => config.stats = true,
            "--no-color" => config.color = false,
            "--init" => config.init = true,
            "-v" | "--verbose" => config.verbose = true,
            "--config" => {
                let path = args.next().ok_or_else(|| "--config requires an argument".to_string())?;
                config.config_path = Some(PathBuf::from(path));
            }
            "--log-dir" => {
                let dir = args.next().ok_or_else(|| "--log-dir requires an argument".to_string())?;
                config.log_dir = Some(PathBuf::from(dir));
            }
            option if option.starts_with('-') => {
                return Err(format!("Unknown option: {}\n\n{}", option, usage(&prog)));
            }
            path => config.paths.push(PathBuf::from(path)),
        }
    }

    if config.paths.is_empty() && !config.init {
        return Err(usage(&prog));
    }

    Ok(config)
}

/// `--verbose` wins over `--log-dir`; without either, compact stderr logs.
pub fn init_cli_logging(options: &CliConfig) -> Option<WorkerGuard> {
    match (&options.log_dir, options.verbose) {
        (_, true) => init_dev_logging(),
        (Some(dir), false) => init_prod_logging(dir),
        (None, false) => init_logging(LogConfig::default()),
    }
}

/// Entry point for the `strata` binary; returns the process exit code.
pub fn main() -> i32 {
    let options = match parse_args(std::env::args()) {
        Ok(options) => options,
        Err(message) => {
            eprintln!("{}", message);
            return 1;
        }
    };

    let _guard = init_cli_logging(&options);
    debug!(paths = ?options.paths, strict = options.strict, "Arguments parsed");

    let result = Cli::new(options).and_then(|cli| cli.run());
    match result {
        Ok(code) => code,
        Err(message) => {
            error!(error = %message, "strata failed");
            eprintln!("{}", message);
            1
        }
    }
}
