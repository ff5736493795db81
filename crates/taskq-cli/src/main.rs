//! `taskq` CLI
//!
//! Runs the commands listed in a TOML job file, at most `--jobs` at a time,
//! printing each task's output as it finishes.

mod reporter;

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use taskq_core::config::{Config, load_config};
use taskq_core::tracing_init::{default_filter, init_tracing};
use taskq_core::{JobFile, JobSpec};
use taskq_runner::{
    CommandSpec, TaskQueue, detected_parallelism, supports_output_capture,
    supports_parallel_execution,
};

use reporter::Reporter;

#[derive(Parser, Debug)]
#[command(name = "taskq")]
#[command(version, about = "Run a job file of external commands with bounded parallelism")]
struct Args {
    /// TOML job file listing the tasks to run
    #[arg(required_unless_present = "capabilities")]
    job_file: Option<PathBuf>,

    /// Maximum number of tasks running at once (0 = number of CPUs)
    #[arg(short, long)]
    jobs: Option<u32>,

    /// Keep starting tasks after one fails
    #[arg(short, long)]
    keep_going: bool,

    /// Log level filter (e.g. "info", "debug", "warn")
    #[arg(long)]
    log_level: Option<String>,

    /// Output logs as JSON (for structured log aggregation)
    #[arg(long)]
    log_json: bool,

    /// Only print task output and failures
    #[arg(short, long)]
    quiet: bool,

    /// Print what this platform supports and exit
    #[arg(long)]
    capabilities: bool,
}

impl Args {
    /// Apply command-line overrides on top of file and environment config.
    fn apply(&self, config: &mut Config) {
        if let Some(jobs) = self.jobs {
            config.runner.jobs = jobs;
        }
        if self.keep_going {
            config.runner.keep_going = true;
        }
        if let Some(level) = &self.log_level {
            config.logging.level.clone_from(level);
        }
        if self.log_json {
            config.logging.json = true;
        }
    }
}

fn to_command(spec: &JobSpec) -> CommandSpec {
    let command = CommandSpec::new(&spec.program).args(&spec.args);
    match &spec.env {
        Some(env) => command.env(env),
        None => command,
    }
}

fn print_capabilities() -> std::io::Result<()> {
    let mut out = std::io::stdout().lock();
    writeln!(out, "output capture:     {}", supports_output_capture())?;
    writeln!(out, "parallel execution: {}", supports_parallel_execution())?;
    writeln!(out, "detected cpus:      {}", detected_parallelism())?;
    Ok(())
}

fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    let cwd = std::env::current_dir().context("Failed to determine working directory")?;
    let mut config = load_config(Some(&cwd))?;
    args.apply(&mut config);

    init_tracing(&default_filter(&config.logging.level), config.logging.json);

    if args.capabilities {
        print_capabilities()?;
        return Ok(ExitCode::SUCCESS);
    }

    let path = args.job_file.context("No job file given")?;
    let job_file = JobFile::load(&path)?;

    let mut queue = TaskQueue::new(config.runner.jobs as usize)
        .context("Failed to initialise process backend")?;
    for spec in &job_file.tasks {
        queue.enqueue(to_command(spec), spec.display_label());
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        job_file = %path.display(),
        tasks = job_file.tasks.len(),
        requested_jobs = config.runner.jobs,
        keep_going = config.runner.keep_going,
        "Starting taskq"
    );

    let mut reporter = Reporter::new(
        std::io::stdout().lock(),
        args.quiet,
        config.runner.keep_going,
    );
    let failed = queue.run_with(&mut reporter);
    let failures = reporter.failures();
    reporter.finish().context("Failed to write task output")?;

    info!(
        failures,
        not_started = queue.pending_len(),
        parallelism = queue.resolved_parallelism(),
        "taskq finished"
    );

    Ok(if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::ffi::OsString;

    #[test]
    fn cli_flags_override_config() {
        let args = Args::parse_from([
            "taskq",
            "-j",
            "3",
            "--keep-going",
            "--log-level",
            "debug",
            "jobs.toml",
        ]);
        let mut config = Config::default();
        args.apply(&mut config);

        assert_eq!(config.runner.jobs, 3);
        assert!(config.runner.keep_going);
        assert_eq!(config.logging.level, "debug");
        assert!(!config.logging.json);
    }

    #[test]
    fn absent_flags_keep_config_values() {
        let args = Args::parse_from(["taskq", "jobs.toml"]);
        let mut config = Config::default();
        config.runner.jobs = 6;
        config.runner.keep_going = true;
        args.apply(&mut config);

        assert_eq!(config.runner.jobs, 6);
        assert!(config.runner.keep_going);
    }

    #[test]
    fn job_file_required_unless_capabilities() {
        assert!(Args::try_parse_from(["taskq"]).is_err());
        assert!(Args::try_parse_from(["taskq", "--capabilities"]).is_ok());
    }

    #[test]
    fn converts_job_spec_to_command() {
        let spec = JobSpec {
            program: "cc".to_string(),
            args: vec!["-c".to_string(), "a.c".to_string()],
            env: Some(BTreeMap::from([("PATH".to_string(), "/usr/bin".to_string())])),
            label: None,
        };
        let command = to_command(&spec);

        assert_eq!(command.program, PathBuf::from("cc"));
        assert_eq!(command.args, vec![OsString::from("-c"), OsString::from("a.c")]);
        assert_eq!(
            command.env,
            Some(vec![(OsString::from("PATH"), OsString::from("/usr/bin"))])
        );
    }

    #[test]
    fn job_spec_without_env_inherits() {
        let spec = JobSpec {
            program: "true".to_string(),
            args: Vec::new(),
            env: None,
            label: None,
        };
        assert!(to_command(&spec).env.is_none());
    }
}
