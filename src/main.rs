mod cli;
mod config;
mod exec;
mod graph;
mod pipelines;
mod utils;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use std::{env, fs};

use anyhow::Result;
use env_logger::Builder;
use log::{error, info, LevelFilter};

use crate::cli::Arguments;
use crate::config::defs::{PipelineError, PipelineParams, RunConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let run_start = Instant::now();

    let args = cli::parse();

    let log_level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    Builder::new()
        .filter_level(log_level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {}: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .init();

    println!("\n-------------\n AmpliSeq\n-------------\n");

    let run_dir = resolve_run_dir(&args)?;
    info!("The run directory is {:?}\n", run_dir);

    let module = args.module.clone();
    let jobs = args.jobs;
    let run_config = match build_run_config(args, run_dir, jobs) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!("Pipeline failed: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = match module.as_str() {
        "dada2" => pipelines::dada2::run(run_config).await,
        _ => Err(PipelineError::InvalidConfig(format!(
            "Invalid module: {}",
            module
        ))),
    } {
        error!(
            "Pipeline failed: {} at {} milliseconds.",
            e,
            run_start.elapsed().as_millis()
        );
        std::process::exit(1);
    }

    println!("Run complete: {} milliseconds.", run_start.elapsed().as_millis());
    Ok(())
}

/// All configuration errors are surfaced here, before any task exists.
fn build_run_config(
    args: Arguments,
    run_dir: PathBuf,
    jobs: usize,
) -> Result<RunConfig, PipelineError> {
    let params = PipelineParams::from_args(&args)?;
    Ok(RunConfig {
        cwd: run_dir,
        args,
        params,
        jobs,
    })
}

/// Resolves `--dir` against the current working directory; defaults to the
/// current working directory itself.
fn resolve_run_dir(args: &Arguments) -> Result<PathBuf> {
    let cwd = env::current_dir()?;
    let run_dir = match &args.dir {
        Some(dir) => {
            let path = PathBuf::from(dir);
            if path.is_absolute() {
                path
            } else {
                cwd.join(path)
            }
        }
        None => cwd,
    };
    if !fs::metadata(&run_dir).map(|m| m.is_dir()).unwrap_or(false) {
        anyhow::bail!("run directory does not exist: {}", run_dir.display());
    }
    Ok(run_dir)
}
