//! Entry points composing cleanup, the parallel task group and the dev
//! server.
//!
//! ```text
//! build  = clear -> { style, markup, fonts, images, script, libs } (prod)
//! serve  = clear -> { style, markup, fonts, images, script, libs } (dev) -> watch
//! start  = serve the existing dist folder
//! ```

use std::time::Instant;

use console::style;
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::config::Config;
use crate::error::PipelineError;
use crate::io::{self, PROGRESS_STYLE};
use crate::task::{Profile, Task};

fn banner(mode: &str) {
    tracing::info!(
        "Running {} in {} mode.",
        style("assetline").red(),
        style(mode).blue()
    );
}

/// Remove the whole destination tree.
pub fn clear(config: &Config) -> Result<(), PipelineError> {
    io::clear_dist(&config.dist())?;
    Ok(())
}

/// Run every task concurrently and wait for all of them. The first failure
/// is returned; tasks already running are left to finish their current
/// step, and no further task is started.
pub fn run_group(config: &Config, tasks: &[Task]) -> Result<(), PipelineError> {
    let s = Instant::now();

    let root_span = tracing::info_span!("tasks");
    root_span.pb_set_style(&PROGRESS_STYLE);
    root_span.pb_set_length(tasks.len() as u64);
    root_span.pb_set_message("Running tasks...");
    let _enter = root_span.enter();

    tasks.par_iter().try_for_each(|task| {
        let span = tracing::info_span!(parent: &root_span, "task", name = task.name);
        span.pb_set_message(&format!("Running {}", task.name));
        let _enter = span.enter();

        task.run(config)
            .map_err(|e| PipelineError::Task(task.name.to_string(), e))?;

        root_span.pb_inc(1);
        Ok::<(), PipelineError>(())
    })?;

    tracing::info!("finished {} tasks {}", tasks.len(), io::as_overhead(s));

    Ok(())
}

/// Production build: clean slate, then all production tasks.
pub fn build(config: &Config) -> Result<(), PipelineError> {
    banner("build");

    clear(config)?;
    run_group(config, &Task::group(Profile::Prod))?;

    Ok(())
}

/// Development build followed by the live-reloading preview server. Only
/// returns when watching fails.
#[cfg(feature = "live")]
pub fn serve(config: &Config) -> Result<(), PipelineError> {
    banner("serve");

    clear(config)?;
    let tasks = Task::group(Profile::Dev);
    run_group(config, &tasks)?;

    let server = crate::watch::DevServer::start(config)?;
    server.watch(config, tasks)?;

    Ok(())
}

/// Serve whatever is already in the destination folder, nothing is built.
#[cfg(feature = "live")]
pub fn start(config: &Config) -> Result<(), PipelineError> {
    banner("start");

    let server = crate::watch::DevServer::start(config)?;
    server.wait()?;

    Ok(())
}

/// Development build of the scripts only, without cleanup.
pub fn dev_js(config: &Config) -> Result<(), PipelineError> {
    let task = Task::script(Profile::Dev);
    task.run(config)
        .map_err(|e| PipelineError::Task(task.name.to_string(), e))?;

    Ok(())
}
