//! `reel run` command.

use crate::config::EngineConfig;
use crate::mode::ExecutionMode;
use crate::runner::{RunRequest, Runner, Strategy};
use crate::schedule::Preset;

/// Flags of `reel run` that are not part of the engine config.
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    /// Record or replay.
    pub mode: ExecutionMode,
    /// Which units to run.
    pub preset: Preset,
    /// Requested worker count.
    pub workers: Option<usize>,
    /// Abort on the first failed unit.
    pub fail_fast: bool,
    /// Run workers inside this process.
    pub in_process: bool,
    /// Print JSON instead of the table.
    pub json: bool,
}

/// Execute the `run` command.
///
/// Runs the selected preset and prints the report. A run with any failed
/// unit is an error so the exit status reflects it.
///
/// # Errors
///
/// Returns an error string if the run is refused, cannot start, or has
/// failed units.
pub fn run(config: EngineConfig, options: &RunOptions) -> Result<(), String> {
    let manifest = super::load_manifest(&config)?;
    let strategy = if options.in_process {
        Strategy::InProcess
    } else {
        let program = std::env::current_exe()
            .map_err(|e| format!("failed to locate the reel executable: {e}"))?;
        Strategy::Subprocess { program }
    };
    let runner = Runner::new(config, manifest).with_strategy(strategy).with_interrupt_handling();
    let request = RunRequest {
        mode: options.mode,
        preset: options.preset,
        workers: options.workers,
        fail_fast: options.fail_fast,
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("failed to start runtime: {e}"))?;
    let report = runtime.block_on(runner.run(&request)).map_err(|e| e.to_string())?;

    if options.json {
        let json = serde_json::to_string_pretty(&report)
            .map_err(|e| format!("failed to encode report: {e}"))?;
        println!("{json}");
    } else {
        print!("{}", report.render_table());
    }

    if report.success() {
        Ok(())
    } else {
        Err(format!("run {} failed: {} unit(s) failed", report.run_id, report.totals.failed))
    }
}
