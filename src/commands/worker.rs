//! `reel worker` command, launched once per worker by `reel run`.

use std::fs;
use std::path::Path;

use crate::adapters::live::transport::LiveTransportFactory;
use crate::context::WorkerJob;
use crate::namespace::RunDirectory;
use crate::runner::abort_on;
use crate::worker::run_worker;

/// Execute the `worker` command.
///
/// Reads the job file, runs its groups, and writes the worker report as a
/// single JSON document on stdout. Logs go to stderr. Ctrl-c aborts the run
/// the worker belongs to.
///
/// # Errors
///
/// Returns an error string if the job cannot be read or the worker cannot
/// start.
pub fn run(job_file: &Path) -> Result<(), String> {
    let content = fs::read_to_string(job_file)
        .map_err(|e| format!("failed to read {}: {e}", job_file.display()))?;
    let job: WorkerJob = serde_yaml::from_str(&content)
        .map_err(|e| format!("failed to parse {}: {e}", job_file.display()))?;
    let factory = LiveTransportFactory::new(job.config.timeout());

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("failed to start runtime: {e}"))?;
    let run_dir = RunDirectory::new(&job.config.cassette_root, &job.run_id);
    let report = runtime
        .block_on(async {
            let interrupts = abort_on(run_dir, tokio::signal::ctrl_c());
            let report = run_worker(&job, &factory).await;
            interrupts.abort();
            report
        })
        .map_err(|e| e.to_string())?;

    let json =
        serde_json::to_string(&report).map_err(|e| format!("failed to encode report: {e}"))?;
    println!("{json}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_job_file_is_an_error() {
        let err = run(Path::new("/nonexistent/worker-0.job.yaml")).unwrap_err();
        assert!(err.contains("failed to read"));
    }
}
