//! Running the external solver on a model directory

use hydronet_core::config::{ModelConfig, MODEL_FILE};
use hydronet_core::{Error, Result};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Lines of the solver log quoted in a failure
const LOG_TAIL: usize = 20;

#[derive(Debug, Clone)]
pub struct SolverRun {
    pub elapsed: Duration,
    /// Combined stdout and stderr of the solver
    pub log: PathBuf,
}

fn log_tail(path: &Path) -> String {
    let text = fs::read_to_string(path).unwrap_or_default();
    let lines: Vec<&str> = text.lines().collect();
    lines[lines.len().saturating_sub(LOG_TAIL)..].join("\n")
}

/// Run the configured solver on `model_dir/model.json`.
///
/// Output goes to `solver.log` in the results directory. A run past the
/// configured timeout is killed and reported as [`Error::Timeout`]; a
/// non-zero exit as [`Error::SolverFailure`] with the end of the log.
pub fn run_solver(model_dir: &Path, config: &ModelConfig) -> Result<SolverRun> {
    let settings = &config.solver;
    let results = model_dir.join(&config.results_dir);
    fs::create_dir_all(&results)?;
    let log = results.join("solver.log");
    let out = File::create(&log)?;
    let err = out.try_clone()?;

    let model_file = model_dir.join(MODEL_FILE);
    let mut cmd = Command::new(&settings.executable);
    cmd.args(&settings.args)
        .arg(&model_file)
        .current_dir(model_dir)
        .stdin(Stdio::null())
        .stdout(out)
        .stderr(err);
    debug!("spawning {:?}", cmd);

    let start = Instant::now();
    let mut child = cmd.spawn().map_err(|e| {
        Error::SolverFailure(format!("cannot start {}: {e}", settings.executable.display()))
    })?;
    let deadline = Duration::from_secs(settings.timeout_seconds);

    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if start.elapsed() >= deadline {
            warn!("solver exceeded {} s, killing it", settings.timeout_seconds);
            // the child may exit between the poll and the kill
            let _ = child.kill();
            let _ = child.wait();
            return Err(Error::Timeout {
                seconds: settings.timeout_seconds,
            });
        }
        thread::sleep(POLL_INTERVAL);
    };
    let elapsed = start.elapsed();

    if !status.success() {
        return Err(Error::SolverFailure(format!("{status}\n{}", log_tail(&log))));
    }
    info!("solver finished in {:.1} s", elapsed.as_secs_f64());
    Ok(SolverRun { elapsed, log })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn config(script: &str, timeout_seconds: u64) -> ModelConfig {
        let t0 = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        let mut config = ModelConfig::new("test", t0, t0);
        config.solver.executable = PathBuf::from("sh");
        config.solver.args = vec!["-c".into(), script.into()];
        config.solver.timeout_seconds = timeout_seconds;
        config
    }

    #[test]
    fn test_success_writes_log() {
        let dir = tempfile::tempdir().unwrap();
        let run = run_solver(dir.path(), &config("echo converged", 10)).unwrap();
        assert!(fs::read_to_string(run.log).unwrap().contains("converged"));
    }

    #[test]
    fn test_nonzero_exit_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let err = run_solver(dir.path(), &config("echo 'basin 3 dried up' >&2; exit 3", 10)).unwrap_err();
        match err {
            Error::SolverFailure(msg) => assert!(msg.contains("basin 3 dried up")),
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_deadline_is_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let err = run_solver(dir.path(), &config("sleep 30", 1)).unwrap_err();
        assert!(matches!(err, Error::Timeout { seconds: 1 }));
    }

    #[test]
    fn test_missing_executable() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config("", 1);
        cfg.solver.executable = PathBuf::from("/nonexistent/solver");
        assert!(matches!(run_solver(dir.path(), &cfg), Err(Error::SolverFailure(_))));
    }
}
