//! Runtime settings of an application.
//!
//! [`Settings`] is a plain value: construct it with [`Settings::default`],
//! adjust it with the `with_*` setters, or read it from the environment with
//! [`Settings::from_env`].
//!
//! | variable                        | field                     |
//! |---------------------------------|---------------------------|
//! | `CUBOS_WORKER_THREADS`          | `worker_threads`          |
//! | `CUBOS_PARALLEL`                | `parallel`                |
//! | `CUBOS_MAX_OBSERVER_ITERATIONS` | `max_observer_iterations` |
//!
//! Unparsable values are ignored with a warning.

use std::env;
use std::str::FromStr;

use tracing::warn;


/// Environment variable overriding [`Settings::worker_threads`].
pub const WORKER_THREADS_VAR: &str = "CUBOS_WORKER_THREADS";

/// Environment variable overriding [`Settings::parallel`].
pub const PARALLEL_VAR: &str = "CUBOS_PARALLEL";

/// Environment variable overriding [`Settings::max_observer_iterations`].
pub const MAX_OBSERVER_ITERATIONS_VAR: &str = "CUBOS_MAX_OBSERVER_ITERATIONS";

/// Tuning knobs of the scheduler and the command flush.

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    /// Size of the worker pool running parallel stages. `None` uses rayon's
    /// default (one thread per core).
    pub worker_threads: Option<usize>,

    /// Runs the systems of a stage in parallel. When `false`, every system runs
    /// on the calling thread.
    pub parallel: bool,

    /// Cap on the rounds of the command/observer fixed-point loop.
    pub max_observer_iterations: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self { worker_threads: None, parallel: true, max_observer_iterations: 64 }
    }
}

impl Settings {
    /// Default settings overridden by the `CUBOS_*` environment variables.
    pub fn from_env() -> Self {
        let mut settings = Self::default();

        if let Some(threads) = parse_var::<usize>(WORKER_THREADS_VAR) {
            settings.worker_threads = Some(threads).filter(|&n| n > 0);
        }
        if let Ok(value) = env::var(PARALLEL_VAR) {
            match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => settings.parallel = true,
                "0" | "false" | "no" | "off" => settings.parallel = false,
                other => warn!(variable = PARALLEL_VAR, value = other, "ignoring unparsable setting"),
            }
        }
        if let Some(iterations) = parse_var::<usize>(MAX_OBSERVER_ITERATIONS_VAR) {
            settings.max_observer_iterations = iterations.max(1);
        }

        settings
    }

    /// Sets the worker pool size.
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = Some(threads).filter(|&n| n > 0);
        self
    }

    /// Enables or disables parallel stages.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Sets the cap of the command/observer loop (at least one round).
    pub fn with_max_observer_iterations(mut self, iterations: usize) -> Self {
        self.max_observer_iterations = iterations.max(1);
        self
    }
}

fn parse_var<T: FromStr>(name: &str) -> Option<T> {
    let value = env::var(name).ok()?;
    match value.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!(variable = name, value = %value, "ignoring unparsable setting");
            None
        }
    }
}
