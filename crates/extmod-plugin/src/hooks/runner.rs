//! Per-dispatch hook state.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

/// State of one dispatch of one hook.
///
/// Lives for exactly one dispatch. The delay queue holds modules that asked
/// to run again after the current pass, in request order.
#[derive(Debug)]
pub struct HookRunner {
    hook: String,
    started: Instant,
    started_at: DateTime<Utc>,
    exit_after_hook: bool,
    delayed: Vec<(String, String)>,
    last_run: bool,
}

impl HookRunner {
    /// Starts a runner for `hook`.
    pub fn new(hook: impl Into<String>) -> Self {
        Self {
            hook: hook.into(),
            started: Instant::now(),
            started_at: Utc::now(),
            exit_after_hook: false,
            delayed: Vec::new(),
            last_run: false,
        }
    }

    /// Hook being dispatched.
    pub fn hook(&self) -> &str {
        &self.hook
    }

    /// Wall-clock start of the dispatch.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Time since the dispatch started.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Queues `prefix` at `version` for the next pass.
    ///
    /// Returns `false` without queueing on the last pass.
    pub fn delay(&mut self, prefix: &str, version: &str) -> bool {
        if self.last_run {
            return false;
        }
        if !self.delayed.iter().any(|(p, _)| p == prefix) {
            self.delayed.push((prefix.to_string(), version.to_string()));
        }
        true
    }

    /// Returns whether `prefix` is queued for the next pass.
    pub fn is_delayed(&self, prefix: &str) -> bool {
        self.delayed.iter().any(|(p, _)| p == prefix)
    }

    /// Empties the delay queue, returning its contents.
    pub fn take_delayed(&mut self) -> Vec<(String, String)> {
        std::mem::take(&mut self.delayed)
    }

    /// Marks the upcoming pass as the last one.
    pub fn begin_last_run(&mut self) {
        self.last_run = true;
    }

    /// Returns whether the current pass is the last one.
    pub fn is_last_run(&self) -> bool {
        self.last_run
    }

    /// Asks the caller to end the request once the hook completes.
    pub fn request_exit(&mut self) {
        self.exit_after_hook = true;
    }

    /// Returns whether a handler asked to end the request.
    pub fn exit_requested(&self) -> bool {
        self.exit_after_hook
    }
}
