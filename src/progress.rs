// src/progress.rs

use log::info;

/// Maximum number of notifications a sink receives per pass (plus the final one).
pub const MAX_NOTIFICATIONS_PER_PASS: usize = 100;

/// Receives progress notifications from the fitting and projection passes.
///
/// Purely observational: nothing a sink does affects computed results.
pub trait ProgressSink {
    /// Called once before a pass over `total_steps` frames starts.
    fn begin_pass(&mut self, _pass_name: &'static str, _total_steps: usize) {}

    /// `current_step` frames of `total_steps` have been processed.
    fn update(&mut self, current_step: usize, total_steps: usize);
}

/// Discards all notifications.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn update(&mut self, _current_step: usize, _total_steps: usize) {}
}

/// Reports progress through the `log` facade at `info` level.
#[derive(Debug, Default, Clone)]
pub struct LogProgress {
    pass_name: &'static str,
}

impl ProgressSink for LogProgress {
    fn begin_pass(&mut self, pass_name: &'static str, total_steps: usize) {
        self.pass_name = pass_name;
        info!("{}: starting over {} frames", pass_name, total_steps);
    }

    fn update(&mut self, current_step: usize, total_steps: usize) {
        let percentage = if total_steps == 0 {
            100.0
        } else {
            100.0 * current_step as f64 / total_steps as f64
        };
        info!(
            "{} step {:5}/{} [{:5.1}%]",
            self.pass_name, current_step, total_steps, percentage
        );
    }
}

/// Throttles per-frame ticks so a sink sees at most about
/// [`MAX_NOTIFICATIONS_PER_PASS`] updates per pass.
pub(crate) struct ProgressTicker<'a> {
    sink: &'a mut dyn ProgressSink,
    total_steps: usize,
    interval: usize,
}

impl<'a> ProgressTicker<'a> {
    pub(crate) fn start(
        sink: &'a mut dyn ProgressSink,
        pass_name: &'static str,
        total_steps: usize,
    ) -> Self {
        sink.begin_pass(pass_name, total_steps);
        let interval = total_steps.div_ceil(MAX_NOTIFICATIONS_PER_PASS).max(1);
        Self {
            sink,
            total_steps,
            interval,
        }
    }

    /// Records that `completed` frames are done.
    pub(crate) fn tick(&mut self, completed: usize) {
        if completed % self.interval == 0 || completed == self.total_steps {
            self.sink.update(completed, self.total_steps);
        }
    }
}
