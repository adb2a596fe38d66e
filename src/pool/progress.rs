//! In-place progress line for a pool run

use super::state::PoolState;
use console::Style;
use std::io::{self, Write};
use std::time::Duration;

/// Renders `running / started / remaining / elapsed` on a single line
///
/// Write errors are ignored: losing the status line must not fail a run.
pub struct Progress {
    out: Box<dyn Write + Send>,
    bold: Style,
    banner: Style,
    clock: Style,
}

impl Progress {
    /// Status line on stderr, coloured when stderr supports it
    pub fn stderr() -> Self {
        Self::with_styling(Box::new(io::stderr()), console::colors_enabled_stderr())
    }

    pub fn to_writer(out: impl Write + Send + 'static) -> Self {
        Self::with_styling(Box::new(out), false)
    }

    fn with_styling(out: Box<dyn Write + Send>, styled: bool) -> Self {
        Self {
            out,
            bold: Style::new().bold().force_styling(styled),
            banner: Style::new().bold().on_green().force_styling(styled),
            clock: Style::new().bold().on_cyan().force_styling(styled),
        }
    }

    pub fn hidden() -> Self {
        Self::to_writer(io::sink())
    }

    pub fn header(&mut self, label: &str) {
        let line = format!("{}\n", self.banner.apply_to(label));
        self.emit(&line);
    }

    pub fn update(&mut self, state: &PoolState, concurrency: usize) {
        let line = self.status_line(state, concurrency);
        self.emit(&format!("\r{line}"));
    }

    pub fn finish(&mut self, state: &PoolState, concurrency: usize) {
        let line = self.status_line(state, concurrency);
        self.emit(&format!("\r{line}\n"));
    }

    fn status_line(&self, state: &PoolState, concurrency: usize) -> String {
        let count = |n: usize| self.bold.apply_to(format!("{n:5}"));
        format!(
            "workers (max {concurrency}): running {} started {} remaining {}  {}",
            count(state.running),
            count(state.started()),
            count(state.queued),
            self.clock.apply_to(format_elapsed(state.elapsed())),
        )
    }

    fn emit(&mut self, text: &str) {
        if let Err(e) = self.out.write_all(text.as_bytes()).and_then(|_| self.out.flush()) {
            tracing::debug!(error = %e, "Progress output failed");
        }
    }
}

/// `H:MM:SS` for a wall-clock duration
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}
