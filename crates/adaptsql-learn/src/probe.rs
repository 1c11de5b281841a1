//! Exploratory statement runner shared by both learning paths.
//!
//! Every failure is swallowed here: a probe either yields a result or it
//! yields nothing, and nothing is always read as "feature absent".

use std::sync::Arc;
use std::time::{Duration, Instant};

use adaptsql_core::{ExecResult, Observer, Transport};

pub(crate) struct Prober<'a> {
    transport: &'a mut dyn Transport,
    observer: Arc<dyn Observer>,
    started: Instant,
    budget: Duration,
    skipped: usize,
}

impl<'a> Prober<'a> {
    pub(crate) fn new(
        transport: &'a mut dyn Transport,
        observer: Arc<dyn Observer>,
        budget: Duration,
    ) -> Self {
        Self {
            transport,
            observer,
            started: Instant::now(),
            budget,
            skipped: 0,
        }
    }

    pub(crate) fn transport(&self) -> &dyn Transport {
        &*self.transport
    }

    /// Past the budget, or the session is gone.
    pub(crate) fn exhausted(&self) -> bool {
        self.transport.is_closed() || self.started.elapsed() >= self.budget
    }

    /// Probes skipped because the learner was exhausted.
    pub(crate) fn skipped(&self) -> usize {
        self.skipped
    }

    /// Run a named probe and report it to the observer.
    pub(crate) fn run(&mut self, name: &str, sql: &str) -> Option<ExecResult> {
        self.run_with(name, sql, |_| true).map(|(result, _)| result)
    }

    /// Run a named probe whose answer still has to be judged; the observer
    /// sees the verdict rather than mere statement success.
    pub(crate) fn run_with(
        &mut self,
        name: &str,
        sql: &str,
        judge: impl FnOnce(&ExecResult) -> bool,
    ) -> Option<(ExecResult, bool)> {
        if self.exhausted() {
            self.skipped += 1;
            tracing::debug!(probe = name, "learner exhausted, probe skipped");
            self.observer.on_probe(name, false);
            return None;
        }
        match self.transport.query(sql) {
            Ok(result) => {
                let present = judge(&result);
                tracing::trace!(probe = name, sql, rows = result.row_count(), present, "probe ok");
                self.observer.on_probe(name, present);
                Some((result, present))
            }
            Err(err) => {
                tracing::warn!(probe = name, sql, error = %err, "probe failed, treating as absent");
                self.observer.on_probe(name, false);
                None
            }
        }
    }

    pub(crate) fn succeeds(&mut self, name: &str, sql: &str) -> bool {
        self.run(name, sql).is_some()
    }

    /// Cleanup statement. Runs even past the budget so scratch objects do
    /// not outlive the learner, but never once the session is closed.
    pub(crate) fn cleanup(&mut self, sql: &str) {
        if self.transport.is_closed() {
            return;
        }
        if let Err(err) = self.transport.query(sql) {
            tracing::debug!(sql, error = %err, "probe cleanup failed");
        }
    }
}

/// First cell of the first row as text. Text-protocol cells are always text.
pub(crate) fn first_cell(result: &ExecResult) -> Option<String> {
    let value = result.rows.first()?.get(0)?;
    if let Some(s) = value.as_str() {
        return Some(s.trim().to_string());
    }
    value.as_i64().map(|v| v.to_string())
}
