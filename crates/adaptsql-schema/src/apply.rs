//! Executing a plan against a live session.

use std::sync::Arc;
use std::time::Instant;

use adaptsql_core::error::ApplyError;
use adaptsql_core::observe::noop;
use adaptsql_core::report::ApplyAction;
use adaptsql_core::{ApplyReport, Error, FeatureMap, Observer, Result, Transport};

use crate::ir::{Op, Plan};
use crate::synth::{render_sql, validate_plan};

#[derive(Clone)]
pub struct ApplyOptions {
    /// Render and validate every step but send nothing.
    pub dry_run: bool,
    pub observer: Arc<dyn Observer>,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            observer: noop(),
        }
    }
}

impl std::fmt::Debug for ApplyOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplyOptions")
            .field("dry_run", &self.dry_run)
            .finish_non_exhaustive()
    }
}

impl ApplyOptions {
    pub fn dry_run() -> Self {
        Self {
            dry_run: true,
            ..Self::default()
        }
    }

    pub fn observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = observer;
        self
    }
}

/// Run `plan.ops` in order, stopping at the first failure.
///
/// The whole plan is validated first, so a `PlanError` means nothing was
/// sent. A failing step returns [`Error::Apply`] carrying the partial report;
/// steps already executed are not rolled back.
#[tracing::instrument(level = "debug", skip_all, fields(ops = plan.len(), dry_run = opts.dry_run))]
pub fn apply(
    transport: &mut dyn Transport,
    features: &FeatureMap,
    plan: &Plan,
    opts: &ApplyOptions,
) -> Result<ApplyReport> {
    validate_plan(features, plan)?;
    let started = Instant::now();
    let mut report = ApplyReport::new(opts.dry_run);

    for (step, op) in plan.ops.iter().enumerate() {
        let sql = render_sql(features, op);
        if let Op::ExecSql { unsafe_: true, .. } = op {
            tracing::warn!(step, sql = %sql, "executing unsafe verbatim SQL");
        }

        if opts.dry_run {
            report.actions.push(ApplyAction {
                step,
                ok: true,
                sql,
                error: None,
                affected_rows: None,
            });
            continue;
        }

        match transport.query(&sql) {
            Ok(result) => {
                tracing::debug!(step, sql = %sql, affected = result.affected_rows, "step applied");
                opts.observer.on_step(step, &sql, true);
                report.record_success(step, sql, Some(result.affected_rows));
            }
            Err(err) => {
                tracing::warn!(step, sql = %sql, error = %err, "step failed, aborting plan");
                opts.observer.on_step(step, &sql, false);
                report.record_failure(step, sql.clone(), err.to_string());
                report.elapsed_ms = elapsed_ms(started);
                return Err(Error::Apply(ApplyError {
                    step,
                    sql,
                    report,
                    source: Box::new(err),
                }));
            }
        }
    }

    report.elapsed_ms = elapsed_ms(started);
    Ok(report)
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
