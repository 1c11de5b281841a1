//! Apply semantics: ordering, fail-fast, dry runs.

mod support;

use std::sync::{Arc, Mutex};

use adaptsql_core::{Dialect, Error, ExecResult, FeatureMap, Observer};
use adaptsql_schema::{ApplyOptions, ColumnSpec, IndexBuild, LogicalType, Op, Plan, Risk, apply};

use support::{ScriptedTransport, query_error};

fn three_step_plan() -> Plan {
    Plan::new(
        vec![
            Op::CreateTable {
                schema: String::new(),
                name: "events".to_string(),
                columns: vec![
                    ColumnSpec::new("id", LogicalType::BigInt).not_null(),
                    ColumnSpec::new("kind", LogicalType::String).len(32),
                ],
                pk: Some(vec!["id".to_string()]),
            },
            Op::AddColumn {
                schema: String::new(),
                table: "events".to_string(),
                column: ColumnSpec::new("payload", LogicalType::Json),
            },
            Op::AddIndex {
                schema: String::new(),
                table: "events".to_string(),
                name: "idx_events_kind".to_string(),
                columns: vec!["kind".to_string()],
                unique: false,
                build: IndexBuild::Blocking,
            },
        ],
        Risk::Medium,
    )
}

#[derive(Default)]
struct Steps(Mutex<Vec<(usize, bool)>>);

impl Observer for Steps {
    fn on_step(&self, step: usize, _sql: &str, ok: bool) {
        self.0.lock().unwrap().push((step, ok));
    }
}

#[test]
fn test_apply_runs_every_step_in_order() {
    let mut transport = ScriptedTransport::new(Dialect::Mysql, |_| Ok(ExecResult::ok(0, None)));
    let features = FeatureMap::mysql();

    let report = apply(&mut transport, &features, &three_step_plan(), &ApplyOptions::default()).unwrap();

    assert!(report.ok);
    assert_eq!(report.applied, 3);
    assert_eq!(report.actions.iter().map(|a| a.step).collect::<Vec<_>>(), vec![0, 1, 2]);
    assert_eq!(transport.sent.len(), 3);
    assert!(transport.sent[0].starts_with("CREATE TABLE IF NOT EXISTS `events`"));
    assert_eq!(transport.sent[1], "ALTER TABLE `events` ADD COLUMN `payload` json NULL");
    assert!(transport.sent[2].starts_with("CREATE INDEX `idx_events_kind`"));
}

#[test]
fn test_apply_stops_at_first_failure() {
    let mut transport = ScriptedTransport::new(Dialect::Mysql, |sql| {
        if sql.contains("ADD COLUMN") {
            Err(query_error("Table 'app.events' doesn't exist"))
        } else {
            Ok(ExecResult::ok(0, None))
        }
    });
    let features = FeatureMap::mysql();
    let steps = Arc::new(Steps::default());
    let opts = ApplyOptions::default().observer(steps.clone());

    let err = apply(&mut transport, &features, &three_step_plan(), &opts).unwrap_err();

    let Error::Apply(failure) = err else {
        panic!("expected an apply error");
    };
    assert_eq!(failure.step, 1);
    assert!(failure.sql.contains("ADD COLUMN"));
    assert!(matches!(*failure.source, Error::Query(_)));

    let report = &failure.report;
    assert!(!report.ok);
    assert_eq!(report.applied, 1);
    assert_eq!(report.actions.len(), 2);
    assert!(report.actions[0].ok);
    assert!(!report.actions[1].ok);
    assert!(report.actions[1].error.as_deref().unwrap().contains("doesn't exist"));
    assert_eq!(report.failure().map(|a| a.step), Some(1));

    // the index step is never sent
    assert_eq!(transport.sent.len(), 2);
    assert!(transport.sent.iter().all(|s| !s.contains("INDEX")));
    assert_eq!(*steps.0.lock().unwrap(), vec![(0, true), (1, false)]);
}

#[test]
fn test_dry_run_sends_nothing() {
    let mut transport = ScriptedTransport::new(Dialect::Postgres, |sql| {
        panic!("dry run sent {sql}");
    });
    let features = FeatureMap::postgres();

    let report = apply(&mut transport, &features, &three_step_plan(), &ApplyOptions::dry_run()).unwrap();

    assert!(report.ok);
    assert!(report.dry_run);
    assert_eq!(report.applied, 0);
    assert_eq!(report.actions.len(), 3);
    assert!(report.actions[0].sql.starts_with("CREATE TABLE IF NOT EXISTS \"events\""));
    assert!(transport.sent.is_empty());
}

#[test]
fn test_invalid_plan_sends_nothing() {
    let mut transport = ScriptedTransport::new(Dialect::Mysql, |_| Ok(ExecResult::ok(0, None)));
    let features = FeatureMap::mysql();
    let mut plan = three_step_plan();
    plan.ops.push(Op::AddIndex {
        schema: String::new(),
        table: "events".to_string(),
        name: "idx_events_missing".to_string(),
        columns: vec!["missing".to_string()],
        unique: false,
        build: IndexBuild::Blocking,
    });

    let err = apply(&mut transport, &features, &plan, &ApplyOptions::default()).unwrap_err();

    assert!(matches!(err, Error::Plan(_)), "{err:?}");
    assert!(transport.sent.is_empty());
}

#[test]
fn test_empty_plan_is_ok() {
    let mut transport = ScriptedTransport::new(Dialect::Mysql, |_| Ok(ExecResult::ok(0, None)));
    let report = apply(
        &mut transport,
        &FeatureMap::mysql(),
        &Plan::new(Vec::new(), Risk::Low),
        &ApplyOptions::default(),
    )
    .unwrap();
    assert!(report.ok);
    assert!(report.actions.is_empty());
}

#[test]
fn test_report_serializes_camel_case() {
    let mut transport = ScriptedTransport::new(Dialect::Mysql, |_| Ok(ExecResult::ok(2, None)));
    let report = apply(
        &mut transport,
        &FeatureMap::mysql(),
        &three_step_plan(),
        &ApplyOptions::default(),
    )
    .unwrap();
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["ok"], true);
    assert_eq!(json["actions"][0]["affectedRows"], 2);
    assert_eq!(json["dryRun"], false);
}
