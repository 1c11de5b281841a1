//! Driver surface over an in-memory MySQL-flavored transport.

use std::sync::{Arc, Mutex};

use adaptsql::{
    ApplyOptions, ColumnInfo, Dialect, Driver, Error, ExecRequest, ExecResult, Goal, Policy,
    QuoteStyle, Registry, Row, Session, SessionMeta, Transport, Value,
};
use adaptsql_core::error::QueryError;

type Log = Arc<Mutex<Vec<ExecRequest>>>;

struct FakeMysql {
    session: Session,
    log: Log,
    closed: bool,
}

impl FakeMysql {
    fn new(log: Log) -> Self {
        let meta = SessionMeta {
            host: "127.0.0.1".to_string(),
            port: 3306,
            database: Some("app".to_string()),
            server_version: "8.0.36".to_string(),
            auth_methods: vec!["mysql_native_password".to_string()],
            ..SessionMeta::default()
        };
        Self {
            session: Session::new("mysql://app@127.0.0.1/app".to_string(), "mysql-wire-v10", meta),
            log,
            closed: false,
        }
    }
}

fn scalar(value: &str) -> ExecResult {
    let columns = Arc::new(ColumnInfo::new(vec!["v".to_string()]));
    ExecResult {
        rows: vec![Row::with_columns(
            Arc::clone(&columns),
            vec![Value::Text(value.to_string())],
        )],
        columns,
        affected_rows: 0,
        last_insert_id: None,
    }
}

fn refuse(sql: &str) -> Error {
    Error::Query(QueryError {
        code: 1064,
        sql: Some(sql.to_string()),
        sqlstate: Some("42000".to_string()),
        message: "You have an error in your SQL syntax".to_string(),
        detail: None,
        hint: None,
    })
}

impl Transport for FakeMysql {
    fn dialect(&self) -> Dialect {
        Dialect::Mysql
    }

    fn session(&self) -> &Session {
        &self.session
    }

    fn exec(&mut self, req: &ExecRequest) -> adaptsql::Result<ExecResult> {
        self.log.lock().unwrap().push(req.clone());
        let sql = req.sql.as_str();
        if sql == "SELECT VERSION()" {
            Ok(scalar("8.0.36-log"))
        } else if sql.starts_with("SELECT `adaptsql_q`") {
            Ok(scalar("1"))
        } else if sql.contains("information_schema") {
            Ok(ExecResult::default())
        } else if ["RETURNING", "ON CONFLICT", "CONCURRENTLY"].iter().any(|t| sql.contains(t))
            || sql.starts_with("SELECT")
        {
            Err(refuse(sql))
        } else {
            Ok(ExecResult::ok(0, None))
        }
    }

    fn ping(&mut self) -> adaptsql::Result<()> {
        Ok(())
    }

    fn close(&mut self) -> adaptsql::Result<()> {
        self.closed = true;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

fn driver() -> (Driver, Log) {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let pack = Registry::builtin().unwrap().pack("mysql").unwrap();
    let driver = Driver::new(Box::new(FakeMysql::new(Arc::clone(&log))), pack, Policy::new());
    (driver, log)
}

fn sent(log: &Log) -> Vec<String> {
    log.lock().unwrap().iter().map(|r| r.sql.clone()).collect()
}

#[test]
fn test_capabilities_are_learned_once() {
    let (mut driver, log) = driver();

    assert_eq!(driver.capabilities().version, "8.0.36-log");
    assert!(driver.capabilities().is_enabled("json"));
    assert!(!driver.capabilities().is_enabled("concurrentIndexCreate"));
    let _ = driver.features();

    let versions = sent(&log).iter().filter(|s| *s == "SELECT VERSION()").count();
    assert_eq!(versions, 1);

    let before = sent(&log).len();
    let _ = driver.capabilities();
    let _ = driver.features();
    assert_eq!(sent(&log).len(), before);
}

#[test]
fn test_features_follow_the_server() {
    let (mut driver, _) = driver();
    let features = driver.features().clone();
    assert_eq!(features.quote, QuoteStyle::Backtick);
    assert_eq!(features.max_ident_len, 64);
    assert!(features.online_alter_hint.is_some());
    assert_eq!(features.auth_methods, vec!["mysql_native_password".to_string()]);
}

#[test]
fn test_schema_improve_uses_online_ddl() {
    let (mut driver, _) = driver();
    let plan = driver
        .schema_improve(&[
            Goal::IndexColumns {
                schema: "app".to_string(),
                table: "orders".to_string(),
                columns: vec!["customer_id".to_string()],
                unique: false,
                name: None,
            },
            Goal::ReduceLatency {
                schema: "app".to_string(),
                table: None,
            },
        ])
        .unwrap();

    let report = driver.apply(&plan, &ApplyOptions::dry_run()).unwrap();
    let sql: Vec<&str> = report.actions.iter().map(|a| a.sql.as_str()).collect();
    assert_eq!(
        sql,
        vec![
            "ALTER TABLE `app`.`orders` ADD INDEX `idx_orders_customer_id` (`customer_id`), ALGORITHM=INPLACE,LOCK=NONE",
            "ANALYZE TABLE `app`.`orders`",
        ]
    );
    assert!(sql.iter().all(|s| !s.contains("CONCURRENT")));
}

#[test]
fn test_dry_run_sends_nothing_after_learning() {
    let (mut driver, log) = driver();
    let _ = driver.features();
    let before = sent(&log).len();

    let plan = driver.plan_diff(
        &adaptsql::SchemaSnapshot::new(Vec::new()),
        &adaptsql::SchemaSnapshot::new(vec![
            adaptsql::TableSnapshot::new("", "audit")
                .column(adaptsql::ColumnSpec::new("id", adaptsql::LogicalType::BigInt).not_null())
                .primary_key(["id"]),
        ]),
    );
    let report = driver.apply(&plan, &ApplyOptions::dry_run()).unwrap();

    assert!(report.dry_run);
    assert_eq!(
        report.actions[0].sql,
        "CREATE TABLE IF NOT EXISTS `audit` (`id` bigint NOT NULL, PRIMARY KEY (`id`))"
    );
    assert_eq!(sent(&log).len(), before);

    let report = driver.apply(&plan, &ApplyOptions::default()).unwrap();
    assert_eq!(report.applied, 1);
    assert_eq!(sent(&log).len(), before + 1);
}

#[test]
fn test_execute_passes_parameters() {
    let (mut driver, log) = driver();
    driver
        .execute("UPDATE t SET v = ? WHERE id = ?", &[Value::from("x"), Value::Int(7)])
        .unwrap();
    let last = log.lock().unwrap().last().cloned().unwrap();
    assert_eq!(last.params, vec![Value::Text("x".to_string()), Value::Int(7)]);
}

#[test]
fn test_close_marks_driver_closed() {
    let (mut driver, _) = driver();
    driver.ping().unwrap();
    assert!(!driver.is_closed());
    driver.close().unwrap();
    assert!(driver.is_closed());
}
