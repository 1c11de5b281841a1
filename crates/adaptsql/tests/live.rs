//! End-to-end checks against real servers.
//!
//! Set `ADAPTSQL_TEST_MYSQL_URL` and/or `ADAPTSQL_TEST_PG_URL` (with a
//! database name) to run them; otherwise every test returns early.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use adaptsql::{
    ApplyOptions, ColumnSpec, Connector, Driver, Goal, LogicalType, Policy, Risk, SchemaSnapshot,
    TableSnapshot,
};

const MYSQL_URL_ENV: &str = "ADAPTSQL_TEST_MYSQL_URL";
const PG_URL_ENV: &str = "ADAPTSQL_TEST_PG_URL";

fn live_driver(env: &str) -> Option<Driver> {
    let url = std::env::var(env).ok().filter(|u| !u.trim().is_empty())?;
    let connector = Connector::new()
        .policy(Policy::from_env().require_tls_for_remote(false))
        .max_learn_time(Duration::from_secs(20));
    Some(connector.connect(&url).unwrap_or_else(|e| panic!("connect via {env}: {e}")))
}

fn unique_table(prefix: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_nanos();
    format!("{prefix}_{nanos}")
}

fn schema_of(driver: &Driver) -> String {
    match driver.dialect() {
        adaptsql::Dialect::Mysql => driver.session().meta.database.clone().unwrap_or_default(),
        adaptsql::Dialect::Postgres => "public".to_string(),
    }
}

fn select_one(env: &str) {
    let Some(mut driver) = live_driver(env) else {
        eprintln!("skipping live tests: set {env}");
        return;
    };
    driver.ping().unwrap();
    let result = driver.execute("SELECT 1", &[]).unwrap();
    assert_eq!(result.scalar_text(), Some("1"));
    driver.close().unwrap();
    assert!(driver.is_closed());
}

fn learn_leaves_no_residue(env: &str) {
    let Some(mut driver) = live_driver(env) else {
        eprintln!("skipping live tests: set {env}");
        return;
    };
    assert_ne!(driver.capabilities().version, "unknown");
    let _ = driver.features();
    let snapshot = driver.snapshot().unwrap();
    assert!(
        snapshot
            .tables
            .iter()
            .all(|t| !t.name.starts_with("__adaptsql_probe")),
        "probe tables left behind"
    );
    driver.close().unwrap();
}

fn create_index_and_snapshot(env: &str) {
    let Some(mut driver) = live_driver(env) else {
        eprintln!("skipping live tests: set {env}");
        return;
    };
    let schema = schema_of(&driver);
    let table = unique_table("adaptsql_live");
    let wanted = SchemaSnapshot::new(vec![
        TableSnapshot::new(schema.clone(), table.clone())
            .column(ColumnSpec::new("id", LogicalType::BigInt).not_null())
            .column(ColumnSpec::new("email", LogicalType::String).len(120))
            .primary_key(["id"]),
    ]);

    let before = driver.snapshot().unwrap();
    let plan = driver.plan_diff(&before, &wanted);
    // only the new table: everything else in `before` would be a drop
    let create = adaptsql::Plan::new(
        plan.ops.into_iter().filter(|op| !op.is_destructive()).collect(),
        Risk::Low,
    );
    driver.apply(&create, &ApplyOptions::default()).unwrap();

    let improve = driver
        .schema_improve(&[
            Goal::IndexColumns {
                schema: schema.clone(),
                table: table.clone(),
                columns: vec!["email".to_string()],
                unique: false,
                name: None,
            },
            Goal::ReduceLatency {
                schema: schema.clone(),
                table: Some(table.clone()),
            },
        ])
        .unwrap();
    let report = driver.apply(&improve, &ApplyOptions::default()).unwrap();
    assert!(report.ok, "{report:?}");

    let after = driver.snapshot().unwrap();
    let live = after.table(&schema, &table).expect("table created");
    assert!(live.index_on(&["email".to_string()]).is_some());

    let drop = adaptsql::render_sql(
        driver.features(),
        &adaptsql::Op::DropTable {
            schema: schema.clone(),
            name: table.clone(),
        },
    );
    driver.execute(&drop, &[]).unwrap();
    driver.close().unwrap();
}

#[test]
fn test_mysql_select_one() {
    select_one(MYSQL_URL_ENV);
}

#[test]
fn test_mysql_learning_leaves_no_residue() {
    learn_leaves_no_residue(MYSQL_URL_ENV);
}

#[test]
fn test_mysql_create_index_and_snapshot() {
    create_index_and_snapshot(MYSQL_URL_ENV);
}

#[test]
fn test_pg_select_one() {
    select_one(PG_URL_ENV);
}

#[test]
fn test_pg_learning_leaves_no_residue() {
    learn_leaves_no_residue(PG_URL_ENV);
}

#[test]
fn test_pg_create_index_and_snapshot() {
    create_index_and_snapshot(PG_URL_ENV);
}
