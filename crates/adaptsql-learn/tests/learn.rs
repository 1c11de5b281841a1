//! Learner behavior against simulated MySQL and PostgreSQL sessions.

mod support;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use adaptsql_core::{
    BoolType, FeatureValue, JsonType, Observer, Policy, QuoteStyle, Registry, TimestampType,
    TlsState, UpsertDialect, WirePack,
};
use adaptsql_learn::{Learner, learn_capabilities, learn_features};
use support::{Flavor, SimServer};

fn pack(family: &str) -> Arc<WirePack> {
    Registry::builtin().unwrap().pack(family).unwrap()
}

#[derive(Default)]
struct ProbeLog(Mutex<Vec<(String, bool)>>);

impl Observer for ProbeLog {
    fn on_probe(&self, name: &str, ok: bool) {
        self.0.lock().unwrap().push((name.to_string(), ok));
    }
}

#[test]
fn test_mysql_capability_matrix() {
    let mut server = SimServer::new(Flavor::Mysql);
    let matrix = learn_capabilities(&mut server, &pack("mysql"), &Policy::default());

    assert_eq!(matrix.version, "8.0.36-0ubuntu0.22.04.1");
    assert_eq!(
        matrix.feature("maxAllowedPacket"),
        Some(&FeatureValue::Number(67_108_864.0))
    );
    assert_eq!(
        matrix.feature("defaultStorageEngine"),
        Some(&FeatureValue::Text("InnoDB".to_string()))
    );
    // A variable the server refused stays absent.
    assert_eq!(matrix.feature("lowerCaseTableNames"), None);

    assert!(matrix.is_enabled("checkConstraints"));
    assert!(matrix.is_enabled("json"));
    assert!(!matrix.is_enabled("concurrentIndexCreate"));
    assert!(matrix.is_enabled("utf8mb4"));
    assert!(!matrix.is_enabled("performanceSchema"));

    assert_eq!(matrix.limits.max_identifier_len, 64);
    assert!(matrix.supports("on duplicate key update"));
    assert!(matrix.is_reserved("select"));
    assert_eq!(matrix.security.tls, TlsState::Off);
    assert_eq!(matrix.security.trust, "system");
    assert_eq!(matrix.security.fingerprint, None);
}

#[test]
fn test_old_mysql_locks_newer_features() {
    let mut server = SimServer::new(Flavor::Mysql).with_version(Some("5.7.44-log"));
    let matrix = learn_capabilities(&mut server, &pack("mysql"), &Policy::default());

    assert!(matrix.is_enabled("json"));
    assert!(matrix.is_enabled("onlineDdl"));
    assert!(!matrix.is_enabled("cte"));
    assert!(!matrix.is_enabled("checkConstraints"));
    assert_eq!(matrix.feature("cte"), Some(&FeatureValue::Bool(false)));
}

#[test]
fn test_unknown_version_is_not_fatal() {
    let mut server = SimServer::new(Flavor::Mysql).with_version(None);
    let matrix = learn_capabilities(&mut server, &pack("mysql"), &Policy::default());

    assert_eq!(matrix.version, "unknown");
    assert!(!matrix.is_enabled("json"));
    // Probe rules behind a version gate are not attempted.
    assert!(!server.log.iter().any(|sql| sql.contains("utf8mb4")));
    // Variables are still learned.
    assert!(matrix.feature("sqlMode").is_some());
}

#[test]
fn test_postgres_probe_overrides_declared_feature() {
    let mut server = SimServer::new(Flavor::Postgres).with_tls("ab:cd:ef");
    let policy = Policy::default().trust("pinned");
    let matrix = learn_capabilities(&mut server, &pack("postgres"), &policy);

    assert_eq!(matrix.version, "16.2 (Debian 16.2-1.pgdg120+2)");
    assert!(matrix.is_enabled("mergeStatement"));
    assert!(matrix.is_enabled("concurrentIndexCreate"));
    // Declared as available from 9.4 but the extension is not installed.
    assert_eq!(matrix.feature("pgStatStatements"), Some(&FeatureValue::Bool(false)));
    assert_eq!(matrix.limits.max_identifier_len, 63);
    assert!(matrix.supports("CREATE INDEX CONCURRENTLY"));
    assert_eq!(matrix.security.tls, TlsState::On);
    assert_eq!(matrix.security.trust, "pinned");
    assert_eq!(matrix.security.fingerprint.as_deref(), Some("ab:cd:ef"));
}

#[test]
fn test_mysql_feature_map() {
    let mut server = SimServer::new(Flavor::Mysql);
    let matrix = learn_capabilities(&mut server, &pack("mysql"), &Policy::default());
    let features = learn_features(&mut server, Some(&matrix));

    assert_eq!(features.quote, QuoteStyle::Backtick);
    assert!(features.if_exists);
    assert!(features.if_not_exists);
    assert_eq!(features.json_type, JsonType::Json);
    assert!(!features.returning);
    assert_eq!(features.upsert, UpsertDialect::OnDuplicate);
    assert_eq!(
        features.online_alter_hint.as_deref(),
        Some("ALGORITHM=INPLACE,LOCK=NONE")
    );
    assert_eq!(features.bool_type, BoolType::Boolean);
    assert_eq!(features.timestamp_type, TimestampType::Timestamp);
    assert!(!features.transactional_ddl);
    assert!(!features.concurrent_index);
    assert_eq!(features.max_ident_len, 64);
    assert_eq!(features.auth_methods, vec!["mysql_native_password".to_string()]);
    assert!(server.tables.is_empty(), "probe residue: {:?}", server.tables);
}

#[test]
fn test_postgres_feature_map() {
    let mut server = SimServer::new(Flavor::Postgres).with_tls("01:02");
    let features = learn_features(&mut server, None);

    assert_eq!(features.quote, QuoteStyle::Double);
    assert_eq!(features.json_type, JsonType::Json);
    assert!(features.returning);
    assert_eq!(features.upsert, UpsertDialect::OnConflict);
    assert_eq!(features.online_alter_hint, None);
    assert_eq!(features.timestamp_type, TimestampType::WithTimeZone);
    assert!(features.transactional_ddl);
    assert!(features.concurrent_index);
    assert_eq!(features.max_ident_len, 63);
    assert_eq!(features.server_fingerprint.as_deref(), Some("01:02"));
    assert!(server.tables.is_empty(), "probe residue: {:?}", server.tables);
}

#[test]
fn test_probes_are_repeatable() {
    let mut server = SimServer::new(Flavor::Postgres);
    let first = learn_features(&mut server, None);
    let second = learn_features(&mut server, None);
    assert_eq!(first, second);
    assert!(server.tables.is_empty());
}

#[test]
fn test_leftover_scratch_tables_are_cleared_first() {
    let mut server = SimServer::new(Flavor::Mysql);
    for table in adaptsql_learn::PROBE_TABLES {
        server.tables.insert(table.to_string());
    }
    let features = learn_features(&mut server, None);
    assert_eq!(features.json_type, JsonType::Json);
    assert_eq!(features.upsert, UpsertDialect::OnDuplicate);
    assert!(server.tables.is_empty());
}

#[test]
fn test_exhausted_budget_skips_probes() {
    let log = Arc::new(ProbeLog::default());
    let learner = Learner::new()
        .max_runtime(Duration::ZERO)
        .observer(log.clone());
    let mut server = SimServer::new(Flavor::Mysql);

    let matrix = learner.capabilities(&mut server, &pack("mysql"), &Policy::default());
    assert_eq!(matrix.version, "unknown");
    assert!(!matrix.is_enabled("json"));
    assert!(server.log.is_empty());

    let features = learner.features(&mut server, None);
    assert_eq!(features.upsert, UpsertDialect::None);
    assert_eq!(features.quote, QuoteStyle::Double);
    // Only scratch cleanup reaches the server.
    assert!(server.log.iter().all(|sql| sql.starts_with("DROP TABLE IF EXISTS") || sql == "ROLLBACK"));

    let probes = log.0.lock().unwrap();
    assert!(!probes.is_empty());
    assert!(probes.iter().all(|(_, ok)| !ok));
}

#[test]
fn test_lost_session_folds_to_absent() {
    let mut server = SimServer::new(Flavor::Postgres);
    server.die_on = Some("CREATE TABLE __adaptsql_probe_ret".to_string());

    let features = learn_features(&mut server, None);
    assert_eq!(features.json_type, JsonType::Json);
    assert!(!features.returning);
    assert_eq!(features.upsert, UpsertDialect::None);
    assert!(!features.transactional_ddl);

    let after_death = server
        .log
        .iter()
        .skip_while(|sql| !sql.starts_with("CREATE TABLE __adaptsql_probe_ret"))
        .count();
    assert_eq!(after_death, 1);
}

#[test]
fn test_observer_sees_each_probe() {
    let log = Arc::new(ProbeLog::default());
    let mut server = SimServer::new(Flavor::Postgres);
    Learner::new()
        .observer(log.clone())
        .capabilities(&mut server, &pack("postgres"), &Policy::default());

    let probes = log.0.lock().unwrap();
    let names: Vec<&str> = probes.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names[0], "version");
    assert!(names.contains(&"maxIdentifierLength"));
    assert!(probes.contains(&("pgStatStatements".to_string(), false)));
    assert!(probes.contains(&("concurrentIndexCreate".to_string(), true)));
}

#[test]
fn test_matrix_serializes_camel_case() {
    let mut server = SimServer::new(Flavor::Mysql);
    let matrix = learn_capabilities(&mut server, &pack("mysql"), &Policy::default());
    let json = serde_json::to_value(&matrix).unwrap();
    assert_eq!(json["limits"]["maxIdentifierLen"], 64);
    assert_eq!(json["security"]["tls"], "off");
    assert_eq!(json["features"]["json"], true);
}
