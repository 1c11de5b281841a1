//! Empirical dialect probes.
//!
//! Each probe works on a fixed-name scratch table that is dropped before and
//! after use, so running the learner twice, or after an interrupted run, is
//! harmless.

use adaptsql_core::{
    BoolType, CapabilityMatrix, FeatureMap, JsonType, QuoteStyle, TimestampType, UpsertDialect,
};

use crate::probe::{Prober, first_cell};

const ONLINE_ALTER_HINT: &str = "ALGORITHM=INPLACE,LOCK=NONE";

/// Scratch tables used by the probes.
pub const PROBE_TABLES: [&str; 9] = [
    "__adaptsql_probe_q",
    "__adaptsql_probe_json",
    "__adaptsql_probe_ret",
    "__adaptsql_probe_up",
    "__adaptsql_probe_alter",
    "__adaptsql_probe_ci",
    "__adaptsql_probe_bool",
    "__adaptsql_probe_ts",
    "__adaptsql_probe_txn",
];

pub(crate) fn learn(probe: &mut Prober<'_>, matrix: Option<&CapabilityMatrix>) -> FeatureMap {
    let quote = learn_quote(probe);

    drop_scratch(probe, "__adaptsql_probe_q");
    let if_not_exists = probe.succeeds(
        "ifNotExists",
        "CREATE TABLE IF NOT EXISTS __adaptsql_probe_q (id int)",
    );
    let if_exists = probe.succeeds("ifExists", "DROP TABLE IF EXISTS __adaptsql_probe_q");
    drop_scratch(probe, "__adaptsql_probe_q");

    let json_type = scratch(probe, "__adaptsql_probe_json", |p| {
        if p.succeeds("json", "CREATE TABLE __adaptsql_probe_json (d json)") {
            JsonType::Json
        } else if p.succeeds("jsonb", "CREATE TABLE __adaptsql_probe_json (d jsonb)") {
            JsonType::Jsonb
        } else {
            JsonType::Text
        }
    });

    let returning = scratch(probe, "__adaptsql_probe_ret", |p| {
        p.succeeds("returning.setup", "CREATE TABLE __adaptsql_probe_ret (id int)")
            && p.succeeds(
                "returning",
                "INSERT INTO __adaptsql_probe_ret (id) VALUES (1) RETURNING id",
            )
    });

    let upsert = scratch(probe, "__adaptsql_probe_up", |p| {
        if !p.succeeds(
            "upsert.setup",
            "CREATE TABLE __adaptsql_probe_up (id int PRIMARY KEY, v int)",
        ) {
            return UpsertDialect::None;
        }
        if p.succeeds(
            "upsertOnConflict",
            "INSERT INTO __adaptsql_probe_up (id, v) VALUES (1, 1) \
             ON CONFLICT (id) DO UPDATE SET v = excluded.v",
        ) {
            UpsertDialect::OnConflict
        } else if p.succeeds(
            "upsertOnDuplicate",
            "INSERT INTO __adaptsql_probe_up (id, v) VALUES (1, 1) \
             ON DUPLICATE KEY UPDATE v = VALUES(v)",
        ) {
            UpsertDialect::OnDuplicate
        } else {
            UpsertDialect::None
        }
    });

    let online_alter_hint = scratch(probe, "__adaptsql_probe_alter", |p| {
        let ok = p.succeeds("onlineAlter.setup", "CREATE TABLE __adaptsql_probe_alter (id int)")
            && p.succeeds(
                "onlineAlter",
                "ALTER TABLE __adaptsql_probe_alter ADD COLUMN c int, ALGORITHM=INPLACE, LOCK=NONE",
            );
        ok.then(|| ONLINE_ALTER_HINT.to_string())
    });

    let concurrent_index = scratch(probe, "__adaptsql_probe_ci", |p| {
        p.succeeds("concurrentIndex.setup", "CREATE TABLE __adaptsql_probe_ci (id int)")
            && p.succeeds(
                "concurrentIndex",
                "CREATE INDEX CONCURRENTLY adaptsql_ci_idx ON __adaptsql_probe_ci (id)",
            )
    });

    let bool_type = scratch(probe, "__adaptsql_probe_bool", |p| {
        if p.succeeds("boolean", "CREATE TABLE __adaptsql_probe_bool (b boolean)") {
            BoolType::Boolean
        } else {
            BoolType::TinyInt1
        }
    });

    let timestamp_type = scratch(probe, "__adaptsql_probe_ts", |p| {
        if p.succeeds(
            "timestampTz",
            "CREATE TABLE __adaptsql_probe_ts (t timestamp with time zone)",
        ) {
            TimestampType::WithTimeZone
        } else {
            TimestampType::Timestamp
        }
    });

    let transactional_ddl = learn_transactional_ddl(probe);

    let session = probe.transport().session();
    let max_ident_len = matrix.map_or(FeatureMap::default().max_ident_len, |m| {
        m.limits.max_identifier_len
    });

    FeatureMap {
        quote,
        if_exists,
        if_not_exists,
        json_type,
        returning,
        upsert,
        online_alter_hint,
        concurrent_index,
        bool_type,
        timestamp_type,
        transactional_ddl,
        max_ident_len,
        server_fingerprint: session.meta.tls.as_ref().and_then(|t| t.fingerprint.clone()),
        auth_methods: session.meta.auth_methods.clone(),
    }
}

/// A quoted alias is read back; a server that treats `"` as a string
/// delimiter returns the name instead of the value.
fn learn_quote(probe: &mut Prober<'_>) -> QuoteStyle {
    for (name, style) in [
        ("quoteDouble", QuoteStyle::Double),
        ("quoteBacktick", QuoteStyle::Backtick),
        ("quoteBracket", QuoteStyle::Bracket),
    ] {
        let sql = format!(
            "SELECT {}adaptsql_q{} FROM (SELECT 1 AS adaptsql_q) AS t",
            style.open(),
            style.close()
        );
        let echoed = probe.run(name, &sql).as_ref().and_then(first_cell);
        if echoed.as_deref() == Some("1") {
            return style;
        }
    }
    QuoteStyle::Double
}

/// Create a scratch table inside a transaction, roll back, and look for it.
fn learn_transactional_ddl(probe: &mut Prober<'_>) -> bool {
    const TABLE: &str = "__adaptsql_probe_txn";
    drop_scratch(probe, TABLE);
    if !probe.succeeds("transactionalDdl.begin", "BEGIN") {
        return false;
    }
    let created = probe.succeeds(
        "transactionalDdl.create",
        "CREATE TABLE __adaptsql_probe_txn (id int)",
    );
    probe.cleanup("ROLLBACK");
    let survived = probe.succeeds(
        "transactionalDdl.check",
        "SELECT 1 FROM __adaptsql_probe_txn",
    );
    drop_scratch(probe, TABLE);
    created && !survived
}

/// Run `body` between two drops of `table`.
fn scratch<T>(probe: &mut Prober<'_>, table: &str, body: impl FnOnce(&mut Prober<'_>) -> T) -> T {
    drop_scratch(probe, table);
    let out = body(&mut *probe);
    drop_scratch(probe, table);
    out
}

fn drop_scratch(probe: &mut Prober<'_>, table: &str) {
    probe.cleanup(&format!("DROP TABLE IF EXISTS {table}"));
}
