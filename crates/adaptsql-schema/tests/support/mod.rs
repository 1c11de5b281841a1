//! A scripted `Transport` that records statements and answers from a closure.

#![allow(dead_code)]

use std::sync::Arc;

use adaptsql_core::error::QueryError;
use adaptsql_core::{
    ColumnInfo, Dialect, Error, ExecRequest, ExecResult, Result, Row, Session, SessionMeta,
    Transport, Value,
};

type Handler = Box<dyn FnMut(&str) -> Result<ExecResult> + Send>;

pub struct ScriptedTransport {
    dialect: Dialect,
    session: Session,
    handler: Handler,
    pub sent: Vec<String>,
    closed: bool,
}

impl ScriptedTransport {
    pub fn new(
        dialect: Dialect,
        handler: impl FnMut(&str) -> Result<ExecResult> + Send + 'static,
    ) -> Self {
        Self::with_database(dialect, None, handler)
    }

    pub fn with_database(
        dialect: Dialect,
        database: Option<&str>,
        handler: impl FnMut(&str) -> Result<ExecResult> + Send + 'static,
    ) -> Self {
        let meta = SessionMeta {
            database: database.map(str::to_string),
            ..SessionMeta::default()
        };
        Self {
            dialect,
            session: Session::new("scripted://".to_string(), dialect.family(), meta),
            handler: Box::new(handler),
            sent: Vec::new(),
            closed: false,
        }
    }
}

impl Transport for ScriptedTransport {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn session(&self) -> &Session {
        &self.session
    }

    fn exec(&mut self, req: &ExecRequest) -> Result<ExecResult> {
        self.sent.push(req.sql.clone());
        (self.handler)(&req.sql)
    }

    fn ping(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

pub fn rows(names: &[&str], data: &[&[Option<&str>]]) -> ExecResult {
    let columns = Arc::new(ColumnInfo::new(names.iter().map(|s| (*s).to_string()).collect()));
    let rows = data
        .iter()
        .map(|r| {
            let values = r
                .iter()
                .map(|v| v.map_or(Value::Null, |s| Value::Text(s.to_string())))
                .collect();
            Row::with_columns(Arc::clone(&columns), values)
        })
        .collect();
    ExecResult {
        columns,
        rows,
        affected_rows: 0,
        last_insert_id: None,
    }
}

pub fn query_error(message: &str) -> Error {
    Error::Query(QueryError {
        code: 1146,
        sql: None,
        sqlstate: Some("42S02".to_string()),
        message: message.to_string(),
        detail: None,
        hint: None,
    })
}
