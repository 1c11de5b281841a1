//! The driver-level surface over one live session.

use std::sync::Arc;

use adaptsql_core::{
    ApplyReport, CapabilityMatrix, Dialect, ExecRequest, ExecResult, FeatureMap, Policy,
    Result, Session, Transport, Value, WirePack,
};
use adaptsql_learn::Learner;
use adaptsql_schema::{
    ApplyOptions, Goal, Plan, PlanTarget, SchemaSnapshot, diff_snapshots, schema_improve,
};

/// One connection plus what has been learned about it.
///
/// The capability matrix and feature map are learned on first use and are
/// fixed for the life of the session; learning again takes a new connection.
/// They are never shared with other sessions.
pub struct Driver {
    transport: Box<dyn Transport>,
    pack: Arc<WirePack>,
    policy: Policy,
    learner: Learner,
    matrix: Option<CapabilityMatrix>,
    features: Option<FeatureMap>,
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let session = self.transport.session();
        f.debug_struct("Driver")
            .field("session", &session.id)
            .field("url", &session.url)
            .field("pack", &self.pack.name)
            .field("learned", &self.matrix.is_some())
            .field("closed", &self.transport.is_closed())
            .finish_non_exhaustive()
    }
}

impl Driver {
    /// Wrap an already authenticated transport.
    pub fn new(transport: Box<dyn Transport>, pack: Arc<WirePack>, policy: Policy) -> Self {
        Self {
            transport,
            pack,
            policy,
            learner: Learner::new(),
            matrix: None,
            features: None,
        }
    }

    pub fn learner(mut self, learner: Learner) -> Self {
        self.learner = learner;
        self
    }

    pub fn session(&self) -> &Session {
        self.transport.session()
    }

    pub fn dialect(&self) -> Dialect {
        self.transport.dialect()
    }

    pub fn pack(&self) -> &WirePack {
        &self.pack
    }

    pub fn transport(&mut self) -> &mut dyn Transport {
        self.transport.as_mut()
    }

    pub fn into_transport(self) -> Box<dyn Transport> {
        self.transport
    }

    pub fn ping(&mut self) -> Result<()> {
        self.transport.ping()
    }

    /// Run one statement with positional parameters.
    pub fn execute(&mut self, sql: &str, params: &[Value]) -> Result<ExecResult> {
        self.transport
            .exec(&ExecRequest::new(sql).with_params(params.to_vec()))
    }

    pub fn explain(&mut self, sql: &str) -> Result<ExecResult> {
        self.transport.explain(sql)
    }

    /// Introspect the live schema.
    pub fn snapshot(&mut self) -> Result<SchemaSnapshot> {
        adaptsql_schema::snapshot(self.transport.as_mut())
    }

    /// The capability matrix, learned on first call.
    pub fn capabilities(&mut self) -> &CapabilityMatrix {
        let matrix = match self.matrix.take() {
            Some(matrix) => matrix,
            None => self
                .learner
                .capabilities(self.transport.as_mut(), &self.pack, &self.policy),
        };
        self.matrix.insert(matrix)
    }

    /// The dialect feature map, learned on first call.
    pub fn features(&mut self) -> &FeatureMap {
        self.learned().2
    }

    /// Structural delta between two snapshots.
    pub fn plan_diff(&self, from: &SchemaSnapshot, to: &SchemaSnapshot) -> Plan {
        diff_snapshots(from, to)
    }

    /// A plan that satisfies `goals` with the least disruptive statements the
    /// server supports. Goals already met by the live schema are skipped.
    #[tracing::instrument(level = "debug", skip_all, fields(goals = goals.len()))]
    pub fn schema_improve(&mut self, goals: &[Goal]) -> Result<Plan> {
        let dialect = self.dialect();
        let live = self.snapshot()?;
        let (_, matrix, features) = self.learned();
        schema_improve(&PlanTarget::new(dialect, features, matrix).with_snapshot(&live), goals)
    }

    /// Execute `plan` in order, stopping at the first failing step.
    ///
    /// A rejected plan sends nothing. A failing step comes back as
    /// [`adaptsql_core::Error::Apply`] with the partial report attached.
    pub fn apply(&mut self, plan: &Plan, opts: &ApplyOptions) -> Result<ApplyReport> {
        let (transport, _, features) = self.learned();
        adaptsql_schema::apply(transport, features, plan, opts)
    }

    /// Send the protocol goodbye and drop the socket.
    pub fn close(&mut self) -> Result<()> {
        self.transport.close()
    }

    pub fn is_closed(&self) -> bool {
        self.transport.is_closed()
    }

    fn learned(&mut self) -> (&mut dyn Transport, &CapabilityMatrix, &FeatureMap) {
        let matrix = match self.matrix.take() {
            Some(matrix) => matrix,
            None => self
                .learner
                .capabilities(self.transport.as_mut(), &self.pack, &self.policy),
        };
        let features = match self.features.take() {
            Some(features) => features,
            None => self.learner.features(self.transport.as_mut(), Some(&matrix)),
        };
        let matrix = self.matrix.insert(matrix);
        let features = self.features.insert(features);
        (self.transport.as_mut(), matrix, features)
    }
}
