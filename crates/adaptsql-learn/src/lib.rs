//! Capability learning for AdaptSQL sessions.
//!
//! Two learning paths share one [`Learner`]:
//!
//! - [`Learner::capabilities`] folds the wire pack's discovery SQL, version
//!   rules and probe rules into a [`CapabilityMatrix`]
//! - [`Learner::features`] runs reversible DDL probes against scratch tables
//!   and returns the [`FeatureMap`] the synthesizer renders with
//!
//! Probes never fail the caller. A probe that errors, or that is skipped
//! because the runtime budget ran out, reads as "feature absent".
//!
//! ```rust,ignore
//! let learner = Learner::new();
//! let matrix = learner.capabilities(conn.as_mut(), &pack, &policy);
//! let features = learner.features(conn.as_mut(), Some(&matrix));
//! ```

mod features;
mod matrix;
mod probe;
pub mod semver;

use std::sync::Arc;
use std::time::Duration;

use adaptsql_core::observe::noop;
use adaptsql_core::{CapabilityMatrix, FeatureMap, Observer, Policy, Transport, WirePack};

pub use features::PROBE_TABLES;
pub use semver::{Version, meets};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LearnOptions {
    /// Once exceeded, remaining probes are skipped.
    pub max_runtime: Duration,
}

impl Default for LearnOptions {
    fn default() -> Self {
        Self {
            max_runtime: Duration::from_secs(30),
        }
    }
}

#[derive(Clone)]
pub struct Learner {
    options: LearnOptions,
    observer: Arc<dyn Observer>,
}

impl Default for Learner {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Learner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Learner")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Learner {
    pub fn new() -> Self {
        Self {
            options: LearnOptions::default(),
            observer: noop(),
        }
    }

    #[must_use]
    pub fn options(mut self, options: LearnOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn max_runtime(mut self, budget: Duration) -> Self {
        self.options.max_runtime = budget;
        self
    }

    #[must_use]
    pub fn observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = observer;
        self
    }

    /// Learn the capability matrix of the connected server.
    #[tracing::instrument(level = "debug", skip_all, fields(pack = %pack.name))]
    pub fn capabilities(
        &self,
        transport: &mut dyn Transport,
        pack: &WirePack,
        policy: &Policy,
    ) -> CapabilityMatrix {
        let mut prober = probe::Prober::new(
            transport,
            Arc::clone(&self.observer),
            self.options.max_runtime,
        );
        matrix::learn(&mut prober, pack, policy)
    }

    /// Learn dialect quirks with scratch-table probes.
    ///
    /// `matrix` supplies the identifier length limit; without it the
    /// conservative default of 63 is used.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn features(
        &self,
        transport: &mut dyn Transport,
        matrix: Option<&CapabilityMatrix>,
    ) -> FeatureMap {
        let mut prober = probe::Prober::new(
            transport,
            Arc::clone(&self.observer),
            self.options.max_runtime,
        );
        features::learn(&mut prober, matrix)
    }
}

/// [`Learner::capabilities`] with default options and no observer.
pub fn learn_capabilities(
    transport: &mut dyn Transport,
    pack: &WirePack,
    policy: &Policy,
) -> CapabilityMatrix {
    Learner::new().capabilities(transport, pack, policy)
}

/// [`Learner::features`] with default options and no observer.
pub fn learn_features(
    transport: &mut dyn Transport,
    matrix: Option<&CapabilityMatrix>,
) -> FeatureMap {
    Learner::new().features(transport, matrix)
}
