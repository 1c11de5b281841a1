//! Observability context handed to transports, the learner and the planner.
//!
//! There is no global registry: whoever constructs a component passes an
//! `Arc<dyn Observer>`. The default is [`NoopObserver`].

use std::sync::Arc;
use std::time::Duration;

/// Hooks for optional instrumentation. Every method defaults to a no-op.
pub trait Observer: Send + Sync {
    /// A handshake finished (successfully or not).
    fn on_connect(&self, _pack: &str, _tls: bool, _elapsed: Duration, _ok: bool) {}

    /// A statement round-trip finished.
    fn on_query(&self, _sql: &str, _elapsed: Duration, _ok: bool) {}

    /// A learner probe finished; `ok == false` means the feature was folded to absent.
    fn on_probe(&self, _name: &str, _ok: bool) {}

    /// A plan step finished.
    fn on_step(&self, _step: usize, _sql: &str, _ok: bool) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl Observer for NoopObserver {}

/// The default observability context.
pub fn noop() -> Arc<dyn Observer> {
    Arc::new(NoopObserver)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        queries: Mutex<Vec<(String, bool)>>,
    }

    impl Observer for Recording {
        fn on_query(&self, sql: &str, _elapsed: Duration, ok: bool) {
            self.queries.lock().unwrap().push((sql.to_string(), ok));
        }
    }

    #[test]
    fn test_default_methods_are_noops() {
        let obs = noop();
        obs.on_connect("mysql", false, Duration::ZERO, true);
        obs.on_probe("json", false);
    }

    #[test]
    fn test_custom_observer_receives_events() {
        let rec = Arc::new(Recording::default());
        let obs: Arc<dyn Observer> = rec.clone();
        obs.on_query("SELECT 1", Duration::from_millis(1), true);
        obs.on_step(0, "DROP TABLE x", false);
        assert_eq!(
            rec.queries.lock().unwrap().as_slice(),
            &[("SELECT 1".to_string(), true)]
        );
    }
}
