//! Outcome of applying a plan.

use serde::{Deserialize, Serialize};

/// One attempted plan step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyAction {
    /// Zero-based index into `Plan.ops`
    pub step: usize,
    pub ok: bool,
    /// The rendered SQL that was sent (or would be sent on a dry run)
    pub sql: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affected_rows: Option<u64>,
}

/// Report produced by one apply run.
///
/// `actions` lists every step attempted, in order, up to and including the
/// first failure. Only the apply routine that created a report mutates it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyReport {
    pub ok: bool,
    pub applied: usize,
    pub actions: Vec<ApplyAction>,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub elapsed_ms: u64,
}

impl ApplyReport {
    pub fn new(dry_run: bool) -> Self {
        Self {
            ok: true,
            applied: 0,
            actions: Vec::new(),
            dry_run,
            elapsed_ms: 0,
        }
    }

    pub fn record_success(&mut self, step: usize, sql: String, affected_rows: Option<u64>) {
        self.actions.push(ApplyAction {
            step,
            ok: true,
            sql,
            error: None,
            affected_rows,
        });
        self.applied += 1;
    }

    pub fn record_failure(&mut self, step: usize, sql: String, error: String) {
        self.actions.push(ApplyAction {
            step,
            ok: false,
            sql,
            error: Some(error),
            affected_rows: None,
        });
        self.ok = false;
    }

    /// The failing action, if the run stopped early.
    pub fn failure(&self) -> Option<&ApplyAction> {
        self.actions.iter().find(|a| !a.ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_tracks_failure() {
        let mut report = ApplyReport::new(false);
        report.record_success(0, "CREATE TABLE a (id int)".to_string(), Some(0));
        report.record_failure(1, "CREATE INDEX".to_string(), "boom".to_string());

        assert!(!report.ok);
        assert_eq!(report.applied, 1);
        assert_eq!(report.actions.len(), 2);
        assert_eq!(report.failure().map(|a| a.step), Some(1));
    }

    #[test]
    fn test_report_json_shape() {
        let mut report = ApplyReport::new(true);
        report.record_success(0, "SELECT 1".to_string(), None);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["ok"], true);
        assert_eq!(json["dryRun"], true);
        assert_eq!(json["actions"][0]["step"], 0);
        assert!(json["actions"][0].get("error").is_none());
    }
}
