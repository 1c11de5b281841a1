//! Manifest-driven capability learning.
//!
//! The probe order is fixed:
//!
//! 1. version (`discovery.version`), falling back to `"unknown"`
//! 2. discovery variables, each stored under its manifest name when it answers
//! 3. version-gated feature rules and asserted values
//! 4. probe rules, which override step 3 on conflict
//! 5. limits, SQL surface and security posture from the manifest, the
//!    policy and the session's handshake metadata

use adaptsql_core::{
    CapabilityMatrix, FeatureValue, Limits, Policy, SecurityPosture, SqlSurface, TlsState,
    WirePack,
};

use crate::probe::{Prober, first_cell};
use crate::semver::meets;

/// Variable that, when the server answers it, replaces the manifest identifier limit.
const IDENTIFIER_LIMIT_VARIABLES: [&str; 2] = ["maxIdentifierLength", "maxIdentifierLen"];

pub(crate) fn learn(probe: &mut Prober<'_>, pack: &WirePack, policy: &Policy) -> CapabilityMatrix {
    let mut matrix = CapabilityMatrix {
        version: learn_version(probe, pack),
        ..CapabilityMatrix::default()
    };

    for var in &pack.discovery.variables {
        let Some(result) = probe.run(&var.name, &var.sql) else {
            continue;
        };
        if let Some(raw) = first_cell(&result) {
            matrix
                .features
                .insert(var.name.clone(), FeatureValue::from_probe_text(&raw));
        }
    }

    for rule in &pack.features {
        let unlocked = rule
            .min_version
            .as_deref()
            .is_none_or(|min| meets(&matrix.version, min));
        let value = match (&rule.value, unlocked) {
            (_, false) => FeatureValue::Bool(false),
            (Some(asserted), true) => asserted.clone(),
            (None, true) => FeatureValue::Bool(true),
        };
        matrix.features.insert(rule.name.clone(), value);
    }

    for rule in &pack.probes {
        if let Some(min) = rule.min_version.as_deref() {
            if !meets(&matrix.version, min) {
                tracing::debug!(probe = %rule.name, min, version = %matrix.version, "probe below minimum version");
                matrix.features.insert(rule.name.clone(), FeatureValue::Bool(false));
                continue;
            }
        }
        let found = probe
            .run_with(&rule.name, &rule.sql, |r| r.columns.is_empty() || r.row_count() > 0)
            .is_some_and(|(_, present)| present);
        if let Some(previous) = matrix.features.get(&rule.name) {
            if previous.is_enabled() != found {
                tracing::debug!(feature = %rule.name, declared = ?previous, probed = found, "probe overrides declared feature");
            }
        }
        matrix.features.insert(rule.name.clone(), FeatureValue::Bool(found));
    }

    matrix.limits = learned_limits(pack.limits, &matrix);
    matrix.sql = SqlSurface {
        supports: pack.sql.supports.iter().map(|s| s.to_ascii_uppercase()).collect(),
        reserved_words: pack
            .sql
            .reserved_words
            .iter()
            .map(|s| s.to_ascii_uppercase())
            .collect(),
    };

    let session = probe.transport().session();
    let trust = if policy.trust.is_empty() {
        pack.security.trust.clone()
    } else {
        policy.trust.clone()
    };
    matrix.security = SecurityPosture {
        tls: if session.tls { TlsState::On } else { TlsState::Off },
        trust,
        fingerprint: session.meta.tls.as_ref().and_then(|t| t.fingerprint.clone()),
    };

    tracing::debug!(
        pack = %pack.name,
        version = %matrix.version,
        features = matrix.features.len(),
        skipped = probe.skipped(),
        "capability matrix learned"
    );
    matrix
}

fn learn_version(probe: &mut Prober<'_>, pack: &WirePack) -> String {
    probe
        .run("version", &pack.discovery.version)
        .as_ref()
        .and_then(first_cell)
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

fn learned_limits(declared: Limits, matrix: &CapabilityMatrix) -> Limits {
    let reported = IDENTIFIER_LIMIT_VARIABLES
        .iter()
        .find_map(|name| match matrix.features.get(*name) {
            Some(FeatureValue::Number(n)) => format!("{n}").parse::<usize>().ok(),
            _ => None,
        })
        .filter(|n| *n > 0);
    Limits {
        max_identifier_len: reported.unwrap_or(declared.max_identifier_len),
        ..declared
    }
}
