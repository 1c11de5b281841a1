//! Wire packs (Transport Definitions) and the scheme registry.
//!
//! A wire pack is a static JSON manifest describing one dialect's framing,
//! command opcodes, auth plugin order, discovery probes, feature rules, default
//! limits and trust level. The registry maps URL schemes to dialect families
//! and families to pack files. Both are read-only; the built-in set is parsed
//! once and cached for the whole process.

use crate::capability::{FeatureValue, Limits};
use crate::config::ConnectUrl;
use crate::error::{ConfigError, Error, Result, config_error};
use crate::transport::Dialect;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

/// Environment variable naming a directory that overrides the built-in manifests.
pub const TRANSPORTS_DIR_ENV: &str = "ADAPTSQL_TRANSPORTS_DIR";

const BUILTIN_REGISTRY: &str = include_str!("../transports/registry.json");
const BUILTIN_PACKS: &[(&str, &str)] = &[
    ("mysql.json", include_str!("../transports/mysql.json")),
    ("postgres.json", include_str!("../transports/postgres.json")),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FramingKind {
    /// 3-byte little-endian length + 1-byte sequence
    #[serde(rename = "mysql-3byte-len")]
    Mysql3ByteLen,
    /// 1-byte tag + 4-byte big-endian length
    #[serde(rename = "pg-v3")]
    PgV3,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Framing {
    pub kind: FramingKind,
    /// Character set id sent in handshake responses
    #[serde(default)]
    pub charset_default: Option<u8>,
    /// Magic code of the TLS negotiation request, for protocols that have one
    #[serde(default)]
    pub ssl_request_code: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Caps {
    /// Bit value of the client TLS capability flag
    #[serde(rename = "clientSSLFlag", alias = "clientSslFlag", default)]
    pub client_ssl_flag: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Commands {
    pub query: u8,
    #[serde(default)]
    pub ping: Option<u8>,
    #[serde(default)]
    pub quit: Option<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSection {
    /// Candidate plugin names, tried in this order
    pub algos: Vec<String>,
    #[serde(default)]
    pub tls_required_for: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeSection {
    /// Greeting layout name, e.g. `mysql-v10`
    pub greeting: String,
    pub auth: AuthSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableProbe {
    pub name: String,
    pub sql: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Discovery {
    /// Statement returning the version text in its first cell
    pub version: String,
    #[serde(default)]
    pub variables: Vec<VariableProbe>,
}

/// A feature unlocked by a minimum server version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureRule {
    pub name: String,
    #[serde(default)]
    pub min_version: Option<String>,
    /// Value when unlocked; `true` when omitted
    #[serde(default)]
    pub value: Option<FeatureValue>,
}

/// A feature that is inferred by running a statement once the version gate passes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeRule {
    pub name: String,
    #[serde(default)]
    pub min_version: Option<String>,
    pub sql: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlDecl {
    #[serde(default)]
    pub supports: Vec<String>,
    #[serde(default)]
    pub reserved_words: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityDecl {
    #[serde(default = "default_trust")]
    pub trust: String,
}

impl Default for SecurityDecl {
    fn default() -> Self {
        Self {
            trust: default_trust(),
        }
    }
}

fn default_trust() -> String {
    "system".to_string()
}

/// One dialect's Transport Definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WirePack {
    pub name: String,
    pub family: String,
    pub framing: Framing,
    #[serde(default)]
    pub caps: Caps,
    pub commands: Commands,
    pub handshake: HandshakeSection,
    pub discovery: Discovery,
    #[serde(default)]
    pub features: Vec<FeatureRule>,
    #[serde(default)]
    pub probes: Vec<ProbeRule>,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub sql: SqlDecl,
    #[serde(default)]
    pub security: SecurityDecl,
}

impl WirePack {
    /// Parse and validate a manifest.
    pub fn from_json(json: &str) -> Result<Self> {
        let pack: WirePack = serde_json::from_str(json)
            .map_err(|e| config_error(format!("invalid wire pack: {e}")))?;
        pack.validate()?;
        Ok(pack)
    }

    pub fn dialect(&self) -> Result<Dialect> {
        Dialect::from_family(&self.family).ok_or_else(|| {
            config_error(format!(
                "wire pack {:?} declares unsupported family {:?}",
                self.name, self.family
            ))
        })
    }

    /// Is `plugin` declared as needing an encrypted channel?
    pub fn tls_required_for(&self, plugin: &str) -> bool {
        self.handshake
            .auth
            .tls_required_for
            .iter()
            .any(|p| p == plugin)
    }

    /// Charset id for handshake responses (45 = utf8mb4_general_ci).
    pub fn charset(&self) -> u8 {
        self.framing.charset_default.unwrap_or(45)
    }

    fn validate(&self) -> Result<()> {
        let dialect = self.dialect()?;
        let expected = match dialect {
            Dialect::Mysql => FramingKind::Mysql3ByteLen,
            Dialect::Postgres => FramingKind::PgV3,
        };
        if self.framing.kind != expected {
            return Err(config_error(format!(
                "wire pack {:?}: framing {:?} does not match family {:?}",
                self.name, self.framing.kind, self.family
            )));
        }
        if self.handshake.auth.algos.is_empty() {
            return Err(config_error(format!(
                "wire pack {:?} declares no auth algorithms",
                self.name
            )));
        }
        if let Some(stray) = self
            .handshake
            .auth
            .tls_required_for
            .iter()
            .find(|p| !self.handshake.auth.algos.contains(p))
        {
            return Err(config_error(format!(
                "wire pack {:?}: tlsRequiredFor names undeclared algorithm {:?}",
                self.name, stray
            )));
        }
        if dialect == Dialect::Mysql && self.caps.client_ssl_flag == 0 {
            return Err(config_error(format!(
                "wire pack {:?} has no clientSSLFlag",
                self.name
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RegistryFile {
    schemes: BTreeMap<String, String>,
    families: BTreeMap<String, String>,
}

/// URL scheme → family → wire pack.
#[derive(Debug, Clone)]
pub struct Registry {
    schemes: BTreeMap<String, String>,
    packs: BTreeMap<String, Arc<WirePack>>,
    source: Option<PathBuf>,
}

static BUILTIN: OnceLock<std::result::Result<Arc<Registry>, String>> = OnceLock::new();

impl Registry {
    /// The manifests compiled into this crate, parsed once per process.
    pub fn builtin() -> Result<Arc<Registry>> {
        BUILTIN
            .get_or_init(|| {
                Self::from_sources(BUILTIN_REGISTRY, |file| {
                    BUILTIN_PACKS
                        .iter()
                        .find(|(name, _)| *name == file)
                        .map(|(_, json)| (*json).to_string())
                        .ok_or_else(|| config_error(format!("no built-in manifest {file:?}")))
                })
                .map(Arc::new)
                .map_err(|e| e.to_string())
            })
            .clone()
            .map_err(config_error)
    }

    /// Load `registry.json` and every manifest it names from `dir`.
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Registry> {
        let dir = dir.as_ref();
        let registry_path = dir.join("registry.json");
        let raw = std::fs::read_to_string(&registry_path).map_err(|e| {
            Error::Config(ConfigError {
                message: format!("cannot read {}", registry_path.display()),
                source: Some(Box::new(e)),
            })
        })?;
        let mut registry = Self::from_sources(&raw, |file| {
            let path = dir.join(file);
            std::fs::read_to_string(&path).map_err(|e| {
                Error::Config(ConfigError {
                    message: format!("manifest {} not found", path.display()),
                    source: Some(Box::new(e)),
                })
            })
        })?;
        registry.source = Some(dir.to_path_buf());
        tracing::debug!(dir = %dir.display(), packs = registry.packs.len(), "Loaded transport registry");
        Ok(registry)
    }

    /// `ADAPTSQL_TRANSPORTS_DIR` if set and it holds a `registry.json`, else the built-in set.
    pub fn from_env() -> Result<Arc<Registry>> {
        match std::env::var_os(TRANSPORTS_DIR_ENV) {
            Some(dir) if Path::new(&dir).join("registry.json").is_file() => {
                Ok(Arc::new(Self::load_dir(dir)?))
            }
            _ => Self::builtin(),
        }
    }

    fn from_sources(
        registry_json: &str,
        mut read_pack: impl FnMut(&str) -> Result<String>,
    ) -> Result<Registry> {
        let file: RegistryFile = serde_json::from_str(registry_json)
            .map_err(|e| config_error(format!("invalid registry.json: {e}")))?;

        let mut packs = BTreeMap::new();
        for (family, pack_file) in &file.families {
            let pack = WirePack::from_json(&read_pack(pack_file)?)?;
            if &pack.family != family {
                return Err(config_error(format!(
                    "registry maps family {family:?} to {pack_file:?}, which declares {:?}",
                    pack.family
                )));
            }
            packs.insert(family.clone(), Arc::new(pack));
        }

        if let Some((scheme, family)) = file
            .schemes
            .iter()
            .find(|(_, family)| !packs.contains_key(*family))
        {
            return Err(config_error(format!(
                "registry maps scheme {scheme:?} to unknown family {family:?}"
            )));
        }

        Ok(Registry {
            schemes: file.schemes,
            packs,
            source: None,
        })
    }

    /// Directory the registry was loaded from; `None` for the built-in set.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn family_for_scheme(&self, scheme: &str) -> Result<&str> {
        self.schemes
            .get(&scheme.to_ascii_lowercase())
            .map(String::as_str)
            .ok_or_else(|| {
                config_error(format!(
                    "unregistered URL scheme {scheme:?} (known: {})",
                    self.schemes.keys().cloned().collect::<Vec<_>>().join(", ")
                ))
            })
    }

    pub fn pack(&self, family: &str) -> Result<Arc<WirePack>> {
        self.packs
            .get(family)
            .cloned()
            .ok_or_else(|| config_error(format!("no wire pack registered for family {family:?}")))
    }

    /// Resolve the wire pack for a connection URL.
    pub fn resolve(&self, url: &ConnectUrl) -> Result<Arc<WirePack>> {
        let family = self.family_for_scheme(&url.scheme)?;
        self.pack(family)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry_resolves_schemes() {
        let registry = Registry::builtin().unwrap();
        assert_eq!(registry.family_for_scheme("mysql").unwrap(), "mysql");
        assert_eq!(registry.family_for_scheme("mariadb").unwrap(), "mysql");
        assert_eq!(registry.family_for_scheme("pg").unwrap(), "postgres");
        assert_eq!(registry.family_for_scheme("PostgreSQL").unwrap(), "postgres");
        assert!(registry.source().is_none());
    }

    #[test]
    fn test_unregistered_scheme_is_clear_error() {
        let registry = Registry::builtin().unwrap();
        let err = registry.family_for_scheme("oracle").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("oracle"));
    }

    #[test]
    fn test_builtin_mysql_pack() {
        let registry = Registry::builtin().unwrap();
        let pack = registry.pack("mysql").unwrap();
        assert_eq!(pack.dialect().unwrap(), Dialect::Mysql);
        assert_eq!(pack.caps.client_ssl_flag, 1 << 11);
        assert_eq!(pack.commands.query, 0x03);
        assert_eq!(pack.commands.ping, Some(0x0e));
        assert_eq!(pack.handshake.greeting, "mysql-v10");
        assert_eq!(
            pack.handshake.auth.algos,
            vec!["mysql_native_password", "caching_sha2_password"]
        );
        assert!(pack.tls_required_for("caching_sha2_password"));
        assert!(!pack.tls_required_for("mysql_native_password"));
        assert_eq!(pack.charset(), 45);
    }

    #[test]
    fn test_builtin_postgres_pack() {
        let registry = Registry::builtin().unwrap();
        let url = ConnectUrl::parse("postgres://u@localhost/db").unwrap();
        let pack = registry.resolve(&url).unwrap();
        assert_eq!(pack.framing.kind, FramingKind::PgV3);
        assert_eq!(pack.framing.ssl_request_code, Some(80_877_103));
        assert!(pack.tls_required_for("password"));
    }

    #[test]
    fn test_pack_validation_rejects_mismatch() {
        let json = r#"{
            "name": "broken", "family": "mysql",
            "framing": {"kind": "pg-v3"},
            "caps": {"clientSSLFlag": 2048},
            "commands": {"query": 3},
            "handshake": {"greeting": "mysql-v10", "auth": {"algos": ["mysql_native_password"]}},
            "discovery": {"version": "SELECT VERSION()"}
        }"#;
        assert!(WirePack::from_json(json).is_err());

        let json = r#"{
            "name": "stray", "family": "mysql",
            "framing": {"kind": "mysql-3byte-len"},
            "caps": {"clientSSLFlag": 2048},
            "commands": {"query": 3},
            "handshake": {"greeting": "mysql-v10", "auth": {
                "algos": ["mysql_native_password"], "tlsRequiredFor": ["caching_sha2_password"]}},
            "discovery": {"version": "SELECT VERSION()"}
        }"#;
        let err = WirePack::from_json(json).unwrap_err();
        assert!(err.to_string().contains("tlsRequiredFor"));
    }
}
