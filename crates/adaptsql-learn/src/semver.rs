//! Server version comparison.
//!
//! Version strings from real servers carry vendor noise
//! (`8.0.36-0ubuntu0.22.04.1`, `10.11.6-MariaDB-log`, `16.2 (Debian 16.2-1)`).
//! Only the first `major[.minor[.patch]]` run is compared.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

fn version_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+)(?:\.(\d+))?(?:\.(\d+))?").ok())
        .as_ref()
}

impl Version {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Extract the first numeric version run. Missing parts are zero.
    pub fn parse(text: &str) -> Option<Self> {
        let caps = version_regex()?.captures(text)?;
        let part = |i: usize| -> Option<u64> {
            match caps.get(i) {
                Some(m) => m.as_str().parse().ok(),
                None => Some(0),
            }
        };
        Some(Self::new(part(1)?, part(2)?, part(3)?))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Does `server` satisfy `minimum`? An unparsable side never does.
pub fn meets(server: &str, minimum: &str) -> bool {
    match (Version::parse(server), Version::parse(minimum)) {
        (Some(have), Some(need)) => have >= need,
        _ => false,
    }
}
