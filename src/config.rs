use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;

use crate::errors::ConfigError;
use crate::name::normalize;

/// A mapping from exact normalized domain name to an IP address that short-circuits
/// resolution (spec §3, §4.1.2 step 2). Read-only after `load`, safe to share across
/// handler tasks behind an `Arc`.
#[derive(Debug, Default, Clone)]
pub struct StaticConfig {
    entries: HashMap<String, IpAddr>,
}

impl StaticConfig {
    pub fn empty() -> Self {
        StaticConfig { entries: HashMap::new() }
    }

    /// Loads `domain=ip` pairs, one per line, from `path`. Blank lines are skipped; any other
    /// malformed line is a startup error (spec §6 leaves this as an implementation choice).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_str = path_ref.display().to_string();
        let contents = std::fs::read_to_string(path_ref)
            .map_err(|source| ConfigError::Io { path: path_str.clone(), source })?;
        Self::parse(&contents, &path_str)
    }

    fn parse(contents: &str, path: &str) -> Result<Self, ConfigError> {
        let mut entries = HashMap::new();
        for (i, raw_line) in contents.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() {
                continue;
            }
            let (domain, addr) = line.split_once('=').ok_or_else(|| ConfigError::Malformed {
                path: path.to_string(),
                line_no: i + 1,
                line: raw_line.to_string(),
            })?;
            let domain = domain.trim();
            let addr = addr.trim();
            if domain.is_empty() || addr.is_empty() {
                return Err(ConfigError::Malformed {
                    path: path.to_string(),
                    line_no: i + 1,
                    line: raw_line.to_string(),
                });
            }
            let ip: IpAddr = addr.parse().map_err(|_| ConfigError::InvalidAddress {
                path: path.to_string(),
                line_no: i + 1,
                line: raw_line.to_string(),
            })?;
            entries.insert(normalize(domain), ip);
        }
        Ok(StaticConfig { entries })
    }

    /// Looks up a name that has already been normalized by the caller.
    pub fn get(&self, normalized_domain: &str) -> Option<IpAddr> {
        self.entries.get(normalized_domain).copied()
    }

    #[cfg(test)]
    pub(crate) fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        let mut entries = HashMap::new();
        for (domain, ip) in pairs {
            entries.insert(normalize(domain), ip.parse().expect("valid test IP"));
        }
        StaticConfig { entries }
    }
}
