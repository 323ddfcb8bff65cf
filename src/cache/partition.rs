//! Partition kinds and their version-embedded names.
//!
//! A partition name has the shape `{namespace}-{kind}-v{version}`, for example
//! `game-static-v1.4.0`.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionKind {
    Static,
    Dynamic,
    Api,
    Icon,
}

impl PartitionKind {
    /// Order in which lookups search partitions.
    pub const LOOKUP_ORDER: [PartitionKind; 4] = [
        PartitionKind::Static,
        PartitionKind::Dynamic,
        PartitionKind::Api,
        PartitionKind::Icon,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PartitionKind::Static => "static",
            PartitionKind::Dynamic => "dynamic",
            PartitionKind::Api => "api",
            PartitionKind::Icon => "icon",
        }
    }
}

impl fmt::Display for PartitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A dotted numeric version such as `1`, `1.4` or `1.4.0`.
///
/// Missing components compare as zero, so `1.4` equals `1.4.0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VersionToken {
    parts: [u64; 3],
}

impl VersionToken {
    pub fn parts(&self) -> [u64; 3] {
        self.parts
    }
}

impl FromStr for VersionToken {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.strip_prefix('v').unwrap_or(value);
        let mut parts = [0u64; 3];
        let mut count = 0;
        for component in value.split('.') {
            if count == parts.len() || component.is_empty() {
                return Err(());
            }
            if !component.bytes().all(|b| b.is_ascii_digit()) {
                return Err(());
            }
            parts[count] = component.parse().map_err(|_| ())?;
            count += 1;
        }
        if count == 0 {
            return Err(());
        }
        Ok(Self { parts })
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [major, minor, patch] = self.parts;
        write!(f, "{major}.{minor}.{patch}")
    }
}

/// Names of the partitions owned by one namespace and version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionNames {
    namespace: String,
    version: String,
}

impl PartitionNames {
    pub fn new(namespace: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            version: version.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn name(&self, kind: PartitionKind) -> String {
        format!("{}-{}-v{}", self.namespace, kind.as_str(), self.version)
    }

    /// The allow-list of current partition names.
    pub fn current(&self) -> Vec<String> {
        PartitionKind::LOOKUP_ORDER
            .iter()
            .map(|kind| self.name(*kind))
            .collect()
    }

    /// Which current partition a name refers to, if any.
    pub fn kind_of(&self, name: &str) -> Option<PartitionKind> {
        PartitionKind::LOOKUP_ORDER
            .into_iter()
            .find(|kind| self.name(*kind) == name)
    }

    /// True when the name carries this project's namespace prefix.
    pub fn in_namespace(&self, name: &str) -> bool {
        name.strip_prefix(&self.namespace)
            .is_some_and(|rest| rest.starts_with('-'))
    }

    /// Parse the version token after the last `-v` of a namespaced name.
    pub fn version_of(&self, name: &str) -> Option<VersionToken> {
        if !self.in_namespace(name) {
            return None;
        }
        let (_, token) = name.rsplit_once("-v")?;
        token.parse().ok()
    }

    pub fn current_version(&self) -> Option<VersionToken> {
        self.version.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_embed_namespace_kind_and_version() {
        let names = PartitionNames::new("game", "1.4.0");
        assert_eq!(names.name(PartitionKind::Static), "game-static-v1.4.0");
        assert_eq!(names.name(PartitionKind::Icon), "game-icon-v1.4.0");
        assert_eq!(names.current().len(), 4);
    }

    #[test]
    fn kind_of_only_matches_current_version() {
        let names = PartitionNames::new("game", "1.4.0");
        assert_eq!(names.kind_of("game-api-v1.4.0"), Some(PartitionKind::Api));
        assert_eq!(names.kind_of("game-api-v1.3.0"), None);
    }

    #[test]
    fn namespace_requires_separator() {
        let names = PartitionNames::new("game", "1.0.0");
        assert!(names.in_namespace("game-static-v1.0.0"));
        assert!(!names.in_namespace("gamepad-static-v1.0.0"));
        assert!(!names.in_namespace("other-static-v1.0.0"));
    }

    #[test]
    fn version_tokens_parse_and_compare() {
        let names = PartitionNames::new("game", "1.4.0");
        let old = names.version_of("game-static-v1.3.9").expect("parses");
        let short = names.version_of("game-dynamic-v1.4").expect("parses");
        assert!(old < names.current_version().expect("current parses"));
        assert_eq!(short, names.current_version().expect("current parses"));
        assert_eq!(old.to_string(), "1.3.9");
    }

    #[test]
    fn unparseable_versions_yield_none() {
        let names = PartitionNames::new("game", "1.4.0");
        assert!(names.version_of("game-static").is_none());
        assert!(names.version_of("game-static-vnext").is_none());
        assert!(names.version_of("game-static-v1.2.3.4").is_none());
        assert!(names.version_of("game-static-v1..2").is_none());
        assert!(names.version_of("other-static-v1.4.0").is_none());
    }
}
