//! Declarative strategy table and the pure classifier built from it.
//!
//! Rules are evaluated in table order and the first match wins: the high tier
//! maps to `cache-first`, the medium tier to `stale-while-revalidate`, the low
//! tier to `network-first`, then explicit rules, then the API prefix
//! (`network-only`), then the default (`network-first`).

use std::fmt;
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Caching strategy selected for a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    CacheFirst,
    NetworkFirst,
    NetworkOnly,
    CacheOnly,
    StaleWhileRevalidate,
}

impl Strategy {
    pub const ALL: [Strategy; 5] = [
        Strategy::CacheFirst,
        Strategy::NetworkFirst,
        Strategy::NetworkOnly,
        Strategy::CacheOnly,
        Strategy::StaleWhileRevalidate,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::CacheFirst => "cache-first",
            Strategy::NetworkFirst => "network-first",
            Strategy::NetworkOnly => "network-only",
            Strategy::CacheOnly => "cache-only",
            Strategy::StaleWhileRevalidate => "stale-while-revalidate",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = RuleError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Strategy::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == value)
            .ok_or_else(|| RuleError::UnknownStrategy(value.to_string()))
    }
}

/// Priority tier a pattern belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn strategy(self) -> Strategy {
        match self {
            Priority::High => Strategy::CacheFirst,
            Priority::Medium => Strategy::StaleWhileRevalidate,
            Priority::Low => Strategy::NetworkFirst,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum RuleError {
    #[error("invalid pattern `{pattern}`: {reason}")]
    Pattern { pattern: String, reason: String },
    #[error("unknown strategy `{0}`")]
    UnknownStrategy(String),
    #[error("protected pattern `{0}` is not part of the high-priority tier")]
    UnprotectableEntry(String),
    #[error("api prefix must start with `/`, got `{0}`")]
    ApiPrefix(String),
}

/// A compiled path pattern that remembers its source text.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    pub fn new(source: &str) -> Result<Self, RuleError> {
        let regex = Regex::new(source).map_err(|err| RuleError::Pattern {
            pattern: source.to_string(),
            reason: err.to_string(),
        })?;
        Ok(Self {
            source: source.to_string(),
            regex,
        })
    }

    pub fn matches(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

/// One row of the strategy table.
#[derive(Debug, Clone)]
pub struct StrategyRule {
    pub pattern: Pattern,
    pub strategy: Strategy,
    /// `None` for explicitly configured rules outside the tiers.
    pub priority: Option<Priority>,
}

/// Uncompiled pattern tables, as supplied by configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RuleTable {
    pub high: Vec<String>,
    pub medium: Vec<String>,
    pub low: Vec<String>,
    /// Extra `(pattern, strategy)` rows evaluated after the tiers.
    pub explicit: Vec<ExplicitRule>,
    pub api_prefix: String,
    /// Paths routed to the icon partition when stored.
    pub icon: Vec<String>,
    /// Patterns exempt from eviction. Each must also be a high-priority pattern.
    pub protected: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExplicitRule {
    pub pattern: String,
    pub strategy: String,
}

impl Default for RuleTable {
    fn default() -> Self {
        let critical = [
            r"^/$",
            r"^/index\.html$",
            r"^/manifest\.json$",
            r"^/src/main\.js$",
            r"^/assets/icons/icon-192x192\.png$",
            r"^/assets/icons/icon-512x512\.png$",
        ];
        Self {
            high: critical.iter().map(|p| p.to_string()).collect(),
            medium: vec![
                r"^/src/core/".to_string(),
                r"^/src/scenes/".to_string(),
                r"^/src/managers/".to_string(),
                r"^/src/config/".to_string(),
            ],
            low: vec![
                r"^/assets/(audio|images|video)/".to_string(),
                r"^/src/utils/".to_string(),
            ],
            explicit: Vec::new(),
            api_prefix: "/api/".to_string(),
            icon: vec![r"^/assets/icons/".to_string()],
            protected: vec![
                r"^/$".to_string(),
                r"^/manifest\.json$".to_string(),
                r"^/src/main\.js$".to_string(),
                r"^/assets/icons/icon-192x192\.png$".to_string(),
                r"^/assets/icons/icon-512x512\.png$".to_string(),
            ],
        }
    }
}

/// URL patterns whose entries eviction must never remove.
#[derive(Debug, Clone, Default)]
pub struct ProtectedPatterns {
    patterns: Vec<Pattern>,
}

impl ProtectedPatterns {
    pub fn is_protected(&self, path: &str) -> bool {
        self.patterns.iter().any(|pattern| pattern.matches(path))
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Result of classifying a path, including which tier matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub strategy: Strategy,
    pub priority: Option<Priority>,
}

/// Pure mapping from request path to strategy.
#[derive(Debug, Clone)]
pub struct StrategyClassifier {
    rules: Vec<StrategyRule>,
    api_prefix: String,
    icon: Vec<Pattern>,
    protected: ProtectedPatterns,
}

impl StrategyClassifier {
    pub const DEFAULT_STRATEGY: Strategy = Strategy::NetworkFirst;

    /// Compile a rule table, validating patterns and the protected-set invariant.
    pub fn new(table: &RuleTable) -> Result<Self, RuleError> {
        if !table.api_prefix.starts_with('/') {
            return Err(RuleError::ApiPrefix(table.api_prefix.clone()));
        }

        let mut rules = Vec::new();
        for (priority, sources) in [
            (Priority::High, &table.high),
            (Priority::Medium, &table.medium),
            (Priority::Low, &table.low),
        ] {
            for source in sources {
                rules.push(StrategyRule {
                    pattern: Pattern::new(source)?,
                    strategy: priority.strategy(),
                    priority: Some(priority),
                });
            }
        }
        for explicit in &table.explicit {
            rules.push(StrategyRule {
                pattern: Pattern::new(&explicit.pattern)?,
                strategy: explicit.strategy.parse()?,
                priority: None,
            });
        }

        let icon = table
            .icon
            .iter()
            .map(|source| Pattern::new(source))
            .collect::<Result<Vec<_>, _>>()?;

        let mut protected = Vec::with_capacity(table.protected.len());
        for source in &table.protected {
            if !table.high.contains(source) {
                return Err(RuleError::UnprotectableEntry(source.clone()));
            }
            protected.push(Pattern::new(source)?);
        }

        Ok(Self {
            rules,
            api_prefix: table.api_prefix.clone(),
            icon,
            protected: ProtectedPatterns {
                patterns: protected,
            },
        })
    }

    pub fn classify(&self, path: &str) -> Strategy {
        self.classification(path).strategy
    }

    pub fn classification(&self, path: &str) -> Classification {
        if let Some(rule) = self.rules.iter().find(|rule| rule.pattern.matches(path)) {
            return Classification {
                strategy: rule.strategy,
                priority: rule.priority,
            };
        }

        let strategy = if self.is_api(path) {
            Strategy::NetworkOnly
        } else {
            Self::DEFAULT_STRATEGY
        };
        Classification {
            strategy,
            priority: None,
        }
    }

    /// True when the path matches a high-priority (static) pattern.
    pub fn is_high_priority(&self, path: &str) -> bool {
        self.rules
            .iter()
            .filter(|rule| rule.priority == Some(Priority::High))
            .any(|rule| rule.pattern.matches(path))
    }

    pub fn is_api(&self, path: &str) -> bool {
        path.starts_with(&self.api_prefix)
    }

    pub fn is_icon(&self, path: &str) -> bool {
        self.icon.iter().any(|pattern| pattern.matches(path))
    }

    pub fn protected(&self) -> &ProtectedPatterns {
        &self.protected
    }

    pub fn rules(&self) -> &[StrategyRule] {
        &self.rules
    }
}
