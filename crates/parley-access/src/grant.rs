use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const GRANT_SEPARATOR: char = ':';
const GRANT_WILDCARD: &str = "*";

/// Error returned when a grant string is malformed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GrantParseError {
    #[error("grant cannot be empty")]
    Empty,
    #[error("grant '{0}' contains an empty segment")]
    EmptySegment(String),
    #[error("grant '{0}' may only use '*' as its final segment")]
    MisplacedWildcard(String),
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
/// A validated capability string.
pub struct Grant(String);

impl Grant {
    pub fn parse(raw: &str) -> Result<Self, GrantParseError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(GrantParseError::Empty);
        }
        let segments = trimmed.split(GRANT_SEPARATOR).collect::<Vec<_>>();
        let last_index = segments.len() - 1;
        for (index, segment) in segments.iter().enumerate() {
            if segment.is_empty() {
                return Err(GrantParseError::EmptySegment(trimmed.to_string()));
            }
            if segment.contains('*') && (index != last_index || *segment != GRANT_WILDCARD) {
                return Err(GrantParseError::MisplacedWildcard(trimmed.to_string()));
            }
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true when holding `self` satisfies the `required` grant.
    pub fn satisfies(&self, required: &Grant) -> bool {
        wildcard_grant_matches(self.as_str(), required.as_str())
    }
}

impl fmt::Display for Grant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Grant {
    type Err = GrantParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl TryFrom<String> for Grant {
    type Error = GrantParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Grant> for String {
    fn from(value: Grant) -> Self {
        value.0
    }
}

/// Grant derived from a command route: `<noun>:<verb>`.
pub fn derived_grant(noun: &str, verb: &str) -> Result<Grant, GrantParseError> {
    Grant::parse(&format!("{noun}{GRANT_SEPARATOR}{verb}"))
}

fn wildcard_grant_matches(held: &str, required: &str) -> bool {
    if held == GRANT_WILDCARD {
        return true;
    }
    if let Some(prefix) = held.strip_suffix(GRANT_WILDCARD) {
        return required.starts_with(prefix) && required.len() > prefix.len();
    }
    held == required
}

/// Grants held by a principal, kept in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GrantSet {
    grants: Vec<Grant>,
}

impl GrantSet {
    pub fn new(grants: Vec<Grant>) -> Self {
        Self { grants }
    }

    /// Builds a set from raw strings, skipping malformed entries.
    pub fn from_lossy<I, S>(raw: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            grants: raw
                .into_iter()
                .filter_map(|item| Grant::parse(item.as_ref()).ok())
                .collect(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Grant> {
        self.grants.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }

    /// First held grant that satisfies `required`.
    pub fn matching(&self, required: &Grant) -> Option<&Grant> {
        self.grants.iter().find(|held| held.satisfies(required))
    }

    pub fn satisfies(&self, required: &Grant) -> bool {
        self.matching(required).is_some()
    }

    pub fn check(&self, required: &Grant) -> GrantDecision {
        match self.matching(required) {
            Some(held) => GrantDecision::Allow {
                reason_code: if held == required {
                    "allow_exact_grant".to_string()
                } else {
                    "allow_wildcard_grant".to_string()
                },
                matched_grant: held.clone(),
            },
            None => GrantDecision::Deny {
                reason_code: "deny_grant_missing".to_string(),
                required: required.clone(),
            },
        }
    }
}

impl FromIterator<Grant> for GrantSet {
    fn from_iter<T: IntoIterator<Item = Grant>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Outcome of checking a required grant against a held set.
pub enum GrantDecision {
    Allow {
        reason_code: String,
        matched_grant: Grant,
    },
    Deny {
        reason_code: String,
        required: Grant,
    },
}

impl GrantDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow { .. })
    }

    pub fn reason_code(&self) -> &str {
        match self {
            Self::Allow { reason_code, .. } | Self::Deny { reason_code, .. } => reason_code,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "grant", rename_all = "snake_case")]
/// Grant a route requires before its handler body may run.
pub enum GrantRequirement {
    #[default]
    None,
    /// Requires `<noun>:<verb>` of the command being handled.
    Derived,
    Explicit(Grant),
}

impl GrantRequirement {
    /// Resolves the concrete grant for a route, if any.
    pub fn resolve(&self, noun: &str, verb: &str) -> Result<Option<Grant>, GrantParseError> {
        match self {
            Self::None => Ok(None),
            Self::Derived => derived_grant(noun, verb).map(Some),
            Self::Explicit(grant) => Ok(Some(grant.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{derived_grant, Grant, GrantParseError, GrantRequirement, GrantSet};

    fn grant(raw: &str) -> Grant {
        Grant::parse(raw).expect("valid grant")
    }

    #[test]
    fn unit_grant_parse_rejects_malformed_input() {
        assert_eq!(Grant::parse("  "), Err(GrantParseError::Empty));
        assert!(matches!(
            Grant::parse("account::create"),
            Err(GrantParseError::EmptySegment(_))
        ));
        assert!(matches!(
            Grant::parse("account:*:create"),
            Err(GrantParseError::MisplacedWildcard(_))
        ));
        assert!(matches!(
            Grant::parse("account:cre*"),
            Err(GrantParseError::MisplacedWildcard(_))
        ));
        assert_eq!(grant(" account:create ").as_str(), "account:create");
    }

    #[test]
    fn unit_grant_satisfaction_is_reflexive() {
        for raw in ["account:create", "grant:list", "*", "account:*"] {
            let value = grant(raw);
            assert!(value.satisfies(&value), "{raw} should satisfy itself");
        }
    }

    #[test]
    fn unit_wildcard_grants_match_by_segment_prefix() {
        assert!(grant("account:*").satisfies(&grant("account:create")));
        assert!(grant("account:*").satisfies(&grant("account:delete")));
        assert!(grant("*").satisfies(&grant("anything:at:all")));
        assert!(!grant("account:*").satisfies(&grant("accounts:create")));
        assert!(!grant("account:*").satisfies(&grant("grant:list")));
        assert!(!grant("account:create").satisfies(&grant("account:delete")));
    }

    #[test]
    fn functional_grant_set_check_reports_matched_grant() {
        let held = GrantSet::from_lossy(["grant:list", "account:*", "not::valid"]);
        assert_eq!(held.iter().count(), 2);

        let exact = held.check(&grant("grant:list"));
        assert!(exact.is_allowed());
        assert_eq!(exact.reason_code(), "allow_exact_grant");

        let wildcard = held.check(&grant("account:delete"));
        assert!(wildcard.is_allowed());
        assert_eq!(wildcard.reason_code(), "allow_wildcard_grant");

        let denied = held.check(&grant("grant:get"));
        assert!(!denied.is_allowed());
        assert_eq!(denied.reason_code(), "deny_grant_missing");
        assert!(GrantSet::default().check(&grant("echo:create")).reason_code() == "deny_grant_missing");
    }

    #[test]
    fn unit_grant_requirement_resolves_route_grant() {
        assert_eq!(GrantRequirement::None.resolve("echo", "create"), Ok(None));
        assert_eq!(
            GrantRequirement::Derived.resolve("account", "delete"),
            Ok(Some(grant("account:delete")))
        );
        assert_eq!(
            GrantRequirement::Explicit(grant("admin:*")).resolve("account", "delete"),
            Ok(Some(grant("admin:*")))
        );
        assert_eq!(derived_grant("grant", "get"), Ok(grant("grant:get")));
    }

    #[test]
    fn unit_grant_requirement_deserializes_tagged_form() {
        let explicit: GrantRequirement =
            serde_json::from_str(r#"{"type":"explicit","grant":"admin:*"}"#).expect("decode");
        assert_eq!(explicit, GrantRequirement::Explicit(grant("admin:*")));
        let derived: GrantRequirement =
            serde_json::from_str(r#"{"type":"derived"}"#).expect("decode");
        assert_eq!(derived, GrantRequirement::Derived);
    }
}
