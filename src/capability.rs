//! Capability requests and the sets granted to sessions
//!
//! A session credential authorizes exactly the capabilities it was issued
//! for. Nothing outside the granted set is ever assumed.
//!
//! Patterns are either exact resource ids, `*` (every resource of the kind), or
//! a prefix ending in `*`.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Kinds of resource a session may be granted
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Signing with a bound key
    KeySigning,
    /// Running code on the network
    ActionExecution,
    /// Decrypting under access-control conditions
    AccessControl,
}

impl ResourceKind {
    /// Scheme used for this kind in statement resource lines
    pub fn resource_prefix(&self) -> &'static str {
        match self {
            ResourceKind::KeySigning => "lit-pkp",
            ResourceKind::ActionExecution => "lit-litaction",
            ResourceKind::AccessControl => "lit-accesscontrolcondition",
        }
    }

    /// Ability granted over resources of this kind
    pub fn ability(&self) -> &'static str {
        match self {
            ResourceKind::KeySigning => "pkp-signing",
            ResourceKind::ActionExecution => "lit-action-execution",
            ResourceKind::AccessControl => "access-control-condition-decryption",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::KeySigning => write!(f, "KEY_SIGNING"),
            ResourceKind::ActionExecution => write!(f, "ACTION_EXECUTION"),
            ResourceKind::AccessControl => write!(f, "ACCESS_CONTROL"),
        }
    }
}

/// Declaration of one resource/action a session may authorize
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityRequest {
    resource_kind: ResourceKind,
    resource_pattern: String,
}

impl CapabilityRequest {
    pub fn new(resource_kind: ResourceKind, resource_pattern: impl Into<String>) -> Result<Self> {
        let resource_pattern = resource_pattern.into();
        if resource_pattern.is_empty() {
            return Err(Error::MalformedInput(
                "Resource pattern must not be empty".to_string(),
            ));
        }
        if resource_pattern
            .trim_end_matches('*')
            .contains(['*', '#', '/', ' '])
        {
            return Err(Error::MalformedInput(format!(
                "Invalid resource pattern '{}'",
                resource_pattern
            )));
        }
        Ok(Self {
            resource_kind,
            resource_pattern,
        })
    }

    /// Every resource of `kind`
    pub fn wildcard(resource_kind: ResourceKind) -> Self {
        Self {
            resource_kind,
            resource_pattern: "*".to_string(),
        }
    }

    pub fn resource_kind(&self) -> ResourceKind {
        self.resource_kind
    }

    pub fn resource_pattern(&self) -> &str {
        &self.resource_pattern
    }

    /// Whether everything `other` asks for is also granted by `self`.
    pub fn covers(&self, other: &CapabilityRequest) -> bool {
        if self.resource_kind != other.resource_kind {
            return false;
        }
        if self.resource_pattern == other.resource_pattern {
            return true;
        }
        match self.resource_pattern.strip_suffix('*') {
            Some(prefix) => other.resource_pattern.starts_with(prefix),
            None => false,
        }
    }

    /// Resource line as it appears in an authorization statement
    pub fn resource_line(&self) -> String {
        format!(
            "{}://{}#{}",
            self.resource_kind.resource_prefix(),
            self.resource_pattern,
            self.resource_kind.ability()
        )
    }
}

impl fmt::Display for CapabilityRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource_kind, self.resource_pattern)
    }
}

/// Set of capabilities granted to (or requested for) one session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet(BTreeSet<CapabilityRequest>);

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, request: CapabilityRequest) -> bool {
        self.0.insert(request)
    }

    pub fn with(mut self, request: CapabilityRequest) -> Self {
        self.0.insert(request);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &CapabilityRequest> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether some granted capability covers `required`
    pub fn permits(&self, required: &CapabilityRequest) -> bool {
        self.0.iter().any(|granted| granted.covers(required))
    }

    /// Whether every capability in `requested` is permitted.
    ///
    /// A `false` here means the request widens the grant and needs a new session.
    pub fn covers(&self, requested: &CapabilitySet) -> bool {
        requested.iter().all(|r| self.permits(r))
    }

    /// Requested capabilities this set does not permit
    pub fn missing<'a>(&self, requested: &'a CapabilitySet) -> Vec<&'a CapabilityRequest> {
        requested.iter().filter(|r| !self.permits(r)).collect()
    }

    pub fn resource_lines(&self) -> Vec<String> {
        self.0.iter().map(CapabilityRequest::resource_line).collect()
    }
}

impl FromIterator<CapabilityRequest> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = CapabilityRequest>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a CapabilitySet {
    type Item = &'a CapabilityRequest;
    type IntoIter = std::collections::btree_set::Iter<'a, CapabilityRequest>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
