//! User capabilities
//!
//! Features are a closed enumeration rather than free-form strings, so the
//! quarantine transitions (strip, restore, nuke) can be matched exhaustively.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, ErrorDetails};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Feature {
    ReadActivationToken,
    CreateSession,
    ReadSession,
    CreateContent,
    CreateContentTextRoot,
    CreateContentTextChild,
    UpdateContent,
    UpdateUser,
    /// Edit or delete content owned by someone else
    UpdateContentOthers,
    ReadFirewall,
    ReviewFirewall,
    /// Terminal marker for users confirmed as abusive
    Nuked,
}

impl Feature {
    pub const ALL: [Feature; 12] = [
        Feature::ReadActivationToken,
        Feature::CreateSession,
        Feature::ReadSession,
        Feature::CreateContent,
        Feature::CreateContentTextRoot,
        Feature::CreateContentTextChild,
        Feature::UpdateContent,
        Feature::UpdateUser,
        Feature::UpdateContentOthers,
        Feature::ReadFirewall,
        Feature::ReviewFirewall,
        Feature::Nuked,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::ReadActivationToken => "read:activation_token",
            Feature::CreateSession => "create:session",
            Feature::ReadSession => "read:session",
            Feature::CreateContent => "create:content",
            Feature::CreateContentTextRoot => "create:content:text_root",
            Feature::CreateContentTextChild => "create:content:text_child",
            Feature::UpdateContent => "update:content",
            Feature::UpdateUser => "update:user",
            Feature::UpdateContentOthers => "update:content:others",
            Feature::ReadFirewall => "read:firewall",
            Feature::ReviewFirewall => "review:firewall",
            Feature::Nuked => "nuked",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Feature {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Feature::ALL
            .iter()
            .find(|f| f.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown feature: {}", s))
    }
}

impl TryFrom<String> for Feature {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Feature> for String {
    fn from(f: Feature) -> Self {
        f.as_str().to_string()
    }
}

/// Lifecycle state that determines a user's default feature membership
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserState {
    /// Registered but not yet activated
    Inactive,
    Active,
    /// Permanently banned after a confirmed firewall incident
    Nuked,
}

/// Ordered set of features, serialized as a JSON array of strings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureSet(BTreeSet<Feature>);

impl FeatureSet {
    pub fn empty() -> Self {
        Self(BTreeSet::new())
    }

    /// Default membership for a user in the given state
    pub fn for_state(state: UserState) -> Self {
        match state {
            UserState::Inactive => [Feature::ReadActivationToken].into_iter().collect(),
            UserState::Active => [
                Feature::CreateSession,
                Feature::ReadSession,
                Feature::CreateContent,
                Feature::CreateContentTextRoot,
                Feature::CreateContentTextChild,
                Feature::UpdateContent,
                Feature::UpdateUser,
            ]
            .into_iter()
            .collect(),
            UserState::Nuked => [Feature::Nuked].into_iter().collect(),
        }
    }

    pub fn contains(&self, feature: Feature) -> bool {
        self.0.contains(&feature)
    }

    pub fn insert(&mut self, feature: Feature) {
        self.0.insert(feature);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_nuked(&self) -> bool {
        self.contains(Feature::Nuked)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Feature> {
        self.0.iter()
    }

    pub fn to_json(&self) -> Result<String, EngineError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self, EngineError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Fail with a 403 unless every listed feature is present
    pub fn require(&self, required: &[Feature]) -> Result<(), EngineError> {
        match required.iter().find(|f| !self.contains(**f)) {
            None => Ok(()),
            Some(missing) => Err(EngineError::Forbidden(ErrorDetails::new(
                "You do not have permission to perform this action.",
                format!("Check that your user has the \"{}\" feature.", missing),
                format!("FEATURES:MISSING:{}", missing),
            ))),
        }
    }
}

impl FromIterator<Feature> for FeatureSet {
    fn from_iter<I: IntoIterator<Item = Feature>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
