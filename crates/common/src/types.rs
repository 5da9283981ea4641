//! Participant identity and roster types.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Opaque identifier of one participant for the lifetime of a run.
///
/// Ordering is lexicographic on the label; protocol ordering always comes
/// from a [`Roster`], never from comparing ids.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(label: &str) -> Self {
        Self::new(label)
    }
}

impl From<String> for ParticipantId {
    fn from(label: String) -> Self {
        Self(label)
    }
}

/// Identifier of one network channel, i.e. one phase run shared by all
/// participants of that phase.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors raised while building or slicing a roster.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RosterError {
    #[error("roster must not be empty")]
    Empty,

    #[error("duplicate participant {0} in roster")]
    Duplicate(ParticipantId),

    #[error("threshold {threshold} out of range for roster of {size}")]
    ThresholdOutOfRange { threshold: usize, size: usize },
}

/// Ordered set of unique participants.
///
/// The order defines protocol membership order: evaluation points, signer
/// subset selection and report order all follow it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roster {
    ids: Vec<ParticipantId>,
}

impl Roster {
    /// Build a roster, rejecting empty input and duplicate ids.
    pub fn new(ids: impl IntoIterator<Item = ParticipantId>) -> Result<Self, RosterError> {
        let ids: Vec<ParticipantId> = ids.into_iter().collect();
        if ids.is_empty() {
            return Err(RosterError::Empty);
        }

        let mut seen = HashSet::with_capacity(ids.len());
        for id in &ids {
            if !seen.insert(id) {
                return Err(RosterError::Duplicate(id.clone()));
            }
        }

        Ok(Self { ids })
    }

    /// Roster of `count` participants labelled `{prefix}1..={prefix}{count}`.
    pub fn numbered(prefix: &str, count: usize) -> Result<Self, RosterError> {
        Self::new((1..=count).map(|i| ParticipantId::new(format!("{}{}", prefix, i))))
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Always false for a constructed roster; provided for API symmetry.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[ParticipantId] {
        &self.ids
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParticipantId> {
        self.ids.iter()
    }

    pub fn contains(&self, id: &ParticipantId) -> bool {
        self.ids.contains(id)
    }

    /// Zero-based position of `id` in roster order.
    pub fn position(&self, id: &ParticipantId) -> Option<usize> {
        self.ids.iter().position(|p| p == id)
    }

    /// The first `count` participants, in roster order.
    pub fn prefix(&self, count: usize) -> Result<Self, RosterError> {
        if count == 0 {
            return Err(RosterError::Empty);
        }
        if count > self.ids.len() {
            return Err(RosterError::ThresholdOutOfRange {
                threshold: count,
                size: self.ids.len(),
            });
        }
        Ok(Self {
            ids: self.ids[..count].to_vec(),
        })
    }

    /// Signer subset for threshold `t`: the first `t + 1` roster members.
    ///
    /// Selection is positional so every participant computes the same subset
    /// without coordination.
    pub fn signer_subset(&self, threshold: usize) -> Result<Self, RosterError> {
        if threshold >= self.ids.len() {
            return Err(RosterError::ThresholdOutOfRange {
                threshold,
                size: self.ids.len(),
            });
        }
        self.prefix(threshold + 1)
    }

    /// True if every member of `self` is also a member of `other`.
    pub fn is_subset_of(&self, other: &Roster) -> bool {
        self.ids.iter().all(|id| other.contains(id))
    }
}

impl<'a> IntoIterator for &'a Roster {
    type Item = &'a ParticipantId;
    type IntoIter = std::slice::Iter<'a, ParticipantId>;

    fn into_iter(self) -> Self::IntoIter {
        self.ids.iter()
    }
}

impl fmt::Display for Roster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let labels: Vec<&str> = self.ids.iter().map(ParticipantId::as_str).collect();
        write!(f, "[{}]", labels.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roster_rejects_duplicates() {
        let err = Roster::new(["a1", "a2", "a1"].map(ParticipantId::from)).unwrap_err();
        assert_eq!(err, RosterError::Duplicate(ParticipantId::from("a1")));
    }

    #[test]
    fn test_roster_rejects_empty() {
        assert_eq!(Roster::new(Vec::new()).unwrap_err(), RosterError::Empty);
    }

    #[test]
    fn test_numbered_roster() {
        let roster = Roster::numbered("a", 3).unwrap();
        assert_eq!(roster.len(), 3);
        assert_eq!(roster.ids()[0].as_str(), "a1");
        assert_eq!(roster.ids()[2].as_str(), "a3");
        assert_eq!(roster.position(&ParticipantId::from("a2")), Some(1));
        assert_eq!(roster.to_string(), "[a1, a2, a3]");
    }

    #[test]
    fn test_signer_subset_is_positional() {
        let roster = Roster::numbered("a", 15).unwrap();
        let signers = roster.signer_subset(5).unwrap();

        assert_eq!(signers.len(), 6);
        assert_eq!(signers.ids(), &roster.ids()[..6]);
        assert!(signers.is_subset_of(&roster));
        assert!(!signers.contains(&ParticipantId::from("a7")));
    }

    #[test]
    fn test_signer_subset_is_deterministic() {
        let roster = Roster::numbered("a", 15).unwrap();
        assert_eq!(roster.signer_subset(5), roster.signer_subset(5));
    }

    #[test]
    fn test_signer_subset_follows_roster_not_label_order() {
        let roster = Roster::new(["z", "b", "m", "a"].map(ParticipantId::from)).unwrap();
        let signers = roster.signer_subset(1).unwrap();
        assert_eq!(signers.ids(), &[ParticipantId::from("z"), ParticipantId::from("b")]);
    }

    #[test]
    fn test_signer_subset_threshold_out_of_range() {
        let roster = Roster::numbered("a", 3).unwrap();
        assert_eq!(
            roster.signer_subset(3).unwrap_err(),
            RosterError::ThresholdOutOfRange {
                threshold: 3,
                size: 3
            }
        );
    }
}
