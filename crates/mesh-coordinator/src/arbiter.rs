//! Initiator arbitration for participant pairs.
//!
//! Both ends of a pair compute the same answer from the two identifiers alone,
//! so no coordination message is needed and both sides never offer at once.
//! The numerically smaller identifier answers; the larger one initiates.

use common::types::ParticipantId;
use serde::{Deserialize, Serialize};

/// A participant's role on one peer link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkRole {
    /// Sends offers for this link.
    Initiator,
    /// Answers offers for this link.
    Answerer,
}

impl LinkRole {
    /// Returns the role as a string for logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            LinkRole::Initiator => "initiator",
            LinkRole::Answerer => "answerer",
        }
    }
}

/// Returns which of the two participants initiates negotiation.
#[must_use]
pub fn initiator(a: ParticipantId, b: ParticipantId) -> ParticipantId {
    a.max(b)
}

/// Returns which of the two participants answers.
#[must_use]
pub fn answerer(a: ParticipantId, b: ParticipantId) -> ParticipantId {
    a.min(b)
}

/// Role of `me` on the link to `peer`.
#[must_use]
pub fn role_of(me: ParticipantId, peer: ParticipantId) -> LinkRole {
    if initiator(me, peer) == me {
        LinkRole::Initiator
    } else {
        LinkRole::Answerer
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn pid(n: u128) -> ParticipantId {
        ParticipantId::from_u128(n)
    }

    #[test]
    fn test_larger_identifier_initiates() {
        assert_eq!(initiator(pid(1), pid(2)), pid(2));
        assert_eq!(answerer(pid(1), pid(2)), pid(1));
    }

    #[test]
    fn test_arbitration_is_symmetric() {
        let ids: Vec<ParticipantId> = (0..8).map(|_| ParticipantId::new()).collect();

        for a in &ids {
            for b in &ids {
                if a == b {
                    continue;
                }
                assert_eq!(initiator(*a, *b), initiator(*b, *a));
                assert_eq!(answerer(*a, *b), answerer(*b, *a));
                assert_ne!(initiator(*a, *b), answerer(*a, *b));
            }
        }
    }

    #[test]
    fn test_roles_are_complementary() {
        let (a, b) = (pid(10), pid(3));
        assert_eq!(role_of(a, b), LinkRole::Initiator);
        assert_eq!(role_of(b, a), LinkRole::Answerer);
    }

    #[test]
    fn test_order_uses_full_width() {
        // High bits dominate: a value above u64::MAX beats any small value.
        let big = pid(1 << 100);
        let small = pid(u128::from(u64::MAX));
        assert_eq!(initiator(small, big), big);
    }
}
