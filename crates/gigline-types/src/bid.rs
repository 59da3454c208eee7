use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::money::Amount;

/// Negotiation state of a bid.
///
/// ```text
/// pending   --accept-->  accepted   (terminal)
/// pending   --decline--> declined   (terminal)
/// pending   --counter--> countered
/// countered --accept-->  accepted   (terminal)
/// countered --decline--> declined   (terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BidStatus {
    Pending,
    Accepted,
    Declined,
    Countered,
}

/// A vendor-side mutation of a bid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BidAction {
    Accept,
    Decline,
    Counter(Amount),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot {action} a bid that is {from}")]
pub struct BidTransitionError {
    pub from: BidStatus,
    pub action: &'static str,
}

impl BidStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Declined => "declined",
            Self::Countered => "countered",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Accepted | Self::Declined)
    }

    /// Apply `action`, returning the next status or the rejected transition.
    pub fn apply(self, action: BidAction) -> Result<BidStatus, BidTransitionError> {
        let next = match (self, action) {
            (Self::Pending | Self::Countered, BidAction::Accept) => Self::Accepted,
            (Self::Pending | Self::Countered, BidAction::Decline) => Self::Declined,
            (Self::Pending, BidAction::Counter(_)) => Self::Countered,
            _ => {
                return Err(BidTransitionError {
                    from: self,
                    action: action.name(),
                });
            }
        };
        Ok(next)
    }

    /// Statuses reachable from `self` in one step.
    pub fn successors(self) -> &'static [BidStatus] {
        match self {
            Self::Pending => &[Self::Accepted, Self::Declined, Self::Countered],
            Self::Countered => &[Self::Accepted, Self::Declined],
            Self::Accepted | Self::Declined => &[],
        }
    }
}

impl BidAction {
    pub fn name(self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::Decline => "decline",
            Self::Counter(_) => "counter",
        }
    }
}

impl fmt::Display for BidStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BidStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "declined" => Ok(Self::Declined),
            "countered" => Ok(Self::Countered),
            other => Err(format!("unknown bid status '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [BidStatus; 4] = [
        BidStatus::Pending,
        BidStatus::Accepted,
        BidStatus::Declined,
        BidStatus::Countered,
    ];

    fn actions() -> [BidAction; 3] {
        [
            BidAction::Accept,
            BidAction::Decline,
            BidAction::Counter(Amount::from_units(450)),
        ]
    }

    #[test]
    fn pending_reaches_every_outcome() {
        let reached: Vec<_> = actions()
            .into_iter()
            .filter_map(|a| BidStatus::Pending.apply(a).ok())
            .collect();
        assert_eq!(
            reached,
            vec![BidStatus::Accepted, BidStatus::Declined, BidStatus::Countered]
        );
    }

    #[test]
    fn terminal_states_reject_everything() {
        for from in [BidStatus::Accepted, BidStatus::Declined] {
            assert!(from.is_terminal());
            for action in actions() {
                let err = from.apply(action).unwrap_err();
                assert_eq!(err.from, from);
            }
        }
    }

    #[test]
    fn countered_only_accepts_or_declines() {
        assert_eq!(
            BidStatus::Countered.apply(BidAction::Accept),
            Ok(BidStatus::Accepted)
        );
        assert_eq!(
            BidStatus::Countered.apply(BidAction::Decline),
            Ok(BidStatus::Declined)
        );
        assert!(
            BidStatus::Countered
                .apply(BidAction::Counter(Amount::from_units(1)))
                .is_err()
        );
    }

    #[test]
    fn successors_match_apply() {
        for from in ALL {
            let mut via_apply: Vec<_> = actions()
                .into_iter()
                .filter_map(|a| from.apply(a).ok())
                .collect();
            via_apply.dedup();
            assert_eq!(via_apply.as_slice(), from.successors(), "from {}", from);
        }
    }

    #[test]
    fn status_string_roundtrip() {
        for status in ALL {
            assert_eq!(status.as_str().parse::<BidStatus>(), Ok(status));
        }
        assert!("withdrawn".parse::<BidStatus>().is_err());
    }
}
