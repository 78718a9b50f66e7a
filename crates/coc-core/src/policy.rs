//! Role policy, required-signature set, and verification policy profiles.
//!
//! All three are closed sets: the enumerations here are the single source
//! of truth, and every validation site matches exhaustively against them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::event::EventType;

/// Role an actor takes within a trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Opens sessions and creates proposals.
    Planner,
    /// Executes tools, records artifacts, issues claims, signs the final
    /// statement.
    Executor,
    /// Reviews proposals and challenges claims.
    Critic,
    /// Runs and completes verification.
    Auditor,
}

impl Role {
    /// All roles, in declaration order.
    pub const ALL: [Self; 4] = [Self::Planner, Self::Executor, Self::Critic, Self::Auditor];

    /// Event types this role is allowed to emit. The mapping is exhaustive
    /// and closed; anything not listed is a policy violation.
    #[must_use]
    pub const fn allowed_event_types(self) -> &'static [EventType] {
        match self {
            Self::Planner => &[EventType::SessionInitialized, EventType::ProposalCreated],
            Self::Executor => &[
                EventType::ToolIntentSigned,
                EventType::ToolExecutionStarted,
                EventType::ToolExecutionCompleted,
                EventType::ToolExecutionFailed,
                EventType::ArtifactRecorded,
                EventType::ClaimIssued,
                EventType::FinalStatementSigned,
            ],
            Self::Critic => &[EventType::ProposalReviewed, EventType::ClaimChallenged],
            Self::Auditor => &[
                EventType::VerificationRunStarted,
                EventType::VerificationRunCompleted,
            ],
        }
    }

    /// Returns `true` if this role may emit `event_type`.
    #[must_use]
    pub fn allows(self, event_type: EventType) -> bool {
        self.allowed_event_types().contains(&event_type)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Planner => "planner",
            Self::Executor => "executor",
            Self::Critic => "critic",
            Self::Auditor => "auditor",
        };
        f.write_str(s)
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "planner" => Ok(Self::Planner),
            "executor" => Ok(Self::Executor),
            "critic" => Ok(Self::Critic),
            "auditor" => Ok(Self::Auditor),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

/// Strictness mode for the verifier.
///
/// Changes whether certain conditions (notably unresolved disputed claims)
/// are failures or warnings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyProfile {
    /// Disputed unresolved claims fail verification.
    Strict,
    /// Disputed unresolved claims are warnings.
    #[default]
    Default,
    /// Like `default`, with reduced warning severity.
    Lenient,
}

impl fmt::Display for PolicyProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Strict => "strict",
            Self::Default => "default",
            Self::Lenient => "lenient",
        };
        f.write_str(s)
    }
}

impl FromStr for PolicyProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "strict" => Ok(Self::Strict),
            "default" => Ok(Self::Default),
            "lenient" => Ok(Self::Lenient),
            other => Err(format!("unknown policy profile '{other}'")),
        }
    }
}

/// Event types that must carry a valid signature for a trace to pass
/// verification. Other types must still verify if a signature is present,
/// but a missing signature on them is not a failure.
pub const REQUIRED_SIGNED: [EventType; 6] = [
    EventType::ProposalCreated,
    EventType::ToolIntentSigned,
    EventType::ClaimIssued,
    EventType::ClaimChallenged,
    EventType::FinalStatementSigned,
    EventType::VerificationRunCompleted,
];

/// Returns `true` if `event_type` demands a present, valid signature.
#[must_use]
pub fn requires_signature(event_type: EventType) -> bool {
    REQUIRED_SIGNED.contains(&event_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_policy_is_closed() {
        // Every event type is owned by exactly one role.
        for event_type in EventType::ALL {
            let owners: Vec<Role> = Role::ALL
                .into_iter()
                .filter(|role| role.allows(event_type))
                .collect();
            assert_eq!(owners.len(), 1, "{event_type:?} owned by {owners:?}");
        }
    }

    #[test]
    fn test_planner_cannot_execute_tools() {
        assert!(Role::Planner.allows(EventType::ProposalCreated));
        assert!(!Role::Planner.allows(EventType::ToolExecutionStarted));
        assert!(!Role::Auditor.allows(EventType::ProposalCreated));
    }

    #[test]
    fn test_required_signed_membership() {
        assert!(requires_signature(EventType::ProposalCreated));
        assert!(requires_signature(EventType::FinalStatementSigned));
        assert!(!requires_signature(EventType::SessionInitialized));
        assert!(!requires_signature(EventType::ToolExecutionStarted));
    }

    #[test]
    fn test_role_serde_round_trip() {
        for role in Role::ALL {
            let json = serde_json::to_string(&role).unwrap();
            let back: Role = serde_json::from_str(&json).unwrap();
            assert_eq!(back, role);
        }
        assert_eq!(
            serde_json::to_string(&Role::Executor).unwrap(),
            r#""executor""#
        );
    }

    #[test]
    fn test_profile_parse_display_round_trip() {
        for profile in [
            PolicyProfile::Strict,
            PolicyProfile::Default,
            PolicyProfile::Lenient,
        ] {
            assert_eq!(profile.to_string().parse::<PolicyProfile>(), Ok(profile));
        }
        assert!("loose".parse::<PolicyProfile>().is_err());
    }
}
