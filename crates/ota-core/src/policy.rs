//! Update policy: decide whether a candidate image should be installed

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::descriptor::FirmwareDescriptor;

/// Which gates the policy evaluator applies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Treat a changed version label as a reason to update
    pub enforce_version_check: bool,
    /// Treat a changed content hash as a reason to update
    pub require_hash_change: bool,
    /// Reject candidates whose security version is below the device floor
    pub enforce_rollback_floor: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            enforce_version_check: true,
            require_hash_change: true,
            enforce_rollback_floor: false,
        }
    }
}

/// Why an update was skipped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SkipReason {
    /// The candidate matches the running firmware
    AlreadyUpToDate,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::AlreadyUpToDate => write!(f, "already up to date"),
        }
    }
}

/// Why a candidate was refused outright
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RejectReason {
    /// Candidate security version is below the floor
    SecurityVersionTooLow {
        /// Candidate security version
        candidate: u32,
        /// Device floor
        floor: u32,
    },
}

/// Result of policy evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDecision {
    /// Install the candidate
    Proceed,
    /// Leave the running firmware in place
    Skip(SkipReason),
    /// Refuse the candidate
    Reject(RejectReason),
}

/// Evaluate `candidate` against the running firmware and the security floor.
///
/// Gates apply in order: rollback floor, then identity. An unreadable
/// running descriptor (`None`) counts as changed on every axis, so the
/// evaluator proceeds once the floor gate has passed.
pub fn evaluate(
    running: Option<&FirmwareDescriptor>,
    candidate: &FirmwareDescriptor,
    floor: u32,
    config: &PolicyConfig,
) -> PolicyDecision {
    if config.enforce_rollback_floor && candidate.security_version() < floor {
        return PolicyDecision::Reject(RejectReason::SecurityVersionTooLow {
            candidate: candidate.security_version(),
            floor,
        });
    }

    let Some(running) = running else {
        warn!(
            candidate = candidate.version(),
            "Running firmware descriptor unavailable; treating candidate as new"
        );
        return PolicyDecision::Proceed;
    };

    let hash_changed =
        config.require_hash_change && candidate.content_hash() != running.content_hash();

    let changed = if config.enforce_version_check {
        let version_changed = candidate.version() != running.version();
        version_changed || hash_changed
    } else {
        hash_changed
    };

    if changed {
        PolicyDecision::Proceed
    } else {
        PolicyDecision::Skip(SkipReason::AlreadyUpToDate)
    }
}
