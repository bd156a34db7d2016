//! Shared-memory array channel eligibility (spec.md §4.9).
//!
//! This module only decides whether an argument *may* go out-of-band; it
//! never touches a filesystem. Writing the backing file, choosing its
//! name, mapping it back on receive, and running the background cleaner
//! are `pjrmi-client`'s job, since they need real I/O and a shared
//! directory path this crate has no business knowing about.

use crate::narrowing::NumericKind;

/// The longest array PJRmi's wire length prefix (a signed `int32`) can
/// describe.
pub const MAX_SHM_ARRAY_LENGTH: i64 = i32::MAX as i64;

/// Inputs needed to decide SHM eligibility for one array argument.
#[derive(Debug, Clone, Copy)]
pub struct ShmCandidate {
    /// Whether the transport hint says both peers are on the same host.
    pub same_host: bool,
    /// Whether the SHM feature is enabled for this connection.
    pub feature_enabled: bool,
    /// Whether the peer advertised the SHM extension during handshake.
    pub extension_present: bool,
    /// The array's element kind, if it is a numeric array at all.
    pub element_kind: Option<NumericKind>,
    /// Number of elements.
    pub length: i64,
    /// Whether the target parameter type is `Object`, `Object[]`, or the
    /// matching primitive array type.
    pub target_accepts_shm: bool,
}

/// Outcome of an eligibility check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShmDecision {
    /// Eligible: the caller may write the array to a SHM file and encode
    /// an `S`-tagged argument instead of an inline one.
    Eligible,
    /// Ineligible, falling back to inline encoding is mandatory.
    Ineligible(IneligibleReason),
}

/// Why an array did not qualify for the SHM channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IneligibleReason {
    /// Peers are not on the same host.
    DifferentHosts,
    /// The SHM feature is disabled for this connection.
    FeatureDisabled,
    /// The peer did not advertise the SHM extension.
    ExtensionAbsent,
    /// The value is not a numeric array at all.
    NotNumericArray,
    /// The array exceeds [`MAX_SHM_ARRAY_LENGTH`].
    TooLong,
    /// The target parameter type cannot accept a SHM-backed array.
    TargetIncompatible,
}

/// Decides whether `candidate` is eligible for the SHM channel. Every
/// condition must hold (spec.md §4.9: "all must hold").
#[must_use]
pub fn evaluate(candidate: ShmCandidate) -> ShmDecision {
    if !candidate.same_host {
        return ShmDecision::Ineligible(IneligibleReason::DifferentHosts);
    }
    if !candidate.feature_enabled {
        return ShmDecision::Ineligible(IneligibleReason::FeatureDisabled);
    }
    if !candidate.extension_present {
        return ShmDecision::Ineligible(IneligibleReason::ExtensionAbsent);
    }
    if candidate.element_kind.is_none() {
        return ShmDecision::Ineligible(IneligibleReason::NotNumericArray);
    }
    if candidate.length < 0 || candidate.length > MAX_SHM_ARRAY_LENGTH {
        return ShmDecision::Ineligible(IneligibleReason::TooLong);
    }
    if !candidate.target_accepts_shm {
        return ShmDecision::Ineligible(IneligibleReason::TargetIncompatible);
    }
    ShmDecision::Eligible
}

/// Maps a numeric kind to the single-UTF-16-character dtype code PJRmi
/// uses in the `S`-tagged argument header (spec.md §4.9, e.g. `"d"` for
/// `double`).
#[must_use]
pub const fn dtype_code(kind: NumericKind) -> &'static str {
    match kind {
        NumericKind::Byte => "b",
        NumericKind::Short => "s",
        NumericKind::Char => "c",
        NumericKind::Int => "i",
        NumericKind::Long => "l",
        NumericKind::Float => "f",
        NumericKind::Double => "d",
    }
}
