//! Self-identification protocol shared by the agent, the inbound signal
//! endpoint, and the beacons.
//!
//! The agent marks every outbound request with [`SELF_ORIGIN_HEADER`] and
//! exposes [`IDENTITY_FLAG`] as a read-only global to page scripts. A native
//! process running as the agent carries [`IDENTITY_ENV`].

use crate::types::SignalOrigin;

/// Header attached to every request the agent makes. Presence alone is the
/// tag; the value is informational.
pub const SELF_ORIGIN_HEADER: &str = "x-standin-agent";

/// Value the agent sends with [`SELF_ORIGIN_HEADER`].
pub const SELF_ORIGIN_HEADER_VALUE: &str = "1";

/// Body `origin` value that tags a heartbeat as self-originated.
pub const SELF_ORIGIN_BODY_VALUE: &str = "agent";

/// Read-only `window` property defined inside the agent before any page
/// script runs.
pub const IDENTITY_FLAG: &str = "isStandinAgent";

/// Environment variable marking a native process as the agent.
pub const IDENTITY_ENV: &str = "STANDIN_AGENT";

/// Classify an inbound signal from its transport-level tags.
///
/// `header_present` is whether [`SELF_ORIGIN_HEADER`] was sent at all;
/// `body_origin` is the optional `origin` field of the request body.
pub fn classify_origin(header_present: bool, body_origin: Option<&str>) -> SignalOrigin {
    let body_tagged =
        body_origin.is_some_and(|o| o.trim().eq_ignore_ascii_case(SELF_ORIGIN_BODY_VALUE));
    if header_present || body_tagged {
        SignalOrigin::SelfOrigin
    } else {
        SignalOrigin::Genuine
    }
}

/// Whether an identity flag value (env var or similar) marks the agent.
///
/// Empty, `0` and `false` are treated as unset.
pub fn is_identity_flag_set(value: Option<&str>) -> bool {
    match value.map(str::trim) {
        None | Some("") => false,
        Some(v) => !(v == "0" || v.eq_ignore_ascii_case("false")),
    }
}
