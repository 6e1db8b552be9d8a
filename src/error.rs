use crate::wire;

/// Errors surfaced by the auto-configuration engine to its caller (spec §7).
///
/// Wire-level parsing failures (`wire::Error`) are folded into
/// [`EngineError::Wire`] rather than exposed directly: a caller outside this
/// crate never needs to match on a specific malformed-packet reason, only to
/// know that a particular source did not produce a usable answer in time.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The directive string named an interface that does not exist, or no
    /// interface was named and the default interface does not exist either.
    #[error("no such network interface")]
    NoDevice,

    /// A directive token was not recognised, or an option requiring an
    /// argument was given none.
    #[error("invalid configuration directive: {0}")]
    InvalidDirective(String),

    /// A protocol exchange (DHCPv4, DHCPv6, router discovery) did not
    /// complete before its retry budget was exhausted.
    #[error("timed out waiting for a reply")]
    Timeout,

    /// The DHCPv4 server answered with a NAK.
    #[error("DHCP request cancelled by server (NAK)")]
    Cancelled,

    /// A reply used an unexpected message type, or failed a consistency
    /// check (client-id / IAID / transaction-id mismatch).
    #[error("protocol error: {0}")]
    Protocol(&'static str),

    /// A received packet could not be parsed.
    #[error("malformed packet: {0}")]
    Wire(#[from] wire::Error),

    /// The stack collaborator reported a failure performing a requested
    /// operation (socket, address, or route manipulation).
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = core::result::Result<T, EngineError>;
