//! Protocol commands and state-machine operations.

/// Message types exchanged between a client and the replica group.
///
/// Only a subset of the consensus protocol's command space is ever addressed
/// to clients; everything else arriving at a client is dropped.
#[repr(u16)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Default)]
pub enum Command {
    /// Reserved/invalid command (default).
    #[default]
    Reserved = 0,
    /// Client-to-replica ping for connection keepalive.
    PingClient = 1,
    /// Replica-to-client pong response.
    PongClient = 2,
    /// Client request message.
    Request = 3,
    /// Reply to a client request.
    Reply = 4,
    /// Client eviction notification.
    Eviction = 5,
}

impl TryFrom<u16> for Command {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Command::Reserved),
            1 => Ok(Command::PingClient),
            2 => Ok(Command::PongClient),
            3 => Ok(Command::Request),
            4 => Ok(Command::Reply),
            5 => Ok(Command::Eviction),
            _ => Err(value),
        }
    }
}

/// Operations below this value belong to the consensus protocol itself.
///
/// The ledger state machine owns the rest of the `u8` space.
pub const VSR_OPERATIONS_RESERVED: u8 = 8;

/// State machine operations.
///
/// Operations < [`VSR_OPERATIONS_RESERVED`] are protocol-internal; user
/// requests must carry an operation at or above it.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Default)]
pub enum Operation {
    // Protocol operations (< 8)
    /// Reserved/invalid operation (default).
    #[default]
    Reserved = 0,
    /// Root operation for bootstrap.
    Root = 1,
    /// Register a new client session.
    Register = 2,
    /// Periodic pulse for time-based operations.
    Pulse = 3,
    /// No-op for log compaction.
    Noop = 4,

    // Ledger state machine operations (>= 8)
    /// Create accounts (batch).
    CreateAccounts = 8,
    /// Create transfers (batch).
    CreateTransfers = 9,
    /// Lookup accounts by ID (batch).
    LookupAccounts = 10,
    /// Lookup transfers by ID (batch).
    LookupTransfers = 11,
}

impl Operation {
    /// Returns true if this operation is reserved for the protocol.
    pub fn is_reserved(self) -> bool {
        (self as u8) < VSR_OPERATIONS_RESERVED
    }
}

impl TryFrom<u8> for Operation {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Operation::Reserved),
            1 => Ok(Operation::Root),
            2 => Ok(Operation::Register),
            3 => Ok(Operation::Pulse),
            4 => Ok(Operation::Noop),
            8 => Ok(Operation::CreateAccounts),
            9 => Ok(Operation::CreateTransfers),
            10 => Ok(Operation::LookupAccounts),
            11 => Ok(Operation::LookupTransfers),
            _ => Err(value),
        }
    }
}
