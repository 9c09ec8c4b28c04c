//! Session protocol client and in-memory cache core for a replicated
//! financial-ledger storage engine.
//!
//! This crate contains the two hot subsystems of the engine's client/write
//! path:
//!
//! - **[`SessionClient`]**: a single-connection, single-inflight protocol
//!   state machine talking to a replica group running a Viewstamped-
//!   Replication-style consensus protocol. Operations are linearizable per
//!   session, hash-chained end to end, and survive arbitrary replica
//!   failover. The client is driven entirely by host events: a fixed-rate
//!   `tick`, inbound messages, and an outbound [`MessageBus`].
//! - **[`cache::CacheMap`]**: a two-tier object cache (set-associative
//!   cache over two generational stash maps) with transactional scopes
//!   that persist or revert atomically, feeding sorted
//!   [`cache::TableMemory`] runs to the LSM below.
//!
//! # Quick start
//!
//! ```ignore
//! use ledgercore::{protocol::Operation, SessionClientBuilder};
//!
//! let mut client = SessionClientBuilder::new()
//!     .cluster(7)
//!     .replica_count(3)
//!     .build(bus);
//!
//! let message = client.acquire_message()?;
//! client.message_mut(&message).body_mut()[..payload.len()].copy_from_slice(payload);
//! client.submit(
//!     user_data,
//!     Box::new(|_client, user_data, body| handle_reply(user_data, body)),
//!     Operation::CreateTransfers,
//!     message,
//!     payload.len() as u32,
//! )?;
//! ```
//!
//! # Threading
//!
//! Everything here is single-threaded cooperative: one executor owns a
//! client and its cache, and all asynchrony lives in the host's I/O driver.
//! No locks, no suspension points.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

pub mod cache;
mod client;
mod error;
mod message_pool;
pub mod protocol;
mod ring_queue;
mod timeout;

pub use client::{MessageBus, ReplyCallback, SessionClient, SessionClientBuilder};
pub use error::{ProtocolViolation, Result, SessionError};
pub use message_pool::{Message, MessageBuffer, MessagePool};
pub use ring_queue::RingQueue;
pub use timeout::Timeout;

/// Generate a random non-zero client id.
///
/// Ids are ephemeral per process and never reused; the cluster tells
/// concurrent sessions apart by them.
///
/// # Example
///
/// ```
/// let a = ledgercore::client_id();
/// let b = ledgercore::client_id();
/// assert_ne!(a, 0);
/// assert_ne!(a, b);
/// ```
pub fn client_id() -> u128 {
    loop {
        let id: u128 = rand::random();
        if id != 0 {
            return id;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_id_nonzero_and_unique() {
        let ids: Vec<u128> = (0..100).map(|_| client_id()).collect();
        for (i, a) in ids.iter().enumerate() {
            assert_ne!(*a, 0);
            for b in &ids[..i] {
                assert_ne!(a, b);
            }
        }
    }
}
