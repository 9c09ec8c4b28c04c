//! Session client for the replica group.
//!
//! A [`SessionClient`] owns one linearizable stream of requests to a
//! cluster running a Viewstamped-Replication-style consensus protocol. At
//! most one request is on the wire at any time; each request is
//! hash-chained to the previous reply so reordering, loss, or duplication
//! is detected and dropped.
//!
//! The client is event-driven and never blocks: the host fires [`tick`] at
//! a fixed rate and feeds inbound traffic to [`on_message`]; outbound
//! messages go to the host's [`MessageBus`]. Reply callbacks receive the
//! client back mutably so they may submit follow-up requests directly.
//!
//! [`tick`]: SessionClient::tick
//! [`on_message`]: SessionClient::on_message
//!
//! # Example
//!
//! ```ignore
//! let mut client = SessionClientBuilder::new()
//!     .cluster(7)
//!     .replica_count(3)
//!     .build(bus);
//!
//! let message = client.acquire_message()?;
//! client.message_mut(&message).body_mut()[0] = 0xAA;
//! client.submit(
//!     1,
//!     Box::new(|_client, user_data, _body| println!("done: {user_data}")),
//!     Operation::CreateTransfers,
//!     message,
//!     1,
//! )?;
//!
//! loop {
//!     client.tick();
//!     for inbound in host.poll() {
//!         client.on_message(&inbound)?; // Err means evicted: terminate.
//!     }
//! }
//! ```

use log::{debug, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::error::{ProtocolViolation, Result, SessionError};
use crate::message_pool::{Message, MessageBuffer, MessagePool};
use crate::protocol::{Command, Header, Operation, HEADER_SIZE, VSR_OPERATIONS_RESERVED};
use crate::ring_queue::RingQueue;
use crate::timeout::Timeout;

/// Default bound on queued user requests (and thus the message budget).
const REQUEST_QUEUE_MAX_DEFAULT: usize = 32;

/// Default message buffer size.
const MESSAGE_SIZE_MAX_DEFAULT: usize = 64 * 1024;

/// Default ping period: 30 s at 10 ms per tick.
const PING_TIMEOUT_TICKS_DEFAULT: u64 = 3000;

/// Default request round-trip estimate: 300 ms at 10 ms per tick.
const REQUEST_RTT_TICKS_DEFAULT: u64 = 30;

/// Default multiple of the round-trip estimate before retransmitting.
const REQUEST_RTT_MULTIPLE_DEFAULT: u64 = 2;

/// Outbound half of the host's I/O driver.
///
/// The bus serializes (or copies) the message during the call; it must not
/// retain the slice.
pub trait MessageBus {
    /// Send `message` (header + body wire bytes) to one replica.
    fn send_to_replica(&mut self, replica: u8, message: &[u8]);
}

/// Reply handler: receives the client, the request's `user_data`, and the
/// reply body.
pub type ReplyCallback<B> = Box<dyn FnOnce(&mut SessionClient<B>, u128, &[u8])>;

/// One queued unit of work. The queue head is the inflight request.
struct Request<B> {
    user_data: u128,
    /// `None` only for the internal register request.
    callback: Option<ReplyCallback<B>>,
    message: Message,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    Unregistered,
    Registering,
    Active,
    Evicted,
}

/// Single-connection, single-inflight protocol state machine.
pub struct SessionClient<B> {
    id: u128,
    cluster: u32,
    replica_count: u8,
    state: State,
    session: u64,
    request_number: u32,
    view: u32,
    parent: u128,
    bus: B,
    pool: MessagePool,
    request_queue: RingQueue<Request<B>>,
    request_queue_max: usize,
    messages_available: usize,
    ping_timeout: Timeout,
    request_timeout: Timeout,
    rng: StdRng,
}

impl<B: MessageBus> SessionClient<B> {
    /// The client's identifier.
    pub fn id(&self) -> u128 {
        self.id
    }

    /// The cluster identifier.
    pub fn cluster(&self) -> u32 {
        self.cluster
    }

    /// The highest view seen from the cluster.
    pub fn view(&self) -> u32 {
        self.view
    }

    /// The session number, zero until registration completes.
    pub fn session(&self) -> u64 {
        self.session
    }

    /// Whether the session is registered and accepting replies.
    pub fn is_registered(&self) -> bool {
        self.state == State::Active
    }

    /// Remaining message budget.
    pub fn messages_available(&self) -> usize {
        self.messages_available
    }

    /// Borrow the message bus.
    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// Mutably borrow the message bus.
    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    /// Borrow the buffer behind a message handle.
    pub fn message(&self, message: &Message) -> &MessageBuffer {
        self.pool.get(message)
    }

    /// Mutably borrow the buffer behind a message handle, e.g. to fill in
    /// a request body before [`submit`](Self::submit).
    pub fn message_mut(&mut self, message: &Message) -> &mut MessageBuffer {
        self.pool.get_mut(message)
    }

    /// Advance timers. The host calls this at a fixed tick rate.
    pub fn tick(&mut self) {
        if self.state == State::Evicted {
            return;
        }
        self.ping_timeout.tick();
        self.request_timeout.tick();

        if self.ping_timeout.fired() {
            self.ping_timeout.reset();
            self.send_ping();
        }

        if self.request_timeout.fired() {
            self.request_timeout.backoff(&mut self.rng);
            self.retransmit_inflight();
        }
    }

    /// Obtain a send buffer against the message budget.
    pub fn acquire_message(&mut self) -> Result<Message> {
        if self.state == State::Evicted {
            return Err(SessionError::Evicted { view: self.view });
        }
        if self.messages_available == 0 {
            return Err(SessionError::BudgetExceeded);
        }
        self.messages_available -= 1;
        // The pool holds one buffer per budget unit plus the register slot,
        // so a budgeted acquire cannot miss.
        let message = self.pool.acquire().expect("pool exhausted within budget");
        Ok(message)
    }

    /// Return an unsubmitted message to the pool, replenishing the budget
    /// once the last reference drops.
    pub fn release_message(&mut self, message: Message) {
        if self.pool.release(message) {
            self.messages_available += 1;
            assert!(self.messages_available <= self.request_queue_max);
        }
    }

    /// Enqueue a request for `operation` with a `body_size`-byte body
    /// already written into `message`.
    ///
    /// The first submission of a session also enqueues the internal
    /// register request ahead of this one. On error the message is
    /// released back to the pool.
    pub fn submit(
        &mut self,
        user_data: u128,
        callback: ReplyCallback<B>,
        operation: Operation,
        message: Message,
        body_size: u32,
    ) -> Result<()> {
        let operation = operation as u8;
        let size = HEADER_SIZE as u32 + body_size;
        self.enqueue(user_data, callback, operation, message, size)
    }

    /// Enqueue a pre-formatted request: the message's header already
    /// carries its operation and size (used for replay).
    ///
    /// The hash-chain fields are still filled at send time, so a replayed
    /// request re-chains onto this session.
    pub fn submit_raw(
        &mut self,
        user_data: u128,
        callback: ReplyCallback<B>,
        message: Message,
    ) -> Result<()> {
        let header = self.pool.get(&message).header();
        self.enqueue(user_data, callback, header.operation, message, header.size)
    }

    fn enqueue(
        &mut self,
        user_data: u128,
        callback: ReplyCallback<B>,
        operation: u8,
        message: Message,
        size: u32,
    ) -> Result<()> {
        if self.state == State::Evicted {
            self.release_message(message);
            return Err(SessionError::Evicted { view: self.view });
        }
        if operation < VSR_OPERATIONS_RESERVED {
            self.release_message(message);
            return Err(SessionError::OperationReserved(operation));
        }
        if self.user_request_count() == self.request_queue_max {
            self.release_message(message);
            return Err(SessionError::BudgetExceeded);
        }
        assert!((size as usize) >= HEADER_SIZE);
        assert!((size as usize) <= self.pool.get(&message).capacity());

        self.register_session();

        self.request_number += 1;
        let request_number = self.request_number;
        let id = self.id;
        let cluster = self.cluster;
        self.pool.get_mut(&message).with_header(|header| {
            header.set_command(Command::Request);
            header.cluster = cluster;
            header.client = id;
            header.request = request_number;
            header.operation = operation;
            header.size = size;
        });

        let send_now = self.request_queue.is_empty();
        self.request_queue.push(Request {
            user_data,
            callback: Some(callback),
            message,
        });
        if send_now {
            self.send_head();
        }
        Ok(())
    }

    /// Process one inbound message.
    ///
    /// Returns `Err` only for a valid eviction of this session, which is
    /// fatal: the host must terminate the process, because the cluster has
    /// voided the session's linearizability guarantee.
    pub fn on_message(&mut self, buffer: &[u8]) -> Result<()> {
        if self.state == State::Evicted {
            return Ok(());
        }
        let Some(header) = Header::from_prefix(buffer) else {
            warn!("client {:x}: dropping runt message", self.id);
            return Ok(());
        };
        if !header.valid_checksum() {
            warn!(
                "client {:x}: dropping message: {}",
                self.id,
                ProtocolViolation::HeaderChecksum
            );
            return Ok(());
        }
        if header.cluster != self.cluster {
            warn!(
                "client {:x}: dropping message: {}",
                self.id,
                ProtocolViolation::WrongCluster
            );
            return Ok(());
        }

        match Command::try_from(header.command) {
            Ok(Command::PongClient) => self.on_pong(&header),
            Ok(Command::Reply) => self.on_reply(&header, buffer),
            Ok(Command::Eviction) => return self.on_eviction(&header),
            Ok(command) => {
                warn!("client {:x}: ignoring misdirected {:?}", self.id, command);
            }
            Err(value) => {
                warn!(
                    "client {:x}: dropping message: {}",
                    self.id,
                    ProtocolViolation::UnknownCommand(value)
                );
            }
        }
        Ok(())
    }

    // ========================================================================
    // Internal: state machine
    // ========================================================================

    fn user_request_count(&self) -> usize {
        let register_queued = usize::from(self.state == State::Registering);
        self.request_queue.len() - register_queued
    }

    /// Enqueue and send the register request. No-op unless unregistered.
    fn register_session(&mut self) {
        if self.state != State::Unregistered {
            return;
        }
        assert_eq!(self.session, 0);
        assert!(self.request_queue.is_empty());
        self.state = State::Registering;

        // Drawn from the pool's reserved slot: registration does not spend
        // the caller's budget.
        let message = self.pool.acquire().expect("pool reserves a register slot");
        self.request_number += 1;
        let request_number = self.request_number;
        let id = self.id;
        let cluster = self.cluster;
        self.pool.get_mut(&message).with_header(|header| {
            header.set_command(Command::Request);
            header.cluster = cluster;
            header.client = id;
            header.request = request_number;
            header.operation = Operation::Register as u8;
            header.size = HEADER_SIZE as u32;
        });

        debug!("client {:x}: registering with cluster {}", id, cluster);
        self.request_queue.push(Request {
            user_data: 0,
            callback: None,
            message,
        });
        self.send_head();
    }

    /// Send the queue head for the first time: fill the hash-chain fields,
    /// checksum, and route to the primary for the current view.
    fn send_head(&mut self) {
        let request = self.request_queue.head().expect("queue head to send");
        let parent = self.parent;
        let context = self.session as u128;
        let view = self.view;

        let buffer = self.pool.get_mut(&request.message);
        buffer.with_header(|header| {
            header.parent = parent;
            header.context = context;
            header.view = view;
        });
        buffer.finalize();
        self.parent = buffer.header().checksum;

        let replica = (view % u32::from(self.replica_count)) as u8;
        self.bus.send_to_replica(replica, buffer.bytes());
        self.request_timeout.start();
    }

    /// Retransmit the inflight request, round-robining across replicas.
    fn retransmit_inflight(&mut self) {
        let Some(request) = self.request_queue.head() else {
            self.request_timeout.stop();
            return;
        };
        let attempts = u32::from(self.request_timeout.attempts());
        let replica = (self.view.wrapping_add(attempts) % u32::from(self.replica_count)) as u8;

        let buffer = self.pool.get(&request.message);
        debug!(
            "client {:x}: retransmitting request {} to replica {} (attempt {})",
            self.id,
            buffer.header().request,
            replica,
            attempts,
        );
        self.bus.send_to_replica(replica, buffer.bytes());
    }

    /// Broadcast a keepalive ping to every replica.
    fn send_ping(&mut self) {
        let mut header = Header::new(self.cluster);
        header.set_command(Command::PingClient);
        header.client = self.id;
        header.view = self.view;
        header.set_checksum_body(&[]);
        header.set_checksum();

        for replica in 0..self.replica_count {
            self.bus.send_to_replica(replica, header.as_bytes());
        }
    }

    fn on_pong(&mut self, header: &Header) {
        if header.client != self.id {
            debug!(
                "client {:x}: dropping pong: {}",
                self.id,
                ProtocolViolation::WrongClient
            );
            return;
        }
        if header.view > self.view {
            debug!(
                "client {:x}: view {} -> {} from pong",
                self.id, self.view, header.view
            );
            self.view = header.view;
        }
        // A pong may arrive before any submission; establish the session
        // eagerly so the first user request finds it registered.
        if self.state == State::Unregistered {
            self.register_session();
        }
    }

    fn on_reply(&mut self, header: &Header, buffer: &[u8]) {
        if let Err(violation) = self.check_reply(header, buffer) {
            match violation {
                // Expected during retransmission races; not worth a warning.
                ProtocolViolation::StaleRequest | ProtocolViolation::NoInflight => {
                    debug!("client {:x}: dropping reply: {}", self.id, violation);
                }
                _ => warn!("client {:x}: dropping reply: {}", self.id, violation),
            }
            return;
        }

        let body = &buffer[HEADER_SIZE..header.size as usize];
        self.request_timeout.stop();
        self.parent = header.context;
        if header.view > self.view {
            self.view = header.view;
        }

        let request = self.request_queue.pop().expect("inflight request");
        if request.callback.is_none() {
            // Register reply: the commit number is our session.
            assert_eq!(self.state, State::Registering);
            assert!(header.commit > 0);
            self.session = header.commit;
            self.state = State::Active;
            debug!("client {:x}: session {} registered", self.id, self.session);
        }

        // Release the queue's reference; only budgeted (user) messages
        // replenish the budget.
        let budgeted = request.callback.is_some();
        if self.pool.release(request.message) && budgeted {
            self.messages_available += 1;
            assert!(self.messages_available <= self.request_queue_max);
        }

        // Dispatch the next request before the callback runs, so a callback
        // that resubmits cannot double-send the new head.
        if !self.request_queue.is_empty() {
            self.send_head();
        }

        if let Some(callback) = request.callback {
            callback(self, request.user_data, body);
        }
    }

    fn check_reply(&self, header: &Header, buffer: &[u8]) -> std::result::Result<(), ProtocolViolation> {
        let size = header.size as usize;
        if size < HEADER_SIZE || size > buffer.len() {
            return Err(ProtocolViolation::Truncated);
        }
        if header.client != self.id {
            return Err(ProtocolViolation::WrongClient);
        }
        if !header.valid_checksum_body(&buffer[HEADER_SIZE..size]) {
            return Err(ProtocolViolation::BodyChecksum);
        }

        let Some(request) = self.request_queue.head() else {
            return Err(ProtocolViolation::NoInflight);
        };
        let inflight = self.pool.get(&request.message).header();
        if header.request < inflight.request {
            return Err(ProtocolViolation::StaleRequest);
        }
        if header.request > inflight.request {
            return Err(ProtocolViolation::RequestMismatch);
        }
        if header.parent != self.parent {
            return Err(ProtocolViolation::ParentMismatch);
        }
        if header.operation != inflight.operation {
            return Err(ProtocolViolation::OperationMismatch);
        }
        if header.op != header.commit {
            return Err(ProtocolViolation::CommitMismatch);
        }
        if inflight.operation == Operation::Register as u8 && header.commit == 0 {
            return Err(ProtocolViolation::SessionZero);
        }
        Ok(())
    }

    fn on_eviction(&mut self, header: &Header) -> Result<()> {
        if header.client != self.id {
            warn!(
                "client {:x}: dropping eviction: {}",
                self.id,
                ProtocolViolation::WrongClient
            );
            return Ok(());
        }
        if header.view < self.view {
            debug!(
                "client {:x}: ignoring stale eviction from view {}",
                self.id, header.view
            );
            return Ok(());
        }

        self.state = State::Evicted;
        warn!("client {:x}: session evicted at view {}", self.id, header.view);
        Err(SessionError::Evicted { view: header.view })
    }
}

// ============================================================================
// SessionClientBuilder
// ============================================================================

/// Builder for a [`SessionClient`].
///
/// # Example
///
/// ```ignore
/// let client = SessionClientBuilder::new()
///     .cluster(7)
///     .replica_count(3)
///     .request_queue_max(64)
///     .build(bus);
/// ```
pub struct SessionClientBuilder {
    id: Option<u128>,
    cluster: u32,
    replica_count: u8,
    request_queue_max: usize,
    message_size_max: usize,
    ping_timeout_ticks: u64,
    request_rtt_ticks: u64,
    request_rtt_multiple: u64,
}

impl SessionClientBuilder {
    /// Create a builder with defaults.
    pub fn new() -> Self {
        Self {
            id: None,
            cluster: 0,
            replica_count: 1,
            request_queue_max: REQUEST_QUEUE_MAX_DEFAULT,
            message_size_max: MESSAGE_SIZE_MAX_DEFAULT,
            ping_timeout_ticks: PING_TIMEOUT_TICKS_DEFAULT,
            request_rtt_ticks: REQUEST_RTT_TICKS_DEFAULT,
            request_rtt_multiple: REQUEST_RTT_MULTIPLE_DEFAULT,
        }
    }

    /// Set an explicit client id (random by default). Must be non-zero.
    pub fn id(mut self, id: u128) -> Self {
        self.id = Some(id);
        self
    }

    /// Set the cluster id.
    pub fn cluster(mut self, cluster: u32) -> Self {
        self.cluster = cluster;
        self
    }

    /// Set the number of replicas in the group.
    pub fn replica_count(mut self, replica_count: u8) -> Self {
        self.replica_count = replica_count;
        self
    }

    /// Set the bound on queued user requests (and the message budget).
    pub fn request_queue_max(mut self, request_queue_max: usize) -> Self {
        self.request_queue_max = request_queue_max;
        self
    }

    /// Set the message buffer size.
    pub fn message_size_max(mut self, message_size_max: usize) -> Self {
        self.message_size_max = message_size_max;
        self
    }

    /// Set the ping period in ticks.
    pub fn ping_timeout_ticks(mut self, ticks: u64) -> Self {
        self.ping_timeout_ticks = ticks;
        self
    }

    /// Set the request round-trip estimate in ticks.
    pub fn request_rtt_ticks(mut self, ticks: u64) -> Self {
        self.request_rtt_ticks = ticks;
        self
    }

    /// Set the round-trip multiple before the first retransmission.
    pub fn request_rtt_multiple(mut self, multiple: u64) -> Self {
        self.request_rtt_multiple = multiple;
        self
    }

    /// Build the client around the host's bus.
    pub fn build<B: MessageBus>(self, bus: B) -> SessionClient<B> {
        assert!(self.replica_count > 0, "replica_count must be non-zero");
        assert!(self.request_queue_max > 0);
        assert!(self.request_rtt_ticks > 0 && self.request_rtt_multiple > 0);

        let id = self.id.unwrap_or_else(crate::client_id);
        assert!(id != 0, "client id must be non-zero");

        // Jitter must differ between clients that start in lockstep, so the
        // RNG is seeded from the client id.
        let rng = StdRng::seed_from_u64((id ^ (id >> 64)) as u64);

        let mut ping_timeout = Timeout::new("ping_timeout", self.ping_timeout_ticks);
        ping_timeout.start();

        SessionClient {
            id,
            cluster: self.cluster,
            replica_count: self.replica_count,
            state: State::Unregistered,
            session: 0,
            request_number: 0,
            view: 0,
            parent: 0,
            bus,
            // One buffer per budget unit, plus the register slot.
            pool: MessagePool::new(self.request_queue_max + 1, self.message_size_max),
            request_queue: RingQueue::with_capacity(self.request_queue_max + 1),
            request_queue_max: self.request_queue_max,
            messages_available: self.request_queue_max,
            ping_timeout,
            request_timeout: Timeout::new(
                "request_timeout",
                self.request_rtt_ticks * self.request_rtt_multiple,
            ),
            rng,
        }
    }
}

impl Default for SessionClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct NullBus;

    impl MessageBus for NullBus {
        fn send_to_replica(&mut self, _replica: u8, _message: &[u8]) {}
    }

    #[test]
    fn test_builder_defaults() {
        let builder = SessionClientBuilder::new();
        assert_eq!(builder.cluster, 0);
        assert_eq!(builder.replica_count, 1);
        assert_eq!(builder.request_queue_max, REQUEST_QUEUE_MAX_DEFAULT);
    }

    #[test]
    fn test_build_generates_nonzero_id() {
        let client = SessionClientBuilder::new().build(NullBus);
        assert_ne!(client.id(), 0);
        assert_eq!(client.session(), 0);
        assert_eq!(client.view(), 0);
        assert!(!client.is_registered());
    }

    #[test]
    #[should_panic(expected = "replica_count must be non-zero")]
    fn test_build_rejects_zero_replicas() {
        let _client = SessionClientBuilder::new().replica_count(0).build(NullBus);
    }

    #[test]
    #[should_panic(expected = "client id must be non-zero")]
    fn test_build_rejects_zero_id() {
        let _client = SessionClientBuilder::new().id(0).build(NullBus);
    }

    #[test]
    fn test_budget_boundary() {
        let mut client = SessionClientBuilder::new()
            .id(1)
            .request_queue_max(2)
            .build(NullBus);
        assert_eq!(client.messages_available(), 2);

        let a = client.acquire_message().unwrap();
        let _b = client.acquire_message().unwrap();
        assert_eq!(client.messages_available(), 0);
        assert_eq!(client.acquire_message().unwrap_err(), SessionError::BudgetExceeded);

        client.release_message(a);
        assert_eq!(client.messages_available(), 1);
        let _c = client.acquire_message().unwrap();
    }

    #[test]
    fn test_submit_rejects_reserved_operation() {
        let mut client = SessionClientBuilder::new().id(1).build(NullBus);
        let message = client.acquire_message().unwrap();
        let result = client.submit(0, Box::new(|_, _, _| {}), Operation::Register, message, 0);
        assert_eq!(result.unwrap_err(), SessionError::OperationReserved(2));
        // The message was released back to the pool.
        assert_eq!(client.messages_available(), REQUEST_QUEUE_MAX_DEFAULT);
    }

    #[test]
    fn test_first_submit_registers() {
        let mut client = SessionClientBuilder::new().id(1).cluster(3).build(NullBus);
        let message = client.acquire_message().unwrap();
        client
            .submit(9, Box::new(|_, _, _| {}), Operation::CreateAccounts, message, 0)
            .unwrap();
        // Register (request 1) + user request (request 2) are queued.
        assert_eq!(client.request_queue.len(), 2);
        assert_eq!(client.request_number, 2);
        assert_eq!(client.user_request_count(), 1);
    }
}
