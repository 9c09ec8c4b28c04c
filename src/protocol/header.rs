//! Wire message header (128 bytes).
//!
//! The header is the fixed-size prefix of every message exchanged with the
//! replica group. It carries the checksums, the hash-chain linkage, and the
//! routing fields; the body (if any) follows immediately after it.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use super::checksum::checksum;
use super::operation::Command;
use crate::error::ProtocolViolation;

/// Size of the message header in bytes.
pub const HEADER_SIZE: usize = 128;

/// Wire protocol header (128 bytes, little-endian).
///
/// `checksum` covers bytes 16..128 of the header; `checksum_body` covers the
/// body that follows. The `op`/`commit` pair is meaningful only in replies
/// and must be zero in every other message, like the padding around it.
#[repr(C)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct Header {
    /// Checksum covering bytes 16..128 of this header.
    pub checksum: u128,
    /// Checksum covering the message body after this header.
    pub checksum_body: u128,
    /// Hash-chain anchor: checksum of the most recent message in the
    /// opposite direction (see the request lifecycle).
    pub parent: u128,
    /// Client identifier.
    pub client: u128,
    /// Session number on requests; next hash-chain anchor on replies.
    pub context: u128,
    /// Request number (monotonically increasing per session).
    pub request: u32,
    /// Cluster identifier.
    pub cluster: u32,
    /// View number as known by the sender.
    pub view: u32,
    /// Total message size (header + body).
    pub size: u32,
    /// Reserved (must be zero).
    pub reserved: u16,
    /// Message command.
    pub command: u16,
    /// Replica index that authored this message (zero for clients).
    pub replica: u8,
    /// State machine operation.
    pub operation: u8,
    /// Padding (must be zero).
    pub padding: [u8; 2],
    /// Op number of the committed reply (replies only, zero elsewhere).
    pub op: u64,
    /// Commit number of the reply (replies only, zero elsewhere).
    pub commit: u64,
    /// Padding (must be zero).
    pub padding_frame: [u8; 8],
}

const _: () = assert!(std::mem::size_of::<Header>() == HEADER_SIZE);

impl Default for Header {
    fn default() -> Self {
        Self {
            checksum: 0,
            checksum_body: 0,
            parent: 0,
            client: 0,
            context: 0,
            request: 0,
            cluster: 0,
            view: 0,
            size: HEADER_SIZE as u32,
            reserved: 0,
            command: Command::Reserved as u16,
            replica: 0,
            operation: 0,
            padding: [0; 2],
            op: 0,
            commit: 0,
            padding_frame: [0; 8],
        }
    }
}

impl Header {
    /// Create a new header for the given cluster.
    pub fn new(cluster: u32) -> Self {
        Self {
            cluster,
            ..Default::default()
        }
    }

    /// Get the command type, if recognized.
    pub fn command(&self) -> Option<Command> {
        Command::try_from(self.command).ok()
    }

    /// Set the command type.
    pub fn set_command(&mut self, command: Command) {
        self.command = command as u16;
    }

    /// Copy a header out of the first 128 bytes of `bytes`.
    ///
    /// Returns `None` if `bytes` is shorter than a header.
    pub fn from_prefix(bytes: &[u8]) -> Option<Header> {
        Header::read_from_prefix(bytes).ok().map(|(header, _)| header)
    }

    /// The header as wire bytes.
    pub fn as_bytes(&self) -> &[u8] {
        zerocopy::IntoBytes::as_bytes(self)
    }

    /// Calculate the header checksum (covers bytes 16..128).
    pub fn calculate_checksum(&self) -> u128 {
        checksum(&self.as_bytes()[16..])
    }

    /// Set the header checksum.
    ///
    /// Must run last: it covers every other header field, `checksum_body`
    /// included.
    pub fn set_checksum(&mut self) {
        self.checksum = self.calculate_checksum();
    }

    /// Set the body checksum.
    pub fn set_checksum_body(&mut self, body: &[u8]) {
        self.checksum_body = checksum(body);
    }

    /// Verify the header checksum.
    pub fn valid_checksum(&self) -> bool {
        self.checksum == self.calculate_checksum()
    }

    /// Verify the body checksum against `body`.
    pub fn valid_checksum_body(&self, body: &[u8]) -> bool {
        self.checksum_body == checksum(body)
    }

    /// Validate the structural fields common to all commands.
    pub fn validate(&self) -> Result<(), ProtocolViolation> {
        if self.reserved != 0 || self.padding != [0; 2] || self.padding_frame != [0; 8] {
            return Err(ProtocolViolation::NonZeroReserved);
        }
        if (self.size as usize) < HEADER_SIZE {
            return Err(ProtocolViolation::Truncated);
        }
        if self.command != Command::Reply as u16 && (self.op != 0 || self.commit != 0) {
            return Err(ProtocolViolation::NonZeroReserved);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_size() {
        assert_eq!(std::mem::size_of::<Header>(), 128);
    }

    #[test]
    fn test_field_offsets() {
        let header = Header::default();
        let base = &header as *const Header as usize;
        assert_eq!(&header.checksum as *const _ as usize - base, 0);
        assert_eq!(&header.checksum_body as *const _ as usize - base, 16);
        assert_eq!(&header.parent as *const _ as usize - base, 32);
        assert_eq!(&header.client as *const _ as usize - base, 48);
        assert_eq!(&header.context as *const _ as usize - base, 64);
        assert_eq!(&header.request as *const _ as usize - base, 80);
        assert_eq!(&header.cluster as *const _ as usize - base, 84);
        assert_eq!(&header.view as *const _ as usize - base, 88);
        assert_eq!(&header.size as *const _ as usize - base, 92);
        assert_eq!(&header.reserved as *const _ as usize - base, 96);
        assert_eq!(&header.command as *const _ as usize - base, 98);
        assert_eq!(&header.replica as *const _ as usize - base, 100);
        assert_eq!(&header.operation as *const _ as usize - base, 101);
        assert_eq!(&header.op as *const _ as usize - base, 104);
        assert_eq!(&header.commit as *const _ as usize - base, 112);
    }

    #[test]
    fn test_header_default() {
        let header = Header::default();
        assert_eq!(header.size, 128);
        assert_eq!(header.command, Command::Reserved as u16);
        assert!(header.validate().is_ok());
    }

    #[test]
    fn test_header_checksum() {
        let mut header = Header::new(7);
        header.set_checksum_body(&[]);
        header.set_checksum();

        assert!(header.valid_checksum());
        assert!(header.valid_checksum_body(&[]));
    }

    #[test]
    fn test_header_checksum_detects_corruption() {
        let mut header = Header::new(7);
        header.set_checksum_body(&[]);
        header.set_checksum();

        header.cluster = 8;
        assert!(!header.valid_checksum());
    }

    #[test]
    fn test_checksum_covers_body_checksum() {
        let mut header = Header::new(7);
        header.set_checksum_body(b"credit");
        header.set_checksum();

        header.set_checksum_body(b"debit");
        assert!(!header.valid_checksum());
    }

    #[test]
    fn test_header_bytes_roundtrip() {
        let mut header = Header::new(0xDEAD_BEEF);
        header.set_command(Command::Request);
        header.client = 42;
        header.request = 3;
        header.size = 512;
        header.set_checksum_body(&[1, 2, 3]);
        header.set_checksum();

        let restored = Header::from_prefix(header.as_bytes()).unwrap();
        assert_eq!(restored, header);
        assert!(restored.valid_checksum());
    }

    #[test]
    fn test_from_prefix_too_short() {
        assert!(Header::from_prefix(&[0u8; 127]).is_none());
    }

    #[test]
    fn test_validate_rejects_nonzero_reserved() {
        let mut header = Header::default();
        header.reserved = 1;
        assert_eq!(header.validate(), Err(ProtocolViolation::NonZeroReserved));

        let mut header = Header::default();
        header.commit = 9;
        assert_eq!(header.validate(), Err(ProtocolViolation::NonZeroReserved));

        let mut header = Header::default();
        header.set_command(Command::Reply);
        header.op = 9;
        header.commit = 9;
        assert!(header.validate().is_ok());
    }
}
