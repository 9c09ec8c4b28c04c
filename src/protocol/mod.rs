//! Wire protocol for the replica group.
//!
//! This module contains the header layout, checksums, and the command and
//! operation spaces used on the wire.

pub mod checksum;
pub mod header;
pub mod operation;

pub use checksum::checksum;
pub use header::{Header, HEADER_SIZE};
pub use operation::{Command, Operation, VSR_OPERATIONS_RESERVED};
