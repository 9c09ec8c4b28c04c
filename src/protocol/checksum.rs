//! Message checksums using AEGIS-128L.
//!
//! Headers and bodies are checksummed with the AEGIS-128L AEAD using a zero
//! key and nonce. The data is passed as Associated Data with an empty
//! message, so the 16-byte authentication tag acts as a fast,
//! hardware-accelerated 128-bit digest on CPUs with AES instructions.

use aegis::aegis128l::Aegis128L;

/// Zero key used for checksumming.
const ZERO_KEY: [u8; 16] = [0u8; 16];

/// Zero nonce used for checksumming.
const ZERO_NONCE: [u8; 16] = [0u8; 16];

/// Compute the 128-bit checksum of `data`.
///
/// The same function covers header bytes and message bodies; the caller
/// decides which byte range it runs over.
pub fn checksum(data: &[u8]) -> u128 {
    let cipher = Aegis128L::<16>::new(&ZERO_KEY, &ZERO_NONCE);
    // MAC mode: the data to sign is AD, not a secret message.
    let (_, tag) = cipher.encrypt(&[], data);
    u128::from_le_bytes(tag)
}
