//! 16-bit checksum of raw value payloads.
//!
//! Used for change detection on topics whose values are not decoded. The
//! algorithm is CRC-16/CCITT-FALSE (polynomial `0x1021`, initial value
//! `0xFFFF`), which detects every single-byte change.

use crc::{CRC_16_IBM_3740, Crc};

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// Compute the checksum of a raw payload.
///
/// # Examples
///
/// ```
/// use mq_listener_core::checksum::checksum;
///
/// assert_eq!(checksum(b"123456789"), 0x29B1);
/// assert_ne!(checksum(b"on"), checksum(b"no"));
/// ```
#[must_use]
pub fn checksum(bytes: &[u8]) -> u16 {
    CRC16.checksum(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_reference_vector() {
        assert_eq!(checksum(b"123456789"), 0x29B1);
    }

    #[test]
    fn empty_payload_is_initial_value() {
        assert_eq!(checksum(b""), 0xFFFF);
    }

    #[test]
    fn identical_payloads_match() {
        assert_eq!(checksum(b"{\"a\":1}"), checksum(b"{\"a\":1}"));
    }

    #[test]
    fn single_byte_changes_are_detected() {
        let base = b"payload-0001".to_vec();
        for i in 0..base.len() {
            let mut changed = base.clone();
            changed[i] ^= 0x01;
            assert_ne!(checksum(&base), checksum(&changed), "byte {i}");
        }
    }
}
