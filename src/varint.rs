//! Base-128 variable-byte encoding of `u32`.
//!
//! Seven payload bits per byte, least-significant group first, with the
//! continuation bit (`0x80`) set on every byte except the last. Values
//! `0..=127` take one byte, `u32::MAX` takes five. The format is the
//! standard unsigned LEB128 layout, so encoded bytes can be persisted or
//! exchanged as-is.

/// Continuation bit.
const MORE: u8 = 0x80;

/// Payload mask.
const PAYLOAD: u8 = 0x7F;

/// Longest encoding of a `u32`.
pub const MAX_ENCODED_LEN: usize = 5;

/// Number of bytes [`encode`] produces for `value`.
#[must_use]
pub const fn encoded_len(value: u32) -> usize {
    match value {
        0..=0x7F => 1,
        0x80..=0x3FFF => 2,
        0x4000..=0x001F_FFFF => 3,
        0x0020_0000..=0x0FFF_FFFF => 4,
        _ => 5,
    }
}

/// Encodes `value` into a fixed buffer, returning the buffer and the number
/// of leading bytes in use.
#[must_use]
pub const fn encode(value: u32) -> ([u8; MAX_ENCODED_LEN], usize) {
    let mut buf = [0u8; MAX_ENCODED_LEN];
    let mut rest = value;
    let mut len = 0;
    while rest > PAYLOAD as u32 {
        buf[len] = (rest as u8 & PAYLOAD) | MORE;
        rest >>= 7;
        len += 1;
    }
    buf[len] = rest as u8;
    (buf, len + 1)
}

/// Encodes `value` into the front of `out`.
///
/// Returns the number of bytes written, or `None` if `out` is shorter than
/// [`encoded_len`]`(value)`.
pub fn encode_into(value: u32, out: &mut [u8]) -> Option<usize> {
    let (buf, len) = encode(value);
    out.get_mut(..len)?.copy_from_slice(&buf[..len]);
    Some(len)
}

/// Decodes one value from the front of `bytes`.
///
/// Returns the value and the number of bytes consumed, or `None` if the
/// input ends before a terminating byte or runs past [`MAX_ENCODED_LEN`].
/// Bits beyond the 32nd in a fifth byte are discarded.
pub fn decode(bytes: impl IntoIterator<Item = u8>) -> Option<(u32, usize)> {
    let mut value = 0u32;
    for (i, byte) in bytes.into_iter().take(MAX_ENCODED_LEN).enumerate() {
        value |= u32::from(byte & PAYLOAD) << (7 * i);
        if byte & MORE == 0 {
            return Some((value, i + 1));
        }
    }
    None
}
