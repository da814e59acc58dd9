//! No-std decimal formatting for outgoing message values.
//!
//! Writes directly into byte buffers without heap allocation or
//! `core::fmt` machinery.

/// Longest decimal rendering of an `i32` ("-2147483648").
pub const MAX_I32_DIGITS: usize = 11;

/// Write an i32 as a signed decimal string.
///
/// Returns the number of bytes written (1-11 bytes).
///
/// # Panics
///
/// Panics if `buf.len() < MAX_I32_DIGITS`.
#[inline]
pub fn write_i32(buf: &mut [u8], value: i32) -> usize {
    debug_assert!(buf.len() >= MAX_I32_DIGITS, "buffer too small for i32");

    if value == 0 {
        buf[0] = b'0';
        return 1;
    }

    let mut pos = 0;
    if value < 0 {
        buf[0] = b'-';
        pos = 1;
    }
    // unsigned_abs covers i32::MIN without overflow
    let mut n = value.unsigned_abs();

    let mut temp = [0u8; 10];
    let mut len = 0;
    while n > 0 {
        temp[len] = b'0' + (n % 10) as u8;
        n /= 10;
        len += 1;
    }

    for i in (0..len).rev() {
        buf[pos] = temp[i];
        pos += 1;
    }

    pos
}
