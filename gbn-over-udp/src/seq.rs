//! Modulo arithmetic over the 8-bit sequence space.
//!
//! Every window decision in the crate (send-window admission, ack validity,
//! receiver in-order checks) goes through [`in_window`], so boundary
//! inclusivity and wrap-around are handled in exactly one place.

/// Number of distinct sequence numbers (one wire byte).
pub const SEQ_SPACE: usize = 256;

/// Sequence number carried by the first DATA frame of a connection.
pub const FIRST_DATA_SEQ: u8 = 0;

/// The "nothing acknowledged yet" sentinel: the number just before
/// [`FIRST_DATA_SEQ`].
pub const NONE_ACKED: u8 = FIRST_DATA_SEQ.wrapping_sub(1);

/// `seq + n` modulo [`SEQ_SPACE`].
#[inline]
pub fn add(seq: u8, n: usize) -> u8 {
    seq.wrapping_add((n % SEQ_SPACE) as u8)
}

/// Forward distance from `from` to `to`, in `0..SEQ_SPACE`.
#[inline]
pub fn distance(from: u8, to: u8) -> usize {
    usize::from(to.wrapping_sub(from))
}

/// `true` when `seq` lies in the half-open window `(base, base + width]`.
///
/// The comparison is unambiguous as long as `width` stays below
/// `SEQ_SPACE / 2`, which configuration validation guarantees.
#[inline]
pub fn in_window(base: u8, seq: u8, width: usize) -> bool {
    let d = distance(base, seq);
    d >= 1 && d <= width
}
