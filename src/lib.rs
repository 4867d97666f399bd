//! # tsblock
//!
//! A bit-packed codec for blocks of time-series data, in the style of
//! Facebook's Gorilla in-memory time-series format as described in
//! *"Gorilla: A Fast, Scalable, In-Memory Time Series Database"*
//! (VLDB 2015).
//!
//! A block is a base timestamp `t0` plus an ordered sequence of
//! `(timestamp, value)` points. `t0` is the only absolute timestamp ever
//! stored; everything else is reconstructed by successive delta
//! application:
//!
//! - **Timestamps** use delta-of-delta encoding. Real series tend to
//!   arrive at a fixed interval, so the difference between consecutive
//!   deltas is usually zero and costs a single bit; deviations pay for a
//!   variable-length prefix plus a narrow signed field.
//! - **Values** (IEEE-754 doubles) are XORed against the previous value.
//!   Consecutive readings usually share sign, exponent and most of the
//!   mantissa, leaving an XOR with long leading and trailing zero runs;
//!   only the changed middle bits are stored, and the zero-run window is
//!   re-announced only when it grows.
//!
//! Timestamps have one-second resolution and the unsigned 32-bit range
//! (through 2106-02-07). The first point's delta against `t0` is a fixed
//! 14-bit field, bounding it to a bit under 4.6 hours.
//!
//! ## Wire format
//!
//! All fields are bit-packed MSB-first with no byte alignment; only the
//! end of the block is zero-padded to a byte boundary.
//!
//! ```text
//! header:      t0, 32 bits unsigned
//! first point: delta (14 bits, unsigned) + value (64 raw bits)
//!              or the reserved all-ones delta + 64 zero bits (empty block)
//! subsequent points, repeated:
//!   timestamp:   0                       delta-of-delta == 0
//!                10   + 7-bit signed     [-63, 64]
//!                110  + 9-bit signed     [-255, 256]
//!                1110 + 12-bit signed    [-2047, 2048]
//!                1111 + 32-bit signed    otherwise
//!   value:       0                       XOR == 0, value unchanged
//!                10 + significant bits   reuse previous zero-run window
//!                11 + 5-bit leading + 6-bit length (0 = 64)
//!                   + significant bits   announce a new window
//! end of block: 1111 + 0xFFFFFFFF + 0, then zero padding
//! ```
//!
//! Signed fields are biased by `2^n` rather than sign-extended: the n-bit
//! two's-complement pattern.
//!
//! ## Example
//!
//! ```rust
//! use tsblock::{marshal, unmarshal, Point};
//!
//! let t0 = 1427162400;
//! let points = vec![
//!     Point::new(t0 + 62, 12.0),
//!     Point::new(t0 + 122, 12.0),
//!     Point::new(t0 + 182, 24.0),
//! ];
//!
//! let bytes = marshal(t0, &points).unwrap();
//! assert_eq!(bytes.len(), 22); // 48 bytes of raw points, compressed
//!
//! let (decoded_t0, decoded) = unmarshal(&bytes).unwrap();
//! assert_eq!(decoded_t0, t0);
//! assert_eq!(decoded, points);
//! ```
//!
//! ## Streaming
//!
//! [`Encoder`] and [`Decoder`] work over any `std::io::Write`/`Read`, so a
//! block can be produced or consumed incrementally:
//!
//! ```rust
//! use tsblock::{Decoder, Encoder, Point};
//!
//! let mut encoder = Encoder::new(Vec::new());
//! encoder.encode_header(1609459200).unwrap();
//! encoder.encode_point(Point::new(1609459260, 12.0)).unwrap();
//! encoder.encode_point(Point::new(1609459320, 12.5)).unwrap();
//! encoder.finish().unwrap();
//! let bytes = encoder.into_inner();
//!
//! let mut decoder = Decoder::new(bytes.as_slice());
//! let t0 = decoder.decode_header().unwrap();
//! for point in decoder.points() {
//!     let point = point.unwrap();
//!     println!("{}: {}", point.timestamp, point.value);
//! }
//! # assert_eq!(t0, 1609459200);
//! ```
//!
//! ## Known format limitations
//!
//! Carried over from the reference format rather than "fixed", since they
//! are part of the wire contract:
//!
//! - A first delta of exactly 16383 collides with the empty-block
//!   sentinel and decodes as an empty block; larger first deltas truncate
//!   to their low 14 bits.
//! - A first point whose absolute timestamp is 0 is indistinguishable
//!   from "no points yet" in the codec state.
//! - Timestamps are expected to be increasing; the codec does not
//!   validate ordering.

pub mod bitstream;
pub mod decoder;
pub mod encoder;
pub mod point;

// Re-export the primary types at the crate root.
pub use decoder::{DecodeError, Decoder, Points};
pub use encoder::Encoder;
pub use point::{marshal, unmarshal, Point};
