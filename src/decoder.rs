use std::io::{self, Read};

use thiserror::Error;
use tracing::trace;

use crate::bitstream::BitReader;
use crate::encoder::{END_OF_BLOCK, FIRST_DELTA_BITS, FIRST_DELTA_SENTINEL};
use crate::point::Point;

/// Error type for decoding failures.
///
/// A clean end of block is not an error; [`Decoder::decode_point`] signals
/// it by returning `Ok(None)`.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The bit source ran out of data in the middle of a field, before the
    /// end-of-block marker.
    #[error("bit stream ended before the end-of-block marker")]
    UnexpectedEnd,
    /// A value record announced a window wider than 64 bits. The stream is
    /// corrupt; there are no resynchronization points, so decoding stops.
    #[error("malformed value window: {leading} leading zeros + {significant} significant bits")]
    InvalidWindow {
        /// Announced leading-zero count.
        leading: u8,
        /// Announced significant-bit count.
        significant: u8,
    },
    /// The underlying source failed with something other than end-of-data.
    #[error("failed to read from bit source")]
    Io(#[source] io::Error),
}

impl From<io::Error> for DecodeError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            DecodeError::UnexpectedEnd
        } else {
            DecodeError::Io(err)
        }
    }
}

/// Streaming decompressor, the bit-exact inverse of [`Encoder`].
///
/// Call [`decode_header`] once, then [`decode_point`] until it returns
/// `Ok(None)`, or iterate with [`points`]. The decoder mirrors the
/// encoder's state transitions exactly; a single corrupted field
/// invalidates every subsequent point, since all state is cumulative.
///
/// [`Encoder`]: crate::Encoder
/// [`decode_header`]: Decoder::decode_header
/// [`decode_point`]: Decoder::decode_point
/// [`points`]: Decoder::points
///
/// # Example
/// ```
/// use tsblock::{marshal, Decoder, Point};
///
/// let bytes = marshal(1609459200, &[Point::new(1609459260, 12.0)]).unwrap();
/// let mut dec = Decoder::new(bytes.as_slice());
/// let t0 = dec.decode_header().unwrap();
/// assert_eq!(t0, 1609459200);
/// while let Some(p) = dec.decode_point().unwrap() {
///     println!("{}: {}", p.timestamp, p.value);
/// }
/// ```
pub struct Decoder<R: Read> {
    reader: BitReader<R>,
    /// Block base timestamp from the header.
    header_timestamp: u32,
    header_read: bool,
    /// Timestamp of the most recent point; zero means no point decoded
    /// yet, mirroring the encoder's sentinel.
    stored_timestamp: u32,
    /// Delta between the two most recent timestamps.
    stored_delta: u32,
    stored_leading_zeros: u8,
    stored_trailing_zeros: u8,
    stored_value_bits: u64,
    /// Set once the end-of-block marker has been consumed.
    done: bool,
}

impl<R: Read> Decoder<R> {
    /// Creates a decoder reading from the given source.
    pub fn new(source: R) -> Self {
        Self {
            reader: BitReader::new(source),
            header_timestamp: 0,
            header_read: false,
            stored_timestamp: 0,
            stored_delta: 0,
            stored_leading_zeros: 0,
            stored_trailing_zeros: 0,
            stored_value_bits: 0,
            done: false,
        }
    }

    /// Reads the block's 32-bit base timestamp. Must be called first.
    pub fn decode_header(&mut self) -> Result<u32, DecodeError> {
        assert!(!self.header_read, "header already read");
        let t0 = self.reader.read_bits(32)? as u32;
        self.header_timestamp = t0;
        self.header_read = true;
        trace!(t0, "read block header");
        Ok(t0)
    }

    /// Decodes the next point, or returns `Ok(None)` once the end-of-block
    /// marker is reached. Further calls after that keep returning
    /// `Ok(None)`.
    pub fn decode_point(&mut self) -> Result<Option<Point>, DecodeError> {
        assert!(self.header_read, "decode_header must precede decode_point");
        if self.done {
            return Ok(None);
        }
        if self.stored_timestamp == 0 {
            self.read_first()
        } else {
            self.read_subsequent()
        }
    }

    /// Returns an iterator over the remaining points of the block.
    pub fn points(&mut self) -> Points<'_, R> {
        Points { decoder: self }
    }

    fn read_first(&mut self) -> Result<Option<Point>, DecodeError> {
        let delta = self.reader.read_bits(FIRST_DELTA_BITS)?;
        if delta == FIRST_DELTA_SENTINEL {
            trace!("read empty-block marker");
            self.done = true;
            return Ok(None);
        }
        let value_bits = self.reader.read_bits(64)?;

        let delta = delta as u32;
        self.stored_delta = delta;
        self.stored_timestamp = self.header_timestamp.wrapping_add(delta);
        self.stored_value_bits = value_bits;
        trace!(delta, "read first point");
        Ok(Some(Point::new(
            self.stored_timestamp,
            f64::from_bits(value_bits),
        )))
    }

    fn read_subsequent(&mut self) -> Result<Option<Point>, DecodeError> {
        let dod = match self.read_delta_delta()? {
            Some(dod) => dod,
            None => {
                trace!("read end-of-block marker");
                self.done = true;
                return Ok(None);
            }
        };
        self.stored_delta = (i64::from(self.stored_delta) + dod) as u32;
        self.stored_timestamp = self.stored_timestamp.wrapping_add(self.stored_delta);

        let value_bits = self.read_value_xor()?;
        Ok(Some(Point::new(
            self.stored_timestamp,
            f64::from_bits(value_bits),
        )))
    }

    /// Reads a delta-of-delta prefix and payload. Returns `None` for the
    /// end-of-block escape.
    ///
    /// The prefixes `0`, `10`, `110`, `1110` and `1111` cover every bit
    /// string, so the only failure mode here is running out of input.
    fn read_delta_delta(&mut self) -> Result<Option<i64>, DecodeError> {
        let mut ones: u8 = 0;
        while ones < 4 && self.reader.read_bit()? {
            ones += 1;
        }
        let payload_bits = match ones {
            0 => return Ok(Some(0)),
            1 => 7,
            2 => 9,
            3 => 12,
            _ => 32,
        };
        let raw = self.reader.read_bits(payload_bits)?;
        if payload_bits == 32 && raw == END_OF_BLOCK {
            return Ok(None);
        }
        Ok(Some(unbias(raw, payload_bits)))
    }

    fn read_value_xor(&mut self) -> Result<u64, DecodeError> {
        if !self.reader.read_bit()? {
            // XOR was zero; value unchanged.
            return Ok(self.stored_value_bits);
        }
        if self.reader.read_bit()? {
            // New window announcement.
            let leading = self.reader.read_bits(5)? as u8;
            let mut significant = self.reader.read_bits(6)? as u8;
            if significant == 0 {
                // 64 cannot be represented in the 6-bit field.
                significant = 64;
            }
            if leading + significant > 64 {
                return Err(DecodeError::InvalidWindow {
                    leading,
                    significant,
                });
            }
            self.stored_leading_zeros = leading;
            self.stored_trailing_zeros = 64 - significant - leading;
            trace!(leading, significant, "read new value window");
        }

        let significant = 64 - self.stored_leading_zeros - self.stored_trailing_zeros;
        let xor = self.reader.read_bits(significant)? << self.stored_trailing_zeros;
        self.stored_value_bits ^= xor;
        Ok(self.stored_value_bits)
    }
}

/// Inverts the bias-by-`2^n` encoding of an n-bit signed field: payloads
/// with the sign bit set are shifted down by `2^n`.
fn unbias(raw: u64, n: u8) -> i64 {
    let raw = raw as i64;
    if raw > (1i64 << (n - 1)) - 1 {
        raw - (1i64 << n)
    } else {
        raw
    }
}

/// Iterator over the remaining points of a block, created by
/// [`Decoder::points`].
///
/// Yields `Ok(Point)` for each decoded point and stops at the end-of-block
/// marker. A decode failure is yielded once and terminates the iteration.
pub struct Points<'a, R: Read> {
    decoder: &'a mut Decoder<R>,
}

impl<R: Read> Iterator for Points<'_, R> {
    type Item = Result<Point, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.decoder.decode_point() {
            Ok(Some(p)) => Some(Ok(p)),
            Ok(None) => None,
            Err(err) => {
                self.decoder.done = true;
                Some(Err(err))
            }
        }
    }
}
