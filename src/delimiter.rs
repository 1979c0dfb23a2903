//! Incremental JPEG frame extraction from a raw MJPEG byte stream.
//!
//! The wire format is nothing but concatenated JPEG images: no length
//! prefixes, no sequence numbers. Frame boundaries are recovered from the
//! images' own SOI (`FF D8`) and EOI (`FF D9`) markers, so frames may arrive
//! split across arbitrarily many socket reads and with stray bytes in
//! between.

use bytes::{Bytes, BytesMut};
use thiserror::Error;

/// JPEG start-of-image marker.
pub const SOI: [u8; 2] = [0xFF, 0xD8];

/// JPEG end-of-image marker.
pub const EOI: [u8; 2] = [0xFF, 0xD9];

#[derive(Error, Debug)]
pub enum DelimiterError {
    #[error("accumulation buffer exceeded {max} bytes without a complete frame")]
    Overflow { max: usize },
}

/// Reassembles complete JPEG frames from an arbitrarily fragmented stream.
///
/// Owns the accumulation buffer exclusively. [`push`](Self::push) appends a
/// chunk, [`next_frame`](Self::next_frame) extracts the next complete frame
/// if one exists, leaving any trailing partial frame buffered for the next
/// scan.
///
/// A source that sends a start marker and then never an end marker would
/// grow the buffer without bound, so the buffer is capped: if it exceeds
/// `max_buffer` while no complete frame can be extracted, it is cleared and
/// [`DelimiterError::Overflow`] is returned. The caller is expected to treat
/// that like a dropped connection.
#[derive(Debug)]
pub struct FrameDelimiter {
    buf: BytesMut,
    max_buffer: usize,
}

impl FrameDelimiter {
    pub fn new(max_buffer: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_buffer,
        }
    }

    /// Appends one received chunk to the accumulation buffer.
    ///
    /// Fails only when the buffer has outgrown its cap and no complete frame
    /// is pending, i.e. extraction cannot shrink it. The buffer is reset
    /// before returning so the delimiter stays usable.
    pub fn push(&mut self, chunk: &[u8]) -> Result<(), DelimiterError> {
        self.buf.extend_from_slice(chunk);

        if self.buf.len() > self.max_buffer && !self.has_complete_frame() {
            self.buf.clear();
            return Err(DelimiterError::Overflow {
                max: self.max_buffer,
            });
        }

        Ok(())
    }

    /// Extracts the next complete frame, or `None` if the buffer holds at
    /// most a partial frame.
    ///
    /// A frame is the byte range from an SOI marker through the next EOI
    /// marker after it, both inclusive. Anything before the SOI is stray
    /// inter-frame data and is discarded together with the consumed frame.
    /// Stray bytes with no SOI at all stay buffered; alignment is never
    /// assumed, the next scan searches fresh.
    pub fn next_frame(&mut self) -> Option<Bytes> {
        let start = find_marker(&self.buf, SOI)?;
        let end = find_marker(&self.buf[start + 2..], EOI)? + start + 2 + 2;

        let consumed = self.buf.split_to(end).freeze();
        Some(consumed.slice(start..))
    }

    /// Lazy iterator over all currently complete frames.
    pub fn frames(&mut self) -> Frames<'_> {
        Frames { delimiter: self }
    }

    /// Discards all buffered bytes. Called when a connection ends so no
    /// frame can straddle two distinct sessions.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Number of buffered, not-yet-consumed bytes.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    fn has_complete_frame(&self) -> bool {
        match find_marker(&self.buf, SOI) {
            Some(start) => find_marker(&self.buf[start + 2..], EOI).is_some(),
            None => false,
        }
    }
}

/// Iterator adapter over [`FrameDelimiter::next_frame`].
pub struct Frames<'a> {
    delimiter: &'a mut FrameDelimiter,
}

impl Iterator for Frames<'_> {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        self.delimiter.next_frame()
    }
}

fn find_marker(haystack: &[u8], marker: [u8; 2]) -> Option<usize> {
    haystack.windows(2).position(|w| w == marker)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: usize = 1024;

    fn wrap(payload: &[u8]) -> Vec<u8> {
        let mut frame = SOI.to_vec();
        frame.extend_from_slice(payload);
        frame.extend_from_slice(&EOI);
        frame
    }

    #[test]
    fn empty_buffer_yields_nothing() {
        let mut d = FrameDelimiter::new(MAX);
        assert!(d.next_frame().is_none());
        assert_eq!(d.pending(), 0);
    }

    #[test]
    fn single_complete_frame() {
        let mut d = FrameDelimiter::new(MAX);
        let frame = wrap(b"abc");
        d.push(&frame).unwrap();

        assert_eq!(d.next_frame().unwrap(), frame);
        assert!(d.next_frame().is_none());
        assert_eq!(d.pending(), 0);
    }

    #[test]
    fn two_chunk_split_mid_frame() {
        // [FF D8][A] then [FF D9][FF D8][B][FF D9]: first chunk yields no
        // frame and stays buffered, second completes both frames.
        let mut d = FrameDelimiter::new(MAX);

        d.push(&[0xFF, 0xD8, b'A']).unwrap();
        assert!(d.next_frame().is_none());
        assert_eq!(d.pending(), 3);

        d.push(&[0xFF, 0xD9, 0xFF, 0xD8, b'B', 0xFF, 0xD9]).unwrap();
        assert_eq!(
            d.next_frame().unwrap(),
            &[0xFF, 0xD8, b'A', 0xFF, 0xD9][..]
        );
        assert_eq!(
            d.next_frame().unwrap(),
            &[0xFF, 0xD8, b'B', 0xFF, 0xD9][..]
        );
        assert!(d.next_frame().is_none());
        assert_eq!(d.pending(), 0);
    }

    #[test]
    fn byte_at_a_time_feed() {
        let frame = wrap(&[1, 2, 3, 4, 5]);
        let mut d = FrameDelimiter::new(MAX);
        let mut out = Vec::new();

        for &b in &frame {
            d.push(&[b]).unwrap();
            out.extend(d.frames());
        }

        assert_eq!(out.len(), 1);
        assert_eq!(out[0], frame);
    }

    #[test]
    fn arbitrary_chunking_preserves_frames() {
        let frames: Vec<Vec<u8>> = (0u8..5).map(|i| wrap(&[i; 7])).collect();
        let stream: Vec<u8> = frames.concat();

        for chunk_size in [1, 2, 3, 5, 11, 64] {
            let mut d = FrameDelimiter::new(MAX);
            let mut out = Vec::new();
            for chunk in stream.chunks(chunk_size) {
                d.push(chunk).unwrap();
                out.extend(d.frames());
            }
            assert_eq!(out.len(), frames.len(), "chunk_size {chunk_size}");
            for (got, want) in out.iter().zip(&frames) {
                assert_eq!(got, want, "chunk_size {chunk_size}");
            }
        }
    }

    #[test]
    fn stray_bytes_are_tolerated() {
        let a = wrap(b"a");
        let b = wrap(b"b");

        let mut stream = vec![0x00, 0x13, 0x37];
        stream.extend_from_slice(&a);
        stream.extend_from_slice(&[0xD9, 0xFF, 0x00]);
        stream.extend_from_slice(&b);

        let mut d = FrameDelimiter::new(MAX);
        d.push(&stream).unwrap();
        let out: Vec<_> = d.frames().collect();

        assert_eq!(out, vec![Bytes::from(a), Bytes::from(b)]);
        assert_eq!(d.pending(), 0);
    }

    #[test]
    fn end_marker_search_starts_after_start_marker() {
        // A dangling EOI before the first SOI must not terminate the frame.
        let frame = wrap(b"x");
        let mut stream = vec![0xFF, 0xD9];
        stream.extend_from_slice(&frame);

        let mut d = FrameDelimiter::new(MAX);
        d.push(&stream).unwrap();
        assert_eq!(d.next_frame().unwrap(), frame);
    }

    #[test]
    fn partial_frame_survives_clear_boundary() {
        let mut d = FrameDelimiter::new(MAX);
        d.push(&[0xFF, 0xD8, 1, 2, 3]).unwrap();
        assert!(d.next_frame().is_none());

        d.clear();
        assert_eq!(d.pending(), 0);

        // After the reset a fresh frame parses normally.
        let frame = wrap(b"y");
        d.push(&frame).unwrap();
        assert_eq!(d.next_frame().unwrap(), frame);
    }

    #[test]
    fn overflow_without_complete_frame_resets_buffer() {
        let mut d = FrameDelimiter::new(16);
        d.push(&[0xFF, 0xD8]).unwrap();

        let err = d.push(&[0u8; 32]).unwrap_err();
        assert!(matches!(err, DelimiterError::Overflow { max: 16 }));
        assert_eq!(d.pending(), 0);
    }

    #[test]
    fn overflow_not_triggered_while_frames_are_extractable() {
        let mut d = FrameDelimiter::new(8);
        let mut stream = wrap(&[0u8; 16]);
        stream.extend_from_slice(&wrap(b"z"));

        // Over the cap, but a complete frame is pending, so extraction can
        // shrink the buffer.
        d.push(&stream).unwrap();
        assert_eq!(d.frames().count(), 2);
    }
}
