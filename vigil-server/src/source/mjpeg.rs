//! MJPEG stream splitting
//!
//! `ffmpeg -f image2pipe -vcodec mjpeg` writes complete JPEG images back to
//! back. Each image starts with the SOI marker `FF D8` and ends with the EOI
//! marker `FF D9`; inside entropy-coded data a literal `FF` is always stuffed
//! with `00`, so the first EOI after an SOI terminates the image.

use tracing::warn;

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Default upper bound for a single frame (32 MiB)
pub const DEFAULT_MAX_FRAME_LEN: usize = 32 * 1024 * 1024;

/// Incremental JPEG frame extractor
#[derive(Debug)]
pub struct MjpegSplitter {
    buffer: Vec<u8>,
    /// Offset up to which the buffer is known to hold no EOI
    scanned: usize,
    max_frame_len: usize,
}

impl MjpegSplitter {
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            buffer: Vec::new(),
            scanned: 0,
            max_frame_len,
        }
    }

    /// Append raw bytes read from the stream
    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Bytes buffered but not yet returned as a frame
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drop all buffered bytes
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.scanned = 0;
    }

    /// Extract the next complete JPEG image, if one is buffered
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        // Align the buffer on the next SOI, discarding junk before it
        match find(&self.buffer, &SOI, 0) {
            Some(0) => {}
            Some(start) => {
                self.buffer.drain(..start);
                self.scanned = 0;
            }
            None => {
                // Keep a trailing FF, it may be the first half of an SOI
                let keep = usize::from(self.buffer.last() == Some(&0xFF));
                let discard = self.buffer.len() - keep;
                self.buffer.drain(..discard);
                self.scanned = 0;
                return None;
            }
        }

        let from = self.scanned.max(SOI.len());
        match find(&self.buffer, &EOI, from) {
            Some(end) => {
                let frame: Vec<u8> = self.buffer.drain(..end + EOI.len()).collect();
                self.scanned = 0;
                Some(frame)
            }
            None => {
                if self.buffer.len() > self.max_frame_len {
                    warn!(
                        "MJPEG frame exceeds {} bytes without end marker, discarding",
                        self.max_frame_len
                    );
                    self.reset();
                } else {
                    // Re-check the last byte next time: it may pair with the next push
                    self.scanned = self.buffer.len().saturating_sub(1).max(SOI.len());
                }
                None
            }
        }
    }
}

impl Default for MjpegSplitter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

fn find(haystack: &[u8], needle: &[u8; 2], from: usize) -> Option<usize> {
    if haystack.len() < from + needle.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| pos + from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jpeg(body: &[u8]) -> Vec<u8> {
        let mut bytes = SOI.to_vec();
        bytes.extend_from_slice(body);
        bytes.extend_from_slice(&EOI);
        bytes
    }

    #[test]
    fn test_single_frame() {
        let mut splitter = MjpegSplitter::default();
        let frame = jpeg(&[1, 2, 3]);
        splitter.push(&frame);

        assert_eq!(splitter.next_frame(), Some(frame));
        assert_eq!(splitter.next_frame(), None);
        assert_eq!(splitter.buffered(), 0);
    }

    #[test]
    fn test_back_to_back_frames() {
        let mut splitter = MjpegSplitter::default();
        let a = jpeg(&[0xFF, 0x00, 7]);
        let b = jpeg(&[8, 9]);
        let mut stream = a.clone();
        stream.extend_from_slice(&b);
        splitter.push(&stream);

        assert_eq!(splitter.next_frame(), Some(a));
        assert_eq!(splitter.next_frame(), Some(b));
        assert_eq!(splitter.next_frame(), None);
    }

    #[test]
    fn test_frame_split_across_pushes_including_marker() {
        let mut splitter = MjpegSplitter::default();
        let frame = jpeg(&[5, 6, 7, 8]);

        // Split right between FF and D9 of the end marker
        let cut = frame.len() - 1;
        splitter.push(&frame[..cut]);
        assert_eq!(splitter.next_frame(), None);
        splitter.push(&frame[cut..]);
        assert_eq!(splitter.next_frame(), Some(frame));
    }

    #[test]
    fn test_start_marker_split_across_pushes() {
        let mut splitter = MjpegSplitter::default();
        let frame = jpeg(&[1]);

        splitter.push(&[0x00, 0x01, frame[0]]);
        assert_eq!(splitter.next_frame(), None);
        splitter.push(&frame[1..]);
        assert_eq!(splitter.next_frame(), Some(frame));
    }

    #[test]
    fn test_leading_garbage_discarded() {
        let mut splitter = MjpegSplitter::default();
        let frame = jpeg(&[4, 4]);
        let mut stream = vec![0x11, 0x22, 0x33];
        stream.extend_from_slice(&frame);
        splitter.push(&stream);

        assert_eq!(splitter.next_frame(), Some(frame));
    }

    #[test]
    fn test_oversized_frame_discarded() {
        let mut splitter = MjpegSplitter::new(16);
        let mut stream = SOI.to_vec();
        stream.extend_from_slice(&[0u8; 32]);
        splitter.push(&stream);

        assert_eq!(splitter.next_frame(), None);
        assert_eq!(splitter.buffered(), 0);

        // Recovers on the next well-formed frame
        let frame = jpeg(&[1, 2]);
        splitter.push(&frame);
        assert_eq!(splitter.next_frame(), Some(frame));
    }
}
