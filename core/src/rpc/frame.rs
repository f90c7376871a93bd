//! Newline-delimited JSON framing

use std::io::Write;

use serde::Serialize;
use serde_json::Value;

use super::errors::{ConnectionError, FrameError};

pub const FRAME_DELIMITER: u8 = b'\n';

/// Default upper bound of a single frame, excluding the delimiter
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Incremental decoder turning a byte stream into JSON documents.
///
/// Bytes are fed as they arrive; complete documents are pulled out with
/// [`FrameDecoder::next_frame`]. Partial trailing data stays buffered.
pub struct FrameDecoder {
    buf: Vec<u8>,
    /// Bytes of `buf` already known not to contain a delimiter
    scanned: usize,
    max_frame: usize,
}

impl FrameDecoder {
    pub fn new(max_frame: usize) -> Self {
        Self {
            buf: Vec::new(),
            scanned: 0,
            max_frame,
        }
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Number of buffered bytes not yet consumed as a frame
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Returns the next complete document, or `None` if more input is needed.
    pub fn next_frame(&mut self) -> Result<Option<Value>, FrameError> {
        loop {
            let Some(offset) = self.buf[self.scanned..]
                .iter()
                .position(|&b| b == FRAME_DELIMITER)
            else {
                self.scanned = self.buf.len();
                // A trailing '\r' may still turn out to be part of the delimiter
                let len = match self.buf.last() {
                    Some(b'\r') => self.buf.len() - 1,
                    _ => self.buf.len(),
                };
                if len > self.max_frame {
                    return Err(FrameError::Oversize {
                        len,
                        max: self.max_frame,
                    });
                }
                return Ok(None);
            };

            let end = self.scanned + offset;
            let raw: Vec<u8> = self.buf.drain(..=end).collect();
            self.scanned = 0;

            let mut line = &raw[..end];
            if let [rest @ .., b'\r'] = line {
                line = rest;
            }
            if line.len() > self.max_frame {
                return Err(FrameError::Oversize {
                    len: line.len(),
                    max: self.max_frame,
                });
            }
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            return Ok(Some(serde_json::from_slice(line)?));
        }
    }
}

/// Serializes a message into a single delimited frame
pub fn encode_frame<T: Serialize>(msg: &T) -> Result<Vec<u8>, serde_json::Error> {
    let mut out = serde_json::to_vec(msg)?;
    out.push(FRAME_DELIMITER);
    Ok(out)
}

/// Encodes and writes a message as one frame in a single write
pub fn write_frame<W: Write, T: Serialize>(writer: &mut W, msg: &T) -> Result<(), ConnectionError> {
    let frame = encode_frame(msg)?;
    writer.write_all(&frame)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::types::{Request, Response};
    use serde_json::json;

    fn decode_all(dec: &mut FrameDecoder) -> Vec<Value> {
        let mut out = vec![];
        while let Some(v) = dec.next_frame().unwrap() {
            out.push(v);
        }
        out
    }

    #[test]
    fn single_frame() {
        let mut dec = FrameDecoder::new(DEFAULT_MAX_FRAME_BYTES);
        dec.feed(b"{\"a\":1}\n");
        assert_eq!(decode_all(&mut dec), vec![json!({"a": 1})]);
        assert_eq!(dec.buffered(), 0);
    }

    #[test]
    fn partial_frame_is_held() {
        let mut dec = FrameDecoder::new(DEFAULT_MAX_FRAME_BYTES);
        dec.feed(b"{\"a\":");
        assert!(dec.next_frame().unwrap().is_none());
        dec.feed(b"1}");
        assert!(dec.next_frame().unwrap().is_none());
        dec.feed(b"\n{\"b\"");
        assert_eq!(dec.next_frame().unwrap(), Some(json!({"a": 1})));
        assert!(dec.next_frame().unwrap().is_none());
        assert_eq!(dec.buffered(), 4);
    }

    #[test]
    fn crlf_and_blank_lines() {
        let mut dec = FrameDecoder::new(DEFAULT_MAX_FRAME_BYTES);
        dec.feed(b"\n\r\n  \n{\"a\":1}\r\n\n{\"b\":2}\n");
        assert_eq!(decode_all(&mut dec), vec![json!({"a": 1}), json!({"b": 2})]);
    }

    /// Decodes `stream` whole, split in two at every offset and byte by byte,
    /// and checks every way yields the same documents
    fn assert_split_invariant(stream: &[u8], max_frame: usize) -> Vec<Value> {
        let mut whole = FrameDecoder::new(max_frame);
        whole.feed(stream);
        let expected = decode_all(&mut whole);

        for split in 0..=stream.len() {
            let mut dec = FrameDecoder::new(max_frame);
            let mut got = vec![];
            dec.feed(&stream[..split]);
            got.extend(decode_all(&mut dec));
            dec.feed(&stream[split..]);
            got.extend(decode_all(&mut dec));
            assert_eq!(got, expected, "split at {}", split);
        }

        let mut dec = FrameDecoder::new(max_frame);
        let mut got = vec![];
        for b in stream {
            dec.feed(std::slice::from_ref(b));
            got.extend(decode_all(&mut dec));
        }
        assert_eq!(got, expected);
        expected
    }

    #[test]
    fn split_at_every_offset() {
        let stream = concat!(
            "{\"id\":\"1\",\"command\":\"ping\"}\n",
            "{\"id\":\"2\",\"command\":\"spawn_actor\",\"args\":{\"class\":\"Cube\"}}\r\n",
            "\n",
            "{\"id\":\"3\",\"command\":\"get_scene_info\",\"args\":{}}\n",
        )
        .as_bytes();
        assert_eq!(assert_split_invariant(stream, DEFAULT_MAX_FRAME_BYTES).len(), 3);

        // Frames exactly at the limit, CRLF and LF terminated
        assert_eq!(
            assert_split_invariant(b"[1,2,3]\r\n[4,5,6]\n", 7),
            vec![json!([1, 2, 3]), json!([4, 5, 6])]
        );
    }

    #[test]
    fn crlf_split_at_limit() {
        let mut dec = FrameDecoder::new(7);
        dec.feed(b"[1,2,3]\r");
        assert!(dec.next_frame().unwrap().is_none());
        dec.feed(b"\n");
        assert_eq!(dec.next_frame().unwrap(), Some(json!([1, 2, 3])));

        // One more byte before the '\r' is over the limit
        let mut dec = FrameDecoder::new(7);
        dec.feed(b"[1,2,30]\r");
        assert!(matches!(
            dec.next_frame(),
            Err(FrameError::Oversize { len: 8, max: 7 })
        ));
    }

    #[test]
    fn malformed_json() {
        let mut dec = FrameDecoder::new(DEFAULT_MAX_FRAME_BYTES);
        dec.feed(b"{not json}\n");
        assert!(matches!(dec.next_frame(), Err(FrameError::Malformed(_))));
    }

    #[test]
    fn oversize_unterminated() {
        let mut dec = FrameDecoder::new(16);
        dec.feed(&[b'x'; 17]);
        assert!(matches!(
            dec.next_frame(),
            Err(FrameError::Oversize { len: 17, max: 16 })
        ));
    }

    #[test]
    fn oversize_terminated() {
        let mut dec = FrameDecoder::new(8);
        dec.feed(b"[1,2,3,4,5]\n");
        assert!(matches!(dec.next_frame(), Err(FrameError::Oversize { .. })));
    }

    #[test]
    fn limit_is_inclusive() {
        let mut dec = FrameDecoder::new(7);
        dec.feed(b"[1,2,3]\r\n");
        assert_eq!(dec.next_frame().unwrap(), Some(json!([1, 2, 3])));
    }

    #[test]
    fn encoded_frames_decode() {
        let req = Request::new("7", "set_transform", json!({"actor_id": "Cube_1", "x": 2.5}));
        let resp = Response::error(Some("7".to_string()), "line\nbreak");

        let mut dec = FrameDecoder::new(DEFAULT_MAX_FRAME_BYTES);
        let req_frame = encode_frame(&req).unwrap();
        let resp_frame = encode_frame(&resp).unwrap();
        assert_eq!(req_frame.iter().filter(|&&b| b == b'\n').count(), 1);
        dec.feed(&req_frame);
        dec.feed(&resp_frame);

        let v = dec.next_frame().unwrap().unwrap();
        assert_eq!(Request::from_frame(v).unwrap(), req);
        let v = dec.next_frame().unwrap().unwrap();
        assert_eq!(serde_json::from_value::<Response>(v).unwrap(), resp);
    }

    #[test]
    fn write_frame_single_line() {
        let mut out = Vec::new();
        write_frame(&mut out, &Response::ok("1", json!({}))).unwrap();
        assert_eq!(out, b"{\"id\":\"1\",\"status\":\"ok\",\"result\":{}}\n");
    }
}
