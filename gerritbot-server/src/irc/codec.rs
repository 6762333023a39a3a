//! Line codec for the IRC connection.
//!
//! Channels carry whatever bytes their users send, so inbound lines are
//! decoded lossily: invalid UTF-8 becomes U+FFFD instead of an error.

use bytes::{BufMut, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

pub struct IrcLineCodec {
    /// Index of next byte to check for newline
    next_index: usize,
    max_len: usize,
}

impl IrcLineCodec {
    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            next_index: 0,
            max_len,
        }
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

fn too_long(actual: usize, limit: usize) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("line of {actual} bytes exceeds limit of {limit}"),
    )
}

impl Decoder for IrcLineCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> io::Result<Option<String>> {
        if let Some(offset) = src[self.next_index..].iter().position(|b| *b == b'\n') {
            let line = src.split_to(self.next_index + offset + 1);
            self.next_index = 0;

            if line.len() > self.max_len {
                return Err(too_long(line.len(), self.max_len));
            }
            Ok(Some(decode_line(&line)))
        } else {
            self.next_index = src.len();

            if src.len() > self.max_len {
                return Err(too_long(src.len(), self.max_len));
            }
            Ok(None)
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> io::Result<Option<String>> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        // unterminated last line
        if src.is_empty() {
            return Ok(None);
        }
        let line = src.split();
        self.next_index = 0;
        Ok(Some(decode_line(&line)))
    }
}

impl<T: AsRef<str>> Encoder<T> for IrcLineCodec {
    type Error = io::Error;

    fn encode(&mut self, line: T, dst: &mut BytesMut) -> io::Result<()> {
        let line = line.as_ref();
        dst.reserve(line.len() + 2);
        dst.put_slice(line.as_bytes());
        dst.put_slice(b"\r\n");
        Ok(())
    }
}
