use std::io;

use tokio_util::bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::Decoder;

use crate::headers::{ContentLength, SipHeaderParse};
use crate::transport::MAX_DATAGRAM_SIZE;

/// Frames SIP messages on stream transports by Content-Length.
///
/// A message without Content-Length, or one that would exceed the size
/// cap, is an error; the owning read loop resets the connection.
#[derive(Default)]
pub(crate) struct StreamDecoder;

const HEADER_END: &[u8] = b"\n\r\n";

impl Decoder for StreamDecoder {
    type Item = Bytes;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, io::Error> {
        // Swallow CRLF keep-alives between messages.
        while src.starts_with(b"\r\n") && !src.starts_with(b"\r\n\r\n") {
            src.advance(2);
        }
        if src.starts_with(b"\r\n\r\n") {
            let frame = src.split_to(4).freeze();
            return Ok(Some(frame));
        }

        let Some(pos) = find_subslice(src, HEADER_END) else {
            if src.len() > MAX_DATAGRAM_SIZE {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "header section exceeds the message size cap",
                ));
            }
            return Ok(None);
        };
        let header_end = pos + 1;
        let body_start = pos + HEADER_END.len();

        let Some(content_length) = scan_content_length(&src[..header_end]) else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "stream message without Content-Length",
            ));
        };

        let frame_len = body_start + content_length;
        if frame_len > MAX_DATAGRAM_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "declared body exceeds the message size cap",
            ));
        }
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        Ok(Some(src.split_to(frame_len).freeze()))
    }
}

fn scan_content_length(headers: &[u8]) -> Option<usize> {
    for line in headers.split(|&b| b == b'\n') {
        let mut parts = line.splitn(2, |&b| b == b':');
        let name = parts.next()?;
        let name = std::str::from_utf8(name).ok()?.trim();
        if ContentLength::matches_name(name) {
            let value = parts.next()?;
            let value = std::str::from_utf8(value).ok()?;
            return value.trim().parse().ok();
        }
    }
    None
}

fn find_subslice(src: &[u8], pat: &[u8]) -> Option<usize> {
    src.windows(pat.len()).position(|window| window == pat)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MSG: &[u8] = b"OPTIONS sip:b@example.com SIP/2.0\r\n\
        Via: SIP/2.0/TCP a.example.com;branch=z9hG4bK77\r\n\
        Content-Length: 4\r\n\r\nbody";

    #[test]
    fn test_whole_message_in_one_read() {
        let mut decoder = StreamDecoder;
        let mut buf = BytesMut::from(MSG);

        let frame = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.as_ref(), MSG);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_body_waits() {
        let mut decoder = StreamDecoder;
        let mut buf = BytesMut::from(&MSG[..MSG.len() - 2]);

        assert!(decoder.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&MSG[MSG.len() - 2..]);
        assert!(decoder.decode(&mut buf).unwrap().is_some());
    }

    #[test]
    fn test_missing_content_length_is_error() {
        let mut decoder = StreamDecoder;
        let mut buf = BytesMut::from(&b"OPTIONS sip:b@c.com SIP/2.0\r\nMax-Forwards: 70\r\n\r\n"[..]);

        assert!(decoder.decode(&mut buf).is_err());
    }

    #[test]
    fn test_two_messages_split() {
        let mut decoder = StreamDecoder;
        let mut buf = BytesMut::new();
        buf.extend_from_slice(MSG);
        buf.extend_from_slice(MSG);

        assert!(decoder.decode(&mut buf).unwrap().is_some());
        assert!(decoder.decode(&mut buf).unwrap().is_some());
        assert!(decoder.decode(&mut buf).unwrap().is_none());
    }
}
