use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;

use crate::{Envelope, Error};

use super::Event;

/// Sent on idle streams so intermediaries don't time the connection out.
pub(crate) const KEEPALIVE: &[u8] = b": keepalive\n\n";

pub(crate) const CONTENT_TYPE: &str = "text/event-stream";

/// `id: <token>\n` (optional) followed by `data: {"result": ...}\n\n`.
pub(crate) fn encode_event(event: &Event) -> Result<Bytes, serde_json::Error> {
    encode(event.id(), &Envelope::Result(event.data()))
}

/// The terminal frame of a failed stream.
pub(crate) fn encode_error(err: &Error) -> Bytes {
    encode(None, &Envelope::<()>::Error(err.clone())).unwrap_or_else(|_| {
        Bytes::from_static(
            b"data: {\"error\":{\"code\":\"internal\",\"message\":\"internal error\"}}\n\n",
        )
    })
}

fn encode<T: Serialize>(id: Option<&str>, envelope: &Envelope<T>) -> Result<Bytes, serde_json::Error> {
    let data = serde_json::to_vec(envelope)?;

    let mut buf = BytesMut::with_capacity(data.len() + 16);
    if let Some(id) = id {
        buf.put_slice(b"id: ");
        // A line break would end the field early and let the token inject its own fields.
        for part in id.split(['\r', '\n']) {
            buf.put_slice(part.as_bytes());
        }
        buf.put_u8(b'\n');
    }
    buf.put_slice(b"data: ");
    buf.put_slice(&data);
    buf.put_slice(b"\n\n");
    Ok(buf.freeze())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn event_frame() {
        let frame = encode_event(&Event::new(json!({"n": 1}))).unwrap();
        assert_eq!(&frame[..], b"data: {\"result\":{\"n\":1}}\n\n");
    }

    #[test]
    fn event_frame_with_id() {
        let frame = encode_event(&Event::new(json!("hi")).with_id("7")).unwrap();
        assert_eq!(&frame[..], b"id: 7\ndata: {\"result\":\"hi\"}\n\n");
    }

    #[test]
    fn ids_cannot_break_the_frame() {
        let frame = encode_event(&Event::new(json!(1)).with_id("a\nb\r\nc")).unwrap();
        assert_eq!(&frame[..], b"id: abc\ndata: {\"result\":1}\n\n");
    }

    #[test]
    fn multiline_strings_stay_on_one_line() {
        let frame = encode_event(&Event::new(json!("a\nb"))).unwrap();
        assert_eq!(frame.iter().filter(|b| **b == b'\n').count(), 2);
    }

    #[test]
    fn error_frame() {
        let frame = encode_error(&Error::unavailable("try later"));
        assert_eq!(
            &frame[..],
            b"data: {\"error\":{\"code\":\"unavailable\",\"message\":\"try later\"}}\n\n"
        );
    }
}
