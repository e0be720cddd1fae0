use std::collections::HashMap;

use bytes::{BufMut, Bytes, BytesMut};
use serde_json::{json, Map};
use tracing::{debug, trace};

use crate::codec::{decode_envelope, Envelope, FramingMode, MSG_HEAD};
use crate::error::{FrameError, Result};
use crate::metadata::{find, Metadata};

const CHUNK_KEY: &str = "chunk";
const CONTINUATION_PREFIX: &[u8] = b"{\"chunk\":";

/// Split a serialized message into frames of at most `max` bytes.
///
/// The first frame holds the full metadata header and separator, so a
/// receiver learns the total size from it alone. Every later frame carries
/// a short header naming the message `id` and its chunk index, which lets
/// frames of different messages interleave on a shared queue. Messages
/// that already fit are returned as a single frame.
pub fn split_frames(msg: &Bytes, max: usize) -> Result<Vec<Bytes>> {
    if max == 0 {
        return Err(FrameError::InvalidFrameSize);
    }
    if msg.len() <= max {
        return Ok(vec![msg.clone()]);
    }

    let separator = find(msg, MSG_HEAD).ok_or(FrameError::MissingSeparator)?;
    let header_end = separator + MSG_HEAD.len();
    if header_end > max {
        return Err(FrameError::HeaderTooLarge {
            size: header_end,
            max,
        });
    }
    let metadata = Metadata::from_header_bytes(&msg[..separator])?;
    let id = metadata.id();

    let mut frames = vec![msg.slice(..max)];
    let mut offset = max;
    while offset < msg.len() {
        let header = continuation_header(id, frames.len())?;
        if header.len() >= max {
            return Err(FrameError::HeaderTooLarge {
                size: header.len(),
                max,
            });
        }
        let take = (max - header.len()).min(msg.len() - offset);
        let mut frame = BytesMut::with_capacity(header.len() + take);
        frame.put_slice(&header);
        frame.put_slice(&msg[offset..offset + take]);
        frames.push(frame.freeze());
        offset += take;
    }
    trace!(total = msg.len(), frames = frames.len(), "split message");
    Ok(frames)
}

/// Header and separator prefixed to continuation frame `index`.
fn continuation_header(id: Option<&str>, index: usize) -> Result<Vec<u8>> {
    let mut map = Map::new();
    map.insert(CHUNK_KEY.to_string(), json!(index));
    if let Some(id) = id {
        map.insert("id".to_string(), json!(id));
    }
    let mut header = Metadata::from_map(map).to_header_bytes()?;
    header.extend_from_slice(MSG_HEAD);
    Ok(header)
}

struct Continuation {
    id: Option<String>,
    data: Bytes,
}

/// Recognize a continuation frame. Its header holds only `chunk` and `id`.
fn continuation(frame: &Bytes) -> Result<Option<Continuation>> {
    if !frame.starts_with(CONTINUATION_PREFIX) {
        return Ok(None);
    }
    let Some(pos) = find(frame, MSG_HEAD) else {
        return Ok(None);
    };
    let metadata = Metadata::from_header_bytes(&frame[..pos])?;
    if metadata.size().is_some() {
        return Ok(None);
    }
    Ok(Some(Continuation {
        id: metadata.id().map(str::to_string),
        data: frame.slice(pos + MSG_HEAD.len()..),
    }))
}

/// Outcome of feeding one frame to a [`Reassembler`].
#[derive(Debug, Clone, PartialEq)]
pub enum Assembled {
    /// More frames are needed.
    Partial { received: usize, expected: usize },
    /// The message is whole.
    Complete(Envelope),
}

impl Assembled {
    /// True while the message is still missing data.
    pub fn is_incomplete(&self) -> bool {
        matches!(self, Assembled::Partial { .. })
    }
}

#[derive(Debug)]
struct Pending {
    metadata: Metadata,
    data: BytesMut,
    frames: usize,
}

/// Accumulates continuation frames until each message's declared size is
/// reached.
///
/// Partially received messages are keyed by their `id`, so several
/// senders may interleave chunked messages on one queue.
#[derive(Debug, Default)]
pub struct Reassembler {
    pending: HashMap<Option<String>, Pending>,
}

impl Reassembler {
    /// Create an idle reassembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// True when some message has started but not finished.
    pub fn is_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Messages started but not finished.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Frames consumed so far across in-flight messages.
    pub fn frames(&self) -> usize {
        self.pending.values().map(|p| p.frames).sum()
    }

    /// Drop every partially received message.
    pub fn reset(&mut self) {
        self.pending.clear();
    }

    /// Feed one frame.
    pub fn push(&mut self, frame: Bytes, mode: FramingMode) -> Result<Assembled> {
        if let Some(chunk) = continuation(&frame)? {
            return self.extend(chunk);
        }

        let envelope = decode_envelope(&frame, mode)?;
        if !envelope.is_incomplete() {
            return Ok(Assembled::Complete(envelope));
        }
        let expected = envelope.metadata.size().unwrap_or_default();
        let received = envelope.data.len();
        let key = envelope.metadata.id().map(str::to_string);
        let pending = Pending {
            metadata: envelope.metadata,
            data: BytesMut::from(envelope.data.as_ref()),
            frames: 1,
        };
        if self.pending.insert(key, pending).is_some() {
            debug!("message restarted before completing");
        }
        Ok(Assembled::Partial { received, expected })
    }

    fn extend(&mut self, chunk: Continuation) -> Result<Assembled> {
        let Some(pending) = self.pending.get_mut(&chunk.id) else {
            return Err(FrameError::UnexpectedContinuation { id: chunk.id });
        };
        pending.data.extend_from_slice(&chunk.data);
        pending.frames += 1;

        let expected = pending.metadata.size().unwrap_or_default();
        let received = pending.data.len();
        trace!(received, expected, frames = pending.frames, "continuation frame");

        if received < expected {
            return Ok(Assembled::Partial { received, expected });
        }
        let Some(mut pending) = self.pending.remove(&chunk.id) else {
            return Err(FrameError::UnexpectedContinuation { id: chunk.id });
        };
        if received > expected {
            return Err(FrameError::Overrun { expected, received });
        }

        pending.metadata.set_incomplete(false);
        Ok(Assembled::Complete(Envelope::new(
            pending.metadata,
            pending.data.freeze(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::codec::envelope_bytes;

    fn message(len: usize) -> (Vec<u8>, Bytes) {
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        let mut metadata = Metadata::with_size(len);
        metadata.insert("type", json!("bytes"));
        let wire = envelope_bytes(&metadata, &data).unwrap();
        (data, wire)
    }

    fn message_with_id(id: &str, len: usize, fill: u8) -> (Vec<u8>, Bytes) {
        let data = vec![fill; len];
        let mut metadata = Metadata::with_size(len);
        metadata.insert("type", json!("bytes"));
        metadata.insert("id", json!(id));
        let wire = envelope_bytes(&metadata, &data).unwrap();
        (data, wire)
    }

    #[test]
    fn small_message_is_one_frame() {
        let (_, wire) = message(10);
        let frames = split_frames(&wire, 2048).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0], wire);
    }

    #[test]
    fn large_message_splits_into_ceiling_frames() {
        let (_, wire) = message(5000);
        let frames = split_frames(&wire, 2048).unwrap();
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|f| f.len() <= 2048));
        assert_eq!(frames[0], wire.slice(..2048));
        assert!(frames[1].starts_with(b"{\"chunk\":1}"));
        assert!(frames[2].starts_with(b"{\"chunk\":2}"));
    }

    #[test]
    fn reassembles_with_incomplete_flags() {
        let (data, wire) = message(5000);
        let frames = split_frames(&wire, 2048).unwrap();

        let mut reassembler = Reassembler::new();
        let flags: Vec<bool> = frames
            .iter()
            .map(|frame| {
                reassembler
                    .push(frame.clone(), FramingMode::Framed)
                    .unwrap()
                    .is_incomplete()
            })
            .collect();
        assert_eq!(flags, vec![true, true, false]);
        assert!(!reassembler.is_pending());

        let mut reassembler = Reassembler::new();
        let mut last = None;
        for frame in frames {
            last = Some(reassembler.push(frame, FramingMode::Framed).unwrap());
        }
        let Some(Assembled::Complete(envelope)) = last else {
            panic!("expected a complete message");
        };
        assert_eq!(envelope.data.as_ref(), data.as_slice());
        assert!(!envelope.is_incomplete());
        assert_eq!(envelope.metadata.size(), Some(5000));
    }

    #[test]
    fn partial_reports_progress() {
        let (_, wire) = message(3000);
        let frames = split_frames(&wire, 2048).unwrap();
        let mut reassembler = Reassembler::new();

        match reassembler.push(frames[0].clone(), FramingMode::Framed).unwrap() {
            Assembled::Partial { received, expected } => {
                assert_eq!(expected, 3000);
                assert!(received < expected);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(reassembler.is_pending());
        assert_eq!(reassembler.frames(), 1);

        reassembler.reset();
        assert!(!reassembler.is_pending());
    }

    #[test]
    fn header_must_fit_first_frame() {
        let mut metadata = Metadata::with_size(4);
        metadata.insert("title", json!("t".repeat(100)));
        let wire = envelope_bytes(&metadata, b"data").unwrap();

        assert!(matches!(
            split_frames(&wire, 32),
            Err(FrameError::HeaderTooLarge { max: 32, .. })
        ));
    }

    #[test]
    fn zero_frame_size_rejected() {
        let (_, wire) = message(4);
        assert!(matches!(
            split_frames(&wire, 0),
            Err(FrameError::InvalidFrameSize)
        ));
    }

    #[test]
    fn overrun_detected() {
        let (_, wire) = message(100);
        let frames = split_frames(&wire, 64).unwrap();
        let mut reassembler = Reassembler::new();
        reassembler.push(frames[0].clone(), FramingMode::Framed).unwrap();

        let mut oversized = continuation_header(None, 1).unwrap();
        oversized.extend_from_slice(&[0u8; 500]);
        let err = reassembler
            .push(Bytes::from(oversized), FramingMode::Framed)
            .unwrap_err();
        assert!(matches!(err, FrameError::Overrun { expected: 100, .. }));
        assert!(!reassembler.is_pending());
    }

    #[test]
    fn continuation_headers_name_the_message() {
        let (_, wire) = message_with_id("m-1", 300, 7);
        let frames = split_frames(&wire, 128).unwrap();
        assert!(frames.len() > 2);
        for (index, frame) in frames.iter().enumerate().skip(1) {
            let header = format!("{{\"chunk\":{index},\"id\":\"m-1\"}}");
            assert!(frame.starts_with(header.as_bytes()));
        }
    }

    #[test]
    fn interleaved_messages_reassemble_by_id() {
        let (first_data, first) = message_with_id("first", 5000, b'a');
        let (second_data, second) = message_with_id("second", 4000, b'b');
        let first = split_frames(&first, 2048).unwrap();
        let second = split_frames(&second, 2048).unwrap();

        let mut interleaved = Vec::new();
        for i in 0..first.len().max(second.len()) {
            interleaved.extend(first.get(i).cloned());
            interleaved.extend(second.get(i).cloned());
        }

        let mut reassembler = Reassembler::new();
        let mut complete = Vec::new();
        for frame in interleaved {
            if let Assembled::Complete(envelope) =
                reassembler.push(frame, FramingMode::Framed).unwrap()
            {
                complete.push(envelope);
            }
        }
        assert!(!reassembler.is_pending());
        assert_eq!(complete.len(), 2);
        let by_id = |id: &str| {
            complete
                .iter()
                .find(|e| e.metadata.id() == Some(id))
                .map(|e| e.data.to_vec())
                .unwrap()
        };
        assert_eq!(by_id("first"), first_data);
        assert_eq!(by_id("second"), second_data);
    }

    #[test]
    fn raw_data_resembling_a_header_is_not_a_continuation() {
        let frame = Bytes::from_static(b"{\"chunk\":1,\"size\":3}MODELCOMM_MSG_HEADabc");
        let mut reassembler = Reassembler::new();
        match reassembler.push(frame, FramingMode::Framed).unwrap() {
            Assembled::Complete(envelope) => assert_eq!(envelope.data.as_ref(), b"abc"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn orphan_continuation_rejected() {
        let (_, wire) = message_with_id("lost", 300, 1);
        let frames = split_frames(&wire, 128).unwrap();
        let mut reassembler = Reassembler::new();

        let err = reassembler
            .push(frames[1].clone(), FramingMode::Framed)
            .unwrap_err();
        assert!(matches!(
            err,
            FrameError::UnexpectedContinuation { id: Some(ref id) } if id == "lost"
        ));
    }
}
