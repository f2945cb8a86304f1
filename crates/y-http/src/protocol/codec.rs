//! Transport-safe framing of y-sync messages.
//!
//! Frames travel as standard base64 strings. An update equal to the engine's
//! empty marker is never framed: the encoders return `None` instead, and the
//! request simply omits that entry.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::engine::DocumentEngine;
use crate::error::{ProviderError, Result};

use super::message::Message;

/// Frame a document update as a `SYNC`/`UPDATE` message.
pub fn encode_sync<D: DocumentEngine>(delta: &[u8]) -> Option<String> {
    if D::is_empty_delta(delta) {
        return None;
    }
    Some(encode_frame(&Message::update(delta.to_vec())))
}

/// Frame an encoded presence update as a `PRESENCE` message.
pub fn encode_presence(delta: &[u8]) -> Option<String> {
    if delta.is_empty() {
        return None;
    }
    Some(encode_frame(&Message::Presence(delta.to_vec())))
}

/// Encode any message to its transport string.
pub fn encode_frame(msg: &Message) -> String {
    STANDARD.encode(msg.encode())
}

/// Decode a transport string into a message.
pub fn decode(frame: &str) -> Result<Message> {
    let bytes = STANDARD
        .decode(frame)
        .map_err(|e| ProviderError::Decode(format!("Invalid base64 frame: {}", e)))?;
    Message::decode(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::YDocument;
    use crate::protocol::message::SyncMessage;

    #[test]
    fn test_empty_update_is_not_framed() {
        assert_eq!(encode_sync::<YDocument>(&[0, 0]), None);
        assert_eq!(encode_sync::<YDocument>(&[]), None);
    }

    #[test]
    fn test_sync_frame_prefix() {
        let frame = encode_sync::<YDocument>(&[1, 2, 3]).unwrap();
        // [0, 2, ...] in base64 always starts with "AAI"
        assert!(frame.starts_with("AAI"));
        assert_eq!(
            decode(&frame).unwrap(),
            Message::Sync(SyncMessage::Update(vec![1, 2, 3]))
        );
    }

    #[test]
    fn test_presence_frame() {
        assert_eq!(encode_presence(&[]), None);
        let frame = encode_presence(&[5, 6]).unwrap();
        assert_eq!(decode(&frame).unwrap(), Message::Presence(vec![5, 6]));
    }

    #[test]
    fn test_decode_yjs_frame() {
        let frame = "AAISAQHYidydCwOE2IncnQsCAWkA";
        let Message::Sync(SyncMessage::Update(update)) = decode(frame).unwrap() else {
            panic!("Expected Update message");
        };
        assert_eq!(update.len(), 18);
    }

    #[test]
    fn test_decode_rejects_invalid_base64() {
        let err = decode("not base64!").unwrap_err();
        assert!(matches!(err, ProviderError::Decode(_)));
    }
}
