//! Wire Frames
//!
//! A frame is one message exactly as it crossed a socket. Text and binary
//! framing are kept apart so a payload is re-sent downstream with the same
//! framing it arrived with. Contents are reference counted, so handing one
//! frame to many client queues does not copy it; each session copies it
//! once when writing to its socket.

use std::sync::Arc;

/// One message-oriented frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text frame.
    Text(Arc<str>),
    /// Binary frame.
    Binary(Arc<[u8]>),
}

impl Frame {
    /// Build a text frame.
    #[must_use]
    pub fn text(text: impl Into<Arc<str>>) -> Self {
        Self::Text(text.into())
    }

    /// Build a binary frame.
    #[must_use]
    pub fn binary(data: impl Into<Arc<[u8]>>) -> Self {
        Self::Binary(data.into())
    }

    /// Serialize `value` as JSON into a text frame.
    ///
    /// # Errors
    ///
    /// Returns the serializer error if `value` cannot be represented as JSON.
    pub fn json<T: serde::Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_string(value).map(Self::text)
    }

    /// Raw bytes of the frame.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(data) => data,
        }
    }

    /// Text content, when this is a text frame.
    #[cfg(test)]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }

    /// Payload length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Whether the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Framing kind for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Binary(_) => "binary",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_payload() {
        let frame = Frame::text("hello");
        let copy = frame.clone();
        match (&frame, &copy) {
            (Frame::Text(a), Frame::Text(b)) => assert!(Arc::ptr_eq(a, b)),
            _ => panic!("expected text frames"),
        }
    }

    #[test]
    fn json_frame_is_text() {
        let frame = Frame::json(&serde_json::json!({"a": 1})).unwrap();
        assert_eq!(frame.as_text(), Some(r#"{"a":1}"#));
        assert_eq!(frame.kind(), "text");
    }

    #[test]
    fn binary_frame_bytes() {
        let frame = Frame::binary(vec![1u8, 2, 3]);
        assert_eq!(frame.as_bytes(), &[1, 2, 3]);
        assert_eq!(frame.as_text(), None);
        assert_eq!(frame.len(), 3);
        assert!(!frame.is_empty());
    }
}
