//! Business message passed between peers.

use bytes::Bytes;

/// A business message: opaque payload plus an optional discriminator.
///
/// The transport never inspects the body. The `tag` is a diagnostic label
/// that appears in logs and never travels on the wire; the `header` is a
/// 64-bit business discriminator carried in the nested envelope (0 = none).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Diagnostic label for logs.
    pub tag: String,
    /// Business discriminator; 0 means none.
    pub header: u64,
    /// Payload bytes (zero-copy via `bytes::Bytes`).
    pub body: Bytes,
}

impl Message {
    /// Create a message with no tag or discriminator.
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            tag: String::new(),
            header: 0,
            body: body.into(),
        }
    }

    /// Attach a diagnostic tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    /// Attach a business discriminator (0 means none).
    pub fn with_header(mut self, header: u64) -> Self {
        self.header = header;
        self
    }
}

impl From<Bytes> for Message {
    fn from(body: Bytes) -> Self {
        Self::new(body)
    }
}

impl From<Vec<u8>> for Message {
    fn from(body: Vec<u8>) -> Self {
        Self::new(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_style() {
        let msg = Message::new(vec![1, 2, 3]).with_tag("ping").with_header(7);
        assert_eq!(msg.tag, "ping");
        assert_eq!(msg.header, 7);
        assert_eq!(&msg.body[..], &[1, 2, 3]);
    }

    #[test]
    fn test_from_bytes() {
        let msg: Message = Bytes::from_static(b"raw").into();
        assert_eq!(msg.header, 0);
        assert!(msg.tag.is_empty());
    }
}
