//! The message envelope written by producers and read by consumers.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use rill_log::{LogCodec, LogError, LogResult};

/// Kind of a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Business message.
    Normal,
    /// Business message that also closes the current batch.
    ForceBatch,
    /// End of stream for the partition it is appended to.
    PoisonPill,
}

impl MessageKind {
    const fn tag(self) -> u8 {
        match self {
            Self::Normal => 0,
            Self::ForceBatch => 1,
            Self::PoisonPill => 2,
        }
    }
}

/// Key/value envelope with two sentinel variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message<V> {
    /// Business message.
    Data {
        /// Optional routing key.
        key: Option<String>,
        /// Payload.
        value: V,
    },
    /// Business message that forces a commit once processed.
    ForceBatch {
        /// Optional routing key.
        key: Option<String>,
        /// Payload.
        value: V,
    },
    /// Stops the consumer of the partition it lands on.
    PoisonPill,
}

impl<V> Message<V> {
    /// The poison pill.
    pub const POISON_PILL: Self = Self::PoisonPill;

    /// Creates a keyed business message.
    #[must_use]
    pub fn of(key: impl Into<String>, value: V) -> Self {
        Self::Data {
            key: Some(key.into()),
            value,
        }
    }

    /// Creates a business message without key.
    #[must_use]
    pub const fn of_value(value: V) -> Self {
        Self::Data { key: None, value }
    }

    /// Creates a force-batch message.
    #[must_use]
    pub const fn of_force_batch(value: V) -> Self {
        Self::ForceBatch { key: None, value }
    }

    /// Returns the kind.
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        match self {
            Self::Data { .. } => MessageKind::Normal,
            Self::ForceBatch { .. } => MessageKind::ForceBatch,
            Self::PoisonPill => MessageKind::PoisonPill,
        }
    }

    /// Returns the routing key, if any.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::Data { key, .. } | Self::ForceBatch { key, .. } => key.as_deref(),
            Self::PoisonPill => None,
        }
    }

    /// Returns the payload, `None` for a poison pill.
    #[must_use]
    pub const fn value(&self) -> Option<&V> {
        match self {
            Self::Data { value, .. } | Self::ForceBatch { value, .. } => Some(value),
            Self::PoisonPill => None,
        }
    }

    /// Returns true for the poison pill.
    #[must_use]
    pub const fn is_poison_pill(&self) -> bool {
        matches!(self, Self::PoisonPill)
    }
}

/// Wire layout: kind tag (u8), key presence (u8), key, value.
impl<V: LogCodec> LogCodec for Message<V> {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.kind().tag());
        match self {
            Self::Data { key, value } | Self::ForceBatch { key, value } => {
                match key {
                    Some(key) => {
                        buf.put_u8(1);
                        key.encode(buf);
                    }
                    None => buf.put_u8(0),
                }
                value.encode(buf);
            }
            Self::PoisonPill => {}
        }
    }

    fn decode(buf: &mut Bytes) -> LogResult<Self> {
        if buf.remaining() < 1 {
            return Err(LogError::corruption("missing message kind"));
        }
        let tag = buf.get_u8();
        if tag == MessageKind::PoisonPill.tag() {
            return Ok(Self::PoisonPill);
        }
        if tag != MessageKind::Normal.tag() && tag != MessageKind::ForceBatch.tag() {
            return Err(LogError::corruption(format!("unknown message kind {tag}")));
        }
        if buf.remaining() < 1 {
            return Err(LogError::corruption("missing key flag"));
        }
        let key = match buf.get_u8() {
            0 => None,
            1 => Some(String::decode(buf)?),
            flag => return Err(LogError::corruption(format!("invalid key flag {flag}"))),
        };
        let value = V::decode(buf)?;
        if tag == MessageKind::ForceBatch.tag() {
            Ok(Self::ForceBatch { key, value })
        } else {
            Ok(Self::Data { key, value })
        }
    }
}
