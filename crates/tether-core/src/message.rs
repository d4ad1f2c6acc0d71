//! The unit of data carried through a filter pipeline.
//!
//! Inbound traversals start from a borrowed view of the I/O loop's read
//! buffer, which the loop refills on the next read. Anything that outlives
//! the current call (a worker task, a queued write) must hold an owned
//! message, obtained with [`Message::detach`]. Detaching copies borrowed
//! bytes and moves everything else, so the copy happens only where the
//! lifetime actually requires it.

use std::any::Any;
use std::fmt;

use bytes::Bytes;

/// A message flowing through the pipeline.
pub enum Message<'a> {
    /// View into a buffer owned by the I/O loop.
    Borrowed(&'a [u8]),
    /// Owned, immutable bytes.
    Bytes(Bytes),
    /// Any decoded application object.
    Object(Box<dyn Any + Send>),
}

impl<'a> Message<'a> {
    /// Borrow a slice of the I/O loop's buffer.
    #[must_use]
    pub fn borrowed(bytes: &'a [u8]) -> Self {
        Self::Borrowed(bytes)
    }

    /// Raw bytes, for the two byte-carrying variants.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Borrowed(b) => Some(*b),
            Self::Bytes(b) => Some(b.as_ref()),
            Self::Object(_) => None,
        }
    }

    /// Whether this message still borrows the loop's buffer.
    pub fn is_borrowed(&self) -> bool {
        matches!(self, Self::Borrowed(_))
    }

    /// Byte length, for the two byte-carrying variants.
    pub fn byte_len(&self) -> Option<usize> {
        self.as_bytes().map(<[u8]>::len)
    }

    /// Reference to the decoded object if it is a `T`.
    ///
    /// `Bytes` messages answer to `T = Bytes` as well.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Self::Object(obj) => obj.downcast_ref::<T>(),
            Self::Bytes(b) => (b as &dyn Any).downcast_ref::<T>(),
            Self::Borrowed(_) => None,
        }
    }

    /// Take the decoded object out if it is a `T`; otherwise return `self`.
    pub fn downcast<T: Any>(self) -> Result<T, Self> {
        match self {
            Self::Object(obj) => obj.downcast::<T>().map(|b| *b).map_err(Self::Object),
            other => Err(other),
        }
    }

    /// Owned bytes. Copies a borrowed view; fails for non-byte objects
    /// other than a boxed [`Bytes`].
    pub fn into_bytes(self) -> Result<Bytes, Self> {
        match self {
            Self::Borrowed(b) => Ok(Bytes::copy_from_slice(b)),
            Self::Bytes(b) => Ok(b),
            Self::Object(obj) => obj.downcast::<Bytes>().map(|b| *b).map_err(Self::Object),
        }
    }

    /// Detach from the I/O loop's buffer.
    ///
    /// A borrowed view is copied into fresh storage; owned variants move.
    #[must_use]
    pub fn detach(self) -> Message<'static> {
        match self {
            Self::Borrowed(b) => Message::Bytes(Bytes::copy_from_slice(b)),
            Self::Bytes(b) => Message::Bytes(b),
            Self::Object(obj) => Message::Object(obj),
        }
    }
}

impl Message<'static> {
    /// Wrap any sendable value.
    pub fn object<T: Any + Send>(value: T) -> Self {
        Self::Object(Box::new(value))
    }
}

impl fmt::Debug for Message<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Borrowed(b) => f.debug_tuple("Borrowed").field(&b.len()).finish(),
            Self::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            Self::Object(_) => f.write_str("Object(..)"),
        }
    }
}

impl From<Bytes> for Message<'static> {
    fn from(bytes: Bytes) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<Vec<u8>> for Message<'static> {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(bytes))
    }
}

impl<'a> From<&'a [u8]> for Message<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        Self::Borrowed(bytes)
    }
}
