use std::fmt;
use std::str::FromStr;

use bytes::{Bytes, BytesMut};
use serde::Serialize;
use smallvec::SmallVec;

use crate::error::Error;

/// Behavior shared by every pooled payload: clear content, rewind
/// positions, keep allocated capacity so the next holder reuses it.
pub trait Resettable {
    fn reset(&mut self);
}

/// The concrete kinds of reusable objects the engine pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// Structured HTTP-like object: status, header table, body
    Message,
    /// Parsed-target scratch object
    Uri,
    /// Body stream buffer with a read position
    Stream,
    /// Raw byte buffer
    Buffer,
}

impl ResourceKind {
    /// All kinds, in a fixed order usable for per-kind tables.
    pub const ALL: [ResourceKind; 4] = [
        ResourceKind::Message,
        ResourceKind::Uri,
        ResourceKind::Stream,
        ResourceKind::Buffer,
    ];

    /// Stable index into per-kind tables.
    #[inline]
    pub fn index(self) -> usize {
        match self {
            ResourceKind::Message => 0,
            ResourceKind::Uri => 1,
            ResourceKind::Stream => 2,
            ResourceKind::Buffer => 3,
        }
    }

    /// Lowercase name used in statistics output.
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Message => "message",
            ResourceKind::Uri => "uri",
            ResourceKind::Stream => "stream",
            ResourceKind::Buffer => "buffer",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "message" => Ok(ResourceKind::Message),
            "uri" => Ok(ResourceKind::Uri),
            "stream" => Ok(ResourceKind::Stream),
            "buffer" => Ok(ResourceKind::Buffer),
            other => Err(Error::UnknownResource(other.to_string())),
        }
    }
}

/// Reusable structured message: a status code, a small header table
/// and a body buffer. Header tables rarely exceed a handful of entries,
/// so they live inline until they spill.
#[derive(Debug)]
pub struct MessageObject {
    pub status: u16,
    headers: SmallVec<[(Bytes, Bytes); 8]>,
    pub body: BytesMut,
}

impl MessageObject {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            status: 0,
            headers: SmallVec::new(),
            body: BytesMut::with_capacity(capacity),
        }
    }

    /// Append a header pair.
    pub fn push_header(&mut self, name: Bytes, value: Bytes) {
        self.headers.push((name, value));
    }

    /// Current number of header entries.
    #[inline]
    pub fn header_count(&self) -> usize {
        self.headers.len()
    }

    /// Look up the first header with the given name.
    pub fn header(&self, name: &[u8]) -> Option<&Bytes> {
        self.headers
            .iter()
            .find(|(n, _)| n.as_ref() == name)
            .map(|(_, v)| v)
    }

    /// Approximate retained bytes (capacity, not content).
    pub fn approx_bytes(&self) -> usize {
        let header_bytes: usize = self.headers.iter().map(|(n, v)| n.len() + v.len()).sum();
        self.body.capacity() + header_bytes
    }
}

impl Resettable for MessageObject {
    fn reset(&mut self) {
        self.status = 0;
        self.headers.clear();
        self.body.clear();
    }
}

/// Reusable parsed-target scratch: path and query buffers.
#[derive(Debug)]
pub struct UriObject {
    pub path: BytesMut,
    pub query: BytesMut,
}

impl UriObject {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            path: BytesMut::with_capacity(capacity),
            query: BytesMut::with_capacity(capacity / 4),
        }
    }

    pub fn approx_bytes(&self) -> usize {
        self.path.capacity() + self.query.capacity()
    }
}

impl Resettable for UriObject {
    fn reset(&mut self) {
        self.path.clear();
        self.query.clear();
    }
}

/// Reusable body stream buffer: data plus a read position that must be
/// rewound before the buffer is handed to a new holder.
#[derive(Debug)]
pub struct StreamBuffer {
    data: BytesMut,
    position: usize,
}

impl StreamBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity),
            position: 0,
        }
    }

    /// Append bytes to the stream.
    pub fn write(&mut self, chunk: &[u8]) {
        self.data.extend_from_slice(chunk);
    }

    /// Read up to `len` bytes from the current position.
    pub fn read(&mut self, len: usize) -> &[u8] {
        let end = (self.position + len).min(self.data.len());
        let out = &self.data[self.position..end];
        self.position = end;
        out
    }

    /// Rewind the read position without dropping data.
    pub fn rewind(&mut self) {
        self.position = 0;
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.position
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn approx_bytes(&self) -> usize {
        self.data.capacity()
    }
}

impl Resettable for StreamBuffer {
    fn reset(&mut self) {
        self.data.clear();
        self.position = 0;
    }
}

/// Tagged union over every pooled payload kind.
#[derive(Debug)]
pub enum Resource {
    Message(MessageObject),
    Uri(UriObject),
    Stream(StreamBuffer),
    Buffer(BytesMut),
}

impl Resource {
    /// Construct a fresh resource of the given kind with the given
    /// byte capacity.
    pub fn with_capacity(kind: ResourceKind, capacity: usize) -> Self {
        match kind {
            ResourceKind::Message => Resource::Message(MessageObject::with_capacity(capacity)),
            ResourceKind::Uri => Resource::Uri(UriObject::with_capacity(capacity)),
            ResourceKind::Stream => Resource::Stream(StreamBuffer::with_capacity(capacity)),
            ResourceKind::Buffer => Resource::Buffer(BytesMut::with_capacity(capacity)),
        }
    }

    /// The kind tag of this resource.
    #[inline]
    pub fn kind(&self) -> ResourceKind {
        match self {
            Resource::Message(_) => ResourceKind::Message,
            Resource::Uri(_) => ResourceKind::Uri,
            Resource::Stream(_) => ResourceKind::Stream,
            Resource::Buffer(_) => ResourceKind::Buffer,
        }
    }

    /// Approximate retained bytes (capacity, not content).
    pub fn approx_bytes(&self) -> usize {
        match self {
            Resource::Message(m) => m.approx_bytes(),
            Resource::Uri(u) => u.approx_bytes(),
            Resource::Stream(s) => s.approx_bytes(),
            Resource::Buffer(b) => b.capacity(),
        }
    }

    /// Get as message reference, if it is one.
    #[inline]
    pub fn as_message(&self) -> Option<&MessageObject> {
        match self {
            Resource::Message(m) => Some(m),
            _ => None,
        }
    }

    /// Get as message mutable reference, if it is one.
    #[inline]
    pub fn as_message_mut(&mut self) -> Option<&mut MessageObject> {
        match self {
            Resource::Message(m) => Some(m),
            _ => None,
        }
    }

    /// Get as stream mutable reference, if it is one.
    #[inline]
    pub fn as_stream_mut(&mut self) -> Option<&mut StreamBuffer> {
        match self {
            Resource::Stream(s) => Some(s),
            _ => None,
        }
    }

    /// Get as buffer mutable reference, if it is one.
    #[inline]
    pub fn as_buffer_mut(&mut self) -> Option<&mut BytesMut> {
        match self {
            Resource::Buffer(b) => Some(b),
            _ => None,
        }
    }
}

impl Resettable for Resource {
    fn reset(&mut self) {
        match self {
            Resource::Message(m) => m.reset(),
            Resource::Uri(u) => u.reset(),
            Resource::Stream(s) => s.reset(),
            Resource::Buffer(b) => b.clear(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trip() {
        for kind in ResourceKind::ALL {
            assert_eq!(kind.as_str().parse::<ResourceKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_unknown_kind_name() {
        let err = "socket".parse::<ResourceKind>().unwrap_err();
        assert!(matches!(err, Error::UnknownResource(name) if name == "socket"));
    }

    #[test]
    fn test_message_reset_keeps_capacity() {
        let mut msg = MessageObject::with_capacity(1024);
        msg.status = 200;
        msg.push_header(Bytes::from_static(b"content-type"), Bytes::from_static(b"text/plain"));
        msg.body.extend_from_slice(b"hello");

        msg.reset();
        assert_eq!(msg.status, 0);
        assert_eq!(msg.header_count(), 0);
        assert!(msg.body.is_empty());
        assert!(msg.body.capacity() >= 1024);
    }

    #[test]
    fn test_message_header_lookup() {
        let mut msg = MessageObject::with_capacity(64);
        msg.push_header(Bytes::from_static(b"content-length"), Bytes::from_static(b"12"));
        assert_eq!(
            msg.header(b"content-length").map(|v| v.as_ref()),
            Some(&b"12"[..])
        );
        assert!(msg.header(b"accept").is_none());
    }

    #[test]
    fn test_stream_read_and_rewind() {
        let mut stream = StreamBuffer::with_capacity(64);
        stream.write(b"abcdef");

        assert_eq!(stream.read(4), b"abcd");
        assert_eq!(stream.position(), 4);
        assert_eq!(stream.read(10), b"ef");

        stream.rewind();
        assert_eq!(stream.position(), 0);
        assert_eq!(stream.read(2), b"ab");
    }

    #[test]
    fn test_resource_reset_rewinds_stream() {
        let mut res = Resource::with_capacity(ResourceKind::Stream, 64);
        let stream = res.as_stream_mut().unwrap();
        stream.write(b"data");
        let _ = stream.read(4);

        res.reset();
        let stream = res.as_stream_mut().unwrap();
        assert_eq!(stream.position(), 0);
        assert!(stream.is_empty());
    }

    #[test]
    fn test_resource_kind_tag() {
        for kind in ResourceKind::ALL {
            let res = Resource::with_capacity(kind, 64);
            assert_eq!(res.kind(), kind);
        }
    }

    #[test]
    fn test_approx_bytes_tracks_capacity() {
        let res = Resource::with_capacity(ResourceKind::Buffer, 4096);
        assert!(res.approx_bytes() >= 4096);
    }
}
