//! Message buffers with separate header and body regions.
//!
//! A [`Message`] is the unit of data moved through the system. The body
//! holds application payload; the header holds protocol metadata (request
//! correlation ids, survey ids) and is opaque to application callers —
//! length queries reflect the body only.
//!
//! A message is exclusively owned by one holder at a time. Handing it to a
//! successful send transfers ownership to the transport; a failed send
//! returns it to the caller, who remains responsible for it.
//!
//! # Example
//!
//! ```
//! use polysock::Message;
//!
//! let mut msg = Message::from_slice(b"ping");
//! assert_eq!(msg.len(), 4);
//! msg.append(b"!");
//! assert_eq!(msg.body(), b"ping!");
//! ```

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{Error, Result};

/// Upper bound for a single allocation request. Beyond this the library
/// refuses with `OutOfMemory` rather than letting the allocator abort.
pub const MAX_MSG_SIZE: usize = 1 << 30;

/// An owned, resizable byte buffer with header and body regions.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Message {
    header: BytesMut,
    body: BytesMut,
}

impl Message {
    /// Allocate a message with a zero-initialized body of `size` bytes.
    ///
    /// Fails with [`Error::OutOfMemory`] when `size` exceeds
    /// [`MAX_MSG_SIZE`].
    pub fn alloc(size: usize) -> Result<Self> {
        if size > MAX_MSG_SIZE {
            return Err(Error::OutOfMemory);
        }
        let mut body = BytesMut::with_capacity(size);
        body.resize(size, 0);
        Ok(Self {
            header: BytesMut::new(),
            body,
        })
    }

    /// Create an empty message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a message whose body is a copy of `data`.
    pub fn from_slice(data: &[u8]) -> Self {
        Self {
            header: BytesMut::new(),
            body: BytesMut::from(data),
        }
    }

    /// Body length in bytes. The header does not count.
    #[inline]
    pub fn len(&self) -> usize {
        self.body.len()
    }

    /// True when the body is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// Read-only view of the body, no copy.
    #[inline]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Mutable view of the body, no copy.
    #[inline]
    pub fn body_mut(&mut self) -> &mut [u8] {
        &mut self.body
    }

    /// Append bytes to the end of the body, reallocating as needed.
    pub fn append(&mut self, data: &[u8]) {
        self.body.extend_from_slice(data);
    }

    /// Insert bytes at the front of the body.
    pub fn insert(&mut self, data: &[u8]) {
        let mut new_body = BytesMut::with_capacity(data.len() + self.body.len());
        new_body.extend_from_slice(data);
        new_body.extend_from_slice(&self.body);
        self.body = new_body;
    }

    /// Remove `n` bytes from the front of the body.
    ///
    /// Fails with [`Error::InvalidArgument`] when the body is shorter
    /// than `n`.
    pub fn trim(&mut self, n: usize) -> Result<()> {
        if n > self.body.len() {
            return Err(Error::InvalidArgument);
        }
        self.body.advance(n);
        Ok(())
    }

    /// Remove `n` bytes from the back of the body.
    pub fn chop(&mut self, n: usize) -> Result<()> {
        if n > self.body.len() {
            return Err(Error::InvalidArgument);
        }
        let keep = self.body.len() - n;
        self.body.truncate(keep);
        Ok(())
    }

    /// Reset both regions to empty.
    pub fn clear(&mut self) {
        self.header.clear();
        self.body.clear();
    }

    // ------------------------------------------------------------------
    // Header region. Protocol state machines use these to carry routing
    // metadata (correlation ids, survey ids) without touching the body.
    // ------------------------------------------------------------------

    /// Read-only view of the header region.
    #[inline]
    pub(crate) fn header(&self) -> &[u8] {
        &self.header
    }

    /// Header length in bytes.
    #[inline]
    pub(crate) fn header_len(&self) -> usize {
        self.header.len()
    }

    /// Empty the header region.
    #[inline]
    pub(crate) fn header_clear(&mut self) {
        self.header.clear();
    }

    /// Prepend a big-endian u32 to the header.
    pub(crate) fn header_push_u32(&mut self, v: u32) {
        let mut new_header = BytesMut::with_capacity(4 + self.header.len());
        new_header.put_u32(v);
        new_header.extend_from_slice(&self.header);
        self.header = new_header;
    }

    /// Remove and return a big-endian u32 from the front of the header.
    pub(crate) fn header_pop_u32(&mut self) -> Option<u32> {
        if self.header.len() < 4 {
            return None;
        }
        Some(self.header.get_u32())
    }

    /// Peek the leading big-endian u32 in the header without consuming it.
    pub(crate) fn header_peek_u32(&self) -> Option<u32> {
        if self.header.len() < 4 {
            return None;
        }
        Some(u32::from_be_bytes([
            self.header[0],
            self.header[1],
            self.header[2],
            self.header[3],
        ]))
    }

    /// Consume the message and return the body bytes.
    pub fn into_body(self) -> BytesMut {
        self.body
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_zero_filled() {
        let msg = Message::alloc(16).unwrap();
        assert_eq!(msg.len(), 16);
        assert!(msg.body().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_alloc_too_large() {
        assert_eq!(Message::alloc(MAX_MSG_SIZE + 1), Err(Error::OutOfMemory));
    }

    #[test]
    fn test_len_excludes_header() {
        let mut msg = Message::from_slice(b"data");
        msg.header_push_u32(42);
        assert_eq!(msg.len(), 4);
        assert_eq!(msg.header_len(), 4);
        assert_eq!(msg.body(), b"data");
    }

    #[test]
    fn test_append_insert() {
        let mut msg = Message::from_slice(b"middle");
        msg.append(b"-end");
        msg.insert(b"start-");
        assert_eq!(msg.body(), b"start-middle-end");
    }

    #[test]
    fn test_trim_chop() {
        let mut msg = Message::from_slice(b"abcdef");
        msg.trim(2).unwrap();
        assert_eq!(msg.body(), b"cdef");
        msg.chop(2).unwrap();
        assert_eq!(msg.body(), b"cd");
        assert_eq!(msg.trim(3), Err(Error::InvalidArgument));
        assert_eq!(msg.chop(3), Err(Error::InvalidArgument));
    }

    #[test]
    fn test_header_u32_roundtrip() {
        let mut msg = Message::new();
        msg.header_push_u32(0xDEADBEEF);
        msg.header_push_u32(7);
        assert_eq!(msg.header_peek_u32(), Some(7));
        assert_eq!(msg.header_pop_u32(), Some(7));
        assert_eq!(msg.header_pop_u32(), Some(0xDEADBEEF));
        assert_eq!(msg.header_pop_u32(), None);
    }

    #[test]
    fn test_header_clear_keeps_body() {
        let mut msg = Message::from_slice(b"payload");
        msg.header_push_u32(1);
        msg.header_clear();
        assert_eq!(msg.header_len(), 0);
        assert_eq!(msg.body(), b"payload");
    }

    #[test]
    fn test_body_mut() {
        let mut msg = Message::alloc(3).unwrap();
        msg.body_mut().copy_from_slice(b"abc");
        assert_eq!(msg.body(), b"abc");
    }
}
