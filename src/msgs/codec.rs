use std::convert::TryInto;
use std::fmt::Debug;

/// Wrapper over a slice of bytes that allows reading chunks from
/// with the current position state held using an object.
pub struct Reader<'a> {
    /// The underlying buffer storing the readers content
    buf: &'a [u8],
    /// Stores the current reading position for the buffer
    cursor: usize,
}

impl<'a> Reader<'a> {
    /// Creates a new Reader of the provided `bytes` slice with
    /// the initial cursor position of zero.
    pub fn init(bytes: &'a [u8]) -> Self {
        Reader {
            buf: bytes,
            cursor: 0,
        }
    }

    /// Attempts to create a new Reader on a sub section of this
    /// readers bytes by taking a slice of the provided `length`
    /// will return None if there is not enough bytes.
    pub fn sub(&mut self, length: usize) -> Option<Reader<'a>> {
        self.take(length).map(Reader::init)
    }

    /// Borrows a slice of all the remaining bytes that appear
    /// after the cursor position.
    ///
    /// Moves the cursor to the end of the buffer length.
    pub fn rest(&mut self) -> &'a [u8] {
        let rest = &self.buf[self.cursor..];
        self.cursor = self.buf.len();
        rest
    }

    /// Attempts to borrow a slice of bytes from the current
    /// cursor position of `length` if there is not enough
    /// bytes remaining after the cursor to take the length
    /// then None is returned instead.
    pub fn take(&mut self, length: usize) -> Option<&'a [u8]> {
        if self.left() < length {
            return None;
        }
        let current = self.cursor;
        self.cursor += length;
        Some(&self.buf[current..current + length])
    }

    /// Used to check whether the reader has any content left
    /// after the cursor (cursor has not reached end of buffer)
    pub fn any_left(&self) -> bool {
        self.cursor < self.buf.len()
    }

    /// Returns the cursor position which is also the number
    /// of bytes that have been read from the buffer.
    pub fn used(&self) -> usize {
        self.cursor
    }

    /// Returns the number of bytes that are still able to be
    /// read (bytes after cursor)
    pub fn left(&self) -> usize {
        self.buf.len() - self.cursor
    }
}

/// Trait for implementing encoding and decoding functionality
/// on something.
pub trait Codec: Debug + Sized {
    /// Function for encoding itself by appending itself to
    /// the provided vec of bytes.
    fn encode(&self, bytes: &mut Vec<u8>);

    /// Function for decoding itself from the provided reader
    /// will return Some if the decoding was successful or
    /// None if it was not.
    fn read(_: &mut Reader) -> Option<Self>;

    /// Convenience function for encoding the implementation
    /// into a vec and returning it
    fn get_encoding(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        self.encode(&mut bytes);
        bytes
    }

    /// Function for wrapping a call to the read function in
    /// a Reader for the slice of bytes provided
    fn read_bytes(bytes: &[u8]) -> Option<Self> {
        let mut reader = Reader::init(bytes);
        Self::read(&mut reader)
    }
}

impl Codec for u8 {
    fn encode(&self, bytes: &mut Vec<u8>) {
        bytes.push(*self);
    }

    fn read(r: &mut Reader) -> Option<Self> {
        r.take(1).map(|b| b[0])
    }
}

pub fn put_u16(v: u16, out: &mut [u8]) {
    let out: &mut [u8; 2] = (&mut out[..2]).try_into().unwrap();
    *out = u16::to_be_bytes(v);
}

impl Codec for u16 {
    fn encode(&self, bytes: &mut Vec<u8>) {
        let mut b16 = [0u8; 2];
        put_u16(*self, &mut b16);
        bytes.extend_from_slice(&b16);
    }

    fn read(r: &mut Reader) -> Option<Self> {
        r.take(2)
            .map(|b| Self::from_be_bytes(b.try_into().unwrap()))
    }
}

// Make a distinct type for u24, even though it's a u32 underneath
#[allow(non_camel_case_types)]
#[derive(Debug, Copy, Clone)]
pub struct u24(pub u32);

impl From<u24> for usize {
    #[inline]
    fn from(v: u24) -> Self {
        v.0 as Self
    }
}

impl Codec for u24 {
    fn encode(&self, bytes: &mut Vec<u8>) {
        let be_bytes = u32::to_be_bytes(self.0);
        bytes.extend_from_slice(&be_bytes[1..]);
    }

    fn read(r: &mut Reader) -> Option<Self> {
        r.take(3).map(|b| {
            Self(u32::from_be_bytes([0, b[0], b[1], b[2]]))
        })
    }
}

impl Codec for u32 {
    fn encode(&self, bytes: &mut Vec<u8>) {
        bytes.extend_from_slice(&Self::to_be_bytes(*self));
    }

    fn read(r: &mut Reader) -> Option<Self> {
        r.take(4)
            .map(|b| Self::from_be_bytes(b.try_into().unwrap()))
    }
}

impl Codec for u64 {
    fn encode(&self, bytes: &mut Vec<u8>) {
        bytes.extend_from_slice(&Self::to_be_bytes(*self));
    }

    fn read(r: &mut Reader) -> Option<Self> {
        r.take(8)
            .map(|b| Self::from_be_bytes(b.try_into().unwrap()))
    }
}

/// Encode the lengthed vector `items`, prefixed with a u8 length.
pub fn encode_vec_u8<T: Codec>(bytes: &mut Vec<u8>, items: &[T]) {
    let len_offset = bytes.len();
    bytes.push(0);

    for i in items {
        i.encode(bytes);
    }

    let len = bytes.len() - len_offset - 1;
    debug_assert!(len <= 0xff);
    bytes[len_offset] = len as u8;
}

/// Encode the lengthed vector `items`, prefixed with a u16 length.
pub fn encode_vec_u16<T: Codec>(bytes: &mut Vec<u8>, items: &[T]) {
    let len_offset = bytes.len();
    bytes.extend([0, 0]);

    for i in items {
        i.encode(bytes);
    }

    let len = bytes.len() - len_offset - 2;
    debug_assert!(len <= 0xffff);
    let out: &mut [u8; 2] = (&mut bytes[len_offset..len_offset + 2])
        .try_into()
        .unwrap();
    *out = u16::to_be_bytes(len as u16);
}

/// Encode the lengthed vector `items`, prefixed with a u24 length.
pub fn encode_vec_u24<T: Codec>(bytes: &mut Vec<u8>, items: &[T]) {
    let len_offset = bytes.len();
    bytes.extend([0, 0, 0]);

    for i in items {
        i.encode(bytes);
    }

    let len = bytes.len() - len_offset - 3;
    debug_assert!(len <= 0xff_ffff);
    let len_bytes = u32::to_be_bytes(len as u32);
    let out: &mut [u8; 3] = (&mut bytes[len_offset..len_offset + 3])
        .try_into()
        .unwrap();
    out.copy_from_slice(&len_bytes[1..]);
}

/// Read a length-prefixed vector: u8 length, then items until
/// the sub-buffer is exhausted.  Trailing bytes inside any item
/// are an error surfaced by the item's own `read`.
pub fn read_vec_u8<T: Codec>(r: &mut Reader) -> Option<Vec<T>> {
    let len = usize::from(u8::read(r)?);
    let mut sub = r.sub(len)?;

    let mut ret = Vec::new();
    while sub.any_left() {
        ret.push(T::read(&mut sub)?);
    }

    Some(ret)
}

/// Read a length-prefixed vector: u16 length, then items.
pub fn read_vec_u16<T: Codec>(r: &mut Reader) -> Option<Vec<T>> {
    let len = usize::from(u16::read(r)?);
    let mut sub = r.sub(len)?;

    let mut ret = Vec::new();
    while sub.any_left() {
        ret.push(T::read(&mut sub)?);
    }

    Some(ret)
}

/// Read a u24 length-prefixed vector, rejecting lengths above `max_bytes`.
pub fn read_vec_u24_limited<T: Codec>(r: &mut Reader, max_bytes: usize) -> Option<Vec<T>> {
    let len = usize::from(u24::read(r)?);
    if len > max_bytes {
        return None;
    }
    let mut sub = r.sub(len)?;

    let mut ret = Vec::new();
    while sub.any_left() {
        ret.push(T::read(&mut sub)?);
    }

    Some(ret)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupted_u16_read_leaves_reader_usable() {
        let mut r = Reader::init(&[0x01]);
        assert!(u16::read(&mut r).is_none());
        assert_eq!(r.left(), 1);
    }

    #[test]
    fn u24_round_trip() {
        let val = u24(0xfe_dcba);
        let enc = val.get_encoding();
        assert_eq!(enc, vec![0xfe, 0xdc, 0xba]);
        let read = u24::read_bytes(&enc).unwrap();
        assert_eq!(read.0, 0xfe_dcba);
    }

    #[test]
    fn vec_u16_rejects_truncated_body() {
        // declared length of 4, only 3 bytes follow
        let bytes = [0x00, 0x04, 0x01, 0x02, 0x03];
        let mut r = Reader::init(&bytes);
        assert!(read_vec_u16::<u8>(&mut r).is_none());
    }

    #[test]
    fn vec_u16_rejects_item_overflowing_by_one() {
        // a u16 item needs 2 bytes; declared length 3 leaves a dangling byte
        let bytes = [0x00, 0x03, 0x01, 0x02, 0x03];
        let mut r = Reader::init(&bytes);
        assert!(read_vec_u16::<u16>(&mut r).is_none());
    }

    #[test]
    fn sub_reader_cannot_escape_parent() {
        let bytes = [0x01, 0x02];
        let mut r = Reader::init(&bytes);
        assert!(r.sub(3).is_none());
        let sub = r.sub(2).unwrap();
        assert_eq!(sub.left(), 2);
        assert!(!r.any_left());
    }
}
