//! The binary record codec.
//!
//! Coordination servers speak a compact, schema-less binary format: every
//! record is a fixed sequence of fields, each written big-endian with no
//! tags or padding. The field kinds are:
//!
//! | Kind      | Encoding                                          |
//! |-----------|---------------------------------------------------|
//! | `int`     | 4 bytes, big-endian `i32`                         |
//! | `long`    | 8 bytes, big-endian `i64`                         |
//! | `boolean` | 1 byte, `0` or `1`                                |
//! | `buffer`  | `int` length (`-1` = null) followed by the bytes  |
//! | `ustring` | same as `buffer`, bytes are UTF-8                 |
//! | `vector`  | `int` count (`-1` = null) followed by the items   |
//!
//! Any type that knows its own field order implements [`Record`]. The
//! [`RecordWriter`] and [`RecordReader`] handle the primitive kinds, so a
//! record implementation is just a list of field reads or writes in order.

use bytes::{Buf, BufMut, BytesMut};

use crate::ProtocolError;

/// A value with a fixed binary layout on the wire.
pub trait Record: Sized {
    /// Appends this record's fields to `w`.
    fn write(&self, w: &mut RecordWriter);

    /// Reads this record's fields from `r`.
    ///
    /// # Errors
    /// Returns a [`ProtocolError`] if the input is truncated or a length
    /// prefix or string field is malformed.
    fn read(r: &mut RecordReader<'_>) -> Result<Self, ProtocolError>;
}

/// Encodes a single record into a fresh byte vector.
pub fn to_bytes<T: Record>(value: &T) -> Vec<u8> {
    let mut w = RecordWriter::new();
    value.write(&mut w);
    w.into_bytes()
}

/// Decodes a single record that must span all of `data`.
///
/// # Errors
/// Returns [`ProtocolError::TrailingBytes`] if `data` holds more than one
/// record, or any error produced while reading the record itself.
pub fn from_bytes<T: Record>(data: &[u8]) -> Result<T, ProtocolError> {
    let mut r = RecordReader::new(data);
    let value = T::read(&mut r)?;
    r.finish()?;
    Ok(value)
}

// ---------------------------------------------------------------------------
// RecordWriter
// ---------------------------------------------------------------------------

/// Accumulates encoded fields into a buffer.
#[derive(Debug, Default)]
pub struct RecordWriter {
    buf: BytesMut,
}

impl RecordWriter {
    /// Creates an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_i32(&mut self, v: i32) {
        self.buf.put_i32(v);
    }

    pub fn write_i64(&mut self, v: i64) {
        self.buf.put_i64(v);
    }

    pub fn write_bool(&mut self, v: bool) {
        self.buf.put_u8(u8::from(v));
    }

    /// Writes a length-prefixed byte buffer; `None` is encoded as length `-1`.
    pub fn write_buffer(&mut self, v: Option<&[u8]>) {
        match v {
            Some(bytes) => {
                self.write_len(bytes.len());
                self.buf.put_slice(bytes);
            }
            None => self.buf.put_i32(-1),
        }
    }

    /// Writes a length-prefixed UTF-8 string; `None` is encoded as length `-1`.
    pub fn write_string(&mut self, v: Option<&str>) {
        self.write_buffer(v.map(str::as_bytes));
    }

    /// Writes a counted vector, using `write_item` for each element.
    pub fn write_vec<T>(
        &mut self,
        items: Option<&[T]>,
        mut write_item: impl FnMut(&mut Self, &T),
    ) {
        match items {
            Some(items) => {
                self.write_len(items.len());
                for item in items {
                    write_item(self, item);
                }
            }
            None => self.buf.put_i32(-1),
        }
    }

    /// Writes a nested record in place.
    pub fn write_record<T: Record>(&mut self, v: &T) {
        v.write(self);
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns `true` if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Consumes the writer and returns the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf.to_vec()
    }

    fn write_len(&mut self, len: usize) {
        // Frames are capped well below i32::MAX by the transport, so a
        // length that does not fit is a caller bug.
        let len = i32::try_from(len).unwrap_or(i32::MAX);
        self.buf.put_i32(len);
    }
}

// ---------------------------------------------------------------------------
// RecordReader
// ---------------------------------------------------------------------------

/// Reads encoded fields from a borrowed frame.
///
/// Every read checks the remaining length first, so a truncated frame
/// produces [`ProtocolError::UnexpectedEof`] instead of a panic.
#[derive(Debug)]
pub struct RecordReader<'a> {
    buf: &'a [u8],
}

impl<'a> RecordReader<'a> {
    /// Creates a reader over `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    /// Returns `true` if the whole frame has been consumed.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Fails with [`ProtocolError::TrailingBytes`] unless the frame was
    /// consumed exactly.
    pub fn finish(&self) -> Result<(), ProtocolError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(ProtocolError::TrailingBytes(n)),
        }
    }

    pub fn read_i32(&mut self) -> Result<i32, ProtocolError> {
        self.ensure(4)?;
        Ok(self.buf.get_i32())
    }

    pub fn read_i64(&mut self) -> Result<i64, ProtocolError> {
        self.ensure(8)?;
        Ok(self.buf.get_i64())
    }

    pub fn read_bool(&mut self) -> Result<bool, ProtocolError> {
        self.ensure(1)?;
        Ok(self.buf.get_u8() != 0)
    }

    /// Reads a length-prefixed buffer; length `-1` yields `None`.
    pub fn read_buffer(&mut self) -> Result<Option<Vec<u8>>, ProtocolError> {
        let Some(len) = self.read_len()? else {
            return Ok(None);
        };
        self.ensure(len)?;
        let bytes = self.buf[..len].to_vec();
        self.buf.advance(len);
        Ok(Some(bytes))
    }

    /// Reads a length-prefixed UTF-8 string; length `-1` yields `None`.
    pub fn read_string(&mut self) -> Result<Option<String>, ProtocolError> {
        match self.read_buffer()? {
            Some(bytes) => Ok(Some(String::from_utf8(bytes)?)),
            None => Ok(None),
        }
    }

    /// Reads a counted vector, using `read_item` for each element.
    pub fn read_vec<T>(
        &mut self,
        mut read_item: impl FnMut(&mut Self) -> Result<T, ProtocolError>,
    ) -> Result<Option<Vec<T>>, ProtocolError> {
        let Some(count) = self.read_len()? else {
            return Ok(None);
        };
        // Each element takes at least one byte, which bounds the
        // allocation by the frame size rather than by the claimed count.
        let mut items = Vec::with_capacity(count.min(self.remaining()));
        for _ in 0..count {
            items.push(read_item(self)?);
        }
        Ok(Some(items))
    }

    /// Reads a nested record in place.
    pub fn read_record<T: Record>(&mut self) -> Result<T, ProtocolError> {
        T::read(self)
    }

    /// Consumes and returns everything left in the frame.
    ///
    /// Used to split a reply header from a body whose type depends on
    /// the request it answers.
    pub fn read_rest(&mut self) -> &'a [u8] {
        std::mem::take(&mut self.buf)
    }

    fn read_len(&mut self) -> Result<Option<usize>, ProtocolError> {
        match self.read_i32()? {
            -1 => Ok(None),
            n if n < 0 => Err(ProtocolError::NegativeLength(n)),
            n => Ok(Some(n as usize)),
        }
    }

    fn ensure(&self, needed: usize) -> Result<(), ProtocolError> {
        if self.remaining() < needed {
            return Err(ProtocolError::UnexpectedEof {
                needed,
                remaining: self.remaining(),
            });
        }
        Ok(())
    }
}
