use std::ops::Range;

use crate::Error;

/// A contiguous window into the backing image.
///
/// The `start` field tracks the window's offset within the original
/// image, so that errors produced deep inside a nested structure can
/// report an absolute file offset.  All reads are bounds-checked and
/// return `Error::UnexpectedEof` rather than panicking, since every
/// offset here is ultimately taken from the file being decoded.
#[derive(Clone, Copy, Debug)]
pub struct ByteRange<'a> {
    start: usize,
    bytes: &'a [u8],
}

impl<'a> ByteRange<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { start: 0, bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Offset of this window within the original image.
    pub fn start(&self) -> usize {
        self.start
    }

    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    fn get_bytes(&self, offset: usize, size: usize) -> Result<&'a [u8], Error> {
        let end = offset.checked_add(size).ok_or(Error::UnexpectedEof {
            offset: self.start + offset,
        })?;
        self.bytes.get(offset..end).ok_or(Error::UnexpectedEof {
            offset: self.start + offset,
        })
    }

    pub fn get_u8(&self, offset: usize) -> Result<u8, Error> {
        Ok(self.get_bytes(offset, 1)?[0])
    }

    pub fn get_u16(&self, offset: usize) -> Result<u16, Error> {
        let bytes = self.get_bytes(offset, 2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub fn get_u32(&self, offset: usize) -> Result<u32, Error> {
        let bytes = self.get_bytes(offset, 4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn get_u64(&self, offset: usize) -> Result<u64, Error> {
        let bytes = self.get_bytes(offset, 8)?;
        Ok(u64::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5],
            bytes[6], bytes[7],
        ]))
    }

    /// Read a little-endian unsigned value of 1, 2, 4, or 8 bytes,
    /// widened to u64.  Used by the row accessor, where the column
    /// width is data-dependent.
    pub fn get_uint(&self, offset: usize, size: usize) -> Result<u64, Error> {
        let bytes = self.get_bytes(offset, size)?;
        let mut value = 0u64;
        for (i, byte) in bytes.iter().enumerate() {
            value |= (*byte as u64) << (8 * i);
        }
        Ok(value)
    }

    pub fn subrange(&self, range: Range<usize>) -> Result<Self, Error> {
        if range.end < range.start {
            return Err(Error::UnexpectedEof {
                offset: self.start + range.end,
            });
        }
        let bytes =
            self.bytes
                .get(range.clone())
                .ok_or(Error::UnexpectedEof {
                    offset: self.start + range.end,
                })?;
        Ok(Self {
            start: self.start + range.start,
            bytes,
        })
    }

    pub fn subrange_from(&self, offset: usize) -> Result<Self, Error> {
        self.subrange(offset..self.len())
    }

    /// Read a NUL-terminated UTF-8 string starting at `offset`.  The
    /// terminator is not included in the result.
    pub fn get_null_terminated(
        &self,
        offset: usize,
    ) -> Result<&'a str, Error> {
        let remaining =
            self.bytes.get(offset..).ok_or(Error::UnexpectedEof {
                offset: self.start + offset,
            })?;
        let len = remaining.iter().position(|byte| *byte == 0).ok_or(
            Error::UnexpectedEof {
                offset: self.start + self.bytes.len(),
            },
        )?;
        Ok(std::str::from_utf8(&remaining[..len])?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_are_little_endian() {
        let bytes = [0x78, 0x56, 0x34, 0x12];
        let range = ByteRange::new(&bytes);
        assert_eq!(range.get_u16(0).unwrap(), 0x5678);
        assert_eq!(range.get_u32(0).unwrap(), 0x12345678);
        assert_eq!(range.get_uint(1, 2).unwrap(), 0x3456);
    }

    #[test]
    fn truncated_read_reports_absolute_offset() {
        let bytes = [0u8; 16];
        let range = ByteRange::new(&bytes);
        let subrange = range.subrange(8..16).unwrap();
        let err = subrange.get_u32(6).unwrap_err();
        assert!(matches!(err, Error::UnexpectedEof { offset: 14 }));
    }

    #[test]
    fn null_terminated_string() {
        let bytes = b"abc\0def\0";
        let range = ByteRange::new(bytes);
        assert_eq!(range.get_null_terminated(0).unwrap(), "abc");
        assert_eq!(range.get_null_terminated(4).unwrap(), "def");
        assert_eq!(range.get_null_terminated(3).unwrap(), "");
    }
}
