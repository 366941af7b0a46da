use crate::{ByteRange, Error, TablesHeader};

/// The CLI metadata blob: the metadata root (ECMA-335, section
/// II.24.2.1) followed by its streams.  Decoding the root happens
/// once, at construction; heap lookups afterward are random-access
/// reads against the stream byte ranges.
#[derive(Clone, Debug)]
pub struct Metadata<'a> {
    bytes: ByteRange<'a>,
    root: MetadataRoot<'a>,
}

#[derive(Clone, Debug)]
pub struct MetadataRoot<'a> {
    pub major_version: u16,
    pub minor_version: u16,
    pub reserved: u32,

    /// Human-readable runtime version, stored null-padded to a 4-byte
    /// boundary.  Trailing NULs are trimmed.
    pub version: &'a str,

    pub flags: u16,
    pub stream_headers: Vec<StreamHeader<'a>>,
}

#[derive(Clone, Copy, Debug)]
pub struct StreamHeader<'a> {
    /// Offset of the stream, relative to the start of the metadata
    /// blob.
    pub offset: u32,
    pub size: u32,
    pub name: &'a str,
}

impl<'a> Metadata<'a> {
    pub fn new(bytes: ByteRange<'a>) -> Result<Self, Error> {
        let root = MetadataRoot::new(bytes)?;
        Ok(Self { bytes, root })
    }

    pub fn root(&self) -> &MetadataRoot<'a> {
        &self.root
    }

    pub fn stream(&self, name: &'static str) -> Result<ByteRange<'a>, Error> {
        let header = self
            .root
            .stream_headers
            .iter()
            .find(|header| header.name == name)
            .ok_or(Error::MissingStream(name))?;
        let start = header.offset as usize;
        self.bytes.subrange(start..start + header.size as usize)
    }

    pub fn tables_header(&self) -> Result<TablesHeader<'a>, Error> {
        TablesHeader::new(self.stream("#~")?)
    }

    /// Read a NUL-terminated UTF-8 string from the `#Strings` heap.
    pub fn read_string(&self, index: u32) -> Result<&'a str, Error> {
        self.stream("#Strings")?.get_null_terminated(index as usize)
    }

    /// Read a length-prefixed byte run from the `#Blob` heap.  The
    /// prefix uses the compressed-integer scheme of ECMA-335, section
    /// II.24.2.4.
    pub fn read_blob(&self, index: u32) -> Result<&'a [u8], Error> {
        let heap = self.stream("#Blob")?;
        let index = index as usize;

        let byte = heap.get_u8(index)?;
        let leading_ones = byte.leading_ones();
        let (header_size, size) = match leading_ones {
            0 => {
                let size: usize = (byte & 0x7f).into();
                (1, size)
            }
            1 => {
                let high: usize = (byte & 0x3f).into();
                let low: usize = heap.get_u8(index + 1)?.into();
                (2, (high << 8) + low)
            }
            2 => {
                let high: usize = (byte & 0x1f).into();
                let mid1: usize = heap.get_u8(index + 1)?.into();
                let mid2: usize = heap.get_u8(index + 2)?.into();
                let low: usize = heap.get_u8(index + 3)?.into();
                (4, (high << 24) + (mid1 << 16) + (mid2 << 8) + low)
            }
            _ => {
                return Err(Error::InvalidBlobHeader { leading_ones });
            }
        };

        let start = index + header_size;
        Ok(heap.subrange(start..start + size)?.bytes())
    }

    /// Read a 16-byte GUID from the `#GUID` heap.  Indices are
    /// 1-based; index 0 denotes the null GUID and is never read.
    pub fn read_guid(&self, index: u32) -> Result<Option<&'a [u8]>, Error> {
        if index == 0 {
            return Ok(None);
        }
        let heap = self.stream("#GUID")?;
        let start = (index as usize - 1) * 16;
        Ok(Some(heap.subrange(start..start + 16)?.bytes()))
    }
}

impl<'a> MetadataRoot<'a> {
    fn new(bytes: ByteRange<'a>) -> Result<Self, Error> {
        // 'BSJB'
        if bytes.get_u32(0)? != 0x424a_5342 {
            return Err(Error::IncorrectMetadataSignature);
        }

        let major_version = bytes.get_u16(4)?;
        let minor_version = bytes.get_u16(6)?;
        let reserved = bytes.get_u32(8)?;

        // The stored length is already padded to a 4-byte boundary by
        // the producer, and is not re-rounded here.
        let version_len = bytes.get_u32(12)? as usize;
        let version_bytes = bytes.subrange(16..16 + version_len)?;
        let version = std::str::from_utf8(version_bytes.bytes())?
            .trim_end_matches('\0');

        let after_version = 16 + version_len;
        let flags = bytes.get_u16(after_version)?;
        let num_streams = bytes.get_u16(after_version + 2)?;

        let mut offset = after_version + 4;
        let stream_headers = (0..num_streams)
            .map(|_| {
                let (header, next) = StreamHeader::new(bytes, offset)?;
                offset = next;
                Ok(header)
            })
            .collect::<Result<_, Error>>()?;

        Ok(Self {
            major_version,
            minor_version,
            reserved,
            version,
            flags,
            stream_headers,
        })
    }
}

impl<'a> StreamHeader<'a> {
    /// Decode one stream header starting at `offset`, returning the
    /// header and the offset of the next one.
    fn new(
        bytes: ByteRange<'a>,
        offset: usize,
    ) -> Result<(Self, usize), Error> {
        let stream_offset = bytes.get_u32(offset)?;
        let size = bytes.get_u32(offset + 4)?;

        // The name is stored null-padded to a 4-byte boundary, at
        // most 32 bytes.  Scan chunk by chunk for the terminator;
        // bytes of the final chunk past the NUL are padding.
        let name_start = offset + 8;
        let mut chunk_start = name_start;
        let (name_len, next_offset) = loop {
            if chunk_start == name_start + 32 {
                return Err(Error::InvalidStreamName);
            }
            let chunk = bytes.subrange(chunk_start..chunk_start + 4)?;
            if let Some(i) =
                chunk.bytes().iter().position(|byte| *byte == 0)
            {
                break (chunk_start + i - name_start, chunk_start + 4);
            }
            chunk_start += 4;
        };

        let name_bytes =
            bytes.subrange(name_start..name_start + name_len)?;
        let name = std::str::from_utf8(name_bytes.bytes())?;

        Ok((
            Self {
                offset: stream_offset,
                size,
                name,
            },
            next_offset,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata_root_bytes() -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"BSJB");
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());

        let version = b"WindowsRuntime 1.4";
        let padded_len = (version.len() + 3) / 4 * 4;
        bytes.extend_from_slice(&(padded_len as u32).to_le_bytes());
        bytes.extend_from_slice(version);
        bytes.resize(bytes.len() + padded_len - version.len(), 0);

        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());

        // One stream header, '#Strings' at offset 64
        bytes.extend_from_slice(&64u32.to_le_bytes());
        bytes.extend_from_slice(&8u32.to_le_bytes());
        bytes.extend_from_slice(b"#Strings");
        bytes.extend_from_slice(&[0, 0, 0, 0]);

        bytes.resize(64, 0);
        bytes.extend_from_slice(b"\0abc\0de\0");
        bytes
    }

    #[test]
    fn decode_metadata_root() {
        let bytes = metadata_root_bytes();
        let metadata = Metadata::new(ByteRange::new(&bytes)).unwrap();
        let root = metadata.root();
        assert_eq!(root.major_version, 1);
        assert_eq!(root.version, "WindowsRuntime 1.4");
        assert_eq!(root.stream_headers.len(), 1);
        assert_eq!(root.stream_headers[0].name, "#Strings");
        assert_eq!(root.stream_headers[0].offset, 64);
    }

    #[test]
    fn read_string_heap() {
        let bytes = metadata_root_bytes();
        let metadata = Metadata::new(ByteRange::new(&bytes)).unwrap();
        assert_eq!(metadata.read_string(0).unwrap(), "");
        assert_eq!(metadata.read_string(1).unwrap(), "abc");
        assert_eq!(metadata.read_string(5).unwrap(), "de");
    }

    #[test]
    fn unterminated_stream_name() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"BSJB");
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&4u32.to_le_bytes());
        bytes.extend_from_slice(b"v1\0\0");
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());

        // Stream header whose 32-byte name field has no NUL at all
        bytes.extend_from_slice(&64u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&[b'A'; 32]);

        let err = Metadata::new(ByteRange::new(&bytes)).unwrap_err();
        assert!(matches!(err, Error::InvalidStreamName));
    }

    #[test]
    fn incorrect_signature() {
        let mut bytes = metadata_root_bytes();
        bytes[0] = b'X';
        let err = Metadata::new(ByteRange::new(&bytes)).unwrap_err();
        assert!(matches!(err, Error::IncorrectMetadataSignature));
    }
}
