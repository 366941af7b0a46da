use crate::{ByteRange, Error, Metadata};

/// Unpacker for the PE wrapper around the CLI metadata.
///
/// Only the pieces needed to locate the metadata blob are decoded:
/// the DOS/PE signatures, the optional header's data directories, and
/// the section table used to map virtual addresses back to file
/// offsets.
#[derive(Clone, Copy)]
pub struct PeFile<'a> {
    bytes: ByteRange<'a>,
}

#[derive(Clone, Copy)]
pub struct OptionalHeader<'a> {
    bytes: ByteRange<'a>,
    magic: OptionalHeaderMagic,
}

/// Magic value of the optional header, determining whether fields
/// after the standard section are laid out for 32-bit or 64-bit
/// addresses.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum OptionalHeaderMagic {
    PE32,
    PE32Plus,
}

#[derive(Clone, Copy)]
pub struct SectionHeader<'a> {
    bytes: ByteRange<'a>,
}

/// The CLR runtime header (ECMA-335, section II.25.3.3), pointed to
/// by data directory 14 of the optional header.
#[derive(Clone, Copy)]
pub struct ClrRuntimeHeader<'a> {
    bytes: ByteRange<'a>,
}

/// Index of the COM descriptor (CLR runtime header) entry within the
/// optional header's data directories.
const CLR_RUNTIME_HEADER_DIRECTORY: usize = 14;

impl<'a> PeFile<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes: ByteRange::new(bytes),
        }
    }

    /// Decode the CLI metadata embedded in this image.
    pub fn metadata(&self) -> Result<Metadata<'a>, Error> {
        Metadata::new(self.metadata_bytes()?)
    }

    /// Locate the raw metadata blob, by following the CLR runtime
    /// header's MetaData data directory.
    pub fn metadata_bytes(&self) -> Result<ByteRange<'a>, Error> {
        let clr_header = self.clr_runtime_header()?;
        let rva = clr_header.metadata_virtual_address()?;
        let size = clr_header.metadata_size()? as usize;
        let offset = self.virtual_address_to_offset(rva)?;
        self.bytes.subrange(offset..offset + size)
    }

    pub fn clr_runtime_header(
        &self,
    ) -> Result<ClrRuntimeHeader<'a>, Error> {
        let (rva, size) = self
            .optional_header()?
            .data_directory(CLR_RUNTIME_HEADER_DIRECTORY)?
            .ok_or(Error::MissingClrRuntimeHeader)?;
        let offset = self.virtual_address_to_offset(rva)?;
        let bytes = self.bytes.subrange(offset..offset + size as usize)?;
        ClrRuntimeHeader::new(bytes)
    }

    fn lfanew(&self) -> Result<usize, Error> {
        let sig = self.bytes.get_u16(0)?;
        // 'MZ'
        if sig != 0x5a4d {
            return Err(Error::IncorrectDOSSignature);
        }
        Ok(self.bytes.get_u32(60)? as usize)
    }

    /// Offset of the COFF header, just past the 4-byte PE signature.
    fn coff_header_offset(&self) -> Result<usize, Error> {
        let lfanew = self.lfanew()?;
        // 'PE\0\0'
        if self.bytes.get_u32(lfanew)? != 0x0000_4550 {
            return Err(Error::IncorrectPESignature);
        }
        Ok(lfanew + 4)
    }

    pub fn optional_header(&self) -> Result<OptionalHeader<'a>, Error> {
        let coff = self.coff_header_offset()?;
        let size = self.bytes.get_u16(coff + 16)? as usize;
        let bytes = self.bytes.subrange(coff + 20..coff + 20 + size)?;
        OptionalHeader::new(bytes)
    }

    pub fn num_sections(&self) -> Result<usize, Error> {
        let coff = self.coff_header_offset()?;
        Ok(self.bytes.get_u16(coff + 2)? as usize)
    }

    pub fn iter_section_headers(
        &self,
    ) -> Result<impl Iterator<Item = SectionHeader<'a>>, Error> {
        let coff = self.coff_header_offset()?;
        let optional_header_size = self.bytes.get_u16(coff + 16)? as usize;
        let num_sections = self.num_sections()?;

        let start = coff + 20 + optional_header_size;
        let section_table = self.bytes.subrange(
            start..start + num_sections * SectionHeader::SIZE,
        )?;

        let headers: Vec<_> = (0..num_sections)
            .map(|i_section| {
                let offset = i_section * SectionHeader::SIZE;
                section_table
                    .subrange(offset..offset + SectionHeader::SIZE)
                    .map(|bytes| SectionHeader { bytes })
            })
            .collect::<Result<_, _>>()?;

        Ok(headers.into_iter())
    }

    /// Resolve a relative virtual address to a file offset, through
    /// the section whose virtual range contains it.
    pub fn virtual_address_to_offset(
        &self,
        rva: u32,
    ) -> Result<usize, Error> {
        self.iter_section_headers()?
            .find_map(|section| section.map_address(rva).transpose())
            .ok_or(Error::InvalidVirtualAddress(rva))?
    }
}

impl<'a> OptionalHeader<'a> {
    fn new(bytes: ByteRange<'a>) -> Result<Self, Error> {
        let magic = match bytes.get_u16(0)? {
            0x10b => OptionalHeaderMagic::PE32,
            0x20b => OptionalHeaderMagic::PE32Plus,
            other => return Err(Error::InvalidMagicValue(other)),
        };
        Ok(Self { bytes, magic })
    }

    pub fn magic(&self) -> OptionalHeaderMagic {
        self.magic
    }

    pub fn num_data_directories(&self) -> Result<u32, Error> {
        let offset = match self.magic {
            OptionalHeaderMagic::PE32 => 92,
            OptionalHeaderMagic::PE32Plus => 108,
        };
        self.bytes.get_u32(offset)
    }

    /// Read data directory `index` as an `(rva, size)` pair.  A
    /// zeroed entry means the directory is absent, returned as None.
    pub fn data_directory(
        &self,
        index: usize,
    ) -> Result<Option<(u32, u32)>, Error> {
        if index >= 16 {
            return Err(Error::InvalidDataDirectoryIndex(index));
        }
        if index as u32 >= self.num_data_directories()? {
            return Ok(None);
        }

        let base = match self.magic {
            OptionalHeaderMagic::PE32 => 96,
            OptionalHeaderMagic::PE32Plus => 112,
        };
        let rva = self.bytes.get_u32(base + 8 * index)?;
        let size = self.bytes.get_u32(base + 8 * index + 4)?;
        if rva == 0 {
            Ok(None)
        } else {
            Ok(Some((rva, size)))
        }
    }
}

impl<'a> SectionHeader<'a> {
    pub const SIZE: usize = 40;

    pub fn virtual_size(&self) -> Result<u32, Error> {
        self.bytes.get_u32(8)
    }

    pub fn virtual_address(&self) -> Result<u32, Error> {
        self.bytes.get_u32(12)
    }

    pub fn raw_data_offset(&self) -> Result<u32, Error> {
        self.bytes.get_u32(20)
    }

    /// File offset of `rva`, if this section's virtual range contains
    /// it.
    pub fn map_address(&self, rva: u32) -> Result<Option<usize>, Error> {
        let virtual_address = self.virtual_address()?;
        let virtual_size = self.virtual_size()?;
        let contains = rva >= virtual_address
            && rva - virtual_address < virtual_size;
        if contains {
            // Widened before the add: a corrupt raw-data offset near
            // u32::MAX must surface as an out-of-range read, not
            // overflow here.
            let offset = self.raw_data_offset()? as usize
                + (rva - virtual_address) as usize;
            Ok(Some(offset))
        } else {
            Ok(None)
        }
    }
}

impl<'a> ClrRuntimeHeader<'a> {
    pub const SIZE: u32 = 72;

    fn new(bytes: ByteRange<'a>) -> Result<Self, Error> {
        let header = Self { bytes };
        let size = header.header_size()?;
        if size != Self::SIZE {
            return Err(Error::IncorrectClrHeaderSize(size));
        }
        Ok(header)
    }

    pub fn header_size(&self) -> Result<u32, Error> {
        self.bytes.get_u32(0)
    }

    pub fn metadata_virtual_address(&self) -> Result<u32, Error> {
        self.bytes.get_u32(8)
    }

    pub fn metadata_size(&self) -> Result<u32, Error> {
        self.bytes.get_u32(12)
    }
}
