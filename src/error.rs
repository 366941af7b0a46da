use thiserror::Error;

use crate::tables::MetadataTableKind;

#[derive(Error)]
pub enum Error {
    #[error("Unexpected end of input at offset {offset}")]
    UnexpectedEof { offset: usize },

    #[error("InvalidUTF8")]
    InvalidUTF8(#[from] std::str::Utf8Error),

    #[error("IncorrectDOSSignature")]
    IncorrectDOSSignature,

    #[error("IncorrectPESignature")]
    IncorrectPESignature,

    #[error(
        "InvalidMagicValue(0x{0:x}), should be 0x10b (PE32) or 0x20b (PE32+)"
    )]
    InvalidMagicValue(u16),

    #[error("Invalid data directory {0}, should be in range [0,16)")]
    InvalidDataDirectoryIndex(usize),

    #[error("The CLR runtime header was not found")]
    MissingClrRuntimeHeader,

    #[error(
        "CLR runtime header reports size {0}, \
         but the header is defined to be 72 bytes \
         (ECMA-335, section II.25.3.3)"
    )]
    IncorrectClrHeaderSize(u32),

    #[error("Virtual address 0x{0:x} was not found in any section")]
    InvalidVirtualAddress(u32),

    #[error("IncorrectMetadataSignature")]
    IncorrectMetadataSignature,

    #[error(
        "Stream name must contain a NUL terminator \
         within its first 32 bytes (ECMA-335, section II.24.2.2)"
    )]
    InvalidStreamName,

    #[error("No stream header was found with name '{0}'")]
    MissingStream(&'static str),

    #[error(
        "Table 0x{0:x} is marked as present, \
         but no metadata table uses this value"
    )]
    InvalidMetadataTable(u8),

    #[error(
        "Row {row} is out of bounds for table {kind}, \
         which only has {num_rows} rows."
    )]
    RowOutOfRange {
        kind: MetadataTableKind,
        row: u32,
        num_rows: u32,
    },

    #[error("Column {column} is not present in table {kind}")]
    ColumnNotPresent {
        kind: MetadataTableKind,
        column: usize,
    },

    #[error(
        "Blob header must start with 0, 1, or 2 leading ones, \
         but header had {leading_ones} leading ones."
    )]
    InvalidBlobHeader { leading_ones: u32 },

    #[error("Reached the end of data while parsing signature.")]
    UnexpectedEndOfSignature,

    #[error(
        "Compressed values (ECMA-335, section II.23.2) \
         must start with 0, 1, or 2 leading ones, \
         but instead found {leading_ones} leading ones."
    )]
    InvalidCompressedValue { leading_ones: u32 },

    #[error(
        "Value 0x{0:02x} does not correspond to any ELEMENT_TYPE \
         (ECMA-335, section II.23.1.16)."
    )]
    InvalidElementType(u32),

    #[error(
        "Lowest 4 bits of first byte of a field signature \
         must be 0x6, but instead found {0}."
    )]
    InvalidFieldSignature(u32),

    #[error(
        "Coded index tag {tag} out of range, \
         only {num_tables} tables in tag list"
    )]
    InvalidCodedIndex { tag: u32, num_tables: usize },

    #[error("Coded index points to a reserved table entry.")]
    CodedIndexRefersToReservedTableIndex,

    #[error(
        "Coded index is zero, which is reserved for NULL references, \
         but occurred in a context that requires a valid reference."
    )]
    UnexpectedNullCodedIndex,

    #[error(
        "TypeSpec references are not supported \
         when resolving a type's namespace/name"
    )]
    UnsupportedTypeSpec,

    #[error("Type {namespace}.{name} was not found in the TypeDef table")]
    TypeNotFound { namespace: String, name: String },

    #[error(
        "ResolutionScope chain starting at TypeRef row {row} \
         revisits an earlier TypeRef, and cannot resolve"
    )]
    CyclicTypeRefChain { row: u32 },
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}
