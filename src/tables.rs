use derive_more::Display;

use crate::coded_index::{
    CodedIndexKind, CustomAttributeType, HasConstant, HasCustomAttribute,
    HasDeclSecurity, HasFieldMarshal, HasSemantics, Implementation,
    MemberForwarded, MemberRefParent, MethodDefOrRef, ResolutionScope,
    TypeDefOrRef, TypeOrMethodDef,
};
use crate::{ByteRange, Error};

/// The 38 logical metadata tables of ECMA-335, section II.22.  The
/// discriminant of each variant is the table's ordinal, used both as
/// its bit position in the `Valid`/`Sorted` bitmaps and as its layout
/// order within the `#~` stream.  Ordinals 0x03, 0x05, 0x07, 0x13,
/// 0x16, 0x1e, and 0x1f are unused by the standard.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Display)]
pub enum MetadataTableKind {
    Module = 0x00,
    TypeRef = 0x01,
    TypeDef = 0x02,
    Field = 0x04,
    MethodDef = 0x06,
    Param = 0x08,
    InterfaceImpl = 0x09,
    MemberRef = 0x0a,
    Constant = 0x0b,
    CustomAttribute = 0x0c,
    FieldMarshal = 0x0d,
    DeclSecurity = 0x0e,
    ClassLayout = 0x0f,
    FieldLayout = 0x10,
    StandAloneSig = 0x11,
    EventMap = 0x12,
    Event = 0x14,
    PropertyMap = 0x15,
    Property = 0x17,
    MethodSemantics = 0x18,
    MethodImpl = 0x19,
    ModuleRef = 0x1a,
    TypeSpec = 0x1b,
    ImplMap = 0x1c,
    FieldRva = 0x1d,
    Assembly = 0x20,
    AssemblyProcessor = 0x21,
    AssemblyOs = 0x22,
    AssemblyRef = 0x23,
    AssemblyRefProcessor = 0x24,
    AssemblyRefOs = 0x25,
    File = 0x26,
    ExportedType = 0x27,
    ManifestResource = 0x28,
    NestedClass = 0x29,
    GenericParam = 0x2a,
    MethodSpec = 0x2b,
    GenericParamConstraint = 0x2c,
}

impl MetadataTableKind {
    pub const COUNT: usize = 38;

    /// All tables, in ascending ordinal order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::Module,
        Self::TypeRef,
        Self::TypeDef,
        Self::Field,
        Self::MethodDef,
        Self::Param,
        Self::InterfaceImpl,
        Self::MemberRef,
        Self::Constant,
        Self::CustomAttribute,
        Self::FieldMarshal,
        Self::DeclSecurity,
        Self::ClassLayout,
        Self::FieldLayout,
        Self::StandAloneSig,
        Self::EventMap,
        Self::Event,
        Self::PropertyMap,
        Self::Property,
        Self::MethodSemantics,
        Self::MethodImpl,
        Self::ModuleRef,
        Self::TypeSpec,
        Self::ImplMap,
        Self::FieldRva,
        Self::Assembly,
        Self::AssemblyProcessor,
        Self::AssemblyOs,
        Self::AssemblyRef,
        Self::AssemblyRefProcessor,
        Self::AssemblyRefOs,
        Self::File,
        Self::ExportedType,
        Self::ManifestResource,
        Self::NestedClass,
        Self::GenericParam,
        Self::MethodSpec,
        Self::GenericParamConstraint,
    ];

    pub fn from_bit_index(bit: u8) -> Result<Self, Error> {
        match bit {
            0x00 => Ok(Self::Module),
            0x01 => Ok(Self::TypeRef),
            0x02 => Ok(Self::TypeDef),
            0x04 => Ok(Self::Field),
            0x06 => Ok(Self::MethodDef),
            0x08 => Ok(Self::Param),
            0x09 => Ok(Self::InterfaceImpl),
            0x0a => Ok(Self::MemberRef),
            0x0b => Ok(Self::Constant),
            0x0c => Ok(Self::CustomAttribute),
            0x0d => Ok(Self::FieldMarshal),
            0x0e => Ok(Self::DeclSecurity),
            0x0f => Ok(Self::ClassLayout),
            0x10 => Ok(Self::FieldLayout),
            0x11 => Ok(Self::StandAloneSig),
            0x12 => Ok(Self::EventMap),
            0x14 => Ok(Self::Event),
            0x15 => Ok(Self::PropertyMap),
            0x17 => Ok(Self::Property),
            0x18 => Ok(Self::MethodSemantics),
            0x19 => Ok(Self::MethodImpl),
            0x1a => Ok(Self::ModuleRef),
            0x1b => Ok(Self::TypeSpec),
            0x1c => Ok(Self::ImplMap),
            0x1d => Ok(Self::FieldRva),
            0x20 => Ok(Self::Assembly),
            0x21 => Ok(Self::AssemblyProcessor),
            0x22 => Ok(Self::AssemblyOs),
            0x23 => Ok(Self::AssemblyRef),
            0x24 => Ok(Self::AssemblyRefProcessor),
            0x25 => Ok(Self::AssemblyRefOs),
            0x26 => Ok(Self::File),
            0x27 => Ok(Self::ExportedType),
            0x28 => Ok(Self::ManifestResource),
            0x29 => Ok(Self::NestedClass),
            0x2a => Ok(Self::GenericParam),
            0x2b => Ok(Self::MethodSpec),
            0x2c => Ok(Self::GenericParamConstraint),
            other => Err(Error::InvalidMetadataTable(other)),
        }
    }

    pub fn bit_index(self) -> u8 {
        self as u8
    }

    /// Dense index in the range `0..COUNT`, skipping the ordinal
    /// holes.  Used to index per-table arrays.
    pub(crate) fn index(self) -> usize {
        let bit = self as u8;
        let holes_below = match bit {
            0x00..=0x02 => 0,
            0x03..=0x04 => 1,
            0x05..=0x06 => 2,
            0x07..=0x12 => 3,
            0x13..=0x15 => 4,
            0x16..=0x1d => 5,
            _ => 7,
        };
        (bit as usize) - holes_below
    }
}

/// The `HeapSizes` flag byte of the `#~` header: each set bit widens
/// the corresponding heap's index columns from 2 bytes to 4.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct HeapSizes(pub u8);

impl HeapSizes {
    pub fn string_index_size(self) -> u32 {
        if self.0 & 0x1 != 0 {
            4
        } else {
            2
        }
    }

    pub fn guid_index_size(self) -> u32 {
        if self.0 & 0x2 != 0 {
            4
        } else {
            2
        }
    }

    pub fn blob_index_size(self) -> u32 {
        if self.0 & 0x4 != 0 {
            4
        } else {
            2
        }
    }
}

/// Per-table row counts, the only input (besides `HeapSizes`) that
/// the column-layout computation depends on.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct RowCounts([u32; MetadataTableKind::COUNT]);

impl Default for RowCounts {
    fn default() -> Self {
        Self([0; MetadataTableKind::COUNT])
    }
}

impl RowCounts {
    pub fn num_rows(&self, kind: MetadataTableKind) -> u32 {
        self.0[kind.index()]
    }

    pub fn set_num_rows(&mut self, kind: MetadataTableKind, rows: u32) {
        self.0[kind.index()] = rows;
    }

    /// Width of a plain index into `kind`: 2 bytes unless the table
    /// has 2^16 rows or more.
    pub fn index_size(&self, kind: MetadataTableKind) -> u32 {
        if self.num_rows(kind) < (1 << 16) {
            2
        } else {
            4
        }
    }

    /// Width of a coded index over `targets`.  The packed value must
    /// hold both the tag and a 1-based row index, so every target
    /// table's row count must fit in the bits left over after the tag
    /// for the narrow encoding to be usable.  Reserved (`None`) and
    /// absent targets count as zero rows, but still widen the tag.
    pub fn coded_index_size(
        &self,
        targets: &[Option<MetadataTableKind>],
    ) -> u32 {
        let tag_bits = (targets.len() as u32)
            .next_power_of_two()
            .trailing_zeros();
        let all_small = targets.iter().all(|target| {
            let num_rows =
                target.map(|kind| self.num_rows(kind)).unwrap_or(0);
            (num_rows as u64) < (1u64 << (16 - tag_bits))
        });
        if all_small {
            2
        } else {
            4
        }
    }
}

/// One column of a table row.  `size == 0` means the column is not
/// present for this table.
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct Column {
    /// Byte offset within the row.
    pub offset: u32,
    /// Width in bytes: 2, 4, or 8 for present columns.
    pub size: u32,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Table {
    pub kind: MetadataTableKind,

    /// Byte offset of the table's first row within the `#~` stream.
    pub offset: usize,

    pub num_rows: u32,
    pub row_size: u32,
    pub columns: [Column; 6],
}

impl Table {
    fn new(kind: MetadataTableKind, num_rows: u32, sizes: [u32; 6]) -> Self {
        let mut columns = [Column::default(); 6];
        let mut row_size = 0;
        for (column, size) in columns.iter_mut().zip(sizes) {
            *column = Column {
                offset: row_size,
                size,
            };
            row_size += size;
        }
        Self {
            kind,
            offset: 0,
            num_rows,
            row_size,
            columns,
        }
    }
}

/// The decoded `#~` stream: its fixed header, the sparse row-count
/// vector, and the computed byte layout of every table.
pub struct TablesHeader<'a> {
    bytes: ByteRange<'a>,

    pub major_version: u8,
    pub minor_version: u8,
    pub heap_sizes: HeapSizes,

    /// Bitmaps indexed by table ordinal.
    pub valid: u64,
    pub sorted: u64,

    tables: [Table; MetadataTableKind::COUNT],
}

impl<'a> TablesHeader<'a> {
    pub fn new(bytes: ByteRange<'a>) -> Result<Self, Error> {
        let major_version = bytes.get_u8(4)?;
        let minor_version = bytes.get_u8(5)?;
        let heap_sizes = HeapSizes(bytes.get_u8(6)?);
        let valid = bytes.get_u64(8)?;
        let sorted = bytes.get_u64(16)?;

        // The row-count vector is sparse: only tables whose Valid bit
        // is set contribute an entry, in ascending ordinal order.
        let mut row_counts = RowCounts::default();
        let mut offset = 24;
        for bit in 0..64 {
            if valid >> bit & 1 == 0 {
                continue;
            }
            let kind = MetadataTableKind::from_bit_index(bit)?;
            row_counts.set_num_rows(kind, bytes.get_u32(offset)?);
            offset += 4;
        }

        let tables = compute_layout(heap_sizes, &row_counts, offset);

        Ok(Self {
            bytes,
            major_version,
            minor_version,
            heap_sizes,
            valid,
            sorted,
            tables,
        })
    }

    pub fn table(&self, kind: MetadataTableKind) -> &Table {
        &self.tables[kind.index()]
    }

    pub fn num_rows(&self, kind: MetadataTableKind) -> u32 {
        self.table(kind).num_rows
    }

    /// Read column `column` of row `row` (0-based) as a little-endian
    /// unsigned value, widened to u64.
    pub fn get_value(
        &self,
        kind: MetadataTableKind,
        row: u32,
        column: usize,
    ) -> Result<u64, Error> {
        let table = self.table(kind);
        if row >= table.num_rows {
            return Err(Error::RowOutOfRange {
                kind,
                row,
                num_rows: table.num_rows,
            });
        }
        let Column { offset, size } = *table
            .columns
            .get(column)
            .ok_or(Error::ColumnNotPresent { kind, column })?;
        if size == 0 {
            return Err(Error::ColumnNotPresent { kind, column });
        }

        let byte_offset = table.offset
            + (row as usize) * (table.row_size as usize)
            + offset as usize;
        self.bytes.get_uint(byte_offset, size as usize)
    }
}

/// Compute every table's column layout and byte offset from the heap
/// widths and row counts.  Pure: decoding the same header twice
/// yields identical layouts.
///
/// Tables absent from the metadata still get a layout (with zero
/// rows, they occupy no bytes), and their zero row counts still
/// participate in the coded-index width computation.
pub fn compute_layout(
    heap_sizes: HeapSizes,
    row_counts: &RowCounts,
    base_offset: usize,
) -> [Table; MetadataTableKind::COUNT] {
    use MetadataTableKind as K;

    let str_ = heap_sizes.string_index_size();
    let guid = heap_sizes.guid_index_size();
    let blob = heap_sizes.blob_index_size();

    let type_def_or_ref = row_counts.coded_index_size(TypeDefOrRef::TABLES);
    let has_constant = row_counts.coded_index_size(HasConstant::TABLES);
    let has_custom_attribute =
        row_counts.coded_index_size(HasCustomAttribute::TABLES);
    let has_field_marshal =
        row_counts.coded_index_size(HasFieldMarshal::TABLES);
    let has_decl_security =
        row_counts.coded_index_size(HasDeclSecurity::TABLES);
    let member_ref_parent =
        row_counts.coded_index_size(MemberRefParent::TABLES);
    let has_semantics = row_counts.coded_index_size(HasSemantics::TABLES);
    let method_def_or_ref =
        row_counts.coded_index_size(MethodDefOrRef::TABLES);
    let member_forwarded =
        row_counts.coded_index_size(MemberForwarded::TABLES);
    let implementation = row_counts.coded_index_size(Implementation::TABLES);
    let custom_attribute_type =
        row_counts.coded_index_size(CustomAttributeType::TABLES);
    let resolution_scope =
        row_counts.coded_index_size(ResolutionScope::TABLES);
    let type_or_method_def =
        row_counts.coded_index_size(TypeOrMethodDef::TABLES);

    let index = |kind: MetadataTableKind| row_counts.index_size(kind);

    // Fixed per-table column widths, ECMA-335 section II.22.  A zero
    // entry means the table has fewer than six columns.
    let column_sizes = |kind: MetadataTableKind| -> [u32; 6] {
        match kind {
            K::Module => [2, str_, guid, guid, guid, 0],
            K::TypeRef => [resolution_scope, str_, str_, 0, 0, 0],
            K::TypeDef => [
                4,
                str_,
                str_,
                type_def_or_ref,
                index(K::Field),
                index(K::MethodDef),
            ],
            K::Field => [2, str_, blob, 0, 0, 0],
            K::MethodDef => [4, 2, 2, str_, blob, index(K::Param)],
            K::Param => [2, 2, str_, 0, 0, 0],
            K::InterfaceImpl => {
                [index(K::TypeDef), type_def_or_ref, 0, 0, 0, 0]
            }
            K::MemberRef => [member_ref_parent, str_, blob, 0, 0, 0],
            K::Constant => [2, has_constant, blob, 0, 0, 0],
            K::CustomAttribute => {
                [has_custom_attribute, custom_attribute_type, blob, 0, 0, 0]
            }
            K::FieldMarshal => [has_field_marshal, blob, 0, 0, 0, 0],
            K::DeclSecurity => [2, has_decl_security, blob, 0, 0, 0],
            K::ClassLayout => [2, 4, index(K::TypeDef), 0, 0, 0],
            K::FieldLayout => [4, index(K::Field), 0, 0, 0, 0],
            K::StandAloneSig => [blob, 0, 0, 0, 0, 0],
            K::EventMap => {
                [index(K::TypeDef), index(K::Event), 0, 0, 0, 0]
            }
            K::Event => [2, str_, type_def_or_ref, 0, 0, 0],
            K::PropertyMap => {
                [index(K::TypeDef), index(K::Property), 0, 0, 0, 0]
            }
            K::Property => [2, str_, blob, 0, 0, 0],
            K::MethodSemantics => {
                [2, index(K::MethodDef), has_semantics, 0, 0, 0]
            }
            K::MethodImpl => [
                index(K::TypeDef),
                method_def_or_ref,
                method_def_or_ref,
                0,
                0,
                0,
            ],
            K::ModuleRef => [str_, 0, 0, 0, 0, 0],
            K::TypeSpec => [blob, 0, 0, 0, 0, 0],
            K::ImplMap => {
                [2, member_forwarded, str_, index(K::ModuleRef), 0, 0]
            }
            K::FieldRva => [4, index(K::Field), 0, 0, 0, 0],
            K::Assembly => [4, 8, 4, blob, str_, str_],
            K::AssemblyProcessor => [4, 0, 0, 0, 0, 0],
            K::AssemblyOs => [4, 4, 4, 0, 0, 0],
            K::AssemblyRef => [8, 4, blob, str_, str_, blob],
            K::AssemblyRefProcessor => {
                [4, index(K::AssemblyRef), 0, 0, 0, 0]
            }
            K::AssemblyRefOs => [4, 4, 4, index(K::AssemblyRef), 0, 0],
            K::File => [4, str_, blob, 0, 0, 0],
            K::ExportedType => [4, 4, str_, str_, implementation, 0],
            K::ManifestResource => [4, 4, str_, implementation, 0, 0],
            K::NestedClass => {
                [index(K::TypeDef), index(K::TypeDef), 0, 0, 0, 0]
            }
            K::GenericParam => [2, 2, type_or_method_def, str_, 0, 0],
            K::MethodSpec => [method_def_or_ref, blob, 0, 0, 0, 0],
            K::GenericParamConstraint => {
                [index(K::GenericParam), type_def_or_ref, 0, 0, 0, 0]
            }
        }
    };

    let mut tables = MetadataTableKind::ALL.map(|kind| {
        Table::new(kind, row_counts.num_rows(kind), column_sizes(kind))
    });

    // Tables are stored back to back in ascending ordinal order,
    // starting immediately after the row-count vector.
    let mut offset = base_offset;
    for table in tables.iter_mut() {
        table.offset = offset;
        offset += (table.num_rows as usize) * (table.row_size as usize);
    }

    tables
}

#[cfg(test)]
mod tests {
    use itertools::Itertools as _;

    use super::*;

    fn row_counts(counts: &[(MetadataTableKind, u32)]) -> RowCounts {
        let mut row_counts = RowCounts::default();
        for (kind, count) in counts {
            row_counts.set_num_rows(*kind, *count);
        }
        row_counts
    }

    #[test]
    fn narrow_module_row() {
        let counts = row_counts(&[(MetadataTableKind::Module, 1)]);
        let tables = compute_layout(HeapSizes(0), &counts, 28);
        let module = &tables[MetadataTableKind::Module.index()];
        // Generation(2) + Name(2) + three GUID indices(2 each)
        assert_eq!(module.row_size, 10);
        assert_eq!(module.columns[4], Column { offset: 8, size: 2 });
        assert_eq!(module.columns[5], Column { offset: 10, size: 0 });
    }

    #[test]
    fn wide_heaps_widen_heap_columns() {
        let counts = row_counts(&[(MetadataTableKind::Module, 1)]);
        let tables = compute_layout(HeapSizes(0x7), &counts, 28);
        let module = &tables[MetadataTableKind::Module.index()];
        assert_eq!(module.row_size, 2 + 4 + 4 + 4 + 4);
    }

    #[test]
    fn large_target_table_widens_coded_index() {
        let narrow = row_counts(&[
            (MetadataTableKind::TypeDef, 100),
            (MetadataTableKind::TypeRef, 100),
        ]);
        // TypeDefOrRef carries a 2-bit tag, so any target with 2^14
        // rows or more forces the wide form.
        let wide = row_counts(&[
            (MetadataTableKind::TypeDef, 100),
            (MetadataTableKind::TypeRef, 100),
            (MetadataTableKind::TypeSpec, 1 << 14),
        ]);

        assert_eq!(narrow.coded_index_size(TypeDefOrRef::TABLES), 2);
        assert_eq!(wide.coded_index_size(TypeDefOrRef::TABLES), 4);

        let narrow_tables = compute_layout(HeapSizes(0), &narrow, 28);
        let wide_tables = compute_layout(HeapSizes(0), &wide, 28);
        let type_def = MetadataTableKind::TypeDef.index();
        assert_eq!(narrow_tables[type_def].columns[3].size, 2);
        assert_eq!(wide_tables[type_def].columns[3].size, 4);
    }

    #[test]
    fn large_simple_target_widens_list_column() {
        let counts = row_counts(&[
            (MetadataTableKind::TypeDef, 10),
            (MetadataTableKind::Field, 1 << 16),
        ]);
        let tables = compute_layout(HeapSizes(0), &counts, 28);
        let type_def = &tables[MetadataTableKind::TypeDef.index()];
        // FieldList widens, MethodList stays narrow
        assert_eq!(type_def.columns[4].size, 4);
        assert_eq!(type_def.columns[5].size, 2);
    }

    #[test]
    fn tables_are_laid_out_without_gaps() {
        let counts = row_counts(&[
            (MetadataTableKind::Module, 1),
            (MetadataTableKind::TypeRef, 40),
            (MetadataTableKind::TypeDef, 12),
            (MetadataTableKind::Field, 7),
            (MetadataTableKind::MethodDef, 33),
            (MetadataTableKind::Assembly, 1),
        ]);
        let tables = compute_layout(HeapSizes(0), &counts, 48);

        assert_eq!(tables[0].offset, 48);
        tables.iter().tuple_windows().for_each(|(prev, next)| {
            assert_eq!(
                prev.offset
                    + (prev.num_rows as usize) * (prev.row_size as usize),
                next.offset
            );
        });
    }

    #[test]
    fn layout_is_idempotent() {
        let counts = row_counts(&[
            (MetadataTableKind::Module, 1),
            (MetadataTableKind::TypeDef, 500),
            (MetadataTableKind::MethodDef, 70_000),
        ]);
        let first = compute_layout(HeapSizes(0x4), &counts, 32);
        let second = compute_layout(HeapSizes(0x4), &counts, 32);
        assert_eq!(first, second);
    }

    #[test]
    fn dense_index_is_a_bijection() {
        for (i, kind) in MetadataTableKind::ALL.into_iter().enumerate() {
            assert_eq!(kind.index(), i);
            assert_eq!(
                MetadataTableKind::from_bit_index(kind.bit_index()).unwrap(),
                kind
            );
        }
    }
}
