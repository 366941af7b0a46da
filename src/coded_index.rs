use std::marker::PhantomData;

use crate::{Error, MetadataTableKind};

/// Marker trait for the tagged-union index families of ECMA-335,
/// section II.24.2.6.  Each implementor names the fixed, ordered list
/// of tables its tag may select.  Reserved tag values (present only
/// in `CustomAttributeType`) are `None` entries: they widen the tag
/// but may never be referenced.
pub trait CodedIndexKind {
    const TABLES: &'static [Option<MetadataTableKind>];

    /// Number of low bits used by the tag.
    fn tag_bits() -> u32 {
        (Self::TABLES.len() as u32)
            .next_power_of_two()
            .trailing_zeros()
    }
}

/// A decoded coded index: a table tag packed with a 1-based row
/// index.  A stored row of zero denotes a null reference.
pub struct CodedIndex<K> {
    raw: u32,
    _kind: PhantomData<K>,
}

impl<K> Clone for CodedIndex<K> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<K> Copy for CodedIndex<K> {}

impl<K> PartialEq for CodedIndex<K> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}
impl<K> Eq for CodedIndex<K> {}

impl<K: CodedIndexKind> CodedIndex<K> {
    pub fn new(raw: u32) -> Self {
        Self {
            raw,
            _kind: PhantomData,
        }
    }

    /// Pack a `(table, row)` pair, with `row` 0-based.  Encoding a
    /// table outside this index family's tag list is a contract
    /// violation by the caller, not a recoverable decode error.
    pub fn encode(table: MetadataTableKind, row: u32) -> Self {
        let tag = K::TABLES
            .iter()
            .position(|entry| *entry == Some(table))
            .unwrap_or_else(|| {
                panic!("Table {table} is not a member of this coded index")
            });
        Self::new(((row + 1) << K::tag_bits()) | tag as u32)
    }

    pub fn raw(&self) -> u32 {
        self.raw
    }

    pub fn tag(&self) -> u32 {
        self.raw & ((1 << K::tag_bits()) - 1)
    }

    /// The table selected by the tag.
    pub fn table(&self) -> Result<MetadataTableKind, Error> {
        let tag = self.tag();
        K::TABLES
            .get(tag as usize)
            .ok_or(Error::InvalidCodedIndex {
                tag,
                num_tables: K::TABLES.len(),
            })?
            .ok_or(Error::CodedIndexRefersToReservedTableIndex)
    }

    /// The 0-based row, or None for a null reference.
    pub fn row(&self) -> Option<u32> {
        (self.raw >> K::tag_bits()).checked_sub(1)
    }

    pub fn is_null(&self) -> bool {
        self.raw >> K::tag_bits() == 0
    }

    pub fn expect_row(&self) -> Result<u32, Error> {
        self.row().ok_or(Error::UnexpectedNullCodedIndex)
    }
}

impl<K: CodedIndexKind> std::fmt::Debug for CodedIndex<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.table(), self.row()) {
            (Ok(table), Some(row)) => write!(f, "{table}[{row}]"),
            (Ok(table), None) => write!(f, "{table}[null]"),
            (Err(_), _) => write!(f, "CodedIndex(0x{:x})", self.raw),
        }
    }
}

macro_rules! coded_index_kind {
    ($(#[$meta:meta])*
     $name:ident => [$($table:expr),+ $(,)?]) => {
        $(#[$meta])*
        pub struct $name;

        impl CodedIndexKind for $name {
            const TABLES: &'static [Option<MetadataTableKind>] =
                &[$($table),+];
        }
    };
}

use MetadataTableKind as T;

coded_index_kind! {
    TypeDefOrRef => [
        Some(T::TypeDef),
        Some(T::TypeRef),
        Some(T::TypeSpec),
    ]
}

coded_index_kind! {
    HasConstant => [
        Some(T::Field),
        Some(T::Param),
        Some(T::Property),
    ]
}

coded_index_kind! {
    /// The largest tag list, covering every table that may own a
    /// custom attribute.  Tag 8 ("HasDeclSecurity" in some readers)
    /// selects the DeclSecurity table.
    HasCustomAttribute => [
        Some(T::MethodDef),
        Some(T::Field),
        Some(T::TypeRef),
        Some(T::TypeDef),
        Some(T::Param),
        Some(T::InterfaceImpl),
        Some(T::MemberRef),
        Some(T::Module),
        Some(T::DeclSecurity),
        Some(T::Property),
        Some(T::Event),
        Some(T::StandAloneSig),
        Some(T::ModuleRef),
        Some(T::TypeSpec),
        Some(T::Assembly),
        Some(T::AssemblyRef),
        Some(T::File),
        Some(T::ExportedType),
        Some(T::ManifestResource),
        Some(T::GenericParam),
        Some(T::GenericParamConstraint),
        Some(T::MethodSpec),
    ]
}

coded_index_kind! {
    HasFieldMarshal => [
        Some(T::Field),
        Some(T::Param),
    ]
}

coded_index_kind! {
    HasDeclSecurity => [
        Some(T::TypeDef),
        Some(T::MethodDef),
        Some(T::Assembly),
    ]
}

coded_index_kind! {
    MemberRefParent => [
        Some(T::TypeDef),
        Some(T::TypeRef),
        Some(T::ModuleRef),
        Some(T::MethodDef),
        Some(T::TypeSpec),
    ]
}

coded_index_kind! {
    HasSemantics => [
        Some(T::Event),
        Some(T::Property),
    ]
}

coded_index_kind! {
    MethodDefOrRef => [
        Some(T::MethodDef),
        Some(T::MemberRef),
    ]
}

coded_index_kind! {
    MemberForwarded => [
        Some(T::Field),
        Some(T::MethodDef),
    ]
}

coded_index_kind! {
    Implementation => [
        Some(T::File),
        Some(T::AssemblyRef),
        Some(T::ExportedType),
    ]
}

coded_index_kind! {
    /// Tags 0, 1, and 4 are reserved and may not be referenced, but
    /// still count toward the tag width.
    CustomAttributeType => [
        None,
        None,
        Some(T::MethodDef),
        Some(T::MemberRef),
        None,
    ]
}

coded_index_kind! {
    ResolutionScope => [
        Some(T::Module),
        Some(T::ModuleRef),
        Some(T::AssemblyRef),
        Some(T::TypeRef),
    ]
}

coded_index_kind! {
    TypeOrMethodDef => [
        Some(T::TypeDef),
        Some(T::MethodDef),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_bits_round_up_to_cover_every_tag() {
        assert_eq!(TypeDefOrRef::tag_bits(), 2);
        assert_eq!(HasFieldMarshal::tag_bits(), 1);
        assert_eq!(MemberRefParent::tag_bits(), 3);
        assert_eq!(CustomAttributeType::tag_bits(), 3);
        assert_eq!(HasCustomAttribute::tag_bits(), 5);
    }

    #[test]
    fn decode_splits_tag_and_row() {
        // 989 == (247 << 2) | 1, a TypeRef reference
        let index = CodedIndex::<TypeDefOrRef>::new(989);
        assert_eq!(index.tag(), 1);
        assert_eq!(index.table().unwrap(), MetadataTableKind::TypeRef);
        assert_eq!(index.row(), Some(246));
    }

    #[test]
    fn round_trip() {
        for (table, row) in [
            (MetadataTableKind::TypeDef, 0),
            (MetadataTableKind::TypeRef, 41),
            (MetadataTableKind::TypeSpec, 0x3ffe),
        ] {
            let encoded = CodedIndex::<TypeDefOrRef>::encode(table, row);
            assert_eq!(encoded.table().unwrap(), table);
            assert_eq!(encoded.row(), Some(row));
        }

        let encoded = CodedIndex::<CustomAttributeType>::encode(
            MetadataTableKind::MemberRef,
            7,
        );
        assert_eq!(encoded.tag(), 3);
        assert_eq!(encoded.row(), Some(7));
    }

    #[test]
    fn zero_row_is_null() {
        let index = CodedIndex::<TypeDefOrRef>::new(0x2);
        assert!(index.is_null());
        assert_eq!(index.row(), None);
        assert!(index.expect_row().is_err());
    }

    #[test]
    fn reserved_tag_is_an_error() {
        // Row 1 with reserved tag 0
        let index = CodedIndex::<CustomAttributeType>::new(1 << 3);
        assert!(matches!(
            index.table(),
            Err(Error::CodedIndexRefersToReservedTableIndex)
        ));
    }

    #[test]
    fn out_of_range_tag_is_an_error() {
        let index = CodedIndex::<MemberRefParent>::new((1 << 3) | 6);
        assert!(matches!(
            index.table(),
            Err(Error::InvalidCodedIndex { tag: 6, .. })
        ));
    }

    #[test]
    #[should_panic]
    fn encoding_a_foreign_table_panics() {
        CodedIndex::<HasSemantics>::encode(MetadataTableKind::TypeDef, 0);
    }
}
