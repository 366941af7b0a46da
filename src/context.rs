use std::collections::HashSet;
use std::ops::Range;

use itertools::Itertools as _;

use crate::coded_index::{
    CodedIndex, CodedIndexKind, ResolutionScope, TypeDefOrRef,
};
use crate::signature::TypeNameResolver;
use crate::{
    Error, Metadata, MetadataTableKind, PeFile, Signature, TablesHeader,
};

/// Facade over one opened metadata blob: the decoded root, the
/// computed table layouts, and typed accessors that feed raw column
/// values through the heap readers, the coded-index codec, and the
/// signature decoder.
///
/// All state is immutable after construction; independent `Context`
/// instances over independent images share nothing.
pub struct Context<'a> {
    metadata: Metadata<'a>,
    tables: TablesHeader<'a>,
}

impl<'a> Context<'a> {
    /// Open a full PE image, locating the metadata blob through the
    /// CLR runtime header.
    pub fn from_image(bytes: &'a [u8]) -> Result<Self, Error> {
        Self::from_metadata(PeFile::new(bytes).metadata()?)
    }

    /// Open an already-extracted metadata blob.
    pub fn from_metadata(metadata: Metadata<'a>) -> Result<Self, Error> {
        let tables = metadata.tables_header()?;
        Ok(Self { metadata, tables })
    }

    pub fn metadata(&self) -> &Metadata<'a> {
        &self.metadata
    }

    pub fn tables(&self) -> &TablesHeader<'a> {
        &self.tables
    }

    pub fn num_rows(&self, kind: MetadataTableKind) -> u32 {
        self.tables.num_rows(kind)
    }

    /// Raw column value, widened to u64.
    pub fn get_value(
        &self,
        kind: MetadataTableKind,
        row: u32,
        column: usize,
    ) -> Result<u64, Error> {
        self.tables.get_value(kind, row, column)
    }

    /// Raw column value, truncated to u32.  Only the 8-byte version
    /// columns of Assembly/AssemblyRef ever exceed this.
    pub fn get_u32(
        &self,
        kind: MetadataTableKind,
        row: u32,
        column: usize,
    ) -> Result<u32, Error> {
        Ok(self.get_value(kind, row, column)? as u32)
    }

    /// Column value interpreted as a `#Strings` heap index.
    pub fn get_string(
        &self,
        kind: MetadataTableKind,
        row: u32,
        column: usize,
    ) -> Result<&'a str, Error> {
        let index = self.get_u32(kind, row, column)?;
        self.metadata.read_string(index)
    }

    /// Column value interpreted as a `#Blob` heap index.
    pub fn get_blob(
        &self,
        kind: MetadataTableKind,
        row: u32,
        column: usize,
    ) -> Result<&'a [u8], Error> {
        let index = self.get_u32(kind, row, column)?;
        self.metadata.read_blob(index)
    }

    /// Column value interpreted as a `#GUID` heap index.  Index 0 is
    /// the null GUID.
    pub fn get_guid(
        &self,
        kind: MetadataTableKind,
        row: u32,
        column: usize,
    ) -> Result<Option<&'a [u8]>, Error> {
        let index = self.get_u32(kind, row, column)?;
        self.metadata.read_guid(index)
    }

    /// Column value interpreted as a signature blob.
    pub fn get_signature(
        &self,
        kind: MetadataTableKind,
        row: u32,
        column: usize,
    ) -> Result<Signature<'a>, Error> {
        Ok(Signature::new(self.get_blob(kind, row, column)?))
    }

    /// Column value interpreted as a coded index of family `Kind`.
    pub fn get_coded_index<Kind: CodedIndexKind>(
        &self,
        kind: MetadataTableKind,
        row: u32,
        column: usize,
    ) -> Result<CodedIndex<Kind>, Error> {
        Ok(CodedIndex::new(self.get_u32(kind, row, column)?))
    }

    /// Resolve a list column (e.g. `TypeDef.FieldList`) to a 0-based
    /// `[start, end)` row range in `target`.  The end comes from the
    /// next row's start, or, for the owning table's last row, from
    /// the target table's row count.
    pub fn get_list(
        &self,
        kind: MetadataTableKind,
        row: u32,
        column: usize,
        target: MetadataTableKind,
    ) -> Result<Range<u32>, Error> {
        let start = self.get_u32(kind, row, column)?.saturating_sub(1);
        let end = if row + 1 < self.num_rows(kind) {
            self.get_u32(kind, row + 1, column)?.saturating_sub(1)
        } else {
            self.num_rows(target)
        };
        Ok(start..end)
    }

    /// Namespace and name of a `TypeDefOrRef` target, read from its
    /// own row.  A `TypeRef`'s name is reported as stored, without
    /// resolving its scope.
    pub fn type_name(
        &self,
        index: CodedIndex<TypeDefOrRef>,
    ) -> Result<(&'a str, &'a str), Error> {
        let kind = match index.table()? {
            kind @ (MetadataTableKind::TypeDef
            | MetadataTableKind::TypeRef) => kind,
            _ => return Err(Error::UnsupportedTypeSpec),
        };
        let row = index.expect_row()?;

        let name = self.get_string(kind, row, 1)?;
        let namespace = self.get_string(kind, row, 2)?;
        Ok((namespace, name))
    }

    /// Locate the TypeDef row named `namespace`/`name`.
    pub fn find_type_def(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<u32, Error> {
        use MetadataTableKind::TypeDef;

        (0..self.num_rows(TypeDef))
            .map(|row| -> Result<Option<u32>, Error> {
                let matches = self.get_string(TypeDef, row, 1)? == name
                    && self.get_string(TypeDef, row, 2)? == namespace;
                Ok(matches.then_some(row))
            })
            .process_results(|mut rows| rows.find_map(|row| row))?
            .ok_or_else(|| Error::TypeNotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
    }

    /// Nested type of the TypeDef at `enclosing_row` named `name`,
    /// found through the NestedClass table.
    pub fn nested_type_def(
        &self,
        enclosing_row: u32,
        name: &str,
    ) -> Result<Option<u32>, Error> {
        use MetadataTableKind::{NestedClass, TypeDef};

        (0..self.num_rows(NestedClass))
            .map(|row| -> Result<Option<u32>, Error> {
                // Both columns are 1-based TypeDef indices.
                let enclosing = self.get_u32(NestedClass, row, 1)?;
                if enclosing.checked_sub(1) != Some(enclosing_row) {
                    return Ok(None);
                }
                let nested = match self
                    .get_u32(NestedClass, row, 0)?
                    .checked_sub(1)
                {
                    Some(nested) => nested,
                    None => return Ok(None),
                };
                let matches = self.get_string(TypeDef, nested, 1)? == name;
                Ok(matches.then_some(nested))
            })
            .process_results(|mut rows| rows.find_map(|row| row))
    }

    /// Fully resolve a `TypeDefOrRef` to a TypeDef row, walking
    /// `ResolutionScope` chains through nested types where the scope
    /// is itself a `TypeRef`.  An unresolved reference is a hard
    /// error, never null.
    pub fn resolve_type_def(
        &self,
        index: CodedIndex<TypeDefOrRef>,
    ) -> Result<u32, Error> {
        match index.table()? {
            MetadataTableKind::TypeDef => index.expect_row(),
            MetadataTableKind::TypeRef => {
                let mut visited = HashSet::new();
                self.resolve_type_ref(index.expect_row()?, &mut visited)
            }
            _ => Err(Error::UnsupportedTypeSpec),
        }
    }

    fn resolve_type_ref(
        &self,
        row: u32,
        visited: &mut HashSet<u32>,
    ) -> Result<u32, Error> {
        use MetadataTableKind::TypeRef;

        // A corrupt image can make the scope chain cyclic.
        if !visited.insert(row) {
            return Err(Error::CyclicTypeRefChain { row });
        }

        let scope: CodedIndex<ResolutionScope> =
            self.get_coded_index(TypeRef, row, 0)?;
        let name = self.get_string(TypeRef, row, 1)?;
        let namespace = self.get_string(TypeRef, row, 2)?;

        if scope.table()? == TypeRef && !scope.is_null() {
            // A TypeRef scoped to another TypeRef is a nested type;
            // resolve the enclosing type first, then look this name
            // up among its nested classes.
            let enclosing =
                self.resolve_type_ref(scope.expect_row()?, visited)?;
            return self.nested_type_def(enclosing, name)?.ok_or_else(
                || Error::TypeNotFound {
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                },
            );
        }

        self.find_type_def(namespace, name)
    }
}

impl<'a> TypeNameResolver for Context<'a> {
    fn type_def_or_ref_name(
        &self,
        index: CodedIndex<TypeDefOrRef>,
    ) -> Result<(&str, &str), Error> {
        self.type_name(index)
    }
}
