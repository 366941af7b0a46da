use std::ops::Range;

use crate::coded_index::{
    CodedIndex, HasConstant, MemberForwarded, MemberRefParent,
    ResolutionScope, TypeDefOrRef,
};
use crate::{Context, Error, MetadataTableKind, Signature};

/// II.23.1.15 Flags for types.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct TypeAttributes(pub u32);

impl TypeAttributes {
    /// Visibility is the low 3 bits; 1 is Public.
    pub fn is_public(self) -> bool {
        self.0 & 0x7 == 0x1
    }

    pub fn is_interface(self) -> bool {
        self.0 & 0x20 != 0
    }

    pub fn is_abstract(self) -> bool {
        self.0 & 0x80 != 0
    }

    pub fn is_sealed(self) -> bool {
        self.0 & 0x100 != 0
    }

    /// Class layout is bits 3-4; 0x10 is ExplicitLayout.
    pub fn explicit_layout(self) -> bool {
        self.0 & 0x18 == 0x10
    }

    /// Class layout is bits 3-4; 0x08 is SequentialLayout.
    pub fn sequential_layout(self) -> bool {
        self.0 & 0x18 == 0x08
    }
}

/// II.22.30 Module row.
pub struct Module<'a> {
    pub generation: u16,
    pub name: &'a str,
    pub mvid: Option<&'a [u8]>,
    pub enc_id: Option<&'a [u8]>,
    pub enc_base_id: Option<&'a [u8]>,
}

impl<'a> Module<'a> {
    pub fn read(ctx: &Context<'a>, row: u32) -> Result<Self, Error> {
        use MetadataTableKind::Module;
        Ok(Self {
            generation: ctx.get_u32(Module, row, 0)? as u16,
            name: ctx.get_string(Module, row, 1)?,
            mvid: ctx.get_guid(Module, row, 2)?,
            enc_id: ctx.get_guid(Module, row, 3)?,
            enc_base_id: ctx.get_guid(Module, row, 4)?,
        })
    }
}

/// II.22.38 TypeRef row.
pub struct TypeRef<'a> {
    pub resolution_scope: CodedIndex<ResolutionScope>,
    pub type_name: &'a str,
    pub type_namespace: &'a str,
}

impl<'a> TypeRef<'a> {
    pub fn read(ctx: &Context<'a>, row: u32) -> Result<Self, Error> {
        use MetadataTableKind::TypeRef;
        Ok(Self {
            resolution_scope: ctx.get_coded_index(TypeRef, row, 0)?,
            type_name: ctx.get_string(TypeRef, row, 1)?,
            type_namespace: ctx.get_string(TypeRef, row, 2)?,
        })
    }
}

/// II.22.37 TypeDef row.  The field and method lists are resolved to
/// 0-based row ranges in their target tables.
pub struct TypeDef<'a> {
    pub flags: TypeAttributes,
    pub type_name: &'a str,
    pub type_namespace: &'a str,
    pub extends: CodedIndex<TypeDefOrRef>,
    pub field_list: Range<u32>,
    pub method_list: Range<u32>,
}

impl<'a> TypeDef<'a> {
    pub fn read(ctx: &Context<'a>, row: u32) -> Result<Self, Error> {
        use MetadataTableKind::{Field, MethodDef, TypeDef};
        Ok(Self {
            flags: TypeAttributes(ctx.get_u32(TypeDef, row, 0)?),
            type_name: ctx.get_string(TypeDef, row, 1)?,
            type_namespace: ctx.get_string(TypeDef, row, 2)?,
            extends: ctx.get_coded_index(TypeDef, row, 3)?,
            field_list: ctx.get_list(TypeDef, row, 4, Field)?,
            method_list: ctx.get_list(TypeDef, row, 5, MethodDef)?,
        })
    }
}

/// II.22.15 Field row.
pub struct Field<'a> {
    pub flags: u16,
    pub name: &'a str,
    pub signature: Signature<'a>,
}

impl<'a> Field<'a> {
    pub fn read(ctx: &Context<'a>, row: u32) -> Result<Self, Error> {
        use MetadataTableKind::Field;
        Ok(Self {
            flags: ctx.get_u32(Field, row, 0)? as u16,
            name: ctx.get_string(Field, row, 1)?,
            signature: ctx.get_signature(Field, row, 2)?,
        })
    }
}

/// II.22.26 MethodDef row.
pub struct MethodDef<'a> {
    pub rva: u32,
    pub impl_flags: u16,
    pub flags: u16,
    pub name: &'a str,
    pub signature: Signature<'a>,
    pub param_list: Range<u32>,
}

impl<'a> MethodDef<'a> {
    pub fn read(ctx: &Context<'a>, row: u32) -> Result<Self, Error> {
        use MetadataTableKind::{MethodDef, Param};
        Ok(Self {
            rva: ctx.get_u32(MethodDef, row, 0)?,
            impl_flags: ctx.get_u32(MethodDef, row, 1)? as u16,
            flags: ctx.get_u32(MethodDef, row, 2)? as u16,
            name: ctx.get_string(MethodDef, row, 3)?,
            signature: ctx.get_signature(MethodDef, row, 4)?,
            param_list: ctx.get_list(MethodDef, row, 5, Param)?,
        })
    }
}

/// II.22.33 Param row.
pub struct Param<'a> {
    pub flags: u16,
    pub sequence: u16,
    pub name: &'a str,
}

impl<'a> Param<'a> {
    pub fn read(ctx: &Context<'a>, row: u32) -> Result<Self, Error> {
        use MetadataTableKind::Param;
        Ok(Self {
            flags: ctx.get_u32(Param, row, 0)? as u16,
            sequence: ctx.get_u32(Param, row, 1)? as u16,
            name: ctx.get_string(Param, row, 2)?,
        })
    }
}

/// II.22.23 InterfaceImpl row.  `class` is a 1-based TypeDef index.
pub struct InterfaceImpl {
    pub class: u32,
    pub interface: CodedIndex<TypeDefOrRef>,
}

impl InterfaceImpl {
    pub fn read(ctx: &Context, row: u32) -> Result<Self, Error> {
        use MetadataTableKind::InterfaceImpl;
        Ok(Self {
            class: ctx.get_u32(InterfaceImpl, row, 0)?,
            interface: ctx.get_coded_index(InterfaceImpl, row, 1)?,
        })
    }
}

/// II.22.25 MemberRef row.
pub struct MemberRef<'a> {
    pub class: CodedIndex<MemberRefParent>,
    pub name: &'a str,
    pub signature: Signature<'a>,
}

impl<'a> MemberRef<'a> {
    pub fn read(ctx: &Context<'a>, row: u32) -> Result<Self, Error> {
        use MetadataTableKind::MemberRef;
        Ok(Self {
            class: ctx.get_coded_index(MemberRef, row, 0)?,
            name: ctx.get_string(MemberRef, row, 1)?,
            signature: ctx.get_signature(MemberRef, row, 2)?,
        })
    }
}

/// II.22.9 Constant row.  `constant_type` is the element-type code
/// of the stored value.
pub struct Constant<'a> {
    pub constant_type: u16,
    pub parent: CodedIndex<HasConstant>,
    pub value: &'a [u8],
}

impl<'a> Constant<'a> {
    pub fn read(ctx: &Context<'a>, row: u32) -> Result<Self, Error> {
        use MetadataTableKind::Constant;
        Ok(Self {
            constant_type: ctx.get_u32(Constant, row, 0)? as u16,
            parent: ctx.get_coded_index(Constant, row, 1)?,
            value: ctx.get_blob(Constant, row, 2)?,
        })
    }
}

/// II.22.22 ImplMap row.  `import_scope` is a 1-based ModuleRef
/// index.
pub struct ImplMap<'a> {
    pub mapping_flags: u16,
    pub member_forwarded: CodedIndex<MemberForwarded>,
    pub import_name: &'a str,
    pub import_scope: u32,
}

impl<'a> ImplMap<'a> {
    pub fn read(ctx: &Context<'a>, row: u32) -> Result<Self, Error> {
        use MetadataTableKind::ImplMap;
        Ok(Self {
            mapping_flags: ctx.get_u32(ImplMap, row, 0)? as u16,
            member_forwarded: ctx.get_coded_index(ImplMap, row, 1)?,
            import_name: ctx.get_string(ImplMap, row, 2)?,
            import_scope: ctx.get_u32(ImplMap, row, 3)?,
        })
    }
}

/// II.22.32 NestedClass row.  Both columns are 1-based TypeDef
/// indices.
pub struct NestedClass {
    pub nested_class: u32,
    pub enclosing_class: u32,
}

impl NestedClass {
    pub fn read(ctx: &Context, row: u32) -> Result<Self, Error> {
        use MetadataTableKind::NestedClass;
        Ok(Self {
            nested_class: ctx.get_u32(NestedClass, row, 0)?,
            enclosing_class: ctx.get_u32(NestedClass, row, 1)?,
        })
    }
}

/// II.22.31 ModuleRef row.
pub struct ModuleRef<'a> {
    pub name: &'a str,
}

impl<'a> ModuleRef<'a> {
    pub fn read(ctx: &Context<'a>, row: u32) -> Result<Self, Error> {
        use MetadataTableKind::ModuleRef;
        Ok(Self {
            name: ctx.get_string(ModuleRef, row, 0)?,
        })
    }
}

/// II.22.2 Assembly row.  `version` packs the four 16-bit version
/// fields.
pub struct Assembly<'a> {
    pub hash_alg_id: u32,
    pub version: u64,
    pub flags: u32,
    pub public_key: &'a [u8],
    pub name: &'a str,
    pub culture: &'a str,
}

impl<'a> Assembly<'a> {
    pub fn read(ctx: &Context<'a>, row: u32) -> Result<Self, Error> {
        use MetadataTableKind::Assembly;
        Ok(Self {
            hash_alg_id: ctx.get_u32(Assembly, row, 0)?,
            version: ctx.get_value(Assembly, row, 1)?,
            flags: ctx.get_u32(Assembly, row, 2)?,
            public_key: ctx.get_blob(Assembly, row, 3)?,
            name: ctx.get_string(Assembly, row, 4)?,
            culture: ctx.get_string(Assembly, row, 5)?,
        })
    }
}

/// II.22.5 AssemblyRef row.
pub struct AssemblyRef<'a> {
    pub version: u64,
    pub flags: u32,
    pub public_key_or_token: &'a [u8],
    pub name: &'a str,
    pub culture: &'a str,
    pub hash_value: &'a [u8],
}

impl<'a> AssemblyRef<'a> {
    pub fn read(ctx: &Context<'a>, row: u32) -> Result<Self, Error> {
        use MetadataTableKind::AssemblyRef;
        Ok(Self {
            version: ctx.get_value(AssemblyRef, row, 0)?,
            flags: ctx.get_u32(AssemblyRef, row, 1)?,
            public_key_or_token: ctx.get_blob(AssemblyRef, row, 2)?,
            name: ctx.get_string(AssemblyRef, row, 3)?,
            culture: ctx.get_string(AssemblyRef, row, 4)?,
            hash_value: ctx.get_blob(AssemblyRef, row, 5)?,
        })
    }
}
