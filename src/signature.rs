use crate::coded_index::{CodedIndex, TypeDefOrRef};
use crate::Error;

/// A signature blob (ECMA-335, section II.23.2), as stored in the
/// `#Blob` heap.  Decoding starts by constructing a reader over the
/// blob's contents.
#[derive(Clone, Copy)]
pub struct Signature<'a> {
    bytes: &'a [u8],
}

/// Resolver for the `TypeDefOrRef` references embedded in a
/// signature.  The decoder needs it to inspect custom modifiers:
/// a modifier referencing `System.Runtime.CompilerServices.IsConst`
/// marks the element as const.
pub trait TypeNameResolver {
    /// The `(namespace, name)` pair of the referenced type.
    fn type_def_or_ref_name(
        &self,
        index: CodedIndex<TypeDefOrRef>,
    ) -> Result<(&str, &str), Error>;
}

/// Consumes compressed unsigned integers from a signature blob, as
/// defined in ECMA-335, section II.23.2.
#[derive(Clone)]
pub struct SignatureReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

/// First byte of a method signature.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SignatureFlags(pub u32);

/// One parameter, return value, or field type.
#[derive(Clone, PartialEq, Debug)]
pub struct Element {
    pub element_type: ElementType,

    /// Pointer depth, from leading PTR markers.
    pub pointers: usize,

    pub by_ref: bool,
    pub is_const: bool,

    /// Set by a leading ARRAY marker.  Distinct from the
    /// `ElementType::Array` base code.
    pub is_array: bool,
}

#[derive(Clone, PartialEq, Debug)]
pub enum ElementType {
    Void,
    Boolean,
    Char,
    I1,
    U1,
    I2,
    U2,
    I4,
    U4,
    I8,
    U8,
    R4,
    R8,
    String,
    Object,
    NativeInt,
    NativeUint,
    TypedByRef,

    ValueType(CodedIndex<TypeDefOrRef>),
    Class(CodedIndex<TypeDefOrRef>),

    /// Generic parameter of the enclosing type, by ordinal.
    Var(u32),
    /// Generic parameter of the enclosing method, by ordinal.
    MVar(u32),

    /// Fixed-size array.  Multi-dimensional shape information beyond
    /// the single size is not retained.
    Array { element: Box<Element>, size: u32 },

    GenericInst {
        base: CodedIndex<TypeDefOrRef>,
        args: Vec<ElementType>,
    },

    /// Single-dimension array with no fixed size.
    SzArray(Box<Element>),
}

/// II.23.2.1 MethodDefSig / II.23.2.2 MethodRefSig.
#[derive(Clone, PartialEq, Debug)]
pub struct MethodSignature {
    pub flags: SignatureFlags,
    pub generic_arg_count: u32,
    pub return_type: Element,
    pub params: Vec<Element>,
}

/// II.23.2.4 FieldSig.
#[derive(Clone, PartialEq, Debug)]
pub struct FieldSignature {
    pub element: Element,
}

const ELEMENT_TYPE_VOID: u32 = 0x01;
const ELEMENT_TYPE_PTR: u32 = 0x0f;
const ELEMENT_TYPE_BYREF: u32 = 0x10;
const ELEMENT_TYPE_VALUETYPE: u32 = 0x11;
const ELEMENT_TYPE_CLASS: u32 = 0x12;
const ELEMENT_TYPE_VAR: u32 = 0x13;
const ELEMENT_TYPE_ARRAY: u32 = 0x14;
const ELEMENT_TYPE_GENERICINST: u32 = 0x15;
const ELEMENT_TYPE_SZARRAY: u32 = 0x1d;
const ELEMENT_TYPE_MVAR: u32 = 0x1e;
const ELEMENT_TYPE_CMOD_REQD: u32 = 0x1f;
const ELEMENT_TYPE_CMOD_OPT: u32 = 0x20;

impl<'a> Signature<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn reader(&self) -> SignatureReader<'a> {
        SignatureReader {
            bytes: self.bytes,
            offset: 0,
        }
    }

    pub fn method(
        &self,
        resolver: &impl TypeNameResolver,
    ) -> Result<MethodSignature, Error> {
        self.reader().method(resolver)
    }

    pub fn field(
        &self,
        resolver: &impl TypeNameResolver,
    ) -> Result<FieldSignature, Error> {
        self.reader().field(resolver)
    }
}

impl<'a> SignatureReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    /// Decode the compressed value at the cursor without consuming
    /// it, returning the value and its encoded length.
    fn peek(&self) -> Result<(u32, usize), Error> {
        let remaining = &self.bytes[self.offset.min(self.bytes.len())..];
        let first = *remaining
            .first()
            .ok_or(Error::UnexpectedEndOfSignature)?;

        let leading_ones = first.leading_ones();
        match leading_ones {
            0 => Ok(((first & 0x7f) as u32, 1)),
            1 => {
                if remaining.len() < 2 {
                    return Err(Error::UnexpectedEndOfSignature);
                }
                let value = u16::from_be_bytes([first & 0x3f, remaining[1]]);
                Ok((value as u32, 2))
            }
            2 => {
                if remaining.len() < 4 {
                    return Err(Error::UnexpectedEndOfSignature);
                }
                let value = u32::from_be_bytes([
                    first & 0x1f,
                    remaining[1],
                    remaining[2],
                    remaining[3],
                ]);
                Ok((value, 4))
            }
            _ => Err(Error::InvalidCompressedValue { leading_ones }),
        }
    }

    /// Decode and consume the compressed value at the cursor.
    pub fn read(&mut self) -> Result<u32, Error> {
        let (value, size) = self.peek()?;
        self.offset += size;
        Ok(value)
    }

    /// Consume the value at the cursor iff it equals `expected`.
    /// Used for the optional prefix tokens (BYREF, VOID, ARRAY, PTR,
    /// custom modifiers).  At the end of the blob, nothing matches.
    fn expect(&mut self, expected: u32) -> bool {
        match self.peek() {
            Ok((value, size)) if value == expected => {
                self.offset += size;
                true
            }
            _ => false,
        }
    }

    fn read_type_def_or_ref(
        &mut self,
    ) -> Result<CodedIndex<TypeDefOrRef>, Error> {
        Ok(CodedIndex::new(self.read()?))
    }

    /// Consume leading custom modifiers, reporting whether any of
    /// them resolves to `System.Runtime.CompilerServices.IsConst`.
    fn is_const(
        &mut self,
        resolver: &impl TypeNameResolver,
    ) -> Result<bool, Error> {
        let mut is_const = false;
        while self.expect(ELEMENT_TYPE_CMOD_REQD)
            || self.expect(ELEMENT_TYPE_CMOD_OPT)
        {
            let index = self.read_type_def_or_ref()?;
            let (namespace, name) = resolver.type_def_or_ref_name(index)?;
            if namespace == "System.Runtime.CompilerServices"
                && name == "IsConst"
            {
                is_const = true;
            }
        }
        Ok(is_const)
    }

    /// Decode the next element: prefix tokens, then the base type.
    ///
    /// A bare VOID terminates the element immediately, before the
    /// ARRAY/PTR prefixes are considered.  `void*` still decodes with
    /// its pointer depth, since PTR markers precede the base code on
    /// the wire and are consumed before VOID is reached.
    pub fn next_element(
        &mut self,
        resolver: &impl TypeNameResolver,
    ) -> Result<Element, Error> {
        let is_const = self.is_const(resolver)?;
        let by_ref = self.expect(ELEMENT_TYPE_BYREF);

        if self.expect(ELEMENT_TYPE_VOID) {
            return Ok(Element {
                element_type: ElementType::Void,
                pointers: 0,
                by_ref,
                is_const,
                is_array: false,
            });
        }

        let is_array = self.expect(ELEMENT_TYPE_ARRAY);

        let mut pointers = 0;
        while self.expect(ELEMENT_TYPE_PTR) {
            pointers += 1;
        }

        let element_type = self.next_element_type(resolver)?;

        Ok(Element {
            element_type,
            pointers,
            by_ref,
            is_const,
            is_array,
        })
    }

    fn next_element_type(
        &mut self,
        resolver: &impl TypeNameResolver,
    ) -> Result<ElementType, Error> {
        let code = self.read()?;
        if let Some(element_type) = ElementType::from_code(code) {
            return Ok(element_type);
        }

        match code {
            ELEMENT_TYPE_VALUETYPE => {
                Ok(ElementType::ValueType(self.read_type_def_or_ref()?))
            }
            ELEMENT_TYPE_CLASS => {
                Ok(ElementType::Class(self.read_type_def_or_ref()?))
            }
            ELEMENT_TYPE_VAR => Ok(ElementType::Var(self.read()?)),
            ELEMENT_TYPE_MVAR => Ok(ElementType::MVar(self.read()?)),
            ELEMENT_TYPE_ARRAY => {
                let element = self.next_element(resolver)?;
                // Multi-dimensional shape (II.23.2.13 ArrayShape) is
                // not retained beyond a single size.
                self.read()?; // rank
                self.read()?; // bounds count
                let size = self.read()?;
                Ok(ElementType::Array {
                    element: Box::new(element),
                    size,
                })
            }
            ELEMENT_TYPE_GENERICINST => {
                self.read()?; // CLASS | VALUETYPE
                let base = self.read_type_def_or_ref()?;
                let num_args = self.read()?;
                let args = (0..num_args)
                    .map(|_| self.next_element_type(resolver))
                    .collect::<Result<_, _>>()?;
                Ok(ElementType::GenericInst { base, args })
            }
            ELEMENT_TYPE_SZARRAY => Ok(ElementType::SzArray(Box::new(
                self.next_element(resolver)?,
            ))),
            other => Err(Error::InvalidElementType(other)),
        }
    }

    /// Decode a method signature: flags, optional generic-parameter
    /// count, parameter count, return type, then each parameter in
    /// declared order.
    pub fn method(
        &mut self,
        resolver: &impl TypeNameResolver,
    ) -> Result<MethodSignature, Error> {
        let flags = SignatureFlags(self.read()?);

        let generic_arg_count = if flags.is_generic() {
            self.read()?
        } else {
            0
        };

        let num_params = self.read()?;
        let return_type = self.next_element(resolver)?;
        let params = (0..num_params)
            .map(|_| self.next_element(resolver))
            .collect::<Result<_, _>>()?;

        Ok(MethodSignature {
            flags,
            generic_arg_count,
            return_type,
            params,
        })
    }

    /// Decode a field signature: the fixed 0x6 tag, then the field's
    /// type.
    pub fn field(
        &mut self,
        resolver: &impl TypeNameResolver,
    ) -> Result<FieldSignature, Error> {
        let tag = self.read()?;
        if tag != 0x6 {
            return Err(Error::InvalidFieldSignature(tag));
        }

        Ok(FieldSignature {
            element: self.next_element(resolver)?,
        })
    }
}

impl SignatureFlags {
    /// Calling convention, from the low 4 bits.
    pub fn calling_convention(self) -> u32 {
        self.0 & 0x0f
    }

    /// Set on MethodDef/MethodRef signatures of generic methods.
    pub fn is_generic(self) -> bool {
        self.0 & 0x10 != 0
    }

    /// Set when the method is associated with an instance (i.e. is
    /// not static).
    pub fn has_this(self) -> bool {
        self.0 & 0x20 != 0
    }

    /// Set when the type of the `this` pointer is explicitly listed
    /// as the first parameter.
    pub fn explicit_this(self) -> bool {
        self.0 & 0x40 != 0
    }
}

impl ElementType {
    /// Map a payload-free base code to its kind.  Codes that carry a
    /// payload (VALUETYPE, VAR, ARRAY, ...) return None and are
    /// handled by the decoder.
    fn from_code(code: u32) -> Option<Self> {
        match code {
            0x01 => Some(Self::Void),
            0x02 => Some(Self::Boolean),
            0x03 => Some(Self::Char),
            0x04 => Some(Self::I1),
            0x05 => Some(Self::U1),
            0x06 => Some(Self::I2),
            0x07 => Some(Self::U2),
            0x08 => Some(Self::I4),
            0x09 => Some(Self::U4),
            0x0a => Some(Self::I8),
            0x0b => Some(Self::U8),
            0x0c => Some(Self::R4),
            0x0d => Some(Self::R8),
            0x0e => Some(Self::String),
            0x16 => Some(Self::TypedByRef),
            0x18 => Some(Self::NativeInt),
            0x19 => Some(Self::NativeUint),
            0x1c => Some(Self::Object),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MetadataTableKind;

    struct NoResolve;

    impl TypeNameResolver for NoResolve {
        fn type_def_or_ref_name(
            &self,
            _: CodedIndex<TypeDefOrRef>,
        ) -> Result<(&str, &str), Error> {
            Ok(("", ""))
        }
    }

    struct AlwaysConst;

    impl TypeNameResolver for AlwaysConst {
        fn type_def_or_ref_name(
            &self,
            _: CodedIndex<TypeDefOrRef>,
        ) -> Result<(&str, &str), Error> {
            Ok(("System.Runtime.CompilerServices", "IsConst"))
        }
    }

    fn plain(element_type: ElementType) -> Element {
        Element {
            element_type,
            pointers: 0,
            by_ref: false,
            is_const: false,
            is_array: false,
        }
    }

    #[test]
    fn compressed_value_widths() {
        let mut reader = SignatureReader::new(&[0x06]);
        assert_eq!(reader.read().unwrap(), 6);
        assert_eq!(reader.offset, 1);

        let mut reader = SignatureReader::new(&[0x83, 0xdd]);
        assert_eq!(reader.read().unwrap(), 989);
        assert_eq!(reader.offset, 2);

        let mut reader = SignatureReader::new(&[0xc0, 0x00, 0x12, 0x34]);
        assert_eq!(reader.read().unwrap(), 0x1234);
        assert_eq!(reader.offset, 4);
    }

    #[test]
    fn three_leading_ones_is_invalid() {
        let mut reader = SignatureReader::new(&[0xe0, 0, 0, 0]);
        assert!(matches!(
            reader.read(),
            Err(Error::InvalidCompressedValue { leading_ones: 3 })
        ));
    }

    #[test]
    fn truncated_multibyte_value() {
        let mut reader = SignatureReader::new(&[0x83]);
        assert!(matches!(
            reader.read(),
            Err(Error::UnexpectedEndOfSignature)
        ));
    }

    #[test]
    fn field_of_u4() {
        let sig = Signature::new(&[6, 9]);
        let field = sig.field(&NoResolve).unwrap();
        assert_eq!(field.element, plain(ElementType::U4));
    }

    #[test]
    fn field_with_wrong_tag() {
        let sig = Signature::new(&[8, 9]);
        assert!(matches!(
            sig.field(&NoResolve),
            Err(Error::InvalidFieldSignature(8))
        ));
    }

    #[test]
    fn pointer_to_u4() {
        let mut reader = SignatureReader::new(&[15, 9]);
        let element = reader.next_element(&NoResolve).unwrap();
        assert_eq!(element.pointers, 1);
        assert_eq!(element.element_type, ElementType::U4);
    }

    #[test]
    fn pointer_to_void_keeps_depth() {
        // PTR precedes the base code, so the pointer loop runs
        // before the VOID early-out.
        let mut reader = SignatureReader::new(&[15, 1]);
        let element = reader.next_element(&NoResolve).unwrap();
        assert_eq!(element.pointers, 1);
        assert_eq!(element.element_type, ElementType::Void);
    }

    #[test]
    fn bare_void_return() {
        let mut reader = SignatureReader::new(&[1]);
        let element = reader.next_element(&NoResolve).unwrap();
        assert_eq!(element, plain(ElementType::Void));
    }

    // Signature of RtlNtStatusToDosError: one VALUETYPE parameter,
    // U4 return.
    #[test]
    fn method_with_value_type_param() {
        let sig = Signature::new(&[0, 1, 9, 17, 131, 221]);
        let method = sig.method(&NoResolve).unwrap();

        assert_eq!(method.flags, SignatureFlags(0));
        assert_eq!(method.generic_arg_count, 0);
        assert_eq!(method.return_type, plain(ElementType::U4));
        assert_eq!(method.params.len(), 1);

        let index = match method.params[0].element_type {
            ElementType::ValueType(index) => index,
            ref other => panic!("expected VALUETYPE, got {other:?}"),
        };
        assert_eq!(index.raw(), 989);
        assert_eq!(index.table().unwrap(), MetadataTableKind::TypeRef);
        assert_eq!(index.row(), Some(246));
    }

    #[test]
    fn generic_instantiation() {
        // HasThis flags, no params, return type
        // IEnumerable<SomeClass>
        let sig =
            Signature::new(&[32, 0, 21, 18, 188, 181, 1, 18, 187, 181]);
        let method = sig.method(&NoResolve).unwrap();
        assert!(method.flags.has_this());

        let (base, args) = match &method.return_type.element_type {
            ElementType::GenericInst { base, args } => (base, args),
            other => panic!("expected GENERICINST, got {other:?}"),
        };
        assert_eq!(base.raw(), 15541);
        assert_eq!(args.len(), 1);
        let arg = match args[0] {
            ElementType::Class(index) => index,
            ref other => panic!("expected CLASS, got {other:?}"),
        };
        assert_eq!(arg.raw(), 15285);
    }

    #[test]
    fn sz_array_param() {
        let sig = Signature::new(&[32, 1, 1, 29, 18, 187, 181]);
        let method = sig.method(&NoResolve).unwrap();
        assert_eq!(method.return_type, plain(ElementType::Void));

        let element = match &method.params[0].element_type {
            ElementType::SzArray(element) => element,
            other => panic!("expected SZARRAY, got {other:?}"),
        };
        assert!(matches!(element.element_type, ElementType::Class(_)));
    }

    #[test]
    fn leading_array_token_is_a_flag() {
        // An ARRAY token before the base code marks the element,
        // without changing its kind.
        let sig = Signature::new(&[6, 20, 9]);
        let field = sig.field(&NoResolve).unwrap();
        assert!(field.element.is_array);
        assert_eq!(field.element.element_type, ElementType::U4);
    }

    #[test]
    fn fixed_size_array() {
        // ARRAY as a base code (here behind a PTR marker, which
        // skips the flag handling): element, rank, bounds count,
        // size
        let sig = Signature::new(&[6, 15, 20, 9, 1, 0, 16]);
        let field = sig.field(&NoResolve).unwrap();
        assert_eq!(field.element.pointers, 1);
        match &field.element.element_type {
            ElementType::Array { element, size } => {
                assert_eq!(element.element_type, ElementType::U4);
                assert_eq!(*size, 16);
            }
            other => panic!("expected ARRAY, got {other:?}"),
        }
    }

    #[test]
    fn const_modifier_detection() {
        // CMOD_OPT + TypeDefOrRef, then PTR + CHAR
        let bytes = [6, 32, 13, 15, 3];

        let field = Signature::new(&bytes).field(&AlwaysConst).unwrap();
        assert!(field.element.is_const);
        assert_eq!(field.element.pointers, 1);
        assert_eq!(field.element.element_type, ElementType::Char);

        let field = Signature::new(&bytes).field(&NoResolve).unwrap();
        assert!(!field.element.is_const);
    }

    #[test]
    fn generic_method_reads_arg_count() {
        // Generic bit (0x10) set: one generic parameter, which is
        // also the return type (MVAR 0)
        let sig = Signature::new(&[0x10, 1, 0, 30, 0]);
        let method = sig.method(&NoResolve).unwrap();
        assert!(method.flags.is_generic());
        assert_eq!(method.generic_arg_count, 1);
        assert_eq!(method.return_type.element_type, ElementType::MVar(0));
        assert!(method.params.is_empty());
    }

    #[test]
    fn by_ref_param() {
        let sig = Signature::new(&[0, 1, 1, 16, 8]);
        let method = sig.method(&NoResolve).unwrap();
        assert!(method.params[0].by_ref);
        assert_eq!(method.params[0].element_type, ElementType::I4);
    }
}
