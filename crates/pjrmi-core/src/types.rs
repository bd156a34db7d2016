//! Type descriptors and the overload-specificity matrix (spec.md §3, §4.3).
//!
//! A [`TypeDescriptor`] is immutable after first fetch: the registry in
//! [`crate::type_registry`] is the only thing allowed to construct one, by
//! decoding a `TYPE_DESCRIPTION` response frame.

use std::collections::HashMap;

use bytes::{Buf, BufMut};
use pjrmi_proto::wire;

/// Stable 32-bit type id, assigned by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub u32);

/// A field on a type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    /// Field name.
    pub name: String,
    /// Declared type id.
    pub field_type_id: TypeId,
    /// Whether this is a static field.
    pub is_static: bool,
}

/// Relative specificity of one overload against its peers in the same
/// overload set (spec.md §3: "signed byte per peer overload").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Specificity {
    /// This overload is strictly more specific than the peer.
    MoreSpecific,
    /// This overload is strictly less specific than the peer.
    LessSpecific,
    /// Neither overload dominates the other.
    Incomparable,
}

impl Specificity {
    const fn to_i8(self) -> i8 {
        match self {
            Self::MoreSpecific => -1,
            Self::LessSpecific => 1,
            Self::Incomparable => 0,
        }
    }

    const fn from_i8(byte: i8) -> Self {
        if byte < 0 {
            Self::MoreSpecific
        } else if byte > 0 {
            Self::LessSpecific
        } else {
            Self::Incomparable
        }
    }

    /// The antisymmetric counterpart: `spec[A][B] = -spec[B][A]`
    /// (spec.md §3 invariant, tested as a property in §8).
    #[must_use]
    pub const fn inverse(self) -> Self {
        Self::from_i8(-self.to_i8())
    }
}

/// Square matrix of [`Specificity`] values between the overloads of a
/// single method name / arity group. Row and column indices are positions
/// within the overload's containing `Vec`, not server-assigned ids.
#[derive(Debug, Clone, Default)]
pub struct SpecificityMatrix {
    rows: Vec<Vec<i8>>,
}

impl SpecificityMatrix {
    /// Build a matrix from a raw signed-byte grid, as decoded off the wire.
    /// The grid must be square; callers that construct it from untrusted
    /// bytes should validate squareness before calling this.
    #[must_use]
    pub fn from_raw(rows: Vec<Vec<i8>>) -> Self {
        Self { rows }
    }

    /// Number of overloads this matrix covers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the matrix covers zero overloads.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Specificity of overload `a` relative to overload `b`.
    #[must_use]
    pub fn get(&self, a: usize, b: usize) -> Specificity {
        Specificity::from_i8(self.rows[a][b])
    }

    /// Checks the antisymmetry invariant across every pair; used by the
    /// property test in this module and debug-asserted when a matrix is
    /// installed into a live descriptor.
    #[must_use]
    pub fn is_antisymmetric(&self) -> bool {
        for a in 0..self.len() {
            for b in 0..self.len() {
                if self.get(a, b).inverse() != self.get(b, a) {
                    return false;
                }
            }
        }
        true
    }
}

/// A constructor or method overload (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallableDescriptor {
    /// Server's handle for this overload (used in `METHOD_CALL`).
    pub index: i32,
    /// Whether this overload is `static`.
    pub is_static: bool,
    /// Whether this overload is deprecated.
    pub is_deprecated: bool,
    /// Whether this overload can only be selected by an explicit call,
    /// never by overload resolution (spec.md §4.4 step 1).
    pub is_explicit_only: bool,
    /// Whether this overload accepts keyword arguments.
    pub accepts_kwargs: bool,
    /// Keyword argument names accepted, if `accepts_kwargs` and the server
    /// provided a finite list (an empty list with `accepts_kwargs = true`
    /// means "any name is accepted").
    pub accepted_kwarg_names: Vec<String>,
    /// Return type id. `None` for constructors.
    pub return_type_id: Option<TypeId>,
    /// Ordered argument type ids.
    pub argument_type_ids: Vec<TypeId>,
    /// Parameter names, same length and order as `argument_type_ids`.
    pub parameter_names: Vec<String>,
    /// Whether this is a default-interface-method.
    pub is_default_method: bool,
}

impl CallableDescriptor {
    /// Arity (number of positional parameters).
    #[must_use]
    pub fn arity(&self) -> usize {
        self.argument_type_ids.len()
    }

    /// A human-readable signature for diagnostics (spec.md §4.4: overload
    /// resolution failures list candidate signatures).
    #[must_use]
    pub fn signature(&self, name: &str) -> String {
        let params = self
            .parameter_names
            .iter()
            .zip(&self.argument_type_ids)
            .map(|(n, t)| format!("{n}: #{}", t.0))
            .collect::<Vec<_>>()
            .join(", ");
        format!("{name}({params})")
    }
}

/// Flags classifying a type's kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TypeFlags {
    /// Is a primitive (`int`, `double`, etc.).
    pub is_primitive: bool,
    /// Is an interface.
    pub is_interface: bool,
    /// Is (a subtype of) `Throwable`.
    pub is_throwable: bool,
    /// Is a functional interface (single abstract method), eligible to
    /// receive a local callable as an argument.
    pub is_functional_interface: bool,
    /// Is an array type.
    pub is_array: bool,
}

/// Immutable type descriptor (spec.md §3).
#[derive(Debug, Clone)]
pub struct TypeDescriptor {
    /// This type's id.
    pub type_id: TypeId,
    /// Fully qualified name, e.g. `java.lang.String`.
    pub name: String,
    /// Type-kind flags.
    pub flags: TypeFlags,
    /// Element type id, if `flags.is_array`.
    pub array_element_type_id: Option<TypeId>,
    /// Ids of supertypes (superclass plus implemented interfaces).
    pub supertype_ids: Vec<TypeId>,
    /// Declared fields.
    pub fields: Vec<FieldDescriptor>,
    /// Constructors.
    pub constructors: Vec<CallableDescriptor>,
    /// Methods, grouped by name (all overloads of that name).
    pub methods: HashMap<String, Vec<CallableDescriptor>>,
    /// Specificity matrix per method name (constructors share a single
    /// implicit name and use `constructor_specificity`).
    pub method_specificity: HashMap<String, SpecificityMatrix>,
    /// Specificity matrix across this type's constructors.
    pub constructor_specificity: SpecificityMatrix,
}

impl TypeDescriptor {
    /// Whether `other` appears anywhere in this type's supertype chain
    /// (direct or transitive is resolved by the caller walking the
    /// registry; this only checks the direct list, matching what the
    /// server sends per type).
    #[must_use]
    pub fn has_direct_supertype(&self, other: TypeId) -> bool {
        self.supertype_ids.contains(&other)
    }

    /// Overloads of `name` with exactly `arity` parameters.
    #[must_use]
    pub fn methods_named(&self, name: &str, arity: usize) -> Vec<&CallableDescriptor> {
        self.methods
            .get(name)
            .into_iter()
            .flatten()
            .filter(|c| c.arity() == arity)
            .collect()
    }
}

const FLAG_PRIMITIVE: u8 = 0b0000_0001;
const FLAG_INTERFACE: u8 = 0b0000_0010;
const FLAG_THROWABLE: u8 = 0b0000_0100;
const FLAG_FUNCTIONAL_INTERFACE: u8 = 0b0000_1000;
const FLAG_ARRAY: u8 = 0b0001_0000;

const CALLABLE_STATIC: u8 = 0b0000_0001;
const CALLABLE_DEPRECATED: u8 = 0b0000_0010;
const CALLABLE_EXPLICIT_ONLY: u8 = 0b0000_0100;
const CALLABLE_ACCEPTS_KWARGS: u8 = 0b0000_1000;
const CALLABLE_DEFAULT_METHOD: u8 = 0b0001_0000;

impl TypeFlags {
    fn to_byte(self) -> u8 {
        let mut byte = 0;
        if self.is_primitive {
            byte |= FLAG_PRIMITIVE;
        }
        if self.is_interface {
            byte |= FLAG_INTERFACE;
        }
        if self.is_throwable {
            byte |= FLAG_THROWABLE;
        }
        if self.is_functional_interface {
            byte |= FLAG_FUNCTIONAL_INTERFACE;
        }
        if self.is_array {
            byte |= FLAG_ARRAY;
        }
        byte
    }

    fn from_byte(byte: u8) -> Self {
        Self {
            is_primitive: byte & FLAG_PRIMITIVE != 0,
            is_interface: byte & FLAG_INTERFACE != 0,
            is_throwable: byte & FLAG_THROWABLE != 0,
            is_functional_interface: byte & FLAG_FUNCTIONAL_INTERFACE != 0,
            is_array: byte & FLAG_ARRAY != 0,
        }
    }
}

fn put_type_id(dst: &mut impl BufMut, type_id: TypeId) {
    dst.put_u32(type_id.0);
}

fn get_type_id(buf: &mut impl Buf) -> pjrmi_proto::errors::Result<TypeId> {
    Ok(TypeId(wire::get_i32(buf)? as u32))
}

fn put_optional_type_id(dst: &mut impl BufMut, type_id: Option<TypeId>) {
    dst.put_i32(type_id.map_or(-1, |t| t.0 as i32));
}

fn get_optional_type_id(buf: &mut impl Buf) -> pjrmi_proto::errors::Result<Option<TypeId>> {
    let raw = wire::get_i32(buf)?;
    Ok(if raw < 0 { None } else { Some(TypeId(raw as u32)) })
}

fn put_specificity_matrix(dst: &mut impl BufMut, matrix: &SpecificityMatrix) {
    #[allow(clippy::cast_possible_truncation)]
    dst.put_i32(matrix.len() as i32);
    for row in &matrix.rows {
        for &byte in row {
            dst.put_i8(byte);
        }
    }
}

fn get_specificity_matrix(buf: &mut impl Buf) -> pjrmi_proto::errors::Result<SpecificityMatrix> {
    let n = wire::get_i32(buf)?.max(0) as usize;
    let mut rows = Vec::with_capacity(n);
    for _ in 0..n {
        let mut row = Vec::with_capacity(n);
        for _ in 0..n {
            row.push(wire::get_u8(buf)? as i8);
        }
        rows.push(row);
    }
    Ok(SpecificityMatrix::from_raw(rows))
}

impl CallableDescriptor {
    fn encode(&self, dst: &mut impl BufMut) {
        dst.put_i32(self.index);
        let mut flags = 0u8;
        if self.is_static {
            flags |= CALLABLE_STATIC;
        }
        if self.is_deprecated {
            flags |= CALLABLE_DEPRECATED;
        }
        if self.is_explicit_only {
            flags |= CALLABLE_EXPLICIT_ONLY;
        }
        if self.accepts_kwargs {
            flags |= CALLABLE_ACCEPTS_KWARGS;
        }
        if self.is_default_method {
            flags |= CALLABLE_DEFAULT_METHOD;
        }
        dst.put_u8(flags);

        #[allow(clippy::cast_possible_truncation)]
        dst.put_i32(self.accepted_kwarg_names.len() as i32);
        for name in &self.accepted_kwarg_names {
            wire::put_utf16_string(dst, name);
        }

        put_optional_type_id(dst, self.return_type_id);

        #[allow(clippy::cast_possible_truncation)]
        dst.put_i32(self.argument_type_ids.len() as i32);
        for type_id in &self.argument_type_ids {
            put_type_id(dst, *type_id);
        }
        for name in &self.parameter_names {
            wire::put_utf16_string(dst, name);
        }
    }

    fn decode(buf: &mut impl Buf) -> pjrmi_proto::errors::Result<Self> {
        let index = wire::get_i32(buf)?;
        let flags = wire::get_u8(buf)?;

        let kwarg_count = wire::get_i32(buf)?.max(0);
        let mut accepted_kwarg_names = Vec::with_capacity(kwarg_count as usize);
        for _ in 0..kwarg_count {
            accepted_kwarg_names.push(wire::get_utf16_string(buf)?);
        }

        let return_type_id = get_optional_type_id(buf)?;

        let arg_count = wire::get_i32(buf)?.max(0);
        let mut argument_type_ids = Vec::with_capacity(arg_count as usize);
        for _ in 0..arg_count {
            argument_type_ids.push(get_type_id(buf)?);
        }
        let mut parameter_names = Vec::with_capacity(arg_count as usize);
        for _ in 0..arg_count {
            parameter_names.push(wire::get_utf16_string(buf)?);
        }

        Ok(Self {
            index,
            is_static: flags & CALLABLE_STATIC != 0,
            is_deprecated: flags & CALLABLE_DEPRECATED != 0,
            is_explicit_only: flags & CALLABLE_EXPLICIT_ONLY != 0,
            accepts_kwargs: flags & CALLABLE_ACCEPTS_KWARGS != 0,
            accepted_kwarg_names,
            return_type_id,
            argument_type_ids,
            parameter_names,
            is_default_method: flags & CALLABLE_DEFAULT_METHOD != 0,
        })
    }
}

impl TypeDescriptor {
    /// Encodes this descriptor the way a `TYPE_DESCRIPTION` response frame
    /// carries it (spec.md §3's field list, in declaration order). Used by
    /// tests and by anything synthesizing fixture frames; production code
    /// only ever decodes, since the registry is the sole constructor of a
    /// live descriptor.
    pub fn encode(&self, dst: &mut impl BufMut) {
        put_type_id(dst, self.type_id);
        wire::put_utf16_string(dst, &self.name);
        dst.put_u8(self.flags.to_byte());
        put_optional_type_id(dst, self.array_element_type_id);

        #[allow(clippy::cast_possible_truncation)]
        dst.put_i32(self.supertype_ids.len() as i32);
        for type_id in &self.supertype_ids {
            put_type_id(dst, *type_id);
        }

        #[allow(clippy::cast_possible_truncation)]
        dst.put_i32(self.fields.len() as i32);
        for field in &self.fields {
            wire::put_utf16_string(dst, &field.name);
            put_type_id(dst, field.field_type_id);
            dst.put_u8(u8::from(field.is_static));
        }

        #[allow(clippy::cast_possible_truncation)]
        dst.put_i32(self.constructors.len() as i32);
        for constructor in &self.constructors {
            constructor.encode(dst);
        }
        put_specificity_matrix(dst, &self.constructor_specificity);

        #[allow(clippy::cast_possible_truncation)]
        dst.put_i32(self.methods.len() as i32);
        for (name, overloads) in &self.methods {
            wire::put_utf16_string(dst, name);
            #[allow(clippy::cast_possible_truncation)]
            dst.put_i32(overloads.len() as i32);
            for overload in overloads {
                overload.encode(dst);
            }
            let matrix = self.method_specificity.get(name).cloned().unwrap_or_default();
            put_specificity_matrix(dst, &matrix);
        }
    }

    /// Decodes a `TYPE_DESCRIPTION` response payload (spec.md §3). This is
    /// the only place a [`TypeDescriptor`] is constructed from untrusted
    /// bytes; [`crate::type_registry::TypeRegistry::insert`] takes the
    /// result and caches it.
    ///
    /// # Errors
    ///
    /// [`pjrmi_proto::ProtocolError::FieldTruncated`] if the payload ends
    /// before a declared field, or [`pjrmi_proto::ProtocolError::InvalidUtf16`]
    /// if a name field is not valid UTF-16.
    pub fn decode(buf: &mut impl Buf) -> pjrmi_proto::errors::Result<Self> {
        let type_id = get_type_id(buf)?;
        let name = wire::get_utf16_string(buf)?;
        let flags = TypeFlags::from_byte(wire::get_u8(buf)?);
        let array_element_type_id = get_optional_type_id(buf)?;

        let supertype_count = wire::get_i32(buf)?.max(0);
        let mut supertype_ids = Vec::with_capacity(supertype_count as usize);
        for _ in 0..supertype_count {
            supertype_ids.push(get_type_id(buf)?);
        }

        let field_count = wire::get_i32(buf)?.max(0);
        let mut fields = Vec::with_capacity(field_count as usize);
        for _ in 0..field_count {
            let field_name = wire::get_utf16_string(buf)?;
            let field_type_id = get_type_id(buf)?;
            let is_static = wire::get_u8(buf)? != 0;
            fields.push(FieldDescriptor { name: field_name, field_type_id, is_static });
        }

        let constructor_count = wire::get_i32(buf)?.max(0);
        let mut constructors = Vec::with_capacity(constructor_count as usize);
        for _ in 0..constructor_count {
            constructors.push(CallableDescriptor::decode(buf)?);
        }
        let constructor_specificity = get_specificity_matrix(buf)?;

        let method_name_count = wire::get_i32(buf)?.max(0);
        let mut methods = HashMap::with_capacity(method_name_count as usize);
        let mut method_specificity = HashMap::with_capacity(method_name_count as usize);
        for _ in 0..method_name_count {
            let method_name = wire::get_utf16_string(buf)?;
            let overload_count = wire::get_i32(buf)?.max(0);
            let mut overloads = Vec::with_capacity(overload_count as usize);
            for _ in 0..overload_count {
                overloads.push(CallableDescriptor::decode(buf)?);
            }
            let matrix = get_specificity_matrix(buf)?;
            methods.insert(method_name.clone(), overloads);
            method_specificity.insert(method_name, matrix);
        }

        Ok(Self {
            type_id,
            name,
            flags,
            array_element_type_id,
            supertype_ids,
            fields,
            constructors,
            methods,
            method_specificity,
            constructor_specificity,
        })
    }
}

/// Names of the types that must be resolved eagerly, in order, before any
/// other type construction is attempted (spec.md §4.3's bootstrap set,
/// extended per the original PJRmi client's `_bootstrapTypes` to include
/// the common collection types so `Map`/`List`/`Set` arguments marshal
/// correctly from the first call).
pub const BOOTSTRAP_NAMES: &[&str] = &[
    "void",
    "boolean",
    "byte",
    "short",
    "char",
    "int",
    "long",
    "float",
    "double",
    "java.lang.Object",
    "java.lang.String",
    "java.lang.Number",
    "java.lang.Boolean",
    "java.lang.Byte",
    "java.lang.Short",
    "java.lang.Character",
    "java.lang.Integer",
    "java.lang.Long",
    "java.lang.Float",
    "java.lang.Double",
    "java.lang.Iterable",
    "java.util.Collection",
    "java.util.Map",
    "java.util.Iterator",
    "java.lang.Comparable",
    "java.lang.Throwable",
    "java.util.List",
    "java.util.Set",
    "java.util.ArrayList",
    "java.util.HashMap",
    "java.util.HashSet",
];

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn antisymmetric_matrix(n: usize, seed: u64) -> SpecificityMatrix {
        let mut rows = vec![vec![0i8; n]; n];
        let mut state = seed;
        for a in 0..n {
            for b in (a + 1)..n {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
                let value = ((state >> 33) % 3) as i8 - 1;
                rows[a][b] = value;
                rows[b][a] = -value;
            }
        }
        SpecificityMatrix::from_raw(rows)
    }

    proptest! {
        #[test]
        fn generated_matrices_are_antisymmetric(n in 0usize..8, seed in any::<u64>()) {
            let matrix = antisymmetric_matrix(n, seed);
            prop_assert!(matrix.is_antisymmetric());
        }
    }

    #[test]
    fn specificity_inverse_round_trips() {
        assert_eq!(Specificity::MoreSpecific.inverse(), Specificity::LessSpecific);
        assert_eq!(Specificity::LessSpecific.inverse(), Specificity::MoreSpecific);
        assert_eq!(Specificity::Incomparable.inverse(), Specificity::Incomparable);
    }

    #[test]
    fn detects_broken_antisymmetry() {
        let rows = vec![vec![0, 1], vec![1, 0]];
        let matrix = SpecificityMatrix::from_raw(rows);
        assert!(!matrix.is_antisymmetric());
    }

    #[test]
    fn bootstrap_names_resolve_primitives_before_collections() {
        let int_pos = BOOTSTRAP_NAMES.iter().position(|n| *n == "int").unwrap();
        let list_pos = BOOTSTRAP_NAMES.iter().position(|n| *n == "java.util.List").unwrap();
        assert!(int_pos < list_pos);
    }

    fn sample_descriptor() -> TypeDescriptor {
        let overload = CallableDescriptor {
            index: 3,
            is_static: false,
            is_deprecated: false,
            is_explicit_only: false,
            accepts_kwargs: true,
            accepted_kwarg_names: vec!["timeout".to_string()],
            return_type_id: Some(TypeId(9)),
            argument_type_ids: vec![TypeId(9), TypeId(10)],
            parameter_names: vec!["a".to_string(), "b".to_string()],
            is_default_method: false,
        };

        let mut methods = HashMap::new();
        methods.insert("frobnicate".to_string(), vec![overload]);
        let mut method_specificity = HashMap::new();
        method_specificity.insert(
            "frobnicate".to_string(),
            SpecificityMatrix::from_raw(vec![vec![0]]),
        );

        TypeDescriptor {
            type_id: TypeId(42),
            name: "com.example.Widget".to_string(),
            flags: TypeFlags { is_interface: true, ..TypeFlags::default() },
            array_element_type_id: None,
            supertype_ids: vec![TypeId(1), TypeId(2)],
            fields: vec![FieldDescriptor {
                name: "count".to_string(),
                field_type_id: TypeId(5),
                is_static: true,
            }],
            constructors: vec![CallableDescriptor {
                index: 0,
                is_static: false,
                is_deprecated: true,
                is_explicit_only: false,
                accepts_kwargs: false,
                accepted_kwarg_names: Vec::new(),
                return_type_id: None,
                argument_type_ids: Vec::new(),
                parameter_names: Vec::new(),
                is_default_method: false,
            }],
            methods,
            method_specificity,
            constructor_specificity: SpecificityMatrix::from_raw(vec![vec![0]]),
        }
    }

    #[test]
    fn type_descriptor_round_trips_through_the_wire_format() {
        let original = sample_descriptor();
        let mut buf = Vec::new();
        original.encode(&mut buf);

        let mut slice = buf.as_slice();
        let decoded = TypeDescriptor::decode(&mut slice).unwrap();

        assert_eq!(decoded.type_id, original.type_id);
        assert_eq!(decoded.name, original.name);
        assert_eq!(decoded.flags, original.flags);
        assert_eq!(decoded.supertype_ids, original.supertype_ids);
        assert_eq!(decoded.fields, original.fields);
        assert_eq!(decoded.constructors, original.constructors);
        assert_eq!(decoded.methods, original.methods);
        assert!(decoded.method_specificity.contains_key("frobnicate"));
    }

    #[test]
    fn truncated_type_descriptor_payload_errors() {
        let original = sample_descriptor();
        let mut buf = Vec::new();
        original.encode(&mut buf);
        buf.truncate(buf.len() - 4);

        let mut slice = buf.as_slice();
        assert!(TypeDescriptor::decode(&mut slice).is_err());
    }
}
