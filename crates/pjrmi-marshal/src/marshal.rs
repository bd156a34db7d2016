//! Value marshaller: encodes local values as wire arguments against a
//! resolved target type id (spec.md §4.4).

use bytes::{Buf, BufMut, BytesMut};
use pjrmi_core::{Handle, PjrmiError, TypeDescriptor, TypeId, TypeRegistry};
use pjrmi_proto::{value::ArgTag, wire};

use crate::narrowing::{NumericKind, NumericValue};

/// Options tweaking marshalling behavior beyond the protocol-mandated
/// defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarshalOptions {
    /// Accept a numeric-looking string as a numeric-primitive argument,
    /// running it back through the same round-trip check any other
    /// narrowing uses rather than a silent cast
    /// (`original_source/python/pjrmi/_util.py`'s `strict_int`-style
    /// coercion). Off by default; spec.md's test scenarios assume strings
    /// are never silently coerced.
    pub accept_numeric_strings: bool,
}

/// A local value being marshalled. Holds enough shape information to
/// disambiguate array element width without needing the target type
/// resolved first.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Java `null`.
    Null,
    /// `boolean`.
    Bool(bool),
    /// A numeric primitive, already tagged with its natural width.
    Numeric(NumericValue),
    /// `java.lang.String`.
    Str(String),
    /// A handle to an object already known to the peer; marshals as `R`
    /// regardless of target, since a string-box or object with a live
    /// handle always prefers it (spec.md §4.4).
    Handle(Handle),
    /// A homogeneous array of booleans.
    BoolArray(Vec<bool>),
    /// A homogeneous array of one numeric kind.
    NumericArray(NumericKind, Vec<NumericValue>),
    /// A homogeneous array of strings.
    StringArray(Vec<String>),
    /// A heterogeneous array of arbitrary values (an `Object[]`).
    ObjectArray(Vec<Value>),
    /// A `Map`, as ordered key/value pairs.
    Map(Vec<(Value, Value)>),
    /// A `Set`/`Collection`/`Iterable`/`List`-shaped container.
    Container(Vec<Value>),
    /// A Python-style slice: three optional integers.
    Slice {
        /// The slice's start index, if any.
        start: Option<i64>,
        /// The slice's stop index, if any.
        stop: Option<i64>,
        /// The slice's step, if any.
        step: Option<i64>,
    },
}

/// What an encoded argument looks like once marshalled; writing the tag
/// byte and body onto the wire is the caller's (`pjrmi-client`'s) job, as
/// is choosing the SHM channel instead when [`crate::shm_policy`] says an
/// array is eligible.
#[derive(Debug, Clone, PartialEq)]
pub enum EncodedArg {
    /// An inline `V`-tagged argument, already including its tag byte,
    /// type id, and payload.
    Inline(BytesMut),
    /// An `R`-tagged reference to an object the peer already knows.
    Reference(Handle),
}

/// Whether a marshal produced a value that round-tripped exactly or one
/// that only fit via a lossy narrowing (spec.md §4.4 step 5's tiebreak
/// needs to know which).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fidelity {
    /// No precision was lost.
    Exact,
    /// The value fit only via a narrowing that loses precision, and the
    /// candidate's arity was not overloaded (permitted) or this call site
    /// explicitly allows lossy fits to be attempted (overload resolution
    /// decides whether to accept it).
    PrecisionLoss,
}

/// Encodes [`Value`]s as wire arguments against a resolved target type.
pub struct Marshaller<'a> {
    types: &'a TypeRegistry,
    options: MarshalOptions,
}

impl<'a> Marshaller<'a> {
    /// Creates a marshaller borrowing the given type registry.
    #[must_use]
    pub fn new(types: &'a TypeRegistry, options: MarshalOptions) -> Self {
        Self { types, options }
    }

    /// Marshals `value` against `target`. `strict` selects the narrowing
    /// mode: when `true` (the overloaded case), any precision-losing
    /// narrowing is rejected outright rather than merely flagged.
    ///
    /// # Errors
    ///
    /// [`PjrmiError::MarshalError`] if no encoding exists for `(value,
    /// target)`, or [`PjrmiError::PrecisionLoss`] if `strict` and the only
    /// available encoding would lose precision.
    pub fn marshal(&self, value: &Value, target: TypeId, strict: bool) -> Result<EncodedArg, PjrmiError> {
        let (encoded, _fidelity) = self.marshal_with_fidelity(value, target, strict)?;
        Ok(encoded)
    }

    /// As [`Self::marshal`], but also reports whether the encoding was
    /// exact or only achieved via a (permitted) lossy narrowing — used by
    /// overload resolution's step 5 tiebreak.
    ///
    /// # Errors
    ///
    /// See [`Self::marshal`].
    pub fn marshal_with_fidelity(
        &self,
        value: &Value,
        target: TypeId,
        strict: bool,
    ) -> Result<(EncodedArg, Fidelity), PjrmiError> {
        if let Value::Handle(handle) = value {
            return Ok((EncodedArg::Reference(*handle), Fidelity::Exact));
        }

        let descriptor = self.types.get_by_id(target).ok_or_else(|| PjrmiError::MarshalError {
            type_id: target.0,
            reason: "target type id not resolved in the type registry".to_owned(),
        })?;

        if let Some(kind) = NumericKind::from_primitive_name(&descriptor.name) {
            return self.marshal_numeric(value, target, kind, strict);
        }

        match descriptor.name.as_str() {
            "boolean" => self.marshal_bool(value, target),
            "java.lang.String" => self.marshal_string(value, target),
            "java.lang.Object" | "java.lang.Number" => self.marshal_generic(value, target, strict),
            "java.util.Map" => self.marshal_map(value, target),
            "java.util.Set" | "java.util.List" | "java.util.Collection" | "java.lang.Iterable" => {
                self.marshal_container(value, target)
            }
            name if name == SLICE_TYPE_NAME => self.marshal_slice(value, target),
            _ if descriptor.flags.is_array => self.marshal_array(value, target, &descriptor, strict),
            other => Err(PjrmiError::MarshalError {
                type_id: target.0,
                reason: format!("no marshalling rule for target type `{other}`"),
            }),
        }
    }

    fn marshal_bool(&self, value: &Value, target: TypeId) -> Result<(EncodedArg, Fidelity), PjrmiError> {
        let Value::Bool(b) = value else {
            return Err(type_mismatch(target, value, "boolean"));
        };
        let mut buf = BytesMut::new();
        buf.put_u8(ArgTag::Value.to_u8());
        buf.put_i32(target.0 as i32);
        buf.put_u8(u8::from(*b));
        Ok((EncodedArg::Inline(buf), Fidelity::Exact))
    }

    fn marshal_numeric(
        &self,
        value: &Value,
        target: TypeId,
        kind: NumericKind,
        strict: bool,
    ) -> Result<(EncodedArg, Fidelity), PjrmiError> {
        let Value::Numeric(source) = value else {
            if let (true, Value::Str(s)) = (self.options.accept_numeric_strings, value) {
                return self.marshal_numeric_string(s, target, kind, strict);
            }
            return Err(type_mismatch(target, value, "numeric primitive"));
        };

        let exact = source.kind() == kind;
        if !exact && !source.round_trips_to(kind) {
            tracing::trace!(?source, ?kind, "numeric value does not round-trip, rejecting");
            return Err(PjrmiError::PrecisionLoss {
                reason: format!("{source:?} does not round-trip through {kind:?}"),
            });
        }
        if !exact && strict {
            tracing::trace!(?source, ?kind, "narrowing rejected under strict (overloaded) resolution");
            return Err(PjrmiError::PrecisionLoss {
                reason: format!(
                    "{source:?} narrows to {kind:?} under an overloaded call; narrowing is rejected in strict mode"
                ),
            });
        }

        let mut buf = BytesMut::new();
        buf.put_u8(ArgTag::Value.to_u8());
        buf.put_i32(target.0 as i32);
        write_numeric_payload(&mut buf, *source, kind);

        let fidelity = if exact { Fidelity::Exact } else { Fidelity::PrecisionLoss };
        Ok((EncodedArg::Inline(buf), fidelity))
    }

    fn marshal_numeric_string(
        &self,
        s: &str,
        target: TypeId,
        kind: NumericKind,
        strict: bool,
    ) -> Result<(EncodedArg, Fidelity), PjrmiError> {
        let parsed = if kind.is_floating() {
            s.parse::<f64>().ok().map(NumericValue::Double)
        } else {
            s.parse::<i64>().ok().map(NumericValue::Long)
        };
        let Some(parsed) = parsed else {
            return Err(PjrmiError::MarshalError {
                type_id: target.0,
                reason: format!("`{s}` does not parse as a numeric literal"),
            });
        };
        self.marshal_numeric(&Value::Numeric(parsed), target, kind, strict)
    }

    fn marshal_string(&self, value: &Value, target: TypeId) -> Result<(EncodedArg, Fidelity), PjrmiError> {
        let Value::Str(s) = value else {
            return Err(type_mismatch(target, value, "java.lang.String"));
        };
        let mut buf = BytesMut::new();
        buf.put_u8(ArgTag::Value.to_u8());
        buf.put_i32(target.0 as i32);
        wire::put_utf16_string(&mut buf, s);
        Ok((EncodedArg::Inline(buf), Fidelity::Exact))
    }

    /// Infers the most specific primitive/number encoding that exactly
    /// represents `value` (spec.md §4.4: "byte < short < int < long; float
    /// preferred over double when representation is exact").
    fn marshal_generic(
        &self,
        value: &Value,
        target: TypeId,
        strict: bool,
    ) -> Result<(EncodedArg, Fidelity), PjrmiError> {
        match value {
            Value::Bool(_) => self.marshal_bool(value, target),
            Value::Str(_) => self.marshal_string(value, target),
            Value::Handle(h) => Ok((EncodedArg::Reference(*h), Fidelity::Exact)),
            Value::Numeric(source) => {
                let inferred = infer_narrowest_kind(*source);
                let inferred_type_id = self.primitive_type_id(inferred)?;
                self.marshal_numeric(value, inferred_type_id, inferred, strict)
            }
            Value::Map(_) => self.marshal_map(value, target),
            Value::Container(_) | Value::ObjectArray(_) => self.marshal_container(value, target),
            _ => Err(type_mismatch(target, value, "java.lang.Object")),
        }
    }

    fn marshal_map(&self, value: &Value, target: TypeId) -> Result<(EncodedArg, Fidelity), PjrmiError> {
        let Value::Map(entries) = value else {
            return Err(type_mismatch(target, value, "java.util.Map"));
        };
        let mut buf = BytesMut::new();
        buf.put_u8(ArgTag::Value.to_u8());
        buf.put_i32(target.0 as i32);
        buf.put_i32(entries.len() as i32);
        for (key, val) in entries {
            self.encode_nested(&mut buf, key)?;
            self.encode_nested(&mut buf, val)?;
        }
        Ok((EncodedArg::Inline(buf), Fidelity::Exact))
    }

    fn marshal_container(&self, value: &Value, target: TypeId) -> Result<(EncodedArg, Fidelity), PjrmiError> {
        let elements: &[Value] = match value {
            Value::Container(items) | Value::ObjectArray(items) => items,
            _ => return Err(type_mismatch(target, value, "container")),
        };
        let mut buf = BytesMut::new();
        buf.put_u8(ArgTag::Value.to_u8());
        buf.put_i32(target.0 as i32);
        buf.put_i32(elements.len() as i32);
        for element in elements {
            self.encode_nested(&mut buf, element)?;
        }
        Ok((EncodedArg::Inline(buf), Fidelity::Exact))
    }

    fn marshal_array(
        &self,
        value: &Value,
        target: TypeId,
        descriptor: &TypeDescriptor,
        strict: bool,
    ) -> Result<(EncodedArg, Fidelity), PjrmiError> {
        let element_type = descriptor.array_element_type_id;
        match value {
            Value::BoolArray(bools) => {
                let mut buf = BytesMut::new();
                buf.put_u8(ArgTag::Value.to_u8());
                buf.put_i32(target.0 as i32);
                buf.put_i32(bools.len() as i32);
                for b in bools {
                    buf.put_u8(u8::from(*b));
                }
                Ok((EncodedArg::Inline(buf), Fidelity::Exact))
            }
            Value::StringArray(strings) => {
                let mut buf = BytesMut::new();
                buf.put_u8(ArgTag::Value.to_u8());
                buf.put_i32(target.0 as i32);
                buf.put_i32(strings.len() as i32);
                for s in strings {
                    wire::put_utf16_string(&mut buf, s);
                }
                Ok((EncodedArg::Inline(buf), Fidelity::Exact))
            }
            Value::NumericArray(source_kind, elements) => {
                let Some(element_type) = element_type else {
                    return Err(PjrmiError::MarshalError {
                        type_id: target.0,
                        reason: "array type descriptor has no declared element type".to_owned(),
                    });
                };
                let Some(element_descriptor) = self.types.get_by_id(element_type) else {
                    return Err(PjrmiError::MarshalError {
                        type_id: element_type.0,
                        reason: "array element type not resolved in the type registry".to_owned(),
                    });
                };
                let Some(target_kind) = NumericKind::from_primitive_name(&element_descriptor.name) else {
                    return Err(PjrmiError::MarshalError {
                        type_id: element_type.0,
                        reason: "array element type is not a numeric primitive".to_owned(),
                    });
                };

                let mut fidelity = Fidelity::Exact;
                for element in elements {
                    let exact = *source_kind == target_kind;
                    if !exact {
                        if !element.round_trips_to(target_kind) {
                            return Err(PjrmiError::PrecisionLoss {
                                reason: format!("array element {element:?} does not round-trip through {target_kind:?}"),
                            });
                        }
                        if strict {
                            return Err(PjrmiError::PrecisionLoss {
                                reason: "array element narrowing rejected in strict mode".to_owned(),
                            });
                        }
                        fidelity = Fidelity::PrecisionLoss;
                    }
                }

                let mut buf = BytesMut::new();
                buf.put_u8(ArgTag::Value.to_u8());
                buf.put_i32(target.0 as i32);
                buf.put_i32(elements.len() as i32);
                for element in elements {
                    write_numeric_payload(&mut buf, *element, target_kind);
                }
                Ok((EncodedArg::Inline(buf), fidelity))
            }
            Value::ObjectArray(items) => self.marshal_container(&Value::ObjectArray(items.clone()), target),
            _ => Err(type_mismatch(target, value, "array")),
        }
    }

    /// Encodes a Python-style slice (spec.md §4.4): three tagged elements
    /// (`start`, `stop`, `step`), each either null or int. There is no
    /// standard Java class this maps to (PJRmi invents one, bootstrapped
    /// under [`SLICE_TYPE_NAME`] the same way the rest of the bootstrap
    /// set is), so unlike every other marshal arm this one owns its type
    /// name rather than matching a JDK class.
    fn marshal_slice(&self, value: &Value, target: TypeId) -> Result<(EncodedArg, Fidelity), PjrmiError> {
        let Value::Slice { start, stop, step } = value else {
            return Err(type_mismatch(target, value, SLICE_TYPE_NAME));
        };
        let mut buf = BytesMut::new();
        buf.put_u8(ArgTag::Value.to_u8());
        buf.put_i32(target.0 as i32);
        for component in [start, stop, step] {
            encode_slice_component(&mut buf, *component);
        }
        Ok((EncodedArg::Inline(buf), Fidelity::Exact))
    }

    fn primitive_type_id(&self, kind: NumericKind) -> Result<TypeId, PjrmiError> {
        let name = match kind {
            NumericKind::Byte => "byte",
            NumericKind::Short => "short",
            NumericKind::Char => "char",
            NumericKind::Int => "int",
            NumericKind::Long => "long",
            NumericKind::Float => "float",
            NumericKind::Double => "double",
        };
        self.types.get_by_name(name).map(|d| d.type_id).ok_or_else(|| PjrmiError::MarshalError {
            type_id: 0,
            reason: format!("primitive bootstrap type `{name}` is not resolved yet"),
        })
    }

    fn encode_nested(&self, buf: &mut BytesMut, value: &Value) -> Result<(), PjrmiError> {
        // Nested container/map elements are generic-object targets: each
        // is tagged and self-describing, so there is no single target type
        // id to resolve against ahead of time.
        match value {
            Value::Handle(h) => {
                buf.put_u8(ArgTag::Reference.to_u8());
                buf.put_i64(h.0);
                Ok(())
            }
            Value::Bool(b) => {
                buf.put_u8(ArgTag::Value.to_u8());
                buf.put_u8(NESTED_SCALAR_BOOL);
                buf.put_u8(u8::from(*b));
                Ok(())
            }
            Value::Str(s) => {
                buf.put_u8(ArgTag::Value.to_u8());
                buf.put_u8(NESTED_SCALAR_STRING);
                wire::put_utf16_string(buf, s);
                Ok(())
            }
            Value::Numeric(n) => {
                let kind = infer_narrowest_kind(*n);
                buf.put_u8(ArgTag::Value.to_u8());
                buf.put_u8(kind.nested_tag());
                write_numeric_payload(buf, *n, kind);
                Ok(())
            }
            _ => Err(PjrmiError::MarshalError {
                type_id: 0,
                reason: "nested container elements must be scalars, strings, or handles".to_owned(),
            }),
        }
    }
}

/// Nested-element scalar discriminants (spec.md §4.4): a nested map or
/// container entry carries no target type id to resolve a numeric width
/// against, so it needs its own one-byte tag distinguishing a bool, a
/// string, and the seven numeric widths from one another.
const NESTED_SCALAR_BOOL: u8 = b'b';
const NESTED_SCALAR_STRING: u8 = b's';

/// The java type name PJRmi bootstraps for a Python-style slice argument
/// (spec.md §4.4's "slice target"). There is no corresponding JDK class;
/// this is PJRmi's own synthetic type.
pub const SLICE_TYPE_NAME: &str = "PJRmiSlice";

fn encode_slice_component(buf: &mut BytesMut, component: Option<i64>) {
    match component {
        Some(v) => {
            buf.put_u8(1);
            #[allow(clippy::cast_possible_truncation)]
            buf.put_i32(v as i32);
        }
        None => buf.put_u8(0),
    }
}

fn decode_slice_component(buf: &mut impl Buf) -> Result<Option<i64>, PjrmiError> {
    if wire::get_u8(buf)? == 0 {
        return Ok(None);
    }
    Ok(Some(i64::from(wire::get_i32(buf)?)))
}

/// Decodes a top-level `V`- or `R`-tagged wire value (the same format
/// [`Marshaller::marshal`] produces) against the resolved type registry.
/// Used to decode replies and exported values coming back from the peer.
///
/// # Errors
///
/// [`PjrmiError::MarshalError`] if the tag or type id is unrecognized, or a
/// propagated [`pjrmi_proto::ProtocolError`] if the payload is truncated.
pub fn decode_value(buf: &mut impl Buf, types: &TypeRegistry) -> Result<Value, PjrmiError> {
    let tag = ArgTag::try_from_u8(wire::get_u8(buf)?)
        .map_err(|e| PjrmiError::MarshalError { type_id: 0, reason: e.to_string() })?;
    match tag {
        ArgTag::Reference => Ok(Value::Handle(Handle(wire::get_i64(buf)?))),
        ArgTag::Value => {
            let type_id = TypeId(wire::get_i32(buf)? as u32);
            let descriptor = types.get_by_id(type_id).ok_or(PjrmiError::MarshalError {
                type_id: type_id.0,
                reason: "target type id not resolved in the type registry".to_owned(),
            })?;

            if let Some(kind) = NumericKind::from_primitive_name(&descriptor.name) {
                return Ok(Value::Numeric(read_numeric_payload(buf, kind)?));
            }

            match descriptor.name.as_str() {
                "boolean" => Ok(Value::Bool(wire::get_u8(buf)? != 0)),
                "java.lang.String" => Ok(Value::Str(wire::get_utf16_string(buf)?)),
                "java.util.Map" => {
                    let len = wire::get_i32(buf)?;
                    let mut entries = Vec::with_capacity(len.max(0) as usize);
                    for _ in 0..len {
                        let key = decode_nested(buf)?;
                        let val = decode_nested(buf)?;
                        entries.push((key, val));
                    }
                    Ok(Value::Map(entries))
                }
                "java.util.Set" | "java.util.List" | "java.util.Collection" | "java.lang.Iterable" => {
                    let len = wire::get_i32(buf)?;
                    let mut items = Vec::with_capacity(len.max(0) as usize);
                    for _ in 0..len {
                        items.push(decode_nested(buf)?);
                    }
                    Ok(Value::Container(items))
                }
                name if name == SLICE_TYPE_NAME => Ok(Value::Slice {
                    start: decode_slice_component(buf)?,
                    stop: decode_slice_component(buf)?,
                    step: decode_slice_component(buf)?,
                }),
                _ if descriptor.flags.is_array => decode_array(buf, &descriptor, types),
                other => Err(PjrmiError::MarshalError {
                    type_id: type_id.0,
                    reason: format!("no decoding rule for wire type `{other}`"),
                }),
            }
        }
        other => Err(PjrmiError::MarshalError {
            type_id: 0,
            reason: format!("`{other:?}` is not a decodable top-level value tag"),
        }),
    }
}

fn decode_array(buf: &mut impl Buf, descriptor: &TypeDescriptor, types: &TypeRegistry) -> Result<Value, PjrmiError> {
    let Some(element_type) = descriptor.array_element_type_id else {
        return Err(PjrmiError::MarshalError {
            type_id: descriptor.type_id.0,
            reason: "array type descriptor has no declared element type".to_owned(),
        });
    };
    let Some(element_descriptor) = types.get_by_id(element_type) else {
        return Err(PjrmiError::MarshalError {
            type_id: element_type.0,
            reason: "array element type not resolved in the type registry".to_owned(),
        });
    };

    let len = wire::get_i32(buf)?;
    let count = len.max(0) as usize;

    if element_descriptor.name == "boolean" {
        let mut bools = Vec::with_capacity(count);
        for _ in 0..count {
            bools.push(wire::get_u8(buf)? != 0);
        }
        return Ok(Value::BoolArray(bools));
    }
    if element_descriptor.name == "java.lang.String" {
        let mut strings = Vec::with_capacity(count);
        for _ in 0..count {
            strings.push(wire::get_utf16_string(buf)?);
        }
        return Ok(Value::StringArray(strings));
    }
    if let Some(kind) = NumericKind::from_primitive_name(&element_descriptor.name) {
        let mut elements = Vec::with_capacity(count);
        for _ in 0..count {
            elements.push(read_numeric_payload(buf, kind)?);
        }
        return Ok(Value::NumericArray(kind, elements));
    }

    let mut items = Vec::with_capacity(count);
    for _ in 0..count {
        items.push(decode_nested(buf)?);
    }
    Ok(Value::ObjectArray(items))
}

fn decode_nested(buf: &mut impl Buf) -> Result<Value, PjrmiError> {
    let tag = ArgTag::try_from_u8(wire::get_u8(buf)?)
        .map_err(|e| PjrmiError::MarshalError { type_id: 0, reason: e.to_string() })?;
    match tag {
        ArgTag::Reference => Ok(Value::Handle(Handle(wire::get_i64(buf)?))),
        ArgTag::Value => {
            let scalar = wire::get_u8(buf)?;
            match scalar {
                NESTED_SCALAR_BOOL => Ok(Value::Bool(wire::get_u8(buf)? != 0)),
                NESTED_SCALAR_STRING => Ok(Value::Str(wire::get_utf16_string(buf)?)),
                other => {
                    let kind = NumericKind::from_nested_tag(other).ok_or(PjrmiError::MarshalError {
                        type_id: 0,
                        reason: format!("unrecognized nested scalar discriminant `{other}`"),
                    })?;
                    Ok(Value::Numeric(read_numeric_payload(buf, kind)?))
                }
            }
        }
        other => Err(PjrmiError::MarshalError {
            type_id: 0,
            reason: format!("`{other:?}` is not a decodable nested element tag"),
        }),
    }
}

fn read_numeric_payload(buf: &mut impl Buf, kind: NumericKind) -> Result<NumericValue, PjrmiError> {
    Ok(match kind {
        NumericKind::Byte => NumericValue::Byte(wire::get_u8(buf)? as i8),
        NumericKind::Short => NumericValue::Short(get_i16(buf)?),
        NumericKind::Char => NumericValue::Char(get_i16(buf)? as u16),
        NumericKind::Int => NumericValue::Int(wire::get_i32(buf)?),
        NumericKind::Long => NumericValue::Long(wire::get_i64(buf)?),
        NumericKind::Float => NumericValue::Float(wire::get_f32(buf)?),
        NumericKind::Double => NumericValue::Double(wire::get_f64(buf)?),
    })
}

/// A big-endian `i16`, matching [`write_numeric_payload`]'s `short`/`char`
/// width. `pjrmi-proto`'s wire module stops at `i32`, so this stays local.
fn get_i16(buf: &mut impl Buf) -> Result<i16, PjrmiError> {
    if buf.remaining() < 2 {
        return Err(PjrmiError::MarshalError {
            type_id: 0,
            reason: format!("expected 2 bytes for a short/char field, found {}", buf.remaining()),
        });
    }
    Ok(buf.get_i16())
}

fn type_mismatch(target: TypeId, value: &Value, expected: &str) -> PjrmiError {
    PjrmiError::MarshalError {
        type_id: target.0,
        reason: format!("expected a value assignable to {expected}, got {value:?}"),
    }
}

/// Chooses the narrowest numeric kind that exactly represents `source`,
/// per the `byte < short < int < long` ladder with `float` preferred over
/// `double` when exact (spec.md §4.4's generic-object inference rule).
fn infer_narrowest_kind(source: NumericValue) -> NumericKind {
    if source.kind().is_floating() {
        if source.round_trips_to(NumericKind::Float) {
            return NumericKind::Float;
        }
        return NumericKind::Double;
    }
    for candidate in [NumericKind::Byte, NumericKind::Short, NumericKind::Int, NumericKind::Long] {
        if source.round_trips_to(candidate) {
            return candidate;
        }
    }
    NumericKind::Long
}

fn write_numeric_payload(buf: &mut BytesMut, value: NumericValue, kind: NumericKind) {
    let widened = widen_to_i64_or_f64(value);
    match kind {
        NumericKind::Byte => buf.put_i8(widened.0 as i8),
        NumericKind::Short | NumericKind::Char => buf.put_i16(widened.0 as i16),
        NumericKind::Int => buf.put_i32(widened.0 as i32),
        NumericKind::Long => buf.put_i64(widened.0),
        NumericKind::Float => buf.put_f32(widened.1 as f32),
        NumericKind::Double => buf.put_f64(widened.1),
    }
}

fn widen_to_i64_or_f64(value: NumericValue) -> (i64, f64) {
    match value {
        NumericValue::Byte(v) => (i64::from(v), f64::from(v)),
        NumericValue::Short(v) => (i64::from(v), f64::from(v)),
        NumericValue::Char(v) => (i64::from(v), f64::from(v)),
        NumericValue::Int(v) => (i64::from(v), f64::from(v)),
        NumericValue::Long(v) => (v, v as f64),
        NumericValue::Float(v) => (v as i64, f64::from(v)),
        NumericValue::Double(v) => (v as i64, v),
    }
}
