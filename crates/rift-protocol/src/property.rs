//! Ordered, reflection-free property registry.
//!
//! Every replicable entity type registers its wire-visible fields by hand as
//! an ordered list of `(index, name, kind, getter, setter)` entries. The
//! index is the wire-stable key — encoding walks the registrations in index
//! order, so both ends must register the identical set for a given entity
//! kind. There is deliberately no runtime reflection: wire stability comes
//! from source-controlled indices, not type introspection.
//!
//! Two builds that register *different* sets for the same kind will decode
//! each other's blobs misaligned without any error. The protocol assumes
//! strict version lockstep and does not defend against this.

use crate::ids::Vec2;
use crate::wire::{WireError, WireReader, WireWriter};

// ---------------------------------------------------------------------------
// Kinds & values
// ---------------------------------------------------------------------------

/// Wire type of a registered property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    /// One byte, 0 or 1.
    Bool,
    /// Little-endian `i32`.
    Int,
    /// Little-endian `f32` bit pattern.
    Float,
    /// Two consecutive `f32`s.
    Vec2,
    /// One raw byte (byte-backed enums).
    Byte,
}

/// A property value in transit between an entity and the wire.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PropertyValue {
    /// Boolean flag.
    Bool(bool),
    /// 32-bit signed integer.
    Int(i32),
    /// 32-bit float.
    Float(f32),
    /// 2-D vector.
    Vec2(Vec2),
    /// Byte-backed enum discriminant.
    Byte(u8),
}

impl PropertyValue {
    /// The wire kind of this value.
    pub fn kind(&self) -> PropertyKind {
        match self {
            PropertyValue::Bool(_) => PropertyKind::Bool,
            PropertyValue::Int(_) => PropertyKind::Int,
            PropertyValue::Float(_) => PropertyKind::Float,
            PropertyValue::Vec2(_) => PropertyKind::Vec2,
            PropertyValue::Byte(_) => PropertyKind::Byte,
        }
    }
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

/// One registered property: wire index, diagnostic name, wire kind, and the
/// accessor pair that moves the value in and out of the entity.
pub struct Property<T: ?Sized> {
    /// Wire-stable key; encoding order is ascending index.
    pub index: u8,
    /// Diagnostic name, never serialized.
    pub name: &'static str,
    /// Wire type; the getter must return exactly this kind.
    pub kind: PropertyKind,
    /// Reads the current value off the entity.
    pub get: fn(&T) -> PropertyValue,
    /// Writes a decoded value back onto the entity.
    pub set: fn(&mut T, PropertyValue),
}

/// The ordered property set of one concrete entity type.
///
/// Must be fully built before the first serialize/deserialize call;
/// entities typically keep one in a `std::sync::OnceLock`.
pub struct PropertySet<T: ?Sized> {
    props: Vec<Property<T>>,
}

impl<T: ?Sized> Default for PropertySet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> PropertySet<T> {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self { props: Vec::new() }
    }

    /// Registers a property.
    ///
    /// # Panics
    ///
    /// Panics if `index` is already registered — duplicate indices are a
    /// programmer error that would corrupt the wire layout.
    pub fn register(
        mut self,
        index: u8,
        name: &'static str,
        kind: PropertyKind,
        get: fn(&T) -> PropertyValue,
        set: fn(&mut T, PropertyValue),
    ) -> Self {
        if self.props.iter().any(|p| p.index == index) {
            panic!("duplicate property index {index} ({name})");
        }
        self.props.push(Property {
            index,
            name,
            kind,
            get,
            set,
        });
        self.props.sort_by_key(|p| p.index);
        self
    }

    /// Number of registered properties.
    pub fn len(&self) -> usize {
        self.props.len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.props.is_empty()
    }

    /// Encodes every registered property of `target` in index order.
    ///
    /// # Panics
    ///
    /// Panics if a getter returns a value whose kind disagrees with its
    /// registration — the accessor pair no longer round-trips one type.
    pub fn encode(&self, target: &T, w: &mut WireWriter) {
        for prop in &self.props {
            let value = (prop.get)(target);
            match (prop.kind, value) {
                (PropertyKind::Bool, PropertyValue::Bool(v)) => w.put_bool(v),
                (PropertyKind::Int, PropertyValue::Int(v)) => w.put_i32(v),
                (PropertyKind::Float, PropertyValue::Float(v)) => w.put_f32(v),
                (PropertyKind::Vec2, PropertyValue::Vec2(v)) => w.put_vec2(v),
                (PropertyKind::Byte, PropertyValue::Byte(v)) => w.put_u8(v),
                (kind, value) => panic!(
                    "property {} registered as {kind:?} but getter returned {:?}",
                    prop.name,
                    value.kind()
                ),
            }
        }
    }

    /// Convenience: encodes into a fresh blob.
    pub fn encode_to_vec(&self, target: &T) -> Vec<u8> {
        let mut w = WireWriter::new();
        self.encode(target, &mut w);
        w.into_bytes()
    }

    /// Decodes every registered property in index order, invoking each
    /// setter with the read value.
    pub fn decode(&self, target: &mut T, r: &mut WireReader<'_>) -> Result<(), WireError> {
        for prop in &self.props {
            let value = match prop.kind {
                PropertyKind::Bool => PropertyValue::Bool(r.get_bool()?),
                PropertyKind::Int => PropertyValue::Int(r.get_i32()?),
                PropertyKind::Float => PropertyValue::Float(r.get_f32()?),
                PropertyKind::Vec2 => PropertyValue::Vec2(r.get_vec2()?),
                PropertyKind::Byte => PropertyValue::Byte(r.get_u8()?),
            };
            (prop.set)(target, value);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
