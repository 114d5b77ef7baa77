//! The replicable entity trait and the constructor registry that rebuilds
//! entities from their kind id on the receiving side.

use std::any::Any;
use std::collections::HashMap;

use rift_protocol::{CommandPayload, EntityKindId, WireError, WireReader, WireWriter};

/// A game entity whose registered properties cross the wire.
///
/// Implementors delegate the encode/decode pair to a static
/// [`PropertySet`](rift_protocol::PropertySet) so the ordered registry is
/// built exactly once per type:
///
/// ```ignore
/// fn properties() -> &'static PropertySet<Self> {
///     static SET: OnceLock<PropertySet<Pawn>> = OnceLock::new();
///     SET.get_or_init(|| PropertySet::new().register(/* … */))
/// }
/// ```
pub trait Replicated: Any + Send {
    /// Stable type id; keys the constructor registry.
    fn kind(&self) -> EntityKindId;

    /// Writes every registered property in index order.
    fn encode_properties(&self, w: &mut WireWriter);

    /// Reads every registered property in index order, invoking setters.
    fn decode_properties(&mut self, r: &mut WireReader<'_>) -> Result<(), WireError>;

    /// Applies a net command issued by this entity's owner. The default
    /// ignores commands; avatar types override it.
    fn apply_command(&mut self, _command: &CommandPayload) {}

    /// Upcast for gameplay-side downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Mutable upcast for gameplay-side downcasting.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Maps [`EntityKindId`] to a constructor producing a default-initialized
/// entity, ready to have its properties overwritten from a snapshot blob.
///
/// Gameplay registers every replicable type at startup; the merge skips
/// (and logs) snapshot nodes whose kind has no constructor here.
#[derive(Default)]
pub struct EntityRegistry {
    constructors: HashMap<EntityKindId, fn() -> Box<dyn Replicated>>,
}

impl EntityRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a constructor for `kind`.
    ///
    /// # Panics
    ///
    /// Panics if `kind` is already registered — two types sharing a kind id
    /// would corrupt every snapshot mentioning it.
    pub fn register(&mut self, kind: EntityKindId, constructor: fn() -> Box<dyn Replicated>) {
        if self.constructors.insert(kind, constructor).is_some() {
            panic!("entity kind {kind:?} registered twice");
        }
    }

    /// Builds a fresh entity of `kind`, if registered.
    pub fn construct(&self, kind: EntityKindId) -> Option<Box<dyn Replicated>> {
        self.constructors.get(&kind).map(|ctor| ctor())
    }

    /// `true` if `kind` has a constructor.
    pub fn contains(&self, kind: EntityKindId) -> bool {
        self.constructors.contains_key(&kind)
    }

    /// Number of registered kinds.
    pub fn len(&self) -> usize {
        self.constructors.len()
    }

    /// `true` if no kinds are registered.
    pub fn is_empty(&self) -> bool {
        self.constructors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::OnceLock;

    use rift_protocol::{PropertyKind, PropertySet, PropertyValue};

    #[derive(Debug, Default)]
    struct Mote {
        charge: i32,
    }

    impl Mote {
        const KIND: EntityKindId = EntityKindId(900);

        fn properties() -> &'static PropertySet<Mote> {
            static SET: OnceLock<PropertySet<Mote>> = OnceLock::new();
            SET.get_or_init(|| {
                PropertySet::new().register(
                    0,
                    "charge",
                    PropertyKind::Int,
                    |m| PropertyValue::Int(m.charge),
                    |m, v| {
                        if let PropertyValue::Int(i) = v {
                            m.charge = i;
                        }
                    },
                )
            })
        }
    }

    impl Replicated for Mote {
        fn kind(&self) -> EntityKindId {
            Self::KIND
        }

        fn encode_properties(&self, w: &mut WireWriter) {
            Self::properties().encode(self, w);
        }

        fn decode_properties(&mut self, r: &mut WireReader<'_>) -> Result<(), WireError> {
            Self::properties().decode(self, r)
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    #[test]
    fn test_registry_constructs_registered_kind() {
        let mut registry = EntityRegistry::new();
        registry.register(Mote::KIND, || Box::new(Mote::default()));

        let entity = registry.construct(Mote::KIND).unwrap();
        assert_eq!(entity.kind(), Mote::KIND);
        assert!(entity.as_any().downcast_ref::<Mote>().is_some());
    }

    #[test]
    fn test_unknown_kind_yields_none() {
        let registry = EntityRegistry::new();
        assert!(registry.construct(EntityKindId(1)).is_none());
        assert!(!registry.contains(EntityKindId(1)));
    }

    #[test]
    #[should_panic(expected = "registered twice")]
    fn test_duplicate_kind_panics() {
        let mut registry = EntityRegistry::new();
        registry.register(Mote::KIND, || Box::new(Mote::default()));
        registry.register(Mote::KIND, || Box::new(Mote::default()));
    }

    #[test]
    fn test_constructed_entity_decodes_blob() {
        let mut registry = EntityRegistry::new();
        registry.register(Mote::KIND, || Box::new(Mote::default()));

        let source = Mote { charge: -7 };
        let mut w = WireWriter::new();
        source.encode_properties(&mut w);
        let blob = w.into_bytes();

        let mut entity = registry.construct(Mote::KIND).unwrap();
        entity
            .decode_properties(&mut WireReader::new(&blob))
            .unwrap();
        assert_eq!(entity.as_any().downcast_ref::<Mote>().unwrap().charge, -7);
    }
}
