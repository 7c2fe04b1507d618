//! Prefab templates: named component sets instantiated onto fresh entities.

use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::entity::EntityId;
use crate::error::{Error, ErrorReporter, LogReporter, Result};
use crate::serialization::SerializationContext;
use crate::world::World;

/// Manages entity templates loaded from JSON.
///
/// A prefab document is an object mapping prefab names to component maps:
///
/// ```json
/// {
///   "Player": {
///     "Position": {"x": 0.0, "y": 0.0},
///     "Velocity": {"x": 5.0, "y": 5.0}
///   }
/// }
/// ```
///
/// Instantiation replays the component map through the serialization
/// registry, so every component type a prefab uses must be registered on the
/// context first.
pub struct PrefabManager<'ctx> {
    context: &'ctx SerializationContext,
    prefabs: FxHashMap<String, serde_json::Map<String, Value>>,
    reporter: Box<dyn ErrorReporter>,
}

impl<'ctx> PrefabManager<'ctx> {
    pub fn new(context: &'ctx SerializationContext) -> Self {
        PrefabManager {
            context,
            prefabs: FxHashMap::default(),
            reporter: Box::new(LogReporter),
        }
    }

    /// Replace the error reporter.
    pub fn set_reporter(&mut self, reporter: Box<dyn ErrorReporter>) {
        self.reporter = reporter;
    }

    /// Number of loaded prefabs.
    pub fn prefab_count(&self) -> usize {
        self.prefabs.len()
    }

    /// Load prefab definitions from a JSON document, merging into the set
    /// already loaded. Entries whose value is not an object are reported and
    /// skipped.
    pub fn load_prefabs(&mut self, json: &str) -> Result<()> {
        let doc: Value = match serde_json::from_str(json) {
            Ok(doc) => doc,
            Err(parse) => {
                let err = Error::InvalidJson(format!("prefab JSON parse error: {parse}"));
                self.reporter.report(&err);
                return Err(err);
            }
        };

        let Value::Object(entries) = doc else {
            let err = Error::TypeMismatch("prefab JSON must be an object at the top level".to_string());
            self.reporter.report(&err);
            return Err(err);
        };

        for (name, value) in entries {
            match value {
                Value::Object(components) => {
                    self.prefabs.insert(name, components);
                }
                _ => {
                    self.reporter.report(&Error::TypeMismatch(format!(
                        "prefab '{name}' data must be an object"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Create an entity from a prefab template.
    ///
    /// Component entries that fail to deserialize are reported and skipped;
    /// the entity is still created with the rest.
    pub fn instantiate(&self, name: &str, world: &mut World) -> Result<EntityId> {
        let Some(components) = self.prefabs.get(name) else {
            let err = Error::UnknownPrefab(name.to_string());
            self.reporter.report(&err);
            return Err(err);
        };

        let entity = world.create();
        for (component_name, value) in components {
            let _ = self
                .context
                .deserialize_component(world, entity, component_name, value);
        }
        Ok(entity)
    }
}
