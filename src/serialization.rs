//! World serialization.
//!
//! Component types are registered by name on a [`SerializationContext`];
//! the context then serializes whole worlds to JSON or a little-endian binary
//! stream and back. Failures on skippable entries are routed through the
//! injectable [`ErrorReporter`] and deserialization keeps going where the
//! format allows it.

use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::io::{Read, Write};

use crate::component::{component_id, Component};
use crate::entity::EntityId;
use crate::error::{Error, ErrorReporter, LogReporter, Result};
use crate::world::World;

type JsonWriteFn = Box<dyn Fn(&World, EntityId) -> Result<Value>>;
type JsonReadFn = Box<dyn Fn(&mut World, EntityId, &Value) -> Result<()>>;
type BinaryWriteFn = Box<dyn Fn(&World, EntityId, &mut dyn Write) -> Result<()>>;
type BinaryReadFn = Box<dyn Fn(&mut World, EntityId, &mut dyn Read) -> Result<()>>;

struct ComponentCodec {
    name: String,
    json_write: Option<JsonWriteFn>,
    json_read: Option<JsonReadFn>,
    binary_write: Option<BinaryWriteFn>,
    binary_read: Option<BinaryReadFn>,
}

/// Registry of per-component codecs plus world (de)serialization entry
/// points.
pub struct SerializationContext {
    codecs: Vec<ComponentCodec>,
    by_name: FxHashMap<String, usize>,
    by_id: Vec<Option<usize>>,
    reporter: Box<dyn ErrorReporter>,
}

impl SerializationContext {
    pub fn new() -> Self {
        SerializationContext {
            codecs: Vec::new(),
            by_name: FxHashMap::default(),
            by_id: Vec::new(),
            reporter: Box::new(LogReporter),
        }
    }

    /// Replace the error reporter used for skippable failures.
    pub fn set_reporter(&mut self, reporter: Box<dyn ErrorReporter>) {
        self.reporter = reporter;
    }

    /// Register JSON serialization for component type `T` under `name`.
    pub fn register<T>(&mut self, name: &str)
    where
        T: Component + Serialize + DeserializeOwned,
    {
        let slot = self.codec_slot::<T>(name);

        let codec_name = name.to_string();
        self.codecs[slot].json_write = Some(Box::new(move |world, id| {
            serde_json::to_value(world.get::<T>(id))
                .map_err(|e| Error::Internal(format!("component '{codec_name}': {e}")))
        }));

        let codec_name = name.to_string();
        self.codecs[slot].json_read = Some(Box::new(move |world, id, value| {
            let component: T = serde_json::from_value(value.clone())
                .map_err(|e| Error::TypeMismatch(format!("component '{codec_name}': {e}")))?;
            world.add(id, component);
            Ok(())
        }));
    }

    /// Register binary serialization for component type `T` under `name`.
    ///
    /// The name must match the JSON registration when both are used; the
    /// payload length is whatever the codec consumes.
    pub fn register_binary<T>(&mut self, name: &str)
    where
        T: Component + Serialize + DeserializeOwned,
    {
        let slot = self.codec_slot::<T>(name);

        let codec_name = name.to_string();
        self.codecs[slot].binary_write = Some(Box::new(move |world, id, out| {
            bincode::serialize_into(&mut *out, world.get::<T>(id))
                .map_err(|e| Error::Internal(format!("component '{codec_name}': {e}")))
        }));

        let codec_name = name.to_string();
        self.codecs[slot].binary_read = Some(Box::new(move |world, id, input| {
            let component: T = bincode::deserialize_from(&mut *input)
                .map_err(|e| Error::TypeMismatch(format!("component '{codec_name}': {e}")))?;
            world.add(id, component);
            Ok(())
        }));
    }

    fn codec_slot<T: Component>(&mut self, name: &str) -> usize {
        let cid = component_id::<T>();
        let slot = match self.by_name.get(name) {
            Some(&slot) => slot,
            None => {
                let slot = self.codecs.len();
                self.codecs.push(ComponentCodec {
                    name: name.to_string(),
                    json_write: None,
                    json_read: None,
                    binary_write: None,
                    binary_read: None,
                });
                self.by_name.insert(name.to_string(), slot);
                slot
            }
        };
        if cid >= self.by_id.len() {
            self.by_id.resize(cid + 1, None);
        }
        self.by_id[cid] = Some(slot);
        slot
    }

    /// Serialize every live entity to JSON:
    /// `{"entities":[{"id":<u64>,"components":{<name>:<value>,…}},…]}`.
    ///
    /// Only components with a registered JSON codec are emitted, in ascending
    /// component-id order.
    pub fn serialize_json(&self, world: &World, out: &mut dyn Write) -> Result<()> {
        let mut entities = Vec::new();

        for index in 0..world.entity_count() as u32 {
            let id = world.entity_at(index);
            if !world.is_alive(id) {
                continue;
            }
            let mask = *world.entity_mask(id);

            let mut components = serde_json::Map::new();
            for (cid, slot) in self.by_id.iter().enumerate() {
                let Some(slot) = slot else { continue };
                if !mask.test(cid) {
                    continue;
                }
                let codec = &self.codecs[*slot];
                if let Some(write) = &codec.json_write {
                    components.insert(codec.name.clone(), write(world, id)?);
                }
            }

            let mut entry = serde_json::Map::new();
            entry.insert("id".to_string(), Value::from(id.to_bits()));
            entry.insert("components".to_string(), Value::Object(components));
            entities.push(Value::Object(entry));
        }

        let doc = serde_json::json!({ "entities": entities });
        serde_json::to_writer(out, &doc).map_err(|e| Error::Internal(format!("writing JSON: {e}")))
    }

    /// Populate a world from JSON produced by
    /// [`serialize_json`](Self::serialize_json).
    ///
    /// Entity identifiers are preserved via `create_with_id`. A missing
    /// top-level `entities` array fails; per-entity problems are reported and
    /// skipped, and unknown component names do not stop the load.
    pub fn deserialize_json(&self, world: &mut World, json: &str) -> Result<()> {
        let doc: Value = match serde_json::from_str(json) {
            Ok(doc) => doc,
            Err(parse) => {
                let err = Error::InvalidJson(format!("JSON parse error: {parse}"));
                self.reporter.report(&err);
                return Err(err);
            }
        };

        let Some(entities) = doc.get("entities").and_then(Value::as_array) else {
            let err = Error::MissingField("missing 'entities' array".to_string());
            self.reporter.report(&err);
            return Err(err);
        };

        for entry in entities {
            let Some(id_bits) = entry.get("id").and_then(Value::as_u64) else {
                self.reporter
                    .report(&Error::MissingField("entity missing 'id'".to_string()));
                continue;
            };
            let id = world.create_with_id(EntityId::from_bits(id_bits));

            let components = match entry.get("components") {
                Some(Value::Object(components)) => components,
                Some(_) => {
                    self.reporter.report(&Error::TypeMismatch(
                        "entity 'components' must be an object".to_string(),
                    ));
                    continue;
                }
                None => continue,
            };

            for (name, value) in components {
                // Already reported; the rest of the entity still loads.
                let _ = self.deserialize_component(world, id, name, value);
            }
        }
        Ok(())
    }

    /// Deserialize a single named component onto an entity.
    pub fn deserialize_component(
        &self,
        world: &mut World,
        id: EntityId,
        name: &str,
        value: &Value,
    ) -> Result<()> {
        let Some(&slot) = self.by_name.get(name) else {
            let err = Error::ComponentNotRegistered(name.to_string());
            self.reporter.report(&err);
            return Err(err);
        };
        let Some(read) = &self.codecs[slot].json_read else {
            let err =
                Error::Internal(format!("component '{name}' registered without a JSON reader"));
            self.reporter.report(&err);
            return Err(err);
        };

        if let Err(err) = read(world, id, value) {
            self.reporter.report(&err);
            return Err(err);
        }
        Ok(())
    }

    /// Serialize every live entity to the little-endian binary wire format:
    /// `u32` live count, then per entity a `u64` identifier, `u32` component
    /// count, and per component a length-prefixed UTF-8 name followed by the
    /// codec payload.
    pub fn serialize_binary(&self, world: &World, out: &mut dyn Write) -> Result<()> {
        let mut live = 0u32;
        for index in 0..world.entity_count() as u32 {
            if world.is_alive(world.entity_at(index)) {
                live += 1;
            }
        }
        out.write_all(&live.to_le_bytes()).map_err(stream_error)?;

        for index in 0..world.entity_count() as u32 {
            let id = world.entity_at(index);
            if !world.is_alive(id) {
                continue;
            }
            let mask = *world.entity_mask(id);
            out.write_all(&id.to_bits().to_le_bytes())
                .map_err(stream_error)?;

            let mut component_count = 0u32;
            for (cid, slot) in self.by_id.iter().enumerate() {
                if let Some(slot) = slot {
                    if mask.test(cid) && self.codecs[*slot].binary_write.is_some() {
                        component_count += 1;
                    }
                }
            }
            out.write_all(&component_count.to_le_bytes())
                .map_err(stream_error)?;

            for (cid, slot) in self.by_id.iter().enumerate() {
                let Some(slot) = slot else { continue };
                if !mask.test(cid) {
                    continue;
                }
                let codec = &self.codecs[*slot];
                if let Some(write) = &codec.binary_write {
                    let name = codec.name.as_bytes();
                    out.write_all(&(name.len() as u32).to_le_bytes())
                        .map_err(stream_error)?;
                    out.write_all(name).map_err(stream_error)?;
                    write(world, id, out)?;
                }
            }
        }
        Ok(())
    }

    /// Populate a world from a binary stream produced by
    /// [`serialize_binary`](Self::serialize_binary).
    ///
    /// An empty or truncated stream at the leading count reads as an empty
    /// world. An unknown component name is unrecoverable (the payload length
    /// is known only to its codec), so it is reported and returned.
    pub fn deserialize_binary(&self, world: &mut World, input: &mut dyn Read) -> Result<()> {
        let mut count_bytes = [0u8; 4];
        if input.read_exact(&mut count_bytes).is_err() {
            return Ok(());
        }
        let entity_count = u32::from_le_bytes(count_bytes);

        'entities: for _ in 0..entity_count {
            let Ok(id_bits) = read_u64(input) else {
                break 'entities;
            };
            let id = world.create_with_id(EntityId::from_bits(id_bits));

            let Ok(component_count) = read_u32(input) else {
                break 'entities;
            };
            for _ in 0..component_count {
                let Ok(name_len) = read_u32(input) else {
                    break 'entities;
                };
                let mut name_bytes = vec![0u8; name_len as usize];
                if input.read_exact(&mut name_bytes).is_err() {
                    break 'entities;
                }
                let Ok(name) = String::from_utf8(name_bytes) else {
                    let err = Error::Internal("component name is not UTF-8".to_string());
                    self.reporter.report(&err);
                    return Err(err);
                };

                let read = self
                    .by_name
                    .get(&name)
                    .and_then(|&slot| self.codecs[slot].binary_read.as_ref());
                let Some(read) = read else {
                    let err = Error::ComponentNotRegistered(format!(
                        "no binary reader for component '{name}'"
                    ));
                    self.reporter.report(&err);
                    return Err(err);
                };

                if let Err(err) = read(world, id, input) {
                    self.reporter.report(&err);
                    return Err(err);
                }
            }
        }
        Ok(())
    }
}

impl Default for SerializationContext {
    fn default() -> Self {
        Self::new()
    }
}

fn stream_error(e: std::io::Error) -> Error {
    Error::Internal(format!("binary stream: {e}"))
}

fn read_u32(input: &mut dyn Read) -> std::io::Result<u32> {
    let mut bytes = [0u8; 4];
    input.read_exact(&mut bytes)?;
    Ok(u32::from_le_bytes(bytes))
}

fn read_u64(input: &mut dyn Read) -> std::io::Result<u64> {
    let mut bytes = [0u8; 8];
    input.read_exact(&mut bytes)?;
    Ok(u64::from_le_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    struct Health {
        current: i32,
        max: i32,
    }

    #[test]
    fn test_json_round_trip() {
        let mut context = SerializationContext::new();
        context.register::<Health>("Health");

        let mut world = World::new();
        let e = world.create();
        world.add(e, Health { current: 5, max: 10 });

        let mut buffer = Vec::new();
        context.serialize_json(&world, &mut buffer).unwrap();

        let mut restored = World::new();
        context
            .deserialize_json(&mut restored, std::str::from_utf8(&buffer).unwrap())
            .unwrap();

        assert!(restored.is_alive(e));
        assert_eq!(*restored.get::<Health>(e), Health { current: 5, max: 10 });
    }

    #[test]
    fn test_missing_entities_field() {
        let context = SerializationContext::new();
        let mut world = World::new();
        let err = context
            .deserialize_json(&mut world, r#"{"things":[]}"#)
            .unwrap_err();
        assert!(matches!(err, Error::MissingField(_)));
    }

    #[test]
    fn test_invalid_json() {
        let context = SerializationContext::new();
        let mut world = World::new();
        let err = context.deserialize_json(&mut world, "{not json").unwrap_err();
        assert!(matches!(err, Error::InvalidJson(_)));
    }

    #[test]
    fn test_empty_binary_stream_is_empty_world() {
        let context = SerializationContext::new();
        let mut world = World::new();
        let mut input = std::io::Cursor::new(Vec::new());
        context.deserialize_binary(&mut world, &mut input).unwrap();
        assert_eq!(world.entity_count(), 0);
    }

    #[test]
    fn test_binary_wire_format_layout() {
        let mut context = SerializationContext::new();
        context.register_binary::<Health>("Health");

        let mut world = World::new();
        let e = world.create();
        world.add(e, Health { current: 1, max: 2 });

        let mut buffer = Vec::new();
        context.serialize_binary(&world, &mut buffer).unwrap();

        // u32 count, u64 id, u32 component count, u32 name length, name.
        assert_eq!(&buffer[0..4], &1u32.to_le_bytes());
        assert_eq!(&buffer[4..12], &e.to_bits().to_le_bytes());
        assert_eq!(&buffer[12..16], &1u32.to_le_bytes());
        assert_eq!(&buffer[16..20], &6u32.to_le_bytes());
        assert_eq!(&buffer[20..26], b"Health");
    }
}
