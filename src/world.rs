// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! World: central entity and component storage.

use ahash::AHashMap;
use smallvec::SmallVec;
use std::any::{Any, TypeId};
use std::ptr::NonNull;

use crate::component::{component_id, Component, MAX_COMPONENTS};
use crate::entity::EntityId;
use crate::mask::ComponentMask;
use crate::observer::{ComponentEvent, SignalBlock};
use crate::storage::{ErasedStore, SparseSet};
use crate::view::{View, ViewSpec};

/// Central ECS world.
///
/// Owns all entities, per-type component stores, per-entity signature masks
/// and observer tables. Every operation completes before it returns; the
/// world is single-threaded and callers serialize access externally.
pub struct World {
    /// Per-slot component signature, indexed by entity index
    signatures: Vec<ComponentMask>,

    /// Per-slot reuse counter, indexed by entity index
    generations: Vec<u32>,

    /// Freed identifiers carrying their post-increment generation
    free_list: Vec<EntityId>,

    /// Component stores, indexed by component id. The arena is the single
    /// owner; the component-id registry supplies the type-to-slot mapping.
    stores_by_id: Vec<Option<Box<dyn ErasedStore>>>,

    /// Observer blocks keyed by component type
    signals: AHashMap<TypeId, Box<dyn Any>>,

    /// Per-component-id hook firing the Removed event during destruction.
    /// Installed the first time a type is added or observed.
    removed_triggers: Vec<Option<fn(&mut World, EntityId)>>,
}

/// Monomorphized Removed-event hook stored as a plain fn pointer so the
/// destroy loop can lift it out of the table and re-borrow the world.
fn removed_trigger<T: Component>(world: &mut World, id: EntityId) {
    world.trigger::<T>(id, ComponentEvent::Removed);
}

impl World {
    /// Create a new, empty world.
    pub fn new() -> Self {
        Self {
            signatures: Vec::new(),
            generations: Vec::new(),
            free_list: Vec::new(),
            stores_by_id: Vec::new(),
            signals: AHashMap::new(),
            removed_triggers: Vec::new(),
        }
    }

    /// Create a new entity.
    ///
    /// Reuses a freed slot when one is available; the identifier then carries
    /// the slot's bumped generation.
    pub fn create(&mut self) -> EntityId {
        if let Some(freed) = self.free_list.pop() {
            let index = freed.index();
            return EntityId::from_parts(self.generations[index as usize], index);
        }

        let index = self.signatures.len() as u32;
        self.signatures.push(ComponentMask::new());
        self.generations.push(0);
        EntityId::from_parts(0, index)
    }

    /// Create `count` entities, draining the free list before growing the
    /// entity tables in one step.
    pub fn create_bulk(&mut self, count: usize) -> Vec<EntityId> {
        let mut entities = Vec::with_capacity(count);
        while entities.len() < count && !self.free_list.is_empty() {
            entities.push(self.create());
        }

        let remaining = count - entities.len();
        if remaining > 0 {
            let start = self.signatures.len() as u32;
            self.signatures
                .resize(self.signatures.len() + remaining, ComponentMask::new());
            self.generations.resize(self.generations.len() + remaining, 0);
            for offset in 0..remaining as u32 {
                entities.push(EntityId::from_parts(0, start + offset));
            }
        }
        entities
    }

    /// Create (or recreate) an entity with a specific identifier.
    ///
    /// Idempotent when `id` is already alive. Otherwise the slot is claimed
    /// with the identifier's generation and removed from the free list.
    /// Intended for deserialization, which must preserve identifiers.
    pub fn create_with_id(&mut self, id: EntityId) -> EntityId {
        let index = id.index() as usize;
        if index >= self.signatures.len() {
            self.signatures.resize(index + 1, ComponentMask::new());
            self.generations.resize(index + 1, 0);
        }

        if self.is_alive(id) {
            return id;
        }

        self.free_list.retain(|freed| freed.index() != id.index());
        debug_assert!(
            self.signatures[index].is_empty(),
            "dead slot carries a non-empty signature"
        );
        self.generations[index] = id.generation();
        self.signatures[index].clear();
        id
    }

    /// Destroy an entity and all its components.
    ///
    /// Only stores the entity actually populated are visited, independent of
    /// how many component types are registered. For each set signature bit,
    /// in ascending component-id order, the Removed event fires (the callback
    /// still sees the value) and then the store row is dropped. Destroying a
    /// dead identifier is a no-op.
    pub fn destroy(&mut self, id: EntityId) {
        if !self.is_alive(id) {
            return;
        }
        let index = id.index() as usize;

        // Iterate a snapshot of the signature so observer side effects cannot
        // feed back into the loop.
        let mut bits: SmallVec<[usize; 8]> = SmallVec::new();
        self.signatures[index].for_each_set_bit(|bit| bits.push(bit));

        for bit in bits {
            if let Some(trigger) = self.removed_triggers.get(bit).copied().flatten() {
                trigger(&mut *self, id);
            }
            if let Some(Some(store)) = self.stores_by_id.get_mut(bit) {
                store.remove_entity(id);
            }
        }

        self.signatures[index].clear();
        self.generations[index] = self.generations[index].wrapping_add(1);
        self.free_list
            .push(EntityId::from_parts(self.generations[index], id.index()));
    }

    /// True if `id` refers to a live entity (index in range and generation
    /// current).
    pub fn is_alive(&self, id: EntityId) -> bool {
        let index = id.index() as usize;
        index < self.signatures.len() && self.generations[index] == id.generation()
    }

    /// Number of entity slots ever allocated, including destroyed ones.
    pub fn entity_count(&self) -> usize {
        self.signatures.len()
    }

    /// Identifier currently occupying slot `index`.
    ///
    /// The index must be below [`entity_count`](Self::entity_count).
    pub fn entity_at(&self, index: u32) -> EntityId {
        EntityId::from_parts(self.generations[index as usize], index)
    }

    /// Signature mask of an entity.
    pub fn entity_mask(&self, id: EntityId) -> &ComponentMask {
        &self.signatures[id.index() as usize]
    }

    /// Add a component to an entity, firing the `Added` event.
    ///
    /// If the entity already has a `T`, the value is overwritten in place:
    /// no `Removed` event is emitted and `Added` fires again.
    pub fn add<T: Component>(&mut self, id: EntityId, component: T) {
        let index = id.index() as usize;
        if index >= self.signatures.len() {
            self.signatures.resize(index + 1, ComponentMask::new());
            self.generations.resize(index + 1, 0);
        }

        let cid = component_id::<T>();
        self.ensure_store::<T>().insert(id, component);
        self.signatures[index].set(cid);
        self.ensure_removed_trigger::<T>();
        self.trigger::<T>(id, ComponentEvent::Added);
    }

    /// Remove a component from an entity, firing the `Removed` event first so
    /// observers still see a valid value. No-op if the component is absent or
    /// the identifier is stale.
    pub fn remove<T: Component>(&mut self, id: EntityId) {
        if !self.has::<T>(id) {
            return;
        }
        // A stale generation shares the signature slot with the live entity;
        // full-identifier store membership is the authoritative check.
        match self.store::<T>() {
            Some(store) if store.contains(id) => {}
            _ => return,
        }

        self.trigger::<T>(id, ComponentEvent::Removed);
        if let Some(store) = self.store_mut::<T>() {
            store.remove(id);
        }
        self.signatures[id.index() as usize].reset(component_id::<T>());
    }

    /// Whether the entity has a `T` component. Pure signature test, O(1);
    /// never touches a store.
    pub fn has<T: Component>(&self, id: EntityId) -> bool {
        let index = id.index() as usize;
        index < self.signatures.len() && self.signatures[index].test(component_id::<T>())
    }

    /// Reference to the entity's `T` component.
    ///
    /// Calling this for an absent component is a caller error; use
    /// [`try_get`](Self::try_get) for the fallible form.
    pub fn get<T: Component>(&self, id: EntityId) -> &T {
        debug_assert!(self.has::<T>(id));
        match self.try_get(id) {
            Some(component) => component,
            None => panic!("entity {id:?} has no such component"),
        }
    }

    /// Mutable reference to the entity's `T` component. Mutation through this
    /// reference does not fire `Modified`; use [`patch`](Self::patch) for
    /// observed mutation.
    pub fn get_mut<T: Component>(&mut self, id: EntityId) -> &mut T {
        debug_assert!(self.has::<T>(id));
        match self.try_get_mut(id) {
            Some(component) => component,
            None => panic!("entity {id:?} has no such component"),
        }
    }

    /// Fallible component lookup.
    pub fn try_get<T: Component>(&self, id: EntityId) -> Option<&T> {
        self.store::<T>()?.try_get(id)
    }

    pub fn try_get_mut<T: Component>(&mut self, id: EntityId) -> Option<&mut T> {
        self.store_mut::<T>()?.try_get_mut(id)
    }

    /// Mutate the entity's `T` in place and fire the `Modified` event.
    /// Silent no-op if the component is absent.
    pub fn patch<T, F>(&mut self, id: EntityId, func: F)
    where
        T: Component,
        F: FnOnce(&mut T),
    {
        if !self.has::<T>(id) {
            return;
        }
        let Some(component) = self.store_mut::<T>().and_then(|s| s.try_get_mut(id)) else {
            return;
        };
        func(component);
        self.trigger::<T>(id, ComponentEvent::Modified);
    }

    /// Register a callback for a component event.
    ///
    /// Callbacks run synchronously on the triggering thread, in registration
    /// order. They receive the entity and a mutable reference to the
    /// component; for `Removed` the row is still present when the callback
    /// runs and is removed afterwards.
    pub fn on_event<T, F>(&mut self, event: ComponentEvent, callback: F)
    where
        T: Component,
        F: FnMut(EntityId, &mut T) + 'static,
    {
        self.ensure_removed_trigger::<T>();
        let block = self
            .signals
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(SignalBlock::<T>::default()) as Box<dyn Any>);
        let block = block
            .downcast_mut::<SignalBlock<T>>()
            .expect("signal block type invariant");
        block.callbacks_mut(event).push(Box::new(callback));
    }

    /// Create a view over entities bearing every component in `Q`.
    ///
    /// `Q` is a tuple of component types, e.g.
    /// `world.view::<(Position, Velocity)>()`.
    pub fn view<Q: ViewSpec>(&mut self) -> View<'_, Q> {
        View::new(self)
    }

    fn trigger<T: Component>(&mut self, id: EntityId, event: ComponentEvent) {
        let cid = component_id::<T>();
        let Some(block) = self
            .signals
            .get_mut(&TypeId::of::<T>())
            .and_then(|block| block.downcast_mut::<SignalBlock<T>>())
        else {
            return;
        };
        let Some(component) = self
            .stores_by_id
            .get_mut(cid)
            .and_then(|slot| slot.as_mut())
            .and_then(|store| store.as_any_mut().downcast_mut::<SparseSet<T>>())
            .and_then(|store| store.try_get_mut(id))
        else {
            return;
        };

        for callback in block.callbacks_mut(event) {
            callback(id, &mut *component);
        }
    }

    fn ensure_removed_trigger<T: Component>(&mut self) {
        let cid = component_id::<T>();
        if cid >= self.removed_triggers.len() {
            self.removed_triggers.resize(cid + 1, None);
        }
        if self.removed_triggers[cid].is_none() {
            self.removed_triggers[cid] = Some(removed_trigger::<T>);
        }
    }

    fn ensure_store<T: Component>(&mut self) -> &mut SparseSet<T> {
        let cid = component_id::<T>();
        assert!(
            cid < MAX_COMPONENTS,
            "component type limit ({MAX_COMPONENTS}) exceeded"
        );
        if cid >= self.stores_by_id.len() {
            self.stores_by_id.resize_with(cid + 1, || None);
        }
        let slot = &mut self.stores_by_id[cid];
        if slot.is_none() {
            *slot = Some(Box::new(SparseSet::<T>::new()));
        }
        slot.as_mut()
            .and_then(|store| store.as_any_mut().downcast_mut::<SparseSet<T>>())
            .expect("store type invariant")
    }

    fn store<T: Component>(&self) -> Option<&SparseSet<T>> {
        self.stores_by_id
            .get(component_id::<T>())?
            .as_ref()?
            .as_any()
            .downcast_ref::<SparseSet<T>>()
    }

    fn store_mut<T: Component>(&mut self) -> Option<&mut SparseSet<T>> {
        self.stores_by_id
            .get_mut(component_id::<T>())?
            .as_mut()?
            .as_any_mut()
            .downcast_mut::<SparseSet<T>>()
    }

    /// Internal helper exposing a store pointer for view iteration.
    pub(crate) fn store_ptr<T: Component>(&mut self) -> Option<NonNull<SparseSet<T>>> {
        self.store_mut::<T>().map(NonNull::from)
    }

    pub(crate) fn signature_table(&self) -> &[ComponentMask] {
        &self.signatures
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}
