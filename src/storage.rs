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

//! Sparse-set component storage.
//!
//! Each component type gets one [`SparseSet`]: two parallel dense vectors
//! (`data` and `entities`) plus a paged sparse index mapping entity index to
//! dense slot. Pages are allocated lazily; an absent page reads as all-null.
//! Zero-sized tag components occupy no space in `data` (a `Vec` of a ZST never
//! allocates), so tags are presence-only with no separate code path.

use std::any::Any;

use crate::entity::EntityId;

/// Number of sparse slots per page.
pub const PAGE_SIZE: usize = 4096;

/// Sentinel marking an empty sparse slot.
const NULL_INDEX: usize = usize::MAX;

#[inline]
fn page_of(index: u32) -> usize {
    index as usize / PAGE_SIZE
}

#[inline]
fn offset_of(index: u32) -> usize {
    index as usize % PAGE_SIZE
}

/// Dense storage of `T` components keyed by entity.
///
/// Invariants, preserved by every mutation:
/// - `data.len() == entities.len()`
/// - `sparse[entities[i].index] == i` for every dense slot `i`
/// - `entities` holds the exact identifiers (generation included) that
///   inserted them
pub struct SparseSet<T> {
    data: Vec<T>,
    entities: Vec<EntityId>,
    pages: Vec<Option<Box<[usize]>>>,
}

impl<T> Default for SparseSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SparseSet<T> {
    pub fn new() -> Self {
        SparseSet {
            data: Vec::new(),
            entities: Vec::new(),
            pages: Vec::new(),
        }
    }

    /// Number of stored components.
    #[inline]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Dense-order identifiers, parallel to [`data`](Self::data).
    #[inline]
    pub fn entities(&self) -> &[EntityId] {
        &self.entities
    }

    /// Dense-order component values.
    #[inline]
    pub fn data(&self) -> &[T] {
        &self.data
    }

    #[inline]
    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Read the dense slot for an entity index, or `NULL_INDEX`.
    #[inline]
    fn slot(&self, index: u32) -> usize {
        match self.pages.get(page_of(index)) {
            Some(Some(page)) => page[offset_of(index)],
            _ => NULL_INDEX,
        }
    }

    fn ensure_page(&mut self, page: usize) -> &mut [usize] {
        if page >= self.pages.len() {
            self.pages.resize_with(page + 1, || None);
        }
        self.pages[page]
            .get_or_insert_with(|| vec![NULL_INDEX; PAGE_SIZE].into_boxed_slice())
    }

    /// Insert a component for `entity`, overwriting any existing value.
    ///
    /// Overwrite also refreshes the stored identifier, which is how the
    /// recorded generation follows slot reuse.
    pub fn insert(&mut self, entity: EntityId, value: T) {
        let index = entity.index();
        let dense = self.ensure_page(page_of(index))[offset_of(index)];

        if dense != NULL_INDEX {
            self.data[dense] = value;
            self.entities[dense] = entity;
        } else {
            let dense = self.data.len();
            self.entities.push(entity);
            self.data.push(value);
            self.ensure_page(page_of(index))[offset_of(index)] = dense;
        }
    }

    /// Remove the component for `entity`, if present.
    ///
    /// An identifier whose generation does not match the stored one is
    /// rejected without effect, so stale references cannot evict a component
    /// owned by a reused slot.
    pub fn remove(&mut self, entity: EntityId) {
        let index = entity.index();
        let dense = self.slot(index);
        if dense == NULL_INDEX || self.entities[dense] != entity {
            return;
        }

        let last = self.data.len() - 1;
        if dense != last {
            let moved = self.entities[last];
            self.data.swap(dense, last);
            self.entities.swap(dense, last);
            // Moved entry now lives at `dense`; fix its sparse pointer.
            self.ensure_page(page_of(moved.index()))[offset_of(moved.index())] = dense;
        }
        self.data.pop();
        self.entities.pop();
        self.ensure_page(page_of(index))[offset_of(index)] = NULL_INDEX;
    }

    /// True if `entity` (full identifier, generation included) is stored.
    #[inline]
    pub fn contains(&self, entity: EntityId) -> bool {
        let dense = self.slot(entity.index());
        dense != NULL_INDEX && self.entities[dense] == entity
    }

    /// Component for `entity`, or `None` if absent or stale.
    #[inline]
    pub fn try_get(&self, entity: EntityId) -> Option<&T> {
        let dense = self.slot(entity.index());
        if dense != NULL_INDEX && self.entities[dense] == entity {
            Some(&self.data[dense])
        } else {
            None
        }
    }

    #[inline]
    pub fn try_get_mut(&mut self, entity: EntityId) -> Option<&mut T> {
        let dense = self.slot(entity.index());
        if dense != NULL_INDEX && self.entities[dense] == entity {
            Some(&mut self.data[dense])
        } else {
            None
        }
    }

    /// Component for `entity`. The entity must be stored; calling this with
    /// an absent or stale identifier is a caller error.
    #[inline]
    pub fn get(&self, entity: EntityId) -> &T {
        debug_assert!(self.contains(entity));
        match self.try_get(entity) {
            Some(value) => value,
            None => panic!("no component stored for {entity:?}"),
        }
    }

    #[inline]
    pub fn get_mut(&mut self, entity: EntityId) -> &mut T {
        debug_assert!(self.contains(entity));
        match self.try_get_mut(entity) {
            Some(value) => value,
            None => panic!("no component stored for {entity:?}"),
        }
    }
}

/// Object-safe facade over a [`SparseSet`] of any component type.
///
/// The world keeps one of these per component id so entity destruction can
/// remove rows by id without knowing the component type.
pub(crate) trait ErasedStore: Any {
    fn remove_entity(&mut self, entity: EntityId);
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: 'static> ErasedStore for SparseSet<T> {
    fn remove_entity(&mut self, entity: EntityId) {
        self.remove(entity);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
