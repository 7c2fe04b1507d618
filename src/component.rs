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

//! Component marker trait and the process-wide component-id registry.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::any::TypeId;

/// Maximum number of distinct component types, bounded by the signature
/// bitset width.
pub const MAX_COMPONENTS: usize = 256;

/// Maximum arity of a [`View`](crate::view::View) tuple.
pub const MAX_VIEW_COMPONENTS: usize = 8;

/// Marker trait for component types.
///
/// Components must be `'static` (no borrowed data). A component whose type is
/// zero-sized acts as a presence-only tag and occupies no storage.
pub trait Component: 'static {}

impl<T: 'static> Component for T {}

static COMPONENT_IDS: RwLock<Option<FxHashMap<TypeId, usize>>> = RwLock::new(None);

/// Dense numeric id for a component type.
///
/// Issued by a process-wide monotonic counter the first time a type is
/// referenced; stable for the life of the process. Ids at or above
/// [`MAX_COMPONENTS`] overflow the signature bitset and are rejected when the
/// type is first inserted into a [`World`](crate::world::World).
pub fn component_id<T: 'static>() -> usize {
    let type_id = TypeId::of::<T>();

    if let Some(ids) = COMPONENT_IDS.read().as_ref() {
        if let Some(&id) = ids.get(&type_id) {
            return id;
        }
    }

    let mut guard = COMPONENT_IDS.write();
    let ids = guard.get_or_insert_with(FxHashMap::default);
    let next = ids.len();
    *ids.entry(type_id).or_insert(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_stable() {
        struct A;
        struct B;

        let a1 = component_id::<A>();
        let b1 = component_id::<B>();
        assert_ne!(a1, b1);
        assert_eq!(component_id::<A>(), a1);
        assert_eq!(component_id::<B>(), b1);
    }

    #[test]
    fn test_distinct_types_distinct_ids() {
        struct C;
        struct D;
        struct E;

        let ids = [component_id::<C>(), component_id::<D>(), component_id::<E>()];
        assert_ne!(ids[0], ids[1]);
        assert_ne!(ids[1], ids[2]);
        assert_ne!(ids[0], ids[2]);
    }
}
