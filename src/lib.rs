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

//! Sparse-set Entity Component System
//!
//! Entities are generational identifiers, components live in per-type sparse
//! sets, and a 256-bit signature per entity accelerates queries. Views
//! iterate multi-component intersections driven by the smallest store,
//! observers fire synchronously on add/remove/modify, and a work-stealing
//! thread pool backs the sequential/parallel/dependency-graph system
//! scheduler. The world itself is single-threaded; callers serialize access
//! or shard worlds.

pub mod component;
pub mod entity;
pub mod error;
pub mod mask;
pub mod observer;
pub mod pool;
pub mod prefab;
pub mod schedule;
pub mod serialization;
pub mod storage;
pub mod view;
pub mod world;

// Re-exports for convenience
pub use component::{component_id, Component, MAX_COMPONENTS};
pub use entity::EntityId;
pub use error::{Error, ErrorReporter, LogReporter, Result};
pub use mask::ComponentMask;
pub use observer::{ComponentCallback, ComponentEvent};
pub use pool::{Latch, TaskHandle, ThreadPool};
pub use prefab::PrefabManager;
pub use schedule::{SystemFn, SystemScheduler};
pub use serialization::SerializationContext;
pub use storage::SparseSet;
pub use view::{View, ViewSpec};
pub use world::World;
