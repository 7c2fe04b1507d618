//! Multi-component views.
//!
//! A view iterates every entity bearing all the component types of a tuple.
//! Iteration walks the dense entity list of the smallest participating store
//! and filters by signature containment, so cost scales with the rarest
//! component rather than the entity count. The driving component is read
//! straight from its dense slot; the others resolve through their sparse
//! index.

use smallvec::SmallVec;
use std::marker::PhantomData;

use crate::component::{component_id, Component, MAX_VIEW_COMPONENTS};
use crate::mask::ComponentMask;
use crate::world::World;

/// Tuple of component types a [`View`] queries for. Implemented for tuples of
/// up to eight distinct component types.
pub trait ViewSpec {
    const ARITY: usize;

    /// Component ids of the tuple, in tuple order.
    fn component_ids() -> SmallVec<[usize; MAX_VIEW_COMPONENTS]>;

    /// Query mask with one bit per tuple component.
    fn mask() -> ComponentMask {
        let mut mask = ComponentMask::new();
        for id in Self::component_ids() {
            mask.set(id);
        }
        mask
    }
}

/// Query over entities possessing a specific component set.
///
/// Created through [`World::view`]; the query mask is recorded at
/// construction.
pub struct View<'w, Q: ViewSpec> {
    world: &'w mut World,
    mask: ComponentMask,
    _spec: PhantomData<Q>,
}

impl<'w, Q: ViewSpec> View<'w, Q> {
    pub(crate) fn new(world: &'w mut World) -> Self {
        let mask = Q::mask();
        assert_eq!(
            mask.count_ones() as usize,
            Q::ARITY,
            "view component types must be distinct"
        );
        View {
            world,
            mask,
            _spec: PhantomData,
        }
    }
}

impl ViewSpec for () {
    const ARITY: usize = 0;

    fn component_ids() -> SmallVec<[usize; MAX_VIEW_COMPONENTS]> {
        SmallVec::new()
    }
}

impl View<'_, ()> {
    /// An empty view matches nothing.
    pub fn each<F: FnMut()>(&mut self, _func: F) {}
}

macro_rules! impl_view {
    ($arity:expr, $(($T:ident, $store:ident, $idx:tt)),+) => {
        impl<$($T: Component),+> ViewSpec for ($($T,)+) {
            const ARITY: usize = $arity;

            fn component_ids() -> SmallVec<[usize; MAX_VIEW_COMPONENTS]> {
                let mut ids = SmallVec::new();
                $(ids.push(component_id::<$T>());)+
                ids
            }
        }

        impl<$($T: Component),+> View<'_, ($($T,)+)> {
            /// Invoke `func` for every entity bearing all view components,
            /// in the dense order of the smallest participating store.
            pub fn each<Func>(&mut self, mut func: Func)
            where
                Func: FnMut($(&mut $T),+),
            {
                $(
                    let Some(mut $store) = self.world.store_ptr::<$T>() else {
                        return;
                    };
                )+

                // SAFETY: the constructor rejects duplicate component types,
                // so these pointers reference disjoint stores owned by the
                // world borrowed for 'w; nothing below resizes the store
                // arena.
                let sizes = [$(unsafe { $store.as_ref() }.len()),+];
                let mut driving = 0;
                for (i, &len) in sizes.iter().enumerate() {
                    if len < sizes[driving] {
                        driving = i;
                    }
                }
                let len = sizes[driving];
                if len == 0 {
                    return;
                }

                let mask = self.mask;
                let signatures = self.world.signature_table();

                for dense in 0..len {
                    let entity = match driving {
                        $($idx => unsafe { $store.as_ref() }.entities()[dense],)+
                        _ => unreachable!(),
                    };
                    if !signatures[entity.index() as usize].contains(&mask) {
                        continue;
                    }
                    // SAFETY: stores are disjoint (checked above) and the
                    // signature test proves membership in each of them. The
                    // driving component is taken from its dense slot without
                    // a second lookup.
                    func($(
                        unsafe {
                            let set = $store.as_mut();
                            if driving == $idx {
                                &mut set.data_mut()[dense]
                            } else {
                                set.get_mut(entity)
                            }
                        }
                    ),+);
                }
            }
        }
    };
}

impl_view!(1, (A, sa, 0));
impl_view!(2, (A, sa, 0), (B, sb, 1));
impl_view!(3, (A, sa, 0), (B, sb, 1), (C, sc, 2));
impl_view!(4, (A, sa, 0), (B, sb, 1), (C, sc, 2), (D, sd, 3));
impl_view!(5, (A, sa, 0), (B, sb, 1), (C, sc, 2), (D, sd, 3), (E, se, 4));
impl_view!(
    6,
    (A, sa, 0),
    (B, sb, 1),
    (C, sc, 2),
    (D, sd, 3),
    (E, se, 4),
    (F, sf, 5)
);
impl_view!(
    7,
    (A, sa, 0),
    (B, sb, 1),
    (C, sc, 2),
    (D, sd, 3),
    (E, se, 4),
    (F, sf, 5),
    (G, sg, 6)
);
impl_view!(
    8,
    (A, sa, 0),
    (B, sb, 1),
    (C, sc, 2),
    (D, sd, 3),
    (E, se, 4),
    (F, sf, 5),
    (G, sg, 6),
    (H, sh, 7)
);

#[cfg(test)]
mod tests {
    use crate::world::World;

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Position {
        x: f32,
        y: f32,
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Velocity {
        x: f32,
        y: f32,
    }

    struct Frozen;

    #[test]
    fn test_intersection_count() {
        // i32 on every tenth entity, f32 on all of them:
        // the intersection view visits exactly ten.
        let mut world = World::new();
        for i in 0..100 {
            let e = world.create();
            if i % 10 == 0 {
                world.add(e, i as i32);
            }
            world.add(e, i as f32);
        }

        let mut count = 0;
        world.view::<(i32, f32)>().each(|_, _| count += 1);
        assert_eq!(count, 10);
    }

    #[test]
    fn test_driving_store_choice_is_invisible() {
        // The visited set must not depend on which store happens to be
        // smallest.
        let collect = |flip: bool| {
            let mut world = World::new();
            let mut expected = Vec::new();
            for i in 0..40u32 {
                let e = world.create();
                world.add(e, i);
                if i % 2 == 0 {
                    world.add(e, i as u64);
                    expected.push(i);
                }
            }
            if flip {
                // Pad the u64 store so u32 becomes the driving store.
                for _ in 0..60 {
                    let e = world.create();
                    world.add(e, 999u64);
                }
            }

            let mut seen = Vec::new();
            world.view::<(u32, u64)>().each(|a, _| seen.push(*a));
            seen.sort_unstable();
            (seen, expected)
        };

        let (seen_small, expected) = collect(false);
        let (seen_flipped, _) = collect(true);
        assert_eq!(seen_small, expected);
        assert_eq!(seen_flipped, expected);
    }

    #[test]
    fn test_mutation_through_view() {
        let mut world = World::new();
        let mut entities = Vec::new();
        for i in 0..10 {
            let e = world.create();
            world.add(e, Position { x: i as f32, y: 0.0 });
            world.add(e, Velocity { x: 1.0, y: 2.0 });
            entities.push(e);
        }

        world
            .view::<(Position, Velocity)>()
            .each(|position, velocity| {
                position.x += velocity.x;
                position.y += velocity.y;
            });

        for (i, &e) in entities.iter().enumerate() {
            assert_eq!(
                *world.get::<Position>(e),
                Position {
                    x: i as f32 + 1.0,
                    y: 2.0
                }
            );
        }
    }

    #[test]
    fn test_tag_components_participate() {
        let mut world = World::new();
        for i in 0..20u16 {
            let e = world.create();
            world.add(e, i);
            if i < 5 {
                world.add(e, Frozen);
            }
        }

        let mut frozen = 0;
        world.view::<(Frozen, u16)>().each(|_, _| frozen += 1);
        assert_eq!(frozen, 5);
    }

    #[test]
    fn test_unpopulated_store_yields_nothing() {
        struct Never;

        let mut world = World::new();
        let e = world.create();
        world.add(e, 1u128);

        let mut count = 0;
        world.view::<(u128, Never)>().each(|_, _| count += 1);
        assert_eq!(count, 0);
    }

    #[test]
    fn test_single_component_view() {
        let mut world = World::new();
        for i in 0..7 {
            let e = world.create();
            world.add(e, i as i16);
        }

        let mut sum = 0i16;
        world.view::<(i16,)>().each(|v| sum += *v);
        assert_eq!(sum, 21);
    }

    #[test]
    #[should_panic(expected = "distinct")]
    fn test_duplicate_component_type_rejected() {
        let mut world = World::new();
        let _ = world.view::<(i32, i32)>();
    }

    #[test]
    fn test_destroyed_entities_are_skipped() {
        let mut world = World::new();
        let keep = world.create();
        let drop = world.create();
        world.add(keep, 1u8);
        world.add(keep, 1.0f64);
        world.add(drop, 2u8);
        world.add(drop, 2.0f64);
        world.destroy(drop);

        let mut seen = Vec::new();
        world.view::<(u8, f64)>().each(|v, _| seen.push(*v));
        assert_eq!(seen, vec![1]);
    }
}
