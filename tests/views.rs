use sparse_ecs::World;

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

struct Static;

#[test]
fn view_visits_the_intersection() {
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
fn three_component_view() {
    let mut world = World::new();
    let mut expected = 0;
    for i in 0..60u32 {
        let e = world.create();
        world.add(e, Position { x: i as f32, y: 0.0 });
        if i % 2 == 0 {
            world.add(e, Velocity { x: 1.0, y: 0.0 });
        }
        if i % 3 == 0 {
            world.add(e, Static);
        }
        if i % 6 == 0 {
            expected += 1;
        }
    }

    let mut visited = 0;
    world
        .view::<(Position, Velocity, Static)>()
        .each(|_, _, _| visited += 1);
    assert_eq!(visited, expected);
}

#[test]
fn view_agrees_with_has() {
    let mut world = World::new();
    let mut entities = Vec::new();
    for i in 0..50u32 {
        let e = world.create();
        if i % 4 != 3 {
            world.add(e, Position { x: i as f32, y: 0.0 });
        }
        if i % 2 == 0 {
            world.add(e, Velocity { x: 0.0, y: 1.0 });
        }
        entities.push(e);
    }
    // Removing after the fact must drop entities out of the view.
    world.remove::<Velocity>(entities[0]);

    let mut seen = Vec::new();
    world
        .view::<(Position, Velocity)>()
        .each(|p, _| seen.push(p.x as u32));
    seen.sort_unstable();

    let expected: Vec<u32> = entities
        .iter()
        .filter(|&&e| world.has::<Position>(e) && world.has::<Velocity>(e))
        .map(|e| e.index())
        .collect();
    assert_eq!(seen, expected);
}

#[test]
fn view_updates_are_visible_through_get() {
    let mut world = World::new();
    let mut movers = Vec::new();
    for i in 0..25 {
        let e = world.create();
        world.add(e, Position { x: 0.0, y: 0.0 });
        world.add(
            e,
            Velocity {
                x: i as f32,
                y: -(i as f32),
            },
        );
        movers.push(e);
    }

    for _ in 0..4 {
        world.view::<(Position, Velocity)>().each(|p, v| {
            p.x += v.x;
            p.y += v.y;
        });
    }

    for (i, &e) in movers.iter().enumerate() {
        let p = world.get::<Position>(e);
        assert_eq!(p.x, 4.0 * i as f32);
        assert_eq!(p.y, -4.0 * i as f32);
    }
}
