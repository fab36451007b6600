use nalgebra::{Point2, Vector2};
use parry2d::math::Real;
use pcg_rand::Pcg32;
use pi_quadtree::*;
use pi_slotmap::{DefaultKey, SlotMap};
use rand::{Rng, SeedableRng};

fn world() -> QuadBounds {
    QuadBounds::new(Point2::new(0.0, 0.0), Vector2::new(500.0, 500.0))
}

fn total(tree: &QuadTree<DefaultKey, u32>) -> usize {
    let mut n = 0;
    tree.traverse(|v| {
        if v.is_leaf {
            n += v.count
        }
    });
    n
}

#[test]
fn insert_then_point_query() {
    let mut rng = Pcg32::seed_from_u64(7);
    let mut keys: SlotMap<DefaultKey, ()> = SlotMap::with_key();
    let mut tree = QuadTree::new(world(), 4, 6).unwrap();
    for i in 0..500u32 {
        let p = Point2::new(rng.gen_range(-500.0..=500.0), rng.gen_range(-500.0..=500.0));
        let id = keys.insert(());
        tree.insert_at(id, p, i).unwrap();
        assert!(tree.query_range(p, 0.0).any(|(k, b)| k == id && *b == i));
    }
    assert_eq!(total(&tree), 500);
}

#[test]
fn point_query_on_odd_bounds() {
    let mut rng = Pcg32::seed_from_u64(19);
    for _ in 0..50 {
        let root = QuadBounds::new(
            Point2::new(rng.gen_range(-3000.0..3000.0), rng.gen_range(-3000.0..3000.0)),
            Vector2::new(rng.gen_range(1.0..2000.0), rng.gen_range(1.0..2000.0)),
        );
        let (mins, maxs) = (root.mins(), root.maxs());
        let mut keys: SlotMap<DefaultKey, ()> = SlotMap::with_key();
        let mut tree = QuadTree::new(root, 2, 10).unwrap();
        let mut placed = Vec::new();
        for i in 0..300u32 {
            // 一部分点放在根的边上或中心线上
            let p = match i % 4 {
                0 => Point2::new(rng.gen_range(mins.x..=maxs.x), rng.gen_range(mins.y..=maxs.y)),
                1 => Point2::new(root.center().x, rng.gen_range(mins.y..=maxs.y)),
                2 => Point2::new(maxs.x, rng.gen_range(mins.y..=maxs.y)),
                _ => Point2::new(rng.gen_range(mins.x..=maxs.x), mins.y),
            };
            let id = keys.insert(());
            tree.insert_at(id, p, i).unwrap();
            placed.push((id, p));
        }
        for (id, p) in placed.iter() {
            assert!(tree.query_range(*p, 0.0).any(|(k, _)| k == *id));
        }
        assert_eq!(total(&tree), placed.len());
        assert_eq!(tree.query_range(root.center(), -10.0).count(), 0);
    }
}

#[test]
fn net_count_after_insert_remove() {
    let mut rng = Pcg32::seed_from_u64(11);
    let mut keys: SlotMap<DefaultKey, ()> = SlotMap::with_key();
    let mut tree = QuadTree::new(world(), 3, 7).unwrap();
    let mut live = Vec::new();
    let (mut inserted, mut removed) = (0, 0);
    for i in 0..3000u32 {
        if live.is_empty() || rng.gen_bool(0.6) {
            let p = Point2::new(rng.gen_range(-500.0..=500.0), rng.gen_range(-500.0..=500.0));
            let id = keys.insert(());
            tree.insert_at(id, p, i).unwrap();
            live.push(id);
            inserted += 1;
        } else {
            let id = live.swap_remove(rng.gen_range(0..live.len()));
            tree.remove(id).unwrap();
            removed += 1;
        }
        if i % 250 == 0 {
            assert_eq!(total(&tree), inserted - removed);
        }
    }
    assert_eq!(total(&tree), inserted - removed);
    assert_eq!(tree.len(), live.len());
    for id in live {
        tree.remove(id).unwrap();
    }
    assert_eq!(tree.node_count(), 1);
}

#[test]
fn split_in_one_quadrant() {
    let mut keys: SlotMap<DefaultKey, ()> = SlotMap::with_key();
    let mut tree = QuadTree::new(world(), 4, 5).unwrap();
    for (i, (x, y)) in [(10.0, 20.0), (120.0, 40.0), (300.0, 310.0), (480.0, 5.0), (60.0, 490.0)]
        .into_iter()
        .enumerate()
    {
        tree.insert_at(keys.insert(()), Point2::new(x, y), i as u32).unwrap();
    }
    let mut children = Vec::new();
    tree.traverse(|v| {
        if v.depth == 1 {
            children.push(*v)
        }
    });
    assert_eq!(children.len(), 4);
    let quads = world().subdivide();
    for (view, quad) in children.iter().zip(quads.iter()) {
        assert_eq!(view.bounds, *quad);
        assert_eq!(view.bounds.half_extent(), Vector2::new(250.0, 250.0));
    }
    assert_eq!(children[NE].count, 5);
    assert!(children[NW..].iter().all(|v| v.count == 0));
}

#[test]
fn out_of_bounds_keeps_count() {
    let mut keys: SlotMap<DefaultKey, ()> = SlotMap::with_key();
    let mut tree = QuadTree::new(world(), 4, 5).unwrap();
    tree.insert_at(keys.insert(()), Point2::new(0.0, 0.0), 0).unwrap();
    let err = tree.insert_at(keys.insert(()), Point2::new(-600.0, 0.0), 1).unwrap_err();
    assert_eq!(err, QuadTreeError::OutOfBounds { x: -600.0, y: 0.0 });
    assert_eq!(tree.len(), 1);
    assert_eq!(total(&tree), 1);
}

#[test]
fn range_query_filters_exact_distance() {
    let mut keys: SlotMap<DefaultKey, ()> = SlotMap::with_key();
    let mut tree = QuadTree::new(world(), 4, 5).unwrap();
    let near = keys.insert(());
    tree.insert_at(near, Point2::new(50.0, 0.0), 0).unwrap();
    tree.insert_at(keys.insert(()), Point2::new(200.0, 0.0), 1).unwrap();
    let found: Vec<DefaultKey> = tree.query_range(Point2::new(0.0, 0.0), 100.0).map(|(k, _)| k).collect();
    assert_eq!(found, vec![near]);
}

#[test]
fn far_viewpoint_collapses_tree() {
    let config = TreeConfig::new(4, 5).with_rebalance(Rebalance::Composite);
    let mut tree: QuadTree<DefaultKey, u32> = QuadTree::with_config(world(), config).unwrap();
    let near = (|_: usize| Real::INFINITY, |_: usize| Real::INFINITY);
    tree.traverse_by_distance(&Point2::new(0.0, 0.0), &near);
    assert_eq!(tree.depth(), 5);
    let stats = tree.traverse_by_distance(&Point2::new(1.0e7, -1.0e7), &DistanceFactor::default());
    assert_eq!(stats.splits, 0);
    assert_eq!(tree.node_count(), 1);
    let root = tree.node(tree.root_key()).unwrap();
    assert!(root.is_leaf);
}

#[test]
fn error_messages() {
    assert_eq!(
        QuadTreeError::OutOfBounds { x: 1.0, y: 2.0 }.to_string(),
        "position (1, 2) is outside the tree bounds"
    );
    assert_eq!(QuadTreeError::NotFound.to_string(), "object not found");
}
