//! 范围查询
//! 节点范围和查询区域相交只是快速排除，叶子上的对象还要精确判断是否在区域内。

use nalgebra::Point2;
use parry2d::{bounding_volume::Aabb, math::Real};
use pi_slotmap::{Key, SecondaryMap, SlotMap};

use crate::bounds::QuadBounds;
use crate::node::{NodeState, ObjNode, QuadNode};

/// 查询区域
#[derive(Debug, Clone, PartialEq)]
pub enum Region {
    /// 圆形，边界包含；半径为负时为空
    Circle { center: Point2<Real>, radius: Real },
    /// 矩形，边界包含
    Rect(Aabb),
}

impl Region {
    #[inline]
    pub fn intersects(&self, bounds: &QuadBounds) -> bool {
        match self {
            Region::Circle { center, radius } => bounds.intersects_circle(center, *radius),
            Region::Rect(aabb) => bounds.intersects_aabb(aabb),
        }
    }

    #[inline]
    pub fn contains(&self, point: &Point2<Real>) -> bool {
        match self {
            Region::Circle { center, radius } => {
                *radius >= 0.0 && (point - center).norm_squared() <= radius * radius
            }
            Region::Rect(aabb) => {
                point.x >= aabb.mins.x
                    && point.x <= aabb.maxs.x
                    && point.y >= aabb.mins.y
                    && point.y <= aabb.maxs.y
            }
        }
    }
}

/// 惰性的查询迭代器，只读借用树
/// 可以clone或调用restart从头再查
pub struct QueryIter<'a, K: Key, T> {
    slab: &'a SlotMap<K, QuadNode<K>>,
    ab_map: &'a SecondaryMap<K, ObjNode<K, T>>,
    root: K,
    region: Region,
    stack: Vec<K>, // 待访问的四叉节点
    cursor: K,     // 当前叶子链表上的对象
}

impl<'a, K: Key, T> QueryIter<'a, K, T> {
    pub(crate) fn new(
        slab: &'a SlotMap<K, QuadNode<K>>,
        ab_map: &'a SecondaryMap<K, ObjNode<K, T>>,
        root: K,
        region: Region,
    ) -> Self {
        QueryIter {
            slab,
            ab_map,
            root,
            region,
            stack: vec![root],
            cursor: K::null(),
        }
    }

    #[inline]
    pub fn region(&self) -> &Region {
        &self.region
    }

    pub fn restart(&mut self) {
        self.stack.clear();
        self.stack.push(self.root);
        self.cursor = K::null();
    }
}

impl<'a, K: Key, T> Clone for QueryIter<'a, K, T> {
    fn clone(&self) -> Self {
        QueryIter {
            slab: self.slab,
            ab_map: self.ab_map,
            root: self.root,
            region: self.region.clone(),
            stack: self.stack.clone(),
            cursor: self.cursor,
        }
    }
}

impl<'a, K: Key, T> Iterator for QueryIter<'a, K, T> {
    type Item = (K, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        let ab_map = self.ab_map;
        let slab = self.slab;
        loop {
            while !self.cursor.is_null() {
                let id = self.cursor;
                let ab = &ab_map[id];
                self.cursor = ab.next;
                if self.region.contains(&ab.position) {
                    return Some((id, &ab.bind));
                }
            }
            let branch = self.stack.pop()?;
            let node = &slab[branch];
            if !self.region.intersects(&node.bounds) {
                continue;
            }
            match node.state {
                NodeState::Leaf(ref list) => self.cursor = list.head,
                // 逆序压栈，保证按 NE, NW, SW, SE 的顺序出栈
                NodeState::Internal(ref childs) => {
                    self.stack.extend(childs.iter().rev().copied())
                }
            }
        }
    }
}

// 查询空间内的ab节点
pub(crate) fn query<K: Key, T, A, B>(
    slab: &SlotMap<K, QuadNode<K>>,
    ab_map: &SecondaryMap<K, ObjNode<K, T>>,
    branch_id: K,
    branch_arg: &A,
    branch_func: fn(arg: &A, bounds: &QuadBounds) -> bool,
    ab_arg: &mut B,
    ab_func: fn(arg: &mut B, id: K, position: &Point2<Real>, bind: &T),
) {
    let node = &slab[branch_id];
    if !branch_func(branch_arg, &node.bounds) {
        return;
    }
    match node.state {
        NodeState::Leaf(ref list) => {
            for (id, ab) in list.iter(ab_map) {
                ab_func(ab_arg, id, &ab.position, &ab.bind);
            }
        }
        NodeState::Internal(ref childs) => {
            for c in childs.iter() {
                query(
                    slab,
                    ab_map,
                    *c,
                    branch_arg,
                    branch_func,
                    ab_arg,
                    ab_func,
                );
            }
        }
    }
}

/// 四叉节点查询函数的范本，节点范围是否和矩形相交
#[inline]
pub fn intersects(a: &Aabb, b: &QuadBounds) -> bool {
    b.intersects_aabb(a)
}

/// 点查询的四叉节点查询函数
#[inline]
pub fn contains_point(a: &Point2<Real>, b: &QuadBounds) -> bool {
    b.contains(a)
}

/// 矩形查询的参数，收集矩形内的id
pub struct AbQueryArgs<K> {
    pub aabb: Aabb,
    pub result: Vec<K>,
}
impl<K> AbQueryArgs<K> {
    pub fn new(aabb: Aabb) -> AbQueryArgs<K> {
        AbQueryArgs {
            aabb,
            result: Vec::new(),
        }
    }
}

/// ab节点查询函数的范本，配合`intersects`使用
pub fn ab_query_func<K: Key, T>(arg: &mut AbQueryArgs<K>, id: K, position: &Point2<Real>, _bind: &T) {
    if Region::Rect(arg.aabb).contains(position) {
        arg.result.push(id);
    }
}

#[test]
fn test_region_contains() {
    let c = Region::Circle {
        center: Point2::new(0.0, 0.0),
        radius: 100.0,
    };
    assert!(c.contains(&Point2::new(50.0, 0.0)));
    assert!(c.contains(&Point2::new(0.0, -100.0)));
    assert!(!c.contains(&Point2::new(200.0, 0.0)));
    assert!(!c.contains(&Point2::new(71.0, 71.0)));
    let negative = Region::Circle {
        center: Point2::new(0.0, 0.0),
        radius: -100.0,
    };
    assert!(!negative.contains(&Point2::new(50.0, 0.0)));
    assert!(!negative.contains(&Point2::new(0.0, 0.0)));

    let r = Region::Rect(Aabb::new(Point2::new(-1.0, -1.0), Point2::new(1.0, 1.0)));
    assert!(r.contains(&Point2::new(1.0, -1.0)));
    assert!(!r.contains(&Point2::new(1.0, 1.5)));
}
