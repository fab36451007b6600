//! 四叉节点及对象节点
//! 四叉节点放在SlotMap里，用key指向父节点和子节点，所有权只从父到子。
//! 叶子上的对象用双向链表串起来，链表的prev/next存在对象节点上，这样删除是O(1)。

use nalgebra::Point2;
use parry2d::math::Real;
use pi_slotmap::{Key, SecondaryMap, SlotMap};

use crate::bounds::QuadBounds;

#[derive(Debug, Clone, Copy)]
pub struct NodeList<K> {
    pub(crate) head: K,
    pub(crate) len: usize,
}
impl<K: Key> NodeList<K> {
    #[inline]
    pub fn new() -> NodeList<K> {
        NodeList {
            head: K::null(),
            len: 0,
        }
    }
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
    #[inline]
    pub fn head(&self) -> K {
        self.head
    }
    #[inline]
    fn push(&mut self, id: K) {
        self.head = id;
        self.len += 1;
    }
    /// 将对象挂到链表头
    #[inline]
    pub fn link<T>(&mut self, map: &mut SecondaryMap<K, ObjNode<K, T>>, id: K) {
        let old = self.head;
        let node = &mut map[id];
        node.prev = K::null();
        node.next = old;
        if !old.is_null() {
            map[old].prev = id;
        }
        self.push(id);
    }
    /// 摘除对象，prev和next是被摘除对象原来的前后节点
    #[inline]
    pub fn remove<T>(&mut self, map: &mut SecondaryMap<K, ObjNode<K, T>>, prev: K, next: K) {
        if !prev.is_null() {
            map[prev].next = next;
        } else {
            self.head = next;
        }
        if !next.is_null() {
            map[next].prev = prev;
        }
        self.len -= 1;
    }
    /// 遍历链表上的对象id
    pub fn iter<'a, T>(&self, map: &'a SecondaryMap<K, ObjNode<K, T>>) -> ListIter<'a, K, T> {
        ListIter {
            map,
            id: self.head,
        }
    }
}

impl<K: Key> Default for NodeList<K> {
    fn default() -> Self {
        NodeList::new()
    }
}

pub struct ListIter<'a, K: Key, T> {
    map: &'a SecondaryMap<K, ObjNode<K, T>>,
    id: K,
}

impl<'a, K: Key, T> Iterator for ListIter<'a, K, T> {
    type Item = (K, &'a ObjNode<K, T>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.id.is_null() {
            return None;
        }
        let map = self.map;
        let id = self.id;
        let node = &map[id];
        self.id = node.next;
        Some((id, node))
    }
}

/// 叶子持有对象链表，内部节点持有4个子节点，二者不会同时存在
#[derive(Debug, Clone, Copy)]
pub enum NodeState<K> {
    Leaf(NodeList<K>),
    Internal([K; 4]),
}

#[derive(Debug, Clone)]
pub struct QuadNode<K: Key> {
    pub(crate) bounds: QuadBounds,
    pub(crate) depth: usize,
    pub(crate) parent: K,          // 父节点, 根节点为null
    pub(crate) parent_child: usize, // 在父节点childs上的位置
    pub(crate) state: NodeState<K>,
    pub(crate) count: usize, // 子树下的对象数量
    pub(crate) in_range: bool, // 最近一次trace_range是否和范围相交
}

impl<K: Key> QuadNode<K> {
    #[inline]
    pub fn new(bounds: QuadBounds, depth: usize, parent: K, child: usize) -> Self {
        QuadNode {
            bounds,
            depth,
            parent,
            parent_child: child,
            state: NodeState::Leaf(NodeList::new()),
            count: 0,
            in_range: false,
        }
    }
    #[inline]
    pub fn bounds(&self) -> &QuadBounds {
        &self.bounds
    }
    #[inline]
    pub fn depth(&self) -> usize {
        self.depth
    }
    #[inline]
    pub fn parent(&self) -> K {
        self.parent
    }
    #[inline]
    pub fn parent_child(&self) -> usize {
        self.parent_child
    }
    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }
    #[inline]
    pub fn is_leaf(&self) -> bool {
        matches!(self.state, NodeState::Leaf(_))
    }
    #[inline]
    pub fn children(&self) -> Option<&[K; 4]> {
        match self.state {
            NodeState::Internal(ref childs) => Some(childs),
            _ => None,
        }
    }
    pub(crate) fn view(&self, key: K) -> NodeView<K> {
        NodeView {
            key,
            bounds: self.bounds,
            depth: self.depth,
            is_leaf: self.is_leaf(),
            count: self.count,
            in_range: self.in_range,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ObjNode<K: Key, T> {
    pub(crate) position: Point2<Real>, // 放入树时使用的位置
    pub(crate) bind: T,
    pub(crate) parent: K, // 所在叶子
    pub(crate) prev: K,
    pub(crate) next: K,
}
impl<K: Key, T> ObjNode<K, T> {
    pub fn new(position: Point2<Real>, bind: T) -> Self {
        ObjNode {
            position,
            bind,
            parent: K::null(),
            prev: K::null(),
            next: K::null(),
        }
    }
    #[inline]
    pub fn position(&self) -> &Point2<Real> {
        &self.position
    }
    #[inline]
    pub fn bind(&self) -> &T {
        &self.bind
    }
    #[inline]
    pub fn leaf(&self) -> K {
        self.parent
    }
}

/// 遍历时交给访问者的节点快照
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeView<K> {
    pub key: K,
    pub bounds: QuadBounds,
    pub depth: usize,
    pub is_leaf: bool,
    pub count: usize,
    pub in_range: bool,
}

/// 调试绘制，由外部渲染器实现后注入，树本身不依赖渲染
pub trait DebugDraw {
    fn draw_bounds(&mut self, bounds: &QuadBounds, depth: usize, in_range: bool);
}

// 分裂叶子，对象按位置重新放入4个子叶子，返回子节点
pub(crate) fn split<K: Key, T>(
    slab: &mut SlotMap<K, QuadNode<K>>,
    ab_map: &mut SecondaryMap<K, ObjNode<K, T>>,
    branch_id: K,
) -> [K; 4] {
    let (bounds, depth, list) = {
        let node = &slab[branch_id];
        match node.state {
            NodeState::Leaf(list) => (node.bounds, node.depth, list),
            _ => panic!("invalid state"),
        }
    };
    let quads = bounds.subdivide();
    let mut childs = [K::null(); 4];
    for (i, quad) in quads.into_iter().enumerate() {
        childs[i] = slab.insert(QuadNode::new(quad, depth + 1, branch_id, i));
    }
    let mut id = list.head;
    while !id.is_null() {
        let node = &mut ab_map[id];
        let nid = id;
        id = node.next;
        let i = bounds.quadrant_of(&node.position);
        let child = &mut slab[childs[i]];
        node.parent = childs[i];
        node.prev = K::null();
        match child.state {
            NodeState::Leaf(ref mut list) => {
                node.next = list.head;
                list.push(nid);
            }
            _ => panic!("invalid state"),
        }
        child.count += 1;
    }
    for c in childs.iter() {
        if let NodeState::Leaf(ref list) = slab[*c].state {
            fix_prev(ab_map, list.head);
        }
    }
    slab[branch_id].state = NodeState::Internal(childs);
    childs
}

// 合并子节点，要求4个子节点都是叶子，返回合并后的对象数量
pub(crate) fn merge<K: Key, T>(
    slab: &mut SlotMap<K, QuadNode<K>>,
    ab_map: &mut SecondaryMap<K, ObjNode<K, T>>,
    branch_id: K,
) -> usize {
    let childs = match slab[branch_id].state {
        NodeState::Internal(childs) => childs,
        _ => return 0,
    };
    let mut result = NodeList::new();
    for c in childs {
        let child = match slab.remove(c) {
            Some(child) => child,
            _ => panic!("invalid state"),
        };
        match child.state {
            NodeState::Leaf(ref list) if list.len > 0 => {
                shrink_merge(ab_map, branch_id, list, &mut result)
            }
            NodeState::Leaf(_) => (),
            NodeState::Internal(_) => panic!("invalid state"),
        }
    }
    slab[branch_id].state = NodeState::Leaf(result);
    result.len
}

// 合并ab列表到结果列表中
#[inline]
fn shrink_merge<K: Key, T>(
    ab_map: &mut SecondaryMap<K, ObjNode<K, T>>,
    parent: K,
    list: &NodeList<K>,
    result: &mut NodeList<K>,
) {
    let old = result.head;
    result.head = list.head;
    result.len += list.len;
    let mut id = list.head;
    loop {
        let ab = &mut ab_map[id];
        ab.parent = parent;
        if ab.next.is_null() {
            ab.next = old;
            break;
        }
        id = ab.next;
    }
    if !old.is_null() {
        ab_map[old].prev = id;
    }
}

// 修复prev
#[inline]
fn fix_prev<K: Key, T>(map: &mut SecondaryMap<K, ObjNode<K, T>>, mut head: K) {
    if head.is_null() {
        return;
    }
    let mut next = map[head].next;
    while !next.is_null() {
        let node = &mut map[next];
        node.prev = head;
        head = next;
        next = node.next;
    }
}

#[cfg(test)]
fn check_list<K: Key, T>(map: &SecondaryMap<K, ObjNode<K, T>>, list: &NodeList<K>) -> Vec<K> {
    let ids: Vec<K> = list.iter(map).map(|(id, _)| id).collect();
    assert_eq!(ids.len(), list.len());
    let mut prev = K::null();
    for id in ids.iter() {
        assert_eq!(map[*id].prev, prev);
        prev = *id;
    }
    ids
}

#[test]
fn test_list_link_remove() {
    use pi_slotmap::DefaultKey;

    let mut keys: SlotMap<DefaultKey, ()> = SlotMap::with_key();
    let mut map: SecondaryMap<DefaultKey, ObjNode<DefaultKey, u32>> = SecondaryMap::default();
    let mut list = NodeList::new();
    let ids: Vec<DefaultKey> = (0..4).map(|_| keys.insert(())).collect();
    for (i, id) in ids.iter().enumerate() {
        map.insert(*id, ObjNode::new(Point2::new(i as Real, 0.0), i as u32));
        list.link(&mut map, *id);
    }
    assert_eq!(check_list(&map, &list), vec![ids[3], ids[2], ids[1], ids[0]]);

    // 中间
    let (prev, next) = (map[ids[2]].prev, map[ids[2]].next);
    list.remove(&mut map, prev, next);
    assert_eq!(check_list(&map, &list), vec![ids[3], ids[1], ids[0]]);
    // 头
    let (prev, next) = (map[ids[3]].prev, map[ids[3]].next);
    list.remove(&mut map, prev, next);
    assert_eq!(check_list(&map, &list), vec![ids[1], ids[0]]);
    // 尾
    let (prev, next) = (map[ids[0]].prev, map[ids[0]].next);
    list.remove(&mut map, prev, next);
    assert_eq!(check_list(&map, &list), vec![ids[1]]);
}

#[test]
fn test_split_merge() {
    use nalgebra::Vector2;
    use pi_slotmap::DefaultKey;

    let mut slab: SlotMap<DefaultKey, QuadNode<DefaultKey>> = SlotMap::with_key();
    let mut map: SecondaryMap<DefaultKey, ObjNode<DefaultKey, u32>> = SecondaryMap::default();
    let mut keys: SlotMap<DefaultKey, ()> = SlotMap::with_key();
    let bounds = QuadBounds::new(Point2::new(0.0, 0.0), Vector2::new(10.0, 10.0));
    let root = slab.insert(QuadNode::new(bounds, 0, DefaultKey::null(), 0));

    let points = [(5.0, 5.0), (-5.0, 5.0), (-5.0, -5.0), (5.0, -5.0), (1.0, 1.0)];
    for (i, (x, y)) in points.iter().enumerate() {
        let id = keys.insert(());
        map.insert(id, ObjNode::new(Point2::new(*x, *y), i as u32));
        map[id].parent = root;
        let node = &mut slab[root];
        if let NodeState::Leaf(ref mut list) = node.state {
            list.link(&mut map, id);
        }
        node.count += 1;
    }

    let childs = split(&mut slab, &mut map, root);
    assert!(!slab[root].is_leaf());
    let counts: Vec<usize> = childs.iter().map(|c| slab[*c].count).collect();
    assert_eq!(counts, vec![2, 1, 1, 1]);
    for c in childs.iter() {
        let child = &slab[*c];
        assert_eq!(child.depth, 1);
        if let NodeState::Leaf(ref list) = child.state {
            for id in check_list(&map, list) {
                assert_eq!(map[id].parent, *c);
                assert!(child.bounds.contains(&map[id].position));
            }
        }
    }

    assert_eq!(merge(&mut slab, &mut map, root), 5);
    assert_eq!(slab.len(), 1);
    match slab[root].state {
        NodeState::Leaf(ref list) => {
            let mut binds: Vec<u32> = check_list(&map, list).iter().map(|id| map[*id].bind).collect();
            binds.sort();
            assert_eq!(binds, vec![0, 1, 2, 3, 4]);
        }
        _ => panic!("not leaf"),
    }
}
