//! 自适应四叉树
//! 四叉节点放在SlotMap中，对象按调用方的id放在SecondaryMap中，内存连续，树本身可以快速拷贝。
//! 要求插入对象时的id，应该是slotmap的Key。
//! 同时支持两种用法：按对象数量分裂合并的动态对象索引，以及按视点距离分裂合并的地形LOD。

use log::{debug, trace, warn};
use nalgebra::Point2;
use parry2d::{bounding_volume::Aabb, math::Real};
use pi_slotmap::{Key, SecondaryMap, SlotMap};

use crate::bounds::QuadBounds;
use crate::error::{QuadTreeError, Result};
use crate::node::{merge, split, DebugDraw, NodeState, NodeView, ObjNode, QuadNode};
use crate::object::SpatialIndexObject;
use crate::policy::{LodPolicy, TreeConfig, DEEP_MAX};
use crate::query::{query, QueryIter, Region};

/// 批量重建的结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RebuildReport<K> {
    /// 位置有变化的对象数
    pub updated: usize,
    /// 换了叶子的对象数
    pub moved: usize,
    /// 新位置在根节点范围外的对象，仍按上一次的位置留在树中
    pub escaped: Vec<K>,
}

/// 距离遍历的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LodStats {
    pub splits: usize,
    pub merges: usize,
}

/// 一组对象的聚合信息
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusterSummary {
    pub bounds: QuadBounds,
    pub depth: usize,
    pub count: usize,
    /// 所有对象位置的平均值
    pub centroid: Point2<Real>,
}

pub struct QuadTree<K: Key, T> {
    pub(crate) slab: SlotMap<K, QuadNode<K>>, // 所有四叉节点
    pub(crate) ab_map: SecondaryMap<K, ObjNode<K, T>>, // 所有对象
    root_key: K,
    config: TreeConfig,
}

impl<K: Key, T> QuadTree<K, T> {
    /// 构建树，需传入根节点（即全场景）范围，叶子容量及最大深度
    pub fn new(bounds: QuadBounds, max_objects_per_leaf: usize, max_depth: usize) -> Result<Self> {
        Self::with_config(bounds, TreeConfig::new(max_objects_per_leaf, max_depth))
    }

    pub fn with_config(bounds: QuadBounds, mut config: TreeConfig) -> Result<Self> {
        if config.max_objects_per_leaf == 0 {
            return Err(QuadTreeError::InvalidConfiguration(
                "max_objects_per_leaf must be positive",
            ));
        }
        if config.max_depth == 0 {
            return Err(QuadTreeError::InvalidConfiguration("max_depth must be positive"));
        }
        if !bounds.is_finite() {
            return Err(QuadTreeError::InvalidConfiguration("bounds must be finite"));
        }
        if !bounds.is_valid() {
            return Err(QuadTreeError::InvalidConfiguration("bounds extent must be positive"));
        }
        if config.max_depth > DEEP_MAX {
            warn!("max_depth {} clamped to {}", config.max_depth, DEEP_MAX);
            config.max_depth = DEEP_MAX;
        }
        let mut slab = SlotMap::with_key();
        let root_key = slab.insert(QuadNode::new(bounds, 0, K::null(), 0));
        debug!(
            "quad tree created, mins: {:?}, maxs: {:?}, config: {:?}",
            bounds.mins(), bounds.maxs(), config
        );
        Ok(QuadTree {
            slab,
            ab_map: SecondaryMap::default(),
            root_key,
            config,
        })
    }

    #[inline]
    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    /// 根节点范围
    #[inline]
    pub fn bounds(&self) -> &QuadBounds {
        &self.slab[self.root_key].bounds
    }

    #[inline]
    pub fn root_key(&self) -> K {
        self.root_key
    }

    /// 对象数量
    #[inline]
    pub fn len(&self) -> usize {
        self.ab_map.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ab_map.len() == 0
    }

    /// 四叉节点数量
    #[inline]
    pub fn node_count(&self) -> usize {
        self.slab.len()
    }

    /// 当前最深的节点深度
    pub fn depth(&self) -> usize {
        self.slab.iter().map(|(_, n)| n.depth).max().unwrap_or(0)
    }

    /// 检查是否包含某个key
    #[inline]
    pub fn contains_key(&self, id: K) -> bool {
        self.ab_map.contains_key(id)
    }

    /// 获取指定id的位置及其绑定
    pub fn get(&self, id: K) -> Option<(&Point2<Real>, &T)> {
        self.ab_map.get(id).map(|n| (&n.position, &n.bind))
    }

    /// 获取指定id的可写绑定，位置只能通过update修改
    pub fn get_mut(&mut self, id: K) -> Option<&mut T> {
        self.ab_map.get_mut(id).map(|n| &mut n.bind)
    }

    /// 更新指定id的绑定
    pub fn update_bind(&mut self, id: K, bind: T) -> bool {
        match self.ab_map.get_mut(id) {
            Some(node) => {
                node.bind = bind;
                true
            }
            _ => false,
        }
    }

    /// 对象所在的叶子
    pub fn leaf_of(&self, id: K) -> Option<K> {
        self.ab_map.get(id).map(|n| n.parent)
    }

    /// 指定四叉节点的快照
    pub fn node(&self, key: K) -> Option<NodeView<K>> {
        self.slab.get(key).map(|n| n.view(key))
    }

    /// 遍历所有对象，顺序不确定
    pub fn iter(&self) -> impl Iterator<Item = (K, &Point2<Real>, &T)> {
        self.ab_map.iter().map(|(id, n)| (id, &n.position, &n.bind))
    }

    /// 指定位置，在树中添加一个对象及其绑定
    pub fn insert_at(&mut self, id: K, position: Point2<Real>, bind: T) -> Result<()> {
        if self.ab_map.contains_key(id) {
            return Err(QuadTreeError::AlreadyExists);
        }
        if !self.bounds().contains(&position) {
            return Err(QuadTreeError::OutOfBounds {
                x: position.x,
                y: position.y,
            });
        }
        self.ab_map.insert(id, ObjNode::new(position, bind));
        let leaf = self.down(id, &position);
        if self.config.rebalance.by_population() {
            self.split_down(leaf);
        }
        Ok(())
    }

    /// 移除指定id的对象，返回其位置及绑定
    pub fn remove(&mut self, id: K) -> Result<(Point2<Real>, T)> {
        let node = self.ab_map.remove(id).ok_or(QuadTreeError::NotFound)?;
        self.unlink(node.parent, node.prev, node.next);
        self.remove_up(node.parent);
        Ok((node.position, node.bind))
    }

    /// 更新指定id的位置，返回是否换了叶子
    /// 新位置在范围外时返回OutOfBounds，对象留在原位置
    pub fn update(&mut self, id: K, position: Point2<Real>) -> Result<bool> {
        let old_leaf = match self.ab_map.get(id) {
            Some(node) => node.parent,
            _ => return Err(QuadTreeError::NotFound),
        };
        if !self.bounds().contains(&position) {
            return Err(QuadTreeError::OutOfBounds {
                x: position.x,
                y: position.y,
            });
        }
        if self.locate(&position) == old_leaf {
            self.ab_map[id].position = position;
            return Ok(false);
        }
        let (prev, next) = {
            let node = &self.ab_map[id];
            (node.prev, node.next)
        };
        self.unlink(old_leaf, prev, next);
        self.remove_up(old_leaf);
        self.ab_map[id].position = position;
        let leaf = self.down(id, &position);
        if self.config.rebalance.by_population() {
            self.split_down(leaf);
        }
        trace!("object moved to ({}, {})", position.x, position.y);
        Ok(true)
    }

    /// 按位移移动指定id
    pub fn shift(&mut self, id: K, distance: nalgebra::Vector2<Real>) -> Result<bool> {
        let position = match self.ab_map.get(id) {
            Some(node) => node.position + distance,
            _ => return Err(QuadTreeError::NotFound),
        };
        self.update(id, position)
    }

    /// 清空所有对象，只剩一个空的根叶子
    pub fn clear(&mut self) {
        let bounds = *self.bounds();
        self.slab = SlotMap::with_key();
        self.ab_map = SecondaryMap::default();
        self.root_key = self.slab.insert(QuadNode::new(bounds, 0, K::null(), 0));
    }

    /// 查询圆形范围内的对象
    pub fn query_range(&self, center: Point2<Real>, radius: Real) -> QueryIter<'_, K, T> {
        QueryIter::new(
            &self.slab,
            &self.ab_map,
            self.root_key,
            Region::Circle { center, radius },
        )
    }

    /// 查询矩形范围内的对象
    pub fn query_region(&self, aabb: &Aabb) -> QueryIter<'_, K, T> {
        QueryIter::new(&self.slab, &self.ab_map, self.root_key, Region::Rect(*aabb))
    }

    /// 查询空间内的对象
    /// branch_func判断四叉节点是否需要继续向下，ab_func处理通过的叶子上的每个对象
    pub fn query<A, B>(
        &self,
        branch_arg: &A,
        branch_func: fn(arg: &A, bounds: &QuadBounds) -> bool,
        ab_arg: &mut B,
        ab_func: fn(arg: &mut B, id: K, position: &Point2<Real>, bind: &T),
    ) {
        query(
            &self.slab,
            &self.ab_map,
            self.root_key,
            branch_arg,
            branch_func,
            ab_arg,
            ab_func,
        )
    }

    /// 先序遍历所有四叉节点，子节点按 NE, NW, SW, SE 的顺序
    pub fn traverse<F: FnMut(&NodeView<K>)>(&self, mut visitor: F) {
        let mut stack = vec![self.root_key];
        while let Some(id) = stack.pop() {
            let node = &self.slab[id];
            visitor(&node.view(id));
            if let NodeState::Internal(ref childs) = node.state {
                stack.extend(childs.iter().rev().copied());
            }
        }
    }

    /// 把每个节点的范围交给注入的绘制器
    pub fn debug_draw(&self, drawer: &mut dyn DebugDraw) {
        self.traverse(|view| drawer.draw_bounds(&view.bounds, view.depth, view.in_range));
    }

    /// 按视点距离分裂或合并节点，不改变存储的对象
    pub fn traverse_by_distance<P: LodPolicy>(&mut self, viewpoint: &Point2<Real>, policy: &P) -> LodStats {
        let mut stats = LodStats::default();
        self.lod(self.root_key, viewpoint, policy, &mut stats);
        if stats.splits > 0 || stats.merges > 0 {
            debug!(
                "lod traverse at ({}, {}), splits: {}, merges: {}, nodes: {}",
                viewpoint.x,
                viewpoint.y,
                stats.splits,
                stats.merges,
                self.slab.len()
            );
        }
        stats
    }

    /// 扫描范围，标记和圆形相交的节点，并报告每个对象是否在范围内
    /// 只修改节点的in_range标记，不改变结构
    pub fn trace_range<F: FnMut(K, &T, bool)>(&mut self, center: Point2<Real>, radius: Real, mut on_object: F) {
        trace_in(
            &mut self.slab,
            &self.ab_map,
            self.root_key,
            &center,
            radius,
            &mut on_object,
        );
    }

    /// 按深度聚合对象
    /// 取深度等于depth的节点，以及比depth浅的叶子，只返回有对象的
    pub fn clusters(&self, depth: usize) -> Vec<ClusterSummary> {
        let mut result = Vec::new();
        let mut stack = vec![self.root_key];
        while let Some(id) = stack.pop() {
            let node = &self.slab[id];
            if node.count == 0 {
                continue;
            }
            match node.state {
                NodeState::Internal(ref childs) if node.depth < depth => {
                    stack.extend(childs.iter().rev().copied());
                }
                _ => {
                    let sum = self.sum_positions(id);
                    result.push(ClusterSummary {
                        bounds: node.bounds,
                        depth: node.depth,
                        count: node.count,
                        centroid: Point2::from(sum / node.count as Real),
                    });
                }
            }
        }
        result
    }

    // 从根向下找到位置所在的叶子
    fn locate(&self, position: &Point2<Real>) -> K {
        let mut branch = self.root_key;
        loop {
            let node = &self.slab[branch];
            match node.state {
                NodeState::Internal(childs) => branch = childs[node.bounds.quadrant_of(position)],
                NodeState::Leaf(_) => return branch,
            }
        }
    }

    // 对象下降到叶子，沿途计数加一，返回叶子
    fn down(&mut self, id: K, position: &Point2<Real>) -> K {
        let mut branch = self.root_key;
        loop {
            let node = &mut self.slab[branch];
            node.count += 1;
            match node.state {
                NodeState::Internal(childs) => branch = childs[node.bounds.quadrant_of(position)],
                NodeState::Leaf(ref mut list) => {
                    list.link(&mut self.ab_map, id);
                    self.ab_map[id].parent = branch;
                    return branch;
                }
            }
        }
    }

    // 叶子超过容量且未到最大深度时分裂，子节点可能继续分裂
    fn split_down(&mut self, branch: K) {
        let (len, depth) = {
            let node = &self.slab[branch];
            match node.state {
                NodeState::Leaf(ref list) => (list.len(), node.depth),
                _ => return,
            }
        };
        if len <= self.config.max_objects_per_leaf || depth >= self.config.max_depth {
            return;
        }
        let childs = split(&mut self.slab, &mut self.ab_map, branch);
        debug!("split node, depth: {}, objects: {}", depth, len);
        for c in childs {
            self.split_down(c);
        }
    }

    // 从叶子的链表上摘除
    fn unlink(&mut self, leaf: K, prev: K, next: K) {
        match self.slab[leaf].state {
            NodeState::Leaf(ref mut list) => list.remove(&mut self.ab_map, prev, next),
            _ => panic!("invalid state"),
        }
    }

    // 移除时，向上修改数量，并可能合并
    fn remove_up(&mut self, leaf: K) {
        let mut p = {
            let node = &mut self.slab[leaf];
            node.count -= 1;
            node.parent
        };
        let population = self.config.rebalance.by_population();
        while !p.is_null() {
            let node = &mut self.slab[p];
            node.count -= 1;
            let parent = node.parent;
            if population {
                self.try_merge(p);
            }
            p = parent;
        }
    }

    // 4个子节点都是叶子，且对象总数不超过容量时合并
    fn try_merge(&mut self, branch: K) -> bool {
        let node = &self.slab[branch];
        let childs = match node.state {
            NodeState::Internal(childs) => childs,
            _ => return false,
        };
        if node.count > self.config.max_objects_per_leaf {
            return false;
        }
        if !childs.iter().all(|c| self.slab[*c].is_leaf()) {
            return false;
        }
        let depth = node.depth;
        let len = merge(&mut self.slab, &mut self.ab_map, branch);
        debug!("merge node, depth: {}, objects: {}", depth, len);
        true
    }

    fn lod<P: LodPolicy>(&mut self, branch: K, viewpoint: &Point2<Real>, policy: &P, stats: &mut LodStats) {
        let (depth, distance, is_leaf) = {
            let node = &self.slab[branch];
            (node.depth, node.bounds.distance_to_center(viewpoint), node.is_leaf())
        };
        if is_leaf {
            if distance < policy.subdivide_distance(depth) && depth < self.config.max_depth {
                split(&mut self.slab, &mut self.ab_map, branch);
                stats.splits += 1;
            } else {
                return;
            }
        }
        let childs = match self.slab[branch].state {
            NodeState::Internal(childs) => childs,
            _ => return,
        };
        for c in childs {
            self.lod(c, viewpoint, policy, stats);
        }
        let threshold = policy.merge_distance(depth);
        let far = childs.iter().all(|c| {
            let child = &self.slab[*c];
            child.is_leaf() && child.bounds.distance_to_center(viewpoint) > threshold
        });
        if far {
            merge(&mut self.slab, &mut self.ab_map, branch);
            stats.merges += 1;
        }
    }

    // 子树下所有对象位置之和
    fn sum_positions(&self, branch: K) -> nalgebra::Vector2<Real> {
        let mut sum = nalgebra::Vector2::zeros();
        let mut stack = vec![branch];
        while let Some(id) = stack.pop() {
            match self.slab[id].state {
                NodeState::Leaf(ref list) => {
                    for (_, ab) in list.iter(&self.ab_map) {
                        sum += ab.position.coords;
                    }
                }
                NodeState::Internal(ref childs) => stack.extend(childs.iter().copied()),
            }
        }
        sum
    }
}

impl<K: Key, T: SpatialIndexObject> QuadTree<K, T> {
    /// 在树中添加一个对象，位置取自绑定
    pub fn insert(&mut self, id: K, bind: T) -> Result<()> {
        let position = bind.position();
        self.insert_at(id, position, bind)
    }

    /// 用绑定的当前位置更新指定id
    pub fn refresh(&mut self, id: K) -> Result<bool> {
        let position = match self.ab_map.get(id) {
            Some(node) => node.bind.position(),
            _ => return Err(QuadTreeError::NotFound),
        };
        self.update(id, position)
    }

    /// 重新读取所有对象的位置，一次性移动位置变化的对象
    pub fn rebuild(&mut self) -> RebuildReport<K> {
        let changed: Vec<(K, Point2<Real>)> = self
            .ab_map
            .iter()
            .filter_map(|(id, n)| {
                let p = n.bind.position();
                if p != n.position {
                    Some((id, p))
                } else {
                    None
                }
            })
            .collect();
        let mut report = RebuildReport {
            updated: changed.len(),
            moved: 0,
            escaped: Vec::new(),
        };
        for (id, position) in changed {
            match self.update(id, position) {
                Ok(true) => report.moved += 1,
                Ok(false) => (),
                Err(_) => {
                    warn!("object left tree bounds at ({}, {})", position.x, position.y);
                    report.escaped.push(id);
                }
            }
        }
        report
    }
}

// 和圆形相交的节点标记为in_range，叶子上的对象精确判断
fn trace_in<K: Key, T, F: FnMut(K, &T, bool)>(
    slab: &mut SlotMap<K, QuadNode<K>>,
    ab_map: &SecondaryMap<K, ObjNode<K, T>>,
    branch: K,
    center: &Point2<Real>,
    radius: Real,
    on_object: &mut F,
) {
    let node = &mut slab[branch];
    if !node.bounds.intersects_circle(center, radius) {
        trace_out(slab, ab_map, branch, on_object);
        return;
    }
    node.in_range = true;
    match node.state {
        NodeState::Leaf(list) => {
            for (id, ab) in list.iter(ab_map) {
                let active = Region::Circle { center: *center, radius }.contains(&ab.position);
                on_object(id, &ab.bind, active);
            }
        }
        NodeState::Internal(childs) => {
            for c in childs {
                trace_in(slab, ab_map, c, center, radius, on_object);
            }
        }
    }
}

// 不相交的子树全部清除标记，对象都不在范围内
fn trace_out<K: Key, T, F: FnMut(K, &T, bool)>(
    slab: &mut SlotMap<K, QuadNode<K>>,
    ab_map: &SecondaryMap<K, ObjNode<K, T>>,
    branch: K,
    on_object: &mut F,
) {
    let node = &mut slab[branch];
    node.in_range = false;
    match node.state {
        NodeState::Leaf(list) => {
            for (id, ab) in list.iter(ab_map) {
                on_object(id, &ab.bind, false);
            }
        }
        NodeState::Internal(childs) => {
            for c in childs {
                trace_out(slab, ab_map, c, on_object);
            }
        }
    }
}

impl<K: Key, T> std::fmt::Debug for QuadTree<K, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuadTree")
            .field("bounds", self.bounds())
            .field("config", &self.config)
            .field("len", &self.len())
            .field("nodes", &self.node_count())
            .finish()
    }
}

// 检查树的结构，返回可达的对象数量
#[cfg(test)]
fn check_tree<K: Key, T>(tree: &QuadTree<K, T>) -> usize {
    fn check<K: Key, T>(tree: &QuadTree<K, T>, id: K) -> usize {
        let node = &tree.slab[id];
        assert!(node.depth <= tree.config.max_depth);
        let count = match node.state {
            NodeState::Leaf(ref list) => {
                let mut prev = K::null();
                let mut n = 0;
                for (ab_id, ab) in list.iter(&tree.ab_map) {
                    assert_eq!(ab.parent, id);
                    assert_eq!(ab.prev, prev);
                    assert!(node.bounds.contains(&ab.position));
                    prev = ab_id;
                    n += 1;
                }
                assert_eq!(n, list.len());
                n
            }
            NodeState::Internal(ref childs) => {
                let quads = node.bounds.subdivide();
                let mut n = 0;
                for (i, c) in childs.iter().enumerate() {
                    let child = &tree.slab[*c];
                    assert_eq!(child.parent, id);
                    assert_eq!(child.parent_child, i);
                    assert_eq!(child.depth, node.depth + 1);
                    assert_eq!(child.bounds, quads[i]);
                    n += check(tree, *c);
                }
                n
            }
        };
        assert_eq!(count, node.count);
        count
    }
    let n = check(tree, tree.root_key);
    assert_eq!(n, tree.len());
    n
}

#[cfg(test)]
fn world() -> QuadBounds {
    QuadBounds::new(Point2::new(0.0, 0.0), nalgebra::Vector2::new(500.0, 500.0))
}

#[cfg(test)]
fn collect_ids<'a, K: Key + 'a, T: 'a>(iter: impl Iterator<Item = (K, &'a T)>) -> Vec<K> {
    let mut ids: Vec<K> = iter.map(|(id, _)| id).collect();
    ids.sort();
    ids
}

#[test]
fn test_invalid_config() {
    use pi_slotmap::DefaultKey;

    let invalid = |r: Result<QuadTree<DefaultKey, ()>>| {
        matches!(r, Err(QuadTreeError::InvalidConfiguration(_)))
    };
    assert!(invalid(QuadTree::new(world(), 0, 5)));
    assert!(invalid(QuadTree::new(world(), 4, 0)));
    let flat = QuadBounds::new(Point2::new(0.0, 0.0), nalgebra::Vector2::new(10.0, 0.0));
    assert!(invalid(QuadTree::new(flat, 4, 5)));
    let negative = QuadBounds::new(Point2::new(0.0, 0.0), nalgebra::Vector2::new(-10.0, 10.0));
    assert!(invalid(QuadTree::new(negative, 4, 5)));
    let nan = QuadBounds::new(Point2::new(Real::NAN, 0.0), nalgebra::Vector2::new(10.0, 10.0));
    assert!(invalid(QuadTree::new(nan, 4, 5)));

    let tree: QuadTree<DefaultKey, ()> = QuadTree::new(world(), 4, 40).unwrap();
    assert_eq!(tree.config().max_depth, DEEP_MAX);
    assert_eq!(tree.node_count(), 1);
    assert!(tree.is_empty());
}

#[test]
fn test_split_on_capacity() {
    use pi_slotmap::{DefaultKey, SlotMap};

    let mut keys: SlotMap<DefaultKey, ()> = SlotMap::with_key();
    let mut tree = QuadTree::new(world(), 4, 5).unwrap();
    let points = [(100.0, 100.0), (200.0, 100.0), (300.0, 300.0), (400.0, 50.0)];
    for (i, (x, y)) in points.iter().enumerate() {
        tree.insert_at(keys.insert(()), Point2::new(*x, *y), i).unwrap();
    }
    assert_eq!(tree.node_count(), 1);
    tree.insert_at(keys.insert(()), Point2::new(50.0, 400.0), 4).unwrap();

    // 5个都在NE象限，根分裂后NE继续分裂
    let root = tree.node(tree.root_key()).unwrap();
    assert!(!root.is_leaf);
    let childs = *tree.slab[tree.root_key()].children().unwrap();
    for c in childs.iter() {
        assert_eq!(tree.slab[*c].bounds.half_extent(), nalgebra::Vector2::new(250.0, 250.0));
    }
    let ne = &tree.slab[childs[crate::bounds::NE]];
    assert_eq!(ne.count, 5);
    assert!(!ne.is_leaf());
    let counts: Vec<usize> = ne.children().unwrap().iter().map(|c| tree.slab[*c].count).collect();
    assert_eq!(counts, vec![1, 1, 2, 1]);
    assert_eq!(tree.depth(), 2);
    assert_eq!(check_tree(&tree), 5);
}

#[test]
fn test_depth_exhaustion() {
    use pi_slotmap::{DefaultKey, SlotMap};

    let mut keys: SlotMap<DefaultKey, ()> = SlotMap::with_key();
    let mut tree = QuadTree::new(world(), 1, 2).unwrap();
    for i in 0..10 {
        tree.insert_at(keys.insert(()), Point2::new(123.0, -77.0), i).unwrap();
    }
    assert_eq!(tree.len(), 10);
    assert_eq!(tree.depth(), 2);
    assert_eq!(tree.query_range(Point2::new(123.0, -77.0), 0.0).count(), 10);
    check_tree(&tree);
}

#[test]
fn test_out_of_bounds() {
    use pi_slotmap::{DefaultKey, SlotMap};

    let mut keys: SlotMap<DefaultKey, ()> = SlotMap::with_key();
    let mut tree = QuadTree::new(world(), 4, 5).unwrap();
    let a = keys.insert(());
    tree.insert_at(a, Point2::new(10.0, 10.0), 0).unwrap();
    let b = keys.insert(());
    assert_eq!(
        tree.insert_at(b, Point2::new(501.0, 0.0), 1),
        Err(QuadTreeError::OutOfBounds { x: 501.0, y: 0.0 })
    );
    assert!(tree.insert_at(b, Point2::new(0.0, Real::NAN), 1).is_err());
    assert_eq!(tree.len(), 1);
    assert!(!tree.contains_key(b));
    // 边界上的点可以插入
    tree.insert_at(b, Point2::new(-500.0, 500.0), 1).unwrap();
    assert_eq!(tree.insert_at(b, Point2::new(0.0, 0.0), 2), Err(QuadTreeError::AlreadyExists));
    assert_eq!(tree.remove(keys.insert(())), Err(QuadTreeError::NotFound));
    assert_eq!(check_tree(&tree), 2);
}

#[test]
fn test_split_then_merge() {
    use pi_slotmap::{DefaultKey, SlotMap};

    let mut keys: SlotMap<DefaultKey, ()> = SlotMap::with_key();
    let mut tree = QuadTree::new(world(), 4, 5).unwrap();
    let points = [(100.0, 100.0), (-100.0, 100.0), (-100.0, -100.0), (100.0, -100.0)];
    let mut ids = Vec::new();
    for (i, (x, y)) in points.iter().enumerate() {
        let id = keys.insert(());
        tree.insert_at(id, Point2::new(*x, *y), i).unwrap();
        ids.push(id);
    }
    let extra = keys.insert(());
    tree.insert_at(extra, Point2::new(0.0, 0.0), 4).unwrap();
    assert_eq!(tree.node_count(), 5);

    assert_eq!(tree.remove(extra), Ok((Point2::new(0.0, 0.0), 4)));
    assert_eq!(tree.node_count(), 1);
    let root = tree.node(tree.root_key()).unwrap();
    assert!(root.is_leaf);
    assert_eq!(root.count, 4);
    let mut left: Vec<DefaultKey> = tree.iter().map(|(id, _, _)| id).collect();
    left.sort();
    ids.sort();
    assert_eq!(left, ids);
    check_tree(&tree);
}

#[test]
fn test_remove_cascades_merge() {
    use pi_slotmap::{DefaultKey, SlotMap};

    let mut keys: SlotMap<DefaultKey, ()> = SlotMap::with_key();
    let mut tree = QuadTree::new(world(), 2, 6).unwrap();
    let mut ids = Vec::new();
    // 都挤在一个小角落，逐层分裂
    for i in 0..3 {
        let id = keys.insert(());
        tree.insert_at(id, Point2::new(400.0 + i as Real, 400.0), i).unwrap();
        ids.push(id);
    }
    assert!(tree.depth() > 1);
    tree.remove(ids[0]).unwrap();
    assert_eq!(tree.node_count(), 1);
    assert_eq!(check_tree(&tree), 2);
}

#[test]
fn test_query_range() {
    use pi_slotmap::{DefaultKey, SlotMap};

    let mut keys: SlotMap<DefaultKey, ()> = SlotMap::with_key();
    let mut tree = QuadTree::new(world(), 4, 5).unwrap();
    let a = keys.insert(());
    let b = keys.insert(());
    tree.insert_at(a, Point2::new(50.0, 0.0), "a").unwrap();
    tree.insert_at(b, Point2::new(200.0, 0.0), "b").unwrap();
    let result: Vec<(DefaultKey, &&str)> = tree.query_range(Point2::new(0.0, 0.0), 100.0).collect();
    assert_eq!(result, vec![(a, &"a")]);
    assert_eq!(tree.query_range(Point2::new(-400.0, -400.0), 10.0).count(), 0);
}

#[test]
fn test_query_region_restart() {
    use pi_slotmap::{DefaultKey, SlotMap};

    let mut keys: SlotMap<DefaultKey, ()> = SlotMap::with_key();
    let mut tree = QuadTree::new(world(), 1, 5).unwrap();
    let mut inside = Vec::new();
    for i in 0..8 {
        let id = keys.insert(());
        let x = -350.0 + 100.0 * i as Real;
        tree.insert_at(id, Point2::new(x, x / 2.0), i).unwrap();
        if x >= -100.0 && x <= 200.0 {
            inside.push(id);
        }
    }
    inside.sort();
    let aabb = Aabb::new(Point2::new(-100.0, -100.0), Point2::new(200.0, 100.0));
    let mut iter = tree.query_region(&aabb);
    let copy = iter.clone();
    assert_eq!(collect_ids(&mut iter), inside);
    assert_eq!(iter.next(), None);
    iter.restart();
    assert_eq!(collect_ids(iter), inside);
    assert_eq!(collect_ids(copy), inside);

    // 回调形式
    let mut args = crate::query::AbQueryArgs::new(aabb);
    tree.query(&aabb, crate::query::intersects, &mut args, crate::query::ab_query_func);
    args.result.sort();
    assert_eq!(args.result, inside);
}

#[test]
fn test_update() {
    use pi_slotmap::{DefaultKey, SlotMap};

    let mut keys: SlotMap<DefaultKey, ()> = SlotMap::with_key();
    let mut tree = QuadTree::new(world(), 1, 5).unwrap();
    let a = keys.insert(());
    let b = keys.insert(());
    tree.insert_at(a, Point2::new(100.0, 100.0), 0).unwrap();
    tree.insert_at(b, Point2::new(-100.0, -100.0), 1).unwrap();
    let leaf = tree.leaf_of(a).unwrap();

    // 同一叶子内移动
    assert_eq!(tree.update(a, Point2::new(120.0, 130.0)), Ok(false));
    assert_eq!(tree.leaf_of(a), Some(leaf));
    assert_eq!(tree.get(a).map(|(p, _)| *p), Some(Point2::new(120.0, 130.0)));

    // 换叶子
    assert_eq!(tree.update(a, Point2::new(-120.0, 130.0)), Ok(true));
    assert_ne!(tree.leaf_of(a), Some(leaf));
    assert_eq!(collect_ids(tree.query_range(Point2::new(-120.0, 130.0), 0.0)), vec![a]);
    check_tree(&tree);

    // 范围外，保持原位置
    assert!(matches!(
        tree.update(a, Point2::new(0.0, 900.0)),
        Err(QuadTreeError::OutOfBounds { .. })
    ));
    assert_eq!(tree.get(a).map(|(p, _)| *p), Some(Point2::new(-120.0, 130.0)));
    assert_eq!(tree.shift(b, nalgebra::Vector2::new(0.0, 200.0)), Ok(true));
    assert_eq!(tree.get(b).map(|(p, _)| *p), Some(Point2::new(-100.0, 100.0)));
    assert_eq!(tree.update(keys.insert(()), Point2::new(0.0, 0.0)), Err(QuadTreeError::NotFound));
    check_tree(&tree);
}

#[test]
fn test_random_ops() {
    use pcg_rand::Pcg32;
    use pi_slotmap::{DefaultKey, SlotMap};
    use rand::{Rng, SeedableRng};

    let mut rng = Pcg32::seed_from_u64(20);
    let mut keys: SlotMap<DefaultKey, ()> = SlotMap::with_key();
    let mut tree = QuadTree::new(world(), 4, 6).unwrap();
    let mut live: Vec<(DefaultKey, Point2<Real>)> = Vec::new();
    for step in 0..2000 {
        match rng.gen_range(0..10) {
            0..=4 => {
                let p = Point2::new(rng.gen_range(-500.0..=500.0), rng.gen_range(-500.0..=500.0));
                let id = keys.insert(());
                tree.insert_at(id, p, step).unwrap();
                live.push((id, p));
            }
            5..=7 if !live.is_empty() => {
                let i = rng.gen_range(0..live.len());
                let (id, p) = live.swap_remove(i);
                assert_eq!(tree.remove(id).map(|(p, _)| p), Ok(p));
            }
            _ if !live.is_empty() => {
                let i = rng.gen_range(0..live.len());
                let p = Point2::new(rng.gen_range(-500.0..=500.0), rng.gen_range(-500.0..=500.0));
                tree.update(live[i].0, p).unwrap();
                live[i].1 = p;
            }
            _ => (),
        }
        if step % 100 == 0 {
            assert_eq!(check_tree(&tree), live.len());
        }
    }
    assert_eq!(check_tree(&tree), live.len());
    for (id, p) in live.iter() {
        assert!(tree.query_range(*p, 0.0).any(|(k, _)| k == *id));
    }
    // 暴力比对范围查询
    for _ in 0..50 {
        let c = Point2::new(rng.gen_range(-600.0..600.0), rng.gen_range(-600.0..600.0));
        let r: Real = rng.gen_range(0.0..300.0);
        let mut expect: Vec<DefaultKey> = live
            .iter()
            .filter(|(_, p)| (p - c).norm_squared() <= r * r)
            .map(|(id, _)| *id)
            .collect();
        expect.sort();
        assert_eq!(collect_ids(tree.query_range(c, r)), expect);
    }
}

#[test]
fn test_odd_bounds_point_query() {
    use pcg_rand::Pcg32;
    use pi_slotmap::{DefaultKey, SlotMap};
    use rand::{Rng, SeedableRng};

    let mut rng = Pcg32::seed_from_u64(44);
    for _ in 0..200 {
        let root = QuadBounds::new(
            Point2::new(rng.gen_range(-1000.0..1000.0), rng.gen_range(-1000.0..1000.0)),
            nalgebra::Vector2::new(rng.gen_range(0.5..1000.0), rng.gen_range(0.5..1000.0)),
        );
        let mut keys: SlotMap<DefaultKey, ()> = SlotMap::with_key();
        let mut tree = QuadTree::new(root, 1, 8).unwrap();
        // 根的四个角，以及沿一条随机路径各层的中心和分界线端点
        let mut points = vec![
            root.mins(),
            root.maxs(),
            Point2::new(root.mins().x, root.maxs().y),
            Point2::new(root.maxs().x, root.mins().y),
        ];
        let mut b = root;
        for _ in 0..8 {
            let c = b.center();
            points.extend([c, Point2::new(b.mins().x, c.y), Point2::new(c.x, b.maxs().y)]);
            b = b.quadrant(rng.gen_range(0..4));
        }
        let mut ids = Vec::new();
        for (i, p) in points.iter().enumerate() {
            let id = keys.insert(());
            tree.insert_at(id, *p, i).unwrap();
            ids.push(id);
        }
        assert_eq!(check_tree(&tree), points.len());
        for (id, p) in ids.iter().zip(points.iter()) {
            assert!(tree.query_range(*p, 0.0).any(|(k, _)| k == *id));
            assert!(tree.query_region(&Aabb::new(*p, *p)).any(|(k, _)| k == *id));
        }
        let mut found = Vec::new();
        tree.trace_range(points[4], 0.0, |id, _, on| {
            if on {
                found.push(id)
            }
        });
        assert!(found.contains(&ids[4]));
        assert_eq!(tree.query_range(points[4], -1.0).count(), 0);

        for id in ids {
            tree.remove(id).unwrap();
        }
        assert_eq!(tree.node_count(), 1);
    }
}

#[cfg(test)]
struct Actor {
    pos: std::cell::Cell<Point2<Real>>,
}

#[cfg(test)]
impl SpatialIndexObject for Actor {
    fn position(&self) -> Point2<Real> {
        self.pos.get()
    }
}

#[test]
fn test_rebuild() {
    use pi_slotmap::{DefaultKey, SlotMap};
    use std::rc::Rc;

    let mut keys: SlotMap<DefaultKey, ()> = SlotMap::with_key();
    let mut tree: QuadTree<DefaultKey, Rc<Actor>> = QuadTree::new(world(), 2, 5).unwrap();
    let mut actors = Vec::new();
    for i in 0..6 {
        let actor = Rc::new(Actor {
            pos: std::cell::Cell::new(Point2::new(-300.0 + 100.0 * i as Real, 10.0)),
        });
        let id = keys.insert(());
        tree.insert(id, actor.clone()).unwrap();
        actors.push((id, actor));
    }
    assert_eq!(tree.rebuild(), RebuildReport::default());

    // 一个小移动，一个跨象限，一个出界
    actors[0].1.pos.set(Point2::new(-301.0, 11.0));
    actors[1].1.pos.set(Point2::new(250.0, -250.0));
    actors[2].1.pos.set(Point2::new(-100.0, 700.0));
    let report = tree.rebuild();
    assert_eq!(report.updated, 3);
    assert_eq!(report.moved, 1);
    assert_eq!(report.escaped, vec![actors[2].0]);
    assert_eq!(tree.len(), 6);
    assert_eq!(tree.get(actors[2].0).map(|(p, _)| *p), Some(Point2::new(-100.0, 10.0)));
    assert_eq!(collect_ids(tree.query_range(Point2::new(250.0, -250.0), 0.0)), vec![actors[1].0]);

    actors[2].1.pos.set(Point2::new(-100.0, -10.0));
    assert!(tree.refresh(actors[2].0).is_ok());
    assert_eq!(tree.get(actors[2].0).map(|(p, _)| *p), Some(Point2::new(-100.0, -10.0)));
    check_tree(&tree);
}

#[test]
fn test_lod_full_split_and_collapse() {
    use crate::policy::{DistanceFactor, Rebalance};
    use pi_slotmap::DefaultKey;

    let config = TreeConfig::new(4, 4).with_rebalance(Rebalance::Distance);
    let mut tree: QuadTree<DefaultKey, ()> = QuadTree::with_config(world(), config).unwrap();
    let always = (|_: usize| Real::MAX, |_: usize| Real::MAX);
    let stats = tree.traverse_by_distance(&Point2::new(0.0, 0.0), &always);
    assert_eq!(stats, LodStats { splits: 85, merges: 0 });
    assert_eq!(tree.node_count(), 341);
    assert_eq!(tree.depth(), 4);

    let stats = tree.traverse_by_distance(&Point2::new(1.0e6, 1.0e6), &DistanceFactor::default());
    assert_eq!(stats, LodStats { splits: 0, merges: 85 });
    assert_eq!(tree.node_count(), 1);
    assert!(tree.node(tree.root_key()).unwrap().is_leaf);
}

#[test]
fn test_lod_by_distance() {
    use crate::policy::{DistanceFactor, Rebalance};
    use pi_slotmap::{DefaultKey, SlotMap};

    let mut keys: SlotMap<DefaultKey, ()> = SlotMap::with_key();
    let config = TreeConfig::new(4, 3).with_rebalance(Rebalance::Distance);
    let mut tree = QuadTree::with_config(world(), config).unwrap();
    // 距离驱动下插入不会分裂
    for i in 0..9 {
        tree.insert_at(keys.insert(()), Point2::new(-450.0 + 100.0 * i as Real, 30.0), i).unwrap();
    }
    assert_eq!(tree.node_count(), 1);

    let policy = DistanceFactor::new(400.0, 800.0);
    // 根中心距离0 < 400 分裂，子节点中心距离353 > 200 不再分裂
    let stats = tree.traverse_by_distance(&Point2::new(0.0, 0.0), &policy);
    assert_eq!(stats, LodStats { splits: 1, merges: 0 });
    assert_eq!(tree.node_count(), 5);
    assert_eq!(check_tree(&tree), 9);
    // 再来一次结构不变
    assert_eq!(tree.traverse_by_distance(&Point2::new(0.0, 0.0), &policy), LodStats::default());

    // 靠近NE子节点中心，NE继续分裂
    let stats = tree.traverse_by_distance(&Point2::new(250.0, 250.0), &policy);
    assert_eq!(stats.splits, 1);
    assert_eq!(tree.node_count(), 9);
    assert_eq!(check_tree(&tree), 9);

    // 远离后合并回一个叶子，对象都在
    tree.traverse_by_distance(&Point2::new(5000.0, 0.0), &policy);
    assert_eq!(tree.node_count(), 1);
    assert_eq!(check_tree(&tree), 9);
    // 删除也不会触发合并
    tree.traverse_by_distance(&Point2::new(0.0, 0.0), &policy);
    let id = tree.iter().map(|(id, _, _)| id).next().unwrap();
    tree.remove(id).unwrap();
    assert_eq!(tree.node_count(), 5);
}

#[test]
fn test_traverse_order() {
    use pi_slotmap::{DefaultKey, SlotMap};

    let mut keys: SlotMap<DefaultKey, ()> = SlotMap::with_key();
    let mut tree = QuadTree::new(world(), 1, 5).unwrap();
    tree.insert_at(keys.insert(()), Point2::new(100.0, 100.0), 0).unwrap();
    tree.insert_at(keys.insert(()), Point2::new(-100.0, -100.0), 1).unwrap();
    let mut centers = Vec::new();
    tree.traverse(|v| centers.push((v.depth, v.bounds.center())));
    assert_eq!(
        centers,
        vec![
            (0, Point2::new(0.0, 0.0)),
            (1, Point2::new(250.0, 250.0)),
            (1, Point2::new(-250.0, 250.0)),
            (1, Point2::new(-250.0, -250.0)),
            (1, Point2::new(250.0, -250.0)),
        ]
    );

    struct Recorder(Vec<(usize, bool)>);
    impl DebugDraw for Recorder {
        fn draw_bounds(&mut self, _bounds: &QuadBounds, depth: usize, in_range: bool) {
            self.0.push((depth, in_range));
        }
    }
    let mut rec = Recorder(Vec::new());
    tree.debug_draw(&mut rec);
    assert_eq!(rec.0.len(), 5);
    assert!(rec.0.iter().all(|(_, in_range)| !in_range));
}

#[test]
fn test_trace_range() {
    use pi_slotmap::{DefaultKey, SlotMap};
    use std::collections::HashMap;

    let mut keys: SlotMap<DefaultKey, ()> = SlotMap::with_key();
    let mut tree = QuadTree::new(world(), 1, 5).unwrap();
    let a = keys.insert(());
    let b = keys.insert(());
    let c = keys.insert(());
    tree.insert_at(a, Point2::new(50.0, 0.0), 0).unwrap();
    tree.insert_at(b, Point2::new(60.0, 60.0), 1).unwrap();
    tree.insert_at(c, Point2::new(-400.0, -400.0), 2).unwrap();

    let mut active = HashMap::new();
    tree.trace_range(Point2::new(50.0, 20.0), 30.0, |id, _, on| {
        assert!(active.insert(id, on).is_none());
    });
    assert_eq!(active.len(), 3);
    assert_eq!(active[&a], true);
    assert_eq!(active[&b], false);
    assert_eq!(active[&c], false);

    let root = tree.node(tree.root_key()).unwrap();
    assert!(root.in_range);
    let far = tree.node(tree.leaf_of(c).unwrap()).unwrap();
    assert!(!far.in_range);
    let near = tree.node(tree.leaf_of(a).unwrap()).unwrap();
    assert!(near.in_range);
    // 结构不变
    assert_eq!(check_tree(&tree), 3);
}

#[test]
fn test_clusters() {
    use pi_slotmap::{DefaultKey, SlotMap};

    let mut keys: SlotMap<DefaultKey, ()> = SlotMap::with_key();
    let mut tree = QuadTree::new(world(), 2, 5).unwrap();
    for (x, y) in [(100.0, 100.0), (300.0, 100.0), (200.0, 400.0), (-200.0, -200.0)] {
        tree.insert_at(keys.insert(()), Point2::new(x, y), ()).unwrap();
    }
    let all = tree.clusters(0);
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].count, 4);
    assert_eq!(all[0].centroid, Point2::new(100.0, 100.0));

    let parts = tree.clusters(1);
    assert_eq!(parts.len(), 2);
    assert_eq!(parts[0].count, 3);
    assert_eq!(parts[0].centroid, Point2::new(200.0, 200.0));
    assert_eq!(parts[1].count, 1);
    assert_eq!(parts[1].centroid, Point2::new(-200.0, -200.0));
    assert!(parts.iter().all(|c| c.depth == 1));

    tree.clear();
    assert!(tree.is_empty());
    assert_eq!(tree.node_count(), 1);
    assert!(tree.clusters(3).is_empty());
}
