//! 分裂及合并的策略
//!
//! 数量驱动：叶子对象数超过容量时分裂，删除后子节点对象总数不超过容量时合并。
//! 距离驱动：由`traverse_by_distance`根据视点到节点中心的距离分裂或合并，和对象数量无关。
//! 两种策略在构建时通过`Rebalance`选择，可以组合使用。

use parry2d::math::Real;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 最大深度的上限
pub const DEEP_MAX: usize = 16;
/// 叶子默认容量
pub const MAX_OBJECTS_PER_LEAF: usize = 4;
/// 默认最大深度
pub const MAX_DEPTH: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Rebalance {
    /// 插入时按容量分裂，删除时按容量合并
    #[default]
    Population,
    /// 插入删除都不改变结构，只由距离遍历分裂合并
    Distance,
    /// 两者都启用
    Composite,
}

impl Rebalance {
    #[inline]
    pub fn by_population(&self) -> bool {
        !matches!(self, Rebalance::Distance)
    }
}

/// 四叉树的配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TreeConfig {
    /// 叶子节点的容量，超过则分裂。达到最大深度的叶子不再分裂，可以容纳任意数量
    pub max_objects_per_leaf: usize,
    /// 最大深度，根节点深度为0
    pub max_depth: usize,
    pub rebalance: Rebalance,
}

impl Default for TreeConfig {
    fn default() -> Self {
        TreeConfig {
            max_objects_per_leaf: MAX_OBJECTS_PER_LEAF,
            max_depth: MAX_DEPTH,
            rebalance: Rebalance::default(),
        }
    }
}

impl TreeConfig {
    pub fn new(max_objects_per_leaf: usize, max_depth: usize) -> Self {
        TreeConfig {
            max_objects_per_leaf,
            max_depth,
            ..Default::default()
        }
    }

    pub fn with_rebalance(mut self, rebalance: Rebalance) -> Self {
        self.rebalance = rebalance;
        self
    }
}

/// 距离驱动的LOD策略，参数都是节点深度
pub trait LodPolicy {
    /// 视点到叶子中心的距离小于该值时分裂
    fn subdivide_distance(&self, depth: usize) -> Real;
    /// 深度为depth的节点，所有子节点中心到视点的距离都大于该值时合并
    fn merge_distance(&self, depth: usize) -> Real;
}

/// 距离因子，每深一层阈值减半
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DistanceFactor {
    pub subdivide: Real,
    pub merge: Real,
}

impl Default for DistanceFactor {
    fn default() -> Self {
        DistanceFactor {
            subdivide: 1000.0,
            merge: 2000.0,
        }
    }
}

impl DistanceFactor {
    pub fn new(subdivide: Real, merge: Real) -> Self {
        DistanceFactor { subdivide, merge }
    }
}

#[inline]
fn halve(factor: Real, depth: usize) -> Real {
    factor / (2.0 as Real).powi(depth as i32)
}

impl LodPolicy for DistanceFactor {
    #[inline]
    fn subdivide_distance(&self, depth: usize) -> Real {
        halve(self.subdivide, depth)
    }
    // 子节点深度为depth + 1，阈值为 merge / 2^(depth + 1 - 1)
    #[inline]
    fn merge_distance(&self, depth: usize) -> Real {
        halve(self.merge, depth)
    }
}

impl<S, M> LodPolicy for (S, M)
where
    S: Fn(usize) -> Real,
    M: Fn(usize) -> Real,
{
    #[inline]
    fn subdivide_distance(&self, depth: usize) -> Real {
        (self.0)(depth)
    }
    #[inline]
    fn merge_distance(&self, depth: usize) -> Real {
        (self.1)(depth)
    }
}

impl<P: LodPolicy + ?Sized> LodPolicy for &P {
    fn subdivide_distance(&self, depth: usize) -> Real {
        (**self).subdivide_distance(depth)
    }
    fn merge_distance(&self, depth: usize) -> Real {
        (**self).merge_distance(depth)
    }
}

#[test]
fn test_distance_factor() {
    let f = DistanceFactor::default();
    assert_eq!(f.subdivide_distance(0), 1000.0);
    assert_eq!(f.subdivide_distance(3), 125.0);
    assert_eq!(f.merge_distance(0), 2000.0);
    assert_eq!(f.merge_distance(2), 500.0);
}

#[test]
fn test_closure_policy() {
    let p = (|d: usize| 10.0 * d as Real, |_: usize| 99.0 as Real);
    assert_eq!(p.subdivide_distance(4), 40.0);
    assert_eq!(p.merge_distance(7), 99.0);
}

#[test]
fn test_rebalance() {
    assert!(Rebalance::Population.by_population());
    assert!(Rebalance::Composite.by_population());
    assert!(!Rebalance::Distance.by_population());
    let c = TreeConfig::new(8, 6).with_rebalance(Rebalance::Composite);
    assert_eq!(c.max_objects_per_leaf, 8);
    assert_eq!(c.rebalance, Rebalance::Composite);
    assert_eq!(TreeConfig::default(), TreeConfig::new(4, 5));
}
