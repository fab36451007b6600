//! 四叉节点的包围范围，存放左下和右上两个角点
//! 子象限的顺序固定为 NE, NW, SW, SE，对应子节点索引 0..3。
//! 子范围直接取父范围的角点和中心点，不经过半尺寸换算，所以父子、兄弟之间的分界线完全一致，
//! 按中心点分到某个象限的点一定被该象限包含。

use nalgebra::*;
use num_traits::{One, Zero};
use parry2d::{bounding_volume::*, math::Real};

/// 东北象限
pub const NE: usize = 0;
/// 西北象限
pub const NW: usize = 1;
/// 西南象限
pub const SW: usize = 2;
/// 东南象限
pub const SE: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuadBounds {
    mins: Point2<Real>,
    maxs: Point2<Real>,
}

impl QuadBounds {
    /// 用中心点和半尺寸构建
    #[inline]
    pub fn new(center: Point2<Real>, half_extent: Vector2<Real>) -> Self {
        QuadBounds {
            mins: center - half_extent,
            maxs: center + half_extent,
        }
    }

    /// 半尺寸在两个轴上都必须大于0（NaN也非法）
    #[inline]
    pub fn is_valid(&self) -> bool {
        let half = self.half_extent();
        half.x > Real::zero() && half.y > Real::zero()
    }

    /// 角点都是有限值
    #[inline]
    pub fn is_finite(&self) -> bool {
        self.mins.x.is_finite() && self.mins.y.is_finite() && self.maxs.x.is_finite() && self.maxs.y.is_finite()
    }

    #[inline]
    pub fn mins(&self) -> Point2<Real> {
        self.mins
    }

    #[inline]
    pub fn maxs(&self) -> Point2<Real> {
        self.maxs
    }

    /// 中心点，也是子象限的分界点
    #[inline]
    pub fn center(&self) -> Point2<Real> {
        let two = Real::one() + Real::one();
        Point2::new(
            (self.mins.x + self.maxs.x) / two,
            (self.mins.y + self.maxs.y) / two,
        )
    }

    #[inline]
    pub fn half_extent(&self) -> Vector2<Real> {
        let two = Real::one() + Real::one();
        (self.maxs - self.mins) / two
    }

    /// 转成parry2d的Aabb
    #[inline]
    pub fn aabb(&self) -> Aabb {
        Aabb::new(self.mins, self.maxs)
    }

    /// 从parry2d的Aabb构建
    pub fn from_aabb(aabb: &Aabb) -> Self {
        QuadBounds {
            mins: aabb.mins,
            maxs: aabb.maxs,
        }
    }

    /// 点是否在本区域内，边界包含
    #[inline]
    pub fn contains(&self, point: &Point2<Real>) -> bool {
        point.x >= self.mins.x
            && point.x <= self.maxs.x
            && point.y >= self.mins.y
            && point.y <= self.maxs.y
    }

    /// 方形与圆形求交
    /// 圆心夹到方形内得到最近点，再比较距离平方；圆心在方形内时最近点就是圆心本身
    /// 半径为负或NaN时不相交
    pub fn intersects_circle(&self, circle_center: &Point2<Real>, radius: Real) -> bool {
        if !(radius >= Real::zero()) {
            return false;
        }
        let x = circle_center.x.max(self.mins.x).min(self.maxs.x);
        let y = circle_center.y.max(self.mins.y).min(self.maxs.y);
        let (dx, dy) = (circle_center.x - x, circle_center.y - y);
        dx * dx + dy * dy <= radius * radius
    }

    /// 和矩形是否相交，边界接触也算相交
    #[inline]
    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        self.aabb().intersects(aabb)
    }

    /// 到中心点的距离
    #[inline]
    pub fn distance_to_center(&self, point: &Point2<Real>) -> Real {
        distance(&self.center(), point)
    }

    /// 指定象限的子范围
    /// 分界线取自父范围的中心点，外边取自父范围的角点
    #[inline]
    pub fn quadrant(&self, index: usize) -> QuadBounds {
        let c = self.center();
        let (mins, maxs) = match index {
            NE => (c, self.maxs),
            NW => (
                Point2::new(self.mins.x, c.y),
                Point2::new(c.x, self.maxs.y),
            ),
            SW => (self.mins, c),
            SE => (
                Point2::new(c.x, self.mins.y),
                Point2::new(self.maxs.x, c.y),
            ),
            _ => panic!("invalid quadrant"),
        };
        QuadBounds { mins, maxs }
    }

    /// 分成四个象限，顺序 NE, NW, SW, SE
    pub fn subdivide(&self) -> [QuadBounds; 4] {
        [
            self.quadrant(NE),
            self.quadrant(NW),
            self.quadrant(SW),
            self.quadrant(SE),
        ]
    }

    /// 判断点所在的子象限
    /// 落在分界线上的点按 NE, NW, SW, SE 的顺序取第一个包含它的象限
    #[inline]
    pub fn quadrant_of(&self, point: &Point2<Real>) -> usize {
        let c = self.center();
        let east = point.x >= c.x;
        let north = point.y >= c.y;
        match (east, north) {
            (true, true) => NE,
            (false, true) => NW,
            (false, false) => SW,
            (true, false) => SE,
        }
    }
}

impl From<Aabb> for QuadBounds {
    fn from(aabb: Aabb) -> Self {
        QuadBounds::from_aabb(&aabb)
    }
}

#[cfg(test)]
fn bounds(x: Real, y: Real, hx: Real, hy: Real) -> QuadBounds {
    QuadBounds::new(Point2::new(x, y), Vector2::new(hx, hy))
}

#[test]
fn test_contains_inclusive() {
    let b = bounds(0.0, 0.0, 500.0, 500.0);
    assert!(b.contains(&Point2::new(500.0, -500.0)));
    assert!(b.contains(&Point2::new(0.0, 0.0)));
    assert!(!b.contains(&Point2::new(500.1, 0.0)));
    assert!(!b.contains(&Point2::new(0.0, -500.5)));
}

#[test]
fn test_intersects_circle() {
    let b = bounds(0.0, 0.0, 10.0, 10.0);
    // 圆心在内部
    assert!(b.intersects_circle(&Point2::new(1.0, 1.0), 0.0));
    // 贴边
    assert!(b.intersects_circle(&Point2::new(15.0, 0.0), 5.0));
    assert!(!b.intersects_circle(&Point2::new(15.0, 0.0), 4.9));
    // 角上用的是欧氏距离，不是轴向距离
    assert!(!b.intersects_circle(&Point2::new(14.0, 14.0), 5.0));
    assert!(b.intersects_circle(&Point2::new(13.0, 14.0), 5.0));
}

#[test]
fn test_subdivide() {
    let b = bounds(10.0, -20.0, 8.0, 4.0);
    let qs = b.subdivide();
    assert_eq!(qs[NE], bounds(14.0, -18.0, 4.0, 2.0));
    assert_eq!(qs[NW], bounds(6.0, -18.0, 4.0, 2.0));
    assert_eq!(qs[SW], bounds(6.0, -22.0, 4.0, 2.0));
    assert_eq!(qs[SE], bounds(14.0, -22.0, 4.0, 2.0));

    let area = |q: &QuadBounds| 4.0 * q.half_extent().x * q.half_extent().y;
    let total: Real = qs.iter().map(area).sum();
    assert_eq!(total, area(&b));

    // 两两之间只在公共边上重叠
    for i in 0..4 {
        for j in i + 1..4 {
            let (a, c) = (qs[i].aabb(), qs[j].aabb());
            let w = a.maxs.x.min(c.maxs.x) - a.mins.x.max(c.mins.x);
            let h = a.maxs.y.min(c.maxs.y) - a.mins.y.max(c.mins.y);
            assert!(w <= 0.0 || h <= 0.0, "{} {} overlap", i, j);
        }
    }
}

#[test]
fn test_quadrant_of_boundary() {
    let b = bounds(0.0, 0.0, 100.0, 100.0);
    assert_eq!(b.quadrant_of(&Point2::new(0.0, 0.0)), NE);
    assert_eq!(b.quadrant_of(&Point2::new(-1.0, 0.0)), NW);
    assert_eq!(b.quadrant_of(&Point2::new(-1.0, -1.0)), SW);
    assert_eq!(b.quadrant_of(&Point2::new(0.0, -1.0)), SE);
    // 选中的象限一定包含该点
    for p in [
        Point2::new(0.0, 0.0),
        Point2::new(-100.0, 100.0),
        Point2::new(100.0, -100.0),
        Point2::new(-0.5, -100.0),
    ] {
        assert!(b.quadrant(b.quadrant_of(&p)).contains(&p));
    }
}

#[test]
fn test_aabb_roundtrip() {
    let b = bounds(3.0, 4.0, 2.0, 1.0);
    let aabb = b.aabb();
    assert_eq!(aabb.mins, Point2::new(1.0, 3.0));
    assert_eq!(aabb.maxs, Point2::new(5.0, 5.0));
    assert_eq!(QuadBounds::from(aabb), b);
    assert!(b.intersects_aabb(&Aabb::new(Point2::new(5.0, 5.0), Point2::new(6.0, 6.0))));
    assert!(!b.intersects_aabb(&Aabb::new(Point2::new(5.1, 5.0), Point2::new(6.0, 6.0))));
}

#[test]
fn test_quadrant_edges_exact() {
    use pcg_rand::Pcg32;
    use rand::{Rng, SeedableRng};

    let mut rng = Pcg32::seed_from_u64(3);
    for _ in 0..2000 {
        let mut b = bounds(
            rng.gen_range(-1000.0..1000.0),
            rng.gen_range(-1000.0..1000.0),
            rng.gen_range(0.5..1000.0),
            rng.gen_range(0.5..1000.0),
        );
        let root = b;
        for _ in 0..12 {
            let c = b.center();
            let qs = b.subdivide();
            // 兄弟之间共用分界线，外边和父范围一致
            assert_eq!(qs[NE].mins(), c);
            assert_eq!(qs[SW].maxs(), c);
            assert_eq!(qs[NW].maxs().y, b.maxs().y);
            assert_eq!(qs[SE].maxs().x, b.maxs().x);
            // 分界线、角点、中心都落在选中的象限内
            for p in [
                c,
                b.mins(),
                b.maxs(),
                Point2::new(b.mins().x, c.y),
                Point2::new(c.x, b.maxs().y),
                Point2::new(b.maxs().x, b.mins().y),
                root.center(),
                root.maxs(),
            ] {
                if b.contains(&p) {
                    let q = &qs[b.quadrant_of(&p)];
                    assert!(q.contains(&p));
                    assert!(q.intersects_circle(&p, 0.0));
                }
            }
            b = qs[rng.gen_range(0..4)];
        }
    }
}

#[test]
fn test_negative_radius() {
    let b = bounds(0.0, 0.0, 10.0, 10.0);
    assert!(!b.intersects_circle(&Point2::new(1.0, 1.0), -5.0));
    assert!(!b.intersects_circle(&Point2::new(1.0, 1.0), Real::NAN));
}
