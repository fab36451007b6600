//! 放入四叉树的对象需要提供的能力

use std::rc::Rc;
use std::sync::Arc;

use nalgebra::{Point2, Point3};
use parry2d::math::Real;

/// 可被空间索引的对象，只需提供只读的2d位置
/// 树只持有对象的引用（id和绑定），从不修改对象的其它状态
pub trait SpatialIndexObject {
    fn position(&self) -> Point2<Real>;

    /// 关心z轴的调用方使用，默认z为0
    fn position_3d(&self) -> Point3<Real> {
        let p = self.position();
        Point3::new(p.x, p.y, 0.0)
    }
}

impl SpatialIndexObject for Point2<Real> {
    #[inline]
    fn position(&self) -> Point2<Real> {
        *self
    }
}

impl SpatialIndexObject for Point3<Real> {
    #[inline]
    fn position(&self) -> Point2<Real> {
        Point2::new(self.x, self.y)
    }
    #[inline]
    fn position_3d(&self) -> Point3<Real> {
        *self
    }
}

impl<T: SpatialIndexObject + ?Sized> SpatialIndexObject for &T {
    #[inline]
    fn position(&self) -> Point2<Real> {
        (**self).position()
    }
    #[inline]
    fn position_3d(&self) -> Point3<Real> {
        (**self).position_3d()
    }
}

impl<T: SpatialIndexObject + ?Sized> SpatialIndexObject for Rc<T> {
    #[inline]
    fn position(&self) -> Point2<Real> {
        (**self).position()
    }
    #[inline]
    fn position_3d(&self) -> Point3<Real> {
        (**self).position_3d()
    }
}

impl<T: SpatialIndexObject + ?Sized> SpatialIndexObject for Arc<T> {
    #[inline]
    fn position(&self) -> Point2<Real> {
        (**self).position()
    }
    #[inline]
    fn position_3d(&self) -> Point3<Real> {
        (**self).position_3d()
    }
}

impl<T: SpatialIndexObject + ?Sized> SpatialIndexObject for std::cell::RefCell<T> {
    #[inline]
    fn position(&self) -> Point2<Real> {
        self.borrow().position()
    }
    #[inline]
    fn position_3d(&self) -> Point3<Real> {
        self.borrow().position_3d()
    }
}

#[test]
fn test_point3_projection() {
    let p = Point3::new(1.0, 2.0, 3.0);
    assert_eq!(p.position(), Point2::new(1.0, 2.0));
    assert_eq!(Rc::new(p).position_3d(), p);
    assert_eq!(Point2::new(4.0, 5.0).position_3d(), Point3::new(4.0, 5.0, 0.0));
}
