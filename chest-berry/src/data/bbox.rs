use crate::Idx3d;
use ndarray::{s, ArrayView3, Ix3, SliceInfo, SliceInfoElem};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 数组索引空间中的轴对齐包围盒, 上下界均包含. 索引顺序为 `(k, j, i)`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BoundingBox {
    /// 下界 (含).
    pub lo: Idx3d,

    /// 上界 (含).
    pub hi: Idx3d,
}

impl BoundingBox {
    /// 仅包含一个点的包围盒.
    #[inline]
    pub fn point(p: Idx3d) -> Self {
        Self { lo: p, hi: p }
    }

    /// 计算所有点的包围盒. 点集为空时返回 `None`.
    pub fn from_points<I: IntoIterator<Item = Idx3d>>(it: I) -> Option<Self> {
        let mut it = it.into_iter();
        let mut bb = Self::point(it.next()?);
        it.for_each(|p| bb.extend(p));
        Some(bb)
    }

    /// 扩展包围盒使其包含 `p`.
    #[inline]
    pub fn extend(&mut self, (k, j, i): Idx3d) {
        self.lo = (self.lo.0.min(k), self.lo.1.min(j), self.lo.2.min(i));
        self.hi = (self.hi.0.max(k), self.hi.1.max(j), self.hi.2.max(i));
    }

    /// 向各方向扩张 `n` 个体素, 并裁剪到形状 `shape` 内.
    pub fn pad(&self, n: usize, shape: Idx3d) -> Self {
        Self {
            lo: (
                self.lo.0.saturating_sub(n),
                self.lo.1.saturating_sub(n),
                self.lo.2.saturating_sub(n),
            ),
            hi: (
                (self.hi.0 + n).min(shape.0 - 1),
                (self.hi.1 + n).min(shape.1 - 1),
                (self.hi.2 + n).min(shape.2 - 1),
            ),
        }
    }

    /// 包围盒形状.
    #[inline]
    pub fn shape(&self) -> Idx3d {
        (
            self.hi.0 - self.lo.0 + 1,
            self.hi.1 - self.lo.1 + 1,
            self.hi.2 - self.lo.2 + 1,
        )
    }

    /// 包围盒内体素个数.
    #[inline]
    pub fn size(&self) -> usize {
        let (a, b, c) = self.shape();
        a * b * c
    }

    /// `p` 是否位于包围盒内?
    #[inline]
    pub fn contains(&self, (k, j, i): &Idx3d) -> bool {
        (self.lo.0..=self.hi.0).contains(k)
            && (self.lo.1..=self.hi.1).contains(j)
            && (self.lo.2..=self.hi.2).contains(i)
    }

    /// 用于 `ndarray` 切片的描述.
    #[inline]
    pub fn slice_info(&self) -> SliceInfo<[SliceInfoElem; 3], Ix3, Ix3> {
        s![
            self.lo.0..=self.hi.0,
            self.lo.1..=self.hi.1,
            self.lo.2..=self.hi.2
        ]
    }

    /// 在 `data` 上截取包围盒部分的视图.
    #[inline]
    pub fn crop<'a, T>(&self, data: ArrayView3<'a, T>) -> ArrayView3<'a, T> {
        data.slice_move(self.slice_info())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn test_bbox_from_points() {
        assert_eq!(BoundingBox::from_points(std::iter::empty()), None);
        let bb = BoundingBox::from_points([(3, 4, 5), (1, 8, 2), (2, 2, 9)]).unwrap();
        assert_eq!(bb.lo, (1, 2, 2));
        assert_eq!(bb.hi, (3, 8, 9));
        assert_eq!(bb.shape(), (3, 7, 8));
        assert_eq!(bb.size(), 3 * 7 * 8);
        assert!(bb.contains(&(2, 5, 5)));
        assert!(!bb.contains(&(0, 5, 5)));
    }

    #[test]
    fn test_bbox_pad_clamps() {
        let bb = BoundingBox::from_points([(0, 1, 9)]).unwrap();
        let p = bb.pad(2, (5, 5, 10));
        assert_eq!(p.lo, (0, 0, 7));
        assert_eq!(p.hi, (2, 3, 9));
    }

    #[test]
    fn test_bbox_crop() {
        let a = Array3::from_shape_fn((4, 4, 4), |(k, j, i)| k * 100 + j * 10 + i);
        let bb = BoundingBox {
            lo: (1, 2, 3),
            hi: (2, 3, 3),
        };
        let c = bb.crop(a.view());
        assert_eq!(c.shape(), &[2, 2, 1]);
        assert_eq!(c[(0, 0, 0)], 123);
        assert_eq!(c[(1, 1, 0)], 233);
    }
}
