use ndarray::{Array3, ArrayView3, Zip};
use once_cell::unsync::OnceCell;

use crate::{BoundingBox, CtWindow, Geometry, Idx3d, LabelMap, Volume, VolumeAttr};

/// 裁剪到 mask 包围盒的感兴趣区域.
///
/// 纹理特征的开销与包围盒大小成平方关系, 所有特征都只在包围盒内计算.
/// 量化后的灰度级在第一次使用时计算, 并在同一次提取中被 GLCM 与 GLRL 共享.
pub(crate) struct Roi<'a> {
    volume: &'a Volume,
    bbox: BoundingBox,
    hu: ArrayView3<'a, i16>,
    mask: Array3<bool>,
    values: Vec<f64>,
    levels: OnceCell<(f64, Array3<u16>)>,
}

/// 三维 26-邻域中互不对称的 13 个方向 `(dk, dj, di)`, 步长 1.
pub(crate) const DIRECTIONS: [(isize, isize, isize); 13] = [
    (0, 0, 1),
    (0, 1, 0),
    (0, 1, 1),
    (0, 1, -1),
    (1, 0, 0),
    (1, 0, 1),
    (1, 0, -1),
    (1, 1, 0),
    (1, -1, 0),
    (1, 1, 1),
    (1, 1, -1),
    (1, -1, 1),
    (1, -1, -1),
];

/// `pos + step * d`, 越界时返回 `None`.
#[inline]
pub(crate) fn offset(shape: Idx3d, (k, j, i): Idx3d, (dk, dj, di): (isize, isize, isize), step: isize) -> Option<Idx3d> {
    let k = k as isize + dk * step;
    let j = j as isize + dj * step;
    let i = i as isize + di * step;
    (k >= 0
        && j >= 0
        && i >= 0
        && k < shape.0 as isize
        && j < shape.1 as isize
        && i < shape.2 as isize)
        .then(|| (k as usize, j as usize, i as usize))
}

/// 允许的最大灰度级个数, 对应 1 HU 的 bin 宽度.
/// 共生矩阵为 `ng × ng`, 每个方向一份.
pub(crate) const MAX_GRAY_LEVELS: usize = 1401;

/// 纹理窗口内 bin 宽度为 `bin_width` 时的灰度级个数.
#[inline]
pub(crate) fn gray_level_count(bin_width: f64) -> usize {
    (CtWindow::from_texture().width() / bin_width).floor() as usize + 1
}

/// 先截断到纹理窗口, 再以 `bin_width` 量化, 灰度级从 1 开始.
#[inline]
pub(crate) fn quantize(x: f64, bin_width: f64) -> u16 {
    let w = CtWindow::from_texture();
    ((w.clamp(x) - w.lower_bound()) / bin_width).floor() as u16 + 1
}

impl<'a> Roi<'a> {
    pub fn new(volume: &'a Volume, mask: &LabelMap) -> Self {
        let Some(bbox) = mask.foreground_bounding_box() else {
            let bbox = BoundingBox::point((0, 0, 0));
            return Self {
                volume,
                bbox,
                hu: bbox.crop(volume.data()),
                mask: Array3::from_elem((1, 1, 1), false),
                values: Vec::new(),
                levels: OnceCell::new(),
            };
        };
        let hu = bbox.crop(volume.data());
        let mask = bbox.crop(mask.data()).mapv(|v| v != 0);
        let values = Zip::from(&hu)
            .and(&mask)
            .fold(Vec::new(), |mut acc, x, m| {
                if *m {
                    acc.push(*x as f64);
                }
                acc
            });
        Self {
            volume,
            bbox,
            hu,
            mask,
            values,
            levels: OnceCell::new(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// mask 内体素个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// mask 内体素的 CT 值, 按 `(k, j, i)` 顺序.
    #[inline]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    #[inline]
    pub fn bbox(&self) -> BoundingBox {
        self.bbox
    }

    #[inline]
    pub fn geometry(&self) -> &Geometry {
        self.volume.geometry()
    }

    /// 包围盒内的 mask.
    #[inline]
    pub fn mask(&self) -> ArrayView3<'_, bool> {
        self.mask.view()
    }

    /// 包围盒内的 CT 值.
    #[inline]
    pub fn hu(&self) -> ArrayView3<'a, i16> {
        self.hu
    }

    /// mask 内所有体素的全局数组索引.
    pub fn positions(&self) -> impl Iterator<Item = Idx3d> + '_ {
        let lo = self.bbox.lo;
        self.mask
            .indexed_iter()
            .filter(|(_, m)| **m)
            .map(move |((k, j, i), _)| (k + lo.0, j + lo.1, i + lo.2))
    }

    /// 量化后的灰度级: mask 外为 0, mask 内为 `1..=gray_level_count(bin_width)`.
    pub fn levels(&self, bin_width: f64) -> &Array3<u16> {
        let (w, levels) = self.levels.get_or_init(|| {
            let mut out = Array3::<u16>::zeros(self.mask.dim());
            Zip::from(&mut out)
                .and(&self.hu)
                .and(&self.mask)
                .for_each(|o, x, m| {
                    if *m {
                        *o = quantize(*x as f64, bin_width);
                    }
                });
            (bin_width, out)
        });
        debug_assert_eq!(*w, bin_width);
        levels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantize() {
        assert_eq!(gray_level_count(25.0), 57);
        assert_eq!(quantize(-1200.0, 25.0), 1);
        assert_eq!(quantize(-5000.0, 25.0), 1);
        assert_eq!(quantize(-1176.0, 25.0), 1);
        assert_eq!(quantize(-1175.0, 25.0), 2);
        assert_eq!(quantize(200.0, 25.0), 57);
        assert_eq!(quantize(3000.0, 25.0), 57);
        assert_eq!(gray_level_count(1.0), MAX_GRAY_LEVELS);
        assert_eq!(quantize(200.0, 1.0) as usize, MAX_GRAY_LEVELS);
    }

    #[test]
    fn test_directions_are_distinct_halves() {
        for (n, d) in DIRECTIONS.iter().enumerate() {
            let neg = (-d.0, -d.1, -d.2);
            assert!(!DIRECTIONS.contains(&neg));
            assert!(!DIRECTIONS[n + 1..].contains(d));
        }
        assert_eq!(offset((2, 2, 2), (0, 0, 0), (1, -1, 0), 1), None);
        assert_eq!(offset((2, 2, 2), (0, 1, 0), (1, -1, 1), 1), Some((1, 0, 1)));
    }

    #[test]
    fn test_crop() {
        let g = Geometry::centered([10, 8, 6], [1.0; 3]).unwrap();
        let v = Volume::from_fn(g.clone(), |(k, j, i)| (k * 100 + j * 10 + i) as i16);
        let mut m = LabelMap::empty(g);
        m[(1, 2, 3)] = 1;
        m[(2, 4, 3)] = 7;
        let roi = Roi::new(&v, &m);
        assert_eq!(roi.len(), 2);
        assert_eq!(roi.bbox().shape(), (2, 3, 1));
        assert_eq!(roi.values(), &[123.0, 243.0]);
        assert_eq!(roi.positions().collect::<Vec<_>>(), vec![(1, 2, 3), (2, 4, 3)]);
        let levels = roi.levels(25.0);
        assert_eq!(levels[(0, 0, 0)], quantize(123.0, 25.0));
        assert_eq!(levels[(0, 1, 0)], 0);
    }
}
