use log::debug;
use ordered_float::OrderedFloat;

use crate::cancel::CancelToken;
use crate::consts::label::{compose, region_of, type_of};
use crate::consts::region::*;
use crate::data::VolumeAttr;
use crate::{CoreResult, Idx3d, LabelMap, Volume};

/// 部分肺标签生成器: 体数据 -> 按区域表编码的标签.
///
/// 核心库不提供实现, 调用方可以包装外部程序或自己的算法.
pub trait PartialLungLabeler {
    /// 为 `volume` 生成标签, 几何与 `volume` 相同.
    fn label(&self, volume: &Volume, cancel: &CancelToken) -> CoreResult<LabelMap>;
}

impl<F> PartialLungLabeler for F
where
    F: Fn(&Volume, &CancelToken) -> CoreResult<LabelMap>,
{
    #[inline]
    fn label(&self, volume: &Volume, cancel: &CancelToken) -> CoreResult<LabelMap> {
        self(volume, cancel)
    }
}

/// 肺分割器: 部分肺标签 -> 带左右/三分区分解的同一标签.
pub trait LungSplitter {
    /// 返回分解后的新标签, 输入不变.
    fn split(&self, labelmap: &LabelMap) -> CoreResult<LabelMap>;
}

/// 把右肺 / 左肺体素沿头足方向按体素个数三等分.
///
/// 右肺体素依次改为 RUT, RMT, RLT; 左肺改为 LUT, LMT, LLT. chest type 保持不变,
/// 其他编码不受影响.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThirdsSplitter;

impl ThirdsSplitter {
    fn split_side(out: &mut LabelMap, side: u8, thirds: [u8; 3]) {
        let g = out.geometry().clone();
        let mut voxels: Vec<Idx3d> = out.filter_pos(|v| region_of(v) == side);
        if voxels.is_empty() {
            return;
        }

        // 上方 (RAS z 较大) 的在前, 同一高度保持扫描顺序.
        voxels.sort_by_key(|pos| std::cmp::Reverse(OrderedFloat(g.index_to_ras(*pos)[2])));
        let n = voxels.len();
        for (rank, pos) in voxels.into_iter().enumerate() {
            let region = thirds[rank * 3 / n];
            out[pos] = compose(region, type_of(out[pos]));
        }
        debug!("[split] region {side}: {n} voxels split into thirds");
    }
}

impl LungSplitter for ThirdsSplitter {
    fn split(&self, labelmap: &LabelMap) -> CoreResult<LabelMap> {
        let mut out = labelmap.clone();
        Self::split_side(
            &mut out,
            RIGHT_LUNG,
            [RIGHT_UPPER_THIRD, RIGHT_MIDDLE_THIRD, RIGHT_LOWER_THIRD],
        );
        Self::split_side(
            &mut out,
            LEFT_LUNG,
            [LEFT_UPPER_THIRD, LEFT_MIDDLE_THIRD, LEFT_LOWER_THIRD],
        );
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parenchyma::ParenchymaAnalyzer;
    use crate::Geometry;

    #[test]
    fn test_thirds_by_count() {
        // 9 层, 每层 4 个右肺体素与 4 个左肺体素, 其中左肺带 chest type 2.
        let g = Geometry::centered([4, 2, 9], [1.0; 3]).unwrap();
        let l = LabelMap::from_fn(g.clone(), |(_, j, _)| {
            if j == 0 {
                RIGHT_LUNG as u16
            } else {
                compose(LEFT_LUNG, 2)
            }
        });
        let s = ThirdsSplitter.split(&l).unwrap();
        assert_eq!(s.count(RIGHT_UPPER_THIRD as u16), 12);
        assert_eq!(s.count(RIGHT_MIDDLE_THIRD as u16), 12);
        assert_eq!(s.count(RIGHT_LOWER_THIRD as u16), 12);
        assert_eq!(s.count(compose(LEFT_UPPER_THIRD, 2)), 12);
        assert_eq!(s.count(compose(LEFT_LOWER_THIRD, 2)), 12);

        // 上三分之一位于 K 较大 (RAS z 较大) 的一端.
        let top = g.shape().0 - 1;
        assert_eq!(s[(top, 0, 0)], RIGHT_UPPER_THIRD as u16);
        assert_eq!(s[(0, 1, 0)], compose(LEFT_LOWER_THIRD, 2));

        // 三分区仍然属于全肺.
        let v = Volume::filled(g, -900);
        let report = ParenchymaAnalyzer::default()
            .analyze(&v, &s, &CancelToken::new())
            .unwrap();
        assert_eq!(report.get("WholeLung", "VoxelCount"), Some(72.0));
        assert_eq!(report.get("RMT", "VoxelCount"), Some(12.0));
        assert!(report.region("RightLung").is_none());
    }

    #[test]
    fn test_other_codes_untouched() {
        let g = Geometry::centered([3, 3, 3], [1.0; 3]).unwrap();
        let l = LabelMap::from_fn(g, |(k, _, _)| [0, RIGHT_SUPERIOR_LOBE as u16, WHOLE_LUNG as u16][k]);
        assert_eq!(ThirdsSplitter.split(&l).unwrap(), l);
    }

    #[test]
    fn test_closure_labeler() {
        let labeler = |v: &Volume, _: &CancelToken| -> CoreResult<LabelMap> {
            Ok(LabelMap::from_fn(v.geometry().clone(), |_| LEFT_LUNG as u16))
        };
        let g = Geometry::centered([2, 2, 2], [1.0; 3]).unwrap();
        let l = labeler.label(&Volume::filled(g, 0), &CancelToken::new()).unwrap();
        assert_eq!(l.count(LEFT_LUNG as u16), 8);
    }
}
