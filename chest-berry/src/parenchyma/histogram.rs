use crate::consts::hu::HISTOGRAM_UPPER;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 覆盖全部 `i16` 取值的稠密计数直方图, 下标为 `x + 32768`.
#[derive(Clone, Debug)]
pub(super) struct DenseHistogram {
    counts: Vec<u64>,
}

impl DenseHistogram {
    const LEN: usize = 1 << 16;

    #[inline]
    pub(super) fn new() -> Self {
        Self {
            counts: vec![0; Self::LEN],
        }
    }

    #[inline]
    fn index(x: i16) -> usize {
        (x as i32 + 32768) as usize
    }

    #[inline]
    fn value(index: usize) -> i16 {
        (index as i32 - 32768) as i16
    }

    #[inline]
    pub(super) fn add(&mut self, x: i16) {
        self.counts[Self::index(x)] += 1;
    }

    /// 逐个 bin 累加另一个直方图.
    pub(super) fn merge(&mut self, other: &DenseHistogram) {
        self.counts
            .iter_mut()
            .zip(other.counts.iter())
            .for_each(|(a, b)| *a += b);
    }

    /// 非零 bin 的 `(HU, 个数)`, 按 HU 递增.
    pub(super) fn iter(&self) -> impl Iterator<Item = (i16, u64)> + '_ {
        self.counts
            .iter()
            .enumerate()
            .filter(|(_, c)| **c > 0)
            .map(|(i, c)| (Self::value(i), *c))
    }

    pub(super) fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// `x < upper` 部分, 截取从最小到最大的出现值.
    pub(super) fn below(&self, upper: i16) -> (i16, Vec<u64>) {
        let head = &self.counts[..Self::index(upper)];
        let start = head.iter().position(|c| *c > 0);
        let last = head.iter().rposition(|c| *c > 0);
        match (start, last) {
            (Some(start), Some(last)) => (Self::value(start), head[start..=last].to_vec()),
            _ => (upper, Vec::new()),
        }
    }
}

/// 直方图的显示模式.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum HistogramMode {
    /// 归一化使得 `Σp = 1`.
    Density,

    /// 密度乘以区域体积 (升) × 1000.
    ByRegionVolume,
}

/// 单个区域 `x < -350` HU 部分的直方图, bin 宽度 1 HU.
///
/// 只保存原始计数; 切换显示模式不需要重新扫描体数据.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RegionHistogram {
    /// 第一个 bin 的 HU 值.
    pub start: i16,

    /// 第 `n` 个 bin 对应 HU 值 `start + n`.
    pub counts: Vec<u64>,

    /// 区域体积 (升), 计入区域的全部体素.
    pub volume_liters: f64,
}

impl RegionHistogram {
    pub(super) fn from_dense(dense: &DenseHistogram, volume_liters: f64) -> Self {
        let (start, counts) = dense.below(HISTOGRAM_UPPER);
        Self {
            start,
            counts,
            volume_liters,
        }
    }

    /// 直方图中的体素个数.
    #[inline]
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// 是否没有任何体素.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// 各 bin 的 HU 值.
    pub fn bins(&self) -> impl Iterator<Item = i16> + '_ {
        (0..self.counts.len()).map(|n| (self.start as i32 + n as i32) as i16)
    }

    /// 按显示模式换算后的 bin 值.
    pub fn values(&self, mode: HistogramMode) -> Vec<f64> {
        let total = self.total();
        if total == 0 {
            return vec![0.0; self.counts.len()];
        }
        let scale = match mode {
            HistogramMode::Density => 1.0,
            HistogramMode::ByRegionVolume => self.volume_liters * 1000.0,
        };
        self.counts
            .iter()
            .map(|c| *c as f64 / total as f64 * scale)
            .collect()
    }
}
