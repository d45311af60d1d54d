use ndarray::{Array2, ArrayView3};

use super::roi::{gray_level_count, offset, DIRECTIONS};
use super::{GlrlFeature, Roi};
use crate::cancel::CancelToken;
use crate::CoreResult;

const N: usize = GlrlFeature::ALL.len();

/// 13 个方向上 GLRL 统计量的均值.
#[derive(Clone, Debug, PartialEq)]
pub(super) struct GlrlStats {
    values: [f64; N],
}

/// 沿方向 `d` 的游程矩阵 `R[灰度级 - 1, 游程长度 - 1]`.
fn run_lengths(levels: ArrayView3<'_, u16>, ng: usize, d: (isize, isize, isize)) -> Array2<f64> {
    let shape = levels.dim();
    let longest = shape.0.max(shape.1).max(shape.2);
    let mut r = Array2::<f64>::zeros((ng, longest));
    for (pos, a) in levels.indexed_iter() {
        if *a == 0 {
            continue;
        }
        // 只从游程的起点出发.
        if matches!(offset(shape, pos, d, -1), Some(prev) if levels[prev] == *a) {
            continue;
        }
        let mut len = 1;
        while let Some(next) = offset(shape, pos, d, len as isize) {
            if levels[next] != *a {
                break;
            }
            len += 1;
        }
        r[(*a as usize - 1, len - 1)] += 1.0;
    }
    r
}

/// 游程矩阵的全部统计量, 灰度级与游程长度从 1 开始计.
fn statistics(r: &Array2<f64>, voxels: f64) -> [f64; N] {
    use GlrlFeature::*;

    let mut out = [0.0; N];
    let runs: f64 = r.sum();
    if runs <= 0.0 {
        return out;
    }
    for ((a, b), v) in r.indexed_iter() {
        let v = *v;
        if v == 0.0 {
            continue;
        }
        let i2 = ((a + 1) as f64).powi(2);
        let j2 = ((b + 1) as f64).powi(2);
        out[Sre as usize] += v / j2;
        out[Lre as usize] += v * j2;
        out[Lglre as usize] += v / i2;
        out[Hglre as usize] += v * i2;
        out[Srlgle as usize] += v / (i2 * j2);
        out[Srhgle as usize] += v * i2 / j2;
        out[Lrlgle as usize] += v * j2 / i2;
        out[Lrhgle as usize] += v * i2 * j2;
    }
    out[Gln as usize] = r.rows().into_iter().map(|row| row.sum().powi(2)).sum();
    out[Rln as usize] = r.columns().into_iter().map(|col| col.sum().powi(2)).sum();
    for v in out.iter_mut() {
        *v /= runs;
    }
    out[Rp as usize] = runs / voxels;
    out
}

impl GlrlStats {
    pub fn compute(roi: &Roi<'_>, bin_width: f64, cancel: &CancelToken) -> CoreResult<Self> {
        let levels = roi.levels(bin_width).view();
        let ng = gray_level_count(bin_width);
        let voxels = roi.len() as f64;
        let per_direction = |d: &(isize, isize, isize)| -> CoreResult<[f64; N]> {
            cancel.check()?;
            Ok(statistics(&run_lengths(levels, ng, *d), voxels))
        };

        cfg_if::cfg_if! {
            if #[cfg(feature = "rayon")] {
                use rayon::prelude::*;
                let stats = DIRECTIONS
                    .par_iter()
                    .map(per_direction)
                    .collect::<CoreResult<Vec<_>>>()?;
            } else {
                let stats = DIRECTIONS
                    .iter()
                    .map(per_direction)
                    .collect::<CoreResult<Vec<_>>>()?;
            }
        }

        let mut values = [0.0; N];
        for s in stats.iter() {
            for (acc, v) in values.iter_mut().zip(s) {
                *acc += v;
            }
        }
        values.iter_mut().for_each(|v| *v /= stats.len() as f64);
        Ok(Self { values })
    }

    #[inline]
    pub fn get(&self, f: GlrlFeature) -> f64 {
        self.values[f as usize]
    }
}
