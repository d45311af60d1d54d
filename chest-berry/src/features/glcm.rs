use ndarray::{Array2, ArrayView3, Axis};

use super::roi::{gray_level_count, offset, DIRECTIONS};
use super::{GlcmFeature, Roi};
use crate::cancel::CancelToken;
use crate::CoreResult;

const N: usize = GlcmFeature::ALL.len();

/// 13 个方向上 GLCM 统计量的均值.
#[derive(Clone, Debug, PartialEq)]
pub(super) struct GlcmStats {
    values: [f64; N],
}

/// 沿方向 `d` 的对称共生矩阵, 已归一化. 该方向上没有体素对时返回 `None`.
fn cooccurrence(levels: ArrayView3<'_, u16>, ng: usize, d: (isize, isize, isize)) -> Option<Array2<f64>> {
    let shape = levels.dim();
    let mut p = Array2::<f64>::zeros((ng, ng));
    let mut total = 0.0;
    for (pos, a) in levels.indexed_iter() {
        if *a == 0 {
            continue;
        }
        let Some(q) = offset(shape, pos, d, 1) else {
            continue;
        };
        let b = levels[q];
        if b == 0 {
            continue;
        }
        let (a, b) = (*a as usize - 1, b as usize - 1);
        p[(a, b)] += 1.0;
        p[(b, a)] += 1.0;
        total += 2.0;
    }
    (total > 0.0).then(|| p / total)
}

#[inline]
fn entropy<'a, I: IntoIterator<Item = &'a f64>>(p: I) -> f64 {
    p.into_iter()
        .filter(|v| **v > 0.0)
        .map(|v| -v * v.log2())
        .sum()
}

/// 单个归一化共生矩阵的全部统计量, 灰度级从 1 开始计.
fn statistics(p: &Array2<f64>) -> [f64; N] {
    use GlcmFeature::*;

    let ng = p.nrows();
    let ngf = ng as f64;
    let px = p.sum_axis(Axis(1));
    let py = p.sum_axis(Axis(0));
    let level = |i: usize| (i + 1) as f64;
    let mu_x: f64 = px.iter().enumerate().map(|(i, v)| level(i) * v).sum();
    let mu_y: f64 = py.iter().enumerate().map(|(j, v)| level(j) * v).sum();
    let sigma_x = px
        .iter()
        .enumerate()
        .map(|(i, v)| (level(i) - mu_x).powi(2) * v)
        .sum::<f64>()
        .sqrt();
    let sigma_y = py
        .iter()
        .enumerate()
        .map(|(j, v)| (level(j) - mu_y).powi(2) * v)
        .sum::<f64>()
        .sqrt();

    // p_{x+y}: 下标为 i + j (灰度级从 1 开始, 故取值 2..=2ng); p_{x-y}: 下标为 |i - j|.
    let mut p_sum = vec![0.0; 2 * ng + 1];
    let mut p_diff = vec![0.0; ng];
    let mut out = [0.0; N];
    let mut ij = 0.0;
    let mut hxy1 = 0.0;
    let mut max_p: f64 = 0.0;

    for ((a, b), v) in p.indexed_iter() {
        let v = *v;
        if v == 0.0 {
            continue;
        }
        let (i, j) = (level(a), level(b));
        let d = (i - j).abs();
        let c = i + j - mu_x - mu_y;
        p_sum[a + b + 2] += v;
        p_diff[a.abs_diff(b)] += v;
        ij += i * j * v;
        max_p = max_p.max(v);

        out[Autocorrelation as usize] += i * j * v;
        out[ClusterProminence as usize] += c.powi(4) * v;
        out[ClusterShade as usize] += c.powi(3) * v;
        out[ClusterTendency as usize] += c * c * v;
        out[Contrast as usize] += d * d * v;
        out[Dissimilarity as usize] += d * v;
        out[Energy as usize] += v * v;
        out[Entropy as usize] -= v * v.log2();
        out[Homogeneity1 as usize] += v / (1.0 + d);
        out[Homogeneity2 as usize] += v / (1.0 + d * d);
        out[Idmn as usize] += v / (1.0 + d * d / (ngf * ngf));
        out[Idn as usize] += v / (1.0 + d / ngf);
        if d > 0.0 {
            out[InverseVariance as usize] += v / (d * d);
        }
        out[Variance as usize] += (i - mu_x).powi(2) * v;

        let pxy = px[a] * py[b];
        if pxy > 0.0 {
            hxy1 -= v * pxy.log2();
        }
    }

    out[MaximumProbability as usize] = max_p;
    out[Correlation as usize] = if sigma_x * sigma_y > 0.0 {
        (ij - mu_x * mu_y) / (sigma_x * sigma_y)
    } else {
        0.0
    };
    out[DifferenceEntropy as usize] = entropy(&p_diff);

    let sum_average: f64 = p_sum.iter().enumerate().map(|(k, v)| k as f64 * v).sum();
    out[SumAverage as usize] = sum_average;
    out[SumEntropy as usize] = entropy(&p_sum);
    out[SumVariance as usize] = p_sum
        .iter()
        .enumerate()
        .map(|(k, v)| (k as f64 - sum_average).powi(2) * v)
        .sum();

    let hx = entropy(px.iter());
    let hy = entropy(py.iter());
    let hxy = out[Entropy as usize];
    out[Imc1 as usize] = if hx.max(hy) > 0.0 {
        (hxy - hxy1) / hx.max(hy)
    } else {
        0.0
    };
    out
}

impl GlcmStats {
    pub fn compute(roi: &Roi<'_>, bin_width: f64, cancel: &CancelToken) -> CoreResult<Self> {
        let levels = roi.levels(bin_width).view();
        let ng = gray_level_count(bin_width);
        let per_direction = |d: &(isize, isize, isize)| -> CoreResult<Option<[f64; N]>> {
            cancel.check()?;
            Ok(cooccurrence(levels, ng, *d).map(|p| statistics(&p)))
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

        // 按方向顺序求均值, 结果与线程调度无关.
        let mut values = [0.0; N];
        let mut n = 0usize;
        for s in stats.into_iter().flatten() {
            n += 1;
            for (acc, v) in values.iter_mut().zip(s) {
                *acc += v;
            }
        }
        if n > 0 {
            values.iter_mut().for_each(|v| *v /= n as f64);
        }
        log::debug!("GLCM over {n} direction(s), {ng} gray levels");
        Ok(Self { values })
    }

    #[inline]
    pub fn get(&self, f: GlcmFeature) -> f64 {
        self.values[f as usize]
    }
}
