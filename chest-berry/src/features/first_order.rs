use std::collections::BTreeMap;

use itertools::{Itertools, MinMaxResult};

use super::FirstOrderFeature;

/// 一阶统计量.
///
/// 中心矩使用两遍算法, 标准差很小时也不会丢失精度.
/// 方差与标准差为总体统计量 (除以 `n`).
#[derive(Clone, Debug, Default, PartialEq)]
pub(super) struct FirstOrderStats {
    count: f64,
    gray_levels: f64,
    energy: f64,
    entropy: f64,
    min: f64,
    max: f64,
    mean: f64,
    median: f64,
    mean_deviation: f64,
    rms: f64,
    variance: f64,
    skewness: f64,
    kurtosis: f64,
    uniformity: f64,
    ventilation_heterogeneity: f64,
}

/// 通气异质性: 只考虑 `-1000 < x <= 0` 的体素, 返回 `cbrt(-x / (x + 1000))` 的标准差.
fn ventilation_heterogeneity(values: &[f64]) -> f64 {
    let y: Vec<f64> = values
        .iter()
        .filter(|x| **x > -1000.0 && **x <= 0.0)
        .map(|x| (-x / (x + 1000.0)).cbrt())
        .collect();
    if y.is_empty() {
        return 0.0;
    }
    let n = y.len() as f64;
    let mean = y.iter().sum::<f64>() / n;
    (y.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt()
}

impl FirstOrderStats {
    /// 计算统计量. 直方图从最小值开始, 宽度为 `bin_width`.
    pub fn compute(values: &[f64], bin_width: f64) -> Self {
        let (min, max) = match values.iter().minmax() {
            MinMaxResult::NoElements => return Self::default(),
            MinMaxResult::OneElement(x) => (*x, *x),
            MinMaxResult::MinMax(a, b) => (*a, *b),
        };
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;

        // 第二遍: 中心矩.
        let (mut m2, mut m3, mut m4, mut mad, mut energy) = (0.0, 0.0, 0.0, 0.0, 0.0);
        for x in values {
            let d = x - mean;
            let d2 = d * d;
            m2 += d2;
            m3 += d2 * d;
            m4 += d2 * d2;
            mad += d.abs();
            energy += x * x;
        }
        let (m2, m3, m4) = (m2 / n, m3 / n, m4 / n);
        let (skewness, kurtosis) = if m2 > 0.0 {
            (m3 / m2.powf(1.5), m4 / (m2 * m2) - 3.0)
        } else {
            (0.0, 0.0)
        };

        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);
        let half = sorted.len() / 2;
        let median = if sorted.len() % 2 == 1 {
            sorted[half]
        } else {
            (sorted[half - 1] + sorted[half]) / 2.0
        };

        let mut hist: BTreeMap<i64, usize> = BTreeMap::new();
        for x in values {
            *hist.entry(((x - min) / bin_width).floor() as i64).or_default() += 1;
        }
        let (entropy, uniformity) = hist.values().fold((0.0, 0.0), |(e, u), c| {
            let p = *c as f64 / n;
            (e - p * p.log2(), u + p * p)
        });

        Self {
            count: n,
            gray_levels: hist.len() as f64,
            energy,
            entropy,
            min,
            max,
            mean,
            median,
            mean_deviation: mad / n,
            rms: (energy / n).sqrt(),
            variance: m2,
            skewness,
            kurtosis,
            uniformity,
            ventilation_heterogeneity: ventilation_heterogeneity(values),
        }
    }

    pub fn get(&self, f: FirstOrderFeature) -> f64 {
        use FirstOrderFeature::*;
        match f {
            VoxelCount => self.count,
            GrayLevels => self.gray_levels,
            Energy => self.energy,
            Entropy => self.entropy,
            Minimum => self.min,
            Maximum => self.max,
            Mean => self.mean,
            Median => self.median,
            Range => self.max - self.min,
            MeanDeviation => self.mean_deviation,
            RootMeanSquare => self.rms,
            StandardDeviation => self.variance.sqrt(),
            VentilationHeterogeneity => self.ventilation_heterogeneity,
            Skewness => self.skewness,
            Kurtosis => self.kurtosis,
            Variance => self.variance,
            Uniformity => self.uniformity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use FirstOrderFeature::*;

    fn float_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_known_values() {
        let s = FirstOrderStats::compute(&[1.0, 2.0, 3.0, 4.0], 1.0);
        assert!(float_eq(s.get(VoxelCount), 4.0));
        assert!(float_eq(s.get(Mean), 2.5));
        assert!(float_eq(s.get(Median), 2.5));
        assert!(float_eq(s.get(Range), 3.0));
        assert!(float_eq(s.get(Energy), 30.0));
        assert!(float_eq(s.get(Variance), 1.25));
        assert!(float_eq(s.get(MeanDeviation), 1.0));
        assert!(float_eq(s.get(RootMeanSquare), 7.5f64.sqrt()));
        assert!(float_eq(s.get(Skewness), 0.0));
        // 均匀分布的超额峰度: (1/n Σd^4) / m2^2 - 3 = 2.5625 / 1.5625 - 3.
        assert!(float_eq(s.get(Kurtosis), 2.5625 / 1.5625 - 3.0));
        assert!(float_eq(s.get(GrayLevels), 4.0));
        assert!(float_eq(s.get(Entropy), 2.0));
        assert!(float_eq(s.get(Uniformity), 0.25));
    }

    #[test]
    fn test_histogram_bins_from_minimum() {
        let s = FirstOrderStats::compute(&[-1000.0, -990.0, -976.0, -975.0], 25.0);
        assert!(float_eq(s.get(GrayLevels), 2.0));
        assert!(float_eq(s.get(Uniformity), 0.5625 + 0.0625));
    }

    #[test]
    fn test_low_variance_is_stable() {
        let values: Vec<f64> = (0..1000).map(|i| 1e9 + (i % 2) as f64).collect();
        let s = FirstOrderStats::compute(&values, 25.0);
        assert!(float_eq(s.get(Variance), 0.25));
        assert!(float_eq(s.get(Skewness), 0.0));
    }

    #[test]
    fn test_ventilation_heterogeneity() {
        // -500 => cbrt(1) = 1, 0 => 0, 区间外的值被忽略.
        let s = FirstOrderStats::compute(&[-500.0, 0.0, -1000.0, 50.0], 25.0);
        assert!(float_eq(s.get(VentilationHeterogeneity), 0.5));
        let s = FirstOrderStats::compute(&[-500.0, -500.0], 25.0);
        assert!(float_eq(s.get(VentilationHeterogeneity), 0.0));
    }

    #[test]
    fn test_skewed() {
        let s = FirstOrderStats::compute(&[0.0, 0.0, 0.0, 4.0], 1.0);
        assert!(s.get(Skewness) > 0.0);
        assert!(float_eq(s.get(Median), 0.0));
    }
}
