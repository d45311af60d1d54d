//! 肺实质密度分析.
//!
//! 按区域表把标签中的 chest region 编码归入解剖区域, 统计每个区域的
//! LAA%, HAA%, 百分位数, 矩统计量, 体积与组织质量, 并给出 `x < -350` HU 部分的直方图.
//!
//! 体数据只扫描一次: 先按 chest region 编码累计稠密直方图, 再按区域合并.
//! 之后的全部统计量都由直方图精确得到, 与扫描顺序无关.

use std::collections::BTreeMap;

use log::{debug, info, warn};
use ndarray::{ArrayView2, Axis, Zip};

use crate::cancel::CancelToken;
use crate::consts::hu::{HAA_THRESHOLDS, HAA_WINDOW, LAA_THRESHOLDS};
use crate::consts::label::{is_background, region_of};
use crate::data::VolumeAttr;
use crate::report::{ParenchymaReport, RegionReport};
use crate::{CoreResult, LabelMap, Volume};

mod histogram;
mod regions;
mod splitter;

use histogram::DenseHistogram;
pub use histogram::{HistogramMode, RegionHistogram};
pub use regions::{Region, RegionTable};
pub use splitter::{LungSplitter, PartialLungLabeler, ThirdsSplitter};

/// HU 值到组织密度 (g/mL) 的分段映射, 结果不小于 0.
pub fn tissue_density(x: f64) -> f64 {
    const AIR: (f64, f64) = (-1000.0, 1.21e-3);
    const KNEE: (f64, f64) = (-98.0, 0.93);
    let rho = if x <= KNEE.0 {
        AIR.1 + (x - AIR.0) * (KNEE.1 - AIR.1) / (KNEE.0 - AIR.0)
    } else if x <= 18.0 {
        1.018 + 0.893 * x / 1000.0
    } else if x <= 100.0 {
        1.003 + 1.169 * x / 1000.0
    } else {
        1.017 + 0.592 * x / 1000.0
    };
    rho.max(0.0)
}

/// 各 chest region 编码的直方图. 只为出现过的编码分配空间.
#[derive(Clone, Debug)]
struct CodeHistograms(Vec<Option<DenseHistogram>>);

impl CodeHistograms {
    fn new() -> Self {
        Self(vec![None; 256])
    }

    fn add_slice(&mut self, hu: ArrayView2<'_, i16>, labels: ArrayView2<'_, u16>) {
        Zip::from(hu).and(labels).for_each(|x, l| {
            if !is_background(*l) {
                self.0[region_of(*l) as usize]
                    .get_or_insert_with(DenseHistogram::new)
                    .add(*x);
            }
        });
    }

    fn merge(mut self, other: Self) -> Self {
        for (a, b) in self.0.iter_mut().zip(other.0) {
            match (a.as_mut(), b) {
                (Some(a), Some(b)) => a.merge(&b),
                (None, Some(b)) => *a = Some(b),
                _ => {}
            }
        }
        self
    }

    /// 合并 `region` 覆盖的全部编码. 区域内没有任何体素时返回 `None`.
    fn of_region(&self, region: &Region) -> Option<DenseHistogram> {
        let mut out: Option<DenseHistogram> = None;
        for code in region.codes.clone() {
            if let Some(h) = &self.0[code as usize] {
                match out.as_mut() {
                    Some(o) => o.merge(h),
                    None => out = Some(h.clone()),
                }
            }
        }
        out
    }
}

/// 有序样本的第 `rank` 个值 (从 0 开始).
fn nth(h: &DenseHistogram, rank: u64) -> f64 {
    let mut seen = 0;
    for (x, c) in h.iter() {
        seen += c;
        if seen > rank {
            return x as f64;
        }
    }
    0.0
}

/// 线性插值百分位数, 与 numpy 的默认方式一致.
fn percentile(h: &DenseHistogram, n: u64, p: f64) -> f64 {
    let pos = p / 100.0 * (n - 1) as f64;
    let lo = pos.floor();
    let a = nth(h, lo as u64);
    let b = nth(h, pos.ceil() as u64);
    a + (b - a) * (pos - lo)
}

/// 单个区域的全部指标.
fn region_metrics(h: &DenseHistogram, voxel_mm3: f64) -> BTreeMap<String, f64> {
    let n = h.total();
    let nf = n as f64;
    let fraction = |pred: &dyn Fn(i16) -> bool| -> f64 {
        let c: u64 = h.iter().filter(|(x, _)| pred(*x)).map(|(_, c)| c).sum();
        100.0 * c as f64 / nf
    };

    let mut m = BTreeMap::new();
    for t in LAA_THRESHOLDS {
        m.insert(format!("LAA%{t}"), fraction(&|x: i16| x < t));
    }
    for t in HAA_THRESHOLDS {
        m.insert(format!("HAA%{t}"), fraction(&|x: i16| x > t));
    }
    let (lo, hi) = HAA_WINDOW;
    m.insert(format!("HAA%{lo}to{hi}"), fraction(&|x: i16| x > lo && x < hi));

    m.insert("Perc10".to_string(), percentile(h, n, 10.0));
    m.insert("Perc15".to_string(), percentile(h, n, 15.0));

    // 两遍: 先均值, 再中心矩.
    let mean = h.iter().map(|(x, c)| x as f64 * c as f64).sum::<f64>() / nf;
    let (mut m2, mut m3, mut m4) = (0.0, 0.0, 0.0);
    for (x, c) in h.iter() {
        let d = x as f64 - mean;
        let c = c as f64;
        m2 += c * d * d;
        m3 += c * d * d * d;
        m4 += c * d * d * d * d;
    }
    let (m2, m3, m4) = (m2 / nf, m3 / nf, m4 / nf);
    let (skewness, kurtosis) = if m2 > 0.0 {
        (m3 / m2.powf(1.5), m4 / (m2 * m2) - 3.0)
    } else {
        (0.0, 0.0)
    };
    m.insert("Mean".to_string(), mean);
    m.insert("Std".to_string(), m2.sqrt());
    m.insert("Skewness".to_string(), skewness);
    m.insert("Kurtosis".to_string(), kurtosis);

    let voxel_cc = voxel_mm3 * 1e-3;
    let mass: f64 = h
        .iter()
        .map(|(x, c)| c as f64 * tissue_density(x as f64) * voxel_cc)
        .sum();
    m.insert("Volume".to_string(), nf * voxel_mm3 * 1e-6);
    m.insert("Mass".to_string(), mass);
    m.insert("VoxelCount".to_string(), nf);
    m
}

/// 肺实质分析器. 持有只读的区域表.
#[derive(Clone, Copy, Debug)]
pub struct ParenchymaAnalyzer<'t> {
    table: &'t RegionTable,
}

impl Default for ParenchymaAnalyzer<'static> {
    fn default() -> Self {
        Self::new(RegionTable::chest())
    }
}

impl<'t> ParenchymaAnalyzer<'t> {
    /// 每个区域输出的指标名.
    pub const METRICS: [&'static str; 18] = [
        "LAA%-950",
        "LAA%-925",
        "LAA%-910",
        "LAA%-856",
        "HAA%-700",
        "HAA%-600",
        "HAA%-500",
        "HAA%-250",
        "HAA%-600to-250",
        "Perc10",
        "Perc15",
        "Mean",
        "Std",
        "Kurtosis",
        "Skewness",
        "Volume",
        "Mass",
        "VoxelCount",
    ];

    /// 以 `table` 为区域表.
    pub fn new(table: &'t RegionTable) -> Self {
        Self { table }
    }

    /// 使用的区域表.
    #[inline]
    pub fn table(&self) -> &'t RegionTable {
        self.table
    }

    /// 分析 `volume` 在 `labelmap` 各区域内的密度分布.
    ///
    /// 标签中没有出现的区域不会出现在结果中.
    pub fn analyze(
        &self,
        volume: &Volume,
        labelmap: &LabelMap,
        cancel: &CancelToken,
    ) -> CoreResult<ParenchymaReport> {
        volume.ensure_compatible(labelmap)?;
        let hu = volume.data();
        let labels = labelmap.data();

        // step 1: 按编码累计直方图
        cfg_if::cfg_if! {
            if #[cfg(feature = "rayon")] {
                use rayon::prelude::*;
                let codes = hu
                    .axis_iter(Axis(0))
                    .into_par_iter()
                    .zip(labels.axis_iter(Axis(0)))
                    .try_fold(CodeHistograms::new, |mut acc, (h, l)| {
                        cancel.check()?;
                        acc.add_slice(h, l);
                        Ok::<_, crate::CoreError>(acc)
                    })
                    .try_reduce(CodeHistograms::new, |a, b| Ok(a.merge(b)))?;
            } else {
                let mut codes = CodeHistograms::new();
                for (h, l) in hu.axis_iter(Axis(0)).zip(labels.axis_iter(Axis(0))) {
                    cancel.check()?;
                    codes.add_slice(h, l);
                }
            }
        }

        // step 2: 按区域合并并计算指标
        let voxel_mm3 = volume.voxel();
        let mut regions = Vec::new();
        for region in self.table.iter() {
            cancel.check()?;
            let Some(h) = codes.of_region(region) else {
                debug!("[analyze] region {} absent, omitted", region.name);
                continue;
            };
            let metrics = region_metrics(&h, voxel_mm3);
            let histogram = Some(RegionHistogram::from_dense(&h, metrics["Volume"]))
                .filter(|h| !h.is_empty());
            if histogram.is_none() {
                warn!(
                    "[analyze] region {} has no voxel below the histogram bound",
                    region.name
                );
            }
            regions.push(RegionReport {
                region: region.name.to_string(),
                metrics,
                histogram,
            });
        }

        info!(
            "[analyze] {} of {} regions present",
            regions.len(),
            self.table.len()
        );
        Ok(ParenchymaReport { regions })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::label::compose;
    use crate::consts::region::*;
    use crate::{CoreError, Geometry};

    fn float_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    /// 10×10×20 的体数据: 前 10 层右肺 (-1000 HU), 后 10 层左肺 (0 HU).
    fn two_lungs() -> (Volume, LabelMap) {
        let g = Geometry::centered([10, 10, 20], [1.0; 3]).unwrap();
        let v = Volume::from_fn(g.clone(), |(k, _, _)| if k < 10 { -1000 } else { 0 });
        let l = LabelMap::from_fn(g, |(k, _, _)| {
            if k < 10 {
                RIGHT_LUNG as u16
            } else {
                LEFT_LUNG as u16
            }
        });
        (v, l)
    }

    #[test]
    fn test_two_lungs() {
        let (v, l) = two_lungs();
        let report = ParenchymaAnalyzer::default()
            .analyze(&v, &l, &CancelToken::new())
            .unwrap();
        assert_eq!(
            report.region_names().collect::<Vec<_>>(),
            vec!["WholeLung", "RightLung", "LeftLung"]
        );
        assert_eq!(report.get("RightLung", "LAA%-950"), Some(100.0));
        assert_eq!(report.get("LeftLung", "LAA%-950"), Some(0.0));
        assert_eq!(report.get("LeftLung", "HAA%-250"), Some(100.0));
        assert_eq!(report.get("WholeLung", "LAA%-950"), Some(50.0));
        let mass = report.get("WholeLung", "Mass").unwrap();
        assert!(float_eq(mass, (1000.0 * 1.21e-3 + 1000.0 * 1.018) * 1e-3));
        assert!(float_eq(report.get("WholeLung", "Volume").unwrap(), 2e-3));
        assert_eq!(report.get("WholeLung", "Mean"), Some(-500.0));
        assert_eq!(report.get("WholeLung", "Std"), Some(500.0));
        assert!(float_eq(report.get("WholeLung", "Kurtosis").unwrap(), -2.0));
        assert!(float_eq(report.get("WholeLung", "Skewness").unwrap(), 0.0));
        for r in report.regions.iter() {
            assert_eq!(r.metrics.len(), ParenchymaAnalyzer::METRICS.len());
            for name in ParenchymaAnalyzer::METRICS {
                assert!(r.metrics.contains_key(name), "{name}");
            }
        }

        // 左肺 0 HU 不进入直方图.
        assert_eq!(report.region("LeftLung").unwrap().histogram, None);
        let h = report.region("WholeLung").unwrap().histogram.as_ref().unwrap();
        assert_eq!(h.start, -1000);
        assert_eq!(h.counts.len(), 1);
        assert_eq!(h.total(), 1000);
    }

    #[test]
    fn test_percentiles_interpolate() {
        let mut h = DenseHistogram::new();
        for x in [-900, -800, -700, -600, -500] {
            h.add(x);
        }
        // pos = 0.1 × 4 = 0.4
        assert!(float_eq(percentile(&h, 5, 10.0), -860.0));
        assert!(float_eq(percentile(&h, 5, 15.0), -840.0));
        assert!(float_eq(percentile(&h, 5, 100.0), -500.0));
    }

    #[test]
    fn test_leaf_counts_sum_to_whole_lung() {
        let g = Geometry::centered([6, 6, 6], [1.0; 3]).unwrap();
        let v = Volume::from_fn(g.clone(), |(k, j, i)| -1000 + (k * 36 + j * 6 + i) as i16);
        let l = LabelMap::from_fn(g, |(k, j, i)| match (k + j + i) % 5 {
            0 => 0,
            1 => compose(RIGHT_SUPERIOR_LOBE, 3),
            2 => compose(RIGHT_INFERIOR_LOBE, 0),
            3 => compose(LEFT_SUPERIOR_LOBE, 1),
            _ => compose(LEFT_INFERIOR_LOBE, 0),
        });
        let report = ParenchymaAnalyzer::default()
            .analyze(&v, &l, &CancelToken::new())
            .unwrap();
        let table = RegionTable::chest();
        let leaves: f64 = report
            .regions
            .iter()
            .filter(|r| table.get(&r.region).unwrap().is_leaf())
            .map(|r| r.metrics["VoxelCount"])
            .sum();
        assert_eq!(Some(leaves), report.get("WholeLung", "VoxelCount"));
        assert_eq!(leaves as usize, l.foreground_count());
        // 右肺/左肺编码不存在.
        assert!(report.region("RightLung").is_none());
    }

    #[test]
    fn test_mass_monotonic_in_count() {
        let g = Geometry::centered([4, 4, 4], [0.7; 3]).unwrap();
        let v = Volume::filled(g.clone(), -850);
        let analyzer = ParenchymaAnalyzer::default();
        let mut last = 0.0;
        for n in 1..=4 {
            let l = LabelMap::from_fn(g.clone(), |(k, _, _)| u16::from(k < n) * WHOLE_LUNG as u16);
            let r = analyzer.analyze(&v, &l, &CancelToken::new()).unwrap();
            let mass = r.get("WholeLung", "Mass").unwrap();
            assert!(mass > last);
            last = mass;
        }
    }

    #[test]
    fn test_density_map() {
        assert!(float_eq(tissue_density(-1000.0), 1.21e-3));
        assert!(float_eq(tissue_density(-98.0), 0.93));
        assert!(float_eq(tissue_density(0.0), 1.018));
        assert!(float_eq(tissue_density(100.0), 1.003 + 0.1169));
        assert!(float_eq(tissue_density(200.0), 1.017 + 0.1184));
        assert_eq!(tissue_density(-1100.0), 0.0);
    }

    #[test]
    fn test_rejects_mismatch_and_cancel() {
        let (v, _) = two_lungs();
        let other = LabelMap::empty(Geometry::centered([10, 10, 10], [1.0; 3]).unwrap());
        let analyzer = ParenchymaAnalyzer::default();
        assert!(matches!(
            analyzer.analyze(&v, &other, &CancelToken::new()),
            Err(CoreError::InvalidGeometry(_))
        ));

        let (v, l) = two_lungs();
        let token = CancelToken::new();
        token.cancel();
        assert_eq!(analyzer.analyze(&v, &l, &token), Err(CoreError::Cancelled));
    }
}
