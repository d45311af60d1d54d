use super::{ParenchymalFeature, Roi};
use crate::LabelMap;

/// mask 内的肺气肿划分.
#[derive(Clone, Debug, Default, PartialEq)]
pub(super) struct ParenchymalStats {
    voxel_cc: f64,
    total: usize,
    emphysema: usize,
    parenchyma_sum: f64,
    emphysema_sum: f64,
}

impl ParenchymalStats {
    /// `emphysema` 中非零体素视为肺气肿.
    pub fn compute(roi: &Roi<'_>, emphysema: &LabelMap) -> Self {
        let mut s = Self {
            voxel_cc: roi.geometry().voxel_cc(),
            ..Default::default()
        };
        for (pos, x) in roi.positions().zip(roi.values()) {
            s.total += 1;
            if emphysema[pos] != 0 {
                s.emphysema += 1;
                s.emphysema_sum += x;
            } else {
                s.parenchyma_sum += x;
            }
        }
        s
    }

    pub fn get(&self, f: ParenchymalFeature) -> f64 {
        use ParenchymalFeature::*;
        let mean = |sum: f64, n: usize| if n > 0 { sum / n as f64 } else { 0.0 };
        match f {
            ParenchymalVolume => self.total as f64 * self.voxel_cc,
            EmphysemaVolume => self.emphysema as f64 * self.voxel_cc,
            EmphysemaPercent => {
                if self.total > 0 {
                    100.0 * self.emphysema as f64 / self.total as f64
                } else {
                    0.0
                }
            }
            ParenchymaMean => mean(self.parenchyma_sum, self.total - self.emphysema),
            EmphysemaMean => mean(self.emphysema_sum, self.emphysema),
        }
    }
}
