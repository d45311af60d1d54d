//! 病例: 一个体数据及其上的全部结节.

use std::collections::BTreeMap;
use std::path::Path;

use log::{info, warn};

use super::{AnalysisTarget, LevelSetProvider, NoduleRecord, SegmentConfig};
use crate::cancel::{CancelToken, Progress};
use crate::features::{AuxMasks, FeatureSelection};
use crate::report::NoduleReport;
use crate::seeds::{CoordinateSystem, GeometryTopologyData, LesionType, SeedIoError, TopologyPoint};
use crate::{lps_to_ras, ras_to_lps, CoreError, CoreResult, Vec3, Volume, VolumeAttr};

/// 病例. 拥有体数据 (只读) 与结节列表; 结节编号从 1 开始, 删除后不复用.
#[derive(Clone, Debug)]
pub struct Case {
    id: String,
    volume: Volume,
    config: SegmentConfig,
    nodules: Vec<NoduleRecord>,
    next_index: usize,
}

fn find_mut(nodules: &mut [NoduleRecord], index: usize) -> CoreResult<&mut NoduleRecord> {
    nodules
        .iter_mut()
        .find(|n| n.index() == index)
        .ok_or_else(|| CoreError::NoSuchLabel(format!("nodule {index}")))
}

impl Case {
    /// 创建病例. 分割参数按体数据的采集尺度选择.
    pub fn new(id: impl Into<String>, volume: Volume) -> Self {
        let config = SegmentConfig::for_geometry(volume.geometry());
        Self {
            id: id.into(),
            volume,
            config,
            nodules: Vec::new(),
            next_index: 1,
        }
    }

    /// 病例编号.
    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// CT 体数据.
    #[inline]
    pub fn volume(&self) -> &Volume {
        &self.volume
    }

    /// 新建结节时使用的分割参数.
    #[inline]
    pub fn config(&self) -> &SegmentConfig {
        &self.config
    }

    /// 修改新建结节时使用的分割参数; 不影响已有结节.
    pub fn set_config(&mut self, config: SegmentConfig) {
        self.config = config;
    }

    /// 全部结节, 按创建顺序.
    #[inline]
    pub fn nodules(&self) -> &[NoduleRecord] {
        &self.nodules
    }

    /// 结节个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.nodules.len()
    }

    /// 是否没有结节.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodules.is_empty()
    }

    /// 新建空结节, 返回其编号. `name` 缺省为 `"Nodule {index}"`.
    pub fn create_nodule(&mut self, name: Option<&str>) -> usize {
        let index = self.next_index;
        self.next_index += 1;
        let name = name.map_or_else(|| format!("Nodule {index}"), str::to_string);
        self.nodules
            .push(NoduleRecord::new(index, name, self.config.clone()));
        index
    }

    /// 删除并返回结节.
    pub fn remove_nodule(&mut self, index: usize) -> CoreResult<NoduleRecord> {
        let pos = self
            .nodules
            .iter()
            .position(|n| n.index() == index)
            .ok_or_else(|| CoreError::NoSuchLabel(format!("nodule {index}")))?;
        Ok(self.nodules.remove(pos))
    }

    /// 按编号查找结节.
    pub fn nodule(&self, index: usize) -> CoreResult<&NoduleRecord> {
        self.nodules
            .iter()
            .find(|n| n.index() == index)
            .ok_or_else(|| CoreError::NoSuchLabel(format!("nodule {index}")))
    }

    /// 按编号查找结节, 可变.
    pub fn nodule_mut(&mut self, index: usize) -> CoreResult<&mut NoduleRecord> {
        find_mut(&mut self.nodules, index)
    }

    /// 按显示名称查找第一个匹配的结节.
    pub fn nodule_by_name(&self, name: &str) -> Option<&NoduleRecord> {
        self.nodules.iter().find(|n| n.name() == name)
    }

    /// 分割指定结节.
    pub fn segment_nodule<P: LevelSetProvider + ?Sized>(
        &mut self,
        index: usize,
        provider: &P,
        cancel: &CancelToken,
    ) -> CoreResult<()> {
        find_mut(&mut self.nodules, index)?.segment(provider, &self.volume, cancel)
    }

    /// 在指定结节的 `target` 上提取特征, 并包装为结果记录.
    pub fn analyze_nodule(
        &mut self,
        index: usize,
        target: AnalysisTarget,
        selection: &FeatureSelection,
        aux: AuxMasks<'_>,
        progress: &mut dyn Progress,
        cancel: &CancelToken,
    ) -> CoreResult<NoduleReport> {
        let nodule = find_mut(&mut self.nodules, index)?;
        let features = nodule.analyze(&self.volume, target, selection, aux, progress, cancel)?;
        Ok(nodule.report(&self.id, target, features))
    }

    /// 导出全部结节的种子点为 GeometryTopologyData 文档 (LPS).
    ///
    /// 没有种子点的结节不会出现在文档中.
    pub fn to_topology(&self) -> GeometryTopologyData {
        let g = self.volume.geometry();
        let dims = g.dims();
        let m = g.lps_to_ijk_matrix();
        let mut flat = [0.0; 16];
        for (dst, src) in flat.iter_mut().zip(m.iter().flatten()) {
            *dst = *src;
        }

        let points = self
            .nodules
            .iter()
            .flat_map(|n| {
                let t = n.lesion_type();
                n.seeds()
                    .points()
                    .iter()
                    .map(move |p| TopologyPoint::seed(n.index(), t, ras_to_lps(*p)))
            })
            .collect();

        GeometryTopologyData {
            coordinate_system: CoordinateSystem::Lps,
            spacing: Some(g.spacing()),
            origin: Some(ras_to_lps(g.origin())),
            dimensions: Some([dims[0] as f64, dims[1] as f64, dims[2] as f64]),
            lps_to_ijk: Some(flat),
            points,
        }
    }

    /// 用文档中的种子点替换全部结节, 返回载入的结节个数.
    ///
    /// 点按描述中的结节编号分组, 组内保持文档顺序 (第一个点为质心种子).
    pub fn load_topology(&mut self, doc: &GeometryTopologyData) -> Result<usize, SeedIoError> {
        let g = self.volume.geometry();
        let mut groups: BTreeMap<usize, (LesionType, Vec<Vec3>)> = BTreeMap::new();
        for p in doc.points.iter() {
            let (index, t) = p.nodule()?;
            let ras = match doc.coordinate_system {
                CoordinateSystem::Ras => p.coordinate,
                CoordinateSystem::Lps => lps_to_ras(p.coordinate),
                CoordinateSystem::Ijk => g.ijk_to_ras(p.coordinate),
            };
            let group = groups.entry(index).or_insert_with(|| (t, Vec::new()));
            if group.0 != t {
                warn!("nodule {index}: conflicting lesion types {} and {t}, keeping the first", group.0);
            }
            group.1.push(ras);
        }
        if let Some(spacing) = doc.spacing {
            if spacing.iter().zip(g.spacing()).any(|(a, b)| (a - b).abs() > 1e-6) {
                warn!("seed document spacing {spacing:?} differs from volume {:?}", g.spacing());
            }
        }

        self.nodules.clear();
        for (index, (t, points)) in groups.iter() {
            let mut n = NoduleRecord::new(*index, format!("Nodule {index}"), self.config.clone());
            let mut seeds = n.seeds_mut();
            seeds.set_lesion_type(*t);
            points.iter().for_each(|p| seeds.push(*p));
            self.nodules.push(n);
        }
        self.next_index = groups.keys().max().map_or(1, |m| m + 1);
        info!("[case {}] loaded {} nodules", self.id, groups.len());
        Ok(groups.len())
    }

    /// 读取种子 XML 文件, 见 [`Case::load_topology`].
    pub fn open_seeds<P: AsRef<Path>>(&mut self, path: P) -> Result<usize, SeedIoError> {
        let doc = GeometryTopologyData::open(path)?;
        self.load_topology(&doc)
    }

    /// 写出种子 XML 文件.
    pub fn save_seeds<P: AsRef<Path>>(&self, path: P) -> Result<(), SeedIoError> {
        self.to_topology().save(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::NoduleState;
    use crate::Geometry;

    fn case() -> Case {
        let g = Geometry::centered([16, 16, 16], [0.8, 0.8, 1.5]).unwrap();
        Case::new("case-7", Volume::filled(g, -850))
    }

    #[test]
    fn test_create_and_remove() {
        let mut c = case();
        assert_eq!(c.create_nodule(None), 1);
        assert_eq!(c.create_nodule(Some("left apex")), 2);
        assert_eq!(c.nodule(1).unwrap().name(), "Nodule 1");
        assert_eq!(c.nodule_by_name("left apex").unwrap().index(), 2);
        assert_eq!(c.nodule(1).unwrap().state(), NoduleState::Empty);

        c.remove_nodule(1).unwrap();
        assert_eq!(c.len(), 1);
        // 编号不复用.
        assert_eq!(c.create_nodule(None), 3);
        assert_eq!(
            c.remove_nodule(1).err(),
            Some(CoreError::NoSuchLabel("nodule 1".into()))
        );
    }

    #[test]
    fn test_topology_roundtrip() {
        let mut c = case();
        let a = c.create_nodule(None);
        let b = c.create_nodule(None);
        {
            let mut s = c.nodule_mut(a).unwrap().seeds_mut();
            s.set_lesion_type(LesionType::Nodule);
            s.push([1.0, 2.0, 3.0]);
            s.push([4.0, 5.0, 6.0]);
        }
        {
            let mut s = c.nodule_mut(b).unwrap().seeds_mut();
            s.set_lesion_type(LesionType::Tumor);
            s.push([-1.0, -2.0, -3.0]);
        }
        let doc = c.to_topology();
        assert_eq!(doc.points.len(), 3);
        assert_eq!(doc.points[0].coordinate, [-1.0, -2.0, 3.0]);
        assert_eq!(doc.points[2].description, "2-Tumor");

        let text = doc.to_xml().unwrap();
        let mut other = case();
        let n = other
            .load_topology(&GeometryTopologyData::from_xml(&text).unwrap())
            .unwrap();
        assert_eq!(n, 2);
        let first = other.nodule(a).unwrap();
        assert_eq!(first.lesion_type(), LesionType::Nodule);
        assert_eq!(first.seeds().points(), c.nodule(a).unwrap().seeds().points());
        assert_eq!(first.state(), NoduleState::HasSeeds);
        assert_eq!(other.create_nodule(None), 3);
    }

    #[test]
    fn test_load_ijk_points() {
        let mut c = case();
        let mut doc = GeometryTopologyData {
            coordinate_system: CoordinateSystem::Ijk,
            ..Default::default()
        };
        doc.points.push(TopologyPoint::seed(5, LesionType::Unknown, [8.0, 8.0, 8.0]));
        c.load_topology(&doc).unwrap();
        let p = c.nodule(5).unwrap().seeds().centroid().unwrap();
        assert!(p.iter().all(|x| x.abs() < 1e-9));
    }

    #[test]
    fn test_bad_description() {
        let mut c = case();
        let mut doc = GeometryTopologyData::default();
        doc.points.push(TopologyPoint {
            chest_region: 0,
            chest_type: 0,
            feature: 0,
            coordinate: [0.0; 3],
            description: "nodule".into(),
        });
        assert!(matches!(
            c.load_topology(&doc),
            Err(SeedIoError::Invalid { element: "Description", .. })
        ));
    }
}
