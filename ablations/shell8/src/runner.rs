//! 程序运行函数.

use crate::profile::Profile;
use crate::result::AblationResult;
use chest_berry::consts::lesion::HUMAN_SHELL_RADII_MM;
use chest_berry::prelude::*;
use std::path::{Path, PathBuf};
use std::thread;
use utils::loader;

/// 病例来源.
enum Source {
    Disk(PathBuf),
    Synthetic,
}

impl Source {
    fn detect() -> Self {
        match loader::case_dir_from_env_or_home() {
            Some(d) if d.is_dir() => Source::Disk(d),
            d => {
                log::warn!("Dataset directory {d:?} not found, using synthetic phantoms");
                Source::Synthetic
            }
        }
    }

    /// 依次产生病例. 读取失败的病例被跳过.
    fn cases(&self) -> Box<dyn Iterator<Item = Case> + '_> {
        match self {
            Source::Disk(p) => Box::new(disk_cases(p)),
            Source::Synthetic => Box::new(synthetic_cases()),
        }
    }
}

fn disk_cases(p: &Path) -> impl Iterator<Item = Case> {
    let cases = match loader::case_loader(p) {
        Ok(l) => Some(l),
        Err(e) => {
            log::error!("Listing {p:?}: {e}");
            None
        }
    };
    cases.into_iter().flatten().filter_map(|(id, case)| match case {
        Ok(c) => Some(c),
        Err(e) => {
            log::warn!("Case {id}: {e}");
            None
        }
    })
}

/// 以 RAS 原点为中心、不同半径的球形病灶.
fn synthetic_cases() -> impl Iterator<Item = Case> {
    [(5.0, -40i16), (8.0, 0), (12.0, 30)]
        .into_iter()
        .enumerate()
        .filter_map(|(n, (radius, hu))| {
            let g = Geometry::centered([128, 128, 96], [0.7; 3]).ok()?;
            let gg = g.clone();
            let volume = Volume::from_fn(g, |pos| {
                let [x, y, z] = gg.index_to_ras(pos);
                // 肺实质背景带一点纹理.
                let texture = ((pos.0 * 7 + pos.1 * 3 + pos.2) % 40) as i16;
                if x * x + y * y + z * z <= radius * radius {
                    hu + texture
                } else {
                    -870 + texture
                }
            });
            let mut case = Case::new(format!("phantom{n}"), volume);
            let index = case.create_nodule(None);
            let mut seeds = case.nodule_mut(index).ok()?.seeds_mut();
            seeds.push([0.0; 3]);
            seeds.push([radius * 0.5, 0.0, 0.0]);
            Some(case)
        })
}

/// 在 `target` 上对所有结节做分割与特征提取并计时.
fn profile_target(src: &Source, target: AnalysisTarget) -> Profile {
    let provider = ConnectedThresholdLevelSet::default();
    let selection = FeatureSelection::default();
    let cancel = CancelToken::new();
    let mut profile = Profile::new();

    for mut case in src.cases() {
        profile.count_case();
        let indices: Vec<usize> = case.nodules().iter().map(NoduleRecord::index).collect();
        for index in indices {
            profile.segment_start();
            let voxels = prepare(&mut case, index, target, &provider, &cancel);
            profile.segment_elapsed();
            let voxels = match voxels {
                Ok(v) => v,
                Err(e) => {
                    log::warn!("{}#{index} segmentation: {e}", case.id());
                    profile.count_failed();
                    continue;
                }
            };

            profile.extract_start();
            let report = case.analyze_nodule(
                index,
                target,
                &selection,
                AuxMasks::default(),
                &mut Silent,
                &cancel,
            );
            match report {
                Ok(_) => profile.extract_elapsed(voxels),
                Err(e) => {
                    log::warn!("{}#{index} extraction: {e}", case.id());
                    profile.count_failed();
                }
            }
        }
    }
    profile.finish()
}

/// 分割结节并准备掩膜 (球壳会被缓存), 返回掩膜体素数.
fn prepare(
    case: &mut Case,
    index: usize,
    target: AnalysisTarget,
    provider: &ConnectedThresholdLevelSet,
    cancel: &CancelToken,
) -> CoreResult<usize> {
    case.segment_nodule(index, provider, cancel)?;
    let nodule = case.nodule_mut(index)?;
    match target {
        AnalysisTarget::Lesion => Ok(nodule.labelmap().map_or(0, LabelMap::foreground_count)),
        AnalysisTarget::Shell(r) => Ok(nodule.sphere_shell(r, cancel)?.foreground_count()),
    }
}

fn target_name(target: AnalysisTarget) -> String {
    match target {
        AnalysisTarget::Lesion => "lesion".to_string(),
        AnalysisTarget::Shell(r) => format!("shell {r} mm"),
    }
}

/// 实际运行.
pub fn run() -> AblationResult {
    let src = Source::detect();
    if let Source::Disk(p) = &src {
        // 短路判断
        assert!(
            loader::case_loader(p).is_ok_and(|mut l| l.next().is_some_and(|(_, r)| r.is_ok())),
            "Loading dataset config error"
        );
    }

    let targets: Vec<AnalysisTarget> = std::iter::once(AnalysisTarget::Lesion)
        .chain(HUMAN_SHELL_RADII_MM.map(AnalysisTarget::Shell))
        .collect();

    println!("Running ablation studies...");
    utils::sep();
    let mut data = Vec::with_capacity(targets.len());
    for chunk in targets.chunks(utils::cpus()) {
        thread::scope(|s| {
            let src = &src;
            let handles: Vec<_> = chunk
                .iter()
                .map(|&t| s.spawn(move || profile_target(src, t)))
                .collect();
            for (t, th) in chunk.iter().zip(handles) {
                data.push((target_name(*t), th.join().expect("Thread joining error")));
            }
        });
    }
    AblationResult::from_iter(data)
}
