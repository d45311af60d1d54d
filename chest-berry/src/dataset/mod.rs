//! 病例数据集操作.
//!
//! 数据集目录下每个病例占一个子目录, 目录名即病例编号 `{id}`:
//!
//! ```text
//! {id}/{id}.nrrd                       CT 扫描
//! {id}/{id}_partialLungLabelMap.nrrd   部分肺标签 (可选)
//! {id}/{id}_emphysema.nrrd             肺气肿标签 (可选)
//! {id}/{id}_seeds.xml                  结节种子点 (可选)
//! ```

use std::env;
use std::io;
use std::path::{Path, PathBuf};

use crate::data::VolumeIoError;
use crate::seeds::SeedIoError;
use crate::segment::Case;
use crate::{LabelMap, Volume};

/// 数据集目录的环境变量.
pub const CASE_DIR_ENV: &str = "CHEST_CASE_DIR";

/// 获取 `{用户主目录}/dataset` 目录.
pub fn home_dataset_dir() -> Option<PathBuf> {
    let mut ans = dirs::home_dir()?;
    ans.push("dataset");
    Some(ans)
}

/// 获取 `{用户主目录}/dataset` 目录下给定继续项组成的全路径.
pub fn home_dataset_dir_with<P: AsRef<Path>, I: IntoIterator<Item = P>>(it: I) -> Option<PathBuf> {
    let mut ans = home_dataset_dir()?;
    ans.extend(it);
    Some(ans)
}

/// 获取病例数据集目录.
///
/// 1. 若环境变量 `$CHEST_CASE_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/chest`. 无法确定主目录时返回 `None`.
pub fn case_dir_from_env_or_home() -> Option<PathBuf> {
    match env::var(CASE_DIR_ENV) {
        Ok(d) if !d.is_empty() => Some(PathBuf::from(d)),
        _ => home_dataset_dir_with(["chest"]),
    }
}

/// 单个病例的文件路径.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaseFiles {
    id: String,
    dir: PathBuf,
}

impl CaseFiles {
    /// `root/{id}` 下的病例.
    pub fn new<P: AsRef<Path>>(root: P, id: impl Into<String>) -> Self {
        let id = id.into();
        let dir = root.as_ref().join(&id);
        Self { id, dir }
    }

    /// 病例编号.
    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// 病例目录.
    #[inline]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file(&self, suffix: &str) -> PathBuf {
        self.dir.join(format!("{}{suffix}", self.id))
    }

    /// CT 体数据 `{id}.nrrd`.
    pub fn volume_path(&self) -> PathBuf {
        self.file(".nrrd")
    }

    /// 肺部分区标签 `{id}_partialLungLabelMap.nrrd`.
    pub fn partial_lung_path(&self) -> PathBuf {
        self.file("_partialLungLabelMap.nrrd")
    }

    /// 肺气肿标签 `{id}_emphysema.nrrd`.
    pub fn emphysema_path(&self) -> PathBuf {
        self.file("_emphysema.nrrd")
    }

    /// 种子点 `{id}_seeds.xml`.
    pub fn seeds_path(&self) -> PathBuf {
        self.file("_seeds.xml")
    }

    /// 读取 CT 扫描.
    pub fn open_volume(&self) -> Result<Volume, VolumeIoError> {
        Volume::open_nrrd(self.volume_path())
    }

    /// 读取部分肺标签. 文件不存在时返回 `Ok(None)`.
    pub fn open_partial_lung(&self) -> Result<Option<LabelMap>, VolumeIoError> {
        open_optional(self.partial_lung_path())
    }

    /// 读取肺气肿标签. 文件不存在时返回 `Ok(None)`.
    pub fn open_emphysema(&self) -> Result<Option<LabelMap>, VolumeIoError> {
        open_optional(self.emphysema_path())
    }

    /// 读取 CT 扫描并载入种子点 (若存在) 构成病例.
    pub fn open_case(&self) -> Result<Case, CaseLoadError> {
        let mut case = Case::new(self.id.clone(), self.open_volume()?);
        let seeds = self.seeds_path();
        if seeds.is_file() {
            case.open_seeds(seeds)?;
        }
        Ok(case)
    }
}

fn open_optional(path: PathBuf) -> Result<Option<LabelMap>, VolumeIoError> {
    if path.is_file() {
        LabelMap::open_nrrd(path).map(Some)
    } else {
        Ok(None)
    }
}

/// 病例载入错误.
#[derive(thiserror::Error, Debug)]
pub enum CaseLoadError {
    /// 体数据读取失败.
    #[error(transparent)]
    Volume(#[from] VolumeIoError),

    /// 种子文件读取失败.
    #[error(transparent)]
    Seeds(#[from] SeedIoError),
}

/// 列出 `root` 下所有含有 `{id}/{id}.nrrd` 的病例, 按编号排序.
pub fn list_cases<P: AsRef<Path>>(root: P) -> io::Result<Vec<CaseFiles>> {
    let root = root.as_ref();
    let mut ans = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let Some(id) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        let files = CaseFiles::new(root, id);
        if files.volume_path().is_file() {
            ans.push(files);
        }
    }
    ans.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(ans)
}

/// 病例加载器. 按顺序读取病例, 在迭代时才真正读取文件.
pub struct CaseLoader {
    data_rev: Vec<CaseFiles>,
}

/// 从病例文件列表创建加载器.
pub fn case_loader<I: IntoIterator<Item = CaseFiles>>(data: I) -> CaseLoader {
    let mut data_rev: Vec<CaseFiles> = data.into_iter().collect();
    data_rev.reverse();
    CaseLoader { data_rev }
}

impl Iterator for CaseLoader {
    type Item = (String, Result<Case, CaseLoadError>);

    fn next(&mut self) -> Option<Self::Item> {
        let files = self.data_rev.pop()?;
        let case = files.open_case();
        Some((files.id, case))
    }
}

impl ExactSizeIterator for CaseLoader {
    #[inline]
    fn len(&self) -> usize {
        self.data_rev.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Geometry;

    #[test]
    fn test_paths() {
        let f = CaseFiles::new("/data", "10002K");
        assert_eq!(f.volume_path(), PathBuf::from("/data/10002K/10002K.nrrd"));
        assert_eq!(f.seeds_path(), PathBuf::from("/data/10002K/10002K_seeds.xml"));
        assert_eq!(
            f.partial_lung_path(),
            PathBuf::from("/data/10002K/10002K_partialLungLabelMap.nrrd")
        );
    }

    #[test]
    fn test_list_and_load() {
        let root = tempfile::tempdir().unwrap();
        let g = Geometry::centered([4, 4, 4], [1.0; 3]).unwrap();
        for id in ["b", "a"] {
            let f = CaseFiles::new(root.path(), id);
            std::fs::create_dir(f.dir()).unwrap();
            Volume::filled(g.clone(), -800)
                .write_nrrd(f.volume_path())
                .unwrap();
        }
        // 没有扫描文件的目录被忽略.
        std::fs::create_dir(root.path().join("empty")).unwrap();

        let cases = list_cases(root.path()).unwrap();
        assert_eq!(cases.iter().map(|c| c.id()).collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(cases[0].open_emphysema().unwrap(), None);

        let mut loader = case_loader(cases);
        assert_eq!(loader.len(), 2);
        let (id, case) = loader.next().unwrap();
        assert_eq!(id, "a");
        let case = case.unwrap();
        assert!(case.is_empty());
        assert_eq!(case.volume().data()[(0, 0, 0)], -800);
    }
}
