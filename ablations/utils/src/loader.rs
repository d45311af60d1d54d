//! 对 `chest-berry::dataset` 的更一层封装. 提供更直接的病例加载器.

use chest_berry::dataset::{self, CaseLoader};
use std::io;
use std::path::{Path, PathBuf};

/// 获取病例数据集基本路径.
///
/// 1. 若环境变量 `$CHEST_CASE_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/chest`.
///
/// 都无法确定时返回 `None`.
#[inline]
pub fn case_dir_from_env_or_home() -> Option<PathBuf> {
    dataset::case_dir_from_env_or_home()
}

/// 获取 `path` 下全部病例的加载器.
pub fn case_loader<P: AsRef<Path>>(path: P) -> io::Result<CaseLoader> {
    Ok(dataset::case_loader(dataset::list_cases(path)?))
}
