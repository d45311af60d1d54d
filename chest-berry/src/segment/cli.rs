//! 通过外部命令行程序生成 level set.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use super::{LevelSetProvider, SegmentConfig};
use crate::cancel::CancelToken;
use crate::seeds::SeedSet;
use crate::{CoreError, CoreResult, Field, Volume, VolumeAttr};

/// 外部分割程序路径的环境变量.
pub const SEGMENTER_ENV: &str = "LESION_SEGMENTER_CLI";

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// 外部病灶分割程序.
///
/// 调用形式:
///
/// ```text
/// <program> [extra_args..] --seeds x,y,z [--seeds x,y,z ..] --maximumRadius r [--partSolid] <input.nrrd> <output.nrrd>
/// ```
///
/// 种子为 RAS 坐标 (mm). 输入输出文件位于临时目录中, 调用结束后删除.
#[derive(Clone, Debug, PartialEq)]
pub struct ExternalSegmenter {
    program: PathBuf,
    extra_args: Vec<String>,
}

#[inline]
fn failed(msg: impl std::fmt::Display) -> CoreError {
    CoreError::SegmentationFailed(msg.to_string())
}

impl ExternalSegmenter {
    /// 以 `program` 为外部分割程序.
    pub fn new<P: Into<PathBuf>>(program: P) -> Self {
        Self {
            program: program.into(),
            extra_args: Vec::new(),
        }
    }

    /// 从环境变量 `$LESION_SEGMENTER_CLI` 读取程序路径.
    pub fn from_env() -> Option<Self> {
        std::env::var_os(SEGMENTER_ENV).map(Self::new)
    }

    /// 追加额外参数, 位于所有其他参数之前.
    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    /// 外部程序路径.
    #[inline]
    pub fn program(&self) -> &Path {
        &self.program
    }

    fn command(&self, seeds: &SeedSet, config: &SegmentConfig, input: &Path, output: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.extra_args);
        for [x, y, z] in seeds.points() {
            cmd.arg("--seeds").arg(format!("{x},{y},{z}"));
        }
        cmd.arg("--maximumRadius").arg(config.max_radius_mm.to_string());
        if config.part_solid {
            cmd.arg("--partSolid");
        }
        cmd.arg(input).arg(output);
        cmd
    }

    /// 轮询等待子进程结束. 超时或被取消时杀死子进程.
    fn wait(
        &self,
        cmd: &mut Command,
        timeout: Option<Duration>,
        cancel: &CancelToken,
    ) -> CoreResult<ExitStatus> {
        let mut child = cmd
            .spawn()
            .map_err(|e| failed(format!("无法启动 {}: {e}", self.program.display())))?;
        let start = Instant::now();
        loop {
            if let Some(status) = child.try_wait().map_err(failed)? {
                return Ok(status);
            }
            let expired = timeout.map_or(false, |t| start.elapsed() >= t);
            if expired || cancel.is_cancelled() {
                // 子进程可能恰好已经退出, 忽略 kill 的错误.
                let _ = child.kill();
                let _ = child.wait();
                return Err(if expired {
                    failed(format!("{} 超时 ({:?})", self.program.display(), start.elapsed()))
                } else {
                    CoreError::Cancelled
                });
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

impl LevelSetProvider for ExternalSegmenter {
    fn level_set(
        &self,
        volume: &Volume,
        seeds: &SeedSet,
        config: &SegmentConfig,
        cancel: &CancelToken,
    ) -> CoreResult<Field> {
        let dir = tempfile::tempdir().map_err(failed)?;
        let input = dir.path().join("input.nrrd");
        let output = dir.path().join("levelset.nrrd");
        let log_path = dir.path().join("stderr.txt");
        volume.write_nrrd(&input).map_err(failed)?;

        let stderr = File::create(&log_path).map_err(failed)?;
        let mut cmd = self.command(seeds, config, &input, &output);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(stderr));
        log::info!("running {:?}", cmd);

        let status = self.wait(&mut cmd, config.timeout, cancel)?;
        let messages = std::fs::read_to_string(&log_path).unwrap_or_default();
        for line in messages.lines().filter(|l| !l.trim().is_empty()) {
            log::warn!("{}: {line}", self.program.display());
        }
        if !status.success() {
            return Err(failed(format!(
                "{} 异常退出 ({status}): {}",
                self.program.display(),
                messages.trim()
            )));
        }
        if !output.exists() {
            return Err(failed(format!("{} 没有生成输出", self.program.display())));
        }

        let field = Field::open_nrrd(&output).map_err(failed)?;
        if !field.geometry().is_compatible(volume.geometry()) {
            return Err(failed("输出与输入的几何信息不一致"));
        }
        Ok(field)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::seeds::LesionType;
    use crate::Geometry;

    /// 由 `/bin/sh` 解释执行的脚本, 避免直接执行刚写入的文件.
    fn script(dir: &Path, name: &str, body: &str) -> ExternalSegmenter {
        let path = dir.join(name);
        std::fs::write(&path, format!("{body}\n")).unwrap();
        ExternalSegmenter::new("/bin/sh").arg(path.to_string_lossy())
    }

    fn inputs() -> (Volume, SeedSet) {
        let g = Geometry::centered([8, 8, 8], [1.0; 3]).unwrap();
        let v = Volume::from_fn(g, |(k, _, _)| k as i16 * 10);
        (v, SeedSet::with_centroid([0.0; 3], LesionType::Nodule))
    }

    #[test]
    fn test_copy_input_as_level_set() {
        let dir = tempfile::tempdir().unwrap();
        // 最后两个参数为输入和输出.
        let prog = script(
            dir.path(),
            "copy.sh",
            r#"for a; do src="$dst"; dst="$a"; done
cp "$src" "$dst""#,
        );
        let (v, seeds) = inputs();
        let f = prog
            .level_set(&v, &seeds, &SegmentConfig::default(), &CancelToken::new())
            .unwrap();
        assert_eq!(f.range(), Some((0.0, 70.0)));
        assert_eq!(f[(3, 0, 0)], 30.0);
    }

    #[test]
    fn test_failure_modes() {
        let dir = tempfile::tempdir().unwrap();
        let (v, seeds) = inputs();
        let t = CancelToken::new();

        let missing = ExternalSegmenter::new(dir.path().join("nope"));
        assert!(matches!(
            missing.level_set(&v, &seeds, &SegmentConfig::default(), &t),
            Err(CoreError::SegmentationFailed(_))
        ));

        let prog = script(dir.path(), "fail.sh", "echo oops >&2\nexit 3");
        let r = prog.level_set(&v, &seeds, &SegmentConfig::default(), &t);
        match r {
            Err(CoreError::SegmentationFailed(msg)) => assert!(msg.contains("oops")),
            other => panic!("unexpected {other:?}"),
        }

        let prog = script(dir.path(), "silent.sh", "exit 0");
        assert!(prog
            .level_set(&v, &seeds, &SegmentConfig::default(), &t)
            .is_err());
    }

    #[test]
    fn test_timeout_and_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let (v, seeds) = inputs();
        let prog = script(dir.path(), "sleep.sh", "sleep 10");
        let config = SegmentConfig {
            timeout: Some(Duration::from_millis(200)),
            ..Default::default()
        };
        let start = Instant::now();
        let r = prog.level_set(&v, &seeds, &config, &CancelToken::new());
        assert!(matches!(r, Err(CoreError::SegmentationFailed(_))));
        assert!(start.elapsed() < Duration::from_secs(5));

        let t = CancelToken::new();
        t.cancel();
        let r = prog.level_set(&v, &seeds, &SegmentConfig::default(), &t);
        assert_eq!(r.err(), Some(CoreError::Cancelled));
    }
}
