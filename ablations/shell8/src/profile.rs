//! 运行统计.

use std::time::{Duration, Instant};

/// ablation 计时器, 支持 "中途中断" 与 "结束中断, 继续开始计时".
#[derive(Clone, Debug)]
struct AccTimer {
    consumed: Duration,
    since: Instant,
}

impl AccTimer {
    /// 初始化计时器. 初始化时视为已经开始计时.
    #[inline]
    fn new() -> Self {
        Self {
            consumed: Duration::ZERO,
            since: Instant::now(),
        }
    }

    #[inline]
    fn start(&mut self) {
        self.since = Instant::now();
    }

    /// 结束计时, 并将这一区间的时间累加. 返回本轮计时时长.
    ///
    /// 上一次调用必须是 `self.start()`, 否则计算时间值无意义.
    #[inline]
    fn elapsed(&mut self) -> Duration {
        let d = self.since.elapsed();
        self.consumed += d;
        d
    }

    #[inline]
    fn total_us(&self) -> u64 {
        self.consumed.as_micros() as u64
    }
}

/// 单个分析目标 (病灶或某一半径球壳) 的统计.
#[derive(Clone, Debug)]
pub struct Profile {
    /// 读取的病例数.
    cases: u64,

    /// 成功完成特征提取的结节数.
    nodules: u64,

    /// 分割或提取失败的结节数.
    failed: u64,

    /// 分割 (含距离图与球壳) 花费的时间.
    segment_time: AccTimer,

    /// 特征提取花费的时间.
    extract_time: AccTimer,

    /// 整个任务花费的总时间.
    real_time: AccTimer,

    /// 最耗时的一次特征提取.
    most: Option<Duration>,

    /// 参与特征提取的掩膜体素总数.
    voxels: u64,
}

impl Profile {
    #[inline]
    pub fn new() -> Self {
        Self {
            cases: 0,
            nodules: 0,
            failed: 0,
            segment_time: AccTimer::new(),
            extract_time: AccTimer::new(),
            real_time: AccTimer::new(),
            most: None,
            voxels: 0,
        }
    }

    #[inline]
    pub fn count_case(&mut self) {
        self.cases += 1;
    }

    #[inline]
    pub fn count_failed(&mut self) {
        self.failed += 1;
    }

    #[inline]
    pub fn segment_start(&mut self) {
        self.segment_time.start();
    }

    #[inline]
    pub fn segment_elapsed(&mut self) {
        self.segment_time.elapsed();
    }

    #[inline]
    pub fn extract_start(&mut self) {
        self.extract_time.start();
    }

    /// 结束一次特征提取计时, 记录 `voxels` 个掩膜体素.
    #[inline]
    pub fn extract_elapsed(&mut self, voxels: usize) {
        let d = self.extract_time.elapsed();
        self.most = Some(self.most.map_or(d, |m| m.max(d)));
        self.nodules += 1;
        self.voxels += voxels as u64;
    }

    /// 结束全部计时.
    #[inline]
    pub fn finish(mut self) -> Self {
        self.real_time.elapsed();
        self
    }

    #[inline]
    pub fn get_cases(&self) -> u64 {
        self.cases
    }

    #[inline]
    pub fn get_nodules(&self) -> u64 {
        self.nodules
    }

    #[inline]
    pub fn get_failed(&self) -> u64 {
        self.failed
    }

    #[inline]
    pub fn get_voxels(&self) -> u64 {
        self.voxels
    }

    #[inline]
    pub fn get_segment_time_us(&self) -> u64 {
        self.segment_time.total_us()
    }

    #[inline]
    pub fn get_extract_time_us(&self) -> u64 {
        self.extract_time.total_us()
    }

    #[inline]
    pub fn get_real_time_us(&self) -> u64 {
        self.real_time.total_us()
    }

    /// 单个结节的平均特征提取时间 (微秒).
    pub fn get_avg_extract_time_us(&self) -> Option<f64> {
        match self.nodules {
            0 => None,
            n => Some(self.get_extract_time_us() as f64 / n as f64),
        }
    }

    /// 每千个体素的平均特征提取时间 (微秒).
    pub fn get_us_per_kilo_voxel(&self) -> Option<f64> {
        match self.voxels {
            0 => None,
            v => Some(self.get_extract_time_us() as f64 * 1000.0 / v as f64),
        }
    }

    #[inline]
    pub fn get_most_time_consuming(&self) -> Option<Duration> {
        self.most
    }
}

impl Default for Profile {
    fn default() -> Self {
        Self::new()
    }
}
