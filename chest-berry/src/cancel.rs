//! 协作式取消与进度回调.
//!
//! 长时间操作 (分割, 特征提取, 肺实质分析) 接受一个 [`CancelToken`],
//! 并在阶段边界或内部循环中检查它. 特征提取在每完成一类特征后调用一次 [`Progress`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::{CoreError, CoreResult};

/// 不透明的取消令牌. 克隆得到的令牌共享同一个状态.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// 创建一个未取消的令牌.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// 请求取消.
    #[inline]
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// 是否已被请求取消?
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// 若已取消则返回 `Err(CoreError::Cancelled)`.
    #[inline]
    pub fn check(&self) -> CoreResult<()> {
        if self.is_cancelled() {
            Err(CoreError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// 进度回调.
///
/// `stage` 为阶段名 (特征提取中即特征类名), `done` 和 `total` 为已完成/总阶段数.
/// 返回 `Err` (通常是 `CoreError::Cancelled`) 会中止当前操作.
pub trait Progress {
    /// 报告一个阶段完成.
    fn report(&mut self, stage: &str, done: usize, total: usize) -> CoreResult<()>;
}

impl<F> Progress for F
where
    F: FnMut(&str, usize, usize) -> CoreResult<()>,
{
    #[inline]
    fn report(&mut self, stage: &str, done: usize, total: usize) -> CoreResult<()> {
        self(stage, done, total)
    }
}

/// 什么也不做的进度回调.
#[derive(Copy, Clone, Debug, Default)]
pub struct Silent;

impl Progress for Silent {
    #[inline]
    fn report(&mut self, _: &str, _: usize, _: usize) -> CoreResult<()> {
        Ok(())
    }
}

/// 在循环中每隔固定次数检查一次令牌的计数器.
#[derive(Debug)]
pub(crate) struct Ticker<'a> {
    token: &'a CancelToken,
    count: u32,
}

impl<'a> Ticker<'a> {
    const PERIOD: u32 = 1 << 14;

    #[inline]
    pub fn new(token: &'a CancelToken) -> Self {
        Self { token, count: 0 }
    }

    /// 计数一次. 每 `PERIOD` 次真正检查令牌.
    #[inline]
    pub fn tick(&mut self) -> CoreResult<()> {
        self.count += 1;
        if self.count == Self::PERIOD {
            self.count = 0;
            self.token.check()
        } else {
            Ok(())
        }
    }
}
