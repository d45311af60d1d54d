//! 核心运行时错误.

use thiserror::Error;

/// 核心边界上的全部错误类型.
///
/// 错误总是同步地返回, 且不会与部分数值结果一同出现.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    /// 几何信息不合法, 或两个体数据的间距/尺寸不一致.
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    /// 分割前缺少质心种子点.
    #[error("no centroid seed")]
    NoSeed,

    /// 外部分割程序报错.
    #[error("segmentation failed: {0}")]
    SegmentationFailed(String),

    /// 阈值超出 level set 场的取值范围.
    #[error("threshold {value} out of range [{min}, {max}]")]
    ThresholdOutOfRange {
        /// 请求的阈值.
        value: f64,
        /// level set 最小值.
        min: f64,
        /// level set 最大值.
        max: f64,
    },

    /// 请求的标签 (或特征名) 不存在.
    #[error("no such label: {0}")]
    NoSuchLabel(String),

    /// 严格模式下掩膜为空.
    #[error("mask is empty")]
    MaskEmpty,

    /// 请求肺实质体积特征但未提供肺气肿标签.
    #[error("missing emphysema auxiliary mask")]
    MissingAux,

    /// 操作被协作式取消.
    #[error("cancelled")]
    Cancelled,
}

impl CoreError {
    /// 构建 `InvalidGeometry`.
    pub(crate) fn geometry(message: impl Into<String>) -> Self {
        CoreError::InvalidGeometry(message.into())
    }

    /// 该错误是否由取消引起?
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CoreError::Cancelled)
    }
}

/// 核心操作结果.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::CoreError;

    #[test]
    fn test_error_messages_are_stable() {
        assert_eq!(CoreError::NoSeed.to_string(), "no centroid seed");
        assert_eq!(CoreError::MaskEmpty.to_string(), "mask is empty");
        assert_eq!(
            CoreError::MissingAux.to_string(),
            "missing emphysema auxiliary mask"
        );
        assert_eq!(CoreError::Cancelled.to_string(), "cancelled");
        let e = CoreError::ThresholdOutOfRange {
            value: 5.0,
            min: -1.0,
            max: 2.5,
        };
        assert_eq!(e.to_string(), "threshold 5 out of range [-1, 2.5]");
        assert_eq!(
            CoreError::NoSuchLabel("7".into()).to_string(),
            "no such label: 7"
        );
    }
}
