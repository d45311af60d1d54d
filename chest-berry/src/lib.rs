#![warn(missing_docs)] // <= 合适时移除它.
// #![warn(clippy::missing_docs_in_private_items)]  // <= too strict.

//! 核心库. 提供胸部 CT 扫描的结节分割、影像组学特征提取和肺实质密度分析.
//!
//! 该 crate 目前仅提供 `safe` 接口. 所有公开操作都是同步的,
//! 库本身不创建线程 (开启 `rayon` feature 时, 部分内部循环会借助 `rayon` 并行).
//!
//! # 注意
//!
//! 1. 数组索引统一为 `(k, j, i)` 顺序, 即 IJK 的逆序. 与界面交流使用 RAS 坐标,
//!   索引数组时使用 IJK 坐标. 二者之间的转换总是显式的, 见 [`Geometry`].
//! 2. 扫描 (HU) 以 `i16` 保存, 标签以 `u16` 保存, 其中低字节为 chest region,
//!   高字节为 chest type.
//!
//! # 开发计划
//!
//! ### 体数据几何与文件读写 ✅
//!
//! RAS/LPS/IJK 坐标转换, NRRD (raw/gzip) 与 NIfTI 读取, NRRD 写出.
//!
//! 实现位于 `chest-berry/src/data`.
//!
//! ### 种子点与 GeometryTopologyData XML ✅
//!
//! 实现位于 `chest-berry/src/seeds`.
//!
//! ### 结节分割 ✅
//!
//! 外部 CLI 生成 level set, 阈值化得到标签, marching cubes 得到网格.
//! 结节状态机 `EMPTY -> HAS_SEEDS -> SEGMENTED`, 距离图与同心球壳.
//!
//! 实现位于 `chest-berry/src/segment`.
//!
//! ### 影像组学特征 ✅
//!
//! 一阶统计量, 形态学, GLCM, GLRL, Renyi 维数, 挤出几何量, 肺实质体积.
//!
//! 实现位于 `chest-berry/src/features`.
//!
//! ### 肺实质分区密度分析 ✅
//!
//! LAA%, HAA%, 百分位数, 组织质量, 分区直方图. 以及肺三等分工具.
//!
//! 实现位于 `chest-berry/src/parenchyma`.
//!
//! ### 结果记录 ✅
//!
//! 实现位于 `chest-berry/src/report.rs`.

/// 三维索引 `(k, j, i)`, 同时也可一定程度上用作非负整数向量.
pub type Idx3d = (usize, usize, usize);

/// 三维实数向量. 作为坐标时, 分量顺序与其所在坐标系一致
/// (RAS 即 `[r, a, s]`, IJK 即 `[i, j, k]`).
pub type Vec3 = [f64; 3];

/// 体数据基础结构与文件读写.
mod data;

pub use data::{
    BoundingBox, CompactLabelMap, CtWindow, Field, Geometry, LabelMap, Volume, VolumeAttr,
    VolumeIoError,
};

pub use data::geometry::{lps_to_ras, ras_to_lps, AcquisitionScale, Affine};

pub mod cancel;
pub mod consts;
pub mod dataset;
pub mod error;
pub mod features;
pub mod parenchyma;
pub mod prelude;
pub mod report;
pub mod seeds;
pub mod segment;

pub use error::{CoreError, CoreResult};
