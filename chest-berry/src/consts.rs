//! 通用常量.

/// 标签体素值.
pub mod label {
    /// 背景体素值.
    pub const BACKGROUND: u16 = 0;

    /// 二值标签 (病灶, 球壳) 的前景体素值.
    pub const FOREGROUND: u16 = 1;

    /// 获取标签值的 chest region 部分 (低字节).
    #[inline]
    pub const fn region_of(value: u16) -> u8 {
        (value & 0x00ff) as u8
    }

    /// 获取标签值的 chest type 部分 (高字节).
    #[inline]
    pub const fn type_of(value: u16) -> u8 {
        (value >> 8) as u8
    }

    /// 由 chest region 和 chest type 组合出标签值: `(type << 8) | region`.
    #[inline]
    pub const fn compose(region: u8, ty: u8) -> u16 {
        ((ty as u16) << 8) | region as u16
    }

    /// 体素是否是背景?
    #[inline]
    pub const fn is_background(value: u16) -> bool {
        value == BACKGROUND
    }
}

/// chest region 编码. 与上游部分肺标签 CLI 的编码一致.
pub mod region {
    /// 未定义区域.
    pub const UNDEFINED: u8 = 0;
    /// 全肺.
    pub const WHOLE_LUNG: u8 = 1;
    /// 右肺.
    pub const RIGHT_LUNG: u8 = 2;
    /// 左肺.
    pub const LEFT_LUNG: u8 = 3;
    /// 右上叶.
    pub const RIGHT_SUPERIOR_LOBE: u8 = 4;
    /// 右中叶.
    pub const RIGHT_MIDDLE_LOBE: u8 = 5;
    /// 右下叶.
    pub const RIGHT_INFERIOR_LOBE: u8 = 6;
    /// 左上叶.
    pub const LEFT_SUPERIOR_LOBE: u8 = 7;
    /// 左下叶.
    pub const LEFT_INFERIOR_LOBE: u8 = 8;
    /// 左肺上三分之一.
    pub const LEFT_UPPER_THIRD: u8 = 9;
    /// 左肺中三分之一.
    pub const LEFT_MIDDLE_THIRD: u8 = 10;
    /// 左肺下三分之一.
    pub const LEFT_LOWER_THIRD: u8 = 11;
    /// 右肺上三分之一.
    pub const RIGHT_UPPER_THIRD: u8 = 12;
    /// 右肺中三分之一.
    pub const RIGHT_MIDDLE_THIRD: u8 = 13;
    /// 右肺下三分之一.
    pub const RIGHT_LOWER_THIRD: u8 = 14;
}

/// CT HU 相关常量.
pub mod hu {
    /// 空气.
    pub const AIR: i16 = -1000;

    /// 水.
    pub const WATER: i16 = 0;

    /// 纹理特征归一化窗口下限.
    pub const TEXTURE_WINDOW_LOW: f64 = -1200.0;

    /// 纹理特征归一化窗口上限.
    pub const TEXTURE_WINDOW_HIGH: f64 = 200.0;

    /// 纹理特征和一阶直方图的默认 bin 宽度.
    pub const DEFAULT_BIN_WIDTH: f64 = 25.0;

    /// LAA% 阈值.
    pub const LAA_THRESHOLDS: [i16; 4] = [-950, -925, -910, -856];

    /// HAA% 阈值.
    pub const HAA_THRESHOLDS: [i16; 4] = [-700, -600, -500, -250];

    /// HAA% 开区间窗口.
    pub const HAA_WINDOW: (i16, i16) = (-600, -250);

    /// 肺实质直方图的上界 (不含).
    pub const HISTOGRAM_UPPER: i16 = -350;
}

/// 结节分割相关常量.
pub mod lesion {
    /// 人体尺度采集的默认最大病灶半径 (mm).
    pub const HUMAN_MAX_RADIUS_MM: f64 = 30.0;

    /// 小动物采集的默认最大病灶半径 (mm).
    pub const SMALL_ANIMAL_MAX_RADIUS_MM: f64 = 3.0;

    /// 人体尺度的预设球壳半径 (mm).
    pub const HUMAN_SHELL_RADII_MM: [f64; 3] = [15.0, 20.0, 25.0];

    /// 小动物的预设球壳半径 (mm).
    pub const SMALL_ANIMAL_SHELL_RADII_MM: [f64; 3] = [1.5, 2.0, 2.5];

    /// `spacing[0] * dimensions[0]` 小于该值 (mm) 时视为小动物采集.
    pub const SMALL_ANIMAL_FOV_MM: f64 = 100.0;

    /// 默认阈值.
    pub const DEFAULT_THRESHOLD: f64 = 0.0;
}
