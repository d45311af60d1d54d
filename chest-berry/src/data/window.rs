/// CT 窗口, 包含窗位 (window level) 和窗宽 (window width).
///
/// 该窗口是只读的. 若要修改窗口参数, 你应该创建新的实例.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CtWindow {
    level: f64,
    width: f64,
}

impl CtWindow {
    /// 构建 CT 窗.
    ///
    /// `level` 和 `width` 必须在合理范围内, 否则返回 `None`.
    pub fn new(level: f64, width: f64) -> Option<CtWindow> {
        if (-1e5..=1e5).contains(&level) && 0.0 < width && width <= 1e5 {
            Some(Self { level, width })
        } else {
            None
        }
    }

    /// 由上下界构建 CT 窗. 要求 `low < high`.
    #[inline]
    pub fn from_bounds(low: f64, high: f64) -> Option<CtWindow> {
        Self::new((low + high) / 2.0, high - low)
    }

    /// 便于展示肺部结构的 CT 窗口. 窗位 -600, 窗宽 1500.
    #[inline]
    pub const fn from_lung_visual() -> CtWindow {
        Self {
            level: -600.0,
            width: 1500.0,
        }
    }

    /// 纹理特征使用的归一化窗口 `[-1200, 200]`.
    #[inline]
    pub const fn from_texture() -> CtWindow {
        Self {
            level: -500.0,
            width: 1400.0,
        }
    }

    /// 窗下限.
    #[inline]
    pub fn lower_bound(&self) -> f64 {
        self.level - self.width / 2.0
    }

    /// 窗上限.
    #[inline]
    pub fn upper_bound(&self) -> f64 {
        self.level + self.width / 2.0
    }

    /// 窗位.
    #[inline]
    pub fn level(&self) -> f64 {
        self.level
    }

    /// 窗宽.
    #[inline]
    pub fn width(&self) -> f64 {
        self.width
    }

    /// 将 HU 值截断到窗口内.
    #[inline]
    pub fn clamp(&self, ct: f64) -> f64 {
        ct.clamp(self.lower_bound(), self.upper_bound())
    }

    /// 求在当前 CT 窗设置下, `ct` HU 值对应的灰度图像素整数值 (0 <= value <= 255)
    ///
    /// 如果 `ct` 无意义 (如 inf, NaN), 则返回 `None`.
    pub fn eval(&self, ct: f64) -> Option<u8> {
        self.eval_f64(ct).map(|v| v as u8)
    }

    /// 求在当前 CT 窗设置下, `ct` HU 值对应的灰度图像素分布点 (0.0 <= value <= 255.0).
    ///
    /// 如果 `ct` 无意义 (如 inf, NaN), 则返回 `None`.
    pub fn eval_f64(&self, ct: f64) -> Option<f64> {
        if !ct.is_finite() {
            return None;
        }
        let lb = self.lower_bound();
        if ct <= lb {
            Some(0.0)
        } else if ct >= self.upper_bound() {
            Some(255.0)
        } else {
            // 255, not 256.
            Some((ct - lb) / self.width() * 255.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::CtWindow;

    fn is_valid_init(level: f64, width: f64) -> bool {
        CtWindow::new(level, width).is_some()
    }

    #[test]
    fn test_ct_window_invalid_input() {
        assert!(!is_valid_init(0.0, -1.0));
        assert!(!is_valid_init(0.0, 0.0));
        assert!(CtWindow::from_bounds(10.0, -10.0).is_none());
    }

    fn float_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-8
    }

    #[test]
    fn test_ct_window_texture() {
        let w = CtWindow::from_texture();
        assert!(float_eq(w.lower_bound(), -1200.0));
        assert!(float_eq(w.upper_bound(), 200.0));
        assert!(float_eq(w.clamp(-3024.0), -1200.0));
        assert!(float_eq(w.clamp(1500.0), 200.0));
        assert!(float_eq(w.clamp(-900.0), -900.0));
    }

    #[test]
    fn test_ct_window_lung() {
        // [-1350, 150]
        let ct = CtWindow::from_lung_visual();
        assert_eq!(ct.eval(f64::NAN), None);
        assert_eq!(ct.eval(f64::MIN), Some(0));
        assert_eq!(ct.eval(f64::MAX), Some(255));
        assert_eq!(ct.eval(-1350.0), Some(0));
        assert_eq!(ct.eval(150.0), Some(255));

        assert_eq!(ct.eval(-600.0).unwrap(), (255.0 * 0.5) as u8);
        assert!(float_eq(ct.eval_f64(-600.0).unwrap(), 255.0 * 0.5));

        // boundary
        assert!(ct.eval_f64(-1349.9).unwrap() > 0.0);
        assert!(ct.eval_f64(-1349.9).unwrap() < 1.0);
        assert_eq!(ct.eval(149.999), Some(254));
    }
}
