use std::path::Path;

use ndarray::{Array3, ArrayD, Axis, Ix3};
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};

use super::geometry::Affine;
use super::{Field, Geometry, LabelMap, Volume, VolumeIoError};

/// 由 NIfTI header 得到几何信息. NIfTI 世界坐标即 RAS.
///
/// 优先使用 sform, 其次 qform, 都没有时仅使用 pixdim.
fn geometry_from_header(h: &NiftiHeader) -> Result<Geometry, VolumeIoError> {
    let [_, w, hh, z, ..] = h.dim;
    let dims = [w as usize, hh as usize, z as usize];
    let pix = [h.pixdim[1] as f64, h.pixdim[2] as f64, h.pixdim[3] as f64];

    if h.sform_code > 0 {
        let mut m: Affine = [[0.0; 4]; 4];
        for (r, row) in [h.srow_x, h.srow_y, h.srow_z].iter().enumerate() {
            for c in 0..4 {
                m[r][c] = row[c] as f64;
            }
        }
        m[3][3] = 1.0;
        return Ok(Geometry::from_ijk_to_ras(dims, &m)?);
    }

    if h.qform_code > 0 {
        let (b, c, d) = (h.quatern_b as f64, h.quatern_c as f64, h.quatern_d as f64);
        let a = (1.0 - (b * b + c * c + d * d)).max(0.0).sqrt();
        let rot = [
            [a * a + b * b - c * c - d * d, 2.0 * (b * c - a * d), 2.0 * (b * d + a * c)],
            [2.0 * (b * c + a * d), a * a + c * c - b * b - d * d, 2.0 * (c * d - a * b)],
            [2.0 * (b * d - a * c), 2.0 * (c * d + a * b), a * a + d * d - c * c - b * b],
        ];
        let qfac = if h.pixdim[0] < 0.0 { -1.0 } else { 1.0 };
        let mut dirs = rot;
        for row in dirs.iter_mut() {
            row[2] *= qfac;
        }
        let origin = [h.quatern_x as f64, h.quatern_y as f64, h.quatern_z as f64];
        return Ok(Geometry::new(dims, pix, origin, dirs)?);
    }

    Ok(Geometry::new(
        dims,
        pix,
        [0.0; 3],
        [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
    )?)
}

/// 将 `[W, H, z, (1, ...)]` 排列的数组转换成 `(z, H, W)`.
fn to_kji<T: Clone>(mut data: ArrayD<T>) -> Result<Array3<T>, VolumeIoError> {
    while data.ndim() > 3 {
        let last = data.ndim() - 1;
        if data.shape()[last] != 1 {
            return Err(VolumeIoError::Unsupported(format!(
                "non-scalar volume of shape {:?}",
                data.shape()
            )));
        }
        data = data.index_axis_move(Axis(last), 0);
    }
    let data = data
        .into_dimensionality::<Ix3>()
        .map_err(|_| VolumeIoError::Unsupported("volume is not 3D".into()))?;

    // [W, H, z] -> [z, H, W].
    let data = data.permuted_axes([2, 1, 0]);
    Ok(if data.is_standard_layout() {
        data
    } else {
        data.as_standard_layout().to_owned()
    })
}

macro_rules! impl_nifti_open {
    ($volume: ident, $elem: ty) => {
        impl $volume {
            /// 打开 nii (或 nii.gz) 文件格式的体数据.
            /// 如果打开成功, 则返回 `Ok(Self)`, 否则返回 `Err`.
            pub fn open_nifti<P: AsRef<Path>>(path: P) -> Result<Self, VolumeIoError> {
                let obj = ReaderOptions::new().read_file(path.as_ref())?;
                let geometry = geometry_from_header(obj.header())?;
                let data = to_kji(obj.into_volume().into_ndarray::<$elem>()?)?;
                if data.dim() != geometry.shape() {
                    return Err(VolumeIoError::Size {
                        expected: geometry.size(),
                        actual: data.len(),
                    });
                }
                Ok(Self::from_parts(geometry, data))
            }
        }
    };
}

impl_nifti_open!(Volume, i16);
impl_nifti_open!(LabelMap, u16);
impl_nifti_open!(Field, f32);

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array, IxDyn, ShapeBuilder};

    #[test]
    fn test_to_kji_fortran() {
        // nifti 数据以 Fortran 序存放 [W, H, z].
        let data = Array::from_shape_fn(IxDyn(&[4, 3, 2]).f(), |ix| {
            (ix[0] + 10 * ix[1] + 100 * ix[2]) as i16
        });
        let out = to_kji(data).unwrap();
        assert_eq!(out.dim(), (2, 3, 4));
        assert!(out.is_standard_layout());
        assert_eq!(out[(1, 2, 3)], 123);
    }

    #[test]
    fn test_to_kji_trailing_dims() {
        let data = Array::from_elem(IxDyn(&[2, 2, 2, 1]), 7u16);
        assert_eq!(to_kji(data).unwrap().dim(), (2, 2, 2));
        let data = Array::from_elem(IxDyn(&[2, 2, 2, 3]), 7u16);
        assert!(to_kji(data).is_err());
    }

    #[test]
    fn test_header_geometry() {
        // 默认头部带有 sform, 先清除, 从 pixdim 开始验证.
        let mut h = NiftiHeader::default();
        h.sform_code = 0;
        h.qform_code = 0;
        h.dim = [3, 10, 20, 30, 1, 1, 1, 1];
        h.pixdim = [1.0, 0.5, 0.5, 2.0, 0.0, 0.0, 0.0, 0.0];
        let g = geometry_from_header(&h).unwrap();
        assert_eq!(g.dims(), [10, 20, 30]);
        assert_eq!(g.spacing(), [0.5, 0.5, 2.0]);

        // qform: 绕 z 轴旋转 180 度, 即 LPS 风格.
        h.qform_code = 1;
        h.quatern_d = 1.0;
        h.quatern_x = 5.0;
        let g = geometry_from_header(&h).unwrap();
        let ras = g.ijk_to_ras([1.0, 1.0, 1.0]);
        assert!((ras[0] - 4.5).abs() < 1e-6);
        assert!((ras[1] + 0.5).abs() < 1e-6);
        assert!((ras[2] - 2.0).abs() < 1e-6);

        // sform 优先.
        h.sform_code = 1;
        h.srow_x = [0.7, 0.0, 0.0, -10.0];
        h.srow_y = [0.0, 0.7, 0.0, -20.0];
        h.srow_z = [0.0, 0.0, 1.5, -30.0];
        let g = geometry_from_header(&h).unwrap();
        assert!((g.spacing()[0] - 0.7).abs() < 1e-6);
        assert!((g.origin()[2] + 30.0).abs() < 1e-6);
    }
}
