//! NRRD (Nearly Raw Raster Data) 读写.
//!
//! 仅支持头部与数据存放于同一文件的三维标量体数据 (`.nrrd`).
//! 读取支持 `raw`/`gzip` 编码, 大小端, `short`/`ushort`/`int`/`float`/`uchar`/`double`
//! 类型, 以及 LPS/RAS 空间. 写出统一使用 gzip 编码, 小端, LPS 空间.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use ndarray::Array3;
use num::{Bounded, NumCast, Zero};

use super::geometry::{lps_to_ras, ras_to_lps};
use super::{Field, Geometry, LabelMap, Volume, VolumeAttr, VolumeIoError};
use crate::Vec3;

type IoResult<T> = Result<T, VolumeIoError>;

/// 体素样本类型.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum SampleType {
    U8,
    I16,
    U16,
    I32,
    F32,
    F64,
}

impl SampleType {
    fn parse(s: &str) -> IoResult<Self> {
        Ok(match s.trim() {
            "uchar" | "unsigned char" | "uint8" | "uint8_t" => Self::U8,
            "short" | "short int" | "signed short" | "signed short int" | "int16"
            | "int16_t" => Self::I16,
            "ushort" | "unsigned short" | "unsigned short int" | "uint16" | "uint16_t" => {
                Self::U16
            }
            "int" | "signed int" | "int32" | "int32_t" => Self::I32,
            "float" => Self::F32,
            "double" => Self::F64,
            other => return Err(VolumeIoError::Unsupported(format!("type `{other}`"))),
        })
    }

    #[inline]
    fn width(&self) -> usize {
        match self {
            Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::F32 => 4,
            Self::F64 => 8,
        }
    }

    #[inline]
    fn name(&self) -> &'static str {
        match self {
            Self::U8 => "uchar",
            Self::I16 => "short",
            Self::U16 => "ushort",
            Self::I32 => "int",
            Self::F32 => "float",
            Self::F64 => "double",
        }
    }

    /// 以 `f64` 解码一个样本. `bytes` 长度等于 `self.width()`, 已按小端排列.
    #[inline]
    fn decode(&self, b: &[u8]) -> f64 {
        match self {
            Self::U8 => b[0] as f64,
            Self::I16 => i16::from_le_bytes([b[0], b[1]]) as f64,
            Self::U16 => u16::from_le_bytes([b[0], b[1]]) as f64,
            Self::I32 => i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64,
            Self::F32 => f32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64,
            Self::F64 => f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]),
        }
    }
}

/// 可以存放于 NRRD 的体素类型.
pub(crate) trait NrrdScalar: Copy + Bounded + NumCast + Zero {
    /// 写出时使用的样本类型.
    const SAMPLE: &'static str;

    /// 由 `f64` 转换, 超出范围时饱和截断, NaN 视为 0.
    fn from_f64(v: f64) -> Self {
        num::cast(v).unwrap_or_else(|| {
            if v.is_nan() {
                Self::zero()
            } else if v < 0.0 {
                Self::min_value()
            } else {
                Self::max_value()
            }
        })
    }

    /// 小端字节.
    fn write_le<W: Write>(&self, w: &mut W) -> std::io::Result<()>;
}

macro_rules! impl_nrrd_scalar {
    ($t: ty, $name: literal) => {
        impl NrrdScalar for $t {
            const SAMPLE: &'static str = $name;

            #[inline]
            fn write_le<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
                w.write_all(&self.to_le_bytes())
            }
        }
    };
}

impl_nrrd_scalar!(i16, "short");
impl_nrrd_scalar!(u16, "ushort");
impl_nrrd_scalar!(f32, "float");

/// 解析后的 NRRD 头部.
#[derive(Debug)]
struct Header {
    sample: SampleType,
    dims: [usize; 3],
    geometry: Geometry,
    gzip: bool,
    big_endian: bool,
}

/// 解析形如 `(a,b,c)` 的向量.
fn parse_vector(s: &str) -> IoResult<Vec3> {
    let inner = s
        .trim()
        .strip_prefix('(')
        .and_then(|t| t.strip_suffix(')'))
        .ok_or_else(|| VolumeIoError::Header(format!("非法向量 `{s}`")))?;
    let parts: Vec<f64> = inner
        .split(',')
        .map(|t| t.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|e| VolumeIoError::Header(format!("非法向量 `{s}`: {e}")))?;
    match parts.as_slice() {
        [x, y, z] => Ok([*x, *y, *z]),
        _ => Err(VolumeIoError::Header(format!("向量 `{s}` 不是三维的"))),
    }
}

/// 解析 `space directions` 字段中的三个向量.
fn parse_vectors(s: &str) -> IoResult<[Vec3; 3]> {
    let mut out = Vec::with_capacity(3);
    let mut rest = s.trim();
    while let Some(start) = rest.find('(') {
        let end = rest[start..]
            .find(')')
            .ok_or_else(|| VolumeIoError::Header(format!("括号不匹配 `{s}`")))?
            + start;
        out.push(parse_vector(&rest[start..=end])?);
        rest = &rest[end + 1..];
    }
    out.try_into()
        .map_err(|_| VolumeIoError::Unsupported(format!("space directions `{s}`")))
}

fn parse_three<T: std::str::FromStr>(key: &str, s: &str) -> IoResult<[T; 3]> {
    let parts: Vec<T> = s
        .split_whitespace()
        .map(|t| t.parse::<T>())
        .collect::<Result<_, _>>()
        .map_err(|_| VolumeIoError::Header(format!("非法字段 {key}: `{s}`")))?;
    parts
        .try_into()
        .map_err(|_| VolumeIoError::Unsupported(format!("{key} `{s}`")))
}

impl Header {
    fn parse(text: &str) -> IoResult<Self> {
        let mut lines = text.lines();
        let magic = lines.next().unwrap_or_default();
        if !magic.starts_with("NRRD000") {
            return Err(VolumeIoError::Header(format!("magic `{magic}`")));
        }
        let mut fields = HashMap::new();
        for line in lines {
            if line.starts_with('#') || line.trim().is_empty() {
                continue;
            }
            // `key:=value` 为键值对, 忽略.
            if line.contains(":=") {
                continue;
            }
            if let Some((k, v)) = line.split_once(": ") {
                fields.insert(k.trim().to_ascii_lowercase(), v.trim().to_string());
            } else {
                return Err(VolumeIoError::Header(format!("无法解析 `{line}`")));
            }
        }
        let get = |k: &str| fields.get(k).map(String::as_str);

        if let Some(df) = get("data file").or(get("datafile")) {
            return Err(VolumeIoError::Unsupported(format!("detached data `{df}`")));
        }
        let dimension: usize = get("dimension")
            .ok_or_else(|| VolumeIoError::Header("缺少 dimension".into()))?
            .parse()
            .map_err(|_| VolumeIoError::Header("非法 dimension".into()))?;
        if dimension != 3 {
            return Err(VolumeIoError::Unsupported(format!("dimension {dimension}")));
        }
        let sample = SampleType::parse(
            get("type").ok_or_else(|| VolumeIoError::Header("缺少 type".into()))?,
        )?;
        let dims: [usize; 3] = parse_three(
            "sizes",
            get("sizes").ok_or_else(|| VolumeIoError::Header("缺少 sizes".into()))?,
        )?;
        let gzip = match get("encoding").unwrap_or("raw") {
            "raw" => false,
            "gzip" | "gz" => true,
            other => return Err(VolumeIoError::Unsupported(format!("encoding `{other}`"))),
        };
        let big_endian = match get("endian") {
            Some("big") => true,
            Some("little") | None => false,
            Some(other) => return Err(VolumeIoError::Header(format!("endian `{other}`"))),
        };

        // 缺省空间视为 LPS.
        let is_ras = match get("space") {
            Some("right-anterior-superior") | Some("RAS") => true,
            Some("left-posterior-superior") | Some("LPS") | None => false,
            Some(other) => return Err(VolumeIoError::Unsupported(format!("space `{other}`"))),
        };
        let to_ras = |v: Vec3| if is_ras { v } else { lps_to_ras(v) };

        let origin = match get("space origin") {
            Some(s) => to_ras(parse_vector(s)?),
            None => [0.0; 3],
        };
        let (spacing, directions) = match get("space directions") {
            Some(s) => {
                let vs = parse_vectors(s)?.map(to_ras);
                let mut spacing = [0.0; 3];
                let mut dirs = [[0.0; 3]; 3];
                for (c, v) in vs.iter().enumerate() {
                    spacing[c] = v.iter().map(|x| x * x).sum::<f64>().sqrt();
                    for r in 0..3 {
                        dirs[r][c] = v[r];
                    }
                }
                (spacing, dirs)
            }
            None => {
                let spacing = match get("spacings") {
                    Some(s) => parse_three("spacings", s)?,
                    None => [1.0; 3],
                };
                let sign = if is_ras { 1.0 } else { -1.0 };
                let dirs = [[sign, 0.0, 0.0], [0.0, sign, 0.0], [0.0, 0.0, 1.0]];
                (spacing, dirs)
            }
        };
        let geometry = Geometry::new(dims, spacing, origin, directions)?;
        Ok(Self {
            sample,
            dims,
            geometry,
            gzip,
            big_endian,
        })
    }
}

/// 读取 NRRD 文件, 返回几何信息和以 `(K, J, I)` 排列的数组.
fn read_nrrd<T: NrrdScalar>(path: &Path) -> IoResult<(Geometry, Array3<T>)> {
    let mut bytes = Vec::new();
    File::open(path)?.read_to_end(&mut bytes)?;

    let split = bytes
        .windows(2)
        .position(|w| w == b"\n\n")
        .map(|p| (p, p + 2))
        .or_else(|| {
            bytes
                .windows(4)
                .position(|w| w == b"\r\n\r\n")
                .map(|p| (p, p + 4))
        })
        .ok_or_else(|| VolumeIoError::Header("缺少头部结束空行".into()))?;
    let text = String::from_utf8_lossy(&bytes[..split.0]);
    let header = Header::parse(&text)?;
    log::debug!(
        "NRRD {}: type {}, sizes {:?}, gzip {}",
        path.display(),
        header.sample.name(),
        header.dims,
        header.gzip
    );

    let payload = &bytes[split.1..];
    let raw: Vec<u8> = if header.gzip {
        let mut out = Vec::new();
        GzDecoder::new(payload).read_to_end(&mut out)?;
        out
    } else {
        payload.to_vec()
    };

    let n = header.geometry.size();
    let width = header.sample.width();
    if raw.len() < n * width {
        return Err(VolumeIoError::Size {
            expected: n,
            actual: raw.len() / width,
        });
    }
    let mut sample = [0u8; 8];
    let values: Vec<T> = raw[..n * width]
        .chunks_exact(width)
        .map(|b| {
            let s = &mut sample[..width];
            s.copy_from_slice(b);
            if header.big_endian {
                s.reverse();
            }
            T::from_f64(header.sample.decode(s))
        })
        .collect();
    // NRRD 中第一轴变化最快, 即 `(K, J, I)` 行优先.
    let data = Array3::from_shape_vec(header.geometry.shape(), values).map_err(|_| {
        VolumeIoError::Size {
            expected: n,
            actual: raw.len() / width,
        }
    })?;
    Ok((header.geometry, data))
}

/// 格式化向量.
fn fmt_vector([x, y, z]: Vec3) -> String {
    format!("({x},{y},{z})")
}

/// 以 gzip 编码, LPS 空间写出 NRRD 文件.
fn write_nrrd<T: NrrdScalar>(path: &Path, geometry: &Geometry, data: &Array3<T>) -> IoResult<()> {
    let [di, dj, dk] = geometry.dims();
    let dirs = geometry.directions();
    let spacing = geometry.spacing();
    let axis = |c: usize| {
        ras_to_lps([
            dirs[0][c] * spacing[c],
            dirs[1][c] * spacing[c],
            dirs[2][c] * spacing[c],
        ])
    };

    let mut w = BufWriter::new(File::create(path)?);
    writeln!(w, "NRRD0004")?;
    writeln!(w, "# Complete NRRD file format specification at:")?;
    writeln!(w, "# http://teem.sourceforge.net/nrrd/format.html")?;
    writeln!(w, "type: {}", T::SAMPLE)?;
    writeln!(w, "dimension: 3")?;
    writeln!(w, "space: left-posterior-superior")?;
    writeln!(w, "sizes: {di} {dj} {dk}")?;
    writeln!(
        w,
        "space directions: {} {} {}",
        fmt_vector(axis(0)),
        fmt_vector(axis(1)),
        fmt_vector(axis(2))
    )?;
    writeln!(w, "kinds: domain domain domain")?;
    writeln!(w, "endian: little")?;
    writeln!(w, "encoding: gzip")?;
    writeln!(w, "space origin: {}", fmt_vector(ras_to_lps(geometry.origin())))?;
    writeln!(w)?;

    let mut e = GzEncoder::new(w, Compression::fast());
    for v in data.iter() {
        v.write_le(&mut e)?;
    }
    e.finish()?.flush()?;
    Ok(())
}

macro_rules! impl_nrrd_io {
    ($volume: ident, $elem: ty) => {
        impl $volume {
            /// 打开 NRRD 文件 (头部与数据位于同一文件).
            /// 样本类型与体素类型不同时按 `as` 语义转换.
            pub fn open_nrrd<P: AsRef<Path>>(path: P) -> Result<Self, VolumeIoError> {
                let (geometry, data) = read_nrrd::<$elem>(path.as_ref())?;
                Ok(Self::from_parts(geometry, data))
            }

            /// 以 gzip 编码, LPS 空间写出 NRRD 文件.
            pub fn write_nrrd<P: AsRef<Path>>(&self, path: P) -> Result<(), VolumeIoError> {
                write_nrrd(path.as_ref(), self.geometry(), &self.data)
            }
        }
    };
}

impl_nrrd_io!(Volume, i16);
impl_nrrd_io!(LabelMap, u16);
impl_nrrd_io!(Field, f32);

#[cfg(test)]
mod tests {
    use super::*;

    fn float_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn test_parse_header_lps() {
        let text = "NRRD0004\n# comment\ntype: short\ndimension: 3\n\
            space: left-posterior-superior\nsizes: 4 5 6\n\
            space directions: (0.7,0,0) (0,0.7,0) (0,0,1.25)\n\
            kinds: domain domain domain\nendian: little\nencoding: raw\n\
            space origin: (10,20,-30)\nquantity:=HU";
        let h = Header::parse(text).unwrap();
        assert_eq!(h.sample, SampleType::I16);
        assert_eq!(h.dims, [4, 5, 6]);
        assert!(!h.gzip && !h.big_endian);
        let g = &h.geometry;
        assert_eq!(g.origin(), [-10.0, -20.0, -30.0]);
        assert!(float_eq(g.spacing()[0], 0.7));
        assert!(float_eq(g.spacing()[2], 1.25));
        // LPS 的 x 轴在 RAS 中为 -R.
        assert!(float_eq(g.directions()[0][0], -1.0));
        let ras = g.ijk_to_ras([1.0, 1.0, 1.0]);
        assert!(float_eq(ras[0], -10.7));
        assert!(float_eq(ras[1], -20.7));
        assert!(float_eq(ras[2], -28.75));
    }

    #[test]
    fn test_parse_header_errors() {
        assert!(matches!(
            Header::parse("PNG\n"),
            Err(VolumeIoError::Header(_))
        ));
        let detached = "NRRD0004\ntype: short\ndimension: 3\nsizes: 1 1 1\ndata file: x.raw";
        assert!(matches!(
            Header::parse(detached),
            Err(VolumeIoError::Unsupported(_))
        ));
        let bad_enc = "NRRD0004\ntype: short\ndimension: 3\nsizes: 1 1 1\nencoding: bzip2";
        assert!(matches!(
            Header::parse(bad_enc),
            Err(VolumeIoError::Unsupported(_))
        ));
        let two_d = "NRRD0004\ntype: short\ndimension: 2\nsizes: 1 1";
        assert!(matches!(
            Header::parse(two_d),
            Err(VolumeIoError::Unsupported(_))
        ));
    }

    #[test]
    fn test_read_raw_big_endian() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("be.nrrd");
        let mut bytes = b"NRRD0004\ntype: short\ndimension: 3\nspace: right-anterior-superior\n\
            sizes: 2 1 1\nspacings: 1 1 1\nendian: big\nencoding: raw\n\n"
            .to_vec();
        bytes.extend_from_slice(&(-1000i16).to_be_bytes());
        bytes.extend_from_slice(&(42i16).to_be_bytes());
        std::fs::write(&path, bytes).unwrap();

        let v = Volume::open_nrrd(&path).unwrap();
        assert_eq!(v.shape(), (1, 1, 2));
        assert_eq!(v[(0, 0, 0)], -1000);
        assert_eq!(v[(0, 0, 1)], 42);
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vol.nrrd");
        let (s, c) = 20f64.to_radians().sin_cos();
        let g = Geometry::new(
            [5, 4, 3],
            [0.5, 0.75, 2.0],
            [3.0, -4.0, 5.0],
            [[c, -s, 0.0], [s, c, 0.0], [0.0, 0.0, 1.0]],
        )
        .unwrap();
        let v = Volume::from_fn(g.clone(), |(k, j, i)| (k * 100 + j * 10 + i) as i16 - 1000);
        v.write_nrrd(&path).unwrap();

        let back = Volume::open_nrrd(&path).unwrap();
        assert_eq!(back.data(), v.data());
        let bg = back.geometry();
        for t in 0..3 {
            assert!(float_eq(bg.origin()[t], g.origin()[t]));
            assert!(float_eq(bg.spacing()[t], g.spacing()[t]));
            for r in 0..3 {
                assert!(float_eq(bg.directions()[r][t], g.directions()[r][t]));
            }
        }

        let f = Field::from_fn(g, |(k, _, i)| k as f32 * 0.5 - i as f32);
        let fpath = dir.path().join("field.nrrd");
        f.write_nrrd(&fpath).unwrap();
        assert_eq!(Field::open_nrrd(&fpath).unwrap(), f);
    }
}
