use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use ndarray::Array3;

use super::{Geometry, LabelMap, VolumeAttr};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

impl LabelMap {
    /// 压缩数据.
    pub fn compress(&self) -> CompactLabelMap {
        let mut e = ZlibEncoder::new(Vec::with_capacity(64), Compression::fast());
        let mut count = 0usize;
        for v in self.data().iter() {
            count += usize::from(*v != 0);
            // 写入 Vec 不会失败.
            e.write_all(&v.to_le_bytes()).expect("Compression error");
        }
        CompactLabelMap {
            buf: e.finish().expect("Compression error"),
            geometry: self.geometry().clone(),
            foreground: count,
        }
    }
}

/// 压缩存储的 [`LabelMap`]; 不透明类型.
///
/// 球壳标签大部分体素为背景, 压缩后通常只占原大小的百分之一左右,
/// 因此结节记录中缓存的球壳均以该形式保存.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CompactLabelMap {
    /// 压缩的不透明字节流.
    buf: Vec<u8>,

    /// 几何信息.
    geometry: Geometry,

    /// 非零体素个数.
    foreground: usize,
}

impl CompactLabelMap {
    /// 解压缩数据.
    pub fn decompress(&self) -> LabelMap {
        let size = self.geometry.size();
        let mut d = ZlibDecoder::new(self.buf.as_slice());
        let mut raw = Vec::with_capacity(size * 2);
        // 字节流由 `compress` 生成, 解压不会失败.
        d.read_to_end(&mut raw).expect("Decompression error");
        debug_assert_eq!(raw.len(), size * 2);
        let data: Vec<u16> = raw
            .chunks_exact(2)
            .map(|b| u16::from_le_bytes([b[0], b[1]]))
            .collect();
        let data = Array3::from_shape_vec(self.geometry.shape(), data)
            .expect("Decompression error");
        LabelMap::from_parts(self.geometry.clone(), data)
    }

    /// 几何信息.
    #[inline]
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// 非零体素个数. 无需解压.
    #[inline]
    pub fn foreground(&self) -> usize {
        self.foreground
    }

    /// 压缩后的字节数.
    #[inline]
    pub fn compressed_len(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use crate::{Geometry, LabelMap, VolumeAttr};

    #[test]
    fn test_compress_lossless() {
        let g = Geometry::centered([20, 16, 12], [1.0, 1.0, 2.0]).unwrap();
        let lm = LabelMap::from_fn(g, |(k, j, i)| if (k + j + i) % 7 == 0 { 513 } else { 0 });
        let c = lm.compress();
        assert_eq!(c.foreground(), lm.data().iter().filter(|v| **v != 0).count());
        assert!(c.compressed_len() < lm.size() * 2);
        let back = c.decompress();
        assert_eq!(back, lm);
    }
}
