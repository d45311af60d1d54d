//! GeometryTopologyData XML 文档读写.
//!
//! 每个病例一份文档. 结构如下:
//!
//! ```xml
//! <GeometryTopologyData>
//!   <CoordinateSystem>LPS</CoordinateSystem>
//!   <Spacing><value>0.7</value>...</Spacing>
//!   <Origin>...</Origin>
//!   <Dimensions>...</Dimensions>
//!   <LpsToIjkTransformationMatrix><value>..16 个..</value></LpsToIjkTransformationMatrix>
//!   <Point>
//!     <ChestRegion>0</ChestRegion>
//!     <ChestType>0</ChestType>
//!     <Feature>0</Feature>
//!     <Description>1-Nodule</Description>
//!     <Coordinate><value>1</value><value>2</value><value>3</value></Coordinate>
//!   </Point>
//! </GeometryTopologyData>
//! ```

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use thiserror::Error;

use super::LesionType;
use crate::Vec3;

/// 种子 XML 读写错误.
#[derive(Error, Debug)]
pub enum SeedIoError {
    /// 底层 I/O 错误.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// XML 语法错误.
    #[error("XML error: {0}")]
    Xml(String),

    /// 缺少必要元素.
    #[error("missing element <{0}>")]
    Missing(&'static str),

    /// 元素内容非法.
    #[error("invalid <{element}>: `{value}`")]
    Invalid {
        /// 元素名.
        element: &'static str,
        /// 原始文本.
        value: String,
    },
}

type SeedIoResult<T> = Result<T, SeedIoError>;

/// 文档使用的坐标系.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CoordinateSystem {
    /// 体素索引.
    Ijk,
    /// 左-后-上.
    Lps,
    /// 右-前-上.
    Ras,
}

impl fmt::Display for CoordinateSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ijk => "IJK",
            Self::Lps => "LPS",
            Self::Ras => "RAS",
        })
    }
}

impl FromStr for CoordinateSystem {
    type Err = SeedIoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "IJK" => Ok(Self::Ijk),
            "LPS" => Ok(Self::Lps),
            "RAS" => Ok(Self::Ras),
            other => Err(SeedIoError::Invalid {
                element: "CoordinateSystem",
                value: other.to_string(),
            }),
        }
    }
}

/// 文档中的一个点.
#[derive(Clone, Debug, PartialEq)]
pub struct TopologyPoint {
    /// chest region 编码.
    pub chest_region: u8,
    /// chest type 编码.
    pub chest_type: u8,
    /// 特征编码.
    pub feature: i32,
    /// 坐标, 坐标系由文档决定.
    pub coordinate: Vec3,
    /// 描述, 形如 `"<noduleIndex>-<Unknown|Nodule|Tumor>"`.
    pub description: String,
}

impl TopologyPoint {
    /// 创建描述为 `"{index}-{lesion_type}"` 的点.
    pub fn seed(index: usize, lesion_type: LesionType, coordinate: Vec3) -> Self {
        Self {
            chest_region: 0,
            chest_type: 0,
            feature: 0,
            coordinate,
            description: format!("{index}-{lesion_type}"),
        }
    }

    /// 从描述中解析结节编号和病灶类型.
    pub fn nodule(&self) -> SeedIoResult<(usize, LesionType)> {
        let invalid = || SeedIoError::Invalid {
            element: "Description",
            value: self.description.clone(),
        };
        let (idx, ty) = self.description.split_once('-').ok_or_else(invalid)?;
        let idx = idx.trim().parse::<usize>().map_err(|_| invalid())?;
        let ty = ty.parse::<LesionType>().map_err(|_| invalid())?;
        Ok((idx, ty))
    }
}

/// GeometryTopologyData 文档.
#[derive(Clone, Debug, PartialEq)]
pub struct GeometryTopologyData {
    /// 坐标系.
    pub coordinate_system: CoordinateSystem,
    /// 体数据间距.
    pub spacing: Option<Vec3>,
    /// 体数据原点 (与 `coordinate_system` 一致).
    pub origin: Option<Vec3>,
    /// 体数据尺寸.
    pub dimensions: Option<Vec3>,
    /// LPS -> IJK 仿射矩阵, 行优先.
    pub lps_to_ijk: Option<[f64; 16]>,
    /// 所有点, 保持文档顺序.
    pub points: Vec<TopologyPoint>,
}

impl Default for GeometryTopologyData {
    fn default() -> Self {
        Self {
            coordinate_system: CoordinateSystem::Lps,
            spacing: None,
            origin: None,
            dimensions: None,
            lps_to_ijk: None,
            points: Vec::new(),
        }
    }
}

/// 解析过程中正在填充的点.
#[derive(Default)]
struct PartialPoint {
    chest_region: Option<u8>,
    chest_type: Option<u8>,
    feature: Option<i32>,
    coordinate: Vec<f64>,
    description: Option<String>,
}

impl PartialPoint {
    fn finish(self) -> SeedIoResult<TopologyPoint> {
        let coordinate: Vec3 = self
            .coordinate
            .as_slice()
            .try_into()
            .map_err(|_| SeedIoError::Invalid {
                element: "Coordinate",
                value: format!("{:?}", self.coordinate),
            })?;
        Ok(TopologyPoint {
            chest_region: self.chest_region.unwrap_or(0),
            chest_type: self.chest_type.unwrap_or(0),
            feature: self.feature.unwrap_or(0),
            coordinate,
            description: self.description.ok_or(SeedIoError::Missing("Description"))?,
        })
    }
}

fn parse_num<T: FromStr>(element: &'static str, text: &str) -> SeedIoResult<T> {
    text.trim().parse::<T>().map_err(|_| SeedIoError::Invalid {
        element,
        value: text.to_string(),
    })
}

fn to_vec3(element: &'static str, v: Vec<f64>) -> SeedIoResult<Vec3> {
    v.as_slice().try_into().map_err(|_| SeedIoError::Invalid {
        element,
        value: format!("{v:?}"),
    })
}

fn xml_err<E: fmt::Display>(e: E) -> SeedIoError {
    SeedIoError::Xml(e.to_string())
}

impl GeometryTopologyData {
    /// 从字符串解析文档.
    pub fn from_xml(text: &str) -> SeedIoResult<Self> {
        let mut reader = Reader::from_str(text);
        reader.trim_text(true);

        let mut doc = Self::default();
        let mut seen_root = false;
        let mut coordinate_system = None;
        let mut stack: Vec<String> = Vec::new();
        let mut values: Vec<f64> = Vec::new();
        let mut point: Option<PartialPoint> = None;

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    match name.as_str() {
                        "GeometryTopologyData" => seen_root = true,
                        "Point" => point = Some(PartialPoint::default()),
                        "Spacing" | "Origin" | "Dimensions" | "LpsToIjkTransformationMatrix"
                        | "Coordinate" => values.clear(),
                        _ => {}
                    }
                    stack.push(name);
                }
                Ok(Event::End(_)) => {
                    let Some(name) = stack.pop() else {
                        return Err(SeedIoError::Xml("unbalanced end tag".into()));
                    };
                    let v = std::mem::take(&mut values);
                    match name.as_str() {
                        "Spacing" => doc.spacing = Some(to_vec3("Spacing", v)?),
                        "Origin" => doc.origin = Some(to_vec3("Origin", v)?),
                        "Dimensions" => doc.dimensions = Some(to_vec3("Dimensions", v)?),
                        "LpsToIjkTransformationMatrix" => {
                            let m: [f64; 16] =
                                v.as_slice().try_into().map_err(|_| SeedIoError::Invalid {
                                    element: "LpsToIjkTransformationMatrix",
                                    value: format!("{v:?}"),
                                })?;
                            doc.lps_to_ijk = Some(m);
                        }
                        "Coordinate" => {
                            if let Some(p) = point.as_mut() {
                                p.coordinate = v;
                            }
                        }
                        "Point" => {
                            if let Some(p) = point.take() {
                                doc.points.push(p.finish()?);
                            }
                        }
                        // `<value>` 的数值需要保留到父元素结束.
                        "value" => values = v,
                        _ => {}
                    }
                }
                Ok(Event::Text(t)) => {
                    let text = t.unescape().map_err(xml_err)?;
                    let parent = stack.last().map(String::as_str);
                    match parent {
                        Some("value") => values.push(parse_num("value", &text)?),
                        Some("CoordinateSystem") => coordinate_system = Some(text.parse()?),
                        Some("ChestRegion") => {
                            if let Some(p) = point.as_mut() {
                                p.chest_region = Some(parse_num("ChestRegion", &text)?);
                            }
                        }
                        Some("ChestType") => {
                            if let Some(p) = point.as_mut() {
                                p.chest_type = Some(parse_num("ChestType", &text)?);
                            }
                        }
                        Some("Feature") => {
                            if let Some(p) = point.as_mut() {
                                p.feature = Some(parse_num("Feature", &text)?);
                            }
                        }
                        Some("Description") => {
                            if let Some(p) = point.as_mut() {
                                p.description = Some(text.into_owned());
                            }
                        }
                        _ => {}
                    }
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(SeedIoError::Xml(format!(
                        "at byte {}: {e}",
                        reader.buffer_position()
                    )))
                }
                _ => {}
            }
        }

        if !seen_root {
            return Err(SeedIoError::Missing("GeometryTopologyData"));
        }
        doc.coordinate_system = coordinate_system.ok_or(SeedIoError::Missing("CoordinateSystem"))?;
        Ok(doc)
    }

    /// 读取文档文件.
    pub fn open<P: AsRef<Path>>(path: P) -> SeedIoResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_xml(&text)
    }

    /// 序列化为 XML 字符串.
    pub fn to_xml(&self) -> SeedIoResult<String> {
        let mut w = Writer::new_with_indent(Vec::new(), b' ', 2);
        w.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(xml_err)?;
        w.write_event(Event::Start(BytesStart::new("GeometryTopologyData")))
            .map_err(xml_err)?;

        write_text(&mut w, "CoordinateSystem", &self.coordinate_system.to_string())?;
        if let Some(v) = &self.spacing {
            write_values(&mut w, "Spacing", v)?;
        }
        if let Some(v) = &self.origin {
            write_values(&mut w, "Origin", v)?;
        }
        if let Some(v) = &self.dimensions {
            write_values(&mut w, "Dimensions", v)?;
        }
        if let Some(m) = &self.lps_to_ijk {
            write_values(&mut w, "LpsToIjkTransformationMatrix", m)?;
        }
        for p in self.points.iter() {
            w.write_event(Event::Start(BytesStart::new("Point")))
                .map_err(xml_err)?;
            write_text(&mut w, "ChestRegion", &p.chest_region.to_string())?;
            write_text(&mut w, "ChestType", &p.chest_type.to_string())?;
            write_text(&mut w, "Feature", &p.feature.to_string())?;
            write_text(&mut w, "Description", &p.description)?;
            write_values(&mut w, "Coordinate", &p.coordinate)?;
            w.write_event(Event::End(BytesEnd::new("Point")))
                .map_err(xml_err)?;
        }

        w.write_event(Event::End(BytesEnd::new("GeometryTopologyData")))
            .map_err(xml_err)?;
        String::from_utf8(w.into_inner()).map_err(xml_err)
    }

    /// 写出文档文件.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> SeedIoResult<()> {
        std::fs::write(path, self.to_xml()?)?;
        Ok(())
    }
}

fn write_text(w: &mut Writer<Vec<u8>>, name: &str, text: &str) -> SeedIoResult<()> {
    w.write_event(Event::Start(BytesStart::new(name)))
        .map_err(xml_err)?;
    w.write_event(Event::Text(BytesText::new(text)))
        .map_err(xml_err)?;
    w.write_event(Event::End(BytesEnd::new(name)))
        .map_err(xml_err)?;
    Ok(())
}

fn write_values(w: &mut Writer<Vec<u8>>, name: &str, values: &[f64]) -> SeedIoResult<()> {
    w.write_event(Event::Start(BytesStart::new(name)))
        .map_err(xml_err)?;
    for v in values {
        write_text(w, "value", &v.to_string())?;
    }
    w.write_event(Event::End(BytesEnd::new(name)))
        .map_err(xml_err)?;
    Ok(())
}
