//! 🍇欢迎光临🍓
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::{Idx3d, Vec3};

pub use crate::data::{
    BoundingBox, CompactLabelMap, CtWindow, Field, Geometry, LabelMap, Volume, VolumeAttr,
};
pub use crate::data::geometry::{lps_to_ras, ras_to_lps, AcquisitionScale};

pub use crate::cancel::{CancelToken, Progress, Silent};
pub use crate::error::{CoreError, CoreResult};

pub use crate::seeds::{GeometryTopologyData, LesionType, SeedSet};
pub use crate::segment::{
    segment, AnalysisTarget, Case, ConnectedThresholdLevelSet, DistanceMap, ExternalSegmenter,
    LevelSetProvider, NoduleRecord, NoduleState, SegmentConfig, SegmentationHandle,
};

pub use crate::features::{extract, AuxMasks, Feature, FeatureClass, FeatureSelection};
pub use crate::parenchyma::{HistogramMode, LungSplitter, ParenchymaAnalyzer, RegionTable, ThirdsSplitter};
pub use crate::report::{FeatureRecord, MaskKind, NoduleReport, ParenchymaReport};

pub use crate::dataset::{self, case_dir_from_env_or_home, CaseFiles};
