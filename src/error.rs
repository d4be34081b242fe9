//! 流水线错误类型
//! Error taxonomy for the labeling pipeline

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum PipelineError {
    // ========== 配置错误 ==========
    #[error("invalid configuration {path}: {reason}")]
    Config { path: PathBuf, reason: String },

    #[error("failed to parse YAML {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to parse JSON {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("camera {camera} not found in homography config")]
    UnknownCamera { camera: String },

    // ========== 输入完整性错误 ==========
    #[error("offset table not found: {0}")]
    MissingOffsets(PathBuf),

    #[error("offset table is empty: {0}")]
    EmptyOffsets(PathBuf),

    #[error("offset table {path} line {line}: {value:?} is not an integer")]
    InvalidOffset {
        path: PathBuf,
        line: usize,
        value: String,
    },

    #[error("no camera directories found in {0}")]
    NoCameraDirs(PathBuf),

    #[error("labels directory not found: {0}")]
    LabelsDirMissing(PathBuf),

    #[error("no per-camera label files found in {0}")]
    NoTrackFiles(PathBuf),

    #[error("no event file found in {0}")]
    NoEventFile(PathBuf),

    #[error("multiple .hdf5 event files found: {0:?}")]
    AmbiguousEventFile(Vec<PathBuf>),

    #[error("dataset {dataset} not found in {path}")]
    MissingDataset { path: PathBuf, dataset: String },

    // ========== 数值错误 (单条记录, 不致命) ==========
    #[error("projected box is not finite")]
    InvalidProjection,

    // ========== 终止错误 ==========
    #[error("no valid fused records for sequence {0}")]
    NoFusedRecords(PathBuf),

    // ========== 底层错误 ==========
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("image error on {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("npy error on {path}: {source}")]
    Npy {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("hdf5 error: {0}")]
    Hdf5(#[from] hdf5::Error),
}

impl PipelineError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn npy(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Npy {
            path: path.into(),
            source,
        }
    }

    /// 终止错误: 整个序列失败
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::NoFusedRecords(_))
    }

    /// 必需输入格式错误: 时间戳表不可用, 或事件文件不唯一
    pub fn is_malformed_input(&self) -> bool {
        matches!(
            self,
            Self::MissingOffsets(_)
                | Self::EmptyOffsets(_)
                | Self::InvalidOffset { .. }
                | Self::AmbiguousEventFile(_)
        )
    }

    /// 批处理中导致非零退出的错误; 其余错误只跳过当前单元
    pub fn is_fatal(&self) -> bool {
        self.is_terminal() || self.is_malformed_input()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(PipelineError::NoFusedRecords(PathBuf::from("seq")).is_fatal());
        assert!(PipelineError::MissingOffsets(PathBuf::from("seq/image_offsets.txt")).is_fatal());
        assert!(PipelineError::InvalidOffset {
            path: PathBuf::from("seq/image_offsets.txt"),
            line: 3,
            value: "abc".into(),
        }
        .is_fatal());
        assert!(PipelineError::AmbiguousEventFile(vec![PathBuf::from("a.hdf5"), PathBuf::from("b.hdf5")]).is_fatal());

        assert!(!PipelineError::NoEventFile(PathBuf::from("seq/events")).is_fatal());
        assert!(!PipelineError::NoTrackFiles(PathBuf::from("seq/labels")).is_fatal());
        assert!(!PipelineError::UnknownCamera { camera: "camera9".into() }.is_fatal());
    }
}
