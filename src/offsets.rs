//! 帧时间戳表 (`image_offsets.txt`, 每行一个整数, 按帧顺序)

use std::fs;
use std::path::Path;

use crate::error::{PipelineError, Result};

pub const OFFSETS_FILE: &str = "image_offsets.txt";

/// 超出表长度的帧使用的时间戳
pub const MISSING_TIMESTAMP: i64 = -1;

#[derive(Debug, Clone, PartialEq)]
pub struct OffsetTable {
    timestamps: Vec<i64>,
}

impl OffsetTable {
    pub fn new(timestamps: Vec<i64>) -> Self {
        Self { timestamps }
    }

    /// 加载时间戳表; 文件缺失、为空或含非整数行都是错误
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PipelineError::MissingOffsets(path.to_path_buf()));
        }
        let text = fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;

        let mut timestamps = Vec::new();
        for (idx, line) in text.lines().enumerate() {
            let value = line.trim();
            if value.is_empty() {
                continue;
            }
            let t = value
                .parse::<i64>()
                .map_err(|_| PipelineError::InvalidOffset {
                    path: path.to_path_buf(),
                    line: idx + 1,
                    value: value.to_string(),
                })?;
            timestamps.push(t);
        }

        if timestamps.is_empty() {
            return Err(PipelineError::EmptyOffsets(path.to_path_buf()));
        }
        Ok(Self { timestamps })
    }

    /// 第 `index` 帧的时间戳, 表耗尽时为 -1
    pub fn timestamp(&self, index: usize) -> i64 {
        self.timestamps
            .get(index)
            .copied()
            .unwrap_or(MISSING_TIMESTAMP)
    }

    pub fn as_slice(&self) -> &[i64] {
        &self.timestamps
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_and_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(OFFSETS_FILE);
        fs::write(&path, "100\n 250 \n\n-30\n").unwrap();
        let table = OffsetTable::load(&path).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.timestamp(0), 100);
        assert_eq!(table.timestamp(1), 250);
        assert_eq!(table.timestamp(2), -30);
        assert_eq!(table.timestamp(3), MISSING_TIMESTAMP);
    }

    #[test]
    fn test_missing_empty_and_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(OFFSETS_FILE);
        assert!(matches!(
            OffsetTable::load(&path),
            Err(PipelineError::MissingOffsets(_))
        ));

        fs::write(&path, "\n\n").unwrap();
        assert!(matches!(
            OffsetTable::load(&path),
            Err(PipelineError::EmptyOffsets(_))
        ));

        fs::write(&path, "1\n2.5\n").unwrap();
        assert!(matches!(
            OffsetTable::load(&path),
            Err(PipelineError::InvalidOffset { line: 2, .. })
        ));
    }
}
