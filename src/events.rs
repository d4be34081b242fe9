//! 事件格式转换 (Event-Format Converter)
//!
//! 厂商 HDF5 (`/CD/events` 复合数据集, 字段 x/y/p/t)
//! → 标准列式容器 (`/events/{x,y,t,p}`, 类型 u16/u16/u64/u8)。
//! 可选 180 度翻转: `x' = W-1-x`, `y' = H-1-y`。

use std::fs;
use std::path::{Path, PathBuf};

use hdf5::H5Type;
use ndarray::Array1;
use tracing::{info, warn};

use crate::error::{PipelineError, Result};

pub const EVENTS_DIR: &str = "events";
pub const VENDOR_EXTENSION: &str = "hdf5";
pub const VENDOR_DATASET: &str = "CD/events";
pub const OUTPUT_FILE: &str = "events.h5";
pub const OUTPUT_GROUP: &str = "events";

/// 厂商事件记录的内存布局
///
/// 使用宽整数字段, 由 HDF5 按字段名完成类型转换,
/// 因此文件中各字段的实际位宽不影响读取。
#[derive(H5Type, Clone, Copy, Debug, PartialEq)]
#[repr(C)]
struct VendorEvent {
    x: i64,
    y: i64,
    p: i64,
    t: i64,
}

/// 列式事件数据
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EventColumns {
    pub x: Array1<u16>,
    pub y: Array1<u16>,
    pub t: Array1<u64>,
    pub p: Array1<u8>,
}

impl EventColumns {
    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// 坐标超出 `width × height` 的事件数
    pub fn count_out_of_range(&self, width: u16, height: u16) -> usize {
        self.x
            .iter()
            .zip(self.y.iter())
            .filter(|&(&x, &y)| x >= width || y >= height)
            .count()
    }

    /// 180 度翻转全部坐标
    pub fn flip(&mut self, width: u16, height: u16) {
        self.x.mapv_inplace(|x| flip_coordinate(x, width));
        self.y.mapv_inplace(|y| flip_coordinate(y, height));
    }
}

/// `size - 1 - v`, 按 u16 回绕运算, 两次调用还原原值
pub fn flip_coordinate(v: u16, size: u16) -> u16 {
    size.wrapping_sub(1).wrapping_sub(v)
}

/// 查找 `<sequence>/events/` 下唯一的 `.hdf5` 文件
pub fn locate_event_file(sequence_dir: &Path) -> Result<PathBuf> {
    let events_dir = sequence_dir.join(EVENTS_DIR);
    if !events_dir.is_dir() {
        return Err(PipelineError::NoEventFile(events_dir));
    }

    let entries = fs::read_dir(&events_dir).map_err(|e| PipelineError::io(&events_dir, e))?;
    let mut found: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == VENDOR_EXTENSION))
        .collect();
    found.sort();

    match found.len() {
        0 => Err(PipelineError::NoEventFile(events_dir)),
        1 => Ok(found.remove(0)),
        _ => Err(PipelineError::AmbiguousEventFile(found)),
    }
}

/// 读取厂商事件数据集并转换为列式数据 (直接截断转换, 不取整)
pub fn read_vendor_events(path: &Path) -> Result<EventColumns> {
    let file = hdf5::File::open(path)?;
    let dataset = file
        .dataset(VENDOR_DATASET)
        .map_err(|_| PipelineError::MissingDataset {
            path: path.to_path_buf(),
            dataset: format!("/{}", VENDOR_DATASET),
        })?;
    let events = dataset.read_raw::<VendorEvent>()?;

    Ok(EventColumns {
        x: events.iter().map(|e| e.x as u16).collect(),
        y: events.iter().map(|e| e.y as u16).collect(),
        t: events.iter().map(|e| e.t as u64).collect(),
        p: events.iter().map(|e| e.p as u8).collect(),
    })
}

/// 写出标准容器: group `events`, 数据集 x/y/t/p
pub fn write_events(path: &Path, columns: &EventColumns) -> Result<()> {
    let file = hdf5::File::create(path)?;
    let group = file.create_group(OUTPUT_GROUP)?;
    group.new_dataset_builder().with_data(&columns.x).create("x")?;
    group.new_dataset_builder().with_data(&columns.y).create("y")?;
    group.new_dataset_builder().with_data(&columns.t).create("t")?;
    group.new_dataset_builder().with_data(&columns.p).create("p")?;
    file.flush()?;
    Ok(())
}

/// 读取标准容器的四列
pub fn read_events(path: &Path) -> Result<EventColumns> {
    let file = hdf5::File::open(path)?;
    let dataset = |name: &str| {
        let full = format!("{}/{}", OUTPUT_GROUP, name);
        file.dataset(&full).map_err(|_| PipelineError::MissingDataset {
            path: path.to_path_buf(),
            dataset: format!("/{}", full),
        })
    };

    let columns = EventColumns {
        x: dataset("x")?.read_1d::<u16>()?,
        y: dataset("y")?.read_1d::<u16>()?,
        t: dataset("t")?.read_1d::<u64>()?,
        p: dataset("p")?.read_1d::<u8>()?,
    };
    let n = columns.len();
    if columns.y.len() != n || columns.t.len() != n || columns.p.len() != n {
        return Err(PipelineError::Config {
            path: path.to_path_buf(),
            reason: "event columns have different lengths".into(),
        });
    }
    Ok(columns)
}

/// 转换一个序列的事件文件
///
/// 输入文件缺失或不唯一时返回错误且不写任何文件。
/// 默认输出 `<sequence>/events/events.h5`。
pub fn convert(
    sequence_dir: &Path,
    width: u16,
    height: u16,
    flip: bool,
    output: Option<&Path>,
) -> Result<PathBuf> {
    let input = locate_event_file(sequence_dir)?;
    info!("✅ found event file: {}", input.display());

    let mut columns = read_vendor_events(&input)?;

    let out_of_range = columns.count_out_of_range(width, height);
    if out_of_range > 0 {
        warn!(
            "⚠️ {} of {} events fall outside {}x{}",
            out_of_range,
            columns.len(),
            width,
            height
        );
    }

    if flip {
        columns.flip(width, height);
        info!("🔄 applied 180° flip ({}x{})", width, height);
    }

    let output = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| sequence_dir.join(EVENTS_DIR).join(OUTPUT_FILE));
    write_events(&output, &columns)?;
    info!("💾 saved {} events to {}", columns.len(), output.display());
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// 典型厂商布局: x/y 为 u16, p 为 i16, t 为 i64
    #[derive(H5Type, Clone, Copy)]
    #[repr(C)]
    struct RawEvent {
        x: u16,
        y: u16,
        p: i16,
        t: i64,
    }

    fn write_vendor(path: &Path, events: &[RawEvent]) {
        let file = hdf5::File::create(path).unwrap();
        let cd = file.create_group("CD").unwrap();
        cd.new_dataset_builder()
            .with_data(events)
            .create("events")
            .unwrap();
    }

    fn sequence_with(events: &[RawEvent]) -> tempfile::TempDir {
        let seq = tempfile::tempdir().unwrap();
        let dir = seq.path().join(EVENTS_DIR);
        fs::create_dir_all(&dir).unwrap();
        write_vendor(&dir.join("recording.hdf5"), events);
        seq
    }

    fn read_column<T: H5Type>(path: &Path, name: &str) -> Vec<T> {
        let file = hdf5::File::open(path).unwrap();
        file.dataset(&format!("{}/{}", OUTPUT_GROUP, name))
            .unwrap()
            .read_raw::<T>()
            .unwrap()
    }

    #[test]
    fn test_convert_without_flip() {
        let seq = sequence_with(&[
            RawEvent { x: 0, y: 0, p: 1, t: 100 },
            RawEvent { x: 639, y: 10, p: 0, t: 150 },
        ]);
        let output = convert(seq.path(), 640, 480, false, None).unwrap();
        assert_eq!(output, seq.path().join(EVENTS_DIR).join(OUTPUT_FILE));

        assert_eq!(read_column::<u16>(&output, "x"), vec![0, 639]);
        assert_eq!(read_column::<u16>(&output, "y"), vec![0, 10]);
        assert_eq!(read_column::<u64>(&output, "t"), vec![100, 150]);
        assert_eq!(read_column::<u8>(&output, "p"), vec![1, 0]);

        let file = hdf5::File::open(&output).unwrap();
        assert_eq!(file.dataset("events/x").unwrap().dtype().unwrap().size(), 2);
        assert_eq!(file.dataset("events/t").unwrap().dtype().unwrap().size(), 8);
        assert_eq!(file.dataset("events/p").unwrap().dtype().unwrap().size(), 1);
    }

    #[test]
    fn test_convert_with_flip() {
        let seq = sequence_with(&[RawEvent { x: 0, y: 0, p: 1, t: 100 }]);
        let output = seq.path().join("flipped.h5");
        convert(seq.path(), 640, 480, true, Some(&output)).unwrap();

        assert_eq!(read_column::<u16>(&output, "x"), vec![639]);
        assert_eq!(read_column::<u16>(&output, "y"), vec![479]);
        assert_eq!(read_column::<u64>(&output, "t"), vec![100]);
        assert_eq!(read_column::<u8>(&output, "p"), vec![1]);
    }

    #[test]
    fn test_missing_event_file() {
        let seq = tempfile::tempdir().unwrap();
        fs::create_dir_all(seq.path().join(EVENTS_DIR)).unwrap();
        assert!(matches!(
            convert(seq.path(), 640, 480, false, None),
            Err(PipelineError::NoEventFile(_))
        ));
        assert!(!seq.path().join(EVENTS_DIR).join(OUTPUT_FILE).exists());
    }

    #[test]
    fn test_ambiguous_event_files() {
        let seq = sequence_with(&[RawEvent { x: 1, y: 1, p: 0, t: 1 }]);
        write_vendor(
            &seq.path().join(EVENTS_DIR).join("second.hdf5"),
            &[RawEvent { x: 2, y: 2, p: 0, t: 2 }],
        );
        match convert(seq.path(), 640, 480, false, None) {
            Err(PipelineError::AmbiguousEventFile(files)) => assert_eq!(files.len(), 2),
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(!seq.path().join(EVENTS_DIR).join(OUTPUT_FILE).exists());
    }

    #[test]
    fn test_missing_dataset() {
        let seq = tempfile::tempdir().unwrap();
        let dir = seq.path().join(EVENTS_DIR);
        fs::create_dir_all(&dir).unwrap();
        hdf5::File::create(dir.join("empty.hdf5"))
            .unwrap()
            .create_group("CD")
            .unwrap();
        assert!(matches!(
            convert(seq.path(), 640, 480, false, None),
            Err(PipelineError::MissingDataset { .. })
        ));
    }

    #[test]
    fn test_read_events_requires_all_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(OUTPUT_FILE);
        let file = hdf5::File::create(&path).unwrap();
        file.create_group(OUTPUT_GROUP)
            .unwrap()
            .new_dataset_builder()
            .with_data(&[1u16, 2][..])
            .create("x")
            .unwrap();
        drop(file);

        match read_events(&path) {
            Err(PipelineError::MissingDataset { dataset, .. }) => assert_eq!(dataset, "/events/y"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_out_of_range_is_counted_not_repaired() {
        let mut columns = EventColumns {
            x: Array1::from(vec![10, 700, 5]),
            y: Array1::from(vec![10, 10, 480]),
            t: Array1::from(vec![1, 2, 3]),
            p: Array1::from(vec![0, 1, 0]),
        };
        assert_eq!(columns.count_out_of_range(640, 480), 2);
        columns.flip(640, 480);
        columns.flip(640, 480);
        assert_eq!(columns.x.to_vec(), vec![10, 700, 5]);
        assert_eq!(columns.y.to_vec(), vec![10, 10, 480]);
    }

    proptest! {
        #[test]
        fn prop_flip_is_involution(v in any::<u16>(), size in 1u16..=u16::MAX) {
            prop_assert_eq!(flip_coordinate(flip_coordinate(v, size), size), v);
        }

        #[test]
        fn prop_flip_stays_in_frame(w in 1u16..2048, h in 1u16..2048, fx in 0.0f64..1.0, fy in 0.0f64..1.0) {
            let x = ((w as f64 - 1.0) * fx) as u16;
            let y = ((h as f64 - 1.0) * fy) as u16;
            prop_assert!(flip_coordinate(x, w) < w);
            prop_assert!(flip_coordinate(y, h) < h);
        }
    }
}
