//! 类别过滤策略
//!
//! 两种策略并存, 由调用方选择:
//! - 类名白名单: 检测器类ID按 COCO 类名解析后与白名单比较
//! - 配置类ID:   `classes.yaml` 中 `classes: [{id, name}]` 列出的ID才保留

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

use phf::phf_map;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{PipelineError, Result};

pub const CLASSES_YAML: &str = "classes.yaml";

/// COCO 类名 (80类, 按类ID排列)
pub const COCO_NAMES: [&str; 80] = [
    "person",
    "bicycle",
    "car",
    "motorcycle",
    "airplane",
    "bus",
    "train",
    "truck",
    "boat",
    "traffic light",
    "fire hydrant",
    "stop sign",
    "parking meter",
    "bench",
    "bird",
    "cat",
    "dog",
    "horse",
    "sheep",
    "cow",
    "elephant",
    "bear",
    "zebra",
    "giraffe",
    "backpack",
    "umbrella",
    "handbag",
    "tie",
    "suitcase",
    "frisbee",
    "skis",
    "snowboard",
    "sports ball",
    "kite",
    "baseball bat",
    "baseball glove",
    "skateboard",
    "surfboard",
    "tennis racket",
    "bottle",
    "wine glass",
    "cup",
    "fork",
    "knife",
    "spoon",
    "bowl",
    "banana",
    "apple",
    "sandwich",
    "orange",
    "broccoli",
    "carrot",
    "hot dog",
    "pizza",
    "donut",
    "cake",
    "chair",
    "couch",
    "potted plant",
    "bed",
    "dining table",
    "toilet",
    "tv",
    "laptop",
    "mouse",
    "remote",
    "keyboard",
    "cell phone",
    "microwave",
    "oven",
    "toaster",
    "sink",
    "refrigerator",
    "book",
    "clock",
    "vase",
    "scissors",
    "teddy bear",
    "hair drier",
    "toothbrush",
];

static COCO_IDS: phf::Map<&'static str, i32> = phf_map! {
    "person" => 0,
    "bicycle" => 1,
    "car" => 2,
    "motorcycle" => 3,
    "airplane" => 4,
    "bus" => 5,
    "train" => 6,
    "truck" => 7,
    "boat" => 8,
    "traffic light" => 9,
    "fire hydrant" => 10,
    "stop sign" => 11,
    "parking meter" => 12,
    "bench" => 13,
    "bird" => 14,
    "cat" => 15,
    "dog" => 16,
    "horse" => 17,
    "sheep" => 18,
    "cow" => 19,
    "elephant" => 20,
    "bear" => 21,
    "zebra" => 22,
    "giraffe" => 23,
    "backpack" => 24,
    "umbrella" => 25,
    "handbag" => 26,
    "tie" => 27,
    "suitcase" => 28,
    "frisbee" => 29,
    "skis" => 30,
    "snowboard" => 31,
    "sports ball" => 32,
    "kite" => 33,
    "baseball bat" => 34,
    "baseball glove" => 35,
    "skateboard" => 36,
    "surfboard" => 37,
    "tennis racket" => 38,
    "bottle" => 39,
    "wine glass" => 40,
    "cup" => 41,
    "fork" => 42,
    "knife" => 43,
    "spoon" => 44,
    "bowl" => 45,
    "banana" => 46,
    "apple" => 47,
    "sandwich" => 48,
    "orange" => 49,
    "broccoli" => 50,
    "carrot" => 51,
    "hot dog" => 52,
    "pizza" => 53,
    "donut" => 54,
    "cake" => 55,
    "chair" => 56,
    "couch" => 57,
    "potted plant" => 58,
    "bed" => 59,
    "dining table" => 60,
    "toilet" => 61,
    "tv" => 62,
    "laptop" => 63,
    "mouse" => 64,
    "remote" => 65,
    "keyboard" => 66,
    "cell phone" => 67,
    "microwave" => 68,
    "oven" => 69,
    "toaster" => 70,
    "sink" => 71,
    "refrigerator" => 72,
    "book" => 73,
    "clock" => 74,
    "vase" => 75,
    "scissors" => 76,
    "teddy bear" => 77,
    "hair drier" => 78,
    "toothbrush" => 79,
};

/// 类ID → COCO 类名
pub fn coco_name(class_id: i32) -> Option<&'static str> {
    usize::try_from(class_id)
        .ok()
        .and_then(|i| COCO_NAMES.get(i).copied())
}

/// COCO 类名 → 类ID
pub fn coco_id(name: &str) -> Option<i32> {
    COCO_IDS.get(name).copied()
}

/// 类别配置中的一项
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassEntry {
    pub id: i32,
    pub name: String,
}

#[derive(Debug, Default, Deserialize)]
struct ClassesDoc {
    #[serde(default)]
    classes: Vec<ClassEntry>,
}

/// 类别过滤策略
#[derive(Clone, Debug, PartialEq)]
pub enum ClassPolicy {
    /// 不过滤
    AllowAll,
    /// 类名白名单 (COCO 类名)
    Names(HashSet<String>),
    /// 配置的类ID映射
    Ids(BTreeMap<i32, String>),
}

impl ClassPolicy {
    /// 类名白名单; 空列表表示不过滤
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Self {
        if names.is_empty() {
            return Self::AllowAll;
        }
        let set: HashSet<String> = names.iter().map(|n| n.as_ref().to_string()).collect();
        for name in &set {
            if coco_id(name).is_none() {
                warn!("⚠️ class {:?} is not a COCO class name, it will never match", name);
            }
        }
        Self::Names(set)
    }

    /// 从类别配置文件加载; 文件不存在时不过滤
    pub fn from_config(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!("⚠️ class config {} not found, keeping all classes", path.display());
            return Ok(Self::AllowAll);
        }
        let text = fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
        let doc: Option<ClassesDoc> =
            serde_yaml::from_str(&text).map_err(|source| PipelineError::Yaml {
                path: path.to_path_buf(),
                source,
            })?;
        let map: BTreeMap<i32, String> = doc
            .unwrap_or_default()
            .classes
            .into_iter()
            .map(|c| (c.id, c.name))
            .collect();
        info!("✅ loaded {} classes from {}", map.len(), path.display());
        Ok(Self::Ids(map))
    }

    /// 该类ID是否保留
    pub fn allows(&self, class_id: i32) -> bool {
        match self {
            Self::AllowAll => true,
            Self::Names(names) => coco_name(class_id).is_some_and(|n| names.contains(n)),
            Self::Ids(map) => map.contains_key(&class_id),
        }
    }

    /// 显示用类名
    pub fn class_name(&self, class_id: i32) -> String {
        if let Self::Ids(map) = self {
            if let Some(name) = map.get(&class_id) {
                return name.clone();
            }
        }
        coco_name(class_id)
            .map(str::to_string)
            .unwrap_or_else(|| format!("class{}", class_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_CLASSES;

    #[test]
    fn test_coco_tables_agree() {
        for (i, name) in COCO_NAMES.iter().enumerate() {
            assert_eq!(coco_id(name), Some(i as i32));
        }
        assert_eq!(coco_name(2), Some("car"));
        assert_eq!(coco_name(-1), None);
        assert_eq!(coco_name(80), None);
    }

    #[test]
    fn test_default_names_policy() {
        let policy = ClassPolicy::from_names(&DEFAULT_CLASSES);
        assert!(policy.allows(0)); // person
        assert!(policy.allows(2)); // car
        assert!(policy.allows(5)); // bus
        assert!(!policy.allows(7)); // truck
        assert!(!policy.allows(999));
    }

    #[test]
    fn test_empty_names_allow_all() {
        let policy = ClassPolicy::from_names::<&str>(&[]);
        assert_eq!(policy, ClassPolicy::AllowAll);
        assert!(policy.allows(42));
    }

    #[test]
    fn test_configured_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CLASSES_YAML);
        fs::write(
            &path,
            "classes:\n  - {id: 0, name: pedestrian}\n  - {id: 2, name: vehicle}\n",
        )
        .unwrap();
        let policy = ClassPolicy::from_config(&path).unwrap();
        assert!(policy.allows(0));
        assert!(policy.allows(2));
        assert!(!policy.allows(1));
        assert_eq!(policy.class_name(2), "vehicle");
        assert_eq!(policy.class_name(1), "bicycle");
    }

    #[test]
    fn test_missing_config_is_permissive() {
        let dir = tempfile::tempdir().unwrap();
        let policy = ClassPolicy::from_config(&dir.path().join(CLASSES_YAML)).unwrap();
        assert!(policy.allows(77));
    }

    #[test]
    fn test_malformed_config_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CLASSES_YAML);
        fs::write(&path, "classes: [{id: x}]").unwrap();
        assert!(matches!(
            ClassPolicy::from_config(&path),
            Err(PipelineError::Yaml { .. })
        ));
    }
}
