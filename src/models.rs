//! Core data models shared by the registry, the per-project loaders and the
//! reconciliation engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::LoaderError;

/// Globally unique, monotonically generated project identifier.
pub type ProjectId = i64;

/// Kind of annotation a project collects. Each kind has its own data table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnnotationType {
    BoundingBox,
    Segmentation,
}

impl AnnotationType {
    /// Integer code persisted in the `projects` table.
    pub fn code(self) -> i64 {
        match self {
            AnnotationType::BoundingBox => 0,
            AnnotationType::Segmentation => 1,
        }
    }

    pub fn from_code(code: i64) -> Result<Self, LoaderError> {
        match code {
            0 => Ok(AnnotationType::BoundingBox),
            1 => Ok(AnnotationType::Segmentation),
            other => Err(LoaderError::InvalidAnnotationType(other.to_string())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AnnotationType::BoundingBox => "BOUNDING_BOX",
            AnnotationType::Segmentation => "SEGMENTATION",
        }
    }

    pub fn table_name(self) -> &'static str {
        match self {
            AnnotationType::BoundingBox => "bounding_box_data",
            AnnotationType::Segmentation => "segmentation_data",
        }
    }
}

impl fmt::Display for AnnotationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnnotationType {
    type Err = LoaderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['_', '-'], "").as_str() {
            "bbox" | "boundingbox" => Ok(AnnotationType::BoundingBox),
            "seg" | "segmentation" => Ok(AnnotationType::Segmentation),
            _ => Err(LoaderError::InvalidAnnotationType(s.to_string())),
        }
    }
}

/// Immutable identity of a registered project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectIdentity {
    pub project_id: ProjectId,
    pub project_name: String,
    pub annotation_type: AnnotationType,
}

impl ProjectIdentity {
    pub fn key(&self) -> ProjectKey {
        ProjectKey::new(&self.project_name, self.annotation_type)
    }
}

/// Composite lookup key. Names compare exactly: no case folding, no trimming.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProjectKey {
    pub name: String,
    pub annotation_type: AnnotationType,
}

impl ProjectKey {
    pub fn new(name: &str, annotation_type: AnnotationType) -> Self {
        Self {
            name: name.to_string(),
            annotation_type,
        }
    }
}

/// Loader lifecycle. See [`LoaderStatus::can_transition_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LoaderStatus {
    #[default]
    Empty,
    Loading,
    Loaded,
    Error,
}

impl LoaderStatus {
    /// ```text
    /// EMPTY | LOADED | ERROR --(scan started)--> LOADING
    /// LOADING --(scan complete)--> EMPTY | LOADED
    /// *       --(fault)----------> ERROR
    /// ```
    pub fn can_transition_to(self, next: LoaderStatus) -> bool {
        use LoaderStatus::*;
        matches!(
            (self, next),
            (_, Error) | (Empty | Loaded | Error, Loading) | (Loading, Empty | Loaded)
        )
    }
}

impl fmt::Display for LoaderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoaderStatus::Empty => "EMPTY",
            LoaderStatus::Loading => "LOADING",
            LoaderStatus::Loaded => "LOADED",
            LoaderStatus::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// What the user asked the picker for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionKind {
    File,
    Folder,
}

impl FromStr for SelectionKind {
    type Err = LoaderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(SelectionKind::File),
            "folder" => Ok(SelectionKind::Folder),
            other => Err(LoaderError::UserDefined(format!(
                "Current input selector not allowed: {}. Allowed parameters are file/folder",
                other
            ))),
        }
    }
}

/// One persisted annotation row, as read back from storage.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDataPoint {
    pub uuid: Uuid,
    pub img_path: PathBuf,
    /// Geometry payload, opaque JSON text (`[]` for a fresh row).
    pub annotation: String,
    pub img_depth: i64,
    pub img_x: i64,
    pub img_y: i64,
    pub img_w: f64,
    pub img_h: f64,
    pub file_size: i64,
    pub img_ori_w: i64,
    pub img_ori_h: i64,
}

impl StoredDataPoint {
    /// Row written for a newly discovered file: path only, geometry zeroed.
    pub fn fresh(uuid: Uuid, img_path: PathBuf) -> Self {
        Self {
            uuid,
            img_path,
            annotation: "[]".to_string(),
            img_depth: 0,
            img_x: 0,
            img_y: 0,
            img_w: 0.0,
            img_h: 0.0,
            file_size: 0,
            img_ori_w: 0,
            img_ori_h: 0,
        }
    }
}

/// Image facts extracted by an [`ImageProbe`](crate::traits::ImageProbe).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageMetadata {
    pub width: u32,
    pub height: u32,
    pub depth: u8,
    /// `data:image/png;base64,...`
    pub thumbnail: String,
}

/// A data point as handed to the UI: stored row merged with live image facts.
#[derive(Debug, Clone, Serialize)]
pub struct DataPoint {
    pub uuid: Uuid,
    pub project_name: String,
    pub img_path: PathBuf,
    pub annotation: serde_json::Value,
    pub img_depth: u8,
    pub img_x: i64,
    pub img_y: i64,
    pub img_w: f64,
    pub img_h: f64,
    pub file_size: i64,
    pub img_ori_w: u32,
    pub img_ori_h: u32,
    pub img_thumbnail: String,
}

/// Annotation edit for one data point. Replaces every editable column.
///
/// `annotation` is stored as opaque JSON text; its geometry encoding belongs
/// to the UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPointUpdate {
    pub annotation: serde_json::Value,
    #[serde(default)]
    pub img_depth: i64,
    #[serde(default)]
    pub img_x: i64,
    #[serde(default)]
    pub img_y: i64,
    #[serde(default)]
    pub img_w: f64,
    #[serde(default)]
    pub img_h: f64,
    #[serde(default)]
    pub file_size: i64,
    #[serde(default)]
    pub img_ori_w: i64,
    #[serde(default)]
    pub img_ori_h: i64,
}

/// Full image of a data point, base64 encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageSource {
    pub uuid: Uuid,
    /// `data:<mime>;base64,...`
    pub img_src: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_defaults_missing_geometry_to_zero() {
        let update: DataPointUpdate =
            serde_json::from_str(r#"{ "annotation": [{"x1": 1}], "img_w": 2.5 }"#).unwrap();
        assert_eq!(update.annotation, serde_json::json!([{"x1": 1}]));
        assert_eq!(update.img_w, 2.5);
        assert_eq!((update.img_x, update.img_ori_w), (0, 0));
    }

    #[test]
    fn annotation_type_parses_cli_spellings() {
        for s in ["bbox", "BOUNDING_BOX", "bounding-box", "BoundingBox"] {
            assert_eq!(s.parse::<AnnotationType>().unwrap(), AnnotationType::BoundingBox);
        }
        for s in ["seg", "SEGMENTATION", "Segmentation"] {
            assert_eq!(s.parse::<AnnotationType>().unwrap(), AnnotationType::Segmentation);
        }
        assert!(matches!(
            "polygon".parse::<AnnotationType>(),
            Err(LoaderError::InvalidAnnotationType(_))
        ));
    }

    #[test]
    fn annotation_type_code_round_trips() {
        for t in [AnnotationType::BoundingBox, AnnotationType::Segmentation] {
            assert_eq!(AnnotationType::from_code(t.code()).unwrap(), t);
        }
        assert!(AnnotationType::from_code(7).is_err());
    }

    #[test]
    fn project_key_is_case_sensitive() {
        let a = ProjectKey::new("Cats", AnnotationType::BoundingBox);
        assert_ne!(a, ProjectKey::new("cats", AnnotationType::BoundingBox));
        assert_ne!(a, ProjectKey::new("Cats", AnnotationType::Segmentation));
        assert_eq!(a, ProjectKey::new("Cats", AnnotationType::BoundingBox));
    }

    #[test]
    fn loader_transitions() {
        use LoaderStatus::*;
        assert!(Empty.can_transition_to(Loading));
        assert!(Loaded.can_transition_to(Loading));
        assert!(Error.can_transition_to(Loading));
        assert!(Loading.can_transition_to(Empty));
        assert!(Loading.can_transition_to(Loaded));
        for s in [Empty, Loading, Loaded, Error] {
            assert!(s.can_transition_to(Error));
        }

        assert!(!Loading.can_transition_to(Loading));
        assert!(!Empty.can_transition_to(Loaded));
        assert!(!Loaded.can_transition_to(Empty));
        assert!(!Error.can_transition_to(Loaded));
    }

    #[test]
    fn selection_kind_rejects_unknown() {
        assert_eq!("file".parse::<SelectionKind>().unwrap(), SelectionKind::File);
        assert_eq!("folder".parse::<SelectionKind>().unwrap(), SelectionKind::Folder);
        assert!("drive".parse::<SelectionKind>().is_err());
    }
}
