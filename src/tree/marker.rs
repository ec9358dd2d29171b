//! The per-folder task marker.
//!
//! A folder is a task iff it contains [`MARKER_FILE`]. The marker is a flat
//! TOML table: `type` names the task type and every other key is a persisted
//! setting.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{IoContext, Result, TreeError};

/// File name of the marker inside a task folder.
pub const MARKER_FILE: &str = ".task.toml";

const TYPE_KEY: &str = "type";

/// The structural role recorded in a task marker.
///
/// - `Project`: root of a tree, may contain tasks
/// - `TaskGroup`: may contain tasks
/// - `Task`: any other type tag (`TASK`, `PLUGIN`, `DECK`, ...)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TaskType {
    Project,
    TaskGroup,
    Task(String),
}

impl TaskType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Project => "PROJECT",
            Self::TaskGroup => "TASK_GROUP",
            Self::Task(tag) => tag,
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.trim() {
            "PROJECT" => Self::Project,
            "TASK_GROUP" => Self::TaskGroup,
            "" => Self::task(),
            other => Self::Task(other.to_string()),
        }
    }

    /// The generic `TASK` type.
    pub fn task() -> Self {
        Self::Task("TASK".to_string())
    }

    /// Whether folders of this type may hold child tasks.
    pub fn can_contain_tasks(&self) -> bool {
        matches!(self, Self::Project | Self::TaskGroup)
    }
}

/// Decoded contents of a marker file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    pub task_type: TaskType,
    pub settings: BTreeMap<String, String>,
}

impl Marker {
    pub fn new(task_type: TaskType) -> Self {
        Self {
            task_type,
            settings: BTreeMap::new(),
        }
    }

    pub fn path_in(folder: &Path) -> PathBuf {
        folder.join(MARKER_FILE)
    }

    /// Read the marker of `folder`, or `None` if the folder has none.
    pub fn read(folder: &Path) -> Result<Option<Self>> {
        let path = Self::path_in(folder);
        match fs::read_to_string(&path) {
            Ok(text) => Self::parse(&text, &path).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) if e.kind() == ErrorKind::NotADirectory => Ok(None),
            Err(e) => Err(TreeError::io(&path, e)),
        }
    }

    pub fn write(&self, folder: &Path) -> Result<()> {
        let path = Self::path_in(folder);
        let text = self.encode(&path)?;
        fs::write(&path, text).at(&path)
    }

    fn parse(text: &str, path: &Path) -> Result<Self> {
        let table: toml::Table = text.parse().map_err(|source| TreeError::Marker {
            path: path.to_path_buf(),
            source,
        })?;

        let mut task_type = TaskType::task();
        let mut settings = BTreeMap::new();
        for (key, value) in table {
            let value = match value {
                toml::Value::String(s) => s,
                other => other.to_string(),
            };
            if key == TYPE_KEY {
                task_type = TaskType::from_str(&value);
            } else {
                settings.insert(key, value);
            }
        }

        Ok(Self {
            task_type,
            settings,
        })
    }

    fn encode(&self, path: &Path) -> Result<String> {
        let mut table: BTreeMap<&str, &str> = self
            .settings
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        table.insert(TYPE_KEY, self.task_type.as_str());

        toml::to_string(&table).map_err(|source| TreeError::MarkerWrite {
            path: path.to_path_buf(),
            source,
        })
    }

    pub(crate) fn is_reserved(key: &str) -> bool {
        key == TYPE_KEY
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn type_tags_map_to_node_kinds() {
        assert_eq!(TaskType::from_str("PROJECT"), TaskType::Project);
        assert_eq!(TaskType::from_str("TASK_GROUP"), TaskType::TaskGroup);
        assert_eq!(
            TaskType::from_str("PLUGIN"),
            TaskType::Task("PLUGIN".to_string())
        );
        assert_eq!(TaskType::from_str(""), TaskType::task());
        assert!(TaskType::Project.can_contain_tasks());
        assert!(!TaskType::task().can_contain_tasks());
    }

    #[test]
    fn parses_type_and_settings() {
        let marker = Marker::parse(
            "type = \"TASK_GROUP\"\nauthor = \"ada\"\nrevision = 3\n",
            Path::new("x"),
        )
        .unwrap();
        assert_eq!(marker.task_type, TaskType::TaskGroup);
        assert_eq!(marker.settings.get("author").map(String::as_str), Some("ada"));
        assert_eq!(marker.settings.get("revision").map(String::as_str), Some("3"));
        assert!(!marker.settings.contains_key("type"));
    }

    #[test]
    fn missing_type_is_a_plain_task() {
        let marker = Marker::parse("name = \"x\"\n", Path::new("x")).unwrap();
        assert_eq!(marker.task_type, TaskType::task());
    }

    #[test]
    fn rejects_malformed_marker() {
        let err = Marker::parse("type = = PROJECT", Path::new("bad")).unwrap_err();
        assert!(matches!(err, TreeError::Marker { .. }));
    }

    #[test]
    fn write_then_read_keeps_settings() {
        let dir = TempDir::new().unwrap();
        let mut marker = Marker::new(TaskType::Project);
        marker.settings.insert("locale".into(), "en_CA".into());
        marker.write(dir.path()).unwrap();

        let text = fs::read_to_string(Marker::path_in(dir.path())).unwrap();
        assert!(text.contains("type = \"PROJECT\""));
        assert_eq!(Marker::read(dir.path()).unwrap(), Some(marker));
    }

    #[test]
    fn folder_without_marker_reads_none() {
        let dir = TempDir::new().unwrap();
        assert_eq!(Marker::read(dir.path()).unwrap(), None);
    }
}
