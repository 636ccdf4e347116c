//! File-based storage helpers for the coding manager
//!
//! All durable state is plain JSON/YAML on disk:
//!
//! Project-local storage (`.coding-manager/` in project root):
//! - `config.yaml` - Loop, backend and learning settings
//!
//! Global user storage (`~/.coding-manager/`):
//! - `learning/` - Prompt history, keyword and feedback maps

use std::fs;
use std::path::{Path, PathBuf};

/// Common file operations result type
pub type FileResult<T> = Result<T, String>;

/// Name of the per-project and per-user storage directory
pub const STORAGE_DIR_NAME: &str = ".coding-manager";

/// Get the .coding-manager directory for a project
pub fn get_project_dir(project_path: &Path) -> PathBuf {
    project_path.join(STORAGE_DIR_NAME)
}

/// Get the global .coding-manager directory in user home
pub fn get_global_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(STORAGE_DIR_NAME)
}

/// Default location of the learning store files
pub fn default_learning_dir() -> PathBuf {
    get_global_dir().join("learning")
}

/// Ensure a directory exists, creating it if necessary
pub fn ensure_dir(path: &Path) -> FileResult<()> {
    if !path.exists() {
        fs::create_dir_all(path)
            .map_err(|e| format!("Failed to create directory {:?}: {}", path, e))?;
    }
    Ok(())
}

/// Write data to a file atomically (temp file + rename)
pub fn atomic_write(path: &Path, content: &str) -> FileResult<()> {
    let temp_path = path.with_extension("tmp");

    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }

    fs::write(&temp_path, content)
        .map_err(|e| format!("Failed to write temp file {:?}: {}", temp_path, e))?;

    fs::rename(&temp_path, path)
        .map_err(|e| format!("Failed to rename {:?} to {:?}: {}", temp_path, path, e))?;

    Ok(())
}

/// Read a JSON file and deserialize it
pub fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> FileResult<T> {
    let content = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read file {:?}: {}", path, e))?;

    serde_json::from_str(&content)
        .map_err(|e| format!("Failed to parse JSON from {:?}: {}", path, e))
}

/// Read a JSON file if it exists, returning `None` when it does not
pub fn read_json_opt<T: serde::de::DeserializeOwned>(path: &Path) -> FileResult<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    read_json(path).map(Some)
}

/// Write data as pretty-printed JSON atomically
pub fn write_json<T: serde::Serialize>(path: &Path, data: &T) -> FileResult<()> {
    let content = serde_json::to_string_pretty(data)
        .map_err(|e| format!("Failed to serialize to JSON: {}", e))?;

    atomic_write(path, &content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_get_project_dir() {
        let project_path = Path::new("/home/user/my-project");
        let dir = get_project_dir(project_path);
        assert_eq!(dir, PathBuf::from("/home/user/my-project/.coding-manager"));
    }

    #[test]
    fn test_ensure_dir() {
        let temp_dir = TempDir::new().unwrap();
        let nested_path = temp_dir.path().join("a").join("b").join("c");

        assert!(!nested_path.exists());
        ensure_dir(&nested_path).unwrap();
        assert!(nested_path.exists());
    }

    #[test]
    fn test_atomic_write_creates_parent() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("nested").join("test.txt");

        atomic_write(&file_path, "Hello, World!").unwrap();

        assert!(file_path.exists());
        assert!(!file_path.with_extension("tmp").exists());
        let content = fs::read_to_string(&file_path).unwrap();
        assert_eq!(content, "Hello, World!");
    }

    #[test]
    fn test_read_write_json() {
        use serde::{Deserialize, Serialize};

        #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
        struct TestData {
            name: String,
            value: i32,
        }

        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("test.json");

        let data = TestData {
            name: "test".to_string(),
            value: 42,
        };

        write_json(&file_path, &data).unwrap();
        let read_data: TestData = read_json(&file_path).unwrap();

        assert_eq!(data, read_data);
    }

    #[test]
    fn test_read_json_opt_missing() {
        let temp_dir = TempDir::new().unwrap();
        let missing: Option<Vec<String>> =
            read_json_opt(&temp_dir.path().join("missing.json")).unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_read_json_invalid() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("bad.json");
        fs::write(&file_path, "{not json").unwrap();

        let result: FileResult<Vec<String>> = read_json(&file_path);
        assert!(result.unwrap_err().contains("Failed to parse JSON"));
    }
}
