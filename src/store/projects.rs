//! Project records, the roots of the ownership tree.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;

use crate::core::errors::{ChatError, ChatResult};
use crate::core::ids::ProjectId;

/// Name of the per-project metadata file.
const PROJECT_FILE: &str = "project.json";

/// A project. Projects form a forest via `parent_id`; cycles are rejected.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Project {
    /// Stable identifier.
    pub id: ProjectId,
    /// Display name.
    pub name: String,
    /// Optional description.
    pub description: Option<String>,
    /// Optional parent project.
    pub parent_id: Option<ProjectId>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Project {
    /// Create a project record.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: ProjectId::new(),
            name: name.into(),
            description: None,
            parent_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the parent project.
    #[must_use]
    pub fn with_parent(mut self, parent_id: ProjectId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }
}

/// File-backed project store under `<data>/projects/`.
pub struct ProjectStore {
    root: PathBuf,
    locks: DashMap<ProjectId, Arc<Mutex<()>>>,
}

impl ProjectStore {
    /// Open the store under the data directory.
    ///
    /// # Errors
    /// Returns an error if the projects directory cannot be created.
    pub fn new(data_dir: &Path) -> ChatResult<Self> {
        let root = data_dir.join("projects");
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            locks: DashMap::new(),
        })
    }

    /// Create a project.
    ///
    /// # Errors
    /// Fails if the name is empty, the parent does not exist, or the record
    /// cannot be written.
    pub async fn create(&self, project: Project) -> ChatResult<Project> {
        if project.name.trim().is_empty() {
            return Err(ChatError::InvalidArgument(
                "project name must not be empty".to_string(),
            ));
        }
        if let Some(parent_id) = &project.parent_id {
            if !self.exists(parent_id) {
                return Err(ChatError::ProjectNotFound(parent_id.clone()));
            }
        }

        let lock = self.lock_for(&project.id);
        let _guard = lock.lock().await;
        self.write(&project)?;
        info!("Created project {} ({})", project.name, project.id);
        Ok(project)
    }

    /// Look up a project by id.
    ///
    /// # Errors
    /// Returns an error if the record exists but cannot be read.
    pub fn get(&self, project_id: &ProjectId) -> ChatResult<Option<Project>> {
        let raw = match fs::read_to_string(self.record_path(project_id)) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }

    /// Whether a project record exists.
    #[must_use]
    pub fn exists(&self, project_id: &ProjectId) -> bool {
        self.record_path(project_id).is_file()
    }

    /// List all projects, oldest first.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be read.
    pub fn list(&self) -> ChatResult<Vec<Project>> {
        let mut projects = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            let record = path.join(PROJECT_FILE);
            if !record.is_file() {
                continue;
            }
            let raw = fs::read_to_string(&record)?;
            projects.push(serde_json::from_str::<Project>(&raw)?);
        }
        projects.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(projects)
    }

    /// Replace a project record, bumping `updated_at`.
    ///
    /// # Errors
    /// Fails with `project_not_found` for unknown ids, and
    /// `invalid_argument` when the new parent chain would form a cycle.
    pub async fn update(&self, mut project: Project) -> ChatResult<Project> {
        let lock = self.lock_for(&project.id);
        let _guard = lock.lock().await;

        if !self.exists(&project.id) {
            return Err(ChatError::ProjectNotFound(project.id));
        }
        if let Some(parent_id) = &project.parent_id {
            self.check_no_cycle(&project.id, parent_id)?;
        }

        project.updated_at = Utc::now();
        self.write(&project)?;
        Ok(project)
    }

    /// Delete a project record.
    ///
    /// Refuses while sessions remain under the project: the session cascade
    /// is an explicit store operation, not a recursive directory removal.
    ///
    /// # Errors
    /// Fails with `project_not_found` for unknown ids and
    /// `invalid_argument` when sessions remain.
    pub async fn delete(&self, project_id: &ProjectId) -> ChatResult<()> {
        let lock = self.lock_for(project_id);
        let _guard = lock.lock().await;

        if !self.exists(project_id) {
            return Err(ChatError::ProjectNotFound(project_id.clone()));
        }

        let sessions_dir = self.project_dir(project_id).join("chat_sessions");
        if sessions_dir.is_dir() && fs::read_dir(&sessions_dir)?.next().is_some() {
            return Err(ChatError::InvalidArgument(format!(
                "project {project_id} still has sessions; cascade them first"
            )));
        }

        if sessions_dir.is_dir() {
            fs::remove_dir(&sessions_dir)?;
        }
        fs::remove_file(self.record_path(project_id))?;
        fs::remove_dir(self.project_dir(project_id))?;
        drop(_guard);
        self.locks.remove(project_id);
        info!("Deleted project {project_id}");
        Ok(())
    }

    /// Walk the ancestor chain from `parent_id`; reaching `project_id`
    /// again means the update would close a cycle.
    fn check_no_cycle(&self, project_id: &ProjectId, parent_id: &ProjectId) -> ChatResult<()> {
        let mut cursor = Some(parent_id.clone());
        while let Some(current) = cursor {
            if current == *project_id {
                return Err(ChatError::InvalidArgument(format!(
                    "project {project_id} cannot be its own ancestor"
                )));
            }
            cursor = match self.get(&current)? {
                Some(ancestor) => ancestor.parent_id,
                None => return Err(ChatError::ProjectNotFound(current)),
            };
        }
        Ok(())
    }

    fn project_dir(&self, project_id: &ProjectId) -> PathBuf {
        self.root.join(project_id.as_str())
    }

    fn record_path(&self, project_id: &ProjectId) -> PathBuf {
        self.project_dir(project_id).join(PROJECT_FILE)
    }

    fn write(&self, project: &Project) -> ChatResult<()> {
        let dir = self.project_dir(&project.id);
        fs::create_dir_all(&dir)?;
        let path = self.record_path(&project.id);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(project)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn lock_for(&self, project_id: &ProjectId) -> Arc<Mutex<()>> {
        self.locks
            .entry(project_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
