//! Project registration and active-project selection.

use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use indexmap::IndexMap;
use serde::Serialize;

use crate::error::CoreError;

/// A local repository the daemon can run workflows for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    pub root_path: PathBuf,
}

impl Project {
    /// Build a project from a directory, deriving id and name from its
    /// final path component.
    pub fn from_path(root: impl Into<PathBuf>) -> Self {
        let root_path = root.into();
        let name = root_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| root_path.display().to_string());
        Self {
            id: slugify(&name),
            name,
            root_path,
        }
    }

    pub fn with_id(id: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        let mut project = Self::from_path(root);
        project.id = id.into();
        project
    }

    pub fn root(&self) -> &Path {
        &self.root_path
    }
}

/// Resolves project ids to filesystem roots and tracks the active project.
pub trait ProjectStore: Send + Sync {
    fn list(&self) -> Vec<Project>;

    fn get(&self, id: &str) -> Option<Project>;

    fn active(&self) -> Option<Project>;

    fn select(&self, id: &str) -> Result<Project, CoreError>;

    /// The explicitly requested project, else the active one.
    fn resolve(&self, explicit: Option<&str>) -> Result<Project, CoreError> {
        match explicit {
            Some(id) => self
                .get(id)
                .ok_or_else(|| CoreError::Validation(format!("unknown project '{id}'"))),
            None => self.active().ok_or(CoreError::NoActiveProject),
        }
    }
}

/// Process-local project store populated at daemon start.
#[derive(Default)]
pub struct InMemoryProjectStore {
    projects: RwLock<IndexMap<String, Project>>,
    active: RwLock<Option<String>>,
}

impl InMemoryProjectStore {
    pub fn new(projects: impl IntoIterator<Item = Project>, active: Option<String>) -> Self {
        let projects: IndexMap<String, Project> =
            projects.into_iter().map(|p| (p.id.clone(), p)).collect();
        let active = active.filter(|id| projects.contains_key(id));
        Self {
            projects: RwLock::new(projects),
            active: RwLock::new(active),
        }
    }

    /// Register projects and make the first one active.
    pub fn with_first_active(projects: impl IntoIterator<Item = Project>) -> Self {
        let projects: Vec<Project> = projects.into_iter().collect();
        let active = projects.first().map(|p| p.id.clone());
        Self::new(projects, active)
    }
}

impl ProjectStore for InMemoryProjectStore {
    fn list(&self) -> Vec<Project> {
        self.projects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    fn get(&self, id: &str) -> Option<Project> {
        self.projects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    fn active(&self) -> Option<Project> {
        let active = self
            .active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()?;
        self.get(&active)
    }

    fn select(&self, id: &str) -> Result<Project, CoreError> {
        let project = self.get(id).ok_or_else(|| CoreError::NotFound {
            entity: "project",
            id: id.to_string(),
        })?;
        *self.active.write().unwrap_or_else(PoisonError::into_inner) = Some(project.id.clone());
        Ok(project)
    }
}

/// Parse a `id=path,id=path` list. Entries without `id=` derive their id
/// from the directory name.
pub fn parse_project_list(raw: &str) -> Vec<Project> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| match entry.split_once('=') {
            Some((id, path)) => Project::with_id(id.trim(), path.trim()),
            None => Project::from_path(entry),
        })
        .collect()
}

fn slugify(name: &str) -> String {
    let slug: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    let slug = slug.trim_matches('-').to_string();
    if slug.is_empty() {
        "project".to_string()
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn store() -> InMemoryProjectStore {
        InMemoryProjectStore::new(
            [
                Project::with_id("api", "/src/api"),
                Project::with_id("web", "/src/web"),
            ],
            None,
        )
    }

    #[test]
    fn from_path_derives_slug_id() {
        let p = Project::from_path("/home/me/My Repo");
        assert_eq!(p.id, "my-repo");
        assert_eq!(p.name, "My Repo");
    }

    #[test]
    fn resolve_without_active_project_fails() {
        let store = store();
        assert_matches!(store.resolve(None), Err(CoreError::NoActiveProject));
    }

    #[test]
    fn resolve_prefers_explicit_id() {
        let store = store();
        store.select("web").unwrap();
        assert_eq!(store.resolve(Some("api")).unwrap().id, "api");
        assert_eq!(store.resolve(None).unwrap().id, "web");
    }

    #[test]
    fn unknown_explicit_project_is_validation_error() {
        assert_matches!(store().resolve(Some("nope")), Err(CoreError::Validation(_)));
    }

    #[test]
    fn select_unknown_project_keeps_previous() {
        let store = store();
        store.select("api").unwrap();
        assert_matches!(store.select("nope"), Err(CoreError::NotFound { .. }));
        assert_eq!(store.active().unwrap().id, "api");
    }

    #[test]
    fn first_registered_becomes_active() {
        let store = InMemoryProjectStore::with_first_active(parse_project_list(
            "svc=/work/svc, /work/Other Thing",
        ));
        assert_eq!(store.active().unwrap().id, "svc");
        let ids: Vec<String> = store.list().into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec!["svc", "other-thing"]);
    }
}
