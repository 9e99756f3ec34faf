//! Durable per-document workspaces ("projects").
//!
//! Layout under the projects directory:
//!
//! ```text
//! <projects_dir>/<name>/
//!   .project_info.json   metadata (temp name, official name, source, working dir)
//!   src/                 working directory handed to the agent
//!   logs/                one log per execution attempt
//! ```
//!
//! The source document path is the lookup key; at most one project exists
//! per source path.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub const PROJECT_INFO_FILE: &str = ".project_info.json";
pub const WORKDIR_NAME: &str = "src";
pub const LOGS_DIR_NAME: &str = "logs";
const TEMP_NAME_FORMAT: &str = "%Y%m%d_%H%M%S";

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("project {0} already exists")]
    AlreadyExists(String),
    #[error("project {0} was already renamed")]
    AlreadyRenamed(String),
    #[error("invalid project name {0:?}")]
    InvalidName(String),
    #[error("project {0} not found")]
    NotFound(String),
    #[error("project {name} left inconsistent: {detail}")]
    Inconsistent { name: String, detail: String },
    #[error("{action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("metadata {}: {source}", path.display())]
    Metadata {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl RegistryError {
    fn io(action: &'static str, path: &Path, source: std::io::Error) -> Self {
        RegistryError::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Persisted project metadata (`.project_info.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectInfo {
    /// Timestamp-derived name assigned at creation. Never changes.
    pub temp_name: String,
    /// Human-assigned name, set by the single allowed rename.
    pub official_name: Option<String>,
    /// Document this project was created for. Lookup key.
    pub source_file: PathBuf,
    pub working_directory: PathBuf,
    pub created_at: DateTime<Local>,
}

/// A project directory together with its metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    /// Directory name under the projects dir; the project's identity.
    pub dir_name: String,
    pub path: PathBuf,
    pub info: ProjectInfo,
}

impl Project {
    /// Official name when set, otherwise the temporary name.
    pub fn display_name(&self) -> &str {
        self.info
            .official_name
            .as_deref()
            .unwrap_or(&self.info.temp_name)
    }

    pub fn working_directory(&self) -> &Path {
        &self.info.working_directory
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.path.join(LOGS_DIR_NAME)
    }
}

/// Owns the projects directory and interns project handles.
pub struct ProjectRegistry {
    projects_dir: PathBuf,
    interned: HashMap<String, Arc<Project>>,
}

impl ProjectRegistry {
    pub fn open(projects_dir: &Path) -> Result<Self, RegistryError> {
        fs::create_dir_all(projects_dir)
            .map_err(|e| RegistryError::io("create projects dir", projects_dir, e))?;
        Ok(Self {
            projects_dir: projects_dir.to_path_buf(),
            interned: HashMap::new(),
        })
    }

    pub fn projects_dir(&self) -> &Path {
        &self.projects_dir
    }

    /// Find the project created for `source` by exact path equality.
    ///
    /// Repeated lookups of an unchanged project return the same `Arc`.
    pub fn find_by_source(&mut self, source: &Path) -> Result<Option<Arc<Project>>, RegistryError> {
        for project in self.scan()? {
            if project.info.source_file == source {
                return Ok(Some(self.intern(project)));
            }
        }
        Ok(None)
    }

    /// Create a project for `source` named after the current time.
    ///
    /// Callers must check [`find_by_source`](Self::find_by_source) first.
    pub fn create(&mut self, source: &Path) -> Result<Arc<Project>, RegistryError> {
        self.create_at(source, Local::now())
    }

    /// Create a project using `now` for its name and creation time.
    ///
    /// When another project already claimed the same second, `_2`, `_3`, …
    /// is appended. The directory is claimed with an exclusive create.
    pub fn create_at(
        &mut self,
        source: &Path,
        now: DateTime<Local>,
    ) -> Result<Arc<Project>, RegistryError> {
        let base = format!("project_{}", now.format(TEMP_NAME_FORMAT));
        let (name, path) = self.claim_dir(&base)?;

        let info = match populate_project(&path, &name, source, now) {
            Ok(info) => info,
            Err(err) => {
                warn!(project = %name, err = %err, "project setup failed, releasing name");
                if let Err(cleanup_err) = fs::remove_dir_all(&path) {
                    error!(project = %name, err = %cleanup_err, "failed to remove half-created project");
                }
                return Err(err);
            }
        };
        info!(project = %name, source = %source.display(), "created project");

        Ok(self.intern(Project {
            dir_name: name,
            path,
            info,
        }))
    }

    /// Rename `project` to `new_name`, moving its directory.
    ///
    /// Fails with `AlreadyExists` when the target directory exists, leaving
    /// both projects untouched. A failed metadata write moves the directory
    /// back; if that also fails the error is `Inconsistent`.
    pub fn rename(
        &mut self,
        project: &Project,
        new_name: &str,
    ) -> Result<Arc<Project>, RegistryError> {
        validate_name(new_name)?;
        let current = self.load(&project.dir_name)?;
        if current.info.official_name.is_some() {
            return Err(RegistryError::AlreadyRenamed(
                current.display_name().to_string(),
            ));
        }

        let new_path = self.projects_dir.join(new_name);
        if new_path.exists() {
            return Err(RegistryError::AlreadyExists(new_name.to_string()));
        }

        fs::rename(&current.path, &new_path)
            .map_err(|e| RegistryError::io("move project", &current.path, e))?;

        let mut info = current.info.clone();
        info.official_name = Some(new_name.to_string());
        info.working_directory = new_path.join(WORKDIR_NAME);

        if let Err(write_err) = write_info(&new_path, &info) {
            warn!(project = %current.dir_name, err = %write_err, "metadata write failed, rolling back rename");
            if let Err(rollback_err) = fs::rename(&new_path, &current.path) {
                error!(project = %current.dir_name, err = %rollback_err, "rename rollback failed");
                return Err(RegistryError::Inconsistent {
                    name: current.dir_name.clone(),
                    detail: format!(
                        "directory moved to {} but metadata write failed ({write_err}) and rollback failed ({rollback_err})",
                        new_path.display()
                    ),
                });
            }
            return Err(write_err);
        }

        info!(from = %current.dir_name, to = %new_name, "renamed project");
        self.interned.remove(&current.dir_name);
        Ok(self.intern(Project {
            dir_name: new_name.to_string(),
            path: new_path,
            info,
        }))
    }

    /// Fresh metadata for the project in directory `dir_name`.
    pub fn get_info(&self, dir_name: &str) -> Result<ProjectInfo, RegistryError> {
        Ok(self.load(dir_name)?.info)
    }

    pub fn get_working_directory(&self, dir_name: &str) -> Result<PathBuf, RegistryError> {
        Ok(self.load(dir_name)?.info.working_directory)
    }

    /// Resolve a project by directory name, official name or temp name.
    pub fn find_by_name(&mut self, name: &str) -> Result<Option<Arc<Project>>, RegistryError> {
        for project in self.scan()? {
            if project.dir_name == name
                || project.info.temp_name == name
                || project.info.official_name.as_deref() == Some(name)
            {
                return Ok(Some(self.intern(project)));
            }
        }
        Ok(None)
    }

    /// All projects, sorted by directory name.
    pub fn list(&mut self) -> Result<Vec<Arc<Project>>, RegistryError> {
        let projects = self.scan()?;
        Ok(projects
            .into_iter()
            .map(|project| self.intern(project))
            .collect())
    }

    fn load(&self, dir_name: &str) -> Result<Project, RegistryError> {
        let path = self.projects_dir.join(dir_name);
        let info_path = path.join(PROJECT_INFO_FILE);
        if !info_path.is_file() {
            return Err(RegistryError::NotFound(dir_name.to_string()));
        }
        let info = read_info(&info_path)?;
        Ok(Project {
            dir_name: dir_name.to_string(),
            path,
            info,
        })
    }

    /// Read every project directory with readable metadata.
    fn scan(&self) -> Result<Vec<Project>, RegistryError> {
        let entries = fs::read_dir(&self.projects_dir)
            .map_err(|e| RegistryError::io("read projects dir", &self.projects_dir, e))?;
        let mut projects = Vec::new();
        for entry in entries {
            let entry =
                entry.map_err(|e| RegistryError::io("read projects dir", &self.projects_dir, e))?;
            let path = entry.path();
            let info_path = path.join(PROJECT_INFO_FILE);
            if !path.is_dir() || !info_path.is_file() {
                continue;
            }
            let Some(dir_name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string)
            else {
                continue;
            };
            match read_info(&info_path) {
                Ok(info) => projects.push(Project {
                    dir_name,
                    path,
                    info,
                }),
                Err(err) => warn!(err = %err, "skipping project with unreadable metadata"),
            }
        }
        projects.sort_by(|a, b| a.dir_name.cmp(&b.dir_name));
        Ok(projects)
    }

    /// Return the interned handle if metadata is unchanged, else replace it.
    fn intern(&mut self, project: Project) -> Arc<Project> {
        if let Some(existing) = self.interned.get(&project.dir_name)
            && **existing == project
        {
            return existing.clone();
        }
        let handle = Arc::new(project);
        self.interned
            .insert(handle.dir_name.clone(), handle.clone());
        handle
    }

    fn claim_dir(&self, base: &str) -> Result<(String, PathBuf), RegistryError> {
        let mut suffix = 1u32;
        loop {
            let name = if suffix == 1 {
                base.to_string()
            } else {
                format!("{base}_{suffix}")
            };
            let path = self.projects_dir.join(&name);
            match fs::create_dir(&path) {
                Ok(()) => return Ok((name, path)),
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    debug!(name = %name, "project name taken, trying next suffix");
                    suffix += 1;
                }
                Err(err) => return Err(RegistryError::io("create project dir", &path, err)),
            }
        }
    }
}

/// Lay out `src/`, `logs/` and metadata inside a freshly claimed directory.
fn populate_project(
    path: &Path,
    name: &str,
    source: &Path,
    now: DateTime<Local>,
) -> Result<ProjectInfo, RegistryError> {
    let working_directory = path.join(WORKDIR_NAME);
    for dir in [working_directory.clone(), path.join(LOGS_DIR_NAME)] {
        fs::create_dir_all(&dir).map_err(|e| RegistryError::io("create project dir", &dir, e))?;
    }

    let info = ProjectInfo {
        temp_name: name.to_string(),
        official_name: None,
        source_file: source.to_path_buf(),
        working_directory,
        created_at: now,
    };
    write_info(path, &info)?;
    Ok(info)
}

fn validate_name(name: &str) -> Result<(), RegistryError> {
    let trimmed = name.trim();
    if trimmed.is_empty()
        || trimmed != name
        || name == "."
        || name == ".."
        || name.contains(['/', '\\'])
    {
        return Err(RegistryError::InvalidName(name.to_string()));
    }
    Ok(())
}

fn read_info(path: &Path) -> Result<ProjectInfo, RegistryError> {
    let contents =
        fs::read_to_string(path).map_err(|e| RegistryError::io("read metadata", path, e))?;
    serde_json::from_str(&contents).map_err(|source| RegistryError::Metadata {
        path: path.to_path_buf(),
        source,
    })
}

/// Atomically write metadata (temp file + rename).
fn write_info(project_path: &Path, info: &ProjectInfo) -> Result<(), RegistryError> {
    let path = project_path.join(PROJECT_INFO_FILE);
    let mut buf = serde_json::to_string_pretty(info).map_err(|source| RegistryError::Metadata {
        path: path.clone(),
        source,
    })?;
    buf.push('\n');
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, buf).map_err(|e| RegistryError::io("write metadata", &tmp_path, e))?;
    fs::rename(&tmp_path, &path).map_err(|e| RegistryError::io("replace metadata", &path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: u32) -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2026, 3, 14, 9, 30, secs)
            .single()
            .expect("valid local time")
    }

    #[test]
    fn create_lays_out_project_and_metadata() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut registry = ProjectRegistry::open(temp.path()).expect("open");

        let project = registry
            .create_at(Path::new("/notes/app.md"), at(5))
            .expect("create");

        assert_eq!(project.dir_name, "project_20260314_093005");
        assert_eq!(project.display_name(), "project_20260314_093005");
        assert!(project.working_directory().is_dir());
        assert!(project.logs_dir().is_dir());
        assert!(project.path.join(PROJECT_INFO_FILE).is_file());
        let info = registry.get_info(&project.dir_name).expect("info");
        assert_eq!(info.source_file, PathBuf::from("/notes/app.md"));
        assert_eq!(info.official_name, None);
    }

    #[test]
    fn same_second_creations_get_distinct_names() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut registry = ProjectRegistry::open(temp.path()).expect("open");

        let first = registry
            .create_at(Path::new("/notes/a.md"), at(7))
            .expect("first");
        let second = registry
            .create_at(Path::new("/notes/b.md"), at(7))
            .expect("second");
        let third = registry
            .create_at(Path::new("/notes/c.md"), at(7))
            .expect("third");

        assert_eq!(first.dir_name, "project_20260314_093007");
        assert_eq!(second.dir_name, "project_20260314_093007_2");
        assert_eq!(third.dir_name, "project_20260314_093007_3");
    }

    #[test]
    fn find_by_source_returns_identical_handle() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut registry = ProjectRegistry::open(temp.path()).expect("open");
        let created = registry
            .create_at(Path::new("/notes/a.md"), at(1))
            .expect("create");

        let first = registry
            .find_by_source(Path::new("/notes/a.md"))
            .expect("find")
            .expect("present");
        let second = registry
            .find_by_source(Path::new("/notes/a.md"))
            .expect("find")
            .expect("present");

        assert!(Arc::ptr_eq(&created, &first));
        assert!(Arc::ptr_eq(&first, &second));
        assert!(
            registry
                .find_by_source(Path::new("/notes/b.md"))
                .expect("find")
                .is_none()
        );
    }

    #[test]
    fn find_by_source_is_exact_path_equality() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut registry = ProjectRegistry::open(temp.path()).expect("open");
        registry
            .create_at(Path::new("/notes/a.md"), at(1))
            .expect("create");

        assert!(
            registry
                .find_by_source(Path::new("/notes/./a.md"))
                .expect("find")
                .is_none()
        );
    }

    #[test]
    fn rename_moves_directory_and_rewrites_working_directory() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut registry = ProjectRegistry::open(temp.path()).expect("open");
        let project = registry
            .create_at(Path::new("/notes/a.md"), at(1))
            .expect("create");

        let renamed = registry.rename(&project, "calculator").expect("rename");

        assert_eq!(renamed.dir_name, "calculator");
        assert_eq!(renamed.display_name(), "calculator");
        assert_eq!(renamed.info.temp_name, project.info.temp_name);
        assert_eq!(
            renamed.working_directory(),
            temp.path().join("calculator").join(WORKDIR_NAME)
        );
        assert!(!project.path.exists());
        assert_eq!(
            registry
                .get_working_directory("calculator")
                .expect("workdir"),
            temp.path().join("calculator").join(WORKDIR_NAME)
        );
        let found = registry
            .find_by_source(Path::new("/notes/a.md"))
            .expect("find")
            .expect("present");
        assert!(Arc::ptr_eq(&found, &renamed));
    }

    #[test]
    fn rename_to_existing_name_changes_nothing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut registry = ProjectRegistry::open(temp.path()).expect("open");
        let first = registry
            .create_at(Path::new("/notes/a.md"), at(1))
            .expect("first");
        let second = registry
            .create_at(Path::new("/notes/b.md"), at(2))
            .expect("second");
        let first_before = registry.get_info(&first.dir_name).expect("info");
        let second_before = registry.get_info(&second.dir_name).expect("info");

        let err = registry
            .rename(&first, &second.dir_name)
            .expect_err("collision");

        assert!(matches!(err, RegistryError::AlreadyExists(ref name) if *name == second.dir_name));
        assert_eq!(
            registry.get_info(&first.dir_name).expect("info"),
            first_before
        );
        assert_eq!(
            registry.get_info(&second.dir_name).expect("info"),
            second_before
        );
    }

    #[test]
    fn second_rename_is_refused() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut registry = ProjectRegistry::open(temp.path()).expect("open");
        let project = registry
            .create_at(Path::new("/notes/a.md"), at(1))
            .expect("create");
        let renamed = registry.rename(&project, "calculator").expect("rename");

        let err = registry.rename(&renamed, "calc-v2").expect_err("refused");
        assert!(matches!(err, RegistryError::AlreadyRenamed(_)));
        assert!(temp.path().join("calculator").is_dir());
    }

    #[test]
    fn rename_rejects_path_like_names() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut registry = ProjectRegistry::open(temp.path()).expect("open");
        let project = registry
            .create_at(Path::new("/notes/a.md"), at(1))
            .expect("create");

        for bad in ["", "..", "a/b", " padded"] {
            let err = registry.rename(&project, bad).expect_err("invalid");
            assert!(matches!(err, RegistryError::InvalidName(_)), "{bad:?}");
        }
    }

    #[test]
    fn list_is_sorted_and_find_by_name_matches_temp_name() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut registry = ProjectRegistry::open(temp.path()).expect("open");
        registry
            .create_at(Path::new("/notes/b.md"), at(9))
            .expect("b");
        let a = registry
            .create_at(Path::new("/notes/a.md"), at(3))
            .expect("a");

        let names: Vec<String> = registry
            .list()
            .expect("list")
            .iter()
            .map(|p| p.dir_name.clone())
            .collect();
        assert_eq!(
            names,
            vec!["project_20260314_093003", "project_20260314_093009"]
        );

        let found = registry
            .find_by_name(&a.info.temp_name)
            .expect("find")
            .expect("present");
        assert!(Arc::ptr_eq(&found, &a));
    }

    #[cfg(unix)]
    #[test]
    fn failed_create_releases_the_claimed_name() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let temp = tempfile::tempdir().expect("tempdir");
        let mut registry = ProjectRegistry::open(temp.path()).expect("open");
        let unencodable = Path::new(OsStr::from_bytes(b"/notes/\xff.md"));

        let err = registry
            .create_at(unencodable, at(5))
            .expect_err("metadata cannot be written");

        assert!(matches!(err, RegistryError::Metadata { .. }), "{err}");
        assert!(!temp.path().join("project_20260314_093005").exists());
        let project = registry
            .create_at(Path::new("/notes/app.md"), at(5))
            .expect("create after failure");
        assert_eq!(project.dir_name, "project_20260314_093005");
    }
}
