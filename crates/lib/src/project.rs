//! Project manifest and on-disk layout.
//!
//! # Storage Layout
//!
//! ```text
//! <project>/
//! ├── project.toml
//! ├── assets/                    owned asset tree
//! └── .starforge/
//!     ├── build/
//!     │   ├── headers/           generated headers
//!     │   ├── assets.bin         archive
//!     │   └── <id>.tar.gz        distribution package
//!     └── build-state/
//!         └── state.json
//! ```
//!
//! # Example Manifest
//!
//! ```toml
//! id = "kmr-remix"
//! name = "Goomba Village"
//!
//! [engine]
//! ref = "main"
//! sha = "3f2a9c1e"
//! assets = "../engine/assets"
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::archive::format::PROJECT_NAME_MAX;
use crate::asset::AssetStack;
use crate::config::BuildConfig;
use crate::consts::{
  ARCHIVE_FILENAME, ASSETS_DIR, BUILD_DIR, BUILD_STATE_DIR, BUILD_STATE_FILENAME, HEADERS_DIR, MANIFEST_FILENAME,
  PACKAGE_EXTENSION, PROJECT_DATA_DIR,
};

/// Engine sha used when none can be determined.
pub const UNKNOWN_ENGINE_SHA: &str = "unknown";

#[derive(Debug, Error)]
pub enum ProjectError {
  #[error("failed to read project manifest {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse project manifest {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: toml::de::Error,
  },

  #[error("invalid project manifest: {0}")]
  Invalid(String),
}

/// Contents of `project.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectManifest {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<String>,
  pub name: String,
  #[serde(default)]
  pub engine: EngineRef,
}

/// The engine build a project targets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineRef {
  #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
  pub reference: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub sha: Option<String>,
  /// Read-only engine asset directory, relative to the project root.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub assets: Option<PathBuf>,
}

impl ProjectManifest {
  pub fn parse(content: &str, path: &Path) -> Result<Self, ProjectError> {
    let manifest: ProjectManifest = toml::from_str(content).map_err(|source| ProjectError::Parse {
      path: path.to_path_buf(),
      source,
    })?;
    manifest.validate()?;
    Ok(manifest)
  }

  fn validate(&self) -> Result<(), ProjectError> {
    if self.name.trim().is_empty() {
      return Err(ProjectError::Invalid("name must not be empty".to_string()));
    }
    if self.name.len() > PROJECT_NAME_MAX {
      warn!(
        name = %self.name,
        max = PROJECT_NAME_MAX,
        "project name will be truncated in the archive header"
      );
    }
    Ok(())
  }
}

/// A project directory and its manifest.
#[derive(Debug, Clone)]
pub struct Project {
  dir: PathBuf,
  manifest: ProjectManifest,
}

impl Project {
  pub fn new(dir: impl Into<PathBuf>, manifest: ProjectManifest) -> Self {
    Self {
      dir: dir.into(),
      manifest,
    }
  }

  /// Load the project rooted at `dir`.
  pub fn load(dir: &Path) -> Result<Self, ProjectError> {
    let dir = dunce::canonicalize(dir).map_err(|source| ProjectError::Read {
      path: dir.to_path_buf(),
      source,
    })?;
    let path = dir.join(MANIFEST_FILENAME);
    let content = fs::read_to_string(&path).map_err(|source| ProjectError::Read {
      path: path.clone(),
      source,
    })?;
    let manifest = ProjectManifest::parse(&content, &path)?;
    debug!(dir = %dir.display(), name = %manifest.name, "loaded project");
    Ok(Self { dir, manifest })
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  pub fn manifest(&self) -> &ProjectManifest {
    &self.manifest
  }

  pub fn name(&self) -> &str {
    &self.manifest.name
  }

  /// Project id, falling back to the name.
  pub fn id(&self) -> &str {
    self.manifest.id.as_deref().unwrap_or(&self.manifest.name)
  }

  pub fn manifest_path(&self) -> PathBuf {
    self.dir.join(MANIFEST_FILENAME)
  }

  pub fn assets_dir(&self) -> PathBuf {
    self.dir.join(ASSETS_DIR)
  }

  pub fn data_dir(&self) -> PathBuf {
    self.dir.join(PROJECT_DATA_DIR)
  }

  pub fn build_dir(&self) -> PathBuf {
    self.data_dir().join(BUILD_DIR)
  }

  pub fn headers_dir(&self) -> PathBuf {
    self.build_dir().join(HEADERS_DIR)
  }

  pub fn state_file(&self) -> PathBuf {
    self.data_dir().join(BUILD_STATE_DIR).join(BUILD_STATE_FILENAME)
  }

  pub fn archive_path(&self) -> PathBuf {
    self.build_dir().join(ARCHIVE_FILENAME)
  }

  pub fn package_path(&self) -> PathBuf {
    self.build_dir().join(format!("{}.{PACKAGE_EXTENSION}", self.id()))
  }

  /// The project's asset layers: its own tree, then the engine's.
  pub fn asset_stack(&self) -> AssetStack {
    let engine = self.manifest.engine.assets.as_ref().map(|p| self.dir.join(p));
    AssetStack::new(self.assets_dir(), engine)
  }

  /// Engine sha for cache invalidation: the configured override, then the
  /// manifest, then `git rev-parse HEAD` in the project, then `"unknown"`.
  pub async fn engine_sha(&self, config: &BuildConfig) -> String {
    if let Some(sha) = &config.engine_sha {
      return sha.clone();
    }
    if let Some(sha) = &self.manifest.engine.sha {
      return sha.clone();
    }
    git_head(&self.dir).await.unwrap_or_else(|| UNKNOWN_ENGINE_SHA.to_string())
  }
}

async fn git_head(dir: &Path) -> Option<String> {
  let output = tokio::process::Command::new("git")
    .args(["rev-parse", "HEAD"])
    .current_dir(dir)
    .output()
    .await
    .map_err(|e| debug!(error = %e, "failed to run git"))
    .ok()?;

  if !output.status.success() {
    debug!(dir = %dir.display(), "not a git checkout");
    return None;
  }
  let sha = String::from_utf8_lossy(&output.stdout).trim().to_string();
  (!sha.is_empty()).then_some(sha)
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[test]
  fn parses_full_manifest() {
    let content = r#"
id = "kmr-remix"
name = "Goomba Village"

[engine]
ref = "main"
sha = "3f2a9c1e"
assets = "../engine/assets"
"#;
    let manifest = ProjectManifest::parse(content, Path::new("project.toml")).unwrap();

    assert_eq!(manifest.id.as_deref(), Some("kmr-remix"));
    assert_eq!(manifest.engine.reference.as_deref(), Some("main"));
    assert_eq!(manifest.engine.sha.as_deref(), Some("3f2a9c1e"));
    assert_eq!(manifest.engine.assets, Some(PathBuf::from("../engine/assets")));
  }

  #[test]
  fn engine_section_is_optional() {
    let manifest = ProjectManifest::parse("name = \"solo\"", Path::new("project.toml")).unwrap();
    assert_eq!(manifest.engine, EngineRef::default());

    let project = Project::new("/p", manifest);
    assert_eq!(project.id(), "solo");
    assert_eq!(project.asset_stack().dirs().len(), 1);
  }

  #[test]
  fn rejects_empty_name() {
    let err = ProjectManifest::parse("name = \"  \"", Path::new("project.toml")).unwrap_err();
    assert!(matches!(err, ProjectError::Invalid(_)));
  }

  #[test]
  fn rejects_malformed_toml() {
    let err = ProjectManifest::parse("name = ", Path::new("project.toml")).unwrap_err();
    assert!(matches!(err, ProjectError::Parse { .. }));
  }

  #[test]
  fn layout_paths() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("project.toml"), "id = \"mod\"\nname = \"Mod\"\n").unwrap();
    let project = Project::load(temp.path()).unwrap();
    let root = dunce::canonicalize(temp.path()).unwrap();

    assert_eq!(project.assets_dir(), root.join("assets"));
    assert_eq!(project.headers_dir(), root.join(".starforge/build/headers"));
    assert_eq!(project.state_file(), root.join(".starforge/build-state/state.json"));
    assert_eq!(project.archive_path(), root.join(".starforge/build/assets.bin"));
    assert_eq!(project.package_path(), root.join(".starforge/build/mod.tar.gz"));
  }

  #[tokio::test]
  async fn engine_sha_prefers_override_then_manifest() {
    let temp = TempDir::new().unwrap();
    let mut manifest = ProjectManifest::parse("name = \"x\"", Path::new("project.toml")).unwrap();
    manifest.engine.sha = Some("from-manifest".to_string());
    let project = Project::new(temp.path(), manifest);

    let config = BuildConfig {
      engine_sha: Some("override".to_string()),
      ..BuildConfig::default()
    };
    assert_eq!(project.engine_sha(&config).await, "override");
    assert_eq!(project.engine_sha(&BuildConfig::default()).await, "from-manifest");
  }
}
