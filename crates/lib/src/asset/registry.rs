//! Extension to asset-kind registry.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use super::kinds::CopyKind;
use super::{Asset, AssetError, AssetKind, AssetsDir};
use crate::build::types::ArtifactType;

struct Registration {
  kind: Arc<dyn AssetKind>,
  addon: bool,
}

/// Maps file extensions (without the leading dot, possibly multi-part such
/// as `bg.png`) to asset kinds.
#[derive(Default)]
pub struct AssetRegistry {
  by_extension: HashMap<String, Registration>,
}

impl AssetRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// A registry with the built-in binary kinds registered.
  pub fn with_builtins() -> Self {
    let mut registry = Self::new();
    registry.register("bin", Arc::new(CopyKind::new("binary", "bin", ArtifactType::Binary)), false);
    registry.register("shape", Arc::new(CopyKind::new("shape", "shape", ArtifactType::Shape)), false);
    registry.register(
      "collision",
      Arc::new(CopyKind::new("collision", "collision", ArtifactType::Collision)),
      false,
    );
    registry
  }

  /// Register `kind` for `extension`, replacing any previous registration.
  ///
  /// Addon registrations can be removed in bulk with [`unregister_addons`](Self::unregister_addons).
  pub fn register(&mut self, extension: &str, kind: Arc<dyn AssetKind>, addon: bool) {
    let extension = extension.trim_start_matches('.').to_string();
    debug!(extension = %extension, kind = kind.name(), addon, "registering asset kind");
    self.by_extension.insert(extension, Registration { kind, addon });
  }

  /// Drop every addon registration. Returns how many were removed.
  pub fn unregister_addons(&mut self) -> usize {
    let before = self.by_extension.len();
    self.by_extension.retain(|_, reg| !reg.addon);
    let removed = before - self.by_extension.len();
    info!(removed, "unregistered addon asset kinds");
    removed
  }

  pub fn is_registered(&self, extension: &str) -> bool {
    self.by_extension.contains_key(extension)
  }

  pub fn extensions(&self) -> impl Iterator<Item = &str> {
    self.by_extension.keys().map(String::as_str)
  }

  /// The longest registered dot-suffix of the file name, or empty.
  ///
  /// `foo.bg.png` yields `bg.png` when that is registered, else `png` when
  /// that is registered, else the empty string.
  pub fn asset_extension(&self, path: &Path) -> String {
    let Some(file_name) = path.file_name().map(|n| n.to_string_lossy()) else {
      return String::new();
    };

    let mut rest = file_name.as_ref();
    while let Some(dot) = rest.find('.') {
      rest = &rest[dot + 1..];
      if self.by_extension.contains_key(rest) {
        return rest.to_string();
      }
    }
    String::new()
  }

  /// Instantiate the asset at `relative` inside `dir`, typed by its extension.
  pub fn create(&self, dir: &AssetsDir, relative: &Path) -> Result<Asset, AssetError> {
    let extension = self.asset_extension(relative);
    let kind = self.by_extension.get(&extension).map(|reg| reg.kind.clone());
    Asset::new(dir.clone(), relative.to_path_buf(), extension, kind)
  }
}
