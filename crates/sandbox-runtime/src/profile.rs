//! Environment profiles: launch-spec factories for each sandbox flavor.
//!
//! A profile only produces configuration. Every flavor goes through the same
//! [`ContainerRuntime`](crate::runtime::ContainerRuntime) lifecycle, so adding
//! one never touches acquire/release.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::spec::{absolute_host_path, LaunchOverrides, LaunchSpec};

/// Default sandbox image.
pub const DEFAULT_IMAGE: &str = "openhands-agent-server-rs";

/// Mount point of the workspace inside every sandbox.
pub const WORKSPACE_MOUNT: &str = "/workspace";

pub const SCCACHE_WRAPPER: &str = "/usr/local/bin/sccache";
pub const SCCACHE_MOUNT: &str = "/var/cache/sccache";
pub const CARGO_REGISTRY_MOUNT: &str = "/usr/local/cargo/registry";
pub const CARGO_GIT_MOUNT: &str = "/usr/local/cargo/git";

/// Produces the launch spec for a session scoped to `workspace`.
pub trait EnvironmentProfile: Send + Sync {
    /// Image this profile launches.
    fn image(&self) -> &str;

    /// Defaults for this flavor, overlaid by `overrides` (caller wins).
    fn launch_spec(&self, workspace: &Path, overrides: &LaunchOverrides) -> Result<LaunchSpec>;
}

/// Bare sandbox: the workspace mount and nothing else.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlainProfile {
    pub image: String,
}

impl Default for PlainProfile {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_string(),
        }
    }
}

impl PlainProfile {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
        }
    }
}

impl EnvironmentProfile for PlainProfile {
    fn image(&self) -> &str {
        &self.image
    }

    fn launch_spec(&self, workspace: &Path, overrides: &LaunchOverrides) -> Result<LaunchSpec> {
        let mut spec = LaunchSpec::new(&self.image);
        spec.volumes
            .insert(absolute_host_path(workspace)?, WORKSPACE_MOUNT.to_string());
        Ok(spec.with_overrides(overrides))
    }
}

/// Host directories backing the compiler and package caches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheDirs {
    /// sccache object cache.
    pub sccache_dir: PathBuf,
    /// Parent of the cargo `registry/` and `git/` caches.
    pub cargo_cache_dir: PathBuf,
}

impl Default for CacheDirs {
    fn default() -> Self {
        CacheDirs {
            sccache_dir: std::env::var("EXAMKIT_SCCACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./.sccache")),
            cargo_cache_dir: std::env::var("EXAMKIT_CARGO_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./.cargo_cache")),
        }
    }
}

impl CacheDirs {
    /// Read cache locations from the environment.
    pub fn from_env() -> Self {
        Self::default()
    }

    pub fn new(sccache_dir: impl Into<PathBuf>, cargo_cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            sccache_dir: sccache_dir.into(),
            cargo_cache_dir: cargo_cache_dir.into(),
        }
    }

    pub fn registry_dir(&self) -> PathBuf {
        self.cargo_cache_dir.join("registry")
    }

    pub fn git_dir(&self) -> PathBuf {
        self.cargo_cache_dir.join("git")
    }

    /// Create the host directories so the engine does not create them as root.
    pub fn ensure_exist(&self) -> Result<()> {
        for dir in [self.sccache_dir.clone(), self.registry_dir(), self.git_dir()] {
            std::fs::create_dir_all(&dir)?;
        }
        Ok(())
    }
}

/// Rust sandbox with sccache and persistent cargo caches.
///
/// Incremental compilation is switched off because sccache cannot cache
/// incremental artifacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachingProfile {
    pub image: String,
    pub cache: CacheDirs,
}

impl Default for CachingProfile {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_string(),
            cache: CacheDirs::from_env(),
        }
    }
}

impl CachingProfile {
    pub fn new(image: impl Into<String>, cache: CacheDirs) -> Self {
        Self {
            image: image.into(),
            cache,
        }
    }
}

impl EnvironmentProfile for CachingProfile {
    fn image(&self) -> &str {
        &self.image
    }

    fn launch_spec(&self, workspace: &Path, overrides: &LaunchOverrides) -> Result<LaunchSpec> {
        self.cache.ensure_exist()?;

        let mut spec = LaunchSpec::new(&self.image);
        spec.env
            .insert("RUSTC_WRAPPER".to_string(), SCCACHE_WRAPPER.to_string());
        spec.env
            .insert("SCCACHE_DIR".to_string(), SCCACHE_MOUNT.to_string());
        spec.env
            .insert("CARGO_INCREMENTAL".to_string(), "0".to_string());

        let mounts = [
            (self.cache.sccache_dir.clone(), SCCACHE_MOUNT),
            (self.cache.registry_dir(), CARGO_REGISTRY_MOUNT),
            (self.cache.git_dir(), CARGO_GIT_MOUNT),
            (workspace.to_path_buf(), WORKSPACE_MOUNT),
        ];
        for (host, container) in mounts {
            spec.volumes
                .insert(absolute_host_path(&host)?, container.to_string());
        }

        debug!(
            image = %self.image,
            sccache_dir = %self.cache.sccache_dir.display(),
            cargo_cache_dir = %self.cache.cargo_cache_dir.display(),
            "caching profile launch spec built"
        );
        Ok(spec.with_overrides(overrides))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_plain_profile_mounts_workspace_only() {
        let ws = tempdir().unwrap();
        let spec = PlainProfile::new("img")
            .launch_spec(ws.path(), &LaunchOverrides::default())
            .unwrap();
        assert_eq!(spec.image, "img");
        assert_eq!(spec.volumes.len(), 1);
        assert_eq!(spec.volumes[ws.path()], WORKSPACE_MOUNT);
        assert!(spec.env.is_empty());
    }

    #[test]
    fn test_caching_profile_env_and_mounts() {
        let root = tempdir().unwrap();
        let ws = root.path().join("ws");
        std::fs::create_dir_all(&ws).unwrap();
        let cache = CacheDirs::new(root.path().join("sccache"), root.path().join("cargo"));
        let profile = CachingProfile::new("img", cache.clone());

        let spec = profile
            .launch_spec(&ws, &LaunchOverrides::default())
            .unwrap();

        assert_eq!(spec.env["RUSTC_WRAPPER"], SCCACHE_WRAPPER);
        assert_eq!(spec.env["SCCACHE_DIR"], SCCACHE_MOUNT);
        assert_eq!(spec.env["CARGO_INCREMENTAL"], "0");
        assert_eq!(spec.volumes.len(), 4);
        assert_eq!(spec.volumes[&cache.sccache_dir], SCCACHE_MOUNT);
        assert_eq!(spec.volumes[&cache.registry_dir()], CARGO_REGISTRY_MOUNT);
        assert_eq!(spec.volumes[&cache.git_dir()], CARGO_GIT_MOUNT);
        assert_eq!(spec.volumes[&ws], WORKSPACE_MOUNT);
        assert!(cache.registry_dir().is_dir());
        assert!(cache.git_dir().is_dir());
    }

    #[test]
    fn test_caching_profile_caller_env_wins() {
        let root = tempdir().unwrap();
        let cache = CacheDirs::new(root.path().join("s"), root.path().join("c"));
        let mut overrides = LaunchOverrides::default();
        overrides
            .env
            .insert("CARGO_INCREMENTAL".to_string(), "1".to_string());
        overrides
            .env
            .insert("RUST_LOG".to_string(), "debug".to_string());

        let spec = CachingProfile::new("img", cache)
            .launch_spec(root.path(), &overrides)
            .unwrap();
        assert_eq!(spec.env["CARGO_INCREMENTAL"], "1");
        assert_eq!(spec.env["RUST_LOG"], "debug");
        assert_eq!(spec.env["RUSTC_WRAPPER"], SCCACHE_WRAPPER);
    }

    #[test]
    fn test_relative_cache_dirs_become_absolute() {
        let cache = CacheDirs::new("rel-sccache", "rel-cargo");
        let registry = absolute_host_path(&cache.registry_dir()).unwrap();
        assert!(registry.is_absolute());
        assert!(registry.ends_with("rel-cargo/registry"));
    }
}
