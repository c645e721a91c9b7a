//! Node settings loaded from YAML.
//!
//! # Storage layout
//!
//! ```text
//! ~/.configsync/
//!   configsync.yaml   (node settings, mode 0600)
//!   store/            (default shared directory for the `dir` backend)
//!   config/           (default root for materialized files)
//! ```
//!
//! # API pattern
//!
//! Every function touching the filesystem has two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! Everything is read once at startup except `sync.flush_interval`, which
//! the scheduler may override from the cluster view on every re-arm.

use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::Interval;

pub const SETTINGS_FILE: &str = "configsync.yaml";
pub const DEFAULT_INDEX: &str = "configsync";
pub const LEGACY_INDEX: &str = ".configsync";

// ---------------------------------------------------------------------------
// 1. Sections
// ---------------------------------------------------------------------------

/// Top-level settings document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub node: NodeSection,
    pub store: StoreSection,
    pub sync: SyncSection,
    pub cluster: ClusterSection,
    pub log: LogSection,
}

/// `node:`: identity of this process in the cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSection {
    pub name: String,
    /// Address the node RPC listener binds to.
    pub listen_addr: String,
    /// Whether this node holds materialized files (receives broadcasts).
    pub data: bool,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            name: "node-1".to_string(),
            listen_addr: "127.0.0.1:9410".to_string(),
            data: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Dir,
    Memory,
}

/// `store:`: the authoritative entry store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    pub backend: BackendKind,
    /// Shared directory for the `dir` backend. Empty means `~/.configsync/store`.
    pub path: PathBuf,
    pub index: String,
    pub legacy_index: String,
    /// Optional credential; turned into a `Basic` token by
    /// [`Settings::authorization_token`].
    pub security_user: String,
    /// How long collection creation waits for the collection to turn healthy.
    pub health_timeout: Interval,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            backend: BackendKind::Dir,
            path: PathBuf::new(),
            index: DEFAULT_INDEX.to_string(),
            legacy_index: LEGACY_INDEX.to_string(),
            security_user: String::new(),
            health_timeout: Interval::from_secs(30),
        }
    }
}

/// `sync:`: the reconciling writer and its scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSection {
    /// Root directory entries are materialized under. Empty means
    /// `~/.configsync/config`.
    pub config_path: PathBuf,
    /// Records per scan page.
    pub scroll_size: usize,
    /// Scan cursor keep-alive, also the bound on each page fetch.
    pub scroll_time: Interval,
    /// Startup default for the scheduler interval. Negative disables.
    pub flush_interval: Interval,
    pub file_updater_enabled: bool,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            config_path: PathBuf::new(),
            scroll_size: 1,
            scroll_time: Interval::from_mins(1),
            flush_interval: Interval::from_mins(1),
            file_updater_enabled: true,
        }
    }
}

/// `cluster:`: membership view and node RPC tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSection {
    /// Cluster view file. Empty means `<store.path>/cluster.yaml`.
    pub config_path: PathBuf,
    pub request_timeout: Interval,
    /// Readiness gate back-off between attempts.
    pub retry_delay: Interval,
}

impl Default for ClusterSection {
    fn default() -> Self {
        Self {
            config_path: PathBuf::new(),
            request_timeout: Interval::from_mins(1),
            retry_delay: Interval::from_secs(15),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// `log:`: tracing subscriber setup for the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

// ---------------------------------------------------------------------------
// 2. Derived values
// ---------------------------------------------------------------------------

impl Settings {
    /// Defaults with every home-relative path filled in.
    pub fn defaults_at(home: &Path) -> Self {
        Self::default().resolve(home)
    }

    /// Fill empty path settings with their home-relative defaults.
    pub fn resolve(mut self, home: &Path) -> Self {
        let root = configsync_root(home);
        if self.store.path.as_os_str().is_empty() {
            self.store.path = root.join("store");
        }
        if self.sync.config_path.as_os_str().is_empty() {
            self.sync.config_path = root.join("config");
        }
        if self.cluster.config_path.as_os_str().is_empty() {
            self.cluster.config_path = self.store.path.join("cluster.yaml");
        }
        self
    }

    /// `Basic <base64(security_user)>`, or `None` when no credential is set.
    pub fn authorization_token(&self) -> Option<String> {
        let user = self.store.security_user.trim();
        if user.is_empty() {
            return None;
        }
        Some(format!("Basic {}", STANDARD.encode(user.as_bytes())))
    }

    pub fn scroll_size(&self) -> usize {
        self.sync.scroll_size.max(1)
    }

    pub fn scroll_time(&self) -> Duration {
        self.sync.scroll_time.duration_or(Duration::from_secs(60))
    }

    pub fn health_timeout(&self) -> Duration {
        self.store.health_timeout.duration_or(Duration::from_secs(30))
    }

    pub fn request_timeout(&self) -> Duration {
        self.cluster
            .request_timeout
            .duration_or(Duration::from_secs(60))
    }

    pub fn retry_delay(&self) -> Duration {
        self.cluster.retry_delay.duration_or(Duration::from_secs(15))
    }
}

// ---------------------------------------------------------------------------
// 3. Paths
// ---------------------------------------------------------------------------

/// `<home>/.configsync`
pub fn configsync_root(home: &Path) -> PathBuf {
    home.join(".configsync")
}

/// `<home>/.configsync/configsync.yaml`. Pure, no I/O.
pub fn settings_path_at(home: &Path) -> PathBuf {
    configsync_root(home).join(SETTINGS_FILE)
}

// ---------------------------------------------------------------------------
// 4. Load / save
// ---------------------------------------------------------------------------

/// Load settings.
///
/// With `explicit = Some(path)` the file must exist
/// (`CoreError::SettingsNotFound` otherwise). Without it the default location
/// is tried and a missing file yields [`Settings::defaults_at`].
pub fn load_at(home: &Path, explicit: Option<&Path>) -> Result<Settings, CoreError> {
    let path = match explicit {
        Some(path) => {
            if !path.exists() {
                return Err(CoreError::SettingsNotFound {
                    path: path.to_path_buf(),
                });
            }
            path.to_path_buf()
        }
        None => {
            let path = settings_path_at(home);
            if !path.exists() {
                return Ok(Settings::defaults_at(home));
            }
            path
        }
    };

    let contents = std::fs::read_to_string(&path)?;
    if contents.trim().is_empty() {
        return Ok(Settings::defaults_at(home));
    }
    let settings: Settings =
        serde_yaml::from_str(&contents).map_err(|e| CoreError::Parse { path, source: e })?;
    Ok(settings.resolve(home))
}

/// `load_at` convenience wrapper.
pub fn load(explicit: Option<&Path>) -> Result<Settings, CoreError> {
    load_at(&home()?, explicit)
}

/// Atomically write settings to `path`.
///
/// Write flow: serialize → `.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_at(path: &Path, settings: &Settings) -> Result<(), CoreError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let tmp = path.with_extension("yaml.tmp");
    let yaml = serde_yaml::to_string(settings)?;
    std::fs::write(&tmp, yaml)?;
    set_file_permissions(&tmp)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn home() -> Result<PathBuf, CoreError> {
    dirs::home_dir().ok_or(CoreError::HomeNotFound)
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), CoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), CoreError> {
    Ok(())
}
