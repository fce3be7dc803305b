//! Project level configuration.
//!
//! Three layers, lowest precedence first: built-in defaults, the project's
//! configuration file and caller overrides. They are merged in one place
//! ([`resolve_with`]) into an [`EffectiveConfig`] whose paths are absolute.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::download::normalize;
use crate::{Error, ProxyOptions, Result};

pub const CONFIG_FILE_STEM: &str = "nats-memory-server";
/// Key inside `package.json`.
pub const PACKAGE_JSON_KEY: &str = "natsMemoryServer";
/// Table under `[package.metadata]` / `[workspace.metadata]` in `Cargo.toml`.
pub const CARGO_METADATA_KEY: &str = "nats-memory-server";
pub const DEFAULT_VERSION: &str = "v2.9.16";
pub const DEFAULT_DOWNLOAD_DIR: &str = "target/nats-memory-server";
pub const EXECUTABLE_NAME: &str = "nats-server";

const MANIFESTS: [&str; 2] = ["Cargo.toml", "package.json"];

/// Supported formats of the dedicated configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Toml,
}

impl ConfigFormat {
    /// In lookup order.
    pub const ALL: [ConfigFormat; 2] = [ConfigFormat::Json, ConfigFormat::Toml];

    pub fn extension(self) -> &'static str {
        match self {
            ConfigFormat::Json => "json",
            ConfigFormat::Toml => "toml",
        }
    }

    pub fn file_name(self) -> String {
        format!("{CONFIG_FILE_STEM}.{}", self.extension())
    }

    fn parse(self, path: &Path, text: &str) -> Result<ConfigLayer> {
        match self {
            ConfigFormat::Json => serde_json::from_str(text).map_err(|e| config_error(path, e)),
            ConfigFormat::Toml => toml::from_str(text).map_err(|e| config_error(path, e)),
        }
    }
}

fn config_error(path: &Path, e: impl std::fmt::Display) -> Error {
    Error::Config {
        path: path.to_path_buf(),
        message: e.to_string(),
    }
}

/// One configuration layer. Unset fields fall through to the layer below.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigLayer {
    pub download: Option<bool>,
    #[serde(alias = "download_dir")]
    pub download_dir: Option<PathBuf>,
    pub version: Option<String>,
    #[serde(alias = "build_from_source")]
    pub build_from_source: Option<bool>,
    #[serde(alias = "bin_path")]
    pub bin_path: Option<PathBuf>,
    #[serde(alias = "download_url")]
    pub download_url: Option<String>,
    #[serde(alias = "http_proxy")]
    pub http_proxy: Option<String>,
    #[serde(alias = "https_proxy")]
    pub https_proxy: Option<String>,
    #[serde(alias = "no_proxy")]
    pub no_proxy: Option<String>,
}

impl ConfigLayer {
    /// The built-in defaults.
    pub fn defaults() -> Self {
        Self {
            download: Some(true),
            download_dir: Some(PathBuf::from(DEFAULT_DOWNLOAD_DIR)),
            version: Some(DEFAULT_VERSION.to_string()),
            build_from_source: Some(false),
            ..Default::default()
        }
    }

    /// `self` with every field that is set in `over` replaced.
    pub fn merge(self, over: ConfigLayer) -> ConfigLayer {
        ConfigLayer {
            download: over.download.or(self.download),
            download_dir: over.download_dir.or(self.download_dir),
            version: over.version.or(self.version),
            build_from_source: over.build_from_source.or(self.build_from_source),
            bin_path: over.bin_path.or(self.bin_path),
            download_url: over.download_url.or(self.download_url),
            http_proxy: over.http_proxy.or(self.http_proxy),
            https_proxy: over.https_proxy.or(self.https_proxy),
            no_proxy: over.no_proxy.or(self.no_proxy),
        }
    }
}

/// Fully merged configuration. `download_dir` and `bin_path` are absolute.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectiveConfig {
    pub download: bool,
    pub download_dir: PathBuf,
    pub version: String,
    pub build_from_source: bool,
    pub bin_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(flatten)]
    pub proxy: ProxyOptions,
}

impl EffectiveConfig {
    /// Turn a merged layer into the final config, resolving relative paths
    /// against `root`. Without an explicit `bin_path` the binary is expected
    /// directly inside `download_dir`.
    pub fn finish(layer: ConfigLayer, root: &Path) -> Self {
        let download_dir = rooted(
            root,
            layer
                .download_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DOWNLOAD_DIR)),
        );
        let bin_path = match layer.bin_path {
            Some(path) => rooted(root, path),
            None => download_dir.join(executable_name()),
        };

        Self {
            download: layer.download.unwrap_or(true),
            download_dir,
            version: layer.version.unwrap_or_else(|| DEFAULT_VERSION.to_string()),
            build_from_source: layer.build_from_source.unwrap_or(false),
            bin_path,
            download_url: layer.download_url,
            proxy: ProxyOptions {
                http_proxy: layer.http_proxy,
                https_proxy: layer.https_proxy,
                no_proxy: layer.no_proxy,
            },
        }
    }

    /// Defaults only, rooted at `root`.
    pub fn rooted_defaults(root: &Path) -> Self {
        Self::finish(ConfigLayer::defaults(), root)
    }

    /// Configuration of the project the current directory belongs to.
    pub fn discover() -> Result<Self> {
        let cwd = std::env::current_dir()?;
        resolve(&find_project_root(&cwd))
    }

    /// `download_url` if configured, otherwise the release (or source) archive
    /// for this host.
    pub fn resolved_download_url(&self) -> String {
        self.download_url.clone().unwrap_or_else(|| {
            crate::artifact::host_download_url(&self.version, self.build_from_source)
        })
    }
}

fn executable_name() -> String {
    format!("{EXECUTABLE_NAME}{}", std::env::consts::EXE_SUFFIX)
}

fn rooted(root: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        normalize(&root.join(path))
    }
}

/// Effective configuration for the project at `root`.
pub fn resolve(root: &Path) -> Result<EffectiveConfig> {
    resolve_with(root, &ConfigLayer::default())
}

/// Effective configuration for the project at `root` with caller overrides on top.
pub fn resolve_with(root: &Path, overrides: &ConfigLayer) -> Result<EffectiveConfig> {
    let root = normalize(&std::path::absolute(root)?);
    let project = project_layer(&root)?.unwrap_or_default();
    let merged = ConfigLayer::defaults()
        .merge(project)
        .merge(overrides.clone());
    Ok(EffectiveConfig::finish(merged, &root))
}

/// The configuration found in the project at `root`, if any.
///
/// A dedicated `nats-memory-server.{json,toml}` wins over manifest entries.
pub fn project_layer(root: &Path) -> Result<Option<ConfigLayer>> {
    for format in ConfigFormat::ALL {
        let path = root.join(format.file_name());
        if path.is_file() {
            tracing::debug!(path = %path.display(), "using project configuration file");
            let text = std::fs::read_to_string(&path)?;
            return format.parse(&path, &text).map(Some);
        }
    }

    let cargo = root.join("Cargo.toml");
    if cargo.is_file() {
        if let Some(layer) = cargo_metadata_layer(&cargo)? {
            tracing::debug!(path = %cargo.display(), "using Cargo.toml metadata");
            return Ok(Some(layer));
        }
    }

    let package = root.join("package.json");
    if package.is_file() {
        if let Some(layer) = package_json_layer(&package)? {
            tracing::debug!(path = %package.display(), "using package.json entry");
            return Ok(Some(layer));
        }
    }

    Ok(None)
}

fn cargo_metadata_layer(path: &Path) -> Result<Option<ConfigLayer>> {
    let text = std::fs::read_to_string(path)?;
    let manifest: toml::Value = toml::from_str(&text).map_err(|e| config_error(path, e))?;

    let entry = ["package", "workspace"].into_iter().find_map(|section| {
        manifest
            .get(section)
            .and_then(|s| s.get("metadata"))
            .and_then(|m| m.get(CARGO_METADATA_KEY))
    });

    match entry {
        Some(value) => value
            .clone()
            .try_into()
            .map(Some)
            .map_err(|e| config_error(path, e)),
        None => Ok(None),
    }
}

fn package_json_layer(path: &Path) -> Result<Option<ConfigLayer>> {
    let text = std::fs::read_to_string(path)?;
    let package: serde_json::Value =
        serde_json::from_str(&text).map_err(|e| config_error(path, e))?;

    match package.get(PACKAGE_JSON_KEY) {
        Some(value) => serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|e| config_error(path, e)),
        None => Ok(None),
    }
}

/// The directory relative paths are resolved against.
///
/// Nearest ancestor of `start` holding a dedicated config file, else the
/// nearest one with a `Cargo.toml` or `package.json`, else `start` itself.
pub fn find_project_root(start: &Path) -> PathBuf {
    let has_config = |dir: &Path| {
        ConfigFormat::ALL
            .iter()
            .any(|f| dir.join(f.file_name()).is_file())
    };
    let has_manifest = |dir: &Path| MANIFESTS.iter().any(|m| dir.join(m).is_file());

    start
        .ancestors()
        .find(|dir| has_config(dir))
        .or_else(|| start.ancestors().find(|dir| has_manifest(dir)))
        .unwrap_or(start)
        .to_path_buf()
}

/// Caller owned cache of resolved configurations, keyed by project root.
#[derive(Debug, Default)]
pub struct ConfigCache {
    overrides: ConfigLayer,
    entries: HashMap<PathBuf, Arc<EffectiveConfig>>,
}

impl ConfigCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache whose entries all carry `overrides`.
    pub fn with_overrides(overrides: ConfigLayer) -> Self {
        Self {
            overrides,
            entries: HashMap::new(),
        }
    }

    pub fn get(&mut self, root: &Path) -> Result<Arc<EffectiveConfig>> {
        if let Some(config) = self.entries.get(root) {
            return Ok(config.clone());
        }

        let config = Arc::new(resolve_with(root, &self.overrides)?);
        self.entries.insert(root.to_path_buf(), config.clone());
        Ok(config)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
