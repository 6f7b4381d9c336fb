//! Scanning service configuration.

use std::path::PathBuf;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

/// Shape of the results a scan produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScanningOutputFormat {
    /// Make-style dependency file.
    #[default]
    Make,
    /// Translation unit record plus module graph.
    Full,
    /// `Full` plus the content-addressed root of every accessed file.
    FullTree,
    /// Include structure committed to the object store.
    IncludeTree,
    /// Content-addressed tree of every accessed file.
    Tree,
}

impl ScanningOutputFormat {
    /// Whether the format needs the content-addressed store.
    pub fn requires_cas(self) -> bool {
        matches!(self, Self::FullTree | Self::IncludeTree | Self::Tree)
    }

    /// Whether the format collects the module graph.
    pub fn collects_modules(self) -> bool {
        matches!(self, Self::Full | Self::FullTree)
    }
}

/// How source files are read during a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScanningMode {
    /// Read files through a plain file manager and extract directives on
    /// every read.
    CanonicalPreprocessing,
    /// Read files through the shared cache, extracting directives once per
    /// file for the whole build.
    #[default]
    DependencyDirectivesScan,
}

/// Configuration for a dependency scanning service.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct ServiceConfig {
    /// Output shape produced by every worker of the service.
    #[builder(default)]
    #[serde(default)]
    pub format: ScanningOutputFormat,

    /// How files are read.
    #[builder(default)]
    #[serde(default)]
    pub mode: ScanningMode,

    /// Drop header search paths a module build never used.
    #[builder(default = "false")]
    #[serde(default)]
    pub optimize_args: bool,

    /// Reference module dependencies by file path instead of by name.
    #[builder(default = "false")]
    #[serde(default)]
    pub eager_load_modules: bool,

    /// Keep one file manager per worker instead of one per scan.
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub reuse_file_manager: bool,

    /// Directory of an on-disk object store (in memory when unset).
    #[builder(default)]
    #[serde(default)]
    pub cas_path: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

impl ServiceConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(Some(ref path)) = self.cas_path {
            if path.as_os_str().is_empty() {
                return Err("CAS path cannot be empty".to_string());
            }
            let format = self.format.unwrap_or_default();
            if !format.requires_cas() {
                return Err(format!(
                    "CAS path requires a content-addressed output format, got {format:?}"
                ));
            }
        }
        Ok(())
    }
}

impl ServiceConfig {
    /// Create a new service config builder.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder::default()
    }

    /// Create a config for the given output format.
    pub fn new(format: ScanningOutputFormat) -> Self {
        Self {
            format,
            mode: ScanningMode::DependencyDirectivesScan,
            optimize_args: false,
            eager_load_modules: false,
            reuse_file_manager: true,
            cas_path: None,
        }
    }

    /// Whether workers scan through the content-addressed filesystem.
    pub fn use_cas_scanning(&self) -> bool {
        self.format.requires_cas()
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::new(ScanningOutputFormat::Make)
    }
}
