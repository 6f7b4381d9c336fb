//! Build-wide scanning state shared by every worker.

use std::sync::Arc;

use depscan_core::{ScanError, ServiceConfig};
use depscan_fs::{
    FileSystem, InMemoryObjectStore, ObjectStore, OnDiskObjectStore, PhysicalFileSystem,
    SharedCasCache, SharedFileSystemCache,
};
use tracing::debug;

use crate::driver::{Driver, GenericDriver};
use crate::prebuilt::{JsonModuleFileReader, ModuleFileReader};
use crate::worker::DependencyScanningWorker;

/// Owns the configuration and caches of one build.
///
/// Create a single service per build and one worker per thread:
///
/// ```rust,no_run
/// use depscan_core::{ScanningOutputFormat, ServiceConfig};
/// use depscan_scan::DependencyScanningService;
///
/// let service = DependencyScanningService::new(ServiceConfig::new(ScanningOutputFormat::Full))?;
/// let mut worker = service.create_worker();
/// # Ok::<(), depscan_core::ScanError>(())
/// ```
#[derive(Debug)]
pub struct DependencyScanningService {
    config: ServiceConfig,
    shared_cache: Arc<SharedFileSystemCache>,
    cas_cache: Option<Arc<SharedCasCache>>,
    driver: Arc<dyn Driver>,
    module_file_reader: Arc<dyn ModuleFileReader>,
}

impl DependencyScanningService {
    /// Create a service, opening the object store when the output format
    /// needs one.
    pub fn new(config: ServiceConfig) -> Result<Self, ScanError> {
        if let Some(path) = &config.cas_path {
            if path.as_os_str().is_empty() || !config.use_cas_scanning() {
                return Err(ScanError::InvalidConfig {
                    message: format!(
                        "CAS path {} requires a content-addressed output format, got {:?}",
                        path.display(),
                        config.format
                    ),
                });
            }
        }

        let cas_cache = if config.use_cas_scanning() {
            let store: Arc<dyn ObjectStore> = match &config.cas_path {
                Some(path) => Arc::new(OnDiskObjectStore::open(path)?),
                None => Arc::new(InMemoryObjectStore::new()),
            };
            Some(Arc::new(SharedCasCache::new(store)))
        } else {
            None
        };

        debug!(
            format = ?config.format,
            mode = ?config.mode,
            cas = cas_cache.is_some(),
            "Created scanning service"
        );
        Ok(Self {
            config,
            shared_cache: Arc::new(SharedFileSystemCache::new()),
            cas_cache,
            driver: Arc::new(GenericDriver::new()),
            module_file_reader: Arc::new(JsonModuleFileReader),
        })
    }

    /// Replace the driver used to split command lines into jobs.
    pub fn with_driver(mut self, driver: Arc<dyn Driver>) -> Self {
        self.driver = driver;
        self
    }

    /// Replace the reader used for prebuilt module files.
    pub fn with_module_file_reader(mut self, reader: Arc<dyn ModuleFileReader>) -> Self {
        self.module_file_reader = reader;
        self
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn shared_cache(&self) -> &Arc<SharedFileSystemCache> {
        &self.shared_cache
    }

    pub fn cas_cache(&self) -> Option<&Arc<SharedCasCache>> {
        self.cas_cache.as_ref()
    }

    /// The object store of content-addressed formats.
    pub fn store(&self) -> Option<&Arc<dyn ObjectStore>> {
        self.cas_cache.as_ref().map(|cas| cas.store())
    }

    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    pub fn module_file_reader(&self) -> &Arc<dyn ModuleFileReader> {
        &self.module_file_reader
    }

    /// A worker reading the real filesystem.
    pub fn create_worker(&self) -> DependencyScanningWorker {
        self.create_worker_with_file_system(Arc::new(PhysicalFileSystem::new()))
    }

    /// A worker reading `base` instead of the real filesystem.
    pub fn create_worker_with_file_system(&self, base: Arc<dyn FileSystem>) -> DependencyScanningWorker {
        DependencyScanningWorker::new(self, base)
    }
}
