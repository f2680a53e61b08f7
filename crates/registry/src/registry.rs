use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use stowaway_dropbox::{DropboxAdapter, HttpDropboxClient};
use stowaway_gdrive::{GDriveAdapter, HttpDriveClient};
use stowaway_s3::{HttpS3Client, S3Adapter};
use stowaway_storage::{LocalAdapter, StorageAdapter};
use tracing::{debug, info};

use crate::{RegistryError, StorageConfig, StorageKind};

/// Builds an adapter from a storage configuration of its kind.
pub type Constructor = fn(&str, &StorageConfig) -> Result<Box<dyn StorageAdapter>, RegistryError>;

/// Provider constructors plus the named storages configured for this run.
#[derive(Default)]
pub struct StorageRegistry {
    constructors: HashMap<StorageKind, Constructor>,
    storages: BTreeMap<String, StorageConfig>,
    default: Option<String>,
}

impl StorageRegistry {
    /// An empty registry with no constructors.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in provider constructors.
    pub fn with_default_providers() -> Self {
        let mut registry = Self::new();
        registry.register(StorageKind::Local, build_local);
        registry.register(StorageKind::S3, build_s3);
        registry.register(StorageKind::GoogleDrive, build_gdrive);
        registry.register(StorageKind::Dropbox, build_dropbox);
        registry
    }

    /// Installs or replaces the constructor for `kind`.
    pub fn register(&mut self, kind: StorageKind, constructor: Constructor) {
        self.constructors.insert(kind, constructor);
    }

    /// Adds a named storage. The first storage added becomes the default
    /// until [`StorageRegistry::set_default`] says otherwise.
    pub fn add_storage(&mut self, name: impl Into<String>, config: StorageConfig) {
        let name = name.into();
        debug!(storage = %name, kind = %config.kind(), "storage configured");
        if self.default.is_none() {
            self.default = Some(name.clone());
        }
        self.storages.insert(name, config);
    }

    pub fn set_default(&mut self, name: &str) -> Result<(), RegistryError> {
        if !self.storages.contains_key(name) {
            return Err(RegistryError::UnknownStorage(name.to_string()));
        }
        self.default = Some(name.to_string());
        Ok(())
    }

    pub fn default_name(&self) -> Option<&str> {
        self.default.as_deref()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.storages.keys().map(String::as_str)
    }

    pub fn config(&self, name: &str) -> Option<&StorageConfig> {
        self.storages.get(name)
    }

    pub fn config_mut(&mut self, name: &str) -> Option<&mut StorageConfig> {
        self.storages.get_mut(name)
    }

    /// Builds the adapter for a named storage.
    pub fn build(&self, name: &str) -> Result<Box<dyn StorageAdapter>, RegistryError> {
        let config = self
            .storages
            .get(name)
            .ok_or_else(|| RegistryError::UnknownStorage(name.to_string()))?;
        let kind = config.kind();
        let constructor = self
            .constructors
            .get(&kind)
            .ok_or(RegistryError::Unsupported(kind))?;
        let adapter = constructor(name, config)?;
        info!(storage = name, kind = %kind, "storage adapter ready");
        Ok(adapter)
    }

    pub fn build_default(&self) -> Result<Box<dyn StorageAdapter>, RegistryError> {
        let name = self.default.as_deref().ok_or(RegistryError::NoDefault)?;
        self.build(name)
    }
}

fn build_local(_: &str, config: &StorageConfig) -> Result<Box<dyn StorageAdapter>, RegistryError> {
    let StorageConfig::Local { root } = config else {
        return Err(RegistryError::Unsupported(config.kind()));
    };
    Ok(Box::new(LocalAdapter::new(root.clone())))
}

fn build_s3(_: &str, config: &StorageConfig) -> Result<Box<dyn StorageAdapter>, RegistryError> {
    let StorageConfig::S3 { client, prefix } = config else {
        return Err(RegistryError::Unsupported(config.kind()));
    };
    let api = Arc::new(HttpS3Client::new(client.clone())?);
    Ok(Box::new(S3Adapter::new(api, prefix)?))
}

fn build_gdrive(
    name: &str,
    config: &StorageConfig,
) -> Result<Box<dyn StorageAdapter>, RegistryError> {
    let StorageConfig::GoogleDrive {
        access_token,
        folder,
        folder_id,
    } = config
    else {
        return Err(RegistryError::Unsupported(config.kind()));
    };
    if access_token.is_empty() {
        return Err(RegistryError::MissingToken(name.to_string()));
    }
    let api = Arc::new(HttpDriveClient::new(access_token)?);
    let mut adapter = GDriveAdapter::new(api, folder)?;
    if let Some(id) = folder_id {
        adapter = adapter.with_root_id(id.clone());
    }
    Ok(Box::new(adapter))
}

fn build_dropbox(
    name: &str,
    config: &StorageConfig,
) -> Result<Box<dyn StorageAdapter>, RegistryError> {
    let StorageConfig::Dropbox {
        access_token,
        folder,
    } = config
    else {
        return Err(RegistryError::Unsupported(config.kind()));
    };
    if access_token.is_empty() {
        return Err(RegistryError::MissingToken(name.to_string()));
    }
    let api = Arc::new(HttpDropboxClient::new(access_token)?);
    Ok(Box::new(DropboxAdapter::new(api, folder)?))
}
