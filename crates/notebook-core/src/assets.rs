//! Asset Fetcher: stages a component's files from object storage into a
//! session's scratch directory, and resolves the notebook source itself.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use futures::StreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as StorePath;
use object_store::ObjectStore;

use crate::config::Config;
use crate::error::{Error, Result};

/// The narrow interface the rest of the core depends on, so tests can
/// substitute an in-memory backend for the production object-store client.
pub trait AssetFetcher: Send + Sync {
    /// Whether `path` exists.
    fn stat(&self, path: &str) -> impl Future<Output = Result<bool>> + Send;
    /// Fetch the bytes at `path`.
    fn fetch(&self, path: &str) -> impl Future<Output = Result<Vec<u8>>> + Send;
    /// List every object path under `prefix`.
    fn list(&self, prefix: &str) -> impl Future<Output = Result<Vec<String>>> + Send;
}

/// Production backend talking to an S3-compatible endpoint.
pub struct ObjectStoreAssetFetcher {
    store: Arc<dyn ObjectStore>,
}

impl ObjectStoreAssetFetcher {
    /// Build a fetcher from process configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let store = AmazonS3Builder::new()
            .with_endpoint(&config.object_store_endpoint)
            .with_access_key_id(&config.object_store_access_key)
            .with_secret_access_key(&config.object_store_secret_key)
            .with_bucket_name(&config.object_store_bucket)
            .with_allow_http(!config.object_store_secure)
            .build()
            .map_err(Error::ObjectStore)?;
        Ok(Self { store: Arc::new(store) })
    }

    /// Wrap an arbitrary backend (e.g. an in-memory store in tests).
    pub fn with_store(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }
}

impl AssetFetcher for ObjectStoreAssetFetcher {
    async fn stat(&self, path: &str) -> Result<bool> {
        match self.store.head(&StorePath::from(path)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(Error::from(e)),
        }
    }

    async fn fetch(&self, path: &str) -> Result<Vec<u8>> {
        let result = self.store.get(&StorePath::from(path)).await.map_err(Error::from)?;
        let bytes = result.bytes().await.map_err(Error::from)?;
        Ok(bytes.to_vec())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut stream = self.store.list(Some(&StorePath::from(prefix)));
        let mut names = Vec::new();
        while let Some(meta) = stream.next().await {
            let meta = meta.map_err(Error::from)?;
            names.push(meta.location.to_string());
        }
        Ok(names)
    }
}

fn primary_prefix(component_id: &str) -> String {
    format!("components/{component_id}/assets/")
}

fn legacy_prefix(component_id: &str) -> String {
    format!("marimo/components/{component_id}/assets/")
}

/// Stage every asset for `component_id` into `scratch_dir`, flattening
/// asset-type subdirectories to a bare filename. Missing prefixes or zero
/// results are not an error; any transport failure is collected as a
/// warning string rather than failing the caller.
pub async fn stage_assets(fetcher: &impl AssetFetcher, component_id: &str, scratch_dir: &Path) -> Vec<String> {
    let mut warnings = Vec::new();

    for prefix in [primary_prefix(component_id), legacy_prefix(component_id)] {
        let paths = match fetcher.list(&prefix).await {
            Ok(paths) => paths,
            Err(e) => {
                warnings.push(format!("failed to list assets under '{prefix}': {e}"));
                continue;
            }
        };

        for path in paths {
            let Some(filename) = Path::new(&path).file_name().and_then(|f| f.to_str()) else {
                continue;
            };

            match fetcher.fetch(&path).await {
                Ok(bytes) => {
                    let dest = scratch_dir.join(filename);
                    if let Err(e) = tokio::fs::write(&dest, &bytes).await {
                        warnings.push(format!("failed to write asset '{filename}': {e}"));
                    }
                }
                Err(e) => warnings.push(format!("failed to fetch asset '{path}': {e}")),
            }
        }
    }

    warnings
}

/// Resolve the notebook source at `notebook_path`, falling back to the
/// `component.py`/`notebook.py` filename swap for backward compatibility.
pub async fn resolve_notebook_source(fetcher: &impl AssetFetcher, notebook_path: &str) -> Result<Vec<u8>> {
    if fetcher.stat(notebook_path).await? {
        return fetcher.fetch(notebook_path).await;
    }

    let alternate = swap_notebook_filename(notebook_path);
    if alternate != notebook_path && fetcher.stat(&alternate).await? {
        return fetcher.fetch(&alternate).await;
    }

    Err(Error::NotebookNotFound(notebook_path.to_string()))
}

fn swap_notebook_filename(path: &str) -> String {
    if let Some(stripped) = path.strip_suffix("component.py") {
        format!("{stripped}notebook.py")
    } else if let Some(stripped) = path.strip_suffix("notebook.py") {
        format!("{stripped}component.py")
    } else {
        path.to_string()
    }
}
