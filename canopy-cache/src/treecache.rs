// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cache service handing out change trees.
use canopy_core::Hash;
use canopy_tree::{Account, ChangeTree, NoOpListener, TreeError, TreeProvider};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::config::CacheConfig;
use crate::ocache::{CacheError, Handle, Loader, Object, ObjectCache};

impl Object for ChangeTree {
    fn close(&self) {
        if let Err(err) = ChangeTree::close(self) {
            warn!(tree = %self.id().short(), %err, "closing tree failed");
        }
    }
}

/// Loads trees from a provider and opens them with the keys of an account.
#[derive(Debug)]
pub struct TreeLoader<P> {
    provider: P,
    account: Account,
}

impl<P> TreeLoader<P> {
    pub fn new(provider: P, account: Account) -> Self {
        Self { provider, account }
    }
}

impl<P> Loader<Hash, ChangeTree> for TreeLoader<P>
where
    P: TreeProvider + Send + Sync + 'static,
{
    type Error = TreeLoadError;

    async fn load(&self, id: &Hash) -> Result<ChangeTree, Self::Error> {
        let snapshot = self
            .provider
            .load(id)
            .await
            .map_err(|err| TreeLoadError::Provider(err.to_string()))?
            .ok_or(TreeLoadError::NotFound(*id))?;

        let tree = ChangeTree::open(snapshot, &self.account, NoOpListener)?;
        Ok(tree)
    }
}

#[derive(Debug, Error)]
pub enum TreeLoadError {
    #[error("tree {0} not found")]
    NotFound(Hash),

    #[error("tree provider failed: {0}")]
    Provider(String),

    #[error(transparent)]
    Tree(#[from] TreeError),
}

/// Reference to a cached tree, released when dropped.
pub type TreeHandle = Handle<Hash, ChangeTree, TreeLoadError>;

/// Distinguishes trees which could not be obtained from operations a tree refused.
#[derive(Debug, Error)]
pub enum TreeCacheError {
    #[error("tree {0} is unavailable: {1}")]
    Unavailable(Hash, CacheError<TreeLoadError>),

    #[error("tree rejected the operation: {0}")]
    Rejected(TreeError),
}

/// Trees of one account, loaded on demand and shared between callers.
pub struct TreeCache<P>
where
    P: TreeProvider + Send + Sync + 'static,
{
    cache: ObjectCache<Hash, ChangeTree, TreeLoader<P>>,
}

impl<P> Clone for TreeCache<P>
where
    P: TreeProvider + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
        }
    }
}

impl<P> TreeCache<P>
where
    P: TreeProvider + Send + Sync + 'static,
{
    pub fn new(provider: P, account: Account, config: CacheConfig) -> Self {
        Self {
            cache: ObjectCache::new(TreeLoader::new(provider, account), config),
        }
    }

    /// Underlying object cache.
    pub fn cache(&self) -> &ObjectCache<Hash, ChangeTree, TreeLoader<P>> {
        &self.cache
    }

    pub async fn get(&self, id: &Hash) -> Result<TreeHandle, CacheError<TreeLoadError>> {
        self.cache.get(id).await
    }

    /// Run a function against a tree.
    ///
    /// The tree is released on every exit path, including panics, and only if it was obtained.
    pub async fn with_tree<F, T>(&self, id: &Hash, f: F) -> Result<T, TreeCacheError>
    where
        F: FnOnce(&ChangeTree) -> Result<T, TreeError>,
    {
        let handle = self
            .cache
            .get(id)
            .await
            .map_err(|err| TreeCacheError::Unavailable(*id, err))?;

        f(&handle).map_err(TreeCacheError::Rejected)
    }

    pub fn gc(&self) -> Result<usize, CacheError<TreeLoadError>> {
        self.cache.gc()
    }

    pub fn spawn_gc(&self) -> JoinHandle<()> {
        self.cache.spawn_gc()
    }

    pub async fn close(&self) -> Result<(), CacheError<TreeLoadError>> {
        self.cache.close().await
    }
}
