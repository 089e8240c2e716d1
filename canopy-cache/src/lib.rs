// SPDX-License-Identifier: MIT OR Apache-2.0

//! Concurrent object cache and the tree service built on top of it.
//!
//! [`ObjectCache`] is generic over keys, objects and the [`Loader`] creating them. At most one
//! load runs per key, concurrent callers wait for it and share the result. Every caller receives a
//! [`Handle`] which keeps the object referenced until it is dropped.
//!
//! [`TreeCache`] wires the cache to a [`TreeProvider`](canopy_tree::TreeProvider) and exposes
//! [`TreeCache::with_tree`], which distinguishes trees that could not be obtained from operations
//! the tree refused.
//!
//! ## Example
//!
//! ```
//! use canopy_cache::{CacheConfig, TreeCache};
//! use canopy_core::{DocumentKey, PrivateKey, Rng};
//! use canopy_tree::{Account, ChangeTree, MemoryTreeProvider, NoOpListener, Payload};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let private_key = PrivateKey::new();
//! let document_key = DocumentKey::generate(&Rng::default()).unwrap();
//!
//! let tree = ChangeTree::create(
//!     private_key.clone(),
//!     document_key.clone(),
//!     Payload::default(),
//!     NoOpListener,
//! )
//! .unwrap();
//!
//! let provider = MemoryTreeProvider::new();
//! provider.insert(tree.snapshot().unwrap());
//!
//! let account = Account::new(private_key).with_document_key(tree.id(), document_key);
//! let trees = TreeCache::new(provider, account, CacheConfig::default());
//!
//! let change = trees
//!     .with_tree(&tree.id(), |tree| tree.add_content(Payload::content("hello")))
//!     .await
//!     .unwrap();
//! assert_eq!(change.parents, vec![tree.id()]);
//!
//! trees.close().await.unwrap();
//! # }
//! ```
mod config;
mod ocache;
mod treecache;

pub use config::CacheConfig;
pub use ocache::{CacheError, Handle, Loader, Object, ObjectCache};
pub use treecache::{TreeCache, TreeCacheError, TreeHandle, TreeLoadError, TreeLoader};
