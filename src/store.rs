//! Storage contract and built-in backends for the session's token set.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

// self
use crate::{_prelude::*, auth::TokenSet};

/// Storage key under which the token set is persisted unless overridden.
pub const DEFAULT_STORAGE_KEY: &str = "spotify_auth.token_set";

/// Boxed future returned by [`TokenStore`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Durable persistence of the current token set.
///
/// Implementations must replace the record atomically: a reader never observes fields from two
/// different token sets. Unreadable records are reported as absent rather than as errors.
pub trait TokenStore
where
	Self: Send + Sync,
{
	/// Persists or replaces the token set.
	fn save(&self, tokens: TokenSet) -> StoreFuture<'_, ()>;

	/// Loads the persisted token set, if present and readable.
	fn load(&self) -> StoreFuture<'_, Option<TokenSet>>;

	/// Removes the persisted token set; clearing an empty store succeeds.
	fn clear(&self) -> StoreFuture<'_, ()>;
}
impl<T> TokenStore for Arc<T>
where
	T: ?Sized + TokenStore,
{
	fn save(&self, tokens: TokenSet) -> StoreFuture<'_, ()> {
		(**self).save(tokens)
	}

	fn load(&self) -> StoreFuture<'_, Option<TokenSet>> {
		(**self).load()
	}

	fn clear(&self) -> StoreFuture<'_, ()> {
		(**self).clear()
	}
}

/// Error type produced by [`TokenStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Serialization failures surfaced by the backend.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}
