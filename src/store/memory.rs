//! Thread-safe in-memory [`TokenStore`] for tests, demos, and hosts without durable storage.

// self
use crate::{
	_prelude::*,
	auth::TokenSet,
	store::{StoreFuture, TokenStore},
};

/// Keeps the token set in-process; clones share the same slot.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore(Arc<RwLock<Option<TokenSet>>>);
impl MemoryStore {
	/// Creates a store pre-populated with `tokens`, as if restored from a previous run.
	pub fn with_tokens(tokens: TokenSet) -> Self {
		Self(Arc::new(RwLock::new(Some(tokens))))
	}

	/// Returns the current contents without going through the async contract.
	pub fn snapshot(&self) -> Option<TokenSet> {
		self.0.read().clone()
	}
}
impl TokenStore for MemoryStore {
	fn save(&self, tokens: TokenSet) -> StoreFuture<'_, ()> {
		let slot = self.0.clone();

		Box::pin(async move {
			*slot.write() = Some(tokens);

			Ok(())
		})
	}

	fn load(&self) -> StoreFuture<'_, Option<TokenSet>> {
		let slot = self.0.clone();

		Box::pin(async move { Ok(slot.read().clone()) })
	}

	fn clear(&self) -> StoreFuture<'_, ()> {
		let slot = self.0.clone();

		Box::pin(async move {
			slot.write().take();

			Ok(())
		})
	}
}
