//! Bearer token accessor consumed by the Spotify Web API client.
//!
//! API wrappers depend on [`BearerTokenAccessor`] alone: they ask for a token right before each
//! request and, on [`Error::NotAuthenticated`] or [`Error::SessionExpired`] (see
//! [`Error::requires_login`]), send the user back through login.

// self
use crate::{
	_prelude::*,
	auth::TokenSecret,
	http::TokenHttpClient,
	oauth::TransportErrorMapper,
	session::SessionController,
};

/// Boxed future returned by [`BearerTokenAccessor::bearer_token`].
pub type TokenFuture<'a> = Pin<Box<dyn Future<Output = Result<TokenSecret>> + 'a + Send>>;

/// Source of valid access tokens for outbound API calls.
///
/// Implementations suspend only the calling task while a refresh is in flight.
pub trait BearerTokenAccessor
where
	Self: Send + Sync,
{
	/// Returns an access token that is valid at the time of the call.
	fn bearer_token(&self) -> TokenFuture<'_>;
}
impl<T> BearerTokenAccessor for Arc<T>
where
	T: ?Sized + BearerTokenAccessor,
{
	fn bearer_token(&self) -> TokenFuture<'_> {
		(**self).bearer_token()
	}
}
impl<C, M> BearerTokenAccessor for SessionController<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn bearer_token(&self) -> TokenFuture<'_> {
		Box::pin(self.get_token())
	}
}

/// Attaches `Authorization: Bearer <token>` to a reqwest request.
#[cfg(feature = "reqwest")]
pub async fn authorize_request(
	accessor: &dyn BearerTokenAccessor,
	request: reqwest::RequestBuilder,
) -> Result<reqwest::RequestBuilder> {
	let token = accessor.bearer_token().await?;

	Ok(request.header(reqwest::header::AUTHORIZATION, token.bearer_header_value()))
}

#[cfg(test)]
mod tests {
	// std
	use std::sync::atomic::{AtomicUsize, Ordering};
	// self
	use super::*;

	struct FixedAccessor {
		calls: AtomicUsize,
	}
	impl BearerTokenAccessor for FixedAccessor {
		fn bearer_token(&self) -> TokenFuture<'_> {
			self.calls.fetch_add(1, Ordering::SeqCst);

			Box::pin(async { Ok(TokenSecret::new("AT1")) })
		}
	}

	#[tokio::test]
	async fn shared_accessors_delegate() {
		let accessor = Arc::new(FixedAccessor { calls: AtomicUsize::new(0) });
		let shared: Arc<dyn BearerTokenAccessor> = accessor.clone();
		let token = shared.bearer_token().await.expect("Fixed accessor should yield a token.");

		assert_eq!(token.bearer_header_value(), "Bearer AT1");
		assert_eq!(accessor.calls.load(Ordering::SeqCst), 1);
	}

	#[cfg(feature = "reqwest")]
	#[tokio::test]
	async fn authorize_request_sets_bearer_header() {
		let accessor = FixedAccessor { calls: AtomicUsize::new(0) };
		let request = authorize_request(
			&accessor,
			ReqwestClient::new().get("https://api.spotify.com/v1/me/albums"),
		)
		.await
		.expect("Request should be authorized.")
		.build()
		.expect("Request should build.");

		assert_eq!(
			request.headers().get(reqwest::header::AUTHORIZATION).map(|v| v.as_bytes()),
			Some(&b"Bearer AT1"[..])
		);
	}
}
