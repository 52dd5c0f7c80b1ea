//! Provider descriptor data structures shared by the login and refresh flows.

/// Builder API for assembling provider descriptors.
pub mod builder;
/// Grant identifiers used on the token endpoint.
pub mod grant;
/// Provider-specific quirk toggles.
pub mod quirks;

pub use builder::*;
pub use grant::*;
pub use quirks::*;

// self
use crate::{_prelude::*, error::ConfigError};

const SPOTIFY_AUTHORIZE_URL: &str = "https://accounts.spotify.com/authorize";
const SPOTIFY_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";

/// Endpoint set declared by a provider descriptor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderEndpoints {
	/// Authorization endpoint the browser is redirected to.
	pub authorization: Url,
	/// Token endpoint used for code exchanges and refreshes.
	pub token: Url,
}

/// Immutable provider descriptor consumed by the session controller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
	/// Human-readable provider name, used in diagnostics.
	pub name: String,
	/// Endpoint definitions exposed by the provider.
	pub endpoints: ProviderEndpoints,
	/// Provider-specific quirks.
	pub quirks: ProviderQuirks,
}
impl ProviderDescriptor {
	/// Creates a new builder for the provided provider name.
	pub fn builder(name: impl Into<String>) -> ProviderDescriptorBuilder {
		ProviderDescriptorBuilder::new(name)
	}

	/// Descriptor for Spotify's accounts service.
	pub fn spotify() -> Result<Self, ConfigError> {
		Self::spotify_builder()?.build().map_err(ConfigError::from)
	}

	/// Builder preloaded with Spotify's endpoints, for hosts that add quirks such as
	/// `show_dialog`.
	pub fn spotify_builder() -> Result<ProviderDescriptorBuilder, ConfigError> {
		let authorization = Url::parse(SPOTIFY_AUTHORIZE_URL)
			.map_err(|source| ConfigError::InvalidDescriptor { source })?;
		let token = Url::parse(SPOTIFY_TOKEN_URL)
			.map_err(|source| ConfigError::InvalidDescriptor { source })?;

		Ok(Self::builder("spotify").authorization_endpoint(authorization).token_endpoint(token))
	}
}
