// self
use crate::_prelude::*;

/// Provider-specific quirks that influence how the authorize URL is built.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderQuirks {
	/// Character used to join scopes when constructing `scope` parameters.
	pub scope_delimiter: char,
	/// Extra query parameters appended to the authorize URL after the PKCE parameters.
	pub authorize_params: BTreeMap<String, String>,
}
impl Default for ProviderQuirks {
	fn default() -> Self {
		Self { scope_delimiter: ' ', authorize_params: BTreeMap::new() }
	}
}
