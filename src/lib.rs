//! Spotify OAuth 2.0 session core: Authorization Code + PKCE login, durable token sets, and a
//! single-flight refresh gate that every album/library API call borrows its bearer token from.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod accessor;
pub mod auth;
pub mod error;
pub mod http;
pub mod oauth;
pub mod obs;
pub mod pkce;
pub mod provider;
pub mod retry;
pub mod session;
pub mod store;

mod _prelude {
	pub use std::{
		collections::BTreeMap,
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{AuthErrorKind, Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(test)] use {color_eyre as _, httpmock as _};
