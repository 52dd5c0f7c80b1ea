//! Signs a user in to Spotify from the terminal and prints the first page of their saved albums.
//!
//! Set `SPOTIFY_CLIENT_ID` to a registered public client whose allow-list contains
//! `SPOTIFY_REDIRECT_URI` (defaults to `http://127.0.0.1:8888/callback`). The token set is kept
//! in `SPOTIFY_TOKEN_FILE` (defaults to a file in the temp directory), so a second run skips the
//! browser step.

// std
use std::{env, io, path::PathBuf, sync::Arc};
// crates.io
use color_eyre::{Result, eyre::eyre};
// self
use spotify_auth::{
	accessor,
	auth::ScopeSet,
	provider::ProviderDescriptor,
	reqwest,
	session::{ReqwestSessionController, SessionConfig, SessionStatus},
	store::{FileStore, TokenStore},
	url::Url,
};

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;

	let client_id =
		env::var("SPOTIFY_CLIENT_ID").map_err(|_| eyre!("SPOTIFY_CLIENT_ID must be set."))?;
	let redirect_uri = env::var("SPOTIFY_REDIRECT_URI")
		.unwrap_or_else(|_| "http://127.0.0.1:8888/callback".into());
	let token_file = env::var("SPOTIFY_TOKEN_FILE")
		.map(PathBuf::from)
		.unwrap_or_else(|_| env::temp_dir().join("spotify_login_demo.json"));
	let store: Arc<dyn TokenStore> = Arc::new(FileStore::open(token_file)?);
	let config = SessionConfig::new(client_id, Url::parse(&redirect_uri)?)
		.with_scope(ScopeSet::new(["user-library-read"])?);
	let controller = ReqwestSessionController::new(config, ProviderDescriptor::spotify()?, store)?;

	if controller.restore().await? == SessionStatus::LoggedOut {
		let request = controller.login()?;

		println!("Open this URL and approve access:\n\n  {}\n", request.authorize_url);
		println!("Then paste the full URL your browser was redirected to:");

		let mut line = String::new();

		io::stdin().read_line(&mut line)?;
		controller.complete_login_from_redirect(&Url::parse(line.trim())?).await?;
	}

	println!("Session: {:?}.", controller.status());

	let response = accessor::authorize_request(
		&controller,
		reqwest::Client::new().get("https://api.spotify.com/v1/me/albums?limit=5"),
	)
	.await?
	.send()
	.await?
	.error_for_status()?;

	println!("{}", response.text().await?);

	Ok(())
}
