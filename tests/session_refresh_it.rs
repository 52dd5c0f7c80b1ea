mod common;

// std
use std::{sync::Arc, time::Duration};
// self
use common::*;
use spotify_auth::{
	auth::TokenSecret,
	error::{Error, ProtocolError},
	session::SessionStatus,
	store::{MemoryStore, TokenStore},
};
use tokio::task::JoinHandle;

fn spawn_get_token(controller: &Arc<ScriptedController>) -> JoinHandle<Result<TokenSecret, Error>> {
	let controller = controller.clone();

	tokio::spawn(async move { controller.get_token().await })
}

async fn wait_for_waiters(controller: &ScriptedController, waiters: usize) {
	wait_until(|| controller.status() == SessionStatus::Refreshing { waiters }).await;
}

#[tokio::test]
async fn concurrent_callers_share_one_refresh() {
	const CALLERS: usize = 8;

	let http = ScriptedHttpClient::default();
	let store = Arc::new(RecordingStore::default());
	let controller =
		Arc::new(restored_controller(&http, store.clone(), expired_tokens("AT1", Some("RT1"))).await);

	http.hold();
	http.push(Reply::tokens("AT2", Some("RT2"), 3600));

	let handles = (0..CALLERS).map(|_| spawn_get_token(&controller)).collect::<Vec<_>>();

	wait_for_waiters(&controller, CALLERS).await;
	http.release();

	for handle in handles {
		let token = handle
			.await
			.expect("Caller task should not panic.")
			.expect("Every caller should receive the refreshed token.");

		assert_eq!(token.expose(), "AT2");
	}

	assert_eq!(http.calls(), 1);
	assert_eq!(controller.refresh_metrics().attempts(), 1);
	assert_eq!(controller.refresh_metrics().coalesced(), (CALLERS - 1) as u64);
	assert_eq!(
		store.snapshot().and_then(|tokens| tokens.refresh_token).map(|t| t.expose().to_owned()),
		Some("RT2".to_owned())
	);
	assert!(matches!(controller.status(), SessionStatus::Authenticated { expired: false, .. }));
}

#[tokio::test]
async fn omitted_refresh_token_keeps_the_previous_one() {
	let http = ScriptedHttpClient::default();
	let store = Arc::new(RecordingStore::default());
	let controller =
		restored_controller(&http, store.clone(), expired_tokens("AT1", Some("RT1"))).await;

	http.push(Reply::tokens("AT2", None, 3600));

	assert_eq!(controller.get_token().await.expect("Refresh should succeed.").expose(), "AT2");
	assert_eq!(http.last_request().get("refresh_token").map(String::as_str), Some("RT1"));

	http.push(Reply::tokens("AT3", None, 3600));

	assert_eq!(
		controller.force_refresh().await.expect("Second refresh should succeed.").expose(),
		"AT3"
	);

	let form = http.last_request();

	assert_eq!(form.get("grant_type").map(String::as_str), Some("refresh_token"));
	assert_eq!(form.get("refresh_token").map(String::as_str), Some("RT1"));
	assert_eq!(form.get("client_id").map(String::as_str), Some(CLIENT_ID));
	assert_eq!(
		store.snapshot().and_then(|tokens| tokens.refresh_token).map(|t| t.expose().to_owned()),
		Some("RT1".to_owned())
	);
}

#[tokio::test]
async fn invalid_grant_expires_the_session_for_every_waiter() {
	let http = ScriptedHttpClient::default();
	let store = Arc::new(RecordingStore::default());
	let controller =
		Arc::new(restored_controller(&http, store.clone(), expired_tokens("AT1", Some("RT1"))).await);

	http.hold();
	http.push(Reply::invalid_grant());

	let handles = (0..3).map(|_| spawn_get_token(&controller)).collect::<Vec<_>>();

	wait_for_waiters(&controller, 3).await;
	http.release();

	for handle in handles {
		let result = handle.await.expect("Caller task should not panic.");

		assert!(matches!(result, Err(Error::SessionExpired)), "Unexpected outcome: {result:?}.");
	}

	assert_eq!(http.calls(), 1);
	assert_eq!(store.clears(), 1);
	assert!(store.load().await.expect("Load should succeed.").is_none());
	assert_eq!(controller.status(), SessionStatus::LoggedOut);
	assert!(matches!(controller.get_token().await, Err(Error::NotAuthenticated)));
}

#[tokio::test]
async fn logout_during_refresh_discards_the_late_result() {
	let http = ScriptedHttpClient::default();
	let store = Arc::new(RecordingStore::default());
	let controller =
		Arc::new(restored_controller(&http, store.clone(), expired_tokens("AT1", Some("RT1"))).await);

	http.hold();
	http.push(Reply::tokens("AT2", Some("RT2"), 3600));

	let leader = spawn_get_token(&controller);
	let waiter = spawn_get_token(&controller);

	wait_for_waiters(&controller, 2).await;
	controller.logout().await.expect("Logout should not wait for the refresh.");

	assert_eq!(controller.status(), SessionStatus::LoggedOut);

	for caller in [leader, waiter] {
		assert!(matches!(
			caller.await.expect("Caller task should not panic."),
			Err(Error::LoggedOutExplicitly)
		));
	}

	http.release();
	wait_until(|| controller.refresh_metrics().discarded() == 1).await;

	assert_eq!(store.saves(), 0, "No token set may be written after logout.");
	assert!(store.snapshot().is_none());
	assert_eq!(controller.status(), SessionStatus::LoggedOut);
}

#[tokio::test]
async fn transport_failure_keeps_the_stale_set_for_a_later_retry() {
	let http = ScriptedHttpClient::default();
	let store = Arc::new(RecordingStore::default());
	let controller =
		Arc::new(restored_controller(&http, store.clone(), expired_tokens("AT1", Some("RT1"))).await);

	http.hold();

	for _ in 0..3 {
		http.push(Reply::NetworkDown);
	}

	let leader = spawn_get_token(&controller);
	let waiter = spawn_get_token(&controller);

	wait_for_waiters(&controller, 2).await;
	http.release();

	assert!(matches!(leader.await.expect("Leader task should not panic."), Err(Error::Network(_))));
	assert!(matches!(waiter.await.expect("Waiter task should not panic."), Err(Error::Network(_))));
	assert_eq!(http.calls(), 3, "Network failures are retried up to the attempt budget.");
	assert!(matches!(controller.status(), SessionStatus::Authenticated { expired: true, .. }));
	assert_eq!(store.clears(), 0);

	http.push(Reply::tokens("AT2", None, 3600));

	assert_eq!(controller.get_token().await.expect("Later refresh should succeed.").expose(), "AT2");
	assert_eq!(http.last_request().get("refresh_token").map(String::as_str), Some("RT1"));
}

#[tokio::test]
async fn protocol_failure_is_not_retried() {
	let http = ScriptedHttpClient::default();
	let controller = restored_controller(
		&http,
		Arc::new(RecordingStore::default()),
		expired_tokens("AT1", Some("RT1")),
	)
	.await;

	http.push(Reply::Json(503, "<html>Service Unavailable</html>".into()));

	let err = controller.get_token().await.expect_err("An HTML error page must fail the refresh.");

	assert!(matches!(err, Error::Protocol(ProtocolError::TokenEndpoint { status: Some(503), .. })));
	assert_eq!(http.calls(), 1);
	assert!(controller.status().is_authenticated());
	assert_eq!(controller.refresh_metrics().failures(), 1);
}

#[tokio::test]
async fn abandoned_caller_does_not_cancel_the_refresh() {
	let http = ScriptedHttpClient::default();
	let store = Arc::new(RecordingStore::default());
	let controller =
		Arc::new(restored_controller(&http, store.clone(), expired_tokens("AT1", Some("RT1"))).await);

	http.hold();
	http.push(Reply::tokens("AT2", Some("RT2"), 3600));
	// A rotating provider rejects a second use of RT1.
	http.push(Reply::invalid_grant());

	let timed_out = tokio::time::timeout(Duration::from_millis(50), controller.get_token()).await;

	assert!(timed_out.is_err(), "The held refresh should outlast the caller's timeout.");

	http.wait_for_calls(1).await;

	let waiter = spawn_get_token(&controller);

	wait_for_waiters(&controller, 2).await;
	http.release();

	let token = waiter
		.await
		.expect("Waiter task should not panic.")
		.expect("Waiter should receive the refresh started by the abandoned caller.");

	assert_eq!(token.expose(), "AT2");
	assert_eq!(http.calls(), 1);
	assert_eq!(http.last_request().get("refresh_token").map(String::as_str), Some("RT1"));
	assert_eq!(
		store.snapshot().and_then(|tokens| tokens.refresh_token).map(|t| t.expose().to_owned()),
		Some("RT2".to_owned())
	);
	assert!(matches!(controller.status(), SessionStatus::Authenticated { expired: false, .. }));
}

#[tokio::test]
async fn refresh_lands_after_every_caller_left() {
	let http = ScriptedHttpClient::default();
	let store = Arc::new(RecordingStore::default());
	let controller =
		restored_controller(&http, store.clone(), expired_tokens("AT1", Some("RT1"))).await;

	http.hold();
	http.push(Reply::tokens("AT2", Some("RT2"), 3600));

	assert!(tokio::time::timeout(Duration::from_millis(50), controller.get_token()).await.is_err());

	http.wait_for_calls(1).await;
	http.release();
	wait_until(|| store.saves() == 1).await;

	assert!(matches!(controller.status(), SessionStatus::Authenticated { expired: false, .. }));
	assert_eq!(controller.get_token().await.expect("Refreshed token should be cached.").expose(), "AT2");
	assert_eq!(http.calls(), 1);
}

#[tokio::test]
async fn missing_refresh_token_expires_the_session() {
	let http = ScriptedHttpClient::default();
	let store = Arc::new(RecordingStore::default());
	let controller = restored_controller(&http, store.clone(), expired_tokens("AT1", None)).await;
	let err = controller.get_token().await.expect_err("Without a refresh token the set is spent.");

	assert!(matches!(err, Error::SessionExpired));
	assert!(err.requires_login());
	assert_eq!(http.calls(), 0);
	assert!(store.snapshot().is_none());
	assert_eq!(controller.status(), SessionStatus::LoggedOut);
}

#[tokio::test]
async fn force_refresh_bypasses_a_valid_token() {
	let http = ScriptedHttpClient::default();
	let controller = restored_controller(
		&http,
		Arc::new(RecordingStore::default()),
		fresh_tokens("AT1", Some("RT1")),
	)
	.await;

	assert_eq!(controller.get_token().await.expect("Fresh token should be served.").expose(), "AT1");
	assert_eq!(http.calls(), 0);

	http.push(Reply::tokens("AT2", Some("RT2"), 3600));

	assert_eq!(controller.force_refresh().await.expect("Forced refresh should succeed.").expose(), "AT2");
	assert_eq!(http.last_request().get("refresh_token").map(String::as_str), Some("RT1"));
	assert_eq!(controller.get_token().await.expect("New token should be cached.").expose(), "AT2");
	assert_eq!(http.calls(), 1);
}

#[tokio::test]
async fn store_write_failure_keeps_the_new_set_in_memory() {
	let http = ScriptedHttpClient::default();
	let store = Arc::new(RecordingStore::default());
	let controller =
		restored_controller(&http, store.clone(), expired_tokens("AT1", Some("RT1"))).await;

	store.fail_saves();
	http.push(Reply::tokens("AT2", Some("RT2"), 3600));

	assert_eq!(controller.get_token().await.expect("Refresh should still succeed.").expose(), "AT2");
	assert_eq!(store.saves(), 1);
	assert_eq!(controller.get_token().await.expect("New token should be cached.").expose(), "AT2");
	assert_eq!(http.calls(), 1);
}

#[tokio::test]
async fn tokens_require_an_authenticated_session() {
	let http = ScriptedHttpClient::default();
	let controller = controller(&http, Arc::new(MemoryStore::default()));

	assert!(matches!(controller.get_token().await, Err(Error::NotAuthenticated)));

	controller.login().expect("Login should start.");

	assert!(matches!(controller.get_token().await, Err(Error::NotAuthenticated)));
	assert!(matches!(controller.force_refresh().await, Err(Error::NotAuthenticated)));
	assert_eq!(http.calls(), 0);
}
