#![cfg(feature = "metrics")]

mod common;

// std
use std::{
	collections::BTreeMap,
	sync::{
		Arc,
		atomic::{AtomicU64, Ordering},
	},
};
// crates.io
use metrics::{
	Counter, CounterFn, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit,
};
use parking_lot::Mutex;
// self
use common::*;
use spotify_auth::{error::Error, store::MemoryStore, url::Url};

#[derive(Default)]
struct Tally(AtomicU64);
impl CounterFn for Tally {
	fn increment(&self, value: u64) {
		self.0.fetch_add(value, Ordering::SeqCst);
	}

	fn absolute(&self, value: u64) {
		self.0.fetch_max(value, Ordering::SeqCst);
	}
}

/// Counts `spotify_auth_flow_total` increments per `(flow, outcome)` label pair.
#[derive(Default)]
struct FlowRecorder {
	counters: Mutex<BTreeMap<(String, String), Arc<Tally>>>,
}
impl FlowRecorder {
	fn count(&self, flow: &str, outcome: &str) -> u64 {
		self.counters
			.lock()
			.get(&(flow.to_owned(), outcome.to_owned()))
			.map_or(0, |tally| tally.0.load(Ordering::SeqCst))
	}
}
impl Recorder for FlowRecorder {
	fn describe_counter(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

	fn describe_gauge(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

	fn describe_histogram(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

	fn register_counter(&self, key: &Key, _metadata: &Metadata<'_>) -> Counter {
		let label = |name: &str| {
			key.labels().find(|label| label.key() == name).map(|label| label.value().to_owned())
		};
		let slot = (label("flow").unwrap_or_default(), label("outcome").unwrap_or_default());
		let tally = self.counters.lock().entry(slot).or_default().clone();

		Counter::from_arc(tally)
	}

	fn register_gauge(&self, _key: &Key, _metadata: &Metadata<'_>) -> Gauge {
		Gauge::noop()
	}

	fn register_histogram(&self, _key: &Key, _metadata: &Metadata<'_>) -> Histogram {
		Histogram::noop()
	}
}

fn callback(query: &str) -> Url {
	Url::parse(&format!("{REDIRECT_URI}?{query}")).expect("Callback fixture should parse.")
}

#[test]
fn every_login_attempt_records_exactly_one_outcome() {
	let recorder = FlowRecorder::default();
	let runtime = tokio::runtime::Builder::new_current_thread()
		.enable_all()
		.build()
		.expect("Runtime should build.");

	metrics::with_local_recorder(&recorder, || {
		runtime.block_on(async {
			let http = ScriptedHttpClient::default();
			let controller = controller(&http, Arc::new(MemoryStore::default()));
			let request = controller.login().expect("Login should start.");
			let denied = controller
				.complete_login_from_redirect(&callback(&format!(
					"error=access_denied&state={}",
					request.state
				)))
				.await;

			assert!(matches!(denied, Err(Error::UserDenied { .. })));

			controller.login().expect("Login should start again.");

			assert!(matches!(
				controller.complete_login("abc123", Some("forged-state")).await,
				Err(Error::CsrfMismatch)
			));

			let request = controller.login().expect("Login should start a third time.");

			http.push(Reply::tokens("AT1", Some("RT1"), 3600));
			controller
				.complete_login("abc123", Some(&request.state))
				.await
				.expect("Exchange should succeed.");
		})
	});

	assert_eq!(recorder.count("authorization_code", "attempt"), 3);
	assert_eq!(recorder.count("authorization_code", "failure"), 2);
	assert_eq!(recorder.count("authorization_code", "success"), 1);
}
