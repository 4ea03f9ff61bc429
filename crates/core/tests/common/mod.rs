#![allow(dead_code)]

use std::time::Duration;

use rjms::transport::fake::{FakeBrokerBuilder, FakeBrokerController};
use rjms::{Connection, ConnectionFactory, ConnectionOptions};
use tracing_subscriber::EnvFilter;

/// Installs a test-writer subscriber honoring `RUST_LOG`; safe to call from every test.
pub fn init_tracing() {
	let _ = tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::from_default_env())
		.with_test_writer()
		.try_init();
}

pub fn factory() -> ConnectionFactory {
	ConnectionFactory::new(ConnectionOptions::default().termination_timeout(Duration::from_secs(2)))
}

pub fn connect(factory: &ConnectionFactory, builder: FakeBrokerBuilder) -> (Connection, FakeBrokerController) {
	let (broker, controller) = builder.build();
	(factory.connect(broker), controller)
}

/// Polls `check` until it holds, failing the test after about a second.
pub async fn eventually(mut check: impl FnMut() -> bool) {
	for _ in 0..200 {
		if check() {
			return;
		}
		tokio::time::sleep(Duration::from_millis(5)).await;
	}
	panic!("condition not reached in time");
}
