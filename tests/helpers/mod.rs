#![allow(dead_code)]

pub mod mock_server;
pub mod tls;

/// Install the test subscriber once per binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("bridge_transport=debug")
        .with_test_writer()
        .try_init();
}
