//! Connect to the dashboard push endpoint and print every decoded event.
//!
//! Pass the endpoint as the first argument, or rely on the local default.
//! Connection state transitions are reported on stderr; the program runs
//! until interrupted.

use std::error::Error;

use perfdash_sdk::realtime::client::{RealtimeClient, RealtimeConfig};

fn main() -> Result<(), Box<dyn Error>> {
    let endpoint = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "ws://localhost:5000/ws".to_string());

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let client = RealtimeClient::start(RealtimeConfig::new(endpoint))?;
        let _subscription = client.subscribe_fn(|event| println!("{event}"))?;

        let mut states = client.state_changes();
        loop {
            if states.changed().await.is_err() {
                return Ok::<(), Box<dyn Error>>(());
            }
            eprintln!("connection state: {:?}", *states.borrow());
        }
    })
}
