//! Trigger the first registered test case over REST and watch live status
//! updates arrive on the push stream.

use std::error::Error;
use std::time::Duration;

use perfdash_sdk::api::DashboardApiClient;
use perfdash_sdk::realtime::client::{RealtimeClient, RealtimeConfig};
use serde_json::json;

fn main() -> Result<(), Box<dyn Error>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let api = DashboardApiClient::new()?;
        let realtime = RealtimeClient::start(RealtimeConfig::new("ws://localhost:5000/ws"))?;
        let _subscription = realtime.subscribe_fn(|event| println!("update: {event}"))?;

        let cases = api.list_test_cases().await?;
        let Some(case) = cases.first() else {
            eprintln!("no test cases registered; create one in the dashboard first");
            return Ok::<(), Box<dyn Error>>(());
        };

        println!("running test case #{} ({})", case.id, case.name);
        let outcome = api.run_test_case(case.id, json!({})).await?;
        println!("run finished with status {:?}", outcome.status);

        // Trailing push events may still be in flight.
        tokio::time::sleep(Duration::from_secs(2)).await;
        realtime.close();
        Ok(())
    })
}
