//! # Offline Round Example
//!
//! Points the client at a server that is not there, lets the reachability
//! check fall back to offline mode, and plays two local spot-the-difference
//! rounds against the client-side timer.
//!
//! ## Running
//!
//! ```sh
//! cargo run --example offline_round
//! ```

use std::time::Duration;

use quickquest_client::games::DIFFERENCE_COUNT;
use quickquest_client::{AnonymousIdentity, Client, ClientConfig, LifecycleState, LoginForm, Update};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Nothing listens on the discard port.
    let config = ClientConfig::new("ws://127.0.0.1:9/ws")
        .with_reachability_timeout(Duration::from_secs(1))
        .with_tick_period(Duration::from_millis(100));

    let mut identity = AnonymousIdentity::new();
    let mut client = Client::connect(config, &mut identity).await?;
    tracing::info!("connectivity: {:?}", client.connectivity());

    // Offline, the event code is ignored and the round starts at once.
    client.login(LoginForm::new("Owls", "B", "0000"))?;

    for round in 1..=2 {
        if round > 1 {
            client.play_again()?;
        }

        // One difference every other tick; a slower second round.
        let mut found = 0;
        while client.snapshot().lifecycle == LifecycleState::Playing {
            if let Update::Tick { elapsed_ms } = client.next_update().await {
                if (elapsed_ms / 100) % (round + 1) == 0 && found < DIFFERENCE_COUNT {
                    client.record_difference(found)?;
                    found += 1;
                    tracing::info!("round {round}: difference {found} at {elapsed_ms} ms");
                }
            }
        }
    }

    let snapshot = client.snapshot();
    for (rank, entry) in snapshot.leaderboard.iter().enumerate() {
        tracing::info!("#{} {} ({}) {} ms", rank + 1, entry.name, entry.section, entry.time);
    }

    client.shutdown().await;
    Ok(())
}
