#![no_main]

use libfuzzer_sys::fuzz_target;
use quickquest_client::protocol::ClientMessage;

fuzz_target!(|data: &[u8]| {
    // Outbound messages are only ever built locally, but the fake servers in
    // tests and demos parse them back.
    if let Ok(msg) = serde_json::from_slice::<ClientMessage>(data) {
        let _ = msg.event_name();
        let _ = serde_json::to_vec(&msg);
    }
});
