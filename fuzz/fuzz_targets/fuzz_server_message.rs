#![no_main]

use libfuzzer_sys::fuzz_target;
use quickquest_client::protocol::ServerMessage;

fuzz_target!(|data: &[u8]| {
    // Raw-byte path, including serde_json's own UTF-8 validation.
    if let Ok(msg) = serde_json::from_slice::<ServerMessage>(data) {
        // Anything accepted must name a known event.
        let _ = msg.kind().as_str();
        let _ = serde_json::to_string(&msg);
    }

    if let Ok(s) = std::str::from_utf8(data) {
        let _ = serde_json::from_str::<ServerMessage>(s);
    }
});
