#![no_main]

use libfuzzer_sys::fuzz_target;
use trueflow::event::TraceEvent;
use trueflow::hub::HubMessage;

fuzz_target!(|data: &[u8]| {
    // Wire input is decoded lossily, exactly as the socket reader does
    let input = String::from_utf8_lossy(data);

    // Decoding must reject or accept, never panic
    if let Ok(event) = TraceEvent::parse_line(&input) {
        let _ = event.function_key();
        let _ = event.registry_entries();
        let _ = TraceEvent::parse_line(&event.to_json_line());
    }
    let _ = HubMessage::parse(&input);
});
