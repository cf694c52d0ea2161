#![no_main]

use libfuzzer_sys::fuzz_target;
use remote_objects::Packet;

fuzz_target!(|data: &[u8]| {
    // Frame decoding must reject, never panic
    let _ = Packet::from_bytes(data);
});
