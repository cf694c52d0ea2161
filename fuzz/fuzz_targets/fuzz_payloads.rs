#![no_main]

use libfuzzer_sys::fuzz_target;
use remote_objects::core::stream::DataReader;
use remote_objects::protocol::invoke::{deserialize_invoke_packet, deserialize_property_change_packet};
use remote_objects::protocol::packets::deserialize_init_dynamic_packet;
use remote_objects::protocol::RemoteTypes;

fuzz_target!(|data: &[u8]| {
    let mut types = RemoteTypes::new();
    if let Ok(init) = deserialize_init_dynamic_packet(&mut DataReader::new(data), &mut types) {
        // A learned definition must not break later decodes against it
        let _ = deserialize_property_change_packet(
            &mut DataReader::new(data),
            &mut types,
            Some(&init.definition.type_name),
        );
    }
    let _ = deserialize_invoke_packet(&mut DataReader::new(data), types.registry());
});
