//! Shared fixtures for integration tests

#![allow(dead_code, clippy::unwrap_used)]

use std::sync::{Arc, Mutex};

use remote_objects::core::codec::PacketCodec;
use remote_objects::protocol::{ApiDescription, ExposedApi, PropertyValue};
use remote_objects::transport::Connection;

/// Published object with settable property values
pub struct TestObject {
    description: ApiDescription,
    values: Mutex<Vec<PropertyValue>>,
}

impl TestObject {
    pub fn new(description: ApiDescription, values: Vec<PropertyValue>) -> Arc<Self> {
        Arc::new(Self {
            description,
            values: Mutex::new(values),
        })
    }

    pub fn set(&self, index: usize, value: impl Into<PropertyValue>) {
        self.values.lock().unwrap()[index] = value.into();
    }
}

impl ExposedApi for TestObject {
    fn description(&self) -> &ApiDescription {
        &self.description
    }

    fn read_property(&self, index: usize) -> PropertyValue {
        self.values.lock().unwrap()[index].clone()
    }
}

/// Publisher and replica ends of an in-memory connection
pub fn connected_pair() -> (Connection, Connection) {
    let (a, b) = tokio::io::duplex(64 * 1024);
    (
        Connection::new(a, "publisher", PacketCodec::new()),
        Connection::new(b, "replica", PacketCodec::new()),
    )
}
