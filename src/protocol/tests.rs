// test-only module included via protocol/mod.rs
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::{Arc, Mutex};

use crate::core::packet::{Packet, PacketType, PacketWriter};
use crate::core::stream::DataReader;
use crate::core::value::{
    DeclaredType, GadgetSchema, GadgetValue, Value, CLASS_REFERENCE_TYPE, MODEL_REFERENCE_TYPE,
};
use crate::protocol::api::{
    ApiDescription, ExposedApi, Parameter, PropertyInfo, PropertyValue, SignalInfo,
};
use crate::protocol::definition::{RemoteTypes, TypeDefinition};
use crate::protocol::descriptor::{ObjectDescriptor, ObjectKind};
use crate::protocol::invoke::*;
use crate::protocol::packets::*;
use crate::protocol::property::PropertyData;
use crate::protocol::source::{SessionState, Source};

/// Object with a fixed description and settable property values
pub(crate) struct Fixture {
    description: ApiDescription,
    values: Mutex<Vec<PropertyValue>>,
}

impl Fixture {
    pub(crate) fn new(description: ApiDescription, values: Vec<PropertyValue>) -> Arc<Self> {
        Arc::new(Self {
            description,
            values: Mutex::new(values),
        })
    }

    pub(crate) fn set(&self, index: usize, value: PropertyValue) {
        self.values.lock().unwrap()[index] = value;
    }
}

impl ExposedApi for Fixture {
    fn description(&self) -> &ApiDescription {
        &self.description
    }

    fn read_property(&self, index: usize) -> PropertyValue {
        self.values.lock().unwrap()[index].clone()
    }
}

fn engine(rpm: i32) -> Arc<dyn ExposedApi> {
    Fixture::new(
        ApiDescription::new("Engine").notifying_property("rpm", DeclaredType::value("int")),
        vec![Value::Int(rpm).into()],
    )
}

fn two_engine_car(front: &Arc<dyn ExposedApi>, rear: &Arc<dyn ExposedApi>) -> Arc<Fixture> {
    Fixture::new(
        ApiDescription::new("Car")
            .notifying_property("front", DeclaredType::object("Engine"))
            .notifying_property("rear", DeclaredType::object("Engine")),
        vec![
            PropertyValue::Object(Some(front.clone())),
            PropertyValue::Object(Some(rear.clone())),
        ],
    )
}

fn point_schema() -> Arc<GadgetSchema> {
    Arc::new(
        GadgetSchema::new("Point")
            .field("x", DeclaredType::value("int"))
            .field("y", DeclaredType::value("int")),
    )
}

#[test]
fn test_single_int_property_init_and_change() {
    let counter = Fixture::new(
        ApiDescription::new("Counter").notifying_property("count", DeclaredType::value("int")),
        vec![Value::Int(5).into()],
    );
    let object: Arc<dyn ExposedApi> = counter.clone();
    let mut source = Source::new("counter", &object);
    let mut session = SessionState::new();
    let mut writer = PacketWriter::new();

    let frame = serialize_init_packet(&mut writer, &mut session, &mut source).unwrap();
    let packet = Packet::from_bytes(&frame).unwrap();
    assert_eq!(packet.packet_type, PacketType::InitPacket);
    assert_eq!(packet.name, "counter");
    assert_eq!(packet.reader().read_u32().unwrap(), 1);

    let mut properties = Vec::new();
    deserialize_init_packet(&mut packet.reader(), &mut RemoteTypes::new(), None, &mut properties)
        .unwrap();
    assert_eq!(properties, vec![PropertyData::Value(Value::Int(5))]);

    counter.set(0, Value::Int(7).into());
    let frame = serialize_property_change_for_signal(&mut writer, &mut session, &mut source, 0)
        .unwrap()
        .expect("count has a notify signal");
    let packet = Packet::from_bytes(&frame).unwrap();
    assert_eq!(packet.packet_type, PacketType::PropertyChangePacket);
    assert_eq!(packet.name, "counter");

    let change =
        deserialize_property_change_packet(&mut packet.reader(), &mut RemoteTypes::new(), None)
            .unwrap();
    assert_eq!(change.index, 0);
    assert_eq!(change.data, PropertyData::Value(Value::Int(7)));
}

#[test]
fn test_shared_type_described_once_per_connection() {
    let front = engine(1000);
    let rear = engine(2000);
    let car: Arc<dyn ExposedApi> = two_engine_car(&front, &rear);
    let mut source = Source::new("car", &car).dynamic(true);
    let mut session = SessionState::new();
    let mut writer = PacketWriter::new();

    let frame = serialize_init_dynamic_packet(&mut writer, &mut session, &mut source).unwrap();
    let packet = Packet::from_bytes(&frame).unwrap();
    assert_eq!(packet.packet_type, PacketType::InitDynamicPacket);

    let mut reader = packet.reader();
    let root = TypeDefinition::decode(&mut reader).unwrap();
    assert_eq!(root.type_name, "Car");
    assert_eq!(root.properties[0].type_name, CLASS_REFERENCE_TYPE);
    assert_eq!(root.properties[0].notify_signature, "frontChanged(Engine*)");

    assert_eq!(reader.read_u32().unwrap(), 2);
    let first = ObjectDescriptor::decode(&mut reader).unwrap();
    let second = ObjectDescriptor::decode(&mut reader).unwrap();
    assert!(reader.at_end());

    assert_eq!(first.name, "car/front");
    assert_eq!(second.name, "car/rear");
    assert_eq!(first.kind, ObjectKind::Class);
    assert!(first.has_definition());
    assert!(!second.has_definition());
    assert_eq!(DataReader::new(&second.parameters).read_u32().unwrap(), 1);

    assert!(session.is_sent("Car"));
    assert!(session.is_sent("Engine"));

    // A later change of the same type carries no definition
    let frame = serialize_property_change_packet(&mut writer, &mut session, &mut source, 1).unwrap();
    let packet = Packet::from_bytes(&frame).unwrap();
    let mut reader = packet.reader();
    assert_eq!(reader.read_i32().unwrap(), 1);
    assert!(!ObjectDescriptor::decode(&mut reader).unwrap().has_definition());

    // A fresh connection starts over
    session.reset();
    let frame = serialize_property_change_packet(&mut writer, &mut session, &mut source, 1).unwrap();
    let packet = Packet::from_bytes(&frame).unwrap();
    let mut reader = packet.reader();
    reader.read_i32().unwrap();
    assert!(ObjectDescriptor::decode(&mut reader).unwrap().has_definition());
}

#[test]
fn test_receiver_decodes_object_graph() {
    let front = engine(1000);
    let rear = engine(2000);
    let car: Arc<dyn ExposedApi> = two_engine_car(&front, &rear);
    let mut source = Source::new("car", &car).dynamic(true);
    let mut writer = PacketWriter::new();
    let frame =
        serialize_init_dynamic_packet(&mut writer, &mut SessionState::new(), &mut source).unwrap();
    let packet = Packet::from_bytes(&frame).unwrap();

    let mut types = RemoteTypes::new();
    let init = deserialize_init_dynamic_packet(&mut packet.reader(), &mut types).unwrap();
    assert_eq!(init.definition.type_name, "Car");
    assert!(types.definition("Engine").is_some());

    let rear = init.properties[1].as_object().unwrap();
    assert_eq!(rear.type_name, "Engine");
    assert!(rear.definition.is_none());
    assert_eq!(rear.properties, vec![PropertyData::Value(Value::Int(2000))]);
    assert!(init.properties[0].as_object().unwrap().definition.is_some());
}

#[test]
fn test_rebound_reference_propagates_new_type() {
    let front = engine(1000);
    let rear = engine(2000);
    let car = two_engine_car(&front, &rear);
    let object: Arc<dyn ExposedApi> = car.clone();
    let mut source = Source::new("car", &object).dynamic(true);
    let mut session = SessionState::new();
    let mut writer = PacketWriter::new();
    serialize_init_dynamic_packet(&mut writer, &mut session, &mut source).unwrap();

    let turbo: Arc<dyn ExposedApi> = Fixture::new(
        ApiDescription::new("Turbo").notifying_property("boost", DeclaredType::value("double")),
        vec![Value::Double(1.5).into()],
    );
    car.set(0, PropertyValue::Object(Some(turbo.clone())));

    let frame = serialize_property_change_packet(&mut writer, &mut session, &mut source, 0).unwrap();
    let packet = Packet::from_bytes(&frame).unwrap();
    let mut reader = packet.reader();
    reader.read_i32().unwrap();
    let descriptor = ObjectDescriptor::decode(&mut reader).unwrap();
    assert_eq!(descriptor.type_name, "Turbo");
    assert!(descriptor.has_definition());
    assert_eq!(source.child(0).unwrap().type_name(), "Turbo");

    car.set(0, PropertyValue::Object(None));
    let frame = serialize_property_change_packet(&mut writer, &mut session, &mut source, 0).unwrap();
    let packet = Packet::from_bytes(&frame).unwrap();
    let mut reader = packet.reader();
    reader.read_i32().unwrap();
    let descriptor = ObjectDescriptor::decode(&mut reader).unwrap();
    assert!(descriptor.is_null);
    assert!(reader.at_end());
}

#[test]
fn test_nested_value_types_propagated_for_dynamic_sources() {
    let point = point_schema();
    let color = Arc::new(
        GadgetSchema::new("Color")
            .field("name", DeclaredType::value("string"))
            .field("rgb", DeclaredType::value("uint")),
    );
    let api = ApiDescription::new("Canvas")
        .signal(SignalInfo::new(
            "clicked",
            vec![Parameter {
                name: "at".into(),
                ty: DeclaredType::Gadget(point.clone()),
            }],
        ))
        .property(PropertyInfo::new("origin", DeclaredType::Gadget(point.clone())))
        .property(PropertyInfo::new("tint", DeclaredType::Variant));
    let red = GadgetValue::new(color, vec![Value::from("red"), Value::UInt(0xFF0000)]).unwrap();
    let canvas: Arc<dyn ExposedApi> = Fixture::new(
        api,
        vec![
            Value::Gadget(GadgetValue::new(point, vec![Value::Int(1), Value::Int(2)]).unwrap())
                .into(),
            Value::Gadget(red.clone()).into(),
        ],
    );
    let mut source = Source::new("canvas", &canvas).dynamic(true);
    let mut session = SessionState::new();
    let mut writer = PacketWriter::new();

    let frame = serialize_init_dynamic_packet(&mut writer, &mut session, &mut source).unwrap();
    let packet = Packet::from_bytes(&frame).unwrap();
    let mut types = RemoteTypes::new();
    let init = deserialize_init_dynamic_packet(&mut packet.reader(), &mut types).unwrap();

    assert_eq!(init.definition.gadgets.names().collect::<Vec<_>>(), vec!["Point"]);
    assert!(types.registry().contains("Color"));
    assert_eq!(
        init.properties[0]
            .as_value()
            .and_then(Value::as_gadget)
            .and_then(|g| g.get("y")),
        Some(&Value::Int(2))
    );
    assert_eq!(init.properties[1].as_value(), Some(&Value::Gadget(red.clone())));
    assert!(session.is_sent("Color"));

    // Already described: the value travels with the plain codec
    let frame = serialize_property_change_packet(&mut writer, &mut session, &mut source, 1).unwrap();
    let packet = Packet::from_bytes(&frame).unwrap();
    let change =
        deserialize_property_change_packet(&mut packet.reader(), &mut types, Some("Canvas")).unwrap();
    assert_eq!(change.data, PropertyData::Value(Value::Gadget(red)));
}

#[test]
fn test_compiled_sources_skip_nested_types_and_normalize_signatures() {
    let api = ApiDescription::new("Car")
        .signal(SignalInfo {
            signature: "replaced(CarSource*)".into(),
            parameters: Vec::new(),
        })
        .property(PropertyInfo::new("origin", DeclaredType::Gadget(point_schema())));
    let car: Arc<dyn ExposedApi> = Fixture::new(
        api,
        vec![Value::Gadget(
            GadgetValue::new(point_schema(), vec![Value::Int(0), Value::Int(0)]).unwrap(),
        )
        .into()],
    );
    let source = Source::new("car", &car);
    let definition = TypeDefinition::from_source(&mut SessionState::new(), &source).unwrap();
    assert!(definition.gadgets.is_empty());
    assert_eq!(definition.signals[0].signature, "replaced(Car*)");
}

#[test]
fn test_model_reference_is_not_described() {
    let rows: Arc<dyn ExposedApi> = Fixture::new(
        ApiDescription::new("RowModel")
            .as_model()
            .property(PropertyInfo::new("count", DeclaredType::value("int"))),
        vec![Value::Int(3).into()],
    );
    let garage: Arc<dyn ExposedApi> = Fixture::new(
        ApiDescription::new("Garage").property(PropertyInfo::new(
            "rows",
            DeclaredType::model("RowModel"),
        )),
        vec![PropertyValue::Object(Some(rows.clone()))],
    );
    let mut source = Source::new("garage", &garage).dynamic(true);
    let mut session = SessionState::new();
    let mut writer = PacketWriter::new();

    let frame = serialize_init_dynamic_packet(&mut writer, &mut session, &mut source).unwrap();
    let packet = Packet::from_bytes(&frame).unwrap();
    let mut reader = packet.reader();
    let definition = TypeDefinition::decode(&mut reader).unwrap();
    assert_eq!(definition.properties[0].type_name, MODEL_REFERENCE_TYPE);

    reader.read_u32().unwrap();
    let descriptor = ObjectDescriptor::decode(&mut reader).unwrap();
    assert_eq!(descriptor.kind, ObjectKind::Model);
    assert!(!descriptor.has_definition());
    assert!(!descriptor.parameters.is_empty());
    assert!(!session.is_sent("RowModel"));
}

#[test]
fn test_reference_moved_off_model_describes_new_type() {
    let rows: Arc<dyn ExposedApi> = Fixture::new(
        ApiDescription::new("ListModel")
            .as_model()
            .property(PropertyInfo::new("count", DeclaredType::value("int"))),
        vec![Value::Int(0).into()],
    );
    let holder = Fixture::new(
        ApiDescription::new("Holder").notifying_property("item", DeclaredType::object("Item")),
        vec![PropertyValue::Object(Some(rows.clone()))],
    );
    let object: Arc<dyn ExposedApi> = holder.clone();
    let mut source = Source::new("holder", &object).dynamic(true);
    let mut session = SessionState::new();
    let mut writer = PacketWriter::new();

    let frame = serialize_init_dynamic_packet(&mut writer, &mut session, &mut source).unwrap();
    let packet = Packet::from_bytes(&frame).unwrap();
    let mut reader = packet.reader();
    TypeDefinition::decode(&mut reader).unwrap();
    reader.read_u32().unwrap();
    let descriptor = ObjectDescriptor::decode(&mut reader).unwrap();
    assert_eq!(descriptor.kind, ObjectKind::Model);
    assert!(!descriptor.has_definition());

    let replacement = engine(900);
    holder.set(0, PropertyValue::Object(Some(replacement.clone())));
    let frame = serialize_property_change_packet(&mut writer, &mut session, &mut source, 0).unwrap();
    let packet = Packet::from_bytes(&frame).unwrap();
    let mut reader = packet.reader();
    assert_eq!(reader.read_i32().unwrap(), 0);
    let descriptor = ObjectDescriptor::decode(&mut reader).unwrap();
    assert_eq!(descriptor.type_name, "Engine");
    assert_eq!(descriptor.kind, ObjectKind::Class);
    assert!(descriptor.has_definition());
    assert!(session.is_sent("Engine"));
}

#[test]
fn test_invoke_reply_pairs_with_call() {
    let mut calls = PendingCalls::starting_at(42);
    let pending = calls.register();
    assert_eq!(pending.serial_id(), 42);

    let mut writer = PacketWriter::new();
    let request = InvokeRequest::method(1, vec![Value::Int(3), Value::from("x")], pending.serial_id());
    let frame = serialize_invoke_packet(&mut writer, "car", &request);
    let packet = Packet::from_bytes(&frame).unwrap();
    let received =
        deserialize_invoke_packet(&mut packet.reader(), &crate::core::value::TypeRegistry::new())
            .unwrap();
    assert_eq!(received.args.len(), 2);

    let frame = serialize_invoke_reply_packet(&mut writer, "car", received.serial_id, &Value::Bool(true));
    let packet = Packet::from_bytes(&frame).unwrap();
    let reply = deserialize_invoke_reply_packet(
        &mut packet.reader(),
        &crate::core::value::TypeRegistry::new(),
    )
    .unwrap();
    assert_eq!(reply.serial_id, 42);

    calls.complete(reply.clone()).unwrap();
    assert!(matches!(
        calls.complete(reply),
        Err(crate::error::ProtocolError::UnknownSerialId(42))
    ));
}
