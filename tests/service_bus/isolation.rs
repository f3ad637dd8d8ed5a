use std::sync::Arc;

use futures::future::join_all;
use sourced_servicebus::transport::{InMemoryTransport, TransportError, TransportOperation};
use sourced_servicebus::{
    ClientOptions, ClientType, IsolationSettings, ProcessMessageArgs, ReceptionError, ServiceBus,
    ServiceBusBuilder, ServiceBusMessage, ServiceBusSettings, ISOLATION_KEY_PROPERTY,
};

use crate::support::{incoming, process_pending, Order, Recorder, RecordingListener};

const ORDER_JSON: &str = r#"{"id":"o-1","amount":7}"#;

fn keyed(message_id: &str, isolation_key: &str) -> ServiceBusMessage {
    incoming(message_id, "OrderCreated", ORDER_JSON).with_property(ISOLATION_KEY_PROPERTY, isolation_key)
}

fn alice() -> ServiceBusSettings {
    ServiceBusSettings::default().with_isolation(IsolationSettings::isolated("dev-alice"))
}

async fn orders_bus(
    settings: ServiceBusSettings,
    transport: &InMemoryTransport,
    recorder: &Recorder<Order>,
) -> ServiceBus {
    ServiceBusBuilder::new(settings)
        .receive::<Order, _>(ClientOptions::queue("orders"), recorder.clone())
        .build(Arc::new(transport.clone()))
        .await
        .unwrap()
}

#[tokio::test]
async fn foreign_queue_message_goes_back_to_the_queue() {
    let transport = InMemoryTransport::new();
    let recorder = Recorder::<Order>::new();
    let listener = RecordingListener::default();
    let bus = ServiceBusBuilder::new(alice())
        .receive::<Order, _>(ClientOptions::queue("orders"), recorder.clone())
        .listener(Arc::new(listener.clone()))
        .build(Arc::new(transport.clone()))
        .await
        .unwrap();

    transport.enqueue("orders", keyed("m-1", "dev-bob"));
    let results = process_pending(&bus, &transport, ClientType::Queue, "orders").await;

    assert!(results[0].is_ok());
    assert_eq!(recorder.count(), 0);
    assert!(listener.events().is_empty());
    assert_eq!(transport.completed("orders"), vec!["m-1"]);

    let pending = transport.pending("orders");
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].message_id(), "m-1");
    assert_eq!(pending[0].isolation_key(), Some("dev-bob"));
    assert_eq!(pending[0].correlation_id(), Some("corr-m-1"));
    assert_eq!(pending[0].message.body_str(), Some(ORDER_JSON));

    let operations = transport.operations();
    assert!(operations.contains(&TransportOperation::SenderCreated {
        client_type: ClientType::Queue,
        entity_path: "orders".into(),
    }));
    assert!(operations.contains(&TransportOperation::SendMessages {
        entity_path: "orders".into(),
        message_ids: vec!["m-1".into()],
    }));
    assert!(operations.contains(&TransportOperation::SenderClosed {
        entity_path: "orders".into(),
    }));
    assert_eq!(bus.registry().temporary_sender_count(), 0);
}

#[tokio::test]
async fn foreign_subscription_message_goes_back_to_the_topic() {
    let transport = InMemoryTransport::new();
    let billing = transport.create_subscription("events", "billing");
    let audit = transport.create_subscription("events", "audit");
    let recorder = Recorder::<Order>::new();
    let bus = ServiceBusBuilder::new(alice())
        .receive::<Order, _>(ClientOptions::subscription("events", "billing"), recorder.clone())
        .build(Arc::new(transport.clone()))
        .await
        .unwrap();

    transport.enqueue(&billing, keyed("m-1", "dev-bob"));
    let results = process_pending(&bus, &transport, ClientType::Subscription, &billing).await;

    assert!(results[0].is_ok());
    assert_eq!(recorder.count(), 0);
    assert_eq!(transport.completed(&billing), vec!["m-1"]);
    assert_eq!(transport.pending(&billing).len(), 1);
    assert_eq!(transport.pending(&audit).len(), 1);
    assert!(transport.operations().contains(&TransportOperation::SenderCreated {
        client_type: ClientType::Topic,
        entity_path: "events".into(),
    }));
}

#[tokio::test]
async fn own_messages_are_handled() {
    let transport = InMemoryTransport::new();
    let recorder = Recorder::<Order>::new();
    let bus = orders_bus(alice(), &transport, &recorder).await;

    transport.enqueue("orders", keyed("m-1", "dev-alice"));
    let results = process_pending(&bus, &transport, ClientType::Queue, "orders").await;

    assert!(results[0].is_ok());
    assert_eq!(recorder.count(), 1);
    assert!(transport.completed("orders").is_empty());
    assert!(transport.pending("orders").is_empty());
}

#[tokio::test]
async fn unkeyed_messages_are_rerouted_by_isolated_instances() {
    let transport = InMemoryTransport::new();
    let recorder = Recorder::<Order>::new();
    let bus = orders_bus(alice(), &transport, &recorder).await;

    transport.enqueue("orders", incoming("m-1", "OrderCreated", ORDER_JSON));
    let results = process_pending(&bus, &transport, ClientType::Queue, "orders").await;

    assert!(results[0].is_ok());
    assert_eq!(recorder.count(), 0);
    assert_eq!(transport.pending("orders").len(), 1);
}

#[tokio::test]
async fn shared_instances_handle_every_key() {
    let transport = InMemoryTransport::new();
    let recorder = Recorder::<Order>::new();
    let bus = orders_bus(ServiceBusSettings::default(), &transport, &recorder).await;

    transport.enqueue("orders", keyed("m-1", "dev-bob"));
    transport.enqueue("orders", incoming("m-2", "OrderCreated", ORDER_JSON));
    let results = process_pending(&bus, &transport, ClientType::Queue, "orders").await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(recorder.count(), 2);
    assert!(transport.pending("orders").is_empty());
}

#[tokio::test]
async fn registered_sender_is_reused_for_the_copy() {
    let transport = InMemoryTransport::new();
    let recorder = Recorder::<Order>::new();
    let bus = ServiceBusBuilder::new(alice())
        .dispatch::<Order>(ClientOptions::queue("orders"))
        .receive::<Order, _>(ClientOptions::queue("orders"), recorder.clone())
        .build(Arc::new(transport.clone()))
        .await
        .unwrap();

    transport.enqueue("orders", keyed("m-1", "dev-bob"));
    process_pending(&bus, &transport, ClientType::Queue, "orders").await;

    let operations = transport.operations();
    let created = operations
        .iter()
        .filter(|op| matches!(op, TransportOperation::SenderCreated { .. }))
        .count();
    assert_eq!(created, 1);
    assert!(!operations
        .iter()
        .any(|op| matches!(op, TransportOperation::SenderClosed { .. })));
    assert_eq!(transport.pending("orders").len(), 1);
}

#[tokio::test]
async fn failed_complete_is_reported_but_the_copy_is_still_sent() {
    let transport = InMemoryTransport::new();
    let recorder = Recorder::<Order>::new();
    let bus = orders_bus(alice(), &transport, &recorder).await;
    transport.fail_settlement(true);

    transport.enqueue("orders", keyed("m-1", "dev-bob"));
    let mut results = process_pending(&bus, &transport, ClientType::Queue, "orders").await;

    let failure = results.remove(0).unwrap_err();
    assert_eq!(failure.isolation_key.as_deref(), Some("dev-bob"));
    match failure.source {
        ReceptionError::IsolationReroute(error) => {
            assert!(matches!(
                error.complete_error,
                Some(TransportError::ConnectionFailed(_))
            ));
            assert!(error.resend_error.is_none());
        }
        other => panic!("expected a reroute failure, got {other:?}"),
    }
    assert_eq!(recorder.count(), 0);
    assert_eq!(transport.pending("orders").len(), 1);
}

#[tokio::test]
async fn failed_resend_is_reported_after_completing() {
    let transport = InMemoryTransport::new();
    let recorder = Recorder::<Order>::new();
    let bus = orders_bus(alice(), &transport, &recorder).await;
    transport.fail_sends_to("orders");

    transport.enqueue("orders", keyed("m-1", "dev-bob"));
    let mut results = process_pending(&bus, &transport, ClientType::Queue, "orders").await;

    let failure = results.remove(0).unwrap_err();
    let ReceptionError::IsolationReroute(error) = failure.source else {
        panic!("expected a reroute failure");
    };
    assert!(error.complete_error.is_none());
    assert!(error.resend_error.is_some());
    assert_eq!(transport.completed("orders"), vec!["m-1"]);
    assert_eq!(bus.registry().temporary_sender_count(), 0);
}

#[tokio::test]
async fn concurrent_reroutes_to_one_queue_each_send_their_copy() {
    let transport = InMemoryTransport::new();
    let recorder = Recorder::<Order>::new();
    let bus = orders_bus(alice(), &transport, &recorder).await;

    for i in 0..8 {
        transport.enqueue("orders", keyed(&format!("m-{i}"), "dev-bob"));
    }
    let receiver = transport.receiver("orders");
    let messages = receiver.try_receive(usize::MAX);
    assert_eq!(messages.len(), 8);

    let results = join_all(messages.into_iter().map(|message| {
        let args = ProcessMessageArgs::new(
            ClientType::Queue,
            "orders",
            message,
            Arc::new(receiver.clone()),
        );
        bus.process_message(args)
    }))
    .await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(recorder.count(), 0);
    assert_eq!(transport.completed("orders").len(), 8);

    let mut resent: Vec<String> = transport
        .pending("orders")
        .iter()
        .map(|m| m.message_id().to_string())
        .collect();
    resent.sort();
    let mut expected: Vec<String> = (0..8).map(|i| format!("m-{i}")).collect();
    expected.sort();
    assert_eq!(resent, expected);

    let operations = transport.operations();
    let opened = operations
        .iter()
        .filter(|op| matches!(op, TransportOperation::SenderCreated { .. }))
        .count();
    let closed = operations
        .iter()
        .filter(|op| matches!(op, TransportOperation::SenderClosed { .. }))
        .count();
    assert_eq!(opened, closed);
    assert_eq!(bus.registry().temporary_sender_count(), 0);
}
