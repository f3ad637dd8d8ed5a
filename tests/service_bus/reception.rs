use std::sync::Arc;

use sourced_servicebus::transport::InMemoryTransport;
use sourced_servicebus::{
    CancellationToken, ClientOptions, ClientType, Dispatch, HandlerContext, HandlerError,
    ReceptionError, ServiceBusBuilder, ServiceBusMessage, ServiceBusSettings,
    ISOLATION_APPS_PROPERTY, ISOLATION_KEY_PROPERTY,
};

use crate::support::{
    incoming, process_pending, process_pending_with, Order, OrderShipped, Recorder,
    RecordingListener, RejectOrders, ShipOrders,
};

const ORDER_JSON: &str = r#"{"id":"o-1","amount":7}"#;

#[tokio::test]
async fn handler_receives_the_payload_and_context() {
    let transport = InMemoryTransport::new();
    let recorder = Recorder::<Order>::new();
    let listener = RecordingListener::default();
    let bus = ServiceBusBuilder::new(ServiceBusSettings::default())
        .receive::<Order, _>(ClientOptions::queue("orders"), recorder.clone())
        .listener(Arc::new(listener.clone()))
        .build(Arc::new(transport.clone()))
        .await
        .unwrap();

    transport.enqueue("orders", incoming("m-1", "OrderCreated", ORDER_JSON));
    let results = process_pending(&bus, &transport, ClientType::Queue, "orders").await;

    assert!(results[0].is_ok());
    let handled = recorder.handled();
    assert_eq!(handled.len(), 1);
    assert_eq!(handled[0].payload, Order::new("o-1", 7));
    assert_eq!(handled[0].message_id, "m-1");
    assert_eq!(handled[0].correlation_id.as_deref(), Some("corr-m-1"));
    assert_eq!(listener.events(), vec!["start:m-1", "success:m-1"]);
}

#[tokio::test]
async fn handler_publications_inherit_the_correlation_id() {
    let transport = InMemoryTransport::new();
    let bus = ServiceBusBuilder::new(ServiceBusSettings::default())
        .dispatch::<OrderShipped>(ClientOptions::queue("shipping"))
        .receive::<Order, _>(ClientOptions::queue("orders"), ShipOrders)
        .build(Arc::new(transport.clone()))
        .await
        .unwrap();

    transport.enqueue("orders", incoming("m-1", "OrderCreated", ORDER_JSON));
    let results = process_pending(&bus, &transport, ClientType::Queue, "orders").await;
    assert!(results[0].is_ok());

    let shipped = transport.pending("shipping");
    assert_eq!(shipped.len(), 1);
    assert_eq!(shipped[0].correlation_id(), Some("corr-m-1"));
    assert_eq!(shipped[0].payload_type_id(), Some("OrderShipped"));
    assert_eq!(shipped[0].message.body_str(), Some(r#"{"id":"o-1"}"#));
}

#[tokio::test]
async fn explicit_correlation_id_wins_over_the_inbound_one() {
    let transport = InMemoryTransport::new();
    let bus = ServiceBusBuilder::new(ServiceBusSettings::default())
        .dispatch::<OrderShipped>(ClientOptions::queue("shipping"))
        .receive::<Order, _>(
            ClientOptions::queue("orders"),
            |order: Order, context: HandlerContext| async move {
                context.publish_dispatch(
                    Dispatch::new(OrderShipped { id: order.id }).with_correlation_id("explicit"),
                );
                Ok::<(), HandlerError>(())
            },
        )
        .build(Arc::new(transport.clone()))
        .await
        .unwrap();

    transport.enqueue("orders", incoming("m-1", "OrderCreated", ORDER_JSON));
    process_pending(&bus, &transport, ClientType::Queue, "orders").await;

    assert_eq!(transport.pending("shipping")[0].correlation_id(), Some("explicit"));
}

#[tokio::test]
async fn isolation_identity_flows_to_publications() {
    let transport = InMemoryTransport::new();
    let bus = ServiceBusBuilder::new(ServiceBusSettings::default())
        .dispatch::<OrderShipped>(ClientOptions::queue("shipping"))
        .receive::<Order, _>(ClientOptions::queue("orders"), ShipOrders)
        .build(Arc::new(transport.clone()))
        .await
        .unwrap();

    let message = incoming("m-1", "OrderCreated", ORDER_JSON)
        .with_property(ISOLATION_KEY_PROPERTY, "dev-bob")
        .with_property(ISOLATION_APPS_PROPERTY, "orders,billing");
    transport.enqueue("orders", message);
    process_pending(&bus, &transport, ClientType::Queue, "orders").await;

    let shipped = &transport.pending("shipping")[0];
    assert_eq!(shipped.isolation_key(), Some("dev-bob"));
    assert_eq!(shipped.isolation_apps(), vec!["orders", "billing"]);
}

#[tokio::test]
async fn unknown_payload_type_is_ignored() {
    let transport = InMemoryTransport::new();
    let recorder = Recorder::<Order>::new();
    let listener = RecordingListener::default();
    let bus = ServiceBusBuilder::new(ServiceBusSettings::default())
        .receive::<Order, _>(ClientOptions::queue("orders"), recorder.clone())
        .listener(Arc::new(listener.clone()))
        .build(Arc::new(transport.clone()))
        .await
        .unwrap();

    transport.enqueue("orders", incoming("m-1", "InvoicePaid", "{}"));
    let results = process_pending(&bus, &transport, ClientType::Queue, "orders").await;

    assert!(results[0].is_ok());
    assert_eq!(recorder.count(), 0);
    assert_eq!(listener.events(), vec!["start:m-1"]);
}

#[tokio::test]
async fn message_without_payload_type_id_fails() {
    let transport = InMemoryTransport::new();
    let listener = RecordingListener::default();
    let bus = ServiceBusBuilder::new(ServiceBusSettings::default())
        .receive::<Order, _>(ClientOptions::queue("orders"), Recorder::<Order>::new())
        .listener(Arc::new(listener.clone()))
        .build(Arc::new(transport.clone()))
        .await
        .unwrap();

    transport.enqueue(
        "orders",
        ServiceBusMessage::new("m-2", ORDER_JSON.as_bytes().to_vec()),
    );
    let mut results = process_pending(&bus, &transport, ClientType::Queue, "orders").await;

    let failure = results.remove(0).unwrap_err();
    assert!(matches!(failure.source, ReceptionError::MissingPayloadTypeId));
    assert_eq!(failure.message_id, "m-2");
    assert!(failure.handler.is_none());
    assert_eq!(listener.events(), vec!["start:m-2", "failed:m-2"]);
}

#[tokio::test]
async fn handler_failure_carries_context_and_drops_publications() {
    let transport = InMemoryTransport::new();
    let listener = RecordingListener::default();
    let bus = ServiceBusBuilder::new(ServiceBusSettings::default())
        .dispatch::<OrderShipped>(ClientOptions::queue("shipping"))
        .receive::<Order, _>(ClientOptions::queue("orders"), RejectOrders)
        .listener(Arc::new(listener.clone()))
        .build(Arc::new(transport.clone()))
        .await
        .unwrap();

    let mut message = incoming("m-3", "OrderCreated", ORDER_JSON);
    message.session_id = Some("session-1".into());
    transport.enqueue("orders", message);
    let mut results = process_pending(&bus, &transport, ClientType::Queue, "orders").await;

    let failure = results.remove(0).unwrap_err();
    assert_eq!(failure.client_type, ClientType::Queue);
    assert_eq!(failure.resource_id, "orders");
    assert_eq!(failure.message_id, "m-3");
    assert_eq!(failure.payload_type_id.as_deref(), Some("OrderCreated"));
    assert_eq!(failure.session_id.as_deref(), Some("session-1"));
    assert!(failure.handler.is_some_and(|name| name.ends_with("RejectOrders")));
    match &failure.source {
        ReceptionError::Handler(HandlerError::Rejected(reason)) => {
            assert_eq!(reason, "order o-1 has no stock");
        }
        other => panic!("expected a rejected handler, got {other:?}"),
    }

    assert!(transport.pending("shipping").is_empty());
    assert_eq!(listener.events(), vec!["start:m-3", "failed:m-3"]);
}

#[tokio::test]
async fn undecodable_body_is_a_deserialization_failure() {
    let transport = InMemoryTransport::new();
    let recorder = Recorder::<Order>::new();
    let bus = ServiceBusBuilder::new(ServiceBusSettings::default())
        .receive::<Order, _>(ClientOptions::queue("orders"), recorder.clone())
        .build(Arc::new(transport.clone()))
        .await
        .unwrap();

    transport.enqueue("orders", incoming("m-4", "OrderCreated", "not json"));
    let mut results = process_pending(&bus, &transport, ClientType::Queue, "orders").await;

    let failure = results.remove(0).unwrap_err();
    match failure.source {
        ReceptionError::Deserialization {
            payload_type_id, ..
        } => assert_eq!(payload_type_id, "OrderCreated"),
        other => panic!("expected a deserialization failure, got {other:?}"),
    }
    assert_eq!(recorder.count(), 0);
}

#[tokio::test]
async fn failed_publication_fails_the_message() {
    let transport = InMemoryTransport::new();
    let bus = ServiceBusBuilder::new(ServiceBusSettings::default())
        .dispatch::<OrderShipped>(ClientOptions::queue("shipping"))
        .receive::<Order, _>(ClientOptions::queue("orders"), ShipOrders)
        .build(Arc::new(transport.clone()))
        .await
        .unwrap();
    transport.fail_sends_to("shipping");

    transport.enqueue("orders", incoming("m-5", "OrderCreated", ORDER_JSON));
    let mut results = process_pending(&bus, &transport, ClientType::Queue, "orders").await;

    let failure = results.remove(0).unwrap_err();
    assert!(matches!(failure.source, ReceptionError::Publish(_)));
    assert!(transport.pending("shipping").is_empty());
}

#[tokio::test]
async fn handlers_are_routed_per_receiving_resource() {
    let transport = InMemoryTransport::new();
    let from_orders = Recorder::<Order>::new();
    let from_billing = Recorder::<Order>::new();
    let billing = transport.create_subscription("events", "billing");
    let bus = ServiceBusBuilder::new(ServiceBusSettings::default())
        .receive::<Order, _>(ClientOptions::queue("orders"), from_orders.clone())
        .receive::<Order, _>(
            ClientOptions::subscription("events", "billing"),
            from_billing.clone(),
        )
        .build(Arc::new(transport.clone()))
        .await
        .unwrap();

    transport.enqueue(&billing, incoming("m-6", "OrderCreated", ORDER_JSON));
    process_pending(&bus, &transport, ClientType::Subscription, &billing).await;

    assert_eq!(from_orders.count(), 0);
    assert_eq!(from_billing.count(), 1);
}

#[tokio::test]
async fn cancelled_reception_discards_publications_without_failing() {
    let transport = InMemoryTransport::new();
    let listener = RecordingListener::default();
    let bus = ServiceBusBuilder::new(ServiceBusSettings::default())
        .dispatch::<OrderShipped>(ClientOptions::queue("shipping"))
        .receive::<Order, _>(
            ClientOptions::queue("orders"),
            |order: Order, context: HandlerContext| async move {
                context.publish(OrderShipped { id: order.id });
                assert!(context.is_cancelled());
                Ok::<(), HandlerError>(())
            },
        )
        .listener(Arc::new(listener.clone()))
        .build(Arc::new(transport.clone()))
        .await
        .unwrap();

    let cancellation = CancellationToken::new();
    cancellation.cancel();
    transport.enqueue("orders", incoming("m-1", "OrderCreated", ORDER_JSON));
    let results =
        process_pending_with(&bus, &transport, ClientType::Queue, "orders", cancellation).await;

    assert!(results[0].is_ok());
    assert!(transport.pending("shipping").is_empty());
    assert!(transport.completed("orders").is_empty());
    assert_eq!(listener.events(), vec!["start:m-1"]);
}

#[tokio::test]
async fn handler_giving_up_on_cancellation_is_not_a_failure() {
    let transport = InMemoryTransport::new();
    let listener = RecordingListener::default();
    let bus = ServiceBusBuilder::new(ServiceBusSettings::default())
        .dispatch::<OrderShipped>(ClientOptions::queue("shipping"))
        .receive::<Order, _>(
            ClientOptions::queue("orders"),
            |order: Order, context: HandlerContext| async move {
                context.publish(OrderShipped { id: order.id });
                Err::<(), HandlerError>(HandlerError::Cancelled)
            },
        )
        .listener(Arc::new(listener.clone()))
        .build(Arc::new(transport.clone()))
        .await
        .unwrap();

    transport.enqueue("orders", incoming("m-2", "OrderCreated", ORDER_JSON));
    let results = process_pending(&bus, &transport, ClientType::Queue, "orders").await;

    assert!(results[0].is_ok());
    assert!(transport.pending("shipping").is_empty());
    assert_eq!(listener.events(), vec!["start:m-2"]);
}
