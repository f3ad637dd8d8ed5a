use std::sync::Arc;

use sourced_servicebus::transport::{InMemoryTransport, TransportError, TransportOperation};
use sourced_servicebus::{
    ClientOptions, ClientType, CompositionError, ConnectionSettings, RegistrationError,
    ServiceBusBuilder, ServiceBusSettings,
};

use crate::support::{Order, OrderShipped, Recorder, UnreachableBroker};

fn builder() -> ServiceBusBuilder {
    ServiceBusBuilder::new(ServiceBusSettings::default())
}

#[tokio::test]
async fn duplicate_dispatch_destinations_are_all_reported() {
    let result = builder()
        .dispatch::<Order>(ClientOptions::queue("orders"))
        .dispatch_with::<Order, _>(ClientOptions::queue("orders"), |r| r.payload_type_id("OrderV2"))
        .dispatch::<OrderShipped>(ClientOptions::topic("events"))
        .dispatch::<OrderShipped>(ClientOptions::topic("events"))
        .dispatch::<OrderShipped>(ClientOptions::queue("shipping"))
        .build(Arc::new(InMemoryTransport::new()))
        .await;

    let Err(CompositionError::Registration(RegistrationError::MultiplePublicationRegistration {
        duplicates,
    })) = result
    else {
        panic!("expected duplicate dispatch registrations to abort composition");
    };

    assert_eq!(duplicates.len(), 2);
    assert_eq!(duplicates[0].client_type, ClientType::Queue);
    assert_eq!(duplicates[0].resource_id, "orders");
    assert_eq!(duplicates[0].payload_type_ids, vec!["OrderCreated", "OrderV2"]);
    assert_eq!(duplicates[1].client_type, ClientType::Topic);
    assert_eq!(duplicates[1].resource_id, "events");
}

#[tokio::test]
async fn same_handler_twice_on_one_resource_aborts() {
    let recorder = Recorder::<Order>::new();
    let result = builder()
        .receive::<Order, _>(ClientOptions::queue("orders"), recorder.clone())
        .receive_with::<Order, _, _>(ClientOptions::queue("orders"), recorder, |r| {
            r.with_payload_type_id("OrderV2")
        })
        .build(Arc::new(InMemoryTransport::new()))
        .await;

    assert!(matches!(
        result,
        Err(CompositionError::Registration(
            RegistrationError::DuplicateReceptionHandler { .. }
        ))
    ));
}

#[tokio::test]
async fn two_handlers_for_one_type_id_abort() {
    let result = builder()
        .receive::<Order, _>(ClientOptions::queue("orders"), Recorder::<Order>::new())
        .receive::<Order, _>(ClientOptions::queue("orders"), crate::support::ShipOrders)
        .build(Arc::new(InMemoryTransport::new()))
        .await;

    assert!(matches!(
        result,
        Err(CompositionError::Registration(
            RegistrationError::DuplicatePayloadTypeId { .. }
        ))
    ));
}

#[tokio::test]
async fn subscriptions_cannot_be_dispatched_to() {
    let result = builder()
        .dispatch::<Order>(ClientOptions::subscription("events", "billing"))
        .build(Arc::new(InMemoryTransport::new()))
        .await;

    assert!(matches!(
        result,
        Err(CompositionError::Registration(
            RegistrationError::InvalidDispatchTarget { .. }
        ))
    ));
}

#[tokio::test]
async fn topics_cannot_be_received_from() {
    let result = builder()
        .receive::<Order, _>(ClientOptions::topic("events"), Recorder::<Order>::new())
        .build(Arc::new(InMemoryTransport::new()))
        .await;

    assert!(matches!(
        result,
        Err(CompositionError::Registration(
            RegistrationError::InvalidReceptionSource { .. }
        ))
    ));
}

#[tokio::test]
async fn sender_creation_failure_names_the_resource() {
    let result = builder()
        .dispatch::<Order>(ClientOptions::queue("orders"))
        .build(Arc::new(UnreachableBroker))
        .await;

    match result {
        Err(CompositionError::SenderCreation {
            client_type,
            resource_id,
            source: TransportError::ConnectionFailed(_),
        }) => {
            assert_eq!(client_type, ClientType::Queue);
            assert_eq!(resource_id, "orders");
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("composition succeeded without a broker"),
    }
}

#[tokio::test]
async fn one_sender_per_resource() {
    let transport = InMemoryTransport::new();
    let bus = builder()
        .dispatch::<Order>(ClientOptions::queue("orders"))
        .dispatch::<OrderShipped>(ClientOptions::queue("orders"))
        .dispatch::<OrderShipped>(ClientOptions::topic("events"))
        .receive::<Order, _>(ClientOptions::queue("inbox"), Recorder::<Order>::new())
        .build(Arc::new(transport.clone()))
        .await
        .unwrap();

    let created = transport
        .operations()
        .into_iter()
        .filter(|op| matches!(op, TransportOperation::SenderCreated { .. }))
        .count();
    assert_eq!(created, 2);
    assert_eq!(bus.registry().senders().count(), 2);
    assert_eq!(bus.receivers().count(), 1);
    assert_eq!(bus.dispatch_registry().len(), 3);
    assert_eq!(bus.reception_registry().len(), 1);
}

#[tokio::test]
async fn same_queue_on_another_connection_gets_a_suffixed_id() {
    let transport = InMemoryTransport::new();
    let secondary = ConnectionSettings::from_connection_string("Endpoint=sb://secondary/");
    let bus = builder()
        .dispatch::<Order>(ClientOptions::queue("orders"))
        .dispatch::<Order>(ClientOptions::queue("orders").with_connection(secondary.clone()))
        .build(Arc::new(transport.clone()))
        .await
        .unwrap();

    let primary = bus.registry().get_sender(ClientType::Queue, "orders").unwrap();
    assert!(primary.options.connection().is_none());
    let suffixed = bus.registry().get_sender(ClientType::Queue, "orders_2").unwrap();
    assert_eq!(suffixed.options.original_resource_id(), "orders");
    assert_eq!(suffixed.options.connection(), Some(&secondary));

    bus.publisher().publish(Order::new("o-1", 5)).await.unwrap();
    assert_eq!(transport.pending("orders").len(), 2);
}

#[tokio::test]
async fn close_releases_every_sender() {
    let transport = InMemoryTransport::new();
    let bus = builder()
        .dispatch::<Order>(ClientOptions::queue("orders"))
        .dispatch::<Order>(ClientOptions::topic("events"))
        .build(Arc::new(transport.clone()))
        .await
        .unwrap();

    bus.close().await.unwrap();

    let closed = transport
        .operations()
        .into_iter()
        .filter(|op| matches!(op, TransportOperation::SenderClosed { .. }))
        .count();
    assert_eq!(closed, 2);
    assert!(bus.publisher().publish(Order::new("o-1", 1)).await.is_err());
}
