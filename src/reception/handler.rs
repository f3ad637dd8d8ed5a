//! Message handlers and their type-erased invocation.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;

use super::{HandlerContext, HandlerError, ReceptionError};
use crate::payload::Payload;
use crate::serializer::PayloadSerializer;

/// Handles payloads of type `T`.
///
/// Implemented for structs, and for any async closure
/// `Fn(T, HandlerContext) -> impl Future<Output = Result<(), HandlerError>>`.
///
/// ## Example
///
/// ```ignore
/// struct ShipOrder;
///
/// #[async_trait]
/// impl MessageHandler<OrderPlaced> for ShipOrder {
///     async fn handle(&self, order: OrderPlaced, context: HandlerContext) -> Result<(), HandlerError> {
///         context.publish(OrderShipped { id: order.id });
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait MessageHandler<T: Payload>: Send + Sync + 'static {
    async fn handle(&self, payload: T, context: HandlerContext) -> Result<(), HandlerError>;
}

#[async_trait]
impl<T, F, Fut> MessageHandler<T> for F
where
    T: Payload,
    F: Fn(T, HandlerContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, payload: T, context: HandlerContext) -> Result<(), HandlerError> {
        (self)(payload, context).await
    }
}

/// Deserializes a body and calls the typed handler.
#[async_trait]
pub(crate) trait ReceptionInvoker: Send + Sync {
    async fn invoke(
        &self,
        payload_type_id: &str,
        body: &[u8],
        context: HandlerContext,
    ) -> Result<(), ReceptionError>;
}

pub(crate) struct TypedInvoker<T, H, S> {
    handler: Arc<H>,
    serializer: Arc<S>,
    _payload: PhantomData<fn() -> T>,
}

impl<T, H, S> TypedInvoker<T, H, S> {
    pub(crate) fn new(handler: Arc<H>, serializer: Arc<S>) -> Self {
        Self {
            handler,
            serializer,
            _payload: PhantomData,
        }
    }
}

#[async_trait]
impl<T, H, S> ReceptionInvoker for TypedInvoker<T, H, S>
where
    T: Payload,
    H: MessageHandler<T>,
    S: PayloadSerializer,
{
    async fn invoke(
        &self,
        payload_type_id: &str,
        body: &[u8],
        context: HandlerContext,
    ) -> Result<(), ReceptionError> {
        let payload: T = self.serializer.deserialize(body).map_err(|source| {
            ReceptionError::Deserialization {
                payload_type_id: payload_type_id.to_string(),
                source,
            }
        })?;

        self.handler
            .handle(payload, context)
            .await
            .map_err(ReceptionError::Handler)
    }
}
