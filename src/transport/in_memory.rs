//! In-memory transport for testing and single-process scenarios.
//!
//! Implements every transport seam on top of shared in-process state:
//! - queues and subscriptions hold pending messages in FIFO order
//! - sending to a topic fans out to each of its subscriptions
//! - scheduled messages are held until [`InMemoryTransport::deliver_scheduled`]
//! - every operation is appended to an operation log for assertions
//!
//! ## Example
//!
//! ```
//! use sourced_servicebus::transport::{ClientFactory, InMemoryTransport, MessageSender};
//! use sourced_servicebus::{ClientOptions, ServiceBusMessage};
//!
//! futures::executor::block_on(async {
//!     let transport = InMemoryTransport::new();
//!     let sender = transport.create_sender(&ClientOptions::queue("orders")).await.unwrap();
//!
//!     sender
//!         .send_messages(vec![ServiceBusMessage::new("msg-1", b"{}".to_vec())])
//!         .await
//!         .unwrap();
//!
//!     assert_eq!(transport.pending("orders").len(), 1);
//! });
//! ```

use std::any::Any;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio::time::Instant;

use super::{
    ClientFactory, CreateBatchOptions, MessageBatch, MessageReceiver, MessageSender,
    TransportError,
};
use crate::client::{ClientOptions, ClientType};
use crate::message::{ServiceBusMessage, ServiceBusReceivedMessage};

/// Largest batch the in-memory transport accepts (256 KiB, the standard tier limit).
pub const DEFAULT_MAX_BATCH_SIZE: usize = 256 * 1024;

/// One recorded transport call.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportOperation {
    SenderCreated {
        client_type: ClientType,
        entity_path: String,
    },
    SenderClosed {
        entity_path: String,
    },
    SendBatch {
        entity_path: String,
        message_ids: Vec<String>,
    },
    SendMessages {
        entity_path: String,
        message_ids: Vec<String>,
    },
    Schedule {
        entity_path: String,
        message_ids: Vec<String>,
        enqueue_time: DateTime<Utc>,
    },
    CancelScheduled {
        entity_path: String,
        sequence_numbers: Vec<i64>,
    },
    Complete {
        entity_path: String,
        message_id: String,
    },
    Abandon {
        entity_path: String,
        message_id: String,
    },
    DeadLetter {
        entity_path: String,
        message_id: String,
        reason: Option<String>,
    },
}

struct ScheduledMessage {
    entity_path: String,
    message: ServiceBusMessage,
    enqueue_time: DateTime<Utc>,
}

#[derive(Default)]
struct Entities {
    /// Pending messages per queue or subscription path
    pending: HashMap<String, VecDeque<ServiceBusReceivedMessage>>,
    /// Locked messages per lock token
    in_flight: HashMap<String, (String, ServiceBusReceivedMessage)>,
    dead_letters: HashMap<String, Vec<ServiceBusReceivedMessage>>,
    /// Subscriptions per topic
    subscriptions: HashMap<String, Vec<String>>,
    scheduled: BTreeMap<i64, ScheduledMessage>,
}

struct State {
    entities: Mutex<Entities>,
    operations: Mutex<Vec<TransportOperation>>,
    failing_entities: Mutex<HashSet<String>>,
    fail_settlement: AtomicBool,
    sequence: AtomicI64,
    max_batch_size: usize,
    notify: Notify,
}

/// In-memory broker implementing [`ClientFactory`], [`MessageSender`] and
/// [`MessageReceiver`].
///
/// Clones share the same state.
#[derive(Clone)]
pub struct InMemoryTransport {
    state: Arc<State>,
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTransport {
    /// Create a transport with the default batch size limit.
    pub fn new() -> Self {
        Self::with_max_batch_size(DEFAULT_MAX_BATCH_SIZE)
    }

    /// Create a transport whose batches hold at most `max_batch_size` bytes.
    pub fn with_max_batch_size(max_batch_size: usize) -> Self {
        Self {
            state: Arc::new(State {
                entities: Mutex::new(Entities::default()),
                operations: Mutex::new(Vec::new()),
                failing_entities: Mutex::new(HashSet::new()),
                fail_settlement: AtomicBool::new(false),
                sequence: AtomicI64::new(1),
                max_batch_size,
                notify: Notify::new(),
            }),
        }
    }

    /// Declare a subscription so that messages sent to `topic` reach it.
    pub fn create_subscription(&self, topic: &str, subscription: &str) -> String {
        let path = ClientOptions::subscription(topic, subscription)
            .resource_id()
            .to_string();
        let mut entities = lock(&self.state.entities);
        let subscriptions = entities.subscriptions.entry(topic.to_string()).or_default();
        if !subscriptions.contains(&path) {
            subscriptions.push(path.clone());
        }
        entities.pending.entry(path.clone()).or_default();
        path
    }

    /// Receiver settling messages of one queue or subscription.
    pub fn receiver(&self, entity_path: impl Into<String>) -> InMemoryReceiver {
        InMemoryReceiver {
            state: Arc::clone(&self.state),
            entity_path: entity_path.into(),
        }
    }

    /// Put a message straight onto a queue or subscription, as if another
    /// process had sent it. Returns the delivered message.
    pub fn enqueue(&self, entity_path: &str, message: ServiceBusMessage) -> ServiceBusReceivedMessage {
        let received = self.state.deliver(entity_path, message);
        self.state.notify.notify_waiters();
        received
    }

    /// Messages waiting on a queue or subscription.
    pub fn pending(&self, entity_path: &str) -> Vec<ServiceBusReceivedMessage> {
        lock(&self.state.entities)
            .pending
            .get(entity_path)
            .map(|queue| queue.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Dead-lettered messages of a queue or subscription.
    pub fn dead_letters(&self, entity_path: &str) -> Vec<ServiceBusReceivedMessage> {
        lock(&self.state.entities)
            .dead_letters
            .get(entity_path)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of messages still waiting for their enqueue time.
    pub fn scheduled_count(&self) -> usize {
        lock(&self.state.entities).scheduled.len()
    }

    /// Deliver every scheduled message due at or before `now`.
    pub fn deliver_scheduled(&self, now: DateTime<Utc>) -> usize {
        let due: Vec<ScheduledMessage> = {
            let mut entities = lock(&self.state.entities);
            let due_keys: Vec<i64> = entities
                .scheduled
                .iter()
                .filter(|(_, scheduled)| scheduled.enqueue_time <= now)
                .map(|(sequence, _)| *sequence)
                .collect();
            due_keys
                .into_iter()
                .filter_map(|sequence| entities.scheduled.remove(&sequence))
                .collect()
        };

        let count = due.len();
        for scheduled in due {
            self.state.route(&scheduled.entity_path, scheduled.message);
        }
        self.state.notify.notify_waiters();
        count
    }

    /// Every transport call recorded so far.
    pub fn operations(&self) -> Vec<TransportOperation> {
        lock(&self.state.operations).clone()
    }

    /// Message ids completed on `entity_path`, in completion order.
    pub fn completed(&self, entity_path: &str) -> Vec<String> {
        self.operations()
            .into_iter()
            .filter_map(|operation| match operation {
                TransportOperation::Complete {
                    entity_path: path,
                    message_id,
                } if path == entity_path => Some(message_id),
                _ => None,
            })
            .collect()
    }

    /// Make every send or schedule to `entity_path` fail.
    pub fn fail_sends_to(&self, entity_path: impl Into<String>) {
        lock(&self.state.failing_entities).insert(entity_path.into());
    }

    /// Make complete / abandon / dead-letter fail.
    pub fn fail_settlement(&self, fail: bool) {
        self.state.fail_settlement.store(fail, Ordering::SeqCst);
    }

    /// Clear all entities, schedules and recorded operations.
    pub fn clear(&self) {
        *lock(&self.state.entities) = Entities::default();
        lock(&self.state.operations).clear();
        lock(&self.state.failing_entities).clear();
        self.state.fail_settlement.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl ClientFactory for InMemoryTransport {
    async fn create_sender(
        &self,
        options: &ClientOptions,
    ) -> Result<Arc<dyn MessageSender>, TransportError> {
        let client_type = match options.client_type() {
            ClientType::Subscription => {
                return Err(TransportError::Rejected(format!(
                    "cannot send to subscription {}",
                    options.resource_id()
                )))
            }
            client_type => client_type,
        };

        let entity_path = options.original_resource_id().to_string();
        self.state.record(TransportOperation::SenderCreated {
            client_type,
            entity_path: entity_path.clone(),
        });

        Ok(Arc::new(InMemorySender {
            state: Arc::clone(&self.state),
            client_type,
            entity_path,
            closed: AtomicBool::new(false),
        }))
    }
}

impl State {
    fn record(&self, operation: TransportOperation) {
        lock(&self.operations).push(operation);
    }

    fn check_sendable(&self, entity_path: &str) -> Result<(), TransportError> {
        if lock(&self.failing_entities).contains(entity_path) {
            return Err(TransportError::Rejected(format!(
                "send to {} refused",
                entity_path
            )));
        }
        Ok(())
    }

    fn check_settlement(&self) -> Result<(), TransportError> {
        if self.fail_settlement.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionFailed(
                "settlement link detached".to_string(),
            ));
        }
        Ok(())
    }

    fn next_sequence(&self) -> i64 {
        self.sequence.fetch_add(1, Ordering::SeqCst)
    }

    /// Queue path → that queue; topic path → each subscription.
    fn route(&self, entity_path: &str, message: ServiceBusMessage) {
        let subscriptions = lock(&self.entities).subscriptions.get(entity_path).cloned();
        match subscriptions {
            Some(subscriptions) => {
                for subscription in subscriptions {
                    self.deliver(&subscription, message.clone());
                }
            }
            None => {
                self.deliver(entity_path, message);
            }
        }
    }

    fn deliver(&self, entity_path: &str, message: ServiceBusMessage) -> ServiceBusReceivedMessage {
        let mut received = ServiceBusReceivedMessage::new(message);
        received.sequence_number = self.next_sequence();
        lock(&self.entities)
            .pending
            .entry(entity_path.to_string())
            .or_default()
            .push_back(received.clone());
        received
    }
}

/// Batch produced by [`InMemorySender::create_batch`].
#[derive(Debug)]
pub struct InMemoryBatch {
    messages: Vec<ServiceBusMessage>,
    size: usize,
    max_size: usize,
}

impl InMemoryBatch {
    pub fn new(max_size: usize) -> Self {
        Self {
            messages: Vec::new(),
            size: 0,
            max_size,
        }
    }

    pub fn messages(&self) -> &[ServiceBusMessage] {
        &self.messages
    }
}

impl MessageBatch for InMemoryBatch {
    fn try_add(&mut self, message: ServiceBusMessage) -> Result<(), ServiceBusMessage> {
        let size = message.size_in_bytes();
        if self.size + size > self.max_size {
            return Err(message);
        }
        self.size += size;
        self.messages.push(message);
        Ok(())
    }

    fn len(&self) -> usize {
        self.messages.len()
    }

    fn size_in_bytes(&self) -> usize {
        self.size
    }

    fn max_size_in_bytes(&self) -> usize {
        self.max_size
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}

/// Sender bound to one in-memory queue or topic.
pub struct InMemorySender {
    state: Arc<State>,
    client_type: ClientType,
    entity_path: String,
    closed: AtomicBool,
}

impl InMemorySender {
    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionFailed(format!(
                "sender for {} is closed",
                self.entity_path
            )));
        }
        Ok(())
    }

    fn deliver_all(&self, messages: Vec<ServiceBusMessage>) {
        for message in messages {
            self.state.route(&self.entity_path, message);
        }
        self.state.notify.notify_waiters();
    }
}

#[async_trait]
impl MessageSender for InMemorySender {
    fn client_type(&self) -> ClientType {
        self.client_type
    }

    fn entity_path(&self) -> &str {
        &self.entity_path
    }

    async fn create_batch(
        &self,
        options: CreateBatchOptions,
    ) -> Result<Box<dyn MessageBatch>, TransportError> {
        self.ensure_open()?;
        let max_size = options
            .max_size_in_bytes
            .map_or(self.state.max_batch_size, |requested| {
                usize::try_from(requested)
                    .unwrap_or(usize::MAX)
                    .min(self.state.max_batch_size)
            });
        Ok(Box::new(InMemoryBatch::new(max_size)))
    }

    async fn send_batch(&self, batch: Box<dyn MessageBatch>) -> Result<(), TransportError> {
        self.ensure_open()?;
        let batch = batch.into_any().downcast::<InMemoryBatch>().map_err(|_| {
            TransportError::Rejected("batch was not created by this transport".to_string())
        })?;
        self.state.check_sendable(&self.entity_path)?;

        self.state.record(TransportOperation::SendBatch {
            entity_path: self.entity_path.clone(),
            message_ids: message_ids(&batch.messages),
        });
        self.deliver_all(batch.messages);
        Ok(())
    }

    async fn send_messages(&self, messages: Vec<ServiceBusMessage>) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.state.check_sendable(&self.entity_path)?;

        self.state.record(TransportOperation::SendMessages {
            entity_path: self.entity_path.clone(),
            message_ids: message_ids(&messages),
        });
        self.deliver_all(messages);
        Ok(())
    }

    async fn schedule_messages(
        &self,
        messages: Vec<ServiceBusMessage>,
        enqueue_time: DateTime<Utc>,
    ) -> Result<Vec<i64>, TransportError> {
        self.ensure_open()?;
        self.state.check_sendable(&self.entity_path)?;

        self.state.record(TransportOperation::Schedule {
            entity_path: self.entity_path.clone(),
            message_ids: message_ids(&messages),
            enqueue_time,
        });

        let mut entities = lock(&self.state.entities);
        let sequence_numbers = messages
            .into_iter()
            .map(|message| {
                let sequence = self.state.next_sequence();
                entities.scheduled.insert(
                    sequence,
                    ScheduledMessage {
                        entity_path: self.entity_path.clone(),
                        message,
                        enqueue_time,
                    },
                );
                sequence
            })
            .collect();
        Ok(sequence_numbers)
    }

    async fn cancel_scheduled_messages(
        &self,
        sequence_numbers: &[i64],
    ) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.state.record(TransportOperation::CancelScheduled {
            entity_path: self.entity_path.clone(),
            sequence_numbers: sequence_numbers.to_vec(),
        });

        let mut entities = lock(&self.state.entities);
        for sequence in sequence_numbers {
            entities.scheduled.remove(sequence);
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.state.record(TransportOperation::SenderClosed {
                entity_path: self.entity_path.clone(),
            });
        }
        Ok(())
    }
}

/// Receiver for one in-memory queue or subscription.
#[derive(Clone)]
pub struct InMemoryReceiver {
    state: Arc<State>,
    entity_path: String,
}

impl InMemoryReceiver {
    pub fn entity_path(&self) -> &str {
        &self.entity_path
    }

    /// Lock up to `max_messages` pending messages without waiting.
    pub fn try_receive(&self, max_messages: usize) -> Vec<ServiceBusReceivedMessage> {
        let mut entities = lock(&self.state.entities);
        let mut received = Vec::new();

        while received.len() < max_messages {
            let Some(message) = entities
                .pending
                .get_mut(&self.entity_path)
                .and_then(VecDeque::pop_front)
            else {
                break;
            };
            entities.in_flight.insert(
                message.lock_token.clone(),
                (self.entity_path.clone(), message.clone()),
            );
            received.push(message);
        }

        received
    }

    /// Lock up to `max_messages`, waiting at most `max_wait` for the first one.
    pub async fn receive_messages(
        &self,
        max_messages: usize,
        max_wait: Duration,
    ) -> Vec<ServiceBusReceivedMessage> {
        let deadline = Instant::now() + max_wait;

        loop {
            let notified = self.state.notify.notified();

            let received = self.try_receive(max_messages);
            if !received.is_empty() {
                return received;
            }

            let now = Instant::now();
            if now >= deadline {
                return Vec::new();
            }

            if tokio::time::timeout(deadline - now, notified).await.is_err() {
                return self.try_receive(max_messages);
            }
        }
    }

    fn settle(
        &self,
        message: &ServiceBusReceivedMessage,
    ) -> Result<ServiceBusReceivedMessage, TransportError> {
        self.state.check_settlement()?;
        lock(&self.state.entities)
            .in_flight
            .remove(&message.lock_token)
            .map(|(_, locked)| locked)
            .ok_or_else(|| TransportError::MessageLockLost(message.message_id().to_string()))
    }
}

#[async_trait]
impl MessageReceiver for InMemoryReceiver {
    async fn complete_message(
        &self,
        message: &ServiceBusReceivedMessage,
    ) -> Result<(), TransportError> {
        self.settle(message)?;
        self.state.record(TransportOperation::Complete {
            entity_path: self.entity_path.clone(),
            message_id: message.message_id().to_string(),
        });
        Ok(())
    }

    async fn abandon_message(
        &self,
        message: &ServiceBusReceivedMessage,
    ) -> Result<(), TransportError> {
        let mut locked = self.settle(message)?;
        locked.delivery_count += 1;
        locked.lock_token = uuid::Uuid::new_v4().to_string();

        self.state.record(TransportOperation::Abandon {
            entity_path: self.entity_path.clone(),
            message_id: message.message_id().to_string(),
        });
        lock(&self.state.entities)
            .pending
            .entry(self.entity_path.clone())
            .or_default()
            .push_front(locked);
        self.state.notify.notify_waiters();
        Ok(())
    }

    async fn dead_letter_message(
        &self,
        message: &ServiceBusReceivedMessage,
        reason: Option<&str>,
        _description: Option<&str>,
    ) -> Result<(), TransportError> {
        let locked = self.settle(message)?;
        self.state.record(TransportOperation::DeadLetter {
            entity_path: self.entity_path.clone(),
            message_id: message.message_id().to_string(),
            reason: reason.map(str::to_string),
        });
        lock(&self.state.entities)
            .dead_letters
            .entry(self.entity_path.clone())
            .or_default()
            .push(locked);
        Ok(())
    }
}

fn message_ids(messages: &[ServiceBusMessage]) -> Vec<String> {
    messages.iter().map(|m| m.message_id.clone()).collect()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
