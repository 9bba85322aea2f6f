//! In-process broker
//!
//! A small direct-exchange broker living in the same process: durable
//! queues, bindings, per-channel prefetch, ack/nack with requeue or
//! dead-lettering, and redelivery of unacknowledged messages when a
//! channel goes away. An outage switch fails new connects and kills live
//! channels, which is how reconnect behavior is exercised.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{CourierError, Result};
use super::{Channel, Connector, Delivery, Next, Topology};

/// A message sitting in a queue
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub routing_key: String,
    pub body: Vec<u8>,
    pub redelivered: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Binding {
    exchange: String,
    routing_key: String,
    queue: String,
}

struct Unacked {
    channel: u64,
    queue: String,
    message: Message,
}

struct BrokerState {
    online: bool,
    closed: bool,

    /// Bumped on every outage; channels from older generations are dead
    generation: u64,

    bindings: Vec<Binding>,
    queues: HashMap<String, VecDeque<Message>>,
    unacked: HashMap<u64, Unacked>,
    dead_letters: Vec<Message>,

    next_tag: u64,
    next_channel: u64,
    refuse_connects: u32,
    connects: u64,
}

impl BrokerState {
    fn route(&mut self, exchange: &str, routing_key: &str, body: &[u8]) -> usize {
        let targets: Vec<String> = self
            .bindings
            .iter()
            .filter(|b| b.exchange == exchange && b.routing_key == routing_key)
            .map(|b| b.queue.clone())
            .collect();

        for queue in &targets {
            self.queues.entry(queue.clone()).or_default().push_back(Message {
                routing_key: routing_key.to_string(),
                body: body.to_vec(),
                redelivered: false,
            });
        }
        targets.len()
    }

    fn bind(&mut self, exchange: &str, routing_key: &str, queue: &str) {
        self.queues.entry(queue.to_string()).or_default();
        let binding = Binding {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            queue: queue.to_string(),
        };
        if !self.bindings.contains(&binding) {
            self.bindings.push(binding);
        }
    }

    /// Put unacknowledged messages back at the head of their queues
    fn requeue_unacked(&mut self, channel: Option<u64>) {
        let mut tags: Vec<u64> = self
            .unacked
            .iter()
            .filter(|(_, u)| channel.map_or(true, |id| u.channel == id))
            .map(|(tag, _)| *tag)
            .collect();
        // Newest first so the oldest ends up at the front
        tags.sort_unstable_by(|a, b| b.cmp(a));

        for tag in tags {
            if let Some(mut unacked) = self.unacked.remove(&tag) {
                unacked.message.redelivered = true;
                self.queues
                    .entry(unacked.queue)
                    .or_default()
                    .push_front(unacked.message);
            }
        }
    }
}

struct Shared {
    state: Mutex<BrokerState>,
    ready: Condvar,
}

/// Handle to an in-process broker; clones share the same broker
#[derive(Clone)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(BrokerState {
                    online: true,
                    closed: false,
                    generation: 0,
                    bindings: Vec::new(),
                    queues: HashMap::new(),
                    unacked: HashMap::new(),
                    dead_letters: Vec::new(),
                    next_tag: 1,
                    next_channel: 1,
                    refuse_connects: 0,
                    connects: 0,
                }),
                ready: Condvar::new(),
            }),
        }
    }

    /// Connector handing out channels on this broker
    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector {
            broker: self.clone(),
        }
    }

    /// Bind a queue to an exchange under a routing key, creating the queue
    pub fn bind(&self, exchange: &str, routing_key: &str, queue: &str) {
        self.shared.state.lock().bind(exchange, routing_key, queue);
    }

    /// Publish from outside any channel; returns how many queues received it
    pub fn publish(&self, exchange: &str, routing_key: &str, body: impl AsRef<[u8]>) -> usize {
        let routed = self
            .shared
            .state
            .lock()
            .route(exchange, routing_key, body.as_ref());
        self.shared.ready.notify_all();
        routed
    }

    /// Remove and return every ready message in a queue
    pub fn drain(&self, queue: &str) -> Vec<Message> {
        self.shared
            .state
            .lock()
            .queues
            .get_mut(queue)
            .map(|q| q.drain(..).collect())
            .unwrap_or_default()
    }

    /// Ready messages in a queue
    pub fn queue_len(&self, queue: &str) -> usize {
        self.shared
            .state
            .lock()
            .queues
            .get(queue)
            .map_or(0, VecDeque::len)
    }

    /// Delivered but not yet acknowledged messages
    pub fn unacked_count(&self) -> usize {
        self.shared.state.lock().unacked.len()
    }

    /// Messages rejected without requeue
    pub fn dead_letters(&self) -> Vec<Message> {
        self.shared.state.lock().dead_letters.clone()
    }

    /// Take the broker down or bring it back
    ///
    /// Going offline kills every open channel and requeues its
    /// unacknowledged messages.
    pub fn set_online(&self, online: bool) {
        let mut state = self.shared.state.lock();
        if state.online && !online {
            state.generation += 1;
            state.requeue_unacked(None);
        }
        state.online = online;
        drop(state);
        self.shared.ready.notify_all();
    }

    /// Refuse the next `count` connection attempts
    pub fn refuse_connects(&self, count: u32) {
        self.shared.state.lock().refuse_connects = count;
    }

    /// Shut the broker down for good
    ///
    /// Consumers receive what is already queued, then `Next::Closed`.
    pub fn close(&self) {
        self.shared.state.lock().closed = true;
        self.shared.ready.notify_all();
    }

    /// Successful connects so far
    pub fn connect_count(&self) -> u64 {
        self.shared.state.lock().connects
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

/// Opens channels on a `MemoryBroker`
#[derive(Clone)]
pub struct MemoryConnector {
    broker: MemoryBroker,
}

impl Connector for MemoryConnector {
    fn connect(&mut self) -> Result<Box<dyn Channel>> {
        let mut state = self.broker.shared.state.lock();
        if state.closed {
            return Err(CourierError::Connection("broker is shut down".to_string()));
        }
        if !state.online {
            return Err(CourierError::Connection("connection refused".to_string()));
        }
        if state.refuse_connects > 0 {
            state.refuse_connects -= 1;
            return Err(CourierError::Connection("connection refused".to_string()));
        }

        let id = state.next_channel;
        state.next_channel += 1;
        state.connects += 1;

        Ok(Box::new(MemoryChannel {
            shared: Arc::clone(&self.broker.shared),
            id,
            generation: state.generation,
            queue: None,
            prefetch: 1,
        }))
    }

    fn endpoint(&self) -> String {
        "memory".to_string()
    }
}

struct MemoryChannel {
    shared: Arc<Shared>,
    id: u64,
    generation: u64,
    queue: Option<String>,
    prefetch: usize,
}

impl MemoryChannel {
    /// Remove a delivery this channel owns from the unacked set
    fn take_unacked(&self, state: &mut BrokerState, tag: u64) -> Result<Unacked> {
        let owned = state
            .unacked
            .get(&tag)
            .map_or(false, |unacked| unacked.channel == self.id);
        if !owned {
            return Err(CourierError::Connection(format!("unknown delivery tag {}", tag)));
        }
        state
            .unacked
            .remove(&tag)
            .ok_or_else(|| CourierError::Connection(format!("unknown delivery tag {}", tag)))
    }

    fn check_alive(&self, state: &BrokerState) -> Result<()> {
        if !state.online || state.generation != self.generation {
            return Err(CourierError::Connection("connection lost".to_string()));
        }
        Ok(())
    }
}

impl Channel for MemoryChannel {
    fn declare(&mut self, topology: &Topology) -> Result<()> {
        let mut state = self.shared.state.lock();
        self.check_alive(&state)?;

        state.queues.entry(topology.queue.clone()).or_default();
        for routing_key in &topology.routing_keys {
            state.bind(&topology.income_exchange, routing_key, &topology.queue);
        }

        self.queue = Some(topology.queue.clone());
        self.prefetch = topology.prefetch.max(1);
        Ok(())
    }

    fn next_delivery(&mut self, timeout: Duration) -> Result<Next> {
        let queue = self
            .queue
            .clone()
            .ok_or_else(|| CourierError::Protocol("consume before declare".to_string()))?;
        let deadline = Instant::now() + timeout;

        let mut state = self.shared.state.lock();
        loop {
            self.check_alive(&state)?;

            let in_flight = state.unacked.values().filter(|u| u.channel == self.id).count();
            if in_flight < self.prefetch {
                if let Some(message) = state.queues.get_mut(&queue).and_then(VecDeque::pop_front) {
                    let tag = state.next_tag;
                    state.next_tag += 1;

                    let delivery = Delivery {
                        tag,
                        routing_key: message.routing_key.clone(),
                        body: message.body.clone(),
                        redelivered: message.redelivered,
                    };
                    state.unacked.insert(
                        tag,
                        Unacked {
                            channel: self.id,
                            queue,
                            message,
                        },
                    );
                    return Ok(Next::Delivery(delivery));
                }
            }

            // A closed broker still hands out what is already queued
            if state.closed {
                return Ok(Next::Closed);
            }

            if self.shared.ready.wait_until(&mut state, deadline).timed_out() {
                return Ok(Next::Idle);
            }
        }
    }

    fn publish(&mut self, exchange: &str, routing_key: &str, body: &[u8]) -> Result<()> {
        let mut state = self.shared.state.lock();
        self.check_alive(&state)?;
        state.route(exchange, routing_key, body);
        drop(state);
        self.shared.ready.notify_all();
        Ok(())
    }

    fn ack(&mut self, tag: u64) -> Result<()> {
        let mut state = self.shared.state.lock();
        self.check_alive(&state)?;
        self.take_unacked(&mut state, tag)?;
        drop(state);
        self.shared.ready.notify_all();
        Ok(())
    }

    fn nack(&mut self, tag: u64, requeue: bool) -> Result<()> {
        let mut state = self.shared.state.lock();
        self.check_alive(&state)?;
        let unacked = self.take_unacked(&mut state, tag)?;

        let mut message = unacked.message;
        if requeue {
            message.redelivered = true;
            state.queues.entry(unacked.queue).or_default().push_front(message);
        } else {
            state.dead_letters.push(message);
        }
        drop(state);
        self.shared.ready.notify_all();
        Ok(())
    }
}

impl Drop for MemoryChannel {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        state.requeue_unacked(Some(self.id));
        drop(state);
        self.shared.ready.notify_all();
    }
}
