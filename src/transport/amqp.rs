//! AMQP transport
//!
//! Binds the consumer to a RabbitMQ-compatible broker: a durable queue,
//! direct exchanges for commands and responses, one binding per command
//! routing key, manual acks and a prefetch of one.
//!
//! amiquip hands out consumers that borrow their channel, so the whole
//! broker connection lives on a dedicated `amqp-link` thread. The
//! `Channel` given to the supervisor forwards every call to that thread
//! and waits for the answer.

use std::collections::HashMap;
use std::net::{TcpStream, ToSocketAddrs};
use std::thread;
use std::time::Duration;

use amiquip::{
    Auth, Channel as BrokerChannel, Connection, ConnectionOptions, ConnectionTuning, Consumer, ConsumerMessage,
    ConsumerOptions, ExchangeDeclareOptions, ExchangeType, FieldTable, Publish,
    QueueDeclareOptions,
};
use crossbeam::channel::{self as cb, Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::config::Config;
use crate::error::{CourierError, Result};
use super::{Channel, Connector, Delivery, Next, Topology};

/// Limit on the TCP connect before the attempt counts as failed
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long an idle link thread waits on the broker before checking
/// whether its handle is gone
const LINK_POLL: Duration = Duration::from_millis(100);

/// Connects to an AMQP 0-9-1 broker with PLAIN credentials
#[derive(Clone)]
pub struct AmqpConnector {
    host: String,
    port: u16,
    username: String,
    password: String,
}

impl AmqpConnector {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password: password.into(),
        }
    }

    /// Connector for the broker named in `config`
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.broker_host,
            config.broker_port,
            &config.broker_username,
            &config.broker_password,
        )
    }

    fn open(&self) -> Result<Connection> {
        let addr = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| unreachable_broker(&self.endpoint(), e))?
            .next()
            .ok_or_else(|| {
                CourierError::Connection(format!("{} did not resolve", self.endpoint()))
            })?;
        let stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)
            .map_err(|e| unreachable_broker(&self.endpoint(), e))?;

        let options = ConnectionOptions::<Auth>::default().auth(Auth::Plain {
            username: self.username.clone(),
            password: self.password.clone(),
        });
        let stream = mio::net::TcpStream::from_stream(stream)
            .map_err(|e| unreachable_broker(&self.endpoint(), e))?;
        Connection::insecure_open_stream(stream, options, ConnectionTuning::default())
            .map_err(link_error)
    }
}

impl Connector for AmqpConnector {
    fn connect(&mut self) -> Result<Box<dyn Channel>> {
        let (ready_tx, ready_rx) = cb::bounded(1);
        let (requests_tx, requests_rx) = cb::unbounded();
        let (deliveries_tx, deliveries_rx) = cb::unbounded();

        let connector = self.clone();
        thread::Builder::new()
            .name("amqp-link".to_string())
            .spawn(move || run_link(&connector, ready_tx, requests_rx, deliveries_tx))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Box::new(AmqpChannel {
                requests: requests_tx,
                deliveries: deliveries_rx,
            })),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(link_closed()),
        }
    }

    fn endpoint(&self) -> String {
        format!("amqp://{}@{}:{}", self.username, self.host, self.port)
    }
}

fn unreachable_broker(endpoint: &str, e: std::io::Error) -> CourierError {
    CourierError::Connection(format!("cannot reach {}: {}", endpoint, e))
}

fn link_error(e: amiquip::Error) -> CourierError {
    CourierError::Connection(e.to_string())
}

fn link_closed() -> CourierError {
    CourierError::Connection("AMQP link closed".to_string())
}

// =============================================================================
// Supervisor side
// =============================================================================

enum Request {
    Declare(Topology),
    Publish {
        exchange: String,
        routing_key: String,
        body: Vec<u8>,
    },
    Ack(u64),
    Nack { tag: u64, requeue: bool },
}

type Reply = Sender<Result<()>>;

/// Handle to a live link thread
struct AmqpChannel {
    requests: Sender<(Request, Reply)>,
    deliveries: Receiver<Result<Delivery>>,
}

impl AmqpChannel {
    fn call(&self, request: Request) -> Result<()> {
        let (reply_tx, reply_rx) = cb::bounded(1);
        self.requests
            .send((request, reply_tx))
            .map_err(|_| link_closed())?;
        reply_rx.recv().map_err(|_| link_closed())?
    }
}

impl Channel for AmqpChannel {
    fn declare(&mut self, topology: &Topology) -> Result<()> {
        self.call(Request::Declare(topology.clone()))
    }

    fn next_delivery(&mut self, timeout: Duration) -> Result<Next> {
        match self.deliveries.recv_timeout(timeout) {
            Ok(Ok(delivery)) => Ok(Next::Delivery(delivery)),
            Ok(Err(e)) => Err(e),
            Err(RecvTimeoutError::Timeout) => Ok(Next::Idle),
            Err(RecvTimeoutError::Disconnected) => Err(link_closed()),
        }
    }

    fn publish(&mut self, exchange: &str, routing_key: &str, body: &[u8]) -> Result<()> {
        self.call(Request::Publish {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            body: body.to_vec(),
        })
    }

    fn ack(&mut self, tag: u64) -> Result<()> {
        self.call(Request::Ack(tag))
    }

    fn nack(&mut self, tag: u64, requeue: bool) -> Result<()> {
        self.call(Request::Nack { tag, requeue })
    }
}

// =============================================================================
// Link thread
// =============================================================================

fn run_link(
    connector: &AmqpConnector,
    ready: Sender<Result<()>>,
    requests: Receiver<(Request, Reply)>,
    deliveries: Sender<Result<Delivery>>,
) {
    let opened = connector.open().and_then(|mut connection| {
        let channel = connection.open_channel(None).map_err(link_error)?;
        Ok((connection, channel))
    });
    let (connection, channel) = match opened {
        Ok(pair) => pair,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    if ready.send(Ok(())).is_err() {
        return;
    }

    let served = Link::new(&channel).serve(&requests, &deliveries);
    if let Err(e) = served {
        tracing::warn!(endpoint = %connector.endpoint(), error = %e, "AMQP link failed");
        let _ = deliveries.send(Err(e));
    }

    if let Err(e) = channel.close() {
        tracing::debug!(error = %e, "Closing AMQP channel");
    }
    if let Err(e) = connection.close() {
        tracing::debug!(error = %e, "Closing AMQP connection");
    }
}

/// Broker state owned by the link thread
struct Link<'a> {
    channel: &'a BrokerChannel,
    consumer: Option<Consumer<'a>>,

    /// Deliveries handed out and not yet settled, by local tag
    unacked: HashMap<u64, amiquip::Delivery>,

    next_tag: u64,
}

impl<'a> Link<'a> {
    fn new(channel: &'a BrokerChannel) -> Self {
        Self {
            channel,
            consumer: None,
            unacked: HashMap::new(),
            next_tag: 1,
        }
    }

    /// Serve requests and forward deliveries until the handle is dropped
    ///
    /// With a prefetch of one the broker sends nothing new while a
    /// delivery is unsettled, so the thread only waits on the broker
    /// when nothing is outstanding.
    fn serve(
        &mut self,
        requests: &Receiver<(Request, Reply)>,
        deliveries: &Sender<Result<Delivery>>,
    ) -> Result<()> {
        loop {
            if self.consumer.is_none() || !self.unacked.is_empty() {
                let Ok((request, reply)) = requests.recv() else {
                    return Ok(());
                };
                let _ = reply.send(self.handle(request));
                continue;
            }

            let Some(consumer) = self.consumer.as_ref() else {
                continue;
            };
            match consumer.receiver().recv_timeout(LINK_POLL) {
                Ok(ConsumerMessage::Delivery(delivery)) => {
                    let tag = self.next_tag;
                    self.next_tag += 1;
                    let message = Delivery {
                        tag,
                        routing_key: delivery.routing_key.clone(),
                        body: delivery.body.clone(),
                        redelivered: delivery.redelivered,
                    };
                    self.unacked.insert(tag, delivery);
                    if deliveries.send(Ok(message)).is_err() {
                        return Ok(());
                    }
                }
                Ok(_) => {
                    return Err(CourierError::Connection(
                        "broker ended the consumer".to_string(),
                    ))
                }
                Err(e) if e.is_timeout() => match requests.try_recv() {
                    Ok((request, reply)) => {
                        let _ = reply.send(self.handle(request));
                    }
                    Err(TryRecvError::Empty) => {}
                    Err(TryRecvError::Disconnected) => return Ok(()),
                },
                Err(_) => return Err(link_closed()),
            }
        }
    }

    fn handle(&mut self, request: Request) -> Result<()> {
        match request {
            Request::Declare(topology) => {
                let consumer = declare(self.channel, &topology).map_err(link_error)?;
                self.consumer = Some(consumer);
                Ok(())
            }
            Request::Publish {
                exchange,
                routing_key,
                body,
            } => self
                .channel
                .basic_publish(exchange, Publish::new(&body, routing_key))
                .map_err(link_error),
            Request::Ack(tag) => {
                let (consumer, delivery) = self.settle(tag)?;
                consumer.ack(delivery).map_err(link_error)
            }
            Request::Nack { tag, requeue } => {
                let (consumer, delivery) = self.settle(tag)?;
                consumer.nack(delivery, requeue).map_err(link_error)
            }
        }
    }

    fn settle(&mut self, tag: u64) -> Result<(&Consumer<'a>, amiquip::Delivery)> {
        let delivery = self
            .unacked
            .remove(&tag)
            .ok_or_else(|| CourierError::Protocol(format!("unknown delivery tag {}", tag)))?;
        let consumer = self
            .consumer
            .as_ref()
            .ok_or_else(|| CourierError::Protocol("not consuming".to_string()))?;
        Ok((consumer, delivery))
    }
}

/// Assert the queue and exchanges, bind every routing key and start consuming
fn declare<'a>(channel: &'a BrokerChannel, topology: &Topology) -> amiquip::Result<Consumer<'a>> {
    let prefetch = u16::try_from(topology.prefetch).unwrap_or(u16::MAX);
    channel.qos(0, prefetch, false)?;

    let queue = channel.queue_declare(
        topology.queue.as_str(),
        QueueDeclareOptions {
            durable: true,
            ..QueueDeclareOptions::default()
        },
    )?;

    let durable = || ExchangeDeclareOptions {
        durable: true,
        ..ExchangeDeclareOptions::default()
    };
    let income = channel.exchange_declare(
        ExchangeType::Direct,
        topology.income_exchange.as_str(),
        durable(),
    )?;
    channel.exchange_declare(
        ExchangeType::Direct,
        topology.outcome_exchange.as_str(),
        durable(),
    )?;

    for routing_key in &topology.routing_keys {
        queue.bind(&income, routing_key.as_str(), FieldTable::default())?;
    }

    tracing::debug!(
        queue = %topology.queue,
        routing_keys = ?topology.routing_keys,
        prefetch,
        "AMQP topology declared"
    );
    queue.consume(ConsumerOptions::default())
}
