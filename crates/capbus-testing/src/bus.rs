//! Process-local message bus implementing the capbus bus abstraction.
//!
//! One [`MemoryNetwork`] hosts a broker per URL, so multi-bus routing and
//! sandbox auth can be exercised without a server. Semantics mirror the
//! subset the SDK relies on: request-reply over generated inbox subjects,
//! plain fan-out subscriptions, queue groups with round-robin delivery, and
//! `*`/`>` wildcard matching.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use capbus_core::BusConnection;
use capbus_core::BusConnector;
use capbus_core::BusCredentials;
use capbus_core::BusError;
use capbus_core::BusMessage;
use capbus_core::BusSubscription;
use capbus_core::bus::Result;
use capbus_core::constants::SUBSCRIPTION_BUFFER;
use capbus_core::normalize_url;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::trace;
use uuid::Uuid;

/// True when `pattern` matches `subject` under NATS-style token rules:
/// `*` matches one token, `>` matches the remainder.
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');
    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (None, None) => return true,
            (Some(">"), _) => return true,
            (Some("*"), Some(_)) => {}
            (Some(p), Some(s)) if p == s => {}
            _ => return false,
        }
    }
}

struct SubscriberEntry {
    pattern: String,
    queue: Option<String>,
    sender: mpsc::Sender<BusMessage>,
}

#[derive(Default)]
struct BrokerState {
    subscribers: HashMap<u64, SubscriberEntry>,
    next_id: u64,
    round_robin: HashMap<(String, String), usize>,
}

/// A single virtual bus server.
#[derive(Default)]
pub struct MemoryBroker {
    state: Mutex<BrokerState>,
}

impl MemoryBroker {
    fn add_subscriber(&self, pattern: &str, queue: Option<&str>, sender: mpsc::Sender<BusMessage>) -> u64 {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = state.next_id;
        state.subscribers.insert(
            id,
            SubscriberEntry {
                pattern: pattern.to_string(),
                queue: queue.map(str::to_string),
                sender,
            },
        );
        id
    }

    fn remove_subscribers(&self, ids: &[u64]) {
        let mut state = self.state.lock();
        for id in ids {
            state.subscribers.remove(id);
        }
    }

    /// Deliver a message; returns true when at least one subscriber got it.
    fn deliver(&self, subject: &str, payload: Bytes, reply: Option<String>) -> bool {
        let targets = {
            let mut state = self.state.lock();
            state.subscribers.retain(|_, entry| !entry.sender.is_closed());

            let mut targets: Vec<mpsc::Sender<BusMessage>> = Vec::new();
            let mut groups: HashMap<(String, String), Vec<(u64, mpsc::Sender<BusMessage>)>> = HashMap::new();
            for (id, entry) in state.subscribers.iter() {
                if !subject_matches(&entry.pattern, subject) {
                    continue;
                }
                match &entry.queue {
                    None => targets.push(entry.sender.clone()),
                    Some(queue) => groups
                        .entry((entry.pattern.clone(), queue.clone()))
                        .or_default()
                        .push((*id, entry.sender.clone())),
                }
            }
            for (key, mut members) in groups {
                members.sort_by_key(|(id, _)| *id);
                let counter = state.round_robin.entry(key).or_insert(0);
                let chosen = members[*counter % members.len()].1.clone();
                *counter += 1;
                targets.push(chosen);
            }
            targets
        };

        let delivered = !targets.is_empty();
        for sender in targets {
            let message = BusMessage {
                subject: subject.to_string(),
                payload: payload.clone(),
                reply: reply.clone(),
            };
            // Best-effort delivery; a full buffer drops the message the way
            // a slow consumer would on a real bus.
            let _ = sender.try_send(message);
        }
        trace!(subject, delivered, "memory bus delivery");
        delivered
    }
}

/// A registry of brokers keyed by normalized URL.
#[derive(Default)]
pub struct MemoryNetwork {
    brokers: Mutex<HashMap<String, Arc<MemoryBroker>>>,
    connections: Mutex<Vec<Arc<MemoryConnection>>>,
    connect_log: Mutex<Vec<(String, Option<BusCredentials>)>>,
}

impl MemoryNetwork {
    /// Create an empty network.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Broker for a URL, created on first use.
    pub fn broker(&self, url: &str) -> Arc<MemoryBroker> {
        let url = normalize_url(url);
        self.brokers.lock().entry(url).or_default().clone()
    }

    /// Open a connection to a URL without going through a connector.
    pub fn connect(self: &Arc<Self>, url: &str) -> Arc<MemoryConnection> {
        let url = normalize_url(url);
        let connection = Arc::new(MemoryConnection {
            url: url.clone(),
            broker: self.broker(&url),
            closed: AtomicBool::new(false),
            registrations: Mutex::new(Vec::new()),
        });
        self.connections.lock().push(connection.clone());
        connection
    }

    /// A [`BusConnector`] over this network.
    pub fn connector(self: &Arc<Self>) -> Arc<MemoryConnector> {
        Arc::new(MemoryConnector {
            network: self.clone(),
        })
    }

    /// All connections opened to a URL, in order.
    pub fn connections_to(&self, url: &str) -> Vec<Arc<MemoryConnection>> {
        let url = normalize_url(url);
        self.connections.lock().iter().filter(|c| c.url == url).cloned().collect()
    }

    /// Every connector-level connect with the credentials it presented.
    pub fn connect_log(&self) -> Vec<(String, Option<BusCredentials>)> {
        self.connect_log.lock().clone()
    }
}

/// One live connection to a [`MemoryBroker`].
pub struct MemoryConnection {
    url: String,
    broker: Arc<MemoryBroker>,
    closed: AtomicBool,
    registrations: Mutex<Vec<u64>>,
}

impl MemoryConnection {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::ConnectionClosed { url: self.url.clone() });
        }
        Ok(())
    }

    fn shut_down(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let ids: Vec<u64> = self.registrations.lock().drain(..).collect();
        self.broker.remove_subscribers(&ids);
    }
}

#[async_trait]
impl BusConnection for MemoryConnection {
    fn url(&self) -> &str {
        &self.url
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn request(&self, subject: &str, payload: Bytes, timeout: Duration) -> Result<Bytes> {
        self.ensure_open()?;
        let inbox = format!("_INBOX.{}", Uuid::new_v4());
        let (tx, mut rx) = mpsc::channel(1);
        let registration = self.broker.add_subscriber(&inbox, None, tx);

        if !self.broker.deliver(subject, payload, Some(inbox)) {
            self.broker.remove_subscribers(&[registration]);
            return Err(BusError::NoResponders {
                subject: subject.to_string(),
            });
        }

        let outcome = tokio::time::timeout(timeout, rx.recv()).await;
        self.broker.remove_subscribers(&[registration]);
        match outcome {
            Ok(Some(message)) => Ok(message.payload),
            Ok(None) => Err(BusError::Transport {
                reason: "reply inbox closed".to_string(),
            }),
            Err(_) => Err(BusError::RequestTimeout {
                subject: subject.to_string(),
                timeout,
            }),
        }
    }

    async fn publish(&self, subject: &str, payload: Bytes) -> Result<()> {
        self.ensure_open()?;
        self.broker.deliver(subject, payload, None);
        Ok(())
    }

    async fn subscribe(&self, subject: &str, queue_group: Option<&str>) -> Result<BusSubscription> {
        self.ensure_open()?;
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let registration = self.broker.add_subscriber(subject, queue_group, tx);
        self.registrations.lock().push(registration);
        Ok(BusSubscription::new(subject, rx))
    }

    async fn drain(&self) -> Result<()> {
        self.shut_down();
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.shut_down();
        Ok(())
    }
}

/// Connector handing out [`MemoryConnection`]s, validating any credentials
/// presented.
pub struct MemoryConnector {
    network: Arc<MemoryNetwork>,
}

#[async_trait]
impl BusConnector for MemoryConnector {
    async fn connect(&self, url: &str, credentials: Option<BusCredentials>) -> Result<Arc<dyn BusConnection>> {
        if let Some(credentials) = &credentials {
            credentials.validate().map_err(|err| BusError::AuthRejected {
                url: url.to_string(),
                reason: err.to_string(),
            })?;
        }
        self.network.connect_log.lock().push((normalize_url(url), credentials));
        Ok(self.network.connect(url))
    }
}
