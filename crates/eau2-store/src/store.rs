use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use eau2_net::KvNet;
use eau2_protocol::{Message, MessageBody, Payload, WHOLE_OBJECT};
use eau2_types::{Column, Key, NodeId, Table};
use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};

/// One node's slice of the distributed key-value store.
///
/// Values are immutable once stored: a key is inserted at most once, and the
/// first value wins. Remote keys are fetched from their home node and cached
/// here when the reply arrives.
pub struct Store {
    inner: Arc<Inner>,
    listener: Option<JoinHandle<()>>,
}

struct Inner {
    id: NodeId,
    net: Arc<dyn KvNet>,
    config: StoreConfig,
    entries: RwLock<HashMap<Key, Arc<Table>>>,
    /// Bumped after every change a waiter may care about. Waiters hold this
    /// lock while they look at `entries` and `pending`.
    generation: Mutex<u64>,
    changed: Condvar,
    /// Requests this node sent and has not had an answer for, by message id.
    pending: Mutex<HashMap<u64, Pending>>,
}

/// An outstanding Get or WaitAndGet.
struct Pending {
    request: Message,
    sent: Instant,
    /// Set when the owner answered with a Nack (or a non-table Reply); the
    /// waiter, if any, removes the entry.
    rejected: bool,
}

impl Pending {
    fn new(request: Message) -> Self {
        Self {
            request,
            sent: Instant::now(),
            rejected: false,
        }
    }
}

enum Flow {
    Continue,
    Stop,
}

impl Store {
    /// Start a store on an already registered transport.
    pub fn new(net: Arc<dyn KvNet>, config: StoreConfig) -> StoreResult<Self> {
        let id = net.node_id().ok_or(StoreError::NotRegistered)?;
        let inner = Arc::new(Inner {
            id,
            net,
            config,
            entries: RwLock::new(HashMap::new()),
            generation: Mutex::new(0),
            changed: Condvar::new(),
            pending: Mutex::new(HashMap::new()),
        });

        let listener_inner = Arc::clone(&inner);
        let listener = thread::Builder::new()
            .name(format!("eau2-store-{id}"))
            .spawn(move || listener_inner.run_listener())?;

        Ok(Self {
            inner,
            listener: Some(listener),
        })
    }

    pub fn node_id(&self) -> NodeId {
        self.inner.id
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    pub fn net(&self) -> &Arc<dyn KvNet> {
        &self.inner.net
    }

    /// Store `value` under `key` locally. A key already present keeps its
    /// first value and `false` is returned.
    pub fn insert(&self, key: Key, value: impl Into<Arc<Table>>) -> bool {
        self.inner.insert(key, value.into())
    }

    /// Local lookup only.
    pub fn get(&self, key: &Key) -> Option<Arc<Table>> {
        self.inner.get(key)
    }

    /// Return the value for `key`, fetching it from its home node if needed.
    ///
    /// Keys owned by this node are never fetched: if one is absent this fails
    /// at once with [`StoreError::MissingLocalKey`]. Remote keys are requested
    /// with WaitAndGet and waited on for up to the configured timeout.
    pub fn wait_and_get(&self, key: &Key) -> StoreResult<Arc<Table>> {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }
        if key.is_owned_by(self.inner.id) {
            return Err(StoreError::MissingLocalKey(key.clone()));
        }
        let msg_id = self.fetch(key, true)?;
        self.inner.wait_for_reply(key, msg_id)
    }

    /// Ask `key`'s home node for its value without waiting for the answer.
    /// Returns the id of the request; the value lands in the local map when
    /// the reply arrives.
    pub fn fetch(&self, key: &Key, wait: bool) -> StoreResult<u64> {
        if key.is_owned_by(self.inner.id) {
            return Err(StoreError::OwnKey(key.clone()));
        }
        let msg = if wait {
            Message::wait_and_get(self.inner.id, key.clone(), self.inner.config.max_delay_ms)
        } else {
            Message::get(self.inner.id, key.clone())
        };
        let msg_id = msg.id;

        self.inner.pending().insert(msg_id, Pending::new(msg.clone()));
        if let Err(err) = self.inner.net.send(msg) {
            self.inner.pending().remove(&msg_id);
            return Err(err.into());
        }
        debug!(node = self.inner.id, key = %key, msg_id, wait, "fetch sent");
        Ok(msg_id)
    }

    /// Store `value` under `key` on the key's home node.
    pub fn push(&self, key: Key, value: impl Into<Arc<Table>>) -> StoreResult<()> {
        let value = value.into();
        if key.is_owned_by(self.inner.id) {
            self.inner.insert(key, value);
            return Ok(());
        }
        debug!(node = self.inner.id, key = %key, "pushing to owner");
        self.inner
            .net
            .send(Message::put(self.inner.id, key, value))?;
        Ok(())
    }

    /// Wrap `value` in a one-cell table and push it under `key`.
    pub fn put_scalar<T>(&self, key: Key, value: T) -> StoreResult<Arc<Table>>
    where
        Vec<T>: Into<Column>,
    {
        let table = Arc::new(Table::from_scalar(value));
        self.push(key, Arc::clone(&table))?;
        Ok(table)
    }

    /// Wrap `column` in a one-column table and push it under `key`.
    pub fn put_column(&self, key: Key, column: impl Into<Column>) -> StoreResult<Arc<Table>> {
        let table = Arc::new(Table::from_column(column));
        self.push(key, Arc::clone(&table))?;
        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.inner.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries().is_empty()
    }

    /// Locally held keys, sorted.
    pub fn keys(&self) -> Vec<Key> {
        let mut keys: Vec<Key> = self.inner.entries().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Requests sent and not yet answered.
    pub fn pending_requests(&self) -> usize {
        self.inner.pending().len()
    }

    /// Block until the listener exits, which happens when a Kill arrives or
    /// the transport shuts down.
    pub fn serve_until_killed(mut self) {
        if let Some(listener) = self.listener.take() {
            if listener.join().is_err() {
                warn!(node = self.inner.id, "listener thread panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.listener
            .as_ref()
            .is_some_and(|listener| !listener.is_finished())
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        let Some(listener) = self.listener.take() else {
            return;
        };
        let _ = self.inner.net.send(Message::kill(self.inner.id, self.inner.id));
        if listener.join().is_err() {
            warn!(node = self.inner.id, "listener thread panicked");
        }
    }
}

impl Inner {
    fn entries(&self) -> std::sync::RwLockReadGuard<'_, HashMap<Key, Arc<Table>>> {
        self.entries.read().expect("lock poisoned")
    }

    fn pending(&self) -> std::sync::MutexGuard<'_, HashMap<u64, Pending>> {
        self.pending.lock().expect("lock poisoned")
    }

    fn get(&self, key: &Key) -> Option<Arc<Table>> {
        self.entries().get(key).cloned()
    }

    fn insert(&self, key: Key, value: Arc<Table>) -> bool {
        {
            let mut entries = self.entries.write().expect("lock poisoned");
            if entries.contains_key(&key) {
                warn!(node = self.id, key = %key, "duplicate insert ignored");
                return false;
            }
            debug!(node = self.id, key = %key, cols = value.ncols(), "inserted");
            entries.insert(key, value);
        }
        self.notify();
        true
    }

    fn notify(&self) {
        let mut generation = self.generation.lock().expect("lock poisoned");
        *generation = generation.wrapping_add(1);
        self.changed.notify_all();
    }

    /// Re-run `check` after every change until it yields a value or
    /// `timeout` passes.
    fn wait_until<T>(&self, timeout: Duration, mut check: impl FnMut() -> Option<T>) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut generation = self.generation.lock().expect("lock poisoned");
        loop {
            if let Some(found) = check() {
                return Some(found);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            generation = self
                .changed
                .wait_timeout(generation, deadline - now)
                .expect("lock poisoned")
                .0;
        }
    }

    fn wait_for_reply(&self, key: &Key, msg_id: u64) -> StoreResult<Arc<Table>> {
        let timeout = self.config.wait_timeout();
        let outcome = self.wait_until(timeout, || {
            if let Some(value) = self.get(key) {
                return Some(Ok(value));
            }
            // A missing entry was expired by the listener; keep waiting
            // until this call's own deadline.
            match self.pending().get(&msg_id) {
                Some(pending) if pending.rejected => Some(Err(StoreError::Rejected(key.clone()))),
                _ => None,
            }
        });
        self.pending().remove(&msg_id);
        outcome.unwrap_or_else(|| {
            warn!(node = self.id, key = %key, msg_id, "wait_and_get timed out");
            Err(StoreError::Timeout {
                key: key.clone(),
                waited_ms: self.config.wait_timeout_ms,
            })
        })
    }

    fn run_listener(self: Arc<Self>) {
        info!(node = self.id, "listener started");
        let sweep_interval = (self.config.wait_timeout() / 10).max(self.config.poll_interval());
        let mut next_sweep = Instant::now() + sweep_interval;
        loop {
            if Instant::now() >= next_sweep {
                self.expire_pending();
                next_sweep = Instant::now() + sweep_interval;
            }
            let Some(msg) = self.net.receive() else {
                if !self.net.ready() {
                    debug!(node = self.id, "transport no longer ready");
                    break;
                }
                thread::sleep(self.config.poll_interval());
                continue;
            };
            if let Flow::Stop = self.handle(msg) {
                break;
            }
        }
        self.net.shutdown();
        info!(node = self.id, "listener stopped");
    }

    fn handle(self: &Arc<Self>, msg: Message) -> Flow {
        debug!(
            node = self.id,
            kind = msg.kind().name(),
            sender = msg.sender,
            msg_id = msg.id,
            "handling message"
        );
        match &msg.body {
            MessageBody::Put { key, value, .. } => {
                self.insert(key.clone(), Arc::clone(value));
            }
            MessageBody::Get {
                col_idx,
                row_idx,
                key,
            } => {
                if !is_whole(*col_idx, *row_idx) {
                    self.send(Message::nack(&msg));
                } else if let Some(value) = self.get(key) {
                    self.send(Message::reply(&msg, Payload::Table(value)));
                } else {
                    debug!(node = self.id, key = %key, "get for absent key");
                }
            }
            MessageBody::WaitAndGet {
                col_idx,
                row_idx,
                max_delay_ms,
                key,
            } => {
                if !is_whole(*col_idx, *row_idx) {
                    self.send(Message::nack(&msg));
                } else if let Some(value) = self.get(key) {
                    self.send(Message::reply(&msg, Payload::Table(value)));
                } else {
                    let max_delay_ms = (*max_delay_ms).min(self.config.max_delay_ms);
                    self.reply_when_present(msg.clone(), key.clone(), max_delay_ms);
                }
            }
            MessageBody::Reply { payload } => self.apply_reply(&msg, payload),
            MessageBody::Nack => {
                if self.reject(&msg) {
                    debug!(node = self.id, msg_id = msg.id, "request rejected");
                    self.notify();
                } else {
                    warn!(node = self.id, msg_id = msg.id, "unsolicited nack");
                }
            }
            MessageBody::Ack => {}
            MessageBody::Status => self.send(Message::ack(&msg)),
            MessageBody::Kill => {
                info!(node = self.id, sender = msg.sender, "kill received");
                return Flow::Stop;
            }
            MessageBody::Register { .. } | MessageBody::Directory { .. } => {
                warn!(node = self.id, kind = msg.kind().name(), "unexpected message");
            }
        }
        Flow::Continue
    }

    /// Cache the table a Reply carries under the key its request asked for.
    /// Replies that match no request, or come from a node other than the
    /// one asked, are unsolicited.
    fn apply_reply(&self, msg: &Message, payload: &Payload) {
        let request_key = self
            .pending()
            .get(&msg.id)
            .filter(|entry| entry.request.target == msg.sender)
            .and_then(|entry| entry.request.key().cloned());
        let Some(key) = request_key else {
            warn!(node = self.id, msg_id = msg.id, sender = msg.sender, "unsolicited reply");
            return;
        };
        match payload {
            Payload::Table(value) => {
                self.insert(key, Arc::clone(value));
                self.pending().remove(&msg.id);
            }
            other => {
                warn!(
                    node = self.id,
                    key = %key,
                    payload = ?other.payload_type(),
                    "reply is not a table, discarding"
                );
                self.reject(msg);
            }
        }
        self.notify();
    }

    /// Mark the request `answer` responds to as rejected. Returns false when
    /// no request from this node to `answer.sender` has that id.
    fn reject(&self, answer: &Message) -> bool {
        let mut pending = self.pending();
        match pending.get_mut(&answer.id) {
            Some(entry) if entry.request.target == answer.sender => {
                entry.rejected = true;
                true
            }
            _ => false,
        }
    }

    /// Drop requests unanswered for longer than the wait timeout. Waiters
    /// remove their own entries; this catches fire-and-forget Gets and
    /// rejections nobody waited for.
    fn expire_pending(&self) {
        let limit = self.config.wait_timeout();
        let mut pending = self.pending();
        let before = pending.len();
        pending.retain(|_, entry| entry.sent.elapsed() < limit);
        let expired = before - pending.len();
        if expired > 0 {
            debug!(node = self.id, expired, "expired unanswered requests");
        }
    }

    /// Answer a WaitAndGet from a detached thread once `key` shows up, or
    /// drop it silently after `max_delay_ms`.
    fn reply_when_present(self: &Arc<Self>, request: Message, key: Key, max_delay_ms: u32) {
        let inner = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!("eau2-wait-{}", request.id))
            .spawn(move || {
                let delay = Duration::from_millis(u64::from(max_delay_ms));
                match inner.wait_until(delay, || inner.get(&key)) {
                    Some(value) => inner.send(Message::reply(&request, Payload::Table(value))),
                    None => debug!(
                        node = inner.id,
                        key = %key,
                        requester = request.sender,
                        "wait_and_get expired without a value"
                    ),
                }
            });
        if let Err(err) = spawned {
            warn!(node = self.id, error = %err, "failed to spawn wait_and_get responder");
        }
    }

    fn send(&self, msg: Message) {
        let kind = msg.kind().name();
        let target = msg.target;
        if let Err(err) = self.net.send(msg) {
            warn!(node = self.id, kind, target, error = %err, "send failed");
        }
    }
}

fn is_whole(col_idx: u64, row_idx: u64) -> bool {
    col_idx == WHOLE_OBJECT && row_idx == WHOLE_OBJECT
}
