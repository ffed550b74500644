use std::collections::{HashMap, VecDeque};
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use eau2_protocol::{read_message, write_message, Message, MessageBody};
use eau2_types::{NodeId, REGISTRAR_ID};
use tokio::io::AsyncRead;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Runtime;
use tokio::select;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::NetConfig;
use crate::directory::Directory;
use crate::error::{NetError, NetResult};
use crate::transport::KvNet;

/// TCP transport. Owns a tokio runtime that runs the accept loop, one reader
/// task per connection, and a single sender task; the [`KvNet`] methods are a
/// synchronous facade over them.
pub struct TcpNet {
    config: NetConfig,
    runtime: Option<Runtime>,
    shared: Arc<Shared>,
    outgoing: OnceLock<mpsc::UnboundedSender<Message>>,
    registering: Mutex<()>,
    shutdown_tx: watch::Sender<bool>,
}

/// State visible to both the facade and the background tasks.
struct Shared {
    id: OnceLock<NodeId>,
    directory: OnceLock<Directory>,
    inbound: Mutex<VecDeque<Message>>,
    ready: AtomicBool,
}

impl Shared {
    fn deliver(&self, msg: Message) {
        let me = self.id.get().copied();
        if Some(msg.target) != me {
            debug!(
                kind = msg.kind().name(),
                target = msg.target,
                "dropping message addressed to another node"
            );
            return;
        }
        self.inbound.lock().expect("lock poisoned").push_back(msg);
    }
}

impl TcpNet {
    pub fn new(config: NetConfig) -> NetResult<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.worker_threads.max(1))
            .thread_name("eau2-net")
            .enable_all()
            .build()?;
        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            config,
            runtime: Some(runtime),
            shared: Arc::new(Shared {
                id: OnceLock::new(),
                directory: OnceLock::new(),
                inbound: Mutex::new(VecDeque::new()),
                ready: AtomicBool::new(false),
            }),
            outgoing: OnceLock::new(),
            registering: Mutex::new(()),
            shutdown_tx,
        })
    }

    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    pub fn directory(&self) -> Option<&Directory> {
        self.shared.directory.get()
    }

    /// Block until the directory has been applied or `timeout` elapses.
    pub fn wait_ready(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.ready() {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(self.config.ready_poll_interval());
        }
        true
    }

    fn runtime(&self) -> NetResult<&Runtime> {
        self.runtime.as_ref().ok_or(NetError::ShutDown)
    }
}

impl KvNet for TcpNet {
    /// Bind `listen`, register it with the registrar and wait for the
    /// directory. Port 0 binds an ephemeral port, and the bound port is what
    /// gets registered. Must not be called from inside a tokio runtime.
    fn register_node(&self, listen: SocketAddrV4) -> NetResult<NodeId> {
        let _guard = self.registering.lock().expect("lock poisoned");
        if let Some(id) = self.shared.id.get() {
            return Err(NetError::AlreadyRegistered(*id));
        }
        if *self.shutdown_tx.borrow() {
            return Err(NetError::ShutDown);
        }
        let runtime = self.runtime()?;

        let (listener, registrar, id, directory) =
            runtime.block_on(join_cluster(&self.config, listen))?;

        let _ = self.shared.id.set(id);
        let _ = self.shared.directory.set(directory.clone());

        let (registrar_rx, registrar_tx) = registrar.into_split();
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = self.outgoing.set(tx);

        runtime.spawn(run_reader(
            registrar_rx,
            directory.registrar(),
            Arc::clone(&self.shared),
            self.shutdown_tx.subscribe(),
        ));
        runtime.spawn(run_acceptor(
            listener,
            Arc::clone(&self.shared),
            self.shutdown_tx.subscribe(),
        ));
        runtime.spawn(run_sender(
            rx,
            registrar_tx,
            directory.clone(),
            self.config.connect_timeout(),
            self.shutdown_tx.subscribe(),
        ));

        self.shared.ready.store(true, Ordering::SeqCst);
        info!(node = id, nodes = directory.node_count(), "directory received");
        Ok(id)
    }

    fn node_id(&self) -> Option<NodeId> {
        self.shared.id.get().copied()
    }

    fn send(&self, msg: Message) -> NetResult<()> {
        let me = self.node_id().ok_or(NetError::NotRegistered)?;
        if msg.target == me {
            self.shared.deliver(msg);
            return Ok(());
        }
        let directory = self.shared.directory.get().ok_or(NetError::NotRegistered)?;
        if directory.get(msg.target).is_none() {
            return Err(NetError::UnknownNode(msg.target));
        }
        let outgoing = self.outgoing.get().ok_or(NetError::NotRegistered)?;
        outgoing.send(msg).map_err(|_| NetError::ShutDown)
    }

    fn receive(&self) -> Option<Message> {
        self.shared.inbound.lock().expect("lock poisoned").pop_front()
    }

    fn ready(&self) -> bool {
        self.shared.ready.load(Ordering::SeqCst)
    }

    fn shutdown(&self) {
        self.shared.ready.store(false, Ordering::SeqCst);
        if !self.shutdown_tx.send_replace(true) {
            info!(node = ?self.node_id(), "transport shutting down");
        }
    }
}

impl Drop for TcpNet {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// Bind the listen socket, send Register and wait for the directory.
async fn join_cluster(
    config: &NetConfig,
    listen: SocketAddrV4,
) -> NetResult<(TcpListener, TcpStream, NodeId, Directory)> {
    let listener = TcpListener::bind(listen).await?;
    let bound = match listener.local_addr()? {
        SocketAddr::V4(addr) => addr,
        SocketAddr::V6(_) => listen,
    };

    let mut registrar = connect(config.registrar_addr, config.connect_timeout()).await?;
    write_message(&mut registrar, &Message::register(bound)).await?;
    info!(listen = %bound, registrar = %config.registrar_addr, "registering");

    let reply = timeout(config.register_timeout(), read_message(&mut registrar))
        .await
        .map_err(|_| NetError::Timeout(config.register_timeout_ms))??;
    match reply {
        Some(Message {
            body: MessageBody::Directory { idx, nodes },
            ..
        }) => {
            let directory = Directory::for_node(idx, nodes)?;
            Ok((listener, registrar, idx, directory))
        }
        Some(other) => Err(NetError::UnexpectedMessage(other.kind())),
        None => Err(NetError::ConnectionClosed),
    }
}

async fn connect(addr: SocketAddrV4, limit: Duration) -> NetResult<TcpStream> {
    match timeout(limit, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => {
            stream.set_nodelay(true)?;
            Ok(stream)
        }
        Ok(Err(source)) => Err(NetError::Connect { addr, source }),
        Err(_) => Err(NetError::Connect {
            addr,
            source: std::io::ErrorKind::TimedOut.into(),
        }),
    }
}

async fn run_acceptor(
    listener: TcpListener,
    shared: Arc<Shared>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => accept_peer(stream, peer, &shared, &shutdown),
                Err(err) => warn!(error = ?err, "failed to accept connection"),
            },
        }
    }
    debug!("acceptor stopped");
}

fn accept_peer(
    stream: TcpStream,
    peer: SocketAddr,
    shared: &Arc<Shared>,
    shutdown: &watch::Receiver<bool>,
) {
    let SocketAddr::V4(peer) = peer else {
        warn!(%peer, "rejecting non-IPv4 peer");
        return;
    };
    let known = shared
        .directory
        .get()
        .is_some_and(|directory| directory.admits(*peer.ip()));
    if !known {
        warn!(%peer, "rejecting connection from unknown peer");
        return;
    }
    debug!(%peer, "peer connected");
    tokio::spawn(run_reader(
        stream,
        peer,
        Arc::clone(shared),
        shutdown.clone(),
    ));
}

async fn run_reader<R>(
    mut reader: R,
    peer: SocketAddrV4,
    shared: Arc<Shared>,
    mut shutdown: watch::Receiver<bool>,
) where
    R: AsyncRead + Unpin,
{
    loop {
        let result = select! {
            _ = shutdown.changed() => break,
            result = read_message(&mut reader) => result,
        };
        match result {
            Ok(Some(msg)) => {
                debug!(
                    %peer,
                    kind = msg.kind().name(),
                    sender = msg.sender,
                    msg_id = msg.id,
                    "message received"
                );
                shared.deliver(msg);
            }
            Ok(None) => {
                debug!(%peer, "connection closed");
                break;
            }
            Err(err) if !err.is_fatal() => {
                warn!(%peer, error = %err, "dropping message");
            }
            Err(err) => {
                warn!(%peer, error = %err, "closing connection");
                break;
            }
        }
    }
}

async fn run_sender(
    mut rx: mpsc::UnboundedReceiver<Message>,
    registrar: OwnedWriteHalf,
    directory: Directory,
    connect_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut connections: HashMap<NodeId, OwnedWriteHalf> = HashMap::new();
    connections.insert(REGISTRAR_ID, registrar);

    loop {
        let msg = select! {
            _ = shutdown.changed() => break,
            msg = rx.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };
        deliver(msg, &mut connections, &directory, connect_timeout).await;
    }
    debug!("sender stopped");
}

/// Write one message, opening the connection to its target on first use.
/// Failures drop both the message and the cached connection.
async fn deliver(
    msg: Message,
    connections: &mut HashMap<NodeId, OwnedWriteHalf>,
    directory: &Directory,
    connect_timeout: Duration,
) {
    let target = msg.target;
    if !connections.contains_key(&target) {
        let Some(addr) = directory.get(target) else {
            error!(target, "no directory entry for target");
            return;
        };
        match connect(addr, connect_timeout).await {
            Ok(stream) => {
                debug!(target, %addr, "connected to peer");
                let (_, writer) = stream.into_split();
                connections.insert(target, writer);
            }
            Err(err) => {
                error!(target, error = %err, kind = msg.kind().name(), "dropping message");
                return;
            }
        }
    }

    let Some(conn) = connections.get_mut(&target) else {
        return;
    };
    if let Err(err) = write_message(conn, &msg).await {
        error!(target, error = %err, kind = msg.kind().name(), "write failed, dropping connection");
        connections.remove(&target);
    } else {
        debug!(target, kind = msg.kind().name(), msg_id = msg.id, "message sent");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegistrarConfig;
    use crate::registrar::Registrar;
    use eau2_protocol::MessageKind;
    use eau2_types::{Key, Table};
    use std::net::Ipv4Addr;
    use std::thread;
    use tokio::io::AsyncReadExt;

    fn local(port: u16) -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)
    }

    /// Registrar on its own runtime, plus `n` registered transports.
    struct Cluster {
        registrar: Option<Registrar>,
        nets: Vec<TcpNet>,
        runtime: Runtime,
    }

    impl Cluster {
        fn start(n: usize) -> Self {
            let runtime = Runtime::new().unwrap();
            let mut registrar = runtime
                .block_on(Registrar::bind(RegistrarConfig {
                    bind_addr: local(0),
                    expected_nodes: n,
                }))
                .unwrap();
            let config = NetConfig {
                registrar_addr: registrar.local_addr(),
                ..NetConfig::default()
            };

            let handles: Vec<_> = (0..n)
                .map(|_| {
                    let config = config.clone();
                    thread::spawn(move || {
                        let net = TcpNet::new(config).unwrap();
                        net.register_node(local(0)).unwrap();
                        net
                    })
                })
                .collect();
            runtime.block_on(registrar.start()).unwrap();

            let mut nets: Vec<TcpNet> = handles.into_iter().map(|h| h.join().unwrap()).collect();
            nets.sort_by_key(|net| net.node_id());
            Self {
                registrar: Some(registrar),
                nets,
                runtime,
            }
        }

        fn net(&self, id: NodeId) -> &TcpNet {
            &self.nets[id as usize - 1]
        }
    }

    fn receive_within(net: &TcpNet, limit: Duration) -> Option<Message> {
        let deadline = Instant::now() + limit;
        loop {
            if let Some(msg) = net.receive() {
                return Some(msg);
            }
            if Instant::now() >= deadline {
                return None;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn registration_assigns_distinct_ids_and_shared_directory() {
        let cluster = Cluster::start(3);
        let ids: Vec<_> = cluster.nets.iter().map(|n| n.node_id()).collect();
        assert_eq!(ids, vec![Some(1), Some(2), Some(3)]);

        let expected = cluster.registrar.as_ref().unwrap().directory().unwrap().clone();
        assert_eq!(expected.len(), 4);
        for net in &cluster.nets {
            assert!(net.ready());
            assert!(net.wait_ready(Duration::from_millis(1)));
            assert_eq!(net.directory(), Some(&expected));
        }
    }

    #[test]
    fn registering_twice_fails() {
        let cluster = Cluster::start(1);
        let err = cluster.net(1).register_node(local(0)).unwrap_err();
        assert!(matches!(err, NetError::AlreadyRegistered(1)));
    }

    #[test]
    fn unregistered_transport_refuses_to_send() {
        let net = TcpNet::new(NetConfig::default()).unwrap();
        assert!(!net.ready());
        assert!(!net.wait_ready(Duration::from_millis(20)));
        let err = net.send(Message::status(1, 2)).unwrap_err();
        assert!(matches!(err, NetError::NotRegistered));
        assert!(net.receive().is_none());
    }

    #[test]
    fn messages_travel_between_nodes() {
        let cluster = Cluster::start(2);
        let a = cluster.net(1);
        let b = cluster.net(2);

        let table = Arc::new(Table::from_column(vec![1i64, 2, 3]));
        let put = Message::put(1, Key::new("x", 2), Arc::clone(&table));
        a.send(put.clone()).unwrap();

        let got = receive_within(b, Duration::from_secs(5)).expect("put should arrive");
        assert_eq!(got, put);

        b.send(Message::ack(&got)).unwrap();
        let ack = receive_within(a, Duration::from_secs(5)).expect("ack should arrive");
        assert_eq!(ack.kind(), MessageKind::Ack);
        assert_eq!(ack.id, put.id);
    }

    #[test]
    fn loopback_skips_the_network() {
        let cluster = Cluster::start(1);
        let net = cluster.net(1);
        net.send(Message::status(1, 1)).unwrap();
        assert_eq!(net.receive().map(|m| m.kind()), Some(MessageKind::Status));
    }

    #[test]
    fn unknown_target_is_rejected() {
        let cluster = Cluster::start(1);
        let err = cluster.net(1).send(Message::status(1, 9)).unwrap_err();
        assert!(matches!(err, NetError::UnknownNode(9)));
    }

    #[test]
    fn registrar_kill_reaches_nodes() {
        let mut cluster = Cluster::start(2);
        let registrar = cluster.registrar.take().unwrap();
        cluster.runtime.block_on(registrar.stop()).unwrap();

        for id in [1, 2] {
            let kill = receive_within(cluster.net(id), Duration::from_secs(5)).expect("kill");
            assert_eq!(kill.kind(), MessageKind::Kill);
            assert_eq!(kill.sender, REGISTRAR_ID);
        }
    }

    #[test]
    fn shutdown_stops_sending() {
        let cluster = Cluster::start(2);
        let net = cluster.net(1);
        net.shutdown();
        assert!(!net.ready());
        // The sender task exits on the shutdown signal; once it has, the
        // queue is closed.
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            match net.send(Message::status(1, 2)) {
                Err(NetError::ShutDown) => break,
                Ok(()) if Instant::now() < deadline => thread::sleep(Duration::from_millis(5)),
                other => panic!("expected ShutDown, got {other:?}"),
            }
        }
    }

    fn shared_with(id: NodeId, directory: Directory) -> Arc<Shared> {
        let shared = Arc::new(Shared {
            id: OnceLock::new(),
            directory: OnceLock::new(),
            inbound: Mutex::new(VecDeque::new()),
            ready: AtomicBool::new(true),
        });
        let _ = shared.id.set(id);
        let _ = shared.directory.set(directory);
        shared
    }

    #[tokio::test]
    async fn acceptor_closes_connections_from_unknown_peers() {
        let listener = TcpListener::bind(local(0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let outsider = SocketAddrV4::new(Ipv4Addr::new(10, 9, 8, 7), 4500);
        let shared = shared_with(1, Directory::new(vec![outsider, outsider]).unwrap());
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(run_acceptor(listener, Arc::clone(&shared), shutdown_rx));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let _ = write_message(&mut stream, &Message::status(2, 1)).await;
        let mut buf = [0u8; 1];
        let read = timeout(Duration::from_secs(5), stream.read(&mut buf))
            .await
            .expect("connection should be closed");
        assert!(matches!(read, Ok(0) | Err(_)));
        assert!(shared.inbound.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn acceptor_reads_from_directory_members() {
        let listener = TcpListener::bind(local(0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shared = shared_with(1, Directory::new(vec![local(4500), local(9000)]).unwrap());
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(run_acceptor(listener, Arc::clone(&shared), shutdown_rx));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        write_message(&mut stream, &Message::status(2, 1)).await.unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while shared.inbound.lock().unwrap().is_empty() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let received = shared.inbound.lock().unwrap().pop_front();
        assert_eq!(received.map(|m| m.kind()), Some(MessageKind::Status));
    }

    #[test]
    fn registration_fails_without_registrar() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = match listener.local_addr().unwrap() {
            SocketAddr::V4(addr) => addr,
            SocketAddr::V6(_) => unreachable!(),
        };
        drop(listener);

        let net = TcpNet::new(NetConfig {
            registrar_addr: addr,
            connect_timeout_ms: 500,
            ..NetConfig::default()
        })
        .unwrap();
        let err = net.register_node(local(0)).unwrap_err();
        assert!(matches!(err, NetError::Connect { .. }));
        assert_eq!(net.node_id(), None);
    }
}
