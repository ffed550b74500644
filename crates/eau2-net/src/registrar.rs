use std::net::{SocketAddr, SocketAddrV4};

use eau2_protocol::{read_message, write_message, Message, MessageBody};
use eau2_types::NodeId;
use tokio::net::{TcpListener, TcpStream};
use tokio::select;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::RegistrarConfig;
use crate::directory::Directory;
use crate::error::{NetError, NetResult};

/// Bootstrap service: collects node registrations and hands out the
/// directory. It is node 0 of every cluster it builds.
pub struct Registrar {
    listener: TcpListener,
    local_addr: SocketAddrV4,
    expected_nodes: usize,
    directory: Option<Directory>,
    links: Vec<(NodeId, TcpStream)>,
}

impl Registrar {
    pub async fn bind(config: RegistrarConfig) -> NetResult<Self> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        let local_addr = match listener.local_addr()? {
            SocketAddr::V4(addr) => addr,
            SocketAddr::V6(addr) => {
                return Err(NetError::InvalidDirectory(format!(
                    "registrar bound to non-IPv4 address {addr}"
                )))
            }
        };
        info!(addr = %local_addr, expected = config.expected_nodes, "registrar listening");
        Ok(Self {
            listener,
            local_addr,
            expected_nodes: config.expected_nodes,
            directory: None,
            links: Vec::new(),
        })
    }

    pub fn local_addr(&self) -> SocketAddrV4 {
        self.local_addr
    }

    /// The directory, once `start` has distributed it.
    pub fn directory(&self) -> Option<&Directory> {
        self.directory.as_ref()
    }

    /// Accept registrations until the expected number of nodes has checked
    /// in, then send every node the directory with its own index.
    ///
    /// A connection whose first message is not Register is closed and does
    /// not count. Ids follow the order in which registrations complete. Two
    /// registrations for the same address abort startup with
    /// [`NetError::DuplicateRegistration`].
    pub async fn start(&mut self) -> NetResult<Directory> {
        if let Some(directory) = &self.directory {
            return Ok(directory.clone());
        }

        let mut handshakes = JoinSet::new();
        let mut registered: Vec<(SocketAddrV4, TcpStream)> = Vec::new();

        while registered.len() < self.expected_nodes {
            select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "registration connection accepted");
                        handshakes.spawn(read_registration(stream, peer));
                    }
                    Err(err) => warn!(error = ?err, "failed to accept connection"),
                },
                Some(joined) = handshakes.join_next() => match joined {
                    Ok(Ok((addr, stream))) => {
                        if registered.iter().any(|(known, _)| *known == addr) {
                            handshakes.abort_all();
                            warn!(%addr, "duplicate registration, aborting startup");
                            return Err(NetError::DuplicateRegistration(addr));
                        }
                        registered.push((addr, stream));
                        info!(
                            node = registered.len(),
                            %addr,
                            remaining = self.expected_nodes - registered.len(),
                            "node registered"
                        );
                    }
                    Ok(Err(err)) => warn!(error = %err, "registration rejected"),
                    Err(err) => warn!(error = ?err, "registration task failed"),
                },
            }
        }
        handshakes.abort_all();

        let mut nodes = Vec::with_capacity(registered.len() + 1);
        nodes.push(self.local_addr);
        nodes.extend(registered.iter().map(|(addr, _)| *addr));
        let directory = Directory::new(nodes)?;
        // Recorded before sending: a second `start` returns it unchanged.
        self.directory = Some(directory.clone());

        for (i, (_, mut stream)) in registered.into_iter().enumerate() {
            let id = i as NodeId + 1;
            let msg = Message::directory(id, directory.nodes().to_vec());
            match write_message(&mut stream, &msg).await {
                Ok(()) => self.links.push((id, stream)),
                Err(err) => warn!(node = id, error = %err, "failed to send directory"),
            }
        }
        info!(
            nodes = directory.node_count(),
            reached = self.links.len(),
            "directory distributed"
        );
        Ok(directory)
    }

    /// Send Kill to every registered node and close all connections.
    pub async fn stop(mut self) -> NetResult<()> {
        for (id, stream) in &mut self.links {
            let kill = Message::kill(eau2_types::REGISTRAR_ID, *id);
            if let Err(err) = write_message(stream, &kill).await {
                warn!(node = *id, error = %err, "failed to deliver kill");
            }
        }
        info!(nodes = self.links.len(), "registrar stopped");
        Ok(())
    }
}

async fn read_registration(
    mut stream: TcpStream,
    peer: SocketAddr,
) -> NetResult<(SocketAddrV4, TcpStream)> {
    match read_message(&mut stream).await? {
        Some(Message {
            body: MessageBody::Register { addr },
            ..
        }) => {
            debug!(%peer, %addr, "register received");
            Ok((addr, stream))
        }
        Some(other) => Err(NetError::UnexpectedMessage(other.kind())),
        None => Err(NetError::ConnectionClosed),
    }
}
