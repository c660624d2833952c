//! The TCP module provides the Courier session server.
//!
//! This module implements a TCP listener for Courier that:
//! - Accepts connections from XNS clients (or gateways carrying SPP over TCP)
//! - Runs one Courier connection per client against a shared program registry
//! - Tracks active connections and shuts them down on request
//!
//! Each accepted socket is served by [`rpc::process_socket`]; connections are
//! independent of each other and only share the [`rpc::Registry`].

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use futures::future::join_all;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::protocol::rpc;
use crate::protocol::wire::MAX_SEGMENT_DATA_LEN;

/// Courier TCP server that listens for incoming client connections and
/// serves the programs of its registry on each of them.
pub struct CourierTcpListener {
    /// TCP Listener for accepting incoming connections
    listener: TcpListener,
    /// Port on which the server is listening
    port: u16,
    /// Address on which the server is listening
    ip: IpAddr,
    /// Programs served to every connection
    registry: Arc<rpc::Registry>,
    /// Parent of the cancellation tokens of all connections
    cancel: CancellationToken,
    /// Tasks of the active connections by connection number
    connections: Arc<Mutex<HashMap<u64, JoinHandle<()>>>>,
    next_connection: AtomicU64,
    /// Largest segment payload accepted and produced on a connection
    max_segment_len: usize,
}

/// Candidate loopback hosts tried by `auto:` binding.
const AUTO_BIND_HOSTS: u16 = 32;

/// Loopback address of test host `host` in 127.88.0.0/16.
pub fn loopback_address(host: u16) -> Ipv4Addr {
    let [high, low] = host.to_be_bytes();
    Ipv4Addr::new(127, 88, high, low)
}

/// Interface for Courier TCP servers.
///
/// This trait provides methods for:
/// - Getting information about the listening socket
/// - Serving client connections
/// - Terminating all connections
#[async_trait]
pub trait CourierTcp: Send + Sync {
    /// Returns the actual port number on which the server is listening
    ///
    /// This is especially useful when binding to port 0, which allows the OS
    /// to assign any available port.
    fn get_listen_port(&self) -> u16;

    /// Returns the IP address on which the server is listening
    fn get_listen_ip(&self) -> IpAddr;

    /// Number of connections currently being served
    fn active_connections(&self) -> usize;

    /// Accepts and serves connections
    ///
    /// Every accepted connection is served by its own task. This method
    /// returns once [`CourierTcp::shutdown`] was called, or with an error of
    /// the underlying TCP listener.
    async fn handle_forever(&self) -> io::Result<()>;

    /// Stops accepting connections, terminates the active ones and waits for
    /// their tasks to finish
    async fn shutdown(&self);
}

impl CourierTcpListener {
    /// Creates a new Courier TCP listener bound to the specified IP address and port
    ///
    /// # Arguments
    ///
    /// * `ipstr` - IP address and port in the format "IP:PORT" (e.g. "127.0.0.1:5000")
    ///   Special value "auto:PORT" binds the first free address in 127.88.0.0/16
    /// * `registry` - Programs to serve
    ///
    /// # Returns
    ///
    /// A Result containing either the new [`CourierTcpListener`] or an IO error
    pub async fn bind(ipstr: &str, registry: Arc<rpc::Registry>) -> io::Result<CourierTcpListener> {
        let (ip, port) = ipstr.split_once(':').ok_or_else(|| {
            io::Error::new(io::ErrorKind::AddrNotAvailable, "expected an address of the form ip:port")
        })?;
        let port: u16 = port.parse().map_err(|_| {
            io::Error::new(io::ErrorKind::AddrNotAvailable, format!("invalid port {port:?}"))
        })?;
        if ip != "auto" {
            return CourierTcpListener::bind_internal(&format!("{ip}:{port}"), registry).await;
        }

        let mut last_error = None;
        for host in 1..=AUTO_BIND_HOSTS {
            let addr = SocketAddr::from((loopback_address(host), port)).to_string();
            match CourierTcpListener::bind_internal(&addr, registry.clone()).await {
                Ok(listener) => return Ok(listener),
                Err(e) => {
                    debug!("cannot bind {addr}: {e}");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| io::Error::other("no loopback address left to bind")))
    }

    async fn bind_internal(addr: &str, registry: Arc<rpc::Registry>) -> io::Result<CourierTcpListener> {
        let listener = TcpListener::bind(addr).await?;
        info!("Listening on {addr}");

        let local = listener.local_addr()?;
        Ok(CourierTcpListener {
            listener,
            port: local.port(),
            ip: local.ip(),
            registry,
            cancel: CancellationToken::new(),
            connections: Arc::new(Mutex::new(HashMap::new())),
            next_connection: AtomicU64::new(1),
            max_segment_len: MAX_SEGMENT_DATA_LEN,
        })
    }

    /// Sets the largest segment payload used on new connections.
    ///
    /// # Arguments
    ///
    /// * `max_segment_len`: payload limit in bytes; at least 2.
    pub fn with_max_segment_len(&mut self, max_segment_len: usize) {
        self.max_segment_len = max_segment_len.max(2);
    }

    pub fn registry(&self) -> &Arc<rpc::Registry> {
        &self.registry
    }
}

#[async_trait]
impl CourierTcp for CourierTcpListener {
    fn get_listen_port(&self) -> u16 {
        self.port
    }

    fn get_listen_ip(&self) -> IpAddr {
        self.ip
    }

    fn active_connections(&self) -> usize {
        self.connections.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    async fn handle_forever(&self) -> io::Result<()> {
        loop {
            let (socket, peer) = tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Listener on port {} stopped", self.port);
                    return Ok(());
                }
                accepted = self.listener.accept() => accepted?,
            };
            let number = self.next_connection.fetch_add(1, Ordering::Relaxed);
            let connection_id = format!("{peer}#{number}");
            info!("Accepting connection from {}", connection_id);
            debug!("Accepting socket {:?}", socket);

            let registry = self.registry.clone();
            let cancel = self.cancel.child_token();
            let connections = self.connections.clone();
            let max_segment_len = self.max_segment_len;

            {
                // the task removes itself; holding the lock keeps it from doing so
                // before it has been inserted
                let mut active = self.connections.lock().unwrap_or_else(PoisonError::into_inner);
                let handle = tokio::spawn(async move {
                    let id = connection_id.clone();
                    let served = rpc::process_socket(
                        socket,
                        registry,
                        connection_id,
                        cancel,
                        max_segment_len,
                    )
                    .await;
                    if let Err(e) = served {
                        debug!("Connection {} ended with {:?}", id, e);
                    }
                    info!("Connection {} closed", id);
                    connections.lock().unwrap_or_else(PoisonError::into_inner).remove(&number);
                });
                active.insert(number, handle);
            }
        }
    }

    async fn shutdown(&self) {
        info!("Shutting down listener on port {}", self.port);
        self.cancel.cancel();
        let handles: Vec<_> = self
            .connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, handle)| handle)
            .collect();
        join_all(handles).await;
    }
}
