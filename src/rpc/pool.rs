//! RPC Client Pool
//!
//! Deduplicated, lazily-established pool of outbound RPC connections keyed
//! by peer raft address. A peer's RPC endpoint is derived from its raft
//! address by a fixed port offset computed once from the two configured
//! listen addresses. Each established connection is watched by a health
//! check task that evicts the pool entry when the peer goes unhealthy.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::connection::RpcConnection;
use super::health::HealthClient;
use crate::addr;
use crate::error::{Error, Result};
use crate::transport::dial_stream;

/// One entry per peer address.
#[derive(Debug)]
enum PoolSlot {
    /// A dial is in flight. Waiters share this signal; its value carries
    /// the dial failure message so every waiter observes the same outcome.
    Connecting(watch::Receiver<Option<String>>),
    Established(Arc<RpcConnection>),
}

#[derive(Debug)]
struct PoolShared {
    clients: Mutex<HashMap<String, PoolSlot>>,
    tls: Option<Arc<rustls::ClientConfig>>,
    port_offset: i32,
    dial_timeout: Duration,
    health_service: Option<String>,
    closed: AtomicBool,
}

/// Pool of outbound RPC connections to peer nodes.
#[derive(Clone)]
#[derive(Debug)]
pub struct ClientPool {
    shared: Arc<PoolShared>,
}

impl ClientPool {
    /// Create a pool.
    ///
    /// The port offset is `rpc_listen_address` port minus
    /// `raft_listen_address` port; both must carry valid ports. Health
    /// checking is skipped entirely when `health_service` is unset.
    pub fn new(
        raft_listen_address: &str,
        rpc_listen_address: &str,
        tls: Option<Arc<rustls::ClientConfig>>,
        dial_timeout: Duration,
        health_service: Option<String>,
    ) -> Result<Self> {
        let raft_port = addr::port_number(raft_listen_address)
            .map_err(|e| Error::Config(format!("raft listen address: {}", e)))?;
        let rpc_port = addr::port_number(rpc_listen_address)
            .map_err(|e| Error::Config(format!("rpc listen address: {}", e)))?;

        if health_service.is_none() {
            warn!("No health service configured, pooled connections will not be health checked");
        }

        Ok(Self {
            shared: Arc::new(PoolShared {
                clients: Mutex::new(HashMap::new()),
                tls,
                port_offset: rpc_port as i32 - raft_port as i32,
                dial_timeout,
                health_service,
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Derive a peer's RPC endpoint from its raft transport address.
    pub fn rpc_endpoint(&self, raft_address: &str) -> Result<String> {
        self.shared.rpc_endpoint(raft_address)
    }

    /// Get the shared connection to a peer, dialing if necessary.
    ///
    /// At most one dial per peer address is in flight at any time: callers
    /// arriving during a dial wait for its outcome and either share the
    /// established connection or receive the same dial error.
    pub async fn get_connection(&self, raft_address: &str) -> Result<Arc<RpcConnection>> {
        loop {
            if self.shared.closed.load(Ordering::SeqCst) {
                return Err(Error::ShuttingDown);
            }

            let mut wait_rx = {
                let mut clients = self.shared.clients.lock().unwrap();
                match clients.get(raft_address) {
                    Some(PoolSlot::Established(conn)) => return Ok(Arc::clone(conn)),
                    Some(PoolSlot::Connecting(rx)) => rx.clone(),
                    None => {
                        let (tx, rx) = watch::channel::<Option<String>>(None);
                        clients.insert(raft_address.to_string(), PoolSlot::Connecting(rx.clone()));
                        // The dial runs detached so a cancelled caller can
                        // never strand the connecting slot.
                        tokio::spawn(PoolShared::connect(
                            Arc::clone(&self.shared),
                            raft_address.to_string(),
                            tx,
                        ));
                        rx
                    }
                }
            };

            let _ = wait_rx.changed().await;
            let failure = wait_rx.borrow().clone();
            if let Some(reason) = failure {
                return Err(Error::ConnectionFailed {
                    address: raft_address.to_string(),
                    reason,
                });
            }
            // Dial settled without an error: retry from the top.
        }
    }

    /// Number of established connections currently pooled.
    pub fn connection_count(&self) -> usize {
        self.shared
            .clients
            .lock()
            .unwrap()
            .values()
            .filter(|slot| matches!(slot, PoolSlot::Established(_)))
            .count()
    }

    /// Close the pool and drop every pooled connection. Idempotent.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let drained: Vec<PoolSlot> = {
            let mut clients = self.shared.clients.lock().unwrap();
            clients.drain().map(|(_, slot)| slot).collect()
        };
        let count = drained
            .iter()
            .filter(|slot| matches!(slot, PoolSlot::Established(_)))
            .count();
        info!("Client pool closed, dropped {} connections", count);
    }
}

impl PoolShared {
    fn rpc_endpoint(&self, raft_address: &str) -> Result<String> {
        let (host, port) = addr::split_host_port(raft_address)?;
        let rpc_port = port as i32 + self.port_offset;
        if !(1..=u16::MAX as i32).contains(&rpc_port) {
            return Err(Error::InvalidAddress {
                address: raft_address.to_string(),
                reason: format!("derived rpc port {} out of range", rpc_port),
            });
        }
        Ok(addr::join_host_port(&host, rpc_port as u16))
    }

    async fn dial(&self, raft_address: &str) -> Result<Arc<RpcConnection>> {
        let endpoint = self.rpc_endpoint(raft_address)?;
        let stream = dial_stream(&endpoint, self.dial_timeout, self.tls.clone()).await?;
        Ok(Arc::new(RpcConnection::new(endpoint, raft_address, stream)))
    }

    /// Detached dial for one peer; settles the shared wait signal.
    async fn connect(
        shared: Arc<Self>,
        raft_address: String,
        outcome: watch::Sender<Option<String>>,
    ) {
        match shared.dial(&raft_address).await {
            Ok(conn) => {
                // Check the closed flag under the map lock: `close` flips
                // the flag before draining, so either we see it and back
                // off, or our entry is inserted before the drain and gets
                // dropped with the rest.
                let closed = {
                    let mut clients = shared.clients.lock().unwrap();
                    let closed = shared.closed.load(Ordering::SeqCst);
                    if closed {
                        clients.remove(&raft_address);
                    } else {
                        clients.insert(
                            raft_address.clone(),
                            PoolSlot::Established(Arc::clone(&conn)),
                        );
                    }
                    closed
                };
                if !closed {
                    info!(
                        "Connected to {} for raft peer {}",
                        conn.endpoint(),
                        raft_address
                    );
                    if let Some(service) = &shared.health_service {
                        tokio::spawn(Self::health_watch(
                            Arc::clone(&shared),
                            Arc::clone(&conn),
                            service.clone(),
                        ));
                    }
                }
                // Dropping the sender wakes every waiter; they observe the
                // established slot (or the closed pool) on retry.
            }
            Err(e) => {
                warn!("Dial failed for raft peer {}: {}", raft_address, e);
                shared.clients.lock().unwrap().remove(&raft_address);
                let _ = outcome.send(Some(e.to_string()));
            }
        }
    }

    /// Watch one connection's health until its stream ends, then evict it.
    async fn health_watch(shared: Arc<Self>, conn: Arc<RpcConnection>, service: String) {
        let client = HealthClient::new(
            conn.endpoint(),
            service,
            shared.tls.clone(),
            shared.dial_timeout,
        );

        let mut current = match client.check().await {
            Ok(status) => {
                info!("Health status {} for {}", status, conn.endpoint());
                status
            }
            Err(Error::HealthUnimplemented) => {
                info!(
                    "Health checking not implemented by {}, connection stays pooled unwatched",
                    conn.endpoint()
                );
                return;
            }
            Err(e) => {
                info!("Health check failed for {}: {}", conn.endpoint(), e);
                return;
            }
        };

        let mut updates = match client.watch().await {
            Ok(watch) => watch,
            Err(e) => {
                warn!("Health watch open failed for {}: {}", conn.endpoint(), e);
                return;
            }
        };

        loop {
            match updates.next().await {
                Ok(Some(status)) => {
                    if status != current {
                        info!("Health status {} for {}", status, conn.endpoint());
                        current = status;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Health watch error for {}: {}", conn.endpoint(), e);
                    break;
                }
            }
        }

        shared.remove_connection(conn.raft_address(), &conn);
    }

    /// Evict by connection identity so a concurrently-replaced connection
    /// is never removed by a stale watcher.
    fn remove_connection(&self, raft_address: &str, conn: &Arc<RpcConnection>) {
        let mut clients = self.clients.lock().unwrap();
        if let Some(PoolSlot::Established(current)) = clients.get(raft_address) {
            if Arc::ptr_eq(current, conn) {
                clients.remove(raft_address);
                debug!("Evicted pooled connection to {}", raft_address);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::health::{HealthRequest, HealthResponse, ServingStatus};
    use crate::rpc::{read_message, write_message};
    use std::sync::atomic::AtomicUsize;
    use tokio::net::{TcpListener, TcpStream};

    fn pool_with_offset_zero(health_service: Option<String>) -> ClientPool {
        ClientPool::new(
            "127.0.0.1:7000",
            "127.0.0.1:7000",
            None,
            Duration::from_secs(2),
            health_service,
        )
        .unwrap()
    }

    async fn wait_until<F: Fn() -> bool>(cond: F, what: &str) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {}", what);
    }

    #[test]
    fn test_rpc_endpoint_offset() {
        let pool = ClientPool::new(
            "10.0.0.5:8000",
            "10.0.0.5:9000",
            None,
            Duration::from_secs(2),
            None,
        )
        .unwrap();

        assert_eq!(
            pool.rpc_endpoint("10.1.2.3:8000").unwrap(),
            "10.1.2.3:9000"
        );
        assert_eq!(pool.rpc_endpoint("db-3:8100").unwrap(), "db-3:9100");
    }

    #[test]
    fn test_negative_offset_and_range_errors() {
        let pool = ClientPool::new(
            "10.0.0.5:9000",
            "10.0.0.5:8500",
            None,
            Duration::from_secs(2),
            None,
        )
        .unwrap();

        assert_eq!(pool.rpc_endpoint("peer:9000").unwrap(), "peer:8500");
        // 200 - 500 underflows the port range.
        assert!(pool.rpc_endpoint("peer:200").is_err());
    }

    #[test]
    fn test_invalid_listen_addresses_are_config_errors() {
        let err = ClientPool::new(
            "no-port-here",
            "127.0.0.1:9000",
            None,
            Duration::from_secs(2),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    /// A server that accepts and parks connections, counting accepts.
    async fn parking_server() -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let accepts = Arc::new(AtomicUsize::new(0));

        let count = Arc::clone(&accepts);
        tokio::spawn(async move {
            let mut parked: Vec<TcpStream> = Vec::new();
            loop {
                let (socket, _) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(_) => break,
                };
                count.fetch_add(1, Ordering::SeqCst);
                parked.push(socket);
            }
        });

        (address, accepts)
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_dial() {
        let (address, accepts) = parking_server().await;
        let pool = pool_with_offset_zero(None);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let pool = pool.clone();
            let address = address.clone();
            handles.push(tokio::spawn(
                async move { pool.get_connection(&address).await },
            ));
        }

        let mut connections = Vec::new();
        for handle in handles {
            connections.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(accepts.load(Ordering::SeqCst), 1, "exactly one dial");
        for conn in &connections[1..] {
            assert!(Arc::ptr_eq(&connections[0], conn));
        }
        assert_eq!(pool.connection_count(), 1);
    }

    #[tokio::test]
    async fn test_dial_failure_not_cached() {
        // A port nothing listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let pool = pool_with_offset_zero(None);

        let err = pool.get_connection(&address).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionFailed { .. }));
        assert_eq!(pool.connection_count(), 0);

        // The failed entry is gone, so a later caller re-dials.
        let err = pool.get_connection(&address).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionFailed { .. }));
    }

    /// Health-serving server: application connections are parked; health
    /// `Check` gets one status reply; `Watch` gets `updates` status frames
    /// and then the stream is closed.
    async fn health_server(updates: Vec<ServingStatus>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let updates = Arc::new(updates);
            let mut parked: Vec<tokio::task::JoinHandle<()>> = Vec::new();
            loop {
                let (mut socket, _) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(_) => break,
                };
                let updates = Arc::clone(&updates);
                parked.push(tokio::spawn(async move {
                    // Application connections never send a frame; this read
                    // parks them until the pool drops the socket.
                    let request: HealthRequest = match read_message(&mut socket).await {
                        Ok(request) => request,
                        Err(_) => return,
                    };
                    match request {
                        HealthRequest::Check { .. } => {
                            let _ = write_message(
                                &mut socket,
                                &HealthResponse::Status(ServingStatus::Serving),
                            )
                            .await;
                        }
                        HealthRequest::Watch { .. } => {
                            for status in updates.iter() {
                                let _ = write_message(
                                    &mut socket,
                                    &HealthResponse::Status(*status),
                                )
                                .await;
                            }
                            // Socket drops here, terminating the watch.
                        }
                    }
                }));
            }
        });

        address
    }

    #[tokio::test]
    async fn test_watch_termination_evicts_and_redials() {
        let address = health_server(vec![ServingStatus::NotServing]).await;
        let pool = pool_with_offset_zero(Some("db.rpc".to_string()));

        let first = pool.get_connection(&address).await.unwrap();
        assert_eq!(pool.connection_count(), 1);

        // The watch stream ends after one update; the entry must go away.
        {
            let pool = pool.clone();
            wait_until(move || pool.connection_count() == 0, "health eviction").await;
        }

        // A fresh call re-dials rather than returning the stale connection.
        let second = pool.get_connection(&address).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_health_unimplemented_leaves_connection_pooled() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            loop {
                let (mut socket, _) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(_) => break,
                };
                tokio::spawn(async move {
                    // Application connections park on this read; the health
                    // check connection gets a NotImplemented answer.
                    if read_message::<_, HealthRequest>(&mut socket).await.is_ok() {
                        let _ = write_message(&mut socket, &HealthResponse::NotImplemented).await;
                    }
                    std::future::pending::<()>().await;
                });
            }
        });

        let pool = pool_with_offset_zero(Some("db.rpc".to_string()));
        let _conn = pool.get_connection(&address).await.unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(pool.connection_count(), 1, "unimplemented must not evict");
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_final() {
        let (address, _accepts) = parking_server().await;
        let pool = pool_with_offset_zero(None);

        let _conn = pool.get_connection(&address).await.unwrap();
        assert_eq!(pool.connection_count(), 1);

        pool.close();
        pool.close();

        assert_eq!(pool.connection_count(), 0);
        assert!(matches!(
            pool.get_connection(&address).await,
            Err(Error::ShuttingDown)
        ));
    }
}
