//! End-to-end tests over real TCP: a registrar plus several nodes on
//! localhost, each with its own transport runtime and store.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use eau2_net::{KvNet, NetConfig, Registrar, RegistrarConfig, TcpNet};
use eau2_store::{Store, StoreConfig, StoreError};
use eau2_types::{Column, Key, Table};
use tokio::runtime::Runtime;

fn localhost(port: u16) -> SocketAddrV4 {
    SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)
}

/// Test harness for a registrar and N registered nodes with stores.
struct TestCluster {
    stores: Vec<Store>,
    nets: Vec<Arc<TcpNet>>,
    registrar: Option<Registrar>,
    runtime: Runtime,
}

impl TestCluster {
    fn spawn(n: usize, store_config: StoreConfig) -> Result<Self> {
        let runtime = Runtime::new()?;
        let mut registrar = runtime.block_on(Registrar::bind(RegistrarConfig {
            bind_addr: localhost(0),
            expected_nodes: n,
        }))?;
        let net_config = NetConfig {
            registrar_addr: registrar.local_addr(),
            ..NetConfig::default()
        };

        // Registration blocks until every node has checked in, so each node
        // registers from its own thread.
        let joins: Vec<_> = (0..n)
            .map(|_| {
                let config = net_config.clone();
                thread::spawn(move || -> Result<Arc<TcpNet>> {
                    let net = TcpNet::new(config)?;
                    net.register_node(localhost(0))?;
                    Ok(Arc::new(net))
                })
            })
            .collect();
        runtime.block_on(registrar.start())?;

        let mut nets = Vec::with_capacity(n);
        for join in joins {
            let net = join
                .join()
                .map_err(|_| anyhow::anyhow!("registration thread panicked"))??;
            nets.push(net);
        }
        nets.sort_by_key(|net| net.node_id());

        let stores = nets
            .iter()
            .map(|net| Store::new(Arc::clone(net) as Arc<dyn KvNet>, store_config.clone()))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            stores,
            nets,
            registrar: Some(registrar),
            runtime,
        })
    }

    /// Store for a 1-indexed node id.
    fn node(&self, id: usize) -> &Store {
        &self.stores[id - 1]
    }

    fn stop_registrar(&mut self) -> Result<()> {
        if let Some(registrar) = self.registrar.take() {
            self.runtime.block_on(registrar.stop())?;
        }
        Ok(())
    }
}

fn wait_for<T>(timeout: Duration, mut check: impl FnMut() -> Option<T>) -> Option<T> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(found) = check() {
            return Some(found);
        }
        if Instant::now() >= deadline {
            return None;
        }
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn push_then_wait_and_get() -> Result<()> {
    let cluster = TestCluster::spawn(2, StoreConfig::default())?;
    let (a, b) = (cluster.node(1), cluster.node(2));
    let key = Key::new("x", b.node_id());

    a.push(key.clone(), Table::from_column(vec![1i32, 2, 3]))?;
    let value = a.wait_and_get(&key)?;
    assert_eq!(value.column(0), Some(&Column::I32(vec![1, 2, 3])));
    assert!(b.get(&key).is_some(), "owner should hold the pushed value");
    Ok(())
}

#[test]
fn wait_and_get_times_out_when_owner_lacks_key() -> Result<()> {
    let config = StoreConfig {
        wait_timeout_ms: 300,
        max_delay_ms: 100,
        ..StoreConfig::default()
    };
    let cluster = TestCluster::spawn(2, config)?;
    let key = Key::new("never", 2);

    let started = Instant::now();
    let err = cluster.node(1).wait_and_get(&key).unwrap_err();
    assert!(matches!(err, StoreError::Timeout { .. }), "got {err:?}");
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert_eq!(cluster.node(1).pending_requests(), 0);
    Ok(())
}

#[test]
fn waiter_is_woken_by_a_later_push() -> Result<()> {
    let cluster = TestCluster::spawn(3, StoreConfig::default())?;
    let key = Key::new("shared", 3);

    thread::scope(|s| -> Result<()> {
        let waiter = s.spawn(|| cluster.node(1).wait_and_get(&key));
        thread::sleep(Duration::from_millis(100));
        cluster.node(2).put_scalar(key.clone(), 42u64)?;
        let value = waiter
            .join()
            .map_err(|_| anyhow::anyhow!("waiter panicked"))??;
        assert_eq!(value.get_i64(0, 0)?, 42);
        Ok(())
    })?;
    Ok(())
}

#[test]
fn every_node_sees_the_same_directory() -> Result<()> {
    let cluster = TestCluster::spawn(3, StoreConfig::default())?;
    let expected = cluster
        .registrar
        .as_ref()
        .and_then(|r| r.directory())
        .cloned()
        .expect("registrar has a directory");
    assert_eq!(expected.len(), 4);

    for (i, net) in cluster.nets.iter().enumerate() {
        assert_eq!(net.node_id(), Some(i as u64 + 1));
        assert_eq!(net.directory(), Some(&expected));
    }
    Ok(())
}

#[test]
fn registrar_stop_kills_every_node() -> Result<()> {
    let mut cluster = TestCluster::spawn(2, StoreConfig::default())?;
    cluster.stop_registrar()?;

    for store in &cluster.stores {
        let stopped = wait_for(Duration::from_secs(5), || (!store.is_running()).then_some(()));
        assert!(stopped.is_some(), "node {} kept running", store.node_id());
    }
    for net in &cluster.nets {
        assert!(!net.ready());
    }
    Ok(())
}
