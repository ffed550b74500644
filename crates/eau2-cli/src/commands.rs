use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;

use anyhow::{bail, Context};
use colored::Colorize;
use eau2_net::{Directory, KvNet, LocalHub, Registrar, RegistrarConfig, TcpNet};
use eau2_store::{Store, StoreConfig};
use eau2_types::{Key, NodeId, Table};
use serde_json::json;
use tracing::{info, warn};

use crate::cli::*;
use crate::config::NodeConfig;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Registrar(args) => cmd_registrar(args, cli.format),
        Command::Node(args) => cmd_node(args, cli.format),
        Command::Demo(args) => cmd_demo(args, cli.format),
    }
}

fn cmd_registrar(args: RegistrarArgs, format: OutputFormat) -> anyhow::Result<()> {
    if args.nodes == 0 {
        bail!("--nodes must be at least 1");
    }
    let runtime = tokio::runtime::Runtime::new().context("starting runtime")?;
    runtime.block_on(async {
        let mut registrar = Registrar::bind(RegistrarConfig {
            bind_addr: args.bind,
            expected_nodes: args.nodes,
        })
        .await
        .with_context(|| format!("binding registrar to {}", args.bind))?;
        if format == OutputFormat::Text {
            println!(
                "Registrar on {}, waiting for {} node(s)",
                registrar.local_addr().to_string().bold(),
                args.nodes
            );
        }

        let directory = registrar.start().await.context("collecting registrations")?;
        print_directory(&directory, format);

        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = ?err, "failed to install ctrl-c handler");
        }
        info!("stopping cluster");
        registrar.stop().await.context("stopping registrar")?;
        if format == OutputFormat::Text {
            println!("{} Sent kill to {} node(s)", "✓".green().bold(), directory.node_count());
        }
        Ok::<_, anyhow::Error>(())
    })
}

fn print_directory(directory: &Directory, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let nodes: Vec<String> = directory.nodes().iter().map(ToString::to_string).collect();
            println!("{}", json!({ "nodes": nodes }));
        }
        OutputFormat::Text => {
            println!("{} Directory distributed", "✓".green().bold());
            for (id, addr) in directory.nodes().iter().enumerate() {
                let role = if id == 0 { "registrar" } else { "node" };
                println!("  {:>3}  {}  {}", id.to_string().yellow(), addr, role.dimmed());
            }
        }
    }
}

fn cmd_node(args: NodeArgs, format: OutputFormat) -> anyhow::Result<()> {
    let mut config = match &args.config {
        Some(path) => NodeConfig::from_file(path)?,
        None => NodeConfig::default(),
    };
    if let Some(registrar) = args.registrar {
        config.net.registrar_addr = registrar;
    }

    let net = TcpNet::new(config.net.clone()).context("starting transport")?;
    let id = net
        .register_node(args.listen)
        .with_context(|| format!("registering with {}", config.net.registrar_addr))?;
    let peers = net.directory().map_or(0, Directory::node_count);
    let store = Store::new(Arc::new(net), config.store).context("starting store")?;

    match format {
        OutputFormat::Json => println!("{}", json!({ "node": id, "nodes": peers })),
        OutputFormat::Text => println!(
            "{} Node {} of {} serving on {}",
            "✓".green().bold(),
            id.to_string().yellow().bold(),
            peers,
            args.listen
        ),
    }

    store.serve_until_killed();
    if format == OutputFormat::Text {
        println!("Node {} stopped", id);
    }
    Ok(())
}

/// Every node pushes a column to its right-hand neighbour, then reads it back
/// from there. The reads race the pushes, which WaitAndGet absorbs.
fn cmd_demo(args: DemoArgs, format: OutputFormat) -> anyhow::Result<()> {
    if args.nodes < 2 {
        bail!("--nodes must be at least 2");
    }
    let hub = LocalHub::new();
    let mut stores = Vec::with_capacity(args.nodes);
    for _ in 0..args.nodes {
        let net = hub.connect();
        net.register_node(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0))?;
        stores.push(Store::new(Arc::new(net), StoreConfig::default())?);
    }

    let n = args.nodes as NodeId;
    let key_for = |id: NodeId| Key::new(format!("from-{id}"), id % n + 1);

    for store in &stores {
        let id = store.node_id();
        let values: Vec<i64> = (1..=3).map(|i| i * id as i64).collect();
        store.put_column(key_for(id), values)?;
    }

    for store in &stores {
        let id = store.node_id();
        let key = key_for(id);
        let table = store
            .wait_and_get(&key)
            .with_context(|| format!("node {id} reading {key}"))?;
        print_table(id, &key, &table, format)?;
    }
    info!(nodes = args.nodes, "demo finished");
    Ok(())
}

fn print_table(node: NodeId, key: &Key, table: &Table, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            let value = json!({ "node": node, "key": key.to_string(), "table": table });
            println!("{}", serde_json::to_string(&value)?);
        }
        OutputFormat::Text => {
            println!("node {} read {}", node.to_string().yellow(), key.to_string().bold());
            for (i, column) in table.columns().iter().enumerate() {
                println!(
                    "  col {} {:<7} [{}]",
                    i,
                    column.element_type().to_string().cyan(),
                    column.render()
                );
            }
        }
    }
    Ok(())
}
