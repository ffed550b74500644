use std::net::SocketAddrV4;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "eau2",
    about = "eau2: distributed DataFrame key-value store",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the registrar until every node has registered, then until ctrl-c
    Registrar(RegistrarArgs),
    /// Register with the registrar and serve a store until killed
    Node(NodeArgs),
    /// Run an in-process cluster and exchange tables between its nodes
    Demo(DemoArgs),
}

#[derive(Args)]
pub struct RegistrarArgs {
    #[arg(long, default_value = "127.0.0.1:4500")]
    pub bind: SocketAddrV4,
    /// Number of nodes to wait for
    #[arg(long)]
    pub nodes: usize,
}

#[derive(Args)]
pub struct NodeArgs {
    /// Address this node accepts peer connections on
    #[arg(long)]
    pub listen: SocketAddrV4,
    /// Registrar address; overrides the config file
    #[arg(long)]
    pub registrar: Option<SocketAddrV4>,
    /// TOML file with [net] and [store] sections
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Args)]
pub struct DemoArgs {
    #[arg(long, default_value = "3")]
    pub nodes: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_node_command() {
        let cli = Cli::parse_from([
            "eau2",
            "node",
            "--listen",
            "127.0.0.1:9001",
            "--registrar",
            "127.0.0.1:4500",
            "-v",
        ]);
        assert!(cli.verbose);
        assert_eq!(cli.format, OutputFormat::Text);
        match cli.command {
            Command::Node(args) => {
                assert_eq!(args.listen.port(), 9001);
                assert_eq!(args.registrar.map(|a| a.port()), Some(4500));
                assert!(args.config.is_none());
            }
            _ => panic!("expected node command"),
        }
    }

    #[test]
    fn registrar_requires_node_count() {
        assert!(Cli::try_parse_from(["eau2", "registrar"]).is_err());
        let cli = Cli::try_parse_from(["eau2", "registrar", "--nodes", "2", "--format", "json"]).unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
        match cli.command {
            Command::Registrar(args) => {
                assert_eq!(args.nodes, 2);
                assert_eq!(args.bind.port(), 4500);
            }
            _ => panic!("expected registrar command"),
        }
    }

    #[test]
    fn demo_defaults_to_three_nodes() {
        let cli = Cli::parse_from(["eau2", "demo"]);
        assert!(matches!(cli.command, Command::Demo(DemoArgs { nodes: 3 })));
    }
}
