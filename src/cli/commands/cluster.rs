//! Cluster command implementation.

use anyhow::Result;
use clap::{Args, Subcommand};

use crate::rpc::client::ClusterClient;

/// Cluster membership operations.
#[derive(Args, Debug)]
pub struct ClusterArgs {
    #[command(subcommand)]
    pub command: ClusterCommand,
}

/// Cluster subcommands.
#[derive(Subcommand, Debug)]
pub enum ClusterCommand {
    /// List members and the current leader.
    ListNodes {
        /// Any member's RPC address.
        #[arg(short, long, default_value = "127.0.0.1:7070")]
        endpoint: String,
    },
    /// Add a member to the consensus group.
    AddNode {
        /// New member's nexus URL.
        #[arg(required = true)]
        node_url: String,
        /// The leader's RPC address.
        #[arg(short, long, default_value = "127.0.0.1:7070")]
        endpoint: String,
    },
    /// Remove a member from the consensus group.
    RemoveNode {
        /// Member's nexus URL.
        #[arg(required = true)]
        node_url: String,
        /// The leader's RPC address.
        #[arg(short, long, default_value = "127.0.0.1:7070")]
        endpoint: String,
    },
}

/// Run the cluster command.
pub async fn run_cluster(args: ClusterArgs) -> Result<()> {
    match args.command {
        ClusterCommand::ListNodes { endpoint } => {
            let client = ClusterClient::connect(&endpoint)?;
            let (leader, nodes) = client.list_nodes().await?;
            println!("Leader: node {}", leader);
            for node in nodes {
                let marker = if node.node_id == leader { "*" } else { " " };
                println!("{} node {:<4} {}", marker, node.node_id, node.nexus_url);
            }
        }
        ClusterCommand::AddNode { node_url, endpoint } => {
            let client = ClusterClient::connect(&endpoint)?;
            client.add_node(&node_url).await?;
            println!("added {}", node_url);
        }
        ClusterCommand::RemoveNode { node_url, endpoint } => {
            let client = ClusterClient::connect(&endpoint)?;
            client.remove_node(&node_url).await?;
            println!("removed {}", node_url);
        }
    }
    Ok(())
}
