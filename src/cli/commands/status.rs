//! Status command implementation.

use anyhow::Result;
use clap::Args;

use crate::rpc::client::MaintenanceClient;

/// Show a node's region status.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Node RPC address.
    #[arg(short, long, default_value = "127.0.0.1:7070")]
    pub endpoint: String,
}

/// Run the status command.
pub async fn run_status(args: StatusArgs) -> Result<()> {
    let client = MaintenanceClient::connect(&args.endpoint)?;
    let info = client.get_status().await?;

    println!("Node:      {}", info.node_address);
    println!("Role:      {}", info.status());
    println!("DC:        {}", info.dc_id);
    println!("Database:  {}", info.database);
    println!("vBucket:   {}", info.vbucket);
    if !info.master_host.is_empty() {
        println!("Master:    {}", info.master_host);
    }
    if !info.nexus_cluster_url.is_empty() {
        println!("Peers:     {}", info.nexus_cluster_url);
    }
    Ok(())
}
