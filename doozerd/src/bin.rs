//! Minimal binary front-end: installs a `tracing` subscriber and founds a
//! single-node cluster. Real flag/config parsing and the join-side socket
//! dial are left to whatever deployment wraps this crate (spec.md §1 scopes
//! CLI parsing and the client wire protocol out of the library).

use doozer_net::NodeId;
use doozerd::Replica;

#[tokio::main]
async fn main() -> doozer_base::Result<()> {
    tracing_subscriber::fmt::init();

    let listen: std::net::SocketAddr = std::env::var("DOOZERD_LISTEN")
        .unwrap_or_else(|_| "127.0.0.1:8046".to_string())
        .parse()
        .map_err(|_| doozer_base::err("DOOZERD_LISTEN must be a socket address"))?;
    let self_id = NodeId(std::env::var("DOOZERD_ID").unwrap_or_else(|_| listen.to_string()));

    let replica = Replica::first(self_id.clone(), listen).await?;
    tracing::info!(id = %replica.self_id, %listen, "doozerd founded a new cluster");

    std::future::pending::<()>().await;
    Ok(())
}
