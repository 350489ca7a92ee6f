//! Dead Letter Queue Worker - Entry Point
//!
//! Retention sweeper and stats reporter for the dead-letter store.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    dlq_worker::run().await
}
