use store_server::{setup_environment, Config, Server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Environment (dotenv, logging)
    setup_environment();

    tracing::info!("Toy Store Server starting...");

    // 2. Load configuration
    let config = Config::from_env();

    // 3. Run the HTTP server (spawns background workers)
    let server = Server::new(config);
    if let Err(e) = server.run().await {
        tracing::error!("Server error: {e:#}");
        return Err(e.into());
    }

    Ok(())
}
