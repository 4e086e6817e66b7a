//! `elisa server`: Start the Elisa HTTP backend server.

use elisa_core::EngineConfig;

pub async fn run(
    host: String,
    port: u16,
    static_dir: Option<String>,
    engine: EngineConfig,
) -> Result<(), String> {
    let config = elisa_server::ServerConfig {
        host: host.clone(),
        port,
        static_dir,
        engine,
    };

    println!("Starting Elisa server on {}:{}...", host, port);

    let addr = elisa_server::start_server(config).await?;
    println!("Elisa server listening on http://{}", addr);

    // Keep the process running until interrupted
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| format!("Failed to listen for Ctrl+C: {}", e))?;

    println!("\nShutting down...");
    Ok(())
}
