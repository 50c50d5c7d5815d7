use epoll_file_server::{ConnectionAcceptor, EventLoop, ServerConfig, ServerResult};
use log::info;
use std::env;
use std::path::Path;

fn main() -> ServerResult<()> {
    pretty_env_logger::init();

    // Parse command-line arguments
    let args: Vec<String> = env::args().collect();
    let config = match args.get(1) {
        Some(path) if path == "--save-default" => {
            let target = args.get(2).map(String::as_str).unwrap_or("server.json");
            return save_default_config(target);
        }
        // Load configuration from file
        Some(path) if Path::new(path).exists() => ServerConfig::from_json_file(path)?,
        _ => ServerConfig::new(),
    };
    config.validate()?;

    let acceptor = ConnectionAcceptor::from_config(&config)?;
    info!(
        "Serving {} on {} with {} worker threads",
        config.document_root.display(),
        acceptor.local_addr()?,
        config.worker_threads
    );

    let mut event_loop = EventLoop::new(config, acceptor)?;

    // Set up a signal handler for graceful shutdown
    let shutdown = event_loop.shutdown_handle();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal. Stopping server...");
        shutdown.shutdown();
    })
    .map_err(|e| epoll_file_server::ServerError::EventLoop(e.to_string()))?;

    event_loop.run()
}

// Save default configuration to a file
fn save_default_config(path: &str) -> ServerResult<()> {
    let config = ServerConfig::new();
    config.save_to_json_file(path)?;
    info!("Default configuration saved to: {}", path);
    Ok(())
}
