//! Terminal echo chat
//!
//! Run with: cargo run --features cli -- [URL] [--json]
//!
//! Type a line to send it. `/connect`, `/disconnect`, `/status` and `/quit`
//! drive the session.

#[cfg(not(target_arch = "wasm32"))]
use echo_chat::core::ChatUpdate;

#[cfg(not(target_arch = "wasm32"))]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    use echo_chat::config::ChatConfig;
    use echo_chat::core::ConnectionController;
    use echo_chat::input::stdin_lines;
    use echo_chat::websocket_native::NativeTransport;
    use tracing::{debug, info};
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,echo_chat=info"));
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        debug!("TLS crypto provider already installed");
    }

    let config = ChatConfig::from_args_and_env(std::env::args().skip(1));
    info!(url = %config.url, json = config.json, "Starting echo chat");

    let controller = ConnectionController::new(
        NativeTransport::new(config.handshake_timeout),
        config.url.clone(),
    );

    // Transcript printer; ends when the controller drops its subscribers
    let updates = controller.subscribe();
    let json = config.json;
    let printer = tokio::task::spawn_blocking(move || {
        for update in updates {
            print_update(&update, json);
        }
    });

    controller.connect();

    // Read off-runtime so ctrl-c shutdown never waits on a pending read
    let mut lines = stdin_lines();

    loop {
        tokio::select! {
            line = lines.recv() => {
                let Some(line) = line else {
                    break;
                };
                match line.trim() {
                    "/quit" => break,
                    "/connect" => controller.connect(),
                    "/disconnect" => controller.disconnect(),
                    "/status" => println!("Status: {}", controller.state()),
                    _ => controller.send(&line),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    controller.shutdown();
    printer.await?;
    Ok(())
}

#[cfg(not(target_arch = "wasm32"))]
fn print_update(update: &ChatUpdate, json: bool) {
    use echo_chat::core::Origin;
    use tracing::warn;

    if json {
        match serde_json::to_string(update) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!(error = %e, "Failed to encode update"),
        }
        return;
    }

    match update {
        ChatUpdate::State(state) => println!("Status: {state}"),
        ChatUpdate::Entry(entry) => {
            let arrow = match entry.origin() {
                Origin::Sent => "->",
                Origin::Received => "<-",
            };
            println!(
                "{} {arrow} {}: {}",
                entry.clock_time(),
                entry.sender(),
                entry.content()
            );
        }
    }
}

#[cfg(target_arch = "wasm32")]
fn main() {}
