//! Parlor server and client binaries
//!
//! Usage:
//!   parlor server [config-path]               # run the server
//!   parlor client [user-name] [config-path]   # run the terminal client

use std::env;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::oneshot;
use tracing::{error, info, warn};
use tracing_subscriber::filter::LevelFilter;

use parlor::client::{
    server_message_worker, ChatWindowEvent, ChatWindowState, ConnectionSignals, ServerConnection,
};
use parlor::config::{ClientConfig, ServerConfig};
use parlor::current_timestamp;
use parlor::rooms::RoomEvent;
use parlor::server::{client_worker, server_worker, ClientConnectionManager};
use parlor::transport::{tls, TARGET_CLIENT_LOOP_MS};

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        return;
    }

    let result = match args[1].as_str() {
        "server" => {
            let config_path = args.get(2).map(String::as_str).unwrap_or("server-config.json");
            run_server(config_path).await
        }
        "client" => {
            let user_name = args.get(2).map(String::as_str);
            let config_path = args.get(3).map(String::as_str).unwrap_or("client-config.json");
            run_client(user_name, config_path).await
        }
        _ => {
            print_usage();
            return;
        }
    };

    if let Err(e) = result {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}

fn print_usage() {
    println!("Parlor - multi-room chat over TLS");
    println!();
    println!("USAGE:");
    println!("    parlor server [config-path]");
    println!("    parlor client [user-name] [config-path]");
    println!();
    println!("COMMANDS:");
    println!("    server    Start the chat server (default config: server-config.json)");
    println!("    client    Connect as a client (default config: client-config.json)");
}

/// Initialize logging from the configured level and optional log file.
fn init_logging(log_level: &str, log_file: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let level = match log_level {
        "off" => LevelFilter::OFF,
        "info" => LevelFilter::INFO,
        "warn" => LevelFilter::WARN,
        "err" => LevelFilter::ERROR,
        other => {
            eprintln!("Unknown log level '{}', defaulting to 'warn'.", other);
            LevelFilter::WARN
        }
    };

    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            tracing_subscriber::fmt()
                .with_max_level(level)
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_max_level(level).init();
        }
    }
    Ok(())
}

async fn run_server(config_path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = ServerConfig::load(Path::new(config_path))?;
    init_logging(&config.log_level, config.log_file.as_deref())?;
    info!("Configuration loaded. Server starting ...");

    let acceptor = tls::server_acceptor(
        Path::new(&config.host_certificate_path),
        Path::new(&config.host_private_key_path),
    )?;
    let connections = Arc::new(
        ClientConnectionManager::bind(config.host_port, acceptor, config.max_clients).await?,
    );

    // start the scheduler and wait for it to finish creating rooms
    let (ready_tx, ready_rx) = oneshot::channel();
    let scheduler = tokio::spawn(server_worker(
        config.clone(),
        Arc::clone(&connections),
        ready_tx,
    ));
    let _ = ready_rx.await;

    info!("Accepting connections on port {} ...", config.host_port);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupt received.");
                connections.shutdown().await;
                break;
            }
            accepted = connections.await_next_connection() => {
                match accepted {
                    Ok(Some(client)) => {
                        tokio::spawn(client_worker(client));
                    }
                    Ok(None) => {}
                    Err(e) => {
                        error!("Accept failed: {}", e);
                        connections.shutdown().await;
                        break;
                    }
                }
            }
        }
    }

    info!("Waiting for server worker ...");
    let _ = scheduler.await;
    info!("Server shutdown.");
    Ok(())
}

/// Generate a throwaway user name for ease of use.
fn generate_random_username() -> String {
    format!("jdoe{}", current_timestamp() & 0xfff)
}

async fn run_client(
    user_arg: Option<&str>,
    config_path: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = ClientConfig::load(Path::new(config_path))?;
    init_logging(&config.log_level, config.log_file.as_deref())?;
    info!("Client starting.");

    let user_name = user_arg
        .map(str::to_owned)
        .or_else(|| config.user_name.clone())
        .unwrap_or_else(generate_random_username);

    let server = match ServerConnection::connect(&config, &user_name).await {
        Ok(server) => server,
        Err(e) => {
            return Err(format!("Unable to connect to server: {}", e.message()).into());
        }
    };
    println!("Connected to {} as '{}'.", server.host_name(), user_name);
    println!("Type a message and press Enter to send it to the current room.");
    println!("Commands: /create_room <name>, /destroy_room <name>. Type 'quit' to exit.");

    let signals = ConnectionSignals::new();
    let connection = Arc::clone(&server.connection);
    let worker = tokio::spawn(server_message_worker(
        Arc::clone(&connection),
        signals.clone(),
    ));

    let mut state = ChatWindowState::new();
    let mut ticker = tokio::time::interval(Duration::from_millis(TARGET_CLIENT_LOOP_MS));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if signals.take_connection_ended() {
                    eprintln!("Connection to server lost.");
                    break;
                }
                state.waiting_on_server = signals.is_waiting_on_server();
                for event in state.apply_server_updates(&connection.messages_in, &connection.messages_out) {
                    render_event(&state, event);
                }
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        if line.trim() == "quit" {
                            signals.request_shutdown();
                            break;
                        }
                        state.chat_input = line;
                        state.submit_chat_input(&connection.messages_out);
                    }
                    // stdin closed or unreadable, wind the session down
                    Ok(None) => {
                        signals.request_shutdown();
                        break;
                    }
                    Err(e) => {
                        error!("stdin error: {}", e);
                        signals.request_shutdown();
                        break;
                    }
                }
            }
        }
    }

    let _ = worker.await;
    info!("Chat client terminated.");
    Ok(())
}

fn render_event(state: &ChatWindowState, event: ChatWindowEvent) {
    match event {
        ChatWindowEvent::RoomsChanged => {
            println!(
                "Rooms: {}  (current: #{})",
                state.room_names().join(", "),
                state.current_room_name()
            );
        }
        ChatWindowEvent::HistoryRefreshed { room_name } => {
            if room_name == state.current_room_name() {
                for event in state.history_snapshot(&room_name) {
                    print_chat_line(&room_name, &event);
                }
            }
        }
        ChatWindowEvent::Chat { room_name, event } => {
            if room_name == state.current_room_name() {
                print_chat_line(&room_name, &event);
            }
        }
    }
}

fn print_chat_line(room_name: &str, event: &RoomEvent) {
    println!(
        "[#{}] {}: {}",
        room_name, event.origin_user_name, event.event_text
    );
}
