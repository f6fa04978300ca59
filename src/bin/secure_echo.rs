//! Secure echo server and client
//!
//! Runs the echo server when `--listen` is given; otherwise dials the server,
//! sends the message and prints what comes back.

use clap::Parser;
use secure_echo_channel::{dial_with_config, serve_with_config, SecureChannelConfig, SecureStream};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "secure-echo")]
#[command(about = "Encrypted echo server and client", long_about = None)]
struct Cli {
    /// Run the echo server on this port
    #[arg(short, long)]
    listen: Option<u16>,

    /// Server address to dial
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    connect: String,

    /// Largest message in bytes; must match the peer
    #[arg(long, default_value_t = secure_echo_channel::MAX_MESSAGE_LEN)]
    max_message_len: usize,

    /// Message to send (words are joined with spaces)
    #[arg(required_unless_present = "listen")]
    message: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = SecureChannelConfig {
        max_message_len: cli.max_message_len,
    };

    if let Some(port) = cli.listen {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        info!(addr = %listener.local_addr()?, "echo server listening");
        serve_with_config(listener, config).await?;
        return Ok(());
    }

    let message = cli.message.join(" ");
    let mut channel = dial_with_config(cli.connect.as_str(), &config).await?;
    channel.write(message.as_bytes()).await?;

    let mut buf = vec![0u8; config.message_limit()];
    let n = channel.read(&mut buf).await?;
    println!("{}", String::from_utf8_lossy(&buf[..n]));

    channel.close().await?;
    Ok(())
}
