//! boltlink command-line node.
//!
//! # Usage
//!
//! ```bash
//! # Create an identity
//! boltlink keygen > node.key
//!
//! # Echo every message back to the sender
//! boltlink listen --bind 0.0.0.0:9735 --key-file node.key
//!
//! # Send stdin lines to a listener and print its replies
//! boltlink connect --peer 02ab...@127.0.0.1:9735
//! ```

use std::{fs, io::Write as _, path::PathBuf};

use boltlink_core::{ChannelError, Environment};
use boltlink_crypto::{KeyPair, PublicKey, parse_public_key};
use boltlink_node::{Listener, SecureStream, StreamConfig, StreamError, SystemEnv, connect};
use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Encrypted point-to-point links over TCP
#[derive(Parser, Debug)]
#[command(name = "boltlink")]
#[command(about = "Noise XK encrypted peer links")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Handshake timeout in milliseconds
    #[arg(long, default_value = "10000", global = true)]
    handshake_timeout_ms: u64,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a new secret key and its public key as hex
    Keygen,

    /// Accept connections and echo every message
    Listen {
        /// Address to bind to
        #[arg(short, long, default_value = "0.0.0.0:9735")]
        bind: String,

        #[command(flatten)]
        identity: Identity,
    },

    /// Connect to a listener and exchange stdin lines
    Connect {
        /// Peer as `<pubkey hex>@<host:port>`
        #[arg(short, long)]
        peer: String,

        #[command(flatten)]
        identity: Identity,
    },
}

/// Static identity source; a fresh key is generated when neither is given
#[derive(Args, Debug)]
struct Identity {
    /// Secret key as 64 hex characters
    #[arg(long, conflicts_with = "key_file")]
    secret: Option<String>,

    /// File whose first line is a secret key in hex
    #[arg(long)]
    key_file: Option<PathBuf>,
}

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() -> CliResult<()> {
    let cli = Cli::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    tracing_subscriber::registry().with(fmt::layer().with_writer(std::io::stderr)).with(filter).init();

    let config = StreamConfig {
        handshake_timeout: std::time::Duration::from_millis(cli.handshake_timeout_ms),
        ..StreamConfig::default()
    };

    match cli.command {
        Command::Keygen => keygen(),
        Command::Listen { bind, identity } => listen(&bind, identity.load()?, config).await,
        Command::Connect { peer, identity } => {
            let (remote, addr) = parse_peer(&peer)?;
            dial(&addr, identity.load()?, remote, config).await
        },
    }
}

impl Identity {
    fn load(&self) -> CliResult<KeyPair> {
        let encoded = match (&self.secret, &self.key_file) {
            (Some(secret), _) => secret.clone(),
            (None, Some(path)) => {
                let contents = fs::read_to_string(path)?;
                contents.lines().next().unwrap_or_default().to_string()
            },
            (None, None) => {
                tracing::info!("no identity given, generating one");
                return generate().map_err(Into::into);
            },
        };

        let bytes: [u8; 32] = hex::decode(encoded.trim())?
            .try_into()
            .map_err(|_| "secret key must be 32 bytes")?;
        Ok(KeyPair::from_secret_bytes(&bytes)?)
    }
}

fn generate() -> Result<KeyPair, StreamError> {
    SystemEnv::new().generate_keypair().map_err(|err| ChannelError::KeyGeneration(err).into())
}

fn parse_peer(peer: &str) -> CliResult<(PublicKey, String)> {
    let (key, addr) = peer.split_once('@').ok_or("peer must be <pubkey>@<host:port>")?;
    let key = parse_public_key(&hex::decode(key)?)?;
    Ok((key, addr.to_string()))
}

fn keygen() -> CliResult<()> {
    let pair = generate()?;
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", hex::encode(pair.secret_bytes()))?;
    writeln!(stdout, "{}", hex::encode(pair.public_key_bytes()))?;
    Ok(())
}

async fn listen(bind: &str, identity: KeyPair, config: StreamConfig) -> CliResult<()> {
    let listener = Listener::bind(bind, identity, config).await?;
    tracing::info!(addr = %listener.local_addr()?, key = %listener.public_key(), "echo server ready");

    loop {
        let (stream, peer) = listener.accept().await?;
        tokio::spawn(async move {
            match echo(stream).await {
                Ok(count) => tracing::info!(%peer, count, "peer disconnected"),
                Err(err) => tracing::warn!(%peer, %err, "peer failed"),
            }
        });
    }
}

async fn echo(mut stream: SecureStream) -> Result<u64, StreamError> {
    let remote = stream.connected().await?;
    tracing::info!(%remote, "peer authenticated");

    let mut count = 0;
    while let Some(message) = stream.recv().await? {
        if !stream.write(message)? {
            stream.drained().await;
        }
        count += 1;
    }
    Ok(count)
}

async fn dial(addr: &str, identity: KeyPair, remote: PublicKey, config: StreamConfig) -> CliResult<()> {
    let mut stream = connect(addr, identity, remote, config).await?;
    stream.connected().await?;
    tracing::info!(%remote, "connected");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut sent = 0u64;
    let mut echoed = 0u64;

    // The listener echoes, so stop once every line came back
    while stdin_open || echoed < sent {
        tokio::select! {
            line = lines.next_line(), if stdin_open => match line? {
                Some(line) => {
                    if !stream.write(line.into_bytes())? {
                        stream.drained().await;
                    }
                    sent += 1;
                },
                None => stdin_open = false,
            },
            message = stream.recv() => match message? {
                Some(message) => {
                    let mut stdout = std::io::stdout().lock();
                    stdout.write_all(&message)?;
                    stdout.write_all(b"\n")?;
                    echoed += 1;
                },
                None => return Ok(()),
            },
        }
    }

    stream.close().await?;
    Ok(())
}
