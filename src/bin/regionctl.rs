use clap::{Parser, Subcommand};
use regiond::client::CacheClient;
use regiond::types::{Encoding, Response};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "regionctl", about = "Partitioned cache client", version)]
struct Args {
  #[arg(short = 'H', long, default_value = "localhost:40404", env = "REGIOND_ADDR")]
  host: String,
  /// Use JSON frames instead of MessagePack
  #[arg(long)]
  json: bool,
  /// Print the session id and encoding to stderr
  #[arg(short, long)]
  verbose: bool,
  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Check that the server answers
  Ping,
  /// Read a key, loading it on a miss
  Get { region: String, key: String },
  /// Store a value under a key
  Put {
    region: String,
    key: String,
    value: String,
  },
  /// Remove a key
  Remove { region: String, key: String },
  /// Check whether a key is cached
  Contains { region: String, key: String },
}

/// Integers and other JSON literals are sent as-is; anything else as a string.
fn parse_operand(raw: &str) -> Value {
  serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
  let args = Args::parse();
  let encoding = if args.json {
    Encoding::Json
  } else {
    Encoding::MessagePack
  };
  let client = CacheClient::connect_with(&args.host, encoding).await?;
  if args.verbose {
    eprintln!(
      "connected to {} (session {}, {:?})",
      args.host,
      client.session_id(),
      client.encoding()
    );
  }

  let resp: Response = match args.command {
    Command::Ping => client.ping().await?,
    Command::Get { region, key } => client.get(&region, parse_operand(&key)).await?,
    Command::Put { region, key, value } => {
      client
        .put(&region, parse_operand(&key), parse_operand(&value))
        .await?
    }
    Command::Remove { region, key } => client.remove(&region, parse_operand(&key)).await?,
    Command::Contains { region, key } => {
      client.contains_key(&region, parse_operand(&key)).await?
    }
  };

  println!("{}", serde_json::to_string_pretty(&resp)?);
  if !resp.is_ok() {
    std::process::exit(1);
  }
  Ok(())
}
