//! Interactive client for a UdsVault server
//!
//! Forwards each typed line to the server verbatim and prints the reply

use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use udsvault::{Client, DEFAULT_SOCKET_PATH};

#[derive(Parser, Debug)]
#[command(author, version, about = "Interactive UdsVault client", long_about = None)]
struct Args {
    /// Socket path of the server
    #[arg(long, default_value = DEFAULT_SOCKET_PATH)]
    socket: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut client = Client::connect(&args.socket).await?;
    println!("[client] Connected to server at {}", args.socket.display());
    println!("Commands: SET <key> <value> | GET <key> | exit");

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(input) = stdin.next_line().await? else {
            break;
        };
        if input.starts_with("exit") {
            break;
        }

        match client.request(&input).await {
            Ok(response) => println!("[server] {}", response),
            Err(e) => {
                eprintln!("Error: {}", e);
                break;
            }
        }
    }

    // The server may already be gone
    let _ = client.close().await;
    println!("[client] Disconnected.");
    Ok(())
}
