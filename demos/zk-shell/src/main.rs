use std::process::ExitCode;

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use zkhandle::prelude::*;

const USAGE: &str = "\
usage: zk-shell <connect-string> <command> [args]

commands:
  ls <path>              list the children of a node
  get <path>             print the data of a node
  create <path> <data>   create a persistent node
  rm <path>              delete a node

Set RUST_LOG (e.g. RUST_LOG=zkhandle=debug) for more output.";

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

enum Command {
    List(String),
    Get(String),
    Create(String, String),
    Remove(String),
}

impl Command {
    fn parse(args: &[String]) -> Option<Self> {
        let command = match args {
            [cmd, path] if cmd == "ls" => Self::List(path.clone()),
            [cmd, path] if cmd == "get" => Self::Get(path.clone()),
            [cmd, path, data] if cmd == "create" => {
                Self::Create(path.clone(), data.clone())
            }
            [cmd, path] if cmd == "rm" => Self::Remove(path.clone()),
            _ => return None,
        };
        Some(command)
    }

    async fn run(self, client: &NamespaceClient) {
        match self {
            Self::List(path) => {
                for name in client.list_directory(&path).await {
                    println!("{name}");
                }
            }
            Self::Get(path) => match client.get_node_data(&path).await {
                Some(data) => println!("{data}"),
                None => println!("(no data)"),
            },
            Self::Create(path, data) => {
                match client.create_node(&path, &data).await {
                    Some(created) => println!("created {created}"),
                    None => println!("(not created)"),
                }
            }
            Self::Remove(path) => client.delete_node(&path).await,
        }
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some((connect_string, rest)) = args.split_first() else {
        eprintln!("{USAGE}");
        return ExitCode::from(2);
    };
    let Some(command) = Command::parse(rest) else {
        eprintln!("{USAGE}");
        return ExitCode::from(2);
    };

    let mut client = match NamespaceClient::builder()
        .connect_string(connect_string.as_str())
        .session_timeout_ms(10_000)
        .state_listener(LoggingListener)
        .build()
        .await
    {
        Ok(client) => client,
        Err(e) => {
            tracing::error!(error = %e, "could not start client");
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    command.run(&client).await;
    client.close().await;
    ExitCode::SUCCESS
}
