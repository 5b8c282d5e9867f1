use std::{net::SocketAddr, path::PathBuf};

use clap::{Args, Parser, Subcommand};

use crate::password::DEFAULT_ITERATIONS;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the chat server, accepting TCP connections.
    Serve(ServeArgs),
    /// Connect to a server and exchange lines from stdin.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Socket address the server should bind to. Use port 0 for an ephemeral port.
    #[arg(long, env = "LINE_CHAT_LISTEN", default_value = "127.0.0.1:3000")]
    pub listen: SocketAddr,

    /// SQLite database holding users and chat history. Created if missing.
    #[arg(long, env = "LINE_CHAT_DB", default_value = "chat.db")]
    pub db: PathBuf,

    /// PBKDF2 iterations for newly hashed passwords.
    #[arg(
        long,
        env = "LINE_CHAT_HASH_ITERATIONS",
        default_value_t = DEFAULT_ITERATIONS,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub hash_iterations: u32,
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Address of the server to connect to.
    #[arg(long, default_value = "127.0.0.1:3000")]
    pub server: SocketAddr,

    /// Optional line sent once right after connecting.
    #[arg(trailing_var_arg = true)]
    pub message: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_defaults() {
        let cli = Cli::try_parse_from(["line_chat", "serve"]).expect("parse");
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.listen, "127.0.0.1:3000".parse::<SocketAddr>().unwrap());
        assert_eq!(args.db, PathBuf::from("chat.db"));
        assert_eq!(args.hash_iterations, DEFAULT_ITERATIONS);
    }

    #[test]
    fn zero_hash_iterations_is_rejected() {
        let result = Cli::try_parse_from(["line_chat", "serve", "--hash-iterations", "0"]);
        assert!(result.is_err());
    }

    #[test]
    fn client_collects_initial_message() {
        let cli = Cli::try_parse_from(["line_chat", "client", "add", "1", "2"]).expect("parse");
        let Command::Client(args) = cli.command else {
            panic!("expected client");
        };
        assert_eq!(args.message.join(" "), "add 1 2");
    }
}
