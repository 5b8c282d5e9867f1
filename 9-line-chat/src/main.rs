use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use line_chat::{
    cli::{Cli, Command, ServeArgs},
    client,
    password::PasswordHasher,
    server::Server,
    store::SqliteStore,
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

async fn serve(args: ServeArgs) -> Result<()> {
    let store = SqliteStore::open(&args.db)
        .with_context(|| format!("failed to open database {}", args.db.display()))?;
    let store = Arc::new(store);
    debug!(db = %args.db.display(), "opened chat database");

    let listener = TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("failed to bind {}", args.listen))?;
    let server = Server::new(
        listener,
        store.clone(),
        store,
        PasswordHasher::new(args.hash_iterations),
    );
    let addr = server.local_addr()?;
    info!("server listening on {}", addr);

    if let Err(err) = server.run_until_ctrl_c().await {
        warn!("server exited with error: {err:?}");
        return Err(err);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => serve(args).await?,
        Command::Client(args) => client::run(args).await?,
    }

    Ok(())
}
