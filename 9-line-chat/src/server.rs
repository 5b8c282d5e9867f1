use std::{
    future::Future,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
};

use anyhow::Result;
use tokio::{
    net::{TcpListener, TcpStream},
    select,
};
use tracing::{debug, info, warn};

use crate::{
    command::Dispatcher,
    connection::{ConnectionContext, handle_connection},
    password::PasswordHasher,
    session::ConnectionId,
    store::{CredentialStore, MessageLog},
};

pub struct Server {
    listener: TcpListener,
    supervisor: ConnectionSupervisor,
}

impl Server {
    pub fn new(
        listener: TcpListener,
        credentials: Arc<dyn CredentialStore>,
        messages: Arc<dyn MessageLog>,
        hasher: PasswordHasher,
    ) -> Self {
        let context = ConnectionContext {
            dispatcher: Dispatcher::new(credentials, hasher),
            messages,
        };
        Self {
            listener,
            supervisor: ConnectionSupervisor::new(context),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until `shutdown` resolves.
    ///
    /// Connections already being served keep running after the listener
    /// stops.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server {
            listener,
            supervisor,
        } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!(active = supervisor.active(), "server shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &supervisor);
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    supervisor: &ConnectionSupervisor,
) {
    match result {
        Ok((stream, peer)) => supervisor.spawn(stream, peer),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

/// Owns the decision of how accepted connections are run.
///
/// Today every connection gets its own task with no upper bound; a cap on
/// concurrent sessions belongs here rather than in the protocol code.
struct ConnectionSupervisor {
    context: ConnectionContext,
    next_id: AtomicU64,
    active: Arc<AtomicUsize>,
}

impl ConnectionSupervisor {
    fn new(context: ConnectionContext) -> Self {
        Self {
            context,
            next_id: AtomicU64::new(1),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn next_id(&self) -> ConnectionId {
        ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn active(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    fn spawn(&self, stream: TcpStream, peer: SocketAddr) {
        let id = self.next_id();
        let context = self.context.clone();
        let active = Arc::clone(&self.active);
        let live = active.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(connection = %id, live, "spawning connection task");

        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, id, peer, context).await {
                warn!(connection = %id, peer = %peer, error = ?err, "connection closed with error");
            }
            active.fetch_sub(1, Ordering::Relaxed);
        });
    }
}
