//! Session commands: lines that start with [`PREFIX`].
//!
//! Commands are the only lines that can change a session's identity.
//! Everything else is a payload line and goes to [`crate::reply`].

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::{
    password::{PasswordError, PasswordHasher},
    session::{Session, SessionUser},
    store::{CredentialStore, StoreError, User, run_blocking},
};

/// Marks a line as a command when it starts the first token.
pub const PREFIX: char = '/';

/// Returns true if a trimmed line should be routed to the dispatcher.
pub fn is_command(line: &str) -> bool {
    line.starts_with(PREFIX)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Register { name: String, password: String },
    Login { name: String, password: String },
    List,
}

impl Command {
    /// Parses a trimmed command line such as `/login alice secret`.
    ///
    /// `setname` and `connect` are accepted as aliases of `register` and
    /// `login`. `list` ignores any trailing tokens.
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some((&first, args)) = parts.split_first() else {
            return Err(CommandError::Unknown(String::new()));
        };
        let name = first.strip_prefix(PREFIX).unwrap_or(first);

        match (name, args) {
            ("register" | "setname", [user, password]) => Ok(Command::Register {
                name: user.to_string(),
                password: password.to_string(),
            }),
            ("login" | "connect", [user, password]) => Ok(Command::Login {
                name: user.to_string(),
                password: password.to_string(),
            }),
            ("register" | "setname" | "login" | "connect", _) => Err(CommandError::Usage {
                command: name.to_string(),
            }),
            ("list", _) => Ok(Command::List),
            (other, _) => Err(CommandError::Unknown(other.to_string())),
        }
    }
}

/// Failures reported to the client as `ERR: <display>`.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("usage: /{command} <name> <password>")]
    Usage { command: String },
    #[error("unknown command: {0}")]
    Unknown(String),
    #[error("name already taken")]
    NameTaken,
    #[error("no such user")]
    NoSuchUser,
    #[error("invalid password")]
    InvalidPassword,
    #[error("internal error")]
    Storage(#[source] StoreError),
    #[error("internal error")]
    Hashing(#[from] PasswordError),
}

impl CommandError {
    /// Server-side faults, as opposed to mistakes made by the client.
    pub fn is_internal(&self) -> bool {
        matches!(self, CommandError::Storage(_) | CommandError::Hashing(_))
    }
}

impl From<StoreError> for CommandError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NameTaken => CommandError::NameTaken,
            StoreError::NotFound => CommandError::NoSuchUser,
            other => CommandError::Storage(other),
        }
    }
}

/// Executes commands against the credential store on behalf of one session.
///
/// Cloned into every connection; the session itself is passed in by the
/// connection that owns it.
#[derive(Clone)]
pub struct Dispatcher {
    credentials: Arc<dyn CredentialStore>,
    hasher: PasswordHasher,
}

impl Dispatcher {
    pub fn new(credentials: Arc<dyn CredentialStore>, hasher: PasswordHasher) -> Self {
        Self {
            credentials,
            hasher,
        }
    }

    /// Parses and executes one command line, returning the success reply.
    pub async fn dispatch(&self, line: &str, session: &mut Session) -> Result<String, CommandError> {
        let command = Command::parse(line)?;
        self.execute(command, session).await
    }

    pub async fn execute(
        &self,
        command: Command,
        session: &mut Session,
    ) -> Result<String, CommandError> {
        match command {
            Command::Register { name, password } => self.register(name, password, session).await,
            Command::Login { name, password } => self.login(name, password, session).await,
            Command::List => self.list(session).await,
        }
    }

    async fn register(
        &self,
        name: String,
        password: String,
        session: &mut Session,
    ) -> Result<String, CommandError> {
        let credentials = Arc::clone(&self.credentials);
        let hasher = self.hasher;

        let user =
            run_blocking(move || Ok(create_user(credentials.as_ref(), hasher, &name, &password)))
                .await??;

        info!(connection = %session.id(), user = %user.name, "user registered");
        session.bind(SessionUser::from(&user));
        Ok(format!("OK: registered and logged in as {}", user.name))
    }

    async fn login(
        &self,
        name: String,
        password: String,
        session: &mut Session,
    ) -> Result<String, CommandError> {
        let credentials = Arc::clone(&self.credentials);
        let hasher = self.hasher;

        let user =
            run_blocking(move || Ok(verify_user(credentials.as_ref(), hasher, &name, &password)))
                .await??;

        info!(connection = %session.id(), user = %user.name, "user logged in");
        session.bind(SessionUser::from(&user));
        Ok(format!("OK: logged in as {}", user.name))
    }

    async fn list(&self, session: &Session) -> Result<String, CommandError> {
        let credentials = Arc::clone(&self.credentials);
        let users = run_blocking(move || credentials.list_all()).await?;

        let own_id = session.user().map(|user| user.id);
        let others: Vec<String> = users
            .into_iter()
            .filter(|user| Some(user.id) != own_id)
            .map(|user| user.name)
            .collect();

        if others.is_empty() {
            Ok("(no other users)".to_string())
        } else {
            Ok(others.join(", "))
        }
    }
}

// Both run on the blocking pool: they hit the store and hash passwords.
fn create_user(
    credentials: &dyn CredentialStore,
    hasher: PasswordHasher,
    name: &str,
    password: &str,
) -> Result<User, CommandError> {
    match credentials.find_by_name(name) {
        Ok(_) => return Err(CommandError::NameTaken),
        Err(StoreError::NotFound) => {}
        Err(err) => return Err(CommandError::Storage(err)),
    }
    let hash = hasher.hash(password)?;
    Ok(credentials.create(name, &hash)?)
}

fn verify_user(
    credentials: &dyn CredentialStore,
    hasher: PasswordHasher,
    name: &str,
    password: &str,
) -> Result<User, CommandError> {
    let user = credentials.find_by_name(name)?;
    if hasher.verify(password, &user.password_hash)? {
        Ok(user)
    } else {
        Err(CommandError::InvalidPassword)
    }
}
