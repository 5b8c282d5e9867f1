//! Per-connection authentication state.

use std::fmt;

use crate::store::{Author, User, UserId};

/// Identifier handed out by the listener for each accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The identity bound to a session after register or login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUser {
    pub id: UserId,
    pub name: String,
}

impl From<&User> for SessionUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
        }
    }
}

/// State owned by exactly one connection task.
///
/// Starts unauthenticated. A successful register or login binds a user,
/// and a later one replaces it; there is no way back to anonymous.
#[derive(Debug)]
pub struct Session {
    id: ConnectionId,
    peer: String,
    user: Option<SessionUser>,
}

impl Session {
    pub fn new(id: ConnectionId, peer: impl Into<String>) -> Self {
        Self {
            id,
            peer: peer.into(),
            user: None,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Remote endpoint of the connection, used as origin for chat records.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn user(&self) -> Option<&SessionUser> {
        self.user.as_ref()
    }

    pub fn bind(&mut self, user: SessionUser) {
        self.user = Some(user);
    }

    /// Name shown in logs and history: the user name, else the peer address.
    pub fn display_name(&self) -> &str {
        match &self.user {
            Some(user) => &user.name,
            None => &self.peer,
        }
    }

    /// Author to stamp on chat records sent right now.
    pub fn author(&self) -> Option<Author> {
        self.user.as_ref().map(|user| Author {
            id: user.id,
            name: user.name.clone(),
        })
    }
}
