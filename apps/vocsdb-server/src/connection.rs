//! Connection registry and session allocation (§4.5.1): `dashmap`-backed
//! concurrent maps, independent of the Entity Store's coarse lock, so a
//! slow store acquisition never head-of-line-blocks unrelated connections.

use dashmap::DashMap;
use uuid::Uuid;

pub type ConnectionId = Uuid;
pub type SessionId = Uuid;

/// One authenticated duplex channel: an identity bound to a client-id and a
/// server-issued session.
#[derive(Debug, Clone)]
pub struct Connection {
    pub user: String,
    pub client: String,
    pub session: SessionId,
}

/// Live connections and the session index, held for the lifetime of the
/// server process.
#[derive(Debug, Default)]
pub struct Registry {
    connections: DashMap<ConnectionId, Connection>,
    sessions: DashMap<SessionId, ConnectionId>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh session for `connection_id`, replacing any prior
    /// identity bound to it (a `login` issued after an earlier one).
    pub fn login(&self, connection_id: ConnectionId, user: &str, client: &str) -> SessionId {
        let session = SessionId::new_v4();
        if let Some(old) = self.connections.insert(
            connection_id,
            Connection {
                user: user.to_owned(),
                client: client.to_owned(),
                session,
            },
        ) {
            self.sessions.remove(&old.session);
        }
        self.sessions.insert(session, connection_id);
        session
    }

    /// Rebind an existing session to a new client-id on the same
    /// connection (`update_login`), without reissuing the session.
    #[must_use]
    pub fn update_login(&self, connection_id: ConnectionId, client: &str) -> bool {
        let Some(mut entry) = self.connections.get_mut(&connection_id) else {
            return false;
        };
        entry.client = client.to_owned();
        true
    }

    /// Re-associate a previously-issued `session` with `connection_id`
    /// (reconnect after a transport drop): the session id and user are
    /// unchanged, only the owning connection and client move.
    pub fn resume(&self, connection_id: ConnectionId, session: SessionId, user: &str, client: &str) {
        if let Some(old_connection_id) = self.sessions.insert(session, connection_id)
            && old_connection_id != connection_id
        {
            self.connections.remove(&old_connection_id);
        }
        self.connections.insert(
            connection_id,
            Connection {
                user: user.to_owned(),
                client: client.to_owned(),
                session,
            },
        );
    }

    /// Resolve a known session back to its connection's identity, used by
    /// the login-reuse path (§4.5: "if the session is known").
    #[must_use]
    pub fn by_session(&self, session: SessionId) -> Option<Connection> {
        let connection_id = *self.sessions.get(&session)?;
        self.connections.get(&connection_id).map(|c| c.clone())
    }

    #[must_use]
    pub fn get(&self, connection_id: ConnectionId) -> Option<Connection> {
        self.connections.get(&connection_id).map(|c| c.clone())
    }

    /// Tear down a connection and its session (`logout`, or disconnect).
    pub fn logout(&self, connection_id: ConnectionId) {
        if let Some((_, connection)) = self.connections.remove(&connection_id) {
            self.sessions.remove(&connection.session);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_allocates_session_and_is_resolvable() {
        let registry = Registry::new();
        let connection_id = ConnectionId::new_v4();
        let session = registry.login(connection_id, "alice", "phone-1");

        let via_session = registry.by_session(session).unwrap();
        assert_eq!(via_session.user, "alice");
        assert_eq!(via_session.client, "phone-1");
    }

    #[test]
    fn relogin_on_same_connection_drops_old_session() {
        let registry = Registry::new();
        let connection_id = ConnectionId::new_v4();
        let first = registry.login(connection_id, "alice", "phone-1");
        let second = registry.login(connection_id, "alice", "phone-2");

        assert!(registry.by_session(first).is_none());
        assert!(registry.by_session(second).is_some());
    }

    #[test]
    fn update_login_rebinds_client_without_new_session() {
        let registry = Registry::new();
        let connection_id = ConnectionId::new_v4();
        let session = registry.login(connection_id, "alice", "phone-1");

        assert!(registry.update_login(connection_id, "phone-2"));
        let conn = registry.get(connection_id).unwrap();
        assert_eq!(conn.session, session);
        assert_eq!(conn.client, "phone-2");
    }

    #[test]
    fn resume_moves_session_to_new_connection() {
        let registry = Registry::new();
        let first_connection = ConnectionId::new_v4();
        let session = registry.login(first_connection, "alice", "phone-1");

        let second_connection = ConnectionId::new_v4();
        registry.resume(second_connection, session, "alice", "phone-2");

        assert!(registry.get(first_connection).is_none());
        let resumed = registry.get(second_connection).unwrap();
        assert_eq!(resumed.session, session);
        assert_eq!(resumed.client, "phone-2");
    }

    #[test]
    fn logout_removes_both_entries() {
        let registry = Registry::new();
        let connection_id = ConnectionId::new_v4();
        let session = registry.login(connection_id, "alice", "phone-1");

        registry.logout(connection_id);
        assert!(registry.get(connection_id).is_none());
        assert!(registry.by_session(session).is_none());
    }
}
