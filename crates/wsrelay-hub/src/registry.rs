//! Session registry: which connections share a hub.
//!
//! Keyed by [`SessionKey`]; each entry holds the current members in join
//! order. Sessions exist only while they have members: the last unregister
//! prunes the entry, so an emptied session is indistinguishable from one
//! that never existed.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use wsrelay_core::{ConnectionId, Message, SessionKey};

use crate::mailbox::{PostOutcome, Postbox};

/// A registered connection: its id plus the handle used to reach it.
#[derive(Clone, Debug)]
pub struct Member {
    id: ConnectionId,
    postbox: Postbox,
}

impl Member {
    /// Pair an id with its mailbox handle.
    pub fn new(id: ConnectionId, postbox: Postbox) -> Self {
        Self { id, postbox }
    }

    /// Connection id.
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Queue a message for this member without waiting.
    pub fn post(&self, message: Message) -> PostOutcome {
        self.postbox.post(message)
    }
}

/// Concurrent map from session key to member set.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionKey, Vec<Member>>,
}

impl SessionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a member to a session, creating the session if needed.
    ///
    /// Returns `false` if a member with the same id is already present.
    pub fn register(&self, session: &SessionKey, member: Member) -> bool {
        match self.sessions.entry(session.clone()) {
            Entry::Occupied(mut entry) => {
                let members = entry.get_mut();
                if members.iter().any(|m| m.id == member.id) {
                    return false;
                }
                members.push(member);
                true
            }
            Entry::Vacant(entry) => {
                let _ = entry.insert(vec![member]);
                true
            }
        }
    }

    /// Remove a member. Prunes the session when it becomes empty.
    ///
    /// Idempotent: returns `true` only for the call that actually removed it.
    pub fn unregister(&self, session: &SessionKey, id: &ConnectionId) -> bool {
        let removed = match self.sessions.get_mut(session) {
            Some(mut members) => {
                let before = members.len();
                members.retain(|m| &m.id != id);
                members.len() != before
            }
            None => false,
        };
        // The shard lock from get_mut is released above; remove_if re-checks
        // emptiness under its own lock, so a concurrent register wins.
        let _ = self.sessions.remove_if(session, |_, members| members.is_empty());
        removed
    }

    /// Snapshot of every member of `session` except `exclude`, in join order.
    ///
    /// The snapshot is detached from the registry: joins and leaves that
    /// happen while the caller iterates are not observed.
    pub fn members_excluding(&self, session: &SessionKey, exclude: &ConnectionId) -> Vec<Member> {
        self.sessions
            .get(session)
            .map(|members| {
                members
                    .iter()
                    .filter(|m| &m.id != exclude)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of members in a session (0 if it does not exist).
    pub fn member_count(&self, session: &SessionKey) -> usize {
        self.sessions.get(session).map_or(0, |m| m.len())
    }

    /// Whether a session currently exists.
    pub fn contains_session(&self, session: &SessionKey) -> bool {
        self.sessions.contains_key(session)
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Number of registered connections across all sessions.
    pub fn connection_count(&self) -> usize {
        self.sessions.iter().map(|entry| entry.value().len()).sum()
    }
}
