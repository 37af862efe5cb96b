//! Client-side chat state.
//!
//! Conversations are keyed by peer id. Every mutation names the
//! conversation it touches, so a late response for a conversation that is
//! no longer open still lands in that conversation's own entries.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use pairchat_proto::message::{Message, MessageId, MessageStatus, OutgoingContent, Timestamp, UserId};
use pairchat_proto::user::User;
use uuid::Uuid;

/// Local identifier of a message that has not been persisted yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TempId(Uuid);

impl TempId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for TempId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TempId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "local-{}", self.0)
    }
}

/// A placeholder swapped for the server's record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settled {
    /// The committed record; its status is the server's.
    pub message: Message,
    /// Set when a higher status was reported while the send was in flight.
    pub hint: Option<MessageStatus>,
}

/// A message shown before the server has accepted it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMessage {
    pub temp_id: TempId,
    pub receiver_id: UserId,
    pub content: OutgoingContent,
    pub created_at: Timestamp,
    /// Highest status reported for this conversation while the send was in
    /// flight. It may stem from a view that happened before this message
    /// was stored, so it is never displayed, only used as a re-fetch hint.
    pub observed: MessageStatus,
}

impl PendingMessage {
    #[must_use]
    pub fn new(receiver_id: UserId, content: OutgoingContent) -> Self {
        Self {
            temp_id: TempId::new(),
            receiver_id,
            content,
            created_at: Timestamp::now(),
            observed: MessageStatus::Sent,
        }
    }
}

/// One row of a conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    Pending(PendingMessage),
    Committed(Message),
}

impl Entry {
    /// Status to render. Pending entries always show the lowest status.
    #[must_use]
    pub const fn status(&self) -> MessageStatus {
        match self {
            Self::Pending(_) => MessageStatus::Sent,
            Self::Committed(message) => message.status,
        }
    }

    #[must_use]
    pub const fn message_id(&self) -> Option<MessageId> {
        match self {
            Self::Pending(_) => None,
            Self::Committed(message) => Some(message.id),
        }
    }

    #[must_use]
    pub fn temp_id(&self) -> Option<TempId> {
        match self {
            Self::Pending(pending) => Some(pending.temp_id),
            Self::Committed(_) => None,
        }
    }

    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Pending(pending) => pending.content.text.as_deref(),
            Self::Committed(message) => message.text.as_deref(),
        }
    }

    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }
}

/// Everything the client knows about its conversations and peers.
#[derive(Debug)]
pub struct ChatState {
    me: UserId,
    conversations: HashMap<UserId, Vec<Entry>>,
    open: Option<UserId>,
    unseen: HashMap<UserId, u32>,
    counted: HashSet<MessageId>,
    online: BTreeSet<UserId>,
    users: BTreeMap<UserId, User>,
}

impl ChatState {
    #[must_use]
    pub fn new(me: UserId) -> Self {
        Self {
            me,
            conversations: HashMap::new(),
            open: None,
            unseen: HashMap::new(),
            counted: HashSet::new(),
            online: BTreeSet::new(),
            users: BTreeMap::new(),
        }
    }

    #[must_use]
    pub const fn me(&self) -> &UserId {
        &self.me
    }

    // -- conversations ------------------------------------------------------

    /// Makes `peer` the open conversation and clears its unseen counter.
    pub fn open_conversation(&mut self, peer: UserId) {
        self.unseen.remove(&peer);
        self.open = Some(peer);
    }

    pub fn close_conversation(&mut self) {
        self.open = None;
    }

    #[must_use]
    pub const fn open_peer(&self) -> Option<&UserId> {
        self.open.as_ref()
    }

    #[must_use]
    pub fn is_open(&self, peer: &UserId) -> bool {
        self.open.as_ref() == Some(peer)
    }

    /// Entries of the conversation with `peer`, oldest first.
    #[must_use]
    pub fn conversation(&self, peer: &UserId) -> &[Entry] {
        self.conversations.get(peer).map_or(&[], Vec::as_slice)
    }

    /// Replaces the committed part of a conversation with fetched history.
    ///
    /// Pending entries are kept at the end. A record already known locally
    /// keeps the higher of the two statuses, and committed records missing
    /// from the fetch (they arrived after the server built it) are kept.
    pub fn load_history(&mut self, peer: &UserId, history: Vec<Message>) {
        let existing = self.conversations.remove(peer).unwrap_or_default();
        let mut known: HashMap<MessageId, MessageStatus> = HashMap::new();
        let mut late = Vec::new();
        let mut pending = Vec::new();
        for entry in existing {
            match entry {
                Entry::Committed(message) => {
                    known.insert(message.id, message.status);
                    late.push(message);
                }
                Entry::Pending(_) => pending.push(entry),
            }
        }

        let fetched: HashSet<MessageId> = history.iter().map(|m| m.id).collect();
        let mut merged: Vec<Message> = history
            .into_iter()
            .map(|mut message| {
                if let Some(local) = known.get(&message.id) {
                    message.status = message.status.max(*local);
                }
                message
            })
            .collect();
        merged.extend(late.into_iter().filter(|m| !fetched.contains(&m.id)));
        merged.sort_by_key(|m| m.created_at);

        for message in &merged {
            if message.receiver_id == self.me {
                self.counted.insert(message.id);
            }
        }

        let mut entries: Vec<Entry> = merged.into_iter().map(Entry::Committed).collect();
        entries.extend(pending);
        self.conversations.insert(peer.clone(), entries);
    }

    /// Inserts `message` into its conversation unless its id is already
    /// present. A duplicate only raises the stored status. Returns `true`
    /// if a new entry was added.
    pub fn upsert_message(&mut self, message: Message) -> bool {
        let peer = message.counterpart(&self.me).clone();
        let entries = self.conversations.entry(peer).or_default();
        if let Some(existing) = find_committed(entries, message.id) {
            if let Some(next) = existing.status.advance_to(message.status) {
                existing.status = next;
            }
            return false;
        }
        let at = entries
            .iter()
            .position(Entry::is_pending)
            .unwrap_or(entries.len());
        entries.insert(at, Entry::Committed(message));
        true
    }

    /// Raises my messages to `peer` whose status is below `target`.
    ///
    /// Pending entries to `peer` remember the status so it can be applied
    /// when they commit. Returns the number of committed entries changed.
    pub fn raise_status(&mut self, peer: &UserId, target: MessageStatus) -> usize {
        let Some(entries) = self.conversations.get_mut(peer) else {
            return 0;
        };
        let mut changed = 0;
        for entry in entries.iter_mut() {
            match entry {
                Entry::Committed(message) if message.sender_id == self.me => {
                    if let Some(next) = message.status.advance_to(target) {
                        message.status = next;
                        changed += 1;
                    }
                }
                Entry::Pending(pending) => {
                    pending.observed = pending.observed.max(target);
                }
                Entry::Committed(_) => {}
            }
        }
        changed
    }

    // -- optimistic entries -------------------------------------------------

    /// Appends a placeholder to the conversation with its receiver.
    pub fn insert_pending(&mut self, pending: PendingMessage) -> TempId {
        let temp_id = pending.temp_id;
        self.conversations
            .entry(pending.receiver_id.clone())
            .or_default()
            .push(Entry::Pending(pending));
        temp_id
    }

    /// Swaps the placeholder `temp_id` for the authoritative `message`.
    ///
    /// The placeholder is replaced in place. If an entry with the real id
    /// already exists, the placeholder is dropped instead. A status observed
    /// while pending is not applied; it comes back as [`Settled::hint`].
    /// Returns `None` if no such placeholder exists.
    pub fn commit_pending(&mut self, temp_id: TempId, message: Message) -> Option<Settled> {
        let peer = message.counterpart(&self.me).clone();
        let entries = self.conversations.get_mut(&peer)?;
        let at = entries
            .iter()
            .position(|entry| entry.temp_id() == Some(temp_id))?;
        let Entry::Pending(pending) = &entries[at] else {
            return None;
        };
        let observed = pending.observed;

        let message = if let Some(existing) = find_committed(entries, message.id) {
            existing.status = existing.status.max(message.status);
            let committed = existing.clone();
            entries.remove(at);
            committed
        } else {
            entries[at] = Entry::Committed(message.clone());
            message
        };
        let hint = (observed > message.status).then_some(observed);
        Some(Settled { message, hint })
    }

    /// Current status of message `id` in the conversation with `peer`.
    #[must_use]
    pub fn status_of(&self, peer: &UserId, id: MessageId) -> Option<MessageStatus> {
        self.conversation(peer)
            .iter()
            .find(|entry| entry.message_id() == Some(id))
            .map(Entry::status)
    }

    /// Removes the placeholder `temp_id` from the conversation with `peer`.
    pub fn discard_pending(&mut self, peer: &UserId, temp_id: TempId) -> bool {
        let Some(entries) = self.conversations.get_mut(peer) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|entry| entry.temp_id() != Some(temp_id));
        entries.len() != before
    }

    // -- unseen counters ----------------------------------------------------

    #[must_use]
    pub fn unseen(&self, peer: &UserId) -> u32 {
        self.unseen.get(peer).copied().unwrap_or(0)
    }

    /// Counts an incoming message from `message.sender_id` once per id.
    pub fn count_unseen(&mut self, message: &Message) -> u32 {
        let peer = message.sender_id.clone();
        if self.counted.insert(message.id) {
            *self.unseen.entry(peer.clone()).or_insert(0) += 1;
        }
        self.unseen(&peer)
    }

    /// Records an incoming message as already accounted for.
    pub fn mark_counted(&mut self, id: MessageId) {
        self.counted.insert(id);
    }

    // -- presence and directory ---------------------------------------------

    /// Replaces the online set wholesale.
    pub fn set_online(&mut self, online: Vec<UserId>) {
        self.online = online.into_iter().collect();
    }

    #[must_use]
    pub fn is_online(&self, user: &UserId) -> bool {
        self.online.contains(user)
    }

    pub fn online(&self) -> impl Iterator<Item = &UserId> {
        self.online.iter()
    }

    /// Replaces the directory and seeds unseen counters from the server.
    pub fn set_directory(&mut self, users: Vec<User>, unseen: HashMap<UserId, u32>) {
        self.users = users
            .into_iter()
            .filter(|user| user.id != self.me)
            .map(|user| (user.id.clone(), user))
            .collect();
        self.unseen = unseen.into_iter().filter(|(_, count)| *count > 0).collect();
        if let Some(open) = &self.open {
            self.unseen.remove(open);
        }
    }

    /// Replaces one directory entry. Profile changes to myself are ignored
    /// here; the directory only lists peers.
    pub fn upsert_user(&mut self, user: User) {
        if user.id != self.me {
            self.users.insert(user.id.clone(), user);
        }
    }

    #[must_use]
    pub fn user(&self, id: &UserId) -> Option<&User> {
        self.users.get(id)
    }

    pub fn users(&self) -> impl Iterator<Item = &User> {
        self.users.values()
    }
}

fn find_committed(entries: &mut [Entry], id: MessageId) -> Option<&mut Message> {
    entries.iter_mut().find_map(|entry| match entry {
        Entry::Committed(message) if message.id == id => Some(message),
        _ => None,
    })
}
