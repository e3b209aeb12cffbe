//! Conversation identity and the keys derived from it.

use std::fmt;

/// Who is talking, and where: a chat, an optional forum topic and an optional user.
///
/// A missing thread is a different conversation from thread `0`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConversationId {
    pub chat_id: i64,
    pub thread_id: Option<i32>,
    pub user_id: Option<u64>,
}

impl ConversationId {
    pub fn new(chat_id: i64, thread_id: Option<i32>, user_id: Option<u64>) -> Self {
        Self {
            chat_id,
            thread_id,
            user_id,
        }
    }

    /// Key shared by everyone in the same chat topic.
    pub fn thread_key(&self) -> StateKey {
        StateKey {
            chat_id: self.chat_id,
            thread_id: self.thread_id,
            user_id: None,
        }
    }

    /// Key private to one user inside one chat topic.
    pub fn user_key(&self) -> StateKey {
        StateKey {
            chat_id: self.chat_id,
            thread_id: self.thread_id,
            user_id: self.user_id,
        }
    }

    pub fn key(&self, scope: KeyScope) -> StateKey {
        match scope {
            KeyScope::Thread => self.thread_key(),
            KeyScope::User => self.user_key(),
        }
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.user_key().fmt(f)
    }
}

/// How much of the identity a state map keys on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyScope {
    Thread,
    User,
}

/// Internal map key.
///
/// A tuple of optional components rather than a formatted string, so
/// `None` and `Some(0)` can never collide.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StateKey {
    chat_id: i64,
    thread_id: Option<i32>,
    user_id: Option<u64>,
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.chat_id)?;
        match self.thread_id {
            Some(thread) => write!(f, "{}", thread)?,
            None => f.write_str("-")?,
        }
        f.write_str("|")?;
        match self.user_id {
            Some(user) => write!(f, "{}", user),
            None => f.write_str("-"),
        }
    }
}
