use crate::state::ConversationId;
use teloxide::dispatching::DpHandlerDescription;
use teloxide::dptree::{self, Handler};
use teloxide::prelude::*;
use teloxide::types::Me;
use teloxide::utils::command::BotCommands;

// ============================================================================
// Conversation identity
// ============================================================================

/// Forum topic of a message. Replies in ordinary groups also carry a
/// thread id, which is not a separate conversation.
fn topic_of(msg: &Message) -> Option<i32> {
    msg.thread_id
        .filter(|_| msg.is_topic_message)
        .map(|thread| thread.0 .0)
}

/// Identity of the conversation a message belongs to.
pub fn conversation_id(msg: &Message) -> ConversationId {
    ConversationId::new(
        msg.chat.id.0,
        topic_of(msg),
        msg.from.as_ref().map(|user| user.id.0),
    )
}

/// Identity of a button press: the chat and topic of the message holding
/// the button, and the user who pressed it.
pub fn callback_conversation_id(q: &CallbackQuery) -> Option<ConversationId> {
    let msg = q.regular_message()?;
    Some(ConversationId::new(
        msg.chat.id.0,
        topic_of(msg),
        Some(q.from.id.0),
    ))
}

// ============================================================================
// Message filters
// ============================================================================

/// Hybrid command filter
///
/// - **Private chats**: accept `/cmd` and `/cmd@bot`
/// - **Groups**: accept only `/cmd@bot`
///
/// **Requires:** `Message`, `Me`, `String` (message text)
///
/// **Injects:** `C`, the parsed command
#[must_use]
pub fn filter_hybrid_command<C, Output>() -> Handler<'static, Output, DpHandlerDescription>
where
    C: BotCommands + Send + Sync + 'static,
    Output: Send + Sync + 'static,
{
    dptree::filter_map(move |message: Message, me: Me, text: String| {
        let bot_name = me.user.username.as_deref()?;

        let cmd = C::parse(&text, bot_name).ok()?;

        if message.chat.is_private() {
            return Some(cmd);
        }

        // A bare `/start` also parses with an empty bot name; `/start@bot` does not
        let is_bare_command = C::parse(&text, "").is_ok();
        (!is_bare_command).then_some(cmd)
    })
}
