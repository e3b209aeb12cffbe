pub mod callbacks;
pub mod commands;
pub mod middleware;
pub mod transport;

use crate::domain::policy::Coordinates;
use crate::router::MessageRouter;
use crate::services::{FileKind, IncomingFile};
use anyhow::Result;
use std::sync::Arc;
use teloxide::dispatching::{Dispatcher, UpdateFilterExt};
use teloxide::dptree;
use teloxide::prelude::*;
use teloxide::types::{Document, Location, PhotoSize};
use teloxide::utils::command::BotCommands;
use tracing::{debug, info, warn};

pub use commands::{Command, CommandAction};
use middleware::{callback_conversation_id, conversation_id, filter_hybrid_command};

/// Handler result type
type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

pub async fn run(bot: Bot, router: Arc<MessageRouter>) -> Result<()> {
    info!("Starting Telegram Bot...");

    setup_commands(&bot).await;

    let handler_tree = build_handler_tree();

    // Updates of one chat are handled in order; different chats run concurrently
    Dispatcher::builder(bot, handler_tree)
        .dependencies(dptree::deps![router])
        .distribution_function(|update: &Update| update.chat().map(|chat| chat.id))
        .default_handler(|_| async {})
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

/// Build the update handler tree
fn build_handler_tree(
) -> teloxide::dispatching::UpdateHandler<Box<dyn std::error::Error + Send + Sync + 'static>> {
    let command_handler = Message::filter_text()
        .chain(filter_hybrid_command::<Command, HandlerResult>())
        .endpoint(handle_command);

    let text_handler = Message::filter_text().endpoint(handle_text);
    let photo_handler = Message::filter_photo().endpoint(handle_photo);
    let document_handler = Message::filter_document().endpoint(handle_document);
    let location_handler = Message::filter_location().endpoint(handle_location);

    let message_handler = Update::filter_message()
        .branch(command_handler)
        .branch(text_handler)
        .branch(photo_handler)
        .branch(document_handler)
        .branch(location_handler);

    let callback_handler = Update::filter_callback_query().endpoint(handle_callback);

    dptree::entry()
        .branch(message_handler)
        .branch(callback_handler)
}

async fn handle_command(msg: Message, cmd: Command, router: Arc<MessageRouter>) -> HandlerResult {
    let id = conversation_id(&msg);
    info!("Command {:?} from {}", cmd, id);

    match cmd.action() {
        CommandAction::Menu => router.show_main_menu(&id).await,
        CommandAction::Help => router.show_help(&id, Command::descriptions().to_string()).await,
        CommandAction::Cancel => router.cancel_all(&id).await,
        CommandAction::Start(flow, args) => {
            router.start_flow(flow, &id, args).await;
        }
    }
    Ok(())
}

async fn handle_text(msg: Message, text: String, router: Arc<MessageRouter>) -> HandlerResult {
    let id = conversation_id(&msg);
    if !router.route_text(&id, &text).await {
        debug!("No flow waiting for text from {}", id);
    }
    Ok(())
}

async fn handle_photo(
    msg: Message,
    photos: Vec<PhotoSize>,
    router: Arc<MessageRouter>,
) -> HandlerResult {
    let id = conversation_id(&msg);
    // Telegram sends every resolution; keep the largest
    let Some(largest) = photos.iter().max_by_key(|p| p.width * p.height) else {
        return Ok(());
    };

    let photo = IncomingFile {
        file_id: largest.file.id.0.clone(),
        file_name: None,
        mime_type: None,
        size: Some(u64::from(largest.file.size)),
        kind: FileKind::Photo,
    };
    if !router.route_photo(&id, &photo).await {
        debug!("Ignoring unsolicited photo from {}", id);
    }
    Ok(())
}

async fn handle_document(
    msg: Message,
    document: Document,
    router: Arc<MessageRouter>,
) -> HandlerResult {
    let id = conversation_id(&msg);
    let file = IncomingFile {
        file_id: document.file.id.0.clone(),
        file_name: document.file_name.clone(),
        mime_type: document.mime_type.as_ref().map(|mime| mime.to_string()),
        size: Some(u64::from(document.file.size)),
        kind: FileKind::Document,
    };
    if !router.route_document(&id, &file).await {
        debug!("Ignoring unsolicited document from {}", id);
    }
    Ok(())
}

async fn handle_location(
    msg: Message,
    location: Location,
    router: Arc<MessageRouter>,
) -> HandlerResult {
    let id = conversation_id(&msg);
    let at = Coordinates {
        lat: location.latitude,
        lon: location.longitude,
    };
    if !router.route_location(&id, at).await {
        debug!("Ignoring unsolicited location from {}", id);
    }
    Ok(())
}

async fn handle_callback(q: CallbackQuery, router: Arc<MessageRouter>) -> HandlerResult {
    let Some(id) = callback_conversation_id(&q) else {
        warn!("Callback {} without an accessible message", q.id.0);
        return Ok(());
    };
    let data = q.data.as_deref().unwrap_or_default();
    router.route_callback(&id, &q.id.0, data).await;
    Ok(())
}

/// Register the command list shown by Telegram clients
async fn setup_commands(bot: &Bot) {
    if let Err(e) = bot.set_my_commands(Command::bot_commands()).await {
        warn!("Failed to set commands: {:#}", e);
    } else {
        info!("✅ Commands registered");
    }
}
