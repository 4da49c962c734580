//! Outbound rendering of a relayed message.
//!
//! The template is parsed visually by people reading the destination
//! channels; section order and the `**` markers must stay as they are.

use crate::media::MediaHandle;
use crate::platform::{ChatInfo, InboundMessage, Sender};

const BANNER: &str = "📢 **New Job post Found!** 📢";
const DIVIDER: &str = "--------------------------------------";
const VIEW_ORIGINAL: &str = "Click here to view the original message";

/// Width of the "-100" prefix Telegram puts in front of supergroup and
/// channel ids. `t.me/c/` links take the id without it.
const PRIVATE_ID_PREFIX_LEN: usize = 4;

/// A fully composed outbound message, consumed by the dispatcher.
#[derive(Debug)]
pub struct RenderedMessage {
    pub text: String,
    pub media: Option<MediaHandle>,
}

/// Sender as a markdown link to their public profile, or name and numeric id.
pub fn display_name(sender: &Sender) -> String {
    match &sender.handle {
        Some(handle) => format!("[{}](https://t.me/{})", sender.name, handle),
        None => format!("{} (ID: {})", sender.name, sender.id),
    }
}

/// Link to the original message.
pub fn permalink(chat: &ChatInfo, message_id: i32) -> String {
    match &chat.handle {
        Some(handle) if !handle.is_empty() => format!("https://t.me/{}/{}", handle, message_id),
        _ => {
            let id = chat.id.to_string();
            let internal = id.get(PRIVATE_ID_PREFIX_LEN..).unwrap_or("");
            format!("https://t.me/c/{}/{}", internal, message_id)
        }
    }
}

/// Compose the outbound text. Deterministic for a given input.
pub fn format_message(inbound: &InboundMessage, sender: &Sender, highlighted: &str) -> String {
    let link = permalink(&inbound.chat, inbound.message_id);
    format!(
        "{banner}\n\n\
         **Sender**: {sender}\n\
         **Channel**: [{title}]({link})\n\n\
         {divider}\n\n\
         {body}\n\n\
         {divider}\n\n\
         🔗 [{view}]({link})",
        banner = BANNER,
        sender = display_name(sender),
        title = inbound.chat.title,
        link = link,
        divider = DIVIDER,
        body = highlighted,
        view = VIEW_ORIGINAL,
    )
}
