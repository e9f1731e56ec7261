//! Echo agent: mirrors whatever it receives.
//!
//! Used by the CLI `serve` command and the test suite. Each content kind
//! is priced under its own key (`text`, `image`, ...) through a
//! [`PaymentGate`].

use async_trait::async_trait;
use tracing::debug;

use crate::error::Result;
use crate::payment::PaymentGate;
use crate::proto::{
    Action, AgentRequest, AgentResponse, CallbackQuery, Content, ContextMessage, InlineKeyboard,
    InlineKeyboardButton, ReplyMessage, Role, TelegramMessage, Trigger,
};
use crate::session::{Agent, Emitter};

const HELP_TEXT: &str = "I echo back whatever you send me: text, photos, videos, \
audio, documents and locations. Tap Stats to see what I remember about this chat.";

/// Callback data of the stats button.
pub const STATS_CALLBACK: &str = "stats";
/// Callback data of the help button.
pub const HELP_CALLBACK: &str = "help";

#[derive(Default)]
pub struct EchoAgent {
    gate: PaymentGate,
}

impl EchoAgent {
    pub fn new(gate: PaymentGate) -> Self {
        Self { gate }
    }

    fn menu() -> InlineKeyboard {
        InlineKeyboard::new().row(vec![
            InlineKeyboardButton::callback("Stats", STATS_CALLBACK),
            InlineKeyboardButton::callback("Help", HELP_CALLBACK),
        ])
    }

    async fn on_message(
        &self,
        request: &AgentRequest,
        message: &TelegramMessage,
        emitter: &Emitter,
    ) -> Result<()> {
        let Some(content) = &message.content else {
            debug!("Status-only message, nothing to echo");
            return Ok(());
        };

        let key = content.kind();
        if !self.gate.settle(request, key, emitter).await? {
            let price = self.gate.prices().price(key).unwrap_or_default();
            return emitter
                .text(&format!(
                    "This {} costs {} credits. Send it again once payment is settled.",
                    key, price
                ))
                .await;
        }

        match content {
            Content::Text(text) => {
                let reply = format!("Echo: {}", text.text);
                let memory = ContextMessage::assistant(&reply);
                emitter
                    .emit(AgentResponse::text(&reply).with_memory(memory))
                    .await
            }
            Content::Location(_) => emitter.message(echo_of(content)).await,
            media => {
                emitter.action(upload_action(media)).await?;
                emitter.message(echo_of(media)).await
            }
        }
    }

    async fn on_callback(
        &self,
        request: &AgentRequest,
        query: &CallbackQuery,
        emitter: &Emitter,
    ) -> Result<()> {
        match query.callback_data.as_str() {
            STATS_CALLBACK => {
                let (total, assistant) = request
                    .context
                    .as_ref()
                    .map(|ctx| {
                        let assistant = ctx
                            .messages
                            .iter()
                            .filter(|m| m.role_kind() == Some(Role::Assistant))
                            .count();
                        (ctx.len(), assistant)
                    })
                    .unwrap_or((0, 0));
                let text = format!(
                    "Stats: {} messages in this chat, {} of them mine.",
                    total, assistant
                );
                emitter
                    .message(TelegramMessage::text(&text).with_keyboard(Self::menu()))
                    .await
            }
            HELP_CALLBACK => self.help(request, emitter).await,
            other => emitter.text(&format!("Unknown button: {}", other)).await,
        }
    }

    async fn on_reply(&self, reply: &ReplyMessage, emitter: &Emitter) -> Result<()> {
        let quoted = match &reply.original_message {
            Some(original) => match (original.text_content(), original.content_kind()) {
                (Some(text), _) => text.to_string(),
                (None, Some(kind)) => format!("[{}]", kind),
                (None, None) => "an empty message".to_string(),
            },
            None => "an unknown message".to_string(),
        };
        emitter.text(&format!("You replied to: {}", quoted)).await
    }
}

fn upload_action(content: &Content) -> Action {
    match content {
        Content::Image(_) => Action::UploadingPhoto,
        Content::Video(_) => Action::UploadingVideo,
        Content::Audio(_) => Action::UploadingAudio,
        Content::Document(_) => Action::UploadingDocument,
        Content::Text(_) | Content::Location(_) => Action::Typing,
    }
}

/// A fresh message carrying a copy of `content`.
fn echo_of(content: &Content) -> TelegramMessage {
    TelegramMessage {
        content: Some(content.clone()),
        ..Default::default()
    }
}

#[async_trait]
impl Agent for EchoAgent {
    fn name(&self) -> &str {
        "echo"
    }

    async fn help(&self, _request: &AgentRequest, emitter: &Emitter) -> Result<()> {
        emitter
            .message(TelegramMessage::text(HELP_TEXT).with_keyboard(Self::menu()))
            .await
    }

    async fn execute(&self, request: &AgentRequest, emitter: &Emitter) -> Result<()> {
        match request.trigger()? {
            Trigger::Message(message) => self.on_message(request, message, emitter).await,
            Trigger::Callback(query) => self.on_callback(request, query, emitter).await,
            Trigger::Reply(reply) => self.on_reply(reply, emitter).await,
            Trigger::None => Ok(()),
        }
    }
}
