//! Request and response envelopes.
//!
//! Envelopes are plain data. An absent optional field means "not
//! applicable to this turn", never an error.

use crate::error::{AgentError, Result};

use super::content::{Action, TelegramMessage};
use super::context::{Context, ContextMessage};

/// A button press: the selected callback data plus the message the keyboard
/// was attached to. The original message is a back-reference for lookup only.
#[derive(Clone, PartialEq, prost::Message)]
pub struct CallbackQuery {
    #[prost(string, tag = "1")]
    pub callback_data: String,
    #[prost(message, optional, tag = "2")]
    pub original_message: Option<TelegramMessage>,
}

/// A reply to an earlier message. `original_message` is a back-reference.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ReplyMessage {
    #[prost(message, optional, tag = "1")]
    pub original_message: Option<TelegramMessage>,
}

/// A cost declared by the agent for the current turn.
///
/// `key` must match a pricing key in the host's billing configuration; the
/// protocol itself does not check it. Quantity 0 is informational only.
#[derive(Clone, PartialEq, Eq, prost::Message)]
pub struct UsagePaymentRequest {
    #[prost(string, tag = "1")]
    pub key: String,
    #[prost(int64, tag = "2")]
    pub quantity: i64,
}

impl UsagePaymentRequest {
    pub fn new(key: &str, quantity: i64) -> Self {
        Self {
            key: key.to_string(),
            quantity,
        }
    }

    /// A zero-quantity request carries no charge.
    pub fn is_informational(&self) -> bool {
        self.quantity == 0
    }

    /// Rejects negative quantities and empty keys.
    pub fn validate(&self) -> Result<()> {
        if self.key.is_empty() {
            return Err(AgentError::Protocol(
                "payment request has an empty pricing key".into(),
            ));
        }
        if self.quantity < 0 {
            return Err(AgentError::InvalidQuantity {
                key: self.key.clone(),
                quantity: self.quantity,
            });
        }
        Ok(())
    }
}

/// One inbound interaction forwarded by the host.
#[derive(Clone, PartialEq, prost::Message)]
pub struct AgentRequest {
    #[prost(message, optional, tag = "1")]
    pub telegram_message: Option<TelegramMessage>,
    #[prost(message, optional, tag = "2")]
    pub callback_query: Option<CallbackQuery>,
    #[prost(message, optional, tag = "3")]
    pub reply_message: Option<ReplyMessage>,
    #[prost(message, optional, tag = "4")]
    pub context: Option<Context>,
    /// `true` once the host has settled payment for this turn
    #[prost(bool, optional, tag = "5")]
    pub paid: Option<bool>,
    #[prost(string, optional, tag = "6")]
    pub language_code: Option<String>,
    #[prost(int64, optional, tag = "7")]
    pub user_id: Option<i64>,
}

/// The event that started a turn.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Trigger<'a> {
    Message(&'a TelegramMessage),
    Callback(&'a CallbackQuery),
    Reply(&'a ReplyMessage),
    /// Context-only or help turn
    None,
}

impl Trigger<'_> {
    pub fn kind(&self) -> &'static str {
        match self {
            Trigger::Message(_) => "message",
            Trigger::Callback(_) => "callback",
            Trigger::Reply(_) => "reply",
            Trigger::None => "none",
        }
    }
}

impl AgentRequest {
    /// Request triggered by a new inbound message.
    ///
    /// # Example
    /// ```
    /// use anyagent::proto::{AgentRequest, TelegramMessage, Trigger};
    ///
    /// let req = AgentRequest::message(TelegramMessage::text("Hello"));
    /// assert!(matches!(req.trigger(), Ok(Trigger::Message(_))));
    /// ```
    pub fn message(message: TelegramMessage) -> Self {
        Self {
            telegram_message: Some(message),
            ..Default::default()
        }
    }

    /// Request triggered by a keyboard button press.
    pub fn callback(data: &str, original: Option<TelegramMessage>) -> Self {
        Self {
            callback_query: Some(CallbackQuery {
                callback_data: data.to_string(),
                original_message: original,
            }),
            ..Default::default()
        }
    }

    /// Request triggered by a reply to `original`.
    pub fn reply(original: TelegramMessage) -> Self {
        Self {
            reply_message: Some(ReplyMessage {
                original_message: Some(original),
            }),
            ..Default::default()
        }
    }

    /// Attaches context (builder pattern).
    pub fn with_context(mut self, context: Context) -> Self {
        self.context = Some(context);
        self
    }

    /// Sets the paid flag (builder pattern).
    pub fn with_paid(mut self, paid: bool) -> Self {
        self.paid = Some(paid);
        self
    }

    /// Sets the user identifier (builder pattern).
    pub fn with_user(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Sets the language code (builder pattern).
    pub fn with_language(mut self, code: &str) -> Self {
        self.language_code = Some(code.to_string());
        self
    }

    /// `true` only when the host explicitly reported settled payment.
    pub fn is_paid(&self) -> bool {
        self.paid == Some(true)
    }

    /// The single structural trigger of this turn.
    ///
    /// More than one populated trigger is a protocol error.
    pub fn trigger(&self) -> Result<Trigger<'_>> {
        let mut found = Vec::with_capacity(1);
        if let Some(m) = &self.telegram_message {
            found.push(Trigger::Message(m));
        }
        if let Some(c) = &self.callback_query {
            found.push(Trigger::Callback(c));
        }
        if let Some(r) = &self.reply_message {
            found.push(Trigger::Reply(r));
        }
        match found.len() {
            0 => Ok(Trigger::None),
            1 => Ok(found[0]),
            _ => Err(AgentError::Protocol(format!(
                "request carries {} triggers ({}); at most one is allowed",
                found.len(),
                found
                    .iter()
                    .map(Trigger::kind)
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }

    /// Structural validation applied before any agent sees the request.
    pub fn validate(&self) -> Result<()> {
        match self.trigger()? {
            Trigger::Message(m) => m.validate(),
            Trigger::Callback(c) => match &c.original_message {
                Some(m) => m.validate(),
                None => Ok(()),
            },
            Trigger::Reply(r) => match &r.original_message {
                Some(m) => m.validate(),
                None => Ok(()),
            },
            Trigger::None => Ok(()),
        }
    }

    /// Text of the triggering message, if it is a text message.
    pub fn text(&self) -> Option<&str> {
        self.telegram_message
            .as_ref()
            .and_then(TelegramMessage::text_content)
    }

    /// Chat identifier from the context, if supplied.
    pub fn chat_id(&self) -> Option<i64> {
        self.context.as_ref().map(|c| c.chat_id)
    }
}

/// One emission from the agent. Any subset of the three fields may be set.
#[derive(Clone, PartialEq, prost::Message)]
pub struct AgentResponse {
    #[prost(message, optional, tag = "1")]
    pub telegram_message: Option<TelegramMessage>,
    #[prost(message, optional, tag = "2")]
    pub payment_request: Option<UsagePaymentRequest>,
    #[prost(message, optional, tag = "3")]
    pub memory: Option<ContextMessage>,
}

impl AgentResponse {
    /// Response delivering a message.
    pub fn message(message: TelegramMessage) -> Self {
        Self {
            telegram_message: Some(message),
            ..Default::default()
        }
    }

    /// Response delivering a text message.
    pub fn text(text: &str) -> Self {
        Self::message(TelegramMessage::text(text))
    }

    /// Response carrying only a chat action indicator.
    pub fn action(action: Action) -> Self {
        Self::message(TelegramMessage::status(action))
    }

    /// Response carrying only a payment request.
    pub fn payment(key: &str, quantity: i64) -> Self {
        Self {
            payment_request: Some(UsagePaymentRequest::new(key, quantity)),
            ..Default::default()
        }
    }

    /// Response carrying only a memory entry.
    pub fn memory(entry: ContextMessage) -> Self {
        Self {
            memory: Some(entry),
            ..Default::default()
        }
    }

    /// Adds a payment request (builder pattern).
    pub fn with_payment(mut self, key: &str, quantity: i64) -> Self {
        self.payment_request = Some(UsagePaymentRequest::new(key, quantity));
        self
    }

    /// Adds a memory entry (builder pattern).
    pub fn with_memory(mut self, entry: ContextMessage) -> Self {
        self.memory = Some(entry);
        self
    }

    /// `true` when none of the three fields is set.
    pub fn is_empty(&self) -> bool {
        self.telegram_message.is_none() && self.payment_request.is_none() && self.memory.is_none()
    }

    /// Text of the delivered message, if it is a text message.
    pub fn text_content(&self) -> Option<&str> {
        self.telegram_message
            .as_ref()
            .and_then(TelegramMessage::text_content)
    }

    /// Merges `later` into `self`, field by field. Fields set in `later`
    /// replace the ones in `self`.
    pub fn merge_from(&mut self, later: AgentResponse) {
        if later.telegram_message.is_some() {
            self.telegram_message = later.telegram_message;
        }
        if later.payment_request.is_some() {
            self.payment_request = later.payment_request;
        }
        if later.memory.is_some() {
            self.memory = later.memory;
        }
    }

    /// Structural validation of an emission.
    pub fn validate(&self) -> Result<()> {
        if let Some(msg) = &self.telegram_message {
            msg.validate()?;
        }
        if let Some(payment) = &self.payment_request {
            payment.validate()?;
        }
        Ok(())
    }
}
