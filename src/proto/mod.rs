//! Protocol data model
//!
//! Every type here is a protobuf message derived with `prost`, so the same
//! structs are used in memory and on the wire. Optional scalars use proto3
//! `optional` for explicit presence; content and button actions are
//! `oneof`s and therefore sum types in Rust.
//!
//! ```text
//! AgentRequest ──┬── telegram_message ─┐
//!                ├── callback_query ───┼── at most one trigger
//!                ├── reply_message ────┘
//!                ├── context (history + metadata)
//!                └── paid / language_code / user_id
//!
//! AgentResponse ─┬── telegram_message   (deliver to user)
//!                ├── payment_request    (charge via host ledger)
//!                └── memory             (append to host context store)
//! ```

pub mod content;
pub mod context;
pub mod envelope;
pub mod json;

pub use content::{
    Action, Audio, ButtonAction, Content, Document, Image, InlineKeyboard, InlineKeyboardButton,
    KeyboardRow, Location, TelegramMessage, Text, Video,
};
pub use context::{Context, ContextMessage, Role};
pub use envelope::{
    AgentRequest, AgentResponse, CallbackQuery, ReplyMessage, Trigger, UsagePaymentRequest,
};
