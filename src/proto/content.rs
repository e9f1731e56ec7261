//! Message content and UI affordances.
//!
//! A [`TelegramMessage`] carries at most one [`Content`] variant, an optional
//! [`InlineKeyboard`] and an optional chat [`Action`]. Content and action are
//! independent: an action-only message (e.g. "typing") is a valid status
//! update, and an action may precede the message that delivers content.
//!
//! Binary payloads are opaque octets. No size limit is enforced here; that
//! belongs to the transport boundary (`server.max_frame_bytes`).

use crate::error::{AgentError, Result};

// ---------------------------------------------------------------------------
// Content variants
// ---------------------------------------------------------------------------

/// Plain text payload.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Text {
    #[prost(string, tag = "1")]
    pub text: String,
}

/// Image payload with optional caption.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Image {
    #[prost(bytes = "vec", tag = "1")]
    pub data: Vec<u8>,
    #[prost(string, optional, tag = "2")]
    pub caption: Option<String>,
    #[prost(string, optional, tag = "3")]
    pub filename: Option<String>,
}

/// Video payload with optional caption.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Video {
    #[prost(bytes = "vec", tag = "1")]
    pub data: Vec<u8>,
    #[prost(string, optional, tag = "2")]
    pub caption: Option<String>,
    #[prost(string, optional, tag = "3")]
    pub filename: Option<String>,
}

/// Audio payload.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Audio {
    #[prost(bytes = "vec", tag = "1")]
    pub data: Vec<u8>,
    #[prost(string, optional, tag = "2")]
    pub filename: Option<String>,
}

/// Generic file payload.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Document {
    #[prost(bytes = "vec", tag = "1")]
    pub data: Vec<u8>,
    #[prost(string, optional, tag = "2")]
    pub filename: Option<String>,
}

/// Geographic point.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Location {
    #[prost(double, tag = "1")]
    pub latitude: f64,
    #[prost(double, tag = "2")]
    pub longitude: f64,
}

/// Exactly one payload kind. Encoded as a protobuf `oneof`, so a decoded
/// message can never carry two variants at once.
#[derive(Clone, PartialEq, prost::Oneof)]
pub enum Content {
    #[prost(message, tag = "2")]
    Text(Text),
    #[prost(message, tag = "3")]
    Image(Image),
    #[prost(message, tag = "4")]
    Video(Video),
    #[prost(message, tag = "5")]
    Audio(Audio),
    #[prost(message, tag = "6")]
    Document(Document),
    #[prost(message, tag = "7")]
    Location(Location),
}

impl Content {
    /// Short lowercase name of the variant, used in logs and as the
    /// default pricing key by the sample agent.
    pub fn kind(&self) -> &'static str {
        match self {
            Content::Text(_) => "text",
            Content::Image(_) => "image",
            Content::Video(_) => "video",
            Content::Audio(_) => "audio",
            Content::Document(_) => "document",
            Content::Location(_) => "location",
        }
    }

    /// Size of the binary payload, or the text length for text content.
    pub fn payload_len(&self) -> usize {
        match self {
            Content::Text(t) => t.text.len(),
            Content::Image(i) => i.data.len(),
            Content::Video(v) => v.data.len(),
            Content::Audio(a) => a.data.len(),
            Content::Document(d) => d.data.len(),
            Content::Location(_) => 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Chat actions
// ---------------------------------------------------------------------------

/// Chat status indicator shown to the user while work is in progress.
///
/// Absent or unrecognised wire values read back as `UnknownAction`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum Action {
    UnknownAction = 0,
    Typing = 1,
    UploadingPhoto = 2,
    UploadingVideo = 3,
    UploadingDocument = 4,
    UploadingAudio = 5,
    RecordingVideo = 6,
    RecordingAudio = 7,
    UploadingAnimation = 8,
}

impl Action {
    /// Wire name as listed in the protocol definition.
    pub fn as_str_name(&self) -> &'static str {
        match self {
            Action::UnknownAction => "UNKNOWN_ACTION",
            Action::Typing => "TYPING",
            Action::UploadingPhoto => "UPLOADING_PHOTO",
            Action::UploadingVideo => "UPLOADING_VIDEO",
            Action::UploadingDocument => "UPLOADING_DOCUMENT",
            Action::UploadingAudio => "UPLOADING_AUDIO",
            Action::RecordingVideo => "RECORDING_VIDEO",
            Action::RecordingAudio => "RECORDING_AUDIO",
            Action::UploadingAnimation => "UPLOADING_ANIMATION",
        }
    }

    /// Parse a wire name. Unknown names map to `UnknownAction`.
    pub fn from_str_name(value: &str) -> Self {
        match value {
            "TYPING" => Action::Typing,
            "UPLOADING_PHOTO" => Action::UploadingPhoto,
            "UPLOADING_VIDEO" => Action::UploadingVideo,
            "UPLOADING_DOCUMENT" => Action::UploadingDocument,
            "UPLOADING_AUDIO" => Action::UploadingAudio,
            "RECORDING_VIDEO" => Action::RecordingVideo,
            "RECORDING_AUDIO" => Action::RecordingAudio,
            "UPLOADING_ANIMATION" => Action::UploadingAnimation,
            _ => Action::UnknownAction,
        }
    }
}

// ---------------------------------------------------------------------------
// Inline keyboards
// ---------------------------------------------------------------------------

/// What a button does when pressed.
#[derive(Clone, PartialEq, prost::Oneof)]
pub enum ButtonAction {
    /// Data echoed back to the agent in a `CallbackQuery`
    #[prost(string, tag = "2")]
    CallbackData(String),
    /// Link opened by the client
    #[prost(string, tag = "3")]
    Url(String),
}

/// A single keyboard button.
#[derive(Clone, PartialEq, prost::Message)]
pub struct InlineKeyboardButton {
    #[prost(string, tag = "1")]
    pub text: String,
    #[prost(oneof = "ButtonAction", tags = "2, 3")]
    pub action: Option<ButtonAction>,
}

impl InlineKeyboardButton {
    /// Button that sends `data` back as a callback query.
    pub fn callback(text: &str, data: &str) -> Self {
        Self {
            text: text.to_string(),
            action: Some(ButtonAction::CallbackData(data.to_string())),
        }
    }

    /// Button that opens `url`.
    pub fn url(text: &str, url: &str) -> Self {
        Self {
            text: text.to_string(),
            action: Some(ButtonAction::Url(url.to_string())),
        }
    }

    /// The callback data, if this is a callback button.
    pub fn callback_data(&self) -> Option<&str> {
        match &self.action {
            Some(ButtonAction::CallbackData(data)) => Some(data),
            _ => None,
        }
    }
}

/// One horizontal row of buttons, rendered left to right.
#[derive(Clone, PartialEq, prost::Message)]
pub struct KeyboardRow {
    #[prost(message, repeated, tag = "1")]
    pub buttons: Vec<InlineKeyboardButton>,
}

/// Rows of buttons rendered top to bottom. Order is significant.
#[derive(Clone, PartialEq, prost::Message)]
pub struct InlineKeyboard {
    #[prost(message, repeated, tag = "1")]
    pub rows: Vec<KeyboardRow>,
}

impl InlineKeyboard {
    /// Creates an empty keyboard.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a row (builder pattern).
    pub fn row(mut self, buttons: Vec<InlineKeyboardButton>) -> Self {
        self.rows.push(KeyboardRow { buttons });
        self
    }

    /// Appends a single button as its own row (builder pattern).
    pub fn button(self, button: InlineKeyboardButton) -> Self {
        self.row(vec![button])
    }

    /// Number of rows.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Iterates over every button in render order.
    pub fn buttons(&self) -> impl Iterator<Item = &InlineKeyboardButton> {
        self.rows.iter().flat_map(|row| row.buttons.iter())
    }

    /// Every button must carry exactly one action.
    pub fn validate(&self) -> Result<()> {
        for (r, row) in self.rows.iter().enumerate() {
            for (c, button) in row.buttons.iter().enumerate() {
                if button.action.is_none() {
                    return Err(AgentError::Protocol(format!(
                        "keyboard button [{}][{}] '{}' has neither callback data nor url",
                        r, c, button.text
                    )));
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// TelegramMessage
// ---------------------------------------------------------------------------

/// A message travelling between host and agent in either direction.
#[derive(Clone, PartialEq, prost::Message)]
pub struct TelegramMessage {
    #[prost(int64, optional, tag = "1")]
    pub message_id: Option<i64>,
    #[prost(oneof = "Content", tags = "2, 3, 4, 5, 6, 7")]
    pub content: Option<Content>,
    #[prost(message, optional, tag = "8")]
    pub keyboard: Option<InlineKeyboard>,
    #[prost(enumeration = "Action", optional, tag = "9")]
    pub action: Option<i32>,
}

impl TelegramMessage {
    /// Creates a text message.
    ///
    /// # Example
    /// ```
    /// use anyagent::proto::TelegramMessage;
    ///
    /// let msg = TelegramMessage::text("Hello");
    /// assert_eq!(msg.text_content(), Some("Hello"));
    /// ```
    pub fn text(text: &str) -> Self {
        Self::with_content(Content::Text(Text {
            text: text.to_string(),
        }))
    }

    /// Creates an image message.
    pub fn image(data: Vec<u8>, caption: Option<&str>) -> Self {
        Self::with_content(Content::Image(Image {
            data,
            caption: caption.map(str::to_string),
            filename: None,
        }))
    }

    /// Creates a video message.
    pub fn video(data: Vec<u8>, caption: Option<&str>) -> Self {
        Self::with_content(Content::Video(Video {
            data,
            caption: caption.map(str::to_string),
            filename: None,
        }))
    }

    /// Creates an audio message.
    pub fn audio(data: Vec<u8>, filename: Option<&str>) -> Self {
        Self::with_content(Content::Audio(Audio {
            data,
            filename: filename.map(str::to_string),
        }))
    }

    /// Creates a document message.
    pub fn document(data: Vec<u8>, filename: Option<&str>) -> Self {
        Self::with_content(Content::Document(Document {
            data,
            filename: filename.map(str::to_string),
        }))
    }

    /// Creates a location message.
    pub fn location(latitude: f64, longitude: f64) -> Self {
        Self::with_content(Content::Location(Location {
            latitude,
            longitude,
        }))
    }

    /// Creates a status-only message carrying just a chat action.
    ///
    /// # Example
    /// ```
    /// use anyagent::proto::{Action, TelegramMessage};
    ///
    /// let msg = TelegramMessage::status(Action::Typing);
    /// assert!(msg.content.is_none());
    /// assert_eq!(msg.action(), Action::Typing);
    /// ```
    pub fn status(action: Action) -> Self {
        let mut msg = Self::default();
        msg.set_action(action);
        msg
    }

    fn with_content(content: Content) -> Self {
        Self {
            content: Some(content),
            ..Default::default()
        }
    }

    /// Attaches a keyboard (builder pattern).
    pub fn with_keyboard(mut self, keyboard: InlineKeyboard) -> Self {
        self.keyboard = Some(keyboard);
        self
    }

    /// Attaches a chat action (builder pattern).
    pub fn with_action(mut self, action: Action) -> Self {
        self.set_action(action);
        self
    }

    /// Sets the message identifier (builder pattern).
    pub fn with_message_id(mut self, id: i64) -> Self {
        self.message_id = Some(id);
        self
    }

    /// The text if this is a text message.
    pub fn text_content(&self) -> Option<&str> {
        match &self.content {
            Some(Content::Text(t)) => Some(&t.text),
            _ => None,
        }
    }

    /// Caption of an image or video, if any.
    pub fn caption(&self) -> Option<&str> {
        match &self.content {
            Some(Content::Image(i)) => i.caption.as_deref(),
            Some(Content::Video(v)) => v.caption.as_deref(),
            _ => None,
        }
    }

    /// `true` when the message carries no content (status/keyboard only).
    pub fn is_status_only(&self) -> bool {
        self.content.is_none()
    }

    /// Variant name of the content, if any.
    pub fn content_kind(&self) -> Option<&'static str> {
        self.content.as_ref().map(Content::kind)
    }

    /// Structural check: the keyboard, if present, must be well formed.
    pub fn validate(&self) -> Result<()> {
        if let Some(keyboard) = &self.keyboard {
            keyboard.validate()?;
        }
        Ok(())
    }
}
