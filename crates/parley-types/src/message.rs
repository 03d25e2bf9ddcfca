use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::Context;

pub const TYPE_TEXT: &str = "text/plain";
pub const TYPE_JSON: &str = "application/json";
pub const TYPE_JPEG: &str = "image/jpeg";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// A chat message flowing in from or out to a transport.
pub struct Message {
    pub body: String,
    #[serde(default = "default_mime_type")]
    pub mime_type: String,
    #[serde(default)]
    pub context: Context,
    #[serde(default)]
    pub reactions: Vec<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

fn default_mime_type() -> String {
    TYPE_TEXT.to_string()
}

impl Message {
    pub fn new(context: Context, mime_type: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            mime_type: mime_type.into(),
            context,
            reactions: Vec::new(),
            labels: BTreeMap::new(),
        }
    }

    pub fn text(context: Context, body: impl Into<String>) -> Self {
        Self::new(context, TYPE_TEXT, body)
    }

    /// Builds an outgoing reply addressed to the conversation of `context`.
    pub fn reply(context: &Context, mime_type: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(context.reply_context(), mime_type, body)
    }

    pub fn is_text(&self) -> bool {
        self.mime_type == TYPE_TEXT
    }
}
