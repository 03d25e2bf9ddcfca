use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
/// Identity of a single conversation turn.
///
/// A context is fixed for the lifetime of the turn it describes; replies and
/// completed commands derive new contexts instead of mutating this one.
pub struct Context {
    pub uid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub channel: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread: Option<String>,
    /// Id of the transport the turn arrived on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Id of the parser that produced the command carrying this context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parser: Option<String>,
    #[serde(default)]
    pub grants: Vec<String>,
}

impl Context {
    pub fn new(uid: impl Into<String>, name: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            name: name.into(),
            channel: channel.into(),
            ..Self::default()
        }
    }

    pub fn with_thread(mut self, thread: impl Into<String>) -> Self {
        self.thread = Some(thread.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_parser(mut self, parser: impl Into<String>) -> Self {
        self.parser = Some(parser.into());
        self
    }

    pub fn with_grants<I, S>(mut self, grants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.grants = grants.into_iter().map(Into::into).collect();
        self
    }

    /// Context used for messages sent back to the same conversation.
    pub fn reply_context(&self) -> Self {
        Self {
            parser: None,
            ..self.clone()
        }
    }

    /// Key that scopes pending completions to one user in one conversation.
    pub fn completion_key(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.source.as_deref().unwrap_or_default(),
            self.channel,
            self.thread.as_deref().unwrap_or_default(),
            self.uid
        )
    }
}
