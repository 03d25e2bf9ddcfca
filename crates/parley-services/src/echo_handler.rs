use async_trait::async_trait;
use parley_bus::{BusHandle, Handler, HandlerRoute};
use parley_types::{BusResult, Command, CommandVerb, Message, TYPE_TEXT};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EchoHandlerConfig {
    pub id: String,
}

/// Replies with the command's `body` values joined by spaces.
pub struct EchoHandler {
    id: String,
    routes: Vec<HandlerRoute>,
}

impl EchoHandler {
    pub fn new(config: &EchoHandlerConfig) -> Self {
        Self {
            id: config.id.clone(),
            routes: vec![HandlerRoute::new("echo", CommandVerb::Create)
                .with_help("repeat the message body back")],
        }
    }
}

#[async_trait]
impl Handler for EchoHandler {
    fn id(&self) -> &str {
        &self.id
    }

    fn routes(&self) -> &[HandlerRoute] {
        &self.routes
    }

    async fn handle(
        &self,
        _route: &HandlerRoute,
        command: &Command,
        bus: &BusHandle,
    ) -> BusResult<bool> {
        let body = command.get("body").join(" ");
        bus.send(Message::reply(&command.context, TYPE_TEXT, body))?;
        Ok(true)
    }
}
