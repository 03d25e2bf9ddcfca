//! Line-oriented transport over stdin/stdout or any async byte streams.

use async_trait::async_trait;
use parley_bus::{BusHandle, Transport};
use parley_types::{BusError, BusResult, Context, Message};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

type LineOutput = Box<dyn AsyncWrite + Send + Unpin>;

enum LineInput {
    Async(Box<dyn AsyncRead + Send + Unpin>),
    Blocking(Box<dyn std::io::Read + Send>),
}

enum LineSource {
    Async(Lines<BufReader<Box<dyn AsyncRead + Send + Unpin>>>),
    Thread(UnboundedReceiver<std::io::Result<String>>),
}

impl LineSource {
    fn open(input: LineInput, transport: &str) -> BusResult<Self> {
        match input {
            LineInput::Async(reader) => Ok(Self::Async(BufReader::new(reader).lines())),
            LineInput::Blocking(reader) => {
                let (sender, receiver) = unbounded_channel();
                std::thread::Builder::new()
                    .name(format!("{transport}-input"))
                    .spawn(move || {
                        let lines = std::io::BufRead::lines(std::io::BufReader::new(reader));
                        for line in lines {
                            if sender.send(line).is_err() {
                                break;
                            }
                        }
                    })
                    .map_err(|error| {
                        BusError::Startup(format!("transport '{transport}' input thread: {error}"))
                    })?;
                Ok(Self::Thread(receiver))
            }
        }
    }

    async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        match self {
            Self::Async(lines) => lines.next_line().await,
            Self::Thread(receiver) => receiver.recv().await.transpose(),
        }
    }
}

fn default_user() -> String {
    "local".to_string()
}

fn default_channel() -> String {
    "console".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StdioTransportConfig {
    pub id: String,
    /// Uid and name given to every inbound line.
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default = "default_channel")]
    pub channel: String,
    #[serde(default)]
    pub grants: Vec<String>,
}

/// Publishes each non-blank input line as a text message and writes outgoing
/// bodies one per line.
pub struct StdioTransport {
    config: StdioTransportConfig,
    input: Mutex<Option<LineInput>>,
    output: Mutex<LineOutput>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl StdioTransport {
    pub fn new<R, W>(config: StdioTransportConfig, input: R, output: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            config,
            input: Mutex::new(Some(LineInput::Async(Box::new(input)))),
            output: Mutex::new(Box::new(output)),
            reader: Mutex::new(None),
        }
    }

    /// Reads `input` on a detached thread. A read blocked there never holds
    /// up `stop` or runtime shutdown; the thread ends at the next line or EOF.
    pub fn blocking<R, W>(config: StdioTransportConfig, input: R, output: W) -> Self
    where
        R: std::io::Read + Send + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            config,
            input: Mutex::new(Some(LineInput::Blocking(Box::new(input)))),
            output: Mutex::new(Box::new(output)),
            reader: Mutex::new(None),
        }
    }

    /// Process stdin and stdout.
    pub fn stdio(config: StdioTransportConfig) -> Self {
        Self::blocking(config, std::io::stdin(), tokio::io::stdout())
    }

    fn context(&self) -> Context {
        Context::new(&self.config.user, &self.config.user, &self.config.channel)
            .with_source(&self.config.id)
            .with_grants(self.config.grants.iter())
    }
}

#[async_trait]
impl Transport for StdioTransport {
    fn id(&self) -> &str {
        &self.config.id
    }

    async fn start(&self, bus: BusHandle) -> BusResult<()> {
        let input = self.input.lock().await.take().ok_or_else(|| {
            BusError::Startup(format!("transport '{}' already started", self.config.id))
        })?;
        let mut lines = LineSource::open(input, &self.config.id)?;
        let context = self.context();
        let transport = self.config.id.clone();
        let task = tokio::spawn(async move {
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let body = line.trim();
                        if body.is_empty() {
                            continue;
                        }
                        if let Err(error) = bus.publish_incoming(Message::text(context.clone(), body)) {
                            tracing::debug!(transport = %transport, %error, "stopped reading input");
                            break;
                        }
                    }
                    Ok(None) => {
                        tracing::debug!(transport = %transport, "input closed");
                        break;
                    }
                    Err(error) => {
                        tracing::warn!(transport = %transport, %error, "failed to read input line");
                        break;
                    }
                }
            }
        });
        *self.reader.lock().await = Some(task);
        Ok(())
    }

    async fn stop(&self) -> BusResult<()> {
        if let Some(task) = self.reader.lock().await.take() {
            task.abort();
        }
        let mut output = self.output.lock().await;
        output
            .flush()
            .await
            .map_err(|error| BusError::TransientIo(error.to_string()))
    }

    async fn send(&self, message: &Message) -> BusResult<()> {
        let mut output = self.output.lock().await;
        let line = format!("{}\n", message.body);
        output
            .write_all(line.as_bytes())
            .await
            .map_err(|error| BusError::TransientIo(error.to_string()))?;
        output
            .flush()
            .await
            .map_err(|error| BusError::TransientIo(error.to_string()))
    }
}
