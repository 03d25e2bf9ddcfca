//! Stream wiring, per-item failure isolation, and bus lifecycle.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use parley_store::{BusStore, StoreConfig};
use parley_types::{BusError, BusResult, Command, Message};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::completion::{create_completion, resolve_completion, FragmentHandler};
use crate::filter_chain::{evaluate_filters, Filter, FilterValue};
use crate::handler_registry::{HandleOutcome, Handler, HandlerRegistry};
use crate::parser_registry::{Parser, ParserRegistry};
use crate::scheduler::IntervalTrigger;
use crate::transport::{Transport, TransportSet};

/// Bus-wide switches read from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusSettings {
    pub name: String,
    /// Strict filters require every applicable filter to allow.
    pub strict_filters: bool,
    /// Reply to the originating context when no handler claims a command.
    pub reply_unhandled: bool,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            name: "parley".to_string(),
            strict_filters: false,
            reply_unhandled: false,
        }
    }
}

/// Resources available while handlers are being built.
#[derive(Clone)]
pub struct StartupContext {
    pub store: Arc<dyn BusStore>,
}

/// Builds the collaborators a bus wires together at startup.
pub trait ComponentFactory: Send + Sync {
    fn filters(&self) -> BusResult<Vec<Arc<dyn Filter>>>;
    fn handlers(&self, startup: &StartupContext) -> BusResult<Vec<Arc<dyn Handler>>>;
    fn intervals(&self) -> BusResult<Vec<IntervalTrigger>>;
    fn transports(&self) -> BusResult<Vec<Arc<dyn Transport>>>;
    fn parsers(&self) -> BusResult<Vec<Arc<dyn Parser>>>;
}

/// Pre-built collaborators, for embedding the bus without a config file.
#[derive(Clone, Default)]
pub struct BusComponents {
    pub filters: Vec<Arc<dyn Filter>>,
    pub handlers: Vec<Arc<dyn Handler>>,
    pub intervals: Vec<IntervalTrigger>,
    pub transports: Vec<Arc<dyn Transport>>,
    pub parsers: Vec<Arc<dyn Parser>>,
}

impl ComponentFactory for BusComponents {
    fn filters(&self) -> BusResult<Vec<Arc<dyn Filter>>> {
        Ok(self.filters.clone())
    }

    fn handlers(&self, _startup: &StartupContext) -> BusResult<Vec<Arc<dyn Handler>>> {
        Ok(self.handlers.clone())
    }

    fn intervals(&self) -> BusResult<Vec<IntervalTrigger>> {
        Ok(self.intervals.clone())
    }

    fn transports(&self) -> BusResult<Vec<Arc<dyn Transport>>> {
        Ok(self.transports.clone())
    }

    fn parsers(&self) -> BusResult<Vec<Arc<dyn Parser>>> {
        Ok(self.parsers.clone())
    }
}

/// Point-in-time counters for bus activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusMetrics {
    pub received: u64,
    pub parsed: u64,
    pub unmatched: u64,
    pub completions_resolved: u64,
    pub handled: u64,
    pub unhandled: u64,
    pub denied: u64,
    pub dispatched: u64,
    pub dropped_by_filter: u64,
    pub completed: u64,
    pub failed: u64,
    pub panicked: u64,
    pub in_flight: u64,
}

#[derive(Default)]
struct BusMetricsInner {
    received: AtomicU64,
    parsed: AtomicU64,
    unmatched: AtomicU64,
    completions_resolved: AtomicU64,
    handled: AtomicU64,
    unhandled: AtomicU64,
    denied: AtomicU64,
    dispatched: AtomicU64,
    dropped_by_filter: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    panicked: AtomicU64,
    in_flight: AtomicU64,
    idle: Notify,
}

impl BusMetricsInner {
    fn snapshot(&self) -> BusMetrics {
        BusMetrics {
            received: self.received.load(Ordering::Relaxed),
            parsed: self.parsed.load(Ordering::Relaxed),
            unmatched: self.unmatched.load(Ordering::Relaxed),
            completions_resolved: self.completions_resolved.load(Ordering::Relaxed),
            handled: self.handled.load(Ordering::Relaxed),
            unhandled: self.unhandled.load(Ordering::Relaxed),
            denied: self.denied.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            dropped_by_filter: self.dropped_by_filter.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::SeqCst),
        }
    }

    fn item_finished(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

struct BusSenders {
    incoming: UnboundedSender<Message>,
    commands: UnboundedSender<Command>,
    outgoing: UnboundedSender<Message>,
}

/// Receiving ends of the three bus streams.
pub struct BusReceivers {
    pub incoming: UnboundedReceiver<Message>,
    pub commands: UnboundedReceiver<Command>,
    pub outgoing: UnboundedReceiver<Message>,
}

struct BusStreams {
    senders: BusSenders,
    receivers: BusReceivers,
}

impl BusStreams {
    fn open() -> Self {
        let (incoming_tx, incoming_rx) = unbounded_channel();
        let (commands_tx, commands_rx) = unbounded_channel();
        let (outgoing_tx, outgoing_rx) = unbounded_channel();
        Self {
            senders: BusSenders {
                incoming: incoming_tx,
                commands: commands_tx,
                outgoing: outgoing_tx,
            },
            receivers: BusReceivers {
                incoming: incoming_rx,
                commands: commands_rx,
                outgoing: outgoing_rx,
            },
        }
    }
}

struct HandleInner {
    senders: Mutex<Option<BusSenders>>,
    store: Arc<dyn BusStore>,
    metrics: BusMetricsInner,
}

/// Cloneable publishing handle given to transports, handlers, and triggers.
#[derive(Clone)]
pub struct BusHandle {
    inner: Arc<HandleInner>,
}

impl BusHandle {
    /// Creates a handle with fresh streams that no bus consumes, returning
    /// the receivers so callers can observe what would be published.
    pub fn detached(store: Arc<dyn BusStore>) -> (Self, BusReceivers) {
        let BusStreams { senders, receivers } = BusStreams::open();
        (Self::new(senders, store), receivers)
    }

    fn new(senders: BusSenders, store: Arc<dyn BusStore>) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                senders: Mutex::new(Some(senders)),
                store,
                metrics: BusMetricsInner::default(),
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn BusStore> {
        &self.inner.store
    }

    pub fn metrics(&self) -> BusMetrics {
        self.inner.metrics.snapshot()
    }

    pub fn is_closed(&self) -> bool {
        lock_or_recover(&self.inner.senders).is_none()
    }

    /// Publishes a message received by a transport.
    pub fn publish_incoming(&self, message: Message) -> BusResult<()> {
        self.publish(|senders| senders.incoming.send(message).is_ok())
    }

    /// Publishes a command, bypassing message parsing.
    pub fn publish_command(&self, command: Command) -> BusResult<()> {
        self.publish(|senders| senders.commands.send(command).is_ok())
    }

    /// Queues an outgoing message for transport dispatch.
    pub fn send(&self, message: Message) -> BusResult<()> {
        self.publish(|senders| senders.outgoing.send(message).is_ok())
    }

    /// Parks `command` until the user supplies `key`, prompting with `prompt`.
    pub fn request_completion(&self, command: &Command, key: &str, prompt: &str) -> BusResult<()> {
        self.publish_command(create_completion(command, key, prompt)?)
    }

    /// Waits until every published item finished, or `timeout` elapses.
    /// Returns true when the bus went idle.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let metrics = &self.inner.metrics;
        let deadline = Instant::now() + timeout;
        loop {
            let notified = metrics.idle.notified();
            if metrics.in_flight.load(Ordering::SeqCst) == 0 {
                return true;
            }

            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let remaining = deadline.saturating_duration_since(now);
            if tokio::time::timeout(remaining, notified).await.is_err() {
                return metrics.in_flight.load(Ordering::SeqCst) == 0;
            }
        }
    }

    fn publish(&self, send: impl FnOnce(&BusSenders) -> bool) -> BusResult<()> {
        let senders = lock_or_recover(&self.inner.senders);
        let Some(senders) = senders.as_ref() else {
            return Err(BusError::Closed);
        };
        self.inner.metrics.in_flight.fetch_add(1, Ordering::SeqCst);
        if send(senders) {
            Ok(())
        } else {
            self.inner.metrics.item_finished();
            Err(BusError::Closed)
        }
    }

    fn close(&self) {
        lock_or_recover(&self.inner.senders).take();
    }

    fn count(&self, select: impl FnOnce(&BusMetricsInner) -> &AtomicU64) {
        select(&self.inner.metrics).fetch_add(1, Ordering::Relaxed);
    }
}

struct Pipeline {
    settings: BusSettings,
    filters: Vec<Arc<dyn Filter>>,
    parsers: ParserRegistry,
    handlers: HandlerRegistry,
    transports: TransportSet,
}

/// Running command bus.
pub struct CommandBus {
    handle: BusHandle,
    pipeline: Arc<Pipeline>,
    pumps: Vec<JoinHandle<()>>,
    timers: Vec<JoinHandle<()>>,
}

impl CommandBus {
    /// Wires and starts the bus. Any failure is fatal and leaves the streams
    /// closed.
    pub async fn start(
        settings: BusSettings,
        storage: &StoreConfig,
        factory: &dyn ComponentFactory,
    ) -> BusResult<Self> {
        tracing::info!(bus = %settings.name, "setting up streams");
        let streams = BusStreams::open();

        tracing::info!("connecting to storage");
        let store = storage
            .connect()
            .map_err(|error| BusError::Startup(format!("storage: {error}")))?;
        Self::wire(settings, streams, store, factory).await
    }

    /// Like [`CommandBus::start`], on a store the caller already opened.
    pub async fn start_with_store(
        settings: BusSettings,
        store: Arc<dyn BusStore>,
        factory: &dyn ComponentFactory,
    ) -> BusResult<Self> {
        tracing::info!(bus = %settings.name, "setting up streams");
        let streams = BusStreams::open();
        Self::wire(settings, streams, store, factory).await
    }

    async fn wire(
        settings: BusSettings,
        streams: BusStreams,
        store: Arc<dyn BusStore>,
        factory: &dyn ComponentFactory,
    ) -> BusResult<Self> {
        tracing::info!("setting up filters");
        let filters = factory.filters()?;

        tracing::info!("setting up handlers");
        let startup = StartupContext {
            store: Arc::clone(&store),
        };
        let mut handlers: Vec<Arc<dyn Handler>> = vec![Arc::new(FragmentHandler::new())];
        handlers.extend(factory.handlers(&startup)?);

        tracing::info!("setting up intervals");
        let intervals = factory.intervals()?;

        tracing::info!("setting up transports");
        let transports = factory.transports()?;

        tracing::info!("setting up parsers");
        let parsers = factory.parsers()?;

        let BusStreams { senders, receivers } = streams;
        let handle = BusHandle::new(senders, store);
        let pipeline = Arc::new(Pipeline {
            handlers: HandlerRegistry::new(handlers, settings.reply_unhandled),
            parsers: ParserRegistry::new(parsers),
            transports: TransportSet::new(transports),
            filters,
            settings,
        });

        let pumps = vec![
            spawn_stream_pump("incoming", receivers.incoming, &handle, &pipeline, receive),
            spawn_stream_pump("commands", receivers.commands, &handle, &pipeline, handle_command),
            spawn_stream_pump("outgoing", receivers.outgoing, &handle, &pipeline, dispatch),
        ];
        let timers = intervals
            .into_iter()
            .map(|trigger| trigger.spawn(handle.clone()))
            .collect::<Vec<_>>();

        let mut bus = Self {
            handle,
            pipeline,
            pumps,
            timers,
        };

        tracing::info!("starting transports");
        if let Err(error) = bus.pipeline.transports.start_all(&bus.handle).await {
            tracing::error!(error = %error, "transport failed to start");
            bus.stop().await;
            return Err(BusError::Startup(error.to_string()));
        }
        tracing::info!(bus = %bus.pipeline.settings.name, "bus started");
        Ok(bus)
    }

    pub fn handle(&self) -> BusHandle {
        self.handle.clone()
    }

    pub fn settings(&self) -> &BusSettings {
        &self.pipeline.settings
    }

    pub fn metrics(&self) -> BusMetrics {
        self.handle.metrics()
    }

    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        self.handle.wait_idle(timeout).await
    }

    /// Stops interval timers, closes the three streams, then stops transports.
    pub async fn stop(&mut self) {
        tracing::info!(bus = %self.pipeline.settings.name, "stopping bus");

        tracing::debug!("stopping interval timers");
        for timer in self.timers.drain(..) {
            timer.abort();
        }

        tracing::debug!("stopping streams");
        self.handle.close();
        for pump in self.pumps.drain(..) {
            let _ = pump.await;
        }

        tracing::debug!("stopping transports");
        self.pipeline.transports.stop_all().await;
    }
}

fn spawn_stream_pump<T, F, Fut>(
    stream: &'static str,
    mut receiver: UnboundedReceiver<T>,
    handle: &BusHandle,
    pipeline: &Arc<Pipeline>,
    process: F,
) -> JoinHandle<()>
where
    T: StreamItem + Send + 'static,
    F: Fn(Arc<Pipeline>, BusHandle, T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = BusResult<()>> + Send + 'static,
{
    let handle = handle.clone();
    let pipeline = Arc::clone(pipeline);
    tokio::spawn(async move {
        while let Some(item) = receiver.recv().await {
            let label = item.describe();
            let task = tokio::spawn(process(Arc::clone(&pipeline), handle.clone(), item));
            let handle = handle.clone();
            tokio::spawn(async move {
                match task.await {
                    Ok(Ok(())) => handle.count(|metrics| &metrics.completed),
                    Ok(Err(error)) => {
                        handle.count(|metrics| &metrics.failed);
                        tracing::error!(
                            stream,
                            item = %label,
                            reason_code = error.reason_code(),
                            error = %error,
                            "bus item failed"
                        );
                    }
                    Err(_) => {
                        handle.count(|metrics| &metrics.panicked);
                        tracing::error!(stream, item = %label, "bus item panicked");
                    }
                }
                handle.inner.metrics.item_finished();
            });
        }
        tracing::debug!(stream, "stream closed");
    })
}

async fn receive(pipeline: Arc<Pipeline>, bus: BusHandle, message: Message) -> BusResult<()> {
    bus.count(|metrics| &metrics.received);
    tracing::debug!(uid = %message.context.uid, "received incoming message");

    let verdict = evaluate_filters(
        FilterValue::Message(&message),
        &pipeline.filters,
        pipeline.settings.strict_filters,
    )
    .await;
    if !verdict.is_allowed() {
        bus.count(|metrics| &metrics.dropped_by_filter);
        tracing::warn!(uid = %message.context.uid, "dropped incoming message due to filters");
        return Ok(());
    }

    if let Some(commands) =
        resolve_completion(&message, bus.store().as_ref(), &pipeline.parsers).await?
    {
        bus.count(|metrics| &metrics.completions_resolved);
        for command in commands {
            bus.publish_command(command)?;
        }
        return Ok(());
    }

    let commands = pipeline.parsers.parse(&message).await;
    if commands.is_empty() {
        bus.count(|metrics| &metrics.unmatched);
    }
    for command in commands {
        bus.count(|metrics| &metrics.parsed);
        bus.publish_command(command)?;
    }
    Ok(())
}

async fn handle_command(pipeline: Arc<Pipeline>, bus: BusHandle, command: Command) -> BusResult<()> {
    let verdict = evaluate_filters(
        FilterValue::Command(&command),
        &pipeline.filters,
        pipeline.settings.strict_filters,
    )
    .await;
    if !verdict.is_allowed() {
        bus.count(|metrics| &metrics.dropped_by_filter);
        tracing::warn!(
            noun = %command.noun,
            verb = %command.verb,
            "dropped command due to filters"
        );
        return Ok(());
    }

    bus.store().save_command(&command).await?;
    match pipeline.handlers.dispatch(&command, &bus).await? {
        HandleOutcome::Handled { .. } | HandleOutcome::HelpAnswered => {
            bus.count(|metrics| &metrics.handled)
        }
        HandleOutcome::Denied { .. } => bus.count(|metrics| &metrics.denied),
        HandleOutcome::Unhandled => bus.count(|metrics| &metrics.unhandled),
    }
    Ok(())
}

async fn dispatch(pipeline: Arc<Pipeline>, bus: BusHandle, message: Message) -> BusResult<()> {
    let verdict = evaluate_filters(
        FilterValue::Message(&message),
        &pipeline.filters,
        pipeline.settings.strict_filters,
    )
    .await;
    if !verdict.is_allowed() {
        bus.count(|metrics| &metrics.dropped_by_filter);
        tracing::warn!(uid = %message.context.uid, "dropped outgoing message due to filters");
        return Ok(());
    }

    bus.store().save_message(&message).await?;
    let delivered = pipeline.transports.dispatch(&message).await?;
    if delivered > 0 {
        bus.count(|metrics| &metrics.dispatched);
    }
    Ok(())
}

trait StreamItem {
    fn describe(&self) -> String;
}

impl StreamItem for Message {
    fn describe(&self) -> String {
        format!("message uid={} channel={}", self.context.uid, self.context.channel)
    }
}

impl StreamItem for Command {
    fn describe(&self) -> String {
        format!("command {} uid={}", self.route_key(), self.context.uid)
    }
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
