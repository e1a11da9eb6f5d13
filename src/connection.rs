//! The websocket side of the client: one task that dials the spectator
//! endpoint, forwards raw messages verbatim, and keeps redialing with
//! exponential backoff when the stream drops.

use std::time::Duration;

use futures_util::StreamExt;
use log::{info, warn};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, timeout, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Everything the connection reports outward. Raw server messages are
/// forwarded verbatim; the other variants are lifecycle transitions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connecting,
    Connected,
    /// Surfaced at most once per disconnect episode, and only once it is
    /// clear a quick clean reconnect is not going to happen.
    Disconnected,
    Message(String),
}

#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// Websocket url of the spectator endpoint.
    pub url: String,
    /// How long a single connect attempt may take before it is abandoned.
    pub connect_timeout: Duration,
    /// How long an unexpected closure may go unreported while a
    /// reconnect attempt races to beat it.
    pub closure_grace: Duration,
    /// Delay before the first retry; doubles on every failed attempt.
    pub retry_initial: Duration,
    /// Retry delays never exceed this.
    pub retry_max: Duration,
    /// Capacity of the event channel.
    pub event_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> ConnectionConfig {
        ConnectionConfig {
            url: "ws://localhost:3002".to_owned(),
            connect_timeout: Duration::from_secs(3),
            closure_grace: Duration::from_millis(500),
            retry_initial: Duration::from_millis(250),
            retry_max: Duration::from_secs(10),
            event_capacity: 64,
        }
    }
}

/// Exponential backoff state for reconnection attempts. The delay only
/// resets once a connection actually succeeds, never merely because a
/// new attempt started.
#[derive(Clone, Debug)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    next: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Backoff {
        Backoff {
            initial,
            max,
            next: initial,
        }
    }

    /// The delay to wait before the next attempt; the one after doubles,
    /// capped at the configured maximum.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (delay * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.next = self.initial;
    }
}

enum Command {
    Reconnect,
    Stop,
}

/// Handle owning the connection task. Dropping it (or calling
/// [`ConnectionHandle::stop`]) shuts the task down.
pub struct ConnectionHandle {
    commands: mpsc::UnboundedSender<Command>,
    task: tokio::task::JoinHandle<()>,
}

impl ConnectionHandle {
    /// Discards whatever stream or attempt currently exists and dials
    /// fresh. Never fails from the caller's point of view: failures
    /// surface asynchronously as lifecycle events.
    pub fn reconnect(&self) {
        let _ = self.commands.send(Command::Reconnect);
    }

    /// A cheap clone-able handle that can only request reconnects.
    pub fn reconnector(&self) -> Reconnector {
        Reconnector {
            commands: self.commands.clone(),
        }
    }

    pub async fn stop(self) {
        let _ = self.commands.send(Command::Stop);
        let _ = self.task.await;
    }
}

/// See [`ConnectionHandle::reconnector`].
#[derive(Clone)]
pub struct Reconnector {
    commands: mpsc::UnboundedSender<Command>,
}

impl Reconnector {
    pub fn reconnect(&self) {
        let _ = self.commands.send(Command::Reconnect);
    }
}

pub struct ConnectionManager;

impl ConnectionManager {
    /// Spawns the connection task. Events arrive on the returned
    /// receiver; the task ends on [`ConnectionHandle::stop`], when the
    /// handle is dropped, or when the receiver goes away.
    pub fn start(config: ConnectionConfig) -> (ConnectionHandle, mpsc::Receiver<ConnectionEvent>) {
        let (event_tx, event_rx) = mpsc::channel(config.event_capacity.max(1));
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let backoff = Backoff::new(config.retry_initial, config.retry_max);
        let task = tokio::spawn(
            ConnectionTask {
                config,
                events: event_tx,
                commands: command_rx,
                backoff,
                error_surfaced: false,
                grace_deadline: None,
            }
            .run(),
        );

        (
            ConnectionHandle {
                commands: command_tx,
                task,
            },
            event_rx,
        )
    }
}

/// How one connection episode ended.
enum Episode {
    /// The stream failed or closed; wait out the backoff delay.
    Retry,
    /// An explicit reconnect request; dial again immediately.
    Immediate,
    Stop,
}

enum Wait {
    Done,
    Stop,
}

enum Dial {
    Socket(Box<Socket>),
    Failed,
    Reconnect,
    Stop,
}

struct ConnectionTask {
    config: ConnectionConfig,
    events: mpsc::Sender<ConnectionEvent>,
    commands: mpsc::UnboundedReceiver<Command>,
    backoff: Backoff,
    /// True once the error notice for the current disconnect episode has
    /// gone out; cleared by the next successful connect. Keeps a flapping
    /// link from spamming the consumer with notices.
    error_surfaced: bool,
    /// After an unexpected closure, the moment at which the episode
    /// counts as a real outage and the notice goes out.
    grace_deadline: Option<Instant>,
}

impl ConnectionTask {
    async fn run(mut self) {
        // The first dial happens immediately; afterwards every failed
        // episode waits out the backoff delay first.
        let mut delay = Duration::ZERO;
        loop {
            match self.episode(delay).await {
                Episode::Retry => delay = self.backoff.next_delay(),
                Episode::Immediate => delay = Duration::ZERO,
                Episode::Stop => return,
            }
        }
    }

    /// One full episode: wait out the retry delay, dial, and if the dial
    /// succeeds pump messages until the stream dies.
    async fn episode(&mut self, delay: Duration) -> Episode {
        if let Wait::Stop = self.wait_retry(delay).await {
            return Episode::Stop;
        }

        if self.send(ConnectionEvent::Connecting).await.is_err() {
            return Episode::Stop;
        }

        match self.dial().await {
            Dial::Socket(socket) => {
                self.backoff.reset();
                self.error_surfaced = false;
                self.grace_deadline = None;
                info!("connected to {}", self.config.url);
                if self.send(ConnectionEvent::Connected).await.is_err() {
                    return Episode::Stop;
                }
                self.pump(socket).await
            }
            Dial::Failed => {
                if self.surface_error().await.is_err() {
                    return Episode::Stop;
                }
                Episode::Retry
            }
            Dial::Reconnect => Episode::Immediate,
            Dial::Stop => Episode::Stop,
        }
    }

    async fn wait_retry(&mut self, delay: Duration) -> Wait {
        let deadline = Instant::now() + delay;
        loop {
            tokio::select! {
                _ = sleep_until(deadline) => return Wait::Done,
                _ = Self::grace_wait(self.grace_deadline), if self.grace_armed() => {
                    if self.surface_error().await.is_err() {
                        return Wait::Stop;
                    }
                }
                command = self.commands.recv() => match command {
                    Some(Command::Reconnect) => return Wait::Done,
                    Some(Command::Stop) | None => return Wait::Stop,
                },
            }
        }
    }

    /// One connect attempt under the connect timeout, still responsive
    /// to commands and to the outage grace deadline.
    async fn dial(&mut self) -> Dial {
        // The url is cloned so the pinned attempt owns its request and
        // the handlers below keep exclusive access to `self`.
        let connect = timeout(
            self.config.connect_timeout,
            connect_async(self.config.url.clone()),
        );
        tokio::pin!(connect);
        loop {
            tokio::select! {
                result = &mut connect => {
                    return match result {
                        Ok(Ok((socket, _response))) => Dial::Socket(Box::new(socket)),
                        Ok(Err(err)) => {
                            warn!("connect to {} failed: {}", self.config.url, err);
                            Dial::Failed
                        }
                        Err(_elapsed) => {
                            warn!("connect to {} timed out", self.config.url);
                            Dial::Failed
                        }
                    };
                }
                _ = Self::grace_wait(self.grace_deadline), if self.grace_armed() => {
                    if self.surface_error().await.is_err() {
                        return Dial::Stop;
                    }
                }
                command = self.commands.recv() => match command {
                    Some(Command::Reconnect) => return Dial::Reconnect,
                    Some(Command::Stop) | None => return Dial::Stop,
                },
            }
        }
    }

    /// Forwards text frames until the stream dies or a command
    /// interrupts it.
    async fn pump(&mut self, mut socket: Box<Socket>) -> Episode {
        loop {
            tokio::select! {
                frame = socket.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        if self.send(ConnectionEvent::Message(text)).await.is_err() {
                            return Episode::Stop;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        warn!("server closed the connection");
                        self.begin_outage();
                        return Episode::Retry;
                    }
                    // Pings and pongs are answered inside tungstenite;
                    // the server never sends binary frames.
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!("websocket error: {}", err);
                        self.begin_outage();
                        return Episode::Retry;
                    }
                },
                command = self.commands.recv() => match command {
                    Some(Command::Reconnect) => {
                        info!("reconnect requested, dropping the current stream");
                        return Episode::Immediate;
                    }
                    Some(Command::Stop) | None => return Episode::Stop,
                },
            }
        }
    }

    /// Starts the grace window in which a clean reconnect can still
    /// avert the disconnect notice.
    fn begin_outage(&mut self) {
        if !self.error_surfaced {
            self.grace_deadline = Some(Instant::now() + self.config.closure_grace);
        }
    }

    fn grace_armed(&self) -> bool {
        self.grace_deadline.is_some() && !self.error_surfaced
    }

    async fn grace_wait(deadline: Option<Instant>) {
        match deadline {
            Some(deadline) => sleep_until(deadline).await,
            // Unarmed branches are never polled; see the select guards.
            None => std::future::pending::<()>().await,
        }
    }

    /// Emits the disconnect notice unless it already went out this
    /// episode. Errors only when the receiver is gone.
    async fn surface_error(&mut self) -> Result<(), ()> {
        self.grace_deadline = None;
        if !self.error_surfaced {
            self.error_surfaced = true;
            warn!("connection to {} is down, retrying", self.config.url);
            self.send(ConnectionEvent::Disconnected).await?;
        }
        Ok(())
    }

    async fn send(&mut self, event: ConnectionEvent) -> Result<(), ()> {
        self.events.send(event).await.map_err(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let mut backoff = Backoff::new(Duration::from_millis(250), Duration::from_secs(2));
        assert_eq!(backoff.next_delay(), Duration::from_millis(250));
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
        assert_eq!(backoff.next_delay(), Duration::from_millis(1000));
        assert_eq!(backoff.next_delay(), Duration::from_millis(2000));
        assert_eq!(backoff.next_delay(), Duration::from_millis(2000));
    }

    #[test]
    fn backoff_is_monotonic_until_reset() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(60));
        let mut previous = Duration::ZERO;
        for _ in 0..12 {
            let delay = backoff.next_delay();
            assert!(delay >= previous);
            previous = delay;
        }
    }

    #[test]
    fn a_success_resets_the_delay_to_its_initial_value() {
        let mut backoff = Backoff::new(Duration::from_millis(250), Duration::from_secs(10));
        for _ in 0..6 {
            backoff.next_delay();
        }
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(250));
    }
}
