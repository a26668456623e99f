//! Console actor
//!
//! Runs a [`Session`] on a single tokio task. Presentation intents arrive over
//! the [`ConsoleHandle`] channel, broker link events over the session's link
//! channel, configuration loads complete on a third channel, and the task
//! sleeps until the session's next timer deadline. Nothing else touches the
//! session, so every callback observes a consistent state.

use crate::config::{load_config, ConfigSource, ConsoleConfig};
use crate::error::{ConsoleError, ConsoleResult};
use crate::session::{ConsoleObserver, Intent, Session, SessionSnapshot, Timings};
use crate::transport::{BrokerConnector, LinkEventReceiver};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn, Instrument};

/// Command channel capacity
const COMMAND_CAPACITY: usize = 64;

enum Command {
    Intent {
        intent: Intent,
        reply: oneshot::Sender<ConsoleResult<()>>,
    },
    Load(ConfigSource),
    Snapshot(oneshot::Sender<SessionSnapshot>),
    Shutdown,
}

/// Cloneable handle to a running console
#[derive(Clone)]
pub struct ConsoleHandle {
    commands: mpsc::Sender<Command>,
}

impl ConsoleHandle {
    async fn send(&self, command: Command) -> ConsoleResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ConsoleError::ConsoleClosed)
    }

    async fn request(&self, intent: Intent) -> ConsoleResult<()> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Intent { intent, reply }).await?;
        response.await.map_err(|_| ConsoleError::ConsoleClosed)?
    }

    pub async fn connect(&self) -> ConsoleResult<()> {
        self.request(Intent::Connect).await
    }

    pub async fn disconnect(&self) -> ConsoleResult<()> {
        self.request(Intent::Disconnect).await
    }

    pub async fn toggle_connection(&self) -> ConsoleResult<()> {
        self.request(Intent::ToggleConnection).await
    }

    /// One user action on item `index`
    pub async fn trigger(&self, index: usize) -> ConsoleResult<()> {
        self.request(Intent::Trigger(index)).await
    }

    /// Start loading a configuration. The outcome is reported to the observer.
    pub async fn load(&self, source: ConfigSource) -> ConsoleResult<()> {
        self.send(Command::Load(source)).await
    }

    pub async fn snapshot(&self) -> ConsoleResult<SessionSnapshot> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Snapshot(reply)).await?;
        response.await.map_err(|_| ConsoleError::ConsoleClosed)
    }

    /// Stop the console, closing any broker link
    pub async fn shutdown(&self) -> ConsoleResult<()> {
        self.send(Command::Shutdown).await
    }
}

pub struct Console {
    session: Session,
    commands: mpsc::Receiver<Command>,
    link_events: LinkEventReceiver,
    loads_tx: mpsc::UnboundedSender<Result<ConsoleConfig, String>>,
    loads_rx: mpsc::UnboundedReceiver<Result<ConsoleConfig, String>>,
}

impl Console {
    /// Spawn a console task. Must be called from within a tokio runtime.
    pub fn spawn(
        connector: impl BrokerConnector + 'static,
        observer: impl ConsoleObserver + 'static,
        timings: Timings,
    ) -> (ConsoleHandle, JoinHandle<()>) {
        let (commands_tx, commands) = mpsc::channel(COMMAND_CAPACITY);
        let (link_tx, link_events) = mpsc::unbounded_channel();
        let (loads_tx, loads_rx) = mpsc::unbounded_channel();

        let console = Console {
            session: Session::new(connector, observer, link_tx).with_timings(timings),
            commands,
            link_events,
            loads_tx,
            loads_rx,
        };
        let task = tokio::spawn(console.run().instrument(crate::lifecycle_span!("console")));

        (
            ConsoleHandle {
                commands: commands_tx,
            },
            task,
        )
    }

    async fn run(mut self) {
        info!("Console started");
        loop {
            let deadline = self.session.next_deadline().map(Instant::from_std);

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if !self.handle_command(command) {
                            break;
                        }
                    }
                    None => {
                        debug!("All console handles dropped");
                        break;
                    }
                },
                Some(event) = self.link_events.recv() => {
                    self.session.handle_link_event(event, now());
                }
                Some(loaded) = self.loads_rx.recv() => match loaded {
                    Ok(config) => self.session.load_config(config, now()),
                    Err(reason) => self.session.config_failed(&reason),
                },
                _ = sleep_until(deadline) => self.session.advance(now()),
            }
        }

        self.session.disconnect(now());
        info!("Console stopped");
    }

    /// Returns false once the console should stop
    fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Intent { intent, reply } => {
                let result = self.session.dispatch(intent, now());
                if let Err(e) = &result {
                    warn!("{:?} failed: {}", intent, e);
                }
                let _ = reply.send(result);
            }
            Command::Load(source) => {
                info!("Loading configuration from {}", source);
                let loads = self.loads_tx.clone();
                tokio::spawn(async move {
                    let _ = loads.send(load_config(&source).await);
                });
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.session.snapshot());
            }
            Command::Shutdown => {
                debug!("Shutdown requested");
                return false;
            }
        }
        true
    }
}

/// Session clock, driven by tokio time so paused-clock tests control it
fn now() -> std::time::Instant {
    Instant::now().into_std()
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
