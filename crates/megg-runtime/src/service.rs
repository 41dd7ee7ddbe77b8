//! [`CoordinatorService`] – runs a [`Coordinator`] as a single task.
//!
//! Requests from client tasks and the periodic progress tick are drained by
//! one `select!` loop, so no two mutations ever interleave. Broadcasts go out
//! on the [`EventBus`] before the requester gets its reply.

use std::time::Duration;

use megg_middleware::{EventBus, Subscription};
use megg_types::{Command, Event, MeggError, Outbound, SystemStatus};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace};

use crate::coordinator::{Coordinator, SOURCE};

/// Pending requests before senders are back-pressured.
const REQUEST_QUEUE: usize = 64;

enum Request {
    Command {
        command: Command,
        reply: oneshot::Sender<Vec<Event>>,
    },
    Snapshot {
        reply: oneshot::Sender<SystemStatus>,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

pub struct CoordinatorService;

impl CoordinatorService {
    /// Move `coordinator` into its own task, ticking every `tick`.
    pub fn spawn(
        coordinator: Coordinator,
        bus: EventBus,
        tick: Duration,
    ) -> (CoordinatorHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(REQUEST_QUEUE);
        let task = tokio::spawn(run(coordinator, bus.clone(), rx, tick));
        (CoordinatorHandle { tx, bus }, task)
    }
}

async fn run(
    mut coordinator: Coordinator,
    bus: EventBus,
    mut rx: mpsc::Receiver<Request>,
    tick: Duration,
) {
    let mut interval = tokio::time::interval(tick);
    // A tick slower than the period must not queue up catch-up ticks.
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!(tick_ms = tick.as_millis() as u64, "coordinator running");

    loop {
        tokio::select! {
            // Requests first, so a slow board cannot starve stop/reset.
            biased;

            request = rx.recv() => {
                if !serve(&mut coordinator, &bus, request).await {
                    break;
                }
            }

            _ = interval.tick() => {
                let out = coordinator.tick().await;
                publish(&bus, out);
            }
        }
    }
    info!("coordinator stopped");
}

/// Handle one request. `false` once the coordinator has shut down.
async fn serve(coordinator: &mut Coordinator, bus: &EventBus, request: Option<Request>) -> bool {
    match request {
        Some(Request::Command { command, reply }) => {
            let kind = command_kind(&command);
            let dispatch = coordinator.handle(command).await;
            publish(bus, dispatch.broadcast);
            if reply.send(stamp(dispatch.reply)).is_err() {
                trace!(command = kind, "requester gone, reply dropped");
            }
            true
        }
        Some(Request::Snapshot { reply }) => {
            if reply.send(coordinator.status()).is_err() {
                trace!("requester gone, snapshot dropped");
            }
            true
        }
        Some(Request::Shutdown { done }) => {
            publish(bus, coordinator.shutdown().await);
            if done.send(()).is_err() {
                trace!("shutdown requester gone");
            }
            false
        }
        None => {
            debug!("all handles dropped");
            publish(bus, coordinator.shutdown().await);
            false
        }
    }
}

fn command_kind(command: &Command) -> &'static str {
    match command {
        Command::CalibrationRequest { .. } => "calibration_request",
        Command::WorkProcess(_) => "work_process",
        Command::GetStatus => "get_status",
        Command::Ping => "ping",
    }
}

fn stamp(messages: Vec<Outbound>) -> Vec<Event> {
    messages
        .into_iter()
        .map(|payload| Event::new(SOURCE, payload))
        .collect()
}

fn publish(bus: &EventBus, messages: Vec<Outbound>) {
    bus.publish_all(stamp(messages));
}

/// Cheap, cloneable access to the running coordinator.
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<Request>,
    bus: EventBus,
}

impl CoordinatorHandle {
    /// Submit a command and wait for the requester-only replies.
    ///
    /// # Errors
    ///
    /// [`MeggError::Channel`] once the coordinator has stopped.
    pub async fn dispatch(&self, command: Command) -> Result<Vec<Event>, MeggError> {
        let (reply, rx) = oneshot::channel();
        self.send(Request::Command { command, reply }).await?;
        rx.await.map_err(|_| stopped())
    }

    pub async fn snapshot(&self) -> Result<SystemStatus, MeggError> {
        let (reply, rx) = oneshot::channel();
        self.send(Request::Snapshot { reply }).await?;
        rx.await.map_err(|_| stopped())
    }

    /// Subscribe to broadcasts. Subscribe before taking a snapshot so no
    /// event falls between the two.
    pub fn subscribe(&self) -> Subscription {
        self.bus.subscribe()
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Stop the coordinator and wait until the link is released.
    pub async fn shutdown(&self) -> Result<(), MeggError> {
        let (done, rx) = oneshot::channel();
        self.send(Request::Shutdown { done }).await?;
        rx.await.map_err(|_| stopped())
    }

    async fn send(&self, request: Request) -> Result<(), MeggError> {
        self.tx.send(request).await.map_err(|_| stopped())
    }
}

fn stopped() -> MeggError {
    MeggError::Channel("coordinator is not running".into())
}
