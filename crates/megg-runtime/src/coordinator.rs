//! [`Coordinator`] – the single owned context behind the service.
//!
//! It owns both state machines and the hardware [`Link`] and is the only
//! place where any of them is mutated. Every method runs to completion
//! before the next one starts, so a status snapshot taken after a call
//! reflects that call in full.
//!
//! Outcomes are split into what goes back to the requesting client only
//! (`reply`) and what every client must see (`broadcast`). Any call that
//! broadcasts something ends its broadcast with a fresh `status`.

use megg_hal::{Link, LinkCommand};
use megg_kernel::{CalibrationMachine, MessageTable, WorkConfig, WorkProcessMachine};
use megg_types::{
    Command, ErrorPayload, MeggError, Outbound, SystemStatus, WorkAction, WorkPhase, codes,
};
use tracing::{debug, info, warn};

/// `source` of every event the coordinator emits.
pub const SOURCE: &str = "megg-runtime::coordinator";

/// Result of handling one inbound command.
#[derive(Debug, Default, PartialEq)]
pub struct Dispatch {
    /// Sent only to the client that issued the command.
    pub reply: Vec<Outbound>,
    /// Sent to every connected client, in order.
    pub broadcast: Vec<Outbound>,
}

impl Dispatch {
    fn reply(messages: Vec<Outbound>) -> Self {
        Self {
            reply: messages,
            broadcast: Vec::new(),
        }
    }

    fn rejected(err: &MeggError) -> Self {
        Self::reply(vec![Outbound::error(err)])
    }
}

pub struct Coordinator {
    calibration: CalibrationMachine,
    work: WorkProcessMachine,
    link: Link,
}

impl Coordinator {
    pub fn new(link: Link, messages: MessageTable, work: WorkConfig) -> Self {
        Self {
            calibration: CalibrationMachine::new(messages),
            work: WorkProcessMachine::new(work),
            link,
        }
    }

    /// Route one well-formed command.
    pub async fn handle(&mut self, command: Command) -> Dispatch {
        debug!(?command, "handling command");
        match command {
            Command::Ping => Dispatch::reply(vec![Outbound::Pong {}]),
            Command::GetStatus => Dispatch::reply(vec![Outbound::status(self.status())]),
            Command::CalibrationRequest { component } => {
                match self.calibration.request(component, self.work.is_active()) {
                    Ok(update) => self.broadcast(vec![Outbound::CalibrationUpdate(update)]),
                    Err(e) => {
                        warn!(component = %component, error = %e, "calibration request rejected");
                        Dispatch::rejected(&e)
                    }
                }
            }
            Command::WorkProcess(action) => self.handle_work(action).await,
        }
    }

    async fn handle_work(&mut self, action: WorkAction) -> Dispatch {
        match action {
            WorkAction::StartBatch {
                batch_id,
                egg_count,
            } => {
                let uncalibrated = self.calibration.uncalibrated();
                match self.work.start_batch(batch_id, egg_count, &uncalibrated) {
                    Ok(update) => self.broadcast(vec![Outbound::WorkProcessUpdate(update)]),
                    Err(e) => {
                        warn!(error = %e, "start_batch rejected");
                        Dispatch::rejected(&e)
                    }
                }
            }
            WorkAction::StopProcessing => match self.work.stop() {
                Ok(update) => {
                    let mut out = vec![Outbound::WorkProcessUpdate(update)];
                    self.halt_board().await;
                    self.collect_degradation(&mut out);
                    self.broadcast(out)
                }
                Err(e) => {
                    warn!(error = %e, "stop_processing rejected");
                    Dispatch::rejected(&e)
                }
            },
            WorkAction::ResetProcess => {
                let was_active = self.work.is_active();
                let mut out = vec![Outbound::WorkProcessUpdate(self.work.reset())];
                if was_active {
                    self.halt_board().await;
                    self.collect_degradation(&mut out);
                }
                self.broadcast(out)
            }
            WorkAction::GetStatus => Dispatch::reply(vec![
                Outbound::WorkProcessUpdate(self.work.snapshot()),
                Outbound::status(self.status()),
            ]),
        }
    }

    /// Advance whichever session or batch is live by one step.
    ///
    /// Returns the events to broadcast; empty when nothing is running.
    pub async fn tick(&mut self) -> Vec<Outbound> {
        let mut out = Vec::new();

        if let Some(command) = self.calibration.next_command() {
            let outcome = self.link.send(&command).await;
            out.extend(self.calibration.apply(outcome).map(Outbound::CalibrationUpdate));
        }

        if self.work.is_active() {
            let outcome = match self.work.tick_command() {
                Some(command) => Some(self.link.send(&command).await),
                None => None,
            };
            out.extend(
                self.work
                    .advance(outcome)
                    .into_iter()
                    .map(Outbound::WorkProcessUpdate),
            );
            if self.work.phase() == WorkPhase::Stopped {
                self.halt_board().await;
            }
        }

        self.collect_degradation(&mut out);
        if !out.is_empty() {
            out.push(Outbound::status(self.status()));
        }
        out
    }

    /// Wind everything down: fail the live calibration, stop the batch, halt
    /// the board and release the link.
    pub async fn shutdown(&mut self) -> Vec<Outbound> {
        let mut out = Vec::new();
        if let Some(update) = self.calibration.abort("service shutting down") {
            out.push(Outbound::CalibrationUpdate(update));
        }
        if self.work.is_active() {
            let update = match self.work.stop() {
                Ok(update) => update,
                Err(_) => self.work.reset(),
            };
            out.push(Outbound::WorkProcessUpdate(update));
            self.halt_board().await;
        }
        self.link.disconnect();
        info!("coordinator shut down");
        out.push(Outbound::status(self.status()));
        out
    }

    /// Derived snapshot of every machine and the link.
    pub fn status(&self) -> SystemStatus {
        SystemStatus {
            components: self.calibration.states(),
            calibration: self.calibration.active(),
            work_process: self.work.status(&self.calibration.uncalibrated()),
            link: self.link.status(),
        }
    }

    pub fn phase(&self) -> WorkPhase {
        self.work.phase()
    }

    /// Best-effort `STOP`; the batch is already halted on our side.
    async fn halt_board(&mut self) {
        if let Err(e) = self.link.send(&LinkCommand::Stop).await {
            warn!(error = %e, "board did not acknowledge STOP");
        }
    }

    /// Turn a pending link degradation into an `error` broadcast, failing the
    /// live calibration session first.
    fn collect_degradation(&mut self, out: &mut Vec<Outbound>) {
        let Some(cause) = self.link.take_degradation() else {
            return;
        };
        if let Some(update) = self.calibration.abort(format!("hardware link lost: {cause}")) {
            out.push(Outbound::CalibrationUpdate(update));
        }
        out.push(Outbound::Error(ErrorPayload {
            code: codes::LINK_DEGRADED.to_string(),
            message: format!("Hardware link lost ({cause}); continuing in simulated mode"),
        }));
    }

    fn broadcast(&self, mut messages: Vec<Outbound>) -> Dispatch {
        messages.push(Outbound::status(self.status()));
        Dispatch {
            reply: Vec::new(),
            broadcast: messages,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use megg_hal::SimSettings;
    use megg_types::{CalibrationStatus, Component, LinkMode};

    use super::*;

    fn coordinator() -> Coordinator {
        let link = Link::simulated(&SimSettings {
            latency: Duration::ZERO,
            seed: Some(3),
            good_rate: 0.95,
        });
        let work = WorkConfig {
            default_batch_size: 4,
            ready_ticks: 1,
            loading_ticks: 1,
            ..WorkConfig::default()
        };
        Coordinator::new(link, MessageTable::default(), work)
    }

    #[tokio::test]
    async fn ping_and_status_are_replies_only() {
        let mut c = coordinator();
        let d = c.handle(Command::Ping).await;
        assert_eq!(d.reply, vec![Outbound::Pong {}]);
        assert!(d.broadcast.is_empty());

        let d = c.handle(Command::GetStatus).await;
        assert!(matches!(d.reply[0], Outbound::Status(_)));
        assert!(d.broadcast.is_empty());
    }

    #[tokio::test]
    async fn accepted_request_broadcasts_update_then_status() {
        let mut c = coordinator();
        let d = c
            .handle(Command::CalibrationRequest {
                component: Component::LoadCell,
            })
            .await;
        assert!(d.reply.is_empty());
        assert_eq!(d.broadcast.len(), 2);
        assert!(matches!(d.broadcast[0], Outbound::CalibrationUpdate(_)));
        let Outbound::Status(status) = &d.broadcast[1] else {
            panic!("status must close the broadcast");
        };
        assert_eq!(
            status.component(Component::LoadCell).unwrap().status,
            CalibrationStatus::Requesting
        );
        assert_eq!(status.link.mode, LinkMode::Simulated);
    }

    #[tokio::test]
    async fn rejection_goes_to_requester_only() {
        let mut c = coordinator();
        let d = c
            .handle(Command::WorkProcess(WorkAction::StopProcessing))
            .await;
        assert!(d.broadcast.is_empty());
        let Outbound::Error(payload) = &d.reply[0] else {
            panic!("expected error reply");
        };
        assert_eq!(payload.code, codes::NOT_PROCESSING);
    }

    #[tokio::test]
    async fn idle_tick_emits_nothing() {
        let mut c = coordinator();
        assert!(c.tick().await.is_empty());
    }

    #[tokio::test]
    async fn shutdown_fails_live_session_and_closes_link() {
        let mut c = coordinator();
        c.handle(Command::CalibrationRequest {
            component: Component::Stepper,
        })
        .await;
        let out = c.shutdown().await;
        let Outbound::CalibrationUpdate(update) = &out[0] else {
            panic!("expected calibration update");
        };
        assert_eq!(update.status, CalibrationStatus::Failed);
        assert!(c.tick().await.is_empty());
    }
}
