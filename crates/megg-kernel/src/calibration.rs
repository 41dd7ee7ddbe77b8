//! [`CalibrationMachine`] – per-component calibration progression.
//!
//! ```text
//! idle ──request──▶ requesting ──step 1──▶ in_progress ──step 4──▶ complete
//!   ▲                    │                      │
//!   └────── failed ◀─────┴──────────────────────┘
//! ```
//!
//! The machine never touches the hardware. The owner asks for
//! [`next_command`][CalibrationMachine::next_command], performs the round
//! trip and feeds the outcome back through
//! [`apply`][CalibrationMachine::apply]. Each call yields exactly one
//! [`CalibrationUpdate`] to broadcast.
//!
//! At most one session is live across all components. A failed attempt is
//! broadcast as `failed` but the stored status returns to `idle` with the
//! reason kept in `last_error`.

use std::collections::BTreeMap;

use chrono::Utc;
use megg_hal::{FINAL_CALIBRATION_STEP, LinkCommand, LinkReply};
use megg_types::{
    CalibrationProgress, CalibrationStatus, CalibrationUpdate, Component, ComponentState,
    MeggError, codes,
};
use tracing::{info, warn};

use crate::messages::MessageTable;

/// Percentage added by each completed step.
const PROGRESS_PER_STEP: u8 = 100 / FINAL_CALIBRATION_STEP;

#[derive(Debug, Clone)]
struct Session {
    component: Component,
    /// Last step acknowledged by the board; 0 while `requesting`.
    step: u8,
    status: CalibrationStatus,
    message: String,
}

impl Session {
    fn progress(&self) -> u8 {
        self.step.saturating_mul(PROGRESS_PER_STEP).min(100)
    }
}

pub struct CalibrationMachine {
    states: BTreeMap<Component, ComponentState>,
    session: Option<Session>,
    messages: MessageTable,
}

impl Default for CalibrationMachine {
    fn default() -> Self {
        Self::new(MessageTable::default())
    }
}

impl CalibrationMachine {
    pub fn new(messages: MessageTable) -> Self {
        Self {
            states: Component::ALL
                .into_iter()
                .map(|c| (c, ComponentState::new(c)))
                .collect(),
            session: None,
            messages,
        }
    }

    /// Open a session for `component`.
    ///
    /// # Errors
    ///
    /// - `process_active` while a work batch is running.
    /// - `calibration_busy` while any session is live, including one for the
    ///   same component.
    ///
    /// A rejection leaves the machine unchanged.
    pub fn request(
        &mut self,
        component: Component,
        process_active: bool,
    ) -> Result<CalibrationUpdate, MeggError> {
        if process_active {
            return Err(MeggError::rejected(
                codes::PROCESS_ACTIVE,
                format!("Cannot calibrate {component} while a batch is being processed"),
            ));
        }
        if let Some(session) = &self.session {
            let message = if session.component == component {
                format!("{component} is already calibrating")
            } else {
                format!(
                    "{} is calibrating; wait for it to finish before calibrating {component}",
                    session.component
                )
            };
            return Err(MeggError::rejected(codes::CALIBRATION_BUSY, message));
        }

        let session = Session {
            component,
            step: 0,
            status: CalibrationStatus::Requesting,
            message: self.messages.message(component, 0).to_string(),
        };
        self.set_status(component, CalibrationStatus::Requesting);
        info!(component = %component, "calibration requested");

        let update = self.update(&session, None, None);
        self.session = Some(session);
        Ok(update)
    }

    /// The round trip that advances the live session, if any.
    pub fn next_command(&self) -> Option<LinkCommand> {
        self.session.as_ref().map(|s| LinkCommand::Calibrate {
            component: s.component,
            step: s.step + 1,
        })
    }

    /// Feed back the outcome of [`next_command`][Self::next_command].
    ///
    /// Returns `None` when no session is live (it was aborted meanwhile).
    pub fn apply(&mut self, outcome: Result<LinkReply, MeggError>) -> Option<CalibrationUpdate> {
        let session = self.session.take()?;
        let component = session.component;
        let step = session.step + 1;
        let is_final = step >= FINAL_CALIBRATION_STEP;

        let update = match outcome {
            Ok(LinkReply::CalibrationComplete {
                component: c,
                parameters,
            }) if c == component => self.complete(session, parameters),
            Ok(LinkReply::CalibrationStep { component: c, .. }) if c == component => {
                self.acknowledge(session, step, is_final)
            }
            Ok(LinkReply::Ok(_) | LinkReply::Status(_)) => {
                self.acknowledge(session, step, is_final)
            }
            Ok(LinkReply::Error(reason)) => self.fail(session, reason),
            Ok(other) => self.fail(session, format!("unexpected reply: {}", other.encode())),
            Err(e) => self.fail(session, e.to_string()),
        };
        Some(update)
    }

    /// Fail the live session, e.g. because the link was lost or the service
    /// is shutting down.
    pub fn abort(&mut self, reason: impl Into<String>) -> Option<CalibrationUpdate> {
        let session = self.session.take()?;
        Some(self.fail(session, reason.into()))
    }

    fn acknowledge(&mut self, session: Session, step: u8, is_final: bool) -> CalibrationUpdate {
        if is_final {
            self.complete(session, BTreeMap::new())
        } else {
            self.advance(session, step)
        }
    }

    fn advance(&mut self, mut session: Session, step: u8) -> CalibrationUpdate {
        session.step = step;
        session.status = CalibrationStatus::InProgress;
        session.message = self.messages.message(session.component, step.into()).to_string();
        self.set_status(session.component, CalibrationStatus::InProgress);

        let update = self.update(&session, None, None);
        self.session = Some(session);
        update
    }

    fn complete(
        &mut self,
        mut session: Session,
        parameters: BTreeMap<String, f64>,
    ) -> CalibrationUpdate {
        session.step = FINAL_CALIBRATION_STEP;
        session.status = CalibrationStatus::Complete;
        session.message = self
            .messages
            .message(session.component, FINAL_CALIBRATION_STEP.into())
            .to_string();

        if let Some(state) = self.states.get_mut(&session.component) {
            state.status = CalibrationStatus::Complete;
            state.last_calibrated_at = Some(Utc::now());
            state.parameters = parameters.clone();
            state.last_error = None;
        }
        info!(component = %session.component, ?parameters, "calibration complete");
        self.update(&session, Some(parameters), None)
    }

    fn fail(&mut self, mut session: Session, reason: String) -> CalibrationUpdate {
        session.status = CalibrationStatus::Failed;
        session.message = self.messages.failure(session.component, &reason);

        if let Some(state) = self.states.get_mut(&session.component) {
            state.status = CalibrationStatus::Idle;
            state.last_error = Some(reason.clone());
        }
        warn!(component = %session.component, reason = %reason, "calibration failed");
        self.update(&session, None, Some(reason))
    }

    fn set_status(&mut self, component: Component, status: CalibrationStatus) {
        if let Some(state) = self.states.get_mut(&component) {
            state.status = status;
        }
    }

    fn update(
        &self,
        session: &Session,
        parameters: Option<BTreeMap<String, f64>>,
        reason: Option<String>,
    ) -> CalibrationUpdate {
        CalibrationUpdate {
            component: session.component,
            status: session.status,
            progress: if session.status == CalibrationStatus::Complete {
                100
            } else {
                session.progress()
            },
            message: session.message.clone(),
            parameters,
            reason,
        }
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    /// Component records in [`Component::ALL`] order.
    pub fn states(&self) -> Vec<ComponentState> {
        self.states.values().cloned().collect()
    }

    pub fn state(&self, component: Component) -> Option<&ComponentState> {
        self.states.get(&component)
    }

    pub fn active(&self) -> Option<CalibrationProgress> {
        self.session.as_ref().map(|s| CalibrationProgress {
            component: s.component,
            status: s.status,
            progress: s.progress(),
            message: s.message.clone(),
        })
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    /// Components whose last recorded status is not `complete`.
    pub fn uncalibrated(&self) -> Vec<Component> {
        self.states
            .values()
            .filter(|s| s.status != CalibrationStatus::Complete)
            .map(|s| s.component)
            .collect()
    }

    pub fn all_complete(&self) -> bool {
        self.uncalibrated().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn step_reply(component: Component, step: u8) -> Result<LinkReply, MeggError> {
        Ok(LinkReply::CalibrationStep {
            component,
            step,
            reading: Some(1.0),
        })
    }

    fn run_to_completion(machine: &mut CalibrationMachine, component: Component) -> Vec<CalibrationUpdate> {
        let mut updates = vec![machine.request(component, false).unwrap()];
        while let Some(LinkCommand::Calibrate { step, .. }) = machine.next_command() {
            let reply = if step == FINAL_CALIBRATION_STEP {
                Ok(LinkReply::CalibrationComplete {
                    component,
                    parameters: BTreeMap::from([("zero_offset".to_string(), 8423.5)]),
                })
            } else {
                step_reply(component, step)
            };
            updates.extend(machine.apply(reply));
        }
        updates
    }

    #[test]
    fn emits_increasing_progress_then_exactly_one_terminal() {
        let mut machine = CalibrationMachine::default();
        let updates = run_to_completion(&mut machine, Component::LoadCell);

        let progress: Vec<u8> = updates.iter().map(|u| u.progress).collect();
        assert_eq!(progress, vec![0, 25, 50, 75, 100]);
        assert_eq!(updates[0].status, CalibrationStatus::Requesting);
        assert_eq!(updates[1].status, CalibrationStatus::InProgress);
        assert_eq!(
            updates.iter().filter(|u| u.status.is_terminal()).count(),
            1
        );

        let state = machine.state(Component::LoadCell).unwrap();
        assert_eq!(state.status, CalibrationStatus::Complete);
        assert_eq!(state.parameters["zero_offset"], 8423.5);
        assert!(state.last_calibrated_at.is_some());
        assert!(!machine.is_active());
    }

    #[test]
    fn step_commands_use_component_codes() {
        let mut machine = CalibrationMachine::default();
        machine.request(Component::GrippingServo, false).unwrap();
        assert_eq!(
            machine.next_command().unwrap().encode(),
            "CALIBRATE_MG996R:1"
        );
    }

    #[test]
    fn busy_rejection_leaves_session_untouched() {
        let mut machine = CalibrationMachine::default();
        machine.request(Component::Stepper, false).unwrap();
        machine.apply(step_reply(Component::Stepper, 1));
        let before = machine.active();

        let same = machine.request(Component::Stepper, false).unwrap_err();
        assert_eq!(same.code(), codes::CALIBRATION_BUSY);
        let other = machine.request(Component::LoadCell, false).unwrap_err();
        assert_eq!(other.code(), codes::CALIBRATION_BUSY);

        assert_eq!(machine.active(), before);
        assert_eq!(
            machine.state(Component::LoadCell).unwrap().status,
            CalibrationStatus::Idle
        );
    }

    #[test]
    fn rejected_while_processing() {
        let mut machine = CalibrationMachine::default();
        let err = machine.request(Component::Controller, true).unwrap_err();
        assert_eq!(err.code(), codes::PROCESS_ACTIVE);
        assert!(!machine.is_active());
    }

    #[test]
    fn device_error_fails_and_reverts_to_idle() {
        let mut machine = CalibrationMachine::default();
        machine.request(Component::Stepper, false).unwrap();
        machine.apply(step_reply(Component::Stepper, 1));
        let update = machine
            .apply(Ok(LinkReply::Error("NEMA23 not responding".into())))
            .unwrap();

        assert_eq!(update.status, CalibrationStatus::Failed);
        assert_eq!(update.progress, 25);
        assert_eq!(update.reason.as_deref(), Some("NEMA23 not responding"));

        let state = machine.state(Component::Stepper).unwrap();
        assert_eq!(state.status, CalibrationStatus::Idle);
        assert_eq!(state.last_error.as_deref(), Some("NEMA23 not responding"));

        // Retry is possible.
        assert!(machine.request(Component::Stepper, false).is_ok());
    }

    #[test]
    fn transport_error_fails_session() {
        let mut machine = CalibrationMachine::default();
        machine.request(Component::LoadCell, false).unwrap();
        let update = machine
            .apply(Err(MeggError::LinkTimeout(Duration::from_secs(1))))
            .unwrap();
        assert_eq!(update.status, CalibrationStatus::Failed);
        assert!(machine.next_command().is_none());
    }

    #[test]
    fn reply_for_another_component_fails() {
        let mut machine = CalibrationMachine::default();
        machine.request(Component::LoadCell, false).unwrap();
        let update = machine.apply(step_reply(Component::Stepper, 1)).unwrap();
        assert_eq!(update.status, CalibrationStatus::Failed);
    }

    #[test]
    fn plain_acks_still_advance() {
        let mut machine = CalibrationMachine::default();
        machine.request(Component::Controller, false).unwrap();
        for _ in 1..FINAL_CALIBRATION_STEP {
            let update = machine.apply(Ok(LinkReply::Ok(None))).unwrap();
            assert_eq!(update.status, CalibrationStatus::InProgress);
        }
        let done = machine.apply(Ok(LinkReply::Ok(None))).unwrap();
        assert_eq!(done.status, CalibrationStatus::Complete);
        assert_eq!(done.parameters, Some(BTreeMap::new()));
    }

    #[test]
    fn abort_without_session_is_noop() {
        let mut machine = CalibrationMachine::default();
        assert!(machine.abort("link lost").is_none());
        assert!(machine.apply(Ok(LinkReply::Ok(None))).is_none());
    }

    #[test]
    fn all_complete_tracks_every_component() {
        let mut machine = CalibrationMachine::default();
        for c in Component::ALL {
            assert!(!machine.all_complete());
            run_to_completion(&mut machine, c);
        }
        assert!(machine.all_complete());
        assert!(machine.uncalibrated().is_empty());

        // Recalibrating a component makes it block again until it completes.
        machine.request(Component::Stepper, false).unwrap();
        assert_eq!(machine.uncalibrated(), vec![Component::Stepper]);
    }
}
