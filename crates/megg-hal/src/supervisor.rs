//! [`Link`] – the single hardware handle the coordinator owns.
//!
//! `Link` wraps whichever [`HardwareLink`] driver is live and implements the
//! recovery policy:
//!
//! 1. On start-up, try every candidate port in order; if none answers, run
//!    simulated. Starting simulated is a normal operating mode, not a fault.
//! 2. On a transport failure in real mode, reopen the same port once and
//!    retry the command.
//! 3. If that also fails, demote to [`SimulatedLink`] and record a pending
//!    degradation that the owner collects with [`Link::take_degradation`].

use std::sync::Arc;

use async_trait::async_trait;
use megg_types::{LinkMode, LinkStatus, MeggError};
use tracing::{info, warn};

use crate::discovery::{available_ports, candidate_ports};
use crate::frame::{LinkCommand, LinkReply};
use crate::link::{HardwareLink, LinkSettings, SimSettings};
use crate::serial::RealLink;
use crate::sim::SimulatedLink;

/// Opens real drivers. Abstracted so tests can stand in for serial ports.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Ports to try, in order.
    fn candidates(&self) -> Vec<String>;

    async fn open(&self, port: &str) -> Result<Box<dyn HardwareLink>, MeggError>;
}

pub struct SerialConnector {
    settings: LinkSettings,
}

impl SerialConnector {
    pub fn new(settings: LinkSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Connector for SerialConnector {
    fn candidates(&self) -> Vec<String> {
        candidate_ports(&self.settings, &available_ports())
    }

    async fn open(&self, port: &str) -> Result<Box<dyn HardwareLink>, MeggError> {
        let link = RealLink::open(port, &self.settings).await?;
        Ok(Box::new(link))
    }
}

pub struct Link {
    driver: Box<dyn HardwareLink>,
    connector: Option<Arc<dyn Connector>>,
    sim: SimSettings,
    degraded: bool,
    detail: Option<String>,
    degradation: Option<MeggError>,
    closed: bool,
}

impl Link {
    /// Probe the connector's candidates and fall back to simulation.
    pub async fn connect(connector: Arc<dyn Connector>, sim: SimSettings) -> Self {
        let candidates = connector.candidates();
        for port in &candidates {
            match connector.open(port).await {
                Ok(driver) => {
                    info!(port = %port, "hardware link connected");
                    return Self {
                        driver,
                        connector: Some(connector),
                        sim,
                        degraded: false,
                        detail: None,
                        degradation: None,
                        closed: false,
                    };
                }
                Err(e) => warn!(port = %port, error = %e, "port unavailable"),
            }
        }

        info!(
            tried = candidates.len(),
            "no controller board found, running simulated"
        );
        let mut link = Self::simulated(&sim);
        link.detail = Some("no controller board found".into());
        link
    }

    /// Open from settings, honouring `force_simulation`.
    pub async fn connect_with(settings: &LinkSettings) -> Self {
        if settings.force_simulation {
            info!("simulation forced by configuration");
            let mut link = Self::simulated(&settings.sim);
            link.detail = Some("simulation forced by configuration".into());
            return link;
        }
        let connector = Arc::new(SerialConnector::new(settings.clone()));
        Self::connect(connector, settings.sim.clone()).await
    }

    pub fn simulated(sim: &SimSettings) -> Self {
        Self::from_driver(Box::new(SimulatedLink::new(sim)))
    }

    /// Wrap an arbitrary driver with no reconnect capability.
    pub fn from_driver(driver: Box<dyn HardwareLink>) -> Self {
        Self {
            driver,
            connector: None,
            sim: SimSettings::default(),
            degraded: false,
            detail: None,
            degradation: None,
            closed: false,
        }
    }

    pub fn mode(&self) -> LinkMode {
        self.driver.mode()
    }

    pub fn status(&self) -> LinkStatus {
        LinkStatus {
            mode: self.driver.mode(),
            port: self.driver.port().map(str::to_string),
            degraded: self.degraded,
            detail: self.detail.clone(),
        }
    }

    /// One framed round trip, with reconnect-then-demote on transport
    /// failure.
    ///
    /// # Errors
    ///
    /// The command's own failure is always returned, even when the link
    /// recovered by demoting; the next call goes to the simulated driver.
    pub async fn send(&mut self, command: &LinkCommand) -> Result<LinkReply, MeggError> {
        if self.closed {
            return Err(MeggError::LinkUnavailable("link disconnected".into()));
        }

        let err = match self.driver.send(command).await {
            Err(e) if e.is_transport() && self.driver.mode() == LinkMode::Real => e,
            other => return other,
        };

        let port = self.driver.port().unwrap_or_default().to_string();
        warn!(port = %port, error = %err, command = %command.encode(), "link failure, reconnecting");
        self.driver.disconnect();

        let reopened = match &self.connector {
            Some(connector) => connector.open(&port).await,
            None => Err(err.clone()),
        };

        match reopened {
            Ok(driver) => {
                self.driver = driver;
                match self.driver.send(command).await {
                    Err(retry_err) if retry_err.is_transport() => {
                        self.demote(&port, &retry_err);
                        Err(retry_err)
                    }
                    other => {
                        info!(port = %port, "hardware link recovered");
                        other
                    }
                }
            }
            Err(reconnect_err) => {
                warn!(port = %port, error = %reconnect_err, "reconnect failed");
                self.demote(&port, &err);
                Err(err)
            }
        }
    }

    fn demote(&mut self, port: &str, cause: &MeggError) {
        self.driver.disconnect();
        self.driver = Box::new(SimulatedLink::new(&self.sim));
        self.degraded = true;
        self.detail = Some(format!("lost {port}: {cause}"));
        self.degradation = Some(cause.clone());
        warn!(port = %port, error = %cause, "hardware link degraded to simulation");
    }

    /// Take the degradation recorded since the last call, if any.
    pub fn take_degradation(&mut self) -> Option<MeggError> {
        self.degradation.take()
    }

    pub fn disconnect(&mut self) {
        if !self.closed {
            self.closed = true;
            self.driver.disconnect();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    /// A "real" driver whose replies are scripted; once the script runs out
    /// it answers `OK`.
    struct ScriptedLink {
        port: String,
        script: VecDeque<Result<LinkReply, MeggError>>,
    }

    #[async_trait]
    impl HardwareLink for ScriptedLink {
        fn mode(&self) -> LinkMode {
            LinkMode::Real
        }

        fn port(&self) -> Option<&str> {
            Some(&self.port)
        }

        async fn send(&mut self, _command: &LinkCommand) -> Result<LinkReply, MeggError> {
            self.script.pop_front().unwrap_or(Ok(LinkReply::Ok(None)))
        }

        fn disconnect(&mut self) {}
    }

    /// Opens only the ports in `openable`; each opened link gets the next
    /// script from `scripts`.
    struct MockConnector {
        ports: Vec<String>,
        openable: Mutex<Vec<String>>,
        scripts: Mutex<VecDeque<Vec<Result<LinkReply, MeggError>>>>,
        opens: AtomicUsize,
    }

    impl MockConnector {
        fn new(ports: &[&str], openable: &[&str]) -> Self {
            Self {
                ports: ports.iter().map(|p| p.to_string()).collect(),
                openable: Mutex::new(openable.iter().map(|p| p.to_string()).collect()),
                scripts: Mutex::new(VecDeque::new()),
                opens: AtomicUsize::new(0),
            }
        }

        fn script(self, replies: Vec<Result<LinkReply, MeggError>>) -> Self {
            self.scripts.lock().unwrap().push_back(replies);
            self
        }

        fn unplug_all(&self) {
            self.openable.lock().unwrap().clear();
        }
    }

    #[async_trait]
    impl Connector for MockConnector {
        fn candidates(&self) -> Vec<String> {
            self.ports.clone()
        }

        async fn open(&self, port: &str) -> Result<Box<dyn HardwareLink>, MeggError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            if !self.openable.lock().unwrap().iter().any(|p| p == port) {
                return Err(MeggError::LinkIo {
                    port: port.to_string(),
                    details: "No such file or directory".into(),
                });
            }
            let script = self.scripts.lock().unwrap().pop_front().unwrap_or_default();
            Ok(Box::new(ScriptedLink {
                port: port.to_string(),
                script: script.into(),
            }))
        }
    }

    fn quiet_sim() -> SimSettings {
        SimSettings {
            latency: Duration::ZERO,
            seed: Some(1),
            good_rate: 1.0,
        }
    }

    fn timeout() -> MeggError {
        MeggError::LinkTimeout(Duration::from_secs(1))
    }

    #[tokio::test]
    async fn falls_back_to_simulation_when_no_port_opens() {
        let connector = Arc::new(MockConnector::new(&["/dev/ttyUSB0", "/dev/ttyACM0"], &[]));
        let link = Link::connect(connector.clone(), quiet_sim()).await;

        assert_eq!(link.mode(), LinkMode::Simulated);
        assert!(!link.status().degraded);
        assert_eq!(connector.opens.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn connects_to_first_openable_candidate() {
        let connector = Arc::new(MockConnector::new(
            &["/dev/ttyUSB0", "/dev/ttyACM0", "/dev/ttyACM1"],
            &["/dev/ttyACM0", "/dev/ttyACM1"],
        ));
        let link = Link::connect(connector, quiet_sim()).await;

        let status = link.status();
        assert_eq!(status.mode, LinkMode::Real);
        assert_eq!(status.port.as_deref(), Some("/dev/ttyACM0"));
    }

    #[tokio::test]
    async fn timeout_reconnects_once_and_retries() {
        let connector =
            Arc::new(MockConnector::new(&["/dev/ttyUSB0"], &["/dev/ttyUSB0"]).script(vec![Err(timeout())]));
        let mut link = Link::connect(connector.clone(), quiet_sim()).await;

        let reply = link.send(&LinkCommand::Home).await.unwrap();
        assert_eq!(reply, LinkReply::Ok(None));
        assert_eq!(link.mode(), LinkMode::Real);
        assert!(link.take_degradation().is_none());
        assert_eq!(connector.opens.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_reconnect_demotes_to_simulation() {
        let connector =
            Arc::new(MockConnector::new(&["/dev/ttyUSB0"], &["/dev/ttyUSB0"]).script(vec![Err(timeout())]));
        let mut link = Link::connect(connector.clone(), quiet_sim()).await;
        connector.unplug_all();

        let err = link.send(&LinkCommand::Home).await.unwrap_err();
        assert!(err.is_transport());

        let status = link.status();
        assert_eq!(status.mode, LinkMode::Simulated);
        assert!(status.degraded);
        assert!(status.detail.unwrap().contains("/dev/ttyUSB0"));
        assert!(link.take_degradation().is_some());
        assert!(link.take_degradation().is_none(), "degradation is reported once");

        // Subsequent traffic is served by the simulator.
        assert!(link.send(&LinkCommand::Status).await.is_ok());
    }

    #[tokio::test]
    async fn device_errors_do_not_trigger_reconnect() {
        let connector = Arc::new(
            MockConnector::new(&["/dev/ttyUSB0"], &["/dev/ttyUSB0"])
                .script(vec![Ok(LinkReply::Error("HX711 not responding".into()))]),
        );
        let mut link = Link::connect(connector.clone(), quiet_sim()).await;

        let reply = link.send(&LinkCommand::Status).await.unwrap();
        assert_eq!(reply, LinkReply::Error("HX711 not responding".into()));
        assert_eq!(connector.opens.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let mut link = Link::simulated(&quiet_sim());
        link.disconnect();
        link.disconnect();
        let err = link.send(&LinkCommand::Status).await.unwrap_err();
        assert!(matches!(err, MeggError::LinkUnavailable(_)));
        assert!(link.take_degradation().is_none());
    }

    #[tokio::test]
    async fn forced_simulation_skips_probing() {
        let mut settings = LinkSettings::default();
        settings.force_simulation = true;
        let link = Link::connect_with(&settings).await;
        assert_eq!(link.mode(), LinkMode::Simulated);
        assert!(link.status().detail.unwrap().contains("forced"));
    }
}
