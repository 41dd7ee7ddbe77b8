//! Line framing for the controller board's serial protocol.
//!
//! Every command is one ASCII line terminated by `\n`; the board answers with
//! one or more lines, the last of which is the reply proper.
//!
//! | Command | Typical reply |
//! |---|---|
//! | `STATUS` | `STATUS:READY` |
//! | `CALIBRATE_HX711:2` | `CALIBRATION_STEP:HX711:2:8423.5` |
//! | `CALIBRATE_HX711:4` | `CALIBRATION_COMPLETE:HX711:zero_offset=8423.5,scale_factor=431.2` |
//! | `HOME` / `START` / `STOP` | `OK` |
//! | `INSPECT` | `EGG:58.4:GOOD` |
//!
//! Any command may be answered with `ERROR:<message>`.

use std::collections::BTreeMap;

use megg_types::Component;

/// Step number of the final calibration round trip.
pub const FINAL_CALIBRATION_STEP: u8 = 4;

/// A command written to the controller board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkCommand {
    Status,
    Calibrate { component: Component, step: u8 },
    Home,
    Start,
    Stop,
    Inspect,
}

impl LinkCommand {
    /// Encode without the trailing newline.
    pub fn encode(&self) -> String {
        match self {
            LinkCommand::Status => "STATUS".to_string(),
            LinkCommand::Calibrate { component, step } => {
                format!("CALIBRATE_{}:{step}", component.hardware_code())
            }
            LinkCommand::Home => "HOME".to_string(),
            LinkCommand::Start => "START".to_string(),
            LinkCommand::Stop => "STOP".to_string(),
            LinkCommand::Inspect => "INSPECT".to_string(),
        }
    }
}

/// A parsed reply line.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkReply {
    Ok(Option<String>),
    Status(String),
    CalibrationStarted(Component),
    CalibrationStep {
        component: Component,
        step: u8,
        reading: Option<f64>,
    },
    CalibrationComplete {
        component: Component,
        parameters: BTreeMap<String, f64>,
    },
    Egg {
        weight_g: f64,
        good: bool,
    },
    Error(String),
    /// Anything the parser does not understand; logged and skipped.
    Unrecognized(String),
}

impl LinkReply {
    pub fn parse(line: &str) -> LinkReply {
        let line = line.trim();
        let (head, rest) = match line.split_once(':') {
            Some((head, rest)) => (head, Some(rest)),
            None => (line, None),
        };

        match (head, rest) {
            ("OK", detail) => LinkReply::Ok(detail.map(str::to_string)),
            ("SYSTEM_STARTED" | "SYSTEM_STOPPED", _) => LinkReply::Ok(Some(line.to_string())),
            ("STATUS", detail) => LinkReply::Status(detail.unwrap_or_default().to_string()),
            ("ERROR", detail) => LinkReply::Error(detail.unwrap_or("unknown error").to_string()),
            ("CALIBRATION_START", Some(code)) => match Component::from_hardware_code(code) {
                Some(component) => LinkReply::CalibrationStarted(component),
                None => LinkReply::Unrecognized(line.to_string()),
            },
            ("CALIBRATION_STEP", Some(rest)) => {
                parse_step(rest).unwrap_or_else(|| LinkReply::Unrecognized(line.to_string()))
            }
            ("CALIBRATION_COMPLETE", Some(rest)) => {
                parse_complete(rest).unwrap_or_else(|| LinkReply::Unrecognized(line.to_string()))
            }
            ("EGG", Some(rest)) => {
                parse_egg(rest).unwrap_or_else(|| LinkReply::Unrecognized(line.to_string()))
            }
            _ => LinkReply::Unrecognized(line.to_string()),
        }
    }

    /// Chatter that precedes the actual reply to a command.
    pub fn is_informational(&self) -> bool {
        matches!(
            self,
            LinkReply::CalibrationStarted(_) | LinkReply::Unrecognized(_)
        )
    }

    /// Encode as a reply line, used by the simulator and by tests.
    pub fn encode(&self) -> String {
        match self {
            LinkReply::Ok(None) => "OK".to_string(),
            LinkReply::Ok(Some(detail)) => format!("OK:{detail}"),
            LinkReply::Status(detail) => format!("STATUS:{detail}"),
            LinkReply::CalibrationStarted(c) => format!("CALIBRATION_START:{}", c.hardware_code()),
            LinkReply::CalibrationStep {
                component,
                step,
                reading,
            } => match reading {
                Some(r) => format!("CALIBRATION_STEP:{}:{step}:{r}", component.hardware_code()),
                None => format!("CALIBRATION_STEP:{}:{step}", component.hardware_code()),
            },
            LinkReply::CalibrationComplete {
                component,
                parameters,
            } => {
                let params: Vec<String> =
                    parameters.iter().map(|(k, v)| format!("{k}={v}")).collect();
                format!(
                    "CALIBRATION_COMPLETE:{}:{}",
                    component.hardware_code(),
                    params.join(",")
                )
            }
            LinkReply::Egg { weight_g, good } => {
                format!("EGG:{weight_g}:{}", if *good { "GOOD" } else { "BAD" })
            }
            LinkReply::Error(msg) => format!("ERROR:{msg}"),
            LinkReply::Unrecognized(raw) => raw.clone(),
        }
    }
}

fn parse_step(rest: &str) -> Option<LinkReply> {
    let mut parts = rest.split(':');
    let component = Component::from_hardware_code(parts.next()?)?;
    let step = parts.next()?.trim().parse().ok()?;
    let reading = match parts.next() {
        Some(r) => Some(r.trim().parse().ok()?),
        None => None,
    };
    Some(LinkReply::CalibrationStep {
        component,
        step,
        reading,
    })
}

fn parse_complete(rest: &str) -> Option<LinkReply> {
    let (code, params) = match rest.split_once(':') {
        Some((code, params)) => (code, params),
        None => (rest, ""),
    };
    let component = Component::from_hardware_code(code)?;
    let mut parameters = BTreeMap::new();
    for pair in params.split(',').filter(|p| !p.trim().is_empty()) {
        let (key, value) = pair.split_once('=')?;
        parameters.insert(key.trim().to_string(), value.trim().parse().ok()?);
    }
    Some(LinkReply::CalibrationComplete {
        component,
        parameters,
    })
}

fn parse_egg(rest: &str) -> Option<LinkReply> {
    let (weight, grade) = rest.split_once(':')?;
    let good = match grade.trim() {
        "GOOD" => true,
        "BAD" => false,
        _ => return None,
    };
    Some(LinkReply::Egg {
        weight_g: weight.trim().parse().ok()?,
        good,
    })
}
