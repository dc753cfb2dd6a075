//! Device-shadow JSON documents
//!
//! Reports go up as
//! `{"state":{"reported":{"robots":{"<id>":{...}}},"desired":null}}`; the
//! `desired: null` clears whatever desired state was consumed. Deltas come
//! down with a top-level `version` and the robot map either at
//! `state.robots` or `state.desired.robots`.
//!
//! Malformed input never fails loudly: a field of the wrong type is treated
//! as absent and a document without a version is no delta at all.

use crate::error::Result;
use crate::roster::Robot;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Remove every robot from the shadow
pub const REMOVE_ALL: &[u8] = br#"{"state":null}"#;

/// Per-robot entry of a reported document; absent fields are left untouched
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RobotReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drive_time_ms: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub angle_deg: Option<i32>,
    /// `[red, green, blue, blink_time_ms]`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub led: Option<[u16; 4]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revolution_count: Option<u8>,
}

impl RobotReport {
    /// Everything known about the robot
    pub fn full(robot: &Robot) -> Self {
        Self {
            revolution_count: Some(robot.revolutions),
            led: Some(led_array(robot)),
            ..Self::movement(robot)
        }
    }

    /// The movement the robot acknowledged
    pub fn movement(robot: &Robot) -> Self {
        Self {
            drive_time_ms: Some(robot.movement.time_ms),
            angle_deg: Some(robot.movement.angle_deg),
            ..Self::default()
        }
    }

    pub fn revolutions(robot: &Robot) -> Self {
        Self {
            revolution_count: Some(robot.revolutions),
            ..Self::default()
        }
    }
}

fn led_array(robot: &Robot) -> [u16; 4] {
    [
        u16::from(robot.led.red),
        u16::from(robot.led.green),
        u16::from(robot.led.blue),
        robot.led.blink_time_ms,
    ]
}

#[derive(Serialize)]
struct ReportDocument {
    state: ReportState,
}

#[derive(Serialize)]
struct ReportState {
    reported: Reported,
    desired: Option<()>,
}

#[derive(Serialize)]
struct Reported {
    robots: BTreeMap<String, Option<RobotReport>>,
}

fn encode_document(robots: BTreeMap<String, Option<RobotReport>>) -> Result<Vec<u8>> {
    let document = ReportDocument {
        state: ReportState {
            reported: Reported { robots },
            desired: None,
        },
    };
    Ok(serde_json::to_vec(&document)?)
}

/// Reported document for the given robots, keyed by identity
pub fn encode_report<I>(robots: I) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = (String, RobotReport)>,
{
    encode_document(
        robots
            .into_iter()
            .map(|(identity, report)| (identity, Some(report)))
            .collect(),
    )
}

/// Reported document removing one robot
pub fn encode_remove_robot(identity: &str) -> Result<Vec<u8>> {
    encode_document(BTreeMap::from([(identity.to_string(), None)]))
}

/// Partial LED update; entries merge by index
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedUpdate {
    pub red: Option<u8>,
    pub green: Option<u8>,
    pub blue: Option<u8>,
    pub blink_time_ms: Option<u16>,
}

impl LedUpdate {
    pub fn is_empty(&self) -> bool {
        self.red.is_none()
            && self.green.is_none()
            && self.blue.is_none()
            && self.blink_time_ms.is_none()
    }
}

/// Desired changes for one robot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RobotUpdate {
    pub drive_time_ms: Option<u32>,
    pub angle_deg: Option<i32>,
    pub led: LedUpdate,
}

impl RobotUpdate {
    pub fn has_movement(&self) -> bool {
        self.drive_time_ms.is_some() || self.angle_deg.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RobotDelta {
    Update(RobotUpdate),
    /// `null` entry: the cloud removed the robot
    Removed,
}

/// Versioned desired-state change
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShadowDelta {
    pub version: u64,
    pub robots: BTreeMap<String, RobotDelta>,
}

/// Parse a delta document, `None` when it has no usable version.
pub fn decode_delta(bytes: &[u8]) -> Option<ShadowDelta> {
    let document: Value = match serde_json::from_slice(bytes) {
        Ok(document) => document,
        Err(e) => {
            tracing::debug!("Delta is not JSON: {}", e);
            return None;
        }
    };
    let Some(version) = document.get("version").and_then(Value::as_u64) else {
        tracing::debug!("Delta without a version discarded");
        return None;
    };

    let robots = document
        .get("state")
        .and_then(|state| {
            state
                .get("robots")
                .or_else(|| state.get("desired").and_then(|d| d.get("robots")))
        })
        .and_then(Value::as_object)
        .map(decode_robots)
        .unwrap_or_default();

    Some(ShadowDelta { version, robots })
}

fn decode_robots(entries: &Map<String, Value>) -> BTreeMap<String, RobotDelta> {
    entries
        .iter()
        .filter_map(|(identity, entry)| {
            let delta = match entry {
                Value::Null => RobotDelta::Removed,
                Value::Object(fields) => RobotDelta::Update(decode_update(fields)),
                other => {
                    tracing::debug!("Robot {} entry ignored: {}", identity, other);
                    return None;
                }
            };
            Some((identity.clone(), delta))
        })
        .collect()
}

fn decode_update(fields: &Map<String, Value>) -> RobotUpdate {
    let drive_time_ms = fields
        .get("driveTimeMs")
        .and_then(Value::as_u64)
        .and_then(|v| u32::try_from(v).ok());
    let angle_deg = fields
        .get("angleDeg")
        .and_then(Value::as_i64)
        .and_then(|v| i32::try_from(v).ok());

    let led = match fields.get("led").and_then(Value::as_array) {
        Some(values) => {
            let entry = |i: usize| values.get(i).and_then(Value::as_u64);
            LedUpdate {
                red: entry(0).and_then(|v| u8::try_from(v).ok()),
                green: entry(1).and_then(|v| u8::try_from(v).ok()),
                blue: entry(2).and_then(|v| u8::try_from(v).ok()),
                blink_time_ms: entry(3).and_then(|v| u16::try_from(v).ok()),
            }
        }
        None => LedUpdate::default(),
    };

    RobotUpdate {
        drive_time_ms,
        angle_deg,
        led,
    }
}
