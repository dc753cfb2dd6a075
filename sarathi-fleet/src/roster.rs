//! In-memory fleet roster
//!
//! Robots are keyed by mesh address and kept in arrival order, which is the
//! order every pass over the fleet (deltas, reports) follows.

use setu_io::mesh::{Address, LightConfig, MovementConfig, RobotId};

/// Indicator shown while a robot is present but idle
pub const PRESENCE_LED: LightConfig = LightConfig::new(0, 230, 10, 500);

/// Indicator shown once a robot acknowledged its movement
pub const CONFIGURED_LED: LightConfig = LightConfig::new(230, 0, 10, 150);

/// Per-robot execution state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionState {
    /// Idle, or finished the last movement
    #[default]
    Ready,
    /// Movement sent, acknowledgement outstanding
    Configuring,
    /// Movement acknowledged, waiting for the fleet-wide start
    Configured,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Robot {
    /// 12 lower-case hex characters of the device id
    pub identity: String,
    pub id: RobotId,
    pub address: Address,
    pub state: ExecutionState,
    pub movement: MovementConfig,
    pub led: LightConfig,
    pub revolutions: u8,
}

impl Robot {
    pub fn new(address: Address, id: RobotId, speed_pct: u8) -> Self {
        Self {
            identity: id.to_string(),
            id,
            address,
            state: ExecutionState::Ready,
            movement: MovementConfig {
                speed_pct,
                ..MovementConfig::default()
            },
            led: PRESENCE_LED,
            revolutions: 0,
        }
    }
}

#[derive(Debug, Default)]
pub struct Roster {
    robots: Vec<Robot>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a robot; `false` if its address is already taken.
    pub fn insert(&mut self, robot: Robot) -> bool {
        if self.get(robot.address).is_some() {
            return false;
        }
        self.robots.push(robot);
        true
    }

    pub fn get(&self, address: Address) -> Option<&Robot> {
        self.robots.iter().find(|r| r.address == address)
    }

    pub fn get_mut(&mut self, address: Address) -> Option<&mut Robot> {
        self.robots.iter_mut().find(|r| r.address == address)
    }

    pub fn by_identity_mut(&mut self, identity: &str) -> Option<&mut Robot> {
        self.robots.iter_mut().find(|r| r.identity == identity)
    }

    pub fn remove(&mut self, address: Address) -> Option<Robot> {
        let index = self.robots.iter().position(|r| r.address == address)?;
        Some(self.robots.remove(index))
    }

    pub fn remove_identity(&mut self, identity: &str) -> Option<Robot> {
        let index = self.robots.iter().position(|r| r.identity == identity)?;
        Some(self.robots.remove(index))
    }

    /// True when every robot is in `state`. Never true for an empty roster.
    pub fn all_in(&self, state: ExecutionState) -> bool {
        !self.robots.is_empty() && self.robots.iter().all(|r| r.state == state)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Robot> {
        self.robots.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Robot> {
        self.robots.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.robots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.robots.is_empty()
    }
}
