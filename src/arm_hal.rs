use std::fmt;

use derive_new::new;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArmError {
    #[error("{0}")]
    NotConnected(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("{0}")]
    Fault(String),
}

pub type ArmResult<T> = Result<T, ArmError>;

/// Blocking access to a single arm.  Every call returns only once the arm has finished acting on
/// it, so callers can sequence moves without polling.
pub trait ArmHal {
    fn move_to(&mut self, target: Waypoint) -> ArmResult<()>;
    fn set_end_effector(&mut self, engaged: bool) -> ArmResult<()>;
    fn get_pose(&mut self) -> ArmResult<ArmPose>;
    fn close(&mut self) -> ArmResult<()>;
}

/// Fully resolved cartesian target in the arm frame (millimeters, rotation in degrees).
#[derive(Debug, PartialEq, Copy, Clone, Serialize, Deserialize, new)]
pub struct Waypoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub r: f64,
}

impl fmt::Display for Waypoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(x={:.2}, y={:.2}, z={:.2}, r={:.2})", self.x, self.y, self.z, self.r)
    }
}

#[derive(Debug, PartialEq, Copy, Clone, Serialize, new)]
pub struct ArmPose {
    pub position: Waypoint,
    pub joints: [f64; 4],
}
