use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::block_task::{number_tasks, BlockTask, Position};
use crate::choreography::MotionProfile;
use crate::end_effector::EndEffectorKind;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not read {path:?}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("no blocks configured")]
    NoBlocks,
    #[error("{what}: {field} is not a finite number")]
    NonFinite { what: String, field: &'static str },
    #[error("{what}: reach {reach:.1}mm outside {min:.1}..={max:.1}mm")]
    OutOfReach { what: String, reach: f64, min: f64, max: f64 },
    #[error("{what}: z={z:.2}mm outside {min:.1}..={max:.1}mm")]
    HeightOutOfRange { what: String, z: f64, min: f64, max: f64 },
    #[error("{what}: rotation {r:.2} exceeds +/-{max:.1} degrees")]
    RotationOutOfRange { what: String, r: f64, max: f64 },
    #[error("safe height {safe_height:.2}mm is not above {what} (z={z:.2}mm)")]
    SafeHeightTooLow { what: String, z: f64, safe_height: f64 },
}

/// Installation file: where the arm is, what tool it carries and where the blocks are.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PalletizerConfig {
    pub port: String,
    #[serde(default)]
    pub end_effector: EndEffectorKind,
    #[serde(default = "default_safe_height")]
    pub safe_height: f64,
    #[serde(default)]
    pub default_rotation: f64,
    #[serde(default = "default_motion_settle_ms")]
    pub motion_settle_ms: u64,
    #[serde(default = "default_actuation_settle_ms")]
    pub actuation_settle_ms: u64,
    #[serde(default = "default_leg_cooldown_ms")]
    pub leg_cooldown_ms: u64,
    #[serde(default)]
    pub park: Option<Position>,
    #[serde(default)]
    pub limits: WorkspaceLimits,
    pub blocks: Vec<BlockEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BlockEntry {
    pub pick: Position,
    pub drop: Position,
}

/// Reachable envelope of the arm.  Defaults fit a Dobot Magician with a standard tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkspaceLimits {
    pub min_reach: f64,
    pub max_reach: f64,
    pub min_z: f64,
    pub max_z: f64,
    pub max_abs_rotation: f64,
}

impl Default for WorkspaceLimits {
    fn default() -> Self {
        Self {
            min_reach: 100.0,
            max_reach: 400.0,
            min_z: -100.0,
            max_z: 160.0,
            max_abs_rotation: 150.0,
        }
    }
}

fn default_safe_height() -> f64 {
    50.0
}

fn default_motion_settle_ms() -> u64 {
    1000
}

fn default_actuation_settle_ms() -> u64 {
    2000
}

fn default_leg_cooldown_ms() -> u64 {
    3000
}

impl PalletizerConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io { path: path.to_owned(), source })?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: PalletizerConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.blocks.is_empty() {
            return Err(ConfigError::NoBlocks);
        }
        let limits = &self.limits;
        check_finite("safe height", "safe_height", self.safe_height)?;
        check_finite("default rotation", "default_rotation", self.default_rotation)?;
        check_height(limits, "safe height", self.safe_height)?;
        check_rotation(limits, "default rotation", self.default_rotation)?;

        for (index, block) in self.blocks.iter().enumerate() {
            for (label, position) in [("pick", &block.pick), ("drop", &block.drop)] {
                let what = format!("block {} {label}", index + 1);
                check_position(limits, &what, position)?;
                if position.z >= self.safe_height {
                    return Err(ConfigError::SafeHeightTooLow { what, z: position.z, safe_height: self.safe_height });
                }
            }
        }
        if let Some(park) = &self.park {
            check_position(limits, "park", park)?;
        }
        Ok(())
    }

    pub fn tasks(&self) -> Vec<BlockTask> {
        number_tasks(self.blocks.iter().map(|b| (b.pick, b.drop)))
    }

    pub fn motion_profile(&self) -> MotionProfile {
        MotionProfile {
            safe_height: self.safe_height,
            default_rotation: self.default_rotation,
            motion_settle: Duration::from_millis(self.motion_settle_ms),
            actuation_settle: Duration::from_millis(self.actuation_settle_ms),
            leg_cooldown: Duration::from_millis(self.leg_cooldown_ms),
            park: self.park.map(|p| p.resolve(self.default_rotation)),
        }
    }
}

fn check_finite(what: &str, field: &'static str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() {
        return Err(ConfigError::NonFinite { what: what.to_owned(), field });
    }
    Ok(())
}

fn check_height(limits: &WorkspaceLimits, what: &str, z: f64) -> Result<(), ConfigError> {
    if z < limits.min_z || z > limits.max_z {
        return Err(ConfigError::HeightOutOfRange { what: what.to_owned(), z, min: limits.min_z, max: limits.max_z });
    }
    Ok(())
}

fn check_rotation(limits: &WorkspaceLimits, what: &str, r: f64) -> Result<(), ConfigError> {
    if r.abs() > limits.max_abs_rotation {
        return Err(ConfigError::RotationOutOfRange { what: what.to_owned(), r, max: limits.max_abs_rotation });
    }
    Ok(())
}

fn check_position(limits: &WorkspaceLimits, what: &str, position: &Position) -> Result<(), ConfigError> {
    check_finite(what, "x", position.x)?;
    check_finite(what, "y", position.y)?;
    check_finite(what, "z", position.z)?;
    if let Some(r) = position.r {
        check_finite(what, "r", r)?;
        check_rotation(limits, what, r)?;
    }
    let reach = position.reach();
    if reach < limits.min_reach || reach > limits.max_reach {
        return Err(ConfigError::OutOfReach {
            what: what.to_owned(),
            reach,
            min: limits.min_reach,
            max: limits.max_reach,
        });
    }
    check_height(limits, what, position.z)
}

#[cfg(test)]
mod tests {
    use crate::arm_hal::Waypoint;

    use super::*;

    const GRIPPER_TABLE: &str = r#"{
        "port": "COM12",
        "end_effector": "gripper",
        "park": {"x": 300, "y": 0, "z": 50},
        "blocks": [
            {"pick": {"x": 252.87, "y": -49.02, "z": -14.23},
             "drop": {"x": 243.327, "y": 49.75, "z": -15.83, "r": -10}},
            {"pick": {"x": 245.92, "y": 6.15, "z": -14.30},
             "drop": {"x": 242.36, "y": 99.21, "z": -15.52, "r": 2.16}}
        ]
    }"#;

    fn with_blocks(blocks: &str) -> String {
        format!(r#"{{"port": "/dev/ttyACM0", "blocks": {blocks}}}"#)
    }

    #[test]
    fn loads_defaults_and_numbers_tasks() {
        let config = PalletizerConfig::from_json_str(GRIPPER_TABLE).unwrap();
        assert_eq!(config.end_effector, EndEffectorKind::Gripper);
        assert_eq!(config.safe_height, 50.0);

        let tasks = config.tasks();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[1].id(), 2);
        assert_eq!(tasks[0].drop_point().r, Some(-10.0));

        let profile = config.motion_profile();
        assert_eq!(profile.actuation_settle, Duration::from_secs(2));
        assert_eq!(profile.leg_cooldown, Duration::from_secs(3));
        assert_eq!(profile.park, Some(Waypoint::new(300.0, 0.0, 50.0, 0.0)));
    }

    #[test]
    fn empty_table_is_rejected() {
        let err = PalletizerConfig::from_json_str(&with_blocks("[]")).unwrap_err();
        assert!(matches!(err, ConfigError::NoBlocks));
    }

    #[test]
    fn out_of_reach_block_names_the_block() {
        let err = PalletizerConfig::from_json_str(&with_blocks(
            r#"[{"pick": {"x": 250, "y": 0, "z": -10}, "drop": {"x": 250, "y": 0, "z": -10}},
                {"pick": {"x": 500, "y": 40, "z": -10}, "drop": {"x": 250, "y": 0, "z": -10}}]"#,
        ))
        .unwrap_err();
        match err {
            ConfigError::OutOfReach { what, .. } => assert_eq!(what, "block 2 pick"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn safe_height_must_clear_every_block() {
        let err = PalletizerConfig::from_json_str(&with_blocks(
            r#"[{"pick": {"x": 250, "y": 0, "z": -10}, "drop": {"x": 250, "y": 80, "z": 60}}]"#,
        ))
        .unwrap_err();
        assert!(matches!(err, ConfigError::SafeHeightTooLow { .. }));
    }

    #[test]
    fn rotation_limit_applies_to_blocks() {
        let err = PalletizerConfig::from_json_str(&with_blocks(
            r#"[{"pick": {"x": 250, "y": 0, "z": -10, "r": 170}, "drop": {"x": 250, "y": 80, "z": -10}}]"#,
        ))
        .unwrap_err();
        assert!(matches!(err, ConfigError::RotationOutOfRange { .. }));
    }

    #[test]
    fn missing_coordinate_is_a_parse_error() {
        let err = PalletizerConfig::from_json_str(&with_blocks(
            r#"[{"pick": {"x": 250, "y": 0}, "drop": {"x": 250, "y": 80, "z": -10}}]"#,
        ))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn non_finite_values_are_rejected() {
        let mut config = PalletizerConfig::from_json_str(GRIPPER_TABLE).unwrap();
        config.blocks[0].drop.x = f64::NAN;
        assert!(matches!(config.validate(), Err(ConfigError::NonFinite { field: "x", .. })));
    }

    #[test]
    fn shipped_tables_are_valid() {
        for path in ["configs/palletizer_suction.json", "configs/palletizer_gripper.json"] {
            let file = Path::new(env!("CARGO_MANIFEST_DIR")).join(path);
            let config = PalletizerConfig::load(&file).unwrap();
            assert_eq!(config.tasks().len(), 4, "{path}");
        }
    }
}
