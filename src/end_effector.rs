use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The tool mounted on the arm.  Both variants expose the same engage/disengage capability, they
/// only differ in which command the controller expects.
#[derive(Debug, PartialEq, Eq, Copy, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndEffectorKind {
    #[default]
    SuctionCup,
    Gripper,
}

impl EndEffectorKind {
    pub fn released_message(&self) -> &'static str {
        match self {
            EndEffectorKind::SuctionCup => "Suction released",
            EndEffectorKind::Gripper => "Grip released",
        }
    }
}

impl fmt::Display for EndEffectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndEffectorKind::SuctionCup => f.write_str("suction_cup"),
            EndEffectorKind::Gripper => f.write_str("gripper"),
        }
    }
}

impl FromStr for EndEffectorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "suction_cup" | "suction" => Ok(EndEffectorKind::SuctionCup),
            "gripper" | "grip" => Ok(EndEffectorKind::Gripper),
            other => Err(format!("unknown end effector '{other}' (expected suction_cup or gripper)")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_cli_spellings() {
        assert_eq!("suction-cup".parse(), Ok(EndEffectorKind::SuctionCup));
        assert_eq!("Suction".parse(), Ok(EndEffectorKind::SuctionCup));
        assert_eq!("gripper".parse(), Ok(EndEffectorKind::Gripper));
        assert!("magnet".parse::<EndEffectorKind>().is_err());
    }

    #[test]
    fn config_spelling_matches_display() {
        let kind: EndEffectorKind = serde_json::from_str("\"gripper\"").unwrap();
        assert_eq!(kind, EndEffectorKind::Gripper);
        assert_eq!(kind.to_string(), "gripper");
        assert_eq!(serde_json::to_string(&EndEffectorKind::SuctionCup).unwrap(), "\"suction_cup\"");
    }
}
