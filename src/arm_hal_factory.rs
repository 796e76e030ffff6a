use log::info;

use crate::arm_hal::{ArmHal, ArmResult};
use crate::arm_hal_mock::ArmHalMock;
use crate::dobot::dobot_arm_hal::{DobotArmHal, DobotPortSpec};
use crate::end_effector::EndEffectorKind;

#[derive(Default)]
pub struct ArmHalFactory {
    force_mock: bool,
}

impl ArmHalFactory {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn new_maybe_mock(force_mock: bool) -> Self {
        Self { force_mock }
    }

    /// Opens the arm on `port`.  Failing to reach a real arm is a connection error, there is no
    /// silent fallback to the mock.
    pub fn create_hal(&self, port: &str, end_effector: EndEffectorKind) -> ArmResult<Box<dyn ArmHal>> {
        if self.force_mock {
            info!("Using simulated arm ({end_effector}) instead of {port}");
            return Ok(Box::new(ArmHalMock::new()));
        }

        info!("Connecting to Dobot on {port}...");
        let hal = DobotArmHal::connect(&DobotPortSpec {
            port: port.to_owned(),
            end_effector,
        })?;
        info!("Successfully connected to Dobot!");
        Ok(Box::new(hal))
    }
}

#[cfg(test)]
mod tests {
    use crate::arm_hal::ArmError;

    use super::*;

    #[test]
    fn mock_hal_answers_pose_queries() {
        let mut hal = ArmHalFactory::new_maybe_mock(true)
            .create_hal("/dev/null", EndEffectorKind::Gripper)
            .unwrap();
        assert!(hal.get_pose().is_ok());
    }

    #[test]
    fn missing_port_is_a_connection_error() {
        let result = ArmHalFactory::new().create_hal("/dev/does-not-exist-dobot", EndEffectorKind::SuctionCup);
        assert!(matches!(result, Err(ArmError::NotConnected(_))));
    }
}
