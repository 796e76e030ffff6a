pub mod dobot_arm_hal;
pub mod protocol;
