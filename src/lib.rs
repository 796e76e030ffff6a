pub mod arm_hal;
pub mod arm_hal_factory;
pub mod arm_hal_mock;
pub mod block_task;
pub mod choreography;
pub mod choreography_events;
pub mod dobot;
pub mod end_effector;
pub mod palletizer_config;
pub mod stop_signal;
