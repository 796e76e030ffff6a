use std::io::{Read, Write};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, trace};
use serialport::{DataBits, Parity, SerialPort, StopBits};

use crate::arm_hal::{ArmError, ArmHal, ArmPose, ArmResult, Waypoint};
use crate::dobot::protocol;
use crate::dobot::protocol::{DobotMessage, PtpMode};
use crate::end_effector::EndEffectorKind;

const BAUD_RATE: u32 = 115_200;
const READ_TIMEOUT: Duration = Duration::from_secs(2);

const JOINT_VELOCITY: f32 = 200.0;
const JOINT_ACCELERATION: f32 = 200.0;
const COORDINATE_VELOCITY: f32 = 200.0;
const COORDINATE_ACCELERATION: f32 = 200.0;
const JUMP_HEIGHT: f32 = 10.0;
const JUMP_Z_LIMIT: f32 = 200.0;
const COMMON_VELOCITY_RATIO: f32 = 100.0;
const COMMON_ACCELERATION_RATIO: f32 = 100.0;

pub struct DobotArmHal<L: Read + Write = Box<dyn SerialPort>> {
    link: Option<L>,
    end_effector: EndEffectorKind,
    timing: QueueTiming,
}

/// How long a queued command may take before we give up on it, and how often the queue index is
/// polled while waiting.
#[derive(Debug, Copy, Clone)]
pub struct QueueTiming {
    pub poll_interval: Duration,
    pub command_timeout: Duration,
}

impl Default for QueueTiming {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            command_timeout: Duration::from_secs(30),
        }
    }
}

pub struct DobotPortSpec {
    pub port: String,
    pub end_effector: EndEffectorKind,
}

impl DobotArmHal {
    pub fn connect(spec: &DobotPortSpec) -> ArmResult<Self> {
        let port = serialport::new(&spec.port, BAUD_RATE)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(|e| ArmError::NotConnected(format!("could not open {}: {e}", spec.port)))?;

        let mut hal = DobotArmHal::with_link(port, spec.end_effector, QueueTiming::default());
        let pose = hal
            .initialize()
            .map_err(|e| ArmError::NotConnected(format!("no Dobot answering on {}: {e}", spec.port)))?;
        debug!("Connected on {}, arm is at {}", spec.port, pose.position);
        Ok(hal)
    }
}

impl<L: Read + Write> DobotArmHal<L> {
    pub fn with_link(link: L, end_effector: EndEffectorKind, timing: QueueTiming) -> Self {
        Self { link: Some(link), end_effector, timing }
    }

    /// Same bring-up as the vendor tooling: start the command queue fresh, load motion
    /// parameters and confirm the controller answers a pose query.
    fn initialize(&mut self) -> ArmResult<ArmPose> {
        self.exchange(protocol::set_queued_cmd_start_exec())?;
        self.exchange(protocol::set_queued_cmd_clear())?;
        self.exchange(protocol::set_ptp_joint_params(
            [JOINT_VELOCITY; 4],
            [JOINT_ACCELERATION; 4]))?;
        self.exchange(protocol::set_ptp_coordinate_params(
            COORDINATE_VELOCITY,
            COORDINATE_ACCELERATION))?;
        self.exchange(protocol::set_ptp_jump_params(JUMP_HEIGHT, JUMP_Z_LIMIT))?;
        self.exchange(protocol::set_ptp_common_params(
            COMMON_VELOCITY_RATIO,
            COMMON_ACCELERATION_RATIO))?;
        self.get_pose()
    }

    fn exchange(&mut self, request: DobotMessage) -> ArmResult<DobotMessage> {
        let link = self
            .link
            .as_mut()
            .ok_or_else(|| ArmError::NotConnected("arm connection already closed".to_owned()))?;
        trace!("-> {request:?}");
        link.write_all(&request.encode())?;
        link.flush()?;
        let reply = DobotMessage::read_from(link)?;
        trace!("<- {reply:?}");
        if reply.id != request.id {
            return Err(ArmError::Protocol(format!(
                "expected a reply to command {}, got {}", request.id, reply.id)));
        }
        Ok(reply)
    }

    /// Sends a queued command and blocks until the controller has executed it.
    fn exchange_and_wait(&mut self, request: DobotMessage) -> ArmResult<()> {
        let reply = self.exchange(request)?;
        let target = protocol::parse_queued_index(&reply)?;
        self.wait_for_queue_index(target)
    }

    fn wait_for_queue_index(&mut self, target: u64) -> ArmResult<()> {
        let deadline = Instant::now() + self.timing.command_timeout;
        loop {
            let reply = self.exchange(protocol::get_queued_cmd_current_index())?;
            let current = protocol::parse_queued_index(&reply)?;
            if current >= target {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(ArmError::Timeout(format!(
                    "queued command {target} still pending (controller at {current})")));
            }
            thread::sleep(self.timing.poll_interval);
        }
    }
}

impl<L: Read + Write> ArmHal for DobotArmHal<L> {
    fn move_to(&mut self, target: Waypoint) -> ArmResult<()> {
        debug!("move_to: {target}");
        self.exchange_and_wait(protocol::set_ptp_cmd(PtpMode::MovjXyz, &target))
    }

    fn set_end_effector(&mut self, engaged: bool) -> ArmResult<()> {
        debug!("set_end_effector: {} engaged={engaged}", self.end_effector);
        self.exchange_and_wait(protocol::set_end_effector(self.end_effector, engaged))
    }

    fn get_pose(&mut self) -> ArmResult<ArmPose> {
        let reply = self.exchange(protocol::get_pose())?;
        Ok(protocol::parse_pose(&reply)?)
    }

    fn close(&mut self) -> ArmResult<()> {
        match self.link.take() {
            Some(mut link) => {
                link.flush()?;
                Ok(())
            }
            None => Err(ArmError::NotConnected("arm connection already closed".to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use crate::dobot::protocol::CommandId;

    use super::*;

    /// Replays canned controller replies and keeps whatever the HAL wrote.
    struct ScriptedLink {
        replies: Cursor<Vec<u8>>,
        written: Vec<u8>,
    }

    impl ScriptedLink {
        fn with_replies(replies: &[DobotMessage]) -> Self {
            let bytes = replies.iter().flat_map(DobotMessage::encode).collect();
            Self { replies: Cursor::new(bytes), written: Vec::new() }
        }
    }

    impl Read for ScriptedLink {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.replies.read(buf)
        }
    }

    impl Write for ScriptedLink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.written.write(buf)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn queued_reply(id: CommandId, index: u64) -> DobotMessage {
        DobotMessage::new(id as u8, protocol::CTRL_WRITE_QUEUED, index.to_le_bytes().to_vec())
    }

    fn index_reply(index: u64) -> DobotMessage {
        DobotMessage::new(CommandId::GetQueuedCmdCurrentIndex as u8, 0, index.to_le_bytes().to_vec())
    }

    fn instant_timing() -> QueueTiming {
        QueueTiming { poll_interval: Duration::ZERO, command_timeout: Duration::from_secs(5) }
    }

    fn sent_frames(hal: DobotArmHal<ScriptedLink>) -> Vec<DobotMessage> {
        let written = hal.link.unwrap().written;
        let mut cursor = Cursor::new(written);
        let mut frames = Vec::new();
        while (cursor.position() as usize) < cursor.get_ref().len() {
            frames.push(DobotMessage::read_from(&mut cursor).unwrap());
        }
        frames
    }

    #[test]
    fn move_blocks_until_queue_reaches_command() {
        let link = ScriptedLink::with_replies(&[
            queued_reply(CommandId::SetPtpCmd, 12),
            index_reply(10),
            index_reply(11),
            index_reply(12),
        ]);
        let mut hal = DobotArmHal::with_link(link, EndEffectorKind::SuctionCup, instant_timing());
        hal.move_to(Waypoint::new(288.34, -41.49, 50.0, 0.0)).unwrap();

        let frames = sent_frames(hal);
        let ids: Vec<u8> = frames.iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![84, 246, 246, 246]);
        assert_eq!(frames[0].params[0], PtpMode::MovjXyz as u8);
    }

    #[test]
    fn stalled_queue_times_out() {
        let link = ScriptedLink::with_replies(&[queued_reply(CommandId::SetPtpCmd, 3), index_reply(2)]);
        let timing = QueueTiming { poll_interval: Duration::ZERO, command_timeout: Duration::ZERO };
        let mut hal = DobotArmHal::with_link(link, EndEffectorKind::SuctionCup, timing);
        let err = hal.move_to(Waypoint::new(300.0, 0.0, 50.0, 0.0)).unwrap_err();
        assert!(matches!(err, ArmError::Timeout(_)));
    }

    #[test]
    fn gripper_hal_sends_gripper_command() {
        let link = ScriptedLink::with_replies(&[
            queued_reply(CommandId::SetEndEffectorGripper, 1),
            index_reply(1),
        ]);
        let mut hal = DobotArmHal::with_link(link, EndEffectorKind::Gripper, instant_timing());
        hal.set_end_effector(true).unwrap();

        let frames = sent_frames(hal);
        assert_eq!(frames[0], protocol::set_end_effector(EndEffectorKind::Gripper, true));
    }

    #[test]
    fn mismatched_reply_is_a_protocol_error() {
        let link = ScriptedLink::with_replies(&[index_reply(4)]);
        let mut hal = DobotArmHal::with_link(link, EndEffectorKind::SuctionCup, instant_timing());
        assert!(matches!(hal.get_pose(), Err(ArmError::Protocol(_))));
    }

    #[test]
    fn silent_controller_fails_instead_of_hanging() {
        let link = ScriptedLink::with_replies(&[]);
        let mut hal = DobotArmHal::with_link(link, EndEffectorKind::SuctionCup, instant_timing());
        assert!(matches!(hal.set_end_effector(false), Err(ArmError::Io(_))));
    }

    #[test]
    fn calls_after_close_report_not_connected() {
        let link = ScriptedLink::with_replies(&[]);
        let mut hal = DobotArmHal::with_link(link, EndEffectorKind::SuctionCup, instant_timing());
        hal.close().unwrap();
        assert!(matches!(hal.move_to(Waypoint::new(0.0, 0.0, 0.0, 0.0)), Err(ArmError::NotConnected(_))));
        assert!(matches!(hal.close(), Err(ArmError::NotConnected(_))));
    }
}
