//! Dobot Magician binary protocol.
//!
//! Every frame is `0xAA 0xAA <len> <id> <ctrl> <params..> <checksum>` where `len` counts the id,
//! ctrl and params bytes, and the checksum is the two's complement of the byte sum of id, ctrl and
//! params.  Queued commands answer with the index they were given in the controller's command
//! queue; the queue index query reports how far execution has progressed.

use std::io::Read;

use derive_new::new;
use thiserror::Error;

use crate::arm_hal::{ArmError, ArmPose, Waypoint};
use crate::end_effector::EndEffectorKind;

pub const HEADER_BYTE: u8 = 0xAA;
const MAX_RESYNC_BYTES: usize = 256;

pub const CTRL_READ: u8 = 0x00;
pub const CTRL_WRITE: u8 = 0x01;
pub const CTRL_WRITE_QUEUED: u8 = 0x03;

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
#[repr(u8)]
pub enum CommandId {
    GetPose = 10,
    SetEndEffectorSuctionCup = 62,
    SetEndEffectorGripper = 63,
    SetPtpJointParams = 80,
    SetPtpCoordinateParams = 81,
    SetPtpJumpParams = 82,
    SetPtpCommonParams = 83,
    SetPtpCmd = 84,
    SetQueuedCmdStartExec = 240,
    SetQueuedCmdClear = 245,
    GetQueuedCmdCurrentIndex = 246,
}

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
#[repr(u8)]
pub enum PtpMode {
    MovjXyz = 1,
}

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("no frame header within {0} bytes")]
    NoHeader(usize),
    #[error("invalid frame length {0}")]
    BadLength(u8),
    #[error("checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    BadChecksum { expected: u8, actual: u8 },
    #[error("reply to command {id} carried {actual} param bytes, need {needed}")]
    ShortParams { id: u8, needed: usize, actual: usize },
}

impl From<FrameError> for ArmError {
    fn from(e: FrameError) -> Self {
        match e {
            FrameError::Io(io) if io.kind() == std::io::ErrorKind::TimedOut => {
                ArmError::Timeout(format!("no reply from arm: {io}"))
            }
            FrameError::Io(io) => ArmError::Io(io),
            other => ArmError::Protocol(other.to_string()),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, new)]
pub struct DobotMessage {
    pub id: u8,
    pub ctrl: u8,
    pub params: Vec<u8>,
}

impl DobotMessage {
    pub fn checksum(&self) -> u8 {
        let sum = self.params.iter().fold(self.id.wrapping_add(self.ctrl), |acc, b| acc.wrapping_add(*b));
        sum.wrapping_neg()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(self.params.len() + 6);
        frame.extend([HEADER_BYTE, HEADER_BYTE, (self.params.len() + 2) as u8, self.id, self.ctrl]);
        frame.extend(&self.params);
        frame.push(self.checksum());
        frame
    }

    /// Reads the next complete frame, skipping any line noise before the header.
    pub fn read_from(reader: &mut impl Read) -> Result<Self, FrameError> {
        let mut previous = 0u8;
        let mut skipped = 0;
        loop {
            let byte = read_byte(reader)?;
            if previous == HEADER_BYTE && byte == HEADER_BYTE {
                break;
            }
            previous = byte;
            skipped += 1;
            if skipped > MAX_RESYNC_BYTES {
                return Err(FrameError::NoHeader(MAX_RESYNC_BYTES));
            }
        }

        // A stray 0xAA right before the header makes the real second header byte show up here.
        let mut len = read_byte(reader)?;
        while len == HEADER_BYTE {
            skipped += 1;
            if skipped > MAX_RESYNC_BYTES {
                return Err(FrameError::NoHeader(MAX_RESYNC_BYTES));
            }
            len = read_byte(reader)?;
        }
        if len < 2 {
            return Err(FrameError::BadLength(len));
        }
        let mut body = vec![0u8; usize::from(len)];
        reader.read_exact(&mut body)?;
        let actual = read_byte(reader)?;

        let message = DobotMessage::new(body[0], body[1], body.split_off(2));
        let expected = message.checksum();
        if expected != actual {
            return Err(FrameError::BadChecksum { expected, actual });
        }
        Ok(message)
    }

    fn require_params(&self, needed: usize) -> Result<(), FrameError> {
        if self.params.len() < needed {
            return Err(FrameError::ShortParams { id: self.id, needed, actual: self.params.len() });
        }
        Ok(())
    }
}

fn read_byte(reader: &mut impl Read) -> Result<u8, FrameError> {
    let mut buf = [0u8; 1];
    reader.read_exact(&mut buf)?;
    Ok(buf[0])
}

fn f32_params(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn f32_at(params: &[u8], index: usize) -> f64 {
    let offset = index * 4;
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&params[offset..offset + 4]);
    f64::from(f32::from_le_bytes(raw))
}

pub fn get_pose() -> DobotMessage {
    DobotMessage::new(CommandId::GetPose as u8, CTRL_READ, vec![])
}

pub fn get_queued_cmd_current_index() -> DobotMessage {
    DobotMessage::new(CommandId::GetQueuedCmdCurrentIndex as u8, CTRL_READ, vec![])
}

pub fn set_queued_cmd_start_exec() -> DobotMessage {
    DobotMessage::new(CommandId::SetQueuedCmdStartExec as u8, CTRL_WRITE, vec![])
}

pub fn set_queued_cmd_clear() -> DobotMessage {
    DobotMessage::new(CommandId::SetQueuedCmdClear as u8, CTRL_WRITE, vec![])
}

pub fn set_ptp_cmd(mode: PtpMode, target: &Waypoint) -> DobotMessage {
    let mut params = vec![mode as u8];
    params.extend(f32_params(&[target.x as f32, target.y as f32, target.z as f32, target.r as f32]));
    DobotMessage::new(CommandId::SetPtpCmd as u8, CTRL_WRITE_QUEUED, params)
}

pub fn set_end_effector(kind: EndEffectorKind, engaged: bool) -> DobotMessage {
    let id = match kind {
        EndEffectorKind::SuctionCup => CommandId::SetEndEffectorSuctionCup,
        EndEffectorKind::Gripper => CommandId::SetEndEffectorGripper,
    };
    // First byte enables control of the tool, second is the on/off state.
    DobotMessage::new(id as u8, CTRL_WRITE_QUEUED, vec![0x01, u8::from(engaged)])
}

pub fn set_ptp_joint_params(velocity: [f32; 4], acceleration: [f32; 4]) -> DobotMessage {
    let mut values = velocity.to_vec();
    values.extend(acceleration);
    DobotMessage::new(CommandId::SetPtpJointParams as u8, CTRL_WRITE_QUEUED, f32_params(&values))
}

pub fn set_ptp_coordinate_params(velocity: f32, acceleration: f32) -> DobotMessage {
    DobotMessage::new(
        CommandId::SetPtpCoordinateParams as u8,
        CTRL_WRITE_QUEUED,
        f32_params(&[velocity, velocity, acceleration, acceleration]))
}

pub fn set_ptp_jump_params(jump_height: f32, z_limit: f32) -> DobotMessage {
    DobotMessage::new(CommandId::SetPtpJumpParams as u8, CTRL_WRITE_QUEUED, f32_params(&[jump_height, z_limit]))
}

pub fn set_ptp_common_params(velocity_ratio: f32, acceleration_ratio: f32) -> DobotMessage {
    DobotMessage::new(
        CommandId::SetPtpCommonParams as u8,
        CTRL_WRITE_QUEUED,
        f32_params(&[velocity_ratio, acceleration_ratio]))
}

pub fn parse_queued_index(reply: &DobotMessage) -> Result<u64, FrameError> {
    reply.require_params(8)?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&reply.params[..8]);
    Ok(u64::from_le_bytes(raw))
}

pub fn parse_pose(reply: &DobotMessage) -> Result<ArmPose, FrameError> {
    reply.require_params(32)?;
    let p = &reply.params;
    Ok(ArmPose::new(
        Waypoint::new(f32_at(p, 0), f32_at(p, 1), f32_at(p, 2), f32_at(p, 3)),
        [f32_at(p, 4), f32_at(p, 5), f32_at(p, 6), f32_at(p, 7)]))
}
