use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use log::debug;

use crate::arm_hal::{ArmError, ArmHal, ArmPose, ArmResult, Waypoint};

const HOME: Waypoint = Waypoint { x: 200.0, y: 0.0, z: 50.0, r: 0.0 };

#[derive(Debug, PartialEq, Clone)]
pub enum HalCall {
    MoveTo(Waypoint),
    SetEndEffector(bool),
    GetPose,
    Close,
}

impl HalCall {
    pub fn kind(&self) -> HalCallKind {
        match self {
            HalCall::MoveTo(_) => HalCallKind::MoveTo,
            HalCall::SetEndEffector(true) => HalCallKind::Engage,
            HalCall::SetEndEffector(false) => HalCallKind::Disengage,
            HalCall::GetPose => HalCallKind::GetPose,
            HalCall::Close => HalCallKind::Close,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Hash, Copy, Clone)]
pub enum HalCallKind {
    MoveTo,
    Engage,
    Disengage,
    GetPose,
    Close,
}

#[derive(Debug)]
struct MockState {
    calls: Vec<HalCall>,
    seen: HashMap<HalCallKind, usize>,
    faults: Vec<(HalCallKind, usize)>,
    disconnect_after: Option<usize>,
    engaged: bool,
    closed: bool,
    position: Waypoint,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            calls: Vec::new(),
            seen: HashMap::new(),
            faults: Vec::new(),
            disconnect_after: None,
            engaged: false,
            closed: false,
            position: HOME,
        }
    }
}

/// In-memory arm.  Journals every call, tracks whether the end-effector is engaged and can be told
/// to fail specific calls.  Clones share state so a test can keep a handle after boxing one.
#[derive(Debug, Clone, Default)]
pub struct ArmHalMock {
    state: Rc<RefCell<MockState>>,
}

impl ArmHalMock {
    pub fn new() -> Self {
        Default::default()
    }

    /// Fail the `nth` (1-based) call of the given kind.
    pub fn with_fault(self, kind: HalCallKind, nth: usize) -> Self {
        self.state.borrow_mut().faults.push((kind, nth));
        self
    }

    /// Every call after the first `calls` reports a lost connection.
    pub fn with_disconnect_after(self, calls: usize) -> Self {
        self.state.borrow_mut().disconnect_after = Some(calls);
        self
    }

    pub fn calls(&self) -> Vec<HalCall> {
        self.state.borrow().calls.clone()
    }

    pub fn is_engaged(&self) -> bool {
        self.state.borrow().engaged
    }

    pub fn is_closed(&self) -> bool {
        self.state.borrow().closed
    }

    fn record(&self, call: HalCall) -> ArmResult<()> {
        debug!("mock arm: {call:?}");
        let mut state = self.state.borrow_mut();
        let kind = call.kind();
        let nth = {
            let seen = state.seen.entry(kind).or_insert(0);
            *seen += 1;
            *seen
        };
        state.calls.push(call);

        if state.closed {
            return Err(ArmError::NotConnected("mock arm already closed".to_owned()));
        }
        if let Some(limit) = state.disconnect_after {
            if state.calls.len() > limit {
                return Err(ArmError::NotConnected("mock arm link lost".to_owned()));
            }
        }
        if state.faults.contains(&(kind, nth)) {
            return Err(ArmError::Fault(format!("injected fault on {kind:?} #{nth}")));
        }
        Ok(())
    }
}

impl ArmHal for ArmHalMock {
    fn move_to(&mut self, target: Waypoint) -> ArmResult<()> {
        self.record(HalCall::MoveTo(target))?;
        self.state.borrow_mut().position = target;
        Ok(())
    }

    fn set_end_effector(&mut self, engaged: bool) -> ArmResult<()> {
        self.record(HalCall::SetEndEffector(engaged))?;
        self.state.borrow_mut().engaged = engaged;
        Ok(())
    }

    fn get_pose(&mut self) -> ArmResult<ArmPose> {
        self.record(HalCall::GetPose)?;
        let position = self.state.borrow().position;
        Ok(ArmPose::new(position, [position.y.atan2(position.x).to_degrees(), 0.0, 0.0, position.r]))
    }

    fn close(&mut self) -> ArmResult<()> {
        self.record(HalCall::Close)?;
        self.state.borrow_mut().closed = true;
        Ok(())
    }
}
