//! In-memory firmware double used by the session tests.
//!
//! Decodes every request the driver writes, answers the way the bike does,
//! and counts writes that arrive while an earlier reply is still unread.

use async_trait::async_trait;
use bytes::Bytes;
use std::{
    collections::VecDeque,
    io,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use crate::{
    error::Result,
    protocol::{Command, Opcode},
    transport::Transport,
    types::ResultCode,
    STRING_SENTINEL,
};

#[derive(Clone)]
pub(crate) struct FakeBike {
    state: Arc<Mutex<FakeState>>,
}

struct FakeState {
    frames: Vec<Command>,
    inbound: VecDeque<u8>,
    unread_reply: usize,
    violations: usize,
    stalled: bool,
    closed: bool,
    start_result: ResultCode,
    command_result: ResultCode,
    velocity: f32,
    motor_lut: String,
    servo_lut: String,
    omit_sentinel: bool,
    stall_keep_alive: bool,
    fail_after_frames: Option<usize>,
}

impl FakeState {
    fn reply_for(&self, command: &Command) -> Option<Vec<u8>> {
        match command {
            Command::Start(_) => Some(vec![self.start_result as u8]),
            Command::KeepAlive if self.stall_keep_alive => None,
            Command::GetWheelVelocity => Some(self.velocity.to_le_bytes().to_vec()),
            Command::GetMotorVoltageLut { .. } => Some(self.text_reply(&self.motor_lut)),
            Command::GetServoDegreesLut { .. } => Some(self.text_reply(&self.servo_lut)),
            Command::EmergencyStop => Some(Vec::new()),
            _ => Some(vec![self.command_result as u8]),
        }
    }

    fn text_reply(&self, text: &str) -> Vec<u8> {
        let mut reply = text.as_bytes().to_vec();
        if !self.omit_sentinel {
            reply.push(STRING_SENTINEL);
        }
        reply
    }

    fn take(&mut self, len: usize) -> Bytes {
        let bytes: Vec<u8> = self.inbound.drain(..len).collect();
        self.unread_reply = self.unread_reply.saturating_sub(len);
        Bytes::from(bytes)
    }
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "fake bike transport closed")
}

impl FakeBike {
    pub(crate) fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                frames: Vec::new(),
                inbound: VecDeque::new(),
                unread_reply: 0,
                violations: 0,
                stalled: false,
                closed: false,
                start_result: ResultCode::Success,
                command_result: ResultCode::Success,
                velocity: 0.0,
                motor_lut: "0.0,0.0\n".to_string(),
                servo_lut: "0,0\n".to_string(),
                omit_sentinel: false,
                stall_keep_alive: false,
                fail_after_frames: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake bike state poisoned")
    }

    pub(crate) fn set_start_result(&self, code: ResultCode) {
        self.lock().start_result = code;
    }

    pub(crate) fn set_command_result(&self, code: ResultCode) {
        self.lock().command_result = code;
    }

    pub(crate) fn set_velocity(&self, velocity: f32) {
        self.lock().velocity = velocity;
    }

    pub(crate) fn set_luts(&self, motor: &str, servo: &str) {
        let mut state = self.lock();
        state.motor_lut = motor.to_string();
        state.servo_lut = servo.to_string();
    }

    pub(crate) fn omit_lut_sentinel(&self) {
        self.lock().omit_sentinel = true;
    }

    /// Swallow KEEP_ALIVE requests without answering, leaving the reader blocked
    pub(crate) fn stall_keep_alive_replies(&self) {
        self.lock().stall_keep_alive = true;
    }

    /// Fail every write once `frames` requests have been received
    pub(crate) fn break_after_frames(&self, frames: usize) {
        self.lock().fail_after_frames = Some(frames);
    }

    pub(crate) fn frames(&self) -> Vec<Command> {
        self.lock().frames.clone()
    }

    pub(crate) fn opcodes(&self) -> Vec<Opcode> {
        self.lock().frames.iter().map(Command::opcode).collect()
    }

    pub(crate) fn keep_alive_count(&self) -> usize {
        self.lock()
            .frames
            .iter()
            .filter(|c| **c == Command::KeepAlive)
            .count()
    }

    pub(crate) fn violations(&self) -> usize {
        self.lock().violations
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub(crate) async fn wait_for_keep_alives(&self, count: usize) {
        self.wait_for(|bike| bike.keep_alive_count() >= count).await;
    }

    pub(crate) async fn wait_until_closed(&self) {
        self.wait_for(Self::is_closed).await;
    }

    async fn wait_for(&self, condition: impl Fn(&Self) -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !condition(self) {
            assert!(
                tokio::time::Instant::now() < deadline,
                "fake bike condition not reached in time"
            );
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }
}

#[async_trait]
impl Transport for FakeBike {
    async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        {
            let mut state = self.lock();
            if state.closed {
                return Err(closed_error().into());
            }
            if state
                .fail_after_frames
                .is_some_and(|limit| state.frames.len() >= limit)
            {
                return Err(
                    io::Error::new(io::ErrorKind::ConnectionReset, "fake bike unplugged").into(),
                );
            }
            if state.unread_reply > 0 {
                state.violations += 1;
            }

            match Command::decode(data) {
                Ok(command) => {
                    let reply = state.reply_for(&command);
                    state.frames.push(command);
                    state.stalled = reply.is_none();
                    let reply = reply.unwrap_or_default();
                    state.unread_reply = reply.len();
                    state.inbound.extend(reply);
                }
                Err(_) => state.violations += 1,
            }
        }

        tokio::task::yield_now().await;
        Ok(())
    }

    async fn read_exact(&mut self, len: usize) -> Result<Bytes> {
        tokio::task::yield_now().await;

        let outcome = {
            let mut state = self.lock();
            if state.closed {
                Err(closed_error())
            } else if state.inbound.len() >= len {
                Ok(Some(state.take(len)))
            } else if state.stalled {
                Ok(None)
            } else {
                Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "fake bike has no more reply bytes",
                ))
            }
        };

        match outcome? {
            Some(bytes) => Ok(bytes),
            None => std::future::pending().await,
        }
    }

    async fn read_until(&mut self, sentinel: u8) -> Result<Bytes> {
        tokio::task::yield_now().await;

        let mut state = self.lock();
        if state.closed {
            return Err(closed_error().into());
        }
        let len = state
            .inbound
            .iter()
            .position(|b| *b == sentinel)
            .map_or(state.inbound.len(), |pos| pos + 1);
        Ok(state.take(len))
    }

    async fn close(&mut self) -> Result<()> {
        self.lock().closed = true;
        Ok(())
    }
}
