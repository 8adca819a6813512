//! Pair protocol: exactly one peer, messages pass straight through.

use super::{Protocol, SendPlan, StateMachine};
use crate::error::Result;
use crate::message::Message;
use crate::pipe::PipeId;

/// One-to-one bidirectional state machine.
///
/// A second connection attempt while a pipe is active is rejected at
/// attach time; the unwanted link is dropped, which the peer observes as
/// a disconnect.
#[derive(Debug, Default)]
pub(crate) struct Pair;

impl Pair {
    pub(crate) fn new() -> Self {
        Self
    }
}

impl StateMachine for Pair {
    fn protocol(&self) -> Protocol {
        Protocol::Pair
    }

    fn can_attach(&self, active: usize) -> bool {
        active == 0
    }

    fn route_send(&mut self, _msg: &mut Message, pipes: &[PipeId]) -> Result<SendPlan> {
        match pipes.first() {
            Some(&id) => Ok(SendPlan::Unicast(id)),
            None => Ok(SendPlan::NoPipes),
        }
    }
}
