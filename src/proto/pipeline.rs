//! Pipeline (push/pull) protocol pair.
//!
//! Push distributes work round-robin across pipes, falling over to the
//! next pipe with queue capacity when the preferred one is full; only
//! when every pipe is full does back-pressure surface, as `WouldBlock`
//! on non-blocking sends or as a wait on blocking ones. Pull consumes
//! from whichever pipe has data;
//! per-pipe FIFO order is preserved because each pipe reader feeds the
//! delivery queue in arrival order.

use super::{Protocol, RoundRobin, SendPlan, StateMachine};
use crate::error::{Error, Result};
use crate::message::Message;
use crate::pipe::PipeId;

/// Pipeline producer state machine.
#[derive(Debug, Default)]
pub(crate) struct Push {
    rr: RoundRobin,
}

impl Push {
    pub(crate) fn new() -> Self {
        Self::default()
    }
}

impl StateMachine for Push {
    fn protocol(&self) -> Protocol {
        Protocol::Push
    }

    fn can_recv(&self) -> bool {
        false
    }

    fn route_send(&mut self, _msg: &mut Message, pipes: &[PipeId]) -> Result<SendPlan> {
        match self.rr.pick(pipes) {
            Some(id) => Ok(SendPlan::Balanced(id)),
            None => Ok(SendPlan::NoPipes),
        }
    }
}

/// Pipeline consumer state machine.
#[derive(Debug, Default)]
pub(crate) struct Pull;

impl Pull {
    pub(crate) fn new() -> Self {
        Self
    }
}

impl StateMachine for Pull {
    fn protocol(&self) -> Protocol {
        Protocol::Pull
    }

    fn can_send(&self) -> bool {
        false
    }

    fn route_send(&mut self, _msg: &mut Message, _pipes: &[PipeId]) -> Result<SendPlan> {
        Err(Error::NotSupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_round_robins() {
        let mut push = Push::new();
        let pipes = [PipeId(1), PipeId(2), PipeId(3)];
        let mut seen = Vec::new();
        for _ in 0..3 {
            let mut msg = Message::new();
            match push.route_send(&mut msg, &pipes).unwrap() {
                SendPlan::Balanced(id) => seen.push(id),
                other => panic!("unexpected plan {other:?}"),
            }
        }
        assert_eq!(seen, vec![PipeId(1), PipeId(2), PipeId(3)]);
    }

    #[test]
    fn test_push_no_pipes() {
        let mut push = Push::new();
        let mut msg = Message::new();
        assert_eq!(push.route_send(&mut msg, &[]).unwrap(), SendPlan::NoPipes);
    }

    #[test]
    fn test_pull_cannot_send() {
        let mut pull = Pull::new();
        let mut msg = Message::new();
        assert_eq!(
            pull.route_send(&mut msg, &[PipeId(1)]),
            Err(Error::NotSupported)
        );
        assert!(!pull.can_send());
        assert!(pull.can_recv());
    }
}
