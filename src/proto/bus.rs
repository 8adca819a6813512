//! Bus protocol: every node broadcasts to every peer.
//!
//! Send copies the message to all attached pipes; receive delivers
//! everything that arrives. Echo suppression needs no work here because a
//! node's own sends never loop back through its pipes.

use super::{Protocol, SendPlan, StateMachine};
use crate::error::Result;
use crate::message::Message;
use crate::pipe::PipeId;

/// Many-to-many broadcast state machine.
#[derive(Debug, Default)]
pub(crate) struct Bus;

impl Bus {
    pub(crate) fn new() -> Self {
        Self
    }
}

impl StateMachine for Bus {
    fn protocol(&self) -> Protocol {
        Protocol::Bus
    }

    fn route_send(&mut self, _msg: &mut Message, _pipes: &[PipeId]) -> Result<SendPlan> {
        Ok(SendPlan::Broadcast)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bus_broadcasts_even_with_no_pipes() {
        let mut bus = Bus::new();
        let mut msg = Message::from_slice(b"all");
        assert_eq!(bus.route_send(&mut msg, &[]).unwrap(), SendPlan::Broadcast);
        assert!(bus.can_send());
        assert!(bus.can_recv());
    }
}
