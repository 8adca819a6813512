//! Publish/subscribe protocol pair.
//!
//! A publisher broadcasts every message to all attached pipes and never
//! receives. A subscriber keeps a set of topic-prefix filters matched
//! against the message body: no subscriptions means nothing is delivered,
//! an empty-prefix subscription means everything is. Non-matching traffic
//! is dropped on the pipe reader task, before it reaches the application
//! queue.

use super::{Protocol, RecvAction, SendPlan, StateMachine};
use crate::error::{Error, Result};
use crate::message::Message;
use crate::pipe::PipeId;

/// Broadcast publisher state machine.
#[derive(Debug, Default)]
pub(crate) struct Pub;

impl Pub {
    pub(crate) fn new() -> Self {
        Self
    }
}

impl StateMachine for Pub {
    fn protocol(&self) -> Protocol {
        Protocol::Pub
    }

    fn can_recv(&self) -> bool {
        false
    }

    fn route_send(&mut self, _msg: &mut Message, _pipes: &[PipeId]) -> Result<SendPlan> {
        // Broadcast to nobody is not an error.
        Ok(SendPlan::Broadcast)
    }
}

/// Filtering subscriber state machine.
#[derive(Debug, Default)]
pub(crate) struct Sub {
    /// Topic prefixes; an empty prefix matches everything.
    topics: Vec<Vec<u8>>,
}

impl Sub {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn matches(&self, body: &[u8]) -> bool {
        self.topics.iter().any(|t| body.starts_with(t))
    }
}

impl StateMachine for Sub {
    fn protocol(&self) -> Protocol {
        Protocol::Sub
    }

    fn can_send(&self) -> bool {
        false
    }

    fn route_send(&mut self, _msg: &mut Message, _pipes: &[PipeId]) -> Result<SendPlan> {
        Err(Error::NotSupported)
    }

    fn filter_recv(&mut self, _pipe: PipeId, msg: &mut Message) -> RecvAction {
        if self.matches(msg.body()) {
            RecvAction::Deliver
        } else {
            RecvAction::Drop
        }
    }

    fn subscribe(&mut self, topic: &[u8]) -> Result<()> {
        if !self.topics.iter().any(|t| t == topic) {
            self.topics.push(topic.to_vec());
        }
        Ok(())
    }

    fn unsubscribe(&mut self, topic: &[u8]) -> Result<()> {
        let before = self.topics.len();
        self.topics.retain(|t| t != topic);
        if self.topics.len() == before {
            // Removing a subscription that was never added.
            return Err(Error::InvalidArgument);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pub_always_broadcasts() {
        let mut p = Pub::new();
        let mut msg = Message::from_slice(b"tick");
        assert_eq!(p.route_send(&mut msg, &[]).unwrap(), SendPlan::Broadcast);
        assert!(!p.can_recv());
    }

    #[test]
    fn test_sub_empty_set_receives_nothing() {
        let mut s = Sub::new();
        let mut msg = Message::from_slice(b"sports/football");
        assert_eq!(s.filter_recv(PipeId(1), &mut msg), RecvAction::Drop);
    }

    #[test]
    fn test_sub_prefix_filtering() {
        let mut s = Sub::new();
        s.subscribe(b"sports/").unwrap();

        let mut hit = Message::from_slice(b"sports/football");
        assert_eq!(s.filter_recv(PipeId(1), &mut hit), RecvAction::Deliver);

        let mut miss = Message::from_slice(b"finance/aapl");
        assert_eq!(s.filter_recv(PipeId(1), &mut miss), RecvAction::Drop);
    }

    #[test]
    fn test_sub_empty_prefix_wildcard() {
        let mut s = Sub::new();
        s.subscribe(b"").unwrap();
        let mut msg = Message::from_slice(b"anything at all");
        assert_eq!(s.filter_recv(PipeId(1), &mut msg), RecvAction::Deliver);
    }

    #[test]
    fn test_sub_unsubscribe() {
        let mut s = Sub::new();
        s.subscribe(b"a/").unwrap();
        s.unsubscribe(b"a/").unwrap();
        let mut msg = Message::from_slice(b"a/b");
        assert_eq!(s.filter_recv(PipeId(1), &mut msg), RecvAction::Drop);
        assert_eq!(s.unsubscribe(b"a/"), Err(Error::InvalidArgument));
    }

    #[test]
    fn test_sub_cannot_send() {
        let mut s = Sub::new();
        let mut msg = Message::from_slice(b"x");
        assert_eq!(s.route_send(&mut msg, &[PipeId(1)]), Err(Error::NotSupported));
    }

    #[test]
    fn test_pub_option_rejected_on_sub_side_only() {
        let mut p = Pub::new();
        assert_eq!(p.subscribe(b"t"), Err(Error::NotSupported));
    }
}
