//! Protocol state machines.
//!
//! Each socket carries exactly one state machine, chosen at open time,
//! that decides how messages are routed among the socket's pipes. The
//! machines themselves are synchronous: they stamp headers, pick pipes
//! and filter inbound traffic, while all actual channel I/O stays in the
//! socket core. This keeps every variant a small, testable table of
//! routing rules.
//!
//! Send-side hooks run under the socket's dispatch lock on the caller's
//! task; [`StateMachine::filter_recv`] runs on the pipe reader task
//! before a message is queued for the application.

mod bus;
mod pair;
mod pipeline;
mod pubsub;
mod reqrep;
mod survey;

use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::message::Message;
use crate::pipe::PipeId;

/// Messaging pattern selected when a socket is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// One-to-one bidirectional.
    Pair,
    /// Request half of request/reply.
    Req,
    /// Reply half of request/reply.
    Rep,
    /// Broadcast publisher.
    Pub,
    /// Filtering subscriber.
    Sub,
    /// Pipeline producer.
    Push,
    /// Pipeline consumer.
    Pull,
    /// Many-to-many broadcast.
    Bus,
    /// Survey originator.
    Surveyor,
    /// Survey responder.
    Respondent,
}

impl Protocol {
    /// Short protocol name, as used in stats and logs.
    pub fn name(self) -> &'static str {
        match self {
            Protocol::Pair => "pair",
            Protocol::Req => "req",
            Protocol::Rep => "rep",
            Protocol::Pub => "pub",
            Protocol::Sub => "sub",
            Protocol::Push => "push",
            Protocol::Pull => "pull",
            Protocol::Bus => "bus",
            Protocol::Surveyor => "surveyor",
            Protocol::Respondent => "respondent",
        }
    }

    /// Build the state machine for this variant.
    pub(crate) fn state_machine(self) -> Box<dyn StateMachine> {
        match self {
            Protocol::Pair => Box::new(pair::Pair::new()),
            Protocol::Req => Box::new(reqrep::Req::new()),
            Protocol::Rep => Box::new(reqrep::Rep::new()),
            Protocol::Pub => Box::new(pubsub::Pub::new()),
            Protocol::Sub => Box::new(pubsub::Sub::new()),
            Protocol::Push => Box::new(pipeline::Push::new()),
            Protocol::Pull => Box::new(pipeline::Pull::new()),
            Protocol::Bus => Box::new(bus::Bus::new()),
            Protocol::Surveyor => Box::new(survey::Surveyor::new()),
            Protocol::Respondent => Box::new(survey::Respondent::new()),
        }
    }
}

/// Routing decision for one send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SendPlan {
    /// Deliver to exactly this pipe, honoring its back-pressure.
    Unicast(PipeId),
    /// Deliver to the preferred pipe, or to any other pipe with queue
    /// capacity; back-pressure applies only when every pipe is full.
    Balanced(PipeId),
    /// Best-effort copy to every pipe; zero pipes is still success.
    Broadcast,
    /// No pipe available right now; a blocking caller waits and retries.
    NoPipes,
    /// Consume the message without sending (reply whose pipe vanished).
    Discard,
}

/// Verdict on an inbound message before it reaches the application queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RecvAction {
    /// Queue for the application.
    Deliver,
    /// Drop silently (filter miss, stale correlation, late response).
    Drop,
}

/// Per-variant routing behavior. One instance per socket, guarded by the
/// socket's dispatch lock.
pub(crate) trait StateMachine: Send {
    /// The variant this machine implements.
    fn protocol(&self) -> Protocol;

    /// Whether this variant can send at all (Sub and Pull cannot).
    fn can_send(&self) -> bool {
        true
    }

    /// Whether this variant can receive at all (Pub and Push cannot).
    fn can_recv(&self) -> bool {
        true
    }

    /// Whether another pipe may attach given the current active count.
    fn can_attach(&self, active: usize) -> bool {
        let _ = active;
        true
    }

    /// A pipe joined the socket.
    fn pipe_attached(&mut self, id: PipeId) {
        let _ = id;
    }

    /// A pipe left the socket.
    fn pipe_detached(&mut self, id: PipeId) {
        let _ = id;
    }

    /// Stamp protocol headers and choose the routing plan for `msg`.
    ///
    /// `pipes` is the ordered set of live pipe ids. May be called again
    /// for the same message after `NoPipes`, so implementations reset any
    /// header bytes they add rather than stacking them.
    fn route_send(&mut self, msg: &mut Message, pipes: &[PipeId]) -> Result<SendPlan>;

    /// Inspect an inbound message on the pipe reader task.
    fn filter_recv(&mut self, pipe: PipeId, msg: &mut Message) -> RecvAction {
        let _ = (pipe, msg);
        RecvAction::Deliver
    }

    /// Post-dequeue hook on the application task; strips headers and
    /// records reply context where the variant needs it.
    fn on_app_recv(&mut self, pipe: PipeId, msg: &mut Message) -> Result<()> {
        let _ = (pipe, msg);
        Ok(())
    }

    /// Reject a receive that is invalid in the variant's current state
    /// (surveyor with no survey outstanding).
    fn check_recv(&self) -> Result<()> {
        Ok(())
    }

    /// Absolute deadline bounding the next receive, if the variant
    /// imposes one (surveyor).
    fn recv_deadline(&self) -> Option<Instant> {
        None
    }

    /// Add a topic-prefix subscription (Sub only).
    fn subscribe(&mut self, topic: &[u8]) -> Result<()> {
        let _ = topic;
        Err(Error::NotSupported)
    }

    /// Remove a topic-prefix subscription (Sub only).
    fn unsubscribe(&mut self, topic: &[u8]) -> Result<()> {
        let _ = topic;
        Err(Error::NotSupported)
    }

    /// Set the survey deadline duration (Surveyor only).
    fn set_survey_time(&mut self, window: Duration) -> Result<()> {
        let _ = window;
        Err(Error::NotSupported)
    }
}

/// Strict round-robin cursor over an ordered pipe set.
///
/// Used by the Req and Push send paths; the cursor survives pipe churn by
/// indexing modulo the current length.
#[derive(Debug, Default)]
pub(crate) struct RoundRobin {
    next: usize,
}

impl RoundRobin {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Pick the next pipe, advancing the cursor. `None` when empty.
    pub(crate) fn pick(&mut self, pipes: &[PipeId]) -> Option<PipeId> {
        if pipes.is_empty() {
            return None;
        }
        let id = pipes[self.next % pipes.len()];
        self.next = self.next.wrapping_add(1);
        Some(id)
    }
}
