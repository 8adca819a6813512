//! Request/reply protocol pair.
//!
//! The requester stamps a correlation id into the message header and
//! round-robins across pipes; only a reply carrying the id of the current
//! outstanding request is delivered, anything else is silently discarded.
//! The replier records a (correlation id, pipe) context when the
//! application dequeues a request and attaches both to the next reply.
//!
//! Reply contexts stack LIFO, so a replier that reads several requests
//! before answering replies to the most recently read one first.

use super::{Protocol, RecvAction, RoundRobin, SendPlan, StateMachine};
use crate::error::{Error, Result};
use crate::message::Message;
use crate::pipe::PipeId;

/// Requester state machine.
#[derive(Debug)]
pub(crate) struct Req {
    rr: RoundRobin,
    /// Correlation id of the single outstanding request, if any.
    outstanding: Option<u32>,
    next_id: u32,
}

impl Req {
    pub(crate) fn new() -> Self {
        Self {
            rr: RoundRobin::new(),
            outstanding: None,
            next_id: 1,
        }
    }
}

impl StateMachine for Req {
    fn protocol(&self) -> Protocol {
        Protocol::Req
    }

    fn route_send(&mut self, msg: &mut Message, pipes: &[PipeId]) -> Result<SendPlan> {
        let Some(id) = self.rr.pick(pipes) else {
            return Ok(SendPlan::NoPipes);
        };

        // A new request supersedes any still-outstanding one; late replies
        // to the old id fall through the filter.
        let corr = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        self.outstanding = Some(corr);

        msg.header_clear();
        msg.header_push_u32(corr);
        Ok(SendPlan::Unicast(id))
    }

    fn filter_recv(&mut self, _pipe: PipeId, msg: &mut Message) -> RecvAction {
        match (msg.header_peek_u32(), self.outstanding) {
            (Some(corr), Some(want)) if corr == want => RecvAction::Deliver,
            _ => {
                tracing::debug!("req: discarding reply with stale or missing correlation id");
                RecvAction::Drop
            }
        }
    }

    fn on_app_recv(&mut self, _pipe: PipeId, msg: &mut Message) -> Result<()> {
        msg.header_pop_u32().ok_or(Error::Protocol(
            "reply delivered without correlation header".into(),
        ))?;
        self.outstanding = None;
        Ok(())
    }
}

/// Replier state machine.
#[derive(Debug)]
pub(crate) struct Rep {
    /// LIFO stack of (correlation id, origin pipe) for unanswered requests.
    contexts: Vec<(u32, PipeId)>,
}

impl Rep {
    pub(crate) fn new() -> Self {
        Self {
            contexts: Vec::new(),
        }
    }
}

impl StateMachine for Rep {
    fn protocol(&self) -> Protocol {
        Protocol::Rep
    }

    fn route_send(&mut self, msg: &mut Message, pipes: &[PipeId]) -> Result<SendPlan> {
        let (corr, pipe) = self.contexts.pop().ok_or(Error::IncorrectState)?;

        msg.header_clear();
        msg.header_push_u32(corr);

        if pipes.contains(&pipe) {
            Ok(SendPlan::Unicast(pipe))
        } else {
            // Requester disconnected while we were working; the reply has
            // nowhere to go.
            tracing::debug!(pipe = pipe.0, "rep: dropping reply to departed pipe");
            Ok(SendPlan::Discard)
        }
    }

    fn filter_recv(&mut self, _pipe: PipeId, msg: &mut Message) -> RecvAction {
        if msg.header_peek_u32().is_none() {
            tracing::debug!("rep: discarding request without correlation header");
            return RecvAction::Drop;
        }
        RecvAction::Deliver
    }

    fn on_app_recv(&mut self, pipe: PipeId, msg: &mut Message) -> Result<()> {
        let corr = msg
            .header_pop_u32()
            .ok_or(Error::Protocol("request lost correlation header".into()))?;
        self.contexts.push((corr, pipe));
        Ok(())
    }

    fn pipe_detached(&mut self, id: PipeId) {
        self.contexts.retain(|&(_, p)| p != id);
    }
}
