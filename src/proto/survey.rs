//! Survey protocol pair.
//!
//! The surveyor broadcasts a survey stamped with a fresh id and accepts
//! responses carrying that id until a deadline, after which receives time
//! out and stragglers are discarded. Receiving with no survey outstanding
//! is a state error. A respondent answers at most once
//! per survey it has read; reading a newer survey forfeits the unanswered
//! older one.

use std::time::{Duration, Instant};

use super::{Protocol, RecvAction, SendPlan, StateMachine};
use crate::error::{Error, Result};
use crate::message::Message;
use crate::pipe::PipeId;

/// Default survey window before responses stop being accepted.
pub(crate) const DEFAULT_SURVEY_TIME: Duration = Duration::from_secs(1);

/// Survey originator state machine.
#[derive(Debug)]
pub(crate) struct Surveyor {
    window: Duration,
    next_id: u32,
    /// Active survey: (id, response deadline).
    current: Option<(u32, Instant)>,
}

impl Surveyor {
    pub(crate) fn new() -> Self {
        Self {
            window: DEFAULT_SURVEY_TIME,
            next_id: 1,
            current: None,
        }
    }
}

impl StateMachine for Surveyor {
    fn protocol(&self) -> Protocol {
        Protocol::Surveyor
    }

    fn route_send(&mut self, msg: &mut Message, _pipes: &[PipeId]) -> Result<SendPlan> {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        self.current = Some((id, Instant::now() + self.window));

        msg.header_clear();
        msg.header_push_u32(id);
        Ok(SendPlan::Broadcast)
    }

    fn filter_recv(&mut self, _pipe: PipeId, msg: &mut Message) -> RecvAction {
        let Some((id, deadline)) = self.current else {
            return RecvAction::Drop;
        };
        if Instant::now() > deadline {
            tracing::debug!("surveyor: discarding response past survey deadline");
            return RecvAction::Drop;
        }
        match msg.header_peek_u32() {
            Some(corr) if corr == id => RecvAction::Deliver,
            _ => RecvAction::Drop,
        }
    }

    fn on_app_recv(&mut self, _pipe: PipeId, msg: &mut Message) -> Result<()> {
        msg.header_pop_u32()
            .ok_or(Error::Protocol("response lost survey header".into()))?;
        Ok(())
    }

    fn check_recv(&self) -> Result<()> {
        // Nothing was asked, so nothing can be received.
        if self.current.is_none() {
            return Err(Error::IncorrectState);
        }
        Ok(())
    }

    fn recv_deadline(&self) -> Option<Instant> {
        self.current.map(|(_, deadline)| deadline)
    }

    fn set_survey_time(&mut self, window: Duration) -> Result<()> {
        self.window = window;
        Ok(())
    }
}

/// Survey responder state machine.
#[derive(Debug)]
pub(crate) struct Respondent {
    /// Survey awaiting our answer: (survey id, origin pipe).
    pending: Option<(u32, PipeId)>,
}

impl Respondent {
    pub(crate) fn new() -> Self {
        Self { pending: None }
    }
}

impl StateMachine for Respondent {
    fn protocol(&self) -> Protocol {
        Protocol::Respondent
    }

    fn route_send(&mut self, msg: &mut Message, pipes: &[PipeId]) -> Result<SendPlan> {
        let (id, pipe) = self.pending.take().ok_or(Error::IncorrectState)?;

        msg.header_clear();
        msg.header_push_u32(id);

        if pipes.contains(&pipe) {
            Ok(SendPlan::Unicast(pipe))
        } else {
            Ok(SendPlan::Discard)
        }
    }

    fn filter_recv(&mut self, _pipe: PipeId, msg: &mut Message) -> RecvAction {
        if msg.header_peek_u32().is_none() {
            return RecvAction::Drop;
        }
        RecvAction::Deliver
    }

    fn on_app_recv(&mut self, pipe: PipeId, msg: &mut Message) -> Result<()> {
        let id = msg
            .header_pop_u32()
            .ok_or(Error::Protocol("survey lost id header".into()))?;
        // A newer survey replaces an unanswered older one.
        self.pending = Some((id, pipe));
        Ok(())
    }

    fn pipe_detached(&mut self, id: PipeId) {
        if self.pending.is_some_and(|(_, p)| p == id) {
            self.pending = None;
        }
    }
}
