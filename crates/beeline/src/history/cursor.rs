//! Forward-only cursor a replay pass reads history events from.

use std::collections::VecDeque;

use super::event::{Event, EventKind};
use crate::workflow::Interrupt;

/// Forward-only view over the decoded events of one replay pass.
///
/// Each workflow call consumes the events that record its outcome, in
/// the order the calls are made. There is no rewind: a pass that needs to
/// look at an event twice must [`peek`](Self::peek) first.
#[derive(Debug, Default)]
pub struct ReplayCursor {
    events: VecDeque<Event>,
    consumed: usize,
}

impl ReplayCursor {
    pub fn new(events: Vec<Event>) -> Self {
        Self {
            events: events.into(),
            consumed: 0,
        }
    }

    /// Take the next event.
    pub fn pop_front(&mut self) -> Option<Event> {
        let event = self.events.pop_front()?;
        self.consumed += 1;
        Some(event)
    }

    /// Look at the next event without consuming it.
    pub fn peek(&self) -> Option<&Event> {
        self.events.front()
    }

    /// Pop the next event and assert its type.
    ///
    /// `Ok(None)` means nothing further has been recorded yet. An event that
    /// fails `accept` means the workflow code and its history disagree,
    /// which is a fatal replay-consistency error.
    pub fn expect_next(
        &mut self,
        accept: impl Fn(&EventKind) -> bool,
        expected: &str,
    ) -> Result<Option<Event>, Interrupt> {
        let Some(event) = self.pop_front() else {
            return Ok(None);
        };
        if accept(&event.kind) {
            Ok(Some(event))
        } else {
            Err(Interrupt::Decider(format!(
                "replay mismatch at event {}: expected {expected}, found {}",
                event.id,
                event.kind.name()
            )))
        }
    }

    /// Events not yet consumed.
    pub fn remaining(&self) -> usize {
        self.events.len()
    }

    /// Events consumed so far.
    pub fn consumed(&self) -> usize {
        self.consumed
    }

    pub fn is_exhausted(&self) -> bool {
        self.events.is_empty()
    }
}
