//! Merge-dedup: two sorted event streams of one PV combined into one strictly
//! ascending stream.

use crate::error::Result;
use crate::event::{Event, EventStream, StreamDescription};
use crate::time::Timestamp;

/// Lazily merges two ascending streams.
///
/// At each step the earlier head is emitted. On equal timestamps the event of
/// the first stream wins and both inputs advance. Only the current head of
/// each input is held. Dropping the merge drops both inputs.
///
/// # Examples
/// ```rust,ignore
/// use alopex_strata::merge::MergeDedupStream;
///
/// let local = sts.get_data(pv, start, end)?;
/// let remote = failover.get_data(pv, start, end)?;
/// for event in MergeDedupStream::new(local, remote) {
///     println!("{:?}", event?.timestamp);
/// }
/// ```
pub struct MergeDedupStream<A, B> {
    first: A,
    second: B,
    first_head: Option<Event>,
    second_head: Option<Event>,
    first_done: bool,
    second_done: bool,
    last_emitted: Option<Timestamp>,
    description: StreamDescription,
}

impl<A: EventStream, B: EventStream> MergeDedupStream<A, B> {
    /// Creates the merge; the description is taken from `first`.
    pub fn new(first: A, second: B) -> Self {
        let description = first.description().clone();
        Self {
            first,
            second,
            first_head: None,
            second_head: None,
            first_done: false,
            second_done: false,
            last_emitted: None,
            description,
        }
    }

    fn emit(&mut self, event: Event) -> Option<Result<Event>> {
        self.last_emitted = Some(event.timestamp);
        Some(Ok(event))
    }

    fn stale(&self, event: &Event) -> bool {
        self.last_emitted
            .is_some_and(|last| event.timestamp <= last)
    }
}

fn fill<S: EventStream>(
    stream: &mut S,
    head: &mut Option<Event>,
    done: &mut bool,
) -> Result<()> {
    if head.is_none() && !*done {
        match stream.next() {
            Some(Ok(event)) => *head = Some(event),
            Some(Err(err)) => return Err(err),
            None => *done = true,
        }
    }
    Ok(())
}

impl<A: EventStream, B: EventStream> Iterator for MergeDedupStream<A, B> {
    type Item = Result<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Err(err) = fill(&mut self.first, &mut self.first_head, &mut self.first_done) {
                return Some(Err(err));
            }
            if let Err(err) = fill(&mut self.second, &mut self.second_head, &mut self.second_done) {
                return Some(Err(err));
            }

            let event = match (self.first_head.take(), self.second_head.take()) {
                (None, None) => return None,
                (Some(first), None) => first,
                (None, Some(second)) => second,
                (Some(first), Some(second)) => {
                    if first.timestamp < second.timestamp {
                        self.second_head = Some(second);
                        first
                    } else if second.timestamp < first.timestamp {
                        self.first_head = Some(first);
                        second
                    } else {
                        first
                    }
                }
            };
            if self.stale(&event) {
                continue;
            }
            return self.emit(event);
        }
    }
}

impl<A: EventStream, B: EventStream> EventStream for MergeDedupStream<A, B> {
    fn description(&self) -> &StreamDescription {
        &self.description
    }
}
