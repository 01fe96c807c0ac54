use std::collections::BTreeMap;

use serde::Serialize;

use crate::linking::LinkTarget;

/// Delayed callbacks the controller arms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum TimerTag {
    SpitCooldown,
    TakenReset,
    LinkDelay(LinkTarget),
    UntouchSettle,
}

/// A tag plus the generation it was armed with. A firing only counts when
/// its generation is still the one the controller expects for that tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimerTicket {
    pub tag: TimerTag,
    pub generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimerRequest {
    pub delay_secs: f64,
    pub ticket: TimerTicket,
}

/// Expected generation per tag, owned by the controller.
#[derive(Debug, Default, Clone)]
pub struct TimerGenerations {
    next: u64,
    armed: BTreeMap<TimerTag, u64>,
}

impl TimerGenerations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues a fresh ticket for `tag`; any earlier ticket becomes stale.
    pub fn arm(&mut self, tag: TimerTag) -> TimerTicket {
        self.next += 1;
        self.armed.insert(tag, self.next);
        TimerTicket {
            tag,
            generation: self.next,
        }
    }

    /// Consumes a firing. Returns false for stale or never-armed tickets.
    pub fn accept(&mut self, ticket: TimerTicket) -> bool {
        match self.armed.get(&ticket.tag) {
            Some(generation) if *generation == ticket.generation => {
                self.armed.remove(&ticket.tag);
                true
            }
            _ => false,
        }
    }

    pub fn disarm_all(&mut self) {
        self.armed.clear();
    }

    pub fn is_armed(&self, tag: TimerTag) -> bool {
        self.armed.contains_key(&tag)
    }
}

#[derive(Debug, Clone, Serialize)]
struct ScheduledTimer {
    due: f64,
    order: u64,
    ticket: TimerTicket,
}

#[derive(Debug, Clone, Serialize)]
pub struct FiredTimer {
    pub at: f64,
    pub ticket: TimerTicket,
}

/// Pending timers for one replica, released in due order against a virtual
/// clock. Ties fire in scheduling order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TimerQueue {
    pending: Vec<ScheduledTimer>,
    history: Vec<FiredTimer>,
    next_order: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, now: f64, request: TimerRequest) {
        let due = now + request.delay_secs.max(0.0);
        self.pending.push(ScheduledTimer {
            due,
            order: self.next_order,
            ticket: request.ticket,
        });
        self.next_order += 1;
    }

    /// Due time of the earliest pending timer.
    pub fn next_due(&self) -> Option<f64> {
        self.earliest().map(|index| self.pending[index].due)
    }

    /// Removes and returns the earliest timer due at or before `now`.
    pub fn pop_due(&mut self, now: f64) -> Option<TimerTicket> {
        let index = self.earliest()?;
        if self.pending[index].due > now {
            return None;
        }
        let timer = self.pending.remove(index);
        self.history.push(FiredTimer {
            at: timer.due,
            ticket: timer.ticket,
        });
        Some(timer.ticket)
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn history(&self) -> &[FiredTimer] {
        &self.history
    }

    fn earliest(&self) -> Option<usize> {
        self.pending
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.due.total_cmp(&b.due).then(a.order.cmp(&b.order)))
            .map(|(index, _)| index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(tag: TimerTag, generation: u64, delay_secs: f64) -> TimerRequest {
        TimerRequest {
            delay_secs,
            ticket: TimerTicket { tag, generation },
        }
    }

    #[test]
    fn queue_releases_in_due_order() {
        let mut queue = TimerQueue::new();
        queue.schedule(0.0, request(TimerTag::SpitCooldown, 1, 10.0));
        queue.schedule(0.0, request(TimerTag::UntouchSettle, 2, 0.8));
        queue.schedule(0.0, request(TimerTag::TakenReset, 3, 0.8));
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.next_due(), Some(0.8));

        assert!(queue.pop_due(0.5).is_none());
        let fired: Vec<TimerTag> = std::iter::from_fn(|| queue.pop_due(10.0))
            .map(|ticket| ticket.tag)
            .collect();
        assert_eq!(
            fired,
            vec![
                TimerTag::UntouchSettle,
                TimerTag::TakenReset,
                TimerTag::SpitCooldown
            ]
        );
        assert!(queue.is_empty());
        assert_eq!(queue.history().len(), 3);
    }

    #[test]
    fn rearming_makes_previous_ticket_stale() {
        let mut generations = TimerGenerations::new();
        let first = generations.arm(TimerTag::SpitCooldown);
        let second = generations.arm(TimerTag::SpitCooldown);
        assert!(!generations.accept(first));
        assert!(generations.accept(second));
        assert!(!generations.accept(second), "a ticket is consumed once");
    }

    #[test]
    fn disarm_all_drops_outstanding_tickets() {
        let mut generations = TimerGenerations::new();
        let ticket = generations.arm(TimerTag::LinkDelay(LinkTarget::PelletCave));
        assert!(generations.is_armed(ticket.tag));
        generations.disarm_all();
        assert!(!generations.accept(ticket));
    }
}
