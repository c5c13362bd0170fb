//! Deterministic cross-clock scheduler.
//!
//! Two [`Clock`]s coexist, ticking at different rates (the host clock and
//! the audio clock). Each holds its own monotonic cycle stamp and a min-heap
//! of future [`Event`]s. `run_timeslice` advances a clock to the horizon of
//! its next event and lets the caller's dispatch function run until the
//! countdown is exhausted.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// 64-bit monotonic cycle counter, one per clock.
pub type CycleStamp = u64;

/// Opaque handle identifying a scheduled event for cancellation/rescheduling.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId(u64);

/// A scheduled event: fires `handler` at cycle stamp `when`.
///
/// `handler` takes the opaque `arg` plus the stamp it actually fired at
/// (which equals `when`, passed through so handlers don't need to close
/// over it twice) and may re-arm itself by scheduling a new event on the
/// same clock from within the callback — the scheduler does not prevent
/// re-entrancy, it simply drains whatever is in the heap whose `when` has
/// been reached.
pub struct Event<Ctx> {
    pub when: CycleStamp,
    pub handler: Box<dyn FnOnce(&mut Ctx, CycleStamp)>,
}

struct HeapEntry {
    when: CycleStamp,
    seq: u64,
    id: EventId,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.when == other.when && self.seq == other.seq
    }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; invert so the earliest `when` (and,
        // for ties, the earliest insertion sequence) pops first.
        other
            .when
            .cmp(&self.when)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// One clock domain: a cycle stamp, a target stamp (deadline for the next
/// preempt), and a min-heap of future events.
pub struct Clock<Ctx> {
    cycle_stamp: CycleStamp,
    target_stamp: CycleStamp,
    heap: BinaryHeap<HeapEntry>,
    pending: std::collections::HashMap<u64, Event<Ctx>>,
    next_seq: u64,
    next_id: u64,
    /// Cadence of the housekeeping event armed when no other event is
    /// pending, expressed as a divisor of the nominal clock frequency.
    housekeeping_period: CycleStamp,
}

impl<Ctx> Clock<Ctx> {
    pub fn new(housekeeping_period: CycleStamp) -> Self {
        Self {
            cycle_stamp: 0,
            target_stamp: 0,
            heap: BinaryHeap::new(),
            pending: std::collections::HashMap::new(),
            next_seq: 0,
            next_id: 0,
            housekeeping_period: housekeeping_period.max(1),
        }
    }

    pub fn cycle_stamp(&self) -> CycleStamp {
        self.cycle_stamp
    }

    pub fn target_stamp(&self) -> CycleStamp {
        self.target_stamp
    }

    /// Advance the raw cycle stamp. Called by the dispatch loop as
    /// instructions/ticks consume cycles; never goes backwards.
    pub fn advance(&mut self, cycles: CycleStamp) {
        self.cycle_stamp += cycles;
    }

    /// Directly set the cycle stamp (used when a timeslice jumps straight
    /// to the next event horizon rather than counting down one unit at a
    /// time).
    pub fn set_cycle_stamp(&mut self, stamp: CycleStamp) {
        debug_assert!(stamp >= self.cycle_stamp, "clock stamp moved backwards");
        self.cycle_stamp = stamp;
    }

    pub fn schedule(&mut self, event: Event<Ctx>) -> EventId {
        let id = self.next_id;
        self.next_id += 1;
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(HeapEntry {
            when: event.when,
            seq,
            id: EventId(id),
        });
        self.pending.insert(id, event);
        EventId(id)
    }

    /// Schedule `cycles` cycles from now.
    pub fn schedule_after(
        &mut self,
        cycles: CycleStamp,
        handler: impl FnOnce(&mut Ctx, CycleStamp) + 'static,
    ) -> EventId {
        self.schedule(Event {
            when: self.cycle_stamp + cycles,
            handler: Box::new(handler),
        })
    }

    /// Cancel a pending event by identity. No-op if it already fired.
    pub fn cancel(&mut self, id: EventId) {
        self.pending.remove(&id.0);
        // The heap entry is left in place (lazy deletion) and skipped in
        // `pop_due` once its id is no longer present in `pending`.
    }

    /// `when` of the top heap entry. Callers must `pop_stale` first so this
    /// never observes a cancelled entry.
    fn peek_when(&self) -> Option<CycleStamp> {
        self.heap.peek().map(|top| top.when)
    }

    /// Remove cancelled entries sitting at the top of the heap.
    fn pop_stale(&mut self) {
        while let Some(top) = self.heap.peek() {
            if self.pending.contains_key(&top.id.0) {
                break;
            }
            self.heap.pop();
        }
    }

    /// `when` of the earliest live event, arming the housekeeping event
    /// first if the heap is otherwise empty.
    pub fn next_event_when(&mut self) -> CycleStamp {
        self.pop_stale();
        match self.peek_when() {
            Some(w) => w,
            None => self.cycle_stamp + self.housekeeping_period,
        }
    }

    /// Fire every event whose `when` has been reached (in insertion order
    /// for ties), re-checking the heap
    /// after each handler runs since handlers may schedule new events in
    /// the past.
    pub fn fire_due(&mut self, ctx: &mut Ctx) {
        loop {
            self.pop_stale();
            let due = match self.heap.peek() {
                Some(top) if top.when <= self.cycle_stamp => top.id.0,
                _ => break,
            };
            self.heap.pop();
            if let Some(event) = self.pending.remove(&due) {
                (event.handler)(ctx, self.cycle_stamp);
            }
        }
    }

    pub fn is_sleeping_until(&self) -> CycleStamp {
        self.target_stamp
    }
}

/// Run one timeslice on `clock`: sets its target to the next event
/// horizon, invokes `dispatch` with the countdown, advances the clock to
/// the target, then fires due events. `dispatch` returns the number of
/// cycles it actually consumed (it may return early, e.g. on a mid-slice
/// exception that requires preemption) — the clock only ever advances by
/// that amount, never past it.
///
/// Returns `true` if `dispatch` stopped before using the whole countdown
/// (a mid-slice preemption occurred).
pub fn run_timeslice<Ctx>(
    clock: &mut Clock<Ctx>,
    ctx: &mut Ctx,
    dispatch: impl FnOnce(&mut Ctx, CycleStamp) -> CycleStamp,
) -> bool {
    let horizon = clock.next_event_when();
    clock.target_stamp = horizon;
    let countdown = horizon.saturating_sub(clock.cycle_stamp);
    let consumed = dispatch(ctx, countdown).min(countdown);
    clock.advance(consumed);
    let did_preempt = consumed < countdown;
    clock.fire_due(ctx);
    did_preempt
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter(u32);

    #[test]
    fn events_fire_in_when_order() {
        let mut clock: Clock<Counter> = Clock::new(1000);
        let mut ctx = Counter(0);
        clock.schedule(Event {
            when: 20,
            handler: Box::new(|c, _| c.0 += 2),
        });
        clock.schedule(Event {
            when: 10,
            handler: Box::new(|c, _| {
                assert_eq!(c.0, 0);
                c.0 += 1;
            }),
        });
        clock.set_cycle_stamp(30);
        clock.fire_due(&mut ctx);
        assert_eq!(ctx.0, 3);
    }

    #[test]
    fn ties_fire_in_insertion_order() {
        let mut clock: Clock<Vec<u32>> = Clock::new(1000);
        let mut ctx = Vec::new();
        clock.schedule(Event {
            when: 5,
            handler: Box::new(|c, _| c.push(1)),
        });
        clock.schedule(Event {
            when: 5,
            handler: Box::new(|c, _| c.push(2)),
        });
        clock.set_cycle_stamp(5);
        clock.fire_due(&mut ctx);
        assert_eq!(ctx, vec![1, 2]);
    }

    #[test]
    fn cancel_prevents_firing() {
        let mut clock: Clock<u32> = Clock::new(1000);
        let mut ctx = 0u32;
        let id = clock.schedule(Event {
            when: 5,
            handler: Box::new(|c, _| *c += 1),
        });
        clock.cancel(id);
        clock.set_cycle_stamp(10);
        clock.fire_due(&mut ctx);
        assert_eq!(ctx, 0);
    }

    #[test]
    fn no_pending_events_uses_housekeeping_cadence() {
        let mut clock: Clock<()> = Clock::new(100);
        assert_eq!(clock.next_event_when(), 100);
    }

    #[test]
    fn handler_can_rearm_itself() {
        let mut clock: Clock<u32> = Clock::new(1000);
        let mut ctx = 0u32;
        fn rearm(c: &mut u32, _when: CycleStamp) {
            *c += 1;
        }
        clock.schedule(Event {
            when: 5,
            handler: Box::new(rearm),
        });
        clock.set_cycle_stamp(5);
        clock.fire_due(&mut ctx);
        assert_eq!(ctx, 1);
        // A handler scheduling a new event "in the past" fires on the next pump.
        clock.schedule(Event {
            when: 3,
            handler: Box::new(rearm),
        });
        clock.fire_due(&mut ctx);
        assert_eq!(ctx, 2);
    }

    #[test]
    fn run_timeslice_reports_preemption() {
        let mut clock: Clock<u32> = Clock::new(1000);
        clock.schedule(Event {
            when: 100,
            handler: Box::new(|_, _| {}),
        });
        let mut ctx = 0u32;
        let preempted = run_timeslice(&mut clock, &mut ctx, |_, countdown| {
            assert_eq!(countdown, 100);
            40 // stop early
        });
        assert!(preempted);
        assert_eq!(clock.cycle_stamp(), 40);
    }
}
