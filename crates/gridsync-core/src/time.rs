//! Simulation timestamps, next-event results and their aggregation.
//!
//! A class sync callback reports when it next needs attention as a
//! [`NextEvent`]. On the wire between the engine and older callers the
//! same value is a single signed integer: non-negative for a hard
//! event, negated for a soft event, and `i64::MAX` for "never".

use std::fmt;

/// Absolute simulation time in whole seconds since the epoch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// The epoch.
    pub const ZERO: Self = Self(0);
    /// Marker for a failed or missing time.
    pub const INVALID: Self = Self(-1);
    /// The largest representable event time (year 2999).
    pub const MAX: Self = Self(32_482_080_000);
    /// No further event.
    pub const NEVER: Self = Self(i64::MAX);

    /// Whether this is [`Timestamp::NEVER`].
    pub fn is_never(self) -> bool {
        self.0 == i64::MAX
    }

    /// Whether this time lies in `[ZERO, MAX]`.
    pub fn is_valid(self) -> bool {
        self.0 >= 0 && self.0 <= Self::MAX.0
    }

    /// Offset by `secs`, saturating. `NEVER` stays `NEVER`.
    pub fn offset(self, secs: i64) -> Self {
        if self.is_never() {
            return self;
        }
        Self(self.0.saturating_add(secs))
    }

    /// Round up to the next multiple of `step` at or after `self`.
    ///
    /// A `step` of 0 or 1 and `NEVER` leave the time unchanged.
    pub fn round_up_to(self, step: u64) -> Self {
        if step <= 1 || self.is_never() || self.0 <= 0 {
            return self;
        }
        let step = i64::try_from(step).unwrap_or(i64::MAX);
        let rem = self.0.rem_euclid(step);
        if rem == 0 {
            self
        } else {
            Self(self.0.saturating_add(step - rem))
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::NEVER => write!(f, "NEVER"),
            Self::INVALID => write!(f, "INVALID"),
            Self(t) => write!(f, "{t}"),
        }
    }
}

impl From<i64> for Timestamp {
    fn from(v: i64) -> Self {
        Self(v)
    }
}

// ── NextEvent ──────────────────────────────────────────────────

/// When an object next needs to be synchronized.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NextEvent {
    /// A definite event at an absolute time.
    Hard(Timestamp),
    /// Re-offer the object this time before the clock may advance.
    Soft(Timestamp),
    /// No further event.
    Never,
}

impl NextEvent {
    /// A hard event at `t`, collapsing `NEVER` to [`NextEvent::Never`].
    pub fn hard(t: Timestamp) -> Self {
        if t.is_never() {
            Self::Never
        } else {
            Self::Hard(t)
        }
    }

    /// A soft event at `t`, collapsing `NEVER` to [`NextEvent::Never`].
    pub fn soft(t: Timestamp) -> Self {
        if t.is_never() {
            Self::Never
        } else {
            Self::Soft(t)
        }
    }

    /// Decode the signed integer form.
    ///
    /// Values below `-1` are soft events at their magnitude; `-1` is
    /// [`Timestamp::INVALID`] and decodes as a hard event at that time.
    pub fn from_raw(raw: i64) -> Self {
        if raw == i64::MAX {
            Self::Never
        } else if raw < -1 {
            match raw.checked_neg() {
                Some(t) => Self::Soft(Timestamp(t)),
                None => Self::Never,
            }
        } else {
            Self::Hard(Timestamp(raw))
        }
    }

    /// Encode to the signed integer form.
    ///
    /// Soft events at times 0 and 1 have no distinct encoding and come
    /// back from [`NextEvent::from_raw`] as hard events.
    pub fn to_raw(self) -> i64 {
        match self {
            Self::Hard(t) => t.0,
            Self::Soft(t) => -t.0,
            Self::Never => i64::MAX,
        }
    }

    /// The absolute time of the event; `NEVER` for [`NextEvent::Never`].
    pub fn magnitude(self) -> Timestamp {
        match self {
            Self::Hard(t) | Self::Soft(t) => t,
            Self::Never => Timestamp::NEVER,
        }
    }

    /// Whether this is a soft request.
    pub fn is_soft(self) -> bool {
        matches!(self, Self::Soft(_))
    }

    /// Whether this is a definite event.
    pub fn is_hard(self) -> bool {
        matches!(self, Self::Hard(_))
    }

    /// Whether no further event is requested.
    pub fn is_never(self) -> bool {
        matches!(self, Self::Never)
    }

    /// The event with the smaller magnitude. Ties keep `self`.
    pub fn earliest(self, other: Self) -> Self {
        if other.magnitude() < self.magnitude() {
            other
        } else {
            self
        }
    }

    /// Collapse events past [`Timestamp::MAX`] to [`NextEvent::Never`].
    pub fn clamp_to_max(self) -> Self {
        if self.magnitude() > Timestamp::MAX {
            Self::Never
        } else {
            self
        }
    }
}

impl fmt::Display for NextEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hard(t) => write!(f, "{t}"),
            Self::Soft(t) => write!(f, "~{t}"),
            Self::Never => write!(f, "NEVER"),
        }
    }
}

// ── SyncAggregate ──────────────────────────────────────────────

/// Reduction of the next-event results of every object in a pass.
///
/// Merging is commutative: on equal magnitudes a hard event wins over
/// a soft one, so the result does not depend on the order in which
/// worker partitions report.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SyncAggregate {
    /// Nearest next event across all recorded results.
    pub next: NextEvent,
    /// Number of results that were hard events.
    pub hard_events: u64,
    /// Number of results recorded.
    pub objects: u64,
}

impl Default for SyncAggregate {
    fn default() -> Self {
        Self {
            next: NextEvent::Never,
            hard_events: 0,
            objects: 0,
        }
    }
}

impl SyncAggregate {
    /// Fold in one object's result.
    pub fn record(&mut self, event: NextEvent) {
        self.objects += 1;
        if event.is_hard() {
            self.hard_events += 1;
        }
        self.next = Self::nearest(self.next, event);
    }

    /// Fold in another aggregate.
    pub fn merge(&mut self, other: &SyncAggregate) {
        self.objects += other.objects;
        self.hard_events += other.hard_events;
        self.next = Self::nearest(self.next, other.next);
    }

    /// The time the clock would step to.
    pub fn step_to(&self) -> Timestamp {
        self.next.magnitude()
    }

    fn nearest(a: NextEvent, b: NextEvent) -> NextEvent {
        match a.magnitude().cmp(&b.magnitude()) {
            std::cmp::Ordering::Less => a,
            std::cmp::Ordering::Greater => b,
            std::cmp::Ordering::Equal if b.is_hard() => b,
            std::cmp::Ordering::Equal => a,
        }
    }
}

impl FromIterator<NextEvent> for SyncAggregate {
    fn from_iter<I: IntoIterator<Item = NextEvent>>(iter: I) -> Self {
        let mut agg = Self::default();
        for event in iter {
            agg.record(event);
        }
        agg
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn raw_encoding_of_sentinels() {
        assert_eq!(NextEvent::from_raw(i64::MAX), NextEvent::Never);
        assert_eq!(NextEvent::from_raw(-50), NextEvent::Soft(Timestamp(50)));
        assert_eq!(NextEvent::from_raw(-1), NextEvent::Hard(Timestamp::INVALID));
        assert_eq!(NextEvent::from_raw(i64::MIN), NextEvent::Never);
        assert_eq!(NextEvent::Never.to_raw(), i64::MAX);
        assert_eq!(NextEvent::Soft(Timestamp(7)).to_raw(), -7);
    }

    #[test]
    fn soft_wins_over_later_hard() {
        let plc = NextEvent::Soft(Timestamp(30));
        let sync = NextEvent::Hard(Timestamp(40));
        assert_eq!(sync.earliest(plc), plc);
    }

    #[test]
    fn earliest_tie_keeps_receiver() {
        let sync = NextEvent::Hard(Timestamp(30));
        let plc = NextEvent::Soft(Timestamp(30));
        assert_eq!(sync.earliest(plc), sync);
    }

    #[test]
    fn clamp_past_max_is_never() {
        let far = NextEvent::Hard(Timestamp(Timestamp::MAX.0 + 1));
        assert_eq!(far.clamp_to_max(), NextEvent::Never);
        let near = NextEvent::Soft(Timestamp(10));
        assert_eq!(near.clamp_to_max(), near);
    }

    #[test]
    fn aggregate_of_never_hard_and_soft() {
        let agg: SyncAggregate = [
            NextEvent::Never,
            NextEvent::Hard(Timestamp(100)),
            NextEvent::from_raw(-50),
        ]
        .into_iter()
        .collect();
        assert_eq!(agg.next, NextEvent::Soft(Timestamp(50)));
        assert_eq!(agg.step_to(), Timestamp(50));
        assert_eq!(agg.hard_events, 1);
        assert_eq!(agg.objects, 3);
    }

    #[test]
    fn aggregate_merge_matches_flat_record() {
        let mut left: SyncAggregate = [NextEvent::Never].into_iter().collect();
        let mid: SyncAggregate = [NextEvent::Hard(Timestamp(100))].into_iter().collect();
        let right: SyncAggregate = [NextEvent::Soft(Timestamp(50))].into_iter().collect();
        left.merge(&mid);
        left.merge(&right);
        assert_eq!(left.next, NextEvent::Soft(Timestamp(50)));
        assert_eq!(left.hard_events, 1);
        assert_eq!(left.objects, 3);
    }

    #[test]
    fn round_up_to_step() {
        assert_eq!(Timestamp(21).round_up_to(10), Timestamp(30));
        assert_eq!(Timestamp(30).round_up_to(10), Timestamp(30));
        assert_eq!(Timestamp(21).round_up_to(1), Timestamp(21));
        assert_eq!(Timestamp::NEVER.round_up_to(10), Timestamp::NEVER);
    }

    #[test]
    fn timestamp_display() {
        assert_eq!(Timestamp::NEVER.to_string(), "NEVER");
        assert_eq!(Timestamp(12).to_string(), "12");
        assert_eq!(NextEvent::Soft(Timestamp(5)).to_string(), "~5");
    }

    fn any_event() -> impl Strategy<Value = NextEvent> {
        prop_oneof![
            (0i64..1_000_000).prop_map(|t| NextEvent::Hard(Timestamp(t))),
            (2i64..1_000_000).prop_map(|t| NextEvent::Soft(Timestamp(t))),
            Just(NextEvent::Never),
        ]
    }

    proptest! {
        #[test]
        fn raw_round_trip_outside_ambiguous_range(ev in any_event()) {
            prop_assert_eq!(NextEvent::from_raw(ev.to_raw()), ev);
        }

        #[test]
        fn aggregate_is_order_independent(mut events in prop::collection::vec(any_event(), 0..32)) {
            let forward: SyncAggregate = events.iter().copied().collect();
            events.reverse();
            let backward: SyncAggregate = events.iter().copied().collect();
            prop_assert_eq!(forward, backward);
        }

        #[test]
        fn aggregate_step_to_is_min_magnitude(events in prop::collection::vec(any_event(), 1..32)) {
            let agg: SyncAggregate = events.iter().copied().collect();
            let min = events.iter().map(|e| e.magnitude()).min().unwrap();
            prop_assert_eq!(agg.step_to(), min);
        }
    }
}
