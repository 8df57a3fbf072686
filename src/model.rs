use jiff::civil::Date;
use jiff::{Timestamp, Zoned};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Authenticated user id. Guests and owners share one id space.
pub type ActorId = Ulid;

/// A stay from check-in `start` to check-out `end`, calendar dates only.
///
/// `start < end` is required of any committed stay; proposals are checked by
/// the booking policy before they reach the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Stay {
    pub start: Date,
    pub end: Date,
}

impl Stay {
    pub fn new(start: Date, end: Date) -> Self {
        Self { start, end }
    }

    pub fn is_valid(&self) -> bool {
        self.start < self.end
    }

    pub fn nights(&self) -> i32 {
        (self.end - self.start).get_days()
    }

    /// Two stays collide when they overlap or when one checks out on the
    /// day the other checks in. Same-day turnover is not allowed.
    pub fn collides_with(&self, other: &Stay) -> bool {
        (self.start < other.end && self.end > other.start)
            || self.start == other.end
            || self.end == other.start
    }
}

impl std::fmt::Display for Stay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// The instant a decision is taken, plus the calendar date it falls on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Moment {
    pub at: Timestamp,
    pub today: Date,
}

impl Moment {
    /// Current instant in the system time zone.
    pub fn now() -> Self {
        let now = Zoned::now();
        Self {
            at: now.timestamp(),
            today: now.date(),
        }
    }

    /// Current instant, with "today" pinned to `today`.
    pub fn on(today: Date) -> Self {
        Self {
            at: Timestamp::now(),
            today,
        }
    }
}

/// One committed booking of a spot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub spot_id: Ulid,
    pub guest_id: ActorId,
    pub stay: Stay,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// A booking request that has not been committed yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewBooking {
    pub id: Ulid,
    pub spot_id: Ulid,
    pub guest_id: ActorId,
    pub stay: Stay,
}

#[derive(Debug, Clone)]
pub struct SpotState {
    pub id: Ulid,
    pub owner_id: ActorId,
    pub name: Option<String>,
    /// Set once the spot is deleted; writers that were queued on the lock
    /// must treat the spot as gone.
    pub deleted: bool,
    /// Committed bookings, sorted by `stay.start`.
    pub reservations: Vec<Reservation>,
}

impl SpotState {
    pub fn new(id: Ulid, owner_id: ActorId, name: Option<String>) -> Self {
        Self {
            id,
            owner_id,
            name,
            deleted: false,
            reservations: Vec::new(),
        }
    }

    /// Insert keeping the sort order by check-in date.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .partition_point(|r| r.stay.start <= reservation.stay.start);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove_reservation(&mut self, id: Ulid) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    pub fn reservation(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    /// Reservations that might collide with `stay`.
    /// Everything checking in after `stay.end` is skipped by binary search.
    pub fn candidates(&self, stay: &Stay) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.stay.start <= stay.end);
        let start = stay.start;
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.stay.end >= start)
    }
}

/// WAL record format. Flat, one variant per mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    SpotCreated {
        id: Ulid,
        owner_id: ActorId,
        name: Option<String>,
    },
    SpotDeleted {
        id: Ulid,
    },
    BookingCreated {
        id: Ulid,
        spot_id: Ulid,
        guest_id: ActorId,
        stay: Stay,
        created_at: Timestamp,
        updated_at: Timestamp,
    },
    BookingRescheduled {
        id: Ulid,
        spot_id: Ulid,
        stay: Stay,
        at: Timestamp,
    },
    BookingCancelled {
        id: Ulid,
        spot_id: Ulid,
    },
}

impl Event {
    pub fn booking_created(r: &Reservation) -> Self {
        Event::BookingCreated {
            id: r.id,
            spot_id: r.spot_id,
            guest_id: r.guest_id,
            stay: r.stay,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpotInfo {
    pub id: Ulid,
    pub owner_id: ActorId,
    pub name: Option<String>,
}

/// A booking as seen from a spot's booking list. Owners see everything,
/// everyone else only learns which dates are taken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpotBookingView {
    Full(Reservation),
    Dates { spot_id: Ulid, stay: Stay },
}

/// A guest's own booking with the spot it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestBooking {
    pub reservation: Reservation,
    pub spot_name: Option<String>,
}
