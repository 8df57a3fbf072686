//! Booking policy for a single spot.
//!
//! Every function here is pure: it takes a proposal and a snapshot of the
//! spot's other reservations and returns a decision. Persistence and
//! serialization of concurrent writers belong to the store.

use jiff::Timestamp;
use jiff::civil::Date;
use thiserror::Error;
use ulid::Ulid;

use crate::model::*;

pub const OWN_SPOT: &str = "cannot book your own spot";
pub const NOT_BOOKING_GUEST: &str = "not authorized to edit this booking";
pub const PAST_BOOKING: &str = "past bookings can't be modified";
pub const NOT_GUEST_OR_OWNER: &str = "not authorized to delete this booking";
pub const STARTED_BOOKING: &str = "bookings that have started can't be deleted";
pub const END_NOT_AFTER_START: &str = "endDate cannot be on or before startDate";

/// Why a booking operation was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BookingError {
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("forbidden: {0}")]
    Forbidden(&'static str),
    #[error("invalid {field}: {message}")]
    InvalidArgument {
        field: &'static str,
        message: &'static str,
    },
    #[error("spot is already booked for the specified dates (conflicts with booking {0})")]
    Conflict(Ulid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    NotFound,
    Forbidden,
    InvalidArgument,
    Conflict,
}

impl RejectionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RejectionKind::NotFound => "not_found",
            RejectionKind::Forbidden => "forbidden",
            RejectionKind::InvalidArgument => "invalid_argument",
            RejectionKind::Conflict => "conflict",
        }
    }
}

impl BookingError {
    pub fn kind(&self) -> RejectionKind {
        match self {
            BookingError::NotFound(_) => RejectionKind::NotFound,
            BookingError::Forbidden(_) => RejectionKind::Forbidden,
            BookingError::InvalidArgument { .. } => RejectionKind::InvalidArgument,
            BookingError::Conflict(_) => RejectionKind::Conflict,
        }
    }

    /// Status code an HTTP boundary reports for this rejection.
    /// Conflicts are 403, matching the marketplace API clients already expect.
    pub fn http_status(&self) -> u16 {
        match self.kind() {
            RejectionKind::NotFound => 404,
            RejectionKind::Forbidden | RejectionKind::Conflict => 403,
            RejectionKind::InvalidArgument => 400,
        }
    }
}

/// First reservation in `existing` that collides with `stay`, if any.
pub fn find_conflict<'a>(
    stay: &Stay,
    existing: impl IntoIterator<Item = &'a Reservation>,
) -> Option<&'a Reservation> {
    existing.into_iter().find(|r| stay.collides_with(&r.stay))
}

fn check_stay(stay: &Stay) -> Result<(), BookingError> {
    if !stay.is_valid() {
        return Err(BookingError::InvalidArgument {
            field: "endDate",
            message: END_NOT_AFTER_START,
        });
    }
    Ok(())
}

fn check_no_conflict<'a>(
    stay: &Stay,
    existing: impl IntoIterator<Item = &'a Reservation>,
) -> Result<(), BookingError> {
    match find_conflict(stay, existing) {
        Some(r) => Err(BookingError::Conflict(r.id)),
        None => Ok(()),
    }
}

/// Decide whether a guest may book a spot.
///
/// `owner` is the spot's owner, `None` when the spot does not exist.
/// `existing` must hold every reservation of the spot.
pub fn propose_create<'a>(
    request: &NewBooking,
    existing: impl IntoIterator<Item = &'a Reservation>,
    owner: Option<ActorId>,
    at: Timestamp,
) -> Result<Reservation, BookingError> {
    let owner = owner.ok_or(BookingError::NotFound(request.spot_id))?;
    if owner == request.guest_id {
        return Err(BookingError::Forbidden(OWN_SPOT));
    }
    check_stay(&request.stay)?;
    check_no_conflict(&request.stay, existing)?;

    Ok(Reservation {
        id: request.id,
        spot_id: request.spot_id,
        guest_id: request.guest_id,
        stay: request.stay,
        created_at: at,
        updated_at: at,
    })
}

/// Decide whether `actor` may move booking `booking_id` to `stay`.
///
/// The booking itself is ignored if it shows up in `existing`.
pub fn propose_update<'a>(
    booking_id: Ulid,
    actor: ActorId,
    stay: Stay,
    existing: impl IntoIterator<Item = &'a Reservation>,
    current: Option<&Reservation>,
    moment: Moment,
) -> Result<Reservation, BookingError> {
    let current = current.ok_or(BookingError::NotFound(booking_id))?;
    if current.guest_id != actor {
        return Err(BookingError::Forbidden(NOT_BOOKING_GUEST));
    }
    if current.stay.end <= moment.today {
        return Err(BookingError::Forbidden(PAST_BOOKING));
    }
    check_stay(&stay)?;
    check_no_conflict(
        &stay,
        existing.into_iter().filter(|r| r.id != current.id),
    )?;

    Ok(Reservation {
        stay,
        updated_at: moment.at,
        ..current.clone()
    })
}

/// Decide whether `actor` may cancel a booking. The guest who made it and
/// the spot's owner may, and only before check-in day.
pub fn propose_delete(
    booking_id: Ulid,
    actor: ActorId,
    current: Option<&Reservation>,
    owner: Option<ActorId>,
    today: Date,
) -> Result<(), BookingError> {
    let current = current.ok_or(BookingError::NotFound(booking_id))?;
    if current.guest_id != actor && owner != Some(actor) {
        return Err(BookingError::Forbidden(NOT_GUEST_OR_OWNER));
    }
    if current.stay.start <= today {
        return Err(BookingError::Forbidden(STARTED_BOOKING));
    }
    Ok(())
}
