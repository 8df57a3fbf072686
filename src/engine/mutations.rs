use std::sync::Arc;

use jiff::Timestamp;
use jiff::civil::Date;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::booking::{self, BookingError};
use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

pub(super) fn validate_stay_limits(stay: &Stay) -> Result<(), EngineError> {
    if stay.start < MIN_VALID_DATE || stay.end > MAX_VALID_DATE {
        return Err(EngineError::LimitExceeded("date out of range"));
    }
    if stay.nights() > MAX_STAY_NIGHTS {
        return Err(EngineError::LimitExceeded("stay too long"));
    }
    Ok(())
}

/// Exclusion constraint: no committed stay on a spot may collide with another.
pub(super) fn enforce_exclusion(
    spot: &SpotState,
    id: Ulid,
    stay: &Stay,
) -> Result<(), BookingError> {
    let others = spot.candidates(stay).filter(|r| r.id != id);
    match booking::find_conflict(stay, others) {
        Some(r) => Err(BookingError::Conflict(r.id)),
        None => Ok(()),
    }
}

impl Engine {
    /// Register a spot owned by `owner_id`.
    pub async fn create_spot(
        &self,
        id: Ulid,
        owner_id: ActorId,
        name: Option<String>,
    ) -> Result<(), EngineError> {
        if self.state.len() >= MAX_SPOTS {
            return Err(EngineError::LimitExceeded("too many spots"));
        }
        if name.as_ref().is_some_and(|n| n.len() > MAX_NAME_LEN) {
            return Err(EngineError::LimitExceeded("spot name too long"));
        }

        let _gate = self.wal_gate.read().await;
        // Claim the id before the WAL write so concurrent creates can't both win.
        let spot = Arc::new(RwLock::new(SpotState::new(id, owner_id, name.clone())));
        let mut guard = spot.clone().write_owned().await;
        match self.state.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(_) => return Err(EngineError::AlreadyExists(id)),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(spot);
            }
        }

        let event = Event::SpotCreated { id, owner_id, name };
        if let Err(e) = self.wal.append(event).await {
            guard.deleted = true;
            self.state.remove(&id);
            return Err(e.into());
        }
        tracing::debug!(%id, %owner_id, "spot created");
        Ok(())
    }

    /// Remove a spot and every booking on it. Owner only.
    pub async fn delete_spot(&self, id: Ulid, actor: ActorId) -> Result<(), EngineError> {
        let _gate = self.wal_gate.read().await;
        let mut guard = self.spot_write(id).await?;
        if guard.owner_id != actor {
            return Err(EngineError::forbidden("only the owner can delete a spot"));
        }

        let event = Event::SpotDeleted { id };
        self.persist_and_apply(&mut guard, event).await?;
        self.state.remove(&id);
        tracing::debug!(%id, "spot deleted");
        Ok(())
    }

    /// Book `request.stay` on a spot for `request.guest_id`.
    pub async fn create_booking(&self, request: NewBooking) -> Result<Reservation, EngineError> {
        let _gate = self.wal_gate.read().await;
        let mut guard = self.spot_write(request.spot_id).await?;

        let reservation = booking::propose_create(
            &request,
            guard.candidates(&request.stay),
            Some(guard.owner_id),
            Timestamp::now(),
        )?;
        validate_stay_limits(&reservation.stay)?;
        self.insert_locked(&mut guard, reservation).await
    }

    /// Move a booking to new dates. Only its guest may, and not once the stay
    /// has ended.
    pub async fn reschedule_booking(
        &self,
        id: Ulid,
        actor: ActorId,
        stay: Stay,
        today: Date,
    ) -> Result<Reservation, EngineError> {
        let _gate = self.wal_gate.read().await;
        let mut guard = self.booking_write(id).await?;

        let current = guard.reservation(id).cloned();
        let updated = booking::propose_update(
            id,
            actor,
            stay,
            guard.candidates(&stay),
            current.as_ref(),
            Moment::on(today),
        )?;
        validate_stay_limits(&updated.stay)?;
        self.reschedule_locked(&mut guard, id, updated.stay, updated.updated_at)
            .await
    }

    /// Cancel a booking before check-in day. The guest or the spot owner may.
    /// Returns the spot the booking was on.
    pub async fn cancel_booking(
        &self,
        id: Ulid,
        actor: ActorId,
        today: Date,
    ) -> Result<Ulid, EngineError> {
        let _gate = self.wal_gate.read().await;
        let mut guard = self.booking_write(id).await?;

        booking::propose_delete(
            id,
            actor,
            guard.reservation(id),
            Some(guard.owner_id),
            today,
        )?;
        let spot_id = guard.id;
        self.persist_and_apply(&mut guard, Event::BookingCancelled { id, spot_id })
            .await?;
        Ok(spot_id)
    }

    /// Commit a reservation on a locked spot, subject to the exclusion constraint.
    pub(super) async fn insert_locked(
        &self,
        spot: &mut SpotState,
        reservation: Reservation,
    ) -> Result<Reservation, EngineError> {
        let id = reservation.id;
        // The index is global, so the spot lock alone can't keep an id unique.
        match self.booking_to_spot.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(EngineError::AlreadyExists(id));
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(spot.id);
            }
        }

        if let Err(e) = self.commit_claimed(spot, &reservation).await {
            self.booking_to_spot.remove(&id);
            return Err(e);
        }
        metrics::counter!(crate::observability::BOOKINGS_COMMITTED_TOTAL, "op" => "create")
            .increment(1);
        Ok(reservation)
    }

    async fn commit_claimed(
        &self,
        spot: &mut SpotState,
        reservation: &Reservation,
    ) -> Result<(), EngineError> {
        if spot.reservations.len() >= MAX_BOOKINGS_PER_SPOT {
            return Err(EngineError::LimitExceeded("too many bookings on spot"));
        }
        enforce_exclusion(spot, reservation.id, &reservation.stay)?;
        self.persist_and_apply(spot, Event::booking_created(reservation))
            .await
    }

    /// Replace a booking's dates on a locked spot, subject to the exclusion constraint.
    pub(super) async fn reschedule_locked(
        &self,
        spot: &mut SpotState,
        id: Ulid,
        stay: Stay,
        at: Timestamp,
    ) -> Result<Reservation, EngineError> {
        if spot.reservation(id).is_none() {
            return Err(EngineError::not_found(id));
        }
        if !stay.is_valid() {
            return Err(BookingError::InvalidArgument {
                field: "endDate",
                message: booking::END_NOT_AFTER_START,
            }
            .into());
        }
        enforce_exclusion(spot, id, &stay)?;

        let spot_id = spot.id;
        self.persist_and_apply(spot, Event::BookingRescheduled { id, spot_id, stay, at })
            .await?;
        metrics::counter!(crate::observability::BOOKINGS_COMMITTED_TOTAL, "op" => "update")
            .increment(1);
        spot.reservation(id)
            .cloned()
            .ok_or(EngineError::not_found(id))
    }

    /// Rewrite the WAL with only the events needed to rebuild current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.wal_gate.write().await;

        let spots: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut events = Vec::new();
        for spot in spots {
            let guard = spot.read().await;
            if guard.deleted {
                continue;
            }
            events.push(Event::SpotCreated {
                id: guard.id,
                owner_id: guard.owner_id,
                name: guard.name.clone(),
            });
            events.extend(guard.reservations.iter().map(Event::booking_created));
        }

        let count = events.len();
        self.wal.compact(events).await?;
        tracing::info!(events = count, "WAL compacted");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> Result<u64, EngineError> {
        Ok(self.wal.appends_since_compact().await?)
    }
}
