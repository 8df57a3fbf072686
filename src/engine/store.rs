use async_trait::async_trait;
use jiff::Timestamp;
use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

/// Persistence operations the booking policy relies on.
///
/// Each call is atomic on its own. Writes enforce the exclusion constraint, so
/// a caller that checks with [`find_reservations_by_resource`] and then
/// inserts still gets a `Conflict` if another writer got there first.
///
/// [`find_reservations_by_resource`]: ReservationStore::find_reservations_by_resource
#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// All reservations on a spot, optionally leaving one out.
    async fn find_reservations_by_resource(
        &self,
        spot_id: Ulid,
        exclude: Option<Ulid>,
    ) -> Result<Vec<Reservation>, EngineError>;

    async fn find_reservation_by_id(&self, id: Ulid) -> Result<Option<Reservation>, EngineError>;

    /// Owner of a spot; `None` if there is no such spot.
    async fn find_resource_owner(&self, spot_id: Ulid) -> Result<Option<ActorId>, EngineError>;

    async fn insert_reservation(&self, reservation: Reservation)
    -> Result<Reservation, EngineError>;

    async fn update_reservation_dates(
        &self,
        id: Ulid,
        stay: Stay,
    ) -> Result<Reservation, EngineError>;

    async fn delete_reservation(&self, id: Ulid) -> Result<(), EngineError>;
}

#[async_trait]
impl ReservationStore for Engine {
    async fn find_reservations_by_resource(
        &self,
        spot_id: Ulid,
        exclude: Option<Ulid>,
    ) -> Result<Vec<Reservation>, EngineError> {
        let Some(spot) = self.get_spot(&spot_id) else {
            return Ok(Vec::new());
        };
        let guard = spot.read().await;
        Ok(guard
            .reservations
            .iter()
            .filter(|r| Some(r.id) != exclude)
            .cloned()
            .collect())
    }

    async fn find_reservation_by_id(&self, id: Ulid) -> Result<Option<Reservation>, EngineError> {
        Ok(self.get_booking(id).await)
    }

    async fn find_resource_owner(&self, spot_id: Ulid) -> Result<Option<ActorId>, EngineError> {
        let Some(spot) = self.get_spot(&spot_id) else {
            return Ok(None);
        };
        let guard = spot.read().await;
        Ok((!guard.deleted).then_some(guard.owner_id))
    }

    async fn insert_reservation(
        &self,
        reservation: Reservation,
    ) -> Result<Reservation, EngineError> {
        if !reservation.stay.is_valid() {
            return Err(crate::booking::BookingError::InvalidArgument {
                field: "endDate",
                message: crate::booking::END_NOT_AFTER_START,
            }
            .into());
        }
        let _gate = self.wal_gate.read().await;
        let mut guard = self.spot_write(reservation.spot_id).await?;
        self.insert_locked(&mut guard, reservation).await
    }

    async fn update_reservation_dates(
        &self,
        id: Ulid,
        stay: Stay,
    ) -> Result<Reservation, EngineError> {
        let _gate = self.wal_gate.read().await;
        let mut guard = self.booking_write(id).await?;
        self.reschedule_locked(&mut guard, id, stay, Timestamp::now())
            .await
    }

    async fn delete_reservation(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.wal_gate.read().await;
        let mut guard = self.booking_write(id).await?;
        if guard.reservation(id).is_none() {
            return Err(EngineError::not_found(id));
        }
        let spot_id = guard.id;
        self.persist_and_apply(&mut guard, Event::BookingCancelled { id, spot_id })
            .await
    }
}
