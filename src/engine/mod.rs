mod error;
mod mutations;
mod queries;
mod store;
#[cfg(test)]
mod tests;

pub use error::EngineError;
pub use store::ReservationStore;

use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::wal::{Wal, WalHandle};

pub type SharedSpotState = Arc<RwLock<SpotState>>;

/// In-memory booking store backed by the write-ahead log.
///
/// Each spot sits behind its own lock. Every booking mutation holds the spot's
/// write lock from the conflict check through the WAL append, so two
/// overlapping requests for one spot can never both commit.
pub struct Engine {
    pub(super) state: DashMap<Ulid, SharedSpotState>,
    pub(super) wal: WalHandle,
    /// Booking id → spot id.
    pub(super) booking_to_spot: DashMap<Ulid, Ulid>,
    /// Mutations hold this shared; compaction holds it exclusively so no
    /// append lands between its snapshot and the file swap.
    pub(super) wal_gate: RwLock<()>,
}

/// Apply a booking event to a spot (caller holds the lock).
fn apply_to_spot(spot: &mut SpotState, event: &Event, index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::BookingCreated {
            id,
            spot_id,
            guest_id,
            stay,
            created_at,
            updated_at,
        } => {
            spot.insert_reservation(Reservation {
                id: *id,
                spot_id: *spot_id,
                guest_id: *guest_id,
                stay: *stay,
                created_at: *created_at,
                updated_at: *updated_at,
            });
            index.insert(*id, *spot_id);
        }
        Event::BookingRescheduled { id, stay, at, .. } => {
            if let Some(mut r) = spot.remove_reservation(*id) {
                r.stay = *stay;
                r.updated_at = *at;
                spot.insert_reservation(r);
            }
        }
        Event::BookingCancelled { id, .. } => {
            spot.remove_reservation(*id);
            index.remove(id);
        }
        Event::SpotDeleted { .. } => {
            for r in spot.reservations.drain(..) {
                index.remove(&r.id);
            }
            spot.deleted = true;
        }
        // Creation happens at the map level.
        Event::SpotCreated { .. } => {}
    }
}

/// Spot an event belongs to.
fn event_spot_id(event: &Event) -> Ulid {
    match event {
        Event::SpotCreated { id, .. } | Event::SpotDeleted { id } => *id,
        Event::BookingCreated { spot_id, .. }
        | Event::BookingRescheduled { spot_id, .. }
        | Event::BookingCancelled { spot_id, .. } => *spot_id,
    }
}

impl Engine {
    /// Rebuild state from the log at `wal_path` and start the WAL writer.
    /// Must be called inside a tokio runtime.
    pub fn new(wal_path: PathBuf) -> std::io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = WalHandle::spawn(Wal::open(&wal_path)?);

        let state: DashMap<Ulid, SpotState> = DashMap::new();
        let booking_to_spot = DashMap::new();
        for event in &events {
            match event {
                Event::SpotCreated { id, owner_id, name } => {
                    state.insert(*id, SpotState::new(*id, *owner_id, name.clone()));
                }
                Event::SpotDeleted { id } => {
                    if let Some((_, mut spot)) = state.remove(id) {
                        apply_to_spot(&mut spot, event, &booking_to_spot);
                    }
                }
                other => {
                    if let Some(mut spot) = state.get_mut(&event_spot_id(other)) {
                        apply_to_spot(&mut spot, other, &booking_to_spot);
                    }
                }
            }
        }
        tracing::debug!(
            events = events.len(),
            spots = state.len(),
            bookings = booking_to_spot.len(),
            "replayed WAL"
        );

        Ok(Self {
            state: state
                .into_iter()
                .map(|(id, spot)| (id, Arc::new(RwLock::new(spot))))
                .collect(),
            wal,
            booking_to_spot,
            wal_gate: RwLock::new(()),
        })
    }

    pub fn get_spot(&self, id: &Ulid) -> Option<SharedSpotState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn spot_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_to_spot.get(booking_id).map(|e| *e.value())
    }

    /// Write-lock a live spot.
    pub(super) async fn spot_write(
        &self,
        spot_id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<SpotState>, EngineError> {
        let rs = self
            .get_spot(&spot_id)
            .ok_or(EngineError::not_found(spot_id))?;
        let guard = rs.write_owned().await;
        if guard.deleted {
            return Err(EngineError::not_found(spot_id));
        }
        Ok(guard)
    }

    /// Booking id → spot, then write-lock the spot.
    ///
    /// The booking may be gone by the time the lock is held; callers look it
    /// up again under the lock.
    pub(super) async fn booking_write(
        &self,
        booking_id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<SpotState>, EngineError> {
        let spot_id = self
            .spot_for_booking(&booking_id)
            .ok_or(EngineError::not_found(booking_id))?;
        self.spot_write(spot_id)
            .await
            .map_err(|_| EngineError::not_found(booking_id))
    }

    /// WAL append then apply, under the spot lock the caller holds.
    pub(super) async fn persist_and_apply(
        &self,
        spot: &mut SpotState,
        event: Event,
    ) -> Result<(), EngineError> {
        self.wal.append(event.clone()).await?;
        apply_to_spot(spot, &event, &self.booking_to_spot);
        Ok(())
    }
}
