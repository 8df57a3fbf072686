use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    pub async fn list_spots(&self) -> Vec<SpotInfo> {
        let spots: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(spots.len());
        for spot in spots {
            let guard = spot.read().await;
            if guard.deleted {
                continue;
            }
            out.push(SpotInfo {
                id: guard.id,
                owner_id: guard.owner_id,
                name: guard.name.clone(),
            });
        }
        out.sort_by_key(|s| s.id);
        out
    }

    pub async fn get_booking(&self, id: Ulid) -> Option<Reservation> {
        let spot = self.get_spot(&self.spot_for_booking(&id)?)?;
        let guard = spot.read().await;
        guard.reservation(id).cloned()
    }

    /// A spot's bookings as `viewer` may see them, in check-in order.
    pub async fn spot_bookings(
        &self,
        spot_id: Ulid,
        viewer: ActorId,
    ) -> Result<Vec<SpotBookingView>, EngineError> {
        let spot = self
            .get_spot(&spot_id)
            .ok_or(EngineError::not_found(spot_id))?;
        let guard = spot.read().await;
        if guard.deleted {
            return Err(EngineError::not_found(spot_id));
        }

        let is_owner = guard.owner_id == viewer;
        Ok(guard
            .reservations
            .iter()
            .map(|r| {
                if is_owner {
                    SpotBookingView::Full(r.clone())
                } else {
                    SpotBookingView::Dates {
                        spot_id,
                        stay: r.stay,
                    }
                }
            })
            .collect())
    }

    /// Every booking made by `guest_id`, ordered by check-in.
    pub async fn guest_bookings(&self, guest_id: ActorId) -> Vec<GuestBooking> {
        let spots: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::new();
        for spot in spots {
            let guard = spot.read().await;
            out.extend(
                guard
                    .reservations
                    .iter()
                    .filter(|r| r.guest_id == guest_id)
                    .map(|r| GuestBooking {
                        reservation: r.clone(),
                        spot_name: guard.name.clone(),
                    }),
            );
        }
        out.sort_by_key(|b| (b.reservation.stay.start, b.reservation.id));
        out
    }
}
