use super::*;
use crate::booking::{BookingError, NOT_GUEST_OR_OWNER, OWN_SPOT, PAST_BOOKING, STARTED_BOOKING};
use crate::limits::*;
use jiff::civil::{Date, date};

const TODAY: Date = date(2025, 1, 1);

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("spotbook_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn stay(start: Date, end: Date) -> Stay {
    Stay::new(start, end)
}

fn request(spot_id: Ulid, guest_id: Ulid, start: Date, end: Date) -> NewBooking {
    NewBooking {
        id: Ulid::new(),
        spot_id,
        guest_id,
        stay: stay(start, end),
    }
}

/// Engine with one spot; returns (engine, spot, owner).
async fn engine_with_spot(name: &str) -> (Engine, Ulid, Ulid) {
    let engine = Engine::new(test_wal_path(name)).unwrap();
    let spot = Ulid::new();
    let owner = Ulid::new();
    engine
        .create_spot(spot, owner, Some("Beach house".into()))
        .await
        .unwrap();
    (engine, spot, owner)
}

fn rejected(result: Result<impl std::fmt::Debug, EngineError>) -> BookingError {
    match result {
        Err(EngineError::Rejected(e)) => e,
        other => panic!("expected booking rejection, got {other:?}"),
    }
}

// ── Spots ────────────────────────────────────────────────

#[tokio::test]
async fn create_and_list_spots() {
    let (engine, spot, owner) = engine_with_spot("create_spot.wal").await;
    let spots = engine.list_spots().await;
    assert_eq!(
        spots,
        vec![SpotInfo {
            id: spot,
            owner_id: owner,
            name: Some("Beach house".into()),
        }]
    );
}

#[tokio::test]
async fn duplicate_spot_rejected() {
    let (engine, spot, owner) = engine_with_spot("dup_spot.wal").await;
    let result = engine.create_spot(spot, owner, None).await;
    assert!(matches!(result, Err(EngineError::AlreadyExists(id)) if id == spot));
}

#[tokio::test]
async fn delete_spot_owner_only_and_cascades() {
    let (engine, spot, owner) = engine_with_spot("delete_spot.wal").await;
    let guest = Ulid::new();
    let made = engine
        .create_booking(request(spot, guest, date(2025, 3, 1), date(2025, 3, 5)))
        .await
        .unwrap();

    let err = rejected(engine.delete_spot(spot, guest).await);
    assert!(matches!(err, BookingError::Forbidden(_)));

    engine.delete_spot(spot, owner).await.unwrap();
    assert!(engine.list_spots().await.is_empty());
    assert!(engine.get_booking(made.id).await.is_none());
    assert!(engine.guest_bookings(guest).await.is_empty());
    assert_eq!(
        rejected(engine.spot_bookings(spot, owner).await),
        BookingError::NotFound(spot)
    );
    assert_eq!(
        rejected(engine.delete_spot(spot, owner).await),
        BookingError::NotFound(spot)
    );
}

// ── Create ───────────────────────────────────────────────

#[tokio::test]
async fn create_scenario_boundary_touch_then_gap() {
    let (engine, spot, _owner) = engine_with_spot("create_scenario.wal").await;
    let (u1, u2) = (Ulid::new(), Ulid::new());

    let res1 = engine
        .create_booking(request(spot, u1, date(2025, 3, 1), date(2025, 3, 5)))
        .await
        .unwrap();

    let err = rejected(
        engine
            .create_booking(request(spot, u2, date(2025, 3, 5), date(2025, 3, 10)))
            .await,
    );
    assert_eq!(err, BookingError::Conflict(res1.id));

    let req = request(spot, u2, date(2025, 3, 6), date(2025, 3, 10));
    let made = engine.create_booking(req).await.unwrap();
    assert_eq!(made.id, req.id);
    assert_eq!(made.guest_id, u2);
    assert_eq!(engine.get_booking(req.id).await, Some(made));
}

#[tokio::test]
async fn create_on_missing_spot_not_found() {
    let engine = Engine::new(test_wal_path("create_missing.wal")).unwrap();
    let spot = Ulid::new();
    let err = rejected(
        engine
            .create_booking(request(spot, Ulid::new(), date(2025, 3, 1), date(2025, 3, 5)))
            .await,
    );
    assert_eq!(err, BookingError::NotFound(spot));
}

#[tokio::test]
async fn owner_cannot_book_own_spot_even_when_empty() {
    let (engine, spot, owner) = engine_with_spot("own_spot.wal").await;
    let err = rejected(
        engine
            .create_booking(request(spot, owner, date(2025, 3, 1), date(2025, 3, 5)))
            .await,
    );
    assert_eq!(err, BookingError::Forbidden(OWN_SPOT));
}

#[tokio::test]
async fn create_degenerate_stay_invalid() {
    let (engine, spot, _owner) = engine_with_spot("create_degenerate.wal").await;
    let err = rejected(
        engine
            .create_booking(request(spot, Ulid::new(), date(2025, 3, 5), date(2025, 3, 5)))
            .await,
    );
    assert!(matches!(err, BookingError::InvalidArgument { field: "endDate", .. }));
}

#[tokio::test]
async fn duplicate_booking_id_rejected() {
    let (engine, spot, _owner) = engine_with_spot("dup_booking.wal").await;
    let req = request(spot, Ulid::new(), date(2025, 3, 1), date(2025, 3, 5));
    engine.create_booking(req).await.unwrap();

    let again = NewBooking {
        stay: stay(date(2025, 6, 1), date(2025, 6, 5)),
        ..req
    };
    let result = engine.create_booking(again).await;
    assert!(matches!(result, Err(EngineError::AlreadyExists(id)) if id == req.id));
}

// ── Reschedule ───────────────────────────────────────────

#[tokio::test]
async fn reschedule_moves_dates_and_keeps_identity() {
    let (engine, spot, _owner) = engine_with_spot("reschedule_ok.wal").await;
    let guest = Ulid::new();
    let made = engine
        .create_booking(request(spot, guest, date(2025, 3, 1), date(2025, 3, 5)))
        .await
        .unwrap();

    // Overlaps its own old dates, which is fine.
    let moved = engine
        .reschedule_booking(made.id, guest, stay(date(2025, 3, 3), date(2025, 3, 9)), TODAY)
        .await
        .unwrap();
    assert_eq!(moved.id, made.id);
    assert_eq!(moved.spot_id, spot);
    assert_eq!(moved.guest_id, guest);
    assert_eq!(moved.stay, stay(date(2025, 3, 3), date(2025, 3, 9)));
    assert_eq!(moved.created_at, made.created_at);
    assert!(moved.updated_at >= made.updated_at);
    assert_eq!(engine.get_booking(made.id).await, Some(moved));
}

#[tokio::test]
async fn reschedule_into_neighbour_conflicts() {
    let (engine, spot, _owner) = engine_with_spot("reschedule_conflict.wal").await;
    let (g1, g2) = (Ulid::new(), Ulid::new());
    let a = engine
        .create_booking(request(spot, g1, date(2025, 3, 1), date(2025, 3, 5)))
        .await
        .unwrap();
    let b = engine
        .create_booking(request(spot, g2, date(2025, 3, 10), date(2025, 3, 12)))
        .await
        .unwrap();

    let err = rejected(
        engine
            .reschedule_booking(a.id, g1, stay(date(2025, 3, 6), date(2025, 3, 10)), TODAY)
            .await,
    );
    assert_eq!(err, BookingError::Conflict(b.id));
    // Unchanged after the rejection.
    assert_eq!(engine.get_booking(a.id).await.unwrap().stay, a.stay);
}

#[tokio::test]
async fn reschedule_rules() {
    let (engine, spot, owner) = engine_with_spot("reschedule_rules.wal").await;
    let guest = Ulid::new();
    let made = engine
        .create_booking(request(spot, guest, date(2025, 3, 1), date(2025, 3, 5)))
        .await
        .unwrap();
    let future = stay(date(2025, 9, 1), date(2025, 9, 5));

    let missing = Ulid::new();
    assert_eq!(
        rejected(engine.reschedule_booking(missing, guest, future, TODAY).await),
        BookingError::NotFound(missing)
    );
    // Even the spot owner can't move a guest's booking.
    assert!(matches!(
        rejected(engine.reschedule_booking(made.id, owner, future, TODAY).await),
        BookingError::Forbidden(_)
    ));
    assert_eq!(
        rejected(
            engine
                .reschedule_booking(made.id, guest, future, date(2025, 3, 5))
                .await
        ),
        BookingError::Forbidden(PAST_BOOKING)
    );
    assert!(matches!(
        rejected(
            engine
                .reschedule_booking(made.id, guest, stay(date(2025, 9, 5), date(2025, 9, 1)), TODAY)
                .await
        ),
        BookingError::InvalidArgument { .. }
    ));
}

// ── Cancel ───────────────────────────────────────────────

#[tokio::test]
async fn cancel_by_guest_and_owner() {
    let (engine, spot, owner) = engine_with_spot("cancel_ok.wal").await;
    let guest = Ulid::new();
    let a = engine
        .create_booking(request(spot, guest, date(2025, 3, 1), date(2025, 3, 5)))
        .await
        .unwrap();
    let b = engine
        .create_booking(request(spot, guest, date(2025, 4, 1), date(2025, 4, 5)))
        .await
        .unwrap();

    assert_eq!(engine.cancel_booking(a.id, guest, TODAY).await.unwrap(), spot);
    assert_eq!(engine.cancel_booking(b.id, owner, TODAY).await.unwrap(), spot);
    assert!(engine.get_booking(a.id).await.is_none());
    assert!(engine.spot_bookings(spot, owner).await.unwrap().is_empty());

    assert_eq!(
        rejected(engine.cancel_booking(a.id, guest, TODAY).await),
        BookingError::NotFound(a.id)
    );
}

#[tokio::test]
async fn cancel_rules() {
    let (engine, spot, owner) = engine_with_spot("cancel_rules.wal").await;
    let guest = Ulid::new();
    let made = engine
        .create_booking(request(spot, guest, date(2025, 3, 1), date(2025, 3, 5)))
        .await
        .unwrap();

    assert_eq!(
        rejected(engine.cancel_booking(made.id, Ulid::new(), TODAY).await),
        BookingError::Forbidden(NOT_GUEST_OR_OWNER)
    );
    for actor in [guest, owner] {
        assert_eq!(
            rejected(engine.cancel_booking(made.id, actor, date(2025, 3, 1)).await),
            BookingError::Forbidden(STARTED_BOOKING)
        );
    }
    assert!(engine.get_booking(made.id).await.is_some());
}

#[tokio::test]
async fn freed_dates_can_be_rebooked() {
    let (engine, spot, _owner) = engine_with_spot("rebook.wal").await;
    let (g1, g2) = (Ulid::new(), Ulid::new());
    let made = engine
        .create_booking(request(spot, g1, date(2025, 3, 1), date(2025, 3, 5)))
        .await
        .unwrap();
    engine.cancel_booking(made.id, g1, TODAY).await.unwrap();
    engine
        .create_booking(request(spot, g2, date(2025, 3, 1), date(2025, 3, 5)))
        .await
        .unwrap();
}

// ── Views ────────────────────────────────────────────────

#[tokio::test]
async fn spot_bookings_hide_details_from_non_owners() {
    let (engine, spot, owner) = engine_with_spot("spot_views.wal").await;
    let guest = Ulid::new();
    let later = engine
        .create_booking(request(spot, guest, date(2025, 5, 1), date(2025, 5, 5)))
        .await
        .unwrap();
    let earlier = engine
        .create_booking(request(spot, guest, date(2025, 3, 1), date(2025, 3, 5)))
        .await
        .unwrap();

    let owner_view = engine.spot_bookings(spot, owner).await.unwrap();
    assert_eq!(
        owner_view,
        vec![
            SpotBookingView::Full(earlier.clone()),
            SpotBookingView::Full(later.clone()),
        ]
    );

    // The guest who made them still only gets dates from the spot listing.
    let public = engine.spot_bookings(spot, guest).await.unwrap();
    assert_eq!(
        public,
        vec![
            SpotBookingView::Dates { spot_id: spot, stay: earlier.stay },
            SpotBookingView::Dates { spot_id: spot, stay: later.stay },
        ]
    );
}

#[tokio::test]
async fn guest_bookings_span_spots() {
    let (engine, spot_a, _) = engine_with_spot("guest_bookings.wal").await;
    let spot_b = Ulid::new();
    engine
        .create_spot(spot_b, Ulid::new(), Some("Cabin".into()))
        .await
        .unwrap();
    let (guest, other) = (Ulid::new(), Ulid::new());

    engine
        .create_booking(request(spot_b, guest, date(2025, 2, 1), date(2025, 2, 3)))
        .await
        .unwrap();
    engine
        .create_booking(request(spot_a, guest, date(2025, 6, 1), date(2025, 6, 3)))
        .await
        .unwrap();
    engine
        .create_booking(request(spot_a, other, date(2025, 7, 1), date(2025, 7, 3)))
        .await
        .unwrap();

    let mine = engine.guest_bookings(guest).await;
    assert_eq!(mine.len(), 2);
    assert_eq!(mine[0].spot_name.as_deref(), Some("Cabin"));
    assert_eq!(mine[1].spot_name.as_deref(), Some("Beach house"));
    assert!(mine.iter().all(|b| b.reservation.guest_id == guest));
}

// ── Concurrency ──────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_overlapping_requests_commit_exactly_one() {
    let (engine, spot, _owner) = engine_with_spot("race_overlap.wal").await;
    let engine = Arc::new(engine);

    let mut handles = Vec::new();
    for i in 0..32i8 {
        let eng = engine.clone();
        // All share March 10th–11th.
        let start = date(2025, 3, 1 + (i % 9));
        handles.push(tokio::spawn(async move {
            eng.create_booking(request(spot, Ulid::new(), start, date(2025, 3, 11)))
                .await
        }));
    }

    let mut committed = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => committed += 1,
            Err(EngineError::Rejected(BookingError::Conflict(_))) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(committed, 1);
    assert_eq!(engine.find_reservations_by_resource(spot, None).await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_disjoint_requests_all_commit() {
    let (engine, spot, _owner) = engine_with_spot("race_disjoint.wal").await;
    let engine = Arc::new(engine);

    let mut handles = Vec::new();
    for month in 1..=12i8 {
        let eng = engine.clone();
        handles.push(tokio::spawn(async move {
            eng.create_booking(request(spot, Ulid::new(), date(2025, month, 1), date(2025, month, 10)))
                .await
        }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }
    assert_eq!(engine.spot_bookings(spot, Ulid::new()).await.unwrap().len(), 12);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn same_booking_id_on_two_spots_commits_once() {
    let (engine, spot_a, owner) = engine_with_spot("race_same_id.wal").await;
    let spot_b = Ulid::new();
    engine.create_spot(spot_b, owner, None).await.unwrap();
    let engine = Arc::new(engine);

    for _ in 0..20 {
        let id = Ulid::new();
        let on = |spot: Ulid| NewBooking {
            id,
            ..request(spot, Ulid::new(), date(2025, 3, 1), date(2025, 3, 5))
        };
        let (ea, eb) = (engine.clone(), engine.clone());
        let (a, b) = (on(spot_a), on(spot_b));
        let (ra, rb) = tokio::join!(
            tokio::spawn(async move { ea.create_booking(a).await }),
            tokio::spawn(async move { eb.create_booking(b).await })
        );
        let (ra, rb) = (ra.unwrap(), rb.unwrap());
        assert_eq!([ra.is_ok(), rb.is_ok()].iter().filter(|ok| **ok).count(), 1);
        let (winner, loser) = if ra.is_ok() { (ra, rb) } else { (rb, ra) };
        assert!(matches!(loser, Err(EngineError::AlreadyExists(dup)) if dup == id));

        // The committed booking stays reachable through the index.
        let made = winner.unwrap();
        assert_eq!(engine.spot_for_booking(&id), Some(made.spot_id));
        engine.cancel_booking(id, made.guest_id, TODAY).await.unwrap();
    }
    assert!(engine.find_reservations_by_resource(spot_a, None).await.unwrap().is_empty());
    assert!(engine.find_reservations_by_resource(spot_b, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn rejected_create_releases_booking_id() {
    let (engine, spot, _owner) = engine_with_spot("release_id.wal").await;
    engine
        .create_booking(request(spot, Ulid::new(), date(2025, 3, 1), date(2025, 3, 5)))
        .await
        .unwrap();

    let clash = request(spot, Ulid::new(), date(2025, 3, 3), date(2025, 3, 8));
    assert!(matches!(
        rejected(engine.create_booking(clash).await),
        BookingError::Conflict(_)
    ));
    assert_eq!(engine.spot_for_booking(&clash.id), None);

    let retry = NewBooking {
        stay: stay(date(2025, 4, 1), date(2025, 4, 5)),
        ..clash
    };
    assert_eq!(engine.create_booking(retry).await.unwrap().id, clash.id);
}

/// A caller that checks then inserts through the store without holding any
/// lock still can't double-book: the insert enforces the constraint.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn store_insert_enforces_exclusion_after_stale_check() {
    let (engine, spot, _owner) = engine_with_spot("store_stale_check.wal").await;
    let engine = Arc::new(engine);

    let snapshot = engine.find_reservations_by_resource(spot, None).await.unwrap();
    assert!(snapshot.is_empty());

    let now = jiff::Timestamp::now();
    let make = |start: Date, end: Date| Reservation {
        id: Ulid::new(),
        spot_id: spot,
        guest_id: Ulid::new(),
        stay: stay(start, end),
        created_at: now,
        updated_at: now,
    };
    let a = make(date(2025, 3, 1), date(2025, 3, 5));
    let b = make(date(2025, 3, 5), date(2025, 3, 8)); // touches a

    let (ra, rb) = tokio::join!(
        engine.insert_reservation(a.clone()),
        engine.insert_reservation(b.clone())
    );
    let outcomes = [ra.is_ok(), rb.is_ok()];
    assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1);
    let loser = if ra.is_ok() { rb } else { ra };
    assert!(matches!(loser, Err(EngineError::Rejected(BookingError::Conflict(_)))));
}

#[tokio::test]
async fn store_operations() {
    let (engine, spot, owner) = engine_with_spot("store_ops.wal").await;
    assert_eq!(engine.find_resource_owner(spot).await.unwrap(), Some(owner));
    assert_eq!(engine.find_resource_owner(Ulid::new()).await.unwrap(), None);

    let a = engine
        .create_booking(request(spot, Ulid::new(), date(2025, 3, 1), date(2025, 3, 5)))
        .await
        .unwrap();
    let b = engine
        .create_booking(request(spot, Ulid::new(), date(2025, 4, 1), date(2025, 4, 5)))
        .await
        .unwrap();

    let others = engine.find_reservations_by_resource(spot, Some(a.id)).await.unwrap();
    assert_eq!(others, vec![b.clone()]);
    assert_eq!(engine.find_reservation_by_id(a.id).await.unwrap(), Some(a.clone()));

    let moved = engine
        .update_reservation_dates(a.id, stay(date(2025, 3, 20), date(2025, 3, 25)))
        .await
        .unwrap();
    assert_eq!(moved.stay, stay(date(2025, 3, 20), date(2025, 3, 25)));
    assert!(matches!(
        engine
            .update_reservation_dates(a.id, stay(date(2025, 3, 28), date(2025, 4, 1)))
            .await,
        Err(EngineError::Rejected(BookingError::Conflict(id))) if id == b.id
    ));

    engine.delete_reservation(a.id).await.unwrap();
    assert_eq!(engine.find_reservation_by_id(a.id).await.unwrap(), None);
    assert!(matches!(
        engine.delete_reservation(a.id).await,
        Err(EngineError::Rejected(BookingError::NotFound(_)))
    ));
}

// ── Durability ───────────────────────────────────────────

#[tokio::test]
async fn state_survives_restart() {
    let path = test_wal_path("restart.wal");
    let spot = Ulid::new();
    let owner = Ulid::new();
    let guest = Ulid::new();

    let (kept, moved) = {
        let engine = Engine::new(path.clone()).unwrap();
        engine.create_spot(spot, owner, Some("Loft".into())).await.unwrap();
        let kept = engine
            .create_booking(request(spot, guest, date(2025, 3, 1), date(2025, 3, 5)))
            .await
            .unwrap();
        let gone = engine
            .create_booking(request(spot, guest, date(2025, 4, 1), date(2025, 4, 5)))
            .await
            .unwrap();
        let moved = engine
            .create_booking(request(spot, guest, date(2025, 5, 1), date(2025, 5, 5)))
            .await
            .unwrap();
        engine.cancel_booking(gone.id, guest, TODAY).await.unwrap();
        let moved = engine
            .reschedule_booking(moved.id, guest, stay(date(2025, 6, 1), date(2025, 6, 3)), TODAY)
            .await
            .unwrap();
        (kept, moved)
    };

    let engine = Engine::new(path).unwrap();
    assert_eq!(engine.list_spots().await.len(), 1);
    let bookings = engine.spot_bookings(spot, owner).await.unwrap();
    assert_eq!(
        bookings,
        vec![SpotBookingView::Full(kept), SpotBookingView::Full(moved.clone())]
    );
    // Index rebuilt: the moved booking is reachable by id.
    assert_eq!(engine.get_booking(moved.id).await, Some(moved));
}

#[tokio::test]
async fn deleted_spot_stays_deleted_after_restart() {
    let path = test_wal_path("restart_deleted.wal");
    let spot = Ulid::new();
    let owner = Ulid::new();
    let booking_id = {
        let engine = Engine::new(path.clone()).unwrap();
        engine.create_spot(spot, owner, None).await.unwrap();
        let made = engine
            .create_booking(request(spot, Ulid::new(), date(2025, 3, 1), date(2025, 3, 5)))
            .await
            .unwrap();
        engine.delete_spot(spot, owner).await.unwrap();
        made.id
    };

    let engine = Engine::new(path).unwrap();
    assert!(engine.list_spots().await.is_empty());
    assert!(engine.spot_for_booking(&booking_id).is_none());
}

#[tokio::test]
async fn compaction_survives_restart() {
    let path = test_wal_path("compact_restart.wal");
    let spot = Ulid::new();
    let owner = Ulid::new();
    let guest = Ulid::new();

    let kept = {
        let engine = Engine::new(path.clone()).unwrap();
        engine.create_spot(spot, owner, Some("Loft".into())).await.unwrap();
        for _ in 0..20 {
            let tmp = engine
                .create_booking(request(spot, guest, date(2025, 8, 1), date(2025, 8, 3)))
                .await
                .unwrap();
            engine.cancel_booking(tmp.id, guest, TODAY).await.unwrap();
        }
        assert_eq!(engine.wal_appends_since_compact().await.unwrap(), 41);

        engine.compact_wal().await.unwrap();
        assert_eq!(engine.wal_appends_since_compact().await.unwrap(), 0);

        engine
            .create_booking(request(spot, guest, date(2025, 3, 1), date(2025, 3, 5)))
            .await
            .unwrap()
    };

    let engine = Engine::new(path).unwrap();
    let spots = engine.list_spots().await;
    assert_eq!(spots.len(), 1);
    assert_eq!(spots[0].name.as_deref(), Some("Loft"));
    assert_eq!(
        engine.spot_bookings(spot, owner).await.unwrap(),
        vec![SpotBookingView::Full(kept)]
    );
}

// ── Limits ───────────────────────────────────────────────

#[tokio::test]
async fn stay_length_limit() {
    let (engine, spot, _owner) = engine_with_spot("limit_stay.wal").await;
    let start = date(2025, 1, 1);
    let at_limit = start.checked_add(jiff::Span::new().days(MAX_STAY_NIGHTS)).unwrap();
    engine
        .create_booking(request(spot, Ulid::new(), start, at_limit))
        .await
        .unwrap();

    let start = date(2027, 1, 1);
    let too_long = start
        .checked_add(jiff::Span::new().days(MAX_STAY_NIGHTS + 1))
        .unwrap();
    let result = engine
        .create_booking(request(spot, Ulid::new(), start, too_long))
        .await;
    assert!(matches!(result, Err(EngineError::LimitExceeded("stay too long"))));
}

#[tokio::test]
async fn date_range_limit() {
    let (engine, spot, _owner) = engine_with_spot("limit_dates.wal").await;
    let result = engine
        .create_booking(request(spot, Ulid::new(), date(1999, 12, 30), date(2000, 1, 2)))
        .await;
    assert!(matches!(result, Err(EngineError::LimitExceeded("date out of range"))));
}

#[tokio::test]
async fn policy_rejections_come_before_limits() {
    let (engine, spot, owner) = engine_with_spot("limit_order.wal").await;
    let result = engine
        .create_booking(request(spot, owner, date(1990, 1, 1), date(2030, 1, 1)))
        .await;
    assert_eq!(rejected(result), BookingError::Forbidden(OWN_SPOT));
}

#[tokio::test]
async fn spot_name_limit() {
    let engine = Engine::new(test_wal_path("limit_name.wal")).unwrap();
    let ok = "x".repeat(MAX_NAME_LEN);
    engine.create_spot(Ulid::new(), Ulid::new(), Some(ok)).await.unwrap();

    let too_long = "x".repeat(MAX_NAME_LEN + 1);
    let result = engine.create_spot(Ulid::new(), Ulid::new(), Some(too_long)).await;
    assert!(matches!(result, Err(EngineError::LimitExceeded("spot name too long"))));
}
