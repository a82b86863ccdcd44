use relay_chess::board::Board;
use relay_chess::directory::RoomDirectory;
use relay_chess::game::Game;
use relay_chess::notice::NoticeKind;
use relay_chess::room::{Phase, RoomRecord};
use relay_chess::session::{Session, SessionEvent};
use relay_chess::store::{ChangeCallback, KeyValueStore, MemoryStore, StoreError, Subscription};
use relay_chess::{
    Error, GameSnapshot, GameStatus, Identity, Move, PieceKind, Position, Side, SyncConfig,
};
use serde_json::{Map, Value};

const STALE_AFTER: u64 = 1_000;
const GRACE: u64 = 500;
const NOTICE_TTL: u64 = 400;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn config() -> SyncConfig {
    SyncConfig {
        slot_count: 2,
        heartbeat_interval_ms: 100,
        stale_after_ms: STALE_AFTER,
        finish_grace_ms: GRACE,
        notice_ttl_ms: NOTICE_TTL,
        ..SyncConfig::default()
    }
}

fn player(name: &str) -> Identity {
    Identity::new(name, format!("token-{name}"))
}

fn mv(from: (u8, u8), to: (u8, u8)) -> Move {
    Move::new(
        Position::new(from.0, from.1).unwrap(),
        Position::new(to.0, to.1).unwrap(),
    )
}

fn stored_record(store: &MemoryStore, path: &str) -> RoomRecord {
    RoomRecord::from_value(store.read(path).unwrap().unwrap()).unwrap()
}

/// White claims slot 0 at t=0, Black joins at t=10, White observes the join.
fn matched_pair(store: &MemoryStore) -> (Session<MemoryStore>, Session<MemoryStore>) {
    let mut white = Session::start(store.clone(), config(), Some(player("ana")), 0).unwrap();
    let black = Session::start(store.clone(), config(), Some(player("bo")), 10).unwrap();
    white.pump(20).unwrap();
    (white, black)
}

/// Publishes a snapshot into the room as if a peer had written it.
fn inject_snapshot(store: &MemoryStore, snapshot: &GameSnapshot, phase: Phase) {
    store
        .merge("rooms/0", RoomRecord::snapshot_fields(snapshot, phase).unwrap())
        .unwrap();
}

/// Reads and writes reach the shared store, but no path can be watched.
struct UnwatchableStore(MemoryStore);

impl KeyValueStore for UnwatchableStore {
    fn read(&self, path: &str) -> Result<Option<Value>, StoreError> {
        self.0.read(path)
    }

    fn write(&self, path: &str, value: Value) -> Result<(), StoreError> {
        self.0.write(path, value)
    }

    fn merge(&self, path: &str, fields: Map<String, Value>) -> Result<(), StoreError> {
        self.0.merge(path, fields)
    }

    fn subscribe(&self, path: &str, _on_change: ChangeCallback) -> Result<Subscription, StoreError> {
        Err(StoreError::Unavailable { path: path.to_string() })
    }
}

#[test]
fn two_players_are_matched_into_one_room() {
    init_logging();
    let store = MemoryStore::new();
    let mut white = Session::start(store.clone(), config(), Some(player("ana")), 0).unwrap();
    assert_eq!(white.role(), Side::White);
    assert_eq!(white.phase(), Phase::Waiting);

    let black = Session::start(store.clone(), config(), Some(player("bo")), 10).unwrap();
    assert_eq!(black.role(), Side::Black);
    assert_eq!(black.slot(), white.slot());
    assert_eq!(black.phase(), Phase::Active);
    assert_eq!(black.opponent().unwrap().display_name, "ana");

    let events = white.pump(20).unwrap();
    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], SessionEvent::OpponentJoined(o) if o.display_name == "bo"));
    assert_eq!(white.phase(), Phase::Active);
}

#[test]
fn moves_replicate_and_turns_are_enforced() {
    init_logging();
    let store = MemoryStore::new();
    let (mut white, mut black) = matched_pair(&store);

    assert!(matches!(
        black.submit_move(mv((1, 4), (3, 4)), 25),
        Err(Error::NotYourTurn)
    ));
    assert_eq!(white.submit_move(mv((6, 4), (4, 4)), 30).unwrap(), GameStatus::Playing);
    assert!(matches!(
        white.submit_move(mv((6, 3), (4, 3)), 31),
        Err(Error::NotYourTurn)
    ));

    let events = black.pump(40).unwrap();
    assert_eq!(
        events,
        vec![SessionEvent::SnapshotUpdated { ply: 1, status: GameStatus::Playing }]
    );
    assert_eq!(black.game().side_to_move(), Side::Black);
    assert!(!black.legal_moves(Position::new(1, 4).unwrap()).is_empty());
    assert!(white.legal_moves(Position::new(6, 3).unwrap()).is_empty());

    black.submit_move(mv((1, 4), (3, 4)), 50).unwrap();
    white.pump(60).unwrap();
    assert_eq!(white.game().snapshot(), black.game().snapshot());
    assert_eq!(stored_record(&store, "rooms/0").snapshot.ply, 2);
}

#[test]
fn illegal_move_is_refused_locally() {
    init_logging();
    let store = MemoryStore::new();
    let (mut white, _black) = matched_pair(&store);

    let err = white.submit_move(mv((6, 4), (3, 4)), 30).unwrap_err();

    assert!(matches!(err, Error::IllegalMoveRequested(_)));
    assert_eq!(stored_record(&store, "rooms/0").snapshot.ply, 0);
    assert_eq!(white.notice(30).unwrap().kind, NoticeKind::Rejected);
}

#[test]
fn checkmate_finishes_the_room_and_white_cleans_up() {
    init_logging();
    let store = MemoryStore::new();
    let (mut white, mut black) = matched_pair(&store);

    white.submit_move(mv((6, 5), (5, 5)), 30).unwrap();
    black.pump(31).unwrap();
    black.submit_move(mv((1, 4), (3, 4)), 32).unwrap();
    white.pump(33).unwrap();
    white.submit_move(mv((6, 6), (4, 6)), 34).unwrap();
    black.pump(35).unwrap();
    assert_eq!(black.submit_move(mv((0, 3), (4, 7)), 36).unwrap(), GameStatus::Checkmate);
    assert_eq!(black.phase(), Phase::Finished);

    let events = white.pump(40).unwrap();
    assert!(events.contains(&SessionEvent::GameOver {
        winner: Some(Side::Black),
        abandonment: false
    }));
    assert_eq!(white.phase(), Phase::Finished);
    assert_eq!(stored_record(&store, "rooms/0").phase, Phase::Finished);

    assert!(white.tick(40 + GRACE - 1).unwrap().is_empty());
    assert_eq!(white.tick(40 + GRACE).unwrap(), vec![SessionEvent::RoomClosed]);
    assert_eq!(store.read("rooms/0").unwrap(), None);

    assert_eq!(black.pump(600).unwrap(), vec![SessionEvent::RoomClosed]);
    assert!(black.is_closed());
    assert_eq!(black.game().winner(), Some(Side::Black));
}

#[test]
fn silent_peer_loses_by_abandonment() {
    init_logging();
    let store = MemoryStore::new();
    let (mut white, mut black) = matched_pair(&store);

    // Black joined at t=10 and never heartbeats again.
    assert!(white.tick(10 + STALE_AFTER).unwrap().is_empty());
    let events = white.tick(11 + STALE_AFTER).unwrap();
    assert_eq!(
        events,
        vec![SessionEvent::GameOver { winner: Some(Side::White), abandonment: true }]
    );

    let record = stored_record(&store, "rooms/0");
    assert_eq!(record.phase, Phase::Finished);
    assert_eq!(record.snapshot.status, GameStatus::Checkmate);
    assert!(record.snapshot.abandonment);

    let events = black.pump(1_100).unwrap();
    assert!(events.contains(&SessionEvent::GameOver {
        winner: Some(Side::White),
        abandonment: true
    }));
    assert!(black.game().snapshot().abandonment);
    assert!(matches!(
        black.submit_move(mv((1, 4), (3, 4)), 1_101),
        Err(Error::IllegalMoveRequested(_))
    ));
}

#[test]
fn silent_host_loses_by_abandonment() {
    init_logging();
    let store = MemoryStore::new();
    let (mut white, mut black) = matched_pair(&store);

    // White's last heartbeat is the claim at t=0.
    let events = black.tick(1 + STALE_AFTER).unwrap();
    assert_eq!(
        events,
        vec![SessionEvent::GameOver { winner: Some(Side::Black), abandonment: true }]
    );
    assert_eq!(black.phase(), Phase::Finished);

    let record = stored_record(&store, "rooms/0");
    assert_eq!(record.phase, Phase::Finished);
    assert_eq!(record.snapshot.winner, Some(Side::Black));
    assert!(record.snapshot.abandonment);

    let events = white.pump(1_010).unwrap();
    assert!(events.contains(&SessionEvent::GameOver {
        winner: Some(Side::Black),
        abandonment: true
    }));
    assert_eq!(white.game().winner(), Some(Side::Black));
    assert!(matches!(
        white.submit_move(mv((6, 4), (4, 4)), 1_011),
        Err(Error::IllegalMoveRequested(_))
    ));
}

#[test]
fn abandonment_outranks_a_move_written_at_the_same_ply() {
    init_logging();
    let store = MemoryStore::new();
    let (mut white, mut black) = matched_pair(&store);
    white.submit_move(mv((6, 4), (4, 4)), 30).unwrap();
    black.pump(31).unwrap();

    // Black moves late; White gives up on it before either write is seen.
    store.hold();
    black.submit_move(mv((1, 4), (3, 4)), 1_200).unwrap();
    assert_eq!(
        white.tick(1_200).unwrap(),
        vec![SessionEvent::GameOver { winner: Some(Side::White), abandonment: true }]
    );
    store.release_held();

    let events = black.pump(1_210).unwrap();
    assert!(events.contains(&SessionEvent::GameOver {
        winner: Some(Side::White),
        abandonment: true
    }));
    assert!(black.game().is_over());
    assert_eq!(black.game().winner(), Some(Side::White));
    assert!(black.game().snapshot().abandonment);
    assert_eq!(black.phase(), Phase::Finished);
    assert!(matches!(
        black.submit_move(mv((0, 6), (2, 5)), 1_220),
        Err(Error::IllegalMoveRequested(_))
    ));

    assert_eq!(white.tick(1_200 + GRACE).unwrap(), vec![SessionEvent::RoomClosed]);
    assert_eq!(black.pump(1_800).unwrap(), vec![SessionEvent::RoomClosed]);
    assert_eq!(black.game().winner(), Some(Side::White));
}

#[test]
fn heartbeats_keep_a_match_alive() {
    init_logging();
    let store = MemoryStore::new();
    let (mut white, mut black) = matched_pair(&store);

    let mut now = 20;
    while now < 3 * STALE_AFTER {
        now += 100;
        assert!(white.tick(now).unwrap().is_empty());
        black.tick(now).unwrap();
    }

    assert!(!white.game().is_over());
    assert!(!black.game().is_over());
    assert_eq!(stored_record(&store, "rooms/0").black_heartbeat, now);
}

#[test]
fn white_leaving_mid_game_hands_black_the_win() {
    init_logging();
    let store = MemoryStore::new();
    let (mut white, mut black) = matched_pair(&store);

    white.leave(50).unwrap();
    let events = black.pump(60).unwrap();

    assert_eq!(
        events,
        vec![
            SessionEvent::GameOver { winner: Some(Side::Black), abandonment: true },
            SessionEvent::RoomClosed,
        ]
    );
    assert!(black.is_closed());
}

#[test]
fn full_directory_reports_capacity_exceeded() {
    init_logging();
    let store = MemoryStore::new();
    let mut seated = Vec::new();
    for (i, name) in ["a", "b", "c", "d"].into_iter().enumerate() {
        seated.push(Session::start(store.clone(), config(), Some(player(name)), i as u64).unwrap());
    }
    assert_eq!(seated[2].slot(), 1);

    let result = Session::start(store.clone(), config(), Some(player("e")), 10);
    assert!(matches!(result, Err(Error::CapacityExceeded { slots: 2 })));
}

#[test]
fn racing_joiners_both_succeed_but_last_writer_keeps_the_seat() {
    init_logging();
    let store = MemoryStore::new();
    let config = config();
    let _host = Session::start(store.clone(), config.clone(), Some(player("ana")), 0).unwrap();

    let directory = RoomDirectory::new(&store, &config);
    let (bo, cy) = (player("bo"), player("cy"));
    let plan_bo = directory.survey(&bo, 10).unwrap();
    let plan_cy = directory.survey(&cy, 10).unwrap();
    assert_eq!(plan_bo, plan_cy);

    let ticket_bo = directory.commit(plan_bo, &bo, 11).unwrap();
    let ticket_cy = directory.commit(plan_cy, &cy, 12).unwrap();
    assert_eq!(ticket_bo.role, Side::Black);
    assert_eq!(ticket_cy.role, Side::Black);
    assert_eq!(stored_record(&store, "rooms/0").black.unwrap().device_token, "token-cy");

    let mut session_bo =
        Session::from_ticket(store.clone(), config.clone(), bo, ticket_bo, 13).unwrap();
    let mut session_cy = Session::from_ticket(store.clone(), config, cy, ticket_cy, 13).unwrap();

    assert_eq!(session_bo.pump(14).unwrap(), vec![SessionEvent::Displaced]);
    assert!(session_bo.is_closed());
    assert!(session_cy.pump(14).unwrap().is_empty());
    assert!(!session_cy.is_closed());
}

#[test]
fn torn_record_is_ignored() {
    init_logging();
    let store = MemoryStore::new();
    let (mut white, mut black) = matched_pair(&store);
    white.submit_move(mv((6, 4), (4, 4)), 30).unwrap();
    black.pump(31).unwrap();

    // Snapshot from the next ply paired with the previous checksum.
    let mut ahead = black.game().clone();
    ahead.play(mv((1, 4), (3, 4))).unwrap();
    let mut torn = store.read("rooms/0").unwrap().unwrap();
    torn["snapshot"] = serde_json::to_value(ahead.snapshot()).unwrap();
    store.write("rooms/0", torn).unwrap();

    assert!(white.pump(40).unwrap().is_empty());
    assert_eq!(white.game().snapshot().ply, 1);
    assert_eq!(white.game().side_to_move(), Side::Black);
}

#[test]
fn older_snapshot_delivered_late_is_ignored() {
    init_logging();
    let store = MemoryStore::new();
    let (mut white, mut black) = matched_pair(&store);

    let mut near_promotion = GameSnapshot {
        board: Board::from_placement("4k3/P7/8/8/8/8/8/4K3").unwrap(),
        ..GameSnapshot::initial()
    };
    near_promotion.ply = 1;
    inject_snapshot(&store, &near_promotion, Phase::Active);
    white.pump(20).unwrap();
    black.pump(20).unwrap();

    store.hold();
    assert_eq!(white.submit_move(mv((1, 0), (0, 0)), 30).unwrap(), GameStatus::Promotion);
    assert_eq!(white.choose_promotion(PieceKind::Queen, 31).unwrap(), GameStatus::Check);
    store.release_held_reversed();

    let events = black.pump(40).unwrap();
    assert_eq!(
        events,
        vec![SessionEvent::SnapshotUpdated { ply: 3, status: GameStatus::Check }]
    );
    assert_eq!(black.game().side_to_move(), Side::Black);
    assert_eq!(black.game().pending_promotion(), None);
}

#[test]
fn snapshot_after_terminal_state_is_rejected() {
    init_logging();
    let store = MemoryStore::new();
    let (mut white, _black) = matched_pair(&store);
    white.tick(11 + STALE_AFTER).unwrap();
    assert!(white.game().is_over());

    // A late move from a peer that never saw the abandonment.
    let mut late = Game::new();
    late.play(mv((6, 4), (4, 4))).unwrap();
    late.play(mv((1, 4), (3, 4))).unwrap();
    inject_snapshot(&store, late.snapshot(), Phase::Active);

    let events = white.pump(1_100).unwrap();
    assert_eq!(events, vec![SessionEvent::StaleSnapshotIgnored { ply: 2 }]);
    assert_eq!(white.game().winner(), Some(Side::White));
    assert_eq!(white.phase(), Phase::Finished);
}

#[test]
fn transport_failure_rolls_back_and_posts_a_notice() {
    init_logging();
    let store = MemoryStore::new();
    let (mut white, mut black) = matched_pair(&store);

    store.set_offline(true);
    let err = white.submit_move(mv((6, 4), (4, 4)), 30).unwrap_err();
    assert!(matches!(err, Error::Transport(_)));
    assert_eq!(white.game().snapshot().ply, 0);
    assert_eq!(white.game().side_to_move(), Side::White);
    assert_eq!(white.notice(30).unwrap().kind, NoticeKind::TransportFailed);
    assert!(white.notice(30 + NOTICE_TTL).is_none());

    store.set_offline(false);
    white.submit_move(mv((6, 4), (4, 4)), 500).unwrap();
    black.pump(510).unwrap();
    assert_eq!(black.game().snapshot().ply, 1);
}

#[test]
fn room_delete_reaches_subscribers_as_null() {
    init_logging();
    let store = MemoryStore::new();
    let (mut white, _black) = matched_pair(&store);

    store.write("rooms/0", Value::Null).unwrap();
    let events = white.pump(30).unwrap();

    assert_eq!(events.last(), Some(&SessionEvent::RoomClosed));
    assert_eq!(white.game().winner(), Some(Side::White));
}

#[test]
fn joiner_that_cannot_watch_the_room_gives_the_seat_back() {
    init_logging();
    let store = MemoryStore::new();
    let config = config();
    let mut host = Session::start(store.clone(), config.clone(), Some(player("ana")), 0).unwrap();

    let unwatchable = UnwatchableStore(store.clone());
    let directory = RoomDirectory::new(&unwatchable, &config);
    let bo = player("bo");
    let ticket = directory.find_match(Some(&bo), 10).unwrap();
    assert_eq!(ticket.role, Side::Black);

    let result = Session::from_ticket(unwatchable, config.clone(), bo, ticket, 11);
    assert!(matches!(result, Err(Error::Transport(_))));

    let record = stored_record(&store, "rooms/0");
    assert_eq!(record.black, None);
    assert_eq!(record.black_heartbeat, 0);
    assert_eq!(record.phase, Phase::Waiting);

    let events = host.pump(20).unwrap();
    assert!(matches!(&events[0], SessionEvent::OpponentJoined(o) if o.display_name == "bo"));
    assert_eq!(events.len(), 2);
    assert_eq!(events[1], SessionEvent::OpponentWithdrew);
    assert_eq!(host.phase(), Phase::Waiting);
    assert!(host.opponent().is_none());

    let cy = Session::start(store.clone(), config, Some(player("cy")), 30).unwrap();
    assert_eq!(cy.role(), Side::Black);
    assert_eq!(cy.slot(), 0);
    let events = host.pump(40).unwrap();
    assert!(matches!(&events[..], [SessionEvent::OpponentJoined(o)] if o.display_name == "cy"));
    assert_eq!(host.phase(), Phase::Active);
}

#[test]
fn failed_joiner_leaves_a_later_joiner_seated() {
    init_logging();
    let store = MemoryStore::new();
    let config = config();
    let _host = Session::start(store.clone(), config.clone(), Some(player("ana")), 0).unwrap();

    let unwatchable = UnwatchableStore(store.clone());
    let (bo, cy) = (player("bo"), player("cy"));
    let plan_bo = RoomDirectory::new(&unwatchable, &config).survey(&bo, 10).unwrap();
    let plan_cy = RoomDirectory::new(&store, &config).survey(&cy, 10).unwrap();
    let ticket_bo = RoomDirectory::new(&unwatchable, &config)
        .commit(plan_bo, &bo, 10)
        .unwrap();
    RoomDirectory::new(&store, &config).commit(plan_cy, &cy, 11).unwrap();

    let result = Session::from_ticket(unwatchable, config, bo, ticket_bo, 12);
    assert!(matches!(result, Err(Error::Transport(_))));

    let record = stored_record(&store, "rooms/0");
    assert_eq!(record.black.unwrap().device_token, "token-cy");
    assert_eq!(record.phase, Phase::Active);
}

#[test]
fn host_that_cannot_watch_the_room_removes_it() {
    init_logging();
    let store = MemoryStore::new();
    let config = config();
    let unwatchable = UnwatchableStore(store.clone());
    let ana = player("ana");

    let ticket = RoomDirectory::new(&unwatchable, &config)
        .find_match(Some(&ana), 0)
        .unwrap();
    assert_eq!(ticket.role, Side::White);
    assert!(store.read("rooms/0").unwrap().is_some());

    let result = Session::from_ticket(unwatchable, config, ana, ticket, 1);
    assert!(matches!(result, Err(Error::Transport(_))));
    assert_eq!(store.read("rooms/0").unwrap(), None);
}
