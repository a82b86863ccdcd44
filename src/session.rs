//! One client's view of one match.
//!
//! The store callback only enqueues; all state changes happen inside
//! [`Session::pump`] and friends, driven by the caller's clock.

use std::sync::mpsc::{self, Receiver};

use log::{debug, info, warn};
use serde_json::Value;

use crate::config::SyncConfig;
use crate::directory::{MatchTicket, RoomDirectory};
use crate::error::{Error, Result};
use crate::game::{Game, GameError};
use crate::identity::Identity;
use crate::notice::{Notice, NoticeBoard};
use crate::presence::{PeerStatus, Presence};
use crate::room::{Occupant, Phase, RoomRecord};
use crate::store::{KeyValueStore, Subscription};
use crate::types::{GameStatus, Move, PieceKind, Position, Side};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    OpponentJoined(Occupant),
    SnapshotUpdated { ply: u32, status: GameStatus },
    GameOver { winner: Option<Side>, abandonment: bool },
    /// A newer snapshot arrived after our game had ended and was dropped.
    StaleSnapshotIgnored { ply: u32 },
    /// The joiner backed out before the first move; the room is waiting again.
    OpponentWithdrew,
    RoomClosed,
    /// Someone else now holds our seat; the session is closed.
    Displaced,
}

pub struct Session<S: KeyValueStore> {
    store: S,
    config: SyncConfig,
    identity: Identity,
    slot: usize,
    path: String,
    role: Side,
    game: Game,
    phase: Phase,
    opponent: Option<Occupant>,
    peer_heartbeat: Option<u64>,
    presence: Presence,
    inbox: Receiver<Option<Value>>,
    subscription: Subscription,
    notices: NoticeBoard,
    finished_at: Option<u64>,
    closed: bool,
}

impl<S: KeyValueStore> Session<S> {
    /// Finds a seat and starts observing its room.
    pub fn start(store: S, config: SyncConfig, identity: Option<Identity>, now_ms: u64) -> Result<Self> {
        let identity = identity
            .filter(Identity::is_usable)
            .ok_or(Error::IdentityMissing)?;
        let ticket = RoomDirectory::new(&store, &config).find_match(Some(&identity), now_ms)?;
        Self::from_ticket(store, config, identity, ticket, now_ms)
    }

    /// Starts observing a seat that was already committed.
    pub fn from_ticket(
        store: S,
        config: SyncConfig,
        identity: Identity,
        ticket: MatchTicket,
        now_ms: u64,
    ) -> Result<Self> {
        let (tx, inbox) = mpsc::channel();
        let subscribed = store.subscribe(
            &ticket.path,
            Box::new(move |value| {
                let _ = tx.send(value);
            }),
        );
        let subscription = match subscribed {
            Ok(subscription) => subscription,
            Err(err) => {
                warn!("could not watch {}: {err}", ticket.path);
                release_seat(&store, &ticket, &identity);
                return Err(err.into());
            }
        };

        let record = ticket.record;
        let peer = ticket.role.opponent();
        let opponent = record.occupant(peer).cloned();
        let peer_heartbeat = opponent.as_ref().map(|_| record.heartbeat(peer));
        let game = Game::from_snapshot(record.snapshot)?;

        let mut presence = Presence::new(ticket.role, &config);
        presence.mark(now_ms);
        let notices = NoticeBoard::new(config.notice_ttl_ms);

        Ok(Self {
            store,
            config,
            identity,
            slot: ticket.slot,
            path: ticket.path,
            role: ticket.role,
            game,
            phase: record.phase,
            opponent,
            peer_heartbeat,
            presence,
            inbox,
            subscription,
            notices,
            finished_at: None,
            closed: false,
        })
    }

    pub fn role(&self) -> Side {
        self.role
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn game(&self) -> &Game {
        &self.game
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn opponent(&self) -> Option<&Occupant> {
        self.opponent.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn notice(&self, now_ms: u64) -> Option<&Notice> {
        self.notices.current(now_ms)
    }

    pub fn peer_status(&self, now_ms: u64) -> PeerStatus {
        self.presence.peer_status(self.peer_heartbeat, now_ms)
    }

    /// Destinations for our piece on `from`; empty unless we may move now.
    pub fn legal_moves(&self, from: Position) -> Vec<Position> {
        if self.check_turn().is_err() {
            return Vec::new();
        }
        self.game.legal_moves(from)
    }

    /// Applies every queued room notification.
    pub fn pump(&mut self, now_ms: u64) -> Result<Vec<SessionEvent>> {
        if self.closed {
            return Err(Error::SessionClosed);
        }
        let mut events = Vec::new();
        while !self.closed
            && let Ok(value) = self.inbox.try_recv()
        {
            self.observe(value, now_ms, &mut events);
        }
        Ok(events)
    }

    /// Periodic upkeep: drain notifications, heartbeat, watch the peer and
    /// clean up a finished room.
    pub fn tick(&mut self, now_ms: u64) -> Result<Vec<SessionEvent>> {
        let mut events = self.pump(now_ms)?;
        if self.closed {
            return Ok(events);
        }

        if self.phase != Phase::Finished
            && self.presence.is_due(now_ms)
            && let Err(err) = self.presence.beat(&self.store, &self.path, now_ms)
        {
            warn!("heartbeat for slot {} failed: {err}", self.slot);
            self.notices.post_error(&Error::from(err), now_ms);
        }

        if self.phase == Phase::Active
            && !self.game.is_over()
            && let Some(winner) = self.presence.detect_abandonment(self.peer_heartbeat, now_ms)
        {
            self.force_abandonment(winner, now_ms, &mut events);
        }

        if self.role == Side::White
            && let Some(finished_at) = self.finished_at
            && now_ms.saturating_sub(finished_at) >= self.config.finish_grace_ms
        {
            match self.store.write(&self.path, Value::Null) {
                Ok(()) => {
                    info!("removed finished room in slot {}", self.slot);
                    self.close();
                    events.push(SessionEvent::RoomClosed);
                }
                Err(err) => {
                    warn!("could not remove room in slot {}: {err}", self.slot);
                    self.notices.post_error(&Error::from(err), now_ms);
                }
            }
        }

        Ok(events)
    }

    pub fn submit_move(&mut self, mv: Move, now_ms: u64) -> Result<GameStatus> {
        self.transition(now_ms, |game| game.play(mv))
    }

    pub fn choose_promotion(&mut self, kind: PieceKind, now_ms: u64) -> Result<GameStatus> {
        self.transition(now_ms, |game| game.promote(kind))
    }

    /// White takes the room down with it; Black simply goes quiet.
    pub fn leave(&mut self, now_ms: u64) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        if self.role == Side::White
            && let Err(err) = self.store.write(&self.path, Value::Null)
        {
            let err = Error::from(err);
            warn!("could not remove room in slot {}: {err}", self.slot);
            self.notices.post_error(&err, now_ms);
            return Err(err);
        }
        info!("{} left slot {}", self.identity.display_name, self.slot);
        self.close();
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
        self.subscription.cancel();
    }

    fn check_turn(&self) -> Result<()> {
        if self.closed {
            return Err(Error::SessionClosed);
        }
        if self.game.is_over() || self.phase == Phase::Finished {
            return Err(GameError::GameOver.into());
        }
        if self.phase == Phase::Waiting {
            return Err(Error::WaitingForOpponent);
        }
        if self.game.side_to_move() != self.role {
            return Err(Error::NotYourTurn);
        }
        Ok(())
    }

    fn transition(
        &mut self,
        now_ms: u64,
        step: impl FnOnce(&mut Game) -> std::result::Result<GameStatus, GameError>,
    ) -> Result<GameStatus> {
        let outcome = self.try_transition(now_ms, step);
        if let Err(err) = &outcome {
            self.notices.post_error(err, now_ms);
        }
        outcome
    }

    fn try_transition(
        &mut self,
        now_ms: u64,
        step: impl FnOnce(&mut Game) -> std::result::Result<GameStatus, GameError>,
    ) -> Result<GameStatus> {
        self.check_turn()?;
        let before = self.game.clone();
        let status = step(&mut self.game)?;

        let phase = if status.is_terminal() {
            Phase::Finished
        } else {
            self.phase
        };
        if let Err(err) = self.publish(phase, now_ms) {
            warn!(
                "publishing ply {} in slot {} failed; rolled back: {err}",
                self.game.snapshot().ply,
                self.slot
            );
            self.game = before;
            return Err(err);
        }
        if status.is_terminal() {
            info!("game in slot {} ended: {status:?}", self.slot);
        }
        Ok(status)
    }

    /// Writes the local snapshot with its checksum and `phase`.
    fn publish(&mut self, phase: Phase, now_ms: u64) -> Result<()> {
        let fields = RoomRecord::snapshot_fields(self.game.snapshot(), phase)?;
        self.store.merge(&self.path, fields)?;
        self.advance_phase(phase, now_ms);
        Ok(())
    }

    fn advance_phase(&mut self, phase: Phase, now_ms: u64) {
        self.phase = self.phase.max(phase);
        if self.phase == Phase::Finished && self.finished_at.is_none() {
            self.finished_at = Some(now_ms);
        }
    }

    fn force_abandonment(&mut self, winner: Side, now_ms: u64, events: &mut Vec<SessionEvent>) {
        let before = self.game.clone();
        self.game.abandon(winner);
        match self.publish(Phase::Finished, now_ms) {
            Ok(()) => {
                warn!("opponent in slot {} went quiet; {winner} wins by abandonment", self.slot);
                events.push(SessionEvent::GameOver {
                    winner: Some(winner),
                    abandonment: true,
                });
            }
            Err(err) => {
                warn!("could not record abandonment in slot {}: {err}", self.slot);
                self.game = before;
                self.notices.post_error(&err, now_ms);
            }
        }
    }

    fn observe(&mut self, value: Option<Value>, now_ms: u64, events: &mut Vec<SessionEvent>) {
        let Some(value) = value else {
            self.on_room_removed(now_ms, events);
            return;
        };
        let record = match RoomRecord::from_value(value) {
            Ok(record) => record,
            Err(err) => {
                debug!("ignoring undecodable update of slot {}: {err}", self.slot);
                return;
            }
        };
        if !record.verify_checksum() {
            debug!(
                "ignoring torn update of slot {} (ply {})",
                self.slot, record.snapshot.ply
            );
            return;
        }

        let holds_seat = record
            .occupant(self.role)
            .is_some_and(|seat| seat.device_token == self.identity.device_token);
        if !holds_seat {
            info!("{} lost the {} seat in slot {}", self.identity.display_name, self.role, self.slot);
            self.close();
            events.push(SessionEvent::Displaced);
            return;
        }

        let peer = self.role.opponent();
        match record.occupant(peer) {
            Some(occupant) => {
                if self.opponent.as_ref() != Some(occupant) {
                    info!("{} joined slot {} as {peer}", occupant.display_name, self.slot);
                    self.opponent = Some(occupant.clone());
                    events.push(SessionEvent::OpponentJoined(occupant.clone()));
                }
                let beat = record.heartbeat(peer);
                self.peer_heartbeat =
                    Some(self.peer_heartbeat.map_or(beat, |known| known.max(beat)));
            }
            // The only way back to `waiting`: a joiner undoing its seat before any move.
            None if self.opponent.is_some()
                && record.phase == Phase::Waiting
                && self.phase == Phase::Active
                && self.game.snapshot().ply == 0 =>
            {
                info!("opponent withdrew from slot {}", self.slot);
                self.opponent = None;
                self.peer_heartbeat = None;
                self.phase = Phase::Waiting;
                events.push(SessionEvent::OpponentWithdrew);
            }
            None => {}
        }
        self.advance_phase(record.phase, now_ms);

        let snapshot = record.snapshot;
        let local_ply = self.game.snapshot().ply;
        // A terminal result outranks a move written at the same ply.
        let terminal_tie =
            snapshot.ply == local_ply && snapshot.status.is_terminal() && !self.game.is_over();
        if snapshot.ply < local_ply || (snapshot.ply == local_ply && !terminal_tie) {
            debug!("ignoring snapshot at ply {} (have {local_ply})", snapshot.ply);
            return;
        }
        if self.game.is_over() {
            let err = Error::StaleSnapshotObserved { ply: snapshot.ply };
            warn!("slot {}: {err}", self.slot);
            events.push(SessionEvent::StaleSnapshotIgnored { ply: snapshot.ply });
            return;
        }

        match Game::from_snapshot(snapshot) {
            Ok(game) => {
                self.game = game;
                let snapshot = self.game.snapshot();
                events.push(SessionEvent::SnapshotUpdated {
                    ply: snapshot.ply,
                    status: snapshot.status,
                });
                if self.game.is_over() {
                    info!("game in slot {} ended: {:?}", self.slot, snapshot.status);
                    events.push(SessionEvent::GameOver {
                        winner: snapshot.winner,
                        abandonment: snapshot.abandonment,
                    });
                    self.advance_phase(Phase::Finished, now_ms);
                }
            }
            Err(err) => warn!("rejecting snapshot for slot {}: {err}", self.slot),
        }
    }

    fn on_room_removed(&mut self, now_ms: u64, events: &mut Vec<SessionEvent>) {
        if self.phase == Phase::Active && self.game.abandon(self.role) {
            warn!(
                "room in slot {} vanished mid-game; {} wins by abandonment",
                self.slot, self.role
            );
            self.advance_phase(Phase::Finished, now_ms);
            events.push(SessionEvent::GameOver {
                winner: Some(self.role),
                abandonment: true,
            });
        }
        info!("room in slot {} closed", self.slot);
        self.close();
        events.push(SessionEvent::RoomClosed);
    }
}

/// Undoes a committed seat when the session cannot be started, so the room
/// is not left claimed or joined by a client that never observes it.
fn release_seat<S: KeyValueStore>(store: &S, ticket: &MatchTicket, identity: &Identity) {
    match ticket.role {
        Side::White => {
            if let Err(err) = store.write(&ticket.path, Value::Null) {
                warn!("could not release slot {}: {err}", ticket.slot);
            }
        }
        Side::Black => {
            let still_ours = match store.read(&ticket.path) {
                Ok(value) => value
                    .and_then(|value| RoomRecord::from_value(value).ok())
                    .and_then(|record| record.black)
                    .is_some_and(|seat| seat.device_token == identity.device_token),
                Err(err) => {
                    warn!("could not read slot {} to release it: {err}", ticket.slot);
                    false
                }
            };
            if !still_ours {
                return;
            }
            let released = RoomRecord::vacate_black_fields()
                .map_err(Error::from)
                .and_then(|fields| store.merge(&ticket.path, fields).map_err(Error::from));
            if let Err(err) = released {
                warn!("could not release slot {}: {err}", ticket.slot);
            }
        }
    }
}
