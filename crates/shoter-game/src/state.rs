//! Game state snapshots and the transition function that produces them.
//!
//! Every change is a [`GameEvent`] fed to [`reduce`], which returns the next
//! full [`GameSnapshot`]. Nothing mutates a published snapshot in place.

use shoter_api::{ApiError, IdentifyResponse};

/// Shot admission slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShotState {
    #[default]
    Idle,
    InFlight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    /// Existing player identified.
    Hit,
    /// The backend created a profile for an unknown player.
    NewPlayer,
    /// 2xx with an empty body.
    NoResult,
    /// HTTP 404.
    NotFound,
    Error,
}

/// Human-readable shot result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShotOutcome {
    pub kind: OutcomeKind,
    pub message: String,
}

impl ShotOutcome {
    pub fn hit(player_id: &str) -> Self {
        Self {
            kind: OutcomeKind::Hit,
            message: format!("Hit on {player_id}"),
        }
    }

    pub fn new_player(player_id: &str) -> Self {
        Self {
            kind: OutcomeKind::NewPlayer,
            message: format!("New player detected: {player_id}"),
        }
    }

    pub fn no_result() -> Self {
        Self {
            kind: OutcomeKind::NoResult,
            message: "Server returned no result".into(),
        }
    }

    pub fn not_found() -> Self {
        Self {
            kind: OutcomeKind::NotFound,
            message: "Profile not found".into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: OutcomeKind::Error,
            message: message.into(),
        }
    }

    /// Map an identify-player result to what the player sees.
    pub fn from_identify(result: Result<Option<IdentifyResponse>, ApiError>) -> Self {
        match result {
            Ok(None) => Self::no_result(),
            Ok(Some(reply)) if reply.is_new => Self::new_player(&reply.player_id),
            Ok(Some(reply)) => Self::hit(&reply.player_id),
            Err(ApiError::NotFound) => Self::not_found(),
            Err(ApiError::Status(code)) => Self::error(format!("Recognition error: {code}")),
            Err(other) => Self::error(format!("Recognition failure: {other}")),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.kind, OutcomeKind::Hit | OutcomeKind::NewPlayer)
    }
}

/// Full observable game state.
///
/// A finished shot is `shot == Idle` with `outcome` set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GameSnapshot {
    pub shot: ShotState,
    /// Incremented by every admitted shot. Resolutions carry the ticket of
    /// the shot they belong to and are dropped when it no longer matches.
    pub shot_ticket: u64,
    /// The current shot's identify call has been claimed.
    pub identify_pending: bool,
    pub outcome: Option<ShotOutcome>,
    pub player_detected: bool,
    pub targeting_mode: bool,
    pub player_profiles: Vec<String>,
    pub current_player_id: String,
}

impl GameSnapshot {
    pub fn is_shot_in_progress(&self) -> bool {
        self.shot == ShotState::InFlight
    }

    fn owns_shot(&self, ticket: u64) -> bool {
        self.is_shot_in_progress() && self.shot_ticket == ticket
    }

    /// Outcome message, or `""` when there is none.
    pub fn message(&self) -> &str {
        self.outcome.as_ref().map_or("", |o| o.message.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameEvent {
    PlayerDetected,
    PlayerLost,
    TargetingModeSet(bool),
    CurrentPlayerSet(String),
    ProfileCreated(String),
    MessageCleared,
    /// Ignored while a shot is already in flight.
    ShotStarted,
    /// Claim the identify call of shot `ticket`. Ignored unless that shot is
    /// in flight and unclaimed.
    SubmissionClaimed(u64),
    /// Finish shot `ticket`. Ignored once that shot is no longer current.
    ShotResolved { ticket: u64, outcome: ShotOutcome },
    /// Fail whatever shot is current, or none.
    ShotFailed(String),
    /// Release shot `ticket` without touching the outcome.
    ShotReleased(u64),
}

/// Compute the snapshot that follows `state` after `event`.
pub fn reduce(state: &GameSnapshot, event: GameEvent) -> GameSnapshot {
    let mut next = state.clone();
    match event {
        GameEvent::PlayerDetected => next.player_detected = true,
        GameEvent::PlayerLost => next.player_detected = false,
        GameEvent::TargetingModeSet(enabled) => next.targeting_mode = enabled,
        GameEvent::CurrentPlayerSet(player_id) => next.current_player_id = player_id,
        GameEvent::ProfileCreated(player_id) => next.player_profiles.push(player_id),
        GameEvent::MessageCleared => next.outcome = None,
        GameEvent::ShotStarted => {
            if !state.is_shot_in_progress() {
                next.shot = ShotState::InFlight;
                next.shot_ticket = state.shot_ticket.wrapping_add(1);
                next.identify_pending = false;
                next.outcome = None;
            }
        }
        GameEvent::SubmissionClaimed(ticket) => {
            if state.owns_shot(ticket) {
                next.identify_pending = true;
            }
        }
        GameEvent::ShotResolved { ticket, outcome } => {
            if state.owns_shot(ticket) {
                next.outcome = Some(outcome);
                next.shot = ShotState::Idle;
                next.identify_pending = false;
            }
        }
        GameEvent::ShotFailed(reason) => {
            next.outcome = Some(ShotOutcome::error(reason));
            next.shot = ShotState::Idle;
            next.identify_pending = false;
        }
        GameEvent::ShotReleased(ticket) => {
            if state.owns_shot(ticket) {
                next.shot = ShotState::Idle;
                next.identify_pending = false;
            }
        }
    }
    next
}
