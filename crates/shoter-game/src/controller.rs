use crate::state::{reduce, GameEvent, GameSnapshot, ShotOutcome};
use shoter_api::{ApiError, ApiResponse, GameApi, PlayerProfileRequest};
use shoter_core::{Angle, CapturedFrame, FaceDetector, PhotoPayload, PhotoPipeline};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

/// Coordinates one shot at a time and publishes [`GameSnapshot`]s.
///
/// Every transition runs [`reduce`] under the watch channel's write lock, so
/// subscribers only ever observe complete snapshots.
pub struct ShotController<A> {
    api: Arc<A>,
    state: watch::Sender<GameSnapshot>,
}

impl<A: GameApi> ShotController<A> {
    pub fn new(api: A) -> Self {
        Self::with_shared_api(Arc::new(api))
    }

    pub fn with_shared_api(api: Arc<A>) -> Self {
        let (state, _) = watch::channel(GameSnapshot::default());
        Self { api, state }
    }

    /// Receiver that sees every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<GameSnapshot> {
        self.state.subscribe()
    }

    /// Copy of the current snapshot.
    pub fn snapshot(&self) -> GameSnapshot {
        self.state.borrow().clone()
    }

    fn dispatch(&self, event: GameEvent) {
        dispatch(&self.state, event);
    }

    pub fn on_player_detected(&self) {
        tracing::debug!("player detected in crosshair");
        self.dispatch(GameEvent::PlayerDetected);
    }

    pub fn on_player_lost(&self) {
        self.dispatch(GameEvent::PlayerLost);
    }

    pub fn set_targeting_mode(&self, enabled: bool) {
        self.dispatch(GameEvent::TargetingModeSet(enabled));
    }

    pub fn set_current_player_id(&self, player_id: impl Into<String>) {
        self.dispatch(GameEvent::CurrentPlayerSet(player_id.into()));
    }

    pub fn clear_outcome(&self) {
        self.dispatch(GameEvent::MessageCleared);
    }

    /// Claim the shot slot. Returns `false`, changing nothing, when a shot is
    /// already in flight.
    pub fn start_shot(&self) -> bool {
        self.admit(false).is_some()
    }

    /// Admit a new shot and return its ticket. With `claim_submission` the
    /// identify call is claimed in the same transition, so no `submit_shot`
    /// can slip in between.
    fn admit(&self, claim_submission: bool) -> Option<u64> {
        let mut ticket = None;
        self.state.send_if_modified(|state| {
            if state.is_shot_in_progress() {
                return false;
            }
            let mut next = reduce(state, GameEvent::ShotStarted);
            if claim_submission {
                next = reduce(&next, GameEvent::SubmissionClaimed(next.shot_ticket));
            }
            ticket = Some(next.shot_ticket);
            *state = next;
            true
        });
        match ticket {
            Some(ticket) => tracing::info!(ticket, "shot started"),
            None => tracing::debug!("shot already in flight; trigger ignored"),
        }
        ticket
    }

    /// Claim the identify call of the current shot. `None` when no shot is in
    /// flight or its call is already claimed.
    fn claim_submission(&self) -> Option<u64> {
        let mut ticket = None;
        self.state.send_if_modified(|state| {
            if !state.is_shot_in_progress() || state.identify_pending {
                return false;
            }
            *state = reduce(state, GameEvent::SubmissionClaimed(state.shot_ticket));
            ticket = Some(state.shot_ticket);
            true
        });
        ticket
    }

    /// Record a failure that happened before any network call and free the slot.
    pub fn on_shot_failed(&self, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::warn!(%reason, "shot failed");
        self.dispatch(GameEvent::ShotFailed(reason));
    }

    /// Send the shot image for identification.
    ///
    /// Only the first call per admitted shot is sent. Calls with no shot in
    /// flight, or after the shot's identify call was claimed, send nothing
    /// and return `None`. The slot is back to `Idle` when this returns.
    pub async fn submit_shot(&self, image: &str) -> Option<ShotOutcome> {
        let Some(ticket) = self.claim_submission() else {
            tracing::warn!("submit_shot called with no unclaimed shot in flight; ignored");
            return None;
        };
        let slot = InFlightSlot::new(&self.state, ticket);
        Some(self.identify(slot, image).await)
    }

    /// Take a full shot: claim the slot, run the pipeline on a blocking worker,
    /// then identify the resulting image.
    ///
    /// The shot's identify call is claimed on admission, so `submit_shot`
    /// calls made while the pipeline runs are ignored.
    ///
    /// Returns `None` (and deletes `frame`) when a shot is already in flight.
    pub async fn fire<D>(
        &self,
        frame: CapturedFrame,
        pipeline: &Arc<Mutex<PhotoPipeline<D>>>,
        angle: Angle,
    ) -> Option<ShotOutcome>
    where
        D: FaceDetector + 'static,
    {
        let ticket = self.admit(true)?;
        let slot = InFlightSlot::new(&self.state, ticket);

        let pipeline = Arc::clone(pipeline);
        let processed = tokio::task::spawn_blocking(move || {
            let result = match pipeline.lock() {
                Ok(mut pipeline) => pipeline.process(frame.path(), angle).map_err(|e| e.to_string()),
                Err(_) => Err("photo pipeline lock poisoned".to_string()),
            };
            drop(frame);
            result
        })
        .await;

        let image = match processed {
            Ok(Ok(result)) => result.legacy_image,
            Ok(Err(reason)) => return Some(slot.fail(format!("Frame processing error: {reason}"))),
            Err(join) => return Some(slot.fail(format!("Frame processing error: {join}"))),
        };

        Some(self.identify(slot, &image).await)
    }

    async fn identify(&self, slot: InFlightSlot<'_>, image: &str) -> ShotOutcome {
        let result = self.api.identify_player(image).await;
        if let Err(e) = &result {
            tracing::warn!(error = %e, "identify-player failed");
        }
        let outcome = ShotOutcome::from_identify(result);
        tracing::info!(kind = ?outcome.kind, message = %outcome.message, "shot resolved");
        slot.resolve(outcome.clone());
        outcome
    }

    /// Create a player profile; on success the id joins `player_profiles`.
    ///
    /// An empty `photos` list is sent as an absent field.
    pub async fn create_player_profile(
        &self,
        player_id: impl Into<String>,
        images: Vec<String>,
        angles: Vec<Angle>,
        photos: Vec<PhotoPayload>,
    ) -> Result<ApiResponse, ApiError> {
        let request = PlayerProfileRequest {
            player_id: player_id.into(),
            images,
            angles,
            photos: (!photos.is_empty()).then_some(photos),
        };
        self.submit_profile(request).await
    }

    /// Send a prepared profile request.
    ///
    /// Any 2xx counts as created, whatever the body's `success` flag says;
    /// a `success: false` body is logged at `warn`.
    pub async fn submit_profile(&self, request: PlayerProfileRequest) -> Result<ApiResponse, ApiError> {
        match self.api.create_player_profile(&request).await {
            Ok(response) => {
                if !response.success {
                    tracing::warn!(
                        player_id = %request.player_id,
                        message = %response.message,
                        "backend accepted profile but reported success=false"
                    );
                }
                tracing::info!(
                    player_id = %request.player_id,
                    success = response.success,
                    message = %response.message,
                    "player profile created"
                );
                self.dispatch(GameEvent::ProfileCreated(request.player_id));
                Ok(response)
            }
            Err(e) => {
                tracing::error!(player_id = %request.player_id, error = %e, "failed to create player profile");
                Err(e)
            }
        }
    }
}

fn dispatch(state: &watch::Sender<GameSnapshot>, event: GameEvent) {
    state.send_if_modified(|current| {
        let next = reduce(current, event);
        if next == *current {
            return false;
        }
        *current = next;
        true
    });
}

/// Proof that this call owns the identify call of shot `ticket`.
///
/// Dropping it without resolving (panic, cancelled future) still returns
/// the controller to `Idle`. Every event it sends carries its ticket, so
/// it can never settle a later shot.
struct InFlightSlot<'a> {
    state: &'a watch::Sender<GameSnapshot>,
    ticket: u64,
    settled: bool,
}

impl<'a> InFlightSlot<'a> {
    fn new(state: &'a watch::Sender<GameSnapshot>, ticket: u64) -> Self {
        Self {
            state,
            ticket,
            settled: false,
        }
    }

    fn resolve(mut self, outcome: ShotOutcome) {
        self.settled = true;
        dispatch(
            self.state,
            GameEvent::ShotResolved {
                ticket: self.ticket,
                outcome,
            },
        );
    }

    fn fail(self, reason: String) -> ShotOutcome {
        tracing::warn!(%reason, ticket = self.ticket, "shot failed");
        let outcome = ShotOutcome::error(reason);
        self.resolve(outcome.clone());
        outcome
    }
}

impl Drop for InFlightSlot<'_> {
    fn drop(&mut self) {
        if !self.settled {
            tracing::warn!(ticket = self.ticket, "shot abandoned before resolution; releasing slot");
            dispatch(self.state, GameEvent::ShotReleased(self.ticket));
        }
    }
}
