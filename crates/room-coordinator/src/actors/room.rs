//! `RoomActor` - per-room actor that owns room state.
//!
//! Each `RoomActor`:
//! - Owns the room record and its participants; nothing else writes them
//! - Meters participants against the credit ledger
//! - Issues media credentials on join and renew
//! - Runs a periodic tick that meters everyone, reaps silent participants
//!   and closes the room once it is empty
//!
//! # Persistence
//!
//! The actor loads its snapshot and claims a fencing generation before it
//! reads its mailbox. After every mutation it appends audit records to the
//! snapshot's outbox, tries to flush the outbox to the registry, then saves
//! the snapshot. A registry failure leaves records queued; a storage failure
//! is returned to the caller. Losing the fence stops the actor.

use super::alarm::TickAlarm;
use super::messages::{
    CloseResult, DenialReason, InitResult, JoinGrant, JoinRequest, LeaveReason, LeaveResult,
    MeteringReport, Outcome, RenewResult, RenewalHints, RoomMessage, RoomSpec, RoomStateView,
    RoomStatus, RoomType,
};
use super::metering;
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use crate::clock::Clock;
use crate::config::RoomPolicy;
use crate::errors::RoomError;
use crate::observability::metrics;
use crate::registry::{AuditRecord, ParticipantDeparture, RoomRegistry};
use crate::services::{CredentialIssuer, CredentialRequest, CreditLedger, IssuedCredential};
use crate::store::{ParticipantRecord, RoomRecord, RoomSnapshot, RoomStateStore};
use common::types::Wallet;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

const ROOM_CHANNEL_BUFFER: usize = 256;

/// Rejected audit records kept in the snapshot for inspection.
const MAX_REJECTED_AUDIT: usize = 32;

/// Collaborators shared by every room actor on an instance.
#[derive(Clone)]
pub struct RoomServices {
    pub ledger: Arc<dyn CreditLedger>,
    pub issuer: Arc<dyn CredentialIssuer>,
    pub registry: Arc<dyn RoomRegistry>,
    pub store: Arc<dyn RoomStateStore>,
    pub clock: Arc<dyn Clock>,
    pub policy: RoomPolicy,
    pub metrics: Arc<ActorMetrics>,
}

/// Handle to a `RoomActor`.
#[derive(Clone)]
pub struct RoomActorHandle {
    sender: mpsc::Sender<RoomMessage>,
    cancel_token: CancellationToken,
    room_id: String,
}

impl std::fmt::Debug for RoomActorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomActorHandle")
            .field("room_id", &self.room_id)
            .field("cancelled", &self.cancel_token.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl RoomActorHandle {
    #[must_use]
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Create the room. A second call reports `already_initialized` and
    /// changes nothing.
    pub async fn init(&self, spec: RoomSpec) -> Result<InitResult, RoomError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(RoomMessage::Init {
                spec,
                respond_to: tx,
            })
            .await
            .map_err(|e| RoomError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RoomError::Internal(format!("response receive failed: {e}")))?
    }

    /// Admit a participant and issue its first credential.
    pub async fn join(&self, request: JoinRequest) -> Result<Outcome<JoinGrant>, RoomError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(RoomMessage::Join {
                request,
                respond_to: tx,
            })
            .await
            .map_err(|e| RoomError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RoomError::Internal(format!("response receive failed: {e}")))?
    }

    pub async fn heartbeat(
        &self,
        connection_id: impl Into<String>,
    ) -> Result<Outcome<MeteringReport>, RoomError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(RoomMessage::Heartbeat {
                connection_id: connection_id.into(),
                respond_to: tx,
            })
            .await
            .map_err(|e| RoomError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RoomError::Internal(format!("response receive failed: {e}")))?
    }

    pub async fn renew(
        &self,
        connection_id: impl Into<String>,
    ) -> Result<Outcome<RenewResult>, RoomError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(RoomMessage::Renew {
                connection_id: connection_id.into(),
                respond_to: tx,
            })
            .await
            .map_err(|e| RoomError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RoomError::Internal(format!("response receive failed: {e}")))?
    }

    pub async fn leave(
        &self,
        connection_id: impl Into<String>,
    ) -> Result<Outcome<LeaveResult>, RoomError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(RoomMessage::Leave {
                connection_id: connection_id.into(),
                respond_to: tx,
            })
            .await
            .map_err(|e| RoomError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RoomError::Internal(format!("response receive failed: {e}")))?
    }

    pub async fn close(
        &self,
        initiator_connection_id: Option<String>,
    ) -> Result<Outcome<CloseResult>, RoomError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(RoomMessage::Close {
                initiator_connection_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| RoomError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RoomError::Internal(format!("response receive failed: {e}")))?
    }

    /// Erase the room: snapshot, outbox and registry rows.
    pub async fn destroy(&self) -> Result<(), RoomError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(RoomMessage::Destroy { respond_to: tx })
            .await
            .map_err(|e| RoomError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RoomError::Internal(format!("response receive failed: {e}")))?
    }

    /// Read-only view of the room, for debugging.
    pub async fn state(&self) -> Result<RoomStateView, RoomError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(RoomMessage::GetState { respond_to: tx })
            .await
            .map_err(|e| RoomError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RoomError::Internal(format!("response receive failed: {e}")))
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// True once the actor has exited and dropped its mailbox.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

#[derive(Debug, Default)]
struct TickSummary {
    metered: usize,
    reaped: usize,
    closed: bool,
}

/// The per-room actor.
pub struct RoomActor {
    room_id: String,
    receiver: mpsc::Receiver<RoomMessage>,
    cancel_token: CancellationToken,
    services: RoomServices,
    state: RoomSnapshot,
    generation: u64,
    alarm: TickAlarm,
    /// Set when a write was rejected by the fence; the actor stops.
    fenced_out: bool,
    mailbox: MailboxMonitor,
}

impl RoomActor {
    /// Spawn the actor for `room_id`.
    ///
    /// The actor rehydrates before serving its mailbox, so messages sent
    /// right away are answered against the persisted state.
    pub fn spawn(
        room_id: String,
        services: RoomServices,
        cancel_token: CancellationToken,
    ) -> (RoomActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(ROOM_CHANNEL_BUFFER);

        let actor = Self {
            room_id: room_id.clone(),
            receiver,
            cancel_token: cancel_token.clone(),
            alarm: TickAlarm::new(services.policy.heartbeat_interval()),
            services,
            state: RoomSnapshot::default(),
            generation: 0,
            fenced_out: false,
            mailbox: MailboxMonitor::new(ActorType::Room, &room_id),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = RoomActorHandle {
            sender,
            cancel_token,
            room_id,
        };

        (handle, task_handle)
    }

    #[instrument(skip_all, name = "rc.actor.room", fields(room_id = %self.room_id))]
    async fn run(mut self) {
        if let Err(e) = self.rehydrate().await {
            error!(
                target: "rc.actor.room",
                room_id = %self.room_id,
                error = %e,
                "Failed to load room state, actor exiting"
            );
            metrics::record_error("rehydrate", e.error_code());
            return;
        }

        info!(
            target: "rc.actor.room",
            room_id = %self.room_id,
            status = self.state.status().as_str(),
            participants = self.state.participants.len(),
            generation = self.generation,
            tick_armed = self.alarm.is_armed(),
            "RoomActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "rc.actor.room",
                        room_id = %self.room_id,
                        "RoomActor received cancellation signal"
                    );
                    break;
                }

                () = self.alarm.fired() => {
                    self.handle_tick().await;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.handle_message(message).await;
                            self.mailbox.record_processed(self.receiver.len());
                        }
                        None => {
                            debug!(
                                target: "rc.actor.room",
                                room_id = %self.room_id,
                                "RoomActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }

            if self.fenced_out {
                warn!(
                    target: "rc.actor.room",
                    room_id = %self.room_id,
                    generation = self.generation,
                    "Room claimed by a newer actor, stopping"
                );
                break;
            }
        }

        // Counts describe live actors only; a rehydrated actor adds them back.
        self.services
            .metrics
            .participants_removed(self.state.participants.len());
        self.services
            .metrics
            .audit_pending_changed(self.state.pending_audit.len(), 0);

        info!(
            target: "rc.actor.room",
            room_id = %self.room_id,
            status = self.state.status().as_str(),
            participants = self.state.participants.len(),
            messages_processed = self.mailbox.messages_processed(),
            "RoomActor stopped"
        );
    }

    async fn rehydrate(&mut self) -> Result<(), RoomError> {
        if let Some(snapshot) = self.services.store.load(&self.room_id).await? {
            self.state = snapshot;
        }
        self.generation = self.services.store.claim(&self.room_id).await?;

        self.services
            .metrics
            .participants_added(self.state.participants.len());
        self.services
            .metrics
            .audit_pending_changed(0, self.state.pending_audit.len());

        let now = self.services.clock.now_epoch();
        let metered = self
            .state
            .room
            .as_ref()
            .is_some_and(|room| room.room_type.is_metered());
        match (self.state.status(), self.state.next_tick_at) {
            (RoomStatus::Active, Some(at)) => {
                let delay = u64::try_from(at.saturating_sub(now)).unwrap_or(0);
                self.alarm.arm_in(Duration::from_secs(delay));
            }
            (RoomStatus::Active, None) if metered && !self.state.participants.is_empty() => {
                self.arm_tick(now);
            }
            (RoomStatus::Active, None) => {}
            _ => self.state.next_tick_at = None,
        }

        if !self.state.pending_audit.is_empty() {
            self.flush_audit().await;
            if let Err(e) = self.persist().await {
                warn!(
                    target: "rc.actor.room",
                    room_id = %self.room_id,
                    error = %e,
                    "Failed to persist after replaying audit outbox"
                );
            }
        }
        Ok(())
    }

    async fn handle_message(&mut self, message: RoomMessage) {
        match message {
            RoomMessage::Init { spec, respond_to } => {
                let result = self.handle_init(spec).await;
                observe("init", &result);
                let _ = respond_to.send(result);
            }
            RoomMessage::Join {
                request,
                respond_to,
            } => {
                let result = self.handle_join(request).await;
                observe("join", &result);
                let _ = respond_to.send(result);
            }
            RoomMessage::Heartbeat {
                connection_id,
                respond_to,
            } => {
                let result = self.handle_heartbeat(&connection_id).await;
                observe("heartbeat", &result);
                let _ = respond_to.send(result);
            }
            RoomMessage::Renew {
                connection_id,
                respond_to,
            } => {
                let result = self.handle_renew(&connection_id).await;
                observe("renew", &result);
                let _ = respond_to.send(result);
            }
            RoomMessage::Leave {
                connection_id,
                respond_to,
            } => {
                let result = self.handle_leave(&connection_id).await;
                observe("leave", &result);
                let _ = respond_to.send(result);
            }
            RoomMessage::Close {
                initiator_connection_id,
                respond_to,
            } => {
                let result = self.handle_close(initiator_connection_id.as_deref()).await;
                observe("close", &result);
                let _ = respond_to.send(result);
            }
            RoomMessage::Destroy { respond_to } => {
                let result = self.handle_destroy().await;
                observe("destroy", &result);
                let _ = respond_to.send(result);
            }
            RoomMessage::GetState { respond_to } => {
                let _ = respond_to.send(self.state_view());
            }
        }
    }

    // ------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------

    async fn handle_init(&mut self, spec: RoomSpec) -> Result<InitResult, RoomError> {
        if let Some(room) = &self.state.room {
            return Ok(InitResult {
                already_initialized: true,
                status: room.status,
            });
        }

        let now = self.services.clock.now_epoch();
        let capacity = spec.capacity.map_or_else(
            || self.services.policy.default_capacity(spec.room_type),
            NonZeroU32::get,
        );
        // The registry stores both as signed columns.
        if i64::try_from(spec.chain_id).is_err() {
            return Err(RoomError::InvalidRequest(format!(
                "chain_id {} out of range",
                spec.chain_id
            )));
        }
        if i32::try_from(capacity).is_err() {
            return Err(RoomError::InvalidRequest(format!(
                "capacity {capacity} out of range"
            )));
        }

        let record = RoomRecord {
            room_id: self.room_id.clone(),
            room_type: spec.room_type,
            host_wallet: spec.host_wallet,
            capacity,
            channel_name: spec.channel_name,
            chain_id: spec.chain_id,
            booking_id: spec.booking_id,
            status: RoomStatus::Active,
            created_at: now,
            closed_at: None,
        };
        self.queue_audit(AuditRecord::RoomOpened {
            room_type: record.room_type,
            host_wallet: record.host_wallet.clone(),
            capacity: record.capacity,
            channel_name: record.channel_name.clone(),
            chain_id: record.chain_id,
            booking_id: record.booking_id.clone(),
            opened_at: now,
        });
        self.state.room = Some(record);

        if let Err(e) = self.commit().await {
            // Nothing external depends on an unsaved init; forget it so a
            // retry starts clean.
            self.state.room = None;
            return Err(e);
        }

        info!(
            target: "rc.actor.room",
            room_id = %self.room_id,
            room_type = spec.room_type.as_str(),
            capacity,
            "Room initialized"
        );

        Ok(InitResult {
            already_initialized: false,
            status: RoomStatus::Active,
        })
    }

    async fn handle_join(&mut self, request: JoinRequest) -> Result<Outcome<JoinGrant>, RoomError> {
        let Some(room) = self.state.room.as_ref() else {
            return Ok(Outcome::Denied(DenialReason::RoomNotInitialized));
        };
        if room.status == RoomStatus::Closed {
            return Ok(Outcome::Denied(DenialReason::RoomClosed));
        }
        let room_type = room.room_type;
        let capacity = usize::try_from(room.capacity).unwrap_or(usize::MAX);
        let channel_name = room.channel_name.clone();
        let now = self.services.clock.now_epoch();

        let existing = self
            .state
            .participants
            .get(&request.connection_id)
            .map(|p| (p.wallet.clone(), p.external_uid));

        if let Some((wallet, external_uid)) = existing {
            if wallet != request.wallet {
                warn!(
                    target: "rc.actor.room",
                    room_id = %self.room_id,
                    connection_id = %request.connection_id,
                    "Join reused a connection id bound to another wallet"
                );
                return Ok(Outcome::Denied(DenialReason::ConnectionConflict));
            }

            let credential = self
                .issue_credential(&channel_name, external_uid, room_type)
                .await?;
            let remaining_seconds = self.read_balance(room_type, &wallet).await?;
            if let Some(participant) = self.state.participants.get_mut(&request.connection_id) {
                participant.last_seen_at = now;
            }
            self.commit().await?;

            debug!(
                target: "rc.actor.room",
                room_id = %self.room_id,
                connection_id = %request.connection_id,
                "Repeated join, credential reissued"
            );
            return Ok(Outcome::Granted(JoinGrant {
                connection_id: request.connection_id,
                external_uid,
                credential,
                renewal: self.renewal_hints(room_type),
                remaining_seconds,
            }));
        }

        if self.state.participants.len() >= capacity {
            debug!(
                target: "rc.actor.room",
                room_id = %self.room_id,
                capacity,
                "Join denied, room full"
            );
            return Ok(Outcome::Denied(DenialReason::RoomFull));
        }

        let credential = self
            .issue_credential(&channel_name, request.external_uid, room_type)
            .await?;
        let remaining_seconds = self.read_balance(room_type, &request.wallet).await?;

        self.state.participants.insert(
            request.connection_id.clone(),
            ParticipantRecord {
                connection_id: request.connection_id.clone(),
                wallet: request.wallet.clone(),
                external_uid: request.external_uid,
                joined_at: now,
                last_metered_at: now,
                last_seen_at: now,
                warned_low: false,
                exhausted: false,
                debited_seconds: 0,
                pending_events: Vec::new(),
            },
        );
        self.services.metrics.participants_added(1);
        self.queue_audit(AuditRecord::ParticipantJoined {
            connection_id: request.connection_id.clone(),
            wallet: request.wallet,
            external_uid: request.external_uid,
            joined_at: now,
        });
        if room_type.is_metered() {
            self.arm_tick(now);
        }
        self.commit().await?;

        info!(
            target: "rc.actor.room",
            room_id = %self.room_id,
            connection_id = %request.connection_id,
            participants = self.state.participants.len(),
            remaining_seconds = ?remaining_seconds,
            "Participant joined"
        );

        Ok(Outcome::Granted(JoinGrant {
            connection_id: request.connection_id,
            external_uid: request.external_uid,
            credential,
            renewal: self.renewal_hints(room_type),
            remaining_seconds,
        }))
    }

    async fn handle_heartbeat(
        &mut self,
        connection_id: &str,
    ) -> Result<Outcome<MeteringReport>, RoomError> {
        let Some(room_type) = self.room_type() else {
            return Ok(Outcome::Denied(DenialReason::ParticipantNotFound));
        };
        let now = self.services.clock.now_epoch();

        let Some(participant) = self.state.participants.get_mut(connection_id) else {
            return Ok(Outcome::Denied(DenialReason::ParticipantNotFound));
        };
        let mut report = metering::meter(
            participant,
            room_type,
            now,
            self.services.ledger.as_ref(),
            &self.services.policy,
        )
        .await?;
        participant.last_seen_at = now;
        deliver_pending(participant, &mut report);

        self.commit().await?;
        Ok(Outcome::Granted(report))
    }

    async fn handle_renew(&mut self, connection_id: &str) -> Result<Outcome<RenewResult>, RoomError> {
        let Some(room) = self.state.room.as_ref() else {
            return Ok(Outcome::Denied(DenialReason::ParticipantNotFound));
        };
        let room_type = room.room_type;
        let channel_name = room.channel_name.clone();
        let now = self.services.clock.now_epoch();

        let Some(participant) = self.state.participants.get_mut(connection_id) else {
            return Ok(Outcome::Denied(DenialReason::ParticipantNotFound));
        };
        let mut report = metering::meter(
            participant,
            room_type,
            now,
            self.services.ledger.as_ref(),
            &self.services.policy,
        )
        .await?;
        participant.last_seen_at = now;
        let external_uid = participant.external_uid;

        // Once exhausted, a participant is never renewed again in this session.
        let below_floor = room_type.is_metered()
            && (participant.exhausted
                || report
                    .remaining_seconds
                    .is_some_and(|remaining| remaining < self.services.policy.renewal_floor_seconds));

        if below_floor {
            deliver_pending(participant, &mut report);
            self.commit().await?;
            metrics::record_renewal("denied");
            info!(
                target: "rc.actor.room",
                room_id = %self.room_id,
                connection_id = %connection_id,
                remaining_seconds = ?report.remaining_seconds,
                "Renewal denied, credits exhausted"
            );
            return Ok(Outcome::Granted(RenewResult::Denied {
                reason: DenialReason::CreditsExhausted,
                metering: report,
            }));
        }

        let credential = match self
            .issue_credential(&channel_name, external_uid, room_type)
            .await
        {
            Ok(credential) => credential,
            Err(e) => {
                // The debit already happened; keep it.
                if let Err(persist_err) = self.commit().await {
                    warn!(
                        target: "rc.actor.room",
                        room_id = %self.room_id,
                        error = %persist_err,
                        "Failed to persist metering after issuer failure"
                    );
                }
                return Err(e);
            }
        };

        if let Some(participant) = self.state.participants.get_mut(connection_id) {
            deliver_pending(participant, &mut report);
        }
        self.commit().await?;
        metrics::record_renewal("granted");

        Ok(Outcome::Granted(RenewResult::Renewed {
            credential,
            renewal: self.renewal_hints(room_type),
            metering: report,
        }))
    }

    async fn handle_leave(&mut self, connection_id: &str) -> Result<Outcome<LeaveResult>, RoomError> {
        let Some(room_type) = self.room_type() else {
            return Ok(Outcome::Denied(DenialReason::ParticipantNotFound));
        };
        let now = self.services.clock.now_epoch();

        let Some(participant) = self.state.participants.get_mut(connection_id) else {
            return Ok(Outcome::Denied(DenialReason::ParticipantNotFound));
        };
        let report = metering::meter(
            participant,
            room_type,
            now,
            self.services.ledger.as_ref(),
            &self.services.policy,
        )
        .await?;

        let Some(participant) = self.state.participants.remove(connection_id) else {
            return Ok(Outcome::Denied(DenialReason::ParticipantNotFound));
        };
        self.services.metrics.participants_removed(1);
        self.queue_audit(AuditRecord::ParticipantLeft {
            departure: ParticipantDeparture {
                connection_id: participant.connection_id.clone(),
                left_at: now,
                debited_seconds: participant.debited_seconds,
                reason: LeaveReason::Voluntary,
            },
        });

        let room_closed = self.state.participants.is_empty();
        if room_closed {
            self.close_room(now, "last_participant_left");
        }
        self.commit().await?;

        info!(
            target: "rc.actor.room",
            room_id = %self.room_id,
            connection_id = %connection_id,
            debited_seconds = participant.debited_seconds,
            room_closed,
            "Participant left"
        );

        Ok(Outcome::Granted(LeaveResult {
            total_debited_seconds: participant.debited_seconds,
            remaining_seconds: report.remaining_seconds,
            room_closed,
        }))
    }

    async fn handle_close(
        &mut self,
        initiator_connection_id: Option<&str>,
    ) -> Result<Outcome<CloseResult>, RoomError> {
        let Some(room) = self.state.room.as_ref() else {
            return Ok(Outcome::Denied(DenialReason::RoomNotInitialized));
        };
        if room.status == RoomStatus::Closed {
            return Ok(Outcome::Granted(CloseResult {
                initiator: None,
                closed: true,
            }));
        }
        let room_type = room.room_type;
        let now = self.services.clock.now_epoch();

        let mut initiator = None;
        let mut departures = Vec::with_capacity(self.state.participants.len());
        for participant in self.state.participants.values_mut() {
            let report = metering::meter(
                participant,
                room_type,
                now,
                self.services.ledger.as_ref(),
                &self.services.policy,
            )
            .await?;
            departures.push(ParticipantDeparture {
                connection_id: participant.connection_id.clone(),
                left_at: now,
                debited_seconds: participant.debited_seconds,
                reason: LeaveReason::RoomClosed,
            });
            if initiator_connection_id == Some(participant.connection_id.as_str()) {
                initiator = Some(report);
            }
        }

        let removed = self.state.participants.len();
        self.state.participants.clear();
        self.services.metrics.participants_removed(removed);
        if !departures.is_empty() {
            self.queue_audit(AuditRecord::ParticipantsLeft { departures });
        }
        self.close_room(now, "explicit");
        self.commit().await?;

        Ok(Outcome::Granted(CloseResult {
            initiator,
            closed: true,
        }))
    }

    async fn handle_destroy(&mut self) -> Result<(), RoomError> {
        self.alarm.cancel();
        self.services
            .metrics
            .participants_removed(self.state.participants.len());
        self.services
            .metrics
            .audit_pending_changed(self.state.pending_audit.len(), 0);
        self.state = RoomSnapshot::default();

        if let Err(e) = self
            .services
            .store
            .delete(&self.room_id, self.generation)
            .await
        {
            self.note_fenced(&e);
            return Err(e);
        }
        self.services.registry.purge(&self.room_id).await?;

        info!(target: "rc.actor.room", room_id = %self.room_id, "Room destroyed");
        Ok(())
    }

    fn state_view(&self) -> RoomStateView {
        RoomStateView {
            room_id: self.room_id.clone(),
            status: self.state.status(),
            room: self.state.room.clone(),
            participants: self.state.participants.values().cloned().collect(),
            tick_armed: self.alarm.is_armed(),
            next_tick_at: self.state.next_tick_at,
            pending_audit: self.state.pending_audit.len(),
            rejected_audit: self.state.rejected_audit.len(),
            generation: self.generation,
        }
    }

    // ------------------------------------------------------------------
    // Tick
    // ------------------------------------------------------------------

    async fn handle_tick(&mut self) {
        self.cancel_tick();

        match self.run_tick().await {
            Ok(summary) => {
                debug!(
                    target: "rc.actor.room",
                    room_id = %self.room_id,
                    metered = summary.metered,
                    reaped = summary.reaped,
                    closed = summary.closed,
                    "Tick complete"
                );
            }
            Err(e) => {
                error!(
                    target: "rc.actor.room",
                    room_id = %self.room_id,
                    error = %e,
                    "Tick failed, will retry next interval"
                );
                metrics::record_error("tick", e.error_code());

                if self.state.status() == RoomStatus::Active && !self.fenced_out {
                    let now = self.services.clock.now_epoch();
                    self.arm_tick(now);
                    if let Err(e) = self.persist().await {
                        warn!(
                            target: "rc.actor.room",
                            room_id = %self.room_id,
                            error = %e,
                            "Failed to persist after tick failure"
                        );
                    }
                }
            }
        }
    }

    async fn run_tick(&mut self) -> Result<TickSummary, RoomError> {
        let mut summary = TickSummary::default();
        if self.state.status() != RoomStatus::Active {
            return Ok(summary);
        }
        let Some(room_type) = self.room_type() else {
            return Ok(summary);
        };
        let now = self.services.clock.now_epoch();

        if self.state.participants.is_empty() {
            self.close_room(now, "empty_on_tick");
            self.commit().await?;
            summary.closed = true;
            return Ok(summary);
        }

        let stale_after = self.services.policy.stale_after_seconds();
        let stale: Vec<String> = self
            .state
            .participants
            .values()
            .filter(|p| now.saturating_sub(p.last_seen_at) > stale_after)
            .map(|p| p.connection_id.clone())
            .collect();

        for connection_id in stale {
            if let Some(participant) = self.state.participants.get_mut(&connection_id) {
                metering::meter(
                    participant,
                    room_type,
                    now,
                    self.services.ledger.as_ref(),
                    &self.services.policy,
                )
                .await?;
            }
            if let Some(participant) = self.state.participants.remove(&connection_id) {
                self.services.metrics.participants_removed(1);
                metrics::record_participant_reaped();
                warn!(
                    target: "rc.actor.room",
                    room_id = %self.room_id,
                    connection_id = %connection_id,
                    silent_seconds = now.saturating_sub(participant.last_seen_at),
                    "Reaped stale participant"
                );
                self.queue_audit(AuditRecord::ParticipantLeft {
                    departure: ParticipantDeparture {
                        connection_id,
                        left_at: now,
                        debited_seconds: participant.debited_seconds,
                        reason: LeaveReason::Stale,
                    },
                });
                summary.reaped += 1;
            }
        }

        if self.state.participants.is_empty() {
            self.close_room(now, "empty_on_tick");
            self.commit().await?;
            summary.closed = true;
            return Ok(summary);
        }

        for participant in self.state.participants.values_mut() {
            let report = metering::meter(
                participant,
                room_type,
                now,
                self.services.ledger.as_ref(),
                &self.services.policy,
            )
            .await?;
            participant.pending_events.extend(report.events);
            summary.metered += 1;
        }

        self.arm_tick(now);
        self.commit().await?;
        Ok(summary)
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn room_type(&self) -> Option<RoomType> {
        self.state.room.as_ref().map(|room| room.room_type)
    }

    fn renewal_hints(&self, room_type: RoomType) -> Option<RenewalHints> {
        room_type.is_metered().then(|| RenewalHints {
            renew_after_seconds: self.services.policy.renew_after_seconds,
            heartbeat_interval_seconds: self.services.policy.heartbeat_interval_seconds,
        })
    }

    async fn issue_credential(
        &self,
        channel_name: &str,
        external_uid: u32,
        room_type: RoomType,
    ) -> Result<IssuedCredential, RoomError> {
        let profile = room_type.credential_profile();
        let request = CredentialRequest {
            channel_name: channel_name.to_string(),
            external_uid,
            profile,
            ttl_seconds: self.services.policy.ttl_seconds(profile),
        };
        self.services.issuer.issue(&request).await
    }

    async fn read_balance(
        &self,
        room_type: RoomType,
        wallet: &Wallet,
    ) -> Result<Option<i64>, RoomError> {
        if !room_type.is_metered() {
            return Ok(None);
        }
        let balance = self.services.ledger.get_balance(wallet).await?;
        Ok(Some(balance.remaining_seconds))
    }

    fn arm_tick(&mut self, now: i64) {
        if self.alarm.arm() {
            let interval = i64::try_from(self.alarm.interval().as_secs()).unwrap_or(i64::MAX);
            self.state.next_tick_at = Some(now.saturating_add(interval));
        }
    }

    fn cancel_tick(&mut self) {
        self.alarm.cancel();
        self.state.next_tick_at = None;
    }

    fn close_room(&mut self, now: i64, reason: &'static str) {
        self.cancel_tick();
        if let Some(room) = self.state.room.as_mut() {
            room.status = RoomStatus::Closed;
            room.closed_at = Some(now);
        }
        self.queue_audit(AuditRecord::RoomClosed { closed_at: now });
        metrics::record_room_closed(reason);
        info!(
            target: "rc.actor.room",
            room_id = %self.room_id,
            reason,
            "Room closed"
        );
    }

    fn queue_audit(&mut self, record: AuditRecord) {
        let before = self.state.pending_audit.len();
        self.state.pending_audit.push_back(record);
        self.services
            .metrics
            .audit_pending_changed(before, before + 1);
    }

    /// Deliver queued audit records in order, stopping at the first failure.
    async fn flush_audit(&mut self) {
        let before = self.state.pending_audit.len();
        while let Some(record) = self.state.pending_audit.front() {
            if let Err(e) = self.services.registry.record(&self.room_id, record).await {
                if !e.is_retryable() {
                    error!(
                        target: "rc.actor.room",
                        room_id = %self.room_id,
                        kind = record.kind(),
                        record = ?record,
                        error = %e,
                        "Registry rejected audit record, setting it aside"
                    );
                    metrics::record_audit_rejected(record.kind());
                    if let Some(rejected) = self.state.pending_audit.pop_front() {
                        if self.state.rejected_audit.len() >= MAX_REJECTED_AUDIT {
                            self.state.rejected_audit.pop_front();
                        }
                        self.state.rejected_audit.push_back(rejected);
                    }
                    continue;
                }
                warn!(
                    target: "rc.actor.room",
                    room_id = %self.room_id,
                    kind = record.kind(),
                    pending = self.state.pending_audit.len(),
                    error = %e,
                    "Registry write failed, keeping record queued"
                );
                metrics::record_audit_flush_failure();
                break;
            }
            self.state.pending_audit.pop_front();
        }
        self.services
            .metrics
            .audit_pending_changed(before, self.state.pending_audit.len());
    }

    async fn persist(&mut self) -> Result<(), RoomError> {
        let result = self
            .services
            .store
            .save(&self.room_id, self.generation, &self.state)
            .await;
        if let Err(e) = &result {
            self.note_fenced(e);
            error!(
                target: "rc.actor.room",
                room_id = %self.room_id,
                error = %e,
                "Failed to persist room snapshot"
            );
        }
        result
    }

    async fn commit(&mut self) -> Result<(), RoomError> {
        self.flush_audit().await;
        self.persist().await
    }

    fn note_fenced(&mut self, error: &RoomError) {
        if matches!(error, RoomError::FencedOut(_)) {
            self.fenced_out = true;
        }
    }
}

/// Prepend tick-raised events to a report, oldest first.
fn deliver_pending(participant: &mut ParticipantRecord, report: &mut MeteringReport) {
    if participant.pending_events.is_empty() {
        return;
    }
    let mut events = std::mem::take(&mut participant.pending_events);
    events.append(&mut report.events);
    report.events = events;
}

fn observe<T>(operation: &str, result: &Result<T, RoomError>) {
    if let Err(e) = result {
        metrics::record_error(operation, e.error_code());
    }
}
