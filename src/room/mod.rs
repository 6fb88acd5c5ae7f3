//! Per-room authoritative runtime.
//!
//! Each room runs as one cooperative task owning all of its state; joins,
//! leaves, messages, ticks, patches and disposal all serialize on that task's
//! command loop. User code participates through the [`RoomHandler`] hooks and
//! the [`Room`] context they receive, never through shared references.

mod client;
mod commands;
mod handler;
mod task;

pub use client::{ClientSession, ClientState};
pub use commands::RoomHandle;
pub use handler::{ReconnectionWindow, RoomHandler};
pub use task::{spawn_room, RoomSpawnArgs};

pub(crate) use commands::RoomCommand;

use bytes::Bytes;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::clock::{Clock, TimerId};
use crate::driver::{CacheUpdate, RoomCacheHandle, RoomListing};
use crate::protocol::{self, MessageType, ProcessId, RoomId, SessionId};

/// Room lifecycle; transitions are monotonic and `Disposing` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomLifecycle {
    Creating,
    Created,
    Disposing,
}

/// Lifecycle notifications the matchmaker consumes for stats and teardown.
#[derive(Debug, Clone)]
pub enum RoomEvent {
    Join { room_id: RoomId },
    Leave { room_id: RoomId },
    Lock { room_id: RoomId },
    Unlock { room_id: RoomId },
    VisibilityChange { room_id: RoomId, private: bool },
    Dispose { room_id: RoomId },
}

/// A provisional, TTL-bounded capacity slot granted before the transport
/// connects. Kept (as consumed) for the client's whole stay so its options
/// and auth survive reconnection.
pub(crate) struct SeatReservation {
    pub options: Value,
    pub auth: Value,
    pub token: String,
    pub consumed: bool,
    /// Seat re-granted for a reconnection hold; exempt from the capacity
    /// check and from the TTL reaper.
    #[allow(dead_code)]
    pub reconnect: bool,
}

type Validator = Box<dyn FnMut(Value) -> anyhow::Result<Value> + Send>;

/// Which message types the room accepts, with optional per-type validators.
#[derive(Default)]
struct MessageRegistry {
    exact: HashMap<MessageType, Option<Validator>>,
    wildcard: bool,
}

pub(crate) enum MessageResolution {
    Exact,
    Wildcard,
    Missing,
}

pub(crate) enum PendingAction {
    Disconnect(u16),
    RevokeHold(String),
}

/// Options for [`Room::broadcast`].
#[derive(Default)]
pub struct BroadcastOptions {
    pub except: Vec<SessionId>,
    pub after_next_patch: bool,
}

impl BroadcastOptions {
    pub fn except(session_id: impl Into<SessionId>) -> Self {
        Self {
            except: vec![session_id.into()],
            ..Self::default()
        }
    }

    pub fn after_next_patch() -> Self {
        Self {
            after_next_patch: true,
            ..Self::default()
        }
    }
}

/// The room context handed to every [`RoomHandler`] hook.
pub struct Room {
    pub room_id: RoomId,
    pub room_name: String,
    pub process_id: ProcessId,
    pub(crate) public_address: Option<String>,
    pub(crate) lifecycle: RoomLifecycle,
    max_clients: u32,
    auto_dispose: bool,
    pub(crate) patch_rate: Duration,
    pub(crate) seat_reservation_time: Duration,
    pub(crate) dev_mode: bool,
    locked: bool,
    explicit_lock: bool,
    private: bool,
    unlisted: bool,
    metadata: Option<Value>,
    filter_extras: Map<String, Value>,
    pub clock: Clock,
    pub(crate) clients: Vec<ClientSession>,
    pub(crate) reserved_seats: HashMap<SessionId, SeatReservation>,
    /// Held sessions awaiting reconnection, keyed by reconnection token.
    /// At most one pending hold per token, ever.
    pub(crate) reconnections: HashMap<String, ClientSession>,
    pub(crate) pending_holds: HashMap<SessionId, ReconnectionWindow>,
    messages: MessageRegistry,
    pub(crate) simulation_every: Option<Duration>,
    pub(crate) timing_generation: u64,
    pub(crate) after_next_patch: Vec<Bytes>,
    pub(crate) pending_actions: Vec<PendingAction>,
    pub(crate) pending_cache: Option<CacheUpdate>,
    pub(crate) cache: Option<std::sync::Arc<dyn RoomCacheHandle>>,
    events: mpsc::UnboundedSender<RoomEvent>,
    pub(crate) commands: mpsc::UnboundedSender<RoomCommand>,
    pub(crate) on_leave_concurrent: u32,
    auto_dispose_generation: u64,
    pub(crate) auto_dispose_timeout: Option<u64>,
    pub(crate) dispose_requested: bool,
}

impl Room {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        room_id: RoomId,
        room_name: String,
        process_id: ProcessId,
        public_address: Option<String>,
        patch_rate: Duration,
        seat_reservation_time: Duration,
        dev_mode: bool,
        filter_extras: Map<String, Value>,
        events: mpsc::UnboundedSender<RoomEvent>,
        commands: mpsc::UnboundedSender<RoomCommand>,
    ) -> Self {
        let mut clock = Clock::new();
        clock.start();
        Self {
            room_id,
            room_name,
            process_id,
            public_address,
            lifecycle: RoomLifecycle::Creating,
            max_clients: u32::MAX,
            auto_dispose: true,
            patch_rate,
            seat_reservation_time,
            dev_mode,
            locked: false,
            explicit_lock: false,
            private: false,
            unlisted: false,
            metadata: None,
            filter_extras,
            clock,
            clients: Vec::new(),
            reserved_seats: HashMap::new(),
            reconnections: HashMap::new(),
            pending_holds: HashMap::new(),
            messages: MessageRegistry::default(),
            simulation_every: None,
            timing_generation: 0,
            after_next_patch: Vec::new(),
            pending_actions: Vec::new(),
            pending_cache: None,
            cache: None,
            events,
            commands,
            on_leave_concurrent: 0,
            auto_dispose_generation: 0,
            auto_dispose_timeout: None,
            dispose_requested: false,
        }
    }

    // --- configuration, usually called from `on_create` ---

    pub fn lifecycle(&self) -> RoomLifecycle {
        self.lifecycle
    }

    pub fn max_clients(&self) -> u32 {
        self.max_clients
    }

    pub fn set_max_clients(&mut self, max_clients: u32) {
        self.max_clients = max_clients.max(1);
        self.queue_cache(CacheUpdate::default().set("maxClients", self.max_clients));
    }

    pub fn auto_dispose(&self) -> bool {
        self.auto_dispose
    }

    pub fn set_auto_dispose(&mut self, auto_dispose: bool) {
        self.auto_dispose = auto_dispose;
    }

    pub fn set_patch_rate(&mut self, patch_rate: Duration) {
        self.patch_rate = patch_rate.max(Duration::from_millis(1));
        self.timing_generation += 1;
    }

    pub fn set_seat_reservation_time(&mut self, time: Duration) {
        self.seat_reservation_time = time;
    }

    /// Replace any previously configured simulation cadence. Each tick calls
    /// `clock.tick()` and then the handler's `on_simulation`.
    pub fn set_simulation_interval(&mut self, every: Duration) {
        self.simulation_every = Some(every.max(Duration::from_millis(1)));
        self.timing_generation += 1;
    }

    pub fn clear_simulation_interval(&mut self) {
        self.simulation_every = None;
        self.timing_generation += 1;
    }

    /// One-shot timer driven by the room clock; the handler's `on_timer`
    /// receives the returned id when it fires.
    pub fn schedule_timeout(&mut self, delay: Duration) -> TimerId {
        self.clock.schedule_timeout(delay)
    }

    /// Repeating timer driven by the room clock, routed to `on_timer`.
    pub fn schedule_interval(&mut self, every: Duration) -> TimerId {
        self.clock.schedule_interval(every)
    }

    pub fn clear_timer(&mut self, id: TimerId) {
        self.clock.clear_timeout(id);
    }

    // --- message registration ---

    /// Accept a message type; payloads are delivered to `on_message` as-is.
    pub fn accept_message(&mut self, ty: impl Into<MessageType>) {
        self.messages.exact.insert(ty.into(), None);
    }

    /// Accept a message type with a validator that may normalize the payload
    /// or reject it by returning an error.
    pub fn accept_message_with(
        &mut self,
        ty: impl Into<MessageType>,
        validator: impl FnMut(Value) -> anyhow::Result<Value> + Send + 'static,
    ) {
        self.messages
            .exact
            .insert(ty.into(), Some(Box::new(validator)));
    }

    /// Accept every message type not explicitly registered.
    pub fn accept_wildcard(&mut self) {
        self.messages.wildcard = true;
    }

    pub(crate) fn resolve_message(&self, ty: &MessageType) -> MessageResolution {
        if self.messages.exact.contains_key(ty) {
            MessageResolution::Exact
        } else if self.messages.wildcard {
            MessageResolution::Wildcard
        } else {
            MessageResolution::Missing
        }
    }

    pub(crate) fn run_validator(&mut self, ty: &MessageType, payload: Value) -> anyhow::Result<Value> {
        match self.messages.exact.get_mut(ty) {
            Some(Some(validator)) => validator(payload),
            _ => Ok(payload),
        }
    }

    // --- clients & delivery ---

    pub fn clients(&self) -> &[ClientSession] {
        &self.clients
    }

    pub fn client(&self, session_id: &str) -> Option<&ClientSession> {
        self.clients
            .iter()
            .find(|client| client.session_id == session_id)
    }

    pub fn client_mut(&mut self, session_id: &str) -> Option<&mut ClientSession> {
        self.clients
            .iter_mut()
            .find(|client| client.session_id == session_id)
    }

    /// Encode once, deliver to every active client except those excluded.
    pub fn broadcast(
        &mut self,
        ty: impl Into<MessageType>,
        payload: Option<Value>,
        options: BroadcastOptions,
    ) {
        let frame = protocol::encode_room_data(ty.into(), payload);
        self.broadcast_raw(frame, options);
    }

    /// Broadcast a raw-bytes message, skipping payload encoding.
    pub fn broadcast_bytes(
        &mut self,
        ty: impl Into<MessageType>,
        data: &[u8],
        options: BroadcastOptions,
    ) {
        let frame = protocol::encode_room_data_bytes(ty.into(), data);
        self.broadcast_raw(frame, options);
    }

    pub(crate) fn broadcast_raw(&mut self, frame: Bytes, options: BroadcastOptions) {
        if options.after_next_patch {
            self.after_next_patch.push(frame);
            return;
        }
        for client in &self.clients {
            if client.is_active() && !options.except.contains(&client.session_id) {
                client.send_raw(frame.clone());
            }
        }
    }

    /// Send to one session; returns false when the session is not present.
    pub fn send(
        &self,
        session_id: &str,
        ty: impl Into<MessageType>,
        payload: Option<Value>,
    ) -> bool {
        match self.client(session_id) {
            Some(client) => {
                client.send(ty, payload);
                true
            }
            None => false,
        }
    }

    // --- locking & visibility ---

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Explicitly lock the room; it stops matching in queries and keeps the
    /// lock even when clients leave.
    pub fn lock(&mut self) {
        self.explicit_lock = true;
        if !self.locked {
            self.locked = true;
            self.queue_cache(CacheUpdate::default().set("locked", true));
            self.emit(RoomEvent::Lock {
                room_id: self.room_id.clone(),
            });
        }
    }

    pub fn unlock(&mut self) {
        self.explicit_lock = false;
        if self.locked {
            self.locked = false;
            self.queue_cache(CacheUpdate::default().set("locked", false));
            self.emit(RoomEvent::Unlock {
                room_id: self.room_id.clone(),
            });
        }
    }

    pub(crate) fn auto_lock_check(&mut self) {
        let at_capacity = self.occupancy() >= self.max_clients as usize;
        if at_capacity && !self.locked {
            self.locked = true;
            self.queue_cache(CacheUpdate::default().set("locked", true));
            self.emit(RoomEvent::Lock {
                room_id: self.room_id.clone(),
            });
        } else if !at_capacity && self.locked && !self.explicit_lock {
            self.locked = false;
            self.queue_cache(CacheUpdate::default().set("locked", false));
            self.emit(RoomEvent::Unlock {
                room_id: self.room_id.clone(),
            });
        }
    }

    pub fn is_private(&self) -> bool {
        self.private
    }

    pub fn set_private(&mut self, private: bool) {
        if self.private != private {
            self.private = private;
            self.queue_cache(CacheUpdate::default().set("private", private));
            self.emit(RoomEvent::VisibilityChange {
                room_id: self.room_id.clone(),
                private,
            });
        }
    }

    pub fn set_unlisted(&mut self, unlisted: bool) {
        self.unlisted = unlisted;
        self.queue_cache(CacheUpdate::default().set("unlisted", unlisted));
    }

    pub fn metadata(&self) -> Option<&Value> {
        self.metadata.as_ref()
    }

    pub fn set_metadata(&mut self, metadata: Value) {
        self.queue_cache(CacheUpdate::default().set("metadata", metadata.clone()));
        self.metadata = Some(metadata);
    }

    // --- capacity ---

    /// Joined clients plus unconsumed seats plus sessions held for
    /// reconnection.
    pub(crate) fn occupancy(&self) -> usize {
        let unconsumed = self
            .reserved_seats
            .values()
            .filter(|seat| !seat.consumed)
            .count();
        self.clients.len() + unconsumed + self.reconnections.len()
    }

    pub fn has_reached_max_clients(&self) -> bool {
        self.occupancy() >= self.max_clients as usize
    }

    // --- reconnection & teardown requests (honored by the task loop) ---

    /// Hold the departing client's seat for a grace window (or until manual
    /// resolution). Call from `on_leave`; when the client returns in time the
    /// handler's `on_reconnect` runs, otherwise the seat is reaped.
    pub fn allow_reconnection(&mut self, session_id: &str, window: ReconnectionWindow) {
        self.pending_holds.insert(session_id.to_string(), window);
    }

    /// Reject a pending reconnection hold (manual mode).
    pub fn reject_reconnection(&mut self, token: &str) {
        self.pending_actions
            .push(PendingAction::RevokeHold(token.to_string()));
    }

    /// Disconnect every client with `code` once the current hook returns.
    pub fn disconnect(&mut self, code: u16) {
        self.pending_actions.push(PendingAction::Disconnect(code));
    }

    /// Defer auto-disposal by `seconds`; the emptiness check re-runs when the
    /// timer fires.
    pub fn reset_auto_dispose_timeout(&mut self, seconds: u64) {
        self.auto_dispose_generation += 1;
        let generation = self.auto_dispose_generation;
        self.auto_dispose_timeout = Some(generation);
        let commands = self.commands.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(seconds.max(1))).await;
            let _ = commands.send(RoomCommand::AutoDisposeCheck { generation });
        });
    }

    // --- internal plumbing ---

    pub(crate) fn queue_cache(&mut self, update: CacheUpdate) {
        let merged = match self.pending_cache.take() {
            Some(mut pending) => {
                for (key, value) in update.set {
                    pending.set.insert(key, value);
                }
                for (key, delta) in update.inc {
                    *pending.inc.entry(key).or_insert(0) += delta;
                }
                pending
            }
            None => update,
        };
        self.pending_cache = Some(merged);
    }

    pub(crate) fn emit(&self, event: RoomEvent) {
        let _ = self.events.send(event);
    }

    /// Listing projected from the current configuration, used at creation.
    pub(crate) fn build_listing(&mut self) -> RoomListing {
        let mut listing = RoomListing::new(
            self.room_id.clone(),
            self.room_name.clone(),
            self.process_id.clone(),
        );
        listing.public_address = self.public_address.clone();
        listing.max_clients = self.max_clients;
        listing.locked = self.locked;
        listing.private = self.private;
        listing.unlisted = self.unlisted;
        listing.metadata = self.metadata.clone();
        listing.extra = std::mem::take(&mut self.filter_extras);
        // configuration queued before the listing exists is folded in here
        if let Some(update) = self.pending_cache.take() {
            let _ = listing.apply(&update);
        }
        listing
    }
}
