//! Per-process matchmaking coordinator.
//!
//! Owns the room-type registrations, the local rooms map and the process
//! identity; decides which process hosts a new room; and routes room method
//! calls to their owners over the presence-backed IPC bus. One matchmaker is
//! constructed per process; a fleet is formed by pointing every matchmaker at
//! the same presence and driver.

mod registry;

pub use registry::RoomSettings;

use dashmap::DashMap;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::ServerOptions;
use crate::driver::{Conditions, Driver, RoomListing};
use crate::errors::{MatchmakeError, RoomError};
use crate::ipc::{self, IpcError, IpcRequest};
use crate::presence::Presence;
use crate::protocol::{generate_id, ProcessId, RoomId, SessionId};
use crate::room::{RoomEvent, RoomHandle, RoomHandler, RoomSpawnArgs};
use crate::stats::{ProcessStats, Stats};

use registry::RoomRegistration;

/// A successful matchmake: the listing to connect to plus the session id the
/// seat was reserved under.
#[derive(Debug, Clone)]
pub struct ReservedSeat {
    pub room: RoomListing,
    pub session_id: SessionId,
}

type ProcessSelector =
    Box<dyn Fn(&[ProcessStats], &str, &Value) -> Option<ProcessId> + Send + Sync>;

struct LocalRoom {
    handle: RoomHandle,
    inbox_task: JoinHandle<()>,
}

struct MatchmakerInner {
    process_id: ProcessId,
    options: ServerOptions,
    presence: Arc<dyn Presence>,
    driver: Arc<dyn Driver>,
    stats: Stats,
    handlers: std::sync::RwLock<HashMap<String, Arc<RoomRegistration>>>,
    rooms: DashMap<RoomId, LocalRoom>,
    room_events_tx: mpsc::UnboundedSender<RoomEvent>,
    shutting_down: AtomicBool,
    no_active_rooms: Notify,
    selector: std::sync::RwLock<Option<ProcessSelector>>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct Matchmaker {
    inner: Arc<MatchmakerInner>,
}

impl Matchmaker {
    pub async fn new(
        presence: Arc<dyn Presence>,
        driver: Arc<dyn Driver>,
        options: ServerOptions,
    ) -> Self {
        let process_id = Uuid::new_v4().to_string();
        let stats = Stats::new(process_id.clone(), presence.clone(), driver.clone());
        let (room_events_tx, room_events_rx) = mpsc::unbounded_channel();

        let matchmaker = Self {
            inner: Arc::new(MatchmakerInner {
                process_id,
                options,
                presence,
                driver,
                stats,
                handlers: std::sync::RwLock::new(HashMap::new()),
                rooms: DashMap::new(),
                room_events_tx,
                shutting_down: AtomicBool::new(false),
                no_active_rooms: Notify::new(),
                selector: std::sync::RwLock::new(None),
                tasks: std::sync::Mutex::new(Vec::new()),
            }),
        };

        matchmaker.spawn_event_loop(room_events_rx);
        matchmaker.spawn_process_inbox().await;
        // announce ourselves so process selection can pick us immediately
        matchmaker.inner.stats.flush_now().await;

        tracing::info!(process_id = %matchmaker.inner.process_id, "Matchmaker ready");
        matchmaker
    }

    pub fn process_id(&self) -> &str {
        &self.inner.process_id
    }

    pub fn stats(&self) -> Stats {
        self.inner.stats.clone()
    }

    pub fn presence(&self) -> Arc<dyn Presence> {
        self.inner.presence.clone()
    }

    pub fn driver(&self) -> Arc<dyn Driver> {
        self.inner.driver.clone()
    }

    pub fn local_room(&self, room_id: &str) -> Option<RoomHandle> {
        self.inner.rooms.get(room_id).map(|room| room.handle.clone())
    }

    pub fn local_room_count(&self) -> usize {
        self.inner.rooms.len()
    }

    /// Override the default lowest-room-count process selection policy.
    pub fn set_process_selector(
        &self,
        selector: impl Fn(&[ProcessStats], &str, &Value) -> Option<ProcessId> + Send + Sync + 'static,
    ) {
        *self
            .inner
            .selector
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(Box::new(selector));
    }

    // --- registration ---

    /// Register a room type under `room_name`.
    pub fn define<H, F>(&self, room_name: &str, factory: F)
    where
        H: RoomHandler,
        F: Fn() -> H + Send + Sync + 'static,
    {
        self.define_with(room_name, factory, RoomSettings::default());
    }

    pub fn define_with<H, F>(&self, room_name: &str, factory: F, settings: RoomSettings)
    where
        H: RoomHandler,
        F: Fn() -> H + Send + Sync + 'static,
    {
        let registration = Arc::new(RoomRegistration::new(room_name, factory, settings));
        self.inner
            .handlers
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(room_name.to_string(), registration);
        tracing::info!(%room_name, "Room handler defined");
    }

    fn registration(&self, room_name: &str) -> Result<Arc<RoomRegistration>, MatchmakeError> {
        self.inner
            .handlers
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(room_name)
            .cloned()
            .ok_or_else(|| MatchmakeError::NoHandler(room_name.to_string()))
    }

    fn ensure_running(&self) -> Result<(), MatchmakeError> {
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return Err(MatchmakeError::ShuttingDown);
        }
        Ok(())
    }

    // --- public matchmaking surface ---

    /// Join an available room, creating one when none matches.
    pub async fn join_or_create(
        &self,
        room_name: &str,
        options: Value,
        auth: Value,
    ) -> Result<ReservedSeat, MatchmakeError> {
        self.ensure_running()?;
        let registration = self.registration(room_name)?;
        let options = registration.merge_options(&options);

        let mut attempts = 0;
        loop {
            let listing = match self
                .find_one_room_available(&registration, &options)
                .await?
            {
                Some(listing) => listing,
                None => self.create_with_concurrency(&registration, &options).await?,
            };
            match self.reserve_seat_in(&listing, &options, &auth).await {
                Ok(seat) => return Ok(seat),
                Err(MatchmakeError::SeatReservation(_)) if attempts < 2 => {
                    attempts += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Join an available room; never creates one.
    pub async fn join(
        &self,
        room_name: &str,
        options: Value,
        auth: Value,
    ) -> Result<ReservedSeat, MatchmakeError> {
        self.ensure_running()?;
        let registration = self.registration(room_name)?;
        let options = registration.merge_options(&options);

        let mut attempts = 0;
        loop {
            let listing = self
                .find_one_room_available(&registration, &options)
                .await?
                .ok_or_else(|| MatchmakeError::RoomNotFound(room_name.to_string()))?;
            match self.reserve_seat_in(&listing, &options, &auth).await {
                Ok(seat) => return Ok(seat),
                Err(MatchmakeError::SeatReservation(_)) if attempts < 2 => {
                    attempts += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Always create a fresh room, then reserve a seat in it. Explicit
    /// creates skip the join/create rendezvous: every caller gets its own
    /// room.
    pub async fn create(
        &self,
        room_name: &str,
        options: Value,
        auth: Value,
    ) -> Result<ReservedSeat, MatchmakeError> {
        self.ensure_running()?;
        let registration = self.registration(room_name)?;
        let options = registration.merge_options(&options);
        let listing = self.create_room(&registration, &options, false).await?;
        self.reserve_seat_in(&listing, &options, &auth).await
    }

    /// Join a specific room by id, wherever it is hosted.
    pub async fn join_by_id(
        &self,
        room_id: &str,
        options: Value,
        auth: Value,
    ) -> Result<ReservedSeat, MatchmakeError> {
        self.ensure_running()?;
        let mut conditions = Conditions::new();
        conditions.insert("roomId".to_string(), json!(room_id));
        let listing = self
            .inner
            .driver
            .find_one(&conditions, None)
            .await
            .map_err(|error| MatchmakeError::Matchmaking(error.to_string()))?
            .ok_or_else(|| MatchmakeError::RoomNotFound(room_id.to_string()))?;
        self.reserve_seat_in(&listing, &options, &auth).await
    }

    /// Resolve a reconnection token back to its held session.
    pub async fn reconnect(
        &self,
        room_id: &str,
        token: &str,
    ) -> Result<ReservedSeat, MatchmakeError> {
        let response = self
            .remote_room_call(room_id, "_checkReconnection", json!([token]))
            .await
            .map_err(|error| match error {
                MatchmakeError::Matchmaking(_) => MatchmakeError::ReconnectionExpired,
                other => other,
            })?;
        let session_id = response
            .as_str()
            .ok_or(MatchmakeError::ReconnectionExpired)?
            .to_string();

        let mut conditions = Conditions::new();
        conditions.insert("roomId".to_string(), json!(room_id));
        let listing = self
            .inner
            .driver
            .find_one(&conditions, None)
            .await
            .map_err(|error| MatchmakeError::Matchmaking(error.to_string()))?
            .ok_or_else(|| MatchmakeError::RoomNotFound(room_id.to_string()))?;
        Ok(ReservedSeat {
            room: listing,
            session_id,
        })
    }

    /// Public room listing query. Unlisted rooms stay hidden unless the
    /// conditions ask for them explicitly.
    pub async fn query(&self, mut conditions: Conditions) -> Result<Vec<RoomListing>, MatchmakeError> {
        if !conditions.contains_key("unlisted") {
            conditions.insert("unlisted".to_string(), json!(false));
        }
        self.inner
            .driver
            .query(&conditions, None)
            .await
            .map_err(|error| MatchmakeError::Matchmaking(error.to_string()))
    }

    /// Invoke a whitelisted method on a room, local or remote.
    pub async fn remote_room_call(
        &self,
        room_id: &str,
        method: &str,
        args: Value,
    ) -> Result<Value, MatchmakeError> {
        if let Some(handle) = self.local_room(room_id) {
            return handle.remote_call(method, args).await.map_err(|error| match error {
                RoomError::Unavailable(_) => MatchmakeError::RoomNotFound(room_id.to_string()),
                other => MatchmakeError::Matchmaking(other.to_string()),
            });
        }

        let exists = self
            .inner
            .driver
            .has(room_id)
            .await
            .map_err(|error| MatchmakeError::Matchmaking(error.to_string()))?;
        if !exists {
            return Err(MatchmakeError::RoomNotFound(room_id.to_string()));
        }

        ipc::request(
            self.inner.presence.as_ref(),
            &ipc::room_topic(room_id),
            method,
            args,
            ipc::LONG_TIMEOUT,
        )
        .await
        .map_err(|error| match error {
            IpcError::Timeout(timeout) => MatchmakeError::IpcTimeout(timeout),
            IpcError::Remote(message) => MatchmakeError::Matchmaking(message),
            other => MatchmakeError::Matchmaking(other.to_string()),
        })
    }

    // --- seat reservation ---

    async fn reserve_seat_in(
        &self,
        listing: &RoomListing,
        options: &Value,
        auth: &Value,
    ) -> Result<ReservedSeat, MatchmakeError> {
        let session_id = generate_id();
        let reserved = self
            .remote_room_call(
                &listing.room_id,
                "_reserveSeat",
                json!([session_id, options, auth, false]),
            )
            .await?;
        if reserved.as_bool() == Some(true) {
            Ok(ReservedSeat {
                room: listing.clone(),
                session_id,
            })
        } else {
            Err(MatchmakeError::SeatReservation(format!(
                "room {} is full or no longer accepting clients",
                listing.room_id
            )))
        }
    }

    // --- room discovery ---

    async fn find_one_room_available(
        &self,
        registration: &RoomRegistration,
        options: &Value,
    ) -> Result<Option<RoomListing>, MatchmakeError> {
        let mut conditions = Conditions::new();
        conditions.insert("name".to_string(), json!(registration.room_name));
        conditions.insert("locked".to_string(), json!(false));
        conditions.insert("private".to_string(), json!(false));
        conditions.insert("unlisted".to_string(), json!(false));
        for (field, value) in registration.filter_extras(options) {
            conditions.insert(field, value);
        }

        let sort = (!registration.settings.sort_by.is_empty())
            .then_some(&registration.settings.sort_by);
        let candidates = self
            .inner
            .driver
            .query(&conditions, sort)
            .await
            .map_err(|error| MatchmakeError::Matchmaking(error.to_string()))?;
        Ok(candidates.into_iter().find(RoomListing::has_capacity))
    }

    // --- create path ---

    /// Acquire the fleet-wide create slot for this room type. Exactly one
    /// concurrent caller creates; the rest rendezvous on the result list.
    async fn create_with_concurrency(
        &self,
        registration: &RoomRegistration,
        options: &Value,
    ) -> Result<RoomListing, MatchmakeError> {
        let room_name = &registration.room_name;
        let key = registration.concurrency_key(options);
        let counter_key = format!("ch:{room_name}");
        let list_key = format!("l:{room_name}:{key}");
        let max_wait = self.inner.options.max_concurrent_create_wait();

        let in_flight = self
            .inner
            .presence
            .hincrbyex(&counter_key, &key, 1, max_wait.as_secs() * 2)
            .await?;

        if in_flight > 1 {
            // contention: wait for the winner's result
            let popped = self
                .inner
                .presence
                .brpop(&[list_key.clone()], max_wait.as_secs_f64())
                .await?;
            let _ = self.inner.presence.hincrby(&counter_key, &key, -1).await;
            return match popped {
                Some((_, payload)) => decode_rendezvous(&payload),
                None => {
                    // woke after the winner's window: proceed as uncontended
                    tracing::warn!(%room_name, "Create rendezvous timed out; retrying locally");
                    match self.find_one_room_available(registration, options).await? {
                        Some(listing) => Ok(listing),
                        None => self.create_room(registration, options, true).await,
                    }
                }
            };
        }

        let result = self.create_room(registration, options, true).await;

        // fan out one copy of the result per remaining waiter
        let waiting = self
            .inner
            .presence
            .hincrby(&counter_key, &key, -1)
            .await
            .unwrap_or(0)
            .max(0);
        if waiting > 0 {
            let payload = match &result {
                Ok(listing) => serde_json::to_string(listing)
                    .unwrap_or_else(|_| json!({"error": "encode failure"}).to_string()),
                Err(error) => json!({"error": error.to_string()}).to_string(),
            };
            for _ in 0..waiting {
                let _ = self.inner.presence.lpush(&list_key, payload.clone()).await;
            }
        }
        result
    }

    /// The winner's half of the create path: pick a process, create there.
    async fn create_room(
        &self,
        registration: &RoomRegistration,
        options: &Value,
        allow_reuse: bool,
    ) -> Result<RoomListing, MatchmakeError> {
        if allow_reuse {
            if let Some(listing) = self.find_one_room_available(registration, options).await? {
                return Ok(listing);
            }
        }

        let process_id = self.select_process(&registration.room_name, options).await;
        if process_id == self.inner.process_id {
            return self.handle_create_room_local(registration, options).await;
        }

        match ipc::request(
            self.inner.presence.as_ref(),
            &ipc::process_topic(&process_id),
            "handleCreateRoom",
            json!([registration.room_name, options]),
            ipc::LONG_TIMEOUT,
        )
        .await
        {
            Ok(value) => serde_json::from_value(value)
                .map_err(|error| MatchmakeError::Matchmaking(error.to_string())),
            Err(IpcError::Timeout(timeout)) => {
                if self.inner.options.health_checks {
                    tracing::warn!(
                        dead_process = %process_id,
                        "Process unresponsive during create; excluding it and creating locally"
                    );
                    let _ = self.inner.stats.exclude_process(&process_id).await;
                    self.handle_create_room_local(registration, options).await
                } else {
                    Err(MatchmakeError::IpcTimeout(timeout))
                }
            }
            Err(IpcError::Remote(message)) => Err(MatchmakeError::Matchmaking(message)),
            Err(other) => Err(MatchmakeError::Matchmaking(other.to_string())),
        }
    }

    /// Default policy: the process hosting the fewest rooms; self when the
    /// registry is empty. A configured selector overrides this.
    async fn select_process(&self, room_name: &str, options: &Value) -> ProcessId {
        let all = self.inner.stats.fetch_all().await;
        {
            let selector = self
                .inner
                .selector
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if let Some(selector) = selector.as_ref() {
                if let Some(choice) = selector(&all, room_name, options) {
                    return choice;
                }
            }
        }
        all.into_iter()
            .min_by_key(|stats| stats.room_count)
            .map(|stats| stats.process_id)
            .unwrap_or_else(|| self.inner.process_id.clone())
    }

    /// Instantiate a room on this process and wire it into the IPC bus.
    async fn handle_create_room_local(
        &self,
        registration: &RoomRegistration,
        options: &Value,
    ) -> Result<RoomListing, MatchmakeError> {
        self.ensure_running()?;
        let room_id = generate_id();
        let topic = ipc::room_topic(&room_id);
        let subscription = self.inner.presence.subscribe(&topic).await?;

        let args = RoomSpawnArgs {
            room_id: room_id.clone(),
            room_name: registration.room_name.clone(),
            process_id: self.inner.process_id.clone(),
            public_address: self.inner.options.public_address.clone(),
            options: options.clone(),
            filter_extras: registration.filter_extras(options),
            driver: self.inner.driver.clone(),
            events: self.inner.room_events_tx.clone(),
            seat_reservation_time: self.inner.options.seat_reservation_time(),
            patch_rate: self.inner.options.patch_rate(),
            dev_mode: self.inner.options.dev_mode,
        };

        let (handle, listing) = match registration.spawn(args).await {
            Ok(spawned) => spawned,
            Err(error) => {
                let _ = self.inner.presence.unsubscribe(&topic).await;
                return Err(error);
            }
        };

        let inbox_task = self.spawn_room_inbox(subscription, handle.clone());
        self.inner.rooms.insert(
            room_id.clone(),
            LocalRoom {
                handle,
                inbox_task,
            },
        );
        self.inner.stats.increment_room_count();
        tracing::info!(%room_id, room_name = %registration.room_name, "Room created");
        Ok(listing)
    }

    // --- background tasks ---

    fn spawn_event_loop(&self, mut events: mpsc::UnboundedReceiver<RoomEvent>) {
        let weak = Arc::downgrade(&self.inner);
        let task = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(inner) = weak.upgrade() else { break };
                match event {
                    RoomEvent::Join { .. } => inner.stats.increment_ccu(),
                    RoomEvent::Leave { .. } => inner.stats.decrement_ccu(),
                    RoomEvent::Lock { room_id } => {
                        tracing::debug!(%room_id, "Room locked");
                    }
                    RoomEvent::Unlock { room_id } => {
                        tracing::debug!(%room_id, "Room unlocked");
                    }
                    RoomEvent::VisibilityChange { room_id, private } => {
                        tracing::debug!(%room_id, private, "Room visibility changed");
                    }
                    RoomEvent::Dispose { room_id } => {
                        Self::dispose_room(&inner, &room_id).await;
                    }
                }
            }
        });
        self.inner
            .tasks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(task);
    }

    async fn dispose_room(inner: &Arc<MatchmakerInner>, room_id: &str) {
        let Some((_, local)) = inner.rooms.remove(room_id) else {
            return;
        };
        local.inbox_task.abort();
        let _ = inner.presence.unsubscribe(&ipc::room_topic(room_id)).await;
        let remaining = inner.stats.decrement_room_count();
        tracing::info!(%room_id, remaining_rooms = remaining, "Room removed from process");
        if remaining == 0 {
            inner.no_active_rooms.notify_waiters();
        }
    }

    /// Serve matchmaking methods addressed to this process (`p:<pid>`).
    async fn spawn_process_inbox(&self) {
        let topic = ipc::process_topic(&self.inner.process_id);
        let mut subscription = match self.inner.presence.subscribe(&topic).await {
            Ok(subscription) => subscription,
            Err(error) => {
                tracing::error!(%error, "Failed to subscribe process inbox");
                return;
            }
        };
        let weak = Arc::downgrade(&self.inner);
        let task = tokio::spawn(async move {
            while let Some(frame) = subscription.recv().await {
                let Some(request) = IpcRequest::parse(frame) else {
                    continue;
                };
                let Some(inner) = weak.upgrade() else { break };
                let matchmaker = Matchmaker { inner };
                let result = matchmaker.serve_process_request(&request).await;
                let _ = ipc::reply(
                    matchmaker.inner.presence.as_ref(),
                    &request.request_id,
                    result,
                )
                .await;
            }
        });
        self.inner
            .tasks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(task);
    }

    async fn serve_process_request(&self, request: &IpcRequest) -> Result<Value, String> {
        match request.method.as_str() {
            "handleCreateRoom" => {
                let args = request.args.as_array().cloned().unwrap_or_default();
                let room_name = args
                    .first()
                    .and_then(Value::as_str)
                    .ok_or_else(|| "missing room name".to_string())?;
                let options = args.get(1).cloned().unwrap_or(Value::Null);
                let registration = self
                    .registration(room_name)
                    .map_err(|error| error.to_string())?;
                let listing = self
                    .handle_create_room_local(&registration, &options)
                    .await
                    .map_err(|error| error.to_string())?;
                serde_json::to_value(listing).map_err(|error| error.to_string())
            }
            "ping" => Ok(json!("pong")),
            other => Err(format!("unknown matchmaking method `{other}`")),
        }
    }

    /// Serve method invocations addressed to one room (`$<roomId>`).
    fn spawn_room_inbox(
        &self,
        mut subscription: crate::presence::Subscription,
        handle: RoomHandle,
    ) -> JoinHandle<()> {
        let presence = self.inner.presence.clone();
        tokio::spawn(async move {
            while let Some(frame) = subscription.recv().await {
                let Some(request) = IpcRequest::parse(frame) else {
                    continue;
                };
                let result = handle
                    .remote_call(&request.method, request.args)
                    .await
                    .map_err(|error| error.to_string());
                let _ = ipc::reply(presence.as_ref(), &request.request_id, result).await;
            }
        })
    }

    // --- graceful shutdown ---

    /// Drain and stop: remove ourselves from the process registry, lock and
    /// shut every local room down, await quiescence, then release the
    /// presence.
    pub async fn gracefully_shutdown(&self) {
        if self.inner.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!(process_id = %self.inner.process_id, "Graceful shutdown started");

        // stop receiving new rooms before touching existing ones
        self.inner.stats.clear_local_entry().await;

        // register for quiescence before triggering it, so a fast drain
        // cannot slip past us
        let mut waiter = std::pin::pin!(self.inner.no_active_rooms.notified());
        waiter.as_mut().enable();
        let handles: Vec<RoomHandle> = self
            .inner
            .rooms
            .iter()
            .map(|entry| entry.handle.clone())
            .collect();
        for handle in handles {
            handle.before_shutdown(self.inner.options.shutdown_close_code);
        }
        if !self.inner.rooms.is_empty() {
            waiter.await;
        }

        let _ = self
            .inner
            .presence
            .unsubscribe(&ipc::process_topic(&self.inner.process_id))
            .await;
        for task in self
            .inner
            .tasks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .drain(..)
        {
            task.abort();
        }
        self.inner.presence.shutdown().await;
        tracing::info!(process_id = %self.inner.process_id, "Graceful shutdown complete");
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::SeqCst)
    }
}

fn decode_rendezvous(payload: &str) -> Result<RoomListing, MatchmakeError> {
    if let Ok(listing) = serde_json::from_str::<RoomListing>(payload) {
        return Ok(listing);
    }
    let message = serde_json::from_str::<Value>(payload)
        .ok()
        .and_then(|value| {
            value
                .get("error")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| "room creation failed".to_string());
    Err(MatchmakeError::Matchmaking(message))
}
