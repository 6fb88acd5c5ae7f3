use serde_bytes::ByteBuf;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Interval, MissedTickBehavior};
use uuid::Uuid;

use super::client::{ClientSession, ClientState};
use super::commands::{RoomCommand, RoomHandle};
use super::handler::RoomHandler;
use super::{PendingAction, MessageResolution, Room, RoomEvent, RoomLifecycle, SeatReservation};
use crate::driver::{CacheUpdate, Driver, RoomListing};
use crate::errors::{MatchmakeError, RoomError, RoomException};
use crate::protocol::{
    self, ClientFrame, ErrorCode, JoinRoomEnvelope, MessageType, ProcessId, RoomId, SessionId,
    WS_CLOSE_CONSENTED, WS_CLOSE_WITH_ERROR,
};
use crate::serializer::Serializer;
use crate::transport::ClientRef;

/// Everything a room needs at creation, supplied by the matchmaker.
pub struct RoomSpawnArgs {
    pub room_id: RoomId,
    pub room_name: String,
    pub process_id: ProcessId,
    pub public_address: Option<String>,
    /// Merged handler defaults + caller options, passed to `on_create`.
    pub options: Value,
    /// `filter_by` fields captured from the options into the listing.
    pub filter_extras: Map<String, Value>,
    pub driver: Arc<dyn Driver>,
    pub events: mpsc::UnboundedSender<RoomEvent>,
    pub seat_reservation_time: Duration,
    pub patch_rate: Duration,
    pub dev_mode: bool,
}

/// Run `on_create`, publish the listing, and start the room task.
///
/// Returns once the room is fully created (`on_create` completed and the
/// listing is visible), mirroring the create path's requirement that the
/// caller only learns about rooms that actually exist.
pub async fn spawn_room<H: RoomHandler>(
    mut handler: H,
    args: RoomSpawnArgs,
) -> Result<(RoomHandle, RoomListing), MatchmakeError> {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut room = Room::new(
        args.room_id.clone(),
        args.room_name.clone(),
        args.process_id,
        args.public_address,
        args.patch_rate,
        args.seat_reservation_time,
        args.dev_mode,
        args.filter_extras,
        args.events,
        tx.clone(),
    );

    handler
        .on_create(&mut room, args.options)
        .await
        .map_err(|error| MatchmakeError::Matchmaking(error.to_string()))?;

    let listing = room.build_listing();
    let cache = args
        .driver
        .create(listing.clone())
        .await
        .map_err(|error| MatchmakeError::Matchmaking(error.to_string()))?;
    room.cache = Some(cache);
    room.lifecycle = RoomLifecycle::Created;

    let serializer = handler.serializer();
    let task = RoomTask {
        room,
        handler,
        serializer,
        rx,
    };
    tokio::spawn(task.run());

    Ok((
        RoomHandle::new(args.room_id, args.room_name, tx),
        listing,
    ))
}

fn interval_after(period: Duration) -> Interval {
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn tick_opt(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

struct RoomTask<H: RoomHandler> {
    room: Room,
    handler: H,
    serializer: Box<dyn Serializer<H::State>>,
    rx: mpsc::UnboundedReceiver<RoomCommand>,
}

impl<H: RoomHandler> RoomTask<H> {
    async fn run(mut self) {
        let mut timing_generation = self.room.timing_generation;
        let mut patch_interval = interval_after(self.room.patch_rate);
        let mut sim_interval = self.room.simulation_every.map(interval_after);

        loop {
            if self.room.dispose_requested {
                break;
            }
            if self.room.timing_generation != timing_generation {
                timing_generation = self.room.timing_generation;
                patch_interval = interval_after(self.room.patch_rate);
                sim_interval = self.room.simulation_every.map(interval_after);
            }
            tokio::select! {
                biased;
                command = self.rx.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                _ = tick_opt(&mut sim_interval) => self.simulation_tick().await,
                _ = patch_interval.tick() => self.patch_tick().await,
            }
        }

        self.dispose().await;
    }

    async fn handle_command(&mut self, command: RoomCommand) {
        match command {
            RoomCommand::ReserveSeat {
                session_id,
                options,
                auth,
                allow_reconnection,
                reply,
            } => {
                let reserved = self
                    .reserve_seat(session_id, options, auth, allow_reconnection)
                    .await;
                let _ = reply.send(reserved);
            }
            RoomCommand::Join {
                session_id,
                reference,
                reply,
            } => {
                let result = self.handle_join(session_id, reference).await;
                let _ = reply.send(result);
            }
            RoomCommand::Reconnect {
                token,
                reference,
                reply,
            } => {
                let result = self.handle_reconnect(token, reference).await;
                let _ = reply.send(result);
            }
            RoomCommand::Message { session_id, data } => {
                self.handle_message(session_id, &data).await;
            }
            RoomCommand::Leave { session_id, code } => {
                self.handle_leave(&session_id, code).await;
            }
            RoomCommand::RemoteCall {
                method,
                args,
                reply,
            } => {
                let result = self.handle_remote_call(&method, args).await;
                let _ = reply.send(result);
            }
            RoomCommand::SeatExpired { session_id } => {
                self.expire_seat(&session_id).await;
                self.dispose_if_empty();
            }
            RoomCommand::ReconnectionExpired { token } => {
                self.expire_reconnection(&token).await;
                self.dispose_if_empty();
            }
            RoomCommand::AutoDisposeCheck { generation } => {
                if self.room.auto_dispose_timeout == Some(generation) {
                    self.room.auto_dispose_timeout = None;
                    self.dispose_if_empty();
                }
            }
            RoomCommand::BeforeShutdown { code } => {
                self.room.lock();
                self.handler.on_before_shutdown(&mut self.room, code).await;
                self.process_pending().await;
                self.dispose_if_empty();
            }
        }
    }

    // --- seats ---

    async fn reserve_seat(
        &mut self,
        session_id: SessionId,
        options: Value,
        auth: Value,
        allow_reconnection: bool,
    ) -> bool {
        if self.room.lifecycle == RoomLifecycle::Disposing || self.room.dispose_requested {
            return false;
        }
        if !allow_reconnection && self.room.has_reached_max_clients() {
            return false;
        }

        let token = Uuid::new_v4().to_string();
        self.room.reserved_seats.insert(
            session_id.clone(),
            SeatReservation {
                options,
                auth,
                token,
                consumed: false,
                reconnect: allow_reconnection,
            },
        );
        self.room
            .queue_cache(CacheUpdate::default().inc("clients", 1));
        self.room.auto_lock_check();

        if !allow_reconnection {
            let commands = self.room.commands.clone();
            let ttl = self.room.seat_reservation_time;
            tokio::spawn(async move {
                tokio::time::sleep(ttl).await;
                let _ = commands.send(RoomCommand::SeatExpired { session_id });
            });
        }

        self.process_pending().await;
        tracing::debug!(room_id = %self.room.room_id, "Seat reserved");
        true
    }

    async fn expire_seat(&mut self, session_id: &str) {
        self.expire_seat_inner(session_id);
        self.process_pending().await;
    }

    fn expire_seat_inner(&mut self, session_id: &str) {
        let unconsumed = self
            .room
            .reserved_seats
            .get(session_id)
            .is_some_and(|seat| !seat.consumed);
        if !unconsumed {
            return;
        }
        self.room.reserved_seats.remove(session_id);
        self.room
            .queue_cache(CacheUpdate::default().inc("clients", -1));
        self.room.auto_lock_check();
        tracing::debug!(room_id = %self.room.room_id, %session_id, "Reserved seat expired");
    }

    // --- join / reconnect ---

    async fn handle_join(
        &mut self,
        session_id: SessionId,
        reference: Arc<dyn ClientRef>,
    ) -> Result<(), RoomError> {
        if self.room.lifecycle == RoomLifecycle::Disposing || self.room.dispose_requested {
            return Err(RoomError::Unavailable(self.room.room_id.clone()));
        }
        let Some(seat) = self.room.reserved_seats.get_mut(&session_id) else {
            return Err(RoomError::SeatExpired(session_id));
        };
        if seat.consumed {
            return Err(RoomError::SeatExpired(session_id));
        }
        seat.consumed = true;
        let options = seat.options.clone();
        let auth = seat.auth.clone();
        let token = seat.token.clone();

        let auth_value = match self
            .handler
            .on_auth(&mut self.room, &session_id, &options, &auth)
            .await
        {
            Ok(value) => value,
            Err(error) => {
                let message = error.to_string();
                self.route_exception(RoomException::OnAuth(error));
                reference.send(protocol::encode_error(
                    ErrorCode::AuthFailed.value(),
                    &message,
                ));
                reference.close(WS_CLOSE_WITH_ERROR);
                // rejection consumes the seat
                self.room.reserved_seats.remove(&session_id);
                self.room
                    .queue_cache(CacheUpdate::default().inc("clients", -1));
                self.room.auto_lock_check();
                self.process_pending().await;
                self.dispose_if_empty();
                return Err(RoomError::AuthRejected(message));
            }
        };

        let mut client = ClientSession::new(session_id.clone(), token.clone(), reference);
        client.auth = auth_value.clone();
        self.send_welcome(&client);
        client.state = ClientState::Joined;
        self.room.clients.push(client);

        if let Err(error) = self
            .handler
            .on_join(&mut self.room, &session_id, options, auth_value)
            .await
        {
            self.route_exception(RoomException::OnJoin(error));
            if let Some(client) = self.room.client(&session_id) {
                client.close(WS_CLOSE_WITH_ERROR);
            }
            self.handle_leave(&session_id, WS_CLOSE_WITH_ERROR).await;
            return Err(RoomError::Handler("onJoin rejected the client".into()));
        }

        self.room.emit(RoomEvent::Join {
            room_id: self.room.room_id.clone(),
        });
        self.room.auto_lock_check();
        self.process_pending().await;
        tracing::info!(room_id = %self.room.room_id, %session_id, "Client joined");
        Ok(())
    }

    /// `JOIN_ROOM` handshake plus the full-state frame.
    fn send_welcome(&mut self, client: &ClientSession) {
        let envelope = JoinRoomEnvelope {
            reconnection_token: client.reconnection_token.clone(),
            serializer_id: self.serializer.id().to_string(),
            handshake: self.serializer.handshake().map(ByteBuf::from),
        };
        client.send_raw(protocol::encode_join_room(&envelope));
        if let Some(state) = self.handler.state() {
            match self.serializer.full_state(state) {
                Ok(full) => client.send_raw(protocol::encode_room_state(&full)),
                Err(error) => {
                    tracing::warn!(room_id = %self.room.room_id, %error, "Failed to encode full state")
                }
            }
        }
    }

    async fn handle_reconnect(
        &mut self,
        token: String,
        reference: Arc<dyn ClientRef>,
    ) -> Result<SessionId, RoomError> {
        let Some(mut client) = self.room.reconnections.remove(&token) else {
            return Err(RoomError::BadReconnectionToken);
        };
        client.replace_reference(reference);
        let session_id = client.session_id.clone();

        self.send_welcome(&client);
        client.state = ClientState::Reconnected;
        self.room.clients.push(client);

        if let Err(error) = self.handler.on_reconnect(&mut self.room, &session_id).await {
            // reconnection is the join path
            self.route_exception(RoomException::OnJoin(error));
        }
        self.process_pending().await;
        tracing::info!(room_id = %self.room.room_id, %session_id, "Client reconnected");
        Ok(session_id)
    }

    // --- messages ---

    async fn handle_message(&mut self, session_id: SessionId, data: &[u8]) {
        let Some(client) = self.room.client(&session_id) else {
            return;
        };
        if client.state == ClientState::Leaving {
            return;
        }

        match ClientFrame::decode(data) {
            Err(error) => {
                self.invalid_payload(&session_id, &format!("malformed frame: {error}"))
                    .await;
            }
            Ok(ClientFrame::LeaveRoom) => {
                if let Some(client) = self.room.client(&session_id) {
                    client.close(WS_CLOSE_CONSENTED);
                }
                self.handle_leave(&session_id, WS_CLOSE_CONSENTED).await;
            }
            Ok(ClientFrame::Reconnect { .. }) => {
                // only meaningful as the first frame of a fresh connection
            }
            Ok(ClientFrame::RoomData { ty, payload }) => {
                self.dispatch_message(&session_id, ty, payload.unwrap_or(Value::Null))
                    .await;
            }
            Ok(ClientFrame::RoomDataBytes { ty, data }) => {
                match self.room.resolve_message(&ty) {
                    MessageResolution::Missing => {
                        self.invalid_payload(&session_id, &format!("no handler for `{ty}`"))
                            .await;
                    }
                    _ => {
                        if let Err(error) = self
                            .handler
                            .on_message_bytes(&mut self.room, &session_id, &ty, data)
                            .await
                        {
                            self.message_failure(&session_id, error).await;
                        }
                    }
                }
            }
        }
        self.process_pending().await;
    }

    async fn dispatch_message(&mut self, session_id: &str, ty: MessageType, payload: Value) {
        match self.room.resolve_message(&ty) {
            MessageResolution::Missing => {
                self.invalid_payload(session_id, &format!("no handler for `{ty}`"))
                    .await;
            }
            MessageResolution::Exact | MessageResolution::Wildcard => {
                let validated = match self.room.run_validator(&ty, payload) {
                    Ok(validated) => validated,
                    Err(error) => {
                        self.message_failure(session_id, error).await;
                        return;
                    }
                };
                if let Err(error) = self
                    .handler
                    .on_message(&mut self.room, session_id, &ty, validated)
                    .await
                {
                    self.message_failure(session_id, error).await;
                }
            }
        }
    }

    /// Missing handler or malformed frame: surfaced in dev mode, fatal to the
    /// connection otherwise.
    async fn invalid_payload(&mut self, session_id: &str, message: &str) {
        if self.room.dev_mode {
            if let Some(client) = self.room.client(session_id) {
                client.send_error(ErrorCode::InvalidPayload.value(), message);
            }
            return;
        }
        if let Some(client) = self.room.client(session_id) {
            client.close(WS_CLOSE_WITH_ERROR);
        }
        self.handle_leave(session_id, WS_CLOSE_WITH_ERROR).await;
    }

    /// A validator or message callback threw: route it, close the offending
    /// client, keep the room running.
    async fn message_failure(&mut self, session_id: &str, error: anyhow::Error) {
        self.route_exception(RoomException::OnMessage(error));
        if let Some(client) = self.room.client(session_id) {
            client.close(WS_CLOSE_WITH_ERROR);
        }
        self.handle_leave(session_id, WS_CLOSE_WITH_ERROR).await;
    }

    // --- leave / reconnection holds ---

    async fn handle_leave(&mut self, session_id: &str, code: u16) {
        self.handle_leave_inner(session_id, code).await;
        self.process_pending().await;
        self.dispose_if_empty();
    }

    async fn handle_leave_inner(&mut self, session_id: &str, code: u16) {
        let Some(index) = self
            .room
            .clients
            .iter()
            .position(|client| client.session_id == session_id)
        else {
            return;
        };
        let mut client = self.room.clients.remove(index);
        client.state = ClientState::Leaving;
        let consented = code == WS_CLOSE_CONSENTED;

        self.room.on_leave_concurrent += 1;
        let result = self
            .handler
            .on_leave(&mut self.room, session_id, consented)
            .await;
        self.room.on_leave_concurrent -= 1;
        if let Err(error) = result {
            self.route_exception(RoomException::OnLeave(error));
        }

        if let Some(window) = self.room.pending_holds.remove(session_id) {
            let token = client.reconnection_token.clone();
            self.room.reconnections.insert(token.clone(), client);
            if let Some(delay) = window.timer() {
                let commands = self.room.commands.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = commands.send(RoomCommand::ReconnectionExpired { token });
                });
            }
            tracing::debug!(room_id = %self.room.room_id, %session_id, "Session held for reconnection");
        } else {
            self.finalize_leave(client, code);
        }
    }

    /// Book-keeping after a leave that will not reconnect.
    fn finalize_leave(&mut self, client: ClientSession, code: u16) {
        self.room.reserved_seats.remove(&client.session_id);
        self.room
            .queue_cache(CacheUpdate::default().inc("clients", -1));
        self.room.auto_lock_check();
        self.room.emit(RoomEvent::Leave {
            room_id: self.room.room_id.clone(),
        });
        client.close(code);
        tracing::info!(room_id = %self.room.room_id, session_id = %client.session_id, "Client left");
    }

    /// Grace window elapsed or the hold was rejected.
    async fn expire_reconnection(&mut self, token: &str) {
        self.expire_reconnection_inner(token).await;
        self.process_pending().await;
    }

    async fn expire_reconnection_inner(&mut self, token: &str) {
        let Some(client) = self.room.reconnections.remove(token) else {
            return;
        };
        if let Err(error) = self
            .handler
            .on_reconnection_rejected(&mut self.room, &client.session_id)
            .await
        {
            self.route_exception(RoomException::OnLeave(error));
        }
        self.finalize_leave(client, WS_CLOSE_WITH_ERROR);
    }

    // --- remote calls ---

    async fn handle_remote_call(
        &mut self,
        method: &str,
        args: Value,
    ) -> Result<Value, RoomError> {
        let list = args.as_array().cloned().unwrap_or_default();
        let result = match method {
            "_reserveSeat" => {
                let session_id = list
                    .first()
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| RoomError::UnknownMethod(method.to_string()))?;
                let options = list.get(1).cloned().unwrap_or(Value::Null);
                let auth = list.get(2).cloned().unwrap_or(Value::Null);
                let allow_reconnection = list.get(3).and_then(Value::as_bool).unwrap_or(false);
                let reserved = self
                    .reserve_seat(session_id, options, auth, allow_reconnection)
                    .await;
                Ok(Value::Bool(reserved))
            }
            "_checkReconnection" => {
                let token = list.first().and_then(Value::as_str).unwrap_or_default();
                self.room
                    .reconnections
                    .get(token)
                    .map(|client| Value::String(client.session_id.clone()))
                    .ok_or(RoomError::BadReconnectionToken)
            }
            "lock" => {
                self.room.lock();
                Ok(Value::Null)
            }
            "unlock" => {
                self.room.unlock();
                Ok(Value::Null)
            }
            "setPrivate" => {
                let private = list.first().and_then(Value::as_bool).unwrap_or(true);
                self.room.set_private(private);
                Ok(Value::Null)
            }
            "setMetadata" => {
                let metadata = list.into_iter().next().unwrap_or(Value::Null);
                self.room.set_metadata(metadata);
                Ok(Value::Null)
            }
            "disconnect" => {
                let code = list
                    .first()
                    .and_then(Value::as_u64)
                    .map_or(WS_CLOSE_CONSENTED, |code| code as u16);
                self.room.disconnect(code);
                Ok(Value::Null)
            }
            _ => self
                .handler
                .on_call(&mut self.room, method, args)
                .await
                .map_err(|error| RoomError::Handler(error.to_string())),
        };
        self.process_pending().await;
        result
    }

    // --- ticks ---

    async fn simulation_tick(&mut self) {
        let fired = self.room.clock.tick();
        self.run_timers(fired).await;
        let delta = self.room.clock.delta_time;
        if let Err(error) = self.handler.on_simulation(&mut self.room, delta).await {
            self.route_exception(RoomException::SimulationInterval(error));
        }
        self.process_pending().await;
    }

    async fn patch_tick(&mut self) {
        // the simulation already drives the clock when present
        if self.room.simulation_every.is_none() {
            let fired = self.room.clock.tick();
            self.run_timers(fired).await;
        }

        if self.handler.state().is_some() {
            self.handler.on_before_patch();
            if let Some(state) = self.handler.state() {
                match self.serializer.patch(state) {
                    Ok(Some(patch)) => {
                        let frame = protocol::encode_room_state_patch(&patch);
                        for client in &self.room.clients {
                            if client.is_active() {
                                client.send_raw(frame.clone());
                            }
                        }
                    }
                    Ok(None) => {}
                    Err(error) => {
                        tracing::warn!(room_id = %self.room.room_id, %error, "Serializer failed to compute patch");
                    }
                }
            }
        }

        for frame in std::mem::take(&mut self.room.after_next_patch) {
            for client in &self.room.clients {
                if client.is_active() {
                    client.send_raw(frame.clone());
                }
            }
        }
        self.process_pending().await;
    }

    async fn run_timers(&mut self, fired: smallvec::SmallVec<[crate::clock::TimerId; 4]>) {
        for id in fired {
            if let Err(error) = self.handler.on_timer(&mut self.room, id).await {
                self.route_exception(RoomException::TimedEvent(error));
            }
        }
    }

    // --- pending actions & teardown ---

    fn route_exception(&mut self, error: RoomException) {
        self.handler.on_uncaught_exception(&mut self.room, &error);
    }

    /// Drain actions queued by hooks (disconnects, hold rejections) and flush
    /// coalesced cache updates.
    async fn process_pending(&mut self) {
        loop {
            let actions = std::mem::take(&mut self.room.pending_actions);
            if actions.is_empty() {
                break;
            }
            for action in actions {
                match action {
                    PendingAction::Disconnect(code) => self.process_disconnect(code).await,
                    PendingAction::RevokeHold(token) => {
                        self.expire_reconnection_inner(&token).await;
                    }
                }
            }
        }
        if let Some(update) = self.room.pending_cache.take() {
            if let Some(cache) = self.room.cache.clone() {
                if let Err(error) = cache.update_one(update).await {
                    tracing::warn!(room_id = %self.room.room_id, %error, "Failed to update room cache");
                }
            }
        }
    }

    async fn process_disconnect(&mut self, code: u16) {
        while let Some(session_id) = self
            .room
            .clients
            .first()
            .map(|client| client.session_id.clone())
        {
            if let Some(client) = self.room.client(&session_id) {
                client.close(code);
            }
            self.handle_leave_inner(&session_id, code).await;
        }
        let tokens: Vec<String> = self.room.reconnections.keys().cloned().collect();
        for token in tokens {
            self.expire_reconnection_inner(&token).await;
        }
        let stale: Vec<SessionId> = self
            .room
            .reserved_seats
            .iter()
            .filter(|(_, seat)| !seat.consumed)
            .map(|(session_id, _)| session_id.clone())
            .collect();
        for session_id in stale {
            self.expire_seat_inner(&session_id);
        }
        // a disconnected room disposes regardless of auto_dispose
        if self.room.on_leave_concurrent == 0
            && self.room.clients.is_empty()
            && self.room.reserved_seats.is_empty()
            && self.room.reconnections.is_empty()
        {
            self.room.dispose_requested = true;
        }
    }

    /// True only when nothing keeps the room alive; emits disposal once.
    fn dispose_if_empty(&mut self) -> bool {
        let empty = self.room.on_leave_concurrent == 0
            && self.room.auto_dispose()
            && self.room.auto_dispose_timeout.is_none()
            && self.room.clients.is_empty()
            && self.room.reserved_seats.is_empty()
            && self.room.reconnections.is_empty();
        if empty && !self.room.dispose_requested {
            self.room.dispose_requested = true;
            return true;
        }
        false
    }

    async fn dispose(&mut self) {
        self.room.lifecycle = RoomLifecycle::Disposing;
        self.rx.close();

        if let Some(cache) = self.room.cache.take() {
            if let Err(error) = cache.remove().await {
                tracing::warn!(room_id = %self.room.room_id, %error, "Failed to remove room cache");
            }
        }
        if let Err(error) = self.handler.on_dispose().await {
            self.route_exception(RoomException::OnDispose(error));
        }

        self.room.simulation_every = None;
        self.room.clock.clear();
        self.room.clock.stop();
        self.room.emit(RoomEvent::Dispose {
            room_id: self.room.room_id.clone(),
        });
        tracing::info!(room_id = %self.room.room_id, "Room disposed");
    }
}
