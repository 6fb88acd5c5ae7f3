//! Serializer boundary between room state and the wire.
//!
//! The room only asks three things of a serializer: a full-state snapshot
//! for joining clients, a delta (if anything changed) at patch rate, and an
//! optional handshake blob advertised in the `JOIN_ROOM` frame. Delta-based
//! schema replication lives behind this same seam; the stock implementations
//! are a whole-snapshot JSON serializer and a no-op for stateless rooms.

use serde::Serialize;

pub trait Serializer<S>: Send {
    /// Identifier sent to clients in the `JOIN_ROOM` frame.
    fn id(&self) -> &'static str;

    /// Forget any cached encoding; the next patch starts from scratch.
    fn reset(&mut self, state: &S);

    /// Encode the complete state for a newly joined client.
    fn full_state(&mut self, state: &S) -> anyhow::Result<Vec<u8>>;

    /// Encode what changed since the previous patch, or `None` when nothing
    /// did. Called once per patch tick; delivery fan-out is the room's job.
    fn patch(&mut self, state: &S) -> anyhow::Result<Option<Vec<u8>>>;

    /// Optional schema handshake delivered with `JOIN_ROOM`.
    fn handshake(&self) -> Option<Vec<u8>> {
        None
    }
}

/// Whole-snapshot serializer: a patch is the full JSON encoding, emitted only
/// when it differs from the previous tick.
#[derive(Default)]
pub struct JsonSerializer {
    previous: Option<Vec<u8>>,
}

impl JsonSerializer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<S: Serialize> Serializer<S> for JsonSerializer {
    fn id(&self) -> &'static str {
        "json"
    }

    fn reset(&mut self, _state: &S) {
        self.previous = None;
    }

    fn full_state(&mut self, state: &S) -> anyhow::Result<Vec<u8>> {
        let encoded = serde_json::to_vec(state)?;
        // the snapshot just delivered becomes the patch baseline
        self.previous = Some(encoded.clone());
        Ok(encoded)
    }

    fn patch(&mut self, state: &S) -> anyhow::Result<Option<Vec<u8>>> {
        let encoded = serde_json::to_vec(state)?;
        if self.previous.as_deref() == Some(encoded.as_slice()) {
            return Ok(None);
        }
        self.previous = Some(encoded.clone());
        Ok(Some(encoded))
    }
}

/// Serializer for rooms that do not replicate state.
#[derive(Default)]
pub struct NoneSerializer;

impl<S> Serializer<S> for NoneSerializer {
    fn id(&self) -> &'static str {
        "none"
    }

    fn reset(&mut self, _state: &S) {}

    fn full_state(&mut self, _state: &S) -> anyhow::Result<Vec<u8>> {
        Ok(Vec::new())
    }

    fn patch(&mut self, _state: &S) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct CounterState {
        value: u32,
    }

    #[test]
    fn patch_is_emitted_only_on_change() {
        let mut serializer = JsonSerializer::new();
        let mut state = CounterState { value: 1 };

        let first = serializer.patch(&state).unwrap();
        assert!(first.is_some());
        assert!(serializer.patch(&state).unwrap().is_none());

        state.value = 2;
        let second = serializer.patch(&state).unwrap().unwrap();
        assert_eq!(second, serde_json::to_vec(&state).unwrap());
    }

    #[test]
    fn reset_forces_the_next_patch() {
        let mut serializer = JsonSerializer::new();
        let state = CounterState { value: 1 };
        assert!(serializer.patch(&state).unwrap().is_some());
        Serializer::<CounterState>::reset(&mut serializer, &state);
        assert!(serializer.patch(&state).unwrap().is_some());
    }

    #[test]
    fn none_serializer_never_patches() {
        let mut serializer = NoneSerializer;
        let state = CounterState { value: 1 };
        assert_eq!(Serializer::<CounterState>::id(&serializer), "none");
        assert!(serializer.patch(&state).unwrap().is_none());
        assert!(serializer.full_state(&state).unwrap().is_empty());
    }
}
