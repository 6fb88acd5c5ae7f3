use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::{Map, Value};

use crate::driver::{RoomListing, SortOptions};
use crate::errors::MatchmakeError;
use crate::room::{spawn_room, RoomHandle, RoomHandler, RoomSpawnArgs};

/// Per-room-type matchmaking settings supplied at registration.
#[derive(Debug, Clone, Default)]
pub struct RoomSettings {
    /// Merged under the caller's options before `on_create`.
    pub default_options: Value,
    /// Option fields copied into the listing and matched on join queries.
    pub filter_by: Vec<String>,
    /// Listing sort applied by `find_one_room_available`.
    pub sort_by: SortOptions,
}

type Spawner = Box<
    dyn Fn(RoomSpawnArgs) -> BoxFuture<'static, Result<(RoomHandle, RoomListing), MatchmakeError>>
        + Send
        + Sync,
>;

/// An immutable, process-wide room-type registration.
pub(crate) struct RoomRegistration {
    pub room_name: String,
    pub settings: RoomSettings,
    spawner: Spawner,
}

impl RoomRegistration {
    pub fn new<H, F>(room_name: &str, factory: F, settings: RoomSettings) -> Self
    where
        H: RoomHandler,
        F: Fn() -> H + Send + Sync + 'static,
    {
        Self {
            room_name: room_name.to_string(),
            settings,
            spawner: Box::new(move |args| spawn_room(factory(), args).boxed()),
        }
    }

    pub async fn spawn(
        &self,
        args: RoomSpawnArgs,
    ) -> Result<(RoomHandle, RoomListing), MatchmakeError> {
        (self.spawner)(args).await
    }

    /// Handler defaults overlaid with the caller's options.
    pub fn merge_options(&self, options: &Value) -> Value {
        let mut merged = self
            .settings
            .default_options
            .as_object()
            .cloned()
            .unwrap_or_default();
        if let Some(overrides) = options.as_object() {
            for (key, value) in overrides {
                merged.insert(key.clone(), value.clone());
            }
        }
        Value::Object(merged)
    }

    /// `filter_by` option fields captured into the listing at creation.
    pub fn filter_extras(&self, options: &Value) -> Map<String, Value> {
        let mut extras = Map::new();
        if let Some(object) = options.as_object() {
            for field in &self.settings.filter_by {
                if let Some(value) = object.get(field) {
                    extras.insert(field.clone(), value.clone());
                }
            }
        }
        extras
    }

    /// Rendezvous key shared by concurrent creators of equivalent rooms.
    pub fn concurrency_key(&self, options: &Value) -> String {
        if self.settings.filter_by.is_empty() {
            return "all".to_string();
        }
        let parts: Vec<String> = self
            .settings
            .filter_by
            .iter()
            .map(|field| {
                options
                    .get(field)
                    .map(Value::to_string)
                    .unwrap_or_else(|| "-".to_string())
            })
            .collect();
        parts.join(",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct NullRoom;

    #[async_trait::async_trait]
    impl RoomHandler for NullRoom {
        type State = ();
    }

    fn registration(settings: RoomSettings) -> RoomRegistration {
        RoomRegistration::new("test", || NullRoom, settings)
    }

    #[test]
    fn merge_options_lets_caller_override_defaults() {
        let reg = registration(RoomSettings {
            default_options: json!({"mode": "casual", "map": "atoll"}),
            ..RoomSettings::default()
        });
        let merged = reg.merge_options(&json!({"mode": "ranked"}));
        assert_eq!(merged, json!({"mode": "ranked", "map": "atoll"}));
    }

    #[test]
    fn filter_extras_capture_only_declared_fields() {
        let reg = registration(RoomSettings {
            filter_by: vec!["mode".to_string()],
            ..RoomSettings::default()
        });
        let extras = reg.filter_extras(&json!({"mode": "ranked", "secret": 1}));
        assert_eq!(extras.len(), 1);
        assert_eq!(extras.get("mode"), Some(&json!("ranked")));
    }

    #[test]
    fn concurrency_key_varies_with_filtered_options() {
        let plain = registration(RoomSettings::default());
        assert_eq!(plain.concurrency_key(&json!({})), "all");

        let filtered = registration(RoomSettings {
            filter_by: vec!["mode".to_string()],
            ..RoomSettings::default()
        });
        let ranked = filtered.concurrency_key(&json!({"mode": "ranked"}));
        let casual = filtered.concurrency_key(&json!({"mode": "casual"}));
        assert_ne!(ranked, casual);
    }
}
