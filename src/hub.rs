//! Configuration hub: single point of truth for live settings.
//!
//! Owns the feature set and the thermal profile set behind one
//! reader/writer lock, validates and merges updates, and fans the result
//! out to every subscribed component. Fanout is fire-and-forget: each
//! subscriber gets its updates on a detached task, so a slow or failing
//! subscriber never blocks the caller or its siblings. By the time
//! [`ConfigHub::set`] returns, notifications are scheduled, not delivered.

use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::{
    error::Error,
    persist::Registry,
    settings::Features,
    thermal::{Profile, default_profiles},
};

const PERSIST_KEY: &str = "Features";

/// One configuration push. Features and profiles are announced as
/// separate events, independently and in no guaranteed order.
#[derive(Debug, Clone)]
pub enum Update {
    Features(Features),
    Profiles(Vec<Profile>),
}

/// A component interested in configuration changes.
#[async_trait]
pub trait Updatable: Send + Sync {
    fn name(&self) -> &'static str;
    async fn config_update(&self, update: Update);
}

/// Full configuration snapshot, always populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configs {
    pub features: Features,
    pub profiles: Vec<Profile>,
}

struct HubState {
    features: Features,
    profiles: Vec<Profile>,
    subscribers: Vec<Arc<dyn Updatable>>,
}

/// Single writer, many readers. Subscribers are swapped wholesale on
/// subsystem restart via [`ConfigHub::hot_reload`].
pub struct ConfigHub {
    state: RwLock<HubState>,
}

impl Default for ConfigHub {
    fn default() -> Self {
        Self::new(Features::default())
    }
}

impl ConfigHub {
    /// Creates a hub seeded with `features` and the compiled-in profiles.
    pub fn new(features: Features) -> Self {
        Self {
            state: RwLock::new(HubState {
                features,
                profiles: default_profiles(),
                subscribers: Vec::new(),
            }),
        }
    }

    /// Read-only snapshot of the live configuration.
    pub async fn current(&self) -> Configs {
        let state = self.state.read().await;
        Configs {
            features: state.features.clone(),
            profiles: state.profiles.clone(),
        }
    }

    /// Validates and merges a configuration request, then announces the
    /// result to all subscribers and returns the merged snapshot.
    ///
    /// Merging is whole-Features / whole-Profiles: a `None` field leaves
    /// that side untouched. Supplying neither is [`Error::InvalidRequest`]
    /// and the stored configuration is unchanged.
    pub async fn set(
        &self,
        features: Option<Features>,
        profiles: Option<Vec<Profile>>,
    ) -> Result<Configs, Error> {
        if features.is_none() && profiles.is_none() {
            return Err(Error::InvalidRequest(
                "either features or profiles must be specified",
            ));
        }
        if let Some(profiles) = &profiles {
            for profile in profiles {
                profile.validate()?;
            }
        }

        let mut state = self.state.write().await;
        if let Some(features) = features {
            state.features = features;
        }
        if let Some(profiles) = profiles {
            state.profiles = profiles;
        }
        Self::announce(&state);

        Ok(Configs {
            features: state.features.clone(),
            profiles: state.profiles.clone(),
        })
    }

    /// Atomically replaces the subscriber list and immediately
    /// re-announces the current configuration to the new list.
    ///
    /// Used when the supervised subsystem restarts: its freshly built
    /// components need the live settings re-pushed.
    pub async fn hot_reload(&self, subscribers: Vec<Arc<dyn Updatable>>) {
        let mut state = self.state.write().await;
        state.subscribers = subscribers;
        Self::announce(&state);
    }

    fn announce(state: &HubState) {
        let features = Update::Features(state.features.clone());
        let profiles = Update::Profiles(state.profiles.clone());
        for subscriber in &state.subscribers {
            debug!("announcing configuration to \"{}\"", subscriber.name());
            for update in [features.clone(), profiles.clone()] {
                let subscriber = subscriber.clone();
                tokio::spawn(async move { subscriber.config_update(update).await });
            }
        }
    }
}

#[async_trait]
impl Registry for ConfigHub {
    fn name(&self) -> &'static str {
        PERSIST_KEY
    }

    async fn value(&self) -> Vec<u8> {
        let state = self.state.read().await;
        serde_json::to_vec(&state.features).unwrap_or_default()
    }

    /// Restores persisted features. Profiles are deliberately not
    /// persisted and reset to compiled-in defaults every process start.
    async fn load(&self, raw: &[u8]) -> Result<(), Error> {
        if raw.is_empty() {
            return Ok(());
        }
        let features: Features = serde_json::from_slice(raw).map_err(|e| Error::Decode {
            name: PERSIST_KEY,
            reason: e.to_string(),
        })?;
        self.state.write().await.features = features;
        Ok(())
    }

    async fn apply(&self) -> Result<(), Error> {
        let state = self.state.read().await;
        Self::announce(&state);
        Ok(())
    }

    async fn close(&self) -> Result<(), Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;
    use std::time::Duration;

    struct RecordingSubscriber {
        name: &'static str,
        seen: Mutex<Vec<Update>>,
    }

    impl RecordingSubscriber {
        fn new(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                seen: Mutex::new(Vec::new()),
            })
        }

        fn features_seen(&self) -> usize {
            self.seen
                .lock()
                .unwrap()
                .iter()
                .filter(|u| matches!(u, Update::Features(_)))
                .count()
        }

        fn profiles_seen(&self) -> usize {
            self.seen
                .lock()
                .unwrap()
                .iter()
                .filter(|u| matches!(u, Update::Profiles(_)))
                .count()
        }
    }

    #[async_trait]
    impl Updatable for RecordingSubscriber {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn config_update(&self, update: Update) {
            self.seen.lock().unwrap().push(update);
        }
    }

    /// Dispatch is fire-and-forget, so tests poll for convergence rather
    /// than assuming delivery when `set` returns.
    async fn wait_until(condition: impl Fn() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not met within bounded wait");
    }

    #[tokio::test]
    async fn set_with_neither_field_is_invalid_and_changes_nothing() {
        let hub = ConfigHub::default();
        let before = hub.current().await;

        let result = hub.set(None, None).await;
        assert!(matches!(result, Err(Error::InvalidRequest(_))));
        assert_eq!(hub.current().await, before);
    }

    #[tokio::test]
    async fn set_features_only_leaves_profiles_untouched() {
        let hub = ConfigHub::default();
        let profiles_before = hub.current().await.profiles;

        let mut features = Features::default();
        features.rog_remap = vec!["htop".into()];
        let snapshot = hub.set(Some(features.clone()), None).await.unwrap();

        assert_eq!(snapshot.features, features);
        assert_eq!(snapshot.profiles, profiles_before);
        assert_eq!(hub.current().await.profiles, profiles_before);
    }

    #[tokio::test]
    async fn set_rejects_malformed_profiles() {
        let hub = ConfigHub::default();
        let mut profiles = default_profiles();
        profiles[0].cpu_fan_curve = "very hot:very fast".into();

        let result = hub.set(None, Some(profiles)).await;
        assert!(matches!(result, Err(Error::InvalidRequest(_))));
        assert_eq!(hub.current().await.profiles, default_profiles());
    }

    #[tokio::test]
    async fn set_eventually_delivers_both_update_kinds_to_every_subscriber() {
        let hub = ConfigHub::default();
        let first = RecordingSubscriber::new("first");
        let second = RecordingSubscriber::new("second");
        hub.hot_reload(vec![first.clone(), second.clone()]).await;
        wait_until(|| first.features_seen() == 1 && second.features_seen() == 1).await;

        hub.set(Some(Features::default()), None).await.unwrap();

        wait_until(|| {
            [&first, &second]
                .iter()
                .all(|s| s.features_seen() == 2 && s.profiles_seen() == 2)
        })
        .await;
    }

    #[tokio::test]
    async fn hot_reload_announces_to_new_list_and_never_to_removed_members() {
        let hub = ConfigHub::default();
        let old = RecordingSubscriber::new("old");
        hub.hot_reload(vec![old.clone()]).await;
        wait_until(|| old.features_seen() == 1 && old.profiles_seen() == 1).await;

        let new = RecordingSubscriber::new("new");
        hub.hot_reload(vec![new.clone()]).await;
        wait_until(|| new.features_seen() == 1 && new.profiles_seen() == 1).await;

        hub.set(Some(Features::default()), None).await.unwrap();
        wait_until(|| new.features_seen() == 2).await;

        // The removed subscriber saw only the announcements made while it
        // was registered.
        assert_eq!(old.features_seen(), 1);
        assert_eq!(old.profiles_seen(), 1);
    }

    #[tokio::test]
    async fn features_persist_but_profiles_reset_to_defaults() {
        let hub = ConfigHub::default();
        let mut features = Features::default();
        features.auto_thermal.enabled = true;
        let mut profiles = default_profiles();
        profiles.truncate(1);
        hub.set(Some(features.clone()), Some(profiles)).await.unwrap();

        let raw = Registry::value(&hub).await;
        assert!(!raw.is_empty());

        let restored = ConfigHub::default();
        restored.load(&raw).await.unwrap();
        let current = restored.current().await;
        assert_eq!(current.features, features);
        // Known asymmetry: the profile set is not persisted.
        assert_eq!(current.profiles, default_profiles());
    }

    #[tokio::test]
    async fn malformed_persisted_features_yield_decode_error_and_keep_defaults() {
        let hub = ConfigHub::default();
        let result = hub.load(b"{not json").await;
        assert!(matches!(result, Err(Error::Decode { .. })));
        assert_eq!(hub.current().await.features, Features::default());
    }

    #[tokio::test]
    async fn apply_reannounces_current_configuration() {
        let hub = ConfigHub::default();
        let subscriber = RecordingSubscriber::new("sub");
        hub.hot_reload(vec![subscriber.clone()]).await;
        wait_until(|| subscriber.features_seen() == 1).await;

        Registry::apply(&hub).await.unwrap();
        wait_until(|| subscriber.features_seen() == 2 && subscriber.profiles_seen() == 2).await;
    }

    #[tokio::test]
    async fn empty_load_keeps_current_state() {
        let hub = ConfigHub::default();
        hub.load(&[]).await.unwrap();
        assert_eq!(hub.current().await.features, Features::default());
    }
}
