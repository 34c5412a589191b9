//! The supervised hardware-control subsystem.
//!
//! A [`Controller`] instance lives for one supervision cycle: the
//! supervisor builds it, runs it, and throws it away on failure. Its
//! semantic state survives that boundary by round-tripping through the
//! [`StateStore`], and its configuration is re-pushed after every rebuild
//! through [`ConfigHub::hot_reload`].

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use log::{error, info, warn};
use tokio::sync::{Mutex, broadcast};
use tokio_util::sync::CancellationToken;

use crate::{
    error::Error,
    event::KeyBus,
    hub::{ConfigHub, Updatable},
    keyboard::{
        self, Control, KeyInjector, NullInjector,
        device_io::{DeviceIO, NullDevice, open_control_endpoint},
    },
    notify::{Notification, NotifySender},
    persist::{Registry, StateStore},
    thermal::{self, LogPlatform, default_profiles},
};

/// How often the control endpoint is polled for pending key presses.
const KEY_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Settings fixed at process start.
#[derive(Debug, Clone, Default)]
pub struct RunConfig {
    /// Open a null device instead of real hardware.
    pub dry_run: bool,
}

/// Everything the controller needs from the long-lived process layer.
#[derive(Clone)]
pub struct Shared {
    pub hub: Arc<ConfigHub>,
    pub store: Arc<StateStore>,
    pub notify: NotifySender,
    pub keys: KeyBus,
}

pub struct Controller {
    kb: Arc<Control<Box<dyn DeviceIO>>>,
    thermal: Arc<thermal::Control>,
    shared: Shared,
    dry_run: bool,
    rog_index: Mutex<usize>,
}

impl Controller {
    /// Opens the keyboard control endpoint and builds the component set.
    ///
    /// Failures here are startup failures: there is no running instance
    /// for the supervisor to retry, so the caller wraps them in
    /// [`Error::StartupFailure`].
    pub fn new(config: &RunConfig, shared: Shared) -> Result<Self, Error> {
        let dev: Box<dyn DeviceIO> = if config.dry_run {
            info!("dry run: using a null keyboard endpoint");
            Box::new(NullDevice)
        } else {
            let api = hidapi::HidApi::new().map_err(|e| Error::DeviceIo(e.to_string()))?;
            Box::new(std::sync::Mutex::new(open_control_endpoint(&api)?))
        };
        let injector: Box<dyn KeyInjector> = Box::new(NullInjector);

        Ok(Self {
            kb: Arc::new(Control::new(dev, injector)?),
            thermal: Arc::new(thermal::Control::new(
                default_profiles(),
                Box::new(LogPlatform),
            )),
            dry_run: config.dry_run,
            rog_index: Mutex::new(0),
            shared,
        })
    }

    /// Restores persisted state, re-subscribes to configuration fanout,
    /// and consumes key events until cancellation or a device error.
    ///
    /// State is snapshotted back to the store on every exit path, so the
    /// next instance (restart or fresh process) picks it up.
    pub async fn run(&self, token: CancellationToken) -> Result<()> {
        let components: Vec<Arc<dyn Registry>> =
            vec![self.kb.clone(), self.thermal.clone()];

        // Even a failed restore falls through to the snapshot and close
        // below; each component instance gets its close exactly once.
        let result = match self.shared.store.restore(&components).await {
            Ok(()) => {
                let subscribers: Vec<Arc<dyn Updatable>> =
                    vec![self.kb.clone(), self.thermal.clone()];
                self.shared.hub.hot_reload(subscribers).await;

                let keys = self.shared.keys.subscribe();
                self.event_loop(token, keys).await
            }
            Err(e) => Err(e.into()),
        };

        if let Err(e) = self.shared.store.snapshot(&components).await {
            warn!("failed to snapshot component state: {e:#}");
        }
        for component in &components {
            if let Err(e) = component.close().await {
                warn!("failed to close \"{}\": {e}", component.name());
            }
        }

        result
    }

    async fn event_loop(
        &self,
        token: CancellationToken,
        mut keys: broadcast::Receiver<u32>,
    ) -> Result<()> {
        info!("controller entering key event loop");
        let mut poll = tokio::time::interval(KEY_POLL_INTERVAL);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                () = token.cancelled() => {
                    info!("controller stopping");
                    return Ok(());
                }
                // Hardware presses go through the bus like every other
                // source, so siblings and tests see the same stream.
                _ = poll.tick() => {
                    if let Some(code) = self.kb.poll_key(Duration::ZERO).await? {
                        self.shared.keys.press(code);
                    }
                }
                key = keys.recv() => match key {
                    Ok(code) => self.handle_key(code).await?,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("key bus lagged by {n} presses");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("key bus closed, controller stopping");
                        return Ok(());
                    }
                },
            }
        }
    }

    async fn handle_key(&self, code: u32) -> Result<()> {
        match code {
            keyboard::KEY_KBD_BRIGHTNESS_UP => self.kb.brightness_up().await?,
            keyboard::KEY_KBD_BRIGHTNESS_DOWN => self.kb.brightness_down().await?,
            keyboard::KEY_TOUCHPAD_TOGGLE => {
                self.kb.toggle_touchpad().await?;
                self.shared
                    .notify
                    .send(Notification::new("Touchpad", "toggled"))
                    .await;
            }
            keyboard::KEY_FN_F5 => {
                let profile = self.thermal.next_profile().await?;
                info!("switched to thermal profile \"{profile}\"");
                self.shared
                    .notify
                    .send(Notification::new("Thermal profile", profile))
                    .await;
            }
            keyboard::KEY_ROG => self.cycle_rog().await,
            other => {
                if let Some(target) = self.kb.remap_target(other).await {
                    self.kb.emulate_key_press(target).await?;
                }
            }
        }
        Ok(())
    }

    /// Repeated ROG presses cycle through the configured command list.
    async fn cycle_rog(&self) {
        let commands = self.shared.hub.current().await.features.rog_remap;
        if commands.is_empty() {
            return;
        }

        let mut index = self.rog_index.lock().await;
        let command = commands[*index % commands.len()].clone();
        *index = (*index + 1) % commands.len();
        drop(index);

        info!("rog key: launching \"{command}\"");
        if self.dry_run {
            return;
        }
        match tokio::process::Command::new(&command).spawn() {
            Ok(mut child) => {
                // Reap the child so it never lingers as a zombie.
                tokio::spawn(async move {
                    if let Err(e) = child.wait().await {
                        warn!("failed to wait on \"{command}\": {e}");
                    }
                });
            }
            Err(e) => error!("failed to launch \"{command}\": {e}"),
        }
    }
}

/// Builds and runs one controller instance for the supervisor.
///
/// Construction errors become [`Error::StartupFailure`]; run errors pass
/// through untouched so the restart policy sees them.
pub async fn start(
    config: RunConfig,
    shared: Shared,
    token: CancellationToken,
) -> Result<()> {
    let controller = Controller::new(&config, shared)
        .map_err(|e| Error::StartupFailure(e.to_string()))?;
    controller.run(token).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{self, LogSink};
    use crate::settings::Features;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    fn shared() -> (tempfile::TempDir, Shared) {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path().join("state.json")).unwrap();
        let (notify, _notifier) = notify::channel(Box::new(LogSink));
        (
            dir,
            Shared {
                hub: Arc::new(ConfigHub::default()),
                store: Arc::new(store),
                notify,
                keys: KeyBus::new(),
            },
        )
    }

    fn dry_controller(shared: &Shared) -> Controller {
        Controller::new(&RunConfig { dry_run: true }, shared.clone()).unwrap()
    }

    /// Accepts a fixed number of writes (enough for the init handshake),
    /// fails every write after that, and records whether it was closed.
    struct ExpiringDev {
        budget: AtomicUsize,
        closed: Arc<AtomicBool>,
    }

    impl DeviceIO for ExpiringDev {
        fn write(&self, buf: &[u8]) -> Result<usize, Error> {
            if self.budget.fetch_sub(1, Ordering::SeqCst) == 0 {
                self.budget.store(0, Ordering::SeqCst);
                return Err(Error::DeviceIo("device gone".into()));
            }
            Ok(buf.len())
        }

        fn close(&self) -> Result<(), Error> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn expiring_controller(shared: &Shared, write_budget: usize) -> (Arc<AtomicBool>, Controller) {
        let closed = Arc::new(AtomicBool::new(false));
        let dev: Box<dyn DeviceIO> = Box::new(ExpiringDev {
            budget: AtomicUsize::new(write_budget),
            closed: closed.clone(),
        });
        let kb = Arc::new(Control::new(dev, Box::new(NullInjector)).unwrap());
        let controller = Controller {
            kb,
            thermal: Arc::new(thermal::Control::new(
                default_profiles(),
                Box::new(LogPlatform),
            )),
            shared: shared.clone(),
            dry_run: true,
            rog_index: Mutex::new(0),
        };
        (closed, controller)
    }

    async fn wait_until(condition: impl AsyncFn() -> bool) {
        for _ in 0..200 {
            if condition().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not met within bounded wait");
    }

    #[tokio::test]
    async fn brightness_keys_drive_the_state_machine() {
        let (_dir, shared) = shared();
        let controller = dry_controller(&shared);
        let token = CancellationToken::new();

        let keys = shared.keys.clone();
        let kb = controller.kb.clone();
        let thermal = controller.thermal.clone();
        let run_token = token.clone();
        let handle = tokio::spawn(async move { controller.run(run_token).await });

        // Give the event loop a moment to subscribe.
        tokio::time::sleep(Duration::from_millis(20)).await;
        keys.press(keyboard::KEY_KBD_BRIGHTNESS_UP);
        keys.press(keyboard::KEY_KBD_BRIGHTNESS_UP);
        keys.press(keyboard::KEY_KBD_BRIGHTNESS_DOWN);
        keys.press(keyboard::KEY_FN_F5);

        // Events are handled in order, so the profile switch doubles as a
        // barrier for the brightness presses before it.
        wait_until(async || thermal.current_profile().await.name == "Balanced").await;
        assert_eq!(kb.brightness().await, keyboard::Level::Low);

        token.cancel();
        handle.await.unwrap().unwrap();

        // Off -> Low -> Medium -> Low, snapshotted at shutdown.
        assert_eq!(
            shared.store.get("KeyboardControl").await,
            Some(vec![0x01, 0x00])
        );
    }

    #[tokio::test]
    async fn restart_replays_persisted_brightness() {
        let (_dir, shared) = shared();
        let token = CancellationToken::new();

        {
            let controller = dry_controller(&shared);
            let run_token = token.child_token();
            let keys = shared.keys.clone();
            let handle = tokio::spawn(async move { controller.run(run_token).await });
            tokio::time::sleep(Duration::from_millis(20)).await;
            keys.press(keyboard::KEY_KBD_BRIGHTNESS_UP);
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
            handle.await.unwrap().unwrap();
        }

        // A fresh instance restores Level::Low from the store.
        let controller = dry_controller(&shared);
        let components: Vec<Arc<dyn Registry>> = vec![controller.kb.clone()];
        shared.store.restore(&components).await.unwrap();
        assert_eq!(controller.kb.brightness().await, keyboard::Level::Low);
    }

    #[tokio::test]
    async fn run_resubscribes_components_to_the_hub() {
        let (_dir, shared) = shared();
        let controller = dry_controller(&shared);
        let token = CancellationToken::new();

        let run_token = token.clone();
        let kb = controller.kb.clone();
        let handle = tokio::spawn(async move { controller.run(run_token).await });

        // hot_reload re-announces current features, which carry the
        // default Fn remapping.
        wait_until(async || {
            kb.remap_target(keyboard::KEY_FN_LEFT).await == Some(keyboard::KEY_PAGE_UP)
        })
        .await;

        token.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn failed_restore_still_closes_the_components() {
        let (_dir, shared) = shared();
        shared
            .store
            .set("KeyboardControl", vec![0x02, 0x00])
            .await;

        // Init handshake succeeds, the restore's re-assert write fails.
        let (closed, controller) = expiring_controller(&shared, 3);
        let result = controller.run(CancellationToken::new()).await;

        let err = result.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::DeviceIo(_))
        ));
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn rog_key_cycles_commands_in_order() {
        let (_dir, shared) = shared();
        let mut features = Features::default();
        features.rog_remap = vec!["first".into(), "second".into()];
        shared.hub.set(Some(features), None).await.unwrap();

        let controller = dry_controller(&shared);
        controller.cycle_rog().await;
        controller.cycle_rog().await;
        controller.cycle_rog().await;

        // Wrapped around: 0, 1, back to 0, leaving the index at 1.
        assert_eq!(*controller.rog_index.lock().await, 1);
    }

    #[tokio::test]
    async fn fn_f5_cycles_thermal_profiles() {
        let (_dir, shared) = shared();
        let controller = dry_controller(&shared);

        controller.handle_key(keyboard::KEY_FN_F5).await.unwrap();
        assert_eq!(controller.thermal.current_profile().await.name, "Balanced");
    }

    #[tokio::test]
    async fn startup_failure_is_wrapped_for_the_supervisor() {
        // A HidApi context with no matching device yields DeviceNotFound,
        // which start() must surface as StartupFailure. Building HidApi in
        // CI can itself fail; either way the error must be StartupFailure.
        let (_dir, shared) = shared();
        let result = start(
            RunConfig { dry_run: false },
            shared,
            CancellationToken::new(),
        )
        .await;

        let err = result.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::StartupFailure(_))
        ));
    }
}
