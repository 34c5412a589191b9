//! High-level keyboard control state machine.

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use log::info;
use tokio::sync::Mutex;

use crate::{
    error::Error,
    hub::{Updatable, Update},
    persist::Registry,
};

use super::{
    KeyInjector,
    device_io::DeviceIO,
    protocol::{self, Command, Level},
};

const PERSIST_KEY: &str = "KeyboardControl";

struct ControlState {
    brightness: Level,
    fn_remap: HashMap<u32, u16>,
    closed: bool,
}

/// Owns the control endpoint handle and the current backlight level.
///
/// Callers only see semantic operations; report construction stays in
/// [`super::protocol`]. Every level change is atomic: the in-memory level
/// moves only after the hardware write succeeded.
pub struct Control<Io: DeviceIO> {
    dev: Io,
    injector: Box<dyn KeyInjector>,
    state: Mutex<ControlState>,
}

impl<Io: DeviceIO> Control<Io> {
    /// Sends the initialization handshake and returns a controller at
    /// level `Off`. Any failed stage aborts construction; the supervisor
    /// retries the whole sequence from scratch on restart.
    pub fn new(dev: Io, injector: Box<dyn KeyInjector>) -> Result<Self, Error> {
        info!("initializing keyboard control interface");
        for command in Command::init_sequence() {
            dev.write(&command.to_report())?;
        }

        Ok(Self {
            dev,
            injector,
            state: Mutex::new(ControlState {
                brightness: Level::Off,
                fn_remap: HashMap::new(),
                closed: false,
            }),
        })
    }

    /// Raises the backlight one level. Saturates at `High`: success with
    /// no hardware write and no state change.
    pub async fn brightness_up(&self) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        match state.brightness.up() {
            Some(target) => self.write_brightness(&mut state, target),
            None => Ok(()),
        }
    }

    /// Lowers the backlight one level. Saturates at `Off`.
    pub async fn brightness_down(&self) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        match state.brightness.down() {
            Some(target) => self.write_brightness(&mut state, target),
            None => Ok(()),
        }
    }

    /// Sets the backlight to an exact level. Always writes, even when the
    /// level is unchanged; the persistence `apply` path relies on this to
    /// re-assert hardware state after a restart.
    pub async fn set_brightness(&self, level: Level) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        self.write_brightness(&mut state, level)
    }

    pub async fn brightness(&self) -> Level {
        self.state.lock().await.brightness
    }

    /// Flips the touchpad between enabled and disabled. Stateless: the
    /// hardware offers no query, so it alone knows which state it is in.
    pub async fn toggle_touchpad(&self) -> Result<(), Error> {
        let state = self.state.lock().await;
        Self::ensure_open(&state)?;
        self.dev.write(&Command::ToggleTouchpad.to_report()).map(|_| ())
    }

    /// Picks up one pending hardware key press, waiting at most
    /// `timeout`. Returns `None` when nothing relevant arrived.
    pub async fn poll_key(&self, timeout: Duration) -> Result<Option<u32>, Error> {
        {
            let state = self.state.lock().await;
            Self::ensure_open(&state)?;
        }
        let mut report = [0u8; protocol::KEY_EVENT_LEN];
        let n = self.dev.read(&mut report, timeout)?;
        if n == 0 {
            return Ok(None);
        }
        Ok(protocol::decode_key_event(&report[..n]))
    }

    /// Synthesizes a key press through the OS injection facility.
    pub async fn emulate_key_press(&self, code: u16) -> Result<(), Error> {
        self.injector.inject(code)
    }

    /// Looks up the injection target for a remapped source key.
    pub async fn remap_target(&self, code: u32) -> Option<u16> {
        self.state.lock().await.fn_remap.get(&code).copied()
    }

    fn write_brightness(&self, state: &mut ControlState, level: Level) -> Result<(), Error> {
        Self::ensure_open(state)?;
        self.dev.write(&Command::SetBrightness(level).to_report())?;
        // State moves only after the write succeeded.
        state.brightness = level;
        Ok(())
    }

    fn ensure_open(state: &ControlState) -> Result<(), Error> {
        if state.closed {
            return Err(Error::DeviceIo("endpoint is closed".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl<Io: DeviceIO> Registry for Control<Io> {
    fn name(&self) -> &'static str {
        PERSIST_KEY
    }

    async fn value(&self) -> Vec<u8> {
        let state = self.state.lock().await;
        u16::from(state.brightness.as_byte()).to_le_bytes().to_vec()
    }

    async fn load(&self, raw: &[u8]) -> Result<(), Error> {
        if raw.is_empty() {
            return Ok(());
        }
        let bytes: [u8; 2] = raw.try_into().map_err(|_| Error::Decode {
            name: PERSIST_KEY,
            reason: format!("expected 2 bytes, got {}", raw.len()),
        })?;
        let value = u16::from_le_bytes(bytes);
        let level =
            u8::try_from(value)
                .ok()
                .map(Level::from_byte)
                .transpose()?
                .ok_or(Error::Decode {
                    name: PERSIST_KEY,
                    reason: format!("brightness value {value} out of range"),
                })?;

        // Adopt without writing; apply pushes it to hardware.
        self.state.lock().await.brightness = level;
        Ok(())
    }

    async fn apply(&self) -> Result<(), Error> {
        let level = self.brightness().await;
        self.set_brightness(level).await
    }

    async fn close(&self) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        state.closed = true;
        self.dev.close()
    }
}

#[async_trait]
impl<Io: DeviceIO> Updatable for Control<Io> {
    fn name(&self) -> &'static str {
        PERSIST_KEY
    }

    async fn config_update(&self, update: Update) {
        if let Update::Features(features) = update {
            self.state.lock().await.fn_remap = features.fn_remap;
        }
    }
}
