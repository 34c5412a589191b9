//! # rogctld
//!
//! A daemon for ASUS ROG laptop keyboard and thermal control via HID.
//!
//! ## Features
//!
//! - **Async Architecture**: Built on Tokio for non-blocking hardware control
//! - **Supervised Subsystems**: Device failures restart only the failed subsystem
//! - **Keyboard Backlight**: Four-level brightness with hardware key handling
//! - **Thermal Profiles**: Named profile cycling with fan curves and power plans
//! - **Persistence**: Brightness and profile selection survive restarts
//! - **Hot Reload**: Configuration fanout without restarting the daemon
//!
//! ## Architecture
//!
//! The daemon is split into a long-lived process layer and a disposable
//! hardware layer:
//! - [`Supervisor`](supervisor::Supervisor) - One-for-one restart of subsystems
//! - [`ConfigHub`](hub::ConfigHub) - Single-writer configuration fanout
//! - [`StateStore`](persist::StateStore) - Component state across restarts
//! - [`Controller`](controller::Controller) - The supervised hardware subsystem
//!
//! ## Example
//!
//! ```no_run
//! use rogctld::{application::Application, cli::Cli};
//! use clap::Parser;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     Application::builder()
//!         .with_cli(Cli::parse())
//!         .build()
//!         .run()
//!         .await
//! }
//! ```

pub mod application;
pub mod cli;
pub mod controller;
pub mod error;
pub mod event;
pub mod hub;
pub mod keyboard;
pub mod notify;
pub mod persist;
pub mod settings;
pub mod supervisor;
pub mod thermal;
