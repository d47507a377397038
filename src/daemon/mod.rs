//! # Daemon Module
//!
//! The daemon module runs the Modbus slave: it loads the configuration into
//! the register bank, connects the transport and serves requests, persisting
//! the bank after each one.
//!
//! ## Components
//!
//! * **Launch Daemon**: owns the bank, the configuration store and the
//!   transport session; connects, serves and closes.
//! * **Request Loop**: the receive, apply, respond and persist cycle.
//!
//! ## Usage
//!
//! ```no_run
//! use modbus_register_slave::config::ConfigStore;
//! use modbus_register_slave::daemon::Daemon;
//!
//! async fn run() -> anyhow::Result<()> {
//!     let mut daemon = Daemon::new(ConfigStore::new("config.json"), 1000);
//!     let config = daemon.load_config()?;
//!
//!     // Serve until a communication error or Ctrl+C
//!     daemon
//!         .launch_until(&config, async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await
//! }
//! ```

pub mod launch_daemon;
pub mod request_loop;

pub use launch_daemon::Daemon;
pub use request_loop::RequestLoop;
