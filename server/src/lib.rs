//! # Simulation Pool Server Library
//!
//! This library serves a pool of independent cart-pole simulations over TCP.
//! Every simulation instance owns its own listening port and speaks a small
//! line-based protocol: a client resets the simulation, pushes the cart with
//! integer actions, and reads back observations, rewards and done flags.
//!
//! ## Core Responsibilities
//!
//! ### Instance Isolation
//! Each instance runs as its own tokio task with its own listener, oracle and
//! state. Instances share nothing, so a client stalling or crashing one
//! instance is invisible to all others.
//!
//! ### Protocol Handling
//! A connection handler answers each request line with exactly one response
//! line. Malformed requests, premature observations and out-of-range actions
//! are answered with `e:` lines instead of tearing the instance down.
//!
//! ### Connection Lifecycle
//! An instance serves one client at a time. Extra connections are told the
//! instance is busy; when a client leaves, the instance accepts the next one.
//!
//! ## Module Organization
//!
//! ### Physics Module (`physics`)
//! Cart-pole dynamics and the `CartPole` oracle:
//! - Euler integration of cart and pole
//! - Failure thresholds and the episode step limit
//! - Seeded initial states for reproducible runs
//!
//! ### Oracle Module (`oracle`)
//! The `SimulationOracle` trait the server consumes; any model implementing
//! reset/step/action_count can be served.
//!
//! ### Instance Module (`instance`)
//! A simulation bound to one server, plus the snapshot channel feeding the
//! render side-channel.
//!
//! ### Handler Module (`handler`)
//! The per-connection protocol state machine.
//!
//! ### Network Module (`network`)
//! The instance server: bind, accept loop, busy rejection, shutdown.
//!
//! ### Pool Module (`pool`)
//! Builds and runs N instance servers and reports how each ended.
//!
//! ### Render Module (`render`)
//! Best-effort text frames for one designated instance.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::pool::Pool;
//! use tokio::sync::watch;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig {
//!         instances: 4,
//!         ..ServerConfig::default()
//!     };
//!
//!     // Instances listen on 127.0.0.1:8080 through 127.0.0.1:8083
//!     let pool = Pool::bind(&config)?;
//!
//!     let (shutdown_tx, shutdown_rx) = watch::channel(false);
//!     tokio::spawn(async move {
//!         let _ = tokio::signal::ctrl_c().await;
//!         let _ = shutdown_tx.send(true);
//!     });
//!
//!     let report = pool.run(shutdown_rx).await;
//!     println!("{} instances stopped cleanly", report.completed.len());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod handler;
pub mod instance;
pub mod network;
pub mod oracle;
pub mod physics;
pub mod pool;
pub mod render;
