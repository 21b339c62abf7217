//! # Simulation Pool Client Library
//!
//! Client side of the simulation pool protocol: connect to one instance,
//! reset it, push actions and read back observations and rewards.
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! `SimClient`, a typed request/response wrapper over one TCP connection.
//! Server `e:` lines surface as `ClientError::Server`.
//!
//! ### Policy Module (`policy`)
//! Action selection: a seeded random policy and a simple balancing heuristic.
//!
//! ### Game Module (`game`)
//! Episode driver that plays a policy until the server reports done.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::game::run_episode;
//! use client::network::SimClient;
//! use client::policy::BalancePolicy;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = SimClient::connect("127.0.0.1:8080").await?;
//!     let summary = run_episode(&mut client, &mut BalancePolicy, 200).await?;
//!     println!("balanced for {} steps", summary.steps);
//!     Ok(())
//! }
//! ```

pub mod game;
pub mod network;
pub mod policy;
