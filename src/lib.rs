//! Multi-party private set membership between `n` paired servers and clients.
//!
//! Server `i` and client `i` share a direct link, the parties of one role meet at in-process
//! rendezvous points. Three protocols compute a statistic over the matches between all client
//! and all server sets, without revealing the sets themselves:
//!
//! - [`data_types::Psm::CardinalityThreshold`] tells the leader client whether the number of
//!   matches is zero, within a threshold or above it.
//! - [`data_types::Psm::HomomorphicSum`] reveals the sum of the server values associated with
//!   matching elements to the leader client, using Paillier encryption.
//! - [`data_types::Psm::SecretSharedEquality`] compares paired bins with a secure batch equality
//!   and reveals the sum of the per-pair equality bits to both leaders.
//!
//! ## Main Components
//!
//! * [`protocol`]: The [`protocol::run_party`] function which executes a run for a single party.
//! * [`channel`]: Communication abstractions for exchanging data between paired parties.
//! * [`sync`]: The barriers and aggregates shared by the parties of one role.
//! * [`config`]: Parameters, per-party contexts and their validation.
//!
//! For simulated environments (testing/development), you can use the
//! [`protocol::simulate_psm`] function, which runs all `2n` parties in a single process:
//!
//! ```ignore
//! use mpsm::{
//!     config::{PartyInput, Params},
//!     data_types::Psm,
//!     protocol::simulate_psm,
//! };
//!
//! # async fn example() -> Result<(), mpsm::protocol::Error> {
//! let inputs = vec![(PartyInput::elements([2, 3, 4]), PartyInput::elements([1, 2, 3]))];
//! let (servers, clients) = simulate_psm(Psm::CardinalityThreshold, &Params::default(), &inputs).await?;
//! println!("{:?} / {:?}", servers[0], clients[0]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Security Properties
//!
//! The OPRF and batch equality collaborators used by [`protocol::simulate_psm`] reveal what a
//! secure implementation would hide. They keep the message flow of a real deployment, so that
//! secure building blocks can be plugged in through the [`oprf::Oprf`] and
//! [`equality::BatchEquality`] traits.
#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod beaver;
pub mod bins;
pub mod block;
pub mod channel;
pub mod config;
pub mod data_types;
pub mod equality;
pub mod keys;
pub mod oprf;
pub mod paillier;
pub mod protocol;
pub mod sync;
