//! The oblivious pseudorandom function used to mask element sets.
//!
//! Every masking round is a single OPRF evaluation between a server (sender) and its paired
//! client (receiver). The sender holds `key_count` keys. Sender bin `r` and the `r`-th of
//! `key_count` equally sized groups of receiver elements are evaluated under key `r`, so that
//! the second masking round keeps the contributions of different parties apart.

use std::future::Future;

use crate::{
    block::Block,
    channel::{self, Channel, recv_vec_from, send_to},
};

/// Errors raised during an OPRF evaluation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The keys could not be exchanged.
    #[error(transparent)]
    Channel(#[from] channel::Error),
    /// The receiver's elements cannot be split into `key_count` equally sized groups.
    #[error("{len} elements cannot be split into {key_count} equally sized groups")]
    UnevenGroups {
        /// Number of receiver elements.
        len: usize,
        /// Number of keys.
        key_count: usize,
    },
    /// The sender has more bins than keys.
    #[error("{bins} bins need at least as many keys, found {key_count}")]
    TooFewKeys {
        /// Number of sender bins.
        bins: usize,
        /// Number of keys.
        key_count: usize,
    },
}

/// A 2-party OPRF.
pub trait Oprf {
    /// Evaluates the OPRF on `elements` as the receiver, one block per element.
    fn evaluate_as_receiver<C: Channel + Sync>(
        &self,
        channel: &C,
        elements: &[u64],
        key_count: usize,
    ) -> impl Future<Output = Result<Vec<Block>, Error>> + Send;

    /// Evaluates the OPRF on every element of `bins` as the sender, one block per element.
    ///
    /// With a single key, all bins are evaluated under it; otherwise bin `r` uses key `r`.
    fn evaluate_as_sender<C: Channel + Sync>(
        &self,
        channel: &C,
        bins: &[Vec<u64>],
        key_count: usize,
    ) -> impl Future<Output = Result<Vec<Vec<Block>>, Error>> + Send;
}

/// An OPRF keyed by BLAKE3 whose sender reveals its keys to the receiver.
///
/// Both sides compute the same function, so the masked sets of a run match exactly as with an
/// oblivious implementation, but the receiver learns the keys. Used by simulations and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct RevealedKeyOprf;

fn prf(key: &[u8; 32], x: u64) -> Block {
    let hash = blake3::keyed_hash(key, &x.to_le_bytes());
    let mut bytes = [0; Block::BYTES];
    bytes.copy_from_slice(&hash.as_bytes()[..Block::BYTES]);
    Block::from_bytes(bytes)
}

impl Oprf for RevealedKeyOprf {
    async fn evaluate_as_receiver<C: Channel + Sync>(
        &self,
        channel: &C,
        elements: &[u64],
        key_count: usize,
    ) -> Result<Vec<Block>, Error> {
        let len = elements.len();
        if key_count == 0 || len % key_count != 0 {
            return Err(Error::UnevenGroups { len, key_count });
        }
        let keys: Vec<[u8; 32]> = recv_vec_from(channel, "oprf keys", key_count).await?;
        let group = (len / key_count).max(1);
        Ok(elements
            .iter()
            .enumerate()
            .map(|(i, &x)| prf(&keys[i / group], x))
            .collect())
    }

    async fn evaluate_as_sender<C: Channel + Sync>(
        &self,
        channel: &C,
        bins: &[Vec<u64>],
        key_count: usize,
    ) -> Result<Vec<Vec<Block>>, Error> {
        if key_count == 0 || (key_count > 1 && bins.len() > key_count) {
            return Err(Error::TooFewKeys {
                bins: bins.len(),
                key_count,
            });
        }
        let keys: Vec<[u8; 32]> = (0..key_count).map(|_| rand::random()).collect();
        send_to(channel, "oprf keys", &keys).await?;
        Ok(bins
            .iter()
            .enumerate()
            .map(|(r, bin)| {
                let key = &keys[if key_count == 1 { 0 } else { r }];
                bin.iter().map(|&x| prf(key, x)).collect()
            })
            .collect())
    }
}
