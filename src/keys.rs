//! Pairwise masking keys among the server parties.
//!
//! The leader generates one key pair per party and publishes them. Every unordered pair of
//! parties is then admitted once by a [`PairBarrier`]: the first of the two derives the shared
//! secret `s` and keeps `s` for its peer, the second keeps `-s` without recomputing it. Once
//! every party has a key for every other party, the keys of all parties sum to zero.

use std::{sync::Mutex, time::Duration};

use curve25519_dalek::montgomery::MontgomeryPoint;
use rand::RngCore;
use tracing::{Level, debug, instrument};

use crate::{
    data_types::RingElem,
    sync::{AggregateError, BarrierError, PairBarrier, SharedAggregate, SyncBarrier},
};

/// Errors raised while establishing pairwise keys.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// No key pair was published for the party.
    #[error("no key pair was published for party {0}")]
    MissingKeyPair(usize),
    /// The peer's public key is a low-order point, the derived secret would be zero.
    #[error("the public key of party {0} yields a degenerate shared secret")]
    DegenerateSecret(usize),
    /// Publishing a key pair failed.
    #[error(transparent)]
    Aggregate(#[from] AggregateError),
    /// Waiting for the publication or for a pair turn failed.
    #[error(transparent)]
    Barrier(#[from] BarrierError),
}

/// A 2-party key-agreement primitive.
pub trait KeyAgreement {
    /// A key pair as generated and published by the leader.
    type KeyPair: Clone + Send + Sync;

    /// Generates `count` fresh key pairs.
    fn generate_keypairs(&self, count: usize) -> Vec<Self::KeyPair>;

    /// Derives the secret that `local` shares with the owner of `peer`.
    ///
    /// `derive_shared_secret(a, b) == derive_shared_secret(b, a)` for all key pairs.
    fn derive_shared_secret(
        &self,
        local: &Self::KeyPair,
        peer: &Self::KeyPair,
        peer_index: usize,
    ) -> Result<RingElem, Error>;
}

/// An X25519 key pair.
#[derive(Clone)]
pub struct X25519KeyPair {
    secret: [u8; 32],
    public: MontgomeryPoint,
}

impl X25519KeyPair {
    /// The public half of the key pair.
    pub fn public(&self) -> &MontgomeryPoint {
        &self.public
    }
}

impl std::fmt::Debug for X25519KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("X25519KeyPair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

/// Diffie-Hellman over Curve25519, reducing the shared point to its first 8 bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct X25519;

impl KeyAgreement for X25519 {
    type KeyPair = X25519KeyPair;

    fn generate_keypairs(&self, count: usize) -> Vec<X25519KeyPair> {
        let mut rng = rand::rng();
        (0..count)
            .map(|_| {
                let mut secret = [0; 32];
                rng.fill_bytes(&mut secret);
                X25519KeyPair {
                    secret,
                    public: MontgomeryPoint::mul_base_clamped(secret),
                }
            })
            .collect()
    }

    fn derive_shared_secret(
        &self,
        local: &X25519KeyPair,
        peer: &X25519KeyPair,
        peer_index: usize,
    ) -> Result<RingElem, Error> {
        let shared = peer.public.mul_clamped(local.secret).to_bytes();
        if shared == [0; 32] {
            return Err(Error::DegenerateSecret(peer_index));
        }
        let mut low = [0; 8];
        low.copy_from_slice(&shared[..8]);
        Ok(RingElem(i64::from_le_bytes(low)))
    }
}

/// Tracks which party holds a key for which other party.
///
/// Cell `(i, j)` is set once party `i` holds its key for party `j`. Every cell is written by
/// the single party owning its row, the diagonal is never set.
#[derive(Debug)]
pub struct PairwiseShareMatrix {
    n: usize,
    cells: Mutex<Vec<bool>>,
}

impl PairwiseShareMatrix {
    /// An `n × n` matrix without any shared key.
    pub fn new(n: usize) -> Self {
        Self {
            n,
            cells: Mutex::new(vec![false; n * n]),
        }
    }

    /// Records that party `i` holds its key for party `j`.
    pub fn mark(&self, i: usize, j: usize) {
        if i != j {
            self.cells.lock().expect("poison")[i * self.n + j] = true;
        }
    }

    /// Whether party `i` holds its key for party `j`.
    pub fn is_shared(&self, i: usize, j: usize) -> bool {
        self.cells.lock().expect("poison")[i * self.n + j]
    }

    /// The number of parties that party `i` holds a key for.
    pub fn shared_count(&self, i: usize) -> usize {
        let cells = self.cells.lock().expect("poison");
        cells[i * self.n..(i + 1) * self.n]
            .iter()
            .filter(|&&c| c)
            .count()
    }

    /// Whether every party holds a key for every other party.
    pub fn is_complete(&self) -> bool {
        (0..self.n).all(|i| self.shared_count(i) + 1 == self.n)
    }
}

/// The state shared by the server parties of a run while they agree on pairwise keys.
pub struct PairwiseKeyAgreement<K: KeyAgreement> {
    n: usize,
    published: SharedAggregate<K::KeyPair>,
    publication: SyncBarrier,
    pairs: PairBarrier<Result<RingElem, Error>>,
    matrix: PairwiseShareMatrix,
}

impl<K: KeyAgreement> PairwiseKeyAgreement<K> {
    /// Prepares the key agreement among `n` parties.
    pub fn new(n: usize, timeout: Option<Duration>) -> Self {
        Self {
            n,
            published: SharedAggregate::new(),
            publication: SyncBarrier::new("key publication", n).with_timeout(timeout),
            pairs: PairBarrier::new("key agreement", n).with_timeout(timeout),
            matrix: PairwiseShareMatrix::new(n),
        }
    }

    /// Which parties hold keys for which other parties.
    pub fn matrix(&self) -> &PairwiseShareMatrix {
        &self.matrix
    }

    /// Runs the key agreement for party `index`, returning its signed key for every party.
    ///
    /// The key for the party itself is zero. All `n` parties must call this concurrently.
    #[instrument(level = Level::DEBUG, skip_all, fields(index = index), err)]
    pub async fn run(&self, index: usize, agreement: &K) -> Result<Vec<RingElem>, Error> {
        let n = self.n;
        if index == 0 {
            for (i, keypair) in agreement.generate_keypairs(n).into_iter().enumerate() {
                self.published.add(keypair, i)?;
            }
        }
        self.publication
            .await_all(index == 0, || {
                debug!(published = self.published.len(), "Key pairs published");
            })
            .await?;

        let mut keys = vec![RingElem::ZERO; n];
        while self.matrix.shared_count(index) + 1 < n {
            let paired = self
                .pairs
                .await_pair(
                    index,
                    &mut keys,
                    |keys, peer| {
                        let local = self
                            .published
                            .get(index)
                            .ok_or(Error::MissingKeyPair(index))?;
                        let remote = self
                            .published
                            .get(peer)
                            .ok_or(Error::MissingKeyPair(peer))?;
                        let secret = agreement.derive_shared_secret(&local, &remote, peer)?;
                        keys[peer] = secret;
                        self.matrix.mark(index, peer);
                        Ok(secret)
                    },
                    |keys, peer, secret| {
                        if let Ok(secret) = secret {
                            keys[peer] = -*secret;
                            self.matrix.mark(index, peer);
                        }
                    },
                )
                .await?;
            paired.value?;
        }
        debug!("All pairwise keys established");
        Ok(keys)
    }
}
