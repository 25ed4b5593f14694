//! Per-party run configuration and its validation.
//!
//! Every party constructs a [`PartyContext`] before a run. [`PartyContext::validate`] detects
//! mismatches between the configured bin layout and the party's input before any message is
//! exchanged, so that misconfigured runs abort instead of deadlocking at a barrier.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::data_types::{Psm, Role};

/// Errors in the run configuration, detected before the run starts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A run needs at least one server/client pair.
    #[error("the party count must be at least 1")]
    NoParties,
    /// The party index is outside of `0..n`.
    #[error("party index {index} is out of range for {n} parties")]
    IndexOutOfRange {
        /// The configured index.
        index: usize,
        /// The configured party count.
        n: usize,
    },
    /// A bin count or bin capacity is zero.
    #[error("'{0}' must be greater than zero")]
    ZeroSized(&'static str),
    /// The input does not fit into the configured bins.
    #[error("{len} input elements do not fit into {bins} bins of capacity {capacity}")]
    InputTooLarge {
        /// Number of input elements.
        len: usize,
        /// Configured number of bins.
        bins: usize,
        /// Configured capacity of every bin.
        capacity: usize,
    },
    /// An input element is not below the declared element bound.
    #[error("element {element} is not below the element bound {bound}")]
    ElementOutOfRange {
        /// The offending element.
        element: u64,
        /// The configured bound.
        bound: u64,
    },
    /// The element bound leaves too little room for random filler values.
    #[error("the element bound {0} must not exceed 2^63")]
    ElementBoundTooLarge(u64),
    /// The number of server values does not match the number of server elements.
    #[error("expected one value per element ({elements}), found {values}")]
    ValueCountMismatch {
        /// Number of server elements.
        elements: usize,
        /// Number of server values.
        values: usize,
    },
    /// The threshold band is empty or includes a count of zero.
    #[error("invalid thresholds: min = {min}, max = {max}")]
    InvalidThresholds {
        /// The configured lower threshold.
        min: u64,
        /// The configured upper threshold.
        max: u64,
    },
    /// The comparison bit length or radix is out of range.
    #[error("invalid comparison parameters: bitlen = {bitlen}, radix = {radix}")]
    InvalidComparisonParams {
        /// The configured bit length.
        bitlen: u32,
        /// The configured radix.
        radix: u32,
    },
    /// The Paillier modulus is too small.
    #[error("paillier modulus of {0} bits is too small (at least 128 bits)")]
    PaillierModulusTooSmall(usize),
    /// The party was configured with other parameters than the session it joins.
    #[error("the parameters of {role} {index} differ from the parameters of the session")]
    ParamsMismatch {
        /// The role of the misconfigured party.
        role: Role,
        /// The index of the misconfigured party.
        index: usize,
    },
}

/// The two thresholds used to classify a match count in [`Psm::CardinalityThreshold`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Smallest count that counts as a match.
    pub min: u64,
    /// Largest count that is still within the threshold.
    pub max: u64,
}

impl Thresholds {
    /// Thresholds that report a match for any count in `1..=g` and an excess above `g`.
    pub fn up_to(g: u64) -> Self {
        Self { min: 1, max: g }
    }

    /// Maps a raw match count to its class.
    pub fn classify(&self, count: u64) -> ThresholdClass {
        if count < self.min {
            ThresholdClass::NoMatch
        } else if count <= self.max {
            ThresholdClass::WithinThreshold
        } else {
            ThresholdClass::ExceedsThreshold
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self::up_to(1)
    }
}

/// The 3-valued result of [`Psm::CardinalityThreshold`], sent as `0`, `1` or `2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u64)]
pub enum ThresholdClass {
    /// The match count is below the lower threshold.
    NoMatch = 0,
    /// The match count lies within the thresholds.
    WithinThreshold = 1,
    /// The match count exceeds the upper threshold.
    ExceedsThreshold = 2,
}

impl ThresholdClass {
    /// The wire representation of the class.
    pub fn as_u64(self) -> u64 {
        self as u64
    }

    /// Parses the wire representation of a class.
    pub fn from_u64(value: u64) -> Option<Self> {
        match value {
            0 => Some(Self::NoMatch),
            1 => Some(Self::WithinThreshold),
            2 => Some(Self::ExceedsThreshold),
            _ => None,
        }
    }
}

/// Bin layout and protocol parameters, shared by all parties of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Params {
    /// Number of client bins for the OPRF-based protocols.
    pub cnbins: usize,
    /// Capacity of every client bin for the OPRF-based protocols.
    pub cneles: usize,
    /// Number of server bins for the OPRF-based protocols.
    pub snbins: usize,
    /// Capacity of every server bin for the OPRF-based protocols.
    pub sneles: usize,
    /// Number of compared bins in [`Psm::SecretSharedEquality`].
    pub nbins: usize,
    /// Number of server elements compared against each client bin in
    /// [`Psm::SecretSharedEquality`].
    pub batch_size: usize,
    /// Bit length of compared elements, passed to the comparison collaborator.
    pub bitlen: u32,
    /// Radix (bits per digit) of the comparison collaborator.
    pub radix: u32,
    /// Real elements are strictly below this bound, filler values are drawn above it.
    pub element_bound: u64,
    /// Bit length of the Paillier modulus for [`Psm::HomomorphicSum`].
    pub paillier_bits: usize,
    /// Classification of match counts for [`Psm::CardinalityThreshold`].
    pub thresholds: Thresholds,
    /// Bounds every barrier wait; `None` waits indefinitely.
    pub barrier_timeout: Option<Duration>,
    /// Bounds every receive on the in-process links created by a simulation.
    pub channel_timeout: Duration,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            cnbins: 16,
            cneles: 1,
            snbins: 1,
            sneles: 16,
            nbins: 16,
            batch_size: 8,
            bitlen: 32,
            radix: 4,
            element_bound: 1 << 32,
            paillier_bits: 1024,
            thresholds: Thresholds::default(),
            barrier_timeout: None,
            channel_timeout: Duration::from_secs(10 * 60),
        }
    }
}

/// What a single party contributes to a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyInput {
    /// The party's set elements.
    pub elements: Vec<u64>,
    /// Values associated with the server's elements ([`Psm::HomomorphicSum`] servers only).
    pub values: Vec<u64>,
}

impl PartyInput {
    /// An input consisting of elements only.
    pub fn elements(elements: impl Into<Vec<u64>>) -> Self {
        Self {
            elements: elements.into(),
            values: vec![],
        }
    }

    /// A server input associating every element with a value.
    pub fn with_values(pairs: impl IntoIterator<Item = (u64, u64)>) -> Self {
        let (elements, values) = pairs.into_iter().unzip();
        Self { elements, values }
    }
}

/// Everything a party needs to know about its own position in a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyContext {
    /// Which side of the link this party is on.
    pub role: Role,
    /// The party index in `0..n`.
    pub index: usize,
    /// The number of server/client pairs.
    pub n: usize,
    /// The protocol to run.
    pub psm: Psm,
    /// Parameters shared by all parties.
    pub params: Params,
}

impl PartyContext {
    /// Creates the context of party `index` in a run of `n` pairs.
    pub fn new(role: Role, index: usize, n: usize, psm: Psm, params: Params) -> Self {
        Self {
            role,
            index,
            n,
            psm,
            params,
        }
    }

    /// The leader (index 0) combines the final statistic.
    pub fn is_leader(&self) -> bool {
        self.index == 0
    }

    /// The center (index n-1) drives the second masking round.
    pub fn is_center(&self) -> bool {
        self.index + 1 == self.n
    }

    /// Number of comparisons in [`Psm::SecretSharedEquality`], rounded up to whole batches.
    pub fn num_cmps(&self) -> usize {
        self.params.nbins.next_multiple_of(self.params.batch_size.max(1))
    }

    /// Checks the context and the party's input before the run starts.
    pub fn validate(&self, input: &PartyInput) -> Result<(), ConfigError> {
        let PartyContext {
            role,
            index,
            n,
            psm,
            params,
        } = self;
        if *n == 0 {
            return Err(ConfigError::NoParties);
        }
        if index >= n {
            return Err(ConfigError::IndexOutOfRange {
                index: *index,
                n: *n,
            });
        }
        if params.element_bound > 1 << 63 {
            return Err(ConfigError::ElementBoundTooLarge(params.element_bound));
        }
        if let Some(&element) = input
            .elements
            .iter()
            .find(|&&e| e >= params.element_bound)
        {
            return Err(ConfigError::ElementOutOfRange {
                element,
                bound: params.element_bound,
            });
        }
        if *psm == Psm::SecretSharedEquality && params.batch_size == 0 {
            return Err(ConfigError::ZeroSized("batch_size"));
        }
        let (bins, capacity) = match (psm, role) {
            (Psm::CardinalityThreshold | Psm::HomomorphicSum, Role::Client) => {
                (("cnbins", params.cnbins), ("cneles", params.cneles))
            }
            (Psm::CardinalityThreshold | Psm::HomomorphicSum, Role::Server) => {
                (("snbins", params.snbins), ("sneles", params.sneles))
            }
            (Psm::SecretSharedEquality, Role::Client) => {
                (("nbins", params.nbins), ("client capacity", 1))
            }
            (Psm::SecretSharedEquality, Role::Server) => {
                (("nbins", params.nbins), ("batch_size", params.batch_size))
            }
        };
        for (name, size) in [bins, capacity] {
            if size == 0 {
                return Err(ConfigError::ZeroSized(name));
            }
        }
        let (bins, capacity) = (bins.1, capacity.1);
        if input.elements.len() > bins * capacity {
            return Err(ConfigError::InputTooLarge {
                len: input.elements.len(),
                bins,
                capacity,
            });
        }
        match psm {
            Psm::CardinalityThreshold => {
                let Thresholds { min, max } = params.thresholds;
                if min == 0 || min > max {
                    return Err(ConfigError::InvalidThresholds { min, max });
                }
            }
            Psm::HomomorphicSum => {
                if *role == Role::Server && input.values.len() != input.elements.len() {
                    return Err(ConfigError::ValueCountMismatch {
                        elements: input.elements.len(),
                        values: input.values.len(),
                    });
                }
                if params.paillier_bits < 128 {
                    return Err(ConfigError::PaillierModulusTooSmall(params.paillier_bits));
                }
            }
            Psm::SecretSharedEquality => {
                let (bitlen, radix) = (params.bitlen, params.radix);
                if !(1..=64).contains(&bitlen) || !(1..=8).contains(&radix) || radix > bitlen {
                    return Err(ConfigError::InvalidComparisonParams { bitlen, radix });
                }
            }
        }
        Ok(())
    }
}
