//! The multi-party orchestration of the three private set membership protocols.
//!
//! Every party runs [`run_party`] with its own [`PartyContext`], its input, the channel to its
//! paired counterpart and the [`Session`] shared by all parties of the run. The session holds
//! the aggregates and barriers at which the parties of one role meet; every rendezvous point has
//! its own barrier.
//!
//! # Phases
//!
//! [`Psm::CardinalityThreshold`] and [`Psm::HomomorphicSum`] share the masking pipeline:
//!
//! 1. Both sides assign their elements to bins (round-robin for clients, row-major for
//!    servers).
//! 2. Every pair except the center runs a first OPRF round, with the server as sender, and
//!    deposits its masked set.
//! 3. Once all deposits are in, the center adds its raw set and masks all `n` sets in a second
//!    OPRF round, with one key per party.
//! 4. The leader client sends all fully masked client sets to the leader server, which computes
//!    the statistic and sends it back.
//!
//! [`Psm::SecretSharedEquality`] compares the bins of every pair with a secure batch equality and
//! turns the XOR of the outcome shares into arithmetic shares with a Beaver multiplication. The
//! servers hide their shares with pairwise keys that cancel out in the sum, and the leaders
//! finally combine the sums of both roles.
//!
//! For local simulations, [`simulate_psm`] runs all `2n` parties over in-process channels.

use futures::future::try_join_all;
use num_bigint::BigUint;
use tracing::{Level, debug, instrument};

use crate::{
    bins::{self, Filler},
    block::Block,
    channel::{self, Channel, SimpleChannel},
    config::{ConfigError, PartyContext, PartyInput, Params, ThresholdClass},
    data_types::{Psm, RingElem, Role},
    equality::{self, BatchEquality, RevealedEquality},
    keys::{self, KeyAgreement, PairwiseKeyAgreement, X25519},
    oprf::{self, Oprf, RevealedKeyOprf},
    paillier::{self, Ciphertext, PublicKey},
    sync::{AggregateError, BarrierError, SharedAggregate, SyncBarrier},
};

mod cardinality;
mod homomorphic;
mod shared_equality;

/// Errors that abort a run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The configuration or the input of the party is invalid.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    /// A message could not be sent to or received from the paired party.
    #[error(transparent)]
    Channel(#[from] channel::Error),
    /// A barrier could not be passed.
    #[error(transparent)]
    Barrier(#[from] BarrierError),
    /// A contribution was written twice.
    #[error(transparent)]
    Aggregate(#[from] AggregateError),
    /// The OPRF collaborator failed.
    #[error("oprf failed: {0}")]
    Oprf(#[from] oprf::Error),
    /// The homomorphic encryption failed.
    #[error("homomorphic encryption failed: {0}")]
    Paillier(#[from] paillier::Error),
    /// The pairwise key agreement failed.
    #[error("key agreement failed: {0}")]
    Keys(#[from] keys::Error),
    /// The batch equality collaborator failed.
    #[error("batch equality failed: {0}")]
    Equality(#[from] equality::Error),
    /// The session was prepared for a different number of parties.
    #[error("the session was prepared for {session} parties, but the party expects {party}")]
    SessionMismatch {
        /// Parties of the session.
        session: usize,
        /// Parties according to the party's context.
        party: usize,
    },
    /// No public key was published before the servers encrypted their values.
    #[error("no public key was published")]
    MissingPublicKey,
    /// Not every party deposited its masked set.
    #[error("expected masked sets of {expected} parties, found {found}")]
    IncompleteRound {
        /// The number of parties.
        expected: usize,
        /// The number of deposited sets.
        found: usize,
    },
    /// No ciphertext exists for a matching masked element.
    #[error("no ciphertext for slot {slot} of party {party}")]
    MissingCiphertext {
        /// The party that owns the element.
        party: usize,
        /// The position of the element in the party's masked set.
        slot: usize,
    },
    /// The leader server sent a value that is not a threshold class.
    #[error("invalid threshold class {0}")]
    InvalidThresholdClass(u64),
}

/// What a party learns from a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartyOutput {
    /// The party contributed its input, but does not learn a result.
    Contributed,
    /// The leader server of a threshold run: the number of matches and its class.
    MatchCount {
        /// The number of matches between the masked client and server sets.
        count: u64,
        /// The class sent to the leader client.
        class: ThresholdClass,
    },
    /// The leader client of a threshold run.
    Threshold(ThresholdClass),
    /// The leader server of a homomorphic sum: the number of ciphertexts in the accumulator.
    EncryptedSum {
        /// The number of matches folded into the accumulator.
        matches: u64,
    },
    /// The leader client of a homomorphic sum: the decrypted sum of the matching values.
    Sum(BigUint),
    /// Both leaders of a secret-shared equality run: the revealed aggregate.
    Aggregate(RingElem),
}

/// The collaborators that implement the cryptographic building blocks.
#[derive(Debug, Clone, Default)]
pub struct Collaborators<O, E, K> {
    /// Masks element sets.
    pub oprf: O,
    /// Compares bins in the secret-shared equality protocol.
    pub equality: E,
    /// Derives the pairwise keys among the servers.
    pub key_agreement: K,
}

/// The building blocks used by [`simulate_psm`]: they reveal what a secure implementation hides
/// and are only meant for local simulations.
pub type SimulatedCollaborators = Collaborators<RevealedKeyOprf, RevealedEquality, X25519>;

/// The state that the parties of one role share during a run.
#[derive(Debug)]
struct RoleState {
    first_round: SharedAggregate<Vec<u64>>,
    first_barrier: SyncBarrier,
    second_round: SharedAggregate<Vec<u64>>,
    second_barrier: SyncBarrier,
    results: SharedAggregate<RingElem>,
    result_barrier: SyncBarrier,
}

impl RoleState {
    fn new(role: Role, n: usize, params: &Params) -> Self {
        let timeout = params.barrier_timeout;
        let (first, second, result) = match role {
            Role::Server => ("server first round", "server second round", "server results"),
            Role::Client => ("client first round", "client second round", "client results"),
        };
        Self {
            first_round: SharedAggregate::new(),
            first_barrier: SyncBarrier::new(first, n).with_timeout(timeout),
            second_round: SharedAggregate::new(),
            second_barrier: SyncBarrier::new(second, n).with_timeout(timeout),
            results: SharedAggregate::new(),
            result_barrier: SyncBarrier::new(result, n).with_timeout(timeout),
        }
    }
}

/// The state shared by all parties of a single run, discarded once the run ends.
pub struct Session<K: KeyAgreement = X25519> {
    n: usize,
    params: Params,
    servers: RoleState,
    clients: RoleState,
    public_key: SharedAggregate<PublicKey>,
    public_key_barrier: SyncBarrier,
    encrypted: SharedAggregate<Vec<Ciphertext>>,
    encrypted_barrier: SyncBarrier,
    keys: PairwiseKeyAgreement<K>,
}

impl<K: KeyAgreement> Session<K> {
    /// Prepares a run of `n` server/client pairs, all configured with `params`.
    pub fn new(n: usize, params: &Params) -> Self {
        let timeout = params.barrier_timeout;
        Self {
            n,
            params: params.clone(),
            servers: RoleState::new(Role::Server, n, params),
            clients: RoleState::new(Role::Client, n, params),
            public_key: SharedAggregate::new(),
            public_key_barrier: SyncBarrier::new("public key", n).with_timeout(timeout),
            encrypted: SharedAggregate::new(),
            encrypted_barrier: SyncBarrier::new("encrypted values", n).with_timeout(timeout),
            keys: PairwiseKeyAgreement::new(n, timeout),
        }
    }

    /// The number of server/client pairs of the run.
    pub fn n(&self) -> usize {
        self.n
    }

    /// The parameters every party of the run must use.
    pub fn params(&self) -> &Params {
        &self.params
    }

    fn role(&self, role: Role) -> &RoleState {
        match role {
            Role::Server => &self.servers,
            Role::Client => &self.clients,
        }
    }
}

pub(crate) struct Context<'a, C, O, E, K: KeyAgreement> {
    channel: &'a C,
    session: &'a Session<K>,
    ctx: &'a PartyContext,
    input: &'a PartyInput,
    collaborators: &'a Collaborators<O, E, K>,
}

impl<C, O, E, K: KeyAgreement> Context<'_, C, O, E, K> {
    fn params(&self) -> &Params {
        &self.ctx.params
    }

    fn filler(&self) -> Filler {
        Filler::above(self.ctx.params.element_bound)
    }

    fn state(&self) -> &RoleState {
        self.session.role(self.ctx.role)
    }
}

/// Executes a run for a single party and returns what the party learns.
///
/// All `2n` parties of the run must call this concurrently with the same `session`; server `i`
/// and client `i` must be connected by `channel`. The configuration is validated, and compared
/// with the parameters of the session, before any message is exchanged.
#[instrument(
    level = Level::DEBUG,
    skip_all,
    fields(role = %ctx.role, index = ctx.index),
    err
)]
pub async fn run_party<C, O, E, K>(
    channel: &C,
    session: &Session<K>,
    ctx: &PartyContext,
    input: &PartyInput,
    collaborators: &Collaborators<O, E, K>,
) -> Result<PartyOutput, Error>
where
    C: Channel + Sync,
    O: Oprf + Sync,
    E: BatchEquality + Sync,
    K: KeyAgreement + Sync,
{
    ctx.validate(input)?;
    if session.n != ctx.n {
        return Err(Error::SessionMismatch {
            session: session.n,
            party: ctx.n,
        });
    }
    if session.params != ctx.params {
        return Err(ConfigError::ParamsMismatch {
            role: ctx.role,
            index: ctx.index,
        }
        .into());
    }
    debug!(psm = ?ctx.psm, "Starting run");
    let cx = Context {
        channel,
        session,
        ctx,
        input,
        collaborators,
    };
    let output = match (ctx.psm, ctx.role) {
        (Psm::CardinalityThreshold, Role::Client) => cardinality::client(&cx).await?,
        (Psm::CardinalityThreshold, Role::Server) => cardinality::server(&cx).await?,
        (Psm::HomomorphicSum, Role::Client) => homomorphic::client(&cx).await?,
        (Psm::HomomorphicSum, Role::Server) => homomorphic::server(&cx).await?,
        (Psm::SecretSharedEquality, Role::Client) => shared_equality::client(&cx).await?,
        (Psm::SecretSharedEquality, Role::Server) => shared_equality::server(&cx).await?,
    };
    debug!(?output, "Run finished");
    Ok(output)
}

/// Simulates a run of `psm` for all server/client pairs in a single process.
///
/// `inputs[i]` holds the inputs of server `i` and client `i`. Returns the outputs of the servers
/// and of the clients, ordered by index.
pub async fn simulate_psm(
    psm: Psm,
    params: &Params,
    inputs: &[(PartyInput, PartyInput)],
) -> Result<(Vec<PartyOutput>, Vec<PartyOutput>), Error> {
    let n = inputs.len();
    if n == 0 {
        return Err(ConfigError::NoParties.into());
    }
    let session = Session::<X25519>::new(n, params);
    let collaborators = SimulatedCollaborators::default();
    let (server_channels, client_channels) = SimpleChannel::links(n, params.channel_timeout);
    let contexts: Vec<_> = [Role::Server, Role::Client]
        .into_iter()
        .flat_map(|role| (0..n).map(move |i| (role, i)))
        .map(|(role, i)| PartyContext::new(role, i, n, psm, params.clone()))
        .collect();
    let parties = contexts.iter().map(|ctx| {
        let (channel, input) = match ctx.role {
            Role::Server => (&server_channels[ctx.index], &inputs[ctx.index].0),
            Role::Client => (&client_channels[ctx.index], &inputs[ctx.index].1),
        };
        run_party(channel, &session, ctx, input, &collaborators)
    });
    let mut outputs = try_join_all(parties).await?;
    let clients = outputs.split_off(n);
    Ok((outputs, clients))
}

/// The client's round-robin bins for the masking pipeline.
fn client_table<C, O, E, K: KeyAgreement>(
    cx: &Context<'_, C, O, E, K>,
) -> Result<Vec<Vec<u64>>, Error> {
    let Params { cnbins, cneles, .. } = *cx.params();
    let table = bins::round_robin(
        &cx.input.elements,
        cnbins,
        cneles,
        cx.filler(),
        &mut rand::rng(),
    )?;
    Ok(table)
}

/// The server's row-major bins for the masking pipeline.
fn server_table<C, O, E, K: KeyAgreement>(
    cx: &Context<'_, C, O, E, K>,
) -> Result<Vec<Vec<u64>>, Error> {
    let Params { snbins, sneles, .. } = *cx.params();
    let table = bins::row_major(
        &cx.input.elements,
        snbins,
        sneles,
        cx.filler(),
        &mut rand::rng(),
    )?;
    Ok(table)
}

/// The number of masked client elements the leader client sends to the leader server.
fn masked_client_len<C, O, E, K: KeyAgreement>(cx: &Context<'_, C, O, E, K>) -> usize {
    cx.ctx.n * cx.params().cnbins * cx.params().cneles
}

fn fold(blocks: &[Block]) -> Vec<u64> {
    blocks.iter().map(Block::fold).collect()
}

/// Masks the client's binned set in both OPRF rounds.
///
/// Returns the fully masked sets of all clients at the leader and `None` at every other client.
async fn mask_as_client<C, O, E, K>(
    cx: &Context<'_, C, O, E, K>,
    table: Vec<Vec<u64>>,
) -> Result<Option<Vec<u64>>, Error>
where
    C: Channel + Sync,
    O: Oprf + Sync,
    K: KeyAgreement,
{
    let PartyContext { index, n, .. } = *cx.ctx;
    let is_center = cx.ctx.is_center();
    let state = cx.state();
    let oprf = &cx.collaborators.oprf;
    let elements = table.concat();

    if !is_center {
        let masked = oprf.evaluate_as_receiver(cx.channel, &elements, 1).await?;
        state.first_round.add(fold(&masked), index)?;
        debug!("Deposited first round");
    }
    let own = elements.clone();
    state
        .first_barrier
        .await_all(is_center, || state.first_round.add(own, index))
        .await?
        .transpose()?;

    if is_center {
        let deposits = complete(state.first_round.data(), n)?;
        let masked = oprf
            .evaluate_as_receiver(cx.channel, &deposits.concat(), n)
            .await?;
        for (i, row) in masked.chunks(elements.len().max(1)).enumerate() {
            state.second_round.add(fold(row), i)?;
        }
        debug!(parties = n, "Masked all client sets");
    }
    state.second_barrier.await_all(is_center, || ()).await?;

    if cx.ctx.is_leader() {
        let masked = complete(state.second_round.data(), n)?;
        Ok(Some(masked.concat()))
    } else {
        Ok(None)
    }
}

/// Masks the server's binned set in both OPRF rounds.
///
/// Returns the fully masked sets of all servers, ordered by index, at the leader and `None` at
/// every other server.
async fn mask_as_server<C, O, E, K>(
    cx: &Context<'_, C, O, E, K>,
    table: Vec<Vec<u64>>,
) -> Result<Option<Vec<Vec<u64>>>, Error>
where
    C: Channel + Sync,
    O: Oprf + Sync,
    K: KeyAgreement,
{
    let PartyContext { index, n, .. } = *cx.ctx;
    let is_center = cx.ctx.is_center();
    let state = cx.state();
    let oprf = &cx.collaborators.oprf;

    if !is_center {
        let masked = oprf.evaluate_as_sender(cx.channel, &table, 1).await?;
        state.first_round.add(fold(&masked.concat()), index)?;
        debug!("Deposited first round");
    }
    let own = table.concat();
    state
        .first_barrier
        .await_all(is_center, || state.first_round.add(own, index))
        .await?
        .transpose()?;

    if is_center {
        let deposits = complete(state.first_round.data(), n)?;
        let masked = oprf.evaluate_as_sender(cx.channel, &deposits, n).await?;
        for (i, row) in masked.iter().enumerate() {
            state.second_round.add(fold(row), i)?;
        }
        debug!(parties = n, "Masked all server sets");
    }
    state.second_barrier.await_all(is_center, || ()).await?;

    if cx.ctx.is_leader() {
        Ok(Some(complete(state.second_round.data(), n)?))
    } else {
        Ok(None)
    }
}

/// Checks that all `n` parties contributed to a round.
fn complete<T>(rows: Vec<T>, n: usize) -> Result<Vec<T>, Error> {
    if rows.len() == n {
        Ok(rows)
    } else {
        Err(Error::IncompleteRound {
            expected: n,
            found: rows.len(),
        })
    }
}
