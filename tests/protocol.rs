use std::time::Duration;

use mpsm::{
    channel::SimpleChannel,
    config::{ConfigError, PartyContext, PartyInput, Params, ThresholdClass, Thresholds},
    data_types::{Psm, RingElem, Role},
    protocol::{Error, PartyOutput, Session, SimulatedCollaborators, run_party, simulate_psm},
    sync::BarrierError,
};
use num_bigint::BigUint;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn small_params() -> Params {
    Params {
        cnbins: 4,
        cneles: 1,
        snbins: 1,
        sneles: 4,
        nbins: 2,
        batch_size: 2,
        paillier_bits: 256,
        ..Params::default()
    }
}

fn contributed(outputs: &[PartyOutput]) -> bool {
    outputs.iter().all(|o| *o == PartyOutput::Contributed)
}

#[tokio::test]
async fn cardinality_threshold_classifies_matches() -> Result<(), Error> {
    init_tracing();
    let inputs = vec![
        (PartyInput::elements([2, 3, 4]), PartyInput::elements([1, 2, 3])),
        (PartyInput::elements([10, 11]), PartyInput::elements([20, 21])),
    ];
    for (g, expected) in [
        (1, ThresholdClass::ExceedsThreshold),
        (2, ThresholdClass::WithinThreshold),
    ] {
        let params = Params {
            thresholds: Thresholds::up_to(g),
            ..small_params()
        };
        let (servers, clients) =
            simulate_psm(Psm::CardinalityThreshold, &params, &inputs).await?;
        assert_eq!(
            servers[0],
            PartyOutput::MatchCount {
                count: 2,
                class: expected
            }
        );
        assert_eq!(clients[0], PartyOutput::Threshold(expected));
        assert!(contributed(&servers[1..]) && contributed(&clients[1..]));
    }
    Ok(())
}

#[tokio::test]
async fn cardinality_threshold_without_matches() -> Result<(), Error> {
    init_tracing();
    let inputs = vec![
        (PartyInput::elements([1]), PartyInput::elements([2])),
        (PartyInput::elements([3]), PartyInput::elements([4])),
        (PartyInput::elements([]), PartyInput::elements([5, 6])),
    ];
    let (servers, clients) =
        simulate_psm(Psm::CardinalityThreshold, &small_params(), &inputs).await?;
    assert_eq!(
        servers[0],
        PartyOutput::MatchCount {
            count: 0,
            class: ThresholdClass::NoMatch
        }
    );
    assert_eq!(clients[0], PartyOutput::Threshold(ThresholdClass::NoMatch));
    Ok(())
}

#[tokio::test]
async fn cardinality_threshold_single_pair() -> Result<(), Error> {
    init_tracing();
    let inputs = vec![(PartyInput::elements([7, 8]), PartyInput::elements([8]))];
    let (servers, clients) =
        simulate_psm(Psm::CardinalityThreshold, &small_params(), &inputs).await?;
    assert_eq!(
        servers[0],
        PartyOutput::MatchCount {
            count: 1,
            class: ThresholdClass::WithinThreshold
        }
    );
    assert_eq!(
        clients[0],
        PartyOutput::Threshold(ThresholdClass::WithinThreshold)
    );
    Ok(())
}

#[tokio::test]
async fn homomorphic_sum_of_matching_values() -> Result<(), Error> {
    init_tracing();
    let inputs = vec![
        (
            PartyInput::with_values([(5, 100), (6, 7)]),
            PartyInput::elements([5, 9]),
        ),
        (
            PartyInput::with_values([(8, 1), (12, 30)]),
            PartyInput::elements([12]),
        ),
        (PartyInput::with_values([(4, 50)]), PartyInput::elements([3])),
    ];
    let (servers, clients) = simulate_psm(Psm::HomomorphicSum, &small_params(), &inputs).await?;
    assert_eq!(servers[0], PartyOutput::EncryptedSum { matches: 2 });
    assert_eq!(clients[0], PartyOutput::Sum(BigUint::from(130u32)));
    assert!(contributed(&servers[1..]) && contributed(&clients[1..]));
    Ok(())
}

#[tokio::test]
async fn homomorphic_sum_without_matches_is_zero() -> Result<(), Error> {
    init_tracing();
    let inputs = vec![
        (PartyInput::with_values([(1, 10)]), PartyInput::elements([2])),
        (PartyInput::with_values([(3, 20)]), PartyInput::elements([])),
    ];
    let (servers, clients) = simulate_psm(Psm::HomomorphicSum, &small_params(), &inputs).await?;
    assert_eq!(servers[0], PartyOutput::EncryptedSum { matches: 0 });
    assert_eq!(clients[0], PartyOutput::Sum(BigUint::from(0u32)));
    Ok(())
}

#[tokio::test]
async fn shared_equality_sums_parities() -> Result<(), Error> {
    init_tracing();
    // one bin matches in the first and the last pair, both bins in the second pair cancel out
    let inputs = vec![
        (PartyInput::elements([5, 6, 8, 9]), PartyInput::elements([5, 7])),
        (PartyInput::elements([1, 3, 2, 4]), PartyInput::elements([1, 2])),
        (PartyInput::elements([9]), PartyInput::elements([9])),
    ];
    let (servers, clients) =
        simulate_psm(Psm::SecretSharedEquality, &small_params(), &inputs).await?;
    assert_eq!(servers[0], PartyOutput::Aggregate(RingElem(2)));
    assert_eq!(clients[0], PartyOutput::Aggregate(RingElem(2)));
    assert!(contributed(&servers[1..]) && contributed(&clients[1..]));
    Ok(())
}

#[tokio::test]
async fn shared_equality_pads_partial_batches() -> Result<(), Error> {
    init_tracing();
    let params = Params {
        nbins: 3,
        ..small_params()
    };
    let inputs = vec![
        (PartyInput::elements([1, 2, 3, 4, 5]), PartyInput::elements([9, 9, 5])),
        (PartyInput::elements([]), PartyInput::elements([])),
    ];
    let (servers, clients) = simulate_psm(Psm::SecretSharedEquality, &params, &inputs).await?;
    assert_eq!(servers[0], PartyOutput::Aggregate(RingElem(1)));
    assert_eq!(clients[0], PartyOutput::Aggregate(RingElem(1)));
    Ok(())
}

#[tokio::test]
async fn invalid_inputs_abort_before_the_run() {
    init_tracing();
    let inputs = vec![(PartyInput::elements([1]), PartyInput::elements([1, 2, 3, 4, 5]))];
    let err = simulate_psm(Psm::CardinalityThreshold, &small_params(), &inputs)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Config(ConfigError::InputTooLarge {
            len: 5,
            bins: 4,
            capacity: 1
        })
    ));

    let err = simulate_psm(Psm::HomomorphicSum, &small_params(), &[])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Config(ConfigError::NoParties)));
}

#[tokio::test]
async fn missing_parties_time_out_at_barriers() {
    init_tracing();
    let params = Params {
        barrier_timeout: Some(Duration::from_millis(50)),
        ..small_params()
    };
    let session: Session = Session::new(2, &params);
    let (server, _client) = SimpleChannel::pair();
    let ctx = PartyContext::new(Role::Server, 0, 2, Psm::CardinalityThreshold, params);
    let err = run_party(
        &server,
        &session,
        &ctx,
        &PartyInput::elements([1]),
        &SimulatedCollaborators::default(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, Error::Barrier(BarrierError::Timeout { .. })));
}

#[tokio::test]
async fn sessions_reject_other_party_counts() {
    init_tracing();
    let params = small_params();
    let session: Session = Session::new(3, &params);
    let (server, _client) = SimpleChannel::pair();
    let ctx = PartyContext::new(Role::Server, 0, 2, Psm::CardinalityThreshold, params);
    let err = run_party(
        &server,
        &session,
        &ctx,
        &PartyInput::default(),
        &SimulatedCollaborators::default(),
    )
    .await
    .unwrap_err();
    assert!(matches!(
        err,
        Error::SessionMismatch {
            session: 3,
            party: 2
        }
    ));
}

#[tokio::test]
async fn parties_with_other_bin_layouts_are_rejected() {
    init_tracing();
    let n = 3;
    let params = small_params();
    let session: Session = Session::new(n, &params);
    let (server_channels, client_channels) = SimpleChannel::links(n, params.channel_timeout);
    let collaborators = SimulatedCollaborators::default();
    let contexts: Vec<_> = [2, 6, 4]
        .into_iter()
        .enumerate()
        .flat_map(|(i, cnbins)| {
            let client_params = Params {
                cnbins,
                ..params.clone()
            };
            [
                PartyContext::new(Role::Server, i, n, Psm::CardinalityThreshold, params.clone()),
                PartyContext::new(Role::Client, i, n, Psm::CardinalityThreshold, client_params),
            ]
        })
        .collect();
    let input = PartyInput::elements([2]);
    let parties = contexts.iter().map(|ctx| {
        let channel = match ctx.role {
            Role::Server => &server_channels[ctx.index],
            Role::Client => &client_channels[ctx.index],
        };
        run_party(channel, &session, ctx, &input, &collaborators)
    });
    let err = futures::future::try_join_all(parties).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Config(ConfigError::ParamsMismatch {
            role: Role::Client,
            ..
        })
    ));
}

#[tokio::test]
async fn empty_comparison_batches_are_rejected() {
    init_tracing();
    let params = Params {
        batch_size: 0,
        ..small_params()
    };
    let session: Session = Session::new(1, &params);
    let (_server, client) = SimpleChannel::pair();
    let ctx = PartyContext::new(Role::Client, 0, 1, Psm::SecretSharedEquality, params);
    let err = run_party(
        &client,
        &session,
        &ctx,
        &PartyInput::elements([1]),
        &SimulatedCollaborators::default(),
    )
    .await
    .unwrap_err();
    assert!(matches!(
        err,
        Error::Config(ConfigError::ZeroSized("batch_size"))
    ));
}
