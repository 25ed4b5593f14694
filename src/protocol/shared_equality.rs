//! Secret-shared equality: every pair compares its bins with a secure batch equality, reduces
//! the outcome shares to the parity bit of its matches and converts it into additive shares of
//! that bit. The servers mask their shares with the pairwise keys, so that only the sums over all
//! parties of each role are meaningful, and the two leaders combine these sums.

use tracing::debug;

use super::{Context, Error, PartyOutput};
use crate::{
    beaver::{multiply_as_client, multiply_as_server, xor_share},
    bins::{self, CLIENT_PAD, SERVER_PAD},
    channel::{Channel, recv_from, send_to},
    data_types::RingElem,
    equality::{BatchEquality, EqualityParams},
    keys::KeyAgreement,
};

fn equality_params<C, O, E, K: KeyAgreement>(cx: &Context<'_, C, O, E, K>) -> EqualityParams {
    let params = cx.params();
    EqualityParams {
        bitlen: params.bitlen,
        radix: params.radix,
        batch_size: params.batch_size,
        num_cmps: cx.ctx.num_cmps(),
    }
}

fn parity(shares: &[bool]) -> RingElem {
    RingElem::from(shares.iter().fold(false, |acc, &s| acc ^ s))
}

pub(super) async fn client<C, O, E, K>(cx: &Context<'_, C, O, E, K>) -> Result<PartyOutput, Error>
where
    C: Channel + Sync,
    E: BatchEquality + Sync,
    K: KeyAgreement,
{
    let params = equality_params(cx);
    let mut table = bins::round_robin(
        &cx.input.elements,
        cx.params().nbins,
        1,
        cx.filler(),
        &mut rand::rng(),
    )?;
    bins::pad_rows(&mut table, params.num_cmps, CLIENT_PAD);
    let elements = table.concat();

    let shares = cx
        .collaborators
        .equality
        .compare_as_client(cx.channel, params, &elements)
        .await?;
    let x = parity(&shares);
    let z = multiply_as_client(cx.channel, x).await?;

    let state = cx.state();
    state.results.add(xor_share(x, z), cx.ctx.index)?;
    let total = state
        .result_barrier
        .await_all(cx.ctx.is_leader(), || state.results.data().iter().sum::<RingElem>())
        .await?;
    let Some(total) = total else {
        return Ok(PartyOutput::Contributed);
    };

    let (server_z, server_total): (RingElem, RingElem) =
        recv_from(cx.channel, "revealed aggregate").await?;
    send_to(cx.channel, "revealed aggregate", &(z, total)).await?;
    debug!(product = %(z + server_z), "Revealed leader product");
    Ok(PartyOutput::Aggregate(total + server_total))
}

pub(super) async fn server<C, O, E, K>(cx: &Context<'_, C, O, E, K>) -> Result<PartyOutput, Error>
where
    C: Channel + Sync,
    E: BatchEquality + Sync,
    K: KeyAgreement + Sync,
{
    let params = equality_params(cx);
    let mut rows = bins::row_major(
        &cx.input.elements,
        cx.params().nbins,
        params.batch_size,
        cx.filler(),
        &mut rand::rng(),
    )?;
    bins::pad_rows(&mut rows, params.num_cmps, SERVER_PAD);

    let keys = cx
        .session
        .keys
        .run(cx.ctx.index, &cx.collaborators.key_agreement)
        .await?;
    debug!("Pairwise keys ready");

    let shares = cx
        .collaborators
        .equality
        .compare_as_server(cx.channel, params, &rows)
        .await?;
    let y = parity(&shares);
    let z = multiply_as_server(cx.channel, y).await?;

    let state = cx.state();
    let masked = xor_share(y, z) + keys.iter().sum::<RingElem>();
    state.results.add(masked, cx.ctx.index)?;
    let total = state
        .result_barrier
        .await_all(cx.ctx.is_leader(), || state.results.data().iter().sum::<RingElem>())
        .await?;
    let Some(total) = total else {
        return Ok(PartyOutput::Contributed);
    };

    send_to(cx.channel, "revealed aggregate", &(z, total)).await?;
    let (client_z, client_total): (RingElem, RingElem) =
        recv_from(cx.channel, "revealed aggregate").await?;
    debug!(product = %(z + client_z), "Revealed leader product");
    Ok(PartyOutput::Aggregate(total + client_total))
}

#[cfg(test)]
mod tests {
    use super::parity;
    use crate::data_types::RingElem;

    #[test]
    fn parity_of_shares() {
        assert_eq!(parity(&[]), RingElem::ZERO);
        assert_eq!(parity(&[true, false, true]), RingElem::ZERO);
        assert_eq!(parity(&[true, true, true]), RingElem::ONE);
    }
}
