//! Cardinality threshold: the leader server counts the matches between all masked client and
//! server sets and tells the leader client only how the count compares to the thresholds.

use std::collections::HashMap;

use tracing::debug;

use super::{
    Context, Error, PartyOutput, client_table, mask_as_client, mask_as_server, masked_client_len,
    server_table,
};
use crate::{
    channel::{Channel, recv_from, recv_vec_from, send_to},
    config::ThresholdClass,
    keys::KeyAgreement,
    oprf::Oprf,
};

pub(super) async fn client<C, O, E, K>(cx: &Context<'_, C, O, E, K>) -> Result<PartyOutput, Error>
where
    C: Channel + Sync,
    O: Oprf + Sync,
    K: KeyAgreement,
{
    let table = client_table(cx)?;
    let Some(masked) = mask_as_client(cx, table).await? else {
        return Ok(PartyOutput::Contributed);
    };
    send_to(cx.channel, "masked client sets", &masked).await?;
    let class: u64 = recv_from(cx.channel, "threshold class").await?;
    let class = ThresholdClass::from_u64(class).ok_or(Error::InvalidThresholdClass(class))?;
    Ok(PartyOutput::Threshold(class))
}

pub(super) async fn server<C, O, E, K>(cx: &Context<'_, C, O, E, K>) -> Result<PartyOutput, Error>
where
    C: Channel + Sync,
    O: Oprf + Sync,
    K: KeyAgreement,
{
    let table = server_table(cx)?;
    let Some(server_sets) = mask_as_server(cx, table).await? else {
        return Ok(PartyOutput::Contributed);
    };
    let client_sets: Vec<u64> =
        recv_vec_from(cx.channel, "masked client sets", masked_client_len(cx)).await?;
    let count = count_matches(&client_sets, &server_sets);
    let class = cx.params().thresholds.classify(count);
    debug!(count, ?class, "Counted matches");
    send_to(cx.channel, "threshold class", &class.as_u64()).await?;
    Ok(PartyOutput::MatchCount { count, class })
}

/// Counts every pair of equal client and server elements.
fn count_matches(client_sets: &[u64], server_sets: &[Vec<u64>]) -> u64 {
    let mut occurrences: HashMap<u64, u64> = HashMap::new();
    for &x in server_sets.iter().flatten() {
        *occurrences.entry(x).or_default() += 1;
    }
    client_sets
        .iter()
        .filter_map(|x| occurrences.get(x))
        .sum()
}
