//! Homomorphic sum: the leader client holds a Paillier key pair, every server encrypts the
//! values of its elements under the public key, and the leader server multiplies the
//! ciphertexts of all matching elements into an accumulator that only the leader client can
//! decrypt.

use std::collections::HashMap;

use num_bigint::BigUint;
use num_traits::Zero;
use tracing::debug;

use super::{
    Context, Error, PartyOutput, client_table, mask_as_client, mask_as_server, masked_client_len,
    server_table,
};
use crate::{
    channel::{Channel, recv_from, recv_vec_from, send_to},
    keys::KeyAgreement,
    oprf::Oprf,
    paillier::{Ciphertext, Keypair, PublicKey},
};

pub(super) async fn client<C, O, E, K>(cx: &Context<'_, C, O, E, K>) -> Result<PartyOutput, Error>
where
    C: Channel + Sync,
    O: Oprf + Sync,
    K: KeyAgreement,
{
    let table = client_table(cx)?;
    let keypair = if cx.ctx.is_leader() {
        let keypair = Keypair::generate(cx.params().paillier_bits)?;
        let public_key = keypair.public().to_string();
        send_to(cx.channel, "paillier public key", &public_key).await?;
        Some(keypair)
    } else {
        None
    };
    let (Some(masked), Some(keypair)) = (mask_as_client(cx, table).await?, keypair) else {
        return Ok(PartyOutput::Contributed);
    };
    send_to(cx.channel, "masked client sets", &masked).await?;
    let sum: String = recv_from(cx.channel, "encrypted sum").await?;
    let sum = keypair.public().parse_ciphertext(&sum)?;
    Ok(PartyOutput::Sum(keypair.decrypt_number(&sum)))
}

pub(super) async fn server<C, O, E, K>(cx: &Context<'_, C, O, E, K>) -> Result<PartyOutput, Error>
where
    C: Channel + Sync,
    O: Oprf + Sync,
    K: KeyAgreement,
{
    let table = server_table(cx)?;
    let session = cx.session;
    let (index, is_leader) = (cx.ctx.index, cx.ctx.is_leader());

    if is_leader {
        let public_key: String = recv_from(cx.channel, "paillier public key").await?;
        session
            .public_key
            .add(public_key.parse::<PublicKey>()?, index)?;
    }
    session.public_key_barrier.await_all(is_leader, || ()).await?;
    let public_key = session.public_key.get(0).ok_or(Error::MissingPublicKey)?;

    let mut values = cx.input.values.clone();
    values.resize(table.iter().map(Vec::len).sum(), 0);
    session.encrypted.add(public_key.encrypt(&values), index)?;
    debug!(values = values.len(), "Encrypted values");
    let encrypted = session
        .encrypted_barrier
        .await_all(is_leader, || session.encrypted.data())
        .await?;

    let (Some(server_sets), Some(encrypted)) = (mask_as_server(cx, table).await?, encrypted) else {
        return Ok(PartyOutput::Contributed);
    };
    let client_sets: Vec<u64> =
        recv_vec_from(cx.channel, "masked client sets", masked_client_len(cx)).await?;
    let (sum, matches) = accumulate(&public_key, &client_sets, &server_sets, &encrypted)?;
    debug!(matches, "Accumulated matching ciphertexts");
    send_to(cx.channel, "encrypted sum", &sum.to_string()).await?;
    Ok(PartyOutput::EncryptedSum { matches })
}

/// Multiplies the ciphertext of every server element that matches a client element into an
/// accumulator that starts as a fresh encryption of zero.
fn accumulate(
    public_key: &PublicKey,
    client_sets: &[u64],
    server_sets: &[Vec<u64>],
    encrypted: &[Vec<Ciphertext>],
) -> Result<(Ciphertext, u64), Error> {
    let mut positions: HashMap<u64, Vec<(usize, usize)>> = HashMap::new();
    for (party, set) in server_sets.iter().enumerate() {
        for (slot, &x) in set.iter().enumerate() {
            positions.entry(x).or_default().push((party, slot));
        }
    }
    let mut sum = public_key.encrypt_number(&BigUint::zero());
    let mut matches = 0;
    for x in client_sets {
        for &(party, slot) in positions.get(x).into_iter().flatten() {
            let c = encrypted
                .get(party)
                .and_then(|values| values.get(slot))
                .ok_or(Error::MissingCiphertext { party, slot })?;
            sum = public_key.add(&sum, c);
            matches += 1;
        }
    }
    Ok((sum, matches))
}

#[cfg(test)]
mod tests {
    use num_bigint::BigUint;

    use super::accumulate;
    use crate::{paillier::Keypair, protocol::Error};

    #[test]
    fn accumulates_matching_values() -> Result<(), Error> {
        let keys = Keypair::generate(256)?;
        let pk = keys.public();
        let server_sets = vec![vec![10, 11], vec![12, 10]];
        let encrypted = vec![pk.encrypt(&[1, 2]), pk.encrypt(&[4, 8])];

        let (sum, matches) = accumulate(pk, &[10, 12, 99], &server_sets, &encrypted)?;
        assert_eq!(matches, 3);
        assert_eq!(keys.decrypt_number(&sum), BigUint::from(1u32 + 8 + 4));

        let (sum, matches) = accumulate(pk, &[99], &server_sets, &encrypted)?;
        assert_eq!(matches, 0);
        assert_eq!(keys.decrypt_number(&sum), BigUint::from(0u32));

        let err = accumulate(pk, &[12], &server_sets, &encrypted[..1]).unwrap_err();
        assert!(matches!(err, Error::MissingCiphertext { party: 1, slot: 0 }));
        Ok(())
    }
}
