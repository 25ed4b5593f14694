//! Two-party multiplication of private inputs with a Beaver triple.
//!
//! The server deals a fresh triple `c = a * b`, keeps one additive share of each component and
//! sends the other to the client. The client holds `x`, the server holds `y`. After opening
//! `e = x - a` and `f = y - b`, the client computes `z0 = c0 + a0 * f + b0 * e + e * f` and the
//! server `z1 = c1 + a1 * f + b1 * e`, so that `z0 + z1 = x * y`. Only the client adds the cross
//! term `e * f`.

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{Level, instrument};

use crate::{
    channel::{Channel, Error, recv_from, send_to},
    data_types::RingElem,
};

/// One party's additive shares of a Beaver triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripleShare {
    /// Share of `a`.
    pub a: RingElem,
    /// Share of `b`.
    pub b: RingElem,
    /// Share of `c = a * b`.
    pub c: RingElem,
}

/// Splits `value` into two additive shares.
pub fn split_into_shares(value: RingElem, rng: &mut impl Rng) -> (RingElem, RingElem) {
    let first = RingElem(rng.random());
    (first, value - first)
}

/// Deals a fresh triple, returned as the `(server, client)` shares.
pub fn generate_triple(rng: &mut impl Rng) -> (TripleShare, TripleShare) {
    let a = RingElem(rng.random());
    let b = RingElem(rng.random());
    let c = a * b;
    let (a0, a1) = split_into_shares(a, rng);
    let (b0, b1) = split_into_shares(b, rng);
    let (c0, c1) = split_into_shares(c, rng);
    (
        TripleShare {
            a: a1,
            b: b1,
            c: c1,
        },
        TripleShare {
            a: a0,
            b: b0,
            c: c0,
        },
    )
}

/// The arithmetic share of `x XOR y` for bits `x`, `y`, from a party's own bit and its share of
/// `x * y`.
pub fn xor_share(bit: RingElem, product: RingElem) -> RingElem {
    bit - RingElem(2) * product
}

/// Multiplies the server's `y` with the client's input, returning the server's share of the
/// product.
#[instrument(level = Level::DEBUG, skip_all, err)]
pub async fn multiply_as_server(channel: &impl Channel, y: RingElem) -> Result<RingElem, Error> {
    let (own, theirs) = generate_triple(&mut rand::rng());
    send_to(channel, "beaver triple", &theirs).await?;

    let e1 = -own.a;
    let f1 = y - own.b;
    send_to(channel, "beaver openings", &(e1, f1)).await?;
    let (e0, f0): (RingElem, RingElem) = recv_from(channel, "beaver openings").await?;
    let (e, f) = (e0 + e1, f0 + f1);

    Ok(own.c + own.a * f + own.b * e)
}

/// Multiplies the client's `x` with the server's input, returning the client's share of the
/// product.
#[instrument(level = Level::DEBUG, skip_all, err)]
pub async fn multiply_as_client(channel: &impl Channel, x: RingElem) -> Result<RingElem, Error> {
    let own: TripleShare = recv_from(channel, "beaver triple").await?;

    let e0 = x - own.a;
    let f0 = -own.b;
    let (e1, f1): (RingElem, RingElem) = recv_from(channel, "beaver openings").await?;
    send_to(channel, "beaver openings", &(e0, f0)).await?;
    let (e, f) = (e0 + e1, f0 + f1);

    Ok(own.c + own.a * f + own.b * e + e * f)
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::{
        generate_triple, multiply_as_client, multiply_as_server, split_into_shares, xor_share,
    };
    use crate::{channel::SimpleChannel, data_types::RingElem};

    #[test]
    fn triples_reconstruct() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..100 {
            let (s, c) = generate_triple(&mut rng);
            assert_eq!((s.a + c.a) * (s.b + c.b), s.c + c.c);
            let v = RingElem(-17);
            let (v0, v1) = split_into_shares(v, &mut rng);
            assert_eq!(v0 + v1, v);
        }
    }

    #[tokio::test]
    async fn shares_sum_to_product() -> Result<(), crate::channel::Error> {
        for (x, y) in [(0, 0), (1, 0), (0, 1), (1, 1), (-3, 7), (i64::MAX, 2)] {
            let (server, client) = SimpleChannel::pair();
            let (z1, z0) = tokio::try_join!(
                multiply_as_server(&server, RingElem(y)),
                multiply_as_client(&client, RingElem(x)),
            )?;
            assert_eq!(z0 + z1, RingElem(x) * RingElem(y));
        }
        Ok(())
    }

    #[tokio::test]
    async fn xor_of_bits() -> Result<(), crate::channel::Error> {
        for (x, y) in [(false, false), (true, false), (false, true), (true, true)] {
            let (server, client) = SimpleChannel::pair();
            let (x, y) = (RingElem::from(x), RingElem::from(y));
            let (z1, z0) = tokio::try_join!(
                multiply_as_server(&server, y),
                multiply_as_client(&client, x),
            )?;
            let xor = xor_share(x, z0) + xor_share(y, z1);
            assert_eq!(xor, RingElem::from(x != y));
        }
        Ok(())
    }
}
