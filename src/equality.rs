//! Secure batch equality between a client's bins and the server's rows.
//!
//! For every comparison `i` the client holds one element and the server a row of elements. The
//! outcome is the bit "the client element occurs in the server row", split into two XOR shares,
//! one held by each side. Neither share alone reveals the bit.

use std::future::Future;

use rand::Rng;

use crate::channel::{self, Channel, recv_vec_from, send_to};

/// Errors raised during a batch equality.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The operands or shares could not be exchanged.
    #[error(transparent)]
    Channel(#[from] channel::Error),
    /// A server row does not have the configured batch size.
    #[error("row {row} has {len} elements, expected {batch_size}")]
    RowWidth {
        /// Index of the offending row.
        row: usize,
        /// Number of elements in the row.
        len: usize,
        /// The configured batch size.
        batch_size: usize,
    },
}

/// The shape of a batch equality, agreed upon by both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EqualityParams {
    /// Bit length of the compared elements.
    pub bitlen: u32,
    /// Bits per digit of the comparison circuit.
    pub radix: u32,
    /// Number of server elements compared against every client element.
    pub batch_size: usize,
    /// Number of comparisons.
    pub num_cmps: usize,
}

/// A 2-party batch equality collaborator.
pub trait BatchEquality {
    /// Runs the comparisons for the client, returning its share of every outcome.
    fn compare_as_client<C: Channel + Sync>(
        &self,
        channel: &C,
        params: EqualityParams,
        elements: &[u64],
    ) -> impl Future<Output = Result<Vec<bool>, Error>> + Send;

    /// Runs the comparisons for the server, returning its share of every outcome.
    fn compare_as_server<C: Channel + Sync>(
        &self,
        channel: &C,
        params: EqualityParams,
        rows: &[Vec<u64>],
    ) -> impl Future<Output = Result<Vec<bool>, Error>> + Send;
}

/// A batch equality in which the client reveals its elements to the server.
///
/// The server computes every outcome in the clear, keeps a random share and sends the other.
/// The resulting shares are distributed exactly like those of a secure comparison, but the
/// server learns the client's elements. Used by simulations and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct RevealedEquality;

impl BatchEquality for RevealedEquality {
    async fn compare_as_client<C: Channel + Sync>(
        &self,
        channel: &C,
        params: EqualityParams,
        elements: &[u64],
    ) -> Result<Vec<bool>, Error> {
        send_to(channel, "equality operands", &elements).await?;
        let shares = recv_vec_from(channel, "equality shares", params.num_cmps).await?;
        Ok(shares)
    }

    async fn compare_as_server<C: Channel + Sync>(
        &self,
        channel: &C,
        params: EqualityParams,
        rows: &[Vec<u64>],
    ) -> Result<Vec<bool>, Error> {
        if let Some((row, r)) = rows
            .iter()
            .enumerate()
            .find(|(_, r)| r.len() != params.batch_size)
        {
            return Err(Error::RowWidth {
                row,
                len: r.len(),
                batch_size: params.batch_size,
            });
        }
        let elements: Vec<u64> =
            recv_vec_from(channel, "equality operands", params.num_cmps).await?;
        let (own, theirs): (Vec<bool>, Vec<bool>) = {
            let mut rng = rand::rng();
            elements
                .iter()
                .zip(rows)
                .map(|(x, row)| {
                    let eq = row.contains(x);
                    let mask: bool = rng.random();
                    (mask, eq ^ mask)
                })
                .unzip()
        };
        send_to(channel, "equality shares", &theirs).await?;
        Ok(own)
    }
}

#[cfg(test)]
mod tests {
    use super::{BatchEquality, EqualityParams, Error, RevealedEquality};
    use crate::channel::SimpleChannel;

    fn params(num_cmps: usize) -> EqualityParams {
        EqualityParams {
            bitlen: 32,
            radix: 4,
            batch_size: 3,
            num_cmps,
        }
    }

    #[tokio::test]
    async fn shares_xor_to_membership() -> Result<(), Error> {
        let (server, client) = SimpleChannel::pair();
        let rows = vec![vec![1, 2, 3], vec![4, 5, 6], vec![7, 8, 9], vec![1, 1, 1]];
        let elements = [2, 7, 9, 1];
        let (s, c) = tokio::try_join!(
            RevealedEquality.compare_as_server(&server, params(4), &rows),
            RevealedEquality.compare_as_client(&client, params(4), &elements),
        )?;
        let outcome: Vec<bool> = s.iter().zip(&c).map(|(s, c)| s ^ c).collect();
        assert_eq!(outcome, vec![true, false, true, true]);
        Ok(())
    }

    #[tokio::test]
    async fn rows_must_have_batch_width() {
        let (server, _client) = SimpleChannel::pair();
        let err = RevealedEquality
            .compare_as_server(&server, params(1), &[vec![1, 2]])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::RowWidth {
                row: 0,
                len: 2,
                batch_size: 3
            }
        ));
    }
}
