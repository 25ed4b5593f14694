//! Capacity-bounded assignment of a party's elements to bins.
//!
//! Every layout has exactly `bins` rows of exactly `capacity` elements. Slots that are not
//! filled by real elements receive random filler from `[element_bound, FILLER_MAX]`, which lies
//! outside the range of real elements and below the two comparison pads.

use rand::Rng;

use crate::config::ConfigError;

/// Pads the client side of padded comparisons in the secret-shared equality protocol.
pub const CLIENT_PAD: u64 = u64::MAX;

/// Pads the server side of padded comparisons, distinct from [`CLIENT_PAD`].
pub const SERVER_PAD: u64 = u64::MAX - 1;

/// The largest filler value.
pub const FILLER_MAX: u64 = u64::MAX - 2;

/// Draws random filler values above the range of real elements.
#[derive(Debug, Clone, Copy)]
pub struct Filler {
    low: u64,
}

impl Filler {
    /// Filler for real elements strictly below `element_bound`.
    pub fn above(element_bound: u64) -> Self {
        Self {
            low: element_bound.min(FILLER_MAX),
        }
    }

    /// Draws a single filler value.
    pub fn sample(&self, rng: &mut impl Rng) -> u64 {
        rng.random_range(self.low..=FILLER_MAX)
    }
}

fn check_fits(len: usize, bins: usize, capacity: usize) -> Result<(), ConfigError> {
    if len > bins * capacity {
        Err(ConfigError::InputTooLarge {
            len,
            bins,
            capacity,
        })
    } else {
        Ok(())
    }
}

/// Assigns element `i` to bin `i mod bins`, then fills every bin up to `capacity`.
pub fn round_robin(
    elements: &[u64],
    bins: usize,
    capacity: usize,
    filler: Filler,
    rng: &mut impl Rng,
) -> Result<Vec<Vec<u64>>, ConfigError> {
    check_fits(elements.len(), bins, capacity)?;
    let mut table = vec![Vec::with_capacity(capacity); bins];
    for (i, &element) in elements.iter().enumerate() {
        table[i % bins].push(element);
    }
    for bin in table.iter_mut() {
        bin.resize_with(capacity, || filler.sample(rng));
    }
    Ok(table)
}

/// Fills bin after bin with the elements in order, then pads the remaining slots.
pub fn row_major(
    elements: &[u64],
    bins: usize,
    capacity: usize,
    filler: Filler,
    rng: &mut impl Rng,
) -> Result<Vec<Vec<u64>>, ConfigError> {
    check_fits(elements.len(), bins, capacity)?;
    let mut rest = elements.iter().copied();
    Ok((0..bins)
        .map(|_| {
            (0..capacity)
                .map(|_| rest.next().unwrap_or_else(|| filler.sample(rng)))
                .collect()
        })
        .collect())
}

/// Appends rows consisting only of `pad` until the table has `rows` rows.
pub fn pad_rows(table: &mut Vec<Vec<u64>>, rows: usize, pad: u64) {
    let width = table.first().map_or(1, Vec::len);
    while table.len() < rows {
        table.push(vec![pad; width]);
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    const BOUND: u64 = 1 << 32;

    fn input(max_bins: usize, max_capacity: usize) -> BoxedStrategy<(Vec<u64>, usize, usize)> {
        (1..max_bins, 1..max_capacity)
            .prop_flat_map(|(bins, capacity)| {
                (
                    prop::collection::vec(0..BOUND, 0..=bins * capacity),
                    Just(bins),
                    Just(capacity),
                )
            })
            .boxed()
    }

    proptest! {
        #[test]
        fn row_major_keeps_order_and_pads_outside((elements, bins, capacity) in input(20, 20), seed in any::<u64>()) {
            let mut rng = StdRng::seed_from_u64(seed);
            let table = row_major(&elements, bins, capacity, Filler::above(BOUND), &mut rng).unwrap();
            prop_assert_eq!(table.len(), bins);
            prop_assert!(table.iter().all(|bin| bin.len() == capacity));
            let flat: Vec<u64> = table.into_iter().flatten().collect();
            prop_assert_eq!(&flat[..elements.len()], &elements[..]);
            prop_assert!(flat[elements.len()..].iter().all(|&f| (BOUND..=FILLER_MAX).contains(&f)));
        }

        #[test]
        fn round_robin_keeps_order_and_pads_outside((elements, bins, capacity) in input(20, 20), seed in any::<u64>()) {
            let mut rng = StdRng::seed_from_u64(seed);
            let table = round_robin(&elements, bins, capacity, Filler::above(BOUND), &mut rng).unwrap();
            prop_assert_eq!(table.len(), bins);
            for (b, bin) in table.iter().enumerate() {
                prop_assert_eq!(bin.len(), capacity);
                let real: Vec<u64> = elements.iter().copied().skip(b).step_by(bins).collect();
                prop_assert_eq!(&bin[..real.len()], &real[..]);
                prop_assert!(bin[real.len()..].iter().all(|&f| f >= BOUND && f <= FILLER_MAX));
            }
        }
    }

    #[test]
    fn oversized_input_is_rejected() {
        let mut rng = StdRng::seed_from_u64(0);
        let err = row_major(&[1, 2, 3], 1, 2, Filler::above(BOUND), &mut rng).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InputTooLarge {
                len: 3,
                bins: 1,
                capacity: 2
            }
        );
        assert!(round_robin(&[1, 2, 3], 3, 1, Filler::above(BOUND), &mut rng).is_ok());
    }

    #[test]
    fn comparison_padding() {
        let mut table = vec![vec![1, 2], vec![3, 4]];
        pad_rows(&mut table, 4, SERVER_PAD);
        assert_eq!(table[2], vec![SERVER_PAD; 2]);
        assert_eq!(table.len(), 4);
        let mut bins = vec![vec![7]];
        pad_rows(&mut bins, 1, CLIENT_PAD);
        assert_eq!(bins, vec![vec![7]]);
    }
}
