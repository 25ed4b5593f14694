//! Additively homomorphic Paillier encryption.
//!
//! The key generator uses `g = n + 1`, so `λ⁻¹ mod n` serves directly as the decryption
//! factor. Multiplying ciphertexts modulo `n²` adds the encrypted plaintexts modulo `n`.

use std::{fmt, str::FromStr};

use num_bigint::BigUint;
use num_integer::Integer;
use num_traits::{One, Zero};
use rand::{Rng, RngCore};
use tracing::{Level, instrument};

/// Errors raised by key generation, parsing and decryption.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The requested modulus is too small to be generated.
    #[error("a modulus of {0} bits is too small")]
    ModulusTooSmall(usize),
    /// The public key is not of the form `<n>|<g>` with decimal `n` and `g`.
    #[error("malformed public key '{0}'")]
    MalformedPublicKey(String),
    /// The ciphertext is not a decimal number below `n²`.
    #[error("malformed ciphertext '{0}'")]
    MalformedCiphertext(String),
    /// `λ` has no inverse modulo `n`.
    #[error("lambda is not invertible modulo n")]
    NotInvertible,
}

/// The public parameters `(n, g)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    n: BigUint,
    g: BigUint,
    n_squared: BigUint,
}

/// A Paillier ciphertext, an integer modulo `n²`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ciphertext(BigUint);

/// A key pair, held only by the party that decrypts the final accumulator.
#[derive(Debug, Clone)]
pub struct Keypair {
    public: PublicKey,
    lambda: BigUint,
    lambda_inverse: BigUint,
}

impl PublicKey {
    /// Public parameters from their components.
    pub fn new(n: BigUint, g: BigUint) -> Self {
        let n_squared = &n * &n;
        Self { n, g, n_squared }
    }

    /// The modulus `n`.
    pub fn n(&self) -> &BigUint {
        &self.n
    }

    /// The generator `g`.
    pub fn g(&self) -> &BigUint {
        &self.g
    }

    /// Encrypts `m` under fresh randomness.
    pub fn encrypt_number(&self, m: &BigUint) -> Ciphertext {
        let mut rng = rand::rng();
        let r = loop {
            let r = random_below(&self.n, &mut rng);
            if !r.is_zero() && r.gcd(&self.n).is_one() {
                break r;
            }
        };
        let gm = self.g.modpow(m, &self.n_squared);
        let rn = r.modpow(&self.n, &self.n_squared);
        Ciphertext(gm * rn % &self.n_squared)
    }

    /// Encrypts every value.
    pub fn encrypt(&self, values: &[u64]) -> Vec<Ciphertext> {
        values
            .iter()
            .map(|&v| self.encrypt_number(&BigUint::from(v)))
            .collect()
    }

    /// Combines two ciphertexts into an encryption of the sum of their plaintexts.
    pub fn add(&self, a: &Ciphertext, b: &Ciphertext) -> Ciphertext {
        Ciphertext(&a.0 * &b.0 % &self.n_squared)
    }

    /// Parses a ciphertext from its decimal representation, checking that it is below `n²`.
    pub fn parse_ciphertext(&self, s: &str) -> Result<Ciphertext, Error> {
        match BigUint::parse_bytes(s.as_bytes(), 10) {
            Some(c) if c < self.n_squared => Ok(Ciphertext(c)),
            _ => Err(Error::MalformedCiphertext(s.to_string())),
        }
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.n, self.g)
    }
}

impl FromStr for PublicKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        let malformed = || Error::MalformedPublicKey(s.to_string());
        let (n, g) = s.split_once('|').ok_or_else(malformed)?;
        let n = BigUint::parse_bytes(n.as_bytes(), 10).ok_or_else(malformed)?;
        let g = BigUint::parse_bytes(g.as_bytes(), 10).ok_or_else(malformed)?;
        if n <= BigUint::one() {
            return Err(malformed());
        }
        Ok(Self::new(n, g))
    }
}

impl fmt::Display for Ciphertext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl Keypair {
    /// Generates a key pair with a modulus of `bits` bits.
    #[instrument(level = Level::DEBUG, err)]
    pub fn generate(bits: usize) -> Result<Self, Error> {
        if bits < 16 {
            return Err(Error::ModulusTooSmall(bits));
        }
        let mut rng = rand::rng();
        let (p, q) = loop {
            let p = random_prime(bits / 2, &mut rng);
            let q = random_prime(bits - bits / 2, &mut rng);
            if p != q {
                break (p, q);
            }
        };
        let n = &p * &q;
        let lambda = (p - 1u32).lcm(&(q - 1u32));
        let lambda_inverse = lambda.modinv(&n).ok_or(Error::NotInvertible)?;
        let g = &n + 1u32;
        Ok(Self {
            public: PublicKey::new(n, g),
            lambda,
            lambda_inverse,
        })
    }

    /// The public parameters to hand out to the encrypting parties.
    pub fn public(&self) -> &PublicKey {
        &self.public
    }

    /// Decrypts `c` to its plaintext modulo `n`.
    pub fn decrypt_number(&self, c: &Ciphertext) -> BigUint {
        let PublicKey { n, n_squared, .. } = &self.public;
        let u = c.0.modpow(&self.lambda, n_squared);
        let l = (u - 1u32) / n;
        l * &self.lambda_inverse % n
    }
}

const SMALL_PRIMES: [u32; 15] = [3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53];
const MILLER_RABIN_ROUNDS: usize = 40;

fn random_bits(bits: usize, rng: &mut impl RngCore) -> BigUint {
    let mut bytes = vec![0u8; bits.div_ceil(8)];
    rng.fill_bytes(&mut bytes);
    let excess = bytes.len() * 8 - bits;
    if let Some(top) = bytes.last_mut() {
        *top &= 0xff >> excess;
    }
    BigUint::from_bytes_le(&bytes)
}

fn random_below(bound: &BigUint, rng: &mut impl RngCore) -> BigUint {
    let bits = bound.bits() as usize + 64;
    random_bits(bits, rng) % bound
}

/// An odd prime with exactly `bits` bits whose two top bits are set.
fn random_prime(bits: usize, rng: &mut impl Rng) -> BigUint {
    loop {
        let mut candidate = random_bits(bits, rng);
        candidate.set_bit(bits as u64 - 1, true);
        candidate.set_bit(bits as u64 - 2, true);
        candidate.set_bit(0, true);
        if is_probable_prime(&candidate, rng) {
            return candidate;
        }
    }
}

fn is_probable_prime(n: &BigUint, rng: &mut impl Rng) -> bool {
    for p in SMALL_PRIMES {
        if *n == BigUint::from(p) {
            return true;
        }
        if (n % p).is_zero() {
            return false;
        }
    }
    let one = BigUint::one();
    let n_minus_one = n - 1u32;
    let s = n_minus_one.trailing_zeros().unwrap_or(0);
    let d = &n_minus_one >> s;
    let three = BigUint::from(3u32);
    'witness: for _ in 0..MILLER_RABIN_ROUNDS {
        let a = random_below(&(n - &three), rng) + 2u32;
        let mut x = a.modpow(&d, n);
        if x == one || x == n_minus_one {
            continue;
        }
        for _ in 1..s {
            x = &x * &x % n;
            if x == n_minus_one {
                continue 'witness;
            }
        }
        return false;
    }
    true
}
