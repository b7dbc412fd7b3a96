//! CPU-bound reference workloads.
//!
//! Every function is deterministic: random inputs come from a seeded generator
//! so that all three execution strategies produce identical results.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};

/// Seed for the hash chain.
pub const HASH_SEED: &str = "taskforge-benchmark-seed";

/// Seed for the matrix and sort inputs.
pub const RNG_SEED: u64 = 0x7a5f_0f6e;

/// Largest `n` whose Fibonacci number fits in a `u64`.
pub const MAX_FIBONACCI: u32 = 93;

/// Number of primes `<= limit` (sieve of Eratosthenes).
pub fn sieve_primes(limit: usize) -> usize {
    if limit < 2 {
        return 0;
    }
    let mut composite = vec![false; limit + 1];
    let mut i = 2;
    while i * i <= limit {
        if !composite[i] {
            let mut j = i * i;
            while j <= limit {
                composite[j] = true;
                j += i;
            }
        }
        i += 1;
    }
    (2..=limit).filter(|&n| !composite[n]).count()
}

/// Multiply two random `size × size` matrices and return `C[0][0]`.
pub fn matrix_multiply(size: usize, seed: u64) -> i64 {
    if size == 0 {
        return 0;
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let a: Vec<i64> = (0..size * size).map(|_| rng.gen_range(0..10)).collect();
    let b: Vec<i64> = (0..size * size).map(|_| rng.gen_range(0..10)).collect();
    let mut c = vec![0i64; size * size];

    for i in 0..size {
        for k in 0..size {
            let aik = a[i * size + k];
            for j in 0..size {
                c[i * size + j] += aik * b[k * size + j];
            }
        }
    }
    c[0]
}

/// Iterated SHA-256: `h = sha256(h ++ i)` for `i in 0..iterations`, hex encoded.
pub fn hash_chain(iterations: u64) -> String {
    let mut hash = HASH_SEED.to_string();
    for i in 0..iterations {
        let mut hasher = Sha256::new();
        hasher.update(hash.as_bytes());
        hasher.update(i.to_string().as_bytes());
        hash = hex::encode(hasher.finalize());
    }
    hash
}

/// Memoised Fibonacci. `None` above [`MAX_FIBONACCI`].
pub fn fibonacci(n: u32) -> Option<u64> {
    if n > MAX_FIBONACCI {
        return None;
    }
    let mut memo = vec![None; n as usize + 1];
    Some(fib_memo(n as usize, &mut memo))
}

fn fib_memo(n: usize, memo: &mut [Option<u64>]) -> u64 {
    if n < 2 {
        return n as u64;
    }
    if let Some(v) = memo[n] {
        return v;
    }
    let v = fib_memo(n - 1, memo) + fib_memo(n - 2, memo);
    memo[n] = Some(v);
    v
}

/// Sort `size` random integers; returns the minimum (`None` when empty).
pub fn sort_stress(size: usize, seed: u64) -> Option<i64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut values: Vec<i64> = (0..size).map(|_| rng.gen_range(0..1_000_000)).collect();
    values.sort_unstable();
    values.first().copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sieve_counts_known_values() {
        assert_eq!(sieve_primes(0), 0);
        assert_eq!(sieve_primes(2), 1);
        assert_eq!(sieve_primes(100), 25);
        assert_eq!(sieve_primes(500_000), 41_538);
    }

    #[test]
    fn fibonacci_matches_known_values() {
        assert_eq!(fibonacci(0), Some(0));
        assert_eq!(fibonacci(10), Some(55));
        assert_eq!(fibonacci(35), Some(9_227_465));
        assert_eq!(fibonacci(93), Some(12_200_160_415_121_876_738));
        assert_eq!(fibonacci(94), None);
    }

    #[test]
    fn hash_chain_is_hex_and_deterministic() {
        let a = hash_chain(100);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(a, hash_chain(100));
        assert_ne!(a, hash_chain(101));
    }

    #[test]
    fn seeded_workloads_are_reproducible() {
        assert_eq!(matrix_multiply(20, RNG_SEED), matrix_multiply(20, RNG_SEED));
        assert_eq!(sort_stress(1_000, RNG_SEED), sort_stress(1_000, RNG_SEED));
        assert_eq!(sort_stress(0, RNG_SEED), None);
    }

    #[test]
    fn identity_sized_matrix() {
        assert_eq!(matrix_multiply(0, RNG_SEED), 0);
        let c00 = matrix_multiply(1, RNG_SEED);
        assert!((0..=81).contains(&c00));
    }
}
