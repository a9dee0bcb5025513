//! Prime lookup for the FDN reverberator.
//!
//! Delay line lengths are chosen as distinct primes so the lines stay
//! mutually untuned. The table covers every length a 5-second line can ask
//! for.

use once_cell::sync::Lazy;

use crate::config;

/// Sieve bound: the longest delay any effect requests, with headroom.
const PRIME_LIMIT: usize = config::SR as usize * 5 + 1000;

static PRIMES: Lazy<Vec<u32>> = Lazy::new(|| {
    let mut is_composite = vec![false; PRIME_LIMIT + 1];
    let mut primes = Vec::with_capacity(20000);
    for n in 2..=PRIME_LIMIT {
        if is_composite[n] {
            continue;
        }
        primes.push(n as u32);
        let mut m = n * n;
        while m <= PRIME_LIMIT {
            is_composite[m] = true;
            m += n;
        }
    }
    primes
});

/// Largest prime in the table.
pub fn max_prime() -> u32 {
    *PRIMES.last().expect("prime table is never empty")
}

/// Closest prime to `input`, ignoring any value in `exclude`.
///
/// The exclusion set lets the caller pick several distinct primes near the
/// same target.
pub fn closest_prime_excluding(input: u32, exclude: &[u32]) -> u32 {
    let primes = &*PRIMES;
    let upper = primes.partition_point(|&p| p <= input);
    let mut lower = upper.saturating_sub(1);
    let mut upper = upper;

    while lower > 0 && exclude.contains(&primes[lower]) {
        lower -= 1;
    }
    while upper < primes.len() && exclude.contains(&primes[upper]) {
        upper += 1;
    }

    let lower_ok = !exclude.contains(&primes[lower]);
    let lower_error = if lower_ok {
        input.saturating_sub(primes[lower])
    } else {
        u32::MAX
    };
    let upper_error = if upper < primes.len() {
        primes[upper] - input
    } else {
        u32::MAX
    };

    if lower_error <= upper_error {
        primes[lower]
    } else {
        primes[upper]
    }
}

/// Closest prime to `input`.
pub fn closest_prime(input: u32) -> u32 {
    closest_prime_excluding(input, &[])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_nearby_primes() {
        assert_eq!(closest_prime(2), 2);
        assert_eq!(closest_prime(10), 11);
        assert_eq!(closest_prime(100), 101);
    }

    #[test]
    fn exclusion_forces_distinct_choices() {
        let a = closest_prime(1000);
        let b = closest_prime_excluding(1000, &[a]);
        let c = closest_prime_excluding(1000, &[a, b]);
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_ne!(a, c);
    }

    #[test]
    fn table_covers_five_seconds() {
        assert!(max_prime() as usize >= config::SR as usize * 5);
    }
}
