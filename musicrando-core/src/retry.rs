use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::warn;

use crate::{RandomiserError, Result};

/// Runs `attempt` with a fresh RNG until it stops failing with
/// `CapacityExceeded`, at most `retries + 1` times. Each attempt's RNG is
/// seeded from a master RNG seeded with `seed`, so a run is reproducible.
pub fn retry_allocation<T, F>(seed: u64, retries: usize, mut attempt: F) -> Result<T>
where
    F: FnMut(StdRng, usize) -> Result<T>,
{
    let mut master = StdRng::seed_from_u64(seed);
    let mut attempt_no = 0;

    loop {
        let rng = StdRng::seed_from_u64(master.gen());
        match attempt(rng, attempt_no) {
            Err(err @ RandomiserError::CapacityExceeded { .. }) if attempt_no < retries => {
                warn!(attempt = attempt_no + 1, error = %err, "allocation did not fit, retrying");
                attempt_no += 1;
            }
            other => return other,
        }
    }
}
