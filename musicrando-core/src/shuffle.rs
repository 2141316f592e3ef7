use rand::seq::SliceRandom;
use rand::Rng;

/// The only source of randomness the allocation engine sees.
pub trait Shuffler {
    fn shuffle<T>(&mut self, items: &mut [T]);
}

pub struct RandomShuffler<R: Rng> {
    rng: R,
}

impl<R: Rng> RandomShuffler<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }
}

impl<R: Rng> Shuffler for RandomShuffler<R> {
    fn shuffle<T>(&mut self, items: &mut [T]) {
        items.shuffle(&mut self.rng);
    }
}

/// Leaves every sequence in its original order.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoShuffle;

impl Shuffler for NoShuffle {
    fn shuffle<T>(&mut self, _items: &mut [T]) {}
}

/// Builds `source` repeated enough whole times to cover `count` entries
/// (at least once), shuffles the full sequence and keeps the first `count`.
pub(crate) fn spread<S: Shuffler>(source: &[u8], count: usize, shuffler: &mut S) -> Vec<u8> {
    if source.is_empty() || count == 0 {
        return Vec::new();
    }

    let reps = count.div_ceil(source.len()).max(1);
    let mut pool: Vec<u8> = source
        .iter()
        .copied()
        .cycle()
        .take(source.len() * reps)
        .collect();
    shuffler.shuffle(&mut pool);
    pool.truncate(count);
    pool
}
