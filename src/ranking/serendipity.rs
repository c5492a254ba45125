//! Serendipity Selector: reserve a share of the output for articles outside
//! the top-scored set, sampled uniformly with a caller-provided RNG.

use rand::Rng;

use crate::ingest::types::Article;

pub struct SerendipitySplit {
    /// The leading `top_count` candidates, in score order.
    pub top: Vec<Article>,
    /// Sampled from everything after `top`, kept in score order, flagged.
    pub picks: Vec<Article>,
}

/// Number of non-serendipity slots: `floor(n · (1 − reserve))`.
pub fn top_count(n: usize, reserve: f64) -> usize {
    // Small epsilon so e.g. 20 · 0.8 = 15.999… still floors to 16.
    ((n as f64) * (1.0 - reserve) + 1e-9).floor().max(0.0) as usize
}

/// Split `sorted` into the top slice and a uniform sample of the remainder.
///
/// With fewer than `n` candidates the output is simply shorter.
pub fn select<R: Rng + ?Sized>(
    sorted: Vec<Article>,
    reserve: f64,
    n: usize,
    rng: &mut R,
) -> SerendipitySplit {
    let mut top = sorted;
    let keep = top_count(n, reserve).min(n).min(top.len());
    let pool = top.split_off(keep);

    let want = n.saturating_sub(keep).min(pool.len());
    let mut chosen = rand::seq::index::sample(rng, pool.len(), want).into_vec();
    chosen.sort_unstable();

    let mut slots: Vec<Option<Article>> = pool.into_iter().map(Some).collect();
    let picks = chosen
        .into_iter()
        .filter_map(|i| slots[i].take())
        .map(|mut a| {
            a.serendipity = true;
            a
        })
        .collect();

    SerendipitySplit { top, picks }
}
