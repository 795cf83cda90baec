//! Pure planning math for one posting hour. Randomness is injected so the
//! cadence can be tested with seeded generators.

use std::collections::HashSet;
use std::time::Duration;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::aliexpress::Product;
use crate::config::PostingConfig;

/// Seconds of uniform jitter applied around each post time.
const JITTER_SECS: i64 = 30;
/// Keyword categories searched per hour.
pub const CATEGORIES_PER_HOUR: usize = 3;

/// Number of posts for `hour`: random in [min, max], boosted on peak hours,
/// then nudged by +-2 and clamped back into [min, max].
pub fn hourly_target<R: Rng>(rng: &mut R, posting: &PostingConfig, hour: u32) -> u32 {
    let (min, max) = (posting.min_per_hour, posting.max_per_hour);
    let mut posts = rng.gen_range(min..=max);

    if posting.is_peak_hour(hour) {
        posts = (posts + rng.gen_range(2..=5)).min(max);
    }

    let variation: i64 = rng.gen_range(-2..=2);
    let adjusted = (posts as i64 + variation).max(min as i64) as u32;
    adjusted.min(max)
}

/// Delays for `count` posts spread over the `remaining_secs` left in the
/// hour, sorted ascending.
pub fn post_delays<R: Rng>(rng: &mut R, count: usize, remaining_secs: u64) -> Vec<Duration> {
    if remaining_secs == 0 {
        return vec![Duration::ZERO; count];
    }
    let last = remaining_secs as i64 - 1;
    let mut delays: Vec<Duration> = (0..count)
        .map(|_| {
            let base = rng.gen_range(0..=last);
            let jitter = rng.gen_range(-JITTER_SECS..=JITTER_SECS);
            Duration::from_secs((base + jitter).clamp(0, last) as u64)
        })
        .collect();
    delays.sort();
    delays
}

pub fn pick_categories<R: Rng>(rng: &mut R, categories: &[String]) -> Vec<String> {
    categories
        .choose_multiple(rng, CATEGORIES_PER_HOUR)
        .cloned()
        .collect()
}

/// Keep the first occurrence of each product id, dropping id-less entries.
pub fn dedup_products(products: Vec<Product>) -> Vec<Product> {
    let mut seen = HashSet::new();
    products
        .into_iter()
        .filter(|p| !p.product_id.is_empty() && seen.insert(p.product_id.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aliexpress::fallback::sample_products;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_target_stays_within_bounds() {
        let posting = PostingConfig::default();
        for seed in 0..200 {
            let mut rng = StdRng::seed_from_u64(seed);
            for hour in [9, 12, 20, 23] {
                let target = hourly_target(&mut rng, &posting, hour);
                assert!((20..=25).contains(&target), "target {} out of range", target);
            }
        }
    }

    #[test]
    fn test_fixed_frequency_is_exact() {
        let mut posting = PostingConfig::default();
        posting.set_frequency(7, 7).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(hourly_target(&mut rng, &posting, 12), 7);
        assert_eq!(hourly_target(&mut rng, &posting, 3), 7);
    }

    #[test]
    fn test_delays_fit_the_remaining_hour() {
        let mut rng = StdRng::seed_from_u64(42);
        let delays = post_delays(&mut rng, 25, 1800);
        assert_eq!(delays.len(), 25);
        assert!(delays.iter().all(|d| *d < Duration::from_secs(1800)));
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));

        assert_eq!(post_delays(&mut rng, 2, 0), vec![Duration::ZERO; 2]);
    }

    #[test]
    fn test_pick_categories_is_distinct() {
        let mut rng = StdRng::seed_from_u64(3);
        let categories = PostingConfig::default().categories;
        let picked = pick_categories(&mut rng, &categories);
        assert_eq!(picked.len(), 3);
        let unique: HashSet<_> = picked.iter().collect();
        assert_eq!(unique.len(), 3);

        let few = vec!["only".to_string()];
        assert_eq!(pick_categories(&mut rng, &few), few);
    }

    #[test]
    fn test_dedup_products() {
        let mut products = sample_products("T", 3);
        products.extend(sample_products("T", 2));
        let mut nameless = sample_products("T", 1).remove(0);
        nameless.product_id.clear();
        products.push(nameless);

        let unique = dedup_products(products);
        assert_eq!(unique.len(), 3);
    }
}
