//! Picks which queued flags get submitted this period.
//!
//! Every group (one sploit against one team) gets an equal share of the
//! limit. Groups smaller than their share are taken whole and what they
//! leave over is split among the rest, so groups are visited from smallest
//! to largest and the share only ever grows. An oversized group gets its
//! share picked at random plus one spare flag, and the spares fill whatever
//! room integer division left at the end.

use rand::seq::SliceRandom;
use rand::Rng;

/// Selects at most `limit` items from `groups`. Output order is random.
pub fn fair_share<T, R>(groups: Vec<Vec<T>>, limit: usize, rng: &mut R) -> Vec<T>
where
    R: Rng + ?Sized,
{
    if groups.is_empty() {
        return Vec::new();
    }

    let mut groups = groups;
    groups.sort_by_key(|group| group.len());

    let mut places_left = limit;
    let mut group_count = groups.len();
    let mut share = places_left / group_count;

    let mut result = Vec::with_capacity(limit.min(groups.iter().map(Vec::len).sum()));
    let mut residuals = Vec::new();

    for mut group in groups {
        if group.len() <= share {
            places_left -= group.len();
            result.append(&mut group);

            group_count -= 1;
            if group_count > 0 {
                share = places_left / group_count;
            }
        } else {
            // share + 1 distinct flags, the last one is the spare
            group.shuffle(rng);
            group.truncate(share + 1);
            if let Some(spare) = group.pop() {
                residuals.push(spare);
            }
            result.append(&mut group);
        }
    }

    let room = limit.saturating_sub(result.len()).min(residuals.len());
    residuals.shuffle(rng);
    residuals.truncate(room);
    result.append(&mut residuals);

    result.shuffle(rng);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    /// groups of distinct numbers, group `g` holds `g * 1000 + i`
    fn groups(sizes: &[usize]) -> Vec<Vec<usize>> {
        sizes
            .iter()
            .enumerate()
            .map(|(g, &size)| (0..size).map(|i| g * 1000 + i).collect())
            .collect()
    }

    fn from_group(result: &[usize], group: usize) -> usize {
        result.iter().filter(|&&v| v / 1000 == group).count()
    }

    #[test]
    fn empty_input() {
        let mut rng = StdRng::seed_from_u64(1);
        let picked = fair_share(Vec::<Vec<u32>>::new(), 10, &mut rng);
        assert!(picked.is_empty());
    }

    #[test]
    fn zero_limit_takes_nothing() {
        let mut rng = StdRng::seed_from_u64(2);
        let picked = fair_share(groups(&[1, 5, 40]), 0, &mut rng);
        assert!(picked.is_empty());
    }

    #[test]
    fn big_limit_takes_everything() {
        let mut rng = StdRng::seed_from_u64(3);
        let input = groups(&[3, 1, 7]);
        let all: HashSet<usize> = input.iter().flatten().copied().collect();

        let picked = fair_share(input, 100, &mut rng);
        assert_eq!(picked.len(), 11);
        assert_eq!(picked.into_iter().collect::<HashSet<_>>(), all);
    }

    #[test]
    fn small_groups_then_sampling() {
        // 1 + 2 fit their share, the large group gets the remaining 3
        for seed in 0..50 {
            let mut rng = StdRng::seed_from_u64(seed);
            let picked = fair_share(groups(&[1, 2, 10]), 6, &mut rng);

            assert_eq!(picked.len(), 6);
            assert_eq!(from_group(&picked, 0), 1);
            assert_eq!(from_group(&picked, 1), 2);
            assert_eq!(from_group(&picked, 2), 3);
        }
    }

    #[test]
    fn residuals_fill_the_remainder() {
        // share is 10 / 3 = 3, leaving one place for a spare
        let mut rng = StdRng::seed_from_u64(4);
        let picked = fair_share(groups(&[20, 20, 20]), 10, &mut rng);
        assert_eq!(picked.len(), 10);

        let mut counts: Vec<usize> = (0..3).map(|g| from_group(&picked, g)).collect();
        counts.sort();
        assert_eq!(counts, vec![3, 3, 4]);
    }

    #[test]
    fn invariants_hold() {
        let shapes: &[&[usize]] = &[&[1], &[5, 5], &[1, 1, 1, 50], &[7, 3, 9, 2, 30], &[100]];

        for (seed, sizes) in shapes.iter().enumerate() {
            for limit in [0, 1, 2, 5, 13, 40, 500] {
                let mut rng = StdRng::seed_from_u64(seed as u64 * 1000 + limit as u64);
                let input = groups(sizes);
                let all: HashSet<usize> = input.iter().flatten().copied().collect();
                let total = all.len();

                let picked = fair_share(input, limit, &mut rng);
                let unique: HashSet<usize> = picked.iter().copied().collect();

                assert!(picked.len() <= limit);
                assert!(picked.len() <= total);
                assert_eq!(picked.len(), limit.min(total));
                assert_eq!(unique.len(), picked.len(), "no flag twice");
                assert!(unique.is_subset(&all));

                // groups below the final share are always taken whole
                for (g, &size) in sizes.iter().enumerate() {
                    if size <= limit / sizes.len() {
                        assert_eq!(from_group(&picked, g), size);
                    }
                }
            }
        }
    }

    #[test]
    fn equal_groups_are_treated_equally() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut totals = [0usize; 2];

        // 2 groups, limit 3: each gets 1 plus a coin flip for the spare
        for _ in 0..2000 {
            let picked = fair_share(groups(&[10, 10]), 3, &mut rng);
            totals[0] += from_group(&picked, 0);
            totals[1] += from_group(&picked, 1);
        }

        assert_eq!(totals[0] + totals[1], 6000);
        let diff = totals[0].abs_diff(totals[1]);
        assert!(diff < 300, "totals {totals:?}");
    }
}
