//! Solve sessions and entry points.
//!
//! A [`Solver`] owns all working state for one worker thread: the arena,
//! the bound acceleration tier, and the per-attempt diagnostics. Distinct
//! solver instances share nothing, so independent attempts over disjoint
//! nonce ranges can run on separate threads without locking.

use tracing::{debug, info};

use crate::{
    arena::Arena,
    collision::{run_stage, StageStore, Stats},
    digest::{DigestGenerator, Fill},
    params::Config,
    simd::{Capabilities, Tier},
    validate::{extract_solutions, Solution},
    Error,
};

/// Result of one solve attempt. All variants are ordinary outcomes;
/// fatal conditions surface as [`Error`] at session setup instead.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// At least one solution was reported through the callback.
    Solved { solutions: usize },
    /// A stage yielded nothing; `stage == k` means the terminal filter
    /// found no all-zero node. The caller should retry with a new nonce.
    NoCollision { stage: usize },
    /// The cancellation predicate fired at a work boundary.
    Cancelled,
}

/// A solving session: one arena, one acceleration tier, reused across
/// attempts until dropped.
pub struct Solver {
    config: Config,
    caps: Capabilities,
    arena: Arena,
    stats: Stats,
    stores: [StageStore; 2],
}

impl Solver {
    /// Sets up a session for `config`. Allocation failure and a forced
    /// unsupported tier are fatal here, before any hashing begins.
    pub fn new(config: Config) -> Result<Self, Error> {
        config.validate()?;
        let caps = match config.forced_tier {
            Some(tier) => Capabilities::with_forced(tier)?,
            None => Capabilities::new(),
        };
        let arena = Arena::allocate(&config)?;
        info!(
            tier = caps.tier().name(),
            batch_width = caps.batch_width(),
            arena_bytes = arena.usage_bytes(),
            "solver session ready"
        );
        Ok(Solver {
            config,
            caps,
            arena,
            stats: Stats::default(),
            stores: [StageStore::default(), StageStore::default()],
        })
    }

    /// Runs one attempt for `(header, nonce)`.
    ///
    /// `on_solution` is invoked zero or more times with each structurally
    /// complete solution; `cancel` is polled between digest batches and at
    /// stage boundaries.
    pub fn run(
        &mut self,
        header: &[u8],
        nonce: &[u8],
        mut cancel: impl FnMut() -> bool,
        mut on_solution: impl FnMut(&Solution),
    ) -> Outcome {
        self.stats = Stats::default();
        let caps = self.caps;
        let requested = self.config.population.min(self.arena.digest_capacity());

        let generator = DigestGenerator::new(self.config.params, header, nonce);
        let population =
            match generator.fill(self.arena.digest_table_mut(), requested, &caps, &mut cancel) {
                Fill::Cancelled => return Outcome::Cancelled,
                Fill::Complete { generated } => generated as usize,
            };

        self.search(population, &mut cancel, &mut on_solution)
    }

    /// The collision pipeline over an already-filled digest table.
    fn search(
        &mut self,
        population: usize,
        cancel: &mut dyn FnMut() -> bool,
        on_solution: &mut dyn FnMut(&Solution),
    ) -> Outcome {
        let merge_stages = self.config.params.merge_stages();
        let caps = self.caps;

        let mut in_count = population;
        for stage in 0..merge_stages {
            if cancel() {
                return Outcome::Cancelled;
            }

            let (front, back) = self.stores.split_at_mut(1);
            let (prev, out): (Option<&StageStore>, &mut StageStore) = if stage == 0 {
                (None, &mut front[0])
            } else if stage % 2 == 0 {
                (Some(&back[0]), &mut front[0])
            } else {
                (Some(&front[0]), &mut back[0])
            };

            let emitted = run_stage(
                &self.config,
                &caps,
                self.arena.stage_view(stage),
                in_count,
                prev,
                out,
                stage,
                &mut self.stats,
            );
            if emitted == 0 {
                return Outcome::NoCollision { stage };
            }
            in_count = emitted;
        }

        if cancel() {
            return Outcome::Cancelled;
        }

        let final_stage = merge_stages - 1;
        let digests = self.arena.stage_buffer(final_stage % 2);
        let store = &self.stores[final_stage % 2];
        let found = extract_solutions(
            self.config.params,
            store,
            digests,
            &mut self.stats,
            |s| on_solution(s),
        );
        debug!(candidates = store.len(), found, "terminal stage filtered");

        if found == 0 {
            Outcome::NoCollision {
                stage: merge_stages,
            }
        } else {
            Outcome::Solved { solutions: found }
        }
    }

    /// Allocated working-memory footprint in megabytes.
    pub fn memory_usage_mb(&self) -> f64 {
        self.arena.usage_bytes() as f64 / (1024.0 * 1024.0)
    }

    /// The acceleration tier bound for this session.
    pub fn tier(&self) -> Tier {
        self.caps.tier()
    }

    /// Diagnostic counters from the most recent attempt.
    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

/// One-shot callback-style driver around [`Solver`].
///
/// `on_done` fires exactly once with the attempt outcome, or with the
/// setup error if the session could not be configured.
pub fn solve(
    header: &[u8],
    nonce: &[u8],
    cancel: impl FnMut() -> bool,
    on_solution: impl FnMut(&Solution),
    on_done: impl FnOnce(Result<Outcome, Error>),
) {
    match Solver::new(Config::default()) {
        Ok(mut solver) => {
            let outcome = solver.run(header, nonce, cancel, on_solution);
            on_done(Ok(outcome));
        }
        Err(e) => on_done(Err(e)),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::{Outcome, Solver};
    use crate::{
        params::{Config, Params, DIGEST_BYTES},
        validate::validate_indices,
        Error, Tier,
    };

    fn mini_config() -> Config {
        Config {
            params: Params::new(96, 3).unwrap(),
            population: 16,
            stage_cap: 64,
            bucket_bits: 4,
            bucket_cap: 16,
            forced_tier: None,
        }
    }

    /// Writes the four 3-byte windows of a 12-byte (n = 96) digest.
    fn put_windows(table: &mut [u8], slot: usize, windows: [u32; 4]) {
        let d = &mut table[slot * DIGEST_BYTES..(slot + 1) * DIGEST_BYTES];
        d.fill(0);
        for (w, value) in windows.iter().enumerate() {
            d[w * 3] = (value >> 16) as u8;
            d[w * 3 + 1] = (value >> 8) as u8;
            d[w * 3 + 2] = *value as u8;
        }
    }

    /// A hand-built population whose only solution is the leaf set {0..7}:
    /// window 0 pairs the leaves, window 1 pairs the pairs, window 2 pairs
    /// the quads, and window 3 cancels over the full set.
    fn plant_collision_tree(table: &mut [u8]) {
        put_windows(table, 0, [0x000001, 0x0000AA, 0x000011, 0x000071]);
        put_windows(table, 1, [0x000001, 0x0000BB, 0x000022, 0x000072]);
        put_windows(table, 2, [0x000002, 0x0000CC, 0x000033, 0x000073]);
        put_windows(table, 3, [0x000002, 0x0000DD, 0x000044, 0x000074]);
        put_windows(table, 4, [0x000003, 0x0000EE, 0x000055, 0x000075]);
        put_windows(table, 5, [0x000003, 0x0000CC, 0x000066, 0x000076]);
        put_windows(table, 6, [0x000004, 0x0000F0, 0x000077, 0x000077]);
        put_windows(table, 7, [0x000004, 0x0000D2, 0x000000, 0x000070]);
        // Decoys, each alone in its own stage-0 bucket.
        for slot in 8..16 {
            let w0 = (slot as u32) << 20;
            put_windows(table, slot, [w0, 0x000500 + slot as u32, 0, 0]);
        }
    }

    #[test]
    fn pipeline_finds_the_planted_solution() {
        let mut solver = Solver::new(mini_config()).unwrap();
        plant_collision_tree(solver.arena.digest_table_mut());

        let mut reported = Vec::new();
        let outcome = solver.search(16, &mut || false, &mut |s| {
            // 8 indices * 25 bits each on the wire.
            assert_eq!(s.to_minimal().len(), 25);
            reported.push(s.indices().to_vec())
        });

        assert_eq!(outcome, Outcome::Solved { solutions: 1 });
        assert_eq!(reported, vec![vec![0, 1, 2, 3, 4, 5, 6, 7]]);
    }

    #[test]
    fn pipeline_is_deterministic() {
        let mut solver = Solver::new(mini_config()).unwrap();

        let mut first = Vec::new();
        plant_collision_tree(solver.arena.digest_table_mut());
        let outcome_a = solver.search(16, &mut || false, &mut |s| {
            first.push(s.indices().to_vec())
        });

        let mut second = Vec::new();
        plant_collision_tree(solver.arena.digest_table_mut());
        let outcome_b = solver.search(16, &mut || false, &mut |s| {
            second.push(s.indices().to_vec())
        });

        assert_eq!(outcome_a, outcome_b);
        assert_eq!(first, second);
    }

    #[test]
    fn real_hash_attempts_reproduce() {
        let config = Config {
            population: 1000,
            ..Config::default()
        };

        let run = || {
            let mut solver = Solver::new(config.clone()).unwrap();
            let mut solutions = Vec::new();
            let outcome = solver.run(b"AAA", b"0", || false, |s| {
                solutions.push(s.indices().to_vec())
            });
            (outcome, solutions)
        };

        let (outcome_a, solutions_a) = run();
        let (outcome_b, solutions_b) = run();
        assert_eq!(outcome_a, outcome_b);
        assert_eq!(solutions_a, solutions_b);

        // Any solution that did surface must independently validate.
        for indices in &solutions_a {
            validate_indices(config.params, b"AAA", b"0", indices).unwrap();
        }
    }

    #[test]
    fn empty_population_stops_gracefully() {
        let mut solver = Solver::new(mini_config()).unwrap();
        let outcome = solver.search(0, &mut || false, &mut |_| {
            panic!("no solution can exist")
        });
        assert_eq!(outcome, Outcome::NoCollision { stage: 0 });
    }

    #[test]
    fn forced_tier_fails_before_work() {
        // 512-bit forcing only succeeds on AVX-512 hosts; on anything else
        // it must fail at setup. Skip silently where the host supports it.
        let config = Config {
            forced_tier: Some(Tier::Tier512),
            ..mini_config()
        };
        match Solver::new(config) {
            Ok(solver) => assert_eq!(solver.tier(), Tier::Tier512),
            Err(e) => assert_matches!(
                e,
                Error::UnsupportedTier {
                    requested: Tier::Tier512,
                    ..
                }
            ),
        }
    }

    #[test]
    fn cancellation_reports_no_solutions() {
        let mut solver = Solver::new(mini_config()).unwrap();

        // Cancel before any work at all.
        let outcome = solver.run(b"AAA", b"0", || true, |_| {
            panic!("cancelled attempts must not report solutions")
        });
        assert_eq!(outcome, Outcome::Cancelled);

        // Cancel at the first stage boundary: digests generate, then the
        // engine halts within one unit of work.
        let mut polls = 0;
        let outcome = solver.run(
            b"AAA",
            b"0",
            move || {
                polls += 1;
                polls > 1
            },
            |_| panic!("cancelled attempts must not report solutions"),
        );
        assert_eq!(outcome, Outcome::Cancelled);
    }

    #[test]
    fn solve_driver_reports_completion_exactly_once() {
        let mut completions = 0;
        super::solve(
            b"header",
            b"nonce",
            || true,
            |_| {},
            |result| {
                completions += 1;
                assert_eq!(result.unwrap(), Outcome::Cancelled);
            },
        );
        assert_eq!(completions, 1);
    }
}
