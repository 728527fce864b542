//! Genetic programming operations: fitness-proportionate (roulette)
//! selection, elitist duplication, subtree crossover, subtree-replacement
//! mutation, and the one-generation evolution driver.

use rand::Rng;
use serde::Serialize;

use crate::fitness::{score_population, FitnessCase};
use crate::{GpError, Individual, Tree};

// ---------------------------------------------------------------------------
// Roulette selection
// ---------------------------------------------------------------------------

/// Build the cumulative probability table for fitness-proportionate
/// selection: entry `i` is `P[i-1] + fitness[i] / totalFitness`.
///
/// A population whose fitness sums to zero falls back to uniform
/// probabilities instead of dividing by zero; the run continues.
pub fn build_prob_table(scores: &[usize]) -> Vec<f64> {
    assert!(!scores.is_empty(), "cannot build a probability table for an empty population");

    let total: usize = scores.iter().sum();
    let mut table = Vec::with_capacity(scores.len());
    let mut cumulative = 0.0;
    if total == 0 {
        let uniform = 1.0 / scores.len() as f64;
        for _ in scores {
            cumulative += uniform;
            table.push(cumulative);
        }
    } else {
        for &fitness in scores {
            cumulative += fitness as f64 / total as f64;
            table.push(cumulative);
        }
    }
    table
}

/// Return the smallest index `i` with `r < table[i]`. Falls back to the last
/// index when accumulated floating-point roundoff leaves `r` past the end.
pub fn select_index(table: &[f64], r: f64) -> usize {
    for (i, &p) in table.iter().enumerate() {
        if r < p {
            return i;
        }
    }
    table.len() - 1
}

/// Draw one index from the table, fitness-proportionately.
pub fn weighted_select(table: &[f64], rng: &mut impl Rng) -> usize {
    select_index(table, rng.gen::<f64>())
}

// ---------------------------------------------------------------------------
// Crossover and mutation
// ---------------------------------------------------------------------------

/// Exchange the subtrees rooted at pre-order indices `ia` of `a` and `ib` of
/// `b`. Index 0 swaps a whole tree. Both trees end with exact size caches;
/// `a` grows by `size(b[ib]) - size(a[ia])` and vice versa.
pub fn swap_subtrees(a: &mut Tree, ia: usize, b: &mut Tree, ib: usize) {
    let node_a = a.node_at(ia);
    let node_b = b.node_at(ib);
    let sub_a = a.subtree_copy(node_a);
    let sub_b = b.subtree_copy(node_b);
    a.replace_at(node_a, &sub_b);
    b.replace_at(node_b, &sub_a);
}

/// Subtree crossover: pick a uniform pre-order index in each child and swap
/// the subtrees rooted there.
pub fn crossover(a: &mut Tree, b: &mut Tree, rng: &mut impl Rng) {
    let ia = rng.gen_range(0..a.size());
    let ib = rng.gen_range(0..b.size());
    swap_subtrees(a, ia, b, ib);
}

/// Per-node mutation: each node is independently hit with probability
/// `mutation_rate`; a hit node is replaced by a freshly generated random
/// subtree with the same node budget, so the tree's total size never grows.
pub fn mutate(tree: &mut Tree, mutation_rate: f64, num_lines: usize, rng: &mut impl Rng) {
    let size = tree.size();
    for i in 0..size {
        if rng.gen_bool(mutation_rate) {
            let id = tree.node_at(i);
            let budget = tree.subtree_size(id);
            let fresh = Tree::generate(budget, num_lines, rng);
            tree.replace_at(id, &fresh);
        }
    }
}

// ---------------------------------------------------------------------------
// Population
// ---------------------------------------------------------------------------

/// Run parameters consumed read-only by the evolution driver.
#[derive(Debug, Clone, Copy)]
pub struct EvolutionParams {
    pub pop_size: usize,
    /// Generated trees have sizes in `[1, max_tree_size)`.
    pub max_tree_size: usize,
    /// Probability that a selected pair undergoes crossover.
    pub crossover_rate: f64,
    /// Per-node mutation probability.
    pub mutation_rate: f64,
    /// Terminal index space (address lines + data lines).
    pub num_lines: usize,
}

/// Per-generation summary, captured after scoring and before replacement.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationStats {
    pub generation: u32,
    pub best_fitness: usize,
    pub mean_fitness: f64,
    pub mean_size: f64,
    /// Rendered expression of the generation's best individual.
    pub best_expression: String,
    pub best_size: usize,
}

/// A fixed-size population of program trees undergoing evolution.
pub struct Population {
    pub individuals: Vec<Individual>,
    pub generation: u32,
}

/// Elite slots per generation: one tenth of the population, rounded up, then
/// rounded up again to the nearest even count so the crossover fill always
/// works in pairs.
fn elite_count(pop_size: usize) -> usize {
    let mut count = pop_size.div_ceil(10);
    if count % 2 == 1 {
        count += 1;
    }
    count.min(pop_size)
}

impl Population {
    /// Create an initial population of independently generated random trees.
    pub fn new(params: &EvolutionParams, rng: &mut impl Rng) -> Population {
        assert!(params.max_tree_size >= 2, "max_tree_size must be at least 2");
        let individuals = (0..params.pop_size)
            .map(|_| Individual {
                tree: Tree::generate(
                    rng.gen_range(1..params.max_tree_size),
                    params.num_lines,
                    rng,
                ),
                fitness: 0,
            })
            .collect();
        Population {
            individuals,
            generation: 0,
        }
    }

    /// Reference to the highest-fitness individual, as last scored.
    pub fn best(&self) -> Option<&Individual> {
        self.individuals.iter().max_by_key(|i| i.fitness)
    }

    /// Run one generation:
    /// 1. Score every individual against the fitness-case table.
    /// 2. Build the fitness-proportionate probability table.
    /// 3. Elitist duplication: weighted-select ~10% of the population
    ///    (rounded up to an even count) and clone them verbatim; each pick
    ///    zeroes that score in a working copy and rebuilds the duplication
    ///    table so it cannot be duplicated again. Elites stay eligible as
    ///    crossover parents, which draw from the initial table.
    /// 4. Fill the remaining slots in pairs: deep-copy two weighted-selected
    ///    parents, cross them over with probability `crossover_rate`, then
    ///    mutate each child independently.
    /// 5. Replace the population wholesale.
    pub fn evolve_generation(
        &mut self,
        table: &[FitnessCase],
        params: &EvolutionParams,
        rng: &mut impl Rng,
    ) -> Result<GenerationStats, GpError> {
        let pop_size = self.individuals.len();

        // Step 1: score.
        let scores = score_population(&mut self.individuals, table)?;
        let stats = self.stats(&scores);

        // Step 2: initial probability table. Crossover parent selection keeps
        // using this one for the whole generation.
        let parent_table = build_prob_table(&scores);

        // Step 3: elitist duplication.
        let mut next = Vec::with_capacity(pop_size);
        let mut working = scores;
        let mut elite_table = parent_table.clone();
        for _ in 0..elite_count(pop_size) {
            let index = weighted_select(&elite_table, rng);
            next.push(Individual {
                tree: self.individuals[index].tree.clone(),
                fitness: 0,
            });
            working[index] = 0; // ineligible for further duplication
            elite_table = build_prob_table(&working);
        }

        // Step 4: crossover/mutation fill.
        while next.len() < pop_size {
            let parent_a = weighted_select(&parent_table, rng);
            let parent_b = weighted_select(&parent_table, rng);
            let mut child_a = self.individuals[parent_a].tree.clone();
            let mut child_b = self.individuals[parent_b].tree.clone();

            if rng.gen::<f64>() < params.crossover_rate {
                crossover(&mut child_a, &mut child_b, rng);
            }
            mutate(&mut child_a, params.mutation_rate, params.num_lines, rng);
            mutate(&mut child_b, params.mutation_rate, params.num_lines, rng);

            next.push(Individual {
                tree: child_a,
                fitness: 0,
            });
            if next.len() < pop_size {
                next.push(Individual {
                    tree: child_b,
                    fitness: 0,
                });
            }
        }

        // Step 5: wholesale replacement; the old trees drop here.
        self.individuals = next;
        self.generation += 1;
        Ok(stats)
    }

    fn stats(&self, scores: &[usize]) -> GenerationStats {
        let count = self.individuals.len() as f64;
        let best_index = scores
            .iter()
            .enumerate()
            .max_by_key(|(_, &fitness)| fitness)
            .map(|(i, _)| i)
            .unwrap_or(0);
        let best = &self.individuals[best_index];
        GenerationStats {
            generation: self.generation,
            best_fitness: best.fitness,
            mean_fitness: scores.iter().sum::<usize>() as f64 / count,
            mean_size: self
                .individuals
                .iter()
                .map(|i| i.tree.size() as f64)
                .sum::<f64>()
                / count,
            best_expression: best.tree.to_string(),
            best_size: best.tree.size(),
        }
    }
}
