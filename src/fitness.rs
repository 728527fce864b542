//! Fitness evaluation for evolved multiplexer circuits.
//!
//! A candidate is scored against the exhaustive table of multiplexer
//! configurations: one fitness point per configuration whose expected output
//! bit it reproduces.

use crate::{GpError, Individual, Tree};

/// The target multiplexer: `address_lines` address bits selecting among
/// `2^address_lines` data lines.
#[derive(Debug, Clone, Copy)]
pub struct Multiplexer {
    address_lines: usize,
}

impl Multiplexer {
    pub fn new(address_lines: usize) -> Multiplexer {
        assert!(address_lines >= 1, "multiplexer needs at least one address line");
        Multiplexer { address_lines }
    }

    pub fn address_lines(&self) -> usize {
        self.address_lines
    }

    pub fn data_lines(&self) -> usize {
        1 << self.address_lines
    }

    /// Total terminal lines a tree may read: address bits first, then data.
    pub fn num_lines(&self) -> usize {
        self.address_lines + self.data_lines()
    }

    /// Number of enumerated configurations, one per data line.
    pub fn num_configurations(&self) -> usize {
        self.data_lines()
    }

    /// The fitness case for configuration `value`: the address bits hold the
    /// binary digits of `value` and the data lines are one-hot at `value`, so
    /// the addressed data line carries the expected output bit.
    pub fn fitness_case(&self, value: usize) -> FitnessCase {
        debug_assert!(value < self.num_configurations());
        let address: Vec<bool> = (0..self.address_lines)
            .map(|i| value & (1 << i) != 0)
            .collect();
        let data: Vec<bool> = (0..self.data_lines()).map(|i| i == value).collect();
        let expected = data[value];
        FitnessCase {
            address,
            data,
            expected,
        }
    }

    /// Exhaustive, ordered fitness-case table over every configuration.
    pub fn fitness_table(&self) -> Vec<FitnessCase> {
        (0..self.num_configurations())
            .map(|value| self.fitness_case(value))
            .collect()
    }
}

/// One multiplexer configuration and its expected output bit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FitnessCase {
    /// Address bits, least significant first.
    pub address: Vec<bool>,
    /// Data line values.
    pub data: Vec<bool>,
    /// The correct output for this configuration.
    pub expected: bool,
}

impl FitnessCase {
    /// Indexed line lookup as consumed by terminal nodes: indices below the
    /// address width read address bits, the rest read data lines.
    pub fn line(&self, index: usize) -> Result<bool, GpError> {
        let address_width = self.address.len();
        if index < address_width {
            Ok(self.address[index])
        } else if index < address_width + self.data.len() {
            Ok(self.data[index - address_width])
        } else {
            Err(GpError::TerminalOutOfRange {
                index,
                lines: address_width + self.data.len(),
            })
        }
    }
}

/// Count the fitness cases whose expected output the tree reproduces.
/// Range `[0, table.len()]`; higher is better.
pub fn score(tree: &Tree, table: &[FitnessCase]) -> Result<usize, GpError> {
    let mut fitness = 0;
    for case in table {
        if tree.evaluate(case)? == case.expected {
            fitness += 1;
        }
    }
    Ok(fitness)
}

/// Score every individual in place and return the fitness vector.
pub fn score_population(
    individuals: &mut [Individual],
    table: &[FitnessCase],
) -> Result<Vec<usize>, GpError> {
    let mut scores = Vec::with_capacity(individuals.len());
    for individual in individuals.iter_mut() {
        individual.fitness = score(&individual.tree, table)?;
        scores.push(individual.fitness);
    }
    Ok(scores)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Op, Tree};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_table_is_exhaustive() {
        let mux = Multiplexer::new(2);
        let table = mux.fitness_table();
        assert_eq!(table.len(), 4);
        for (value, case) in table.iter().enumerate() {
            assert_eq!(case.address.len(), 2);
            assert_eq!(case.data.len(), 4);
            // Address bits are the binary digits of the configuration value.
            let decoded = case
                .address
                .iter()
                .enumerate()
                .fold(0usize, |acc, (i, &bit)| acc | ((bit as usize) << i));
            assert_eq!(decoded, value);
            // Data lines are one-hot at the addressed position.
            assert_eq!(case.data.iter().filter(|&&b| b).count(), 1);
            assert!(case.data[value]);
            assert_eq!(case.expected, case.data[decoded]);
        }
    }

    #[test]
    fn test_line_lookup_order() {
        let mux = Multiplexer::new(2);
        let case = mux.fitness_case(2);
        assert!(!case.line(0).unwrap()); // address bit 0 of value 2
        assert!(case.line(1).unwrap()); // address bit 1 of value 2
        assert!(case.line(4).unwrap()); // data line 2, one-hot
        assert!(!case.line(5).unwrap());
        assert!(case.line(6).is_err());
    }

    #[test]
    fn test_perfect_multiplexer_scores_full() {
        let mux = Multiplexer::new(2);
        // (if x1 (if x0 x2 x3) (if x0 x4 x5)) routes the addressed data line
        // to the output for every configuration.
        let tree = Tree::branch(
            Op::If,
            vec![
                Tree::leaf(1),
                Tree::branch(Op::If, vec![Tree::leaf(0), Tree::leaf(2), Tree::leaf(3)]),
                Tree::branch(Op::If, vec![Tree::leaf(0), Tree::leaf(4), Tree::leaf(5)]),
            ],
        );
        let table = mux.fitness_table();
        assert_eq!(score(&tree, &table).unwrap(), mux.num_configurations());
    }

    #[test]
    fn test_fitness_bound() {
        let mux = Multiplexer::new(3);
        let table = mux.fitness_table();
        let mut rng = StdRng::seed_from_u64(41);
        for _ in 0..50 {
            let tree = Tree::generate(rng.gen_range(1..40), mux.num_lines(), &mut rng);
            let fitness = score(&tree, &table).unwrap();
            assert!(fitness <= table.len());
        }
    }

    #[test]
    fn test_score_population_fills_fitness() {
        let mux = Multiplexer::new(2);
        let table = mux.fitness_table();
        let mut individuals = vec![
            Individual {
                tree: Tree::branch(Op::Or, vec![Tree::leaf(2), Tree::leaf(3)]),
                fitness: 0,
            },
            Individual {
                tree: Tree::leaf(2),
                fitness: 0,
            },
        ];
        let scores = score_population(&mut individuals, &table).unwrap();
        assert_eq!(scores, vec![2, 1]);
        assert_eq!(individuals[0].fitness, 2);
        assert_eq!(individuals[1].fitness, 1);
    }
}
