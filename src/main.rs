//! Mux-Evolve: evolve boolean multiplexer circuits by genetic programming.
//!
//! Runs a fixed number of generations of fitness-proportionate selection,
//! elitist duplication, subtree crossover, and mutation, reporting progress
//! at intervals and writing a final JSON report.

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::time::Instant;

use mux_evolve::evolution::{EvolutionParams, GenerationStats, Population};
use mux_evolve::fitness::Multiplexer;
use mux_evolve::GpError;

/// Run configuration. Consumed read-only; the engine itself never loads or
/// validates configuration.
struct Config {
    address_lines: usize,
    pop_size: usize,
    num_generations: u32,
    max_tree_size: usize,
    crossover_rate: f64,
    mutation_rate: f64,
    report_interval: u32,
}

impl Config {
    fn default_full() -> Self {
        Config {
            address_lines: 3,
            pop_size: 500,
            num_generations: 200,
            max_tree_size: 40,
            crossover_rate: 0.7,
            mutation_rate: 0.001,
            report_interval: 10,
        }
    }

    fn default_quick() -> Self {
        Config {
            address_lines: 2,
            pop_size: 50,
            num_generations: 20,
            max_tree_size: 20,
            crossover_rate: 0.7,
            mutation_rate: 0.001,
            report_interval: 5,
        }
    }
}

/// Final run report serialized to JSON.
#[derive(Serialize)]
struct RunReport {
    address_lines: usize,
    num_configurations: usize,
    pop_size: usize,
    generations_run: u32,
    elapsed_secs: f64,
    best_fitness: usize,
    perfect: bool,
    best_expression: String,
    best_nodes: usize,
    history: Vec<GenerationStats>,
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let quick_mode = args.iter().any(|a| a == "--quick" || a == "-q");
    let seed = args
        .iter()
        .position(|a| a == "--seed")
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse::<u64>().ok());

    let config = if quick_mode {
        Config::default_quick()
    } else {
        Config::default_full()
    };

    if let Err(e) = run(&config, seed) {
        eprintln!("fatal: {e}");
        std::process::exit(1);
    }
}

fn run(config: &Config, seed: Option<u64>) -> Result<(), GpError> {
    // The single shared random stream, seeded in exactly one place.
    let mut rng = match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    };

    let mux = Multiplexer::new(config.address_lines);
    let table = mux.fitness_table();
    let params = EvolutionParams {
        pop_size: config.pop_size,
        max_tree_size: config.max_tree_size,
        crossover_rate: config.crossover_rate,
        mutation_rate: config.mutation_rate,
        num_lines: mux.num_lines(),
    };

    println!("========================================");
    println!("  Mux-Evolve: multiplexer GP search");
    println!("========================================");
    println!();
    println!(
        "  Task: {}-address-line multiplexer ({} lines, {} configurations)",
        mux.address_lines(),
        mux.num_lines(),
        mux.num_configurations()
    );
    println!(
        "  Population: {} | generations: {} | max tree size: {}",
        config.pop_size, config.num_generations, config.max_tree_size
    );
    println!(
        "  Crossover rate: {} | mutation rate: {}",
        config.crossover_rate, config.mutation_rate
    );
    match seed {
        Some(s) => println!("  Seed: {s}"),
        None => println!("  Seed: from entropy"),
    }
    println!();

    let mut population = Population::new(&params, &mut rng);
    let start = Instant::now();
    let mut history: Vec<GenerationStats> = Vec::with_capacity(config.num_generations as usize);

    for _ in 0..config.num_generations {
        let stats = population.evolve_generation(&table, &params, &mut rng)?;

        if (stats.generation + 1) % config.report_interval == 0 || stats.generation == 0 {
            println!(
                "  Gen {:>4}/{} | best: {:>3}/{} | mean fitness: {:>5.2} | mean size: {:>5.1} | {:.1}s",
                stats.generation + 1,
                config.num_generations,
                stats.best_fitness,
                mux.num_configurations(),
                stats.mean_fitness,
                stats.mean_size,
                start.elapsed().as_secs_f64(),
            );
        }
        history.push(stats);
    }

    let elapsed = start.elapsed();
    let Some(best) = history.iter().max_by_key(|s| s.best_fitness).cloned() else {
        println!("  No generations were run.");
        return Ok(());
    };
    let perfect = best.best_fitness == mux.num_configurations();

    println!();
    println!("--- Final Results ---");
    println!();
    println!("  Best fitness: {}/{}", best.best_fitness, mux.num_configurations());
    println!("  Best expression ({} nodes): {}", best.best_size, best.best_expression);
    if perfect {
        println!("  Perfect multiplexer found in generation {}.", best.generation);
    }
    println!("  Evolution took {elapsed:?}");

    let report = RunReport {
        address_lines: mux.address_lines(),
        num_configurations: mux.num_configurations(),
        pop_size: config.pop_size,
        generations_run: config.num_generations,
        elapsed_secs: elapsed.as_secs_f64(),
        best_fitness: best.best_fitness,
        perfect,
        best_expression: best.best_expression,
        best_nodes: best.best_size,
        history,
    };
    if let Ok(json) = serde_json::to_string_pretty(&report) {
        let report_path = "mux_evolve_report.json";
        if let Err(e) = std::fs::write(report_path, &json) {
            eprintln!("  Warning: failed to write report: {e}");
        } else {
            println!("  Report saved: {report_path}");
        }
    }

    Ok(())
}
