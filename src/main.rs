use anyhow::{anyhow, Result};
use indicatif::*;

use std::env;
use std::time::Duration;

use connect4_engine::scheduler::{FixedScheduler, NeuralScheduler, Scheduler};
use connect4_engine::{Board, Engine, EngineConfig, EvalFlag, Evaluation, WIDTH};

const USAGE: &str = "usage: connect4_engine [moves] [seconds] [scheduler weights]";

// granularity of the progress display
const STEP: Duration = Duration::from_millis(100);

fn describe(evaluation: &Evaluation, side: u8) -> String {
    let player = side + 1;
    let other = (side ^ 1) + 1;
    let plies = if evaluation.depth == 1 { "ply" } else { "plies" };
    match evaluation.flag {
        EvalFlag::CurrentPlayerWin => format!(
            "Player {} can force a win in {} {}",
            player, evaluation.depth, plies
        ),
        EvalFlag::OtherPlayerWin => format!(
            "Player {} can force a win in {} {}",
            other, evaluation.depth, plies
        ),
        EvalFlag::Draw => format!(
            "Even position after {} {} ({:+.3})",
            evaluation.depth, plies, evaluation.eval
        ),
        EvalFlag::CurrentPlayerBetter => format!(
            "Player {} is better at depth {} ({:+.3})",
            player, evaluation.depth, evaluation.eval
        ),
        EvalFlag::OtherPlayerBetter => format!(
            "Player {} is better at depth {} ({:+.3})",
            other, evaluation.depth, evaluation.eval
        ),
        EvalFlag::InvalidBoard => "No evaluation available yet".to_string(),
    }
}

fn draw(board: &Board) {
    for row in board.to_cells().iter().rev() {
        let line: String = row
            .iter()
            .map(|cell| match cell {
                1 => 'X',
                2 => 'O',
                _ => '.',
            })
            .collect();
        println!("{}", line);
    }
    println!("{}", (1..=WIDTH).map(|c| c.to_string()).collect::<String>());
}

fn main() -> Result<()> {
    env_logger::init();

    let mut args = env::args().skip(1);
    let moves = args.next().unwrap_or_default();
    let seconds = match args.next() {
        Some(arg) => arg
            .parse::<u64>()
            .map_err(|_| anyhow!("invalid number of seconds: {}\n{}", arg, USAGE))?,
        None => 10,
    };

    let config = EngineConfig::default().with_table_entries(1 << 16);
    let scheduler: Box<dyn Scheduler> = match args.next() {
        Some(path) => NeuralScheduler::load_or_default(path, config.search),
        None => Box::new(FixedScheduler::new(config.search)),
    };

    let board = Board::from_moves(&moves)?;
    draw(&board);

    let engine = Engine::with_config(Some(board), false, config, scheduler)?;

    let steps = seconds * 1000 / STEP.as_millis() as u64;
    let progress = ProgressBar::new(steps.max(1));
    progress.set_style(
        ProgressStyle::default_bar()
            .template("Evaluating: {bar:40.cyan/blue} {msg}")
            .progress_chars("█▓▒░  "),
    );

    let mut evaluation = engine.evaluate_for(Duration::from_millis(0));
    for _ in 0..steps {
        evaluation = engine.evaluate_for(STEP);
        let (heuristic_depth, exact_depth) = engine.searched_depths();
        progress.set_message(&format!(
            "heuristic depth {}, exact depth {}",
            heuristic_depth, exact_depth
        ));
        progress.inc(1);
        if engine.is_solved() {
            break;
        }
    }
    progress.finish();

    println!("{}", describe(&evaluation, board.side_to_play()));
    if (evaluation.best_column as usize) < WIDTH {
        println!("Best move: {}", evaluation.best_column + 1);
    }
    Ok(())
}
