//! Skein Run - plays a compiled story on the terminal
//!
//! Loads a story JSON, drives the runtime, prints output, and reads a
//! 1-indexed choice number from stdin at each branch point.

use std::fs::File;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::Parser;
use skein_runtime::{load, Choice, Evaluator, GlueWriter};
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "skein-run")]
#[command(about = "Play a compiled branching-narrative story")]
struct Cli {
    /// Path to the compiled story JSON
    story: PathBuf,

    /// Seed for the story's random number generator
    #[arg(long)]
    seed: Option<u64>,
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "skein_run=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        error!("{e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let story = Rc::new(load(File::open(&cli.story)?)?);
    let seed = cli.seed.unwrap_or_else(|| {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default()
    });
    let mut eval = Evaluator::new(story, seed)?;

    let stdout = io::stdout();
    let stdin = io::stdin();
    let mut writer = GlueWriter::new();

    let mut choices = eval.continue_story(&mut writer)?;
    while !choices.is_empty() {
        writer.write_end();
        writer.write_raw("\n");
        for (i, choice) in choices.iter().enumerate() {
            writer.write_str(&format!("{}: {}\n", i + 1, choice.label));
        }
        writer.write_end();
        writer.write_raw("?> ");
        flush(&stdout, &mut writer)?;

        let choice = read_selection(&stdin, &choices)?;
        eval.choose(choice);
        choices = eval.continue_story(&mut writer)?;
    }
    writer.write_end();
    flush(&stdout, &mut writer)?;
    Ok(())
}

fn flush(stdout: &io::Stdout, writer: &mut GlueWriter) -> io::Result<()> {
    let mut handle = stdout.lock();
    handle.write_all(writer.take().as_bytes())?;
    handle.flush()
}

fn read_selection<'a>(
    stdin: &io::Stdin,
    choices: &'a [Choice],
) -> Result<&'a Choice, Box<dyn std::error::Error>> {
    let mut line = String::new();
    if stdin.lock().read_line(&mut line)? == 0 {
        return Err("unable to read input: end of stream".into());
    }
    let n: usize = line.trim().parse()?;
    choices
        .get(n.checked_sub(1).ok_or("choice numbers start at 1")?)
        .ok_or_else(|| format!("no such choice: {n}").into())
}
