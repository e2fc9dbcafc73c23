//! Turntaker command line
//!
//! `chat` talks to a model on the terminal, `train` fits a model to
//! conversation logs, and `live` drives chat threads over JSON lines.

use clap::{Parser, Subcommand};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use turntaker::config::{LiveConfig, SessionConfig};
use turntaker::runtime::stdio::{CsvHistoryDir, JsonLinesSink, JsonLinesSource};
use turntaker::runtime::ThreadRouter;
use turntaker::session::Chat;
use turntaker::stepper::{ContextModel, SequenceStepper, StepperFactory};
use turntaker::trainer::{self, TrainOptions};

#[derive(Parser, Debug)]
#[command(name = "turntaker")]
#[command(version)]
#[command(about = "Turn-taking chat over byte-level sequence models", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Chat with a trained model on the terminal
    Chat {
        /// Model file written by `train`
        model: PathBuf,
    },

    /// Train a model on conversation logs, continuing an existing model file
    Train {
        /// A CSV conversation file or a directory of them
        samples: PathBuf,
        /// Model file to create or update
        output: PathBuf,
        /// Character budget for one training window
        #[arg(long, default_value_t = 400, env = "TURNTAKER_MAX_CHARS")]
        max_chars: usize,
        /// Share of windows held out for validation
        #[arg(long, default_value_t = 0.1)]
        validation_ratio: f64,
        /// Context length for a new model
        #[arg(long, default_value_t = 4)]
        order: usize,
    },

    /// Drive live threads: JSON-lines events on stdin, actions on stdout
    Live {
        /// Model file written by `train`
        model: PathBuf,
        /// Directory of `<thread>.csv` histories replayed when a thread starts
        #[arg(long, env = "TURNTAKER_HISTORY_DIR")]
        history_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            std::process::exit(i32::from(e.use_stderr()));
        }
    };

    // Initialize logging; stdout carries chat and live output
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "turntaker=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false)
                .with_writer(std::io::stderr),
        )
        .init();

    match cli.command {
        Commands::Chat { model } => {
            let model = load_model(&model)?;
            let config = LiveConfig::from_env().session;
            let stdin = std::io::stdin();
            chat_loop(model.new_stepper(), config, stdin.lock(), std::io::stdout())?;
        }

        Commands::Train {
            samples,
            output,
            max_chars,
            validation_ratio,
            order,
        } => {
            let options = TrainOptions {
                max_chars,
                validation_ratio,
                order,
            };
            let report = trainer::run(&samples, &output, options)?;
            println!(
                "trained on {} windows ({} held out), {} contexts",
                report.training_examples, report.validation_examples, report.contexts
            );
            if let Some(cost) = report.validation_cost {
                println!("validation cost {cost:.4}");
            }
        }

        Commands::Live { model, history_dir } => {
            let model = load_model(&model)?;
            let config = LiveConfig::from_env();
            tracing::info!(
                idle_timeout = ?config.idle_timeout,
                typing_delay = ?config.typing_delay,
                max_unprompted_turns = config.max_unprompted_turns,
                "Starting live driver"
            );

            let outbound = Arc::new(JsonLinesSink::new(tokio::io::stdout()));
            let history = Arc::new(CsvHistoryDir::new(history_dir));
            let mut router = ThreadRouter::new(model, outbound, history, config);
            let mut source = JsonLinesSource::new(tokio::io::BufReader::new(tokio::io::stdin()));
            router.run(&mut source).await?;
        }
    }

    Ok(())
}

fn load_model(path: &Path) -> Result<Arc<ContextModel>, Box<dyn std::error::Error>> {
    tracing::info!(path = %path.display(), "Loading model");
    let model = ContextModel::load(path)?;
    tracing::info!(order = model.order(), contexts = model.context_count(), "Model loaded");
    Ok(Arc::new(model))
}

/// Terminal conversation: the bot answers every line, then keeps going while it has more to say
fn chat_loop<S: SequenceStepper>(
    stepper: S,
    config: SessionConfig,
    input: impl BufRead,
    mut output: impl Write,
) -> std::io::Result<()> {
    let mut chat = Chat::new(stepper).with_config(config);
    let mut lines = input.lines();

    loop {
        write!(output, "You> ")?;
        output.flush()?;
        let Some(line) = lines.next().transpose()? else {
            writeln!(output)?;
            return Ok(());
        };
        if line.is_empty() {
            continue;
        }
        let human_more = chat.send(&line);
        tracing::debug!(human_more, "Fed terminal line");
        loop {
            let reply = chat.receive();
            writeln!(output, "Bot> {}", reply.text())?;
            if !reply.more {
                break;
            }
        }
    }
}
