use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use voxline::capture::TranscriptGate;
use voxline::events;
use voxline::feedback::{Feedback, Status};
#[cfg(feature = "cpal-output")]
use voxline::playback::CpalSink;
use voxline::playback::{
    AudioChunkDecoder, Epoch, OutputSink, PlaybackCompletion, TimedSink, tone,
};
use voxline::stream::HttpTransport;
use voxline::{Config, SessionController};

/// How long to wait for the last statuses to print on exit
const PRINTER_DRAIN: Duration = Duration::from_millis(500);

/// voxline - ask a question out loud, hear the answer as it streams in
#[derive(Parser)]
#[command(name = "voxline", version, about)]
struct Cli {
    /// Response server base URL
    #[arg(long, env = "VOXLINE_SERVER_URL")]
    server: Option<String>,

    /// Chunks decoded ahead of playback
    #[arg(long, env = "VOXLINE_LOOKAHEAD")]
    lookahead: Option<usize>,

    /// Don't open an audio device; time playback instead
    #[arg(long)]
    silent: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ask one question and play the answer
    Ask {
        /// Question text
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
    /// Read finalized transcripts from stdin, one per line ("stop" halts playback)
    Listen,
    /// Test speaker output
    TestSpeaker,
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,voxline=info",
        1 => "info,voxline=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load()?;
    if let Some(url) = cli.server {
        config.server.url = url;
    }
    if let Some(lookahead) = cli.lookahead {
        config.playback.lookahead = lookahead;
    }
    config.validate()?;
    tracing::debug!(?config, "loaded configuration");

    match cli.command {
        Command::Ask { text } => ask(&config, cli.silent, &text.join(" ")).await,
        Command::Listen => listen(&config, cli.silent).await,
        Command::TestSpeaker => test_speaker(&config, cli.silent).await,
        Command::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

/// Open the output sink for this run
fn open_sink(config: &Config, silent: bool) -> anyhow::Result<Box<dyn OutputSink>> {
    if silent {
        tracing::info!("silent mode, audio output disabled");
        return Ok(Box::new(TimedSink::new()));
    }

    #[cfg(feature = "cpal-output")]
    let sink: Box<dyn OutputSink> = Box::new(CpalSink::new(config.playback.output_rate)?);

    #[cfg(not(feature = "cpal-output"))]
    let sink: Box<dyn OutputSink> = {
        let _ = config;
        tracing::warn!("built without audio output, timing playback instead");
        Box::new(TimedSink::new())
    };

    Ok(sink)
}

/// Build a session controller from configuration
fn build_session(config: &Config, silent: bool) -> anyhow::Result<SessionController> {
    let transport = HttpTransport::new(config.server.query_url(), config.server.connect_timeout)?;
    let decoder = AudioChunkDecoder::new(config.playback.output_rate);
    let sink = open_sink(config, silent)?;

    let mut session = SessionController::new(
        Arc::new(transport),
        Arc::new(decoder),
        sink,
        config.playback.lookahead,
        Feedback::new(),
    );
    if config.playback.prime_output {
        session.prime_output();
    }

    tracing::info!(
        server = %config.server.query_url(),
        lookahead = config.playback.lookahead,
        output_rate = config.playback.output_rate,
        "voxline ready"
    );
    Ok(session)
}

/// Print user-facing statuses to `out` until the publisher goes away
fn spawn_status_printer(
    feedback: &Feedback,
    mut out: impl Write + Send + 'static,
) -> tokio::task::JoinHandle<()> {
    let mut statuses = feedback.subscribe();
    tokio::spawn(async move {
        loop {
            match statuses.recv().await {
                Ok(
                    status @ (Status::Caption { .. }
                    | Status::Failed { .. }
                    | Status::Finished
                    | Status::Stopped),
                ) => {
                    let _ = writeln!(out, "{status}").and_then(|()| out.flush());
                }
                Ok(status) => tracing::debug!(%status, "status"),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::debug!(missed, "status printer lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Ask one question and wait for the answer to finish playing
async fn ask(config: &Config, silent: bool, text: &str) -> anyhow::Result<()> {
    let mut session = build_session(config, silent)?;
    let printer = spawn_status_printer(session.feedback(), std::io::stdout());

    let result = tokio::select! {
        result = session.play_query(text) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted");
            Ok(())
        }
    };

    wind_down(session, printer, result).await
}

/// Stop the session and let the printer flush before reporting `result`
async fn wind_down(
    mut session: SessionController,
    printer: tokio::task::JoinHandle<()>,
    result: voxline::Result<()>,
) -> anyhow::Result<()> {
    session.stop();
    drop(session);
    let _ = tokio::time::timeout(PRINTER_DRAIN, printer).await;
    Ok(result?)
}

/// Submit transcripts from stdin as queries
async fn listen(config: &Config, silent: bool) -> anyhow::Result<()> {
    let session = build_session(config, silent)?;
    let printer = spawn_status_printer(session.feedback(), std::io::stdout());
    let (handle, task) = session.spawn();
    let mut gate = TranscriptGate::new(config.capture.debounce);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("Listening for transcripts (one per line, \"stop\" to halt, Ctrl-C to quit)");

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                if line.trim().eq_ignore_ascii_case("stop") {
                    handle.stop().await?;
                } else if let Some(query) = gate.accept(&line) {
                    handle.query(query).await?;
                } else {
                    tracing::debug!("transcript ignored");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
        }
    }

    handle.shutdown().await?;
    task.await?;
    let _ = tokio::time::timeout(PRINTER_DRAIN, printer).await;
    Ok(())
}

/// Play a test tone through the output sink
async fn test_speaker(config: &Config, silent: bool) -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let mut sink = open_sink(config, silent)?;
    let buffer = tone(440.0, Duration::from_secs(2), config.playback.output_rate);
    println!(
        "Playing {} samples at {} Hz...",
        buffer.len(),
        buffer.sample_rate()
    );

    let (tx, mut rx) = events::channel();
    sink.play(buffer, PlaybackCompletion::new(Epoch::ZERO, 0, tx))?;
    rx.recv().await;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");
    println!("  3. Try: pavucontrol (to check output levels)");

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use voxline::TransportError;
    use voxline::stream::{EventStream, PushTransport};

    use super::*;

    struct Unreachable;

    #[async_trait]
    impl PushTransport for Unreachable {
        async fn open(&self, _query: &str) -> Result<EventStream, TransportError> {
            Err(TransportError::Connect("connection refused".to_string()))
        }
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn failure_notice_is_printed_before_error_returns() {
        let mut session = SessionController::new(
            Arc::new(Unreachable),
            Arc::new(AudioChunkDecoder::default()),
            Box::new(TimedSink::new()),
            3,
            Feedback::new(),
        );
        let out = Captured::default();
        let printer = spawn_status_printer(session.feedback(), out.clone());

        let result = session.play_query("hello").await;
        let outcome = wind_down(session, printer, result).await;

        assert!(outcome.is_err());
        let printed = String::from_utf8(out.0.lock().unwrap().clone()).unwrap();
        assert!(printed.contains("Error getting a response"), "printed: {printed:?}");
    }
}
