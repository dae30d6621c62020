use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

use digit_canvas::camera::{CameraSource, FrameReplayDevice};
use digit_canvas::compositor;
use digit_canvas::input::PointerSample;
use digit_canvas::prediction::{HttpPredictor, Predictor, RequestMode};
use digit_canvas::presentation::PresentationUpdate;
use digit_canvas::session::{Action, PointerEvent, Session, SessionEvent, SessionSettings};
use digit_canvas::surface::{Point, Surface};
use digit_canvas::voice::{AudioCapture, MicrophoneBackend, rms};
use digit_canvas::Config;

/// Digit Canvas - handwritten digit recognition client
#[derive(Parser)]
#[command(name = "digit-canvas", version, about)]
struct Cli {
    /// Config file (defaults to the platform config dir)
    #[arg(short, long, env = "DIGIT_CANVAS_CONFIG")]
    config: Option<PathBuf>,

    /// Recognition service base URL
    #[arg(long, env = "DIGIT_CANVAS_URL")]
    url: Option<String>,

    /// Image file or directory replayed as the camera feed
    #[arg(long, env = "DIGIT_CANVAS_CAMERA_SOURCE")]
    camera_source: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Recognize a single image file
    Predict {
        /// Image to recognize
        path: PathBuf,
    },
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,digit_canvas=info",
        1 => "info,digit_canvas=debug",
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
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(url) = cli.url {
        config.service.url = url;
    }
    if cli.camera_source.is_some() {
        config.camera.source = cli.camera_source;
    }
    config.validate()?;
    tracing::debug!(?config, "loaded configuration");

    match cli.command {
        Some(Command::Predict { path }) => predict_file(&config, &path).await,
        Some(Command::TestMic { duration }) => test_mic(duration).await,
        None => interactive(&config).await,
    }
}

/// Run an interactive session driven by stdin
async fn interactive(config: &Config) -> anyhow::Result<()> {
    let predictor = Arc::new(HttpPredictor::new(&config.service.url, config.service.timeout)?);
    let device = Arc::new(FrameReplayDevice::new(
        config.camera.source.clone(),
        config.camera.frame_interval,
    ));
    let camera = CameraSource::new(device, config.camera.constraints());

    let mut session = Session::new(SessionSettings::from(config), predictor, camera);
    match MicrophoneBackend::from_config(&config.voice) {
        Ok(backend) => {
            session = session.with_voice(Arc::new(backend), config.voice.restart_policy());
        }
        Err(e) => tracing::info!(error = %e, "voice commands unavailable"),
    }

    let mut updates = session.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    tracing::info!(
        url = %config.service.url,
        width = config.surface.width,
        height = config.surface.height,
        "digit canvas ready, type `help` for commands"
    );

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match parse_command(&line) {
                    Ok(Line::Empty) => {}
                    Ok(Line::Event(event)) => session.handle_event(event),
                    Ok(Line::Upload(path)) => match tokio::fs::read(&path).await {
                        Ok(bytes) => session.perform(Action::Upload(bytes)),
                        Err(e) => eprintln!("cannot read {}: {e}", path.display()),
                    },
                    Ok(Line::Render(path)) => match session.render().save(&path) {
                        Ok(()) => println!("rendered to {}", path.display()),
                        Err(e) => eprintln!("cannot write {}: {e}", path.display()),
                    },
                    Ok(Line::Status) => print_status(&session),
                    Ok(Line::Help) => println!("{HELP}"),
                    Ok(Line::Quit) => break,
                    Err(message) => eprintln!("{message}"),
                }
            }
            update = updates.recv() => match update {
                Ok(update) => print_update(&update),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::debug!(skipped = n, "presentation updates lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            alive = session.step() => {
                if !alive {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.close();
    Ok(())
}

const HELP: &str = "\
commands:
  down X Y | move X Y | up | leave   pointer input
  touch X Y [X Y ...]                touch input (multi-touch ignored)
  clear | eraser | camera | recognize | voice
  upload PATH                        draw an image and recognize it
  render PATH                        save what the user sees as PNG
  status | help | quit";

/// One parsed stdin line
#[derive(Debug)]
enum Line {
    Empty,
    Event(SessionEvent),
    Upload(PathBuf),
    Render(PathBuf),
    Status,
    Help,
    Quit,
}

fn parse_command(line: &str) -> Result<Line, String> {
    let mut words = line.split_whitespace();
    let Some(command) = words.next() else {
        return Ok(Line::Empty);
    };
    let args: Vec<&str> = words.collect();

    let pointer =
        |event: PointerEvent| -> Result<Line, String> { Ok(Line::Event(SessionEvent::Pointer(event))) };
    let action =
        |action: Action| -> Result<Line, String> { Ok(Line::Event(SessionEvent::Action(action))) };

    match command {
        "down" => pointer(PointerEvent::Down(mouse(&args)?)),
        "move" => pointer(PointerEvent::Move(mouse(&args)?)),
        "up" => pointer(PointerEvent::Up),
        "leave" => pointer(PointerEvent::Leave),
        "touch" => pointer(PointerEvent::Down(PointerSample::Touch {
            contacts: points(&args)?,
        })),
        "clear" => action(Action::Clear),
        "eraser" => action(Action::ToggleEraser),
        "camera" => action(Action::ToggleCamera),
        "recognize" => action(Action::Recognize),
        "voice" => action(Action::ToggleVoice),
        "upload" => path_arg(&args).map(Line::Upload),
        "render" => path_arg(&args).map(Line::Render),
        "status" => Ok(Line::Status),
        "help" => Ok(Line::Help),
        "quit" | "exit" => Ok(Line::Quit),
        other => Err(format!("unknown command `{other}`, try `help`")),
    }
}

fn mouse(args: &[&str]) -> Result<PointerSample, String> {
    match points(args)?.as_slice() {
        [p] => Ok(PointerSample::Mouse { x: p.x, y: p.y }),
        _ => Err("expected X Y".to_string()),
    }
}

fn points(args: &[&str]) -> Result<Vec<Point>, String> {
    if args.is_empty() || args.len() % 2 != 0 {
        return Err("expected X Y pairs".to_string());
    }
    args.chunks(2)
        .map(|pair| Ok(Point::new(coordinate(pair[0])?, coordinate(pair[1])?)))
        .collect()
}

/// `f32::from_str` accepts `inf` and `NaN`; pointer positions never are
fn coordinate(arg: &str) -> Result<f32, String> {
    arg.parse::<f32>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| format!("bad coordinate `{arg}`"))
}

fn path_arg(args: &[&str]) -> Result<PathBuf, String> {
    match args {
        [] => Err("expected PATH".to_string()),
        parts => Ok(PathBuf::from(parts.join(" "))),
    }
}

fn print_update(update: &PresentationUpdate) {
    match update {
        PresentationUpdate::Display(display) => println!("display: {display}"),
        PresentationUpdate::Details(details) => println!("details: {details}"),
        PresentationUpdate::Overlays(overlays) => {
            if !overlays.is_empty() {
                let boxes: Vec<String> = overlays
                    .iter()
                    .map(|o| {
                        let b = o.bounding_box;
                        format!("{}@({},{} {}x{})", o.label, b.x, b.y, b.w, b.h)
                    })
                    .collect();
                println!("boxes: {}", boxes.join(" "));
            }
        }
        PresentationUpdate::Eraser(mode) => println!("pen: {mode:?}"),
        PresentationUpdate::Camera(live) => {
            println!("camera: {}", if *live { "on" } else { "off" });
        }
        PresentationUpdate::Voice(voice) => println!("voice: {voice:?}"),
        PresentationUpdate::Notice(notice) => println!("[{:?}] {}", notice.level, notice.message),
    }
}

fn print_status(session: &Session) {
    let p = session.presentation();
    println!("mode: {:?}", session.mode());
    println!("display: {}", p.display());
    println!("details: {}", p.details());
    println!("pen: {:?}", session.surface().pen().mode);
    println!("camera: {}", if session.camera_active() { "on" } else { "off" });
    println!("voice: {:?}", p.voice());
    println!(
        "in flight: {} (watermark {})",
        session.recognition().in_flight(),
        session.recognition().watermark()
    );
    if let Some(utterance) = session.last_utterance() {
        println!("last heard: {utterance}");
    }
}

/// Recognize one image file and print the result
async fn predict_file(config: &Config, path: &Path) -> anyhow::Result<()> {
    let bytes = tokio::fs::read(path).await?;
    let image = image::load_from_memory(&bytes)?;

    let mut surface = Surface::new(config.surface.width, config.surface.height);
    surface.draw_image_fitted(&image);
    let snapshot = compositor::compose(&surface, None, 1);

    let predictor = HttpPredictor::new(&config.service.url, config.service.timeout)?;
    tracing::info!(endpoint = predictor.endpoint(), path = %path.display(), "predicting");
    let result = predictor.predict(&snapshot, RequestMode::Single).await?;

    println!("{}", result.full_digit.as_deref().unwrap_or("---"));
    for (i, detail) in result.details.iter().enumerate() {
        println!(
            "  digit {}: {} ({:.1}%)",
            i + 1,
            detail.digit,
            detail.confidence * 100.0
        );
    }
    Ok(())
}

/// Test microphone input
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = AudioCapture::new()?;
    capture.start()?;

    println!("Sample rate: {} Hz", digit_canvas::voice::SAMPLE_RATE);
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = capture.take_buffer();
        let energy = rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!("[{:2}s] RMS: {energy:.4} | Peak: {peak:.4} | [{meter}]", i + 1);
    }

    capture.stop();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    Ok(())
}
