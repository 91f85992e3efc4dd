//! Babycare CLI binary
//! Cry detection over a microphone or a recording, soothing via sound or toy.

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod cli;
use cli::{Cli, Commands, InspectCommand, ReplayCommand, SessionArgs};

use babycare::{
    BabycareConfig, Classifier, CryClass, CryNet, SessionManager, SessionParts,
    actuation::{LogToy, SilentSound, ToyActuator, Transition},
    audio::{AudioSource, WavFileSource},
    detection::CycleReport,
    light::{AmbientLightSensor, FixedLight, SysfsLight},
    session::SessionSummary,
};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        #[cfg(feature = "audio")]
        Commands::Listen(cmd) => listen(cmd),
        Commands::Replay(cmd) => replay(cmd),
        #[cfg(feature = "audio")]
        Commands::Devices => list_devices(),
        Commands::Inspect(cmd) => inspect(cmd),
    }
}

/* ───────────────────────── configuration ─────────────────────────── */

fn load_config(args: &SessionArgs) -> Result<BabycareConfig> {
    let mut config = match &args.config {
        Some(path) => BabycareConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => BabycareConfig::default(),
    };
    if let Some(model) = &args.model {
        config.model.path = model.clone();
    }
    if let Some(mode) = args.mode {
        config.soothing.mode = mode;
    }
    if let Some(sound) = args.sound {
        config.soothing.sound = sound;
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn light_sensor(config: &BabycareConfig, lux: Option<f32>) -> Box<dyn AmbientLightSensor> {
    match &config.light.sensor_path {
        Some(path) => Box::new(
            SysfsLight::new(path)
                .with_interval(std::time::Duration::from_millis(config.light.poll_ms)),
        ),
        None => Box::new(FixedLight(lux)),
    }
}

fn toy(config: &BabycareConfig) -> Result<Box<dyn ToyActuator>> {
    match &config.toy.endpoint {
        #[cfg(feature = "http-toy")]
        Some(endpoint) => Ok(Box::new(
            babycare::actuation::HttpToy::new(endpoint.clone(), config.toy.token.clone())
                .context("building toy client")?,
        )),
        #[cfg(not(feature = "http-toy"))]
        Some(endpoint) => {
            tracing::warn!("toy endpoint {endpoint} ignored, built without the `http-toy` feature");
            Ok(Box::new(LogToy))
        }
        None => Ok(Box::new(LogToy)),
    }
}

fn classifier_loader(
    config: &BabycareConfig,
) -> impl FnOnce() -> Result<Box<dyn Classifier>, babycare::classifier::ClassifierError> + Send + 'static
{
    let path = config.model.path.clone();
    move || Ok(Box::new(CryNet::load(path)?) as Box<dyn Classifier>)
}

/* ───────────────────────────── commands ─────────────────────────────── */

fn replay(cmd: ReplayCommand) -> Result<()> {
    let mut config = load_config(&cmd.session)?;
    if !cmd.realtime {
        config.detector.initial_delay_ms = 0;
        config.detector.period_ms = 0;
    }

    info!(
        "replaying {} ({})",
        cmd.wav.display(),
        if cmd.realtime { "real time" } else { "back-to-back" }
    );
    let wav = cmd.wav.clone();
    let parts = SessionParts::new(
        move || Ok(Box::new(WavFileSource::open(wav)?) as Box<dyn AudioSource>),
        classifier_loader(&config),
    )
    .with_sound(Box::new(SilentSound::default()))
    .with_toy(toy(&config)?)
    .with_light(light_sensor(&config, cmd.session.lux));

    let manager = SessionManager::new();
    manager
        .start(&config, parts)
        .with_context(|| format!("starting replay of {}", cmd.wav.display()))?;

    if let Some(reports) = manager.reports() {
        for (i, report) in reports.iter().enumerate() {
            print_report(i + 1, &report);
        }
    }
    if let Some(summary) = manager.stop() {
        print_summary(&summary);
    }
    Ok(())
}

#[cfg(feature = "audio")]
fn listen(cmd: cli::ListenCommand) -> Result<()> {
    use babycare::{
        StartOutcome,
        actuation::{SoundActuator, SoundPlayer},
        audio::MicSource,
        session::SystemdInhibit,
    };
    use tracing::warn;

    let config = load_config(&cmd.session)?;
    let sound: Box<dyn SoundActuator> = match SoundPlayer::open(&config.soothing.sounds_dir) {
        Ok(p) => Box::new(p),
        Err(e) => {
            warn!("sound output unavailable ({e}), sound actions will only be logged");
            Box::new(SilentSound::default())
        }
    };

    let device = cmd.device.clone();
    let timeout = config.detector.read_timeout();
    let mut parts = SessionParts::new(
        move || Ok(Box::new(MicSource::open(device.as_deref(), timeout)?) as Box<dyn AudioSource>),
        classifier_loader(&config),
    )
    .with_sound(sound)
    .with_toy(toy(&config)?)
    .with_light(light_sensor(&config, cmd.session.lux));
    if cmd.keep_awake {
        parts = parts.with_keep_awake(Box::new(SystemdInhibit::default()));
    }

    let manager = SessionManager::new();
    if manager.start(&config, parts).context("starting detection")? == StartOutcome::AlreadyRunning {
        warn!("detection already running");
    }

    let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    })
    .context("installing Ctrl-C handler")?;
    info!("listening, press Ctrl-C to stop");

    let reports = manager.reports().unwrap_or_else(crossbeam_channel::never);
    loop {
        crossbeam_channel::select! {
            recv(stop_rx) -> _ => break,
            recv(reports) -> msg => match msg {
                Ok(report) => print_report(0, &report),
                Err(_) => break,
            },
        }
    }

    if let Some(summary) = manager.stop() {
        print_summary(&summary);
    }
    Ok(())
}

#[cfg(feature = "audio")]
fn list_devices() -> Result<()> {
    let devices = babycare::audio::list_input_devices().context("listing input devices")?;
    if devices.is_empty() {
        println!("no input devices found");
    }
    for (i, d) in devices.iter().enumerate() {
        let mark = if d.is_default { " (default)" } else { "" };
        println!("{i}: {}{mark}", d.name);
        if let Some(cfg) = &d.default_config {
            println!("    {cfg}");
        }
    }
    Ok(())
}

fn inspect(cmd: InspectCommand) -> Result<()> {
    let tensors = CryNet::describe(&cmd.model_path)
        .with_context(|| format!("reading {}", cmd.model_path.display()))?;
    println!("{}: {} tensors", cmd.model_path.display(), tensors.len());
    for t in &tensors {
        println!("  {:<16} {:?}", t.name, t.dims);
    }
    match CryNet::load(&cmd.model_path) {
        Ok(_) => println!("loads as a cry classifier"),
        Err(e) => println!("not loadable as a cry classifier: {e}"),
    }
    Ok(())
}

/* ───────────────────────────── output ─────────────────────────────── */

fn print_report(cycle: usize, r: &CycleReport) {
    let label = match (r.class, r.gated) {
        (_, true) => "quiet".to_string(),
        (CryClass::Cry, false) => "CRY".to_string(),
        (CryClass::NotCry, false) => "not cry".to_string(),
    };
    let scores = r
        .scores
        .as_ref()
        .map(|s| format!(" scores {s:.3?}"))
        .unwrap_or_default();
    let action = match r.transition {
        Some(Transition::Started(a)) => format!("  -> start {a:?}"),
        Some(Transition::Stopped(a)) => format!("  -> stop {a:?}"),
        None => String::new(),
    };
    if cycle > 0 {
        print!("cycle {cycle:>4}  ");
    }
    println!("peak {:.3}  {label}{scores}{action}", r.peak);
}

fn print_summary(s: &SessionSummary) {
    println!(
        "{} cycles: {} quiet, {} classified, {} cry, {} read errors, {} skipped",
        s.cycles, s.gated_cycles, s.inferences, s.cry_cycles, s.read_errors, s.skipped_cycles
    );
    if let Some(avg) = s.average_latency {
        println!("average cycle latency {:.3} s", avg.as_secs_f64());
    }
}
