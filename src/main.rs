//! HotClick - hotkey-driven auto-clicker
//!
//! Hold, toggle or start/stop clicking with global hotkeys. Settings are
//! edited from the command line (`show`, `set`, `capture`, `clear`) and a
//! running instance picks up changes on the fly.

use clap::{Parser, Subcommand};
use hotclick::{
    config::{Bind, BindTarget},
    constants::{
        CAPTURE_TIMEOUT, DISPATCH_POLL_INTERVAL, FOCUS_CACHE_DURATION, SETTINGS_RELOAD_INTERVAL,
    },
    focus_detector::{
        parse_window_handle, resolve_owning_window, CachedFocusProbe, NoFocusProbe, TextFocusFlag,
        WindowHandle,
    },
    input_listener::{create_event_channel, KeyListener},
    settings::SettingField,
    status::{self, StatusReceiver},
    create_injector, Backend, BindCapture, ClickScheduler, ClickerError, FocusProbe,
    HotkeyArbiter, OwnWindow, SettingsStore, StatusBoard, X11PointerProbe,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "hotclick", version, about = "Hotkey-driven auto-clicker")]
struct Cli {
    /// Settings file (default: <config dir>/hotclick/settings.json)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Input backend: xtest or ydotool
    #[arg(long, default_value = "xtest")]
    backend: Backend,

    /// Window the tool is controlled from (decimal or 0x hex)
    #[arg(long, value_name = "ID", value_parser = parse_window_handle)]
    window: Option<WindowHandle>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Listen for hotkeys and click (default)
    Run,
    /// Print the settings and whether they are valid
    Show,
    /// Change one setting
    Set { field: SettingField, value: String },
    /// Assign the next key pressed to a bind
    Capture { target: BindTarget },
    /// Unset a bind
    Clear { target: BindTarget },
}

fn main() -> Result<(), ClickerError> {
    let cli = Cli::parse();

    // Initialize logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let path = match &cli.config {
        Some(path) => path.clone(),
        None => SettingsStore::default_path()?,
    };
    let store = Arc::new(SettingsStore::open(path));

    let result = match &cli.command {
        None | Some(Commands::Run) => run(&cli, store),
        Some(Commands::Show) => {
            show(&store);
            Ok(())
        }
        Some(Commands::Set { field, value }) => set(&store, *field, value),
        Some(Commands::Capture { target }) => capture(&cli, &store, *target),
        Some(Commands::Clear { target }) => clear(&store, *target),
    };

    if let Err(e) = &result {
        error!("{}", e);
    }
    result
}

fn run(cli: &Cli, store: Arc<SettingsStore>) -> Result<(), ClickerError> {
    info!("HotClick starting...");

    // Set up Ctrl+C handler for graceful shutdown
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();
    ctrlc::set_handler(move || {
        info!("Shutdown signal received");
        running_clone.store(false, Ordering::SeqCst);
    })
    .map_err(|e| ClickerError::Thread(format!("Failed to set Ctrl+C handler: {}", e)))?;

    let injector = create_injector(cli.backend)?;
    info!("Input backend ready ({:?})", cli.backend);

    let own_window = match X11PointerProbe::connect() {
        Ok(x11) => {
            let window = resolve_owning_window(cli.window, &x11);
            let probe: Arc<dyn FocusProbe> =
                Arc::new(CachedFocusProbe::new(x11, FOCUS_CACHE_DURATION));
            OwnWindow::new(probe, window)
        }
        Err(e) => {
            warn!("{}; self-click suppression disabled", e);
            OwnWindow::new(Arc::new(NoFocusProbe), 0)
        }
    };

    let (status_tx, status_rx) = status::channel();
    let provider_store = store.clone();
    let scheduler = Arc::new(ClickScheduler::spawn(
        Box::new(move || provider_store.runtime_config()),
        injector,
        own_window.clone(),
        status_tx,
    )?);

    let arbiter = HotkeyArbiter::new(
        scheduler.clone(),
        store.clone(),
        own_window,
        Arc::new(TextFocusFlag::new()),
        Arc::new(BindCapture::new()),
    );

    let (sender, receiver) = create_event_channel();
    let listener = KeyListener::new(sender).start()?;

    let mut board = StatusBoard::new();
    refresh_validation(&store, &mut board);
    describe_binds(&store);
    info!("Press Ctrl+C to exit");

    let mut last_reload = Instant::now();

    // Main event loop
    while running.load(Ordering::SeqCst) {
        match receiver.recv_timeout(DISPATCH_POLL_INTERVAL) {
            Ok(event) => {
                arbiter.handle(&event);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                warn!("Key listener disconnected");
                break;
            }
        }

        report_status(&status_rx, &mut board);

        if last_reload.elapsed() >= SETTINGS_RELOAD_INTERVAL {
            last_reload = Instant::now();
            if store.reload_if_changed() {
                info!("Settings changed, reloading");
                refresh_validation(&store, &mut board);
                describe_binds(&store);
                scheduler.invalidate();
            }
        }
    }

    info!("HotClick shutting down...");
    listener.unsubscribe();
    scheduler.deactivate("shutdown");
    if !scheduler.shutdown() {
        warn!("Click scheduler did not exit cleanly");
    }
    report_status(&status_rx, &mut board);
    debug!("Final status: {}", board.display());

    Ok(())
}

/// Log every queued status event and feed it to the board.
fn report_status(status_rx: &StatusReceiver, board: &mut StatusBoard) {
    for event in status_rx.drain() {
        if event.is_error() {
            warn!("{}", event.text);
        } else {
            info!("{}", event.text);
        }
        board.apply(event);
    }
}

fn refresh_validation(store: &SettingsStore, board: &mut StatusBoard) {
    let validation = store.runtime_config().err();
    if let Some(e) = &validation {
        warn!("Config error: {}", e);
    }
    board.set_validation(validation);
}

fn describe_binds(store: &SettingsStore) {
    let settings = store.snapshot();
    let code_display = settings.code_display;
    info!(
        "Binds | start={} | stop={} | mode={}",
        settings.start_bind.format(code_display),
        settings.stop_bind.format(code_display),
        label(&settings.toggle_mode)
    );
}

/// Serialized name of a settings enum, e.g. `separate_stop`
fn label<T: Serialize>(value: &T) -> String {
    serde_json::to_value(value)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

fn show(store: &SettingsStore) {
    let settings = store.snapshot();
    let display = settings.code_display;

    println!("Settings: {}", store.path().display());
    println!("  code display   {}", label(&settings.code_display));
    println!("  rate mode      {}", label(&settings.rate_mode));
    println!(
        "  static         {} cps, variance {}",
        settings.static_cps, settings.static_variance
    );
    println!(
        "  interval       {}h {}m {}s {}ms",
        settings.interval_hours,
        settings.interval_minutes,
        settings.interval_seconds,
        settings.interval_milliseconds
    );
    println!("  output mode    {}", label(&settings.output_mode));
    println!("  mouse button   {}", settings.mouse_button);
    println!("  output key     {}", settings.output_key.format(display));
    println!("  toggle mode    {}", label(&settings.toggle_mode));
    println!("  start bind     {}", settings.start_bind.format(display));
    println!("  stop bind      {}", settings.stop_bind.format(display));

    match store.runtime_config() {
        Ok(_) => println!("Status: Ready"),
        Err(e) => println!("Status: {}", e),
    }
}

fn set(store: &SettingsStore, field: SettingField, value: &str) -> Result<(), ClickerError> {
    let mut settings = store.snapshot();
    field.apply(&mut settings, value)?;
    store.update(move |current| *current = settings)?;
    info!("{} set to '{}'", field.name(), value.trim());

    if let Err(e) = store.runtime_config() {
        warn!("Config error: {}", e);
    }
    Ok(())
}

fn capture(cli: &Cli, store: &SettingsStore, target: BindTarget) -> Result<(), ClickerError> {
    let injector = create_injector(cli.backend)?;
    let capture = Arc::new(BindCapture::new());
    let session = capture.begin(target)?;

    let (sender, receiver) = create_event_channel();
    let listener = KeyListener::new(sender).start()?;

    let deadline = Instant::now() + CAPTURE_TIMEOUT;
    while capture.is_active() && Instant::now() < deadline {
        match receiver.recv_timeout(DISPATCH_POLL_INTERVAL) {
            Ok(event) => {
                capture.offer(&event);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                return Err(ClickerError::KeyListener(
                    "key listener stopped during capture".to_string(),
                ));
            }
        }
    }
    listener.unsubscribe();

    let event = session.wait(Duration::ZERO)?;
    let mut bind = Bind::new(event.display_name, event.physical_code);
    match injector.map_to_logical_key(event.physical_code) {
        Ok(logical) => bind = bind.with_logical_code(logical),
        Err(e) => warn!("No logical key for 0x{:X}: {}", event.physical_code, e),
    }

    let code_display = store.snapshot().code_display;
    info!("{} set to {}", target, bind.format(code_display));
    store.update(move |settings| *settings.bind_mut(target) = bind)?;

    if let Err(e) = store.runtime_config() {
        warn!("Config error: {}", e);
    }
    Ok(())
}

fn clear(store: &SettingsStore, target: BindTarget) -> Result<(), ClickerError> {
    store.update(|settings| *settings.bind_mut(target) = Bind::default())?;
    info!("{} cleared", target);
    Ok(())
}
