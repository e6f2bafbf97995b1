/// Earth Reload host
/// Runs a module from source and hot-swaps it whenever the source changes

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;

use earth_reload::{FileRole, HotReloadConfig, HotReloader, ReloadEvent};

#[derive(Debug, Parser)]
#[command(name = "earth-reload", version, about = "Run a module and hot-reload it on change")]
struct Cli {
    /// Main source file of the module
    main: PathBuf,

    /// Extra files that trigger a rebuild when they change
    #[arg(short, long = "dep")]
    deps: Vec<PathBuf>,

    /// Type name passed to the module factory
    #[arg(short = 't', long = "type")]
    object_type: Option<String>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory for compiled modules
    #[arg(long)]
    build_dir: Option<PathBuf>,

    /// Host frame rate
    #[arg(long, default_value_t = 60)]
    fps: u32,

    /// Override the change polling interval
    #[arg(long)]
    poll_ms: Option<u64>,
}

impl Cli {
    fn load_config(&self) -> Result<HotReloadConfig> {
        let mut config = match &self.config {
            Some(path) => HotReloadConfig::load(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => HotReloadConfig::default(),
        };

        if let Some(object_type) = &self.object_type {
            config.object_type = object_type.clone();
        }
        if let Some(build_dir) = &self.build_dir {
            config.build_dir = build_dir.clone();
        }
        if let Some(poll_ms) = self.poll_ms {
            config.poll_interval_ms = poll_ms;
        }
        Ok(config)
    }
}

fn describe(event: &ReloadEvent) -> String {
    match event {
        ReloadEvent::CompilationStarted { file } => format!("compiling {}", file.display()),
        ReloadEvent::CompilationFinished { file, success } => {
            let outcome = if *success { "succeeded" } else { "failed" };
            format!("build of {} {}", file.display(), outcome)
        }
        ReloadEvent::LibraryPreLoaded { library } => format!("swapping in {}", library.display()),
        ReloadEvent::LibraryPostLoaded { library, generation } => {
            format!("{} active as generation {}", library.display(), generation)
        }
        ReloadEvent::ClassPreLoaded { type_name } => format!("installing `{}`", type_name),
        ReloadEvent::ClassPostLoaded { type_name, generation } => {
            format!("`{}` running (generation {})", type_name, generation)
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = cli.load_config()?;

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();
    ctrlc::set_handler(move || {
        running_clone.store(false, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;

    let mut reloader = HotReloader::new(config);
    let events = reloader.subscribe();
    for dep in &cli.deps {
        reloader.watch(dep, FileRole::Dependency);
    }

    if let Err(e) = reloader.execute_file(&cli.main) {
        // Keep watching: the next successful build becomes the first generation.
        log::error!("{}; waiting for the source to change", e);
    }

    let frame = Duration::from_secs_f64(1.0 / f64::from(cli.fps.max(1)));
    let mut last_frame = Instant::now();
    log::info!("Watching {} (Ctrl+C to stop)", cli.main.display());

    while running.load(Ordering::SeqCst) {
        let now = Instant::now();
        let delta_time = now.duration_since(last_frame).as_secs_f32();
        last_frame = now;

        reloader.tick();
        for event in events.try_iter() {
            log::info!("[reload] {}", describe(&event));
        }
        reloader.update(delta_time);

        let spent = now.elapsed();
        if spent < frame {
            std::thread::sleep(frame - spent);
        }
    }

    log::info!("Shutting down");
    reloader.shutdown();
    Ok(())
}
