use clap::Parser;
use face_capture::camera::{CameraRepository, ConfigCameraRepository};
use face_capture::config::{AppConfig, FindfaceCredentials};
use face_capture::error::CaptureError;
use face_capture::findface::FindfaceClient;
use face_capture::model::{FaceDetector, StubDetector};
use face_capture::orchestrator::{install_signal_handlers, Orchestrator};
use face_capture::source::SyntheticSourceFactory;
use face_capture::{logger, Result};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Multi-camera face capture pipeline
#[derive(Parser, Debug)]
#[command(name = "face-capture", version, about)]
struct Args {
    /// Path to the configuration document
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

const EXIT_CONFIG: u8 = 1;
const EXIT_STARTUP: u8 = 2;
const EXIT_INTERRUPTED: u8 = 130;

fn main() -> ExitCode {
    let args = Args::parse();

    let config = match AppConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {}", e);
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let log_handle = match logger::init(&config.logging.level, Path::new(&config.logging.file)) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("configuration error: {}", e);
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let interrupted = Arc::new(AtomicBool::new(false));
    let code = match run(config, Arc::clone(&interrupted)) {
        Ok(()) if interrupted.load(Ordering::Relaxed) => ExitCode::from(EXIT_INTERRUPTED),
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("startup failed: {}", e);
            match e {
                CaptureError::Config(_) | CaptureError::Yaml(_) => ExitCode::from(EXIT_CONFIG),
                _ => ExitCode::from(EXIT_STARTUP),
            }
        }
    };

    log_handle.shutdown();
    code
}

fn run(config: AppConfig, interrupted: Arc<AtomicBool>) -> Result<()> {
    let repository = ConfigCameraRepository::from_config(&config);
    let cameras = repository.active_cameras()?;
    log::info!("Loaded {} cameras:", cameras.len());
    for camera in &cameras {
        log::info!("  - camera {} ({})", camera.camera_id, camera.rtsp_url);
    }

    let credentials = FindfaceCredentials::from_env()?;
    let gateway = Arc::new(FindfaceClient::new(credentials)?);

    // One detector per configured device. The stub stands in until a real
    // model backend is linked; it keeps the pipeline shape honest.
    let models: Vec<Arc<dyn FaceDetector>> = config
        .processing
        .gpu_devices
        .iter()
        .map(|_| Arc::new(StubDetector::silent()) as Arc<dyn FaceDetector>)
        .collect();

    let factory = Arc::new(SyntheticSourceFactory::default());

    let mut orchestrator = Orchestrator::new(config, cameras, factory, models, gateway);
    install_signal_handlers(orchestrator.stop_flag(), interrupted)?;

    orchestrator.start()?;
    orchestrator.run();
    orchestrator.stop();
    Ok(())
}
