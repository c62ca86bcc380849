use log::{error, info, warn};
use qr_gate::config::ServiceConfig;
use qr_gate::core::notify::WebhookNotifier;
use qr_gate::scanner::{
    preview, CameraSupervisor, Clock, RawGraySource, RqrrDecoder, ScanLoop, ShutdownSignal,
    SystemClock, PREVIEW_LEN,
};
use std::process::ExitCode;
use std::sync::Arc;

fn main() -> ExitCode {
    qr_gate::init_logging();

    let config = match ServiceConfig::load() {
        Ok(config) => config,
        Err(e) => {
            error!("❌ Config error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    info!("🚀 qr-gate {} starting", env!("CARGO_PKG_VERSION"));
    info!("   webhook: {}", preview(&config.webhook.url, 30));
    info!(
        "   tokens: OPEN={} CLOSE={} TEST={}",
        preview(&config.tokens.open, PREVIEW_LEN),
        preview(&config.tokens.close, PREVIEW_LEN),
        preview(&config.tokens.test, PREVIEW_LEN)
    );
    info!(
        "   camera: {} {}x{}",
        config.camera.device.display(),
        config.camera.width,
        config.camera.height
    );

    let notifier = match WebhookNotifier::spawn(&config.webhook) {
        Ok(notifier) => notifier,
        Err(e) => {
            error!("❌ Webhook notifier failed to start: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let source = RawGraySource::new(
        &config.camera.device,
        config.camera.width,
        config.camera.height,
    )
    .with_read_timeout(config.camera.read_timeout());
    let mut camera = CameraSupervisor::new(
        source,
        clock.clone(),
        config.scanner.cam_fail_threshold,
        config.scanner.cam_reopen_wait(),
    );
    if !camera.start() {
        warn!("⚠️ Camera not available yet, will keep retrying");
    }

    let decoder = RqrrDecoder::with_equalization(config.scanner.equalize_histogram);
    let mut scan_loop = ScanLoop::new(
        camera,
        Box::new(decoder),
        config.tokens.clone(),
        Box::new(notifier),
        clock,
        &config.scanner,
    )
    .with_raw_logging(config.log_raw_qr);

    let shutdown = ShutdownSignal::new();
    let handler_signal = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        if handler_signal.is_triggered() {
            warn!("⚠️ Second interrupt, exiting immediately");
            std::process::exit(130);
        }
        info!("🛑 Shutdown requested (press Ctrl+C again to force exit)");
        handler_signal.trigger();
    }) {
        error!("❌ Cannot install signal handler: {}", e);
        return ExitCode::FAILURE;
    }

    scan_loop.run(&shutdown);
    // Dropping the loop drains the webhook queue, bounded by the drain timeout.
    drop(scan_loop);

    info!("👋 qr-gate stopped");
    ExitCode::SUCCESS
}
