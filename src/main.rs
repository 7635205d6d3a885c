use std::path::PathBuf;
use std::time::Duration;

use colorfilter::config::Configuration;
use colorfilter::coordinator::CoordinatorBuilder;
use colorfilter::error::AppError;
use colorfilter::filter::FilterEvent;
use colorfilter::logging::init_logging;
use colorfilter::pipeline::ChannelRenderer;
use colorfilter::SyntheticCamera;
use tokio::sync::broadcast::error::RecvError;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let configuration = Configuration::load(config_path.as_deref())?;
    init_logging(&configuration.logging.level);

    let render_buffer = configuration.scheduler.render_buffer;
    let mut coordinator = CoordinatorBuilder::new(configuration).build()?;

    let mut events = coordinator.control().events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(FilterEvent::Calibrated { state, term_name, .. }) => {
                    tracing::info!(hue = state.hue(), term = %term_name, "Filter calibrated");
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Missed filter events");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let (renderer, mut rendered) = ChannelRenderer::new(render_buffer);
    let ui_task = tokio::spawn(async move {
        while let Some(frame) = rendered.recv().await {
            tracing::debug!(
                frame_id = %frame.frame_id,
                total = ?frame.metrics.total_duration(),
                "Frame presented"
            );
        }
    });

    let camera = SyntheticCamera::new(640, 480, Duration::from_millis(33));
    coordinator
        .start_camera(Box::new(camera), Box::new(renderer))
        .await?;

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    if let Some(report) = coordinator.stop().await {
        tracing::info!(
            admitted = report.admitted,
            rendered = report.rendered,
            failed = report.failed,
            dropped = report.dropped(),
            slowest = ?report.slowest_frame,
            "Shutting down"
        );
    }
    drop(coordinator);
    if let Err(e) = ui_task.await {
        tracing::error!("UI task failed: {}", e);
    }
    Ok(())
}
