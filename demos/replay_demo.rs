//! Replay a synthetic recording through the band detector while logging the
//! stream, then print the events and the logged file.
//!
//! Run with `cargo run --example replay_demo`.

use emg_trigger_agent::collector::{Acquisition, ReplaySource, SampleField};
use emg_trigger_agent::core::{BandDetector, ConfirmationPolicy, Coordinator};
use emg_trigger_agent::stats::create_shared_stats;
use emg_trigger_agent::storage::StreamLogger;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    // Rest, then a sustained contraction around the band centre
    let mut lines = Vec::new();
    for i in 0..300 {
        lines.push(format!("{:.1},{:.1},{}", (i % 5) as f64, 20.0, 40));
    }
    for i in 0..300 {
        lines.push(format!("{:.1},{:.1},{}", (i % 5) as f64, 110.0, 110));
    }

    let dir = std::env::temp_dir().join(format!("emg-demo-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir)?;

    let stats = create_shared_stats();
    let source = ReplaySource::new(lines).with_pacing(Duration::from_millis(1));
    let mut acquisition = Acquisition::new(Box::new(source), stats.clone());
    acquisition.start()?;

    let mut logger = StreamLogger::new(&dir)
        .with_interval(Duration::from_millis(5))
        .with_stats(stats.clone());
    let latest = acquisition.latest();
    logger.start_stream("demo", 2, move || latest.load().map(|s| s.reading()))?;

    let (tx, rx) = crossbeam_channel::unbounded();
    let detector = BandDetector::new(100, 110.0, 0.1, ConfirmationPolicy::majority());
    let mut coordinator =
        Coordinator::new(Box::new(detector), SampleField::Signal, stats.clone()).with_events(tx);

    let running = AtomicBool::new(true);
    coordinator.run(acquisition.receiver(), &running)?;

    acquisition.stop();
    logger.stop_stream(Duration::from_secs(1));

    for event in rx.try_iter() {
        println!("event: label={} after {} windows", event.label, event.decisions);
    }

    let logged = std::fs::read_to_string(logger.stream_path())?;
    println!("logged {} rows to {}", logged.lines().count().saturating_sub(1), dir.display());
    println!("{}", stats.summary());

    std::fs::remove_dir_all(&dir)?;
    Ok(())
}
