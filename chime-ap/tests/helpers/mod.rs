//! Shared fixtures for chime-ap integration tests
//!
//! Not every test binary uses every helper.
#![allow(dead_code)]

use async_trait::async_trait;
use chime_ap::error::{Error, Result};
use chime_ap::playback::{
    DispatchOutcome, Dispatcher, PlaybackExecutor, QueueItem, SoundResolver,
};
use chime_ap::Pipeline;
use chime_common::config::{ChimeConfig, EventPolicy};
use chime_common::events::{AuditDecision, AuditRecord};
use chime_common::time::{Clock, ManualClock};
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

/// Wed 4 March 2026, 10:30 local
pub fn morning() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 3, 4)
        .unwrap()
        .and_hms_opt(10, 30, 0)
        .unwrap()
}

/// Config whose `[defaults]` policy is `policy`
pub fn config_with(policy: EventPolicy) -> ChimeConfig {
    ChimeConfig {
        defaults: policy,
        ..Default::default()
    }
}

/// Pipeline on a manual clock starting at `wall`
pub fn manual_pipeline(config: ChimeConfig, wall: NaiveDateTime) -> (Arc<Pipeline>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(wall));
    let dyn_clock: Arc<dyn Clock> = clock.clone();
    let pipeline = Pipeline::new(Arc::new(config), dyn_clock).expect("valid test config");
    (Arc::new(pipeline), clock)
}

/// Resolves every sound id to a path of the same name, except `missing:*`
pub struct PassthroughResolver;

impl SoundResolver for PassthroughResolver {
    fn resolve(&self, sound_id: &str) -> Result<PathBuf> {
        if sound_id.starts_with("missing:") {
            return Err(Error::Resolve(format!("no such sound: {}", sound_id)));
        }
        Ok(PathBuf::from(sound_id))
    }
}

/// Fake player that records what it was asked to play
#[derive(Default)]
pub struct RecordingExecutor {
    plays: Mutex<Vec<(PathBuf, f32)>>,
    failing: HashSet<String>,
    hanging: HashSet<String>,
    delay: Duration,
    /// Manual clock moved forward inside each play, standing in for sound length
    clock_step: Option<(Arc<ManualClock>, Duration)>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(mut self, sound: &str) -> Self {
        self.failing.insert(sound.to_string());
        self
    }

    pub fn hang_on(mut self, sound: &str) -> Self {
        self.hanging.insert(sound.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn advancing(mut self, clock: Arc<ManualClock>, by: Duration) -> Self {
        self.clock_step = Some((clock, by));
        self
    }

    pub fn played(&self) -> Vec<String> {
        self.plays
            .lock()
            .unwrap()
            .iter()
            .map(|(p, _)| p.to_string_lossy().to_string())
            .collect()
    }

    pub fn volumes(&self) -> Vec<f32> {
        self.plays.lock().unwrap().iter().map(|(_, v)| *v).collect()
    }
}

#[async_trait]
impl PlaybackExecutor for RecordingExecutor {
    async fn play(&self, sound: &Path, volume: f32) -> Result<()> {
        self.plays.lock().unwrap().push((sound.to_path_buf(), volume));
        let name = sound.to_string_lossy().to_string();
        if let Some((clock, by)) = &self.clock_step {
            clock.advance(*by);
        }
        if self.hanging.contains(&name) {
            std::future::pending::<()>().await;
        }
        if self.failing.contains(&name) {
            return Err(Error::Playback("simulated device failure".to_string()));
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(())
    }
}

pub fn dispatcher_for(pipeline: &Pipeline, executor: Arc<RecordingExecutor>) -> Dispatcher {
    Dispatcher::new(
        Arc::new(PassthroughResolver),
        executor,
        &pipeline.config().queue,
    )
}

/// Dispatch everything queued, in order, the way the worker would
pub async fn dispatch_all(
    pipeline: &Pipeline,
    dispatcher: &Dispatcher,
) -> Vec<(QueueItem, DispatchOutcome)> {
    let mut done = Vec::new();
    while let Some(item) = pipeline.queue().try_dequeue() {
        let preempt = pipeline
            .queue()
            .preempt_signal()
            .expect("dequeued item is dispatching");
        let started_at = pipeline.clock().now();
        let outcome = dispatcher.dispatch(&item, &preempt).await;
        pipeline.queue().finish_dispatch();
        pipeline.record_dispatch(&item, &outcome, started_at);
        done.push((item, outcome));
    }
    done
}

/// Everything currently buffered on an audit receiver
pub fn drain_audit(rx: &mut broadcast::Receiver<AuditRecord>) -> Vec<AuditRecord> {
    let mut records = Vec::new();
    while let Ok(record) = rx.try_recv() {
        records.push(record);
    }
    records
}

pub fn with_decision(records: &[AuditRecord], decision: AuditDecision) -> Vec<AuditRecord> {
    records
        .iter()
        .filter(|r| r.decision == decision)
        .cloned()
        .collect()
}

/// Wait for the first audit record with `decision`
pub async fn wait_for(
    rx: &mut broadcast::Receiver<AuditRecord>,
    decision: AuditDecision,
) -> AuditRecord {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(record) if record.decision == decision => return record,
                Ok(_) => continue,
                Err(e) => panic!("audit stream ended: {:?}", e),
            }
        }
    })
    .await
    .expect("timed out waiting for audit record")
}
