//! Startup recovery and the live poll loop.
//!
//! Recovery prunes persisted references to ids that no longer exist on
//! either map, then replays every current source feature through
//! [`Mirror::on_new_feature`]. The idempotency guard in that handler makes
//! replay safe to repeat: features whose target copies survived are skipped.

use std::time::Duration;

use crate::error::MirrorResult;
use crate::feature::{Feature, FeatureClass};
use crate::reconcile::state::PruneReport;
use crate::reconcile::{Mirror, Outcome};
use crate::session::{EventSource, MapSession};

/// Summary of one startup recovery pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecoveryReport {
    pub pruned: PruneReport,
    /// Source features fed through replay.
    pub replayed: usize,
    /// Replays that created or restored target features.
    pub created: usize,
    /// Replays that found nothing to do.
    pub skipped: usize,
    /// Replays that failed; each failure is logged and replay continues.
    pub failed: usize,
}

impl<S: MapSession, T: MapSession> Mirror<S, T> {
    /// Prune stale state against both maps' live inventories, then replay
    /// every source feature. Assignments go first so tracks find their
    /// outings instead of opening speculative ones.
    pub fn start(&mut self) -> MirrorResult<RecoveryReport> {
        let source_inv = self.source.inventory()?;
        let target_inv = self.target.inventory()?;
        let pruned = self.store.prune(&source_inv, &target_inv)?;
        if !pruned.is_empty() {
            tracing::info!(
                entries = pruned.correspondence_dropped,
                target_ids = pruned.target_ids_dropped,
                outings = pruned.outings_dropped,
                outing_refs = pruned.outing_refs_dropped,
                "pruned stale reconciliation state"
            );
        }

        let mut features = self.source.features()?;
        features.sort_by_key(|f| f.class() != FeatureClass::Assignment);

        let mut report = RecoveryReport {
            pruned,
            ..Default::default()
        };
        for feature in &features {
            report.replayed += 1;
            match self.on_new_feature(feature) {
                Ok(outcome) if creates(&outcome) => report.created += 1,
                Ok(_) => report.skipped += 1,
                Err(e) => {
                    report.failed += 1;
                    log_failure(feature, &e);
                }
            }
        }
        self.target.flush()?;

        tracing::info!(
            replayed = report.replayed,
            created = report.created,
            skipped = report.skipped,
            failed = report.failed,
            "startup replay complete"
        );
        Ok(report)
    }

    /// Take one batch of events and handle each to completion, in order.
    /// Returns how many events were handled.
    pub fn poll_once<E: EventSource>(&mut self, events: &mut E) -> MirrorResult<usize> {
        let batch = events.poll()?;
        for event in &batch {
            self.source.observe(event);
            if let Err(e) = self.handle(event) {
                log_failure(&event.feature, &e);
            }
            self.target.flush()?;
        }
        if !batch.is_empty() {
            self.source.flush()?;
            tracing::debug!(events = batch.len(), "poll handled");
        }
        Ok(batch.len())
    }

    /// Poll forever, sleeping `interval` between polls. A failed poll is
    /// logged and retried on the next tick.
    pub fn run<E: EventSource>(&mut self, events: &mut E, interval: Duration) -> MirrorResult<()> {
        tracing::info!(interval_secs = interval.as_secs_f64(), "entering live mode");
        loop {
            if let Err(e) = self.poll_once(events) {
                tracing::warn!(error = %e, "poll failed");
            }
            std::thread::sleep(interval);
        }
    }
}

fn creates(outcome: &Outcome) -> bool {
    matches!(
        outcome,
        Outcome::Created { .. }
            | Outcome::OutingOpened { .. }
            | Outcome::OutingRestored { .. }
            | Outcome::Renamed { .. }
            | Outcome::Reassigned { .. }
    )
}

fn log_failure(feature: &Feature, error: &crate::error::MirrorError) {
    tracing::warn!(
        id = %feature.id,
        title = %feature.title,
        class = %feature.class(),
        error = %error,
        "failed to reconcile feature"
    );
}
