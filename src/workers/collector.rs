use std::time::Duration;

use log::{debug, info};

use super::batch::BatchSession;
use super::messages::BatchResults;

/// Race the batch against `deadline`, measured from the session start.
///
/// Slots that completed in time keep their genuine value; every other slot
/// gets `default_value`. Workers still running are not interrupted, their
/// results are simply discarded when they arrive. If every slot settles
/// early the call returns early, and slots abandoned by stopped workers are
/// defaulted with the time actually waited. A deadline too far out to be
/// represented as an instant means no deadline at all.
pub async fn collect_with_deadline(
    session: &BatchSession,
    deadline: Duration,
    default_value: i64,
) -> BatchResults {
    let Some(expiry) = session.started().checked_add(deadline) else {
        debug!("Deadline of {:?} is out of range, waiting for every slot", deadline);
        return collect_all(session, default_value).await;
    };
    let fallback_elapsed = tokio::select! {
        biased;
        _ = session.settled() => {
            debug!("Every slot settled before the deadline");
            session.elapsed()
        }
        _ = tokio::time::sleep_until(expiry) => {
            info!(outstanding = session.outstanding() as u64; "Deadline of {:?} elapsed", deadline);
            deadline
        }
    };
    fill_and_snapshot(session, default_value, fallback_elapsed)
}

/// Wait for every slot to settle, however long that takes.
pub async fn collect_all(session: &BatchSession, default_value: i64) -> BatchResults {
    session.settled().await;
    let elapsed = session.elapsed();
    fill_and_snapshot(session, default_value, elapsed)
}

fn fill_and_snapshot(session: &BatchSession, default_value: i64, elapsed: Duration) -> BatchResults {
    let defaulted = session.fill_defaults(default_value, elapsed);
    if defaulted > 0 {
        info!(defaulted = defaulted as u64; "Filled slots with the default value {}", default_value);
    }
    session.results()
}
