use tokio::sync::mpsc;
use tokio::time::error::Elapsed;
use tokio::time::{timeout_at, Instant};

/// Receives one value, giving up at `deadline`.
///
/// A value that is already queued is returned without consulting the clock,
/// so a receiver draining a burst after its deadline still sees everything
/// that arrived in time.
#[inline]
pub async fn recv_until<T>(rx: &mut mpsc::Receiver<T>, deadline: Instant) -> Result<Option<T>, Elapsed> {
    if let Ok(val) = rx.try_recv() {
        return Ok(Some(val));
    }
    timeout_at(deadline, rx.recv()).await
}

/// Drains every value that has already arrived, without waiting.
#[inline]
pub fn drain_ready<T>(rx: &mut mpsc::Receiver<T>, sink: &mut Vec<T>) {
    while let Ok(val) = rx.try_recv() {
        sink.push(val);
    }
}
