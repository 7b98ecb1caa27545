//! Meter ingestion task.
//!
//! Drives the serial byte source on a short tick: drain available bytes
//! into the ring, run the frame detector, decode each complete frame with
//! the decoder matching its format tag, and enqueue the uplink payload.
//! Decode failures capture the raw frame bytes for the debug endpoint.
//!
//! Generic over `AsyncRead` so tests feed byte scripts while production
//! opens the serial character device.

use crate::queue::DataPackage;
use crate::state::GatewayState;
use crate::uplink::build_uplink_payload;
use crate::util::boot_millis;
use meter_core::decode::decode_frame;
use meter_core::{ByteRing, DelimiterSpec, FrameDetector, FrameView, Reading};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Cooperative tick; the task never blocks longer than this.
const TICK: Duration = Duration::from_millis(10);

/// Run the ingestion loop until shutdown.
pub async fn run_ingestion<R>(
    mut source: R,
    state: Arc<GatewayState>,
    mut shutdown: watch::Receiver<bool>,
) where
    R: AsyncRead + Unpin,
{
    let mut ring = ByteRing::new(state.config.meter.buffer_size);
    let mut detector = FrameDetector::new(
        DelimiterSpec::defaults(),
        state.config.meter.frame_timeout_ms,
    );
    let mut buf = [0u8; 1024];

    info!(
        capacity = ring.capacity(),
        "meter ingestion task started"
    );

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            read = tokio::time::timeout(TICK, source.read(&mut buf)) => {
                match read {
                    Ok(Ok(0)) => {
                        // Source closed; nothing more will arrive.
                        warn!("meter byte source closed");
                        break;
                    }
                    Ok(Ok(n)) => {
                        let evicted = ring.extend(&buf[..n], boot_millis());
                        if evicted > 0 {
                            debug!(evicted, "meter ring overflowed");
                        }
                    }
                    Ok(Err(e)) => {
                        warn!(error = %e, "meter read failed");
                        tokio::time::sleep(TICK).await;
                        continue;
                    }
                    Err(_) => {} // tick elapsed with no bytes
                }

                process_frames(&mut ring, &mut detector, &state);
            }
        }
    }

    info!("meter ingestion task stopped");
}

/// Drain every complete frame currently in the ring.
fn process_frames(ring: &mut ByteRing, detector: &mut FrameDetector, state: &Arc<GatewayState>) {
    while let Some(info) = detector.detect(ring, boot_millis()) {
        let view = FrameView::new(ring, &info);
        let mut reading = Reading::new();

        match decode_frame(&view, info.format, &mut reading) {
            Ok(()) => {
                state.diag.add_frame();
                if !reading.device_id().is_empty() {
                    state.diag.set_device_id(reading.device_id());
                }
                debug!(
                    format = ?info.format,
                    obis = reading.obis().len(),
                    "telegram decoded"
                );
                enqueue_reading(state, &reading);
                state.set_latest_reading(reading);
            }
            Err(e) => {
                state.diag.add_failed_frame();
                state.diag.set_faulty_frame(&view.to_vec());
                warn!(format = ?info.format, error = %e, "telegram decode failed");
            }
        }
    }
    state.diag.set_meter_buffer(&ring.snapshot());
}

fn enqueue_reading(state: &Arc<GatewayState>, reading: &Reading) {
    let payload = build_uplink_payload(reading, &state.config.meter.serial_number);
    let package = DataPackage {
        payload,
        enqueued_at: boot_millis(),
    };
    match state.queue.push(package) {
        Ok(None) => {}
        Ok(Some(_)) => debug!("uplink queue full, dropped oldest package"),
        Err(e) => warn!(?e, "reading payload rejected"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_state;

    #[tokio::test]
    async fn ascii_telegram_flows_to_queue_and_diagnostics() {
        let state = test_state();
        let telegram: &[u8] =
            b"/LGF5E360\r\n1-0:1.8.0(00013139.107*kWh)\r\n!ABCD\r\n";
        let (_shutdown_tx, shutdown) = watch::channel(false);

        // The reader yields the telegram then pends forever; run the task
        // until the queue has the package.
        let (mut client, mut server) = tokio::io::duplex(4096);
        tokio::io::AsyncWriteExt::write_all(&mut client, telegram)
            .await
            .unwrap();

        let task_state = state.clone();
        let task = tokio::spawn(async move {
            run_ingestion(&mut server, task_state, shutdown).await;
        });

        // Wait for the pipeline to process the frame.
        for _ in 0..100 {
            if !state.queue.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        task.abort();

        assert_eq!(state.diag.frames(), 1);
        assert_eq!(state.diag.failed_frames(), 0);
        assert_eq!(state.diag.device_id(), "LGF5E360");
        let reading = state.latest_reading().expect("latest reading published");
        assert_eq!(reading.obis().len(), 1);

        let pkg = state.queue.try_pop().expect("package queued");
        assert!(pkg.payload.contains("1-0:1.8.0(00013139.107*kWh)"));
    }

    #[tokio::test]
    async fn garbage_and_broken_frames_hit_the_failure_counters() {
        let state = test_state();
        // A 7E-framed blob that is not a valid DLMS frame.
        let bytes: &[u8] = &[0x00, 0x7E, 0x01, 0x02, 0x7E];
        let (_shutdown_tx, shutdown) = watch::channel(false);

        let (mut client, mut server) = tokio::io::duplex(4096);
        tokio::io::AsyncWriteExt::write_all(&mut client, bytes)
            .await
            .unwrap();

        let task_state = state.clone();
        let task = tokio::spawn(async move {
            run_ingestion(&mut server, task_state, shutdown).await;
        });

        for _ in 0..100 {
            if state.diag.failed_frames() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        task.abort();

        assert_eq!(state.diag.frames(), 0);
        assert_eq!(state.diag.failed_frames(), 1);
        assert_eq!(state.diag.faulty_frame_hex(), "7e01027e");
        assert!(state.queue.is_empty());
    }
}
