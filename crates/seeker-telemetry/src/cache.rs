use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use image::RgbImage;
use seeker_proto::{PoseStamped, RcIn, VehicleStatus};
use time::OffsetDateTime;
use tracing::{debug, warn};

/// A decoded camera frame (RGB8).
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub received_at: Instant,
}

impl Frame {
    pub fn new(image: RgbImage) -> Self {
        Self { image, received_at: Instant::now() }
    }

    pub fn age(&self) -> Duration {
        self.received_at.elapsed()
    }
}

/// Immutable copy of the cache at one instant.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub pose: Option<PoseStamped>,
    pub pose_received: Option<OffsetDateTime>,
    pub rc: RcIn,
    pub image: Option<Arc<Frame>>,
    pub status: Option<VehicleStatus>,
    pub status_received: Option<Instant>,
}

impl Snapshot {
    /// Vehicle timestamp of the last pose, 0 before the first one.
    pub fn stamp_ms(&self) -> u32 {
        self.pose.map(|p| p.stamp_ms).unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy)]
struct PoseSample {
    pose: PoseStamped,
    received: OffsetDateTime,
}

#[derive(Debug, Clone, Copy)]
struct StatusSample {
    status: VehicleStatus,
    received: Instant,
}

#[derive(Debug, Default)]
pub struct TelemetryCache {
    pose: RwLock<Option<PoseSample>>,
    rc: RwLock<RcIn>,
    image: RwLock<Option<Arc<Frame>>>,
    status: RwLock<Option<StatusSample>>,
    decode_failures: AtomicU64,
}

// A writer that panicked mid-update cannot leave a torn value behind (each
// write is a single assignment), so poisoned locks are simply recovered.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

impl TelemetryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update_pose(&self, pose: PoseStamped) {
        let sample = PoseSample { pose, received: OffsetDateTime::now_utc() };
        *write(&self.pose) = Some(sample);
    }

    pub fn update_rc(&self, rc: RcIn) {
        *write(&self.rc) = rc;
    }

    pub fn update_status(&self, status: VehicleStatus) {
        *write(&self.status) = Some(StatusSample { status, received: Instant::now() });
    }

    /// Decode a compressed frame (JPEG/PNG) and store it.
    ///
    /// A payload that fails to decode replaces the cached image with absence
    /// and is counted; it never errors into the caller. Returns whether the
    /// frame decoded.
    pub fn update_image(&self, compressed: &[u8]) -> bool {
        // decode outside the lock so readers are never stalled by it
        match image::load_from_memory(compressed) {
            Ok(img) => {
                self.update_frame(img.to_rgb8());
                true
            }
            Err(e) => {
                let n = self.decode_failures.fetch_add(1, Ordering::Relaxed) + 1;
                warn!("telemetry: image decode failed ({} bytes, #{}): {}", compressed.len(), n, e);
                *write(&self.image) = None;
                false
            }
        }
    }

    pub fn update_frame(&self, image: RgbImage) {
        debug!("telemetry: frame {}x{}", image.width(), image.height());
        *write(&self.image) = Some(Arc::new(Frame::new(image)));
    }

    pub fn pose(&self) -> Option<PoseStamped> {
        read(&self.pose).as_ref().map(|s| s.pose)
    }

    pub fn rc(&self) -> RcIn {
        read(&self.rc).clone()
    }

    pub fn image(&self) -> Option<Arc<Frame>> {
        read(&self.image).clone()
    }

    pub fn status(&self) -> Option<VehicleStatus> {
        read(&self.status).as_ref().map(|s| s.status)
    }

    /// Vehicle timestamp of the last pose, 0 before the first one.
    pub fn stamp_ms(&self) -> u32 {
        self.pose().map(|p| p.stamp_ms).unwrap_or(0)
    }

    pub fn decode_failures(&self) -> u64 {
        self.decode_failures.load(Ordering::Relaxed)
    }

    /// Consistent copy of every field. Locks are always taken in the same
    /// order (pose, rc, image, status) and held together.
    pub fn snapshot(&self) -> Snapshot {
        let pose = read(&self.pose);
        let rc = read(&self.rc);
        let image = read(&self.image);
        let status = read(&self.status);

        Snapshot {
            pose: pose.as_ref().map(|s| s.pose),
            pose_received: pose.as_ref().map(|s| s.received),
            rc: rc.clone(),
            image: image.clone(),
            status: status.as_ref().map(|s| s.status),
            status_received: status.as_ref().map(|s| s.received),
        }
    }

    /// Poll until `pred` holds for a snapshot or `timeout` elapses.
    pub fn wait_until<F>(&self, timeout: Duration, mut pred: F) -> Option<Snapshot>
    where
        F: FnMut(&Snapshot) -> bool,
    {
        let start = Instant::now();
        loop {
            let snap = self.snapshot();
            if pred(&snap) {
                return Some(snap);
            }
            if start.elapsed() >= timeout {
                return None;
            }
            std::thread::sleep(Duration::from_millis(25));
        }
    }

    pub fn wait_for_pose(&self, timeout: Duration) -> Option<PoseStamped> {
        self.wait_until(timeout, |s| s.pose.is_some()).and_then(|s| s.pose)
    }
}
