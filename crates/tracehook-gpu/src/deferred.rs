//! Deferred reclamation of GPU objects for multi-frame-in-flight rendering.
//!
//! Objects retired while building a frame may still be referenced by command
//! lists the GPU has not finished executing. They are parked in a fixed ring of
//! per-frame buckets and destroyed once their bucket comes around again.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, trace};

use crate::device::{ResourceHandle, RtDevice, ViewHandle};

/// A handle waiting for destruction, tagged with its owning device.
struct Pending<H> {
    device: Arc<dyn RtDevice>,
    handle: H,
}

impl<H: PartialEq> Pending<H> {
    fn matches(&self, device: &Arc<dyn RtDevice>, handle: &H) -> bool {
        self.handle == *handle
            && std::ptr::addr_eq(Arc::as_ptr(&self.device), Arc::as_ptr(device))
    }
}

/// Objects retired during one frame.
#[derive(Default)]
struct Bucket {
    views: Vec<Pending<ViewHandle>>,
    resources: Vec<Pending<ResourceHandle>>,
}

impl Bucket {
    fn len(&self) -> usize {
        self.views.len() + self.resources.len()
    }

    /// Destroy every view first, then every resource, since views reference resources.
    fn destroy_all(&mut self) -> usize {
        let count = self.len();
        for pending in self.views.drain(..) {
            pending.device.destroy_view(pending.handle);
        }
        for pending in self.resources.drain(..) {
            pending.device.destroy_resource(pending.handle);
        }
        count
    }
}

struct Ring {
    frame_index: u64,
    buckets: Vec<Bucket>,
}

impl Ring {
    fn slot(&self, frame: u64) -> usize {
        (frame % self.buckets.len() as u64) as usize
    }

    fn current(&mut self) -> &mut Bucket {
        let slot = self.slot(self.frame_index);
        &mut self.buckets[slot]
    }
}

/// Ring of per-frame pending-delete lists.
///
/// Enqueue and advance may be called from different threads; all mutation is
/// serialized behind one exclusive lock.
pub struct ReclaimQueue {
    ring: RwLock<Ring>,
}

impl ReclaimQueue {
    /// Create a queue with `frames` buckets.
    ///
    /// An object retired in frame `F` is destroyed by the `advance` that ends
    /// frame `F + frames - 1`. At least one bucket is always allocated.
    pub fn new(frames: usize) -> Self {
        let frames = frames.max(1);
        let mut buckets = Vec::with_capacity(frames);
        buckets.resize_with(frames, Bucket::default);
        Self {
            ring: RwLock::new(Ring {
                frame_index: 0,
                buckets,
            }),
        }
    }

    /// Queue a view for destruction. Returns false if it was already queued this frame.
    pub fn enqueue_view(&self, device: &Arc<dyn RtDevice>, view: ViewHandle) -> bool {
        if view.is_null() {
            return false;
        }
        let mut ring = self.ring.write();
        let frame = ring.frame_index;
        let bucket = ring.current();
        if bucket.views.iter().any(|p| p.matches(device, &view)) {
            trace!(?view, frame, "view already queued for reclamation");
            return false;
        }
        bucket.views.push(Pending {
            device: Arc::clone(device),
            handle: view,
        });
        trace!(?view, frame, "view queued for reclamation");
        true
    }

    /// Queue a resource for destruction. Returns false if it was already queued this frame.
    pub fn enqueue_resource(&self, device: &Arc<dyn RtDevice>, resource: ResourceHandle) -> bool {
        if resource.is_null() {
            return false;
        }
        let mut ring = self.ring.write();
        let frame = ring.frame_index;
        let bucket = ring.current();
        if bucket.resources.iter().any(|p| p.matches(device, &resource)) {
            trace!(?resource, frame, "resource already queued for reclamation");
            return false;
        }
        bucket.resources.push(Pending {
            device: Arc::clone(device),
            handle: resource,
        });
        trace!(?resource, frame, "resource queued for reclamation");
        true
    }

    /// Close the current frame.
    ///
    /// Destroys the contents of the oldest bucket (the one the next frame will
    /// reuse) and moves to the next frame. Returns the number of objects destroyed.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn advance(&self) -> usize {
        let mut ring = self.ring.write();
        let delete_slot = ring.slot(ring.frame_index + 1);
        let destroyed = ring.buckets[delete_slot].destroy_all();
        ring.frame_index += 1;
        if destroyed > 0 {
            trace!(
                frame = ring.frame_index,
                destroyed,
                "reclaimed retired GPU objects"
            );
        }
        destroyed
    }

    /// Destroy everything regardless of age.
    ///
    /// Call during shutdown once the GPU is idle. Views of every bucket are
    /// destroyed before any resource.
    pub fn drain_all(&self) -> usize {
        let mut ring = self.ring.write();
        let start = ring.slot(ring.frame_index + 1);
        let count = ring.buckets.len();

        let mut destroyed = 0;
        for offset in 0..count {
            let bucket = &mut ring.buckets[(start + offset) % count];
            destroyed += bucket.views.len();
            for pending in bucket.views.drain(..) {
                pending.device.destroy_view(pending.handle);
            }
        }
        for offset in 0..count {
            let bucket = &mut ring.buckets[(start + offset) % count];
            destroyed += bucket.resources.len();
            for pending in bucket.resources.drain(..) {
                pending.device.destroy_resource(pending.handle);
            }
        }

        if destroyed > 0 {
            info!(destroyed, "drained reclamation queue");
        }
        destroyed
    }

    /// Number of objects waiting for destruction.
    pub fn pending_count(&self) -> usize {
        self.ring.read().buckets.iter().map(Bucket::len).sum()
    }

    /// Number of `advance` calls so far.
    pub fn frame_index(&self) -> u64 {
        self.ring.read().frame_index
    }

    /// Number of buckets in the ring.
    pub fn frames(&self) -> usize {
        self.ring.read().buckets.len()
    }
}

impl Drop for ReclaimQueue {
    fn drop(&mut self) {
        self.drain_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::CountingDevice;

    fn shared() -> (Arc<CountingDevice>, Arc<dyn RtDevice>) {
        let device = CountingDevice::shared();
        let erased: Arc<dyn RtDevice> = device.clone();
        (device, erased)
    }

    #[test]
    fn destroyed_on_fourth_advance_with_four_buckets() {
        let (device, erased) = shared();
        let queue = ReclaimQueue::new(4);
        queue.enqueue_resource(&erased, ResourceHandle(11));

        for _ in 0..3 {
            assert_eq!(queue.advance(), 0);
            assert!(device.destroyed_resources().is_empty());
        }
        assert_eq!(queue.advance(), 1);
        assert_eq!(device.destroyed_resources(), vec![ResourceHandle(11)]);
        assert_eq!(queue.pending_count(), 0);
    }

    #[test]
    fn duplicate_enqueue_in_one_frame_is_ignored() {
        let (device, erased) = shared();
        let queue = ReclaimQueue::new(4);
        assert!(queue.enqueue_resource(&erased, ResourceHandle(3)));
        assert!(!queue.enqueue_resource(&erased, ResourceHandle(3)));
        assert!(queue.enqueue_view(&erased, ViewHandle(3)));
        assert!(!queue.enqueue_view(&erased, ViewHandle(3)));

        queue.drain_all();
        assert_eq!(device.destroyed_resources(), vec![ResourceHandle(3)]);
        assert_eq!(device.destroyed_views(), vec![ViewHandle(3)]);
    }

    #[test]
    fn null_handles_are_not_queued() {
        let (_device, erased) = shared();
        let queue = ReclaimQueue::new(4);
        assert!(!queue.enqueue_resource(&erased, ResourceHandle::NULL));
        assert!(!queue.enqueue_view(&erased, ViewHandle::NULL));
        assert_eq!(queue.pending_count(), 0);
    }

    #[test]
    fn views_destroyed_before_resources() {
        let (device, erased) = shared();
        let queue = ReclaimQueue::new(4);
        queue.enqueue_resource(&erased, ResourceHandle(1));
        queue.advance();
        queue.enqueue_view(&erased, ViewHandle(2));

        assert_eq!(queue.drain_all(), 2);
        assert_eq!(
            device.log(),
            vec!["destroy_view 2".to_string(), "destroy_resource 1".to_string()]
        );
    }

    #[test]
    fn drain_all_destroys_each_object_once() {
        let (device, erased) = shared();
        let queue = ReclaimQueue::new(4);
        for frame in 0..6u64 {
            queue.enqueue_resource(&erased, ResourceHandle(100 + frame));
            queue.enqueue_view(&erased, ViewHandle(200 + frame));
            queue.advance();
        }
        // Frames 0..=2 have come around by now; 3..=5 are still pending.
        assert_eq!(device.destroyed_resources().len(), 3);
        assert_eq!(queue.drain_all(), 6);
        assert_eq!(device.destroyed_resources().len(), 6);
        assert_eq!(device.destroyed_views().len(), 6);
        assert_eq!(queue.pending_count(), 0);
        assert_eq!(queue.drain_all(), 0);
    }

    #[test]
    fn enqueue_from_other_threads() {
        let (device, erased) = shared();
        let queue = Arc::new(ReclaimQueue::new(4));

        let handles: Vec<_> = (0..4u64)
            .map(|t| {
                let queue = Arc::clone(&queue);
                let erased = Arc::clone(&erased);
                std::thread::spawn(move || {
                    for i in 0..25u64 {
                        queue.enqueue_resource(&erased, ResourceHandle(1 + t * 100 + i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(queue.pending_count(), 100);
        queue.drain_all();
        assert_eq!(device.destroyed_resources().len(), 100);
    }

    #[test]
    fn single_bucket_reclaims_on_next_advance() {
        let (device, erased) = shared();
        let queue = ReclaimQueue::new(0);
        assert_eq!(queue.frames(), 1);
        queue.enqueue_resource(&erased, ResourceHandle(8));
        queue.advance();
        assert_eq!(device.destroyed_resources(), vec![ResourceHandle(8)]);
    }
}
