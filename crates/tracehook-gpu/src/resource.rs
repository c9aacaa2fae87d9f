//! Exactly-once ownership of device objects.

use std::fmt;
use std::sync::Arc;

use crate::deferred::ReclaimQueue;
use crate::device::{ResourceHandle, RtDevice, ViewHandle};

/// A raw device object handle that can be destroyed through its device.
pub trait DeviceObject: Copy + Eq + fmt::Debug + Send + Sync + 'static {
    const NULL: Self;

    fn is_null(self) -> bool;

    /// Destroy immediately.
    fn destroy(self, device: &dyn RtDevice);

    /// Hand to the reclamation queue instead of destroying.
    fn defer(self, device: &Arc<dyn RtDevice>, queue: &ReclaimQueue);
}

impl DeviceObject for ResourceHandle {
    const NULL: Self = Self::NULL;

    fn is_null(self) -> bool {
        Self::is_null(self)
    }

    fn destroy(self, device: &dyn RtDevice) {
        device.destroy_resource(self);
    }

    fn defer(self, device: &Arc<dyn RtDevice>, queue: &ReclaimQueue) {
        queue.enqueue_resource(device, self);
    }
}

impl DeviceObject for ViewHandle {
    const NULL: Self = Self::NULL;

    fn is_null(self) -> bool {
        Self::is_null(self)
    }

    fn destroy(self, device: &dyn RtDevice) {
        device.destroy_view(self);
    }

    fn defer(self, device: &Arc<dyn RtDevice>, queue: &ReclaimQueue) {
        queue.enqueue_view(device, self);
    }
}

/// Owns a device object together with the device that created it.
///
/// Dropping a non-null guard destroys the object immediately. GPU work that
/// may still reference the object must go through [`Owned::retire`] instead.
pub struct Owned<H: DeviceObject> {
    device: Arc<dyn RtDevice>,
    handle: H,
}

/// Owned buffer or acceleration structure.
pub type OwnedResource = Owned<ResourceHandle>;
/// Owned shader-resource view.
pub type OwnedView = Owned<ViewHandle>;

impl<H: DeviceObject> Owned<H> {
    /// Take ownership of `handle`.
    pub fn new(device: Arc<dyn RtDevice>, handle: H) -> Self {
        Self { device, handle }
    }

    /// The raw handle. Remains owned by the guard.
    #[inline]
    pub fn handle(&self) -> H {
        self.handle
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.handle.is_null()
    }

    pub fn device(&self) -> &Arc<dyn RtDevice> {
        &self.device
    }

    /// Move ownership into a new guard, leaving this one null.
    #[must_use]
    pub fn take(&mut self) -> Self {
        Self {
            device: Arc::clone(&self.device),
            handle: std::mem::replace(&mut self.handle, H::NULL),
        }
    }

    /// Give up ownership without destroying; the caller becomes responsible for the handle.
    #[must_use]
    pub fn release(mut self) -> H {
        std::mem::replace(&mut self.handle, H::NULL)
    }

    /// Transfer ownership to the reclamation queue.
    pub fn retire(mut self, queue: &ReclaimQueue) {
        let handle = std::mem::replace(&mut self.handle, H::NULL);
        if !handle.is_null() {
            handle.defer(&self.device, queue);
        }
    }
}

impl<H: DeviceObject> Drop for Owned<H> {
    fn drop(&mut self) {
        let handle = std::mem::replace(&mut self.handle, H::NULL);
        if !handle.is_null() {
            handle.destroy(self.device.as_ref());
        }
    }
}

impl<H: DeviceObject> fmt::Debug for Owned<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Owned")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}
