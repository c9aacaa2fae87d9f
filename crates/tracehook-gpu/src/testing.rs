//! Minimal device for unit tests of lifetime management.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::device::{
    AccelerationStructureBuild, BuildInputs, BuildSizes, CommandList, ResourceDesc,
    ResourceHandle, RtDevice, ViewDesc, ViewHandle,
};
use crate::error::{GpuError, Result};

/// Records destroy calls in order; every other call is unsupported.
#[derive(Default)]
pub struct CountingDevice {
    log: Mutex<Vec<String>>,
    resources: Mutex<Vec<ResourceHandle>>,
    views: Mutex<Vec<ViewHandle>>,
}

impl CountingDevice {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn destroyed_resources(&self) -> Vec<ResourceHandle> {
        self.resources.lock().clone()
    }

    pub fn destroyed_views(&self) -> Vec<ViewHandle> {
        self.views.lock().clone()
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }
}

impl RtDevice for CountingDevice {
    fn create_resource(&self, _desc: &ResourceDesc<'_>) -> Result<ResourceHandle> {
        Err(GpuError::Other("unsupported".to_string()))
    }

    fn destroy_resource(&self, resource: ResourceHandle) {
        self.log.lock().push(format!("destroy_resource {}", resource.0));
        self.resources.lock().push(resource);
    }

    fn create_view(&self, _resource: ResourceHandle, _desc: &ViewDesc) -> Result<ViewHandle> {
        Err(GpuError::Other("unsupported".to_string()))
    }

    fn destroy_view(&self, view: ViewHandle) {
        self.log.lock().push(format!("destroy_view {}", view.0));
        self.views.lock().push(view);
    }

    fn map_buffer(
        &self,
        _resource: ResourceHandle,
        _write: &mut dyn FnMut(&mut [u8]),
    ) -> Result<()> {
        Err(GpuError::Other("unsupported".to_string()))
    }

    fn acceleration_structure_sizes(&self, _inputs: &BuildInputs) -> Result<BuildSizes> {
        Err(GpuError::Other("unsupported".to_string()))
    }

    fn build_acceleration_structure(
        &self,
        _cmd: CommandList,
        _build: &AccelerationStructureBuild<'_>,
    ) -> Result<()> {
        Err(GpuError::Other("unsupported".to_string()))
    }

    fn acceleration_structure_barrier(&self, _cmd: CommandList) {}

    fn acceleration_structure_address(&self, _resource: ResourceHandle) -> u64 {
        0
    }

    fn descriptor_index(&self, _view: ViewHandle) -> Option<u32> {
        None
    }
}
