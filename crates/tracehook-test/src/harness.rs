//! Headless device that records every call instead of talking to a GPU.
//!
//! Resources live in host memory, CPU-writable buffers keep their bytes for
//! readback, and builds or resource creation can be made to fail on demand.

use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::Mutex;
use tracing::trace;

use tracehook_gpu::{
    AccelerationStructureBuild, AccelerationStructureLevel, BuildFlags, BuildInputs, BuildSizes,
    CommandList, GpuError, MemoryLocation, ResourceDesc, ResourceHandle, ResourceKind, RtDevice,
    ViewDesc, ViewHandle,
};

use crate::{Result, TestError};

/// Base of the fake acceleration-structure address space.
const ADDRESS_BASE: u64 = 0x1000_0000;

/// One recorded acceleration-structure build.
#[derive(Clone, Debug)]
pub struct BuildRecord {
    pub cmd: CommandList,
    pub inputs: BuildInputs,
    pub dst: ResourceHandle,
    pub scratch: ResourceHandle,
    pub instances: ResourceHandle,
    pub flags: BuildFlags,
}

impl BuildRecord {
    pub fn level(&self) -> AccelerationStructureLevel {
        self.inputs.level()
    }
}

/// Ordered log of the calls that matter for GPU ordering and lifetime.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeviceEvent {
    Build(AccelerationStructureLevel, ResourceHandle),
    Barrier(CommandList),
    DestroyView(ViewHandle),
    DestroyResource(ResourceHandle),
}

/// Failures to inject into upcoming calls.
#[derive(Clone, Copy, Debug, Default)]
pub struct FailurePlan {
    /// Number of upcoming builds to reject.
    pub builds: u32,
    /// Number of upcoming resource creations to reject.
    pub resource_creates: u32,
    /// Number of upcoming view creations to reject.
    pub view_creates: u32,
}

struct ResourceRecord {
    name: String,
    kind: ResourceKind,
    bytes: Option<Vec<u8>>,
}

#[derive(Default)]
struct State {
    next_handle: u64,
    next_descriptor: u32,
    resources: HashMap<ResourceHandle, ResourceRecord>,
    views: HashMap<ViewHandle, (ResourceHandle, ViewDesc, u32)>,
    destroyed_resources: Vec<ResourceHandle>,
    destroyed_views: Vec<ViewHandle>,
    invalid_destroys: Vec<u64>,
    builds: Vec<BuildRecord>,
    events: Vec<DeviceEvent>,
    failures: FailurePlan,
}

impl State {
    fn next_handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }
}

/// Recording implementation of [`RtDevice`].
#[derive(Default)]
pub struct RecordingDevice {
    state: Mutex<State>,
}

impl RecordingDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Reject the next `count` acceleration-structure builds.
    pub fn fail_next_builds(&self, count: u32) {
        self.state.lock().failures.builds = count;
    }

    /// Reject the next `count` resource creations.
    pub fn fail_next_resource_creates(&self, count: u32) {
        self.state.lock().failures.resource_creates = count;
    }

    /// Reject the next `count` view creations.
    pub fn fail_next_view_creates(&self, count: u32) {
        self.state.lock().failures.view_creates = count;
    }

    pub fn live_resource_count(&self) -> usize {
        self.state.lock().resources.len()
    }

    pub fn live_view_count(&self) -> usize {
        self.state.lock().views.len()
    }

    pub fn is_live(&self, resource: ResourceHandle) -> bool {
        self.state.lock().resources.contains_key(&resource)
    }

    pub fn is_view_live(&self, view: ViewHandle) -> bool {
        self.state.lock().views.contains_key(&view)
    }

    pub fn destroyed_resources(&self) -> Vec<ResourceHandle> {
        self.state.lock().destroyed_resources.clone()
    }

    pub fn destroyed_views(&self) -> Vec<ViewHandle> {
        self.state.lock().destroyed_views.clone()
    }

    /// Handles destroyed while not live: double frees or foreign handles.
    pub fn invalid_destroys(&self) -> Vec<u64> {
        self.state.lock().invalid_destroys.clone()
    }

    pub fn builds(&self) -> Vec<BuildRecord> {
        self.state.lock().builds.clone()
    }

    pub fn build_count(&self, level: AccelerationStructureLevel) -> usize {
        self.state
            .lock()
            .builds
            .iter()
            .filter(|b| b.level() == level)
            .count()
    }

    pub fn events(&self) -> Vec<DeviceEvent> {
        self.state.lock().events.clone()
    }

    pub fn resource_name(&self, resource: ResourceHandle) -> Option<String> {
        self.state
            .lock()
            .resources
            .get(&resource)
            .map(|r| r.name.clone())
    }

    /// The resource a view was created on.
    pub fn view_resource(&self, view: ViewHandle) -> Option<ResourceHandle> {
        self.state.lock().views.get(&view).map(|(r, _, _)| *r)
    }

    pub fn view_desc(&self, view: ViewHandle) -> Option<ViewDesc> {
        self.state.lock().views.get(&view).map(|(_, d, _)| *d)
    }

    /// Read back the contents of a CPU-writable buffer as `T` elements.
    pub fn read_buffer<T: bytemuck::Pod>(&self, resource: ResourceHandle) -> Result<Vec<T>> {
        let state = self.state.lock();
        let record = state
            .resources
            .get(&resource)
            .ok_or_else(|| TestError::Readback(format!("{resource:?} is not live")))?;
        let bytes = record
            .bytes
            .as_ref()
            .ok_or_else(|| TestError::Readback(format!("{resource:?} is not CPU visible")))?;
        Ok(bytes
            .chunks_exact(std::mem::size_of::<T>())
            .map(bytemuck::pod_read_unaligned)
            .collect())
    }

    /// Resolve a fake acceleration-structure address back to its handle.
    pub fn handle_for_address(address: u64) -> ResourceHandle {
        ResourceHandle((address - ADDRESS_BASE) / 0x100)
    }
}

impl RtDevice for RecordingDevice {
    fn create_resource(&self, desc: &ResourceDesc<'_>) -> tracehook_gpu::Result<ResourceHandle> {
        let mut state = self.state.lock();
        if state.failures.resource_creates > 0 {
            state.failures.resource_creates -= 1;
            return Err(GpuError::AllocationFailed(format!(
                "injected failure creating {}",
                desc.name
            )));
        }
        let handle = ResourceHandle(state.next_handle());
        let bytes = match desc.memory {
            MemoryLocation::CpuToGpu => Some(vec![0u8; desc.size as usize]),
            MemoryLocation::GpuOnly => None,
        };
        state.resources.insert(
            handle,
            ResourceRecord {
                name: desc.name.to_string(),
                kind: desc.kind,
                bytes,
            },
        );
        trace!(?handle, name = desc.name, size = desc.size, "create_resource");
        Ok(handle)
    }

    fn destroy_resource(&self, resource: ResourceHandle) {
        let mut state = self.state.lock();
        if state.resources.remove(&resource).is_some() {
            state.destroyed_resources.push(resource);
        } else {
            state.invalid_destroys.push(resource.0);
        }
        state.events.push(DeviceEvent::DestroyResource(resource));
    }

    fn create_view(
        &self,
        resource: ResourceHandle,
        desc: &ViewDesc,
    ) -> tracehook_gpu::Result<ViewHandle> {
        let mut state = self.state.lock();
        if !state.resources.contains_key(&resource) {
            return Err(GpuError::InvalidHandle(resource.0));
        }
        if state.failures.view_creates > 0 {
            state.failures.view_creates -= 1;
            return Err(GpuError::ViewCreation(format!(
                "injected failure viewing {resource:?}"
            )));
        }
        let handle = ViewHandle(state.next_handle());
        let descriptor = state.next_descriptor;
        state.next_descriptor += 1;
        state.views.insert(handle, (resource, *desc, descriptor));
        Ok(handle)
    }

    fn destroy_view(&self, view: ViewHandle) {
        let mut state = self.state.lock();
        if state.views.remove(&view).is_some() {
            state.destroyed_views.push(view);
        } else {
            state.invalid_destroys.push(view.0);
        }
        state.events.push(DeviceEvent::DestroyView(view));
    }

    fn map_buffer(
        &self,
        resource: ResourceHandle,
        write: &mut dyn FnMut(&mut [u8]),
    ) -> tracehook_gpu::Result<()> {
        let mut state = self.state.lock();
        let record = state
            .resources
            .get_mut(&resource)
            .ok_or(GpuError::InvalidHandle(resource.0))?;
        let bytes = record
            .bytes
            .as_mut()
            .ok_or_else(|| GpuError::MapFailed(format!("{} is not CPU visible", record.name)))?;
        write(bytes.as_mut_slice());
        Ok(())
    }

    fn acceleration_structure_sizes(
        &self,
        inputs: &BuildInputs,
    ) -> tracehook_gpu::Result<BuildSizes> {
        let elements = match inputs {
            BuildInputs::Bottom(geometry) => u64::from(geometry.primitive_count()),
            BuildInputs::Top { instance_count } => u64::from(*instance_count),
        };
        Ok(BuildSizes {
            result: 256 + elements * 64,
            scratch: 128 + elements * 32,
        })
    }

    fn build_acceleration_structure(
        &self,
        cmd: CommandList,
        build: &AccelerationStructureBuild<'_>,
    ) -> tracehook_gpu::Result<()> {
        let mut state = self.state.lock();
        if state.failures.builds > 0 {
            state.failures.builds -= 1;
            return Err(GpuError::BuildFailed("injected build failure".to_string()));
        }
        let dst_ok = matches!(
            state.resources.get(&build.dst).map(|r| r.kind),
            Some(ResourceKind::AccelerationStructure(level)) if level == build.inputs.level()
        );
        if !dst_ok || !state.resources.contains_key(&build.scratch) {
            return Err(GpuError::InvalidHandle(build.dst.0));
        }
        state.events.push(DeviceEvent::Build(build.inputs.level(), build.dst));
        state.builds.push(BuildRecord {
            cmd,
            inputs: *build.inputs,
            dst: build.dst,
            scratch: build.scratch,
            instances: build.instances,
            flags: build.flags,
        });
        Ok(())
    }

    fn acceleration_structure_barrier(&self, cmd: CommandList) {
        self.state.lock().events.push(DeviceEvent::Barrier(cmd));
    }

    fn acceleration_structure_address(&self, resource: ResourceHandle) -> u64 {
        ADDRESS_BASE + resource.0 * 0x100
    }

    fn descriptor_index(&self, view: ViewHandle) -> Option<u32> {
        self.state.lock().views.get(&view).map(|(_, _, index)| *index)
    }
}
