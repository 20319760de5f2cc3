//! Offscreen render-target allocation grouped by owner.
//!
//! Every renderer that draws offscreen asks for its buffers in one batch under
//! its [`OwnerId`]. Each buffer is a framebuffer/texture pair bound to its own
//! texture unit, so one unit is only ever held by a single live group.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::gpu::{FramebufferHandle, GpuBackend, TextureHandle};
use crate::types::{Resolution, SizePolicy};

/// Texture units kept back for samplers that are not render targets.
pub const RESERVED_TEXTURE_UNITS: u32 = 16;

/// Opaque allocation owner, unique for the process lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerId(u64);

impl OwnerId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        OwnerId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "owner#{}", self.0)
    }
}

/// One offscreen buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceGroup {
    pub owner: OwnerId,
    pub framebuffer: FramebufferHandle,
    pub texture: TextureHandle,
    pub texture_unit: u32,
    /// Sampler name the buffer is bound to when read as an input.
    pub uniform_name: String,
    /// Draw buffer the group renders for, when it belongs to a graph.
    pub draw_pass: usize,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ResourceError {
    #[error("{0} already holds an allocation")]
    AlreadyAllocated(OwnerId),
    #[error("{0} requested zero resource groups")]
    EmptyRequest(OwnerId),
}

/// Free texture units, handed out lowest first.
#[derive(Debug)]
pub struct TextureUnitPool {
    free: BTreeSet<u32>,
    capacity: usize,
}

impl TextureUnitPool {
    /// Covers units `RESERVED_TEXTURE_UNITS..max_units`.
    pub fn new(max_units: u32) -> Self {
        let free: BTreeSet<u32> = (RESERVED_TEXTURE_UNITS..max_units).collect();
        let capacity = free.len();
        Self { free, capacity }
    }

    pub fn acquire(&mut self) -> Option<u32> {
        self.free.pop_first()
    }

    pub fn release(&mut self, unit: u32) {
        let fresh = self.free.insert(unit);
        assert!(fresh, "texture unit {unit} released twice");
    }

    pub fn available(&self) -> usize {
        self.free.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[derive(Debug)]
struct Allocation {
    policy: SizePolicy,
    resolution: Resolution,
    groups: Vec<ResourceGroup>,
}

/// Tracks every live offscreen allocation and keeps it sized to the viewport.
#[derive(Debug)]
pub struct ResourceManager {
    units: TextureUnitPool,
    viewport: Resolution,
    owners: BTreeMap<OwnerId, Allocation>,
}

impl ResourceManager {
    pub fn new(max_texture_units: u32, viewport: Resolution) -> Self {
        Self {
            units: TextureUnitPool::new(max_texture_units),
            viewport: viewport.non_zero(),
            owners: BTreeMap::new(),
        }
    }

    pub fn viewport(&self) -> Resolution {
        self.viewport
    }

    /// Buffer size `policy` yields at the current viewport.
    pub fn resolution_for(&self, policy: SizePolicy) -> Resolution {
        policy.resolve(self.viewport)
    }

    /// Allocates `count` buffers for `owner`, sized by `policy`.
    ///
    /// Running out of texture units or failing to build a framebuffer is a
    /// hardware ceiling and aborts the process.
    pub fn create_resource_groups<G: GpuBackend>(
        &mut self,
        gpu: &mut G,
        owner: OwnerId,
        count: usize,
        policy: SizePolicy,
    ) -> Result<Vec<ResourceGroup>, ResourceError> {
        if self.owners.contains_key(&owner) {
            return Err(ResourceError::AlreadyAllocated(owner));
        }
        if count < 1 {
            return Err(ResourceError::EmptyRequest(owner));
        }

        let resolution = self.resolution_for(policy);
        let mut groups = Vec::with_capacity(count);
        for index in 0..count {
            let Some(texture_unit) = self.units.acquire() else {
                tracing::error!(
                    %owner,
                    requested = count,
                    capacity = self.units.capacity(),
                    "texture unit pool exhausted"
                );
                panic!("texture unit pool exhausted while allocating for {owner}");
            };
            let (framebuffer, texture) = match gpu.create_render_target(resolution) {
                Ok(target) => target,
                Err(err) => {
                    tracing::error!(%owner, %resolution, "framebuffer creation failed: {err}");
                    panic!("framebuffer creation failed for {owner}: {err}");
                }
            };
            groups.push(ResourceGroup {
                owner,
                framebuffer,
                texture,
                texture_unit,
                uniform_name: String::new(),
                draw_pass: index,
            });
        }

        tracing::debug!(
            %owner,
            count,
            %resolution,
            free_units = self.units.available(),
            "allocated resource groups"
        );
        self.owners.insert(
            owner,
            Allocation {
                policy,
                resolution,
                groups: groups.clone(),
            },
        );
        Ok(groups)
    }

    /// Reallocates every buffer of `owner` at `resolution`. Contents are lost.
    pub fn resize_textures<G: GpuBackend>(
        &mut self,
        gpu: &mut G,
        owner: OwnerId,
        resolution: Resolution,
    ) {
        let Some(allocation) = self.owners.get_mut(&owner) else {
            return;
        };
        let resolution = resolution.non_zero();
        for group in &allocation.groups {
            if let Err(err) = gpu.resize_render_target(group.framebuffer, group.texture, resolution)
            {
                tracing::error!(%owner, %resolution, "render target resize failed: {err}");
                panic!("render target resize failed for {owner}: {err}");
            }
        }
        allocation.resolution = resolution;
        tracing::debug!(%owner, %resolution, "resized resource groups");
    }

    /// Records the new viewport and resizes every owner by its stored policy.
    pub fn viewport_resized<G: GpuBackend>(&mut self, gpu: &mut G, viewport: Resolution) {
        self.viewport = viewport.non_zero();
        let pending: Vec<(OwnerId, Resolution)> = self
            .owners
            .iter()
            .filter_map(|(owner, allocation)| {
                let wanted = allocation.policy.resolve(self.viewport);
                (wanted != allocation.resolution).then_some((*owner, wanted))
            })
            .collect();
        for (owner, resolution) in pending {
            self.resize_textures(gpu, owner, resolution);
        }
    }

    /// Frees everything `owner` holds. Unknown owners are ignored.
    pub fn destroy_resources<G: GpuBackend>(&mut self, gpu: &mut G, owner: OwnerId) {
        let Some(allocation) = self.owners.remove(&owner) else {
            return;
        };
        for group in &allocation.groups {
            gpu.destroy_render_target(group.framebuffer, group.texture);
            self.units.release(group.texture_unit);
        }
        tracing::debug!(
            %owner,
            released = allocation.groups.len(),
            free_units = self.units.available(),
            "destroyed resource groups"
        );
    }

    pub fn free_texture_units(&self) -> usize {
        self.units.available()
    }

    pub fn groups(&self, owner: OwnerId) -> Option<&[ResourceGroup]> {
        self.owners
            .get(&owner)
            .map(|allocation| allocation.groups.as_slice())
    }

    pub fn owner_resolution(&self, owner: OwnerId) -> Option<Resolution> {
        self.owners.get(&owner).map(|allocation| allocation.resolution)
    }

    pub fn owner_count(&self) -> usize {
        self.owners.len()
    }
}
