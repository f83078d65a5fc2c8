//! Per-permutation descriptor caching.
//!
//! Resource rebinds are written to one long-lived "template" descriptor set
//! through [`DescriptorCache::emplace_descriptor`]; nothing is allocated
//! until [`DescriptorCache::flush_descriptor_set`], which stages a fresh set
//! and copies the whole template into it with a precomputed minimal list of
//! copy ranges. Redundant rebinds across a frame collapse into one
//! allocate-and-copy per flush.

use {
    crate::{
        driver::{
            DescriptorBufferInfo, DescriptorCopy, DescriptorImageInfo, DescriptorPayload,
            DescriptorPool, DescriptorType, DescriptorWrite, Device, DriverError, ImageLayout,
            LayoutBinding, ResourceRef, StageFlags,
        },
        pool::{PoolSizes, StagingDescriptorSetPool},
    },
    log::{trace, warn},
    parking_lot::Mutex,
    std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

/// Batches descriptor writes with bounded per-payload scratch budgets.
///
/// One writer is owned by each command-recording thread; the cache flushes
/// it inline whenever a budget is exhausted mid-emplace, so an unbounded
/// sequence of emplace calls never overflows the batch.
#[derive(Debug)]
pub struct DescriptorSetWriter<D: Device> {
    writes: Vec<DescriptorWrite<D>>,
    num_buffer_infos: usize,
    num_image_infos: usize,
    num_buffer_views: usize,
}

impl<D: Device> DescriptorSetWriter<D> {
    pub const MAX_BUFFER_INFOS: usize = 64;
    pub const MAX_IMAGE_INFOS: usize = 64;
    pub const MAX_BUFFER_VIEWS: usize = 16;

    pub fn new() -> Self {
        Self {
            writes: Vec::with_capacity(Self::MAX_BUFFER_INFOS + Self::MAX_IMAGE_INFOS),
            num_buffer_infos: 0,
            num_image_infos: 0,
            num_buffer_views: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn writes(&self) -> &[DescriptorWrite<D>] {
        &self.writes
    }

    pub fn has_room_for(&self, payload: &DescriptorPayload<D>) -> bool {
        match payload {
            DescriptorPayload::Buffer(_) => self.num_buffer_infos < Self::MAX_BUFFER_INFOS,
            DescriptorPayload::Image(_) => self.num_image_infos < Self::MAX_IMAGE_INFOS,
            DescriptorPayload::TexelBuffer(_) => self.num_buffer_views < Self::MAX_BUFFER_VIEWS,
        }
    }

    pub fn push(&mut self, write: DescriptorWrite<D>) {
        debug_assert!(self.has_room_for(&write.payload));

        match write.payload {
            DescriptorPayload::Buffer(_) => self.num_buffer_infos += 1,
            DescriptorPayload::Image(_) => self.num_image_infos += 1,
            DescriptorPayload::TexelBuffer(_) => self.num_buffer_views += 1,
        }
        self.writes.push(write);
    }

    /// Issues the pending writes immediately and resets the batch.
    pub fn flush(&mut self, device: &D) {
        if !self.writes.is_empty() {
            device.update_descriptor_sets(&self.writes, &[]);
            self.reset();
        }
    }

    pub fn reset(&mut self) {
        self.writes.clear();
        self.num_buffer_infos = 0;
        self.num_image_infos = 0;
        self.num_buffer_views = 0;
    }
}

impl<D: Device> Default for DescriptorSetWriter<D> {
    fn default() -> Self {
        Self::new()
    }
}

fn shader_read_layout(descriptor_type: DescriptorType) -> ImageLayout {
    if descriptor_type == DescriptorType::StorageImage {
        ImageLayout::General
    } else {
        ImageLayout::ShaderReadOnlyOptimal
    }
}

/// Builds the minimal copy-range list for a binding list: one range per
/// contiguous run of slots sharing descriptor type and stage flags.
///
/// Ranges may roll across binding slots because native descriptor copies
/// continue into the next consecutive binding once an array is exhausted.
pub(crate) fn build_copy_ranges<D: Device>(
    template: D::DescriptorSet,
    bindings: &[LayoutBinding],
) -> Vec<DescriptorCopy<D>> {
    let sorted;
    let bindings = if bindings
        .windows(2)
        .all(|pair| (pair[0].binding, pair[0].array_element) <= (pair[1].binding, pair[1].array_element))
    {
        bindings
    } else {
        sorted = {
            let mut bindings = bindings.to_vec();
            bindings.sort_by_key(|binding| (binding.binding, binding.array_element));
            bindings
        };
        &sorted
    };

    let mut ranges = Vec::new();
    let mut group_key: Option<(DescriptorType, StageFlags)> = None;
    let mut first = (0u32, 0u32);
    let mut prev: Option<(u32, u32)> = None;
    let mut count = 0u32;

    let flush_group =
        |ranges: &mut Vec<DescriptorCopy<D>>, first: (u32, u32), count: u32| {
            if count > 0 {
                ranges.push(DescriptorCopy {
                    src_set: template,
                    src_binding: first.0,
                    src_array_element: first.1,
                    // Destination is retargeted on every flush.
                    dst_set: template,
                    dst_binding: first.0,
                    dst_array_element: first.1,
                    descriptor_count: count,
                });
            }
        };

    for binding in bindings {
        let consecutive = match prev {
            Some((prev_binding, prev_element)) => {
                (binding.binding == prev_binding && binding.array_element == prev_element + 1)
                    || (binding.binding == prev_binding + 1 && binding.array_element == 0)
            }
            None => false,
        };

        if group_key != Some((binding.descriptor_type, binding.stage_flags)) || !consecutive {
            flush_group(&mut ranges, first, count);
            first = (binding.binding, binding.array_element);
            group_key = Some((binding.descriptor_type, binding.stage_flags));
            count = 0;
        }

        count += 1;
        prev = Some((binding.binding, binding.array_element));
    }
    flush_group(&mut ranges, first, count);

    ranges
}

/// Write-once, copy-many descriptor staging for one pipeline-layout
/// permutation.
pub struct DescriptorCache<D: Device> {
    device: Arc<D>,
    set_layout: D::DescriptorSetLayout,
    /// Template set; exclusively written by this cache.
    descriptor_set: D::DescriptorSet,
    pool_sizes: PoolSizes,
    /// Shared across recording threads; locked while destinations are
    /// retargeted.
    copy_ranges: Mutex<Vec<DescriptorCopy<D>>>,
    dirty: AtomicBool,
}

impl<D: Device> DescriptorCache<D> {
    /// Allocates the persistent template set from `descriptor_pool` and
    /// precomputes the copy ranges for `bindings`.
    pub fn create(
        device: &Arc<D>,
        descriptor_pool: &DescriptorPool<D>,
        set_layout: D::DescriptorSetLayout,
        pool_sizes: PoolSizes,
        bindings: &[LayoutBinding],
    ) -> Result<Self, DriverError> {
        let descriptor_set = DescriptorPool::allocate_descriptor_set(descriptor_pool, set_layout)?;
        let copy_ranges = build_copy_ranges::<D>(descriptor_set, bindings);

        Ok(Self {
            device: Arc::clone(device),
            set_layout,
            descriptor_set,
            pool_sizes,
            copy_ranges: Mutex::new(copy_ranges),
            dirty: AtomicBool::new(true),
        })
    }

    /// Marks the cache dirty so the next flush re-establishes the set even
    /// without new writes. Call when a new frame or command buffer begins.
    pub fn reset(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// The template set receiving direct writes.
    pub fn template_set(&self) -> D::DescriptorSet {
        self.descriptor_set
    }

    pub fn pool_sizes(&self) -> &[crate::driver::PoolSize] {
        &self.pool_sizes
    }

    /// Queues one resource write against the template set, flushing the
    /// writer inline when its batch is full.
    pub fn emplace_descriptor(
        &self,
        resource: ResourceRef<D>,
        binding: LayoutBinding,
        writer: &mut DescriptorSetWriter<D>,
    ) {
        let payload = match resource {
            ResourceRef::Buffer { buffer, view } => match binding.descriptor_type {
                DescriptorType::UniformTexelBuffer | DescriptorType::StorageTexelBuffer => {
                    match view {
                        Some(view) => DescriptorPayload::TexelBuffer(view),
                        None => {
                            warn!(
                                "texel-buffer binding {} written without a buffer view",
                                binding.binding
                            );
                            return;
                        }
                    }
                }
                _ => DescriptorPayload::Buffer(DescriptorBufferInfo {
                    buffer,
                    offset: 0,
                    range: u64::MAX,
                }),
            },
            ResourceRef::Texture { image_view } => DescriptorPayload::Image(DescriptorImageInfo {
                sampler: None,
                image_view: Some(image_view),
                image_layout: shader_read_layout(binding.descriptor_type),
            }),
            ResourceRef::Sampler { sampler } => DescriptorPayload::Image(DescriptorImageInfo {
                sampler: Some(sampler),
                image_view: None,
                image_layout: ImageLayout::Undefined,
            }),
        };

        let write = DescriptorWrite {
            dst_set: self.descriptor_set,
            dst_binding: binding.binding,
            dst_array_element: binding.array_element,
            descriptor_type: binding.descriptor_type,
            payload,
        };

        if !writer.has_room_for(&write.payload) {
            writer.flush(&self.device);
        }

        writer.push(write);
        self.dirty.store(true, Ordering::Release);
    }

    /// Stages a fresh set and updates it from the template.
    ///
    /// Returns `Ok(None)` when nothing changed since the previous flush;
    /// otherwise allocates from `pool`, issues the writer's pending writes
    /// and the retargeted copy ranges in one native update, and returns the
    /// new set.
    pub fn flush_descriptor_set(
        &self,
        pool: &mut StagingDescriptorSetPool<D>,
        writer: &mut DescriptorSetWriter<D>,
    ) -> Result<Option<D::DescriptorSet>, DriverError> {
        if !self.dirty.load(Ordering::Acquire) {
            return Ok(None);
        }

        let descriptor_set_copy = pool.allocate_descriptor_set(self.set_layout, &self.pool_sizes)?;

        // Writes land in the template first, then the copies fan the whole
        // template out to the staged set; both run in one update call.
        let mut copy_ranges = self.copy_ranges.lock();
        for copy in copy_ranges.iter_mut() {
            copy.dst_set = descriptor_set_copy;
        }

        self.device
            .update_descriptor_sets(writer.writes(), &copy_ranges);
        writer.reset();

        self.dirty.store(false, Ordering::Release);

        trace!("flush_descriptor_set");

        Ok(Some(descriptor_set_copy))
    }
}

impl<D: Device> std::fmt::Debug for DescriptorCache<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorCache")
            .field("set_layout", &self.set_layout)
            .field("descriptor_set", &self.descriptor_set)
            .field("pool_sizes", &self.pool_sizes)
            .field("dirty", &self.dirty)
            .finish()
    }
}
