//! Vulkan implementation of the driver boundary, via `ash`.
//!
//! [`VulkanDevice`] borrows an already-initialized `ash::Device`; instance
//! and device lifetime stay with the embedding renderer.

use {
    super::{
        DescriptorCopy, DescriptorPayload, DescriptorSetLayoutBinding, DescriptorType,
        DescriptorWrite, Device, DriverError, ImageLayout, PoolSize, PushConstantRange,
        StageFlags,
    },
    ash::vk,
    log::{trace, warn},
    std::{
        fmt::{self, Debug, Formatter},
        ptr,
        slice::from_ref,
    },
};

fn descriptor_type(ty: DescriptorType) -> vk::DescriptorType {
    match ty {
        DescriptorType::Sampler => vk::DescriptorType::SAMPLER,
        DescriptorType::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        DescriptorType::SampledImage => vk::DescriptorType::SAMPLED_IMAGE,
        DescriptorType::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
        DescriptorType::UniformTexelBuffer => vk::DescriptorType::UNIFORM_TEXEL_BUFFER,
        DescriptorType::StorageTexelBuffer => vk::DescriptorType::STORAGE_TEXEL_BUFFER,
        DescriptorType::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
        DescriptorType::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
        DescriptorType::UniformBufferDynamic => vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
        DescriptorType::StorageBufferDynamic => vk::DescriptorType::STORAGE_BUFFER_DYNAMIC,
        DescriptorType::InputAttachment => vk::DescriptorType::INPUT_ATTACHMENT,
    }
}

fn shader_stage_flags(flags: StageFlags) -> vk::ShaderStageFlags {
    let mut bitmask = vk::ShaderStageFlags::empty();
    if flags.contains(StageFlags::VERTEX) {
        bitmask |= vk::ShaderStageFlags::VERTEX;
    }

    if flags.contains(StageFlags::TESSELLATION_CONTROL) {
        bitmask |= vk::ShaderStageFlags::TESSELLATION_CONTROL;
    }

    if flags.contains(StageFlags::TESSELLATION_EVALUATION) {
        bitmask |= vk::ShaderStageFlags::TESSELLATION_EVALUATION;
    }

    if flags.contains(StageFlags::GEOMETRY) {
        bitmask |= vk::ShaderStageFlags::GEOMETRY;
    }

    if flags.contains(StageFlags::FRAGMENT) {
        bitmask |= vk::ShaderStageFlags::FRAGMENT;
    }

    if flags.contains(StageFlags::COMPUTE) {
        bitmask |= vk::ShaderStageFlags::COMPUTE;
    }

    bitmask
}

fn image_layout(layout: ImageLayout) -> vk::ImageLayout {
    match layout {
        ImageLayout::Undefined => vk::ImageLayout::UNDEFINED,
        ImageLayout::General => vk::ImageLayout::GENERAL,
        ImageLayout::ShaderReadOnlyOptimal => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    }
}

fn map_err(err: vk::Result) -> DriverError {
    use {vk::Result as vk, DriverError::*};

    warn!("{err}");

    match err {
        e if e == vk::ERROR_FRAGMENTED_POOL => InvalidData,
        e if e == vk::ERROR_OUT_OF_DEVICE_MEMORY => OutOfMemory,
        e if e == vk::ERROR_OUT_OF_HOST_MEMORY => OutOfMemory,
        e if e == vk::ERROR_OUT_OF_POOL_MEMORY => OutOfMemory,
        _ => Unsupported,
    }
}

/// Driver boundary over an `ash::Device`.
pub struct VulkanDevice {
    device: ash::Device,
}

impl VulkanDevice {
    pub fn new(device: ash::Device) -> Self {
        Self { device }
    }

    pub fn raw(&self) -> &ash::Device {
        &self.device
    }
}

impl Debug for VulkanDevice {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("VulkanDevice").finish_non_exhaustive()
    }
}

impl Device for VulkanDevice {
    type DescriptorSetLayout = vk::DescriptorSetLayout;
    type DescriptorPool = vk::DescriptorPool;
    type DescriptorSet = vk::DescriptorSet;
    type PipelineLayout = vk::PipelineLayout;
    type ShaderModule = vk::ShaderModule;
    type Sampler = vk::Sampler;
    type Buffer = vk::Buffer;
    type BufferView = vk::BufferView;
    type ImageView = vk::ImageView;

    fn create_descriptor_set_layout(
        &self,
        bindings: &[DescriptorSetLayoutBinding<Self>],
    ) -> Result<Self::DescriptorSetLayout, DriverError> {
        let vk_bindings = bindings
            .iter()
            .map(|binding| vk::DescriptorSetLayoutBinding {
                binding: binding.binding,
                descriptor_type: descriptor_type(binding.descriptor_type),
                descriptor_count: binding.descriptor_count,
                stage_flags: shader_stage_flags(binding.stage_flags),
                p_immutable_samplers: if binding.immutable_samplers.is_empty() {
                    ptr::null()
                } else {
                    binding.immutable_samplers.as_ptr()
                },
            })
            .collect::<Box<[_]>>();

        unsafe {
            self.device.create_descriptor_set_layout(
                &vk::DescriptorSetLayoutCreateInfo::builder().bindings(&vk_bindings),
                None,
            )
        }
        .map_err(map_err)
    }

    fn destroy_descriptor_set_layout(&self, layout: Self::DescriptorSetLayout) {
        unsafe {
            self.device.destroy_descriptor_set_layout(layout, None);
        }
    }

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        pool_sizes: &[PoolSize],
    ) -> Result<Self::DescriptorPool, DriverError> {
        let pool_sizes = pool_sizes
            .iter()
            .map(|pool_size| vk::DescriptorPoolSize {
                ty: descriptor_type(pool_size.ty),
                descriptor_count: pool_size.descriptor_count,
            })
            .collect::<Box<[_]>>();

        unsafe {
            self.device.create_descriptor_pool(
                &vk::DescriptorPoolCreateInfo::builder()
                    .max_sets(max_sets)
                    .pool_sizes(&pool_sizes),
                None,
            )
        }
        .map_err(map_err)
    }

    fn destroy_descriptor_pool(&self, pool: Self::DescriptorPool) {
        unsafe {
            self.device.destroy_descriptor_pool(pool, None);
        }
    }

    fn reset_descriptor_pool(&self, pool: Self::DescriptorPool) -> Result<(), DriverError> {
        unsafe {
            self.device
                .reset_descriptor_pool(pool, vk::DescriptorPoolResetFlags::empty())
        }
        .map_err(map_err)
    }

    fn allocate_descriptor_set(
        &self,
        pool: Self::DescriptorPool,
        layout: Self::DescriptorSetLayout,
    ) -> Result<Self::DescriptorSet, DriverError> {
        trace!("allocate_descriptor_set");

        unsafe {
            self.device.allocate_descriptor_sets(
                &vk::DescriptorSetAllocateInfo::builder()
                    .descriptor_pool(pool)
                    .set_layouts(from_ref(&layout)),
            )
        }
        .map_err(map_err)?
        .into_iter()
        .next()
        .ok_or(DriverError::Unsupported)
    }

    fn update_descriptor_sets(
        &self,
        writes: &[DescriptorWrite<Self>],
        copies: &[DescriptorCopy<Self>],
    ) {
        // Payload storage is collected up front so the pointers taken below
        // stay stable.
        let mut buffer_infos = Vec::with_capacity(writes.len());
        let mut image_infos = Vec::with_capacity(writes.len());
        let mut buffer_views = Vec::with_capacity(writes.len());

        for write in writes {
            match &write.payload {
                DescriptorPayload::Buffer(info) => buffer_infos.push(vk::DescriptorBufferInfo {
                    buffer: info.buffer,
                    offset: info.offset,
                    range: if info.range == u64::MAX {
                        vk::WHOLE_SIZE
                    } else {
                        info.range
                    },
                }),
                DescriptorPayload::Image(info) => image_infos.push(vk::DescriptorImageInfo {
                    sampler: info.sampler.unwrap_or_default(),
                    image_view: info.image_view.unwrap_or_default(),
                    image_layout: image_layout(info.image_layout),
                }),
                DescriptorPayload::TexelBuffer(view) => buffer_views.push(*view),
            }
        }

        let (mut next_buffer, mut next_image, mut next_view) = (0, 0, 0);
        let vk_writes = writes
            .iter()
            .map(|write| {
                let mut vk_write = vk::WriteDescriptorSet {
                    s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                    p_next: ptr::null(),
                    dst_set: write.dst_set,
                    dst_binding: write.dst_binding,
                    dst_array_element: write.dst_array_element,
                    descriptor_count: 1,
                    descriptor_type: descriptor_type(write.descriptor_type),
                    p_image_info: ptr::null(),
                    p_buffer_info: ptr::null(),
                    p_texel_buffer_view: ptr::null(),
                };
                match &write.payload {
                    DescriptorPayload::Buffer(_) => {
                        vk_write.p_buffer_info = &buffer_infos[next_buffer];
                        next_buffer += 1;
                    }
                    DescriptorPayload::Image(_) => {
                        vk_write.p_image_info = &image_infos[next_image];
                        next_image += 1;
                    }
                    DescriptorPayload::TexelBuffer(_) => {
                        vk_write.p_texel_buffer_view = &buffer_views[next_view];
                        next_view += 1;
                    }
                }

                vk_write
            })
            .collect::<Box<[_]>>();

        let vk_copies = copies
            .iter()
            .map(|copy| vk::CopyDescriptorSet {
                s_type: vk::StructureType::COPY_DESCRIPTOR_SET,
                p_next: ptr::null(),
                src_set: copy.src_set,
                src_binding: copy.src_binding,
                src_array_element: copy.src_array_element,
                dst_set: copy.dst_set,
                dst_binding: copy.dst_binding,
                dst_array_element: copy.dst_array_element,
                descriptor_count: copy.descriptor_count,
            })
            .collect::<Box<[_]>>();

        unsafe {
            self.device.update_descriptor_sets(&vk_writes, &vk_copies);
        }
    }

    fn create_pipeline_layout(
        &self,
        set_layouts: &[Self::DescriptorSetLayout],
        push_constant_ranges: &[PushConstantRange],
    ) -> Result<Self::PipelineLayout, DriverError> {
        let ranges = push_constant_ranges
            .iter()
            .map(|range| vk::PushConstantRange {
                stage_flags: shader_stage_flags(range.stage_flags),
                offset: range.offset,
                size: range.size,
            })
            .collect::<Box<[_]>>();

        unsafe {
            self.device.create_pipeline_layout(
                &vk::PipelineLayoutCreateInfo::builder()
                    .set_layouts(set_layouts)
                    .push_constant_ranges(&ranges),
                None,
            )
        }
        .map_err(map_err)
    }

    fn destroy_pipeline_layout(&self, layout: Self::PipelineLayout) {
        unsafe {
            self.device.destroy_pipeline_layout(layout, None);
        }
    }

    fn create_shader_module(&self, spirv: &[u32]) -> Result<Self::ShaderModule, DriverError> {
        unsafe {
            self.device
                .create_shader_module(&vk::ShaderModuleCreateInfo::builder().code(spirv), None)
        }
        .map_err(map_err)
    }

    fn destroy_shader_module(&self, module: Self::ShaderModule) {
        unsafe {
            self.device.destroy_shader_module(module, None);
        }
    }
}
