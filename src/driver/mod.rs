//! The graphics-driver boundary.
//!
//! Everything the descriptor machinery needs from a native API is expressed
//! as the [`Device`] trait: opaque `Copy` handles plus the
//! create/destroy/allocate/update calls that operate on them. The staging
//! pools, caches, and permutations are generic over it, so the same code
//! runs against Vulkan (`vulkan` feature) and against the in-process
//! [`null::NullDevice`] used by the test suite.

pub mod null;

#[cfg(feature = "vulkan")]
pub mod vulkan;

use {
    bitflags::bitflags,
    log::warn,
    std::{
        cmp::Ordering,
        error::Error,
        fmt::{self, Debug, Display, Formatter},
        hash::Hash,
        ops::Deref,
        sync::Arc,
        thread::panicking,
    },
};

/// Errors surfaced from the native driver boundary.
///
/// The driver's own diagnostic text is logged at the failure site; callers
/// receive the category and decide whether to abort or retry at a coarser
/// granularity.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DriverError {
    InvalidData,
    Unsupported,
    OutOfMemory,
}

impl Display for DriverError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl Error for DriverError {}

/// Descriptor classification, matching the native enumeration's value order
/// so per-type tallies can index by discriminant.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(u32)]
pub enum DescriptorType {
    Sampler = 0,
    CombinedImageSampler = 1,
    SampledImage = 2,
    StorageImage = 3,
    UniformTexelBuffer = 4,
    StorageTexelBuffer = 5,
    UniformBuffer = 6,
    StorageBuffer = 7,
    UniformBufferDynamic = 8,
    StorageBufferDynamic = 9,
    InputAttachment = 10,
}

impl DescriptorType {
    /// Number of distinct descriptor types.
    pub const COUNT: usize = 11;

    /// All descriptor types in ascending value order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::Sampler,
        Self::CombinedImageSampler,
        Self::SampledImage,
        Self::StorageImage,
        Self::UniformTexelBuffer,
        Self::StorageTexelBuffer,
        Self::UniformBuffer,
        Self::StorageBuffer,
        Self::UniformBufferDynamic,
        Self::StorageBufferDynamic,
        Self::InputAttachment,
    ];

    pub const fn as_index(self) -> usize {
        self as usize
    }
}

bitflags! {
    /// Shader stages a binding is visible to.
    pub struct StageFlags: u32 {
        const VERTEX = 1 << 0;
        const TESSELLATION_CONTROL = 1 << 1;
        const TESSELLATION_EVALUATION = 1 << 2;
        const GEOMETRY = 1 << 3;
        const FRAGMENT = 1 << 4;
        const COMPUTE = 1 << 5;
    }
}

impl Default for StageFlags {
    fn default() -> Self {
        Self::empty()
    }
}

/// Layout of an image while bound for shader access.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ImageLayout {
    Undefined,
    General,
    ShaderReadOnlyOptimal,
}

/// One push-constant range of a pipeline layout.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct PushConstantRange {
    pub stage_flags: StageFlags,
    pub offset: u32,
    pub size: u32,
}

impl PushConstantRange {
    pub fn compare_swo(lhs: &Self, rhs: &Self) -> Ordering {
        lhs.stage_flags
            .cmp(&rhs.stage_flags)
            .then(lhs.offset.cmp(&rhs.offset))
            .then(lhs.size.cmp(&rhs.size))
    }
}

/// Capacity of one descriptor type within a pool.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct PoolSize {
    pub ty: DescriptorType,
    pub descriptor_count: u32,
}

/// One slot of a descriptor set layout, possibly an array.
pub struct DescriptorSetLayoutBinding<D: Device> {
    pub binding: u32,
    pub descriptor_type: DescriptorType,
    pub descriptor_count: u32,
    pub stage_flags: StageFlags,
    pub immutable_samplers: Vec<D::Sampler>,
}

impl<D: Device> DescriptorSetLayoutBinding<D> {
    pub fn new(binding: u32, descriptor_type: DescriptorType) -> Self {
        Self {
            binding,
            descriptor_type,
            descriptor_count: 1,
            stage_flags: StageFlags::all(),
            immutable_samplers: Vec::new(),
        }
    }

    /// Orders by binding, type, count, then stage flags; immutable sampler
    /// handles do not participate.
    pub fn compare_swo(lhs: &Self, rhs: &Self) -> Ordering {
        lhs.binding
            .cmp(&rhs.binding)
            .then(lhs.descriptor_type.cmp(&rhs.descriptor_type))
            .then(lhs.descriptor_count.cmp(&rhs.descriptor_count))
            .then(lhs.stage_flags.cmp(&rhs.stage_flags))
    }
}

impl<D: Device> Clone for DescriptorSetLayoutBinding<D> {
    fn clone(&self) -> Self {
        Self {
            binding: self.binding,
            descriptor_type: self.descriptor_type,
            descriptor_count: self.descriptor_count,
            stage_flags: self.stage_flags,
            immutable_samplers: self.immutable_samplers.clone(),
        }
    }
}

impl<D: Device> Debug for DescriptorSetLayoutBinding<D> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("DescriptorSetLayoutBinding")
            .field("binding", &self.binding)
            .field("descriptor_type", &self.descriptor_type)
            .field("descriptor_count", &self.descriptor_count)
            .field("stage_flags", &self.stage_flags)
            .field("immutable_samplers", &self.immutable_samplers.len())
            .finish()
    }
}

/// One flattened binding slot: array bindings expand to one entry per
/// element so descriptor writes can target individual elements.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct LayoutBinding {
    pub binding: u32,
    pub array_element: u32,
    pub descriptor_type: DescriptorType,
    pub stage_flags: StageFlags,
}

impl LayoutBinding {
    pub fn compare_swo(lhs: &Self, rhs: &Self) -> Ordering {
        lhs.binding
            .cmp(&rhs.binding)
            .then(lhs.array_element.cmp(&rhs.array_element))
            .then(lhs.descriptor_type.cmp(&rhs.descriptor_type))
            .then(lhs.stage_flags.cmp(&rhs.stage_flags))
    }
}

/// Buffer region referenced by a descriptor write.
pub struct DescriptorBufferInfo<D: Device> {
    pub buffer: D::Buffer,
    pub offset: u64,
    /// Byte length, or `u64::MAX` for the whole remaining buffer.
    pub range: u64,
}

impl<D: Device> Clone for DescriptorBufferInfo<D> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<D: Device> Copy for DescriptorBufferInfo<D> {}

impl<D: Device> Debug for DescriptorBufferInfo<D> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("DescriptorBufferInfo")
            .field("buffer", &self.buffer)
            .field("offset", &self.offset)
            .field("range", &self.range)
            .finish()
    }
}

/// Image or sampler referenced by a descriptor write.
pub struct DescriptorImageInfo<D: Device> {
    pub sampler: Option<D::Sampler>,
    pub image_view: Option<D::ImageView>,
    pub image_layout: ImageLayout,
}

impl<D: Device> Clone for DescriptorImageInfo<D> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<D: Device> Copy for DescriptorImageInfo<D> {}

impl<D: Device> Debug for DescriptorImageInfo<D> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("DescriptorImageInfo")
            .field("sampler", &self.sampler)
            .field("image_view", &self.image_view)
            .field("image_layout", &self.image_layout)
            .finish()
    }
}

/// Payload of one descriptor write.
pub enum DescriptorPayload<D: Device> {
    Buffer(DescriptorBufferInfo<D>),
    Image(DescriptorImageInfo<D>),
    TexelBuffer(D::BufferView),
}

impl<D: Device> Clone for DescriptorPayload<D> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<D: Device> Copy for DescriptorPayload<D> {}

impl<D: Device> Debug for DescriptorPayload<D> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buffer(info) => f.debug_tuple("Buffer").field(info).finish(),
            Self::Image(info) => f.debug_tuple("Image").field(info).finish(),
            Self::TexelBuffer(view) => f.debug_tuple("TexelBuffer").field(view).finish(),
        }
    }
}

/// One pending write against a descriptor set.
pub struct DescriptorWrite<D: Device> {
    pub dst_set: D::DescriptorSet,
    pub dst_binding: u32,
    pub dst_array_element: u32,
    pub descriptor_type: DescriptorType,
    pub payload: DescriptorPayload<D>,
}

impl<D: Device> Clone for DescriptorWrite<D> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<D: Device> Copy for DescriptorWrite<D> {}

impl<D: Device> Debug for DescriptorWrite<D> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("DescriptorWrite")
            .field("dst_set", &self.dst_set)
            .field("dst_binding", &self.dst_binding)
            .field("dst_array_element", &self.dst_array_element)
            .field("descriptor_type", &self.descriptor_type)
            .field("payload", &self.payload)
            .finish()
    }
}

/// One run of descriptors copied between two sets of the same layout.
pub struct DescriptorCopy<D: Device> {
    pub src_set: D::DescriptorSet,
    pub src_binding: u32,
    pub src_array_element: u32,
    pub dst_set: D::DescriptorSet,
    pub dst_binding: u32,
    pub dst_array_element: u32,
    pub descriptor_count: u32,
}

impl<D: Device> Clone for DescriptorCopy<D> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<D: Device> Copy for DescriptorCopy<D> {}

impl<D: Device> Debug for DescriptorCopy<D> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("DescriptorCopy")
            .field("src_set", &self.src_set)
            .field("src_binding", &self.src_binding)
            .field("dst_set", &self.dst_set)
            .field("dst_binding", &self.dst_binding)
            .field("descriptor_count", &self.descriptor_count)
            .finish()
    }
}

/// A shader-visible resource about to be written into a descriptor slot.
///
/// Closed sum: adding a resource kind forces a decision at every dispatch
/// site.
pub enum ResourceRef<D: Device> {
    Buffer {
        buffer: D::Buffer,
        /// Texel-buffer bindings consume the view instead of the range.
        view: Option<D::BufferView>,
    },
    Texture {
        image_view: D::ImageView,
    },
    Sampler {
        sampler: D::Sampler,
    },
}

impl<D: Device> Clone for ResourceRef<D> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<D: Device> Copy for ResourceRef<D> {}

impl<D: Device> Debug for ResourceRef<D> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buffer { buffer, view } => f
                .debug_struct("Buffer")
                .field("buffer", buffer)
                .field("view", view)
                .finish(),
            Self::Texture { image_view } => f
                .debug_struct("Texture")
                .field("image_view", image_view)
                .finish(),
            Self::Sampler { sampler } => {
                f.debug_struct("Sampler").field("sampler", sampler).finish()
            }
        }
    }
}

/// Native descriptor/pipeline-layout capability.
///
/// Handle types are plain `Copy` values; ownership lives in the wrapper
/// types below, which pair a handle with its owning device and destroy it
/// on drop.
pub trait Device: Debug + Send + Sync + Sized + 'static {
    type DescriptorSetLayout: Copy + Debug + Eq + Hash + Send + Sync;
    type DescriptorPool: Copy + Debug + Eq + Hash + Send + Sync;
    type DescriptorSet: Copy + Debug + Eq + Hash + Send + Sync;
    type PipelineLayout: Copy + Debug + Eq + Hash + Send + Sync;
    type ShaderModule: Copy + Debug + Eq + Hash + Send + Sync;
    type Sampler: Copy + Debug + Eq + Hash + Send + Sync;
    type Buffer: Copy + Debug + Eq + Hash + Send + Sync;
    type BufferView: Copy + Debug + Eq + Hash + Send + Sync;
    type ImageView: Copy + Debug + Eq + Hash + Send + Sync;

    fn create_descriptor_set_layout(
        &self,
        bindings: &[DescriptorSetLayoutBinding<Self>],
    ) -> Result<Self::DescriptorSetLayout, DriverError>;

    fn destroy_descriptor_set_layout(&self, layout: Self::DescriptorSetLayout);

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        pool_sizes: &[PoolSize],
    ) -> Result<Self::DescriptorPool, DriverError>;

    fn destroy_descriptor_pool(&self, pool: Self::DescriptorPool);

    /// Bulk-frees every set previously allocated from `pool`.
    fn reset_descriptor_pool(&self, pool: Self::DescriptorPool) -> Result<(), DriverError>;

    fn allocate_descriptor_set(
        &self,
        pool: Self::DescriptorPool,
        layout: Self::DescriptorSetLayout,
    ) -> Result<Self::DescriptorSet, DriverError>;

    /// Performs `writes` first, then `copies`, in one native call.
    fn update_descriptor_sets(
        &self,
        writes: &[DescriptorWrite<Self>],
        copies: &[DescriptorCopy<Self>],
    );

    fn create_pipeline_layout(
        &self,
        set_layouts: &[Self::DescriptorSetLayout],
        push_constant_ranges: &[PushConstantRange],
    ) -> Result<Self::PipelineLayout, DriverError>;

    fn destroy_pipeline_layout(&self, layout: Self::PipelineLayout);

    fn create_shader_module(&self, spirv: &[u32]) -> Result<Self::ShaderModule, DriverError>;

    fn destroy_shader_module(&self, module: Self::ShaderModule);
}

/// Reassigns duplicate binding slots to the lowest free slot so the native
/// layout never sees two bindings on one slot.
fn sanitize_binding_slots<D: Device>(bindings: &mut [DescriptorSetLayoutBinding<D>]) {
    if bindings.len() <= 1 {
        return;
    }

    let highest_slot = bindings
        .iter()
        .map(|binding| binding.binding)
        .max()
        .unwrap_or_default() as usize
        + bindings.len()
        + 1;
    let mut taken = vec![false; highest_slot];

    for binding in bindings.iter_mut() {
        if taken[binding.binding as usize] {
            let slot = taken
                .iter()
                .position(|taken| !taken)
                .expect("failed to assign binding slot automatically");
            binding.binding = slot as u32;
        }

        taken[binding.binding as usize] = true;
    }
}

/// Owned descriptor-set layout; retains its sanitized binding list for
/// later flattening and structural comparison.
pub struct DescriptorSetLayout<D: Device> {
    device: Arc<D>,
    descriptor_set_layout: D::DescriptorSetLayout,
    bindings: Vec<DescriptorSetLayoutBinding<D>>,
}

impl<D: Device> DescriptorSetLayout<D> {
    pub fn create(
        device: &Arc<D>,
        mut bindings: Vec<DescriptorSetLayoutBinding<D>>,
    ) -> Result<Self, DriverError> {
        sanitize_binding_slots(&mut bindings);

        let descriptor_set_layout = device.create_descriptor_set_layout(&bindings)?;

        Ok(Self {
            device: Arc::clone(device),
            descriptor_set_layout,
            bindings,
        })
    }

    pub fn bindings(&self) -> &[DescriptorSetLayoutBinding<D>] {
        &self.bindings
    }

    /// Flattens array bindings into one [`LayoutBinding`] per element, in
    /// declaration order.
    pub fn layout_bindings(&self) -> Vec<LayoutBinding> {
        let mut out = Vec::with_capacity(self.bindings.len());
        for binding in &self.bindings {
            for array_element in 0..binding.descriptor_count {
                out.push(LayoutBinding {
                    binding: binding.binding,
                    array_element,
                    descriptor_type: binding.descriptor_type,
                    stage_flags: binding.stage_flags,
                });
            }
        }

        out
    }

    pub fn compare_swo(lhs: &Self, rhs: &[DescriptorSetLayoutBinding<D>]) -> Ordering {
        lhs.bindings.len().cmp(&rhs.len()).then_with(|| {
            for (lhs, rhs) in lhs.bindings.iter().zip(rhs) {
                let ordering = DescriptorSetLayoutBinding::compare_swo(lhs, rhs);
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }

            Ordering::Equal
        })
    }
}

impl<D: Device> Debug for DescriptorSetLayout<D> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("DescriptorSetLayout")
            .field("descriptor_set_layout", &self.descriptor_set_layout)
            .field("bindings", &self.bindings)
            .finish()
    }
}

impl<D: Device> Deref for DescriptorSetLayout<D> {
    type Target = D::DescriptorSetLayout;

    fn deref(&self) -> &Self::Target {
        &self.descriptor_set_layout
    }
}

impl<D: Device> Drop for DescriptorSetLayout<D> {
    fn drop(&mut self) {
        if panicking() {
            return;
        }

        self.device
            .destroy_descriptor_set_layout(self.descriptor_set_layout);
    }
}

/// Owned descriptor pool.
pub struct DescriptorPool<D: Device> {
    device: Arc<D>,
    descriptor_pool: D::DescriptorPool,
}

impl<D: Device> DescriptorPool<D> {
    pub fn create(
        device: &Arc<D>,
        max_sets: u32,
        pool_sizes: &[PoolSize],
    ) -> Result<Self, DriverError> {
        let descriptor_pool = device.create_descriptor_pool(max_sets, pool_sizes)?;

        Ok(Self {
            device: Arc::clone(device),
            descriptor_pool,
        })
    }

    pub fn allocate_descriptor_set(
        this: &Self,
        layout: D::DescriptorSetLayout,
    ) -> Result<D::DescriptorSet, DriverError> {
        this.device
            .allocate_descriptor_set(this.descriptor_pool, layout)
            .map_err(|err| {
                warn!("unable to allocate descriptor set: {err}");

                err
            })
    }

    pub fn reset(this: &Self) -> Result<(), DriverError> {
        this.device.reset_descriptor_pool(this.descriptor_pool)
    }
}

impl<D: Device> Debug for DescriptorPool<D> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("DescriptorPool")
            .field("descriptor_pool", &self.descriptor_pool)
            .finish()
    }
}

impl<D: Device> Deref for DescriptorPool<D> {
    type Target = D::DescriptorPool;

    fn deref(&self) -> &Self::Target {
        &self.descriptor_pool
    }
}

impl<D: Device> Drop for DescriptorPool<D> {
    fn drop(&mut self) {
        if panicking() {
            return;
        }

        self.device.destroy_descriptor_pool(self.descriptor_pool);
    }
}

/// Owned pipeline layout.
pub struct PipelineLayout<D: Device> {
    device: Arc<D>,
    pipeline_layout: D::PipelineLayout,
}

impl<D: Device> PipelineLayout<D> {
    pub fn create(
        device: &Arc<D>,
        set_layouts: &[D::DescriptorSetLayout],
        push_constant_ranges: &[PushConstantRange],
    ) -> Result<Self, DriverError> {
        let pipeline_layout = device.create_pipeline_layout(set_layouts, push_constant_ranges)?;

        Ok(Self {
            device: Arc::clone(device),
            pipeline_layout,
        })
    }
}

impl<D: Device> Debug for PipelineLayout<D> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineLayout")
            .field("pipeline_layout", &self.pipeline_layout)
            .finish()
    }
}

impl<D: Device> Deref for PipelineLayout<D> {
    type Target = D::PipelineLayout;

    fn deref(&self) -> &Self::Target {
        &self.pipeline_layout
    }
}

impl<D: Device> Drop for PipelineLayout<D> {
    fn drop(&mut self) {
        if panicking() {
            return;
        }

        self.device.destroy_pipeline_layout(self.pipeline_layout);
    }
}

/// Owned shader module.
pub struct ShaderModule<D: Device> {
    device: Arc<D>,
    shader_module: D::ShaderModule,
}

impl<D: Device> ShaderModule<D> {
    pub fn create(device: &Arc<D>, spirv: &[u32]) -> Result<Self, DriverError> {
        let shader_module = device.create_shader_module(spirv)?;

        Ok(Self {
            device: Arc::clone(device),
            shader_module,
        })
    }
}

impl<D: Device> Debug for ShaderModule<D> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShaderModule")
            .field("shader_module", &self.shader_module)
            .finish()
    }
}

impl<D: Device> Deref for ShaderModule<D> {
    type Target = D::ShaderModule;

    fn deref(&self) -> &Self::Target {
        &self.shader_module
    }
}

impl<D: Device> Drop for ShaderModule<D> {
    fn drop(&mut self) {
        if panicking() {
            return;
        }

        self.device.destroy_shader_module(self.shader_module);
    }
}
