//! _Bindery_ is the resource-binding core of a Vulkan-style renderer: it
//! turns backend-agnostic pipeline-layout descriptions into native
//! descriptor-set machinery and keeps the per-draw rebinding path free of
//! allocations and redundant descriptor writes.
//!
//! The pieces, bottom up:
//!
//! - [`SmallVec`]: inline-capacity growable array used throughout the hot
//!   paths, with pluggable [grow strategies](small_vec::GrowStrategy).
//! - [`spirv`]: a SPIR-V word-stream decoder and reflection engine
//!   producing types, constants, uniforms, varyings, and the word offsets
//!   needed to re-assign binding slots in place.
//! - [`signature`]: the layout-signature mini-language, e.g.
//!   `"cbuffer(Scene@0):vert:frag, texture(1,2):frag"`.
//! - [`pool`]: pool-size accumulation plus staging descriptor pools chained
//!   with geometrically growing capacity.
//! - [`cache`]: the write-once, copy-many descriptor cache that collapses
//!   redundant rebinds into one allocate-and-copy per flush.
//! - [`permutation`]: assembly and structural dedup of pipeline-layout
//!   permutations.
//! - [`driver`]: the native-API boundary as a trait, with a Vulkan
//!   implementation behind the `vulkan` feature and a headless device for
//!   tests.
//!
//! # Example
//!
//! ```
//! use bindery::{
//!     driver::{null::NullDevice, ResourceRef},
//!     DescriptorSetWriter, LayoutSignature, PermutationParams, PermutationPool,
//!     StagingDescriptorSetPool, StagingPoolInfo,
//! };
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let device = Arc::new(NullDevice::new());
//!
//! let signature: LayoutSignature =
//!     "cbuffer(Scene@0):vert:frag, texture(1):frag, sampler(2):frag".parse()?;
//!
//! let mut permutations = PermutationPool::new(&device);
//! let permutation =
//!     permutations.get_or_create(None, PermutationParams::from_signature(&signature))?;
//!
//! let mut staging = StagingDescriptorSetPool::new(&device, StagingPoolInfo::default());
//! let mut writer = DescriptorSetWriter::new();
//!
//! let cache = permutation.descriptor_cache().unwrap();
//! cache.emplace_descriptor(
//!     ResourceRef::Buffer {
//!         buffer: Default::default(),
//!         view: None,
//!     },
//!     permutation.dynamic_bindings()[0],
//!     &mut writer,
//! );
//!
//! // One allocation and one combined update, no matter how many rebinds
//! // happened since the last flush.
//! let staged = cache.flush_descriptor_set(&mut staging, &mut writer)?;
//! assert!(staged.is_some());
//!
//! // Clean caches stage nothing.
//! assert!(cache.flush_descriptor_set(&mut staging, &mut writer)?.is_none());
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod driver;
pub mod permutation;
pub mod pool;
pub mod shader;
pub mod signature;
pub mod small_vec;
pub mod spirv;

pub use self::{
    cache::{DescriptorCache, DescriptorSetWriter},
    driver::{
        DescriptorType, Device, DriverError, ImageLayout, LayoutBinding, PoolSize,
        PushConstantRange, ResourceRef, StageFlags,
    },
    permutation::{PermutationParams, PermutationPool, PipelineLayoutPermutation},
    pool::{
        PoolSizeAccumulator, StagingDescriptorPool, StagingDescriptorSetPool, StagingPoolInfo,
    },
    shader::{Shader, ShaderBuilder, ShaderModulePool},
    signature::{BindFlags, BindingDesc, LayoutSignature, ResourceKind, SignatureError},
    small_vec::{GrowAddHalf, GrowDouble, GrowPow2, GrowStrategy, SmallVec},
    spirv::SpirvError,
};
