//! Pipeline-layout permutations.
//!
//! One permutation assembles every native object needed to bind a concrete
//! pipeline layout: a set layout for heap-style bindings shared across many
//! draws, a set layout for per-draw dynamic bindings, a descriptor pool and
//! [`DescriptorCache`] for the dynamic set, and the native pipeline layout
//! combining both with an optional immutable-sampler set and push-constant
//! ranges. [`PermutationPool`] deduplicates permutations by structural
//! equality rather than object identity.

use {
    crate::{
        cache::{DescriptorCache, DescriptorSetWriter},
        driver::{
            DescriptorPool, DescriptorSetLayout, DescriptorSetLayoutBinding, DescriptorType,
            Device, DriverError, LayoutBinding, PipelineLayout, PushConstantRange,
        },
        pool::{PoolSizeAccumulator, PoolSizes, StagingDescriptorSetPool},
        signature::LayoutSignature,
        small_vec::SmallVec,
    },
    std::{
        cmp::Ordering,
        fmt::{self, Debug, Formatter},
        sync::{
            atomic::{AtomicU64, Ordering as AtomicOrdering},
            Arc,
        },
    },
};

fn next_permutation_id() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);

    NEXT.fetch_add(1, AtomicOrdering::Relaxed)
}

/// Everything that distinguishes one permutation from another.
pub struct PermutationParams<D: Device> {
    /// Bindings updated through long-lived resource heaps.
    pub heap_bindings: Vec<DescriptorSetLayoutBinding<D>>,
    /// Bindings rebound per draw through the descriptor cache.
    pub dynamic_bindings: Vec<DescriptorSetLayoutBinding<D>>,
    pub push_constant_ranges: Vec<PushConstantRange>,
    pub immutable_samplers: Vec<D::Sampler>,
}

impl<D: Device> PermutationParams<D> {
    pub fn new() -> Self {
        Self {
            heap_bindings: Vec::new(),
            dynamic_bindings: Vec::new(),
            push_constant_ranges: Vec::new(),
            immutable_samplers: Vec::new(),
        }
    }

    /// Layout-signature bindings are per-draw bindings.
    pub fn from_signature(signature: &LayoutSignature) -> Self {
        Self {
            dynamic_bindings: signature.set_layout_bindings(),
            ..Self::new()
        }
    }
}

impl<D: Device> Default for PermutationParams<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Device> Clone for PermutationParams<D> {
    fn clone(&self) -> Self {
        Self {
            heap_bindings: self.heap_bindings.clone(),
            dynamic_bindings: self.dynamic_bindings.clone(),
            push_constant_ranges: self.push_constant_ranges.clone(),
            immutable_samplers: self.immutable_samplers.clone(),
        }
    }
}

impl<D: Device> Debug for PermutationParams<D> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("PermutationParams")
            .field("heap_bindings", &self.heap_bindings)
            .field("dynamic_bindings", &self.dynamic_bindings)
            .field("push_constant_ranges", &self.push_constant_ranges)
            .field("immutable_samplers", &self.immutable_samplers.len())
            .finish()
    }
}

fn dynamic_pool_sizes(bindings: &[LayoutBinding]) -> PoolSizes {
    let mut accum = PoolSizeAccumulator::new();
    for binding in bindings {
        accum.accumulate(binding.descriptor_type, 1);
    }

    accum.finalize()
}

/// Native objects for one (pipeline layout × binding assignment)
/// combination.
#[derive(Debug)]
pub struct PipelineLayoutPermutation<D: Device> {
    id: u64,
    pipeline_layout: PipelineLayout<D>,
    set_layout_heap_bindings: Option<DescriptorSetLayout<D>>,
    set_layout_dynamic_bindings: Option<DescriptorSetLayout<D>>,
    descriptor_pool: Option<DescriptorPool<D>>,
    descriptor_cache: Option<DescriptorCache<D>>,
    heap_bindings: Vec<LayoutBinding>,
    dynamic_bindings: Vec<LayoutBinding>,
    push_constant_ranges: Vec<PushConstantRange>,
    num_immutable_samplers: u32,
}

impl<D: Device> PipelineLayoutPermutation<D> {
    /// Creates every native object for `params`. Failures propagate the
    /// driver error; already-created objects are released by their owning
    /// wrappers.
    pub fn create(
        device: &Arc<D>,
        set_layout_immutable_samplers: Option<D::DescriptorSetLayout>,
        params: PermutationParams<D>,
    ) -> Result<Self, DriverError> {
        let PermutationParams {
            heap_bindings,
            dynamic_bindings,
            push_constant_ranges,
            immutable_samplers,
        } = params;
        let num_immutable_samplers = immutable_samplers.len() as u32;

        let set_layout_heap_bindings = if heap_bindings.is_empty() {
            None
        } else {
            Some(DescriptorSetLayout::create(device, heap_bindings)?)
        };
        let set_layout_dynamic_bindings = if dynamic_bindings.is_empty() {
            None
        } else {
            Some(DescriptorSetLayout::create(device, dynamic_bindings)?)
        };

        let heap_bindings = set_layout_heap_bindings
            .as_ref()
            .map(|layout| layout.layout_bindings())
            .unwrap_or_default();
        let dynamic_bindings = set_layout_dynamic_bindings
            .as_ref()
            .map(|layout| layout.layout_bindings())
            .unwrap_or_default();

        // Pool for the dynamic template set and any immutable samplers: one
        // set for the cache template, one for the immutable-sampler set.
        let descriptor_pool = if !dynamic_bindings.is_empty() || num_immutable_samplers > 0 {
            let mut accum = PoolSizeAccumulator::new();
            for binding in &dynamic_bindings {
                accum.accumulate(binding.descriptor_type, 1);
            }
            if num_immutable_samplers > 0 {
                accum.accumulate(DescriptorType::Sampler, num_immutable_samplers);
            }

            Some(DescriptorPool::create(device, 2, &accum.finalize())?)
        } else {
            None
        };

        // The cache accounts only dynamic descriptors; immutable samplers
        // are never staged per draw.
        let descriptor_cache = match (&descriptor_pool, &set_layout_dynamic_bindings) {
            (Some(pool), Some(layout)) if !dynamic_bindings.is_empty() => {
                Some(DescriptorCache::create(
                    device,
                    pool,
                    **layout,
                    dynamic_pool_sizes(&dynamic_bindings),
                    &dynamic_bindings,
                )?)
            }
            _ => None,
        };

        // Up to three set layouts in a fixed order.
        let mut set_layouts = SmallVec::<D::DescriptorSetLayout, 3>::new();
        if let Some(layout) = &set_layout_heap_bindings {
            set_layouts.push(**layout);
        }
        if let Some(layout) = &set_layout_dynamic_bindings {
            set_layouts.push(**layout);
        }
        if let Some(layout) = set_layout_immutable_samplers {
            set_layouts.push(layout);
        }

        let pipeline_layout = PipelineLayout::create(device, &set_layouts, &push_constant_ranges)?;

        Ok(Self {
            id: next_permutation_id(),
            pipeline_layout,
            set_layout_heap_bindings,
            set_layout_dynamic_bindings,
            descriptor_pool,
            descriptor_cache,
            heap_bindings,
            dynamic_bindings,
            push_constant_ranges,
            num_immutable_samplers,
        })
    }

    /// Process-unique identity, e.g. for shader-module memoization.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn pipeline_layout(&self) -> D::PipelineLayout {
        *self.pipeline_layout
    }

    pub fn set_layout_for_heap_bindings(&self) -> Option<D::DescriptorSetLayout> {
        self.set_layout_heap_bindings.as_deref().copied()
    }

    pub fn set_layout_for_dynamic_bindings(&self) -> Option<D::DescriptorSetLayout> {
        self.set_layout_dynamic_bindings.as_deref().copied()
    }

    /// Flattened per-element heap binding slots.
    pub fn heap_bindings(&self) -> &[LayoutBinding] {
        &self.heap_bindings
    }

    /// Flattened per-element dynamic binding slots.
    pub fn dynamic_bindings(&self) -> &[LayoutBinding] {
        &self.dynamic_bindings
    }

    pub fn push_constant_ranges(&self) -> &[PushConstantRange] {
        &self.push_constant_ranges
    }

    /// Descriptor cache for the dynamic set, if this permutation has one.
    pub fn descriptor_cache(&self) -> Option<&DescriptorCache<D>> {
        self.descriptor_cache.as_ref()
    }

    /// Stages the dynamic descriptor set. `Ok(None)` when this permutation
    /// has no dynamic bindings or nothing changed since the last flush.
    pub fn flush_descriptor_set(
        &self,
        pool: &mut StagingDescriptorSetPool<D>,
        writer: &mut DescriptorSetWriter<D>,
    ) -> Result<Option<D::DescriptorSet>, DriverError> {
        match &self.descriptor_cache {
            Some(cache) => cache.flush_descriptor_set(pool, writer),
            None => Ok(None),
        }
    }

    /// Strict weak ordering against a parameter set, used for structural
    /// dedup: binding lists first, then push-constant and sampler counts,
    /// then element-wise fields.
    pub fn compare_swo(&self, params: &PermutationParams<D>) -> Ordering {
        fn layout_cmp<D: Device>(
            layout: &Option<DescriptorSetLayout<D>>,
            rhs: &[DescriptorSetLayoutBinding<D>],
        ) -> Ordering {
            match layout {
                Some(layout) => DescriptorSetLayout::compare_swo(layout, rhs),
                None => 0usize.cmp(&rhs.len()),
            }
        }

        layout_cmp(&self.set_layout_heap_bindings, &params.heap_bindings)
            .then_with(|| layout_cmp(&self.set_layout_dynamic_bindings, &params.dynamic_bindings))
            .then_with(|| {
                self.push_constant_ranges
                    .len()
                    .cmp(&params.push_constant_ranges.len())
            })
            .then_with(|| {
                self.num_immutable_samplers
                    .cmp(&(params.immutable_samplers.len() as u32))
            })
            .then_with(|| {
                for (lhs, rhs) in self
                    .push_constant_ranges
                    .iter()
                    .zip(&params.push_constant_ranges)
                {
                    let ordering = PushConstantRange::compare_swo(lhs, rhs);
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }

                Ordering::Equal
            })
    }
}

/// Deduplicating store of permutations, ordered by
/// [`PipelineLayoutPermutation::compare_swo`].
#[derive(Debug)]
pub struct PermutationPool<D: Device> {
    device: Arc<D>,
    permutations: Vec<Arc<PipelineLayoutPermutation<D>>>,
}

impl<D: Device> PermutationPool<D> {
    pub fn new(device: &Arc<D>) -> Self {
        Self {
            device: Arc::clone(device),
            permutations: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.permutations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.permutations.is_empty()
    }

    /// Returns the cached permutation structurally equal to `params`, or
    /// creates and stores a new one.
    pub fn get_or_create(
        &mut self,
        set_layout_immutable_samplers: Option<D::DescriptorSetLayout>,
        params: PermutationParams<D>,
    ) -> Result<Arc<PipelineLayoutPermutation<D>>, DriverError> {
        match self
            .permutations
            .binary_search_by(|permutation| permutation.compare_swo(&params))
        {
            Ok(index) => Ok(Arc::clone(&self.permutations[index])),
            Err(index) => {
                let permutation = Arc::new(PipelineLayoutPermutation::create(
                    &self.device,
                    set_layout_immutable_samplers,
                    params,
                )?);
                self.permutations.insert(index, Arc::clone(&permutation));

                Ok(permutation)
            }
        }
    }

    /// Drops every cached permutation.
    pub fn clear(&mut self) {
        self.permutations.clear();
    }
}

#[cfg(test)]
mod test {
    use {super::*, crate::driver::null::NullDevice};

    fn params(signature: &str) -> PermutationParams<NullDevice> {
        PermutationParams::from_signature(&LayoutSignature::parse(signature).unwrap())
    }

    #[test]
    fn builds_dynamic_objects_only_when_needed() {
        let device = Arc::new(NullDevice::new());

        let with_dynamic =
            PipelineLayoutPermutation::create(&device, None, params("cbuffer(0):vert")).unwrap();
        assert!(with_dynamic.descriptor_cache().is_some());
        assert_eq!(with_dynamic.dynamic_bindings().len(), 1);

        let empty =
            PipelineLayoutPermutation::create(&device, None, PermutationParams::new()).unwrap();
        assert!(empty.descriptor_cache().is_none());
        assert!(empty.dynamic_bindings().is_empty());
    }

    #[test]
    fn array_bindings_flatten_into_per_element_slots() {
        let device = Arc::new(NullDevice::new());
        let permutation =
            PipelineLayoutPermutation::create(&device, None, params("texture(1)[3]:frag"))
                .unwrap();

        let bindings = permutation.dynamic_bindings();
        assert_eq!(bindings.len(), 3);
        assert!(bindings
            .iter()
            .enumerate()
            .all(|(i, binding)| binding.binding == 1 && binding.array_element == i as u32));
    }

    #[test]
    fn pool_deduplicates_structurally_equal_params() {
        let device = Arc::new(NullDevice::new());
        let mut pool = PermutationPool::new(&device);

        let first = pool
            .get_or_create(None, params("cbuffer(0):vert,texture(1):frag"))
            .unwrap();
        let same = pool
            .get_or_create(None, params("cbuffer(0):vert,texture(1):frag"))
            .unwrap();
        let different = pool
            .get_or_create(None, params("cbuffer(0):vert,texture(2):frag"))
            .unwrap();

        assert_eq!(first.id(), same.id());
        assert_ne!(first.id(), different.id());
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn permutation_ids_are_unique() {
        let device = Arc::new(NullDevice::new());
        let a = PipelineLayoutPermutation::create(&device, None, params("cbuffer(0)")).unwrap();
        let b = PipelineLayoutPermutation::create(&device, None, params("cbuffer(0)")).unwrap();

        assert_ne!(a.id(), b.id());
    }
}
