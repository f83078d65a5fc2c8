use {
    super::{Instruction, Module, Op, SpirvError, SpvId, HEADER_WORDS},
    crate::driver::DescriptorType,
    log::warn,
    std::collections::BTreeMap,
};

const DECORATION_BLOCK: u32 = 2;
const DECORATION_BUFFER_BLOCK: u32 = 3;
const DECORATION_BUILT_IN: u32 = 11;
const DECORATION_LOCATION: u32 = 30;
const DECORATION_BINDING: u32 = 33;
const DECORATION_DESCRIPTOR_SET: u32 = 34;

const EXECUTION_MODE_ORIGIN_UPPER_LEFT: u32 = 7;
const EXECUTION_MODE_EARLY_FRAGMENT_TESTS: u32 = 9;
const EXECUTION_MODE_DEPTH_GREATER: u32 = 14;
const EXECUTION_MODE_DEPTH_LESS: u32 = 15;
const EXECUTION_MODE_LOCAL_SIZE: u32 = 17;

const DIM_BUFFER: u32 = 5;

/// SPIR-V storage class of a pointer or variable.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum StorageClass {
    UniformConstant,
    Input,
    Uniform,
    Output,
    Workgroup,
    Private,
    Function,
    PushConstant,
    StorageBuffer,
    Other(u32),
}

impl StorageClass {
    pub fn from_raw(value: u32) -> Self {
        match value {
            0 => Self::UniformConstant,
            1 => Self::Input,
            2 => Self::Uniform,
            3 => Self::Output,
            4 => Self::Workgroup,
            6 => Self::Private,
            7 => Self::Function,
            9 => Self::PushConstant,
            12 => Self::StorageBuffer,
            other => Self::Other(other),
        }
    }
}

/// Built-in semantic attached to a varying.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum BuiltIn {
    Position,
    PointSize,
    ClipDistance,
    CullDistance,
    VertexId,
    InstanceId,
    FragCoord,
    FrontFacing,
    FragDepth,
    WorkgroupId,
    LocalInvocationId,
    GlobalInvocationId,
    VertexIndex,
    InstanceIndex,
    Other(u32),
}

impl BuiltIn {
    pub fn from_raw(value: u32) -> Self {
        match value {
            0 => Self::Position,
            1 => Self::PointSize,
            3 => Self::ClipDistance,
            4 => Self::CullDistance,
            5 => Self::VertexId,
            6 => Self::InstanceId,
            15 => Self::FragCoord,
            17 => Self::FrontFacing,
            22 => Self::FragDepth,
            26 => Self::WorkgroupId,
            27 => Self::LocalInvocationId,
            28 => Self::GlobalInvocationId,
            42 => Self::VertexIndex,
            43 => Self::InstanceIndex,
            other => Self::Other(other),
        }
    }
}

/// One registered `OpType*` instruction.
///
/// Cross-references are ids resolved through [`Reflection::types`], never
/// cached pointers; the table may grow while later instructions are parsed.
#[derive(Clone, Debug)]
pub struct SpvType {
    pub opcode: Op,
    pub result: SpvId,
    /// Name of this type (only for structures).
    pub name: Option<String>,
    pub base_type: Option<SpvId>,
    pub storage: Option<StorageClass>,
    /// Element count for vectors, matrices, and arrays.
    pub elements: u32,
    /// Size in bytes, or 0 for unsized types.
    pub size: u32,
    /// Image dimensionality (raw `spv::Dim` value).
    pub dimension: Option<u32>,
    /// Field type ids for structures.
    pub fields: Vec<SpvId>,
    /// Signedness (only for `OpTypeInt`).
    pub sign: bool,
    /// For images: compatible with sampling operations.
    pub readonly: bool,
}

impl Default for SpvType {
    fn default() -> Self {
        Self {
            opcode: Op::Unknown(0),
            result: 0,
            name: None,
            base_type: None,
            storage: None,
            elements: 0,
            size: 0,
            dimension: None,
            fields: Vec::new(),
            sign: false,
            readonly: false,
        }
    }
}

/// Scalar value of an `OpConstant`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SpvValue {
    Uint32(u32),
    Uint64(u64),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpvConstant {
    pub type_id: SpvId,
    pub value: SpvValue,
}

impl SpvConstant {
    pub fn as_u32(&self) -> u32 {
        match self.value {
            SpvValue::Uint32(value) => value,
            SpvValue::Uint64(value) => value as u32,
            SpvValue::Int32(value) => value as u32,
            SpvValue::Int64(value) => value as u32,
            SpvValue::Float32(value) => value as u32,
            SpvValue::Float64(value) => value as u32,
        }
    }
}

/// A uniform or uniform-constant resource variable.
#[derive(Clone, Debug, Default)]
pub struct SpvUniform {
    pub name: Option<String>,
    pub type_id: Option<SpvId>,
    /// Descriptor set.
    pub set: u32,
    /// Word offset of the descriptor set literal within the module.
    pub set_word_offset: u32,
    /// Binding point.
    pub binding: u32,
    /// Word offset of the binding literal within the module.
    pub binding_word_offset: u32,
    /// Size in bytes of the bound data.
    pub size: u32,
}

/// A module input or output attribute.
#[derive(Clone, Debug, Default)]
pub struct SpvVarying {
    pub name: Option<String>,
    pub builtin: Option<BuiltIn>,
    pub type_id: Option<SpvId>,
    pub location: u32,
    pub input: bool,
}

/// A uniform classified into the descriptor type its binding requires.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReflectedBinding {
    pub name: Option<String>,
    pub set: u32,
    pub binding: u32,
    pub descriptor_type: DescriptorType,
    pub count: u32,
}

/// Symbol tables reflected from the declaration section of a module.
///
/// Populated in a single forward pass: a type or constant must be registered
/// before anything refers to it, while names and decorations may arrive
/// before the instruction they annotate.
#[derive(Debug, Default)]
pub struct Reflection {
    id_bound: u32,
    names: Vec<Option<String>>,
    types: BTreeMap<SpvId, SpvType>,
    constants: BTreeMap<SpvId, SpvConstant>,
    uniforms: BTreeMap<SpvId, SpvUniform>,
    varyings: BTreeMap<SpvId, SpvVarying>,
}

impl Reflection {
    pub fn reflect(module: &Module) -> Result<Self, SpirvError> {
        let header = module.header();
        let mut this = Self {
            id_bound: header.bound,
            names: vec![None; header.bound as usize],
            ..Default::default()
        };

        for instr in module.instructions() {
            let instr = instr?;

            // No more declarations after the first function.
            if instr.opcode == Op::Function {
                break;
            }

            this.parse_instruction(&instr)?;
        }

        Ok(this)
    }

    pub fn types(&self) -> &BTreeMap<SpvId, SpvType> {
        &self.types
    }

    pub fn constants(&self) -> &BTreeMap<SpvId, SpvConstant> {
        &self.constants
    }

    pub fn uniforms(&self) -> &BTreeMap<SpvId, SpvUniform> {
        &self.uniforms
    }

    pub fn varyings(&self) -> &BTreeMap<SpvId, SpvVarying> {
        &self.varyings
    }

    /// Follows pointer types down to the pointed-at type.
    pub fn deref_type<'a>(&'a self, mut ty: &'a SpvType) -> &'a SpvType {
        while ty.opcode == Op::TypePointer {
            match ty.base_type.and_then(|id| self.types.get(&id)) {
                Some(base) => ty = base,
                None => break,
            }
        }

        ty
    }

    /// Classifies every reflected uniform into the descriptor binding its
    /// resource requires. Uniform entries that were decorated but never
    /// declared are skipped.
    pub fn descriptor_bindings(&self) -> Result<Vec<ReflectedBinding>, SpirvError> {
        let mut bindings = Vec::with_capacity(self.uniforms.len());

        for uniform in self.uniforms.values() {
            let type_id = match uniform.type_id {
                Some(type_id) => type_id,
                None => continue,
            };

            let mut ty = self.deref_type(self.find_type(type_id)?);
            let mut count = 1;
            if ty.opcode == Op::TypeArray {
                count = ty.elements.max(1);
                if let Some(base) = ty.base_type {
                    ty = self.find_type(base)?;
                }
            }

            let descriptor_type = match ty.opcode {
                Op::TypeSampledImage => DescriptorType::CombinedImageSampler,
                Op::TypeSampler => DescriptorType::Sampler,
                Op::TypeImage => match (ty.dimension, ty.readonly) {
                    (Some(DIM_BUFFER), true) => DescriptorType::UniformTexelBuffer,
                    (Some(DIM_BUFFER), false) => DescriptorType::StorageTexelBuffer,
                    (_, true) => DescriptorType::SampledImage,
                    (_, false) => DescriptorType::StorageImage,
                },
                Op::TypeStruct => match ty.storage {
                    Some(StorageClass::StorageBuffer) => DescriptorType::StorageBuffer,
                    _ => DescriptorType::UniformBuffer,
                },
                _ => {
                    warn!(
                        "unsupported descriptor binding type {:?} for %{}",
                        ty.opcode, ty.result
                    );
                    continue;
                }
            };

            bindings.push(ReflectedBinding {
                name: uniform.name.clone(),
                set: uniform.set,
                binding: uniform.binding,
                descriptor_type,
                count,
            });
        }

        Ok(bindings)
    }

    fn parse_instruction(&mut self, instr: &Instruction<'_>) -> Result<(), SpirvError> {
        match instr.opcode {
            Op::Name => self.op_name(instr),
            Op::Decorate => self.op_decorate(instr),
            Op::TypeVoid
            | Op::TypeBool
            | Op::TypeInt
            | Op::TypeFloat
            | Op::TypeVector
            | Op::TypeMatrix
            | Op::TypeImage
            | Op::TypeSampler
            | Op::TypeSampledImage
            | Op::TypeArray
            | Op::TypeRuntimeArray
            | Op::TypeStruct
            | Op::TypeOpaque
            | Op::TypePointer
            | Op::TypeFunction => self.op_type(instr),
            Op::Variable => self.op_variable(instr),
            Op::Constant => self.op_constant(instr),
            _ => Ok(()),
        }
    }

    fn check_id(&self, id: SpvId) -> Result<(), SpirvError> {
        if id < self.id_bound {
            Ok(())
        } else {
            Err(SpirvError::IdOutOfBounds {
                id,
                bound: self.id_bound,
            })
        }
    }

    fn find_type(&self, id: SpvId) -> Result<&SpvType, SpirvError> {
        self.types.get(&id).ok_or(SpirvError::TypeNotFound { id })
    }

    fn find_constant(&self, id: SpvId) -> Result<&SpvConstant, SpirvError> {
        self.constants
            .get(&id)
            .ok_or(SpirvError::ConstantNotFound { id })
    }

    fn op_name(&mut self, instr: &Instruction<'_>) -> Result<(), SpirvError> {
        let id = instr.get_u32(0)?;
        self.check_id(id)?;

        self.names[id as usize] = Some(instr.get_string(1)?);
        Ok(())
    }

    fn op_decorate(&mut self, instr: &Instruction<'_>) -> Result<(), SpirvError> {
        let id = instr.get_u32(0)?;
        self.check_id(id)?;

        match instr.get_u32(1)? {
            DECORATION_BINDING => {
                let uniform = self.uniforms.entry(id).or_default();
                uniform.binding = instr.get_u32(2)?;
                uniform.binding_word_offset = instr.operand_word_offset(2) as u32;
            }
            DECORATION_DESCRIPTOR_SET => {
                let uniform = self.uniforms.entry(id).or_default();
                uniform.set = instr.get_u32(2)?;
                uniform.set_word_offset = instr.operand_word_offset(2) as u32;
            }
            DECORATION_LOCATION => {
                self.varyings.entry(id).or_default().location = instr.get_u32(2)?;
            }
            DECORATION_BUILT_IN => {
                self.varyings.entry(id).or_default().builtin =
                    Some(BuiltIn::from_raw(instr.get_u32(2)?));
            }
            DECORATION_BLOCK => {
                self.types.entry(id).or_default().storage = Some(StorageClass::Uniform);
            }
            DECORATION_BUFFER_BLOCK => {
                self.types.entry(id).or_default().storage = Some(StorageClass::StorageBuffer);
            }
            _ => (),
        }

        Ok(())
    }

    fn op_type(&mut self, instr: &Instruction<'_>) -> Result<(), SpirvError> {
        let result = instr.result_id.unwrap_or_default();
        self.check_id(result)?;

        // A block decoration may already have created the entry; keep what
        // it set.
        let mut ty = self.types.remove(&result).unwrap_or_default();
        ty.opcode = instr.opcode;
        ty.result = result;
        ty.name = self.names[result as usize].clone();

        match instr.opcode {
            Op::TypeBool => ty.size = 1,
            Op::TypeInt => {
                ty.size = instr.get_u32(0)? / 8;
                ty.sign = instr.get_u32(1)? != 0;
            }
            Op::TypeFloat => ty.size = instr.get_u32(0)? / 8,
            Op::TypeVector | Op::TypeMatrix => {
                let base = instr.get_u32(0)?;
                ty.base_type = Some(base);
                ty.elements = instr.get_u32(1)?;
                ty.size = self.find_type(base)?.size * ty.elements;
            }
            Op::TypeImage => {
                ty.base_type = Some(instr.get_u32(0)?);
                ty.dimension = Some(instr.get_u32(1)?);
                // From the SPIR-V spec: 1 indicates an image compatible with
                // sampling operations.
                ty.readonly = instr.get_u32(5)? == 1;
            }
            Op::TypeSampledImage => {
                let base = instr.get_u32(0)?;
                self.find_type(base)?;
                ty.base_type = Some(base);
            }
            Op::TypeArray => {
                let base = instr.get_u32(0)?;
                ty.base_type = Some(base);
                ty.elements = self.find_constant(instr.get_u32(1)?)?.as_u32();
                ty.size = self.find_type(base)?.size * ty.elements;
            }
            Op::TypeRuntimeArray => ty.base_type = Some(instr.get_u32(0)?),
            Op::TypeStruct => {
                for i in 0..instr.operand_count() {
                    let field = instr.get_u32(i)?;
                    let field_size = self.find_type(field)?.size;
                    accumulate_size_in_vector_boundary(&mut ty.size, 16, field_size);
                    ty.fields.push(field);
                }

                ty.size = aligned_size(ty.size, 16);
            }
            Op::TypePointer => {
                ty.storage = Some(StorageClass::from_raw(instr.get_u32(0)?));
                let base = instr.get_u32(1)?;
                self.find_type(base)?;
                ty.base_type = Some(base);
            }
            _ => (),
        }

        self.types.insert(result, ty);
        Ok(())
    }

    fn op_variable(&mut self, instr: &Instruction<'_>) -> Result<(), SpirvError> {
        let result = instr.result_id.unwrap_or_default();
        self.check_id(result)?;

        let type_id = instr.type_id.unwrap_or_default();

        match StorageClass::from_raw(instr.get_u32(0)?) {
            StorageClass::Uniform | StorageClass::UniformConstant => {
                let (struct_name, size) = {
                    let ty = self.find_type(type_id)?;
                    let deref = self.deref_type(ty);
                    if deref.opcode == Op::TypeStruct {
                        (deref.name.clone(), deref.size)
                    } else {
                        (None, ty.size)
                    }
                };

                // Anonymous blocks take the structure's name.
                let name = match self.names[result as usize].clone() {
                    Some(name) if !name.is_empty() => Some(name),
                    _ => struct_name,
                };

                let uniform = self.uniforms.entry(result).or_default();
                uniform.name = name;
                uniform.type_id = Some(type_id);
                uniform.size = size;
            }
            StorageClass::Input | StorageClass::Output => {
                self.find_type(type_id)?;

                let input = instr.get_u32(0)? == 1;
                let name = self.names[result as usize].clone();
                let varying = self.varyings.entry(result).or_default();
                varying.name = name;
                varying.type_id = Some(type_id);
                varying.input = input;
            }
            _ => (),
        }

        Ok(())
    }

    fn op_constant(&mut self, instr: &Instruction<'_>) -> Result<(), SpirvError> {
        let result = instr.result_id.unwrap_or_default();
        self.check_id(result)?;

        let type_id = instr.type_id.unwrap_or_default();
        let (opcode, size, sign) = {
            let ty = self.find_type(type_id)?;
            (ty.opcode, ty.size, ty.sign)
        };

        let value = match opcode {
            Op::TypeInt => match (size, sign) {
                (8, false) => SpvValue::Uint64(instr.get_u64(0)?),
                (8, true) => SpvValue::Int64(instr.get_u64(0)? as i64),
                (_, false) => SpvValue::Uint32(instr.get_u32(0)?),
                (_, true) => SpvValue::Int32(instr.get_u32(0)? as i32),
            },
            Op::TypeFloat => match size {
                2 => SpvValue::Float32(instr.get_f16(0)?),
                8 => SpvValue::Float64(instr.get_f64(0)?),
                _ => SpvValue::Float32(instr.get_f32(0)?),
            },
            // Composite and boolean constants are not scalar table entries.
            _ => return Ok(()),
        };

        self.constants.insert(result, SpvConstant { type_id, value });
        Ok(())
    }
}

/// Execution-mode flags of a module's entry point.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ExecutionModes {
    pub early_fragment_tests: bool,
    pub origin_upper_left: bool,
    pub depth_greater: bool,
    pub depth_less: bool,
    pub local_size: [u32; 3],
}

/// Reflects only the execution modes of a module.
///
/// Execution modes are contiguous in a valid module, so scanning stops at
/// the first instruction after the mode block instead of walking function
/// bodies.
pub fn reflect_execution_modes(module: &Module) -> Result<ExecutionModes, SpirvError> {
    let mut modes = ExecutionModes::default();
    let mut first_mode_seen = false;

    for instr in module.instructions() {
        let instr = instr?;

        if instr.opcode == Op::ExecutionMode {
            // OpExecutionMode EntryPoint[0] Mode[1] Literals[2..]
            match instr.get_u32(1)? {
                EXECUTION_MODE_ORIGIN_UPPER_LEFT => modes.origin_upper_left = true,
                EXECUTION_MODE_EARLY_FRAGMENT_TESTS => modes.early_fragment_tests = true,
                EXECUTION_MODE_DEPTH_GREATER => modes.depth_greater = true,
                EXECUTION_MODE_DEPTH_LESS => modes.depth_less = true,
                EXECUTION_MODE_LOCAL_SIZE => {
                    modes.local_size = [
                        instr.get_u32(2)?,
                        instr.get_u32(3)?,
                        instr.get_u32(4)?,
                    ];
                }
                _ => (),
            }

            first_mode_seen = true;
        } else if first_mode_seen {
            break;
        }
    }

    Ok(modes)
}

/// A literal rewrite produced when re-assigning binding slots for a
/// pipeline-layout permutation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SlotPatch {
    /// Module word offset of the literal, as recorded by reflection.
    pub word_offset: u32,
    pub value: u32,
}

/// Rewrites decoration literals in place.
pub fn patch_slots(words: &mut [u32], patches: &[SlotPatch]) -> Result<(), SpirvError> {
    for patch in patches {
        let offset = patch.word_offset as usize;
        if offset < HEADER_WORDS || offset >= words.len() {
            return Err(SpirvError::OperandOutOfBounds {
                offset,
                count: words.len(),
            });
        }

        words[offset] = patch.value;
    }

    Ok(())
}

fn aligned_size(size: u32, alignment: u32) -> u32 {
    (size + alignment - 1) / alignment * alignment
}

/// Pads `size` to `alignment` before appending when the appendix would
/// straddle an alignment boundary.
fn accumulate_size_in_vector_boundary(size: &mut u32, alignment: u32, appendix: u32) {
    if *size % alignment + appendix > alignment {
        *size = aligned_size(*size, alignment);
    }

    *size += appendix;
}

#[cfg(test)]
mod test {
    use {super::*, crate::spirv::SPIRV_MAGIC};

    struct ModuleBuilder {
        words: Vec<u32>,
    }

    impl ModuleBuilder {
        fn new(bound: u32) -> Self {
            Self {
                words: vec![SPIRV_MAGIC, 0x0001_0000, 0, bound, 0],
            }
        }

        fn instr(&mut self, op: Op, operands: &[u32]) -> usize {
            let offset = self.words.len();
            self.words
                .push(((operands.len() as u32 + 1) << 16) | u32::from(op.as_raw()));
            self.words.extend_from_slice(operands);
            offset
        }

        fn name(&mut self, id: u32, name: &str) {
            let mut operands = vec![id];
            operands.extend(pack_string(name));
            self.instr(Op::Name, &operands);
        }

        fn build(self) -> Module {
            Module::from_words(self.words).unwrap()
        }
    }

    fn pack_string(s: &str) -> Vec<u32> {
        let mut bytes = s.as_bytes().to_vec();
        bytes.push(0);
        while bytes.len() % 4 != 0 {
            bytes.push(0);
        }

        bytes
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    }

    // A compute-flavored declaration section: a named uniform block
    // (mat4 + vec4 + float), a combined image sampler, and a float array.
    fn sample_module() -> (Module, usize, usize) {
        let mut b = ModuleBuilder::new(64);

        b.name(10, "SceneState");
        b.name(23, "colorMap");

        let set_instr = b.instr(Op::Decorate, &[12, DECORATION_DESCRIPTOR_SET, 0]);
        let binding_instr = b.instr(Op::Decorate, &[12, DECORATION_BINDING, 2]);
        b.instr(Op::Decorate, &[10, DECORATION_BLOCK]);
        b.instr(Op::Decorate, &[23, DECORATION_DESCRIPTOR_SET, 0]);
        b.instr(Op::Decorate, &[23, DECORATION_BINDING, 0]);

        b.instr(Op::TypeFloat, &[6, 32]);
        b.instr(Op::TypeVector, &[7, 6, 4]);
        b.instr(Op::TypeMatrix, &[8, 7, 4]);
        b.instr(Op::TypeInt, &[9, 32, 0]);
        b.instr(Op::TypeStruct, &[10, 8, 7, 6]);
        b.instr(Op::TypePointer, &[11, 2, 10]);
        b.instr(Op::Variable, &[11, 12, 2]);

        b.instr(Op::Constant, &[9, 13, 4]);
        b.instr(Op::TypeArray, &[14, 6, 13]);

        // OpTypeImage %20: sampled type, dim 2D, depth, arrayed, ms, sampled, format
        b.instr(Op::TypeImage, &[20, 6, 1, 0, 0, 0, 1, 0]);
        b.instr(Op::TypeSampledImage, &[21, 20]);
        b.instr(Op::TypePointer, &[22, 0, 21]);
        b.instr(Op::Variable, &[22, 23, 0]);

        b.instr(Op::TypeVoid, &[30]);
        b.instr(Op::TypeFunction, &[31, 30]);
        b.instr(Op::Function, &[30, 32, 0, 31]);
        b.instr(Op::Label, &[33]);
        // A function-local variable that reflection must never see.
        b.instr(Op::Variable, &[11, 40, 7]);
        b.instr(Op::Return, &[]);
        b.instr(Op::FunctionEnd, &[]);

        // Word offsets of the set/binding literals: instruction word, then
        // target id and decoration, then the literal.
        (b.build(), set_instr + 3, binding_instr + 3)
    }

    #[test]
    fn reflects_uniform_block_with_std140_size() {
        let (module, set_offset, binding_offset) = sample_module();
        let reflection = Reflection::reflect(&module).unwrap();

        let uniform = &reflection.uniforms()[&12];
        assert_eq!(uniform.name.as_deref(), Some("SceneState"));
        assert_eq!(uniform.set, 0);
        assert_eq!(uniform.binding, 2);
        // mat4 (64) + vec4 (16) + float (4), rounded up to 16.
        assert_eq!(uniform.size, 96);
        assert_eq!(uniform.set_word_offset as usize, set_offset);
        assert_eq!(uniform.binding_word_offset as usize, binding_offset);

        // The function-local variable is past the first OpFunction.
        assert!(!reflection.uniforms().contains_key(&40));
    }

    #[test]
    fn reflects_types_and_constants() {
        let (module, ..) = sample_module();
        let reflection = Reflection::reflect(&module).unwrap();

        let types = reflection.types();
        assert_eq!(types[&6].size, 4);
        assert_eq!(types[&7].size, 16);
        assert_eq!(types[&8].size, 64);
        assert_eq!(types[&8].elements, 4);
        assert_eq!(types[&10].fields, [8, 7, 6]);
        assert_eq!(types[&10].storage, Some(StorageClass::Uniform));
        assert_eq!(types[&14].size, 16);
        assert_eq!(types[&14].elements, 4);
        assert!(!types[&9].sign);

        assert_eq!(
            reflection.constants()[&13],
            SpvConstant {
                type_id: 9,
                value: SpvValue::Uint32(4),
            }
        );
    }

    #[test]
    fn classifies_descriptor_bindings() {
        let (module, ..) = sample_module();
        let reflection = Reflection::reflect(&module).unwrap();

        let bindings = reflection.descriptor_bindings().unwrap();
        assert_eq!(
            bindings,
            [
                ReflectedBinding {
                    name: Some("SceneState".to_owned()),
                    set: 0,
                    binding: 2,
                    descriptor_type: DescriptorType::UniformBuffer,
                    count: 1,
                },
                ReflectedBinding {
                    name: Some("colorMap".to_owned()),
                    set: 0,
                    binding: 0,
                    descriptor_type: DescriptorType::CombinedImageSampler,
                    count: 1,
                },
            ]
        );
    }

    #[test]
    fn patches_binding_slots_in_place() {
        let (module, set_offset, binding_offset) = sample_module();
        let reflection = Reflection::reflect(&module).unwrap();
        let uniform = &reflection.uniforms()[&12];

        let mut words = module.words().to_vec();
        patch_slots(
            &mut words,
            &[
                SlotPatch {
                    word_offset: uniform.set_word_offset,
                    value: 1,
                },
                SlotPatch {
                    word_offset: uniform.binding_word_offset,
                    value: 7,
                },
            ],
        )
        .unwrap();

        assert_eq!(words[set_offset], 1);
        assert_eq!(words[binding_offset], 7);

        let patched = Module::from_words(words).unwrap();
        let reflection = Reflection::reflect(&patched).unwrap();
        assert_eq!(reflection.uniforms()[&12].set, 1);
        assert_eq!(reflection.uniforms()[&12].binding, 7);

        // Offsets into the header are rejected.
        let mut words = module.words().to_vec();
        assert!(patch_slots(
            &mut words,
            &[SlotPatch {
                word_offset: 1,
                value: 0,
            }]
        )
        .is_err());
    }

    #[test]
    fn array_length_must_be_a_registered_constant() {
        let mut b = ModuleBuilder::new(16);
        b.instr(Op::TypeFloat, &[6, 32]);
        b.instr(Op::TypeArray, &[7, 6, 13]);

        assert_eq!(
            Reflection::reflect(&b.build()).unwrap_err(),
            SpirvError::ConstantNotFound { id: 13 }
        );
    }

    #[test]
    fn unknown_type_reference_is_an_error() {
        let mut b = ModuleBuilder::new(16);
        b.instr(Op::TypeFloat, &[6, 32]);
        b.instr(Op::TypePointer, &[11, 2, 6]);
        b.instr(Op::Variable, &[11, 12, 2]);
        assert!(Reflection::reflect(&b.build()).is_ok());

        // Variable with an undeclared type.
        let mut b = ModuleBuilder::new(16);
        b.instr(Op::Variable, &[5, 12, 2]);
        assert_eq!(
            Reflection::reflect(&b.build()).unwrap_err(),
            SpirvError::TypeNotFound { id: 5 }
        );

        // Pointer to an undeclared type.
        let mut b = ModuleBuilder::new(16);
        b.instr(Op::TypePointer, &[11, 2, 10]);
        assert_eq!(
            Reflection::reflect(&b.build()).unwrap_err(),
            SpirvError::TypeNotFound { id: 10 }
        );
    }

    #[test]
    fn ids_at_or_above_the_bound_are_rejected() {
        let mut b = ModuleBuilder::new(8);
        b.instr(Op::Decorate, &[8, DECORATION_BINDING, 0]);

        assert_eq!(
            Reflection::reflect(&b.build()).unwrap_err(),
            SpirvError::IdOutOfBounds { id: 8, bound: 8 }
        );
    }

    #[test]
    fn reflects_varyings_with_builtins() {
        let mut b = ModuleBuilder::new(32);
        b.name(12, "inPosition");
        b.instr(Op::Decorate, &[12, DECORATION_LOCATION, 0]);
        b.instr(Op::Decorate, &[14, DECORATION_BUILT_IN, 0]);
        b.instr(Op::TypeFloat, &[6, 32]);
        b.instr(Op::TypeVector, &[7, 6, 4]);
        b.instr(Op::TypePointer, &[10, 1, 7]);
        b.instr(Op::TypePointer, &[11, 3, 7]);
        b.instr(Op::Variable, &[10, 12, 1]);
        b.instr(Op::Variable, &[11, 14, 3]);

        let reflection = Reflection::reflect(&b.build()).unwrap();
        let varyings = reflection.varyings();

        assert_eq!(varyings[&12].name.as_deref(), Some("inPosition"));
        assert_eq!(varyings[&12].location, 0);
        assert!(varyings[&12].input);
        assert!(varyings[&12].builtin.is_none());

        assert!(!varyings[&14].input);
        assert_eq!(varyings[&14].builtin, Some(BuiltIn::Position));
    }

    #[test]
    fn execution_modes_stop_after_the_mode_block() {
        let mut b = ModuleBuilder::new(16);
        b.instr(Op::ExecutionMode, &[4, EXECUTION_MODE_LOCAL_SIZE, 8, 4, 1]);
        b.instr(Op::ExecutionMode, &[4, EXECUTION_MODE_EARLY_FRAGMENT_TESTS]);
        // Garbage after the block that would error if scanned: a Decorate
        // with a missing operand.
        b.instr(Op::TypeVoid, &[30]);
        b.instr(Op::Decorate, &[1]);

        let modes = reflect_execution_modes(&b.build()).unwrap();
        assert_eq!(modes.local_size, [8, 4, 1]);
        assert!(modes.early_fragment_tests);
        assert!(!modes.origin_upper_left);
    }
}
