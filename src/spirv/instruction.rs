use {super::SpirvError, half::f16};

/// Numeric id referring to a result, type, or other entity within a module.
pub type SpvId = u32;

/// Decoded SPIR-V opcode.
///
/// Only the opcodes that can appear in the declaration section of a module
/// (before the first `OpFunction`) are named; everything else decodes as
/// [`Op::Unknown`] and is skipped by the reflection passes.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Op {
    Nop,
    Undef,
    SourceContinued,
    Source,
    SourceExtension,
    Name,
    MemberName,
    String,
    Line,
    Extension,
    ExtInstImport,
    ExtInst,
    MemoryModel,
    EntryPoint,
    ExecutionMode,
    Capability,
    TypeVoid,
    TypeBool,
    TypeInt,
    TypeFloat,
    TypeVector,
    TypeMatrix,
    TypeImage,
    TypeSampler,
    TypeSampledImage,
    TypeArray,
    TypeRuntimeArray,
    TypeStruct,
    TypeOpaque,
    TypePointer,
    TypeFunction,
    ConstantTrue,
    ConstantFalse,
    Constant,
    ConstantComposite,
    ConstantSampler,
    ConstantNull,
    SpecConstantTrue,
    SpecConstantFalse,
    SpecConstant,
    SpecConstantComposite,
    SpecConstantOp,
    Function,
    FunctionParameter,
    FunctionEnd,
    FunctionCall,
    Variable,
    Load,
    Store,
    AccessChain,
    Decorate,
    MemberDecorate,
    DecorationGroup,
    GroupDecorate,
    Label,
    Return,
    ReturnValue,
    Unknown(u16),
}

impl Op {
    pub fn from_raw(value: u16) -> Self {
        use Op::*;

        match value {
            0 => Nop,
            1 => Undef,
            2 => SourceContinued,
            3 => Source,
            4 => SourceExtension,
            5 => Name,
            6 => MemberName,
            7 => String,
            8 => Line,
            10 => Extension,
            11 => ExtInstImport,
            12 => ExtInst,
            14 => MemoryModel,
            15 => EntryPoint,
            16 => ExecutionMode,
            17 => Capability,
            19 => TypeVoid,
            20 => TypeBool,
            21 => TypeInt,
            22 => TypeFloat,
            23 => TypeVector,
            24 => TypeMatrix,
            25 => TypeImage,
            26 => TypeSampler,
            27 => TypeSampledImage,
            28 => TypeArray,
            29 => TypeRuntimeArray,
            30 => TypeStruct,
            31 => TypeOpaque,
            32 => TypePointer,
            33 => TypeFunction,
            41 => ConstantTrue,
            42 => ConstantFalse,
            43 => Constant,
            44 => ConstantComposite,
            45 => ConstantSampler,
            46 => ConstantNull,
            48 => SpecConstantTrue,
            49 => SpecConstantFalse,
            50 => SpecConstant,
            51 => SpecConstantComposite,
            52 => SpecConstantOp,
            54 => Function,
            55 => FunctionParameter,
            56 => FunctionEnd,
            57 => FunctionCall,
            59 => Variable,
            61 => Load,
            62 => Store,
            65 => AccessChain,
            71 => Decorate,
            72 => MemberDecorate,
            73 => DecorationGroup,
            74 => GroupDecorate,
            248 => Label,
            253 => Return,
            254 => ReturnValue,
            _ => Unknown(value),
        }
    }

    pub fn as_raw(self) -> u16 {
        use Op::*;

        match self {
            Nop => 0,
            Undef => 1,
            SourceContinued => 2,
            Source => 3,
            SourceExtension => 4,
            Name => 5,
            MemberName => 6,
            String => 7,
            Line => 8,
            Extension => 10,
            ExtInstImport => 11,
            ExtInst => 12,
            MemoryModel => 14,
            EntryPoint => 15,
            ExecutionMode => 16,
            Capability => 17,
            TypeVoid => 19,
            TypeBool => 20,
            TypeInt => 21,
            TypeFloat => 22,
            TypeVector => 23,
            TypeMatrix => 24,
            TypeImage => 25,
            TypeSampler => 26,
            TypeSampledImage => 27,
            TypeArray => 28,
            TypeRuntimeArray => 29,
            TypeStruct => 30,
            TypeOpaque => 31,
            TypePointer => 32,
            TypeFunction => 33,
            ConstantTrue => 41,
            ConstantFalse => 42,
            Constant => 43,
            ConstantComposite => 44,
            ConstantSampler => 45,
            ConstantNull => 46,
            SpecConstantTrue => 48,
            SpecConstantFalse => 49,
            SpecConstant => 50,
            SpecConstantComposite => 51,
            SpecConstantOp => 52,
            Function => 54,
            FunctionParameter => 55,
            FunctionEnd => 56,
            FunctionCall => 57,
            Variable => 59,
            Load => 61,
            Store => 62,
            AccessChain => 65,
            Decorate => 71,
            MemberDecorate => 72,
            DecorationGroup => 73,
            GroupDecorate => 74,
            Label => 248,
            Return => 253,
            ReturnValue => 254,
            Unknown(value) => value,
        }
    }

    /// Whether instructions with this opcode carry a type id word before
    /// their operands.
    ///
    /// `MemberName` is the one oddity: its first word is the id of the
    /// structure type being named, which the decoder exposes as the type id.
    pub fn has_type_id(self) -> bool {
        use Op::*;

        matches!(
            self,
            Undef
                | MemberName
                | ExtInst
                | ConstantTrue
                | ConstantFalse
                | Constant
                | ConstantComposite
                | ConstantSampler
                | ConstantNull
                | SpecConstantTrue
                | SpecConstantFalse
                | SpecConstant
                | SpecConstantComposite
                | SpecConstantOp
                | Variable
                | Load
                | AccessChain
                | Function
                | FunctionParameter
                | FunctionCall
        )
    }

    /// Whether instructions with this opcode carry a result id word before
    /// their operands.
    pub fn has_result_id(self) -> bool {
        use Op::*;

        matches!(
            self,
            Undef
                | String
                | ExtInstImport
                | ExtInst
                | TypeVoid
                | TypeBool
                | TypeInt
                | TypeFloat
                | TypeVector
                | TypeMatrix
                | TypeImage
                | TypeSampler
                | TypeSampledImage
                | TypeArray
                | TypeRuntimeArray
                | TypeStruct
                | TypeOpaque
                | TypePointer
                | TypeFunction
                | ConstantTrue
                | ConstantFalse
                | Constant
                | ConstantComposite
                | ConstantSampler
                | ConstantNull
                | SpecConstantTrue
                | SpecConstantFalse
                | SpecConstant
                | SpecConstantComposite
                | SpecConstantOp
                | Variable
                | Load
                | AccessChain
                | Function
                | FunctionParameter
                | FunctionCall
                | DecorationGroup
                | Label
        )
    }
}

/// One decoded instruction.
///
/// The operand slice borrows the module's word stream; nothing is copied.
#[derive(Clone, Copy, Debug)]
pub struct Instruction<'a> {
    pub opcode: Op,
    pub type_id: Option<SpvId>,
    pub result_id: Option<SpvId>,
    operands: &'a [u32],
    operand_offset: usize,
}

impl<'a> Instruction<'a> {
    pub(super) fn new(
        opcode: Op,
        type_id: Option<SpvId>,
        result_id: Option<SpvId>,
        operands: &'a [u32],
        operand_offset: usize,
    ) -> Self {
        Self {
            opcode,
            type_id,
            result_id,
            operands,
            operand_offset,
        }
    }

    pub fn operand_count(&self) -> usize {
        self.operands.len()
    }

    /// Word offset of operand `offset` within the module; recorded so later
    /// passes can patch literal operands in place.
    pub fn operand_word_offset(&self, offset: usize) -> usize {
        self.operand_offset + offset
    }

    fn operand(&self, offset: usize) -> Result<u32, SpirvError> {
        self.operands
            .get(offset)
            .copied()
            .ok_or(SpirvError::OperandOutOfBounds {
                offset,
                count: self.operands.len(),
            })
    }

    pub fn get_u32(&self, offset: usize) -> Result<u32, SpirvError> {
        self.operand(offset)
    }

    /// Reads two consecutive words as a 64-bit value, high word second.
    pub fn get_u64(&self, offset: usize) -> Result<u64, SpirvError> {
        let lo = self.operand(offset)?;
        let hi = self.operand(offset + 1)?;

        Ok(u64::from(lo) | (u64::from(hi) << 32))
    }

    pub fn get_f16(&self, offset: usize) -> Result<f32, SpirvError> {
        Ok(f16::from_bits(self.operand(offset)? as u16).to_f32())
    }

    pub fn get_f32(&self, offset: usize) -> Result<f32, SpirvError> {
        Ok(f32::from_bits(self.operand(offset)?))
    }

    pub fn get_f64(&self, offset: usize) -> Result<f64, SpirvError> {
        Ok(f64::from_bits(self.get_u64(offset)?))
    }

    /// Reads a NUL-terminated UTF-8 literal starting at operand `offset`.
    pub fn get_string(&self, offset: usize) -> Result<String, SpirvError> {
        if offset >= self.operands.len() {
            return Err(SpirvError::OperandOutOfBounds {
                offset,
                count: self.operands.len(),
            });
        }

        let mut bytes = Vec::new();
        for word in &self.operands[offset..] {
            for byte in word.to_le_bytes() {
                if byte == 0 {
                    return String::from_utf8(bytes)
                        .map_err(|_| SpirvError::InvalidString { offset });
                }

                bytes.push(byte);
            }
        }

        // Ran off the end of the operands without a terminator.
        Err(SpirvError::OperandOutOfBounds {
            offset: self.operands.len(),
            count: self.operands.len(),
        })
    }

    /// Returns the operand offset just past the string starting at `offset`,
    /// scanning four bytes at a time for the terminator.
    pub fn string_end_offset(&self, offset: usize) -> Result<usize, SpirvError> {
        if offset >= self.operands.len() {
            return Err(SpirvError::OperandOutOfBounds {
                offset,
                count: self.operands.len(),
            });
        }

        for (i, word) in self.operands[offset..].iter().enumerate() {
            if word.to_le_bytes().contains(&0) {
                return Ok(offset + i + 1);
            }
        }

        Err(SpirvError::OperandOutOfBounds {
            offset: self.operands.len(),
            count: self.operands.len(),
        })
    }
}
