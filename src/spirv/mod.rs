//! SPIR-V consumption: binary decoding and shader reflection.
//!
//! This crate never produces SPIR-V; modules are walked once to extract the
//! binding, type, and varying information the descriptor machinery needs,
//! plus the word offsets required to patch binding slots for pipeline-layout
//! permutations.

mod instruction;
mod reflect;

pub use self::{
    instruction::{Instruction, Op, SpvId},
    reflect::{
        patch_slots, reflect_execution_modes, BuiltIn, ExecutionModes, ReflectedBinding,
        Reflection, SlotPatch, SpvConstant, SpvType, SpvUniform, SpvValue, SpvVarying,
        StorageClass,
    },
};

use std::{
    error::Error,
    fmt::{self, Display, Formatter},
};

/// First word of every SPIR-V module.
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Number of words in the module header.
pub const HEADER_WORDS: usize = 5;

/// Decoded module header.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Header {
    pub magic: u32,
    pub version: u32,
    pub generator: u32,
    pub bound: u32,
    pub schema: u32,
}

/// Errors raised while decoding or reflecting a module.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SpirvError {
    /// Byte length is not a multiple of four or too short for a header.
    InvalidSize { len: usize },
    InvalidMagic { expected: u32, found: u32 },
    /// An instruction declared a zero word count.
    InvalidWordCount { word_offset: usize },
    /// An instruction ran past the end of the module.
    Truncated { word_offset: usize },
    OperandOutOfBounds { offset: usize, count: usize },
    /// A string literal held invalid UTF-8.
    InvalidString { offset: usize },
    /// An id at or above the header's id bound.
    IdOutOfBounds { id: SpvId, bound: u32 },
    /// A type reference before the `OpType*` instruction that declares it.
    TypeNotFound { id: SpvId },
    /// An array length reference before the `OpConstant` that declares it.
    ConstantNotFound { id: SpvId },
}

impl Display for SpirvError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSize { len } => {
                write!(f, "invalid SPIR-V module size: {len} bytes")
            }
            Self::InvalidMagic { expected, found } => write!(
                f,
                "invalid SPIR-V magic number: expected 0x{expected:08x}, found 0x{found:08x}"
            ),
            Self::InvalidWordCount { word_offset } => {
                write!(f, "SPIR-V instruction at word {word_offset} has zero word count")
            }
            Self::Truncated { word_offset } => write!(
                f,
                "SPIR-V instruction at word {word_offset} extends past the end of the module"
            ),
            Self::OperandOutOfBounds { offset, count } => write!(
                f,
                "SPIR-V operand offset {offset} out of bounds for instruction with {count} operands"
            ),
            Self::InvalidString { offset } => {
                write!(f, "SPIR-V string literal at operand {offset} is not valid UTF-8")
            }
            Self::IdOutOfBounds { id, bound } => {
                write!(f, "SPIR-V id %{id} exceeds module id bound {bound}")
            }
            Self::TypeNotFound { id } => {
                write!(f, "cannot find SPIR-V OpType* instruction with result id %{id}")
            }
            Self::ConstantNotFound { id } => {
                write!(f, "cannot find SPIR-V OpConstant instruction with result id %{id}")
            }
        }
    }
}

impl Error for SpirvError {}

/// An owned, word-aligned SPIR-V module.
///
/// Construction validates the byte length and the magic number; instruction
/// records handed out by [`instructions`](Self::instructions) borrow the word
/// stream and must not outlive it.
#[derive(Clone, Debug)]
pub struct Module {
    words: Vec<u32>,
}

impl Module {
    pub fn new(bytes: &[u8]) -> Result<Self, SpirvError> {
        if bytes.len() % 4 != 0 || bytes.len() < HEADER_WORDS * 4 {
            return Err(SpirvError::InvalidSize { len: bytes.len() });
        }

        let words = bytes
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();

        Self::from_words(words)
    }

    pub fn from_words(words: Vec<u32>) -> Result<Self, SpirvError> {
        if words.len() < HEADER_WORDS {
            return Err(SpirvError::InvalidSize { len: words.len() * 4 });
        }

        if words[0] != SPIRV_MAGIC {
            return Err(SpirvError::InvalidMagic {
                expected: SPIRV_MAGIC,
                found: words[0],
            });
        }

        Ok(Self { words })
    }

    pub fn header(&self) -> Header {
        Header {
            magic: self.words[0],
            version: self.words[1],
            generator: self.words[2],
            bound: self.words[3],
            schema: self.words[4],
        }
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    pub fn into_words(self) -> Vec<u32> {
        self.words
    }

    /// Iterates the instruction stream following the header. Items are
    /// `Err` exactly when the stream itself is malformed; iteration stops
    /// after the first error.
    pub fn instructions(&self) -> Instructions<'_> {
        Instructions {
            words: &self.words,
            cursor: HEADER_WORDS,
            failed: false,
        }
    }
}

/// Iterator over the instructions of a [`Module`].
#[derive(Debug)]
pub struct Instructions<'a> {
    words: &'a [u32],
    cursor: usize,
    failed: bool,
}

impl<'a> Iterator for Instructions<'a> {
    type Item = Result<Instruction<'a>, SpirvError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.cursor >= self.words.len() {
            return None;
        }

        let word_offset = self.cursor;
        let word = self.words[word_offset];
        let word_count = (word >> 16) as usize;
        let opcode = Op::from_raw(word as u16);

        if word_count == 0 {
            self.failed = true;
            return Some(Err(SpirvError::InvalidWordCount { word_offset }));
        }

        if word_offset + word_count > self.words.len() {
            self.failed = true;
            return Some(Err(SpirvError::Truncated { word_offset }));
        }

        self.cursor += word_count;

        let mut offset = word_offset + 1;
        let end = word_offset + word_count;

        let type_id = if opcode.has_type_id() && offset < end {
            let id = self.words[offset];
            offset += 1;
            Some(id)
        } else {
            None
        };
        let result_id = if opcode.has_result_id() && offset < end {
            let id = self.words[offset];
            offset += 1;
            Some(id)
        } else {
            None
        };

        Some(Ok(Instruction::new(
            opcode,
            type_id,
            result_id,
            &self.words[offset..end],
            offset,
        )))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn module_bytes(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|word| word.to_le_bytes()).collect()
    }

    fn instr(word_count: u16, op: Op) -> u32 {
        (u32::from(word_count) << 16) | u32::from(op.as_raw())
    }

    // Header + OpTypeVoid + OpFunction + OpFunctionEnd.
    fn minimal_module() -> Vec<u32> {
        vec![
            SPIRV_MAGIC,
            0x0001_0000,
            8,
            100,
            0,
            instr(2, Op::TypeVoid),
            2,
            instr(5, Op::Function),
            2,
            3,
            0,
            33,
            instr(1, Op::FunctionEnd),
        ]
    }

    #[test]
    fn parses_header_and_instructions_in_order() {
        let module = Module::new(&module_bytes(&minimal_module())).unwrap();

        let header = module.header();
        assert_eq!(header.magic, SPIRV_MAGIC);
        assert_eq!(header.version, 0x0001_0000);
        assert_eq!(header.generator, 8);
        assert_eq!(header.bound, 100);
        assert_eq!(header.schema, 0);

        let ops = module
            .instructions()
            .map(|instr| instr.unwrap().opcode)
            .collect::<Vec<_>>();
        assert_eq!(ops, [Op::TypeVoid, Op::Function, Op::FunctionEnd]);
    }

    #[test]
    fn type_and_result_ids_split_from_operands() {
        let module = Module::new(&module_bytes(&minimal_module())).unwrap();
        let function = module.instructions().nth(1).unwrap().unwrap();

        assert_eq!(function.opcode, Op::Function);
        assert_eq!(function.type_id, Some(2));
        assert_eq!(function.result_id, Some(3));
        assert_eq!(function.operand_count(), 2);
        assert_eq!(function.get_u32(0).unwrap(), 0);
        assert_eq!(function.get_u32(1).unwrap(), 33);
    }

    #[test]
    fn rejects_bad_magic_before_any_instruction() {
        let mut words = minimal_module();
        words[0] = 0xdead_beef;

        match Module::new(&module_bytes(&words)) {
            Err(SpirvError::InvalidMagic { expected, found }) => {
                assert_eq!(expected, SPIRV_MAGIC);
                assert_eq!(found, 0xdead_beef);
            }
            other => panic!("expected InvalidMagic, got {other:?}"),
        }
    }

    #[test]
    fn rejects_unaligned_and_short_buffers() {
        assert!(matches!(
            Module::new(&[0u8; 21]),
            Err(SpirvError::InvalidSize { len: 21 })
        ));

        assert!(matches!(
            Module::new(&[0u8; 16]),
            Err(SpirvError::InvalidSize { len: 16 })
        ));
    }

    #[test]
    fn operand_accessors_reject_out_of_range_offsets() {
        let module = Module::new(&module_bytes(&minimal_module())).unwrap();
        let function = module.instructions().nth(1).unwrap().unwrap();
        let count = function.operand_count();

        for offset in [count, count + 1, count + 100] {
            assert!(matches!(
                function.get_u32(offset),
                Err(SpirvError::OperandOutOfBounds { .. })
            ));
            assert!(matches!(
                function.get_u64(offset),
                Err(SpirvError::OperandOutOfBounds { .. })
            ));
            assert!(matches!(
                function.get_f16(offset),
                Err(SpirvError::OperandOutOfBounds { .. })
            ));
            assert!(matches!(
                function.get_f32(offset),
                Err(SpirvError::OperandOutOfBounds { .. })
            ));
            assert!(matches!(
                function.get_f64(offset),
                Err(SpirvError::OperandOutOfBounds { .. })
            ));
            assert!(matches!(
                function.get_string(offset),
                Err(SpirvError::OperandOutOfBounds { .. })
            ));
            assert!(matches!(
                function.string_end_offset(offset),
                Err(SpirvError::OperandOutOfBounds { .. })
            ));
        }

        // u64 reads straddling the end are also rejected.
        assert!(matches!(
            function.get_u64(count - 1),
            Err(SpirvError::OperandOutOfBounds { .. })
        ));
    }

    #[test]
    fn string_operands_round_trip() {
        // OpName %7 "main"
        let mut words = vec![SPIRV_MAGIC, 0x0001_0000, 0, 10, 0];
        words.push(instr(4, Op::Name));
        words.push(7);
        words.extend([
            u32::from_le_bytes(*b"main"),
            u32::from_le_bytes([0, 0, 0, 0]),
        ]);

        let module = Module::from_words(words).unwrap();
        let name = module.instructions().next().unwrap().unwrap();

        assert_eq!(name.opcode, Op::Name);
        assert_eq!(name.get_u32(0).unwrap(), 7);
        assert_eq!(name.get_string(1).unwrap(), "main");
        assert_eq!(name.string_end_offset(1).unwrap(), 3);
    }

    #[test]
    fn truncated_instruction_is_an_error() {
        let mut words = minimal_module();
        let last = words.len() - 1;
        words[last] = instr(9, Op::FunctionEnd);

        let module = Module::from_words(words).unwrap();
        let results = module.instructions().collect::<Vec<_>>();

        assert!(results[0].is_ok());
        assert!(results[1].is_ok());
        assert!(matches!(results[2], Err(SpirvError::Truncated { .. })));
        assert_eq!(results.len(), 3);
    }
}
