//! Pipeline-layout signature parsing.
//!
//! A layout signature is a compact string describing every resource slot of
//! a pipeline, e.g. `"cbuffer(SceneState@0):vert:frag, texture(1,2):frag"`.
//! Parsing yields one [`BindingDesc`] per binding item; the optional
//! `:stage` suffix and a group-level `[n]` array suffix back-fill every item
//! of the binding point they follow.

use {
    crate::driver::{DescriptorSetLayoutBinding, DescriptorType, Device, StageFlags},
    bitflags::bitflags,
    std::{
        error::Error,
        fmt::{self, Display, Formatter},
        str::FromStr,
    },
};

bitflags! {
    /// How a resource may be bound.
    pub struct BindFlags: u32 {
        const CONSTANT_BUFFER = 1 << 0;
        const SAMPLED = 1 << 1;
        const STORAGE = 1 << 2;
    }
}

/// Coarse resource classification of a binding slot.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ResourceKind {
    Buffer,
    Texture,
    Sampler,
}

/// One resource slot parsed from a layout signature.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BindingDesc {
    pub name: Option<String>,
    pub kind: ResourceKind,
    pub bind_flags: BindFlags,
    pub slot: u32,
    pub array_size: u32,
    pub stage_flags: StageFlags,
}

impl BindingDesc {
    /// The native descriptor type this slot requires.
    pub fn descriptor_type(&self) -> DescriptorType {
        match self.kind {
            ResourceKind::Sampler => DescriptorType::Sampler,
            ResourceKind::Texture => {
                if self.bind_flags.contains(BindFlags::STORAGE) {
                    DescriptorType::StorageImage
                } else {
                    DescriptorType::SampledImage
                }
            }
            ResourceKind::Buffer => {
                if self.bind_flags.contains(BindFlags::CONSTANT_BUFFER) {
                    DescriptorType::UniformBuffer
                } else if self.bind_flags.contains(BindFlags::STORAGE) {
                    DescriptorType::StorageBuffer
                } else {
                    DescriptorType::UniformTexelBuffer
                }
            }
        }
    }
}

/// Parsed layout signature: the ordered list of binding slots.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LayoutSignature {
    pub bindings: Vec<BindingDesc>,
}

impl LayoutSignature {
    pub fn parse(signature: &str) -> Result<Self, SignatureError> {
        let mut parser = Parser {
            bytes: signature.as_bytes(),
            cursor: 0,
        };

        Ok(Self {
            bindings: parser.parse_signature()?,
        })
    }

    /// Converts the parsed slots into native set-layout bindings.
    pub fn set_layout_bindings<D: Device>(&self) -> Vec<DescriptorSetLayoutBinding<D>> {
        self.bindings
            .iter()
            .map(|binding| DescriptorSetLayoutBinding {
                binding: binding.slot,
                descriptor_type: binding.descriptor_type(),
                descriptor_count: binding.array_size.max(1),
                stage_flags: binding.stage_flags,
                immutable_samplers: Vec::new(),
            })
            .collect()
    }
}

impl FromStr for LayoutSignature {
    type Err = SignatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Errors raised while parsing a layout signature.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SignatureError {
    UnexpectedChar { expected: String, found: u8 },
    UnknownResourceType(String),
    UnknownStage(String),
}

impl Display for SignatureError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedChar { expected, found } => {
                write!(f, "{expected}, but got {}", ascii_name(*found))
            }
            Self::UnknownResourceType(token) => {
                write!(f, "unknown resource type in layout signature: {token}")
            }
            Self::UnknownStage(token) => {
                write!(f, "unknown shader stage in layout signature: {token}")
            }
        }
    }
}

impl Error for SignatureError {}

/// Renders a byte for error messages, naming control characters by their
/// ASCII mnemonic. The end of the input renders as `<NUL>`.
fn ascii_name(c: u8) -> String {
    const NAMES: [&str; 33] = [
        "NUL", "SOH", "STX", "ETX", "EOT", "ENQ", "ACK", "BEL", "BS", "HT", "LF", "VT", "FF",
        "CR", "SO", "SI", "DLE", "DC1", "DC2", "DC3", "DC4", "NAK", "SYN", "ETB", "CAN", "EM",
        "SUB", "ESC", "FS", "GS", "RS", "US", "SP",
    ];

    if (c as usize) < NAMES.len() {
        format!("<{}>", NAMES[c as usize])
    } else if c == 127 {
        "<DEL>".to_owned()
    } else {
        format!("'{}'", c as char)
    }
}

const RESOURCE_TYPES: [(&str, ResourceKind, BindFlags); 6] = [
    ("cbuffer", ResourceKind::Buffer, BindFlags::CONSTANT_BUFFER),
    ("buffer", ResourceKind::Buffer, BindFlags::SAMPLED),
    ("rwbuffer", ResourceKind::Buffer, BindFlags::STORAGE),
    ("texture", ResourceKind::Texture, BindFlags::SAMPLED),
    ("rwtexture", ResourceKind::Texture, BindFlags::STORAGE),
    ("sampler", ResourceKind::Sampler, BindFlags::empty()),
];

const STAGES: [(&str, StageFlags); 6] = [
    ("vert", StageFlags::VERTEX),
    ("tesc", StageFlags::TESSELLATION_CONTROL),
    ("tese", StageFlags::TESSELLATION_EVALUATION),
    ("geom", StageFlags::GEOMETRY),
    ("frag", StageFlags::FRAGMENT),
    ("comp", StageFlags::COMPUTE),
];

struct Parser<'a> {
    bytes: &'a [u8],
    cursor: usize,
}

impl Parser<'_> {
    /// Current byte, or NUL once the input is exhausted.
    fn peek(&self) -> u8 {
        self.bytes.get(self.cursor).copied().unwrap_or(0)
    }

    fn bump(&mut self) {
        self.cursor += 1;
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_ascii_whitespace() {
            self.bump();
        }
    }

    fn unexpected(&self, expected: impl Into<String>) -> SignatureError {
        SignatureError::UnexpectedChar {
            expected: expected.into(),
            found: self.peek(),
        }
    }

    fn accept(&mut self, c: u8) -> Result<(), SignatureError> {
        self.accept_or(c, format!("expected character {}", ascii_name(c)))
    }

    fn accept_or(&mut self, c: u8, err: impl Into<String>) -> Result<(), SignatureError> {
        if self.peek() == c {
            self.bump();
            Ok(())
        } else {
            Err(self.unexpected(err))
        }
    }

    fn parse_alphabetic(&mut self) -> &str {
        let start = self.cursor;
        while self.peek().is_ascii_alphabetic() {
            self.bump();
        }

        // The run is ASCII, checked byte by byte.
        std::str::from_utf8(&self.bytes[start..self.cursor]).unwrap()
    }

    fn parse_u32(&mut self) -> Result<u32, SignatureError> {
        self.skip_whitespace();

        if !self.peek().is_ascii_digit() {
            return Err(self.unexpected("expected numeric character"));
        }

        let mut num = 0u32;
        while self.peek().is_ascii_digit() {
            num = num * 10 + u32::from(self.peek() - b'0');
            self.bump();
        }

        Ok(num)
    }

    fn parse_resource_type(&mut self) -> Result<(ResourceKind, BindFlags), SignatureError> {
        self.skip_whitespace();

        let token = self.parse_alphabetic();
        if token.is_empty() {
            return Err(self.unexpected("expected resource type identifier"));
        }

        for (ident, kind, bind_flags) in RESOURCE_TYPES {
            if ident == token {
                return Ok((kind, bind_flags));
            }
        }

        Err(SignatureError::UnknownResourceType(token.to_owned()))
    }

    fn parse_stage_flag(&mut self) -> Result<StageFlags, SignatureError> {
        self.skip_whitespace();

        let token = self.parse_alphabetic();
        if token.is_empty() {
            return Err(self.unexpected("expected shader stage identifier"));
        }

        for (ident, flag) in STAGES {
            if ident == token {
                return Ok(flag);
            }
        }

        Err(SignatureError::UnknownStage(token.to_owned()))
    }

    /// Parses the `:stage` suffix list, e.g. `":vert:frag"`.
    fn parse_stage_flags(&mut self) -> Result<StageFlags, SignatureError> {
        let mut flags = StageFlags::empty();
        while self.peek() == b':' {
            self.bump();
            flags |= self.parse_stage_flag()?;
            self.skip_whitespace();
        }

        Ok(flags)
    }

    /// Parses one binding-point expression, e.g. `"texture(base@1[2],3):frag"`.
    fn parse_binding_point(
        &mut self,
        bindings: &mut Vec<BindingDesc>,
    ) -> Result<(), SignatureError> {
        let (kind, bind_flags) = self.parse_resource_type()?;

        self.skip_whitespace();
        self.accept_or(b'(', "expected open bracket '(' after resource type")?;

        let first_binding = bindings.len();
        let mut explicit_sizes = Vec::new();

        loop {
            self.skip_whitespace();

            // Optional name followed by '@'.
            let mut name = None;
            if self.peek().is_ascii_alphabetic() || self.peek() == b'_' {
                let start = self.cursor;
                while self.peek().is_ascii_alphanumeric() || self.peek() == b'_' {
                    self.bump();
                }
                name = Some(
                    std::str::from_utf8(&self.bytes[start..self.cursor])
                        .unwrap()
                        .to_owned(),
                );
                self.skip_whitespace();
                self.accept(b'@')?;
            }

            let slot = self.parse_u32()?;
            self.skip_whitespace();

            // Optional per-item array size.
            let mut array_size = 1;
            let explicit = self.peek() == b'[';
            if explicit {
                self.bump();
                array_size = self.parse_u32()?;
                self.skip_whitespace();
                self.accept(b']')?;
                self.skip_whitespace();
            }

            explicit_sizes.push(explicit);
            bindings.push(BindingDesc {
                name,
                kind,
                bind_flags,
                slot,
                array_size,
                stage_flags: StageFlags::all(),
            });

            if self.peek() == b',' {
                self.bump();
            } else {
                break;
            }
        }

        self.accept_or(b')', "expected close bracket ')' after slot indices")?;
        self.skip_whitespace();

        // Group-level array size back-fills items without their own.
        if self.peek() == b'[' {
            self.bump();
            let group_size = self.parse_u32()?;
            self.skip_whitespace();
            self.accept(b']')?;
            self.skip_whitespace();

            for (binding, explicit) in bindings[first_binding..].iter_mut().zip(&explicit_sizes) {
                if !explicit {
                    binding.array_size = group_size;
                }
            }
        }

        // Stage suffix back-fills every binding of this group.
        if self.peek() == b':' {
            let stage_flags = self.parse_stage_flags()?;
            for binding in &mut bindings[first_binding..] {
                binding.stage_flags = stage_flags;
            }
        }

        Ok(())
    }

    fn parse_signature(&mut self) -> Result<Vec<BindingDesc>, SignatureError> {
        let mut bindings = Vec::new();

        while self.peek() != 0 {
            self.parse_binding_point(&mut bindings)?;

            // If there is no comma, the signature must end.
            if self.peek() == b',' {
                self.bump();
            } else {
                self.skip_whitespace();
                if self.peek() != 0 {
                    return Err(
                        self.unexpected("expected comma separator ',' after binding point")
                    );
                }
            }
        }

        Ok(bindings)
    }
}
