//! Signature blobs: type, method and field signatures plus parameter default constants.
//!
//! Signatures are stored in the `#Blob` heap using the ECMA-335 element type encoding. Type
//! references inside a signature are kept as [`Token`]s local to the module they were read from;
//! [`TypeSignature::render`] turns them into full type names (`System.Int32`, `Game.Items.Sword`)
//! so shapes can be compared across modules.
//!
//! # Examples
//!
//! ```rust
//! use modcompat::module::{MethodSignature, TypeSignature};
//!
//! let blob = [0x20, 0x02, 0x01, 0x08, 0x0E];
//! let signature = MethodSignature::parse(&blob)?;
//! assert!(signature.has_this);
//! assert_eq!(signature.params, vec![TypeSignature::I4, TypeSignature::String]);
//! assert_eq!(signature.encode()?, blob);
//! # Ok::<(), modcompat::Error>(())
//! ```

use crate::{
    file::{
        io::{write_compressed_uint, write_le},
        parser::Parser,
    },
    module::{TableId, Token},
    Error::RecursionLimit,
    Result,
};

/// Maximum nesting depth of array element types
const MAX_RECURSION_DEPTH: usize = 50;

#[allow(non_snake_case, dead_code, missing_docs)]
/// Element type bytes used in signature and constant blobs
pub mod ELEMENT_TYPE {
    pub const VOID: u8 = 0x01;
    pub const BOOLEAN: u8 = 0x02;
    pub const CHAR: u8 = 0x03;
    pub const I1: u8 = 0x04;
    pub const U1: u8 = 0x05;
    pub const I2: u8 = 0x06;
    pub const U2: u8 = 0x07;
    pub const I4: u8 = 0x08;
    pub const U4: u8 = 0x09;
    pub const I8: u8 = 0x0a;
    pub const U8: u8 = 0x0b;
    pub const R4: u8 = 0x0c;
    pub const R8: u8 = 0x0d;
    pub const STRING: u8 = 0x0e;
    pub const VALUETYPE: u8 = 0x11;
    pub const CLASS: u8 = 0x12;
    pub const OBJECT: u8 = 0x1c;
    pub const SZARRAY: u8 = 0x1d;
}

#[allow(non_snake_case, dead_code, missing_docs)]
/// Leading bytes of method and field signatures
pub mod SIGNATURE_HEADER {
    pub const DEFAULT: u8 = 0x00;
    pub const FIELD: u8 = 0x06;
    pub const HASTHIS: u8 = 0x20;
}

/// The type of a field, parameter or return value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeSignature {
    /// void
    Void,
    /// bool
    Boolean,
    /// char
    Char,
    /// signed 8bit integer
    I1,
    /// unsigned 8bit integer
    U1,
    /// signed 16bit integer
    I2,
    /// unsigned 16bit integer
    U2,
    /// signed 32bit integer
    I4,
    /// unsigned 32bit integer
    U4,
    /// signed 64bit integer
    I8,
    /// unsigned 64bit integer
    U8,
    /// 32bit floating-point
    R4,
    /// 64bit floating-point
    R8,
    /// System.String
    String,
    /// System.Object
    Object,
    /// A value type declared or referenced by the module
    ValueType(Token),
    /// A class declared or referenced by the module
    Class(Token),
    /// Single dimension, zero based array
    SzArray(Box<TypeSignature>),
}

impl TypeSignature {
    /// Returns the token of the named type this signature refers to, if any.
    #[must_use]
    pub fn type_token(&self) -> Option<Token> {
        match self {
            TypeSignature::ValueType(token) | TypeSignature::Class(token) => Some(*token),
            TypeSignature::SzArray(element) => element.type_token(),
            _ => None,
        }
    }

    /// Full name of a primitive, `None` for named and array types.
    #[must_use]
    pub fn primitive_name(&self) -> Option<&'static str> {
        Some(match self {
            TypeSignature::Void => "System.Void",
            TypeSignature::Boolean => "System.Boolean",
            TypeSignature::Char => "System.Char",
            TypeSignature::I1 => "System.SByte",
            TypeSignature::U1 => "System.Byte",
            TypeSignature::I2 => "System.Int16",
            TypeSignature::U2 => "System.UInt16",
            TypeSignature::I4 => "System.Int32",
            TypeSignature::U4 => "System.UInt32",
            TypeSignature::I8 => "System.Int64",
            TypeSignature::U8 => "System.UInt64",
            TypeSignature::R4 => "System.Single",
            TypeSignature::R8 => "System.Double",
            TypeSignature::String => "System.String",
            TypeSignature::Object => "System.Object",
            _ => return None,
        })
    }

    /// Render the full type name, resolving named types through `resolve`.
    ///
    /// Tokens that `resolve` cannot name are rendered as `<token>`, which never compares equal
    /// to a real type name.
    pub fn render(&self, resolve: &dyn Fn(Token) -> Option<String>) -> String {
        if let Some(name) = self.primitive_name() {
            return name.to_string();
        }

        match self {
            TypeSignature::ValueType(token) | TypeSignature::Class(token) => {
                resolve(*token).unwrap_or_else(|| format!("<{token}>"))
            }
            TypeSignature::SzArray(element) => format!("{}[]", element.render(resolve)),
            _ => String::new(),
        }
    }

    /// Returns `true` for `void`.
    #[must_use]
    pub fn is_void(&self) -> bool {
        matches!(self, TypeSignature::Void)
    }

    /// Apply `map` to every type token in the signature.
    pub fn map_tokens(&self, map: &mut dyn FnMut(Token) -> Token) -> TypeSignature {
        match self {
            TypeSignature::ValueType(token) => TypeSignature::ValueType(map(*token)),
            TypeSignature::Class(token) => TypeSignature::Class(map(*token)),
            TypeSignature::SzArray(element) => {
                TypeSignature::SzArray(Box::new(element.map_tokens(map)))
            }
            other => other.clone(),
        }
    }
}

/// Signature of a method definition or method reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodSignature {
    /// The method has an implicit `this` argument
    pub has_this: bool,
    /// The return type
    pub return_type: TypeSignature,
    /// The parameter types, in order
    pub params: Vec<TypeSignature>,
}

impl MethodSignature {
    /// Signature of an instance method.
    #[must_use]
    pub fn instance(return_type: TypeSignature, params: Vec<TypeSignature>) -> Self {
        MethodSignature {
            has_this: true,
            return_type,
            params,
        }
    }

    /// Signature of a static method.
    #[must_use]
    pub fn static_method(return_type: TypeSignature, params: Vec<TypeSignature>) -> Self {
        MethodSignature {
            has_this: false,
            return_type,
            params,
        }
    }

    /// Parse a method signature blob.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for an unknown calling convention or element type.
    pub fn parse(data: &[u8]) -> Result<Self> {
        SignatureParser::new(data).parse_method_signature()
    }

    /// Encode into a signature blob.
    ///
    /// # Errors
    /// Returns an error if a parameter count or token exceeds the compressed encoding.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::with_capacity(4 + self.params.len());
        buffer.push(if self.has_this {
            SIGNATURE_HEADER::HASTHIS
        } else {
            SIGNATURE_HEADER::DEFAULT
        });
        write_compressed_uint(self.params.len() as u32, &mut buffer)?;
        encode_type(&self.return_type, &mut buffer)?;
        for param in &self.params {
            encode_type(param, &mut buffer)?;
        }
        Ok(buffer)
    }

    /// Number of values a call consumes from the evaluation stack, `this` included.
    #[must_use]
    pub fn stack_inputs(&self) -> usize {
        self.params.len() + usize::from(self.has_this)
    }
}

/// Signature of a field definition or field reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldSignature {
    /// The type of the field
    pub field_type: TypeSignature,
}

impl FieldSignature {
    /// Create a field signature of `field_type`.
    #[must_use]
    pub fn new(field_type: TypeSignature) -> Self {
        FieldSignature { field_type }
    }

    /// Parse a field signature blob.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the blob does not start with the field header.
    pub fn parse(data: &[u8]) -> Result<Self> {
        SignatureParser::new(data).parse_field_signature()
    }

    /// Encode into a signature blob.
    ///
    /// # Errors
    /// Returns an error if a token exceeds the compressed encoding.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buffer = vec![SIGNATURE_HEADER::FIELD];
        encode_type(&self.field_type, &mut buffer)?;
        Ok(buffer)
    }
}

/// Signature of a member reference; the leading byte tells fields and methods apart.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MemberSignature {
    /// A field reference
    Field(FieldSignature),
    /// A method reference
    Method(MethodSignature),
}

impl MemberSignature {
    /// Parse a member reference signature blob.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for invalid blobs.
    pub fn parse(data: &[u8]) -> Result<Self> {
        match data.first() {
            Some(&SIGNATURE_HEADER::FIELD) => Ok(MemberSignature::Field(FieldSignature::parse(data)?)),
            Some(_) => Ok(MemberSignature::Method(MethodSignature::parse(data)?)),
            None => Err(malformed_error!("Empty member signature")),
        }
    }

    /// Encode into a signature blob.
    ///
    /// # Errors
    /// Returns an error if a count or token exceeds the compressed encoding.
    pub fn encode(&self) -> Result<Vec<u8>> {
        match self {
            MemberSignature::Field(field) => field.encode(),
            MemberSignature::Method(method) => method.encode(),
        }
    }

    /// Returns `true` for field signatures.
    #[must_use]
    pub fn is_field(&self) -> bool {
        matches!(self, MemberSignature::Field(_))
    }
}

/// A compile-time constant, used for parameter default values.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    /// bool
    Boolean(bool),
    /// char (UTF-16 code unit)
    Char(u16),
    /// signed 8bit integer
    I1(i8),
    /// unsigned 8bit integer
    U1(u8),
    /// signed 16bit integer
    I2(i16),
    /// unsigned 16bit integer
    U2(u16),
    /// signed 32bit integer
    I4(i32),
    /// unsigned 32bit integer
    U4(u32),
    /// signed 64bit integer
    I8(i64),
    /// unsigned 64bit integer
    U8(u64),
    /// 32bit floating-point
    R4(f32),
    /// 64bit floating-point
    R8(f64),
    /// A string literal
    String(String),
    /// The null reference
    Null,
}

impl Constant {
    /// Parse a constant blob.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for unsupported element types or truncated values.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut parser = Parser::new(data);
        let element = parser.read_le::<u8>()?;

        let constant = match element {
            ELEMENT_TYPE::BOOLEAN => Constant::Boolean(parser.read_le::<u8>()? != 0),
            ELEMENT_TYPE::CHAR => Constant::Char(parser.read_le::<u16>()?),
            ELEMENT_TYPE::I1 => Constant::I1(parser.read_le::<i8>()?),
            ELEMENT_TYPE::U1 => Constant::U1(parser.read_le::<u8>()?),
            ELEMENT_TYPE::I2 => Constant::I2(parser.read_le::<i16>()?),
            ELEMENT_TYPE::U2 => Constant::U2(parser.read_le::<u16>()?),
            ELEMENT_TYPE::I4 => Constant::I4(parser.read_le::<i32>()?),
            ELEMENT_TYPE::U4 => Constant::U4(parser.read_le::<u32>()?),
            ELEMENT_TYPE::I8 => Constant::I8(parser.read_le::<i64>()?),
            ELEMENT_TYPE::U8 => Constant::U8(parser.read_le::<u64>()?),
            ELEMENT_TYPE::R4 => Constant::R4(parser.read_le::<f32>()?),
            ELEMENT_TYPE::R8 => Constant::R8(parser.read_le::<f64>()?),
            ELEMENT_TYPE::STRING => Constant::String(parser.read_compressed_string_utf8()?),
            ELEMENT_TYPE::CLASS => {
                let value = parser.read_le::<u32>()?;
                if value != 0 {
                    return Err(malformed_error!(
                        "Class constant must be null, found {:#x}",
                        value
                    ));
                }
                Constant::Null
            }
            _ => {
                return Err(malformed_error!(
                    "Unsupported constant element type - {:#04x}",
                    element
                ))
            }
        };

        if parser.has_more_data() {
            return Err(malformed_error!("Trailing bytes after constant value"));
        }

        Ok(constant)
    }

    /// Encode into a constant blob.
    ///
    /// # Errors
    /// Returns an error if a string constant exceeds the compressed length encoding.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::with_capacity(9);
        match self {
            Constant::Boolean(value) => {
                buffer.push(ELEMENT_TYPE::BOOLEAN);
                buffer.push(u8::from(*value));
            }
            Constant::Char(value) => {
                buffer.push(ELEMENT_TYPE::CHAR);
                write_le(&mut buffer, *value);
            }
            Constant::I1(value) => {
                buffer.push(ELEMENT_TYPE::I1);
                write_le(&mut buffer, *value);
            }
            Constant::U1(value) => {
                buffer.push(ELEMENT_TYPE::U1);
                write_le(&mut buffer, *value);
            }
            Constant::I2(value) => {
                buffer.push(ELEMENT_TYPE::I2);
                write_le(&mut buffer, *value);
            }
            Constant::U2(value) => {
                buffer.push(ELEMENT_TYPE::U2);
                write_le(&mut buffer, *value);
            }
            Constant::I4(value) => {
                buffer.push(ELEMENT_TYPE::I4);
                write_le(&mut buffer, *value);
            }
            Constant::U4(value) => {
                buffer.push(ELEMENT_TYPE::U4);
                write_le(&mut buffer, *value);
            }
            Constant::I8(value) => {
                buffer.push(ELEMENT_TYPE::I8);
                write_le(&mut buffer, *value);
            }
            Constant::U8(value) => {
                buffer.push(ELEMENT_TYPE::U8);
                write_le(&mut buffer, *value);
            }
            Constant::R4(value) => {
                buffer.push(ELEMENT_TYPE::R4);
                write_le(&mut buffer, *value);
            }
            Constant::R8(value) => {
                buffer.push(ELEMENT_TYPE::R8);
                write_le(&mut buffer, *value);
            }
            Constant::String(value) => {
                buffer.push(ELEMENT_TYPE::STRING);
                write_compressed_uint(value.len() as u32, &mut buffer)?;
                buffer.extend_from_slice(value.as_bytes());
            }
            Constant::Null => {
                buffer.push(ELEMENT_TYPE::CLASS);
                write_le(&mut buffer, 0u32);
            }
        }
        Ok(buffer)
    }

    /// Returns `true` if the constant can be passed for a parameter of type `param`.
    #[must_use]
    pub fn fits(&self, param: &TypeSignature) -> bool {
        match self {
            Constant::Boolean(_) => *param == TypeSignature::Boolean,
            Constant::Char(_) => *param == TypeSignature::Char,
            Constant::I1(_) => *param == TypeSignature::I1,
            Constant::U1(_) => *param == TypeSignature::U1,
            Constant::I2(_) => *param == TypeSignature::I2,
            Constant::U2(_) => *param == TypeSignature::U2,
            Constant::I4(_) => *param == TypeSignature::I4,
            Constant::U4(_) => *param == TypeSignature::U4,
            Constant::I8(_) => *param == TypeSignature::I8,
            Constant::U8(_) => *param == TypeSignature::U8,
            Constant::R4(_) => *param == TypeSignature::R4,
            Constant::R8(_) => *param == TypeSignature::R8,
            Constant::String(_) => *param == TypeSignature::String,
            Constant::Null => matches!(
                param,
                TypeSignature::String
                    | TypeSignature::Object
                    | TypeSignature::Class(_)
                    | TypeSignature::SzArray(_)
            ),
        }
    }
}

/// Signature parser for the subset of ECMA-335 signatures the module format uses.
pub struct SignatureParser<'a> {
    parser: Parser<'a>,
    depth: usize,
}

impl<'a> SignatureParser<'a> {
    /// Create a new `SignatureParser` from a byte slice
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        SignatureParser {
            parser: Parser::new(data),
            depth: 0,
        }
    }

    /// Parse a single type from the signature blob
    fn parse_type(&mut self) -> Result<TypeSignature> {
        self.depth += 1;
        if self.depth >= MAX_RECURSION_DEPTH {
            return Err(RecursionLimit(MAX_RECURSION_DEPTH));
        }

        let current_byte = self.parser.read_le::<u8>()?;
        let result = match current_byte {
            ELEMENT_TYPE::VOID => TypeSignature::Void,
            ELEMENT_TYPE::BOOLEAN => TypeSignature::Boolean,
            ELEMENT_TYPE::CHAR => TypeSignature::Char,
            ELEMENT_TYPE::I1 => TypeSignature::I1,
            ELEMENT_TYPE::U1 => TypeSignature::U1,
            ELEMENT_TYPE::I2 => TypeSignature::I2,
            ELEMENT_TYPE::U2 => TypeSignature::U2,
            ELEMENT_TYPE::I4 => TypeSignature::I4,
            ELEMENT_TYPE::U4 => TypeSignature::U4,
            ELEMENT_TYPE::I8 => TypeSignature::I8,
            ELEMENT_TYPE::U8 => TypeSignature::U8,
            ELEMENT_TYPE::R4 => TypeSignature::R4,
            ELEMENT_TYPE::R8 => TypeSignature::R8,
            ELEMENT_TYPE::STRING => TypeSignature::String,
            ELEMENT_TYPE::OBJECT => TypeSignature::Object,
            ELEMENT_TYPE::VALUETYPE => {
                TypeSignature::ValueType(self.parser.read_compressed_token()?)
            }
            ELEMENT_TYPE::CLASS => TypeSignature::Class(self.parser.read_compressed_token()?),
            ELEMENT_TYPE::SZARRAY => TypeSignature::SzArray(Box::new(self.parse_type()?)),
            _ => {
                return Err(malformed_error!(
                    "Unsupported ELEMENT_TYPE - {}",
                    current_byte
                ))
            }
        };

        self.depth -= 1;
        Ok(result)
    }

    /// Parse a method signature from the blob
    ///
    /// # Errors
    /// Returns an error for unsupported calling conventions, element types or truncated data.
    pub fn parse_method_signature(&mut self) -> Result<MethodSignature> {
        let convention = self.parser.read_le::<u8>()?;
        let has_this = match convention {
            SIGNATURE_HEADER::DEFAULT => false,
            SIGNATURE_HEADER::HASTHIS => true,
            _ => {
                return Err(malformed_error!(
                    "Unsupported calling convention - {:#04x}",
                    convention
                ))
            }
        };

        let param_count = self.parser.read_compressed_uint()?;
        let return_type = self.parse_type()?;

        let mut params = Vec::with_capacity(param_count.min(64) as usize);
        for _ in 0..param_count {
            let param = self.parse_type()?;
            if param.is_void() {
                return Err(malformed_error!("Parameter of type void"));
            }
            params.push(param);
        }

        self.expect_end()?;
        Ok(MethodSignature {
            has_this,
            return_type,
            params,
        })
    }

    /// Parse a field signature from the blob
    ///
    /// # Errors
    /// Returns an error if the header byte is not the field header or the type is invalid.
    pub fn parse_field_signature(&mut self) -> Result<FieldSignature> {
        let head_byte = self.parser.read_le::<u8>()?;
        if head_byte != SIGNATURE_HEADER::FIELD {
            return Err(malformed_error!(
                "SignatureField - invalid start - {}",
                head_byte
            ));
        }

        let field_type = self.parse_type()?;
        if field_type.is_void() {
            return Err(malformed_error!("Field of type void"));
        }

        self.expect_end()?;
        Ok(FieldSignature { field_type })
    }

    fn expect_end(&self) -> Result<()> {
        if self.parser.has_more_data() {
            return Err(malformed_error!(
                "Trailing bytes in signature at offset {}",
                self.parser.pos()
            ));
        }
        Ok(())
    }
}

/// Encode a single type into `buffer`.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if a named type token does not point at a TypeDef or
/// TypeRef, or its row exceeds the compressed encoding.
pub fn encode_type(signature: &TypeSignature, buffer: &mut Vec<u8>) -> Result<()> {
    match signature {
        TypeSignature::Void => buffer.push(ELEMENT_TYPE::VOID),
        TypeSignature::Boolean => buffer.push(ELEMENT_TYPE::BOOLEAN),
        TypeSignature::Char => buffer.push(ELEMENT_TYPE::CHAR),
        TypeSignature::I1 => buffer.push(ELEMENT_TYPE::I1),
        TypeSignature::U1 => buffer.push(ELEMENT_TYPE::U1),
        TypeSignature::I2 => buffer.push(ELEMENT_TYPE::I2),
        TypeSignature::U2 => buffer.push(ELEMENT_TYPE::U2),
        TypeSignature::I4 => buffer.push(ELEMENT_TYPE::I4),
        TypeSignature::U4 => buffer.push(ELEMENT_TYPE::U4),
        TypeSignature::I8 => buffer.push(ELEMENT_TYPE::I8),
        TypeSignature::U8 => buffer.push(ELEMENT_TYPE::U8),
        TypeSignature::R4 => buffer.push(ELEMENT_TYPE::R4),
        TypeSignature::R8 => buffer.push(ELEMENT_TYPE::R8),
        TypeSignature::String => buffer.push(ELEMENT_TYPE::STRING),
        TypeSignature::Object => buffer.push(ELEMENT_TYPE::OBJECT),
        TypeSignature::ValueType(token) => {
            buffer.push(ELEMENT_TYPE::VALUETYPE);
            encode_type_token(*token, buffer)?;
        }
        TypeSignature::Class(token) => {
            buffer.push(ELEMENT_TYPE::CLASS);
            encode_type_token(*token, buffer)?;
        }
        TypeSignature::SzArray(element) => {
            buffer.push(ELEMENT_TYPE::SZARRAY);
            encode_type(element, buffer)?;
        }
    }
    Ok(())
}

/// Encode a TypeDef or TypeRef token as a compressed `TypeDefOrRef` coded index.
fn encode_type_token(token: Token, buffer: &mut Vec<u8>) -> Result<()> {
    let tag = match token.table_id() {
        Some(TableId::TypeDef) => 0,
        Some(TableId::TypeRef) => 1,
        _ => {
            return Err(malformed_error!(
                "Token {} cannot appear in a signature",
                token
            ))
        }
    };

    let row = token.row();
    if row == 0 || row > (0x1FFF_FFFF >> 2) {
        return Err(malformed_error!("Signature token row out of range - {}", token));
    }

    write_compressed_uint((row << 2) | tag, buffer)
}
