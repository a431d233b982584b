//! Module file parsing.
//!
//! The reader resolves every heap index and table run into the owned [`Module`] model and then
//! validates all cross references (scopes, parents, signature tokens and instruction operands),
//! so the rest of the crate can rely on every token of a loaded module being resolvable.

use std::ops::Range;

use crate::{
    code::{MethodBody, Opcode},
    file::parser::Parser,
    module::{
        heaps::{BlobView, StringsView},
        Constant, FieldAttributes, FieldDef, FieldSignature, MemberRef, MemberSignature,
        MethodAttributes, MethodDef, MethodSignature, Module, ModuleFlags, ModuleRef, ParamDef,
        TableId, Token, TypeAttributes, TypeDef, TypeRef, TypeSignature, UserStrings, Version,
        FORMAT_VERSION, MODULE_MAGIC,
    },
    Error::NotSupported,
    Result,
};

/// Size of the fixed module header
pub(crate) const HEADER_SIZE: usize = 20;

/// Number of length-prefixed streams following the header
const STREAM_COUNT: usize = 5;

/// Names of the streams, in file order
pub(crate) const STREAM_NAMES: [&str; STREAM_COUNT] = ["#Strings", "#US", "#Blob", "#Tables", "#Code"];

fn read_version(parser: &mut Parser) -> Result<Version> {
    Ok(Version::new(
        parser.read_le::<u16>()?,
        parser.read_le::<u16>()?,
        parser.read_le::<u16>()?,
        parser.read_le::<u16>()?,
    ))
}

/// Capacity hint bounded by what the remaining data could possibly hold.
fn capacity(count: u32, parser: &Parser, row_size: usize) -> usize {
    (count as usize).min(parser.remaining() / row_size)
}

/// Split `total` rows into runs given the 1-based run starts of the owners.
fn runs(starts: &[u32], total: usize, what: &str) -> Result<Vec<Range<usize>>> {
    if starts.is_empty() {
        if total > 0 {
            return Err(malformed_error!("{} {} rows have no owner", total, what));
        }
        return Ok(Vec::new());
    }

    if starts[0] != 1 {
        return Err(malformed_error!(
            "{} list of the first owner must start at row 1, found {}",
            what,
            starts[0]
        ));
    }

    let mut ranges = Vec::with_capacity(starts.len());
    for (index, start) in starts.iter().enumerate() {
        let begin = (*start as usize).saturating_sub(1);
        let end = match starts.get(index + 1) {
            Some(next) => (*next as usize).saturating_sub(1),
            None => total,
        };

        if begin > end || end > total {
            return Err(malformed_error!(
                "Invalid {} list: run {}..{} of {} rows",
                what,
                begin,
                end,
                total
            ));
        }
        ranges.push(begin..end);
    }
    Ok(ranges)
}

struct RawTypeDef {
    flags: u32,
    namespace: u32,
    name: u32,
    extends: Token,
    field_list: u32,
    method_list: u32,
}

struct RawMethodDef {
    flags: u16,
    name: u32,
    signature: u32,
    body: u32,
    param_list: u32,
}

/// Parse a complete module.
pub(crate) fn read_module(data: &[u8]) -> Result<Module> {
    if data.len() < MODULE_MAGIC.len() || &data[..MODULE_MAGIC.len()] != MODULE_MAGIC {
        return Err(NotSupported);
    }
    if data.len() < HEADER_SIZE {
        return Err(malformed_error!(
            "Module header truncated - {} of {} bytes",
            data.len(),
            HEADER_SIZE
        ));
    }

    let mut parser = Parser::new(data);
    parser.advance_by(MODULE_MAGIC.len())?;

    let format_version = parser.read_le::<u16>()?;
    if format_version != FORMAT_VERSION {
        return Err(NotSupported);
    }

    let flags = ModuleFlags::from_bits_retain(parser.read_le::<u16>()?);
    let name_index = parser.read_le::<u32>()?;
    let version = read_version(&mut parser)?;

    let mut streams: [&[u8]; STREAM_COUNT] = [&[]; STREAM_COUNT];
    for (stream, name) in streams.iter_mut().zip(STREAM_NAMES) {
        let length = parser.read_le::<u32>()? as usize;
        *stream = parser
            .read_bytes(length)
            .map_err(|_| malformed_error!("Stream {} exceeds the module size", name))?;
    }
    if parser.has_more_data() {
        return Err(malformed_error!(
            "{} trailing bytes after the last stream",
            parser.remaining()
        ));
    }

    let [strings, user_strings, blobs, tables, code] = streams;
    let strings = StringsView::new(strings);
    let blobs = BlobView::new(blobs);

    let mut module = Module::new(&strings.get(name_index)?, version);
    module.flags = flags;
    module.user_strings = UserStrings::from_bytes(user_strings)?;

    read_tables(&mut module, tables, &strings, &blobs, code)?;
    module.validate()?;
    Ok(module)
}

fn read_tables(
    module: &mut Module,
    data: &[u8],
    strings: &StringsView,
    blobs: &BlobView,
    code: &[u8],
) -> Result<()> {
    let mut parser = Parser::new(data);

    let mut counts = [0u32; 7];
    for count in &mut counts {
        *count = parser.read_le::<u32>()?;
    }
    let [module_ref_count, type_ref_count, member_ref_count, type_def_count, field_count, method_count, param_count] =
        counts;

    module.module_refs = Vec::with_capacity(capacity(module_ref_count, &parser, 12));
    for _ in 0..module_ref_count {
        let name = strings.get(parser.read_le::<u32>()?)?;
        let version = read_version(&mut parser)?;
        module.module_refs.push(ModuleRef { name, version });
    }

    module.type_refs = Vec::with_capacity(capacity(type_ref_count, &parser, 12));
    for _ in 0..type_ref_count {
        let scope = Token::new(parser.read_le::<u32>()?);
        let namespace = strings.get(parser.read_le::<u32>()?)?;
        let name = strings.get(parser.read_le::<u32>()?)?;
        module.type_refs.push(TypeRef {
            scope,
            namespace,
            name,
        });
    }

    module.member_refs = Vec::with_capacity(capacity(member_ref_count, &parser, 12));
    for _ in 0..member_ref_count {
        let parent = Token::new(parser.read_le::<u32>()?);
        let name = strings.get(parser.read_le::<u32>()?)?;
        let signature = MemberSignature::parse(blobs.get(parser.read_le::<u32>()?)?)?;
        module.member_refs.push(MemberRef {
            parent,
            name,
            signature,
        });
    }

    let mut raw_types = Vec::with_capacity(capacity(type_def_count, &parser, 24));
    for _ in 0..type_def_count {
        raw_types.push(RawTypeDef {
            flags: parser.read_le::<u32>()?,
            namespace: parser.read_le::<u32>()?,
            name: parser.read_le::<u32>()?,
            extends: Token::new(parser.read_le::<u32>()?),
            field_list: parser.read_le::<u32>()?,
            method_list: parser.read_le::<u32>()?,
        });
    }

    let mut fields = Vec::with_capacity(capacity(field_count, &parser, 10));
    for _ in 0..field_count {
        let flags = FieldAttributes::from_bits_retain(parser.read_le::<u16>()?);
        let name = strings.get(parser.read_le::<u32>()?)?;
        let signature = FieldSignature::parse(blobs.get(parser.read_le::<u32>()?)?)?;
        fields.push(FieldDef {
            flags,
            name,
            signature,
        });
    }

    let mut raw_methods = Vec::with_capacity(capacity(method_count, &parser, 18));
    for _ in 0..method_count {
        raw_methods.push(RawMethodDef {
            flags: parser.read_le::<u16>()?,
            name: parser.read_le::<u32>()?,
            signature: parser.read_le::<u32>()?,
            body: parser.read_le::<u32>()?,
            param_list: parser.read_le::<u32>()?,
        });
    }

    let mut params = Vec::with_capacity(capacity(param_count, &parser, 10));
    for _ in 0..param_count {
        let sequence = parser.read_le::<u16>()?;
        let name = strings.get(parser.read_le::<u32>()?)?;
        let default_index = parser.read_le::<u32>()?;
        let default = match default_index {
            0 => None,
            index => Some(Constant::parse(blobs.get(index)?)?),
        };
        params.push(ParamDef {
            sequence,
            name,
            default,
        });
    }

    if parser.has_more_data() {
        return Err(malformed_error!(
            "{} trailing bytes in #Tables",
            parser.remaining()
        ));
    }

    let param_starts: Vec<u32> = raw_methods.iter().map(|m| m.param_list).collect();
    let param_runs = runs(&param_starts, params.len(), "Param")?;

    let mut methods = Vec::with_capacity(raw_methods.len());
    for (raw, run) in raw_methods.iter().zip(param_runs) {
        let signature = MethodSignature::parse(blobs.get(raw.signature)?)?;
        let body = match raw.body {
            0 => None,
            offset => Some(read_body(code, offset - 1)?),
        };
        methods.push(MethodDef {
            flags: MethodAttributes::from_bits_retain(raw.flags),
            name: strings.get(raw.name)?,
            signature,
            params: params[run].to_vec(),
            body,
        });
    }

    let field_starts: Vec<u32> = raw_types.iter().map(|t| t.field_list).collect();
    let method_starts: Vec<u32> = raw_types.iter().map(|t| t.method_list).collect();
    let field_runs = runs(&field_starts, fields.len(), "Field")?;
    let method_runs = runs(&method_starts, methods.len(), "MethodDef")?;

    module.types = Vec::with_capacity(raw_types.len());
    for ((raw, field_run), method_run) in raw_types.iter().zip(field_runs).zip(method_runs) {
        module.types.push(TypeDef {
            flags: TypeAttributes::from_bits_retain(raw.flags),
            namespace: strings.get(raw.namespace)?,
            name: strings.get(raw.name)?,
            extends: raw.extends,
            fields: fields[field_run].to_vec(),
            methods: methods[method_run].to_vec(),
        });
    }

    Ok(())
}

fn read_body(code: &[u8], offset: u32) -> Result<MethodBody> {
    let mut parser = Parser::new(code);
    parser
        .seek(offset as usize)
        .map_err(|_| malformed_error!("Method body offset {} outside #Code", offset))?;

    let max_stack = parser.read_le::<u16>()?;
    let local_count = parser.read_le::<u16>()?;
    let code_size = parser.read_le::<u32>()? as usize;
    let bytes = parser.read_bytes(code_size)?;

    MethodBody::decode(max_stack, local_count, bytes)
}

impl Module {
    /// Check that every token stored in the module resolves to a row of the expected kind.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] describing the first dangling or mistyped token.
    pub fn validate(&self) -> Result<()> {
        for (index, type_ref) in self.type_refs.iter().enumerate() {
            if !type_ref.scope.is_null() && self.module_ref(type_ref.scope).is_none() {
                return Err(malformed_error!(
                    "TypeRef {} has invalid scope {}",
                    index + 1,
                    type_ref.scope
                ));
            }
            if type_ref.name.is_empty() {
                return Err(malformed_error!("TypeRef {} has no name", index + 1));
            }
        }

        for (index, member_ref) in self.member_refs.iter().enumerate() {
            if !self.is_type_token(member_ref.parent) {
                return Err(malformed_error!(
                    "MemberRef {} has invalid parent {}",
                    index + 1,
                    member_ref.parent
                ));
            }
            match &member_ref.signature {
                MemberSignature::Field(field) => self.check_type(&field.field_type)?,
                MemberSignature::Method(method) => self.check_method_signature(method)?,
            }
        }

        for type_def in &self.types {
            if !type_def.extends.is_null() && !self.is_type_token(type_def.extends) {
                return Err(malformed_error!(
                    "Type {} extends invalid token {}",
                    type_def.full_name(),
                    type_def.extends
                ));
            }
            for field in &type_def.fields {
                self.check_type(&field.signature.field_type)?;
            }
            for method in &type_def.methods {
                self.check_method_signature(&method.signature)?;
                if let Some(body) = &method.body {
                    for instruction in &body.instructions {
                        if let Some(token) = instruction.token() {
                            self.check_operand(instruction.opcode, token).map_err(|e| {
                                malformed_error!(
                                    "{}::{} - {}",
                                    type_def.full_name(),
                                    method.name,
                                    e
                                )
                            })?;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    fn is_type_token(&self, token: Token) -> bool {
        matches!(token.table_id(), Some(TableId::TypeDef | TableId::TypeRef))
            && self.contains_token(token)
    }

    fn check_type(&self, signature: &TypeSignature) -> Result<()> {
        match signature.type_token() {
            Some(token) if !self.is_type_token(token) => Err(malformed_error!(
                "Signature references invalid type {}",
                token
            )),
            _ => Ok(()),
        }
    }

    fn check_method_signature(&self, signature: &MethodSignature) -> Result<()> {
        self.check_type(&signature.return_type)?;
        for param in &signature.params {
            self.check_type(param)?;
        }
        Ok(())
    }

    fn check_operand(&self, opcode: Opcode, token: Token) -> Result<()> {
        let is_field_member = || {
            self.member_ref(token)
                .is_some_and(|member| member.signature.is_field())
        };
        let is_method_member = || {
            self.member_ref(token)
                .is_some_and(|member| !member.signature.is_field())
        };

        let valid = match opcode {
            _ if opcode.is_field_access() => {
                (token.is_table(TableId::Field) && self.contains_token(token)) || is_field_member()
            }
            Opcode::Call | Opcode::Callvirt | Opcode::Newobj | Opcode::Ldftn => {
                (token.is_table(TableId::MethodDef) && self.contains_token(token))
                    || is_method_member()
            }
            Opcode::Ldstr => self.user_strings.get_token(token).is_some(),
            Opcode::Box => self.is_type_token(token),
            Opcode::Ldtoken => {
                !token.is_table(TableId::UserString)
                    && !token.is_table(TableId::ModuleRef)
                    && self.contains_token(token)
            }
            _ => false,
        };

        if valid {
            Ok(())
        } else {
            Err(malformed_error!("Invalid operand {} for {}", token, opcode))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{test::build_plugin, Error};

    #[test]
    fn rejects_foreign_files() {
        assert!(matches!(read_module(b"MZ\x90\x00"), Err(Error::NotSupported)));
        assert!(matches!(read_module(b"PM"), Err(Error::NotSupported)));
        assert!(matches!(
            read_module(b"PMOD\x01\x00"),
            Err(Error::Malformed { .. })
        ));
    }

    #[test]
    fn rejects_unknown_format_version() {
        let mut bytes = build_plugin().to_bytes().unwrap();
        bytes[4] = 2;
        assert!(matches!(read_module(&bytes), Err(Error::NotSupported)));
    }

    #[test]
    fn rejects_truncation_and_trailing_data() {
        let bytes = build_plugin().to_bytes().unwrap();
        for length in [HEADER_SIZE, HEADER_SIZE + 3, bytes.len() - 1] {
            assert!(read_module(&bytes[..length]).is_err(), "length {length}");
        }

        let mut padded = bytes.clone();
        padded.push(0);
        assert!(read_module(&padded).is_err());
    }

    #[test]
    fn rejects_dangling_tokens() {
        let mut plugin = build_plugin();
        plugin.type_refs[0].scope = Token::from_parts(TableId::ModuleRef, 40);
        assert!(plugin.validate().is_err());

        let mut plugin = build_plugin();
        plugin.member_refs[0].parent = Token::from_parts(TableId::MemberRef, 1);
        assert!(plugin.validate().is_err());
    }

    #[test]
    fn runs_split_rows() {
        assert_eq!(runs(&[1, 1, 3], 4, "Field").unwrap(), vec![0..0, 0..2, 2..4]);
        assert_eq!(runs(&[], 0, "Field").unwrap(), vec![]);
        assert!(runs(&[], 1, "Field").is_err());
        assert!(runs(&[2], 3, "Field").is_err());
        assert!(runs(&[1, 3, 2], 3, "Field").is_err());
        assert!(runs(&[1, 9], 3, "Field").is_err());
    }
}
