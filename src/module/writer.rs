//! Canonical module serialization.
//!
//! `#Strings` and `#Blob` are rebuilt from the model in table order and `#Code` is laid out in
//! method order, so the output depends only on the in-memory module. `#US` is written back as
//! is because `ldstr` operands hold offsets into it.

use crate::{
    file::io::write_le,
    module::{
        heaps::{BlobBuilder, StringsBuilder},
        reader::{HEADER_SIZE, STREAM_NAMES},
        MethodDef, Module, Version, FORMAT_VERSION, MODULE_MAGIC,
    },
    Result,
};

fn write_version(buffer: &mut Vec<u8>, version: &Version) {
    write_le(buffer, version.major);
    write_le(buffer, version.minor);
    write_le(buffer, version.build);
    write_le(buffer, version.revision);
}

fn count(len: usize, what: &str) -> Result<u32> {
    u32::try_from(len).map_err(|_| malformed_error!("Too many {} rows: {}", what, len))
}

/// Serialize a module.
pub(crate) fn write_module(module: &Module) -> Result<Vec<u8>> {
    let mut strings = StringsBuilder::new();
    let mut blobs = BlobBuilder::new();
    let mut code = Vec::new();

    let name = strings.add(&module.name)?;
    let tables = write_tables(module, &mut strings, &mut blobs, &mut code)?;

    let strings = strings.into_bytes();
    let blobs = blobs.into_bytes();
    let streams: [&[u8]; 5] = [
        &strings,
        module.user_strings.as_bytes(),
        &blobs,
        &tables,
        &code,
    ];

    let total = HEADER_SIZE + streams.iter().map(|s| 4 + s.len()).sum::<usize>();
    let mut buffer = Vec::with_capacity(total);
    buffer.extend_from_slice(MODULE_MAGIC);
    write_le(&mut buffer, FORMAT_VERSION);
    write_le(&mut buffer, module.flags.bits());
    write_le(&mut buffer, name);
    write_version(&mut buffer, &module.version);

    for (stream, stream_name) in streams.iter().zip(STREAM_NAMES) {
        let length = u32::try_from(stream.len())
            .map_err(|_| malformed_error!("Stream {} exceeds 4 GiB", stream_name))?;
        write_le(&mut buffer, length);
        buffer.extend_from_slice(stream);
    }

    Ok(buffer)
}

fn write_tables(
    module: &Module,
    strings: &mut StringsBuilder,
    blobs: &mut BlobBuilder,
    code: &mut Vec<u8>,
) -> Result<Vec<u8>> {
    let methods: Vec<&MethodDef> = module
        .types
        .iter()
        .flat_map(|type_def| type_def.methods.iter())
        .collect();
    let param_count: usize = methods.iter().map(|method| method.params.len()).sum();

    let mut buffer = Vec::new();
    for (len, what) in [
        (module.module_refs.len(), "ModuleRef"),
        (module.type_refs.len(), "TypeRef"),
        (module.member_refs.len(), "MemberRef"),
        (module.types.len(), "TypeDef"),
        (module.field_count(), "Field"),
        (methods.len(), "MethodDef"),
        (param_count, "Param"),
    ] {
        write_le(&mut buffer, count(len, what)?);
    }

    for module_ref in &module.module_refs {
        write_le(&mut buffer, strings.add(&module_ref.name)?);
        write_version(&mut buffer, &module_ref.version);
    }

    for type_ref in &module.type_refs {
        write_le(&mut buffer, type_ref.scope.value());
        write_le(&mut buffer, strings.add(&type_ref.namespace)?);
        write_le(&mut buffer, strings.add(&type_ref.name)?);
    }

    for member_ref in &module.member_refs {
        write_le(&mut buffer, member_ref.parent.value());
        write_le(&mut buffer, strings.add(&member_ref.name)?);
        write_le(&mut buffer, blobs.add(&member_ref.signature.encode()?)?);
    }

    let mut field_list = 1u32;
    let mut method_list = 1u32;
    for type_def in &module.types {
        write_le(&mut buffer, type_def.flags.bits());
        write_le(&mut buffer, strings.add(&type_def.namespace)?);
        write_le(&mut buffer, strings.add(&type_def.name)?);
        write_le(&mut buffer, type_def.extends.value());
        write_le(&mut buffer, field_list);
        write_le(&mut buffer, method_list);
        field_list += count(type_def.fields.len(), "Field")?;
        method_list += count(type_def.methods.len(), "MethodDef")?;
    }

    for field in module.types.iter().flat_map(|type_def| type_def.fields.iter()) {
        write_le(&mut buffer, field.flags.bits());
        write_le(&mut buffer, strings.add(&field.name)?);
        write_le(&mut buffer, blobs.add(&field.signature.encode()?)?);
    }

    let mut param_list = 1u32;
    for method in &methods {
        write_le(&mut buffer, method.flags.bits());
        write_le(&mut buffer, strings.add(&method.name)?);
        write_le(&mut buffer, blobs.add(&method.signature.encode()?)?);

        let body = match &method.body {
            Some(body) => {
                let offset = count(code.len(), "#Code")?;
                let bytes = body.encode()?;
                write_le(code, body.max_stack);
                write_le(code, body.local_count);
                write_le(code, count(bytes.len(), "code byte")?);
                code.extend_from_slice(&bytes);
                offset
                    .checked_add(1)
                    .ok_or_else(|| malformed_error!("#Code exceeds 4 GiB"))?
            }
            None => 0,
        };
        write_le(&mut buffer, body);
        write_le(&mut buffer, param_list);
        param_list += count(method.params.len(), "Param")?;
    }

    for param in methods.iter().flat_map(|method| method.params.iter()) {
        write_le(&mut buffer, param.sequence);
        write_le(&mut buffer, strings.add(&param.name)?);
        let default = match &param.default {
            Some(constant) => blobs.add(&constant.encode()?)?,
            None => 0,
        };
        write_le(&mut buffer, default);
    }

    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        module::reader::read_module,
        test::{build_host_v2, build_plugin},
    };

    #[test]
    fn output_is_canonical() {
        for module in [build_plugin(), build_host_v2()] {
            let first = write_module(&module).unwrap();
            let loaded = read_module(&first).unwrap();
            assert_eq!(loaded, module);
            assert_eq!(write_module(&loaded).unwrap(), first);
        }
    }

    #[test]
    fn header_layout() {
        let plugin = build_plugin();
        let bytes = write_module(&plugin).unwrap();

        assert_eq!(&bytes[..4], b"PMOD");
        assert_eq!(&bytes[4..6], &[0x01, 0x00]);
        assert_eq!(
            u16::from_le_bytes([bytes[6], bytes[7]]),
            plugin.flags.bits()
        );
        // The module name is the first string interned.
        assert_eq!(&bytes[8..12], &[0x01, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn empty_module() {
        let module = Module::new("Empty", Version::new(1, 0, 0, 0));
        let bytes = write_module(&module).unwrap();
        assert_eq!(read_module(&bytes).unwrap(), module);
    }
}
