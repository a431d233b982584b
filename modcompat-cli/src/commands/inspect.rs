use std::{path::Path, sync::Arc};

use modcompat::symbols::{Classification, SymbolUniverse};
use serde::Serialize;

use crate::{
    app::GlobalOptions,
    commands::common::load_module,
    output::{print_output, Align, TabWriter},
};

#[derive(Debug, Serialize)]
struct ReferenceEntry {
    token: String,
    kind: String,
    module: Option<String>,
    reference: String,
    status: String,
    reason: Option<String>,
}

#[derive(Debug, Serialize)]
struct InspectOutput {
    module: String,
    version: String,
    flags: String,
    types: usize,
    methods: usize,
    references: Vec<ReferenceEntry>,
}

pub fn run(
    path: &Path,
    hosts: &[std::path::PathBuf],
    only_module: Option<&str>,
    opts: &GlobalOptions,
) -> anyhow::Result<()> {
    let module = load_module(path)?;

    let hosts = hosts
        .iter()
        .map(|host| load_module(host))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let mut universe = SymbolUniverse::new(hosts.iter().map(|host| host.name.clone()));
    for host in hosts {
        universe.add_module(Arc::new(host))?;
    }

    let references = module
        .enumerate_references()
        .into_iter()
        .filter(|reference| {
            only_module.map_or(true, |name| reference.declaring_module() == Some(name))
        })
        .map(|reference| {
            let (status, reason) = match universe.classify(&reference) {
                Classification::Unchecked => ("unchecked", None),
                Classification::Resolved => ("resolved", None),
                Classification::Missing(reason) => ("missing", Some(reason)),
                Classification::Mismatch(reason) => ("mismatch", Some(reason)),
            };
            ReferenceEntry {
                token: reference.token().to_string(),
                kind: reference.kind().to_string(),
                module: reference.declaring_module().map(str::to_string),
                reference: reference.to_string(),
                status: status.to_string(),
                reason,
            }
        })
        .collect();

    let output = InspectOutput {
        module: module.name.clone(),
        version: module.version.to_string(),
        flags: format!("{:?}", module.flags),
        types: module.types.len(),
        methods: module.method_count(),
        references,
    };

    print_output(&output, opts, |out| {
        println!("Module:   {} {}", out.module, out.version);
        println!("Flags:    {}", out.flags);
        println!("Types:    {}", out.types);
        println!("Methods:  {}", out.methods);

        if out.references.is_empty() {
            println!("References: none");
            return;
        }

        println!("References ({} entries):", out.references.len());
        let mut tw = TabWriter::new(vec![
            ("Token", Align::Left),
            ("Kind", Align::Left),
            ("Reference", Align::Left),
            ("Status", Align::Left),
        ])
        .indent("  ");
        for entry in &out.references {
            let status = match &entry.reason {
                Some(reason) => format!("{}: {reason}", entry.status),
                None => entry.status.clone(),
            };
            tw.row(vec![
                entry.token.clone(),
                entry.kind.clone(),
                entry.reference.clone(),
                status,
            ]);
        }
        tw.print();
    })
}
