//! Re-exports for `use modcompat::prelude::*`.

pub use crate::{Error, File, Parser, Result};

pub use crate::module::{
    MemberReference, MemberShape, Module, ModuleBuilder, ModuleFlags, Platform,
    ReferenceKind, SymbolReference, TableId, Token, TypeReference, Version,
};

pub use crate::code::{Instruction, MethodBody, Opcode, Operand};

pub use crate::symbols::{Classification, SymbolUniverse};

pub use crate::facade::{FacadeRegistry, FacadeRegistryBuilder};

pub use crate::platform::{PlatformAssemblyMap, TargetDescriptor};

pub use crate::rewrite::{
    HandlerCapabilities, HandlerMode, HandlerResult, InstructionHandler, RewriteConfig,
    RewriteContext, RewriteJob, RewritePipeline, RewriteRecord, RewriteReport, RewriteSession,
    Stage, Verdict,
};
