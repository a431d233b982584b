//! Host, plugin and platform modules shared by the integration tests.
//!
//! `Host` 2.0 turned the `Health` field into a property, added an optional `silent` parameter
//! to `Damage`, gave `Teleport` a second coordinate, renamed `Log` to `Broadcast` and dropped
//! `Game.Legacy`. The legacy plugin was built against 1.0.

#![allow(dead_code)]

use std::sync::Arc;

use modcompat::{
    code::{Instruction, MethodBody, Opcode},
    facade::FacadeRegistry,
    module::{
        Constant, FieldAttributes, MethodAttributes, MethodDef, MethodSignature, ModuleBuilder,
        ParamDef, Token, TypeSignature, Version,
    },
    Module, Result,
};

pub const HOST_V1: Version = Version::new(1, 0, 0, 0);
pub const HOST_V2: Version = Version::new(2, 0, 0, 0);

fn ret() -> Instruction {
    Instruction::simple(Opcode::Ret)
}

fn op(opcode: Opcode) -> Instruction {
    Instruction::simple(opcode)
}

fn call(opcode: Opcode, token: Token) -> Instruction {
    Instruction::with_token(opcode, token)
}

fn void_static(params: Vec<TypeSignature>) -> MethodSignature {
    MethodSignature::static_method(TypeSignature::Void, params)
}

fn void_instance(params: Vec<TypeSignature>) -> MethodSignature {
    MethodSignature::instance(TypeSignature::Void, params)
}

pub fn build_host_v2() -> Result<Module> {
    let mut builder = ModuleBuilder::new("Host", HOST_V2);

    let mut player = builder.type_def("Game", "Player");
    let health = player.field_with(FieldAttributes::empty(), "_health", TypeSignature::I4);
    player.method(
        "get_Health",
        MethodSignature::instance(TypeSignature::I4, vec![]),
        vec![op(Opcode::Ldarg0), call(Opcode::Ldfld, health), ret()],
    );
    player.method(
        "set_Health",
        void_instance(vec![TypeSignature::I4]),
        vec![
            op(Opcode::Ldarg0),
            op(Opcode::Ldarg1),
            call(Opcode::Stfld, health),
            ret(),
        ],
    );
    player.method_def(MethodDef {
        flags: MethodAttributes::PUBLIC,
        name: "Damage".into(),
        signature: void_instance(vec![TypeSignature::I4, TypeSignature::Boolean]),
        params: vec![
            ParamDef::new(1, "amount"),
            ParamDef::optional(2, "silent", Constant::Boolean(false)),
        ],
        body: Some(MethodBody::new(0, 0, vec![ret()])),
    });
    player.method(
        "Teleport",
        void_instance(vec![TypeSignature::I4, TypeSignature::I4]),
        vec![ret()],
    );

    builder
        .type_def("Game", "World")
        .method("Broadcast", void_static(vec![TypeSignature::String]), vec![ret()]);

    builder.build()
}

/// Uses only `Damage`, through the optional parameter added in 2.0.
pub fn build_clean_plugin() -> Result<Module> {
    let mut builder = ModuleBuilder::new("CleanPlugin", Version::new(1, 0, 0, 0));
    let host = builder.module_ref("Host", HOST_V2);
    let player = builder.type_ref(host, "Game", "Player");
    let damage = builder.method_ref(
        player,
        "Damage",
        void_instance(vec![TypeSignature::I4, TypeSignature::Boolean]),
    );

    builder.type_def("CleanPlugin", "Main").method(
        "Run",
        void_static(vec![TypeSignature::Class(player)]),
        vec![
            op(Opcode::Ldarg0),
            Instruction::ldc_i4(2),
            op(Opcode::LdcI41),
            call(Opcode::Callvirt, damage),
            ret(),
        ],
    );
    builder.build()
}

/// Touches every member that changed in 2.0, including `Teleport` and the missing `Game.Ghost`.
pub fn build_legacy_plugin() -> Result<Module> {
    legacy_plugin("LegacyPlugin", true)
}

/// Like the legacy plugin, but without the references no handler can repair.
pub fn build_repairable_plugin() -> Result<Module> {
    legacy_plugin("RepairablePlugin", false)
}

fn legacy_plugin(name: &str, unfixable: bool) -> Result<Module> {
    let mut builder = ModuleBuilder::new(name, Version::new(1, 0, 0, 0));
    let host = builder.module_ref("Host", HOST_V1);
    let player = builder.type_ref(host, "Game", "Player");
    let world = builder.type_ref(host, "Game", "World");
    let legacy = builder.type_ref(host, "Game", "Legacy");

    let health = builder.field_ref(player, "Health", TypeSignature::I4);
    let damage = builder.method_ref(player, "Damage", void_instance(vec![TypeSignature::I4]));
    let log = builder.method_ref(world, "Log", void_static(vec![TypeSignature::String]));
    let notify = builder.method_ref(legacy, "Notify", void_static(vec![TypeSignature::String]));
    let hello = builder.user_string("hello")?;

    let mut code = vec![
        op(Opcode::Ldarg0),
        op(Opcode::Ldarg0),
        call(Opcode::Ldfld, health),
        op(Opcode::LdcI41),
        op(Opcode::Add),
        call(Opcode::Stfld, health),
        op(Opcode::Ldarg0),
        Instruction::ldc_i4(5),
        call(Opcode::Callvirt, damage),
        call(Opcode::Ldstr, hello),
        call(Opcode::Call, log),
        call(Opcode::Ldstr, hello),
        call(Opcode::Call, notify),
    ];
    if unfixable {
        let ghost = builder.type_ref(host, "Game", "Ghost");
        let teleport =
            builder.method_ref(player, "Teleport", void_instance(vec![TypeSignature::I4]));
        let haunt = builder.method_ref(ghost, "Haunt", void_static(vec![]));
        code.extend([
            op(Opcode::Ldarg0),
            Instruction::ldc_i4(3),
            call(Opcode::Callvirt, teleport),
            call(Opcode::Call, haunt),
        ]);
    }
    code.push(ret());

    builder.type_def(name, "Main").method(
        "Update",
        void_static(vec![TypeSignature::Class(player)]),
        code,
    );
    builder.build()
}

/// Calls `Log` and `Notify` on both `Host` and a third-party `OtherLib` declaring the same types.
pub fn build_mixed_plugin() -> Result<Module> {
    let mut builder = ModuleBuilder::new("MixedPlugin", Version::new(1, 0, 0, 0));
    let host = builder.module_ref("Host", HOST_V1);
    let other = builder.module_ref("OtherLib", Version::new(1, 0, 0, 0));

    let mut code = Vec::new();
    let hello = builder.user_string("hello")?;
    for scope in [host, other] {
        let world = builder.type_ref(scope, "Game", "World");
        let legacy = builder.type_ref(scope, "Game", "Legacy");
        let log = builder.method_ref(world, "Log", void_static(vec![TypeSignature::String]));
        let notify =
            builder.method_ref(legacy, "Notify", void_static(vec![TypeSignature::String]));
        code.extend([
            call(Opcode::Ldstr, hello),
            call(Opcode::Call, log),
            call(Opcode::Ldstr, hello),
            call(Opcode::Call, notify),
        ]);
    }
    code.push(ret());

    builder
        .type_def("MixedPlugin", "Main")
        .method("Run", void_static(vec![]), code);
    builder.build()
}

pub fn build_compat() -> Result<Module> {
    let mut builder = ModuleBuilder::new("Compat", Version::new(1, 0, 0, 0));
    builder.type_def("Compat", "LegacyFacade").method(
        "Notify",
        void_static(vec![TypeSignature::String]),
        vec![ret()],
    );
    builder.build()
}

/// `Game.World::Log` goes to `Broadcast`, `Game.Legacy` to the compat shim.
pub fn facades() -> Result<FacadeRegistry> {
    FacadeRegistry::builder()
        .module(Arc::new(build_host_v2()?))
        .module(Arc::new(build_compat()?))
        .map_method("Game.World::Log(System.String)", "Game.World", "Broadcast")
        .map_facade("Game.Legacy", "Compat.LegacyFacade")
        .build()
}

pub fn build_desktop_target(version: Version) -> Result<Module> {
    let mut builder = ModuleBuilder::new("Host.Desktop", version);
    let mut window = builder.type_def("Host.Native", "Window");
    window.method("Show", void_static(vec![]), vec![ret()]);
    window.method("Close", void_static(vec![]), vec![ret()]);
    builder.build()
}

/// Calls `members` of `Host.Native.Window` in the retired `Host.Win32` module.
pub fn build_native_plugin(members: &[&str]) -> Result<Module> {
    let mut builder = ModuleBuilder::new("NativePlugin", Version::new(1, 0, 0, 0));
    let win32 = builder.module_ref("Host.Win32", HOST_V1);
    let window = builder.type_ref(win32, "Host.Native", "Window");

    let mut code = Vec::new();
    for member in members {
        let token = builder.method_ref(window, member, void_static(vec![]));
        code.push(call(Opcode::Call, token));
    }
    code.push(ret());

    builder
        .type_def("NativePlugin", "Main")
        .method("Start", void_static(vec![]), code);
    builder.build()
}

/// Starts a process through `System.Diagnostics.Process`.
pub fn build_shell_plugin() -> Result<Module> {
    let mut builder = ModuleBuilder::new("ShellPlugin", Version::new(1, 0, 0, 0));
    let system = builder.module_ref("System", Version::new(4, 0, 0, 0));
    let process = builder.type_ref(system, "System.Diagnostics", "Process");
    let start = builder.method_ref(
        process,
        "Start",
        MethodSignature::static_method(TypeSignature::Class(process), vec![TypeSignature::String]),
    );
    let command = builder.user_string("calc")?;

    builder.type_def("ShellPlugin", "Main").method(
        "Run",
        void_static(vec![]),
        vec![
            call(Opcode::Ldstr, command),
            call(Opcode::Call, start),
            op(Opcode::Pop),
            ret(),
        ],
    );
    builder.build()
}
