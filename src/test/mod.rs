//! Module fixtures shared by the unit tests.
//!
//! The fixtures model one host application in two releases plus the plugins, shims and
//! platform modules built against them:
//!
//! - `Host` 1.0: `Game.Player` exposes a public `Health` field, `Damage(int)`, `Teleport(int)`;
//!   `Game.World` has `Log(string)` and a static `Tick` field; `Game.Legacy` has `Notify(string)`.
//! - `Host` 2.0: fields became properties, `Damage` gained an optional `silent` parameter,
//!   `Teleport` takes two coordinates, `Log` was renamed to `Broadcast` and `Game.Legacy` is gone.
//! - `Compat` 1.0: shims for removed host types.
//! - `Host.Win32` was retired in favour of the `Host.Desktop` targets.

use crate::{
    code::{Instruction, MethodBody, Opcode},
    module::{
        Constant, FieldAttributes, MethodAttributes, MethodDef, MethodSignature, Module,
        ModuleBuilder, ParamDef, Token, TypeSignature, Version,
    },
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

// Game.Entity, shared by both host releases
fn add_entity(builder: &mut ModuleBuilder) -> Token {
    let mut entity = builder.type_def("Game", "Entity");
    let id = entity.field_with(FieldAttributes::empty(), "id", TypeSignature::I4);
    entity.method(
        "GetId",
        MethodSignature::instance(TypeSignature::I4, vec![]),
        vec![op(Opcode::Ldarg0), call(Opcode::Ldfld, id), ret()],
    );
    entity.token()
}

pub fn build_host_v1() -> Module {
    let mut builder = ModuleBuilder::new("Host", HOST_V1);
    let entity = add_entity(&mut builder);

    let mut player = builder.type_def("Game", "Player");
    player.extends(entity);
    let health = player.field("Health", TypeSignature::I4);
    player.method(
        "Heal",
        void_instance(vec![TypeSignature::I4]),
        vec![
            op(Opcode::Ldarg0),
            op(Opcode::Ldarg0),
            call(Opcode::Ldfld, health),
            op(Opcode::Ldarg1),
            op(Opcode::Add),
            call(Opcode::Stfld, health),
            ret(),
        ],
    );
    player.method("Damage", void_instance(vec![TypeSignature::I4]), vec![ret()]);
    player.method("Teleport", void_instance(vec![TypeSignature::I4]), vec![ret()]);

    let mut world = builder.type_def("Game", "World");
    world.static_field("Tick", TypeSignature::I4);
    world.method("Log", void_static(vec![TypeSignature::String]), vec![ret()]);

    builder
        .type_def("Game", "Legacy")
        .method("Notify", void_static(vec![TypeSignature::String]), vec![ret()]);

    builder.build().unwrap()
}

pub fn build_host_v2() -> Module {
    let mut builder = ModuleBuilder::new("Host", HOST_V2);
    let entity = add_entity(&mut builder);

    let mut player = builder.type_def("Game", "Player");
    player.extends(entity);
    let player_token = player.token();
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
    player.method("Heal", void_instance(vec![TypeSignature::I4]), vec![ret()]);
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
    player.method(
        "Find",
        MethodSignature::static_method(
            TypeSignature::Class(player_token),
            vec![TypeSignature::String],
        ),
        vec![op(Opcode::Ldnull), ret()],
    );

    let mut world = builder.type_def("Game", "World");
    let tick = world.field_with(
        FieldAttributes::STATIC,
        "_tick",
        TypeSignature::I4,
    );
    world.method(
        "get_Tick",
        MethodSignature::static_method(TypeSignature::I4, vec![]),
        vec![call(Opcode::Ldsfld, tick), ret()],
    );
    world.method(
        "set_Tick",
        void_static(vec![TypeSignature::I4]),
        vec![op(Opcode::Ldarg0), call(Opcode::Stsfld, tick), ret()],
    );
    world.method("Broadcast", void_static(vec![TypeSignature::String]), vec![ret()]);

    builder.build().unwrap()
}

/// A plugin built against `Host` 1.0 that only uses members still present in 2.0.
pub fn build_plugin() -> Module {
    let mut builder = ModuleBuilder::new("SamplePlugin", Version::new(1, 0, 0, 0));
    let host = builder.module_ref("Host", HOST_V1);
    let player = builder.type_ref(host, "Game", "Player");
    let heal = builder.method_ref(player, "Heal", void_instance(vec![TypeSignature::I4]));
    let get_id = builder.method_ref(
        player,
        "GetId",
        MethodSignature::instance(TypeSignature::I4, vec![]),
    );

    builder.type_def("SamplePlugin", "Main").method(
        "Run",
        void_static(vec![TypeSignature::Class(player)]),
        vec![
            op(Opcode::Ldarg0),
            Instruction::ldc_i4(10),
            call(Opcode::Callvirt, heal),
            op(Opcode::Ldarg0),
            call(Opcode::Callvirt, get_id),
            op(Opcode::Pop),
            ret(),
        ],
    );

    builder.build().unwrap()
}

/// A plugin built against `Host` 1.0 touching every member that changed in 2.0.
pub fn build_legacy_plugin() -> Module {
    let mut builder = ModuleBuilder::new("LegacyPlugin", Version::new(1, 0, 0, 0));
    let host = builder.module_ref("Host", HOST_V1);
    let player = builder.type_ref(host, "Game", "Player");
    let world = builder.type_ref(host, "Game", "World");
    let legacy = builder.type_ref(host, "Game", "Legacy");
    let ghost = builder.type_ref(host, "Game", "Ghost");

    let health = builder.field_ref(player, "Health", TypeSignature::I4);
    let tick = builder.field_ref(world, "Tick", TypeSignature::I4);
    let damage = builder.method_ref(player, "Damage", void_instance(vec![TypeSignature::I4]));
    let teleport = builder.method_ref(player, "Teleport", void_instance(vec![TypeSignature::I4]));
    let log = builder.method_ref(world, "Log", void_static(vec![TypeSignature::String]));
    let notify = builder.method_ref(legacy, "Notify", void_static(vec![TypeSignature::String]));
    let haunt = builder.method_ref(ghost, "Haunt", void_static(vec![]));
    let hello = builder.user_string("hello").unwrap();

    builder.type_def("LegacyPlugin", "Main").method(
        "Update",
        void_static(vec![TypeSignature::Class(player)]),
        vec![
            op(Opcode::Ldarg0),
            op(Opcode::Ldarg0),
            call(Opcode::Ldfld, health),
            op(Opcode::LdcI41),
            op(Opcode::Add),
            call(Opcode::Stfld, health),
            call(Opcode::Ldsfld, tick),
            op(Opcode::LdcI41),
            op(Opcode::Add),
            call(Opcode::Stsfld, tick),
            op(Opcode::Ldarg0),
            Instruction::ldc_i4(5),
            call(Opcode::Callvirt, damage),
            op(Opcode::Ldarg0),
            Instruction::ldc_i4(3),
            call(Opcode::Callvirt, teleport),
            call(Opcode::Ldstr, hello),
            call(Opcode::Call, log),
            call(Opcode::Ldstr, hello),
            call(Opcode::Call, notify),
            call(Opcode::Call, haunt),
            ret(),
        ],
    );

    builder.build().unwrap()
}

/// Shims for host types removed in 2.0.
pub fn build_compat() -> Module {
    let mut builder = ModuleBuilder::new("Compat", Version::new(1, 0, 0, 0));
    builder.type_def("Compat", "LegacyFacade").method(
        "Notify",
        void_static(vec![TypeSignature::String]),
        vec![ret()],
    );
    builder.build().unwrap()
}

/// A `Host.Desktop` target module; `with_close` adds the member introduced in 2.0.
pub fn build_desktop_target(version: Version, with_close: bool) -> Module {
    let mut builder = ModuleBuilder::new("Host.Desktop", version);
    let mut window = builder.type_def("Host.Native", "Window");
    window.method("Show", void_static(vec![]), vec![ret()]);
    if with_close {
        window.method("Close", void_static(vec![]), vec![ret()]);
    }
    builder.build().unwrap()
}

/// A plugin calling into the retired `Host.Win32` module.
pub fn build_native_plugin(required: Version, members: &[&str]) -> Module {
    let mut builder = ModuleBuilder::new("NativePlugin", Version::new(1, 0, 0, 0));
    let win32 = builder.module_ref("Host.Win32", required);
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
    builder.build().unwrap()
}
