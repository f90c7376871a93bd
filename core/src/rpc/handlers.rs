//! Built-in command handlers

// Handlers are stored as fn pointers taking their decoded arguments by value
#![allow(clippy::needless_pass_by_value)]

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::HandlerError;
use super::registry::{
    ExecutionContext, FieldKind, FieldSpec, Handler, HandlerEntry, HandlerRegistry,
};
use super::types::PROTOCOL_VERSION;
use crate::engine::{
    ActorClass, ActorInfo, AssetInfo, AssetKind, EditorAction, EngineError, EngineEvent,
    EngineState, Rotator, Transform, TransformPatch, Vec3,
};
use crate::tickable::Ticks;

/// Default and maximum page size of `get_events`
const EVENTS_DEFAULT_LIMIT: usize = 100;
const EVENTS_MAX_LIMIT: usize = 1000;

#[derive(Debug, Default, Deserialize)]
pub struct NoArgs {}

#[derive(Debug, Serialize)]
pub struct PingResult {
    pub pong: bool,
    pub protocol_version: u32,
    pub server_version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct CommandInfo {
    pub name: &'static str,
    pub summary: &'static str,
    pub context: ExecutionContext,
    pub args: &'static [FieldSpec],
}

#[derive(Debug, Serialize)]
pub struct CapabilitiesResult {
    pub protocol_version: u32,
    pub commands: Vec<CommandInfo>,
}

#[derive(Debug, Deserialize)]
pub struct SpawnActorArgs {
    #[serde(alias = "actor_type")]
    pub class: String,
    pub location: Option<[f64; 3]>,
    pub rotation: Option<[f64; 3]>,
    pub scale: Option<[f64; 3]>,
    pub label: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SceneInfoResult {
    pub tick: Ticks,
    pub actors: Vec<ActorInfo>,
}

#[derive(Debug, Deserialize)]
pub struct ActorArgs {
    pub actor_id: String,
}

#[derive(Debug, Serialize)]
pub struct ActorIdResult {
    pub actor_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SetTransformArgs {
    pub actor_id: String,
    #[serde(flatten)]
    pub patch: TransformPatch,
}

#[derive(Debug, Serialize)]
pub struct TransformResult {
    pub actor_id: String,
    pub transform: Transform,
}

#[derive(Debug, Deserialize)]
pub struct ImportAssetArgs {
    pub file_path: PathBuf,
    pub asset_name: String,
}

#[derive(Debug, Serialize)]
pub struct ImportAssetResult {
    pub asset_path: String,
    pub kind: AssetKind,
}

#[derive(Debug, Deserialize)]
pub struct ListAssetsArgs {
    pub path_prefix: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ListAssetsResult {
    pub assets: Vec<AssetInfo>,
}

#[derive(Debug, Deserialize)]
pub struct ApplyMaterialArgs {
    pub actor_id: String,
    pub texture_asset_path: String,
}

#[derive(Debug, Serialize)]
pub struct ApplyMaterialResult {
    pub actor_id: String,
    pub material_path: String,
}

#[derive(Debug, Serialize)]
pub struct EditorActionResult {
    pub action: &'static str,
    pub selection: Vec<String>,
    pub saved: usize,
}

#[derive(Debug, Deserialize)]
pub struct GetEventsArgs {
    #[serde(default)]
    pub since: u64,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct GetEventsResult {
    pub events: Vec<EngineEvent>,
    /// Cursor to pass as `since` on the next call
    pub next: u64,
}

const NO_ARGS: &[FieldSpec] = &[];
const ACTOR_ARGS: &[FieldSpec] = &[FieldSpec::required("actor_id", FieldKind::String)];

const SPAWN_ACTOR_ARGS: &[FieldSpec] = &[
    FieldSpec::required("class", FieldKind::String).alias("actor_type"),
    FieldSpec::optional("location", FieldKind::Vec3),
    FieldSpec::optional("rotation", FieldKind::Vec3),
    FieldSpec::optional("scale", FieldKind::Vec3),
    FieldSpec::optional("label", FieldKind::String),
];

const SET_TRANSFORM_ARGS: &[FieldSpec] = &[
    FieldSpec::required("actor_id", FieldKind::String),
    FieldSpec::optional("x", FieldKind::Number),
    FieldSpec::optional("y", FieldKind::Number),
    FieldSpec::optional("z", FieldKind::Number),
    FieldSpec::optional("pitch", FieldKind::Number),
    FieldSpec::optional("yaw", FieldKind::Number),
    FieldSpec::optional("roll", FieldKind::Number),
    FieldSpec::optional("scale_x", FieldKind::Number),
    FieldSpec::optional("scale_y", FieldKind::Number),
    FieldSpec::optional("scale_z", FieldKind::Number),
];

const IMPORT_ASSET_ARGS: &[FieldSpec] = &[
    FieldSpec::required("file_path", FieldKind::String),
    FieldSpec::required("asset_name", FieldKind::String),
];

const LIST_ASSETS_ARGS: &[FieldSpec] = &[FieldSpec::optional("path_prefix", FieldKind::String)];

const APPLY_MATERIAL_ARGS: &[FieldSpec] = &[
    FieldSpec::required("actor_id", FieldKind::String),
    FieldSpec::required("texture_asset_path", FieldKind::String),
];

const EDITOR_ACTION_ARGS: &[FieldSpec] = &[
    FieldSpec::required("action", FieldKind::String),
    FieldSpec::optional("actor_id", FieldKind::String),
];

const GET_EVENTS_ARGS: &[FieldSpec] = &[
    FieldSpec::optional("since", FieldKind::Integer),
    FieldSpec::optional("limit", FieldKind::Integer),
];

pub(super) fn builtin_commands() -> Vec<HandlerEntry> {
    vec![
        HandlerEntry {
            name: "ping",
            summary: "Liveness check",
            schema: NO_ARGS,
            handler: Handler::any_thread(ping),
        },
        HandlerEntry {
            name: "capabilities",
            summary: "Lists available commands and their arguments",
            schema: NO_ARGS,
            handler: Handler::any_thread(capabilities),
        },
        HandlerEntry {
            name: "spawn_actor",
            summary: "Spawns an actor of the given class",
            schema: SPAWN_ACTOR_ARGS,
            handler: Handler::main_thread(spawn_actor),
        },
        HandlerEntry {
            name: "get_scene_info",
            summary: "Lists all actors in the world",
            schema: NO_ARGS,
            handler: Handler::main_thread(get_scene_info),
        },
        HandlerEntry {
            name: "get_actor",
            summary: "Describes a single actor",
            schema: ACTOR_ARGS,
            handler: Handler::main_thread(get_actor),
        },
        HandlerEntry {
            name: "delete_actor",
            summary: "Destroys an actor",
            schema: ACTOR_ARGS,
            handler: Handler::main_thread(delete_actor),
        },
        HandlerEntry {
            name: "set_transform",
            summary: "Updates location, rotation and scale of an actor",
            schema: SET_TRANSFORM_ARGS,
            handler: Handler::main_thread(set_transform),
        },
        HandlerEntry {
            name: "import_asset",
            summary: "Imports a file from disk into the generated content folder",
            schema: IMPORT_ASSET_ARGS,
            handler: Handler::main_thread(import_asset),
        },
        HandlerEntry {
            name: "list_assets",
            summary: "Lists registered assets",
            schema: LIST_ASSETS_ARGS,
            handler: Handler::main_thread(list_assets),
        },
        HandlerEntry {
            name: "apply_material",
            summary: "Creates a material from a texture and assigns it to an actor",
            schema: APPLY_MATERIAL_ARGS,
            handler: Handler::main_thread(apply_material),
        },
        HandlerEntry {
            name: "invoke_editor_action",
            summary: "Runs an editor action (save_all, select_actor, clear_selection)",
            schema: EDITOR_ACTION_ARGS,
            handler: Handler::main_thread(invoke_editor_action),
        },
        HandlerEntry {
            name: "get_events",
            summary: "Reads the engine event journal",
            schema: GET_EVENTS_ARGS,
            handler: Handler::main_thread(get_events),
        },
    ]
}

fn ping(_: &HandlerRegistry, _: NoArgs) -> Result<PingResult, HandlerError> {
    Ok(PingResult {
        pong: true,
        protocol_version: PROTOCOL_VERSION,
        server_version: env!("CARGO_PKG_VERSION"),
    })
}

fn capabilities(registry: &HandlerRegistry, _: NoArgs) -> Result<CapabilitiesResult, HandlerError> {
    Ok(CapabilitiesResult {
        protocol_version: PROTOCOL_VERSION,
        commands: registry
            .entries()
            .map(|e| CommandInfo {
                name: e.name,
                summary: e.summary,
                context: e.context(),
                args: e.schema,
            })
            .collect(),
    })
}

fn spawn_actor(state: &mut dyn EngineState, args: SpawnActorArgs) -> Result<ActorInfo, HandlerError> {
    let class =
        ActorClass::from_str(&args.class).map_err(|_| EngineError::UnknownClass(args.class))?;
    let transform = Transform {
        location: args.location.map_or(Vec3::ZERO, Vec3::from),
        rotation: args.rotation.map(Rotator::from).unwrap_or_default(),
        scale: args.scale.map_or(Vec3::ONE, Vec3::from),
    };
    Ok(state.spawn_actor(class, transform, args.label.as_deref())?)
}

fn get_scene_info(state: &mut dyn EngineState, _: NoArgs) -> Result<SceneInfoResult, HandlerError> {
    Ok(SceneInfoResult {
        tick: state.current_tick(),
        actors: state.actors()?,
    })
}

fn get_actor(state: &mut dyn EngineState, args: ActorArgs) -> Result<ActorInfo, HandlerError> {
    Ok(state.actor(&args.actor_id)?)
}

fn delete_actor(state: &mut dyn EngineState, args: ActorArgs) -> Result<ActorIdResult, HandlerError> {
    state.destroy_actor(&args.actor_id)?;
    Ok(ActorIdResult {
        actor_id: args.actor_id,
    })
}

fn set_transform(
    state: &mut dyn EngineState,
    args: SetTransformArgs,
) -> Result<TransformResult, HandlerError> {
    let actor = state.set_actor_transform(&args.actor_id, &args.patch)?;
    Ok(TransformResult {
        actor_id: actor.actor_id,
        transform: actor.transform,
    })
}

fn import_asset(
    state: &mut dyn EngineState,
    args: ImportAssetArgs,
) -> Result<ImportAssetResult, HandlerError> {
    let asset = state.import_asset(&args.file_path, &args.asset_name)?;
    Ok(ImportAssetResult {
        asset_path: asset.path,
        kind: asset.kind,
    })
}

fn list_assets(
    state: &mut dyn EngineState,
    args: ListAssetsArgs,
) -> Result<ListAssetsResult, HandlerError> {
    Ok(ListAssetsResult {
        assets: state.assets(args.path_prefix.as_deref()),
    })
}

fn apply_material(
    state: &mut dyn EngineState,
    args: ApplyMaterialArgs,
) -> Result<ApplyMaterialResult, HandlerError> {
    let material_path = state.apply_material(&args.actor_id, &args.texture_asset_path)?;
    Ok(ApplyMaterialResult {
        actor_id: args.actor_id,
        material_path,
    })
}

fn invoke_editor_action(
    state: &mut dyn EngineState,
    action: EditorAction,
) -> Result<EditorActionResult, HandlerError> {
    let outcome = state.run_editor_action(&action)?;
    Ok(EditorActionResult {
        action: match action {
            EditorAction::SaveAll => "save_all",
            EditorAction::SelectActor { .. } => "select_actor",
            EditorAction::ClearSelection => "clear_selection",
        },
        selection: outcome.selection,
        saved: outcome.saved,
    })
}

fn get_events(state: &mut dyn EngineState, args: GetEventsArgs) -> Result<GetEventsResult, HandlerError> {
    let limit = args
        .limit
        .unwrap_or(EVENTS_DEFAULT_LIMIT)
        .min(EVENTS_MAX_LIMIT);
    let events = state.events_since(args.since, limit);
    let next = events.last().map_or(args.since, |e| e.seq + 1);
    Ok(GetEventsResult { events, next })
}

/// Runs a main-thread command directly against a state handle, bypassing
/// the network. Useful for hosts that script their own engine.
pub fn execute(
    registry: &HandlerRegistry,
    state: &mut dyn EngineState,
    command: &str,
    args: Value,
) -> Result<Value, HandlerError> {
    match registry.get(command).map(|e| &e.handler) {
        Some(Handler::MainThread(prepare)) => {
            let call = prepare(args)?;
            call(state)
        }
        Some(Handler::AnyThread(prepare)) => {
            let call = prepare(args)?;
            call(registry)
        }
        None => Err(HandlerError::UnknownCommand(command.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Scene;
    use crate::rpc::errors::ProtocolError;
    use serde_json::json;

    fn run(state: &mut Scene, command: &str, args: Value) -> Result<Value, HandlerError> {
        let registry = HandlerRegistry::with_builtin_commands();
        execute(&registry, state, command, args)
    }

    #[test]
    fn ping_reports_version() {
        let v = run(&mut Scene::new(), "ping", json!({})).unwrap();
        assert_eq!(v["pong"], true);
        assert_eq!(v["protocol_version"], PROTOCOL_VERSION);
    }

    #[test]
    fn capabilities_lists_commands() {
        let v = run(&mut Scene::new(), "capabilities", json!({})).unwrap();
        let commands = v["commands"].as_array().unwrap();
        assert_eq!(commands.len(), 12);
        let spawn = commands
            .iter()
            .find(|c| c["name"] == "spawn_actor")
            .unwrap();
        assert_eq!(spawn["context"], "main_thread");
        assert_eq!(spawn["args"][0]["name"], "class");
        assert_eq!(spawn["args"][0]["type"], "string");
        assert_eq!(spawn["args"][0]["required"], true);
        assert_eq!(spawn["args"][1]["type"], "vec3");
    }

    #[test]
    fn spawn_actor_with_arrays() {
        let mut s = Scene::new();
        let v = run(
            &mut s,
            "spawn_actor",
            json!({"class": "Cube", "location": [1, 2, 3], "rotation": [0, 90, 0], "scale": [2, 2, 2]}),
        )
        .unwrap();
        assert_eq!(v["actor_id"], "Cube_1");
        assert_eq!(v["class"], "Cube");
        assert_eq!(v["transform"]["location"], json!({"x": 1.0, "y": 2.0, "z": 3.0}));
        assert_eq!(v["transform"]["rotation"]["yaw"], 90.0);
        assert_eq!(v["transform"]["scale"]["x"], 2.0);
    }

    #[test]
    fn spawn_actor_type_alias() {
        let mut s = Scene::new();
        let v = run(&mut s, "spawn_actor", json!({"actor_type": "PointLight"})).unwrap();
        assert_eq!(v["actor_id"], "PointLight_1");
    }

    #[test]
    fn spawn_unknown_class() {
        let err = run(&mut Scene::new(), "spawn_actor", json!({"class": "Teapot"})).unwrap_err();
        assert_eq!(err.to_string(), "unknown actor class: Teapot");
    }

    #[test]
    fn scene_info_and_delete() {
        let mut s = Scene::new();
        run(&mut s, "spawn_actor", json!({"class": "Sphere"})).unwrap();
        let v = run(&mut s, "get_scene_info", json!({})).unwrap();
        assert_eq!(v["actors"].as_array().unwrap().len(), 1);

        let v = run(&mut s, "delete_actor", json!({"actor_id": "Sphere_1"})).unwrap();
        assert_eq!(v, json!({"actor_id": "Sphere_1"}));
        let err = run(&mut s, "get_actor", json!({"actor_id": "Sphere_1"})).unwrap_err();
        assert_eq!(
            err,
            HandlerError::Engine(EngineError::ActorNotFound("Sphere_1".to_string()))
        );
    }

    #[test]
    fn set_transform_partial() {
        let mut s = Scene::new();
        run(&mut s, "spawn_actor", json!({"class": "Cube", "location": [1, 1, 1]})).unwrap();
        let v = run(
            &mut s,
            "set_transform",
            json!({"actor_id": "Cube_1", "z": 50, "roll": 45.0}),
        )
        .unwrap();
        assert_eq!(v["transform"]["location"], json!({"x": 1.0, "y": 1.0, "z": 50.0}));
        assert_eq!(v["transform"]["rotation"]["roll"], 45.0);
    }

    #[test]
    fn material_flow() {
        let mut s = Scene::new();
        let src = std::env::temp_dir().join(format!("enginelink_handlers_{}.png", std::process::id()));
        std::fs::write(&src, b"\x89PNG").unwrap();

        let v = run(
            &mut s,
            "import_asset",
            json!({"file_path": src, "asset_name": "T_Wall"}),
        )
        .unwrap();
        assert_eq!(v, json!({"asset_path": "/Game/Generated/T_Wall", "kind": "texture"}));

        run(&mut s, "spawn_actor", json!({"class": "Plane"})).unwrap();
        let v = run(
            &mut s,
            "apply_material",
            json!({"actor_id": "Plane_1", "texture_asset_path": "/Game/Generated/T_Wall"}),
        )
        .unwrap();
        assert_eq!(v["material_path"], "/Game/Generated/M_Plane_1");

        let v = run(&mut s, "list_assets", json!({"path_prefix": "/Game/Generated/T_"})).unwrap();
        assert_eq!(v["assets"].as_array().unwrap().len(), 1);
        std::fs::remove_file(src).unwrap();
    }

    #[test]
    fn editor_actions() {
        let mut s = Scene::new();
        run(&mut s, "spawn_actor", json!({"class": "Cube"})).unwrap();
        let v = run(
            &mut s,
            "invoke_editor_action",
            json!({"action": "select_actor", "actor_id": "Cube_1"}),
        )
        .unwrap();
        assert_eq!(v["action"], "select_actor");
        assert_eq!(v["selection"], json!(["Cube_1"]));

        let v = run(&mut s, "invoke_editor_action", json!({"action": "save_all"})).unwrap();
        assert_eq!(v["saved"], 0);

        let v = run(&mut s, "invoke_editor_action", json!({"action": "clear_selection"})).unwrap();
        assert_eq!(v["selection"], json!([]));
    }

    #[test]
    fn execute_rejects_undecodable_args() {
        let mut s = Scene::new();
        let err = run(&mut s, "invoke_editor_action", json!({"action": "select_actor"})).unwrap_err();
        assert!(matches!(
            err,
            HandlerError::Protocol(ProtocolError::InvalidArguments(_))
        ));
        let err = run(&mut s, "invoke_editor_action", json!({"action": "explode"})).unwrap_err();
        assert!(err.to_string().starts_with("invalid arguments: "));
        assert_eq!(s.current_tick(), 0);
        assert!(s.events_since(0, 10).is_empty());
    }

    #[test]
    fn events_cursor() {
        let mut s = Scene::new();
        run(&mut s, "spawn_actor", json!({"class": "Cube"})).unwrap();
        run(&mut s, "spawn_actor", json!({"class": "Cube"})).unwrap();

        let v = run(&mut s, "get_events", json!({"limit": 1})).unwrap();
        assert_eq!(v["events"].as_array().unwrap().len(), 1);
        assert_eq!(v["events"][0]["kind"], "actor_spawned");
        assert_eq!(v["next"], 1);

        let v = run(&mut s, "get_events", json!({"since": 1})).unwrap();
        assert_eq!(v["events"][0]["actor_id"], "Cube_2");
        assert_eq!(v["next"], 2);

        let v = run(&mut s, "get_events", json!({"since": 2})).unwrap();
        assert!(v["events"].as_array().unwrap().is_empty());
        assert_eq!(v["next"], 2);
    }

    #[test]
    fn no_world_surfaces_as_error() {
        let mut s = Scene::without_world();
        let err = run(&mut s, "get_scene_info", json!({})).unwrap_err();
        assert_eq!(err.to_string(), "no editor world available");
    }
}
