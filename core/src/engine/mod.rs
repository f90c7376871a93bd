//! Engine state abstraction
//!
//! Handlers never touch engine globals. Every invocation receives an explicit
//! `&mut dyn EngineState` for the duration of one synchronous call and returns
//! the plain value types defined here, so nothing owned by the engine outlives
//! a tick.

mod errors;
mod scene;

pub use errors::EngineError;
pub use scene::{EVENT_JOURNAL_CAPACITY, GENERATED_ASSET_ROOT, Scene};

use std::path::Path;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::tickable::Ticks;

/// A point or scale in world space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const ZERO: Self = Self::new(0.0, 0.0, 0.0);
    pub const ONE: Self = Self::new(1.0, 1.0, 1.0);

    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl From<[f64; 3]> for Vec3 {
    fn from(v: [f64; 3]) -> Self {
        Self::new(v[0], v[1], v[2])
    }
}

/// Rotation in degrees
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rotator {
    pub pitch: f64,
    pub yaw: f64,
    pub roll: f64,
}

impl Rotator {
    pub const fn new(pitch: f64, yaw: f64, roll: f64) -> Self {
        Self { pitch, yaw, roll }
    }

    pub fn is_finite(&self) -> bool {
        self.pitch.is_finite() && self.yaw.is_finite() && self.roll.is_finite()
    }

    /// Wraps every axis into the (-180, 180] range
    pub fn normalized(self) -> Self {
        fn wrap(deg: f64) -> f64 {
            let d = deg.rem_euclid(360.0);
            if d > 180.0 { d - 360.0 } else { d }
        }
        Self::new(wrap(self.pitch), wrap(self.yaw), wrap(self.roll))
    }
}

impl From<[f64; 3]> for Rotator {
    fn from(v: [f64; 3]) -> Self {
        Self::new(v[0], v[1], v[2])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub location: Vec3,
    pub rotation: Rotator,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            location: Vec3::ZERO,
            rotation: Rotator::default(),
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    pub fn at(location: Vec3) -> Self {
        Self {
            location,
            ..Default::default()
        }
    }

    pub fn is_finite(&self) -> bool {
        self.location.is_finite() && self.rotation.is_finite() && self.scale.is_finite()
    }
}

/// Partial transform update; unset fields keep their current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformPatch {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
    pub pitch: Option<f64>,
    pub yaw: Option<f64>,
    pub roll: Option<f64>,
    pub scale_x: Option<f64>,
    pub scale_y: Option<f64>,
    pub scale_z: Option<f64>,
}

impl TransformPatch {
    pub fn apply(&self, t: &Transform) -> Transform {
        Transform {
            location: Vec3::new(
                self.x.unwrap_or(t.location.x),
                self.y.unwrap_or(t.location.y),
                self.z.unwrap_or(t.location.z),
            ),
            rotation: Rotator::new(
                self.pitch.unwrap_or(t.rotation.pitch),
                self.yaw.unwrap_or(t.rotation.yaw),
                self.roll.unwrap_or(t.rotation.roll),
            ),
            scale: Vec3::new(
                self.scale_x.unwrap_or(t.scale.x),
                self.scale_y.unwrap_or(t.scale.y),
                self.scale_z.unwrap_or(t.scale.z),
            ),
        }
    }
}

/// Spawnable actor classes
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
#[strum(ascii_case_insensitive)]
pub enum ActorClass {
    StaticMeshActor,
    PointLight,
    SpotLight,
    DirectionalLight,
    CameraActor,
    PlayerStart,
    Cube,
    Sphere,
    Cylinder,
    Cone,
    Plane,
}

impl ActorClass {
    /// Mesh asset assigned on spawn, for classes that carry a static mesh component
    pub fn default_mesh(self) -> Option<&'static str> {
        match self {
            Self::StaticMeshActor | Self::Cube => Some("/Engine/BasicShapes/Cube.Cube"),
            Self::Sphere => Some("/Engine/BasicShapes/Sphere.Sphere"),
            Self::Cylinder => Some("/Engine/BasicShapes/Cylinder.Cylinder"),
            Self::Cone => Some("/Engine/BasicShapes/Cone.Cone"),
            Self::Plane => Some("/Engine/BasicShapes/Plane.Plane"),
            Self::PointLight
            | Self::SpotLight
            | Self::DirectionalLight
            | Self::CameraActor
            | Self::PlayerStart => None,
        }
    }

    pub fn has_mesh_component(self) -> bool {
        self.default_mesh().is_some()
    }
}

/// Snapshot of one actor, detached from the world it came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorInfo {
    pub actor_id: String,
    pub class: ActorClass,
    pub transform: Transform,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mesh: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub material: Option<String>,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AssetKind {
    Texture,
    StaticMesh,
    Sound,
    Material,
}

impl AssetKind {
    /// Infers the imported asset kind from a source file extension
    pub fn from_source(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "png" | "jpg" | "jpeg" | "tga" | "bmp" | "exr" | "hdr" => Some(Self::Texture),
            "fbx" | "obj" | "gltf" | "glb" => Some(Self::StaticMesh),
            "wav" | "ogg" | "flac" => Some(Self::Sound),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetInfo {
    pub path: String,
    pub kind: AssetKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub dirty: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EngineEventKind {
    ActorSpawned { actor_id: String },
    ActorDestroyed { actor_id: String },
    ActorMoved { actor_id: String },
    AssetImported { asset_path: String },
    MaterialApplied { actor_id: String, material_path: String },
    AssetsSaved { count: usize },
    SelectionChanged { selection: Vec<String> },
}

/// Journal entry describing a change to engine state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineEvent {
    pub seq: u64,
    pub tick: Ticks,
    #[serde(flatten)]
    pub kind: EngineEventKind,
}

/// Editor-level operations that are not tied to a single world object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum EditorAction {
    SaveAll,
    SelectActor { actor_id: String },
    ClearSelection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditorActionOutcome {
    pub selection: Vec<String>,
    pub saved: usize,
}

/// Accessors for world and asset state exposed by the host engine.
///
/// All methods must be called from the engine's main thread. Implementations
/// hand out owned snapshots only.
pub trait EngineState {
    /// Number of main-loop ticks completed so far
    fn current_tick(&self) -> Ticks;

    fn spawn_actor(
        &mut self,
        class: ActorClass,
        transform: Transform,
        label: Option<&str>,
    ) -> Result<ActorInfo, EngineError>;

    fn actors(&self) -> Result<Vec<ActorInfo>, EngineError>;

    fn actor(&self, actor_id: &str) -> Result<ActorInfo, EngineError>;

    fn destroy_actor(&mut self, actor_id: &str) -> Result<(), EngineError>;

    fn set_actor_transform(
        &mut self,
        actor_id: &str,
        patch: &TransformPatch,
    ) -> Result<ActorInfo, EngineError>;

    fn import_asset(&mut self, source: &Path, asset_name: &str) -> Result<AssetInfo, EngineError>;

    fn assets(&self, path_prefix: Option<&str>) -> Vec<AssetInfo>;

    /// Creates a material from a texture asset and assigns it to the actor's mesh.
    /// Returns the material asset path.
    fn apply_material(
        &mut self,
        actor_id: &str,
        texture_asset_path: &str,
    ) -> Result<String, EngineError>;

    fn run_editor_action(
        &mut self,
        action: &EditorAction,
    ) -> Result<EditorActionOutcome, EngineError>;

    /// Events with a sequence number of at least `since`, oldest first
    fn events_since(&self, since: u64, limit: usize) -> Vec<EngineEvent>;
}
