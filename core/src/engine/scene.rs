use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;

use anyhow::Result;
use log::*;

use super::{
    ActorClass, ActorInfo, AssetInfo, AssetKind, EditorAction, EditorActionOutcome, EngineError,
    EngineEvent, EngineEventKind, EngineState, Transform, TransformPatch,
};
use crate::tickable::{Tickable, Ticks};

/// Content root that imported and generated assets land under
pub const GENERATED_ASSET_ROOT: &str = "/Game/Generated";

/// Number of events kept in the journal before the oldest are dropped
pub const EVENT_JOURNAL_CAPACITY: usize = 1024;

/// In-memory world and asset registry.
///
/// Serves as the host engine for the headless frontend and as the engine
/// state handle in tests.
pub struct Scene {
    world_loaded: bool,
    tick: Ticks,

    /// Actors in spawn order
    actors: Vec<ActorInfo>,
    /// Next generated label suffix, per class
    label_counters: HashMap<ActorClass, u64>,

    assets: BTreeMap<String, AssetInfo>,
    selection: Vec<String>,

    events: VecDeque<EngineEvent>,
    next_event_seq: u64,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

impl Scene {
    pub fn new() -> Self {
        Self {
            world_loaded: true,
            tick: 0,
            actors: Vec::new(),
            label_counters: HashMap::new(),
            assets: BTreeMap::new(),
            selection: Vec::new(),
            events: VecDeque::with_capacity(EVENT_JOURNAL_CAPACITY),
            next_event_seq: 0,
        }
    }

    /// A scene with no world loaded. Every world query fails with
    /// [`EngineError::NoWorld`].
    pub fn without_world() -> Self {
        Self {
            world_loaded: false,
            ..Self::new()
        }
    }

    pub fn actor_count(&self) -> usize {
        self.actors.len()
    }

    fn world(&self) -> Result<(), EngineError> {
        if self.world_loaded {
            Ok(())
        } else {
            Err(EngineError::NoWorld)
        }
    }

    fn position(&self, actor_id: &str) -> Result<usize, EngineError> {
        self.actors
            .iter()
            .position(|a| a.actor_id == actor_id)
            .ok_or_else(|| EngineError::ActorNotFound(actor_id.to_string()))
    }

    fn label_in_use(&self, label: &str) -> bool {
        self.actors.iter().any(|a| a.actor_id == label)
    }

    fn generate_label(&mut self, class: ActorClass) -> String {
        loop {
            let n = self.label_counters.entry(class).or_insert(0);
            *n += 1;
            let label = format!("{}_{}", class, n);
            if !self.label_in_use(&label) {
                return label;
            }
        }
    }

    fn record(&mut self, kind: EngineEventKind) {
        if self.events.len() == EVENT_JOURNAL_CAPACITY {
            self.events.pop_front();
        }
        self.events.push_back(EngineEvent {
            seq: self.next_event_seq,
            tick: self.tick,
            kind,
        });
        self.next_event_seq += 1;
    }

    fn valid_asset_name(name: &str) -> bool {
        !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    }
}

impl Tickable for Scene {
    fn tick(&mut self, ticks: Ticks) -> Result<Ticks> {
        self.tick += ticks;
        Ok(ticks)
    }
}

impl EngineState for Scene {
    fn current_tick(&self) -> Ticks {
        self.tick
    }

    fn spawn_actor(
        &mut self,
        class: ActorClass,
        transform: Transform,
        label: Option<&str>,
    ) -> Result<ActorInfo, EngineError> {
        self.world()?;
        if !transform.is_finite() {
            return Err(EngineError::InvalidTransform(
                "non-finite component".to_string(),
            ));
        }

        let actor_id = match label.filter(|l| !l.is_empty()) {
            Some(l) if self.label_in_use(l) => return Err(EngineError::LabelInUse(l.to_string())),
            Some(l) => l.to_string(),
            None => self.generate_label(class),
        };

        let actor = ActorInfo {
            actor_id: actor_id.clone(),
            class,
            transform: Transform {
                rotation: transform.rotation.normalized(),
                ..transform
            },
            mesh: class.default_mesh().map(str::to_string),
            material: None,
        };
        self.actors.push(actor.clone());
        debug!("Spawned {} as {}", class, actor_id);
        self.record(EngineEventKind::ActorSpawned { actor_id });
        Ok(actor)
    }

    fn actors(&self) -> Result<Vec<ActorInfo>, EngineError> {
        self.world()?;
        Ok(self.actors.clone())
    }

    fn actor(&self, actor_id: &str) -> Result<ActorInfo, EngineError> {
        self.world()?;
        let idx = self.position(actor_id)?;
        Ok(self.actors[idx].clone())
    }

    fn destroy_actor(&mut self, actor_id: &str) -> Result<(), EngineError> {
        self.world()?;
        let idx = self.position(actor_id)?;
        let actor = self.actors.remove(idx);
        self.selection.retain(|s| *s != actor.actor_id);
        debug!("Destroyed {}", actor.actor_id);
        self.record(EngineEventKind::ActorDestroyed {
            actor_id: actor.actor_id,
        });
        Ok(())
    }

    fn set_actor_transform(
        &mut self,
        actor_id: &str,
        patch: &TransformPatch,
    ) -> Result<ActorInfo, EngineError> {
        self.world()?;
        let idx = self.position(actor_id)?;
        let transform = patch.apply(&self.actors[idx].transform);
        if !transform.is_finite() {
            return Err(EngineError::InvalidTransform(
                "non-finite component".to_string(),
            ));
        }
        self.actors[idx].transform = Transform {
            rotation: transform.rotation.normalized(),
            ..transform
        };
        let actor = self.actors[idx].clone();
        self.record(EngineEventKind::ActorMoved {
            actor_id: actor.actor_id.clone(),
        });
        Ok(actor)
    }

    fn import_asset(&mut self, source: &Path, asset_name: &str) -> Result<AssetInfo, EngineError> {
        if !Self::valid_asset_name(asset_name) {
            return Err(EngineError::InvalidAssetName(asset_name.to_string()));
        }
        if !source.is_file() {
            return Err(EngineError::ImportFailed(source.to_path_buf()));
        }
        let Some(kind) = AssetKind::from_source(source) else {
            return Err(EngineError::ImportFailed(source.to_path_buf()));
        };

        let path = format!("{}/{}", GENERATED_ASSET_ROOT, asset_name);
        let asset = AssetInfo {
            path: path.clone(),
            kind,
            source: Some(source.to_string_lossy().into_owned()),
            dirty: true,
        };
        if self.assets.insert(path.clone(), asset.clone()).is_some() {
            info!("Reimported {} from {}", path, source.display());
        } else {
            info!("Imported {} from {}", path, source.display());
        }
        self.record(EngineEventKind::AssetImported { asset_path: path });
        Ok(asset)
    }

    fn assets(&self, path_prefix: Option<&str>) -> Vec<AssetInfo> {
        self.assets
            .values()
            .filter(|a| path_prefix.is_none_or(|p| a.path.starts_with(p)))
            .cloned()
            .collect()
    }

    fn apply_material(
        &mut self,
        actor_id: &str,
        texture_asset_path: &str,
    ) -> Result<String, EngineError> {
        self.world()?;
        let idx = self.position(actor_id)?;
        match self.assets.get(texture_asset_path) {
            Some(a) if a.kind == AssetKind::Texture => (),
            _ => {
                return Err(EngineError::TextureNotFound(
                    texture_asset_path.to_string(),
                ));
            }
        }
        if !self.actors[idx].class.has_mesh_component() {
            return Err(EngineError::NoMeshComponent(actor_id.to_string()));
        }

        let material_path = format!("{}/M_{}", GENERATED_ASSET_ROOT, actor_id);
        self.assets.insert(
            material_path.clone(),
            AssetInfo {
                path: material_path.clone(),
                kind: AssetKind::Material,
                source: Some(texture_asset_path.to_string()),
                dirty: true,
            },
        );
        self.actors[idx].material = Some(material_path.clone());
        self.record(EngineEventKind::MaterialApplied {
            actor_id: actor_id.to_string(),
            material_path: material_path.clone(),
        });
        Ok(material_path)
    }

    fn run_editor_action(
        &mut self,
        action: &EditorAction,
    ) -> Result<EditorActionOutcome, EngineError> {
        let mut saved = 0;
        match action {
            EditorAction::SaveAll => {
                for asset in self.assets.values_mut().filter(|a| a.dirty) {
                    asset.dirty = false;
                    saved += 1;
                }
                info!("Saved {} dirty asset(s)", saved);
                self.record(EngineEventKind::AssetsSaved { count: saved });
            }
            EditorAction::SelectActor { actor_id } => {
                self.world()?;
                self.position(actor_id)?;
                if !self.selection.contains(actor_id) {
                    self.selection.push(actor_id.clone());
                }
                self.record(EngineEventKind::SelectionChanged {
                    selection: self.selection.clone(),
                });
            }
            EditorAction::ClearSelection => {
                self.selection.clear();
                self.record(EngineEventKind::SelectionChanged {
                    selection: Vec::new(),
                });
            }
        }
        Ok(EditorActionOutcome {
            selection: self.selection.clone(),
            saved,
        })
    }

    fn events_since(&self, since: u64, limit: usize) -> Vec<EngineEvent> {
        self.events
            .iter()
            .filter(|e| e.seq >= since)
            .take(limit)
            .cloned()
            .collect()
    }
}
