//! Species and move name lookup.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

const MOVE_NAMES: &[(u32, &str)] = &[
    (10, "Scratch"),
    (13, "Razor Wind"),
    (14, "Swords Dance"),
    (15, "Cut"),
    (33, "Tackle"),
    (45, "Growl"),
    (52, "Ember"),
    (53, "Flamethrower"),
    (55, "Water Gun"),
    (57, "Surf"),
    (58, "Ice Beam"),
    (64, "Peck"),
    (71, "Absorb"),
    (72, "Mega Drain"),
    (83, "Fire Spin"),
    (88, "Rock Throw"),
    (89, "Earthquake"),
    (116, "Focus Energy"),
    (163, "Slash"),
    (172, "Flame Wheel"),
    (202, "Giga Drain"),
    (224, "Mega Kick"),
    (241, "Sunny Day"),
    (249, "Rock Smash"),
    (257, "Heat Wave"),
    (299, "Blaze Kick"),
    (315, "Overheat"),
    (394, "Flare Blitz"),
];

/// Species id to display name.
#[derive(Debug, Clone, Default)]
pub struct SpeciesNames {
    names: HashMap<u32, String>,
}

#[derive(Deserialize)]
struct SpeciesFile {
    #[serde(default)]
    species: HashMap<String, String>,
}

impl SpeciesNames {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `{"species": {"1": "Bulbasaur", ...}}`. Non-numeric keys are skipped.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        let file: SpeciesFile = serde_json::from_str(text)?;
        let names = file
            .species
            .into_iter()
            .filter_map(|(id, name)| id.parse().ok().map(|id| (id, name)))
            .collect();
        Ok(Self { names })
    }

    /// Load the species table, returning an empty table if the file is unusable.
    pub fn load_or_empty(path: &Path) -> Self {
        let loaded = std::fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|text| Self::from_json(&text).map_err(|e| e.to_string()));
        match loaded {
            Ok(names) => {
                tracing::info!(count = names.len(), "loaded species names");
                names
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "species names unavailable");
                Self::default()
            }
        }
    }

    pub fn insert(&mut self, id: u32, name: impl Into<String>) {
        self.names.insert(id, name.into());
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn name(&self, id: u32) -> String {
        if id == 0 {
            return "???".to_string();
        }
        self.names
            .get(&id)
            .cloned()
            .unwrap_or_else(|| format!("Pokemon #{id}"))
    }
}

pub fn move_name(id: u32) -> String {
    MOVE_NAMES
        .iter()
        .find(|(move_id, _)| *move_id == id)
        .map(|(_, name)| (*name).to_string())
        .unwrap_or_else(|| format!("Move #{id}"))
}
