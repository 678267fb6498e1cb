//! Role presets: persona plus seed knowledge, loaded from a directory of
//! JSON files at startup. The registry is immutable afterwards — applying a
//! preset mutates a session, never the registry.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

/// A named role bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolePreset {
    pub name: String,
    pub role: String,
    #[serde(default)]
    pub knowledges: Vec<String>,
    #[serde(default)]
    pub relationships: Vec<String>,
    #[serde(default)]
    pub events: Vec<String>,
    #[serde(default)]
    pub bot_self: Vec<String>,
    /// Omitted from listings, still loadable by file name.
    #[serde(default)]
    pub hidden: bool,
}

impl RolePreset {
    /// Everything to bulk-insert into long-term memory when applied.
    pub fn seed_texts(&self) -> Vec<String> {
        self.knowledges
            .iter()
            .chain(&self.relationships)
            .chain(&self.events)
            .chain(&self.bot_self)
            .cloned()
            .collect()
    }
}

fn example_preset() -> RolePreset {
    RolePreset {
        name: "喵喵".to_string(),
        role: "一个可爱的群猫娘，群里的其它人是你的主人，你无条件服从你的主人".to_string(),
        knowledges: vec![
            "猫娘是类人生物".to_string(),
            "猫娘有猫耳和猫尾巴，其它外表特征和人一样".to_string(),
            "猫娘有一部分猫的习性，比如喜欢吃鱼，喜欢喝牛奶".to_string(),
        ],
        relationships: vec!["群里的每个人都是喵喵的主人".to_string()],
        events: Vec::new(),
        bot_self: vec![
            "我是一个可爱的猫娘".to_string(),
            "我会撒娇".to_string(),
            "我会卖萌".to_string(),
            "我对负面言论会不想理".to_string(),
        ],
        hidden: false,
    }
}

/// All presets found on disk, keyed by file name.
pub struct PresetRegistry {
    presets: BTreeMap<String, RolePreset>,
}

impl PresetRegistry {
    /// Load every `*.json` in `dir`. A missing directory is created and
    /// seeded with an example preset first.
    pub fn load(dir: &Path) -> Self {
        let mut presets = BTreeMap::new();

        if !dir.exists() {
            if let Err(e) = seed_example(dir) {
                warn!("failed to seed preset directory {}: {}", dir.display(), e);
            }
        }

        match std::fs::read_dir(dir) {
            Ok(entries) => {
                for entry in entries.flatten() {
                    let path = entry.path();
                    if path.extension().and_then(|e| e.to_str()) != Some("json") {
                        continue;
                    }
                    let file_name = match path.file_name().and_then(|n| n.to_str()) {
                        Some(name) => name.to_string(),
                        None => continue,
                    };
                    match std::fs::read_to_string(&path)
                        .map_err(|e| e.to_string())
                        .and_then(|s| serde_json::from_str::<RolePreset>(&s).map_err(|e| e.to_string()))
                    {
                        Ok(preset) => {
                            presets.insert(file_name, preset);
                        }
                        Err(e) => warn!("cannot load preset {}: {}", file_name, e),
                    }
                }
            }
            Err(e) => warn!("cannot read preset directory {}: {}", dir.display(), e),
        }

        info!("loaded {} presets", presets.len());
        Self { presets }
    }

    pub fn get(&self, file_name: &str) -> Option<&RolePreset> {
        self.presets.get(file_name)
    }

    /// File names of non-hidden presets.
    pub fn visible(&self) -> Vec<&str> {
        self.presets
            .iter()
            .filter(|(_, preset)| !preset.hidden)
            .map(|(file_name, _)| file_name.as_str())
            .collect()
    }
}

fn seed_example(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let json = serde_json::to_string_pretty(&example_preset())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    std::fs::write(dir.join("喵喵.json"), json)
}
