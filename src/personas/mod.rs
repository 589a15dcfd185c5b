//! Persona bundles: named greeting/goodbye/system-instruction sets that
//! shape the AI's reply style. Stored as `<name>.toml` files in the
//! workspace `personas/` directory; a built-in `default` keeps a fresh
//! install working without any files on disk.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Persona {
    #[serde(default)]
    pub display_name: String,
    pub system_instruction: String,
    pub greeting: String,
    pub goodbye: String,
}

impl Persona {
    /// The built-in persona used when no file overrides it.
    pub fn builtin_default() -> Self {
        Self {
            display_name: "Default Assistant".into(),
            system_instruction: "You are a friendly assistant helping the streamer engage \
                                 with live chat. Keep replies short, warm, and on-topic."
                .into(),
            greeting: "Hello! The AI assistant is here to support the stream!".into(),
            goodbye: "That's it for today's stream — thanks everyone!".into(),
        }
    }
}

pub struct PersonaStore {
    dir: PathBuf,
}

impl PersonaStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.toml"))
    }

    /// Look up a persona by name. `default` always resolves (built-in
    /// fallback); any other unknown name is `None`.
    pub fn get(&self, name: &str) -> Option<Persona> {
        // Refuse names that could escape the personas directory.
        if name.is_empty() || name.contains(['/', '\\', '.']) {
            return None;
        }

        let path = self.path_for(name);
        match std::fs::read_to_string(&path) {
            Ok(content) => match toml::from_str::<Persona>(&content) {
                Ok(mut persona) => {
                    if persona.display_name.is_empty() {
                        persona.display_name = name.to_string();
                    }
                    Some(persona)
                }
                Err(e) => {
                    tracing::warn!(persona = %name, "malformed persona file: {e}");
                    None
                }
            },
            Err(_) if name == "default" => Some(Persona::builtin_default()),
            Err(_) => None,
        }
    }

    /// Resolve the active persona for a cycle, falling back to the
    /// built-in default when the named file has vanished.
    pub fn current_or_default(&self, name: &str) -> Persona {
        self.get(name).unwrap_or_else(|| {
            tracing::warn!(persona = %name, "persona unavailable — using built-in default");
            Persona::builtin_default()
        })
    }

    /// Names of available personas (`default` always included).
    pub fn list(&self) -> Vec<String> {
        let mut names = vec!["default".to_string()];
        if let Ok(entries) = std::fs::read_dir(&self.dir) {
            for entry in entries.flatten() {
                let file_name = entry.file_name();
                let Some(name) = file_name.to_str().and_then(|f| f.strip_suffix(".toml")) else {
                    continue;
                };
                if name != "default" {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        names
    }
}
