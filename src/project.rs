use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

use crate::config::Config;
use crate::error::ProjectError;
use crate::timing::{Library, Sequence};

const PROJECT_FILE: &str = "project.ron";

/// A sequence other sequences can play by number or by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceData {
    #[serde(default)]
    pub id: Option<u32>,
    #[serde(default)]
    pub name: Option<String>,
    pub events: Sequence,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub config: Config,
    /// The root sequence.
    pub events: Sequence,
    #[serde(default)]
    pub sequences: Vec<SequenceData>,
}

impl Project {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            config: Config::default(),
            events: Sequence::new(),
            sequences: Vec::new(),
        }
    }

    pub fn save(&self, project_path: &Path) -> Result<(), ProjectError> {
        fs::create_dir_all(project_path)?;

        let ron_path = project_path.join(PROJECT_FILE);
        let ron_string = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())?;
        fs::write(&ron_path, ron_string)?;

        info!(path = %ron_path.display(), "project saved");
        Ok(())
    }

    pub fn load(project_path: &Path) -> Result<Self, ProjectError> {
        let ron_path = project_path.join(PROJECT_FILE);
        let ron_string = fs::read_to_string(&ron_path)?;
        let project = Self::from_ron(&ron_string)?;

        info!(path = %ron_path.display(), name = %project.name, "project loaded");
        Ok(project)
    }

    pub fn from_ron(source: &str) -> Result<Self, ProjectError> {
        let project: Project = ron::from_str(source)?;
        project.config.validate()?;
        Ok(project)
    }

    /// Sequences addressable from `sequence` events.
    pub fn library(&self) -> Library {
        let mut library = Library::new();
        for data in &self.sequences {
            library.insert(data.id, data.name.as_deref(), data.events.clone());
        }
        library
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use crate::timing::{Lookup, SequenceRef};

    const DOCUMENT: &str = r#"(
        name: "demo",
        version: "0.1.0",
        events: [
            [0.0, "note", 60.0, 1.0, 0.5],
            [2.0, "sequence", "riff", "bass", 0.0],
        ],
        sequences: [
            (id: Some(3), name: Some("riff"), events: [[0.0, "pitch", 2.0]]),
        ],
    )"#;

    #[test]
    fn parses_tuple_events() {
        let project = Project::from_ron(DOCUMENT).unwrap();

        assert_eq!(project.config, Config::default());
        assert_eq!(project.events.len(), 2);
        assert!(matches!(
            project.events.events()[0].kind,
            EventKind::Note { number, .. } if number == 60.0
        ));
    }

    #[test]
    fn library_resolves_by_name_and_id() {
        let project = Project::from_ron(DOCUMENT).unwrap();
        let library = project.library();

        let by_name = library.find(&SequenceRef::Name("riff".into())).unwrap();
        let by_id = library.find(&SequenceRef::Id(3)).unwrap();
        assert_eq!(by_name, by_id);
        assert!(library.find(&SequenceRef::Id(4)).is_none());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let source = r#"(name: "x", version: "1", config: (timer: (duration: 0.0)), events: [])"#;
        assert!(matches!(
            Project::from_ron(source),
            Err(ProjectError::Config(_))
        ));
    }
}
