pub mod compose;
pub mod env;
pub mod frr;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::models::{AddressPlan, Topology};
use crate::topology::resolve;

pub use compose::ComposeFile;
pub use env::{render_env, LabEnv, COMPOSE_FILE, ENV_FILE};
pub use frr::{FrrRenderer, RouterConfig};

/// Rendered files for one lab, keyed by path relative to the lab directory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactSet {
    files: BTreeMap<PathBuf, String>,
}

impl ArtifactSet {
    pub fn insert(&mut self, path: impl Into<PathBuf>, content: impl Into<String>) {
        self.files.insert(path.into(), content.into());
    }

    pub fn get(&self, path: impl AsRef<Path>) -> Option<&str> {
        self.files.get(path.as_ref()).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Write every file under `root`, creating parent directories
    pub fn write_to(&self, root: &Path) -> Result<()> {
        for (rel, content) in &self.files {
            let path = root.join(rel);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, content)?;
        }
        Ok(())
    }
}

/// Render every artifact of a lab (FRR configs, compose descriptor, `.env`). Pure: same inputs, same bytes.
pub fn render_lab(topology: &Topology, plan: &AddressPlan, image: &str) -> Result<ArtifactSet> {
    let nodes = resolve(topology, plan);
    let renderer = FrrRenderer::new()?;
    let mut artifacts = ArtifactSet::default();

    for resolved in &nodes {
        let dir = Path::new("frr").join(&resolved.node.name);
        let config = RouterConfig::from_node(resolved);
        artifacts.insert(dir.join("frr.conf"), renderer.render(&config)?);
        artifacts.insert(dir.join("daemons"), frr::DAEMONS);
        artifacts.insert(dir.join("vtysh.conf"), frr::VTYSH_CONF);
    }

    let compose = ComposeFile::build(topology, plan, &nodes, image);
    artifacts.insert(COMPOSE_FILE, compose.to_yaml()?);
    artifacts.insert(ENV_FILE, render_env(topology, plan));

    tracing::debug!("Rendered {} artifacts for {}", artifacts.len(), topology.lab.name);
    Ok(artifacts)
}
