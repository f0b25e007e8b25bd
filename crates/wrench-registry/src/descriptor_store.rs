use std::fs;
use std::io;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use wrench_core::{DescriptorMap, WorkspaceLayout};

pub fn read_descriptors(layout: &WorkspaceLayout) -> Result<DescriptorMap> {
    let path = layout.descriptors_path();
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(DescriptorMap::new()),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed reading app descriptors: {}", path.display()));
        }
    };

    if raw.trim().is_empty() {
        return Ok(DescriptorMap::new());
    }

    serde_json::from_str(&raw)
        .with_context(|| format!("failed parsing app descriptors: {}", path.display()))
}

/// Persist descriptors as a four-space indented JSON object.
pub fn write_descriptors(layout: &WorkspaceLayout, descriptors: &DescriptorMap) -> Result<()> {
    let path = layout.descriptors_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let mut content = Vec::new();
    let mut serializer =
        serde_json::Serializer::with_formatter(&mut content, PrettyFormatter::with_indent(b"    "));
    descriptors
        .serialize(&mut serializer)
        .with_context(|| format!("failed serializing app descriptors: {}", path.display()))?;

    fs::write(&path, content)
        .with_context(|| format!("failed writing app descriptors: {}", path.display()))
}
