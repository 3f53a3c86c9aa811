//! Chart artifact lifecycle: workspace → render → discover → read → delete.
//!
//! Layouts:
//!   Isolated  each request renders into `<root>/<correlation_id>/`, removed on drop
//!   Shared    every request renders into `<root>`; discovery is by correlation id only
//!
//! The "newest file with the right extension" fallback only ever runs inside
//! an isolated directory, where no other request can have written.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::Deserialize;
use tracing::{debug, info, warn};

use super::engine::ChartEngine;
use super::types::{
    mime_for_extension, ArtifactHandle, BirthQuery, ChartFacts, CorrelationId, RenderFailure, RenderTarget,
    SubjectRequest,
};
use crate::location::GeoCoordinate;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageLayout {
    #[default]
    Isolated,
    Shared,
}

/// Renders charts through a [`ChartEngine`] and hands back their bytes.
pub struct ChartArtifactManager {
    engine: Arc<dyn ChartEngine>,
    root: PathBuf,
    layout: StorageLayout,
    extension: String,
    theme: String,
}

impl ChartArtifactManager {
    pub fn new(engine: Arc<dyn ChartEngine>, root: impl Into<PathBuf>) -> Self {
        Self {
            engine,
            root: root.into(),
            layout: StorageLayout::Isolated,
            extension: "svg".into(),
            theme: "dark".into(),
        }
    }

    pub fn with_layout(mut self, layout: StorageLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_theme(mut self, theme: impl Into<String>) -> Self {
        self.theme = theme.into();
        self
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn render(
        &self,
        query: &BirthQuery,
        coord: &GeoCoordinate,
    ) -> Result<(ArtifactHandle, ChartFacts), RenderFailure> {
        let started = Instant::now();
        query.timestamp()?;

        let correlation_id = CorrelationId::new();
        let workspace = RequestWorkspace::open(&self.root, self.layout, &correlation_id)?;
        debug!(correlation_id = %correlation_id, dir = %workspace.dir.display(), "render workspace ready");

        let request = SubjectRequest {
            name: query.name_or_default().to_string(),
            year: query.year,
            month: query.month,
            day: query.day,
            hour: query.hour,
            minute: query.minute,
            city: query.place.trim().to_string(),
            lat: coord.latitude,
            lng: coord.longitude,
            tz_str: coord.time_zone_id.clone(),
            online: false,
        };

        let subject = self.engine.compute(&request).map_err(RenderFailure::Computation)?;
        let facts = ChartFacts::from_subject(&subject)?;

        let target = RenderTarget {
            dir: workspace.dir.clone(),
            tag: correlation_id.to_string(),
            theme: self.theme.clone(),
        };
        self.engine.render(&subject, &target).map_err(RenderFailure::Rendering)?;

        let path = discover_artifact(&workspace.dir, &correlation_id, &self.extension, workspace.isolated)?
            .ok_or_else(|| RenderFailure::ArtifactNotFound(correlation_id.clone()))?;

        let content = take_artifact(&path)?;
        if content.is_empty() {
            return Err(RenderFailure::EmptyArtifact(correlation_id));
        }

        info!(
            correlation_id = %correlation_id,
            bytes = content.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "chart rendered"
        );

        let handle = ArtifactHandle {
            correlation_id,
            content,
            mime_type: mime_for_extension(&self.extension),
        };
        Ok((handle, facts))
    }
}

/// Directory a single request renders into. Isolated workspaces are
/// removed when dropped, whatever happened in between.
struct RequestWorkspace {
    dir: PathBuf,
    isolated: bool,
}

impl RequestWorkspace {
    fn open(root: &Path, layout: StorageLayout, id: &CorrelationId) -> std::io::Result<Self> {
        let (dir, isolated) = match layout {
            StorageLayout::Isolated => (root.join(id.as_str()), true),
            StorageLayout::Shared => (root.to_path_buf(), false),
        };
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, isolated })
    }
}

impl Drop for RequestWorkspace {
    fn drop(&mut self) {
        if self.isolated {
            if let Err(e) = fs::remove_dir_all(&self.dir) {
                warn!(dir = %self.dir.display(), error = %e, "failed to remove render workspace");
            }
        }
    }
}

/// Read the artifact once and delete it, whether or not the read succeeded.
fn take_artifact(path: &Path) -> std::io::Result<Vec<u8>> {
    let content = fs::read(path);
    remove_quietly(path);
    content
}

fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        warn!(path = %path.display(), error = %e, "failed to delete transient artifact");
    }
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(extension))
}

/// Find the artifact whose file name carries `id` (case-insensitive).
///
/// Prefers a tagged file with the expected extension over any other tagged
/// file. With `allow_fallback`, a directory holding exactly one file of the
/// expected extension yields that file.
pub fn discover_artifact(
    dir: &Path,
    id: &CorrelationId,
    extension: &str,
    allow_fallback: bool,
) -> std::io::Result<Option<PathBuf>> {
    let needle = id.as_str().to_lowercase();
    let mut tagged = Vec::new();
    let mut untagged = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_lowercase();
        if name.contains(&needle) {
            tagged.push(path);
        } else if has_extension(&path, extension) {
            untagged.push(path);
        }
    }

    tagged.sort_by_key(|p| !has_extension(p, extension));
    if let Some(path) = tagged.into_iter().next() {
        return Ok(Some(path));
    }

    if allow_fallback && untagged.len() == 1 {
        let path = untagged.remove(0);
        warn!(
            correlation_id = %id,
            path = %path.display(),
            "artifact name lacks correlation id, using the only candidate in the isolated workspace"
        );
        return Ok(Some(path));
    }

    Ok(None)
}
