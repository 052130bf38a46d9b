//! Persistence interface for project and track metadata.
//!
//! The engine only reads from a [`TrackStore`]; a real application provides a
//! database-backed implementation. [`MemoryStore`] backs tests and the host.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{CadenzaError, Result};
use crate::track::TrackConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub id: String,
    pub name: String,
    pub sample_rate: u32,
    pub bit_depth: u16,
    pub tempo: f32,
    pub project_path: String,
    /// Unix millis of the last modification
    pub modified_at: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackRecord {
    pub id: String,
    pub project_id: String,
    pub track_index: u32,
    pub config: TrackConfig,
}

pub trait ProjectStore {
    fn insert_project(&mut self, project: ProjectRecord) -> Result<()>;
    fn project(&self, id: &str) -> Result<Option<ProjectRecord>>;
    fn update_project(&mut self, project: ProjectRecord) -> Result<()>;
    fn delete_project(&mut self, id: &str) -> Result<()>;
    /// Most recently modified first
    fn projects(&self) -> Result<Vec<ProjectRecord>>;
}

pub trait TrackStore {
    fn insert_track(&mut self, track: TrackRecord) -> Result<()>;
    fn track(&self, id: &str) -> Result<Option<TrackRecord>>;
    fn update_track(&mut self, track: TrackRecord) -> Result<()>;
    fn delete_track(&mut self, id: &str) -> Result<()>;
    /// Tracks of one project ordered by `track_index`
    fn tracks_for_project(&self, project_id: &str) -> Result<Vec<TrackRecord>>;

    fn max_track_index(&self, project_id: &str) -> Result<Option<u32>> {
        Ok(self
            .tracks_for_project(project_id)?
            .iter()
            .map(|t| t.track_index)
            .max())
    }
}

/// In-memory store keyed by record id
#[derive(Debug, Default)]
pub struct MemoryStore {
    projects: BTreeMap<String, ProjectRecord>,
    tracks: BTreeMap<String, TrackRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProjectStore for MemoryStore {
    fn insert_project(&mut self, project: ProjectRecord) -> Result<()> {
        self.projects.insert(project.id.clone(), project);
        Ok(())
    }

    fn project(&self, id: &str) -> Result<Option<ProjectRecord>> {
        Ok(self.projects.get(id).cloned())
    }

    fn update_project(&mut self, project: ProjectRecord) -> Result<()> {
        let slot = self
            .projects
            .get_mut(&project.id)
            .ok_or_else(|| CadenzaError::ProjectNotFound(project.id.clone()))?;
        *slot = project;
        Ok(())
    }

    fn delete_project(&mut self, id: &str) -> Result<()> {
        self.projects
            .remove(id)
            .ok_or_else(|| CadenzaError::ProjectNotFound(id.to_string()))?;
        self.tracks.retain(|_, t| t.project_id != id);
        Ok(())
    }

    fn projects(&self) -> Result<Vec<ProjectRecord>> {
        let mut projects: Vec<_> = self.projects.values().cloned().collect();
        projects.sort_by(|a, b| b.modified_at.cmp(&a.modified_at));
        Ok(projects)
    }
}

impl TrackStore for MemoryStore {
    fn insert_track(&mut self, track: TrackRecord) -> Result<()> {
        if !self.projects.contains_key(&track.project_id) {
            return Err(CadenzaError::ProjectNotFound(track.project_id));
        }
        self.tracks.insert(track.id.clone(), track);
        Ok(())
    }

    fn track(&self, id: &str) -> Result<Option<TrackRecord>> {
        Ok(self.tracks.get(id).cloned())
    }

    fn update_track(&mut self, track: TrackRecord) -> Result<()> {
        let Some(slot) = self.tracks.get_mut(&track.id) else {
            return Ok(());
        };
        *slot = track;
        Ok(())
    }

    fn delete_track(&mut self, id: &str) -> Result<()> {
        self.tracks.remove(id);
        Ok(())
    }

    fn tracks_for_project(&self, project_id: &str) -> Result<Vec<TrackRecord>> {
        let mut tracks: Vec<_> = self
            .tracks
            .values()
            .filter(|t| t.project_id == project_id)
            .cloned()
            .collect();
        tracks.sort_by_key(|t| t.track_index);
        Ok(tracks)
    }
}
