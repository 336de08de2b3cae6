//! Per-AOI scene selection: dedupe, footprint check, same-day
//! sequencing.

use crate::domain::model::{AreaOfInterest, SceneRecord, SequencedScene};
use chrono::NaiveDate;
use geo::Intersects;
use std::collections::{BTreeMap, HashSet};

/// Order the raw catalog matches for one AOI and assign same-day
/// sequence indices.
///
/// Scenes are deduplicated by id, filtered to those whose footprint
/// actually intersects the AOI polygon (the bbox search is lenient),
/// grouped by UTC calendar date, and within each date ordered by
/// acquisition time with lexical scene id as the tie-break. Indices
/// depend only on the sort key, never on retrieval order, so re-runs
/// against identical catalog state are deterministic.
pub fn sequence_scenes(aoi: &AreaOfInterest, scenes: Vec<SceneRecord>) -> Vec<SequencedScene> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut by_date: BTreeMap<NaiveDate, Vec<SceneRecord>> = BTreeMap::new();

    for scene in scenes {
        if !seen.insert(scene.scene_id.clone()) {
            tracing::debug!("dropping duplicate catalog item {}", scene.scene_id);
            continue;
        }
        if !scene.footprint.intersects(&aoi.search_polygon) {
            tracing::debug!(
                "dropping {}: footprint does not intersect AOI '{}'",
                scene.scene_id,
                aoi.prefix
            );
            continue;
        }
        by_date.entry(scene.acquisition_date()).or_default().push(scene);
    }

    let mut sequenced = Vec::new();
    for (_date, mut group) in by_date {
        group.sort_by(|a, b| {
            a.acquired
                .cmp(&b.acquired)
                .then_with(|| a.scene_id.cmp(&b.scene_id))
        });
        for (sequence_index, record) in group.into_iter().enumerate() {
            sequenced.push(SequencedScene {
                record,
                sequence_index,
            });
        }
    }
    sequenced
}
