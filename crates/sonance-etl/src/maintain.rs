//! Brings the persisted vector index in line with the store.

use sonance_core::model::TrackId;
use sonance_core::MetadataStore;
use sonance_search::maintenance::{plan, MaintenanceAction, MaintenancePlan};
use sonance_search::{SharedIndex, VectorIndex};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::{EtlError, EtlResult};

/// Update or rebuild the index after an indexing run.
///
/// `changed` are the tracks that gained features this run and `deleted`
/// the tracks removed from the store. Incremental updates also pick up
/// any drift between the index and the store, such as features committed
/// by a run that was interrupted before maintenance.
///
/// Incremental failures are logged and answered with a full rebuild;
/// only rebuild failures are returned.
pub fn maintain_index<S: MetadataStore + ?Sized>(
    store: &S,
    index: &SharedIndex,
    changed: &[TrackId],
    deleted: &[TrackId],
    threshold: f64,
) -> EtlResult<MaintenanceAction> {
    if !index.exists_on_disk() {
        log::info!("No index at {}; building from scratch", index.path().display());
        return rebuild(store, index).map(|built| {
            built.map_or(MaintenanceAction::Skipped, |indexed| {
                MaintenanceAction::ColdBuild { indexed }
            })
        });
    }

    let current = match index.get() {
        Ok(current) => current,
        Err(e) => {
            log::warn!("Failed to load index ({e}); rebuilding");
            return fallback_rebuild(store, index);
        }
    };

    match plan(true, current.len(), changed.len(), threshold) {
        MaintenancePlan::ColdBuild | MaintenancePlan::Rebuild => {
            log::info!(
                "{} of {} tracks changed; rebuilding index",
                changed.len(),
                current.len()
            );
            rebuild(store, index).map(|built| {
                built.map_or(MaintenanceAction::Skipped, |indexed| {
                    MaintenanceAction::Rebuild {
                        indexed,
                        fallback: false,
                    }
                })
            })
        }
        MaintenancePlan::Incremental => {
            match incremental(store, index, &current, changed, deleted) {
                Ok(action) => Ok(action),
                Err(e) => {
                    log::warn!("Incremental index update failed ({e}); rebuilding");
                    fallback_rebuild(store, index)
                }
            }
        }
    }
}

fn fallback_rebuild<S: MetadataStore + ?Sized>(
    store: &S,
    index: &SharedIndex,
) -> EtlResult<MaintenanceAction> {
    rebuild(store, index).map(|built| {
        built.map_or(MaintenanceAction::Skipped, |indexed| {
            MaintenanceAction::Rebuild {
                indexed,
                fallback: true,
            }
        })
    })
}

/// Build from every featured track and publish. Returns the indexed
/// count, or `None` (after removing any stale index) when nothing has
/// features.
fn rebuild<S: MetadataStore + ?Sized>(store: &S, index: &SharedIndex) -> EtlResult<Option<usize>> {
    let featured = store.tracks_with_features()?;
    if featured.is_empty() {
        log::info!("No tracks with features; skipping index build");
        index.clear()?;
        return Ok(None);
    }

    let (ids, vectors): (Vec<TrackId>, Vec<Vec<f32>>) = featured
        .into_iter()
        .filter_map(|(track, features)| track.id.map(|id| (id, features.vector)))
        .unzip();

    let mut built = VectorIndex::new();
    built.build(&vectors, &ids)?;
    let indexed = built.len();
    index.publish(built)?;
    log::info!("Index built with {indexed} tracks");
    Ok(Some(indexed))
}

fn incremental<S: MetadataStore + ?Sized>(
    store: &S,
    index: &SharedIndex,
    current: &Arc<VectorIndex>,
    changed: &[TrackId],
    deleted: &[TrackId],
) -> EtlResult<MaintenanceAction> {
    let featured: BTreeSet<TrackId> = store.featured_track_ids()?.into_iter().collect();

    let mut to_add: BTreeSet<TrackId> = changed.iter().copied().collect();
    to_add.extend(featured.iter().filter(|id| !current.contains(**id)));

    let mut to_remove: BTreeSet<TrackId> = deleted
        .iter()
        .copied()
        .filter(|id| current.contains(*id))
        .collect();
    to_remove.extend(current.ids().iter().filter(|id| !featured.contains(id)));
    to_add.retain(|id| !to_remove.contains(id));

    if to_add.is_empty() && to_remove.is_empty() {
        log::info!("Index already up to date ({} tracks)", current.len());
        return Ok(MaintenanceAction::Unchanged);
    }

    let mut ids = Vec::with_capacity(to_add.len());
    let mut vectors = Vec::with_capacity(to_add.len());
    for id in to_add {
        let features = store.get_features(id)?.ok_or_else(|| {
            EtlError::Store(sonance_core::Error::NotFound {
                entity: "features",
                id: id.to_string(),
            })
        })?;
        ids.push(id);
        vectors.push(features.vector);
    }

    let mut updated = VectorIndex::clone(current);
    let removed_ids: Vec<TrackId> = to_remove.into_iter().collect();
    let removed = updated.remove_vectors(&removed_ids);
    if !ids.is_empty() {
        updated.add_vectors(&vectors, &ids)?;
    }

    if updated.is_empty() {
        index.clear()?;
        return Ok(MaintenanceAction::Skipped);
    }

    let added = ids.len();
    index.publish(updated)?;
    log::info!("Index updated: {added} added, {removed} removed");
    Ok(MaintenanceAction::Incremental { added, removed })
}
