//! Dense entity × season-slot grid.

use std::collections::{BTreeSet, HashMap};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{FeatureConfig, Frequency, SeasonMonths};
use crate::series::Observation;

/// Demand counts for every (entity, slot) pair of the season timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseGrid {
    pub timeline: Vec<NaiveDateTime>,
    pub entities: Vec<String>,
    /// `counts[e][t]` is the demand of `entities[e]` at `timeline[t]`.
    pub counts: Vec<Vec<f64>>,
}

impl DenseGrid {
    pub fn row_count(&self) -> usize {
        self.entities.len() * self.timeline.len()
    }

    pub fn counts_for(&self, entity_id: &str) -> Option<&[f64]> {
        self.entities
            .iter()
            .position(|entity| entity == entity_id)
            .map(|idx| self.counts[idx].as_slice())
    }
}

/// Every slot between the first and last observation that falls in the season.
pub fn season_timeline(
    observations: &[Observation],
    frequency: Frequency,
    season: SeasonMonths,
) -> Vec<NaiveDateTime> {
    let mut slots = observations.iter().map(|obs| frequency.floor(obs.timestamp));
    let Some(first) = slots.next() else {
        return Vec::new();
    };
    let (min, max) = slots.fold((first, first), |(lo, hi), ts| (lo.min(ts), hi.max(ts)));

    let step = frequency.step();
    let mut out = Vec::new();
    let mut cursor = min;
    while cursor <= max {
        if season.contains(cursor) {
            out.push(cursor);
        }
        cursor += step;
    }
    out
}

/// Entities to model, ascending by id. With a limit, only the highest-volume ones.
pub fn select_entities(observations: &[Observation], limit: Option<usize>) -> Vec<String> {
    let mut totals: HashMap<&str, u64> = HashMap::new();
    for obs in observations {
        *totals.entry(obs.entity_id.as_str()).or_default() += obs.count;
    }

    let mut ranked: Vec<(&str, u64)> = totals.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    if let Some(limit) = limit {
        ranked.truncate(limit);
    }

    let selected: BTreeSet<String> = ranked.into_iter().map(|(id, _)| id.to_string()).collect();
    selected.into_iter().collect()
}

pub fn build_dense_grid(observations: &[Observation], cfg: &FeatureConfig) -> DenseGrid {
    let timeline = season_timeline(observations, cfg.frequency, cfg.season);
    let entities = select_entities(observations, cfg.entity_limit);

    let mut aggregated: HashMap<(&str, NaiveDateTime), u64> = HashMap::new();
    for obs in observations {
        *aggregated
            .entry((obs.entity_id.as_str(), cfg.frequency.floor(obs.timestamp)))
            .or_default() += obs.count;
    }

    let counts: Vec<Vec<f64>> = entities
        .iter()
        .map(|entity| {
            let row: Vec<f64> = timeline
                .iter()
                .map(|ts| {
                    aggregated
                        .get(&(entity.as_str(), *ts))
                        .copied()
                        .unwrap_or(0) as f64
                })
                .collect();
            debug!(
                component = "grid",
                event = "grid.entity.filled",
                entity_id = entity.as_str(),
                observed_slots = row.iter().filter(|v| **v > 0.0).count(),
                slots = row.len()
            );
            row
        })
        .collect();

    let grid = DenseGrid {
        timeline,
        entities,
        counts,
    };

    info!(
        component = "grid",
        event = "grid.build.finish",
        observations = observations.len(),
        entities = grid.entities.len(),
        timeline_points = grid.timeline.len(),
        grid_rows = grid.row_count(),
        frequency = %cfg.frequency
    );

    grid
}
