//! Parallel per-layer planning with strictly sequential flushing.
//!
//! Planning one layer reads only that layer's input and the shared
//! settings, so layers fan out across the rayon pool. The exporter is
//! the sole cross-layer mutable state (position, retraction, extruder,
//! fan, elapsed time), so flushing runs in layer order on the calling
//! thread after the pool barrier. Cancellation is cooperative and
//! checked at layer-task boundaries only: a cancelled run never flushes
//! a partial layer.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use rayon::prelude::*;
use tracing::{debug, warn};

use slicekit_core::{Coord, Error, Point, Polygon, Polygons, Result, SliceSettings};

use crate::export::GcodeSink;
use crate::plan::{FlushState, LayerPlan, StyleSet};
use crate::time::TimeEstimateCalculator;

/// Content of one island on one layer, as supplied by the upstream
/// region generator.
#[derive(Debug, Clone, Default)]
pub struct IslandInput {
    /// Travel-routing boundary for the island.
    pub boundary: Polygons,
    /// Closed wall polygons, outermost first.
    pub walls: Vec<Polygon>,
    /// Parallel infill raster segments.
    pub infill: Vec<(Point, Point)>,
    /// Support raster segments.
    pub support: Vec<(Point, Point)>,
    /// Bridge raster segments; their speed is locked against the
    /// minimum-layer-time governor.
    pub bridges: Vec<(Point, Point)>,
}

impl IslandInput {
    fn is_empty(&self) -> bool {
        self.walls.is_empty()
            && self.infill.is_empty()
            && self.support.is_empty()
            && self.bridges.is_empty()
    }
}

/// Upstream input for one layer.
#[derive(Debug, Clone, Default)]
pub struct LayerInput {
    pub z: Coord,
    pub islands: Vec<IslandInput>,
}

/// Shared progress counter incremented by concurrent layer tasks.
#[derive(Debug, Default)]
pub struct Progress {
    done: AtomicUsize,
    total: usize,
}

impl Progress {
    pub fn new(total: usize) -> Self {
        Self {
            done: AtomicUsize::new(0),
            total,
        }
    }

    fn layer_done(&self) {
        self.done.fetch_add(1, Ordering::Relaxed);
    }

    pub fn done(&self) -> usize {
        self.done.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> usize {
        self.total
    }
}

/// Summary of one planning run.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PlanStats {
    pub layers_planned: usize,
    pub layers_skipped: usize,
    /// Estimated print time over all flushed layers, seconds.
    pub total_time: f64,
}

/// Plan every layer in parallel, then flush them to `sink` in order.
///
/// Empty layers are skipped with a warning rather than failing the run.
/// Setting `cancel` discards all planned work before anything reaches
/// the sink.
pub fn plan_layers(
    layers: &[LayerInput],
    settings: &SliceSettings,
    sink: &mut dyn GcodeSink,
    cancel: &AtomicBool,
    progress: &Progress,
) -> Result<PlanStats> {
    if layers.is_empty() {
        return Err(Error::NoLayers);
    }
    let styles = StyleSet::from_settings(settings);

    let mut plans: Vec<Option<LayerPlan<'_>>> = layers
        .par_iter()
        .enumerate()
        .map(|(index, layer)| {
            if cancel.load(Ordering::Relaxed) {
                return None;
            }
            if layer.islands.iter().all(IslandInput::is_empty) {
                warn!(layer = index, "skipping empty layer");
                progress.layer_done();
                return None;
            }
            let mut plan = LayerPlan::new(
                settings,
                styles.clone(),
                index as u32,
                layer.z,
                Point::ZERO,
            );
            for island in &layer.islands {
                plan.set_island(&island.boundary);
                if !island.walls.is_empty() {
                    plan.extrude_polygons_ordered(&island.walls[..1], &styles.outer_wall);
                    plan.extrude_polygons_ordered(&island.walls[1..], &styles.inner_wall);
                }
                plan.extrude_lines(&island.infill, &styles.infill);
                plan.extrude_lines(&island.support, &styles.support);
                plan.extrude_lines(&island.bridges, &styles.bridge);
            }
            debug!(layer = index, "layer planned");
            progress.layer_done();
            Some(plan)
        })
        .collect();

    if cancel.load(Ordering::Relaxed) {
        return Err(Error::Cancelled { layers_flushed: 0 });
    }

    let mut calc = TimeEstimateCalculator::new(&settings.kinematics);
    let mut state = FlushState::default();
    let mut ratio = 1.0;
    let mut stats = PlanStats::default();
    for plan in plans.iter_mut().flatten() {
        ratio = plan.enforce_minimum_time(&mut calc, ratio);
        plan.finalize_fan();
        plan.flush(sink, &mut state);
        stats.layers_planned += 1;
        stats.total_time += plan.duration();
    }
    stats.layers_skipped = plans.iter().filter(|p| p.is_none()).count();
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::{RecordingSink, SinkOp};

    fn boundary(size: Coord) -> Polygons {
        Polygons::new(vec![Polygon::rectangle(Point::ZERO, Point::new(size, size))])
    }

    fn wall(min: Coord, max: Coord) -> Polygon {
        Polygon::rectangle(Point::new(min, min), Point::new(max, max))
    }

    fn layer(z: Coord) -> LayerInput {
        LayerInput {
            z,
            islands: vec![IslandInput {
                boundary: boundary(20_000),
                walls: vec![wall(2000, 18_000)],
                infill: vec![
                    (Point::new(5000, 5000), Point::new(5000, 15_000)),
                    (Point::new(10_000, 5000), Point::new(10_000, 15_000)),
                ],
                support: Vec::new(),
                bridges: Vec::new(),
            }],
        }
    }

    #[test]
    fn no_layers_is_an_error() {
        let settings = SliceSettings::default();
        let mut sink = RecordingSink::new();
        let cancel = AtomicBool::new(false);
        let progress = Progress::new(0);
        let err = plan_layers(&[], &settings, &mut sink, &cancel, &progress);
        assert!(matches!(err, Err(Error::NoLayers)));
    }

    #[test]
    fn cancellation_leaves_the_sink_untouched() {
        let settings = SliceSettings::default();
        let layers = vec![layer(200), layer(400)];
        let mut sink = RecordingSink::new();
        let cancel = AtomicBool::new(true);
        let progress = Progress::new(layers.len());
        let err = plan_layers(&layers, &settings, &mut sink, &cancel, &progress);
        assert!(matches!(err, Err(Error::Cancelled { layers_flushed: 0 })));
        assert!(sink.ops.is_empty());
    }

    #[test]
    fn empty_layers_are_skipped_not_fatal() {
        let settings = SliceSettings::default();
        let layers = vec![layer(200), LayerInput { z: 400, islands: Vec::new() }];
        let mut sink = RecordingSink::new();
        let cancel = AtomicBool::new(false);
        let progress = Progress::new(layers.len());
        let stats = plan_layers(&layers, &settings, &mut sink, &cancel, &progress).unwrap();
        assert_eq!(stats.layers_planned, 1);
        assert_eq!(stats.layers_skipped, 1);
    }

    #[test]
    fn layers_flush_in_order() {
        let settings = SliceSettings::default();
        let layers = vec![layer(200), layer(400), layer(600)];
        let mut sink = RecordingSink::new();
        let cancel = AtomicBool::new(false);
        let progress = Progress::new(layers.len());
        let stats = plan_layers(&layers, &settings, &mut sink, &cancel, &progress).unwrap();
        assert_eq!(stats.layers_planned, 3);
        assert!(stats.total_time > 0.0);
        assert_eq!(progress.done(), 3);

        let zs: Vec<Coord> = sink
            .ops
            .iter()
            .filter_map(|op| match op {
                SinkOp::SetZ(z) => Some(*z),
                _ => None,
            })
            .collect();
        assert_eq!(zs, vec![200, 400, 600]);
        assert!(sink.extrusions().count() > 0);
    }

    #[test]
    fn wall_and_bridge_styles_reach_the_sink() {
        // Governor disabled (zero floor) so nominal per-style speeds
        // survive to the flushed moves.
        let mut settings = SliceSettings::default();
        settings.cooling.min_layer_time = 0.0;
        let layers = vec![LayerInput {
            z: 200,
            islands: vec![IslandInput {
                boundary: boundary(20_000),
                walls: vec![wall(2000, 18_000), wall(2400, 17_600)],
                infill: Vec::new(),
                support: Vec::new(),
                bridges: vec![(Point::new(5000, 5000), Point::new(9000, 5000))],
            }],
        }];
        let mut sink = RecordingSink::new();
        let cancel = AtomicBool::new(false);
        let progress = Progress::new(layers.len());
        plan_layers(&layers, &settings, &mut sink, &cancel, &progress).unwrap();

        let speeds: std::collections::BTreeSet<i64> = sink
            .extrusions()
            .filter_map(|op| match op {
                SinkOp::Move { speed, .. } => Some(speed.round() as i64),
                _ => None,
            })
            .collect();
        assert!(speeds.contains(&(settings.speed.outer_wall.round() as i64)));
        assert!(speeds.contains(&(settings.speed.inner_wall.round() as i64)));
        assert!(speeds.contains(&(settings.speed.bridge.round() as i64)));
    }
}
