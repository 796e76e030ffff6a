use derive_new::new;
use serde::{Deserialize, Serialize};

use crate::arm_hal::Waypoint;

/// A block location as written in the installation file.  `r` is optional, a missing rotation
/// falls back to the configured default when the point is resolved.
#[derive(Debug, PartialEq, Copy, Clone, Serialize, Deserialize, new)]
#[serde(deny_unknown_fields)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r: Option<f64>,
}

impl Position {
    pub fn rotation_or(&self, default_rotation: f64) -> f64 {
        self.r.unwrap_or(default_rotation)
    }

    pub fn resolve(&self, default_rotation: f64) -> Waypoint {
        self.at_height(self.z, default_rotation)
    }

    /// Same x/y/rotation, different z.  Used for the clearance moves above a block.
    pub fn at_height(&self, z: f64, default_rotation: f64) -> Waypoint {
        Waypoint::new(self.x, self.y, z, self.rotation_or(default_rotation))
    }

    pub fn reach(&self) -> f64 {
        self.x.hypot(self.y)
    }
}

/// One block to move from `pick` to `drop`.  Immutable once built; the containing list decides
/// execution order.
#[derive(Debug, PartialEq, Clone, Serialize)]
pub struct BlockTask {
    id: u32,
    pick: Position,
    drop: Position,
}

impl BlockTask {
    pub fn new(id: u32, pick: Position, drop: Position) -> Self {
        Self { id, pick, drop }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn pick_point(&self) -> &Position {
        &self.pick
    }

    pub fn drop_point(&self) -> &Position {
        &self.drop
    }

    /// The task that puts this block back where it came from.  Each point keeps its own rotation.
    pub fn reversed(&self) -> BlockTask {
        BlockTask::new(self.id, self.drop, self.pick)
    }
}

/// Numbers pick/drop pairs from 1 in iteration order.
pub fn number_tasks(pairs: impl IntoIterator<Item = (Position, Position)>) -> Vec<BlockTask> {
    pairs
        .into_iter()
        .zip(1..)
        .map(|((pick, drop), id)| BlockTask::new(id, pick, drop))
        .collect()
}

/// Return-leg task list: same order and ids, pick and drop swapped.
pub fn reverse_tasks(tasks: &[BlockTask]) -> Vec<BlockTask> {
    tasks.iter().map(BlockTask::reversed).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tasks() -> Vec<BlockTask> {
        number_tasks(vec![
            (Position::new(252.87, -49.02, -14.23, None), Position::new(243.327, 49.75, -15.83, Some(-10.0))),
            (Position::new(245.92, 6.15, -14.30, None), Position::new(242.36, 99.21, -15.52, Some(2.16))),
            (Position::new(316.89, -40.12, -14.31, None), Position::new(300.19, 53.44, -9.58, Some(-11.53))),
        ])
    }

    #[test]
    fn ids_are_one_based_in_order() {
        let ids: Vec<u32> = sample_tasks().iter().map(BlockTask::id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn reversed_list_swaps_every_pair_in_place() {
        let tasks = sample_tasks();
        let reversed = reverse_tasks(&tasks);
        assert_eq!(reversed.len(), tasks.len());
        for (original, back) in tasks.iter().zip(&reversed) {
            assert_eq!(back.id(), original.id());
            assert_eq!(back.pick_point(), original.drop_point());
            assert_eq!(back.drop_point(), original.pick_point());
        }
        assert_eq!(reverse_tasks(&reversed), tasks);
    }

    #[test]
    fn rotation_travels_with_the_point() {
        let task = sample_tasks().remove(0).reversed();
        assert_eq!(task.pick_point().resolve(0.0), Waypoint::new(243.327, 49.75, -15.83, -10.0));
        assert_eq!(task.drop_point().at_height(50.0, 5.0), Waypoint::new(252.87, -49.02, 50.0, 5.0));
    }

    #[test]
    fn missing_rotation_is_omitted_from_json() {
        let json = serde_json::to_string(&Position::new(1.0, 2.0, 3.0, None)).unwrap();
        assert_eq!(json, r#"{"x":1.0,"y":2.0,"z":3.0}"#);
        let parsed: Position = serde_json::from_str(r#"{"x":1,"y":2,"z":3,"r":-1.43}"#).unwrap();
        assert_eq!(parsed.r, Some(-1.43));
    }
}
