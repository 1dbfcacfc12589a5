// src/maze/mod.rs
// Procedural maze generation (grid of wall bitmasks + room cells)

pub mod cell;
pub mod disjoint_set;
pub mod generator;

pub use cell::{Direction, Walls};
pub use disjoint_set::DisjointSet;
pub use generator::{
    is_maze_edge, neighbor_index, GenerationStats, MazeError, MazeGenerator, MazeGrid, MazeLayout,
    MazeOptions,
};
