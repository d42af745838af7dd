//! Turns raw source files into the aligned rasters, the combined table
//! and its train/validation split.

pub mod climate;
pub mod combine;
pub mod evaluate;
pub mod labels;
pub mod landcover;
pub mod severity;
pub mod split;
pub mod target;
pub mod terrain;
pub mod vegetation;
