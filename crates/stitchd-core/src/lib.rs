#![doc = include_str!("../README.md")]

mod common;
pub use common::*;

pub mod geohash;
pub mod protocol;

pub use geohash::GeohashEncoder;
