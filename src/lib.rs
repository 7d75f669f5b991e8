#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]
#![allow(non_snake_case)]

#[path = "../shared/mod.rs"]
pub mod shared;

#[path = "../reduce/mod.rs"]
pub mod reduce;

#[path = "../cluster/mod.rs"]
pub mod cluster;

#[path = "../regress/mod.rs"]
pub mod regress;

#[path = "../pipeline/mod.rs"]
pub mod pipeline;
