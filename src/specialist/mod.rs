//! Domain specialists: declarative definitions and the spawner that runs
//! them as isolated, ephemeral sub-agents.

pub mod definition;
pub mod spawner;
pub mod toolset;

pub use definition::{SpecialistDefinition, SpecialistRegistry, SpecialistSummary};
pub use spawner::{SpawnRequest, SpawnResult, Spawner};
pub use toolset::{Route, SpecialistToolSet};
