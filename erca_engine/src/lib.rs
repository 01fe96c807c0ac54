//! Replicated controller for the Ercana pellet machine, plus the services it
//! talks to and a deterministic room that runs several replicas side by side.

pub mod config;
pub mod cues;
pub mod effects;
pub mod handoff;
pub mod linking;
pub mod lock;
pub mod machine;
pub mod room;
pub mod scenario;
pub mod store;
pub mod timer;

pub use config::{MachineConfig, TimerConfig};
pub use machine::{Activator, MachineEvent, PelletMachine};
pub use room::{Room, RoomError};
pub use scenario::{run_scenario, ScenarioOptions, ScenarioReport, ScenarioSlug};
