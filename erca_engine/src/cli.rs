use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    about = "Runs scripted sessions against the replicated pellet machine",
    version
)]
pub struct Args {
    /// Scenario to run (open-empty, spit-cooldown, cave-link, flush-in-flight,
    /// reentry-reset, silo-link, cancel-take, flush-open, or a..e)
    #[arg(long, value_name = "SLUG")]
    pub scenario: String,

    /// Number of players in the room
    #[arg(long, default_value_t = 2)]
    pub players: u32,

    /// Optional JSON file overriding timer durations, SDL names and link addressing
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Optional JSON chronicle vault to read/write handoff values
    #[arg(long)]
    pub vault: Option<PathBuf>,

    /// Instance GUID of the pellet cave, as stored in the age data folder
    #[arg(long)]
    pub cave_guid: Option<String>,

    /// Path to write the room event log as JSON
    #[arg(long)]
    pub event_log_json: Option<PathBuf>,

    /// Path to write the final room state report as JSON
    #[arg(long)]
    pub state_json: Option<PathBuf>,

    /// Path to write every cue request as JSON
    #[arg(long)]
    pub cue_log_json: Option<PathBuf>,

    /// Print every event instead of the compact view
    #[arg(long)]
    pub verbose: bool,
}
