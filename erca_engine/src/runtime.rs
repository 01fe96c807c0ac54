use std::{fs, path::Path, rc::Rc};

use anyhow::{bail, Context, Result};
use erca_engine::cues::{CuePlayer, RecordingCuePlayer};
use erca_engine::handoff::ChronicleVault;
use erca_engine::room::RoomLogEntry;
use erca_engine::scenario::ScenarioRun;
use erca_engine::{run_scenario, MachineConfig, ScenarioOptions, ScenarioReport, ScenarioSlug};
use serde::Serialize;

use crate::cli::Args;

#[derive(Serialize)]
struct EventLog<'a> {
    scenario: &'a str,
    events: &'a [RoomLogEntry],
}

pub fn execute(args: Args) -> Result<()> {
    let Args {
        scenario,
        players,
        config,
        vault,
        cave_guid,
        event_log_json,
        state_json,
        cue_log_json,
        verbose,
    } = args;

    let slug = ScenarioSlug::parse(&scenario)?;
    let config =
        MachineConfig::from_json_file(config.as_deref()).context("loading machine config")?;
    let vault =
        ChronicleVault::from_json_file(vault.as_deref()).context("loading chronicle vault")?;

    let recorder = cue_log_json
        .as_ref()
        .map(|_| Rc::new(RecordingCuePlayer::new()));
    let cue_player = recorder
        .as_ref()
        .map(|recorder| recorder.clone() as Rc<dyn CuePlayer>);

    let ScenarioRun { mut room, report } = run_scenario(
        slug,
        ScenarioOptions {
            players,
            config,
            vault,
            cave_guid,
            cue_player,
        },
    )
    .with_context(|| format!("running scenario {}", slug.label()))?;

    room.vault_mut().save().context("saving chronicle vault")?;

    if let Some(path) = event_log_json.as_ref() {
        let log = EventLog {
            scenario: slug.label(),
            events: room.events(),
        };
        write_json(path, &log, "event log")?;
    }
    if let Some(path) = state_json.as_ref() {
        write_json(path, &report, "state report")?;
    }
    if let (Some(path), Some(recorder)) = (cue_log_json.as_ref(), recorder.as_ref()) {
        write_json(path, &recorder.entries(), "cue log")?;
    }

    print_summary(&report);
    if verbose {
        println!("\nEvents:");
        for entry in room.events() {
            println!(
                "  {:>4} t={:>6.2} p{} {}",
                entry.sequence, entry.time, entry.player, entry.label
            );
        }
    }

    if !report.invariants.is_clean() {
        bail!(
            "scenario {} ended with broken invariants: {:?}",
            slug.label(),
            report.invariants
        );
    }
    Ok(())
}

fn print_summary(report: &ScenarioReport) {
    let state = &report.persisted;
    println!("Scenario: {} (t={:.2}s)", report.scenario, report.time);
    println!(
        "Players: {:?} | owner: {}",
        report.players,
        report
            .owner
            .map(|owner| owner.to_string())
            .unwrap_or_else(|| "-".to_string())
    );
    println!(
        "Machine -> open: {} | chamber: {} | slots: {:?} | flush lever: {}",
        state.open, state.chamber, state.slots, state.flush_lever
    );
    for replica in &report.replicas {
        println!(
            "  p{} {:?}: busy {:?} | take {:?} | spit {:?} (enabled: {})",
            replica.player,
            replica.authority,
            replica.busy,
            replica.take,
            replica.spit,
            replica.spit_enabled
        );
    }
    for transfer in &report.transfers {
        println!(
            "Transfer: p{} -> {} @ {}",
            transfer.player, transfer.request.age_filename, transfer.request.spawn_point
        );
    }
    for (player, recipe) in &report.handoffs {
        println!("Handoff: p{player} carries recipe {recipe}");
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T, what: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }
    let json = serde_json::to_string_pretty(value)
        .with_context(|| format!("serializing {what} to JSON"))?;
    fs::write(path, json).with_context(|| format!("writing {what} to {}", path.display()))?;
    println!("Saved {what} to {}", path.display());
    Ok(())
}
