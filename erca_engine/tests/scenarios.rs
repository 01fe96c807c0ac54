use std::rc::Rc;

use erca_engine::cues::RecordingCuePlayer;
use erca_engine::handoff::{ChronicleVault, GOT_PELLET_CHRONICLE};
use erca_engine::linking::LinkingRule;
use erca_engine::lock::ControlKey;
use erca_engine::machine::chamber::Slot;
use erca_engine::machine::{SpitPhase, TakeLabel};
use erca_engine::room::Room;
use erca_engine::scenario::ScenarioRun;
use erca_engine::store::{StoreKey, StoreValue};
use erca_engine::{run_scenario, Activator, MachineConfig, ScenarioOptions, ScenarioSlug};
use erca_stream::BusyPhase;

fn run(slug: ScenarioSlug) -> ScenarioRun {
    run_scenario(slug, ScenarioOptions::default()).expect("scenario runs")
}

fn slot(n: u8) -> Slot {
    Slot::new(n).expect("valid slot")
}

#[test]
fn open_without_pellets_keeps_spit_disabled() {
    let ScenarioRun { room, report } = run(ScenarioSlug::OpenEmpty);
    assert!(report.persisted.open);
    assert_eq!(report.persisted.chamber, 0);
    assert!(report.replicas.iter().all(|replica| !replica.spit_enabled));
    assert!(report.invariants.is_clean());
    assert!(room
        .events()
        .iter()
        .any(|entry| entry.label == "cue RespMachineMode:Open"));
}

#[test]
fn untaken_pellet_stays_in_its_slot_after_cooldown() {
    let ScenarioRun { room, report } = run(ScenarioSlug::SpitCooldown);
    assert_eq!(report.persisted.slots[0], 7);
    assert_eq!(report.persisted.chamber, 1);
    for replica in &report.replicas {
        assert_eq!(replica.spit, SpitPhase::Idle);
        assert!(replica.spit_enabled, "player {} spit control", replica.player);
    }
    assert!(room
        .events()
        .iter()
        .any(|entry| entry.label == "cue RespDropPellet:normal"));
    assert!(report.invariants.is_clean());
}

#[test]
fn cave_link_carries_the_pellet_out() {
    let ScenarioRun { mut room, report } = run_scenario(
        ScenarioSlug::CaveLink,
        ScenarioOptions {
            cave_guid: Some("8f6d2c1e-cave".to_string()),
            ..ScenarioOptions::default()
        },
    )
    .expect("scenario runs");

    assert_eq!(report.handoffs.get(&1), Some(&7));
    assert_eq!(report.persisted.slots[0], 0);
    assert_eq!(report.transfers.len(), 1);
    let request = &report.transfers[0].request;
    assert_eq!(request.age_filename, "PelletBahroCave");
    assert_eq!(request.spawn_point, "LinkInPointDefault");
    assert_eq!(request.age_instance_guid.as_deref(), Some("8f6d2c1e-cave"));
    assert_eq!(request.rule, LinkingRule::BasicLink);

    let avatar = &report.avatars[&1];
    assert!(!avatar.camera_locked);
    assert_eq!(avatar.lock_acquisitions, 1);
    assert_eq!(avatar.lock_releases, 1);
    assert!(report
        .replicas
        .iter()
        .all(|replica| replica.take == TakeLabel::Idle));

    assert_eq!(room.complete_transfer(1).expect("transfer"), Some(7));
    assert_eq!(room.players(), vec![2]);
    assert_eq!(room.owner(), Some(2));
}

#[test]
fn silo_link_captures_without_transfer() {
    let ScenarioRun { report, .. } = run(ScenarioSlug::SiloLink);
    assert!(report.transfers.is_empty());
    assert_eq!(report.handoffs.get(&1), Some(&7));
    assert_eq!(report.persisted.slots[0], 0);
}

#[test]
fn flush_during_flight_only_echoes_lever() {
    let ScenarioRun { room, report } = run(ScenarioSlug::FlushInFlight);
    assert!(!report.persisted.flush_lever);
    assert_eq!(report.persisted.slots, [7, 0, 0, 0, 0]);
    assert!(report.persisted.open);
    assert!(!room
        .events()
        .iter()
        .any(|entry| entry.label.starts_with("cue RespFlushAPellet")));
}

#[test]
fn reentry_alone_with_stale_chamber_resets() {
    let ScenarioRun { room, report } = run(ScenarioSlug::ReentryReset);
    assert!(report.persisted.is_reset());
    assert!(report.invariants.is_clean());
    assert!(room
        .events()
        .iter()
        .any(|entry| entry.player == 1 && entry.label.starts_with("machine.reset")));
}

#[test]
fn effective_flush_empties_and_closes() {
    let ScenarioRun { room, report } = run(ScenarioSlug::FlushOpen);
    assert!(report.persisted.is_reset());
    assert!(report.invariants.is_clean());
    let cleanups: Vec<_> = room
        .events()
        .iter()
        .filter(|entry| entry.label == "flush.cleanup")
        .collect();
    assert_eq!(cleanups.len(), 1);
    assert_eq!(cleanups[0].player, 1);
    for player in [1, 2] {
        let flushed = room
            .events()
            .iter()
            .filter(|entry| entry.player == player && entry.label.starts_with("cue RespFlushAPellet"))
            .count();
        assert_eq!(flushed, 2, "player {player} flush cues");
    }
}

#[test]
fn cancelled_take_releases_lock_once() {
    let ScenarioRun { report, .. } = run(ScenarioSlug::CancelTake);
    let avatar = &report.avatars[&1];
    assert_eq!(avatar.lock_acquisitions, 1);
    assert_eq!(avatar.lock_releases, 1);
    assert!(!avatar.keys_routed);
    assert!(report.handoffs.is_empty());
    assert!(report
        .replicas
        .iter()
        .all(|replica| replica.take == TakeLabel::Idle && replica.busy == BusyPhase::Idle));
}

#[test]
fn busy_machine_denies_a_second_spit() {
    let cues = Rc::new(RecordingCuePlayer::new());
    let mut room = Room::new(MachineConfig::default()).with_cue_player(cues.clone());
    room.seed(StoreKey::MachineOpen, StoreValue::flag(true));
    room.seed(StoreKey::PelletSlot(slot(1)), StoreValue::int(7));
    room.seed(StoreKey::PelletSlot(slot(2)), StoreValue::int(3));
    room.join(1).unwrap();
    room.join(2).unwrap();
    room.settle().unwrap();

    room.activate(1, Activator::SpitPellet).unwrap();
    room.settle().unwrap();
    room.activate(1, Activator::TakePellet).unwrap();
    room.settle().unwrap();
    room.activate(1, Activator::LinkToSilo).unwrap();
    room.advance(1.0).unwrap();

    // Cooldown drops the pellet as taken; spit re-enables but stays busy.
    room.advance(10.0).unwrap();
    assert_eq!(room.machine(2).unwrap().busy(), BusyPhase::Linking);
    room.activate(2, Activator::SpitPellet).unwrap();
    room.settle().unwrap();
    assert!(cues
        .cues_for(2)
        .contains(&"RespUseSpitBtn:deny".to_string()));
    assert_eq!(room.persisted().chamber, 1);

    room.advance(10.0).unwrap();
    assert_eq!(room.machine(2).unwrap().busy(), BusyPhase::Idle);
    room.activate(2, Activator::SpitPellet).unwrap();
    room.settle().unwrap();
    assert_eq!(room.persisted().chamber, 2);
}

#[test]
fn only_one_player_can_hold_the_pellet() {
    let mut room = Room::new(MachineConfig::default());
    room.seed(StoreKey::MachineOpen, StoreValue::flag(true));
    room.seed(StoreKey::PelletSlot(slot(1)), StoreValue::int(7));
    for player in [1, 2, 3] {
        room.join(player).unwrap();
    }
    room.settle().unwrap();
    room.activate(1, Activator::SpitPellet).unwrap();
    room.settle().unwrap();

    room.activate(1, Activator::TakePellet).unwrap();
    room.settle().unwrap();
    room.activate(2, Activator::TakePellet).unwrap();
    room.settle().unwrap();

    let report = room.check_invariants();
    assert_eq!(report.takers, vec![1]);
    assert!(report.is_clean());
    assert!(!room.press_key(2, ControlKey::ExitMode).unwrap());
}

#[test]
fn cooldown_cancels_a_hold_left_open() {
    let mut room = Room::new(MachineConfig::default());
    room.seed(StoreKey::MachineOpen, StoreValue::flag(true));
    room.seed(StoreKey::PelletSlot(slot(1)), StoreValue::int(7));
    room.join(1).unwrap();
    room.settle().unwrap();
    room.activate(1, Activator::SpitPellet).unwrap();
    room.settle().unwrap();
    room.activate(1, Activator::TakePellet).unwrap();
    room.settle().unwrap();

    room.advance(11.0).unwrap();
    let machine = room.machine(1).unwrap();
    assert_eq!(machine.take_state(), TakeLabel::Idle);
    assert_eq!(machine.busy(), BusyPhase::Idle);
    let avatar = room.avatar(1).unwrap();
    assert_eq!(avatar.lock_acquisitions, avatar.lock_releases);
}

#[test]
fn interrupted_sequence_resets_only_when_alone() {
    let mut room = Room::new(MachineConfig::default());
    room.seed(StoreKey::MachineOpen, StoreValue::flag(true));
    room.seed(StoreKey::ChamberPosition, StoreValue::int(5));
    room.seed(StoreKey::PelletSlot(slot(5)), StoreValue::int(2));
    room.join(1).unwrap();
    room.join(2).unwrap();
    room.settle().unwrap();
    // Player 1 entered alone mid-sequence and already reset.
    assert!(room.persisted().is_reset());

    room.seed(StoreKey::MachineOpen, StoreValue::flag(true));
    room.seed(StoreKey::ChamberPosition, StoreValue::int(5));
    room.seed(StoreKey::PelletSlot(slot(5)), StoreValue::int(2));
    room.join(3).unwrap();
    room.settle().unwrap();
    // Player 3 found others present, so the open record stands.
    assert_eq!(room.persisted().chamber, 5);
}

#[test]
fn stale_handoff_is_discarded_on_entry() {
    let mut vault = ChronicleVault::new();
    vault.write_handoff(4, 11);
    let mut room = Room::new(MachineConfig::default()).with_vault(vault);
    room.join(4).unwrap();
    room.settle().unwrap();
    assert_eq!(room.vault().find_chronicle(4, GOT_PELLET_CHRONICLE), Some("0"));
}

#[test]
fn reset_and_close_corrections_are_idempotent() {
    let mut room = Room::new(MachineConfig::default());
    room.seed(StoreKey::ChamberPosition, StoreValue::int(2));
    room.join(1).unwrap();
    room.join(2).unwrap();
    room.settle().unwrap();
    let first = room.persisted();

    room.join(3).unwrap();
    room.settle().unwrap();
    assert_eq!(room.persisted(), first);
    assert!(first.is_reset());
    assert!(room.check_invariants().is_clean());
}

#[test]
fn late_joiner_waits_while_a_peer_holds_the_pellet() {
    let mut room = Room::new(MachineConfig::default());
    room.seed(StoreKey::MachineOpen, StoreValue::flag(true));
    room.seed(StoreKey::PelletSlot(slot(1)), StoreValue::int(7));
    room.seed(StoreKey::PelletSlot(slot(2)), StoreValue::int(5));
    room.join(1).unwrap();
    room.join(2).unwrap();
    room.settle().unwrap();
    room.activate(1, Activator::SpitPellet).unwrap();
    room.settle().unwrap();
    room.activate(1, Activator::TakePellet).unwrap();
    room.settle().unwrap();

    room.join(3).unwrap();
    room.settle().unwrap();
    let joiner = room.machine(3).unwrap();
    assert!(!joiner.spit_enabled());
    assert_eq!(joiner.busy(), BusyPhase::Held);
    assert_eq!(joiner.spit_phase(), SpitPhase::Presented(slot(1)));

    room.activate(3, Activator::SpitPellet).unwrap();
    room.activate(3, Activator::TakePellet).unwrap();
    room.settle().unwrap();
    assert_eq!(room.persisted().chamber, 1);
    assert_eq!(room.check_invariants().takers, vec![1]);

    room.activate(1, Activator::LinkToSilo).unwrap();
    room.advance(1.0).unwrap();
    assert_eq!(room.vault().peek_handoff(1).unwrap(), 7);
    assert_eq!(room.persisted().slots, [0, 5, 0, 0, 0]);
}

#[test]
fn late_joiner_gets_spit_back_after_cooldown() {
    let mut room = Room::new(MachineConfig::default());
    room.seed(StoreKey::MachineOpen, StoreValue::flag(true));
    room.seed(StoreKey::PelletSlot(slot(1)), StoreValue::int(7));
    room.seed(StoreKey::PelletSlot(slot(2)), StoreValue::int(5));
    room.join(1).unwrap();
    room.settle().unwrap();
    room.activate(1, Activator::SpitPellet).unwrap();
    room.settle().unwrap();

    room.join(2).unwrap();
    room.settle().unwrap();
    assert!(!room.machine(2).unwrap().spit_enabled());
    assert_eq!(room.machine(2).unwrap().busy(), BusyPhase::Idle);

    room.advance(MachineConfig::default().timers.spit_cooldown_secs).unwrap();
    let joiner = room.machine(2).unwrap();
    assert_eq!(joiner.spit_phase(), SpitPhase::Idle);
    assert!(joiner.spit_enabled());
    assert_eq!(room.persisted().slots, [7, 5, 0, 0, 0]);
}

#[test]
fn crossing_takes_leave_the_lower_player_holding() {
    let mut room = Room::new(MachineConfig::default());
    room.seed(StoreKey::MachineOpen, StoreValue::flag(true));
    room.seed(StoreKey::PelletSlot(slot(1)), StoreValue::int(7));
    room.join(1).unwrap();
    room.join(2).unwrap();
    room.settle().unwrap();
    room.activate(1, Activator::SpitPellet).unwrap();
    room.settle().unwrap();

    room.activate(2, Activator::TakePellet).unwrap();
    room.activate(1, Activator::TakePellet).unwrap();
    room.settle().unwrap();

    let report = room.check_invariants();
    assert_eq!(report.takers, vec![1]);
    assert!(report.is_clean(), "{report:?}");
    assert_eq!(room.machine(2).unwrap().take_state(), TakeLabel::Releasing);
    for player in [1, 2] {
        assert_eq!(room.machine(player).unwrap().busy(), BusyPhase::Held);
    }

    room.activate(2, Activator::LinkToCave).unwrap();
    room.activate(1, Activator::LinkToCave).unwrap();
    room.advance(1.0).unwrap();
    assert_eq!(room.vault().peek_handoff(1).unwrap(), 7);
    assert_eq!(room.vault().peek_handoff(2).unwrap(), 0);
    assert_eq!(room.transfers().len(), 1);
    assert_eq!(room.transfers()[0].player, 1);
    let loser = room.avatar(2).unwrap();
    assert_eq!(loser.lock_acquisitions, loser.lock_releases);
}

#[test]
fn out_of_range_chamber_resets_every_replica() {
    let mut room = Room::new(MachineConfig::default());
    room.seed(StoreKey::MachineOpen, StoreValue::flag(true));
    room.seed(StoreKey::PelletSlot(slot(1)), StoreValue::int(7));
    room.join(1).unwrap();
    room.join(2).unwrap();
    room.settle().unwrap();

    room.write_as(2, StoreKey::ChamberPosition, StoreValue::int(6)).unwrap();
    room.settle().unwrap();

    assert!(room.persisted().is_reset());
    assert!(room.check_invariants().is_clean());
    for player in [1, 2] {
        assert!(room.events().iter().any(|entry| entry.player == player
            && entry.label == "machine.reset chamber position 6 is out of range"));
        assert!(!room.machine(player).unwrap().spit_enabled());
    }
}

#[test]
fn chamber_advancing_after_close_resets_every_replica() {
    let mut room = Room::new(MachineConfig::default());
    room.seed(StoreKey::MachineOpen, StoreValue::flag(true));
    room.seed(StoreKey::PelletSlot(slot(1)), StoreValue::int(7));
    room.seed(StoreKey::PelletSlot(slot(2)), StoreValue::int(3));
    room.join(1).unwrap();
    room.join(2).unwrap();
    room.settle().unwrap();

    // A close and a spit cross on the bus.
    room.write_as(1, StoreKey::MachineOpen, StoreValue::flag(false)).unwrap();
    room.write_as(2, StoreKey::ChamberPosition, StoreValue::int(2)).unwrap();
    room.settle().unwrap();

    assert!(room.persisted().is_reset());
    assert!(room.check_invariants().is_clean());
    for player in [1, 2] {
        let labels: Vec<&str> = room
            .events()
            .iter()
            .filter(|entry| entry.player == player)
            .map(|entry| entry.label.as_str())
            .collect();
        assert!(labels.contains(&"machine.closed"));
        assert!(labels.contains(&"machine.reset chamber advanced to 2 while closed"));
    }
}
