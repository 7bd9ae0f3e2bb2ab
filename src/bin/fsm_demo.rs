use clap::{App, Arg};
use colored::*;
use coopfsm::{
    Handler, HistoryMode, MachineSnapshot, Signal, SignalBroker, SignalId, SignalQueue,
    StateMachine, Status, SystemClock, TimeoutBinding, TimeoutOptions, TimeoutSpec, Transition,
};
use std::time::Duration;
use tokio::time;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const BATTERY_LOW: SignalId = SignalId(1);
const BATTERY_OK: SignalId = SignalId(2);
const FAULT: SignalId = SignalId(3);

const BOOT_SLOT: usize = 0;
const HOUSEKEEPING_SLOT: usize = 1;
const RECOVERY_SLOT: usize = 2;

const LOW_THRESHOLD_MV: u32 = 3300;
const OK_THRESHOLD_MV: u32 = 3900;
const FAULT_EVERY: u32 = 17;

/// Electrical power subsystem model carried by the power-mode machine.
#[derive(Debug)]
struct PowerBus {
    battery_mv: u32,
    saving: bool,
    housekeeping: u32,
    faults: u32,
}

impl Default for PowerBus {
    fn default() -> Self {
        Self {
            battery_mv: 4000,
            saving: false,
            housekeeping: 0,
            faults: 0,
        }
    }
}

fn eps_top(_: &mut Handler<'_, PowerBus>) -> Status {
    Status::Absent
}

fn eps_boot(h: &mut Handler<'_, PowerBus>) -> Status {
    match h.signal() {
        SignalId::ENTRY => {
            info!("booting power subsystem");
            Status::Success
        }
        _ => Status::Absent,
    }
}

fn eps_operational(h: &mut Handler<'_, PowerBus>) -> Status {
    if h.signal() != SignalId::timeout(HOUSEKEEPING_SLOT) {
        return Status::Absent;
    }

    let bus = h.data_mut();
    bus.housekeeping += 1;
    if bus.saving {
        bus.battery_mv += 150;
    } else {
        bus.battery_mv = bus.battery_mv.saturating_sub(120);
    }
    let (battery, saving, tick) = (bus.battery_mv, bus.saving, bus.housekeeping);

    let broadcast = if battery < LOW_THRESHOLD_MV && !saving {
        Some(BATTERY_LOW)
    } else if battery > OK_THRESHOLD_MV && saving {
        Some(BATTERY_OK)
    } else {
        None
    };
    if let Some(signal) = broadcast {
        if let Err(e) = h.send_signal_to_subscribers(signal, Some(battery as usize), false) {
            warn!(error = %e, "battery broadcast incomplete");
        }
    }

    if tick % FAULT_EVERY == 0 {
        if let Err(e) = h.send_signal(FAULT, None, true) {
            warn!(error = %e, "fault signal dropped");
        }
    }
    Status::SignalHandled
}

fn eps_nominal(_: &mut Handler<'_, PowerBus>) -> Status {
    Status::Absent
}

fn eps_power_save(h: &mut Handler<'_, PowerBus>) -> Status {
    match h.signal() {
        SignalId::ENTRY => {
            h.data_mut().saving = true;
            Status::Success
        }
        SignalId::EXIT => {
            h.data_mut().saving = false;
            Status::Success
        }
        _ => Status::Absent,
    }
}

fn eps_safe(h: &mut Handler<'_, PowerBus>) -> Status {
    match h.signal() {
        SignalId::ENTRY => {
            h.data_mut().faults += 1;
            warn!("entering safe mode");
            Status::Success
        }
        SignalId::EXIT => {
            info!("recovered, restoring previous mode");
            Status::Success
        }
        _ => Status::Absent,
    }
}

fn eps_observer(h: &mut Handler<'_, PowerBus>) {
    if h.signal() == FAULT {
        error!(status = ?h.last_status(), "fault reported");
    }
}

fn payload_idle(_: &mut Handler<'_, ()>) -> Status {
    Status::Absent
}

fn build_eps(
    tick: Duration,
    broker: &SignalBroker,
) -> Result<StateMachine<PowerBus>, coopfsm::FsmError> {
    let mut sm = StateMachine::new(PowerBus::default());
    let boot = sm.add("boot", eps_boot)?;
    let operational = sm.add("operational", eps_operational)?;
    let nominal = sm.add_child(operational, "nominal", eps_nominal)?;
    let power_save = sm.add_child(operational, "power-save", eps_power_save)?;
    let safe = sm.add("safe", eps_safe)?;

    sm.set_initial(operational, nominal)?;

    sm.set_transitions(boot, [Transition::new(SignalId::timeout(BOOT_SLOT), operational)])?;
    sm.set_transitions(operational, [Transition::new(FAULT, safe)])?;
    sm.set_transitions(
        safe,
        [Transition::new(SignalId::timeout(RECOVERY_SLOT), operational).history(HistoryMode::Deep)],
    )?;
    sm.set_transitions(nominal, [Transition::new(BATTERY_LOW, power_save)])?;
    sm.set_transitions(power_save, [Transition::new(BATTERY_OK, nominal)])?;

    sm.set_timeouts(
        boot,
        &[TimeoutBinding::new(
            BOOT_SLOT,
            tick * 3,
            TimeoutOptions::SET_ENTRY | TimeoutOptions::RST_EXIT,
        )],
    )?;
    sm.set_timeouts(
        operational,
        &[TimeoutBinding::new(
            HOUSEKEEPING_SLOT,
            tick,
            TimeoutOptions::SET_ENTRY | TimeoutOptions::PERIODIC | TimeoutOptions::RST_EXIT,
        )],
    )?;
    sm.set_timeouts(
        safe,
        &[TimeoutBinding::new(
            RECOVERY_SLOT,
            tick * 5,
            TimeoutOptions::SET_ENTRY | TimeoutOptions::RST_EXIT,
        )],
    )?;

    sm.setup(eps_top, boot, Some(eps_observer))?;
    sm.install_signal_queue(SignalQueue::new::<16>())?;
    sm.install_timeout_spec(TimeoutSpec::new(SystemClock::new()))?;
    sm.install_broker(broker.clone());
    sm.subscribe_to_signal(BATTERY_LOW)?;
    sm.subscribe_to_signal(BATTERY_OK)?;
    Ok(sm)
}

fn build_payload(broker: &SignalBroker) -> Result<StateMachine<()>, coopfsm::FsmError> {
    let mut sm = StateMachine::new(());
    let imaging = sm.add("imaging", payload_idle)?;
    let standby = sm.add("standby", payload_idle)?;
    sm.set_transitions(imaging, [Transition::new(BATTERY_LOW, standby)])?;
    sm.set_transitions(standby, [Transition::new(BATTERY_OK, imaging)])?;
    sm.setup(payload_idle, imaging, None)?;

    // No queue: broadcasts land in the one-deep mailbox.
    sm.install_broker(broker.clone());
    sm.subscribe_to_signal(BATTERY_LOW)?;
    sm.subscribe_to_signal(BATTERY_OK)?;
    Ok(sm)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("fsm-demo")
        .version("0.1.0")
        .about("Drives a sample power-mode state machine and a payload machine")
        .arg(
            Arg::with_name("tick")
                .short("t")
                .long("tick-ms")
                .value_name("MS")
                .help("Scheduler period in milliseconds")
                .takes_value(true)
                .default_value("50")
                .validator(|v| match v.parse::<u64>() {
                    Ok(ms) if ms > 0 => Ok(()),
                    _ => Err("Tick period must be a positive number".into()),
                }),
        )
        .arg(
            Arg::with_name("ticks")
                .short("n")
                .long("ticks")
                .value_name("COUNT")
                .help("Number of scheduler ticks to run")
                .takes_value(true)
                .default_value("200")
                .validator(|v| match v.parse::<u32>() {
                    Ok(_) => Ok(()),
                    Err(_) => Err("Tick count must be a valid number".into()),
                }),
        )
        .arg(
            Arg::with_name("format")
                .short("f")
                .long("format")
                .value_name("FORMAT")
                .help("Snapshot output format")
                .takes_value(true)
                .possible_values(&["json", "table"])
                .default_value("table"),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Log every transition"),
        )
        .get_matches();

    let default_filter = if matches.is_present("verbose") {
        "coopfsm=debug,fsm_demo=info"
    } else {
        "fsm_demo=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let tick = Duration::from_millis(matches.value_of("tick").unwrap_or("50").parse()?);
    let ticks: u32 = matches.value_of("ticks").unwrap_or("200").parse()?;
    let json = matches.value_of("format") == Some("json");

    let broker = SignalBroker::new();
    let mut eps = build_eps(tick, &broker)?;
    let mut payload = build_payload(&broker)?;

    println!("{}", "Cooperative state machine demo".bright_blue().bold());

    let mut interval = time::interval(tick);
    let mut last = (None, None);
    for _ in 0..ticks {
        interval.tick().await;

        eps.run(Signal::none());
        payload.run(Signal::none());

        let now = (eps.current(), payload.current());
        if now != last {
            print_snapshot("eps", &eps.snapshot(), json)?;
            print_snapshot("payload", &payload.snapshot(), json)?;
            last = now;
        }
    }

    let bus = eps.data();
    println!(
        "{} battery {}mV, {} housekeeping cycles, {} faults",
        "Done:".bright_green().bold(),
        bus.battery_mv,
        bus.housekeeping,
        bus.faults
    );
    Ok(())
}

fn print_snapshot(
    machine: &str,
    snapshot: &MachineSnapshot,
    json: bool,
) -> Result<(), serde_json::Error> {
    if json {
        println!("{}", serde_json::to_string(&serde_json::json!({
            "machine": machine,
            "snapshot": snapshot,
        }))?);
        return Ok(());
    }

    let path: Vec<&str> = snapshot.active_path.iter().map(|n| n.as_str()).collect();
    let name = format!("{:<12}", snapshot.current_name.as_deref().unwrap_or("-"));
    let current = if name.trim_end() == "safe" {
        name.red().bold()
    } else {
        name.bright_cyan().bold()
    };
    let mailbox = if snapshot.mailbox_occupied {
        "full".yellow()
    } else {
        "empty".green()
    };

    println!(
        "{} {} {} queue {}/{} mailbox {}",
        format!("{:<8}", machine).bright_white(),
        current,
        format!("{:<36}", path.join(" > ")).white(),
        snapshot.queued_signals,
        snapshot.queue_capacity,
        mailbox,
    );
    for t in snapshot.timeouts.iter().filter(|t| t.armed) {
        println!(
            "         timeout[{}] {:>5}ms left{}",
            t.slot,
            t.remaining_ms.unwrap_or(0),
            if t.periodic { " (periodic)" } else { "" }
        );
    }
    Ok(())
}
