use anyhow::{Context, Result};
use chrono::Utc;
use colored::Colorize;
use deadswitch::prelude::*;
use deadswitch::remote::{HttpSwitchApi, LocalOnlyApi, SwitchApi};
use deadswitch::sensor::LatestSampleSensor;
use deadswitch::{ENGINE_NAME, VERSION as LIB_VERSION};
use rustyline::highlight::Highlighter;
use rustyline::Editor;
use rustyline_derive::{Completer, Helper, Hinter, Validator};
use std::borrow::Cow;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

const SHELL_VERSION: &str = env!("CARGO_PKG_VERSION");

const LOGO_TEXT: &str = r"
     _                _               _ _       _
  __| | ___  __ _  __| |_____      __(_) |_ ___| |__
 / _` |/ _ \/ _` |/ _` / __\ \ /\ / /| | __/ __| '_ \
| (_| |  __/ (_| | (_| \__ \\ V  V / | | || (__| | | |
 \__,_|\___|\__,_|\__,_|___/ \_/\_/  |_|\__\___|_| |_|
";

/// A custom helper struct for rustyline that enables syntax highlighting.
#[derive(Completer, Helper, Hinter, Validator)]
struct MyHighlighter;

impl Highlighter for MyHighlighter {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
        if let Some((command, rest)) = line.split_once(' ') {
            let colored_command = command.yellow().bold();
            let colored_rest = rest.yellow();
            Cow::Owned(format!("{} {}", colored_command, colored_rest))
        } else {
            Cow::Owned(line.yellow().bold().to_string())
        }
    }
    fn highlight_char(&self, _line: &str, _pos: usize, _forced: bool) -> bool {
        true
    }
}

fn print_banner() {
    if env::var("QUIET_MODE").is_ok() {
        return;
    }
    println!("{}", LOGO_TEXT.cyan());

    let version_string = format!(
        "          Shell   v{:<8} Library   v{:<8}",
        SHELL_VERSION, LIB_VERSION
    );
    println!("{}", "-".repeat(64).dimmed());

    let license_blurb = "
    This software is provided 'as is', without warranty of any kind.
    Distributed under the MIT OR Apache-2.0 license. Use at your own risk.
    ";

    println!("{}", version_string);
    println!("{}", license_blurb.dimmed());
    println!("{}", "-".repeat(64).dimmed());
}

/// Prints protocol events as they happen.
fn spawn_event_listeners(engine: &SwitchEngine) {
    let mut system_rx = engine.subscribe_system_events();
    tokio::spawn(async move {
        while let Ok(event) = system_rx.recv().await {
            println!("\n<-- [SYSTEM EVENT] {:?}\n>> ", event);
        }
    });

    let mut switch_rx = engine.subscribe_switch_events();
    tokio::spawn(async move {
        while let Ok(event) = switch_rx.recv().await {
            match event {
                SwitchEvent::PhaseChanged { from, to, .. } => {
                    println!("\n<-- [PHASE] {} -> {}", from, paint_phase(to));
                }
                SwitchEvent::Notice(notice) => {
                    println!("\n<-- [NOTICE] {}: {}", notice.title.bold(), notice.body);
                }
                SwitchEvent::EscalationRequested { stage } => {
                    println!("\n<-- [ESCALATION] {} stage", paint_phase(stage));
                }
                SwitchEvent::RemoteFinished { operation, ok: false } => {
                    println!("\n<-- [REMOTE] {} {}", operation, "failed".red());
                }
                _ => {}
            }
        }
    });
}

fn paint_phase(phase: Phase) -> colored::ColoredString {
    match phase {
        Phase::Monitoring => phase.to_string().green().bold(),
        Phase::Warning => phase.to_string().yellow().bold(),
        Phase::Executed => phase.to_string().red().bold(),
    }
}

fn print_status(snapshot: &StatusSnapshot) {
    let c = &snapshot.countdown;
    println!("  Phase          {}", paint_phase(snapshot.phase));
    if c.expired {
        let overdue = c.overdue_ms() / 1000;
        println!(
            "  Countdown      {} ({}h {:02}m overdue)",
            "expired".red(),
            overdue / 3600,
            (overdue % 3600) / 60
        );
    } else {
        println!("  Countdown      {:02}:{:02}:{:02}", c.hours, c.minutes, c.seconds);
    }
    println!("  Deadline       {}", snapshot.deadline.to_rfc3339());
    println!("  Last check-in  {}", snapshot.last_check_in.to_rfc3339());
    println!(
        "  Authorized     {}   Cloud eligible {}",
        yes_no(snapshot.is_authorized),
        yes_no(snapshot.cloud_eligible)
    );
    if let Some(minutes) = snapshot.cooldown_minutes {
        println!("  Cooldown       {}h {:02}m left", minutes / 60, minutes % 60);
    }
    println!(
        "  Pre-warning    {}   Step bonus used {}",
        if snapshot.pre_warning_sent { "sent" } else { "armed" },
        yes_no(snapshot.steps_check_in_done)
    );
    if let Some(sample) = &snapshot.latest_sample {
        println!(
            "  Last sample    {} bpm, {} steps",
            sample.heart_rate, sample.steps
        );
    }
}

fn yes_no(value: bool) -> colored::ColoredString {
    if value {
        "yes".green()
    } else {
        "no".dimmed()
    }
}

fn print_help() {
    println!("Available commands:");
    println!("  status                          - Shows the protocol status.");
    println!("  checkin                         - Confirms you are alive.");
    println!("  auth on|off                     - Signs or revokes the execution agreement.");
    println!("  sample <BPM> <STEPS>            - Feeds a wearable reading.");
    println!("  set interval|grace|steps <N>    - Hours, minutes, step threshold.");
    println!("  set name|email|phone <VALUE>    - Updates your profile.");
    println!("  contact add emergency|liaison <NAME> <EMAIL> [PHONE]");
    println!("  contact edit <H> emergency|liaison <NAME> <EMAIL> [PHONE]");
    println!("  contact rm <H>                  - Removes a contact by handle.");
    println!("  contacts                        - Lists contacts and their handles.");
    println!("  device add watch|phone <NAME>   - Pairs a device.");
    println!("  device rm|connect|disconnect <H>");
    println!("  devices                         - Lists devices and their handles.");
    println!("  memo [--sign] <TEXT>            - Replaces the memo.");
    println!("  logs [N]                        - Shows the activity log.");
    println!("  inbox                           - Shows notifications.");
    println!("  read <ID>|all                   - Marks notifications read.");
    println!("  remote                          - Queries the switch service.");
    println!("  reset                           - Deletes the account and starts over.");
    println!("  exit                            - Quits the shell.");
}

#[tokio::main]
async fn main() -> Result<()> {
    print_banner();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(false)
        .init();

    let config_path = env::args().nth(1).map(PathBuf::from);
    let config = SwitchConfig::load(config_path.as_deref())?;
    let mut store = StateStore::new(
        FileStore::open(&config.storage.data_dir).context("cannot open the data directory")?,
    );
    let udid = store.device_udid();
    let api: Arc<dyn SwitchApi> = match &config.cloud.base_url {
        Some(base_url) => Arc::new(HttpSwitchApi::new(
            base_url.clone(),
            udid,
            config.request_timeout(),
        )?),
        None => Arc::new(LocalOnlyApi),
    };
    let sensor = LatestSampleSensor::new();

    let engine = SwitchEngine::builder(config, store)
        .api(api)
        .sensor(Arc::new(sensor.clone()))
        .build();
    let engine_handle = engine.clone();

    spawn_event_listeners(&engine_handle);

    info!("Spawning {} in the background...", ENGINE_NAME);
    tokio::spawn(async move {
        if let Err(e) = engine.run().await {
            eprintln!("\nEngine stopped with an error: {}", e);
        }
    });

    tokio::time::sleep(Duration::from_millis(100)).await;

    // Short numeric handles for the engine's slot keys.
    let mut contact_handles: HashMap<usize, ContactId> = HashMap::new();
    let mut device_handles: HashMap<usize, DeviceId> = HashMap::new();
    let mut next_handle: usize = 0;
    for (id, _) in engine_handle.contacts().await {
        contact_handles.insert(next_handle, id);
        next_handle += 1;
    }
    for (id, _) in engine_handle.devices().await {
        device_handles.insert(next_handle, id);
        next_handle += 1;
    }

    let mut rl = Editor::new()?;
    let helper = MyHighlighter {};
    rl.set_helper(Some(helper));

    println!("{} is running. Type 'help' for commands or 'exit' to quit.", ENGINE_NAME.cyan());

    loop {
        let prompt = format!("{}", ">> ".cyan().bold());
        let readline = rl.readline(&prompt);
        match readline {
            Ok(line) => {
                rl.add_history_entry(line.as_str())?;
                let args = line.split_whitespace().collect::<Vec<_>>();

                if let Some(command) = args.first() {
                    match *command {
                        "status" => print_status(&engine_handle.snapshot().await),
                        "checkin" => match engine_handle.check_in().await {
                            Ok(()) => println!("--> {}", "Checked in.".green()),
                            Err(e) => println!("--> Check-in rejected: {}", e.to_string().yellow()),
                        },
                        "auth" => match args.get(1) {
                            Some(&"on") => {
                                engine_handle.set_authorized(true).await;
                                println!("--> Execution agreement signed.");
                            }
                            Some(&"off") => {
                                engine_handle.set_authorized(false).await;
                                println!("--> Execution agreement revoked.");
                            }
                            _ => println!("Usage: auth on|off"),
                        },
                        "sample" => {
                            let parsed = (
                                args.get(1).and_then(|s| s.parse::<u32>().ok()),
                                args.get(2).and_then(|s| s.parse::<u32>().ok()),
                            );
                            if let (Some(heart_rate), Some(steps)) = parsed {
                                let sample = HealthSample {
                                    heart_rate,
                                    steps,
                                    sample_time: Utc::now(),
                                };
                                sensor.push(sample);
                                engine_handle.record_health_sample(sample).await;
                                engine_handle.evaluate_now().await;
                                println!("--> Sample recorded.");
                            } else {
                                println!("Usage: sample <BPM> <STEPS>");
                            }
                        }
                        "set" => match parse_setting(&args[1..]) {
                            Some(patch) => {
                                engine_handle.update_settings(patch).await;
                                println!("--> Settings updated.");
                            }
                            None => println!("Usage: set interval|grace|steps <N> or set name|email|phone <VALUE>"),
                        },
                        "contact" => match args.get(1) {
                            Some(&"add") if args.len() >= 5 => {
                                if let Some(contact) = parse_contact(&args[2..]) {
                                    let id = engine_handle.add_contact(contact).await;
                                    let handle = next_handle;
                                    contact_handles.insert(handle, id);
                                    next_handle += 1;
                                    println!("--> Added contact with handle: #{}", handle);
                                } else {
                                    println!("Error: role must be 'emergency' or 'liaison'.");
                                }
                            }
                            Some(&"edit") if args.len() >= 6 => {
                                match (parse_handle(args.get(2), &contact_handles), parse_contact(&args[3..])) {
                                    (Some((_, id)), Some(contact)) => {
                                        match engine_handle.update_contact(id, contact).await {
                                            Ok(()) => println!("--> Contact updated."),
                                            Err(e) => println!("--> Error: {}", e),
                                        }
                                    }
                                    (None, _) => println!("Error: unknown handle. Use 'contacts' to list them."),
                                    (_, None) => println!("Error: role must be 'emergency' or 'liaison'."),
                                }
                            }
                            Some(&"rm") => match parse_handle(args.get(2), &contact_handles) {
                                Some((handle, id)) => {
                                    match engine_handle.remove_contact(id).await {
                                        Ok(()) => println!("--> Contact removed."),
                                        Err(e) => println!("--> Error: {}", e),
                                    }
                                    contact_handles.remove(&handle);
                                }
                                None => println!("Error: unknown handle. Use 'contacts' to list them."),
                            },
                            _ => println!("Usage: contact add|edit [<H>] emergency|liaison <NAME> <EMAIL> [PHONE] | contact rm <H>"),
                        },
                        "contacts" => {
                            let contacts = engine_handle.contacts().await;
                            println!("Contacts:");
                            for (handle, id) in &contact_handles {
                                if let Some((_, c)) = contacts.iter().find(|(cid, _)| cid == id) {
                                    println!("  Handle #{}: {} <{}> ({:?})", handle, c.name, c.email, c.role);
                                }
                            }
                        }
                        "device" => match (args.get(1), args.get(2)) {
                            (Some(&"add"), Some(kind)) if args.len() >= 4 => {
                                let kind = match *kind {
                                    "watch" => Some(DeviceKind::Watch),
                                    "phone" => Some(DeviceKind::Phone),
                                    _ => None,
                                };
                                if let Some(kind) = kind {
                                    let device = Device {
                                        name: args[3..].join(" "),
                                        kind,
                                        connection: ConnectionState::Connected,
                                    };
                                    let id = engine_handle.add_device(device).await;
                                    let handle = next_handle;
                                    device_handles.insert(handle, id);
                                    next_handle += 1;
                                    println!("--> Paired device with handle: #{}", handle);
                                } else {
                                    println!("Error: kind must be 'watch' or 'phone'.");
                                }
                            }
                            (Some(&action), handle) if ["rm", "connect", "disconnect"].contains(&action) => {
                                match parse_handle(handle, &device_handles) {
                                    Some((handle, id)) => {
                                        let result = match action {
                                            "rm" => engine_handle.remove_device(id).await,
                                            "connect" => engine_handle.set_device_connection(id, ConnectionState::Connected).await,
                                            _ => engine_handle.set_device_connection(id, ConnectionState::Disconnected).await,
                                        };
                                        match result {
                                            Ok(()) => println!("--> Done."),
                                            Err(e) => println!("--> Error: {}", e),
                                        }
                                        if action == "rm" {
                                            device_handles.remove(&handle);
                                        }
                                    }
                                    None => println!("Error: unknown handle. Use 'devices' to list them."),
                                }
                            }
                            _ => println!("Usage: device add watch|phone <NAME> | device rm|connect|disconnect <H>"),
                        },
                        "devices" => {
                            let devices = engine_handle.devices().await;
                            println!("Devices:");
                            for (handle, id) in &device_handles {
                                if let Some((_, d)) = devices.iter().find(|(did, _)| did == id) {
                                    println!("  Handle #{}: {} ({:?}, {:?})", handle, d.name, d.kind, d.connection);
                                }
                            }
                        }
                        "memo" => {
                            let signed = args.get(1) == Some(&"--sign");
                            let text = args[if signed { 2 } else { 1 }..].join(" ");
                            if text.is_empty() {
                                let memo = engine_handle.memo().await;
                                println!(
                                    "  {} [{}]\n  {}",
                                    memo.id.as_deref().unwrap_or("(no id)"),
                                    if memo.is_signed { "signed" } else { "draft" },
                                    memo.content
                                );
                            } else {
                                engine_handle.update_memo(text, signed).await;
                                println!("--> Memo saved{}.", if signed { " and signed" } else { "" });
                            }
                        }
                        "logs" => {
                            let limit = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(10);
                            for entry in engine_handle.logs().await.into_iter().take(limit) {
                                println!(
                                    "  {} {:<8} {} - {}",
                                    entry.timestamp.format("%Y-%m-%d %H:%M").to_string().dimmed(),
                                    format!("{:?}", entry.kind).to_lowercase(),
                                    entry.title.bold(),
                                    entry.description
                                );
                            }
                        }
                        "inbox" => {
                            println!("Inbox ({} unread):", engine_handle.unread_count().await);
                            for item in engine_handle.inbox().await {
                                let marker = if item.read { " ".normal() } else { "*".cyan() };
                                println!("  {} {} {} - {}", marker, item.id.dimmed(), item.title.bold(), item.description);
                            }
                        }
                        "read" => match args.get(1) {
                            Some(&"all") => {
                                engine_handle.mark_all_read().await;
                                println!("--> All notifications marked read.");
                            }
                            Some(id) => {
                                if engine_handle.mark_read(id).await {
                                    println!("--> Marked read.");
                                } else {
                                    println!("--> Error: no notification '{}'.", id);
                                }
                            }
                            None => println!("Usage: read <ID>|all"),
                        },
                        "remote" => match engine_handle.remote_status().await {
                            Some(remote) => println!(
                                "--> Service state {:?}, deadline {}",
                                remote.state,
                                remote.deadline.to_rfc3339()
                            ),
                            None => println!("--> The switch service is unavailable."),
                        },
                        "reset" => {
                            engine_handle.reset_account().await;
                            println!("--> Account reset. New device identity {}.", engine_handle.device_udid().await);
                        }
                        "help" => print_help(),
                        "exit" => break,
                        _ => println!("Unknown command: '{}'. Type 'help'.", line),
                    }
                }
            }
            Err(_) => {
                println!("Exiting switchshell...");
                break;
            }
        }
    }

    Ok(())
}

fn parse_setting(args: &[&str]) -> Option<SettingsPatch> {
    let (key, value) = args.split_first()?;
    let value = value.join(" ");
    if value.is_empty() {
        return None;
    }
    let mut patch = SettingsPatch::default();
    match *key {
        "interval" => patch.check_in_interval_hours = Some(value.parse().ok()?),
        "grace" => patch.confirmation_delay_minutes = Some(value.parse().ok()?),
        "steps" => patch.min_steps = Some(value.parse().ok()?),
        "name" => patch.user_name = Some(value),
        "email" => patch.user_email = Some(value),
        "phone" => patch.user_phone = Some(value),
        _ => return None,
    }
    Some(patch)
}

fn parse_handle<K: Copy>(arg: Option<&&str>, handles: &HashMap<usize, K>) -> Option<(usize, K)> {
    let handle = arg?.parse::<usize>().ok()?;
    handles.get(&handle).map(|id| (handle, *id))
}

/// Parses `emergency|liaison <NAME> <EMAIL> [PHONE]`.
fn parse_contact(args: &[&str]) -> Option<Contact> {
    let role = match *args.first()? {
        "emergency" => ContactRole::Emergency,
        "liaison" | "asset-liaison" => ContactRole::AssetLiaison,
        _ => return None,
    };
    Some(Contact {
        name: args.get(1)?.to_string(),
        role,
        email: args.get(2)?.to_string(),
        phone: args.get(3).map(|s| s.to_string()).unwrap_or_default(),
    })
}
