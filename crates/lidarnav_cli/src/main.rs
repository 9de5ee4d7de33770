//! Command-line client for the lidarnav backend.
//!
//! Examples:
//!   lidarnav health
//!   lidarnav segment scene1.npz --stream
//!   lidarnav segment --random
//!   lidarnav map build scene1.npz
//!   lidarnav episode map --auto
//!   lidarnav shell
//!
//! The server address comes from the config file or `LIDARNAV_API_BASE`
//! (default http://localhost:8000); override with `--base <url>`.

use std::path::Path;
use std::process;

use lidarnav::prelude::*;
use lidarnav_protocol::classes::class_label;
use lidarnav_protocol::env::cell;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

type CliResult = Result<(), Box<dyn std::error::Error>>;

struct Args {
    base: Option<String>,
    period_ms: Option<u64>,
    command: Vec<String>,
}

fn usage() -> ! {
    eprintln!("lidarnav (talks to the segmentation/navigation API)");
    eprintln!("Usage: lidarnav [--base url] [--period-ms n] <command> [args]\n");
    eprintln!("Commands:");
    eprintln!("  health                          Check the server and print sample scene URLs");
    eprintln!("  segment <file.npz> [--stream]   Segment a scan (streamed with progress)");
    eprintln!("  segment --random                Segment a random server-side scan");
    eprintln!("  map build <file.npz>            Build the occupancy map from a labelled scan");
    eprintln!("  map random | map get            Build from a random scan / fetch the current map");
    eprintln!("  episode [random|map] [--steps N | --auto]");
    eprintln!("                                  Reset the environment and step it");
    eprintln!("  shell                           Interactive episode control on stdin");
    eprintln!("  paths                           Show the config file location");
    process::exit(1);
}

fn parse_args() -> Args {
    let mut base = None;
    let mut period_ms = None;
    let mut command = Vec::new();

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--base" => base = Some(it.next().unwrap_or_else(|| usage())),
            "--period-ms" => {
                period_ms = Some(
                    it.next()
                        .and_then(|v| v.parse().ok())
                        .unwrap_or_else(|| usage()),
                )
            }
            "-h" | "--help" => usage(),
            _ => command.push(arg),
        }
    }
    if command.is_empty() {
        usage();
    }

    Args {
        base,
        period_ms,
        command,
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let args = parse_args();
    let paths = match AppPaths::new() {
        Ok(paths) => Some(paths),
        Err(e) => {
            warn!("{}; using built-in defaults", e);
            None
        }
    };

    let mut config = ClientConfig::load(paths.as_ref())?;
    if let Some(base) = &args.base {
        config = config.with_api_base(base);
    }
    if let Some(ms) = args.period_ms {
        config = config.with_autorun_period_ms(ms);
    }
    let client = ApiClient::new(&config)?;

    let (cmd, rest) = match args.command.split_first() {
        Some(split) => split,
        None => usage(),
    };
    let result = match cmd.as_str() {
        "health" => health(&client).await,
        "segment" => segment(&client, rest).await,
        "map" => map(&client, rest).await,
        "episode" => episode(client, &config, rest).await,
        "shell" => shell(client, &config).await,
        "paths" => {
            match &paths {
                Some(paths) => println!("Config file: {}", paths.config_file().display()),
                None => println!("No per-user config directory on this platform"),
            }
            Ok(())
        }
        _ => usage(),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
    Ok(())
}

async fn health(client: &ApiClient) -> CliResult {
    let res = client.health().await?;
    println!("{}: {}", client.base(), res.status);
    println!("Sample scan:  {}", client.sample_scene_url());
    println!("Random scene: {}", client.random_scene_url());
    Ok(())
}

async fn segment(client: &ApiClient, rest: &[String]) -> CliResult {
    let mut stream = false;
    let mut random = false;
    let mut file = None;
    for arg in rest {
        match arg.as_str() {
            "--stream" => stream = true,
            "--random" => random = true,
            f if !f.starts_with("--") && file.is_none() => file = Some(f),
            _ => usage(),
        }
    }

    if random {
        if file.is_some() || stream {
            usage();
        }
        let res = client.segment_random().await?;
        print_histogram(&Histogram::from_labels(&res.labels));
        return Ok(());
    }

    let Some(file) = file else { usage() };
    let upload = Upload::from_path(Path::new(file)).await?;

    if !stream {
        let res = client.segment(upload).await?;
        if res.num_points != res.labels.len() as u64 {
            warn!("Server reported {} points but sent {} labels", res.num_points, res.labels.len());
        }
        print_histogram(&Histogram::from_labels(&res.labels));
        return Ok(());
    }

    let result = StreamSession::new()
        .run(
            client.segment_stream(upload),
            |u| match u.batch {
                Some(batch) => eprintln!(
                    "[{:>3}%] batch {} ({} points), {} labelled so far",
                    u.progress.percent(),
                    batch.index,
                    batch.len,
                    u.histogram.total()
                ),
                None => eprintln!("Streaming {} batches", u.progress.total),
            },
            |labels| eprintln!("Received {} final labels", labels.len()),
        )
        .await?;

    if !result.is_consistent() {
        warn!("Streamed batch counts differ from the final labels; showing final");
    }
    print_histogram(&result.histogram);
    Ok(())
}

async fn map(client: &ApiClient, rest: &[String]) -> CliResult {
    let grid = match rest {
        [sub, file] if sub == "build" => {
            let upload = Upload::from_path(Path::new(file)).await?;
            client.build_map(upload).await?
        }
        [sub] if sub == "random" => client.build_map_random().await?,
        [sub] if sub == "get" => client.get_map().await?,
        _ => usage(),
    };
    print_class_map(&grid);
    Ok(())
}

async fn episode(client: ApiClient, config: &ClientConfig, rest: &[String]) -> CliResult {
    let mut source = ResetSource::Random;
    let mut steps = None;
    let mut auto = false;

    let mut it = rest.iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "random" => source = ResetSource::Random,
            "map" => source = ResetSource::OccupancyMap,
            "--steps" => {
                steps = Some(
                    it.next()
                        .and_then(|v| v.parse::<u64>().ok())
                        .unwrap_or_else(|| usage()),
                )
            }
            "--auto" => auto = true,
            _ => usage(),
        }
    }
    if auto && steps.is_some() {
        usage();
    }

    let controller = EpisodeController::new(client).into_shared();
    {
        let mut ctl = controller.lock().await;
        ctl.reset(source, EpisodeTally::Clear).await?;
        print_env(ctl.grid());
    }

    if auto {
        let mut scheduler = AutoRunScheduler::new(config.autorun_period());
        scheduler
            .start_with(&controller, |outcome| println!("{}", outcome))
            .await?;

        if let Some(stop) = scheduler.stop_handle() {
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Ctrl-C: stopping auto-run after the current step");
                    stop.stop();
                }
            });
        }
        if let Some(AutoRunExit::Failed(e)) = report_exit(scheduler.join().await) {
            return Err(e.into());
        }
    } else {
        let mut ctl = controller.lock().await;
        for _ in 0..steps.unwrap_or(1) {
            let outcome = ctl.step().await?;
            println!("{}", outcome);
            if outcome.done {
                break;
            }
        }
    }

    let ctl = controller.lock().await;
    print_env(ctl.grid());
    println!("[{}] {}", ctl.phase(), ctl.stats());
    Ok(())
}

async fn shell(client: ApiClient, config: &ClientConfig) -> CliResult {
    let controller = EpisodeController::new(client).into_shared();
    let mut scheduler = AutoRunScheduler::new(config.autorun_period());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("Commands: reset random|map [full], step, start, stop, stats, grid, quit");
    while let Some(line) = lines.next_line().await? {
        report_exit(scheduler.take_finished().await);
        let words: Vec<&str> = line.split_whitespace().collect();
        let result = match words.as_slice() {
            [] => continue,
            ["quit" | "exit"] => break,
            ["reset", args @ ..] => shell_reset(&controller, &mut scheduler, args).await,
            ["step"] => {
                if scheduler.is_running() {
                    println!("Stop auto-run to step manually");
                    Ok(())
                } else {
                    let outcome = controller.lock().await.step().await;
                    outcome.map(|o| println!("{}", o))
                }
            }
            ["start"] => scheduler
                .start_with(&controller, |outcome| println!("{}", outcome))
                .await
                .map(|()| println!("Auto-run started")),
            ["stop"] => {
                if scheduler.stop() {
                    report_exit(scheduler.join().await);
                } else {
                    println!("Auto-run is not active");
                }
                Ok(())
            }
            ["stats"] => {
                let ctl = controller.lock().await;
                println!("[{}] {}", ctl.phase(), ctl.stats());
                Ok(())
            }
            ["grid"] => {
                print_env(controller.lock().await.grid());
                Ok(())
            }
            _ => {
                println!("Unknown command: {}", line.trim());
                Ok(())
            }
        };
        if let Err(e) = result {
            println!("Error: {}", e);
        }
    }

    scheduler.stop();
    report_exit(scheduler.join().await);
    Ok(())
}

async fn shell_reset(
    controller: &SharedController<ApiClient>,
    scheduler: &mut AutoRunScheduler,
    args: &[&str],
) -> Result<(), EpisodeError> {
    let (source, tally) = match args {
        ["random"] => (ResetSource::Random, EpisodeTally::Keep),
        ["map"] => (ResetSource::OccupancyMap, EpisodeTally::Keep),
        ["random", "full"] => (ResetSource::Random, EpisodeTally::Clear),
        ["map", "full"] => (ResetSource::OccupancyMap, EpisodeTally::Clear),
        _ => {
            println!("Usage: reset random|map [full]");
            return Ok(());
        }
    };

    // A reset always ends auto-run.
    if scheduler.stop() {
        report_exit(scheduler.join().await);
    }

    let mut ctl = controller.lock().await;
    ctl.reset(source, tally).await?;
    print_env(ctl.grid());
    Ok(())
}

fn report_exit(exit: Option<AutoRunExit>) -> Option<AutoRunExit> {
    match &exit {
        Some(AutoRunExit::Stopped) => println!("Auto-run stopped"),
        Some(AutoRunExit::EpisodeDone) => println!("Auto-run finished: episode done"),
        Some(AutoRunExit::Failed(e)) => println!("Auto-run failed: {}", e),
        Some(AutoRunExit::ControllerDropped) | Some(AutoRunExit::Aborted) => {
            println!("Auto-run ended unexpectedly")
        }
        None => {}
    }
    exit
}

fn print_histogram(histogram: &Histogram) {
    println!("{} points", histogram.total());
    for (id, count) in histogram.nonzero() {
        println!(
            "  {:>2} {:<10} {:>8} {:>6.1}%",
            id,
            class_label(id),
            count,
            histogram.fraction(id) * 100.0
        );
    }
}

/// Navigation grid: `.` free, `#` obstacle, `G` goal, `A` agent.
fn print_env(grid: &Grid) {
    for row in grid.as_rows() {
        let line: String = row
            .iter()
            .map(|&v| match v {
                cell::FREE => '.',
                cell::OBSTACLE => '#',
                cell::GOAL => 'G',
                cell::AGENT => 'A',
                _ => '?',
            })
            .collect();
        println!("{}", line);
    }
    match grid.find(cell::AGENT) {
        Some((r, c)) => println!("{}x{} grid, agent at ({}, {})", grid.rows(), grid.cols(), r, c),
        None => println!("{}x{} grid", grid.rows(), grid.cols()),
    }
}

/// Occupancy map cells hold class ids; free cells print as `.`.
fn print_class_map(grid: &Grid) {
    for row in grid.as_rows() {
        let line: String = row
            .iter()
            .map(|&v| match v {
                0 => '.',
                1..=9 => char::from(b'0' + v as u8),
                _ => '?',
            })
            .collect();
        println!("{}", line);
    }
    println!("{}x{} map", grid.rows(), grid.cols());
    for class in SemanticClass::all().iter().skip(1) {
        let n = grid.count(class.id());
        if n > 0 {
            println!("  {} {:<8} {} cells", class.id(), class.label(), n);
        }
    }
}
