//! # RTSERVER Grid
//!
//! Loads a scene, shoots a square grid of parallel rays through it and
//! prints a hit-count map.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --release --features cli --bin rtserver-grid -- --help
//! rtserver-grid --threads 8 --size 48 scene.toml
//! rtserver-grid -o hull -o turret scene.toml
//! rtserver-grid            # built-in test article
//! ```

use rtserver::{RtServer, ServerConfig};
use rtserver_core::{JobId, Vec3};
use rtserver_geometry::SceneLoader;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const BUILTIN_NAME: &str = "builtin:tank";

const BUILTIN_SCENE: &str = r#"
title = "built-in test article"

[rtserver]
tops = ["hull", "turret"]

[[objects]]
name = "hull"

[[objects.regions]]
name = "hull/armor.r"
ident = 1000
component = "armor"
shape = { type = "rpp", min = [-30.0, -15.0, -10.0], max = [30.0, 15.0, 10.0] }

[[objects.regions]]
name = "hull/engine.r"
ident = 1001
component = "engine"
shape = { type = "sphere", center = [18.0, 0.0, 0.0], radius = 8.0 }

[[objects.regions]]
name = "hull/cabin.air"
aircode = 1
shape = { type = "rpp", min = [-20.0, -10.0, -5.0], max = [5.0, 10.0, 5.0] }

[[objects]]
name = "turret"

[[objects.regions]]
name = "turret/ring.r"
ident = 2000
component = "turret"
shape = { type = "sphere", center = [-5.0, 0.0, 10.0], radius = 9.0 }
"#;

const SHADES: &[u8] = b" .:-=+*#%@";

fn main() {
    println!("╔══════════════════════════════════════════════════════════════════╗");
    println!("║         RTSERVER GRID                                            ║");
    println!("║         PARALLEL RAY DISPATCH DEMO                               ║");
    println!("╚══════════════════════════════════════════════════════════════════╝");
    println!();

    let args: Vec<String> = std::env::args().collect();
    let mut config = ServerConfig::production();
    let mut size = 32usize;
    let mut verbose = false;
    let mut objects: Vec<String> = Vec::new();
    let mut scene_path: Option<String> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--threads" | "-t" => {
                if i + 1 < args.len() {
                    config.num_threads = args[i + 1].parse().unwrap_or(config.num_threads);
                    i += 1;
                }
            }
            "--queues" | "-q" => {
                if i + 1 < args.len() {
                    config.num_queues = args[i + 1].parse().unwrap_or(config.num_queues);
                    i += 1;
                }
            }
            "--size" | "-s" => {
                if i + 1 < args.len() {
                    size = args[i + 1].parse().unwrap_or(32);
                    i += 1;
                }
            }
            "--object" | "-o" => {
                if i + 1 < args.len() {
                    objects.push(args[i + 1].clone());
                    i += 1;
                }
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    match ServerConfig::from_file(&args[i + 1]) {
                        Ok(loaded) => config = loaded,
                        Err(e) => {
                            eprintln!("   ✗ {e}");
                            std::process::exit(1);
                        }
                    }
                    i += 1;
                }
            }
            "--air" | "-a" => config.use_air = true,
            "--verbose" | "-v" => verbose = true,
            "--help" | "-h" => {
                println!("Usage: rtserver-grid [OPTIONS] [SCENE]");
                println!();
                println!("Options:");
                println!("  -t, --threads <NUM>     Worker threads (default: all cores)");
                println!("  -q, --queues <NUM>      Priority levels (default: 3, minimum 2)");
                println!("  -s, --size <NUM>        Grid rows and columns (default: 32)");
                println!("  -o, --object <NAME>     Object to load, repeatable (default: scene tops)");
                println!("  -c, --config <FILE>     Server config file (TOML)");
                println!("  -a, --air               Report air regions");
                println!("  -v, --verbose           Debug logging");
                println!("  -h, --help              Show this help");
                return;
            }
            other => scene_path = Some(other.to_string()),
        }
        i += 1;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                if verbose {
                    "rtserver=debug,rtserver_core=debug,rtserver_geometry=debug".into()
                } else {
                    "rtserver=info,rtserver_geometry=info".into()
                }
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let size = size.max(1);
    let loader = SceneLoader::new().with_source(BUILTIN_NAME, BUILTIN_SCENE);
    let source = scene_path.as_deref().unwrap_or(BUILTIN_NAME);
    let object_names = (!objects.is_empty()).then_some(objects.as_slice());

    let server = match RtServer::init(config, &loader, source, object_names) {
        Ok(server) => server,
        Err(e) => {
            eprintln!("   ✗ FATAL: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = run(&server, size) {
        eprintln!("   ✗ {e}");
        server.shutdown();
        std::process::exit(1);
    }
    server.shutdown();
}

fn run(server: &RtServer, size: usize) -> rtserver::RtResult<()> {
    let config = server.config();
    println!("┌─ CONFIGURATION ─────────────────────────────────────────────────┐");
    println!("│ Library:            {}", RtServer::library_version());
    println!("│ Title:              {}", server.title());
    println!("│ Worker Threads:     {}", config.num_threads);
    println!("│ Priority Levels:    {}", config.num_queues);
    println!("│ Grid:               {size} x {size}");
    println!("│ Air Regions:        {}", if config.use_air { "on" } else { "off" });
    println!("└──────────────────────────────────────────────────────────────────┘");
    println!();

    // Session 0 first, then a private copy for the grid.
    let primary = server.open_session()?;
    let session = server.open_session()?;
    server.close_session(primary);

    let bbox = server.bounding_box(session)?;
    let center = bbox.center();
    let extent = bbox.size();
    println!("Bounding box: {:?} .. {:?}", bbox.min.to_array(), bbox.max.to_array());

    let probe = server.shoot_ray(center - Vec3::X * extent.x, Vec3::X, session)?;
    if let Some(ray_result) = probe.ray_results.first() {
        for hit in &ray_result.hits {
            let region = hit.region.as_ref().map_or("?", |r| r.name.as_str());
            println!(
                "  center ray: {region:<20} in {:>8.3}  out {:>8.3}  comp {}",
                hit.hit_dist,
                hit.exit_dist(),
                hit.comp_id
            );
        }
    }
    server.release_result(probe);
    println!();

    // One job per row, spread over every queue.
    let origin_x = bbox.min.x - extent.x;
    let step_y = extent.y / size as f64;
    let step_z = extent.z / size as f64;
    let queues = config.num_queues;
    let mut rows: HashMap<JobId, usize> = HashMap::with_capacity(size);

    let start = Instant::now();
    for row in 0..size {
        let mut job = server.new_job(session);
        let z = bbox.max.z - (row as f64 + 0.5) * step_z;
        for col in 0..size {
            let y = bbox.min.y + (col as f64 + 0.5) * step_y;
            let index = i64::try_from(col).unwrap_or(i64::MAX);
            job.rays
                .push(server.new_ray(Vec3::new(origin_x, y, z), Vec3::X, index));
        }
        rows.insert(job.id, row);
        server.submit(job, row % queues)?;
    }

    let mut map = vec![vec![0usize; size]; size];
    let mut total_hits = 0usize;
    for _ in 0..size {
        let result = server.wait_result(session, Some(Duration::from_secs(30)))?;
        if let Some(&row) = result.key().and_then(|(id, _)| rows.get(&id)) {
            for ray_result in &result.ray_results {
                let col = usize::try_from(ray_result.ray.index).unwrap_or(0);
                if let Some(cell) = map[row].get_mut(col) {
                    *cell = ray_result.hits.len();
                }
            }
        }
        total_hits += result.hit_count();
        server.release_result(result);
    }
    let elapsed = start.elapsed();

    for line in &map {
        let text: String = line
            .iter()
            .map(|&n| char::from(SHADES[n.min(SHADES.len() - 1)]))
            .collect();
        println!("  │{text}│");
    }
    println!();

    let rays = size * size;
    println!("┌─ RESULTS ────────────────────────────────────────────────────────┐");
    println!("│ Rays:               {rays}");
    println!("│ Hits:               {total_hits}");
    println!("│ Elapsed:            {elapsed:?}");
    println!(
        "│ Rays/sec:           {:.0}",
        rays as f64 / elapsed.as_secs_f64().max(f64::EPSILON)
    );
    println!("└──────────────────────────────────────────────────────────────────┘");

    let names = server.component_names();
    if names.len() > 1 {
        println!("Components: {}", names.join(", "));
    }

    let stats = server.stats();
    println!(
        "Workers: peak {} busy, {} jobs, {} rays",
        stats.workers.peak_busy, stats.workers.jobs_completed, stats.workers.rays_shot
    );
    println!(
        "Arena: {} allocated, {} free",
        stats.arena.total_fresh(),
        stats.arena.total_free()
    );
    server.log_resource_summary();
    server.close_session(session);
    Ok(())
}
