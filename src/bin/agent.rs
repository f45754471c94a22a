use std::collections::HashSet;

use fleetwatch::{
    CpuMetrics, MetricsSnapshot, ProcessInfo, SystemMetrics, UsageMetrics,
    util::{SECRET_HEADER, get_addr, get_port, get_secret},
};
use rocket::{
    Build, Rocket, State,
    figment::Figment,
    get,
    http::Status,
    launch, post,
    request::{FromRequest, Outcome},
    routes,
    serde::{Deserialize, json::Json},
};
use sysinfo::{Disks, ProcessesToUpdate, System};
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Names pushed by the control plane plus the optional shared secret
#[derive(Debug, Default)]
struct AgentState {
    secret: Option<String>,
    processes: RwLock<Vec<String>>,
    containers: RwLock<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(crate = "rocket::serde")]
struct ProcessConfig {
    processes: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(crate = "rocket::serde")]
struct ContainerConfig {
    containers: Vec<String>,
}

#[get("/metrics")]
#[instrument(skip_all)]
async fn metrics(
    _secret: SecretKey,
    state: &State<AgentState>,
) -> Result<Json<MetricsSnapshot>, Status> {
    let watched = state.processes.read().await.clone();

    let snapshot = rocket::tokio::task::spawn_blocking(move || collect(&watched))
        .await
        .map_err(|e| {
            error!("metrics collection panicked: {e}");
            Status::InternalServerError
        })?;

    debug!(processes = snapshot.processes.len(), "collected metrics");
    Ok(Json(snapshot))
}

/// Sample system usage and the watched processes
///
/// Blocks for the minimum CPU sampling interval.
fn collect(watched: &[String]) -> MetricsSnapshot {
    let mut sys = System::new();
    sys.refresh_cpu_usage();
    sys.refresh_processes(ProcessesToUpdate::All, true);
    std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
    sys.refresh_cpu_usage();
    sys.refresh_memory();
    sys.refresh_processes(ProcessesToUpdate::All, true);

    let total_memory = sys.total_memory();
    let ram = usage(total_memory, sys.used_memory());

    let disks = Disks::new_with_refreshed_list();
    let (disk_total, disk_free) = disks.iter().fold((0, 0), |(total, free), disk| {
        (total + disk.total_space(), free + disk.available_space())
    });
    let disk = usage(disk_total, disk_total.saturating_sub(disk_free));

    let watched: HashSet<&str> = watched.iter().map(String::as_str).collect();
    let processes = sys
        .processes()
        .values()
        .filter_map(|process| {
            let name = process.name().to_string_lossy();
            if !watched.contains(name.as_ref()) {
                return None;
            }

            let memory = process.memory();
            Some(ProcessInfo {
                pid: process.pid().as_u32() as i32,
                name: name.into_owned(),
                cpu_percent: process.cpu_usage() as f64,
                memory_mb: memory as f64 / BYTES_PER_MB,
                memory_percent: percent(memory, total_memory),
            })
        })
        .collect();

    MetricsSnapshot {
        system: Some(SystemMetrics {
            cpu: CpuMetrics {
                usage_percent: sys.global_cpu_usage() as f64,
            },
            ram,
            disk,
        }),
        processes,
        ..Default::default()
    }
}

fn usage(total: u64, used: u64) -> UsageMetrics {
    UsageMetrics {
        total,
        used,
        free: total.saturating_sub(used),
        usage_percent: percent(used, total),
    }
}

fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 * 100.0 / total as f64
    }
}

#[post("/config/processes", data = "<config>")]
async fn config_processes(
    _secret: SecretKey,
    state: &State<AgentState>,
    config: Json<ProcessConfig>,
) -> Status {
    let ProcessConfig { processes } = config.into_inner();
    info!("watching {} processes", processes.len());
    *state.processes.write().await = processes;
    Status::Ok
}

#[post("/config/containers", data = "<config>")]
async fn config_containers(
    _secret: SecretKey,
    state: &State<AgentState>,
    config: Json<ContainerConfig>,
) -> Status {
    let ContainerConfig { containers } = config.into_inner();
    info!("watching {} containers", containers.len());
    *state.containers.write().await = containers;
    Status::Ok
}

#[get("/ping")]
fn ping() {}

fn init() {
    dotenv::dotenv().ok();

    let filter = filter::Targets::new()
        .with_target("fleetwatch_agent", tracing::metadata::LevelFilter::TRACE)
        .with_target("fleetwatch", tracing::metadata::LevelFilter::DEBUG)
        .with_target("rocket", tracing::metadata::LevelFilter::INFO);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(true),
        )
        .with(filter)
        .init();
}

fn get_config() -> Figment {
    rocket::Config::figment()
        .merge(("port", get_port()))
        .merge(("address", get_addr()))
        .merge(("workers", 1))
}

fn build(figment: Figment, state: AgentState) -> Rocket<Build> {
    if state.secret.is_none() {
        warn!("no AGENT_SECRET set, endpoints are unauthenticated");
    }

    rocket::custom(figment).manage(state).mount(
        "/",
        routes![metrics, config_processes, config_containers, ping],
    )
}

#[launch]
fn rocket() -> _ {
    init();

    let state = AgentState {
        secret: get_secret(),
        ..Default::default()
    };
    build(get_config(), state)
}

#[derive(Debug)]
struct SecretKey;

#[rocket::async_trait]
impl<'r> FromRequest<'r> for SecretKey {
    type Error = ();

    async fn from_request(request: &'r rocket::Request<'_>) -> Outcome<Self, Self::Error> {
        let expected = request
            .rocket()
            .state::<AgentState>()
            .and_then(|state| state.secret.as_deref());

        let Some(expected) = expected else {
            return Outcome::Success(SecretKey);
        };

        match request.headers().get_one(SECRET_HEADER) {
            Some(passed) if passed == expected => Outcome::Success(SecretKey),
            _ => {
                warn!("rejected request without valid secret");
                Outcome::Error((Status::Unauthorized, ()))
            }
        }
    }
}
