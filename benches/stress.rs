use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use serde_json::json;

use loadwise::model::*;
use loadwise::{BackendOp, Coordinator, CoordinatorConfig, MemoryBackend};

const DEVELOPERS: i64 = 20;
const ITEMS: i64 = 500;

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

fn quarter() -> DateRange {
    let start = NaiveDate::from_ymd_opt(2024, 4, 1).unwrap_or_default();
    let end = NaiveDate::from_ymd_opt(2024, 6, 30).unwrap_or_default();
    DateRange::new(start, end)
}

fn setup(latency: Duration) -> (Arc<MemoryBackend>, Arc<Coordinator>) {
    let backend = Arc::new(MemoryBackend::new());
    let range = quarter();
    for dev in 0..DEVELOPERS {
        let mut records = Vec::new();
        let mut date = range.start;
        let mut n = 0;
        while date <= range.end {
            records.push(AllocationRecord {
                entity_id: dev,
                date,
                allocated_hours: (n % 10) as f64,
                max_hours: 8.0,
                contributions: vec![Contribution {
                    item_id: dev * 1000 + n,
                    item_name: None,
                    hours: (n % 10) as f64,
                }],
                is_overtime: n % 10 > 8,
            });
            date = date.succ_opt().unwrap_or(date);
            n += 1;
        }
        backend.set_allocations(dev, records);
    }

    let items: Vec<ItemRecord> = (0..ITEMS)
        .map(|id| {
            let fields = json!({"name": format!("task {id}"), "owner_id": id % DEVELOPERS, "priority": "P3"});
            ItemRecord::new(id, fields.as_object().cloned().unwrap_or_default())
        })
        .collect();
    for item in &items {
        backend.insert_item(item.id, item.fields.clone());
    }
    backend.set_latency(latency);

    let config = CoordinatorConfig {
        debounce: Duration::from_millis(50),
        summary_on_commit: false,
        ..CoordinatorConfig::default()
    };
    let coordinator = Arc::new(Coordinator::new(backend.clone(), config));
    coordinator.load_items(items);
    (backend, coordinator)
}

async fn phase1_cell_fan_in(backend: &MemoryBackend, coordinator: &Arc<Coordinator>) {
    // Every visible date cell asks for its owner's capacity at once.
    let cells_per_dev = 90;
    let start = Instant::now();
    let mut handles = Vec::new();
    for dev in 0..DEVELOPERS {
        for item in 0..cells_per_dev {
            let coordinator = coordinator.clone();
            handles.push(tokio::spawn(async move {
                let t = Instant::now();
                coordinator.request_availability(dev, quarter(), Some(dev * 1000 + item)).await;
                t.elapsed()
            }));
        }
    }
    let mut latencies = Vec::with_capacity(handles.len());
    for h in handles {
        if let Ok(elapsed) = h.await {
            latencies.push(elapsed);
        }
    }
    let elapsed = start.elapsed();
    println!(
        "  {} requests in {:.2}s, {} backend fetches",
        latencies.len(),
        elapsed.as_secs_f64(),
        backend.calls(BackendOp::FetchAllocations)
    );
    print_latency("availability request", &mut latencies);
}

async fn phase2_typing_bursts(backend: &MemoryBackend, coordinator: &Arc<Coordinator>) {
    let keystrokes: i64 = 12;
    let typists = 50;
    let before = backend.calls(BackendOp::UpdateItem);
    let start = Instant::now();

    let mut handles = Vec::new();
    for t in 0..typists {
        let coordinator = coordinator.clone();
        handles.push(tokio::spawn(async move {
            let mut text = String::new();
            for k in 0..keystrokes {
                text.push(char::from(b'a' + (k % 26) as u8));
                let _ = coordinator.submit_field_edit(t, "name", json!(text));
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }));
    }
    for h in handles {
        let _ = h.await;
    }
    let flushed = coordinator.flush_edits().await;

    let writes = backend.calls(BackendOp::UpdateItem) - before;
    println!(
        "  {typists} typists x {keystrokes} keystrokes = {} edits -> {writes} writes ({flushed} flushed) in {:.2}s",
        typists * keystrokes,
        start.elapsed().as_secs_f64()
    );
}

async fn phase3_read_under_invalidation(coordinator: &Arc<Coordinator>) {
    let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let invalidator = {
        let coordinator = coordinator.clone();
        let stop = stop.clone();
        tokio::spawn(async move {
            let mut dev = 0;
            while !stop.load(std::sync::atomic::Ordering::Relaxed) {
                coordinator.invalidate(Some(dev % DEVELOPERS));
                dev += 1;
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
    };

    let readers = 10;
    let reads_per_reader = 200;
    let mut handles = Vec::new();
    for r in 0..readers {
        let coordinator = coordinator.clone();
        handles.push(tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for i in 0..reads_per_reader {
                let dev = (r * 7 + i as i64) % DEVELOPERS;
                let t = Instant::now();
                coordinator.workday_status(dev, quarter(), None).await;
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }
    let mut all_latencies = Vec::new();
    for h in handles {
        if let Ok(latencies) = h.await {
            all_latencies.extend(latencies);
        }
    }
    stop.store(true, std::sync::atomic::Ordering::Relaxed);
    let _ = invalidator.await;

    print_latency("workday status", &mut all_latencies);
}

async fn phase4_fill_and_drag(backend: &MemoryBackend, coordinator: &Arc<Coordinator>) {
    let start = Instant::now();
    let _ = coordinator.begin_fill(0, "priority", json!("P1"));
    let targets = coordinator.update_fill(Some(ITEMS - 1));
    match coordinator.commit_fill().await {
        Ok(Some(result)) => println!(
            "  fill of {} targets: {} ok, {} failed in {:.2}ms",
            targets.len(),
            result.success_count,
            result.fail_count,
            start.elapsed().as_secs_f64() * 1000.0
        ),
        Ok(None) => println!("  fill had no targets"),
        Err(e) => println!("  fill failed: {e}"),
    }

    let mut latencies = Vec::new();
    for id in 0..100 {
        let t = Instant::now();
        let Ok(mut state) = coordinator.begin_drag(id) else { continue };
        state.owner_id = state.owner_id.map(|o| (o + 1) % DEVELOPERS);
        if coordinator.propose_drag(id, state).is_ok() && coordinator.persist_drag(id).await.is_ok() {
            latencies.push(t.elapsed());
        }
    }
    println!("  {} fetches after drags", backend.calls(BackendOp::FetchAllocations));
    print_latency("drag persist", &mut latencies);
}

#[tokio::main]
async fn main() {
    let latency_ms: u64 = std::env::var("LOADWISE_BENCH_LATENCY_MS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(5);

    println!("=== loadwise stress benchmark ===");
    println!("backend latency: {latency_ms}ms\n");

    println!("[setup]");
    let (backend, coordinator) = setup(Duration::from_millis(latency_ms));
    println!("  {DEVELOPERS} developers, {ITEMS} items");

    println!("\n[phase 1] capacity fan-in");
    phase1_cell_fan_in(&backend, &coordinator).await;

    println!("\n[phase 2] debounced typing");
    phase2_typing_bursts(&backend, &coordinator).await;

    println!("\n[phase 3] reads under invalidation");
    phase3_read_under_invalidation(&coordinator).await;

    println!("\n[phase 4] fill and drag");
    phase4_fill_and_drag(&backend, &coordinator).await;

    println!("\n=== done ===");
}
