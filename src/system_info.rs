use crate::config::Config;
use serde::Serialize;
use sysinfo::System;

#[derive(Serialize, Debug)]
pub struct SystemInfo {
    pub version: String,
    pub platform: String,
    pub arch: String,
    pub cpus: usize,
    pub cpu_model: String,
    pub memory_total_gb: f64,
    pub memory_free_gb: f64,
}

pub fn get_system_info() -> SystemInfo {
    let mut system = System::new();
    system.refresh_cpu();
    system.refresh_memory();

    let cpu_model = system
        .cpus()
        .first()
        .map(|cpu| cpu.brand().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    SystemInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        platform: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
        cpus: system.cpus().len(),
        cpu_model,
        memory_total_gb: system.total_memory() as f64 / 1024.0 / 1024.0 / 1024.0,
        memory_free_gb: system.available_memory() as f64 / 1024.0 / 1024.0 / 1024.0,
    }
}

pub fn print_startup_info(config: &Config, videos: usize) {
    let sys_info = get_system_info();

    println!("{}", "=".repeat(60));
    println!("🏀 Game Analytics Backend v{}", sys_info.version);
    println!("{}", "=".repeat(60));
    println!("📊 System Information:");
    println!("  Platform: {} ({})", sys_info.platform, sys_info.arch);
    println!("  CPUs: {} ({})", sys_info.cpus, sys_info.cpu_model);
    println!(
        "  Memory: {:.2} GB total, {:.2} GB available",
        sys_info.memory_total_gb, sys_info.memory_free_gb
    );
    println!("📚 Library:");
    if config.store.persist {
        println!("  Snapshot: {:?}", config.snapshot_path());
    } else {
        println!("  Snapshot: in memory ({})", config.store.namespace);
    }
    println!("  Videos: {}", videos);
    println!("⚙️  Pipeline:");
    println!(
        "  Max concurrent runs: {}",
        config.pipeline.concurrent_runs()
    );
    match config.pipeline.seed {
        Some(seed) => println!("  Synthetic data seed: {}", seed),
        None => println!("  Synthetic data seed: random"),
    }
    println!("  Coach reply delay: {} ms", config.coach.reply_delay_ms);
    println!("{}", "=".repeat(60));
}
