use anyhow::Result;

use darkmap_core::AppConfig;
use darkmap_search::SearchEngine;
use darkmap_storage::Storage;

pub async fn run(config: AppConfig) -> Result<()> {
    let storage = Storage::new(&config.database.url).await?;

    match storage.check_connectivity().await {
        Ok(()) => println!("Database: connected"),
        Err(e) => {
            println!("Database: ERROR - {}", e);
            return Ok(());
        }
    }

    storage.run_migrations().await?;

    let engine = SearchEngine::new(storage.pool().clone());
    let stats = engine.stats().await?;

    println!("\n╔══════════════════════════════════════════════╗");
    println!("║             darkmap status                   ║");
    println!("╠══════════════════════════════════════════════╣");
    println!("║ Domains:            {:>20}     ║", stats.domains);
    println!("║ Pages:              {:>20}     ║", stats.pages);
    println!("║ Links:              {:>20}     ║", stats.links);
    println!("║ Queue pending:      {:>20}     ║", stats.queue_pending);
    println!("║ Queue completed:    {:>20}     ║", stats.queue_completed);
    println!("║ Queue failed:       {:>20}     ║", stats.queue_failed);
    println!("║ Port jobs pending:  {:>20}     ║", stats.port_scan_jobs_pending);
    println!("║ Dir jobs pending:   {:>20}     ║", stats.dir_scan_jobs_pending);
    println!("║ Open ports:         {:>20}     ║", stats.open_ports);
    println!("║ Services detected:  {:>20}     ║", stats.detected_services);
    println!("║ Dir findings:       {:>20}     ║", stats.interesting_findings);
    println!("╚══════════════════════════════════════════════╝\n");

    Ok(())
}
