use anyhow::Result;
use std::fs;
use std::path::Path;
use tracing::info;

use crate::coordinator::{Coordinator, RunConfig, RunReport, Strategy};
use crate::fetch::Fetcher;
use crate::sink::Outputs;

/// Create an OSC8 file:// hyperlink for terminal output
fn osc8_file_link(path: &Path) -> String {
    let abs_path = fs::canonicalize(path)
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|_| path.display().to_string());
    format!(
        "\x1b]8;;file://{}\x1b\\{}\x1b]8;;\x1b\\",
        abs_path,
        path.display()
    )
}

/// Run one strategy end to end: fetch, normalize, store, then write the export.
/// The export is flushed even when the run fails part way.
pub fn run_scrape<F: Fetcher>(
    fetcher: F,
    strategy: Strategy,
    config: RunConfig,
    outputs: Outputs,
) -> Result<()> {
    let mut coordinator = Coordinator::new(fetcher, outputs, config);
    let result = coordinator.run(&strategy);

    let Outputs { store, export } = coordinator.into_sink();
    let json_path = export.path().to_path_buf();
    info!(pending = export.pending(), path = %json_path.display(), "writing export");
    let exported = export.finish()?;
    let report = result?;

    print_summary(&strategy, &report, store.path(), store.count()?, &json_path, exported);
    Ok(())
}

fn print_summary(
    strategy: &Strategy,
    report: &RunReport,
    db_path: &Path,
    stored: usize,
    json_path: &Path,
    exported: Option<usize>,
) {
    println!();
    println!("Scraping complete ({})", strategy.name());
    println!(
        "  Passes: {}  Pages fetched: {}  Records seen: {}",
        report.passes, report.batches, report.raw_records
    );
    println!(
        "  Accepted: {}  Unique products: {}  Rejected: {}",
        report.accepted,
        report.unique_ids,
        report.rejected_total()
    );
    for (kind, count) in &report.rejected {
        println!("    {:<24} {}", kind.as_str(), count);
    }
    if !report.signals.is_empty() {
        let signals: Vec<String> = report
            .signals
            .iter()
            .map(|(signal, count)| format!("{} x{}", signal, count))
            .collect();
        println!("  Fetch issues: {}", signals.join(", "));
    }
    println!("  Database: {} ({} stamps)", osc8_file_link(db_path), stored);
    match exported {
        Some(total) => println!("  Export: {} ({} stamps)", osc8_file_link(json_path), total),
        None => println!("  Export: nothing new for {}", json_path.display()),
    }
}
