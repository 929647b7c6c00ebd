use bootherd_store::Registry;
use clap::Args;
use color_eyre::eyre::{Result, WrapErr};
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Directory of record manifests
    pub dir: PathBuf,
}

/// Loads the directory into a scratch registry and prints what would load.
/// Returns false when any manifest was skipped.
pub fn run_check(args: CheckArgs) -> Result<bool> {
    let registry = Registry::new();
    let report = registry
        .load_from_directory(&args.dir)
        .wrap_err_with(|| format!("cannot read {}", args.dir.display()))?;

    for id in &report.loaded {
        if let Some(record) = registry.find(id) {
            let macs: Vec<String> = record.mac.iter().map(ToString::to_string).collect();
            let address = record
                .ipv4
                .map(|net| net.to_string())
                .unwrap_or_default();
            println!("ok    {} {} [{}]", id, address, macs.join(", "));
        }
    }
    for (path, reason) in &report.skipped {
        println!("skip  {}: {}", path.display(), reason);
    }
    println!(
        "{} loaded, {} skipped",
        report.loaded.len(),
        report.skipped.len()
    );

    Ok(report.skipped.is_empty())
}
