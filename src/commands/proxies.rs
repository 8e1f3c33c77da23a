use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::Path;

use stickyscrape::config::Config;
use stickyscrape::error::Error;
use stickyscrape::models::ProxyEndpoint;
use stickyscrape::proxy::harvest::Harvester;
use stickyscrape::proxy::store::{self, ProxyRecord};
use stickyscrape::proxy::validate::{working_records, ProbeResult, Validator};
use stickyscrape::storage::guard::write_atomic;

/// Harvest public lists, validate the candidates, write the working ones
pub async fn harvest(config: Config, skip_validation: bool, output: Option<&Path>) -> Result<()> {
    let output = output.unwrap_or(config.pool.proxies_file.as_path());

    println!("Harvesting proxies");
    println!("==================");

    let harvester = Harvester::new(config.harvest.clone()).map_err(Error::from)?;
    let candidates = harvester.harvest().await;
    println!("Candidates: {}", candidates.len());

    let records = if skip_validation {
        candidates.iter().map(ProxyRecord::from).collect()
    } else {
        let results = Validator::new(config.harvest.clone())
            .validate_all(candidates)
            .await;
        print_breakdown(&results);
        working_records(&results)
    };

    write_list(output, &records)?;
    println!("Saved {} proxies to {}", records.len(), output.display());
    Ok(())
}

/// Re-validate an existing list in place (or into `output`)
pub async fn validate(config: Config, input: Option<&Path>, output: Option<&Path>) -> Result<()> {
    let input = input.unwrap_or(config.pool.proxies_file.as_path());
    let output = output.unwrap_or(input);

    let candidates: Vec<ProxyEndpoint> = store::load_endpoints(input)
        .with_context(|| format!("Failed to load {}", input.display()))?;
    println!("Re-validating {} proxies from {}", candidates.len(), input.display());

    let results = Validator::new(config.harvest.clone())
        .validate_all(candidates)
        .await;
    print_breakdown(&results);

    let records = working_records(&results);
    write_list(output, &records)?;
    println!("Saved {} working proxies to {}", records.len(), output.display());
    Ok(())
}

fn write_list(path: &Path, records: &[ProxyRecord]) -> Result<()> {
    let json = store::to_json(records)?;
    write_atomic(path, json.as_bytes())
        .with_context(|| format!("Failed to write {}", path.display()))
}

fn print_breakdown(results: &[ProbeResult]) {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for result in results {
        *counts.entry(result.status.to_string()).or_insert(0) += 1;
    }

    println!("\nStatus breakdown:");
    for (status, count) in &counts {
        println!("  {status:<20} {count}");
    }

    let fastest: Vec<&ProbeResult> = {
        let mut working: Vec<&ProbeResult> = results.iter().filter(|r| r.is_working()).collect();
        working.sort_by(|a, b| {
            a.target_secs
                .unwrap_or(f64::MAX)
                .total_cmp(&b.target_secs.unwrap_or(f64::MAX))
        });
        working.into_iter().take(5).collect()
    };
    if !fastest.is_empty() {
        println!("\nFastest:");
        for result in fastest {
            println!(
                "  {:<40} {:.2}s",
                result.endpoint.redacted(),
                result.target_secs.unwrap_or_default()
            );
        }
    }
}
