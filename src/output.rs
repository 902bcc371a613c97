use std::collections::BTreeMap;
use std::io::{self, Write};

use serde::Serialize;

use crate::app::{CatalogSummary, DownloadOutcome};

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_summary(summary: &CatalogSummary) -> io::Result<()> {
        Self::print_json(summary)
    }

    pub fn print_download(outcome: &DownloadOutcome) -> io::Result<()> {
        Self::print_json(outcome)
    }

    pub fn print_nodes(status: &BTreeMap<String, bool>) -> io::Result<()> {
        Self::print_json(status)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

pub struct TextOutput;

impl TextOutput {
    pub fn print_summary(summary: &CatalogSummary) {
        for dataset in &summary.datasets {
            println!(
                "{} ({} files, classes: {})",
                dataset.name,
                dataset.files,
                if dataset.replica_classes.is_empty() {
                    "none".to_string()
                } else {
                    dataset.replica_classes.join(", ")
                }
            );
        }
        println!();
        for count in &summary.members {
            println!(
                "{} / {}: {} members",
                count.model, count.experiment, count.members
            );
        }
        println!(
            "\n{} datasets (mirrors filtered: {})",
            summary.datasets.len(),
            summary.nodes_filtered
        );
    }

    pub fn print_download(outcome: &DownloadOutcome) {
        for (dataset, files) in &outcome.datasets {
            println!("{dataset}:");
            for file in files {
                println!("  {file}");
            }
        }
    }

    pub fn print_nodes(status: &BTreeMap<String, bool>) {
        for (node, up) in status {
            println!("{node}: {}", if *up { "up" } else { "down" });
        }
    }
}
