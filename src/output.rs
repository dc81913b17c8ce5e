use std::io::{self, Write};

use serde::Serialize;

use crate::batch::BatchReport;
use crate::library::ItemManifest;
use crate::pipeline::RunOutcome;

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_run(outcome: &RunOutcome) -> io::Result<()> {
        Self::print_json(outcome)
    }

    pub fn print_batch(report: &BatchReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_names(names: &[String]) -> io::Result<()> {
        Self::print_json(&names)
    }

    pub fn print_manifest(manifest: &ItemManifest) -> io::Result<()> {
        Self::print_json(manifest)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}
