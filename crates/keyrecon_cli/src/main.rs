//! CLI smoke entry point.
//!
//! # Responsibility
//! - Print the core version to verify `keyrecon_core` linkage.
//! - Optionally run one linked upsert against an on-disk database:
//!   `keyrecon_cli <db_path> <parent_kind> <last_name>...`
//!
//! Each argument is its own contact keyed by `contact_ref` (`<position>:<last_name>`),
//! so repeated last names share a parent but not a contact. Re-running the
//! same arguments updates those contacts in place.
//!
//! Set `KEYRECON_LOG_DIR` to an absolute directory to enable file logs.

use keyrecon_core::db::open_db;
use keyrecon_core::{
    default_log_level, init_logging, CancellationToken, DomainRecord, KindConfig, LinkSpec,
    RecordOutcome, ReconcileService, SqliteRecordStore,
};
use log::info;
use std::error::Error;
use std::process::ExitCode;

const LOG_DIR_ENV: &str = "KEYRECON_LOG_DIR";

fn main() -> ExitCode {
    println!("keyrecon_core version={}", keyrecon_core::core_version());

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        return ExitCode::SUCCESS;
    }
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &[String]) -> Result<(), Box<dyn Error>> {
    let [db_path, parent_kind, last_names @ ..] = args else {
        return Err("usage: keyrecon_cli <db_path> <parent_kind> <last_name>...".into());
    };
    if let Ok(log_dir) = std::env::var(LOG_DIR_ENV) {
        init_logging(default_log_level(), log_dir)?;
    }

    let conn = open_db(db_path)?;
    let store = SqliteRecordStore::try_new(&conn)?;
    let service = ReconcileService::new(&store);

    let child = KindConfig::new("contact", "contact_ref");
    let link = LinkSpec::new(
        KindConfig::new(parent_kind.as_str(), "name"),
        "last_name",
        format!("{parent_kind}_id"),
    );
    let children = contact_batch(last_names);

    let report = service.upsert_with_parents(&child, &link, children, &CancellationToken::new())?;
    info!(
        "event=cli_upsert module=cli status=ok children={} parents_created={} parents_reused={}",
        report.children.records.len(),
        report.parents.created.len(),
        report.parents.reused.len()
    );

    for record in &report.children.records {
        let key = record.key.as_deref().unwrap_or("-");
        match &record.outcome {
            RecordOutcome::Created(id) => println!("{} {key} created {id}", record.position),
            RecordOutcome::Updated(id) => println!("{} {key} updated {id}", record.position),
            RecordOutcome::Deleted(id) => println!("{} {key} deleted {id}", record.position),
            RecordOutcome::Failed(err) => println!("{} {key} failed {err}", record.position),
        }
    }
    println!(
        "{parent_kind}: created={} reused={} rejected={}",
        report.parents.created.len(),
        report.parents.reused.len(),
        report.parents.rejected.len()
    );
    Ok(())
}

fn contact_batch(last_names: &[String]) -> Vec<DomainRecord> {
    last_names
        .iter()
        .enumerate()
        .map(|(position, last_name)| {
            DomainRecord::new("contact")
                .attr("contact_ref", format!("{position}:{last_name}"))
                .attr("last_name", last_name.as_str())
        })
        .collect()
}
