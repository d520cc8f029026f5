use std::io;

use anyhow::{Result, bail};
use tracing::{debug, info, warn};

use crate::cli::ScoreArgs;
use crate::config::Config;
use crate::model::{Demographics, RECORD_ID_FIELD};
use crate::redcap::{ExportRequest, RedcapClient};
use crate::scoring::{self, Instrument, RscriptDelegate, ScoreOutcome};
use crate::util::write_json_lines;

pub fn run(args: ScoreArgs, config: &Config) -> Result<()> {
    let client = RedcapClient::from_args(&args.redcap, config)?;
    let delegate = RscriptDelegate::from_config(&config.scoring);
    let instruments = select_instruments(scoring::all_instruments()?, &args.instruments)?;

    let mut demographic_fields = vec![RECORD_ID_FIELD];
    demographic_fields.extend(Demographics::FIELDS);
    let demographics =
        Demographics::from_records(&client.export_records(&ExportRequest::fields(&demographic_fields))?);
    debug!(subjects = demographics.len(), "loaded demographics");

    let mut total_failures = 0;
    for instrument in &instruments {
        let mut fields = vec![RECORD_ID_FIELD.to_string()];
        fields.extend(instrument.requested_fields());
        let request = ExportRequest::fields(&fields).with_events(&args.events);
        let records = client.export_records(&request)?;

        info!(
            instrument = instrument.name(),
            records = records.len(),
            "scoring instrument"
        );

        let outcome = instrument.compute_scores(&records, &demographics, &delegate);
        for failure in outcome.failures() {
            warn!(
                instrument = instrument.name(),
                failure = %failure,
                "record could not be scored"
            );
        }
        total_failures += outcome.failures().len();

        match outcome {
            ScoreOutcome::NoData => {
                info!(instrument = instrument.name(), "no eligible records");
            }
            ScoreOutcome::Scored { table, failures } => {
                let rows = table.to_records();
                if args.dry_run {
                    write_json_lines(&mut io::stdout().lock(), &rows)?;
                    continue;
                }

                let imported = client.import_records(&rows)?;
                info!(
                    instrument = instrument.name(),
                    form = instrument.output_form(),
                    imported,
                    failed = failures.len(),
                    "imported scores"
                );
            }
        }
    }

    if total_failures > 0 {
        bail!("{total_failures} record(s) could not be scored");
    }
    Ok(())
}

fn select_instruments(
    instruments: Vec<Box<dyn Instrument>>,
    requested: &[String],
) -> Result<Vec<Box<dyn Instrument>>> {
    if requested.is_empty() {
        return Ok(instruments);
    }

    for name in requested {
        if !instruments.iter().any(|instrument| instrument.name() == name) {
            bail!("unknown instrument: {name}");
        }
    }

    Ok(instruments
        .into_iter()
        .filter(|instrument| requested.iter().any(|name| name == instrument.name()))
        .collect())
}
