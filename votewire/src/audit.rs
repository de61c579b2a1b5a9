use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;
use log::error;

/// Append-only journal of pipeline events.
///
/// One pipe-delimited record per line, written to `<prefix>_YYYYMMDD.log`
/// under the configured directory. The file handle is acquired per write;
/// durability is OS-flush, not fsync. A journal write that fails is logged
/// and dropped rather than failing the pipeline.
pub struct AuditJournal {
    directory: PathBuf,
    prefix: String,
}

/// The defined record kinds and their fields. Outcomes are written as
/// `EXITOSO`/`FALLIDO`; voter documents are masked before they reach
/// the record.
#[derive(Debug, Clone)]
pub enum AuditRecord {
    Reception {
        ballot_id: String,
        station_id: String,
        success: bool,
    },
    Verification {
        ballot_id: String,
        station_id: String,
        success: bool,
    },
    Tally {
        ballot_id: String,
        station_id: String,
        candidate_id: String,
    },
    Duplicate {
        ballot_id: String,
        station_id: String,
    },
    Transmission {
        ballot_id: String,
        station_id: String,
        success: bool,
    },
    VoteAttempt {
        station_id: String,
        document: String,
        success: bool,
    },
    FraudAttempt {
        station_id: String,
        document: String,
        reason: String,
    },
}

impl AuditRecord {
    fn to_line(&self) -> String {
        match self {
            AuditRecord::Reception {
                ballot_id,
                station_id,
                success,
            } => format!("RECEPCION|{}|{}|{}", ballot_id, station_id, outcome(*success)),
            AuditRecord::Verification {
                ballot_id,
                station_id,
                success,
            } => format!("VERIFICACION|{}|{}|{}", ballot_id, station_id, outcome(*success)),
            AuditRecord::Tally {
                ballot_id,
                station_id,
                candidate_id,
            } => format!("CONTABILIZACION|{}|{}|{}", ballot_id, station_id, candidate_id),
            AuditRecord::Duplicate {
                ballot_id,
                station_id,
            } => format!("DUPLICADO|{}|{}", ballot_id, station_id),
            AuditRecord::Transmission {
                ballot_id,
                station_id,
                success,
            } => format!("TRANSMISION|{}|{}|{}", ballot_id, station_id, outcome(*success)),
            AuditRecord::VoteAttempt {
                station_id,
                document,
                success,
            } => format!(
                "INTENTO_VOTO|{}|{}|{}",
                station_id,
                mask_document(document),
                outcome(*success)
            ),
            AuditRecord::FraudAttempt {
                station_id,
                document,
                reason,
            } => format!(
                "INTENTO_FRAUDE|{}|{}|{}",
                station_id,
                mask_document(document),
                reason
            ),
        }
    }
}

fn outcome(success: bool) -> &'static str {
    if success {
        "EXITOSO"
    } else {
        "FALLIDO"
    }
}

/// `XXXX` plus the last up-to-four characters of the document string;
/// the full document never enters the journal.
pub fn mask_document(document: &str) -> String {
    let tail_start = document.len().saturating_sub(4);
    // keep to a char boundary for non-ASCII documents
    let tail_start = (tail_start..=document.len())
        .find(|i| document.is_char_boundary(*i))
        .unwrap_or(document.len());
    format!("XXXX{}", &document[tail_start..])
}

impl AuditJournal {
    pub fn new<P: AsRef<Path>>(directory: P, prefix: &str) -> Self {
        AuditJournal {
            directory: directory.as_ref().to_owned(),
            prefix: prefix.to_owned(),
        }
    }

    pub fn record(&self, record: &AuditRecord) {
        if let Err(e) = self.append_line(&record.to_line()) {
            error!("audit journal write failed: {}", e);
        }
    }

    pub fn current_file(&self) -> PathBuf {
        self.directory.join(format!(
            "{}_{}.log",
            self.prefix,
            Local::now().format("%Y%m%d")
        ))
    }

    fn append_line(&self, line: &str) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.directory)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.current_file())?;
        writeln!(file, "{}", line)?;
        file.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masking_keeps_last_four_characters() {
        assert_eq!(mask_document("12345678"), "XXXX5678");
        assert_eq!(mask_document("987"), "XXXX987");
        assert_eq!(mask_document(""), "XXXX");
    }

    #[test]
    fn record_lines_match_schema() {
        let record = AuditRecord::Duplicate {
            ballot_id: "b-1".into(),
            station_id: "M01".into(),
        };
        assert_eq!(record.to_line(), "DUPLICADO|b-1|M01");

        let record = AuditRecord::Verification {
            ballot_id: "b-1".into(),
            station_id: "M01".into(),
            success: false,
        };
        assert_eq!(record.to_line(), "VERIFICACION|b-1|M01|FALLIDO");

        let record = AuditRecord::VoteAttempt {
            station_id: "M01".into(),
            document: "12345678".into(),
            success: true,
        };
        assert_eq!(record.to_line(), "INTENTO_VOTO|M01|XXXX5678|EXITOSO");
    }

    #[test]
    fn records_append_to_day_stamped_file() {
        let dir = tempfile::tempdir().unwrap();
        let journal = AuditJournal::new(dir.path(), "servidor");

        journal.record(&AuditRecord::Reception {
            ballot_id: "b-1".into(),
            station_id: "M01".into(),
            success: true,
        });
        journal.record(&AuditRecord::Reception {
            ballot_id: "b-2".into(),
            station_id: "M01".into(),
            success: false,
        });

        let file = journal.current_file();
        assert!(file
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("servidor_"));
        let contents = std::fs::read_to_string(file).unwrap();
        assert_eq!(
            contents,
            "RECEPCION|b-1|M01|EXITOSO\nRECEPCION|b-2|M01|FALLIDO\n"
        );
    }
}
