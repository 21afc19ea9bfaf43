//! Log-driven recovery: read the log directory and replay it.

use crate::redo::redo;
use crate::session::RecoverySession;
use arbor_common::{Lsn, RecoveryConfig, Result};
use arbor_log::{LogReader, LogRecordType};

/// Replays a log directory against its data directory.
pub struct RecoveryDriver {
    config: RecoveryConfig,
}

impl RecoveryDriver {
    pub fn new(config: RecoveryConfig) -> Self {
        Self { config }
    }

    /// Runs one full recovery pass.
    ///
    /// Every record is replayed in log order; the first failure stops the
    /// pass. On success every tree is closed and its file flushed.
    pub fn run(self) -> Result<RecoveryStats> {
        let reader = LogReader::open(&self.config.log_dir)?;
        let records = reader.read_all()?;
        tracing::info!(
            log_dir = %self.config.log_dir.display(),
            files = reader.file_count(),
            records = records.len(),
            "Starting recovery"
        );

        let mut session = RecoverySession::new(self.config)?;
        let mut stats = RecoveryStats::empty();

        for record in records {
            let lsn = record.lsn();
            match record.kind() {
                LogRecordType::Commit => stats.commits += 1,
                LogRecordType::FileOpen => stats.files_opened += 1,
                LogRecordType::NewNode => stats.nodes_created += 1,
                _ => {}
            }

            redo(&mut session, record)?;
            stats.records_replayed += 1;
            stats.last_lsn = Some(lsn);
        }

        session.cleanup()?;
        tracing::info!(
            records = stats.records_replayed,
            files = stats.files_opened,
            nodes = stats.nodes_created,
            commits = stats.commits,
            "Recovery complete"
        );
        Ok(stats)
    }
}

/// Summary of a recovery pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    pub records_replayed: usize,
    pub files_opened: usize,
    pub nodes_created: usize,
    pub commits: usize,
    /// LSN of the last record replayed.
    pub last_lsn: Option<Lsn>,
}

impl RecoveryStats {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns true if there was nothing to replay.
    pub fn is_empty(&self) -> bool {
        self.records_replayed == 0
    }
}

/// Runs recovery, aborting the process on any failure.
///
/// A failed replay leaves trees half rebuilt, and there is no caller that
/// could act on the error, so the process stops here.
pub fn recover_or_abort(config: RecoveryConfig) -> RecoveryStats {
    match RecoveryDriver::new(config).run() {
        Ok(stats) => stats,
        Err(e) => {
            tracing::error!(error = %e, "Recovery failed");
            std::process::abort();
        }
    }
}
