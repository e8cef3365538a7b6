//! Batched persistence of discovered records.
//!
//! The writer owns the folder and file buffers and is the only thing that
//! talks to the sink during a traversal. Records arrive over a bounded
//! channel; a full buffer is written as one batch, whatever is left over is
//! written once the channel closes.

use super::node::Discovered;
use super::observer::TraversalObserver;
use rove_store::{Batch, FileRecord, FolderRecord, PersistenceSink};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WriterReport {
    pub(crate) folders: u64,
    pub(crate) files: u64,
    pub(crate) failed_batches: u64,
    pub(crate) failed_records: u64,
    /// Persistence was given up on; the traversal must abort.
    pub(crate) unavailable: bool,
}

pub(crate) struct BatchWriter<'a> {
    sink: &'a dyn PersistenceSink,
    observer: &'a dyn TraversalObserver,
    batch_size: usize,
    max_consecutive_failures: u32,
    folders: Vec<FolderRecord>,
    files: Vec<FileRecord>,
    consecutive_failures: u32,
    report: WriterReport,
}

impl<'a> BatchWriter<'a> {
    pub(crate) fn new(
        sink: &'a dyn PersistenceSink,
        observer: &'a dyn TraversalObserver,
        batch_size: usize,
        max_consecutive_failures: u32,
    ) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            sink,
            observer,
            batch_size,
            max_consecutive_failures: max_consecutive_failures.max(1),
            folders: Vec::with_capacity(batch_size),
            files: Vec::with_capacity(batch_size),
            consecutive_failures: 0,
            report: WriterReport::default(),
        }
    }

    /// Consume records until the channel closes, or until persistence is
    /// deemed unavailable, in which case `abort` is cancelled and the channel
    /// closed so senders stop.
    pub(crate) async fn run(mut self, mut records: mpsc::Receiver<Discovered>, abort: &CancellationToken) -> WriterReport {
        while let Some(record) = records.recv().await {
            match record {
                Discovered::Folder(record) => {
                    self.folders.push(record);
                    if self.folders.len() >= self.batch_size {
                        let batch = Batch::Folders(std::mem::take(&mut self.folders));
                        self.write(batch).await;
                    }
                },
                Discovered::File(record) => {
                    self.files.push(record);
                    if self.files.len() >= self.batch_size {
                        let batch = Batch::Files(std::mem::take(&mut self.files));
                        self.write(batch).await;
                    }
                },
            }
            if self.report.unavailable {
                records.close();
                abort.cancel();
                return self.report;
            }
        }

        if !self.folders.is_empty() {
            let batch = Batch::Folders(std::mem::take(&mut self.folders));
            self.write(batch).await;
        }
        if !self.files.is_empty() && !self.report.unavailable {
            let batch = Batch::Files(std::mem::take(&mut self.files));
            self.write(batch).await;
        }
        if self.report.unavailable {
            abort.cancel();
        }
        self.report
    }

    /// Write one batch, falling back to one record at a time if the batch
    /// as a whole is rejected.
    async fn write(&mut self, batch: Batch) {
        let kind = batch.kind();
        let size = batch.len();
        let saved = match self.sink.upsert_batch(&batch).await {
            Ok(_) => size as u64,
            Err(e) => {
                self.report.failed_batches += 1;
                tracing::warn!(%kind, size, error = ?e, "batch persistence failed, retrying records individually");
                let mut saved = 0;
                for single in batch.into_singles() {
                    match self.sink.upsert_batch(&single).await {
                        Ok(_) => saved += 1,
                        Err(e) => {
                            self.report.failed_records += 1;
                            let id = single.ids().first().map(|id| id.to_string()).unwrap_or_default();
                            tracing::error!(%kind, %id, error = ?e, "record could not be persisted");
                        },
                    }
                }
                saved
            },
        };

        if saved == 0 {
            self.consecutive_failures += 1;
            if self.consecutive_failures >= self.max_consecutive_failures {
                tracing::error!(failures = self.consecutive_failures, "persistence unavailable, aborting traversal");
                self.report.unavailable = true;
            }
            return;
        }
        self.consecutive_failures = 0;
        let (folders, files) = match kind {
            rove_store::RecordKind::Folder => (saved, 0),
            rove_store::RecordKind::File => (0, saved),
        };
        self.report.folders += folders;
        self.report.files += files;
        self.observer.on_batch_persisted(folders, files).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traversal::observer::NoopObserver;
    use rove_store::{MockSink, RecordKind};
    use time::OffsetDateTime;

    fn folder(id: usize) -> Discovered {
        Discovered::Folder(FolderRecord {
            id: format!("d{id}"),
            site_id: "s".to_string(),
            library_id: "l".to_string(),
            parent_id: None,
            name: format!("d{id}"),
            path: format!("/d{id}"),
            depth: 1,
            has_unique_permissions: false,
            created_at: None,
            modified_at: None,
            discovered_at: OffsetDateTime::UNIX_EPOCH,
        })
    }

    fn file(id: usize) -> Discovered {
        Discovered::File(FileRecord {
            id: format!("f{id}"),
            site_id: "s".to_string(),
            library_id: "l".to_string(),
            folder_id: None,
            name: format!("f{id}"),
            path: format!("/f{id}"),
            size: 1,
            content_type: None,
            has_unique_permissions: false,
            created_at: None,
            modified_at: None,
            discovered_at: OffsetDateTime::UNIX_EPOCH,
        })
    }

    async fn write_all(sink: &MockSink, batch_size: usize, records: Vec<Discovered>) -> WriterReport {
        let (tx, rx) = mpsc::channel(records.len().max(1));
        for record in records {
            tx.send(record).await.unwrap();
        }
        drop(tx);
        let abort = CancellationToken::new();
        BatchWriter::new(sink, &NoopObserver, batch_size, 3).run(rx, &abort).await
    }

    #[tokio::test]
    async fn test_full_batches_then_remainder() {
        let sink = MockSink::default();
        let report = write_all(&sink, 100, (0..250).map(folder).collect()).await;
        assert_eq!(
            sink.upsert_calls().await,
            [(RecordKind::Folder, 100), (RecordKind::Folder, 100), (RecordKind::Folder, 50)]
        );
        assert_eq!(report.folders, 250);
    }

    #[tokio::test]
    async fn test_kinds_are_batched_separately() {
        let sink = MockSink::default();
        let records = vec![folder(1), file(1), folder(2), file(2), file(3)];
        let report = write_all(&sink, 2, records).await;
        assert_eq!(
            sink.upsert_calls().await,
            [(RecordKind::Folder, 2), (RecordKind::File, 2), (RecordKind::File, 1)]
        );
        assert_eq!((report.folders, report.files), (2, 3));
    }

    #[tokio::test]
    async fn test_bad_record_is_isolated() {
        let sink = MockSink::default();
        sink.fail_on_ids(["f2"]).await;
        let report = write_all(&sink, 10, (0..5).map(file).collect()).await;
        assert_eq!(report.failed_batches, 1);
        assert_eq!(report.failed_records, 1);
        assert_eq!(report.files, 4);
        assert_eq!(sink.file_count().await, 4);
        assert!(!report.unavailable);
    }

    #[tokio::test]
    async fn test_gives_up_after_consecutive_empty_batches() {
        let sink = MockSink::default();
        sink.set_fail_records(true);
        let (tx, rx) = mpsc::channel(1000);
        let abort = CancellationToken::new();
        let producer = async {
            for i in 0..1000 {
                if tx.send(folder(i)).await.is_err() {
                    break;
                }
            }
            drop(tx);
        };
        let (_, report) = tokio::join!(producer, BatchWriter::new(&sink, &NoopObserver, 10, 3).run(rx, &abort));
        assert!(report.unavailable);
        assert!(abort.is_cancelled());
        assert_eq!(report.failed_batches, 3);
        assert_eq!(report.folders, 0);
    }
}
