//! Multipart upload and ranged download.

use std::path::Path;

use coldvault_protocol::{
    ArchiveService, ByteRange, Digest, JobStatus, ServiceError, treehash,
};
use tracing::{debug, info, warn};

use crate::chunked::{ChunkReader, ChunkWriter, file_tree_hash};
use crate::types::{Direction, DownloadReceipt, TransferProgress, UploadReceipt};
use crate::validation::validate_chunk_size;
use crate::TransferError;

/// Callback receiving advisory progress.
pub type ProgressFn<'a> = &'a dyn Fn(TransferProgress);

/// Drives uploads and downloads against one archive service.
///
/// All calls are made in sequence on the calling thread.
pub struct TransferEngine<'a, S: ArchiveService + ?Sized> {
    service: &'a S,
    progress: Option<ProgressFn<'a>>,
}

impl<'a, S: ArchiveService + ?Sized> TransferEngine<'a, S> {
    pub fn new(service: &'a S) -> Self {
        Self {
            service,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: ProgressFn<'a>) -> Self {
        self.progress = Some(progress);
        self
    }

    fn report(&self, direction: Direction, done: u64, total: u64, bytes: u64, total_bytes: u64) {
        if let Some(progress) = self.progress {
            progress(TransferProgress {
                direction,
                done,
                total,
                bytes,
                total_bytes,
            });
        }
    }

    /// Uploads `path` to `vault` as a new archive described by `name`.
    ///
    /// Parts are `chunk_size` bytes. If any part or the final close fails,
    /// the session is aborted and the original error returned.
    pub fn upload(
        &self,
        name: &str,
        path: &Path,
        vault: &str,
        chunk_size: u64,
    ) -> Result<UploadReceipt, TransferError> {
        let reader = ChunkReader::open(path, chunk_size)?;
        let size = reader.file_size();
        if size == 0 {
            return Err(TransferError::Validation(format!(
                "{} is empty",
                path.display()
            )));
        }
        let parts = reader.expected_chunks();

        let upload_id = self.service.open_multipart_upload(vault, chunk_size, name)?;
        info!(name, vault, %upload_id, parts, size, "multipart upload opened");

        let result = self.send_parts(&upload_id, vault, reader).and_then(|digests| {
            let tree_hash = treehash::to_hex(&treehash::combine(&digests)?);
            let archive_id =
                self.service
                    .close_multipart_upload(&upload_id, vault, size, &tree_hash)?;
            Ok(UploadReceipt {
                archive_id,
                tree_hash,
                size,
                parts,
            })
        });

        match &result {
            Ok(receipt) => {
                info!(name, archive_id = %receipt.archive_id, size, "upload complete");
            }
            Err(e) => {
                warn!(%upload_id, error = %e, "upload failed, aborting session");
                if let Err(abort) = self.service.abort_multipart_upload(&upload_id, vault) {
                    warn!(%upload_id, error = %abort, "could not abort upload session");
                }
            }
        }
        result
    }

    fn send_parts(
        &self,
        upload_id: &str,
        vault: &str,
        reader: ChunkReader,
    ) -> Result<Vec<Digest>, TransferError> {
        let total = reader.expected_chunks();
        let total_bytes = reader.file_size();
        let mut digests = Vec::new();
        let mut bytes = 0;

        for chunk in reader {
            let chunk = chunk?;
            let Some(range) = chunk.range() else {
                continue;
            };
            self.service
                .upload_part(upload_id, vault, range, &chunk.checksum_hex(), &chunk.data)?;
            digests.push(chunk.checksum);
            bytes += chunk.len();

            let done = digests.len() as u64;
            info!(part = done, parts = total, %range, "part uploaded");
            self.report(Direction::Upload, done, total, bytes, total_bytes);
        }
        Ok(digests)
    }

    /// Downloads the output of a completed job into `target`.
    ///
    /// Ranges of `chunk_size` bytes are fetched in order and written at
    /// their offsets. The finished file is checked against the tree hash the
    /// service reports for the job, or `expected_tree_hash` when it reports
    /// none. Once `target` has been created, any failure (a range error or a
    /// failed check) deletes it.
    pub fn download(
        &self,
        job_id: &str,
        vault: &str,
        target: &Path,
        chunk_size: u64,
        expected_tree_hash: Option<&str>,
    ) -> Result<DownloadReceipt, TransferError> {
        validate_chunk_size(chunk_size)?;

        let job = self.service.describe_job(job_id, vault)?;
        if job.status != JobStatus::Succeeded {
            return Err(TransferError::Validation(format!(
                "job {job_id} has not completed"
            )));
        }

        let size = job.archive_size;
        let writer = ChunkWriter::create(target, size)?;
        let result = self
            .fetch_ranges(job_id, vault, writer, chunk_size)
            .and_then(|(bytes, ranges)| {
                let expected = job
                    .tree_hash
                    .or_else(|| expected_tree_hash.map(str::to_string));
                let verified = match expected {
                    Some(expected) => {
                        verify(target, expected)?;
                        true
                    }
                    None => false,
                };
                Ok(DownloadReceipt {
                    bytes,
                    ranges,
                    verified,
                })
            });

        match &result {
            Ok(receipt) => {
                info!(
                    job_id,
                    bytes = receipt.bytes,
                    verified = receipt.verified,
                    target = %target.display(),
                    "download complete"
                );
            }
            Err(e) => {
                warn!(job_id, error = %e, target = %target.display(), "download failed, removing partial file");
                if let Err(remove) = std::fs::remove_file(target) {
                    warn!(target = %target.display(), error = %remove, "could not remove partial file");
                }
            }
        }
        result
    }

    /// Fetches every range of the job output into `writer`.
    ///
    /// Returns the bytes written and the number of ranges.
    fn fetch_ranges(
        &self,
        job_id: &str,
        vault: &str,
        mut writer: ChunkWriter,
        chunk_size: u64,
    ) -> Result<(u64, u64), TransferError> {
        let size = writer.size();
        let ranges = ByteRange::split(size, chunk_size);
        let total = ranges.remaining();
        let mut bytes = 0;
        debug!(job_id, size, ranges = total, "download started");

        for (index, range) in ranges.enumerate() {
            let data = self.service.fetch_job_output(job_id, vault, range)?;
            if data.len() as u64 != range.len() {
                return Err(ServiceError::InvalidResponse(format!(
                    "range {range} returned {} bytes",
                    data.len()
                ))
                .into());
            }
            writer.write_at(range.start, &data)?;
            bytes += range.len();

            let done = index as u64 + 1;
            info!(range = done, ranges = total, "range downloaded");
            self.report(Direction::Download, done, total, bytes, size);
        }
        writer.finish()?;
        Ok((bytes, total))
    }
}

fn verify(target: &Path, expected: String) -> Result<(), TransferError> {
    let actual = treehash::to_hex(&file_tree_hash(target)?);
    if !actual.eq_ignore_ascii_case(&expected) {
        warn!(%expected, %actual, "downloaded data does not match tree hash");
        return Err(TransferError::ChecksumMismatch { expected, actual });
    }
    Ok(())
}
