//! Renter file transfers: wait until the renter can upload, push a file of
//! random bytes, pull it back and check it against what was sent.
//!
//! Files are compared by size and by the node's merkle root (64-byte
//! segments hashed with BLAKE2b-256, leaves prefixed `0x00`, interior nodes
//! prefixed `0x01`).

use super::JobRunner;
use crate::error::{Error, Result};
use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use rand::RngCore;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

type Blake2b256 = Blake2b<U32>;

/// Redundancy used for every upload; a two-host farm can satisfy it.
pub const UPLOAD_DATA_PIECES: u64 = 1;
pub const UPLOAD_PARITY_PIECES: u64 = 1;

/// Directory under the ant's data dir that holds the source files.
pub const UPLOAD_DIR: &str = "upload-files";

const SEGMENT_SIZE: usize = 64;

const TRANSFER_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// A file this runner uploaded, with what is needed to verify a download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub sia_path: String,
    pub source: PathBuf,
    pub size: u64,
    pub merkle_root: [u8; 32],
}

impl JobRunner {
    /// Block until the renter reports it has enough contracts to upload.
    ///
    /// # Errors
    ///
    /// `Transfer` if it is not ready within `timeout`.
    pub async fn wait_for_renter_upload_ready(&self, timeout: Duration) -> Result<()> {
        let label = self.label();
        let (client, ant) = (&self.client, label.as_str());
        poll_until(timeout, move || async move {
            match client
                .renter_upload_ready(UPLOAD_DATA_PIECES, UPLOAD_PARITY_PIECES)
                .await
            {
                Ok(ready) => ready,
                Err(e) => {
                    debug!(%ant, "upload-ready check failed: {e}");
                    false
                }
            }
        })
        .await
        .map_err(|_| Error::Transfer(format!("{label}: renter not upload ready within {timeout:?}")))?;
        info!(ant = %label, "renter is upload ready");
        Ok(())
    }

    /// Write `size` random bytes under the data dir, upload them and wait
    /// until the renter reports the file available.
    pub async fn upload_file(&self, size: usize, timeout: Duration) -> Result<UploadedFile> {
        let sia_path = format!("antfarm-{}", Uuid::new_v4().simple());
        let dir = self.config.data_dir.join(UPLOAD_DIR);
        tokio::fs::create_dir_all(&dir).await?;
        let source = dir.join(&sia_path);

        let mut data = vec![0u8; size];
        rand::thread_rng().fill_bytes(&mut data);
        let merkle_root = merkle_root(&data);
        tokio::fs::write(&source, &data).await?;

        self.client
            .renter_upload(&sia_path, &source, UPLOAD_DATA_PIECES, UPLOAD_PARITY_PIECES)
            .await?;
        let label = self.label();
        debug!(ant = %label, %sia_path, size, "upload started");

        let (client, ant, path) = (&self.client, label.as_str(), sia_path.as_str());
        poll_until(timeout, move || async move {
            match client.renter_file(path).await {
                Ok(file) if file.available => true,
                Ok(file) => {
                    debug!(%ant, sia_path = %path, progress = file.upload_progress, "uploading");
                    false
                }
                Err(e) => {
                    debug!(%ant, sia_path = %path, "file status check failed: {e}");
                    false
                }
            }
        })
        .await
        .map_err(|_| Error::Transfer(format!("{sia_path} not available within {timeout:?}")))?;

        info!(ant = %label, %sia_path, size, merkle_root = %hex::encode(merkle_root), "file uploaded");
        Ok(UploadedFile {
            sia_path,
            source,
            size: size as u64,
            merkle_root,
        })
    }

    /// Download `file` to `destination` and check size and merkle root
    /// against the upload.
    pub async fn download_file(&self, file: &UploadedFile, destination: &Path) -> Result<()> {
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        self.client
            .renter_download(&file.sia_path, destination)
            .await?;

        let data = tokio::fs::read(destination).await?;
        if data.len() as u64 != file.size {
            return Err(Error::Transfer(format!(
                "{}: downloaded {} bytes, uploaded {}",
                file.sia_path,
                data.len(),
                file.size
            )));
        }
        let root = merkle_root(&data);
        if root != file.merkle_root {
            return Err(Error::Transfer(format!(
                "{}: downloaded merkle root {} does not match uploaded {}",
                file.sia_path,
                hex::encode(root),
                hex::encode(file.merkle_root)
            )));
        }
        info!(ant = %self.label(), sia_path = %file.sia_path, dest = %destination.display(), "file downloaded and verified");
        Ok(())
    }
}

/// Poll `check` every second until it returns `true`; `Err` on timeout.
async fn poll_until<F, Fut>(
    timeout: Duration,
    mut check: F,
) -> std::result::Result<(), tokio::time::error::Elapsed>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(timeout, async {
        while !check().await {
            tokio::time::sleep(TRANSFER_POLL_INTERVAL).await;
        }
    })
    .await
}

/// Merkle root of `data` as the node computes it. Empty input hashes to
/// all zeroes.
pub fn merkle_root(data: &[u8]) -> [u8; 32] {
    // Perfect subtrees as (height, hash), largest first.
    let mut stack: Vec<(u32, [u8; 32])> = Vec::new();
    for segment in data.chunks(SEGMENT_SIZE) {
        let mut height = 0;
        let mut hash = leaf_hash(segment);
        while let Some(&(top_height, left)) = stack.last() {
            if top_height != height {
                break;
            }
            stack.pop();
            hash = node_hash(&left, &hash);
            height += 1;
        }
        stack.push((height, hash));
    }

    let mut subtrees = stack.into_iter().rev().map(|(_, hash)| hash);
    let Some(mut root) = subtrees.next() else {
        return [0; 32];
    };
    for left in subtrees {
        root = node_hash(&left, &root);
    }
    root
}

fn leaf_hash(segment: &[u8]) -> [u8; 32] {
    let mut hasher = Blake2b256::new();
    hasher.update([0u8]);
    hasher.update(segment);
    hasher.finalize().into()
}

fn node_hash(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Blake2b256::new();
    hasher.update([1u8]);
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::MockNode;
    use crate::jobs::JobRunner;
    use crate::jobs::tests::test_config;
    use std::sync::Arc;

    fn runner_in(node: &Arc<MockNode>, dir: &Path) -> JobRunner {
        let mut config = (*test_config()).clone();
        config.data_dir = dir.to_path_buf();
        JobRunner::new(node.clone(), Arc::new(config), None)
    }

    #[test]
    fn test_merkle_root_shapes() {
        assert_eq!(merkle_root(&[]), [0; 32]);

        let one = [7u8; 10];
        assert_eq!(merkle_root(&one), leaf_hash(&one));

        // Three segments: ((s0, s1), s2), with a short final segment.
        let data: Vec<u8> = (0..150u8).collect();
        let l0 = leaf_hash(&data[..64]);
        let l1 = leaf_hash(&data[64..128]);
        let l2 = leaf_hash(&data[128..]);
        assert_eq!(merkle_root(&data), node_hash(&node_hash(&l0, &l1), &l2));

        // Four segments form a perfect tree.
        let data = vec![3u8; 256];
        let l = leaf_hash(&data[..64]);
        let pair = node_hash(&l, &l);
        assert_eq!(merkle_root(&data), node_hash(&pair, &pair));
    }

    #[test]
    fn test_merkle_root_detects_single_byte_change() {
        let mut data = vec![0u8; 4096];
        let before = merkle_root(&data);
        data[4000] = 1;
        assert_ne!(merkle_root(&data), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_ready_times_out() {
        let node = Arc::new(MockNode::new());
        let dir = tempfile::tempdir().unwrap();
        let jr = runner_in(&node, dir.path());
        let err = jr
            .wait_for_renter_upload_ready(Duration::from_secs(30))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transfer(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_ready_once_contracts_form() {
        let node = Arc::new(MockNode::new());
        let dir = tempfile::tempdir().unwrap();
        let jr = runner_in(&node, dir.path());

        let waiter = {
            let jr = jr.clone();
            tokio::spawn(async move { jr.wait_for_renter_upload_ready(Duration::from_secs(60)).await })
        };
        tokio::time::sleep(Duration::from_secs(5)).await;
        node.state.lock().upload_ready = true;
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_upload_then_download_verifies() {
        let node = Arc::new(MockNode::new());
        let dir = tempfile::tempdir().unwrap();
        let jr = runner_in(&node, dir.path());

        let file = jr.upload_file(5000, Duration::from_secs(5)).await.unwrap();
        assert_eq!(file.size, 5000);
        assert!(file.source.starts_with(dir.path().join(UPLOAD_DIR)));
        assert_eq!(std::fs::metadata(&file.source).unwrap().len(), 5000);

        let dest = dir.path().join("downloads").join("copy");
        jr.download_file(&file, &dest).await.unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), std::fs::read(&file.source).unwrap());
    }

    #[tokio::test]
    async fn test_corrupted_download_is_rejected() {
        let node = Arc::new(MockNode::new());
        let dir = tempfile::tempdir().unwrap();
        let jr = runner_in(&node, dir.path());

        let file = jr.upload_file(1000, Duration::from_secs(5)).await.unwrap();
        node.state.lock().corrupt_downloads = true;
        let err = jr
            .download_file(&file, &dir.path().join("copy"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transfer(ref msg) if msg.contains("merkle root")));
    }

    #[tokio::test]
    async fn test_truncated_download_is_rejected() {
        let node = Arc::new(MockNode::new());
        let dir = tempfile::tempdir().unwrap();
        let jr = runner_in(&node, dir.path());

        let file = jr.upload_file(1000, Duration::from_secs(5)).await.unwrap();
        node.state
            .lock()
            .files
            .get_mut(&file.sia_path)
            .unwrap()
            .truncate(10);
        let err = jr
            .download_file(&file, &dir.path().join("copy"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transfer(ref msg) if msg.contains("10 bytes")));
    }
}
