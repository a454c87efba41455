//! Dedicated thread for key-derivation heavy encryption.
//!
//! Jobs arrive over a channel and each answers on its own oneshot with a
//! `Result`, so callers on the async runtime never run Argon2 themselves.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;

use courier_core::types::Password;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::encryption;
use crate::error::WalletError;

type Reply = oneshot::Sender<Result<Zeroizing<Vec<u8>>, WalletError>>;

enum CryptoJob {
    Encrypt {
        plaintext: Zeroizing<Vec<u8>>,
        secret: Password,
    },
    Decrypt {
        ciphertext: Vec<u8>,
        secret: Password,
    },
}

impl CryptoJob {
    fn run(self) -> Result<Zeroizing<Vec<u8>>, WalletError> {
        match self {
            Self::Encrypt { plaintext, secret } => {
                encryption::encrypt(&plaintext, secret.expose().as_bytes()).map(Zeroizing::new)
            }
            Self::Decrypt { ciphertext, secret } => {
                encryption::decrypt(&ciphertext, secret.expose().as_bytes())
            }
        }
    }
}

/// Handle to the crypto thread. Dropping it stops the thread after the
/// in-flight job.
pub struct CryptoWorker {
    jobs: Option<mpsc::UnboundedSender<(CryptoJob, Reply)>>,
    thread: Option<JoinHandle<()>>,
    completed: Arc<AtomicU64>,
}

impl CryptoWorker {
    pub fn spawn() -> Result<Self, WalletError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<(CryptoJob, Reply)>();
        let completed = Arc::new(AtomicU64::new(0));
        let counter = completed.clone();

        let thread = std::thread::Builder::new()
            .name("courier-crypto".into())
            .spawn(move || {
                while let Some((job, reply)) = rx.blocking_recv() {
                    let result = job.run();
                    counter.fetch_add(1, Ordering::Relaxed);
                    if reply.send(result).is_err() {
                        debug!("crypto job caller went away");
                    }
                }
                debug!("crypto worker stopped");
            })
            .map_err(|e| WalletError::Encryption(format!("spawn crypto worker: {e}")))?;

        Ok(Self {
            jobs: Some(tx),
            thread: Some(thread),
            completed,
        })
    }

    /// Number of jobs the thread has finished.
    pub fn completed_jobs(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub async fn encrypt(&self, plaintext: Zeroizing<Vec<u8>>, secret: Password) -> Result<Vec<u8>, WalletError> {
        let out = self.submit(CryptoJob::Encrypt { plaintext, secret }).await?;
        Ok(out.to_vec())
    }

    pub async fn decrypt(&self, ciphertext: Vec<u8>, secret: Password) -> Result<Zeroizing<Vec<u8>>, WalletError> {
        self.submit(CryptoJob::Decrypt { ciphertext, secret }).await
    }

    async fn submit(&self, job: CryptoJob) -> Result<Zeroizing<Vec<u8>>, WalletError> {
        let jobs = self.jobs.as_ref().ok_or(WalletError::WorkerUnavailable)?;
        let (reply, answer) = oneshot::channel();
        jobs.send((job, reply)).map_err(|_| WalletError::WorkerUnavailable)?;
        answer.await.map_err(|_| WalletError::WorkerUnavailable)?
    }
}

impl Drop for CryptoWorker {
    fn drop(&mut self) {
        self.jobs.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("crypto worker panicked");
            }
        }
    }
}
