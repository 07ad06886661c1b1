use crate::error::{Result, WriteError};
use bytes::{Buf, Bytes};
use std::fmt;
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::sync::oneshot;
use tracing::debug;

/// Single-use byte stream appended to a file
pub struct Body(Box<dyn Read + Send>);

impl Body {
    pub fn from_reader(reader: impl Read + Send + 'static) -> Self {
        Self(Box::new(reader))
    }
}

impl Read for Body {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Body(..)")
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Self::from_reader(bytes.reader())
    }
}

impl From<Vec<u8>> for Body {
    fn from(data: Vec<u8>) -> Self {
        Bytes::from(data).into()
    }
}

impl From<String> for Body {
    fn from(data: String) -> Self {
        Bytes::from(data).into()
    }
}

impl From<&'static str> for Body {
    fn from(data: &'static str) -> Self {
        Bytes::from_static(data.as_bytes()).into()
    }
}

impl From<&'static [u8]> for Body {
    fn from(data: &'static [u8]) -> Self {
        Bytes::from_static(data).into()
    }
}

const PENDING: u8 = 0;
const CLAIMED: u8 = 1;
const WITHDRAWN: u8 = 2;

/// Decides, exactly once, whether a job is written or withdrawn by its submitter
///
/// A writer claims the job right before copying its body. A submitter whose
/// deadline passes withdraws it. Whichever side gets there first wins, so a
/// withdrawn job never reaches the file and a claimed job is always reported.
#[derive(Debug, Clone, Default)]
pub(crate) struct Claim(Arc<AtomicU8>);

impl Claim {
    fn settle(&self, outcome: u8) -> bool {
        self.0
            .compare_exchange(PENDING, outcome, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Submitter side; false once a writer has started on the job
    pub(crate) fn withdraw(&self) -> bool {
        self.settle(WITHDRAWN)
    }

    fn is_withdrawn(&self) -> bool {
        self.0.load(Ordering::Acquire) == WITHDRAWN
    }
}

/// A queued append request travelling from the intake to a writer
#[derive(Debug)]
pub(crate) struct WriteJob {
    pub(crate) id: u64,
    pub(crate) path: PathBuf,
    pub(crate) body: Option<Body>,
    pub(crate) retries: u32,
    /// Set while the job sits in the intake after a requeue
    pub(crate) parked: bool,
    claim: Claim,
    respond_to: oneshot::Sender<Result<()>>,
}

impl WriteJob {
    pub(crate) fn new(
        id: u64,
        path: PathBuf,
        body: Option<Body>,
    ) -> (Self, oneshot::Receiver<Result<()>>) {
        let (respond_to, response) = oneshot::channel();
        let job = Self {
            id,
            path,
            body,
            retries: 0,
            parked: false,
            claim: Claim::default(),
            respond_to,
        };
        (job, response)
    }

    pub(crate) fn claim(&self) -> Claim {
        self.claim.clone()
    }

    /// Nobody is waiting for this job any more
    pub(crate) fn is_abandoned(&self) -> bool {
        self.claim.is_withdrawn() || self.respond_to.is_closed()
    }

    /// Writer side; false if the submitter already gave up on the job
    pub(crate) fn try_claim(&self) -> bool {
        !self.respond_to.is_closed() && self.claim.settle(CLAIMED)
    }

    /// Complete the job; consuming `self` makes a second resolution impossible
    pub(crate) fn resolve(self, result: Result<()>) {
        if self.respond_to.send(result).is_err() {
            debug!(id = self.id, path = %self.path.display(), "Submitter gone before job resolved");
        }
    }

    pub(crate) fn fail(self, error: WriteError) {
        self.resolve(Err(error))
    }
}
