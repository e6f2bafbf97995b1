//! Compilation worker
//!
//! Runs one compilation job at a time on its own thread. The thread only
//! compiles; the finished job travels back through the thread's join handle
//! and is picked up by the owning thread, which does all loading.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::toolchain::Toolchain;
use super::{io_error, ReloadError, ReloadResult};

/// Name of the compiler thread
pub const WORKER_THREAD_NAME: &str = "hot-reload-compiler";

/// One build of the main file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilationJob {
    /// Build number, unique per reloader
    pub id: u64,

    /// Main source file
    pub source: PathBuf,

    /// Library the build writes
    pub output: PathBuf,
}

/// Outcome of a job, produced once by the compiler thread
#[derive(Debug)]
pub struct CompletedJob {
    pub job: CompilationJob,
    pub result: ReloadResult<()>,
    pub elapsed: Duration,
}

impl CompletedJob {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

struct InFlight {
    job: CompilationJob,
    handle: JoinHandle<CompletedJob>,
}

/// Background compiler with at most one job in flight
pub struct CompilationWorker {
    toolchain: Arc<dyn Toolchain>,
    in_flight: Option<InFlight>,

    /// Job given up on whose thread may still be compiling. It counts
    /// against the single-flight limit until it is reaped.
    detached: Option<InFlight>,
}

impl CompilationWorker {
    pub fn new(toolchain: Arc<dyn Toolchain>) -> Self {
        Self {
            toolchain,
            in_flight: None,
            detached: None,
        }
    }

    /// Whether a compiler thread is running or waiting to be collected,
    /// including a detached one
    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some() || self.detached.is_some()
    }

    /// Job currently running, if any
    pub fn current_job(&self) -> Option<&CompilationJob> {
        self.in_flight.as_ref().map(|f| &f.job)
    }

    /// Start a job on a fresh compiler thread
    pub fn spawn(&mut self, job: CompilationJob) -> ReloadResult<()> {
        if self.is_busy() {
            return Err(ReloadError::JobInFlight);
        }

        let toolchain = self.toolchain.clone();
        let thread_job = job.clone();
        let handle = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || {
                let start = Instant::now();
                let result = toolchain.compile(&thread_job.source, &thread_job.output);
                CompletedJob {
                    job: thread_job,
                    result,
                    elapsed: start.elapsed(),
                }
            })
            .map_err(|e| io_error(&job.source, e))?;

        log::debug!("Started compilation job {} for {}", job.id, job.source.display());
        self.in_flight = Some(InFlight { job, handle });
        Ok(())
    }

    /// Collect the finished job without blocking
    pub fn try_complete(&mut self) -> Option<CompletedJob> {
        let finished = self.in_flight.as_ref()?.handle.is_finished();
        if finished {
            self.in_flight.take().map(collect)
        } else {
            None
        }
    }

    /// Block until the running job finishes
    pub fn wait(&mut self) -> Option<CompletedJob> {
        self.in_flight.take().map(collect)
    }

    /// Give up on the running job. Its thread keeps running to completion and
    /// its result is never loaded; `reap_detached` returns it once finished.
    pub fn detach(&mut self) -> Option<CompilationJob> {
        let in_flight = self.in_flight.take()?;
        let job = in_flight.job.clone();
        self.detached = Some(in_flight);
        Some(job)
    }

    /// Release the detached job once its thread has finished, without blocking
    pub fn reap_detached(&mut self) -> Option<CompilationJob> {
        let finished = self.detached.as_ref()?.handle.is_finished();
        if finished {
            self.detached.take().map(|f| collect(f).job)
        } else {
            None
        }
    }

    /// Block until the detached job's thread has finished
    pub fn wait_detached(&mut self) -> Option<CompilationJob> {
        self.detached.take().map(|f| collect(f).job)
    }
}

fn collect(in_flight: InFlight) -> CompletedJob {
    let InFlight { job, handle } = in_flight;
    handle.join().unwrap_or_else(|_| {
        log::error!("Compiler thread panicked while building {}", job.source.display());
        CompletedJob {
            result: Err(ReloadError::WorkerPanicked {
                file: job.source.clone(),
            }),
            job,
            elapsed: Duration::ZERO,
        }
    })
}

impl Drop for CompilationWorker {
    fn drop(&mut self) {
        for unfinished in [self.in_flight.take(), self.detached.take()].into_iter().flatten() {
            log::warn!(
                "Abandoning unfinished compilation job {} for {}",
                unfinished.job.id,
                unfinished.job.source.display()
            );
        }
    }
}
