//! Backend that drives an external worker program.
//!
//! The worker owns the model weights and the audio tokenizer. It is asked
//! once per strategy whether it can run (`probe`) and then fed JSONL jobs
//! (`generate`), answering one JSON line per item on stdout.

use std::collections::HashMap;
use std::fs;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use duet_domain::{ComputeDevice, DuetError, DuetResult, ExecutionStrategy, RawAudio};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tracing::{debug, info, warn};

use super::{BackendFactory, ModelRefs, GenerationParams, GenerationRequest, SpeechBackend};
use crate::audio::{read_wav, write_wav};
use crate::config::WorkerConfig;
use crate::setup::scratch_root;

const POLL_INTERVAL: Duration = Duration::from_millis(20);
const PIPE_DRAIN: Duration = Duration::from_secs(5);
const STDERR_TAIL: usize = 2_000;

/// Builds [`CommandBackend`]s from the `backend.worker` config section.
#[derive(Debug, Clone)]
pub struct CommandFactory {
    worker: WorkerConfig,
}

impl CommandFactory {
    pub fn new(worker: WorkerConfig) -> Self {
        Self { worker }
    }
}

impl BackendFactory for CommandFactory {
    fn initialize(
        &self,
        spec: &ModelRefs,
        strategy: ExecutionStrategy,
        device: ComputeDevice,
    ) -> DuetResult<Arc<dyn SpeechBackend>> {
        let flags = model_flags(spec, strategy, device);
        let timeout = self.worker.timeout_secs.map(Duration::from_secs);

        let mut probe_args = self.worker.args.clone();
        probe_args.push("probe".to_string());
        probe_args.extend(flags.iter().cloned());
        let probe = run_worker(&self.worker.program, &probe_args, timeout)?;
        if !probe.status.success() {
            return Err(DuetError::Unsupported(format!(
                "worker rejected {strategy} on {device} ({}): {}",
                probe.status,
                tail(&probe.stderr)
            )));
        }

        let root = scratch_root(self.worker.scratch_dir.as_deref());
        fs::create_dir_all(&root).map_err(|e| {
            DuetError::Configuration(format!("create scratch root {}: {e}", root.display()))
        })?;
        let scratch = tempfile::Builder::new()
            .prefix("duet-")
            .tempdir_in(&root)
            .map_err(|e| {
                DuetError::Configuration(format!("create scratch dir in {}: {e}", root.display()))
            })?;
        info!(program = %self.worker.program, %strategy, scratch = %scratch.path().display(), "worker accepted strategy");

        Ok(Arc::new(CommandBackend {
            program: self.worker.program.clone(),
            prefix_args: self.worker.args.clone(),
            flags,
            timeout,
            scratch: Mutex::new(Some(scratch)),
            jobs: AtomicUsize::new(0),
        }))
    }
}

/// A worker program bound to one strategy, device and precision.
pub struct CommandBackend {
    program: String,
    prefix_args: Vec<String>,
    flags: Vec<String>,
    timeout: Option<Duration>,
    scratch: Mutex<Option<TempDir>>,
    jobs: AtomicUsize,
}

impl CommandBackend {
    /// Scratch directory, or `None` once released.
    pub fn scratch_dir(&self) -> Option<PathBuf> {
        self.scratch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|dir| dir.path().to_path_buf())
    }

    fn run_job(
        &self,
        requests: &[GenerationRequest],
        params: &GenerationParams,
    ) -> DuetResult<Vec<DuetResult<RawAudio>>> {
        let scratch = self
            .scratch_dir()
            .ok_or_else(|| DuetError::Generation("backend already released".to_string()))?;
        let job_no = self.jobs.fetch_add(1, Ordering::Relaxed);
        let job_dir = scratch.join(format!("job-{job_no}"));
        let out_dir = job_dir.join("out");
        fs::create_dir_all(&out_dir)
            .map_err(|e| DuetError::Generation(format!("create {}: {e}", out_dir.display())))?;

        let job_file = job_dir.join("job.jsonl");
        write_job(&job_file, &job_dir, requests, params)?;

        let mut args = self.prefix_args.clone();
        args.push("generate".to_string());
        args.extend(self.flags.iter().cloned());
        args.push("--job".to_string());
        args.push(job_file.display().to_string());
        args.push("--out-dir".to_string());
        args.push(out_dir.display().to_string());
        if let Some(seed) = params.seed {
            args.push("--seed".to_string());
            args.push(seed.to_string());
        }

        debug!(items = requests.len(), job = job_no, "dispatching worker job");
        let output = run_worker(&self.program, &args, self.timeout)?;
        if !output.status.success() {
            return Err(DuetError::Generation(format!(
                "worker exited with {}: {}",
                output.status,
                tail(&output.stderr)
            )));
        }

        let mut replies = parse_replies(&output.stdout);
        Ok(requests
            .iter()
            .map(|request| match replies.remove(&request.index) {
                Some(WorkerReply {
                    error: Some(error), ..
                }) => Err(DuetError::Generation(error)),
                Some(WorkerReply {
                    audio: Some(path), ..
                }) => {
                    let path = if path.is_absolute() {
                        path
                    } else {
                        out_dir.join(path)
                    };
                    read_wav(&path).map_err(|e| DuetError::Generation(format!("{e:#}")))
                }
                Some(_) => Err(DuetError::Generation(
                    "worker reply carried neither audio nor error".to_string(),
                )),
                None => Err(DuetError::Generation(format!(
                    "worker produced no result for item {}",
                    request.index
                ))),
            })
            .collect())
    }
}

impl SpeechBackend for CommandBackend {
    fn generate(
        &self,
        request: &GenerationRequest,
        params: &GenerationParams,
    ) -> DuetResult<RawAudio> {
        self.run_job(std::slice::from_ref(request), params)?
            .pop()
            .unwrap_or_else(|| Err(DuetError::Generation("empty worker job".to_string())))
    }

    fn generate_batch(
        &self,
        requests: &[GenerationRequest],
        params: &GenerationParams,
    ) -> DuetResult<Vec<DuetResult<RawAudio>>> {
        self.run_job(requests, params)
    }

    fn release(&self) {
        let taken = self
            .scratch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(dir) = taken {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                warn!(dir = %path.display(), error = %e, "failed to remove scratch dir");
            }
        }
    }
}

impl Drop for CommandBackend {
    fn drop(&mut self) {
        self.release();
    }
}

#[derive(Serialize)]
struct JobLine<'a> {
    index: usize,
    text: &'a str,
    system_prompt: &'a str,
    prompts: Vec<JobPrompt<'a>>,
}

#[derive(Serialize)]
struct JobPrompt<'a> {
    speaker: Option<u8>,
    audio: PathBuf,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct WorkerReply {
    index: usize,
    #[serde(default)]
    audio: Option<PathBuf>,
    #[serde(default)]
    error: Option<String>,
}

fn model_flags(spec: &ModelRefs, strategy: ExecutionStrategy, device: ComputeDevice) -> Vec<String> {
    vec![
        "--model".to_string(),
        spec.model_ref.clone(),
        "--tokenizer-config".to_string(),
        spec.tokenizer_config.clone(),
        "--checkpoint".to_string(),
        spec.checkpoint_ref.clone(),
        "--strategy".to_string(),
        strategy.to_string(),
        "--device".to_string(),
        device.to_string(),
        "--dtype".to_string(),
        spec.precision.to_string(),
    ]
}

fn write_job(
    job_file: &Path,
    job_dir: &Path,
    requests: &[GenerationRequest],
    params: &GenerationParams,
) -> DuetResult<()> {
    let file = fs::File::create(job_file)
        .map_err(|e| DuetError::Generation(format!("create {}: {e}", job_file.display())))?;
    let mut out = BufWriter::new(file);

    for request in requests {
        let mut prompts = Vec::new();
        for (speaker, clip) in request.conditioning.clips() {
            let name = match speaker {
                Some(id) => format!("item{}_{id}.wav", request.index),
                None => format!("item{}_prompt.wav", request.index),
            };
            let path = job_dir.join(name);
            write_wav(&path, &clip.audio).map_err(|e| DuetError::Generation(format!("{e:#}")))?;
            prompts.push(JobPrompt {
                speaker: speaker.map(|id| id.number()),
                audio: path,
                text: &clip.text,
            });
        }

        let line = JobLine {
            index: request.index,
            text: &request.text,
            system_prompt: &params.system_prompt,
            prompts,
        };
        serde_json::to_writer(&mut out, &line)
            .map_err(|e| DuetError::Generation(format!("encode job line: {e}")))?;
        out.write_all(b"\n")
            .map_err(|e| DuetError::Generation(format!("write {}: {e}", job_file.display())))?;
    }

    out.flush()
        .map_err(|e| DuetError::Generation(format!("write {}: {e}", job_file.display())))
}

/// Last reply per index wins; anything that is not a reply is logged.
fn parse_replies(stdout: &[u8]) -> HashMap<usize, WorkerReply> {
    let mut replies = HashMap::new();
    for line in String::from_utf8_lossy(stdout).lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<WorkerReply>(line) {
            Ok(reply) => {
                replies.insert(reply.index, reply);
            }
            Err(_) => debug!(line, "ignoring worker output"),
        }
    }
    replies
}

struct WorkerOutput {
    status: ExitStatus,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

fn run_worker(program: &str, args: &[String], timeout: Option<Duration>) -> DuetResult<WorkerOutput> {
    let rendered = format!("{program} {}", args.join(" "));
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| DuetError::Configuration(format!("cannot start `{program}`: {e}")))?;

    let stdout_rx = drain(child.stdout.take());
    let stderr_rx = drain(child.stderr.take());
    let started_at = Instant::now();

    loop {
        let polled = child
            .try_wait()
            .map_err(|e| DuetError::Generation(format!("wait for `{rendered}`: {e}")))?;
        if let Some(status) = polled {
            return Ok(WorkerOutput {
                status,
                stdout: stdout_rx.recv_timeout(PIPE_DRAIN).unwrap_or_default(),
                stderr: stderr_rx.recv_timeout(PIPE_DRAIN).unwrap_or_default(),
            });
        }

        if let Some(limit) = timeout
            && started_at.elapsed() >= limit
        {
            let _ = child.kill();
            let _ = child.wait();
            let stderr = stderr_rx.recv_timeout(PIPE_DRAIN).unwrap_or_default();
            return Err(DuetError::Generation(format!(
                "`{rendered}` timed out after {}s: {}",
                limit.as_secs(),
                tail(&stderr)
            )));
        }

        thread::sleep(POLL_INTERVAL);
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> mpsc::Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        let _ = tx.send(buf);
    });
    rx
}

fn tail(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim();
    let start = text
        .char_indices()
        .rev()
        .nth(STDERR_TAIL - 1)
        .map_or(0, |(i, _)| i);
    text[start..].to_string()
}
