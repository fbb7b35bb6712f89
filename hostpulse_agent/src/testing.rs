//! In-memory stand-ins for the host and the pty layer, used by unit and
//! integration tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};

use crate::error::{ExecError, SessionError};
use crate::host::HostSource;
use crate::pty::{PtyProcess, PtySpawner, SpawnedPty};

pub const FAKE_MEMINFO: &str = "MemTotal:        1000 kB\n\
MemFree:          200 kB\n\
Buffers:           50 kB\n\
Cached:            50 kB\n";

pub const FAKE_PS: &str = "\
USER         PID %CPU %MEM    VSZ   RSS TTY      STAT START   TIME COMMAND
root           1  0.5  0.1 168000 10240 ?        Ss   09:00   0:05 /sbin/init
alice        812 12.5  2.0 900000 204800 pts/0   R+   09:10   1:00 cargo build --release
bob          933  3.0  1.0 500000 51200 ?        Sl   09:20   0:10 node server.js
";

pub const FAKE_DF: &str = "\
Filesystem        1B-blocks         Used        Avail Use% Mounted on
/dev/sda1      107374182400  53687091200  53687091200  50% /
/dev/sdb1       53687091200  10737418240  42949672960  20% /mnt/data disk
";

pub const FAKE_OS_RELEASE: &str = "NAME=\"Fake Linux\"\nVERSION_ID=\"1.0\"\nPRETTY_NAME=\"Fake Linux 1.0\"\n";

/// Canned host whose `/proc/stat` advances 100 jiffies (50 idle) per read.
#[derive(Default)]
pub struct FakeHost {
    jiffies: AtomicU64,
    meminfo_calls: AtomicUsize,
    process_calls: AtomicUsize,
    disk_calls: AtomicUsize,
    fail_stats: AtomicBool,
    fail_processes: AtomicBool,
    fail_storage: AtomicBool,
}

fn fake_failure(program: &str) -> ExecError {
    ExecError::Failed {
        program: program.into(),
        code: Some(1),
        stderr: "simulated failure".into(),
    }
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_stats(&self, on: bool) {
        self.fail_stats.store(on, Ordering::SeqCst);
    }

    pub fn fail_processes(&self, on: bool) {
        self.fail_processes.store(on, Ordering::SeqCst);
    }

    pub fn fail_storage(&self, on: bool) {
        self.fail_storage.store(on, Ordering::SeqCst);
    }

    pub fn meminfo_calls(&self) -> usize {
        self.meminfo_calls.load(Ordering::SeqCst)
    }

    pub fn process_calls(&self) -> usize {
        self.process_calls.load(Ordering::SeqCst)
    }

    pub fn disk_calls(&self) -> usize {
        self.disk_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HostSource for FakeHost {
    async fn meminfo(&self) -> Result<String, ExecError> {
        self.meminfo_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_stats.load(Ordering::SeqCst) {
            return Err(fake_failure("meminfo"));
        }
        Ok(FAKE_MEMINFO.into())
    }

    async fn cpu_stat(&self) -> Result<String, ExecError> {
        let n = self.jiffies.fetch_add(1, Ordering::SeqCst) + 1;
        // user nice system idle iowait: 50 busy + 50 idle per read
        Ok(format!("cpu  {} 0 {} {} {}\ncpu0 1 0 0 1 0\n", n * 30, n * 20, n * 40, n * 10))
    }

    async fn uptime(&self) -> Result<String, ExecError> {
        Ok("3600.42 7000.00\n".into())
    }

    async fn os_release(&self) -> Result<String, ExecError> {
        Ok(FAKE_OS_RELEASE.into())
    }

    async fn process_table(&self) -> Result<String, ExecError> {
        self.process_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_processes.load(Ordering::SeqCst) {
            return Err(fake_failure("ps"));
        }
        Ok(FAKE_PS.into())
    }

    async fn disk_usage(&self) -> Result<String, ExecError> {
        self.disk_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_storage.load(Ordering::SeqCst) {
            return Err(fake_failure("df"));
        }
        Ok(FAKE_DF.into())
    }
}

#[derive(Default)]
struct FakePtyState {
    input: Mutex<Vec<u8>>,
    geometry: Mutex<(u16, u16)>,
    killed: AtomicBool,
    input_closed: AtomicBool,
    reject_resize: AtomicBool,
    exit: Mutex<Option<oneshot::Sender<i32>>>,
}

/// Test-side view of one fake terminal process.
#[derive(Clone)]
pub struct FakePtyHandle {
    state: Arc<FakePtyState>,
    output: mpsc::Sender<Vec<u8>>,
}

impl FakePtyHandle {
    pub fn input(&self) -> Vec<u8> {
        self.state.input.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn geometry(&self) -> (u16, u16) {
        self.state.geometry.lock().map(|g| *g).unwrap_or_default()
    }

    pub fn was_killed(&self) -> bool {
        self.state.killed.load(Ordering::SeqCst)
    }

    /// Makes further writes fail while the session stays registered.
    pub fn close_input(&self) {
        self.state.input_closed.store(true, Ordering::SeqCst);
    }

    pub fn reject_resize(&self, on: bool) {
        self.state.reject_resize.store(on, Ordering::SeqCst);
    }

    /// Emits terminal output as if the shell printed it.
    pub async fn emit(&self, bytes: &[u8]) {
        let _ = self.output.send(bytes.to_vec()).await;
    }

    /// Makes the shell exit on its own.
    pub fn exit(&self, code: i32) {
        if let Some(tx) = self.state.exit.lock().ok().and_then(|mut e| e.take()) {
            let _ = tx.send(code);
        }
    }
}

struct FakePty {
    handle: FakePtyHandle,
}

impl PtyProcess for FakePty {
    fn write(&self, data: &[u8]) -> io::Result<()> {
        if self.handle.was_killed() || self.handle.state.input_closed.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "input closed"));
        }
        if let Ok(mut input) = self.handle.state.input.lock() {
            input.extend_from_slice(data);
        }
        // local echo, like a shell in cooked mode
        let _ = self.handle.output.try_send(data.to_vec());
        Ok(())
    }

    fn resize(&self, cols: u16, rows: u16) -> Result<(), SessionError> {
        if self.handle.state.reject_resize.load(Ordering::SeqCst) {
            return Err(SessionError::Pty("resize rejected".into()));
        }
        if let Ok(mut g) = self.handle.state.geometry.lock() {
            *g = (cols, rows);
        }
        Ok(())
    }

    fn kill(&self) -> io::Result<()> {
        self.handle.state.killed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Spawner that hands out [`FakePtyHandle`]s instead of real shells.
#[derive(Default)]
pub struct FakeSpawner {
    spawned: Mutex<Vec<FakePtyHandle>>,
    fail_spawn: AtomicBool,
}

impl FakeSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_spawn(&self, on: bool) {
        self.fail_spawn.store(on, Ordering::SeqCst);
    }

    pub fn spawned(&self) -> usize {
        self.spawned.lock().map(|v| v.len()).unwrap_or(0)
    }

    pub fn last(&self) -> Option<FakePtyHandle> {
        self.spawned.lock().ok().and_then(|v| v.last().cloned())
    }
}

impl PtySpawner for FakeSpawner {
    fn spawn(&self, cols: u16, rows: u16) -> Result<SpawnedPty, SessionError> {
        if self.fail_spawn.load(Ordering::SeqCst) {
            return Err(SessionError::Pty("no pty available".into()));
        }
        let (output_tx, output) = mpsc::channel(64);
        let (exit_tx, exit) = oneshot::channel();
        let handle = FakePtyHandle {
            state: Arc::new(FakePtyState {
                geometry: Mutex::new((cols, rows)),
                exit: Mutex::new(Some(exit_tx)),
                ..FakePtyState::default()
            }),
            output: output_tx,
        };
        if let Ok(mut v) = self.spawned.lock() {
            v.push(handle.clone());
        }
        Ok(SpawnedPty {
            process: Box::new(FakePty { handle }),
            output,
            exit,
        })
    }
}

/// Command runner that records every invocation instead of running it.
/// Queued outputs are returned in order, then empty stdout.
#[derive(Default)]
pub struct RecordingRunner {
    calls: Mutex<Vec<Vec<String>>>,
    outputs: Mutex<VecDeque<String>>,
    fail: AtomicBool,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, on: bool) {
        self.fail.store(on, Ordering::SeqCst);
    }

    pub fn push_output(&self, stdout: impl Into<String>) {
        if let Ok(mut q) = self.outputs.lock() {
            q.push_back(stdout.into());
        }
    }

    /// Each call as `[program, args...]`.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl crate::exec::CommandRunner for RecordingRunner {
    async fn run(
        &self,
        program: &str,
        args: &[&str],
        _timeout: std::time::Duration,
    ) -> Result<String, ExecError> {
        let mut call = vec![program.to_string()];
        call.extend(args.iter().map(|a| a.to_string()));
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(fake_failure(program));
        }
        Ok(self
            .outputs
            .lock()
            .ok()
            .and_then(|mut q| q.pop_front())
            .unwrap_or_default())
    }
}
