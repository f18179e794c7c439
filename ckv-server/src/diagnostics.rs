//! # Diagnostics Hooks
//!
//! `start` begins CPU profiling; `stop` persists a memory snapshot and then
//! ends CPU profiling. Nothing here touches the store.
//!
//! Failures are not part of the client error taxonomy: the dispatcher hands
//! them to [`fatal`], which terminates the process.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use pprof::protos::Message;
use pprof::{ProfilerGuard, ProfilerGuardBuilder};
use tracing::{error, info};

use crate::error::DiagnosticsError;

/// File written with the CPU profile (pprof protobuf).
pub const CPU_PROFILE_FILE: &str = "cpu.prof";

/// File written with the memory snapshot.
pub const MEM_PROFILE_FILE: &str = "mem.prof";

/// Sampling frequency for CPU profiles, in Hz.
pub const DEFAULT_SAMPLE_HZ: i32 = 100;

/// Backend that actually captures profiles.
pub trait Profiler: Send + Sync {
    /// Begins CPU sampling. Errors if a capture is already running.
    fn start_cpu(&self) -> Result<(), DiagnosticsError>;

    /// Ends CPU sampling and persists the profile. No-op when idle.
    fn stop_cpu(&self) -> Result<(), DiagnosticsError>;

    /// Persists a snapshot of process memory usage.
    fn write_heap_snapshot(&self) -> Result<(), DiagnosticsError>;
}

/// Front door used by the `start`/`stop` commands.
#[derive(Clone)]
pub struct Diagnostics {
    profiler: Arc<dyn Profiler>,
}

impl Diagnostics {
    pub fn new(profiler: Arc<dyn Profiler>) -> Self {
        Diagnostics { profiler }
    }

    pub fn start(&self) -> Result<(), DiagnosticsError> {
        self.profiler.start_cpu()?;
        info!("cpu profiling started");
        Ok(())
    }

    /// Memory snapshot first, then CPU, so the snapshot is taken while the
    /// profiler's buffers are still allocated.
    pub fn stop(&self) -> Result<(), DiagnosticsError> {
        self.profiler.write_heap_snapshot()?;
        self.profiler.stop_cpu()?;
        info!("profiles written");
        Ok(())
    }
}

/// Logs a diagnostics failure and terminates the process.
pub fn fatal(err: &DiagnosticsError) -> ! {
    error!(error = %err, category = ?err.category(), "prof err");
    std::process::exit(1)
}

struct CpuCapture {
    guard: ProfilerGuard<'static>,
    file: File,
}

/// Profiler backed by `pprof` sampling, writing into a directory.
pub struct PprofProfiler {
    dir: PathBuf,
    frequency: i32,
    active: Mutex<Option<CpuCapture>>,
}

impl PprofProfiler {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        PprofProfiler {
            dir: dir.into(),
            frequency: DEFAULT_SAMPLE_HZ,
            active: Mutex::new(None),
        }
    }

    pub fn with_frequency(mut self, frequency: i32) -> Self {
        self.frequency = frequency;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Profiler for PprofProfiler {
    fn start_cpu(&self) -> Result<(), DiagnosticsError> {
        let mut active = self.active.lock();
        if active.is_some() {
            return Err(DiagnosticsError::AlreadyRunning);
        }
        let file = File::create(self.dir.join(CPU_PROFILE_FILE))?;
        let guard = ProfilerGuardBuilder::default()
            .frequency(self.frequency)
            .blocklist(&["libc", "libgcc", "pthread", "vdso"])
            .build()?;
        *active = Some(CpuCapture { guard, file });
        Ok(())
    }

    fn stop_cpu(&self) -> Result<(), DiagnosticsError> {
        let Some(CpuCapture { guard, mut file }) = self.active.lock().take() else {
            return Ok(());
        };
        let profile = guard.report().build()?.pprof()?;
        drop(guard);

        let mut content = Vec::new();
        profile
            .encode(&mut content)
            .map_err(|err| DiagnosticsError::Encode(err.to_string()))?;
        file.write_all(&content)?;
        file.sync_all()?;
        Ok(())
    }

    fn write_heap_snapshot(&self) -> Result<(), DiagnosticsError> {
        let status = fs::read_to_string("/proc/self/status")?;
        let snapshot = memory_lines(&status);
        let mut file = File::create(self.dir.join(MEM_PROFILE_FILE))?;
        writeln!(file, "# process memory snapshot")?;
        for line in snapshot {
            writeln!(file, "{line}")?;
        }
        file.sync_all()?;
        Ok(())
    }
}

/// Keeps the `Vm*` and `Rss*` lines of `/proc/<pid>/status`.
fn memory_lines(status: &str) -> Vec<&str> {
    status
        .lines()
        .filter(|line| line.starts_with("Vm") || line.starts_with("Rss"))
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Profiler double that records calls and can be told to fail.
    #[derive(Default)]
    pub(crate) struct RecordingProfiler {
        pub calls: Mutex<Vec<&'static str>>,
        pub fail_start: bool,
    }

    impl Profiler for RecordingProfiler {
        fn start_cpu(&self) -> Result<(), DiagnosticsError> {
            self.calls.lock().push("start_cpu");
            if self.fail_start {
                return Err(DiagnosticsError::AlreadyRunning);
            }
            Ok(())
        }

        fn stop_cpu(&self) -> Result<(), DiagnosticsError> {
            self.calls.lock().push("stop_cpu");
            Ok(())
        }

        fn write_heap_snapshot(&self) -> Result<(), DiagnosticsError> {
            self.calls.lock().push("heap");
            Ok(())
        }
    }

    #[test]
    fn stop_writes_heap_before_cpu() {
        let profiler = Arc::new(RecordingProfiler::default());
        let diagnostics = Diagnostics::new(profiler.clone());
        diagnostics.start().unwrap();
        diagnostics.stop().unwrap();
        assert_eq!(*profiler.calls.lock(), vec!["start_cpu", "heap", "stop_cpu"]);
    }

    #[test]
    fn start_failure_is_reported() {
        let profiler = Arc::new(RecordingProfiler {
            fail_start: true,
            ..Default::default()
        });
        let diagnostics = Diagnostics::new(profiler);
        assert!(matches!(
            diagnostics.start(),
            Err(DiagnosticsError::AlreadyRunning)
        ));
    }

    #[test]
    fn filters_memory_lines() {
        let status = "Name:\tckv\nVmPeak:\t 100 kB\nThreads:\t4\nVmRSS:\t 50 kB\nRssAnon:\t 40 kB\n";
        assert_eq!(
            memory_lines(status),
            vec!["VmPeak:\t 100 kB", "VmRSS:\t 50 kB", "RssAnon:\t 40 kB"]
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn heap_snapshot_lands_in_profile_dir() {
        let dir = tempfile::tempdir().unwrap();
        let profiler = PprofProfiler::new(dir.path());
        profiler.write_heap_snapshot().unwrap();
        let written = fs::read_to_string(dir.path().join(MEM_PROFILE_FILE)).unwrap();
        assert!(written.starts_with("# process memory snapshot"));
        assert!(written.contains("VmRSS"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn cpu_capture_cycle_writes_a_profile() {
        let dir = tempfile::tempdir().unwrap();
        let profiler = PprofProfiler::new(dir.path()).with_frequency(1000);

        profiler.start_cpu().unwrap();
        assert!(matches!(
            profiler.start_cpu(),
            Err(DiagnosticsError::AlreadyRunning)
        ));

        let mut acc: u64 = 0;
        for i in 0..2_000_000u64 {
            acc = acc.wrapping_mul(31).wrapping_add(i);
        }
        std::hint::black_box(acc);

        profiler.write_heap_snapshot().unwrap();
        profiler.stop_cpu().unwrap();

        let cpu = fs::metadata(dir.path().join(CPU_PROFILE_FILE)).unwrap();
        assert!(cpu.len() > 0);
        assert!(dir.path().join(MEM_PROFILE_FILE).exists());

        profiler.start_cpu().unwrap();
        profiler.stop_cpu().unwrap();
    }

    #[test]
    fn stop_without_start_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let profiler = PprofProfiler::new(dir.path());
        profiler.stop_cpu().unwrap();
        assert!(!dir.path().join(CPU_PROFILE_FILE).exists());
    }
}
