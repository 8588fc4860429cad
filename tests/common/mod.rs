//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`], which builds a full [`AppContext`] whose
//! artifact directory and fake engine scripts live in a temp dir. The
//! [`TestHarness::with_server`] constructor also starts workers and Axum on a
//! random port for HTTP-level testing.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use dr_core::config::{Config, DeliveryPolicyConfig};
use dr_core::{JobId, JobRecord};
use dr_engine::{ConversionEngine, LibreOfficeEngine, NativeOfficeEngine, ProcessInfo, ProcessTable};
use dr_server::AppContext;

/// How a fake engine script behaves when asked to convert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Writes a 4 KiB output file.
    Succeed,
    /// Sleeps far past any test timeout.
    Hang,
    /// Exits non-zero without output.
    Crash,
    /// Exits cleanly with an empty output file.
    Empty,
    /// Succeeds slowly, failing if another invocation is running.
    Exclusive,
    /// Not installed at all.
    Missing,
}

/// Fake engines in priority order.
#[derive(Debug, Clone, Copy)]
pub struct Engines {
    pub libreoffice: Behavior,
    pub native: Behavior,
}

impl Engines {
    pub fn new(libreoffice: Behavior, native: Behavior) -> Self {
        Self { libreoffice, native }
    }
}

/// A process table that sees nothing and kills nothing.
pub struct EmptyProcessTable;

impl ProcessTable for EmptyProcessTable {
    fn list(&self) -> std::io::Result<Vec<ProcessInfo>> {
        Ok(Vec::new())
    }

    fn terminate(&self, _pid: u32) -> std::io::Result<()> {
        Ok(())
    }

    fn terminate_by_name(&self, _name: &str) -> std::io::Result<usize> {
        Ok(0)
    }
}

pub struct TestHarness {
    pub ctx: AppContext,
    pub dir: tempfile::TempDir,
    pub cancel: CancellationToken,
    server: Option<JoinHandle<dr_core::Result<()>>>,
}

impl TestHarness {
    /// Harness with fast timeouts and delivery retries.
    pub fn new(engines: Engines) -> Self {
        Self::with_config(engines, |_| {})
    }

    /// Harness with a config tweak applied on top of the test defaults.
    pub fn with_config(engines: Engines, tweak: impl FnOnce(&mut Config)) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let mut config = test_config(dir.path());
        tweak(&mut config);

        let engines: Vec<Arc<dyn ConversionEngine>> = vec![
            Arc::new(LibreOfficeEngine::with_executable(write_engine(
                dir.path(),
                "soffice",
                engines.libreoffice,
                EngineStyle::LibreOffice,
            ))),
            Arc::new(NativeOfficeEngine::with_executable(write_engine(
                dir.path(),
                "docx2pdf",
                engines.native,
                EngineStyle::Native,
            ))),
        ];

        let ctx = AppContext::with_engines(config, engines, Arc::new(EmptyProcessTable));

        Self {
            ctx,
            dir,
            cancel: CancellationToken::new(),
            server: None,
        }
    }

    /// Start workers and the HTTP server on a random port.
    pub async fn with_server(engines: Engines) -> (Self, SocketAddr) {
        Self::with_server_config(engines, |_| {}).await
    }

    pub async fn with_server_config(
        engines: Engines,
        tweak: impl FnOnce(&mut Config),
    ) -> (Self, SocketAddr) {
        let mut harness = Self::with_config(engines, tweak);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        let ctx = harness.ctx.clone();
        let cancel = harness.cancel.clone();
        harness.server = Some(tokio::spawn(dr_server::serve(ctx, listener, cancel)));

        (harness, addr)
    }

    pub fn local_dir(&self) -> PathBuf {
        self.ctx.config.storage.local_dir.clone()
    }

    /// Poll the status table until the job is terminal.
    pub async fn wait_for_terminal(&self, id: JobId) -> JobRecord {
        tokio::time::timeout(Duration::from_secs(20), async {
            loop {
                if let Some(record) = self.ctx.status.get(id) {
                    if record.status.is_terminal() {
                        return record;
                    }
                }
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
        })
        .await
        .expect("job did not reach a terminal state")
    }

    /// Cancel and wait for the server and workers to stop.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(server) = self.server.take() {
            tokio::time::timeout(Duration::from_secs(10), server)
                .await
                .expect("server did not stop")
                .expect("server task panicked")
                .expect("server returned an error");
        }
    }
}

/// Defaults tuned for tests: 1s conversion timeout, millisecond backoff, no
/// periodic reaping.
pub fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.storage.local_dir = dir.join("document");
    config.engines.convert_timeout_secs = 1;
    config.engines.kill_grace_secs = 1;
    config.engines.probe_timeout_secs = 2;
    config.engines.probe_cache_secs = 0;
    config.reaper.enabled = false;
    config.workers.count = 2;

    let fast = |path: &str, max_attempts| DeliveryPolicyConfig {
        path: path.to_string(),
        max_attempts,
        initial_delay_ms: 10,
        multiplier: 2,
        max_delay_ms: 80,
        timeout_secs: 5,
        connect_timeout_secs: 2,
    };
    config.delivery.callback = fast("check/responseBalikConvert", 3);
    config.delivery.upload = fast("check/responseBalikUpload", 5);
    config
}

#[derive(Debug, Clone, Copy)]
enum EngineStyle {
    /// Output lands in `--outdir` named after the input stem.
    LibreOffice,
    /// `<exe> <input> <output>`.
    Native,
}

fn write_engine(dir: &Path, name: &str, behavior: Behavior, style: EngineStyle) -> PathBuf {
    let path = dir.join(name);
    if behavior == Behavior::Missing {
        return path;
    }

    let output = match style {
        EngineStyle::LibreOffice => "for a; do last=$a; done\nout=\"${last%.*}.pdf\"",
        EngineStyle::Native => "out=\"$2\"",
    };
    let busy = dir.join(format!("{name}.busy"));
    let action = match behavior {
        Behavior::Succeed => "head -c 4096 /dev/zero > \"$out\"".to_string(),
        Behavior::Hang => "sleep 60".to_string(),
        Behavior::Crash => "echo 'engine crashed' >&2; exit 3".to_string(),
        Behavior::Empty => ": > \"$out\"".to_string(),
        Behavior::Exclusive => format!(
            "mkdir '{busy}' || exit 4\nsleep 0.3\nhead -c 4096 /dev/zero > \"$out\"\nrmdir '{busy}'",
            busy = busy.display()
        ),
        Behavior::Missing => unreachable!(),
    };

    let script = format!(
        "#!/bin/sh\nif [ \"$1\" = \"--version\" ]; then echo fake 1.0; exit 0; fi\n{output}\n{action}\n"
    );
    std::fs::write(&path, script).expect("failed to write engine script");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("failed to chmod engine script");
    path
}

/// Multipart body for `POST /convert`.
pub fn convert_form(key: &str, file_name: &str, callback: &str) -> reqwest::multipart::Form {
    reqwest::multipart::Form::new()
        .part(
            "file",
            reqwest::multipart::Part::bytes(b"PK\x03\x04 fake docx".to_vec()).file_name(file_name.to_string()),
        )
        .text("target_key", key.to_string())
        .text("target_url", callback.to_string())
}
